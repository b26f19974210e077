//! Structured device state behind a file.
//!
//! A [`StateFile`] serves the JSON encoding of a value. Writing a new
//! encoding asks a [`Controller`] to apply it, and the file only takes the
//! new value once the controller agrees. Whoever owns the device keeps a
//! [`StateCell`] to publish state it observes on its own.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};

use crate::vfs::module::{read_slice, Module};
use crate::vfs::{FileHandle, FsError, FsResult};

/// Applies a requested state to a device.
pub trait Controller<T>: Send + Sync {
    /// Apply `state` to the device called `device`. Returning an error
    /// leaves the published state untouched.
    fn apply(&self, device: &str, state: &T) -> FsResult<()>;
}

/// Shared view of the published state.
#[derive(Debug)]
pub struct StateCell<T>(Arc<Mutex<T>>);

impl<T> Clone for StateCell<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Clone> StateCell<T> {
    pub fn get(&self) -> T {
        self.0.lock().clone()
    }

    /// Publish an observed state without going through the controller.
    pub fn set(&self, state: T) {
        *self.0.lock() = state;
    }
}

/// File serving the state of one device.
pub struct StateFile<T, C> {
    device: String,
    controller: Arc<C>,
    state: StateCell<T>,
}

impl<T, C> StateFile<T, C>
where
    T: Serialize + DeserializeOwned + Clone + Send,
    C: Controller<T>,
{
    pub fn new(device: impl Into<String>, initial: T, controller: Arc<C>) -> Self {
        Self {
            device: device.into(),
            controller,
            state: StateCell(Arc::new(Mutex::new(initial))),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// A handle onto the published state.
    pub fn cell(&self) -> StateCell<T> {
        self.state.clone()
    }

    fn encoded(&self) -> FsResult<Vec<u8>> {
        let state = self.state.0.lock();
        serde_json::to_vec(&*state).map_err(|e| FsError::InvalidData(e.to_string()))
    }
}

impl<T, C> Module for StateFile<T, C>
where
    T: Serialize + DeserializeOwned + Clone + Send,
    C: Controller<T>,
{
    fn read(&mut self, _fh: &FileHandle, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        Ok(read_slice(&self.encoded()?, buf, offset))
    }

    /// The whole message is written at offset zero.
    fn write(&mut self, _fh: &FileHandle, data: &[u8], offset: u64) -> FsResult<usize> {
        if offset != 0 {
            return Err(FsError::not_supported("state is written whole at offset 0"));
        }
        let requested: T = serde_json::from_slice(data)
            .map_err(|e| FsError::MalformedMessage(e.to_string()))?;

        self.controller.apply(&self.device, &requested)?;
        tracing::debug!(device = %self.device, "state applied");
        self.state.set(requested);
        Ok(data.len())
    }

    fn size(&self) -> u64 {
        self.encoded().map(|e| e.len() as u64).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::HostId;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Lamp {
        on: bool,
        level: u8,
    }

    /// Refuses levels above 100 and remembers what it applied.
    #[derive(Default)]
    struct Dimmer {
        applied: Mutex<Vec<(String, u8)>>,
    }

    impl Controller<Lamp> for Dimmer {
        fn apply(&self, device: &str, state: &Lamp) -> FsResult<()> {
            if state.level > 100 {
                return Err(FsError::InvalidData("level out of range".into()));
            }
            self.applied.lock().push((device.to_string(), state.level));
            Ok(())
        }
    }

    fn lamp() -> (StateFile<Lamp, Dimmer>, Arc<Dimmer>) {
        let dimmer = Arc::new(Dimmer::default());
        let file = StateFile::new("lamp0", Lamp { on: false, level: 0 }, Arc::clone(&dimmer));
        (file, dimmer)
    }

    fn read_all(file: &mut StateFile<Lamp, Dimmer>) -> Vec<u8> {
        let mut buf = vec![0u8; 256];
        let n = file.read(&FileHandle::new(HostId::new(), 0), &mut buf, 0).unwrap();
        buf.truncate(n);
        buf
    }

    #[test]
    fn test_read_serves_encoded_state() {
        let (mut file, _) = lamp();
        assert_eq!(read_all(&mut file), br#"{"on":false,"level":0}"#);
        assert_eq!(file.size(), 22);
    }

    #[test]
    fn test_write_commits_after_controller() {
        let (mut file, dimmer) = lamp();
        let fh = FileHandle::new(HostId::new(), 0);
        let msg = br#"{"on":true,"level":40}"#;
        assert_eq!(file.write(&fh, msg, 0).unwrap(), msg.len());

        assert_eq!(file.cell().get(), Lamp { on: true, level: 40 });
        assert_eq!(*dimmer.applied.lock(), vec![("lamp0".to_string(), 40)]);
    }

    #[test]
    fn test_refused_write_keeps_state() {
        let (mut file, _) = lamp();
        let fh = FileHandle::new(HostId::new(), 0);
        let err = file.write(&fh, br#"{"on":true,"level":200}"#, 0).unwrap_err();
        assert!(matches!(err, FsError::InvalidData(_)));
        assert_eq!(file.cell().get(), Lamp { on: false, level: 0 });
    }

    #[test]
    fn test_malformed_message() {
        let (mut file, dimmer) = lamp();
        let fh = FileHandle::new(HostId::new(), 0);
        let err = file.write(&fh, b"{not json", 0).unwrap_err();
        assert!(matches!(err, FsError::MalformedMessage(_)));
        assert!(dimmer.applied.lock().is_empty());
    }

    #[test]
    fn test_write_at_offset_rejected() {
        let (mut file, _) = lamp();
        let fh = FileHandle::new(HostId::new(), 0);
        assert!(matches!(
            file.write(&fh, br#"{"on":true,"level":1}"#, 3),
            Err(FsError::NotSupported(_))
        ));
    }

    #[test]
    fn test_cell_publishes_observed_state() {
        let (mut file, _) = lamp();
        file.cell().set(Lamp { on: true, level: 7 });
        assert_eq!(read_all(&mut file), br#"{"on":true,"level":7}"#);
    }
}
