//! Request/response endpoints.
//!
//! A [`QueryFile`] gives every handle its own conversation: writing a
//! request through a handle runs the endpoint, and reads through that same
//! handle return the answer. Other handles never see it.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use crate::vfs::module::{read_slice, Module};
use crate::vfs::{FileHandle, FsError, FsResult};

/// Default path the resolver is bound at.
pub const RESOLVER_PATH: &str = "/net/resolve";

type Handler = Box<dyn FnMut(&[u8]) -> FsResult<Vec<u8>> + Send>;

/// Per-open request/response endpoint.
pub struct QueryFile {
    handler: Handler,
    responses: HashMap<FileHandle, Vec<u8>>,
}

impl QueryFile {
    /// An endpoint answering each request with `handler(request)`.
    pub fn new(handler: impl FnMut(&[u8]) -> FsResult<Vec<u8>> + Send + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            responses: HashMap::new(),
        }
    }

    /// Host name resolution.
    ///
    /// Write `host` or `host:port`; read back one socket address per line.
    pub fn resolver() -> Self {
        Self::new(resolve)
    }

    /// Number of handles holding a conversation.
    pub fn open_count(&self) -> usize {
        self.responses.len()
    }
}

fn resolve(request: &[u8]) -> FsResult<Vec<u8>> {
    let host = std::str::from_utf8(request)
        .map_err(|e| FsError::InvalidData(e.to_string()))?
        .trim();
    if host.is_empty() {
        return Err(FsError::InvalidData("empty host name".into()));
    }

    let lookup_failed = |e: std::io::Error| FsError::NoSuchPath(format!("{host}: {e}"));
    let addrs: Vec<SocketAddr> = if let Ok(ip) = host.parse::<IpAddr>() {
        vec![SocketAddr::new(ip, 0)]
    } else if host.contains(':') {
        host.to_socket_addrs().map_err(lookup_failed)?.collect()
    } else {
        (host, 0).to_socket_addrs().map_err(lookup_failed)?.collect()
    };

    let mut out = String::new();
    for addr in addrs {
        if addr.port() == 0 {
            out.push_str(&addr.ip().to_string());
        } else {
            out.push_str(&addr.to_string());
        }
        out.push('\n');
    }
    if out.is_empty() {
        return Err(FsError::NoData);
    }
    Ok(out.into_bytes())
}

impl Module for QueryFile {
    fn open(&mut self, fh: &FileHandle) -> FsResult<()> {
        self.responses.insert(*fh, Vec::new());
        Ok(())
    }

    fn close(&mut self, fh: &FileHandle) -> FsResult<()> {
        self.responses.remove(fh);
        Ok(())
    }

    fn read(&mut self, fh: &FileHandle, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        let response = self.responses.get(fh).ok_or(FsError::NotOpen)?;
        Ok(read_slice(response, buf, offset))
    }

    /// A request is written whole, at offset zero.
    fn write(&mut self, fh: &FileHandle, data: &[u8], offset: u64) -> FsResult<usize> {
        if offset != 0 {
            return Err(FsError::not_supported("requests are written at offset 0"));
        }
        if !self.responses.contains_key(fh) {
            return Err(FsError::NotOpen);
        }
        let answer = (self.handler)(data)?;
        self.responses.insert(*fh, answer);
        Ok(data.len())
    }

    fn size(&self) -> u64 {
        0
    }
}
