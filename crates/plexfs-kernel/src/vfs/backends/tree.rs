//! In-memory path-tree backend.
//!
//! Entries live in an arena addressed by `EntryId`. Parent, child and
//! handle links are indices into the arena or the handle table, so tearing
//! down a subtree never leaves a dangling reference behind.
//!
//! Every entry carries exactly one binding: a [`Module`], a directory
//! marker, a symlink target, or nothing at all (a bare path node that was
//! materialised on the way to a deeper binding). A file can therefore
//! never also be a directory.

use std::fmt;
use std::time::SystemTime;

use super::paths::{segments, split_parent, stays_within};
use crate::modules::BufferFile;
use crate::vfs::error::{FsError, FsResult};
use crate::vfs::handles::HandleTable;
use crate::vfs::module::Module;
use crate::vfs::ops::FileSystem;
use crate::vfs::types::{FileHandle, FileType, HostId, Metadata, Modes, StatFs};

type EntryId = usize;

/// The root is its own parent and is never freed.
const ROOT: EntryId = 0;

const BLOCK_SIZE: u32 = 4096;

enum Binding {
    Bare,
    File(Box<dyn Module>),
    Directory,
    Symlink(String),
}

impl Binding {
    fn default_modes(&self) -> Modes {
        match self {
            Binding::Bare | Binding::Directory => Modes::from_bits(0o755),
            Binding::File(_) => Modes::from_bits(0o666),
            Binding::Symlink(_) => Modes::from_bits(0o777),
        }
    }
}

struct Entry {
    name: String,
    parent: EntryId,
    binding: Binding,
    /// Child slots. Removed children leave a `None` behind.
    children: Vec<Option<EntryId>>,
    /// Handles open on this entry, by `local_id`.
    handles: Vec<Option<u32>>,
    owner: String,
    group: String,
    modes: Modes,
    atime: SystemTime,
    mtime: SystemTime,
    ctime: SystemTime,
}

impl Entry {
    fn new(name: &str, parent: EntryId, binding: Binding) -> Self {
        let now = SystemTime::now();
        Self {
            name: name.to_string(),
            parent,
            modes: binding.default_modes(),
            binding,
            children: Vec::new(),
            handles: Vec::new(),
            owner: String::new(),
            group: String::new(),
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    fn live_children(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.children.iter().flatten().copied()
    }

    fn live_handles(&self) -> impl Iterator<Item = u32> + '_ {
        self.handles.iter().flatten().copied()
    }

    fn has_children(&self) -> bool {
        self.children.iter().any(Option::is_some)
    }

    fn is_open(&self) -> bool {
        self.handles.iter().any(Option::is_some)
    }

    /// Anything but a childless bare node.
    fn occupied(&self) -> bool {
        !matches!(self.binding, Binding::Bare) || self.has_children()
    }
}

/// Store `value` in the first empty slot, appending if there is none.
fn fill_slot<T>(slots: &mut Vec<Option<T>>, value: T) {
    match slots.iter().position(Option::is_none) {
        Some(i) => slots[i] = Some(value),
        None => slots.push(Some(value)),
    }
}

struct OpenFile {
    entry: EntryId,
    writable: bool,
}

/// In-memory hierarchical namespace of bound capabilities.
///
/// Not internally synchronised. Wrap it in a [`SharedFs`](crate::SharedFs)
/// to share it between threads.
pub struct TreeBackend {
    host: HostId,
    entries: Vec<Option<Entry>>,
    free: Vec<EntryId>,
    handles: HandleTable<OpenFile>,
}

impl Default for TreeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TreeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeBackend")
            .field("host", &self.host)
            .field("entries", &self.entry_count())
            .field("open_handles", &self.open_handles())
            .finish()
    }
}

impl TreeBackend {
    /// Create an empty tree holding only the root directory.
    pub fn new() -> Self {
        Self::with_host(HostId::new())
    }

    /// Create an empty tree that issues handles for `host`.
    pub fn with_host(host: HostId) -> Self {
        Self {
            host,
            entries: vec![Some(Entry::new("", ROOT, Binding::Directory))],
            free: Vec::new(),
            handles: HandleTable::new(),
        }
    }

    /// Bind `module` at `path`, creating missing parents.
    ///
    /// Fails `TypeConflict` if the path is a directory or has children.
    /// Binding over an existing file replaces it: handles open on the old
    /// module are closed there and reopened on the new one.
    pub fn add_file(&mut self, path: &str, module: impl Module + 'static) -> FsResult<()> {
        self.bind_module(path, Box::new(module)).map(|_| ())
    }

    /// Mark `path` as a directory, creating missing parents.
    ///
    /// Always succeeds on a reachable path. A file bound there is dropped
    /// and its handles released.
    pub fn add_directory(&mut self, path: &str) -> FsResult<()> {
        self.bind_directory(path).map(|_| ())
    }

    /// Delete the entry at `path`.
    ///
    /// Refuses while the entry itself is open. Without `force`, refuses
    /// while it has children; with `force`, descendants are torn down and
    /// their handles released.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn remove_path(&mut self, path: &str, force: bool) -> FsResult<()> {
        let id = self
            .lookup(path)
            .ok_or_else(|| FsError::no_such_path(path))?;
        if id == ROOT {
            return Err(FsError::permission_denied("the root cannot be removed"));
        }
        let entry = self.node(id);
        if entry.is_open() {
            return Err(FsError::Busy(path.to_string()));
        }
        if !force && entry.has_children() {
            return Err(FsError::DirectoryNotEmpty(path.to_string()));
        }
        self.detach(id);
        self.destroy(id);
        Ok(())
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> usize {
        self.handles.live()
    }

    /// Number of live entries, the root included.
    pub fn entry_count(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    // ========================================================================
    // Arena
    // ========================================================================

    fn node(&self, id: EntryId) -> &Entry {
        self.entries[id].as_ref().expect("dangling entry id")
    }

    fn node_mut(&mut self, id: EntryId) -> &mut Entry {
        self.entries[id].as_mut().expect("dangling entry id")
    }

    fn module_mut(&mut self, id: EntryId) -> Option<&mut (dyn Module + 'static)> {
        match &mut self.node_mut(id).binding {
            Binding::File(module) => Some(module.as_mut()),
            _ => None,
        }
    }

    fn insert(&mut self, parent: EntryId, name: &str, binding: Binding) -> EntryId {
        let entry = Entry::new(name, parent, binding);
        let id = match self.free.pop() {
            Some(id) => {
                self.entries[id] = Some(entry);
                id
            }
            None => {
                self.entries.push(Some(entry));
                self.entries.len() - 1
            }
        };
        fill_slot(&mut self.node_mut(parent).children, id);
        id
    }

    fn detach(&mut self, id: EntryId) {
        let parent = self.node(id).parent;
        for slot in &mut self.node_mut(parent).children {
            if *slot == Some(id) {
                *slot = None;
            }
        }
    }

    /// Free `id` and everything below it, children first.
    fn destroy(&mut self, id: EntryId) {
        let children: Vec<EntryId> = self.node(id).live_children().collect();
        for child in children {
            self.destroy(child);
        }
        let handles: Vec<u32> = self.node(id).live_handles().collect();
        for local_id in handles {
            self.close_on_module(id, local_id);
            self.release_handle(local_id);
        }
        debug_assert_ne!(id, ROOT, "root destroyed");
        self.entries[id] = None;
        self.free.push(id);
    }

    fn path_of(&self, mut id: EntryId) -> String {
        let mut names = Vec::new();
        while id != ROOT {
            let entry = self.node(id);
            names.push(entry.name.as_str());
            id = entry.parent;
        }
        names.reverse();
        format!("/{}", names.join("/"))
    }

    fn metadata_of(&self, id: EntryId) -> Metadata {
        let entry = self.node(id);
        let (kind, size, nlink) = match &entry.binding {
            Binding::Bare => (FileType::Unknown, 0, 1),
            Binding::File(module) => (FileType::File, module.size(), 1),
            Binding::Directory => (FileType::Directory, 0, 2),
            Binding::Symlink(target) => (FileType::Symlink, target.len() as u64, 1),
        };
        Metadata {
            path: self.path_of(id),
            kind,
            size,
            owner: entry.owner.clone(),
            group: entry.group.clone(),
            modes: entry.modes,
            nlink,
            atime: entry.atime,
            mtime: entry.mtime,
            ctime: entry.ctime,
        }
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    fn child(&self, parent: EntryId, name: &str) -> Option<EntryId> {
        self.node(parent)
            .live_children()
            .find(|&c| self.node(c).name == name)
    }

    /// Strict resolution: `None` if any segment is missing.
    fn lookup(&self, path: &str) -> Option<EntryId> {
        segments(path).try_fold(ROOT, |at, seg| self.child(at, seg))
    }

    /// Forced resolution: missing segments become bare nodes.
    fn resolve_forced(&mut self, path: &str) -> FsResult<EntryId> {
        let mut at = ROOT;
        for seg in segments(path) {
            at = match self.child(at, seg) {
                Some(next) => next,
                None => {
                    if seg == "." || seg == ".." {
                        return Err(FsError::invalid_path(path));
                    }
                    if matches!(
                        self.node(at).binding,
                        Binding::File(_) | Binding::Symlink(_)
                    ) {
                        return Err(FsError::type_conflict(path));
                    }
                    self.insert(at, seg, Binding::Bare)
                }
            };
        }
        Ok(at)
    }

    // ========================================================================
    // Handles
    // ========================================================================

    fn issue_handle(&mut self, entry: EntryId, writable: bool) -> FileHandle {
        let local_id = self.handles.allocate(OpenFile { entry, writable });
        fill_slot(&mut self.node_mut(entry).handles, local_id);
        tracing::debug!(local_id, entry, writable, "handle issued");
        FileHandle::new(self.host, local_id)
    }

    /// Drop a handle from the table and from its entry. Releasing twice
    /// returns `None`.
    fn release_handle(&mut self, local_id: u32) -> Option<EntryId> {
        let open = self.handles.release(local_id)?;
        if let Some(entry) = self.entries.get_mut(open.entry).and_then(Option::as_mut) {
            for slot in &mut entry.handles {
                if *slot == Some(local_id) {
                    *slot = None;
                }
            }
        }
        tracing::debug!(local_id, entry = open.entry, "handle released");
        Some(open.entry)
    }

    fn lookup_handle(&self, fh: &FileHandle) -> FsResult<&OpenFile> {
        if fh.host != self.host {
            return Err(FsError::InvalidFileHandle);
        }
        self.handles
            .get(fh.local_id)
            .ok_or(FsError::InvalidFileHandle)
    }

    /// Tell the module a handle is going away. Failures are logged only.
    fn close_on_module(&mut self, id: EntryId, local_id: u32) {
        let fh = FileHandle::new(self.host, local_id);
        if let Some(module) = self.module_mut(id) {
            if let Err(e) = module.close(&fh) {
                tracing::warn!(handle = %fh, error = %e, "module close failed");
            }
        }
    }

    fn open_entry(&mut self, id: EntryId, writable: bool) -> FsResult<FileHandle> {
        let fh = self.issue_handle(id, writable);
        let opened = self
            .module_mut(id)
            .map_or(Err(FsError::InvalidFileHandle), |m| m.open(&fh));
        if let Err(e) = opened {
            self.release_handle(fh.local_id);
            return Err(e);
        }
        self.node_mut(id).atime = SystemTime::now();
        Ok(fh)
    }

    // ========================================================================
    // Binding
    // ========================================================================

    fn rebind(&mut self, id: EntryId, binding: Binding) -> Binding {
        let entry = self.node_mut(id);
        if std::mem::discriminant(&entry.binding) != std::mem::discriminant(&binding) {
            entry.modes = binding.default_modes();
        }
        entry.ctime = SystemTime::now();
        entry.mtime = entry.ctime;
        std::mem::replace(&mut entry.binding, binding)
    }

    fn bind_module(&mut self, path: &str, module: Box<dyn Module>) -> FsResult<EntryId> {
        let id = self.resolve_forced(path)?;
        let entry = self.node(id);
        if id == ROOT || entry.has_children() || matches!(entry.binding, Binding::Directory) {
            return Err(FsError::type_conflict(path));
        }
        let live: Vec<u32> = entry.live_handles().collect();

        if let Binding::File(mut old) = self.rebind(id, Binding::File(module)) {
            for &local_id in &live {
                let fh = FileHandle::new(self.host, local_id);
                if let Err(e) = old.close(&fh) {
                    tracing::warn!(handle = %fh, error = %e, "replaced module close failed");
                }
            }
            for local_id in live {
                let fh = FileHandle::new(self.host, local_id);
                let reopened = self.module_mut(id).map_or(Ok(()), |m| m.open(&fh));
                if let Err(e) = reopened {
                    tracing::warn!(handle = %fh, error = %e, "reopen on new module failed");
                    self.release_handle(local_id);
                }
            }
            tracing::debug!(path, "file rebound");
        } else {
            tracing::debug!(path, "file bound");
        }
        Ok(id)
    }

    fn bind_directory(&mut self, path: &str) -> FsResult<EntryId> {
        let id = self.resolve_forced(path)?;
        if matches!(self.node(id).binding, Binding::Directory) {
            return Ok(id);
        }
        let live: Vec<u32> = self.node(id).live_handles().collect();
        if let Binding::File(mut old) = self.rebind(id, Binding::Directory) {
            for local_id in live {
                let fh = FileHandle::new(self.host, local_id);
                if let Err(e) = old.close(&fh) {
                    tracing::warn!(handle = %fh, error = %e, "replaced module close failed");
                }
                self.release_handle(local_id);
            }
        }
        tracing::debug!(path, "directory bound");
        Ok(id)
    }

    fn lookup_or_missing(&self, path: &str) -> FsResult<EntryId> {
        self.lookup(path).ok_or_else(|| FsError::no_such_path(path))
    }
}

impl FileSystem for TreeBackend {
    fn host_id(&self) -> HostId {
        self.host
    }

    fn create_file(&mut self, md: &Metadata, request_write: bool) -> FsResult<FileHandle> {
        if md.kind != FileType::File {
            return Err(FsError::InvalidMetadata(format!("{} is not a file", md.path)));
        }
        if self
            .lookup(&md.path)
            .is_some_and(|id| self.node(id).occupied())
        {
            return Err(FsError::already_exists(&md.path));
        }
        let id = self.bind_module(&md.path, Box::new(BufferFile::new()))?;
        self.node_mut(id).modes = md.modes;
        if !md.owner.is_empty() || !md.group.is_empty() {
            // the file stays bound when this fails
            self.set_owner(&md.path, &md.owner, &md.group)?;
        }
        self.open_entry(id, request_write)
    }

    fn open_file(&mut self, path: &str, request_write: bool) -> FsResult<FileHandle> {
        let id = self.lookup_or_missing(path)?;
        if !matches!(self.node(id).binding, Binding::File(_)) {
            return Err(FsError::invalid_file_type(path));
        }
        self.open_entry(id, request_write)
    }

    fn close_file(&mut self, fh: &FileHandle) -> FsResult<()> {
        let entry = self.lookup_handle(fh)?.entry;
        self.close_on_module(entry, fh.local_id);
        self.release_handle(fh.local_id);
        Ok(())
    }

    fn read_file(&mut self, fh: &FileHandle, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        let entry = self.lookup_handle(fh)?.entry;
        let module = self.module_mut(entry).ok_or(FsError::InvalidFileHandle)?;
        let n = module.read(fh, buf, offset)?;
        debug_assert!(n <= buf.len(), "module read past the buffer");
        self.node_mut(entry).atime = SystemTime::now();
        Ok(n.min(buf.len()))
    }

    fn write_file(&mut self, fh: &FileHandle, data: &[u8], offset: u64) -> FsResult<usize> {
        let open = self.lookup_handle(fh)?;
        if !open.writable {
            return Err(FsError::permission_denied(format!("{fh} is read-only")));
        }
        let entry = open.entry;
        let module = self.module_mut(entry).ok_or(FsError::InvalidFileHandle)?;
        let n = module.write(fh, data, offset)?;
        debug_assert!(n <= data.len(), "module wrote past the data");
        self.node_mut(entry).mtime = SystemTime::now();
        Ok(n.min(data.len()))
    }

    fn resize_file(&mut self, path: &str, size: u64) -> FsResult<()> {
        let id = self.lookup_or_missing(path)?;
        let module = self
            .module_mut(id)
            .ok_or_else(|| FsError::invalid_file_type(path))?;
        module.resize(size)?;
        self.node_mut(id).mtime = SystemTime::now();
        Ok(())
    }

    fn create_directory(&mut self, path: &str, md: &Metadata) -> FsResult<()> {
        if md.kind != FileType::Directory {
            return Err(FsError::InvalidMetadata(format!("{path} is not a directory")));
        }
        if self
            .lookup(path)
            .is_some_and(|id| !matches!(self.node(id).binding, Binding::Bare))
        {
            return Err(FsError::already_exists(path));
        }
        let id = self.bind_directory(path)?;
        self.node_mut(id).modes = md.modes;
        if !md.owner.is_empty() || !md.group.is_empty() {
            self.set_owner(path, &md.owner, &md.group)?;
        }
        Ok(())
    }

    fn read_directory(&self, path: &str) -> FsResult<Vec<Metadata>> {
        let id = self.lookup_or_missing(path)?;
        let entry = self.node(id);
        if matches!(entry.binding, Binding::File(_) | Binding::Symlink(_)) {
            return Err(FsError::invalid_file_type(path));
        }
        Ok(entry.live_children().map(|c| self.metadata_of(c)).collect())
    }

    fn create_link(&mut self, target: &str, link: &str) -> FsResult<()> {
        if self.lookup(link).is_some_and(|id| self.node(id).occupied()) {
            return Err(FsError::already_exists(link));
        }
        let id = self.resolve_forced(link)?;
        self.rebind(id, Binding::Symlink(target.to_string()));
        Ok(())
    }

    fn read_link(&self, path: &str) -> FsResult<String> {
        let id = self.lookup_or_missing(path)?;
        let entry = self.node(id);
        let Binding::Symlink(target) = &entry.binding else {
            return Err(FsError::invalid_file_type(path));
        };
        if !stays_within(&self.path_of(entry.parent), target) {
            return Err(FsError::MalformedLink(target.clone()));
        }
        Ok(target.clone())
    }

    fn remove(&mut self, path: &str) -> FsResult<()> {
        self.remove_path(path, false)
    }

    fn remove_recursive(&mut self, path: &str) -> FsResult<()> {
        self.remove_path(path, true)
    }

    fn rename(&mut self, from: &str, to: &str) -> FsResult<()> {
        let src = self.lookup_or_missing(from)?;
        if src == ROOT {
            return Err(FsError::permission_denied("the root cannot be moved"));
        }
        let (parent_path, name) = split_parent(to).ok_or_else(|| FsError::invalid_path(to))?;
        if name == "." || name == ".." {
            return Err(FsError::invalid_path(to));
        }
        let from_segs: Vec<&str> = segments(from).collect();
        let to_segs: Vec<&str> = segments(to).collect();
        if from_segs == to_segs {
            return Ok(());
        }
        if to_segs.starts_with(&from_segs) {
            return Err(FsError::InvalidPath(format!("cannot move {from} under itself")));
        }

        if let Some(dst) = self.lookup(to) {
            let existing = self.node(dst);
            if existing.is_open() {
                return Err(FsError::Busy(to.to_string()));
            }
            if existing.has_children() || matches!(existing.binding, Binding::Directory) {
                return Err(FsError::already_exists(to));
            }
            self.detach(dst);
            self.destroy(dst);
        }

        let parent = self.resolve_forced(parent_path)?;
        if matches!(
            self.node(parent).binding,
            Binding::File(_) | Binding::Symlink(_)
        ) {
            return Err(FsError::invalid_file_type(parent_path));
        }
        self.detach(src);
        let entry = self.node_mut(src);
        entry.name = name.to_string();
        entry.parent = parent;
        entry.ctime = SystemTime::now();
        fill_slot(&mut self.node_mut(parent).children, src);
        Ok(())
    }

    fn read_metadata(&self, path: &str) -> FsResult<Metadata> {
        self.lookup_or_missing(path).map(|id| self.metadata_of(id))
    }

    /// Empty `user` or `group` leaves that field as it was.
    fn set_owner(&mut self, path: &str, user: &str, group: &str) -> FsResult<()> {
        let id = self.lookup_or_missing(path)?;
        let entry = self.node_mut(id);
        if !user.is_empty() {
            entry.owner = user.to_string();
        }
        if !group.is_empty() {
            entry.group = group.to_string();
        }
        entry.ctime = SystemTime::now();
        Ok(())
    }

    fn set_mode(&mut self, path: &str, modes: Modes) -> FsResult<()> {
        let id = self.lookup_or_missing(path)?;
        let entry = self.node_mut(id);
        entry.modes = modes;
        entry.ctime = SystemTime::now();
        Ok(())
    }

    fn stat_fs(&self) -> FsResult<StatFs> {
        let bytes: u64 = self
            .entries
            .iter()
            .flatten()
            .filter_map(|e| match &e.binding {
                Binding::File(module) => Some(module.size()),
                _ => None,
            })
            .sum();
        Ok(StatFs {
            blocks: bytes.div_ceil(u64::from(BLOCK_SIZE)),
            files: self.entry_count() as u64,
            bsize: BLOCK_SIZE,
            ..StatFs::default()
        })
    }
}
