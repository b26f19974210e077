//! Host filesystem backend.
//!
//! Every namespace path is prefixed with a fixed root before it reaches
//! the host, and host paths coming back have that root stripped again, so
//! callers see the same namespace-relative paths as with the tree backend.

use std::fs::{self, DirBuilder, File, OpenOptions, Permissions};
use std::os::unix::fs::{DirBuilderExt, FileExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::paths::{split_parent, stays_within};
use super::users;
use crate::vfs::error::{FsError, FsResult};
use crate::vfs::handles::HandleTable;
use crate::vfs::ops::FileSystem;
use crate::vfs::types::{
    split_realm, FileHandle, FileType, HostId, Metadata, Modes, StatFs,
};

#[derive(Debug)]
struct OpenFile {
    file: File,
    writable: bool,
    /// Host path, kept so removal can tell the file is open.
    path: String,
}

/// Backend over the host's own filesystem.
///
/// All operations are relative to `root`. With a root of
/// `/srv/plexfs`, the namespace path `/notes/a.txt` is the host file
/// `/srv/plexfs/notes/a.txt`. Paths containing `..` are refused.
#[derive(Debug)]
pub struct PosixBackend {
    host: HostId,
    /// Canonical root with no trailing slash; empty for the host root.
    root: String,
    handles: HandleTable<OpenFile>,
}

fn timestamp(secs: i64, nanos: i64) -> SystemTime {
    let nanos = Duration::from_nanos(nanos.clamp(0, 999_999_999) as u64);
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64) + nanos
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + nanos
    }
}

fn to_metadata(path: String, meta: &fs::Metadata) -> Metadata {
    let ft = meta.file_type();
    let kind = if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_file() {
        FileType::File
    } else {
        FileType::Unknown
    };
    Metadata {
        path,
        kind,
        size: meta.len(),
        owner: users::user_name(meta.uid()),
        group: users::group_name(meta.gid()),
        modes: Modes::from_bits(meta.mode()),
        nlink: u32::try_from(meta.nlink()).unwrap_or(u32::MAX),
        atime: timestamp(meta.atime(), meta.atime_nsec()),
        mtime: timestamp(meta.mtime(), meta.mtime_nsec()),
        ctime: timestamp(meta.ctime(), meta.ctime_nsec()),
    }
}

impl PosixBackend {
    /// Create a backend rooted at `root`.
    ///
    /// The root is canonicalised when it exists, so symlinked roots (e.g.
    /// macOS `/tmp`) still strip cleanly from listed paths.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        Self {
            host: HostId::new(),
            root: root.to_string_lossy().trim_end_matches('/').to_string(),
            handles: HandleTable::new(),
        }
    }

    /// The host directory backing `/`.
    pub fn root(&self) -> &str {
        if self.root.is_empty() { "/" } else { &self.root }
    }

    /// Number of descriptors currently open.
    pub fn open_handles(&self) -> usize {
        self.handles.live()
    }

    /// Map a namespace path onto the host.
    fn host_path(&self, path: &str) -> FsResult<String> {
        let mut full = self.root.clone();
        for seg in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
            if seg == ".." {
                return Err(FsError::invalid_path(path));
            }
            full.push('/');
            full.push_str(seg);
        }
        if full.is_empty() {
            full.push('/');
        }
        Ok(full)
    }

    /// Map a host path back into the namespace. `None` if it lies outside
    /// the root.
    fn namespace_path<'a>(&self, host: &'a str) -> Option<&'a str> {
        let rest = host.strip_prefix(self.root.as_str())?;
        if rest.is_empty() {
            Some("/")
        } else if rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }

    fn is_root(&self, full: &str) -> bool {
        full == self.root()
    }

    fn register(&mut self, file: File, writable: bool, path: String) -> FileHandle {
        let local_id = self.handles.allocate(OpenFile {
            file,
            writable,
            path,
        });
        tracing::debug!(local_id, writable, "descriptor opened");
        FileHandle::new(self.host, local_id)
    }

    fn open_file_ref(&self, fh: &FileHandle) -> FsResult<&OpenFile> {
        if fh.host != self.host {
            return Err(FsError::InvalidFileHandle);
        }
        self.handles
            .get(fh.local_id)
            .ok_or(FsError::InvalidFileHandle)
    }

    /// Handles open on `full` itself.
    fn is_open(&self, full: &str) -> bool {
        self.handles.iter().any(|(_, open)| open.path == full)
    }

    /// Ids of handles open strictly below `full`.
    fn handles_below(&self, full: &str) -> Vec<u32> {
        let prefix = format!("{}/", full.trim_end_matches('/'));
        self.handles
            .iter()
            .filter(|(_, open)| open.path.starts_with(&prefix))
            .map(|(id, _)| id)
            .collect()
    }
}

impl FileSystem for PosixBackend {
    fn host_id(&self) -> HostId {
        self.host
    }

    fn create_file(&mut self, md: &Metadata, request_write: bool) -> FsResult<FileHandle> {
        if md.kind != FileType::File {
            return Err(FsError::InvalidMetadata(format!("{} is not a file", md.path)));
        }
        let full = self.host_path(&md.path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(md.modes.bits())
            .open(&full)
            .map_err(|e| FsError::from_io(e, &md.path))?;

        if !md.owner.is_empty() || !md.group.is_empty() {
            // the file stays on disk when this fails
            if let Err(e) = self.set_owner(&md.path, &md.owner, &md.group) {
                tracing::warn!(path = %md.path, error = %e, "created file but could not chown it");
                return Err(e);
            }
        }

        let file = if request_write {
            file
        } else {
            File::open(&full).map_err(|e| FsError::from_io(e, &md.path))?
        };
        Ok(self.register(file, request_write, full))
    }

    fn open_file(&mut self, path: &str, request_write: bool) -> FsResult<FileHandle> {
        let full = self.host_path(path)?;
        let meta = fs::metadata(&full).map_err(|e| FsError::from_io(e, path))?;
        if meta.is_dir() {
            return Err(FsError::invalid_file_type(path));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(request_write)
            .open(&full)
            .map_err(|e| FsError::from_io(e, path))?;
        Ok(self.register(file, request_write, full))
    }

    fn close_file(&mut self, fh: &FileHandle) -> FsResult<()> {
        self.open_file_ref(fh)?;
        self.handles.release(fh.local_id);
        tracing::debug!(local_id = fh.local_id, "descriptor closed");
        Ok(())
    }

    fn read_file(&mut self, fh: &FileHandle, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        let open = self.open_file_ref(fh)?;
        open.file
            .read_at(buf, offset)
            .map_err(|e| FsError::from_io(e, &open.path))
    }

    fn write_file(&mut self, fh: &FileHandle, data: &[u8], offset: u64) -> FsResult<usize> {
        let open = self.open_file_ref(fh)?;
        if !open.writable {
            return Err(FsError::permission_denied(format!("{fh} is read-only")));
        }
        open.file
            .write_at(data, offset)
            .map_err(|e| FsError::from_io(e, &open.path))
    }

    fn resize_file(&mut self, path: &str, size: u64) -> FsResult<()> {
        let full = self.host_path(path)?;
        OpenOptions::new()
            .write(true)
            .open(&full)
            .and_then(|file| file.set_len(size))
            .map_err(|e| FsError::from_io(e, path))
    }

    fn create_directory(&mut self, path: &str, md: &Metadata) -> FsResult<()> {
        if md.kind != FileType::Directory {
            return Err(FsError::InvalidMetadata(format!("{path} is not a directory")));
        }
        let full = self.host_path(path)?;
        DirBuilder::new()
            .mode(md.modes.bits())
            .create(&full)
            .map_err(|e| FsError::from_io(e, path))?;
        if !md.owner.is_empty() || !md.group.is_empty() {
            self.set_owner(path, &md.owner, &md.group)?;
        }
        Ok(())
    }

    fn read_directory(&self, path: &str) -> FsResult<Vec<Metadata>> {
        let full = self.host_path(path)?;
        let mut listing = Vec::new();
        for entry in fs::read_dir(&full).map_err(|e| FsError::from_io(e, path))? {
            let entry = entry.map_err(|e| FsError::from_io(e, path))?;
            let host = entry.path();
            let host = host.to_string_lossy();
            let Some(relative) = self.namespace_path(&host) else {
                continue;
            };
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                // removed while we were listing
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(FsError::from_io(e, relative)),
            };
            listing.push(to_metadata(relative.to_string(), &meta));
        }
        listing.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(listing)
    }

    /// Absolute targets are stored under the root; relative ones as given.
    fn create_link(&mut self, target: &str, link: &str) -> FsResult<()> {
        let full = self.host_path(link)?;
        let stored = if target.starts_with('/') {
            self.host_path(target)?
        } else {
            target.to_string()
        };
        std::os::unix::fs::symlink(&stored, &full).map_err(|e| FsError::from_io(e, link))
    }

    fn read_link(&self, path: &str) -> FsResult<String> {
        let full = self.host_path(path)?;
        let target = fs::read_link(&full).map_err(|e| FsError::from_io(e, path))?;
        let target = target.to_string_lossy();
        if target.starts_with('/') {
            return self
                .namespace_path(&target)
                .map(str::to_string)
                .ok_or_else(|| FsError::MalformedLink(target.to_string()));
        }
        // the on-disk location, not the caller's spelling of it
        let located = self.namespace_path(&full).unwrap_or("/");
        let base = split_parent(located).map_or("", |(parent, _)| parent);
        if !stays_within(base, &target) {
            return Err(FsError::MalformedLink(target.to_string()));
        }
        Ok(target.into_owned())
    }

    fn remove(&mut self, path: &str) -> FsResult<()> {
        let full = self.host_path(path)?;
        if self.is_root(&full) {
            return Err(FsError::permission_denied("the root cannot be removed"));
        }
        if self.is_open(&full) {
            return Err(FsError::Busy(path.to_string()));
        }
        let meta = fs::symlink_metadata(&full).map_err(|e| FsError::from_io(e, path))?;
        let removed = if meta.is_dir() {
            fs::remove_dir(&full)
        } else {
            fs::remove_file(&full)
        };
        removed.map_err(|e| FsError::from_io(e, path))
    }

    fn remove_recursive(&mut self, path: &str) -> FsResult<()> {
        let full = self.host_path(path)?;
        if self.is_root(&full) {
            return Err(FsError::permission_denied("the root cannot be removed"));
        }
        if self.is_open(&full) {
            return Err(FsError::Busy(path.to_string()));
        }
        let meta = fs::symlink_metadata(&full).map_err(|e| FsError::from_io(e, path))?;
        if !meta.is_dir() {
            return fs::remove_file(&full).map_err(|e| FsError::from_io(e, path));
        }
        for local_id in self.handles_below(&full) {
            self.handles.release(local_id);
            tracing::debug!(local_id, "descriptor released by recursive remove");
        }
        fs::remove_dir_all(&full).map_err(|e| FsError::from_io(e, path))
    }

    fn rename(&mut self, from: &str, to: &str) -> FsResult<()> {
        let src = self.host_path(from)?;
        let dst = self.host_path(to)?;
        if self.is_root(&src) {
            return Err(FsError::permission_denied("the root cannot be moved"));
        }
        fs::symlink_metadata(&src).map_err(|e| FsError::from_io(e, from))?;
        if src == dst {
            return Ok(());
        }
        if dst.starts_with(&format!("{src}/")) {
            return Err(FsError::InvalidPath(format!("cannot move {from} under itself")));
        }
        // only files and links are replaced; the host would also swap out
        // an empty directory
        if let Ok(existing) = fs::symlink_metadata(&dst) {
            if self.is_open(&dst) {
                return Err(FsError::Busy(to.to_string()));
            }
            if existing.is_dir() {
                return Err(FsError::already_exists(to));
            }
        }
        fs::rename(&src, &dst).map_err(|e| FsError::from_io(e, from))?;

        let below = format!("{src}/");
        for (_, open) in self.handles.iter_mut() {
            if open.path == src {
                open.path = dst.clone();
            } else if let Some(rest) = open.path.strip_prefix(&below) {
                open.path = format!("{dst}/{rest}");
            }
        }
        Ok(())
    }

    fn read_metadata(&self, path: &str) -> FsResult<Metadata> {
        let full = self.host_path(path)?;
        let meta = fs::symlink_metadata(&full).map_err(|e| FsError::from_io(e, path))?;
        let relative = self.namespace_path(&full).unwrap_or(path);
        Ok(to_metadata(relative.to_string(), &meta))
    }

    /// Accepts names or numeric ids; an `@host` suffix is ignored. An
    /// empty user or group leaves that id unchanged.
    fn set_owner(&mut self, path: &str, user: &str, group: &str) -> FsResult<()> {
        let full = self.host_path(path)?;
        let uid = match split_realm(user).0 {
            "" => None,
            name => Some(users::user_id(name)?),
        };
        let gid = match split_realm(group).0 {
            "" => None,
            name => Some(users::group_id(name)?),
        };
        std::os::unix::fs::chown(&full, uid, gid).map_err(|e| FsError::from_io(e, path))
    }

    fn set_mode(&mut self, path: &str, modes: Modes) -> FsResult<()> {
        let full = self.host_path(path)?;
        fs::set_permissions(&full, Permissions::from_mode(modes.bits()))
            .map_err(|e| FsError::from_io(e, path))
    }

    fn stat_fs(&self) -> FsResult<StatFs> {
        let stat = rustix::fs::statvfs(self.root())
            .map_err(|e| FsError::from_errno(e.raw_os_error(), self.root()))?;
        Ok(StatFs {
            blocks: stat.f_blocks,
            bfree: stat.f_bfree,
            bavail: stat.f_bavail,
            files: stat.f_files,
            ffree: stat.f_ffree,
            bsize: stat.f_bsize as u32,
            namelen: stat.f_namemax as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (PosixBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        let backend = PosixBackend::new(dir.path());
        (backend, dir)
    }

    fn put(fs: &mut PosixBackend, path: &str, data: &[u8]) {
        let fh = fs.create_file(&Metadata::file(path), true).unwrap();
        fs.write_file(&fh, data, 0).unwrap();
        fs.close_file(&fh).unwrap();
    }

    #[test]
    fn test_create_and_read() {
        let (mut fs, dir) = setup();
        put(&mut fs, "/test.txt", b"hello world");

        assert_eq!(
            std::fs::read(dir.path().join("test.txt")).unwrap(),
            b"hello world"
        );
        let h = fs.open_file("/test.txt", false).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(fs.read_file(&h, 6, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"world");
        assert_eq!(fs.read_file(&h, 11, &mut buf).unwrap(), 0);
        fs.close_file(&h).unwrap();
    }

    #[test]
    fn test_create_existing_fails() {
        let (mut fs, _dir) = setup();
        put(&mut fs, "/f", b"");
        assert!(matches!(
            fs.create_file(&Metadata::file("/f"), true),
            Err(FsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_read_only_handle() {
        let (mut fs, _dir) = setup();
        let h = fs.create_file(&Metadata::file("/f"), false).unwrap();
        assert!(matches!(
            fs.write_file(&h, b"x", 0),
            Err(FsError::InvalidPermissions(_))
        ));
        fs.close_file(&h).unwrap();
        assert!(matches!(fs.close_file(&h), Err(FsError::InvalidFileHandle)));
    }

    #[test]
    fn test_path_escape_blocked() {
        let (mut fs, _dir) = setup();
        assert!(matches!(
            fs.open_file("/../etc/passwd", false),
            Err(FsError::InvalidPath(_))
        ));
        assert!(matches!(
            fs.read_metadata("/a/../../x"),
            Err(FsError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_directories() {
        let (mut fs, _dir) = setup();
        fs.create_directory("/sub", &Metadata::directory("/sub"))
            .unwrap();
        put(&mut fs, "/sub/file.txt", b"x");
        put(&mut fs, "/root.txt", b"y");

        let paths: Vec<_> = fs
            .read_directory("/")
            .unwrap()
            .into_iter()
            .map(|m| m.path)
            .collect();
        assert_eq!(paths, vec!["/root.txt", "/sub"]);

        let sub = fs.read_directory("/sub").unwrap();
        assert_eq!(sub.len(), 1);
        assert_eq!(sub[0].path, "/sub/file.txt");
        assert!(sub[0].is_file());

        assert!(matches!(fs.remove("/sub"), Err(FsError::DirectoryNotEmpty(_))));
        assert!(matches!(
            fs.open_file("/sub", false),
            Err(FsError::InvalidFileType(_))
        ));
        fs.remove_recursive("/sub").unwrap();
        assert!(!fs.exists("/sub"));
    }

    #[test]
    fn test_remove_open_file_is_busy() {
        let (mut fs, _dir) = setup();
        put(&mut fs, "/f", b"x");
        let h = fs.open_file("/f", false).unwrap();
        assert!(matches!(fs.remove("/f"), Err(FsError::Busy(_))));
        fs.close_file(&h).unwrap();
        fs.remove("/f").unwrap();
        assert!(matches!(fs.remove("/"), Err(FsError::InvalidPermissions(_))));
    }

    #[test]
    fn test_recursive_remove_releases_descendants() {
        let (mut fs, _dir) = setup();
        fs.create_directory("/d", &Metadata::directory("/d")).unwrap();
        put(&mut fs, "/d/f", b"x");
        let h = fs.open_file("/d/f", false).unwrap();
        fs.remove_recursive("/d").unwrap();
        assert_eq!(fs.open_handles(), 0);
        assert!(matches!(fs.close_file(&h), Err(FsError::InvalidFileHandle)));
    }

    #[test]
    fn test_links() {
        let (mut fs, dir) = setup();
        put(&mut fs, "/target.txt", b"content");
        fs.create_link("/target.txt", "/abs").unwrap();
        fs.create_link("target.txt", "/rel").unwrap();

        let on_disk = std::fs::read_link(dir.path().join("abs")).unwrap();
        assert!(on_disk.starts_with(fs.root()));
        assert_eq!(fs.read_link("/abs").unwrap(), "/target.txt");
        assert_eq!(fs.read_link("/rel").unwrap(), "target.txt");
        assert!(fs.read_metadata("/abs").unwrap().is_symlink());

        std::os::unix::fs::symlink("/etc/passwd", dir.path().join("outside")).unwrap();
        std::os::unix::fs::symlink("../../x", dir.path().join("up")).unwrap();
        assert!(matches!(fs.read_link("/outside"), Err(FsError::MalformedLink(_))));
        assert!(matches!(fs.read_link("/up"), Err(FsError::MalformedLink(_))));
    }

    #[test]
    fn test_dotted_spelling_cannot_escape() {
        let (fs, dir) = setup();
        std::os::unix::fs::symlink("../etc/passwd", dir.path().join("up")).unwrap();
        assert!(matches!(fs.read_link("/up"), Err(FsError::MalformedLink(_))));
        assert!(matches!(fs.read_link("/./up"), Err(FsError::MalformedLink(_))));
        assert!(matches!(fs.read_link("/././up"), Err(FsError::MalformedLink(_))));

        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::os::unix::fs::symlink("../peer", dir.path().join("sub/back")).unwrap();
        assert_eq!(fs.read_link("/sub/./back").unwrap(), "../peer");
        std::os::unix::fs::symlink("../../x", dir.path().join("sub/out")).unwrap();
        assert!(matches!(fs.read_link("/./sub/./out"), Err(FsError::MalformedLink(_))));
    }

    #[test]
    fn test_rename_follows_open_handles() {
        let (mut fs, _dir) = setup();
        put(&mut fs, "/old.txt", b"content");
        let h = fs.open_file("/old.txt", false).unwrap();
        fs.rename("/old.txt", "/new.txt").unwrap();

        assert!(!fs.exists("/old.txt"));
        assert!(matches!(fs.remove("/new.txt"), Err(FsError::Busy(_))));
        fs.close_file(&h).unwrap();
        assert_eq!(fs.read_all("/new.txt").unwrap(), b"content");
    }

    #[test]
    fn test_resize() {
        let (mut fs, _dir) = setup();
        put(&mut fs, "/f", b"hello world");
        fs.resize_file("/f", 5).unwrap();
        assert_eq!(fs.read_all("/f").unwrap(), b"hello");
        fs.resize_file("/f", 8).unwrap();
        assert_eq!(fs.read_all("/f").unwrap(), b"hello\0\0\0");
        assert!(matches!(fs.resize_file("/none", 1), Err(FsError::NoSuchPath(_))));
    }

    #[test]
    fn test_metadata_and_mode() {
        let (mut fs, _dir) = setup();
        put(&mut fs, "/f", b"abc");
        fs.set_mode("/f", Modes::from_bits(0o640)).unwrap();

        let md = fs.read_metadata("/f").unwrap();
        assert_eq!(md.path, "/f");
        assert_eq!(md.size, 3);
        assert_eq!(md.modes.bits(), 0o640);
        assert_eq!(md.nlink, 1);
        assert!(!md.owner.is_empty());
        assert_eq!(fs.read_metadata("/").unwrap().path, "/");
    }

    #[test]
    fn test_set_owner_to_current_ids() {
        let (mut fs, dir) = setup();
        put(&mut fs, "/f", b"");
        let meta = std::fs::metadata(dir.path().join("f")).unwrap();
        let (uid, gid) = (meta.uid().to_string(), meta.gid().to_string());

        fs.set_owner("/f", &format!("{uid}@elsewhere"), &gid).unwrap();
        fs.set_owner("/f", "", "").unwrap();
    }

    #[test]
    fn test_create_keeps_file_when_chown_fails() {
        let (mut fs, _dir) = setup();
        let md = Metadata::file("/f").with_owner("plexfs-no-such-user", "");
        assert!(matches!(
            fs.create_file(&md, true),
            Err(FsError::InvalidUser(_))
        ));
        assert!(fs.read_metadata("/f").unwrap().is_file());
        assert_eq!(fs.open_handles(), 0);
    }

    #[test]
    fn test_stat_fs() {
        let (fs, _dir) = setup();
        let stat = fs.stat_fs().unwrap();
        assert!(stat.bsize > 0);
        assert!(stat.namelen > 0);
    }
}
