//! Kernel-call translation layer.
//!
//! A filesystem driver speaks in getattr, mkdir, unlink and friends, and
//! expects `errno` values and `stat`-shaped records back. [`Bridge`] maps
//! each such call onto exactly one contract call and translates the
//! answer. Wiring it to an actual driver (libfuse or otherwise) is up to
//! the embedding program.

use std::time::SystemTime;

use crate::shared::SharedFs;
use crate::vfs::backends::paths::split_parent;
use crate::vfs::backends::users;
use crate::vfs::{split_realm, FileHandle, FileSystem, FileType, FsError, FsResult, Metadata, Modes, StatFs};

/// Host error code.
pub type Errno = i32;

pub type BridgeResult<T> = Result<T, Errno>;

const S_IFMT: u32 = 0o170_000;
const S_IFREG: u32 = 0o100_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFLNK: u32 = 0o120_000;

/// Attribute record in the host's layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAttr {
    pub size: u64,
    /// 512-byte blocks.
    pub blocks: u64,
    pub nlink: u32,
    /// File type and permission bits, as in `st_mode`.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub attr: HostAttr,
}

/// `st_mode` for `md`. Bare path nodes show up as directories so a
/// driver can walk through them.
pub fn metadata_to_mode(md: &Metadata) -> u32 {
    let kind = match md.kind {
        FileType::File => S_IFREG,
        FileType::Directory | FileType::Unknown => S_IFDIR,
        FileType::Symlink => S_IFLNK,
    };
    kind | md.modes.bits()
}

/// Metadata for a new node at `path` described by `mode`.
pub fn mode_to_metadata(path: &str, mode: u32) -> Metadata {
    let md = match mode & S_IFMT {
        S_IFDIR => Metadata::directory(path),
        S_IFLNK => Metadata::symlink(path, 0),
        _ => Metadata::file(path),
    };
    md.with_modes(Modes::from_bits(mode))
}

fn errno(e: FsError) -> Errno {
    let code = e.errno();
    tracing::debug!(error = %e, code, "bridge call failed");
    code
}

fn principal_id(principal: &str, fallback: u32, lookup: fn(&str) -> FsResult<u32>) -> u32 {
    match split_realm(principal).0 {
        "" => fallback,
        name => lookup(name).unwrap_or(fallback),
    }
}

/// Driver-facing view of one backend.
pub struct Bridge<F> {
    fs: SharedFs<F>,
    uid: u32,
    gid: u32,
}

impl<F: FileSystem> Bridge<F> {
    /// Unowned nodes are reported as owned by this process.
    pub fn new(fs: SharedFs<F>) -> Self {
        Self::with_ids(
            fs,
            rustix::process::getuid().as_raw(),
            rustix::process::getgid().as_raw(),
        )
    }

    /// Unowned nodes are reported as owned by `uid`/`gid`.
    pub fn with_ids(fs: SharedFs<F>, uid: u32, gid: u32) -> Self {
        Self { fs, uid, gid }
    }

    pub fn attr(&self, md: &Metadata) -> HostAttr {
        HostAttr {
            size: md.size,
            blocks: md.size.div_ceil(512),
            nlink: md.nlink,
            mode: metadata_to_mode(md),
            uid: principal_id(&md.owner, self.uid, users::user_id),
            gid: principal_id(&md.group, self.gid, users::group_id),
            atime: md.atime,
            mtime: md.mtime,
            ctime: md.ctime,
        }
    }

    fn call<R>(&self, op: impl FnOnce(&mut F) -> FsResult<R>) -> BridgeResult<R> {
        self.fs.with(op).map_err(errno)
    }

    pub fn getattr(&self, path: &str) -> BridgeResult<HostAttr> {
        let md = self.call(|fs| fs.read_metadata(path))?;
        Ok(self.attr(&md))
    }

    /// Create and open a file owned by the calling `uid`/`gid`.
    pub fn create(&self, path: &str, mode: u32, uid: u32, gid: u32) -> BridgeResult<FileHandle> {
        let md = mode_to_metadata(path, mode).with_owner(uid.to_string(), gid.to_string());
        if !md.is_file() {
            return Err(libc::EINVAL);
        }
        self.call(|fs| fs.create_file(&md, true))
    }

    /// Open with `open(2)` flags; anything but `O_RDONLY` asks for write.
    pub fn open(&self, path: &str, flags: i32) -> BridgeResult<FileHandle> {
        let write = flags & libc::O_ACCMODE != libc::O_RDONLY;
        self.call(|fs| fs.open_file(path, write))
    }

    pub fn read(&self, fh: &FileHandle, offset: u64, size: u32) -> BridgeResult<Vec<u8>> {
        self.call(|fs| {
            let mut buf = vec![0u8; size as usize];
            let n = fs.read_file(fh, offset, &mut buf)?;
            buf.truncate(n);
            Ok(buf)
        })
    }

    pub fn write(&self, fh: &FileHandle, offset: u64, data: &[u8]) -> BridgeResult<u32> {
        let n = self.call(|fs| fs.write_file(fh, data, offset))?;
        u32::try_from(n).map_err(|_| libc::EOVERFLOW)
    }

    pub fn release(&self, fh: &FileHandle) -> BridgeResult<()> {
        self.call(|fs| fs.close_file(fh))
    }

    pub fn truncate(&self, path: &str, size: u64) -> BridgeResult<()> {
        self.call(|fs| fs.resize_file(path, size))
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> BridgeResult<()> {
        let md = Metadata::directory(path).with_modes(Modes::from_bits(mode));
        self.call(|fs| fs.create_directory(path, &md))
    }

    /// Children of `path` by bare name.
    pub fn readdir(&self, path: &str) -> BridgeResult<Vec<DirEntry>> {
        let listing = self.call(|fs| fs.read_directory(path))?;
        Ok(listing
            .iter()
            .filter_map(|md| {
                let (_, name) = split_parent(&md.path)?;
                Some(DirEntry {
                    name: name.to_string(),
                    attr: self.attr(md),
                })
            })
            .collect())
    }

    pub fn symlink(&self, target: &str, link: &str) -> BridgeResult<()> {
        self.call(|fs| fs.create_link(target, link))
    }

    pub fn readlink(&self, path: &str) -> BridgeResult<String> {
        self.call(|fs| fs.read_link(path))
    }

    pub fn rename(&self, from: &str, to: &str) -> BridgeResult<()> {
        self.call(|fs| fs.rename(from, to))
    }

    /// Remove anything but a directory.
    pub fn unlink(&self, path: &str) -> BridgeResult<()> {
        self.call(|fs| {
            let md = fs.read_metadata(path)?;
            if md.is_dir() || md.kind == FileType::Unknown {
                return Err(FsError::invalid_file_type(path));
            }
            fs.remove(path)
        })
    }

    /// Remove an empty directory.
    pub fn rmdir(&self, path: &str) -> BridgeResult<()> {
        let md = self.call(|fs| fs.read_metadata(path))?;
        if md.is_file() || md.is_symlink() {
            return Err(libc::ENOTDIR);
        }
        self.call(|fs| fs.remove(path))
    }

    /// `None` leaves that id unchanged.
    pub fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> BridgeResult<()> {
        let user = uid.map(|u| u.to_string()).unwrap_or_default();
        let group = gid.map(|g| g.to_string()).unwrap_or_default();
        self.call(|fs| fs.set_owner(path, &user, &group))
    }

    pub fn chmod(&self, path: &str, mode: u32) -> BridgeResult<()> {
        self.call(|fs| fs.set_mode(path, Modes::from_bits(mode)))
    }

    pub fn statfs(&self) -> BridgeResult<StatFs> {
        self.call(|fs| fs.stat_fs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::BufferFile;
    use crate::vfs::TreeBackend;

    fn bridge() -> Bridge<TreeBackend> {
        let mut tree = TreeBackend::new();
        tree.add_file("/etc/motd", BufferFile::with_contents("welcome\n"))
            .unwrap();
        Bridge::with_ids(SharedFs::new(tree), 1000, 100)
    }

    #[test]
    fn test_mode_conversion() {
        let md = Metadata::file("/f").with_modes(Modes::from_bits(0o640));
        assert_eq!(metadata_to_mode(&md), 0o100_640);
        assert_eq!(metadata_to_mode(&Metadata::directory("/d")), 0o040_755);
        assert_eq!(metadata_to_mode(&Metadata::symlink("/l", 3)), 0o120_777);

        let back = mode_to_metadata("/l", 0o120_777);
        assert!(back.is_symlink());
        let back = mode_to_metadata("/f", 0o100_604);
        assert!(back.is_file());
        assert_eq!(back.modes.bits(), 0o604);
    }

    #[test]
    fn test_getattr() {
        let bridge = bridge();
        let attr = bridge.getattr("/etc/motd").unwrap();
        assert_eq!(attr.size, 8);
        assert_eq!(attr.blocks, 1);
        assert_eq!(attr.mode, 0o100_666);
        assert_eq!((attr.uid, attr.gid), (1000, 100));

        // bare node walked through on the way to /etc/motd
        assert_eq!(bridge.getattr("/etc").unwrap().mode & S_IFMT, S_IFDIR);
        assert_eq!(bridge.getattr("/missing"), Err(libc::ENOENT));
    }

    #[test]
    fn test_create_write_read() {
        let bridge = bridge();
        let fh = bridge.create("/tmp/log", 0o100_600, 42, 7).unwrap();
        assert_eq!(bridge.write(&fh, 0, b"line\n").unwrap(), 5);
        bridge.release(&fh).unwrap();
        assert_eq!(bridge.release(&fh), Err(libc::EBADF));

        let attr = bridge.getattr("/tmp/log").unwrap();
        assert_eq!((attr.uid, attr.gid, attr.mode), (42, 7, 0o100_600));

        let fh = bridge.open("/tmp/log", libc::O_RDONLY).unwrap();
        assert_eq!(bridge.read(&fh, 0, 64).unwrap(), b"line\n");
        assert_eq!(bridge.write(&fh, 0, b"x"), Err(libc::EPERM));
        assert_eq!(bridge.create("/tmp/log", 0o100_600, 42, 7), Err(libc::EEXIST));
        assert_eq!(bridge.create("/tmp/d", 0o040_755, 42, 7), Err(libc::EINVAL));
    }

    #[test]
    fn test_readdir_names() {
        let bridge = bridge();
        bridge.mkdir("/etc/conf.d", 0o700).unwrap();
        let mut names: Vec<_> = bridge
            .readdir("/etc")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["conf.d", "motd"]);
        assert_eq!(bridge.readdir("/etc/motd"), Err(libc::EISDIR));
    }

    #[test]
    fn test_unlink_and_rmdir() {
        let bridge = bridge();
        assert_eq!(bridge.unlink("/etc"), Err(libc::EISDIR));
        assert_eq!(bridge.rmdir("/etc/motd"), Err(libc::ENOTDIR));
        assert_eq!(bridge.rmdir("/etc"), Err(libc::ENOTEMPTY));

        let fh = bridge.open("/etc/motd", libc::O_RDWR).unwrap();
        assert_eq!(bridge.unlink("/etc/motd"), Err(libc::EBUSY));
        bridge.release(&fh).unwrap();
        bridge.unlink("/etc/motd").unwrap();
        bridge.rmdir("/etc").unwrap();
    }

    #[test]
    fn test_links_rename_and_modes() {
        let bridge = bridge();
        bridge.symlink("/etc/motd", "/motd").unwrap();
        assert_eq!(bridge.readlink("/motd").unwrap(), "/etc/motd");
        assert_eq!(bridge.getattr("/motd").unwrap().mode & S_IFMT, S_IFLNK);

        bridge.rename("/etc/motd", "/etc/issue").unwrap();
        bridge.chmod("/etc/issue", 0o400).unwrap();
        bridge.chown("/etc/issue", Some(5), None).unwrap();
        let attr = bridge.getattr("/etc/issue").unwrap();
        assert_eq!((attr.mode, attr.uid, attr.gid), (0o100_400, 5, 100));

        bridge.truncate("/etc/issue", 3).unwrap();
        assert_eq!(bridge.getattr("/etc/issue").unwrap().size, 3);
        assert_eq!(bridge.statfs().unwrap().files, 4);
    }
}
