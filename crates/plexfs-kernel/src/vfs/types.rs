//! Core VFS types.
//!
//! These are plain values shared by every backend and by the front-ends
//! that carry them across process or kernel boundaries, so they are all
//! serde-serialisable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;
use strum::{Display, EnumString};
use uuid::Uuid;

/// Kind of node a path refers to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum FileType {
    /// Regular file (or a bound capability).
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// A path node with no binding of its own.
    Unknown,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }
}

/// Read/write/execute flags for one class of principal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Permission {
    pub const NONE: Permission = Permission::new(false, false, false);
    pub const READ_ONLY: Permission = Permission::new(true, false, false);
    pub const READ_WRITE: Permission = Permission::new(true, true, false);
    pub const READ_EXECUTE: Permission = Permission::new(true, false, true);
    pub const ALL: Permission = Permission::new(true, true, true);

    pub const fn new(read: bool, write: bool, execute: bool) -> Self {
        Self {
            read,
            write,
            execute,
        }
    }

    /// Decode the low three bits of `bits` (`rwx` = `0o4 | 0o2 | 0o1`).
    pub const fn from_bits(bits: u32) -> Self {
        Self::new(bits & 0o4 != 0, bits & 0o2 != 0, bits & 0o1 != 0)
    }

    /// Encode as three bits.
    pub const fn bits(&self) -> u32 {
        (self.read as u32) << 2 | (self.write as u32) << 1 | self.execute as u32
    }
}

/// The permission triad: user, group and other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Modes {
    pub user: Permission,
    pub group: Permission,
    pub other: Permission,
}

impl Modes {
    pub const fn new(user: Permission, group: Permission, other: Permission) -> Self {
        Self { user, group, other }
    }

    /// Decode the nine POSIX permission bits (e.g. `0o644`).
    ///
    /// Bits above `0o777` (file type, setuid, sticky) are ignored.
    pub const fn from_bits(mode: u32) -> Self {
        Self::new(
            Permission::from_bits(mode >> 6),
            Permission::from_bits(mode >> 3),
            Permission::from_bits(mode),
        )
    }

    /// Encode as the nine POSIX permission bits.
    pub const fn bits(&self) -> u32 {
        self.user.bits() << 6 | self.group.bits() << 3 | self.other.bits()
    }
}

impl fmt::Display for Modes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for p in [self.user, self.group, self.other] {
            write!(
                f,
                "{}{}{}",
                if p.read { 'r' } else { '-' },
                if p.write { 'w' } else { '-' },
                if p.execute { 'x' } else { '-' }
            )?;
        }
        Ok(())
    }
}

/// Split an owner or group string into its name and optional `@host` realm.
///
/// ```
/// use plexfs_kernel::vfs::split_realm;
///
/// assert_eq!(split_realm("amy@lab"), ("amy", Some("lab")));
/// assert_eq!(split_realm("amy"), ("amy", None));
/// ```
pub fn split_realm(principal: &str) -> (&str, Option<&str>) {
    match principal.split_once('@') {
        Some((name, host)) => (name, Some(host)),
        None => (principal, None),
    }
}

/// Metadata describing a path.
///
/// `kind` decides how the rest is read: `size` of a directory is backend
/// defined, `size` of a symlink is the length of its target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Fully qualified path within the backend's namespace.
    pub path: String,
    pub kind: FileType,
    /// Size in bytes.
    pub size: u64,
    /// Owning user, optionally suffixed with `@host`.
    pub owner: String,
    /// Owning group, optionally suffixed with `@host`.
    pub group: String,
    pub modes: Modes,
    /// Number of hard links.
    pub nlink: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl Metadata {
    fn new(path: impl Into<String>, kind: FileType, modes: Modes, nlink: u32) -> Self {
        let now = SystemTime::now();
        Self {
            path: path.into(),
            kind,
            size: 0,
            owner: String::new(),
            group: String::new(),
            modes,
            nlink,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    /// Metadata for a new file, `rw-rw-rw-`.
    pub fn file(path: impl Into<String>) -> Self {
        Self::new(path, FileType::File, Modes::from_bits(0o666), 1)
    }

    /// Metadata for a new directory, `rwxr-xr-x`.
    pub fn directory(path: impl Into<String>) -> Self {
        Self::new(path, FileType::Directory, Modes::from_bits(0o755), 2)
    }

    /// Metadata for a symlink pointing at a target of `target_len` bytes.
    pub fn symlink(path: impl Into<String>, target_len: u64) -> Self {
        let mut md = Self::new(path, FileType::Symlink, Modes::from_bits(0o777), 1);
        md.size = target_len;
        md
    }

    /// Metadata for a path node that is neither file, directory nor link.
    pub fn unknown(path: impl Into<String>) -> Self {
        Self::new(path, FileType::Unknown, Modes::default(), 1)
    }

    /// Set the owning user and group.
    pub fn with_owner(mut self, owner: impl Into<String>, group: impl Into<String>) -> Self {
        self.owner = owner.into();
        self.group = group.into();
        self
    }

    /// Set the permission triad.
    pub fn with_modes(mut self, modes: Modes) -> Self {
        self.modes = modes;
        self
    }

    /// Set the size.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }
}

/// Identifies one backend instance. Handles never resolve against any
/// other instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostId(Uuid);

impl HostId {
    /// A fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for HostId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for HostId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque token returned by every open.
///
/// `local_id` is unique among the handles currently open on the issuing
/// backend and may be reused once released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileHandle {
    pub host: HostId,
    pub local_id: u32,
}

impl FileHandle {
    pub fn new(host: HostId, local_id: u32) -> Self {
        Self { host, local_id }
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.host, self.local_id)
    }
}

/// Filesystem statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatFs {
    /// Total blocks.
    pub blocks: u64,
    /// Free blocks.
    pub bfree: u64,
    /// Available blocks (to non-root).
    pub bavail: u64,
    /// Total inodes.
    pub files: u64,
    /// Free inodes.
    pub ffree: u64,
    /// Block size.
    pub bsize: u32,
    /// Maximum name length.
    pub namelen: u32,
}

impl Default for StatFs {
    fn default() -> Self {
        Self {
            blocks: 0,
            bfree: 0,
            bavail: 0,
            files: 0,
            ffree: 0,
            bsize: 4096,
            namelen: 255,
        }
    }
}
