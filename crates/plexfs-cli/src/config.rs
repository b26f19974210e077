//! CLI configuration.
//!
//! Loaded from `~/.config/plexfs/config.toml` unless `--config` names
//! another file:
//!
//! ```toml
//! log = "plexfs_kernel=debug"
//!
//! [posix]
//! root = "~/plexfs"
//!
//! [process]
//! time = true
//! resolver = true
//!
//! [[process.files]]
//! path = "/etc/motd"
//! contents = "hello from plexfs\n"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    /// Log filter used when `RUST_LOG` is unset.
    pub log: Option<String>,
    pub posix: PosixConfig,
    pub process: ProcessConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PosixConfig {
    /// Host directory backing `/`. A leading `~` is expanded.
    pub root: Option<String>,
}

/// The in-process namespace.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessConfig {
    /// Bind the clock at `/time`.
    pub time: bool,
    /// Bind the name resolver at `/net/resolve`.
    pub resolver: bool,
    pub files: Vec<StaticFile>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            time: true,
            resolver: true,
            files: Vec::new(),
        }
    }
}

/// A file bound into the process namespace at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticFile {
    pub path: String,
    #[serde(default)]
    pub contents: String,
}

impl CliConfig {
    /// Returns: ~/.config/plexfs/config.toml
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("plexfs").join("config.toml"))
    }

    /// Load `explicit`, or the default file if none was given.
    ///
    /// A missing default file yields the defaults; a missing explicit file
    /// is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::read(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::read(&path),
            _ => Ok(Self::default()),
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// The POSIX root, `override_root` first, tilde-expanded.
    pub fn posix_root(&self, override_root: Option<&str>) -> Option<PathBuf> {
        override_root
            .or(self.posix.root.as_deref())
            .map(|root| PathBuf::from(shellexpand::tilde(root).as_ref()))
    }
}
