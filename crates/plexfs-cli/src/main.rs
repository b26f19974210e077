//! plexfs command-line front-end.
//!
//! Builds one backend from configuration and runs a single contract
//! operation against it.
//!
//! Usage:
//!   # Walk the in-process namespace (clock, resolver, static files)
//!   plexfs tree
//!   plexfs cat /time
//!   plexfs query /net/resolve localhost:22
//!
//!   # The same commands against a host directory
//!   plexfs --backend posix --root ~/scratch ls /

mod config;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt};

use plexfs_kernel::modules::{BufferFile, QueryFile, RESOLVER_PATH, TIME_PATH, TimeFile};
use plexfs_kernel::{FileSystem, FsError, FsWorker, Metadata, SharedFs, TreeBackend};

use crate::config::{CliConfig, ProcessConfig};

/// Largest single read issued by `query`.
const QUERY_CHUNK: usize = 64 * 1024;

#[derive(Parser, Debug)]
#[command(name = "plexfs")]
#[command(about = "Explore a plexfs namespace")]
struct Args {
    /// Config file (default: ~/.config/plexfs/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend to run against
    #[arg(long, value_enum, default_value_t = Backend::Process, global = true)]
    backend: Backend,

    /// Host directory backing `/` for the posix backend
    #[arg(long, global = true)]
    root: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Backend {
    /// In-process path tree with the stock modules bound
    Process,
    /// Host filesystem under `--root`
    Posix,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory
    Ls { path: String },
    /// Print a file's contents
    Cat { path: String },
    /// Print a path's metadata as JSON
    Stat { path: String },
    /// Print the namespace below a path
    Tree {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Write a request to an endpoint and print its response
    Query { path: String, input: String },
    /// Replace a file's contents with text, creating it if needed
    Write { path: String, text: String },
}

type Worker = FsWorker<Box<dyn FileSystem>>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = CliConfig::load(args.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.as_deref().unwrap_or("info")));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let backend = build_backend(args.backend, &config, args.root.as_deref())?;
    let worker = FsWorker::new(SharedFs::new(backend));

    match args.command {
        Command::Ls { path } => cmd_ls(&worker, path).await,
        Command::Cat { path } => cmd_cat(&worker, path).await,
        Command::Stat { path } => cmd_stat(&worker, path).await,
        Command::Tree { path } => cmd_tree(&worker, path).await,
        Command::Query { path, input } => cmd_query(&worker, path, input).await,
        Command::Write { path, text } => cmd_write(&worker, path, text).await,
    }
}

// ============================================================================
// Backends
// ============================================================================

fn build_backend(
    backend: Backend,
    config: &CliConfig,
    root: Option<&str>,
) -> Result<Box<dyn FileSystem>> {
    match backend {
        Backend::Process => Ok(Box::new(process_namespace(&config.process)?)),
        Backend::Posix => posix_backend(config, root),
    }
}

/// The in-process namespace described by `[process]`.
fn process_namespace(config: &ProcessConfig) -> Result<TreeBackend> {
    let mut tree = TreeBackend::new();
    if config.time {
        tree.add_file(TIME_PATH, TimeFile::new())?;
    }
    if config.resolver {
        tree.add_file(RESOLVER_PATH, QueryFile::resolver())?;
    }
    for file in &config.files {
        tree.add_file(&file.path, BufferFile::with_contents(file.contents.as_bytes()))
            .with_context(|| format!("binding {}", file.path))?;
    }
    tracing::debug!(entries = tree.entry_count(), "process namespace ready");
    Ok(tree)
}

#[cfg(unix)]
fn posix_backend(config: &CliConfig, root: Option<&str>) -> Result<Box<dyn FileSystem>> {
    let Some(root) = config.posix_root(root) else {
        bail!("the posix backend needs --root or [posix] root in the config");
    };
    if !root.is_dir() {
        bail!("posix root {} is not a directory", root.display());
    }
    tracing::info!(root = %root.display(), "using host directory");
    Ok(Box::new(plexfs_kernel::PosixBackend::new(root)))
}

#[cfg(not(unix))]
fn posix_backend(_config: &CliConfig, _root: Option<&str>) -> Result<Box<dyn FileSystem>> {
    bail!("the posix backend is only available on unix hosts")
}

// ============================================================================
// Commands
// ============================================================================

fn describe(md: &Metadata) -> String {
    format!(
        "{:<9} {} {:>8} {:>8} {:>10} {}",
        md.kind.to_string(),
        md.modes,
        md.owner,
        md.group,
        md.size,
        md.path
    )
}

async fn cmd_ls(worker: &Worker, path: String) -> Result<()> {
    let mut listing = worker
        .read_directory(path.clone())
        .await
        .with_context(|| format!("listing {path}"))?;
    listing.sort_by(|a, b| a.path.cmp(&b.path));
    for md in &listing {
        println!("{}", describe(md));
    }
    Ok(())
}

async fn cmd_cat(worker: &Worker, path: String) -> Result<()> {
    let data = worker
        .read_all(path.clone())
        .await
        .with_context(|| format!("reading {path}"))?;
    std::io::stdout().write_all(&data)?;
    Ok(())
}

async fn cmd_stat(worker: &Worker, path: String) -> Result<()> {
    let md = worker
        .read_metadata(path.clone())
        .await
        .with_context(|| format!("stat {path}"))?;
    println!("{}", serde_json::to_string_pretty(&md)?);
    Ok(())
}

async fn cmd_tree(worker: &Worker, path: String) -> Result<()> {
    let lines = worker
        .call(move |fs| {
            let mut lines = Vec::new();
            walk(&**fs, &path, 0, &mut lines)?;
            Ok(lines)
        })
        .await?;
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

/// Depth-first listing, one indented line per entry.
fn walk<F: FileSystem + ?Sized>(
    fs: &F,
    path: &str,
    depth: usize,
    lines: &mut Vec<String>,
) -> Result<(), FsError> {
    let mut listing = fs.read_directory(path)?;
    listing.sort_by(|a, b| a.path.cmp(&b.path));
    for md in listing {
        let name = md.path.rsplit('/').next().unwrap_or(&md.path);
        let suffix = if md.is_dir() { "/" } else { "" };
        lines.push(format!("{}{name}{suffix}", "  ".repeat(depth)));
        // bare nodes list like directories
        if md.is_dir() || md.kind == plexfs_kernel::FileType::Unknown {
            walk(fs, &md.path, depth + 1, lines)?;
        }
    }
    Ok(())
}

async fn cmd_query(worker: &Worker, path: String, input: String) -> Result<()> {
    let fh = worker
        .open_file(path.clone(), true)
        .await
        .with_context(|| format!("opening {path}"))?;

    let exchanged = async {
        worker.write_file(fh, input.into_bytes(), 0).await?;
        let mut response = Vec::new();
        loop {
            let chunk = worker.read_file(fh, response.len() as u64, QUERY_CHUNK).await?;
            if chunk.is_empty() {
                break;
            }
            response.extend_from_slice(&chunk);
        }
        Ok::<_, FsError>(response)
    }
    .await;

    let closed = worker.close_file(fh).await;
    let response = exchanged.with_context(|| format!("querying {path}"))?;
    closed?;
    std::io::stdout().write_all(&response)?;
    Ok(())
}

async fn cmd_write(worker: &Worker, path: String, text: String) -> Result<()> {
    let fh = match worker.open_file(path.clone(), true).await {
        Ok(fh) => fh,
        Err(FsError::NoSuchPath(_)) => worker
            .create_file(Metadata::file(path.clone()), true)
            .await
            .with_context(|| format!("creating {path}"))?,
        Err(e) => return Err(e).with_context(|| format!("opening {path}")),
    };
    let written = async {
        match worker.resize_file(path.clone(), 0).await {
            // endpoints without a length take the write as-is
            Err(FsError::NotSupported(_)) => {
                tracing::debug!(path = %path, "not truncated");
            }
            other => other?,
        }
        worker.write_file(fh, text.into_bytes(), 0).await
    }
    .await;
    let closed = worker.close_file(fh).await;
    let n = written.with_context(|| format!("writing {path}"))?;
    closed?;
    tracing::info!(path = %path, bytes = n, "written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticFile;

    #[test]
    fn test_process_namespace_defaults() {
        let mut tree = process_namespace(&ProcessConfig::default()).unwrap();
        assert!(tree.read_metadata(TIME_PATH).unwrap().is_file());
        assert!(tree.read_metadata(RESOLVER_PATH).unwrap().is_file());
        assert!(!tree.read_all(TIME_PATH).unwrap().is_empty());
    }

    #[test]
    fn test_process_namespace_static_files() {
        let config = ProcessConfig {
            time: false,
            resolver: false,
            files: vec![StaticFile {
                path: "/etc/motd".into(),
                contents: "welcome\n".into(),
            }],
        };
        let mut tree = process_namespace(&config).unwrap();
        assert!(!tree.exists(TIME_PATH));
        assert_eq!(tree.read_all("/etc/motd").unwrap(), b"welcome\n");
    }

    #[test]
    fn test_conflicting_static_files_fail() {
        let config = ProcessConfig {
            time: false,
            resolver: false,
            files: vec![
                StaticFile {
                    path: "/a".into(),
                    contents: String::new(),
                },
                StaticFile {
                    path: "/a/b".into(),
                    contents: String::new(),
                },
            ],
        };
        assert!(process_namespace(&config).is_err());
    }

    #[test]
    fn test_walk_indents_children() {
        let mut tree = TreeBackend::new();
        tree.add_file("/a/b/c", BufferFile::new()).unwrap();
        tree.add_directory("/d").unwrap();
        let mut lines = Vec::new();
        walk(&tree, "/", 0, &mut lines).unwrap();
        assert_eq!(lines, vec!["a", "  b", "    c", "d/"]);
    }

    #[test]
    fn test_posix_backend_needs_root() {
        let config = CliConfig::default();
        assert!(build_backend(Backend::Posix, &config, None).is_err());
    }

    #[tokio::test]
    async fn test_write_then_cat_through_worker() {
        let backend: Box<dyn FileSystem> = Box::new(TreeBackend::new());
        let worker = FsWorker::new(SharedFs::new(backend));
        cmd_write(&worker, "/notes".into(), "hello".into()).await.unwrap();
        assert_eq!(worker.read_all("/notes").await.unwrap(), b"hello");
        cmd_write(&worker, "/notes".into(), "J".into()).await.unwrap();
        assert_eq!(worker.read_all("/notes").await.unwrap(), b"J");
    }

    #[tokio::test]
    async fn test_write_to_endpoint_without_length() {
        let mut tree = TreeBackend::new();
        tree.add_file("/echo", QueryFile::new(|req| Ok(req.to_vec())))
            .unwrap();
        let backend: Box<dyn FileSystem> = Box::new(tree);
        let worker = FsWorker::new(SharedFs::new(backend));
        cmd_write(&worker, "/echo".into(), "ping".into()).await.unwrap();
        cmd_write(&worker, "/echo".into(), "pong".into()).await.unwrap();
    }
}
