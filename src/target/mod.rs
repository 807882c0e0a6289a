// src/target/mod.rs

//! Installation targets
//!
//! A target is where distributions end up: a local directory, a mounted
//! CircuitPython volume, or a MicroPython board behind a serial raw REPL.
//! Paths are always POSIX-style and absolute on the target side.

pub mod bare_metal;
pub mod connection;
pub mod local;

pub use bare_metal::BareMetalTarget;
pub use connection::{Connection, StreamConnection};
pub use local::LocalTarget;

use crate::error::{Error, Result};
use std::path::PathBuf;
use tracing::debug;

/// File operations the session needs from a target
pub trait Target {
    /// Directory under which distributions are installed, e.g. `/lib`
    fn install_dir(&self) -> &str;

    /// Content of `path`, or `None` if it doesn't exist
    fn read_file(&mut self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Write `content` to `path`, creating missing parent directories
    fn write_file(&mut self, path: &str, content: &[u8]) -> Result<()>;

    /// Remove `path` if it exists
    fn remove_file(&mut self, path: &str) -> Result<()>;

    /// Remove `path` if it is an empty directory; true if removed
    fn remove_dir_if_empty(&mut self, path: &str) -> Result<bool>;

    /// Entry names in `path`, or `None` if it doesn't exist
    fn list_dir(&mut self, path: &str) -> Result<Option<Vec<String>>>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// How the user asked to reach the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    Port(String),
    Mount(PathBuf),
    Dir(PathBuf),
}

impl TargetSpec {
    /// Build a spec from the mutually exclusive command line options,
    /// auto-detecting when none is given
    pub fn from_options(
        port: Option<String>,
        mount: Option<PathBuf>,
        dir: Option<PathBuf>,
    ) -> Result<Self> {
        match (port, mount, dir) {
            (Some(port), None, None) => Ok(Self::Port(port)),
            (None, Some(mount), None) => Ok(Self::Mount(mount)),
            (None, None, Some(dir)) => Ok(Self::Dir(dir)),
            (None, None, None) => detect_mount(&default_mount_roots()).map(Self::Mount),
            _ => Err(Error::user(
                "Only one of --port, --mount and --dir can be given",
            )),
        }
    }

    pub fn open(&self) -> Result<Box<dyn Target>> {
        match self {
            Self::Dir(path) => Ok(Box::new(LocalTarget::dir(path)?)),
            Self::Mount(path) => Ok(Box::new(LocalTarget::mount(path)?)),
            Self::Port(port) => {
                let connection = StreamConnection::open_serial(port)?;
                Ok(Box::new(BareMetalTarget::connect(connection)?))
            }
        }
    }
}

/// Volume roots under which mounted boards show up
pub fn default_mount_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Ok(user) = std::env::var("USER") {
        roots.push(PathBuf::from("/media").join(&user));
        roots.push(PathBuf::from("/run/media").join(&user));
    }
    roots.push(PathBuf::from("/Volumes"));
    roots
}

/// Find the single mounted CircuitPython volume under `roots`
///
/// A volume is recognized by the `boot_out.txt` CircuitPython writes at its
/// root.
pub fn detect_mount(roots: &[PathBuf]) -> Result<PathBuf> {
    let mut candidates = Vec::new();
    for root in roots {
        let Ok(entries) = std::fs::read_dir(root) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.join("boot_out.txt").is_file() {
                debug!("Found CircuitPython volume {}", path.display());
                candidates.push(path);
            }
        }
    }

    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        0 => Err(Error::user(
            "Could not find a target. Specify --port, --mount or --dir",
        )),
        _ => Err(Error::user(format!(
            "Found several possible targets ({}). Specify --port, --mount or --dir",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

/// Join a target directory and a relative path
pub fn join_path(dir: &str, rel: &str) -> String {
    let rel = rel.trim_start_matches('/');
    if dir.is_empty() || dir == "/" {
        format!("/{rel}")
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), rel)
    }
}

/// Parent directory of a target path, `None` for the root
pub fn parent_path(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) if trimmed.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(idx) => Some(&trimmed[..idx]),
    }
}

/// Whether `path` lies strictly inside `dir`
pub fn is_inside(path: &str, dir: &str) -> bool {
    let dir = dir.trim_end_matches('/');
    path.len() > dir.len() + 1 && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}
