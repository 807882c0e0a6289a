// src/target/local.rs

//! Targets backed by the local filesystem: a plain directory or a mounted
//! board volume

use super::Target;
use crate::error::{Error, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Install directory on mounted CircuitPython volumes
pub const MOUNT_INSTALL_DIR: &str = "/lib";

/// Install directory when targeting a plain directory
pub const DIR_INSTALL_DIR: &str = "/";

pub struct LocalTarget {
    root: PathBuf,
    install_dir: String,
}

impl LocalTarget {
    /// Plain directory, created if missing; distributions go to its top level
    pub fn dir(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)?;
        Ok(Self {
            root: path.to_path_buf(),
            install_dir: DIR_INSTALL_DIR.to_string(),
        })
    }

    /// Mounted volume, which must exist; distributions go to `/lib`
    pub fn mount(path: &Path) -> Result<Self> {
        if !path.is_dir() {
            return Err(Error::user(format!(
                "Mount point {} is not a directory",
                path.display()
            )));
        }
        Ok(Self {
            root: path.to_path_buf(),
            install_dir: MOUNT_INSTALL_DIR.to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a target path to a host path, rejecting anything escaping the root
    fn host_path(&self, path: &str) -> Result<PathBuf> {
        let mut normalized = PathBuf::new();
        for component in Path::new(path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(c) => normalized.push(c),
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    warn!("Path traversal attempt detected: {}", path);
                    return Err(Error::Io(std::io::Error::new(
                        ErrorKind::InvalidInput,
                        format!("Path traversal detected: {path}"),
                    )));
                }
            }
        }
        Ok(self.root.join(normalized))
    }
}

/// Host filesystem failures on a target count as a broken link to it
fn link_error(action: &str, path: &str, err: std::io::Error) -> Error {
    Error::Communication(format!("could not {action} {path}: {err}"))
}

impl Target for LocalTarget {
    fn install_dir(&self) -> &str {
        &self.install_dir
    }

    fn read_file(&mut self, path: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.host_path(path)?) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(link_error("read", path, e)),
        }
    }

    fn write_file(&mut self, path: &str, content: &[u8]) -> Result<()> {
        let host_path = self.host_path(path)?;
        if let Some(parent) = host_path.parent() {
            fs::create_dir_all(parent).map_err(|e| link_error("write", path, e))?;
        }
        fs::write(&host_path, content).map_err(|e| link_error("write", path, e))?;
        debug!("Wrote {} ({} bytes)", path, content.len());
        Ok(())
    }

    fn remove_file(&mut self, path: &str) -> Result<()> {
        let host_path = self.host_path(path)?;
        match fs::remove_file(&host_path) {
            Ok(()) => {
                info!("Removed file: {}", path);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("File already removed: {}", path);
                Ok(())
            }
            Err(e) => Err(link_error("remove", path, e)),
        }
    }

    fn remove_dir_if_empty(&mut self, path: &str) -> Result<bool> {
        let host_path = self.host_path(path)?;
        if host_path == self.root || !host_path.is_dir() {
            return Ok(false);
        }
        match fs::remove_dir(&host_path) {
            Ok(()) => {
                info!("Removed directory: {}", path);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => {
                debug!("Directory not empty, skipping: {}", path);
                Ok(false)
            }
            Err(e) => Err(link_error("remove directory", path, e)),
        }
    }

    fn list_dir(&mut self, path: &str) -> Result<Option<Vec<String>>> {
        let entries = match fs::read_dir(self.host_path(path)?) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(link_error("list", path, e)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| link_error("list", path, e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(Some(names))
    }
}
