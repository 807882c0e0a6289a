// src/session/installer.rs

//! The external installer: pip running inside a cached virtual environment
//!
//! # Workspace
//!
//! One virtual environment per host interpreter lives under
//! `<cache_dir>/workspaces/<hash>`. Its site-packages directory is the
//! scratch directory pip installs into. An exclusive `flock` on
//! `pipkin.lock` keeps two pipkin processes from sharing it.

use crate::error::{Error, Result};
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Bootstrap distributions pinned into every workspace
pub const WORKSPACE_PINS: [&str; 3] = ["pip==22.2.2", "setuptools==65.4.1", "wheel==0.38.4"];

const LOCK_FILE: &str = "pipkin.lock";

/// Captured output of one installer run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallerOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs the resolver against the scratch directory
pub trait Installer {
    /// Directory the installer writes installed distributions into
    fn site_packages(&self) -> &Path;

    /// Run with pip-style arguments; non-zero exit is a Management error
    fn run(&mut self, args: &[String]) -> Result<InstallerOutput>;
}

pub struct PipInstaller {
    workspace: PathBuf,
    python: PathBuf,
    site_packages: PathBuf,
    cache_dir: PathBuf,
    color: bool,
    // Held for the lifetime of the installer
    _lock: File,
}

impl PipInstaller {
    /// Create the workspace for `python` on first use, then lock it
    pub fn prepare(python: &Path, cache_dir: &Path, color: bool) -> Result<Self> {
        let workspace = workspace_path(cache_dir, python);
        let venv_python = venv_executable(&workspace);

        if !venv_python.exists() {
            info!("Preparing working environment at {}", workspace.display());
            fs::create_dir_all(&workspace)?;
            check_call(
                Command::new(python)
                    .args(["-I", "-m", "venv"])
                    .arg(&workspace),
            )?;
            check_call(
                Command::new(&venv_python)
                    .args([
                        "-I",
                        "-m",
                        "pip",
                        "--disable-pip-version-check",
                        "install",
                        "--no-warn-script-location",
                        "--upgrade",
                    ])
                    .args(WORKSPACE_PINS),
            )?;
            info!("Done preparing working environment");
        } else {
            debug!("Using existing working environment at {}", workspace.display());
        }

        let lock = acquire_lock(&workspace.join(LOCK_FILE))?;
        let site_packages = query_site_packages(&venv_python)?;
        debug!("Workspace site-packages: {}", site_packages.display());

        Ok(Self {
            workspace,
            python: venv_python,
            site_packages,
            cache_dir: cache_dir.to_path_buf(),
            color,
            _lock: lock,
        })
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.python);
        cmd.args(["-I", "-m", "pip"]);
        if !self.color {
            cmd.arg("--no-color");
        }
        cmd.args(["--disable-pip-version-check", "--trusted-host", "127.0.0.1"])
            .args(args);
        for (key, _) in std::env::vars_os() {
            if key.to_string_lossy().starts_with("PIP_") {
                cmd.env_remove(key);
            }
        }
        cmd.env("PIP_CACHE_DIR", &self.cache_dir)
            .stdin(Stdio::null());
        cmd
    }
}

impl Installer for PipInstaller {
    fn site_packages(&self) -> &Path {
        &self.site_packages
    }

    fn run(&mut self, args: &[String]) -> Result<InstallerOutput> {
        let mut cmd = self.command(args);
        let command_line = format!("{} -I -m pip {}", self.python.display(), args.join(" "));
        debug!("Calling pip: {}", command_line);

        let output = cmd
            .output()
            .map_err(|e| Error::user(format!("Failed to run {}: {e}", self.python.display())))?;
        let result = InstallerOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !output.status.success() {
            return Err(Error::management(
                format!("pip failed with {}", output.status),
                command_line,
                result.stdout,
                result.stderr,
            ));
        }
        Ok(result)
    }
}

/// Workspace directory for an interpreter; the same interpreter always
/// maps to the same workspace
pub fn workspace_path(cache_dir: &Path, python: &Path) -> PathBuf {
    let digest = Sha256::digest(python.to_string_lossy().as_bytes());
    cache_dir
        .join("workspaces")
        .join(&hex::encode(digest)[..16])
}

pub fn venv_executable(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts").join("python.exe")
    } else {
        venv.join("bin").join("python3")
    }
}

/// Take the workspace lock without waiting
pub fn acquire_lock(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?;
    match file.try_lock_exclusive() {
        Ok(()) => {
            debug!("Acquired workspace lock at {}", path.display());
            Ok(file)
        }
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => Err(Error::user(
            "Could not get exclusive access to the working environment. \
             Is there another pipkin instance running?",
        )),
        Err(e) => Err(e.into()),
    }
}

fn query_site_packages(venv_python: &Path) -> Result<PathBuf> {
    let output = Command::new(venv_python)
        .args([
            "-c",
            "import sysconfig; print(sysconfig.get_paths()['purelib'])",
        ])
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::user(format!("Failed to run {}: {e}", venv_python.display())))?;
    if !output.status.success() {
        return Err(Error::management(
            "Could not query site-packages of the working environment",
            format!("{} -c ...", venv_python.display()),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        ));
    }
    Ok(PathBuf::from(String::from_utf8_lossy(&output.stdout).trim()))
}

fn check_call(cmd: &mut Command) -> Result<()> {
    let command_line = format!("{:?}", cmd);
    debug!("Running {}", command_line);
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::user(format!("Failed to run {command_line}: {e}")))?;
    if !output.status.success() {
        return Err(Error::management(
            "Could not prepare the working environment",
            command_line,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        ));
    }
    Ok(())
}
