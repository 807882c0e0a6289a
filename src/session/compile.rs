// src/session/compile.rs

//! Precompiling deployed sources with mpy-cross

use super::workspace::{Contents, ResolvedSet};
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

pub const MPY_CROSS: &str = "mpy-cross";

/// The given mpy-cross, or the one on PATH
pub fn find_mpy_cross(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) => Err(Error::user(format!(
            "mpy-cross not found at {}",
            path.display()
        ))),
        None => which::which(MPY_CROSS).map_err(|_| {
            Error::user("Could not find mpy-cross on PATH. Specify it with --mpy-cross")
        }),
    }
}

pub fn compiled_path(path: &str) -> String {
    match path.strip_suffix(".py") {
        Some(stem) => format!("{stem}.mpy"),
        None => path.to_string(),
    }
}

/// Replace every freshly installed `.py` with its `.mpy`, compiled into
/// `out_dir`
pub fn compile_sources(resolved: &mut ResolvedSet, mpy_cross: &Path, out_dir: &Path) -> Result<()> {
    for dist in resolved.values_mut() {
        let Contents::Fresh(sources) = &mut dist.contents else {
            continue;
        };
        let py_files: Vec<String> = sources
            .keys()
            .filter(|p| p.ends_with(".py"))
            .cloned()
            .collect();
        for path in py_files {
            let Some(source) = sources.remove(&path) else {
                continue;
            };
            let target_path = compiled_path(&path);
            let output = out_dir.join(&target_path);
            if let Some(parent) = output.parent() {
                fs::create_dir_all(parent)?;
            }
            run_mpy_cross(mpy_cross, &source, &output)?;
            sources.insert(target_path, output);
        }
    }
    Ok(())
}

fn run_mpy_cross(mpy_cross: &Path, source: &Path, output: &Path) -> Result<()> {
    debug!("Compiling {} to {}", source.display(), output.display());
    let result = Command::new(mpy_cross)
        .arg("-o")
        .arg(output)
        .arg(source)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::user(format!("Failed to run {}: {e}", mpy_cross.display())))?;
    if !result.status.success() {
        return Err(Error::management(
            format!("mpy-cross failed for {}", source.display()),
            format!("{} -o {} {}", mpy_cross.display(), output.display(), source.display()),
            String::from_utf8_lossy(&result.stdout),
            String::from_utf8_lossy(&result.stderr),
        ));
    }
    Ok(())
}
