// src/session/workspace.rs

//! Mirroring the target's installed set into the installer's scratch
//! directory and reading back what the installer left there
//!
//! Before a command the scratch directory gets one placeholder
//! `*.dist-info` per installed distribution, so the resolver sees exactly
//! what the target has. Placeholders carry a distinctive `INSTALLER` file;
//! one still present afterwards means the installer left that
//! distribution alone.

use crate::archive::CoreMetadata;
use crate::error::{Error, Result};
use crate::manifest::{InstalledDistribution, InstalledSet};
use crate::naming;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Distributions that belong to the workspace itself
pub const BOOTSTRAP_DISTRIBUTIONS: [&str; 4] = ["pip", "setuptools", "pkg_resources", "wheel"];
const BOOTSTRAP_FILES: [&str; 1] = ["easy_install.py"];

const PLACEHOLDER_INSTALLER: &str = "pipkin\n";

/// What one distribution looks like after the installer ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Contents {
    /// Placeholder untouched; these are the recorded files
    Unchanged(Vec<String>),
    /// Freshly written by the installer: target-relative path to host file
    Fresh(BTreeMap<String, PathBuf>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDistribution {
    /// Normalized name
    pub name: String,
    pub version: String,
    pub summary: Option<String>,
    pub license: Option<String>,
    pub requires: Vec<String>,
    pub contents: Contents,
}

impl ResolvedDistribution {
    pub fn is_fresh(&self) -> bool {
        matches!(self.contents, Contents::Fresh(_))
    }

    /// Target-relative paths this distribution claims
    pub fn paths(&self) -> Vec<&str> {
        match &self.contents {
            Contents::Unchanged(files) => files.iter().map(String::as_str).collect(),
            Contents::Fresh(sources) => sources.keys().map(String::as_str).collect(),
        }
    }

    pub fn source(&self, path: &str) -> Option<&Path> {
        match &self.contents {
            Contents::Fresh(sources) => sources.get(path).map(PathBuf::as_path),
            Contents::Unchanged(_) => None,
        }
    }

    pub fn to_record(&self) -> InstalledDistribution {
        let mut record = InstalledDistribution::new(
            &self.name,
            &self.version,
            self.paths().into_iter().map(str::to_string).collect(),
        );
        record.summary = self.summary.clone();
        record.license = self.license.clone();
        record.requires = self.requires.clone();
        record
    }
}

/// Distributions keyed by normalized name
pub type ResolvedSet = BTreeMap<String, ResolvedDistribution>;

fn is_bootstrap_item(name: &str) -> bool {
    if BOOTSTRAP_FILES.contains(&name) || BOOTSTRAP_DISTRIBUTIONS.contains(&name) {
        return true;
    }
    name.ends_with(".dist-info")
        && name
            .split('-')
            .next()
            .is_some_and(|dist| BOOTSTRAP_DISTRIBUTIONS.contains(&dist))
}

/// Remove everything the previous command left, keeping the bootstrap set
pub fn clear(site_packages: &Path) -> Result<()> {
    debug!("Clearing {}", site_packages.display());
    for entry in fs::read_dir(site_packages)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_bootstrap_item(&name) {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Clear the scratch directory and mirror `installed` into it
pub fn populate(site_packages: &Path, installed: &InstalledSet) -> Result<()> {
    clear(site_packages)?;
    for record in installed.values() {
        let dir_name = naming::dist_info_dir_name(&record.name, &record.version);
        let meta_dir = site_packages.join(&dir_name);
        fs::create_dir_all(&meta_dir)?;
        fs::write(meta_dir.join("METADATA"), record.core_metadata().render())?;
        fs::write(meta_dir.join("INSTALLER"), PLACEHOLDER_INSTALLER)?;
        let record_lines: String = ["METADATA", "INSTALLER", "RECORD"]
            .iter()
            .map(|f| format!("{dir_name}/{f},,\n"))
            .collect();
        fs::write(meta_dir.join("RECORD"), record_lines)?;
    }
    debug!("Populated workspace with {} placeholders", installed.len());
    Ok(())
}

/// Read back every distribution present in the scratch directory
pub fn read_state(site_packages: &Path, installed: &InstalledSet) -> Result<ResolvedSet> {
    let mut resolved = ResolvedSet::new();
    let mut names: Vec<String> = fs::read_dir(site_packages)?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".dist-info") && !is_bootstrap_item(n))
        .collect();
    names.sort();

    for dir_name in names {
        let meta_dir = site_packages.join(&dir_name);
        let Some((raw_name, dir_version)) = naming::parse_dist_info_dir_name(&dir_name) else {
            warn!("Skipping unrecognized metadata directory {}", dir_name);
            continue;
        };
        let name = naming::normalize(&raw_name);

        let installer = fs::read_to_string(meta_dir.join("INSTALLER")).unwrap_or_default();
        if installer == PLACEHOLDER_INSTALLER {
            if let Some(previous) = installed.get(&name) {
                resolved.insert(name, unchanged(previous));
                continue;
            }
            warn!("Placeholder {} has no manifest record", dir_name);
        }

        let metadata_bytes = fs::read(meta_dir.join("METADATA")).map_err(|e| {
            Error::Parse(format!("Missing METADATA in {dir_name}: {e}"))
        })?;
        let metadata = CoreMetadata::from_bytes(&metadata_bytes);
        let version = metadata.version.clone().unwrap_or(dir_version);

        let record = fs::read_to_string(meta_dir.join("RECORD"))
            .map_err(|e| Error::Parse(format!("Missing RECORD in {dir_name}: {e}")))?;
        let sources = deployable_files(site_packages, &dir_name, &record);

        resolved.insert(
            name.clone(),
            ResolvedDistribution {
                name,
                version,
                summary: metadata.summary,
                license: metadata.license,
                requires: metadata.requires_dist,
                contents: Contents::Fresh(sources),
            },
        );
    }
    Ok(resolved)
}

fn unchanged(previous: &InstalledDistribution) -> ResolvedDistribution {
    ResolvedDistribution {
        name: previous.name.clone(),
        version: previous.version.clone(),
        summary: previous.summary.clone(),
        license: previous.license.clone(),
        requires: previous.requires.clone(),
        contents: Contents::Unchanged(previous.files.clone()),
    }
}

/// Files from a RECORD that belong on the target
///
/// Entries outside site-packages (scripts, data) and absolute paths are
/// skipped. From the metadata directory only `METADATA` is kept.
fn deployable_files(site_packages: &Path, dir_name: &str, record: &str) -> BTreeMap<String, PathBuf> {
    let mut files = BTreeMap::new();
    for line in record.lines() {
        let rel_path = line.split(',').next().unwrap_or_default().trim();
        if rel_path.is_empty() || rel_path.starts_with("..") {
            continue;
        }
        if rel_path.starts_with('/') || Path::new(rel_path).is_absolute() {
            warn!("Skipping absolute path {}", rel_path);
            continue;
        }
        if rel_path.starts_with(&format!("{dir_name}/")) && !rel_path.ends_with("/METADATA") {
            continue;
        }
        if Path::new(rel_path)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            warn!("Skipping suspicious path {}", rel_path);
            continue;
        }
        let host_path = site_packages.join(rel_path);
        if !host_path.is_file() {
            debug!("Recorded file {} is missing, skipping", rel_path);
            continue;
        }
        files.insert(rel_path.replace('\\', "/"), host_path);
    }
    files
}
