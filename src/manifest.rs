// src/manifest.rs

//! Installed-distribution records kept on the target
//!
//! The target has no package database. pipkin keeps one JSON record per
//! installed distribution under `{install_dir}/.pipkin/`, listing the
//! files it owns relative to the install directory. Reading the store
//! only needs plain file reads, so nothing runs on the device for it.

use crate::archive::CoreMetadata;
use crate::error::{Error, Result};
use crate::naming;
use crate::target::{Target, join_path};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Store directory name, relative to the install directory
pub const STORE_DIR: &str = ".pipkin";

/// Current record format
pub const FORMAT_VERSION: u32 = 1;

/// One installed distribution and the files it owns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledDistribution {
    #[serde(default = "default_format")]
    pub format: u32,
    /// Normalized distribution name
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// `Requires-Dist` entries, needed to reconstruct metadata for pip
    #[serde(default)]
    pub requires: Vec<String>,
    /// Paths relative to the install directory, sorted
    pub files: Vec<String>,
}

fn default_format() -> u32 {
    FORMAT_VERSION
}

impl InstalledDistribution {
    pub fn new(name: &str, version: &str, mut files: Vec<String>) -> Self {
        files.sort();
        files.dedup();
        Self {
            format: FORMAT_VERSION,
            name: naming::normalize(name),
            version: version.to_string(),
            summary: None,
            license: None,
            requires: Vec::new(),
            files,
        }
    }

    /// Metadata the installer sees for this distribution
    pub fn core_metadata(&self) -> CoreMetadata {
        let mut metadata = CoreMetadata::new(&self.name, &self.version);
        metadata.summary = self.summary.clone();
        metadata.license = self.license.clone();
        metadata.requires_dist = self.requires.clone();
        metadata
    }
}

/// Records keyed by normalized distribution name
pub type InstalledSet = BTreeMap<String, InstalledDistribution>;

/// Location of the record store on one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestStore {
    dir: String,
}

impl ManifestStore {
    pub fn new(install_dir: &str) -> Self {
        Self {
            dir: join_path(install_dir, STORE_DIR),
        }
    }

    pub fn for_target(target: &dyn Target) -> Self {
        Self::new(target.install_dir())
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn record_path(&self, name: &str) -> String {
        join_path(&self.dir, &format!("{}.json", naming::normalize(name)))
    }

    /// Every record in the store; a missing store means nothing installed
    pub fn load(&self, target: &mut dyn Target) -> Result<InstalledSet> {
        let mut installed = InstalledSet::new();
        let Some(entries) = target.list_dir(&self.dir)? else {
            debug!("No manifest store at {}", self.dir);
            return Ok(installed);
        };

        for entry in entries.iter().filter(|e| e.ends_with(".json")) {
            let path = join_path(&self.dir, entry);
            let Some(data) = target.read_file(&path)? else {
                warn!("Record {} vanished while loading", path);
                continue;
            };
            let record: InstalledDistribution = serde_json::from_slice(&data)
                .map_err(|e| Error::Parse(format!("Invalid manifest record {path}: {e}")))?;
            if record.format > FORMAT_VERSION {
                return Err(Error::Parse(format!(
                    "Manifest record {path} has format {} newer than supported {FORMAT_VERSION}",
                    record.format
                )));
            }
            installed.insert(naming::normalize(&record.name), record);
        }
        debug!("Loaded {} manifest records", installed.len());
        Ok(installed)
    }

    pub fn save(&self, target: &mut dyn Target, record: &InstalledDistribution) -> Result<()> {
        let data = serde_json::to_vec_pretty(record)?;
        target.write_file(&self.record_path(&record.name), &data)
    }

    pub fn remove(&self, target: &mut dyn Target, name: &str) -> Result<()> {
        target.remove_file(&self.record_path(name))?;
        target.remove_dir_if_empty(&self.dir)?;
        Ok(())
    }
}
