// src/session/diff.rs

//! Reconciling recorded manifests with the resolved state
//!
//! Pure functions: nothing here touches the target or the host filesystem.

use super::workspace::{Contents, ResolvedDistribution, ResolvedSet};
use crate::manifest::InstalledSet;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::warn;

/// One file-level change, paths relative to the install directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOperation {
    Create { path: String, source: PathBuf },
    Overwrite { path: String, source: PathBuf },
    Delete { path: String },
}

impl FileOperation {
    pub fn path(&self) -> &str {
        match self {
            Self::Create { path, .. } | Self::Overwrite { path, .. } | Self::Delete { path } => {
                path
            }
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete { .. })
    }
}

/// Give every contested path to a single distribution
///
/// When several resolved distributions claim the same path, a freshly
/// installed one beats an unchanged one, and among equals the later name
/// wins. Losers drop the path from their file list, so no two records
/// ever claim it.
pub fn assign_ownership(resolved: &mut ResolvedSet) {
    let mut owners: BTreeMap<String, (bool, String)> = BTreeMap::new();
    for dist in resolved.values() {
        let rank = (dist.is_fresh(), dist.name.clone());
        for path in dist.paths() {
            match owners.get(path) {
                Some(current) if *current >= rank => {
                    warn!(
                        "{} is claimed by both {} and {}, keeping {}",
                        path, current.1, dist.name, current.1
                    );
                }
                Some(current) => {
                    warn!(
                        "{} is claimed by both {} and {}, keeping {}",
                        path, current.1, dist.name, dist.name
                    );
                    owners.insert(path.to_string(), rank.clone());
                }
                None => {
                    owners.insert(path.to_string(), rank.clone());
                }
            }
        }
    }

    for dist in resolved.values_mut() {
        let name = dist.name.clone();
        let owned = |path: &String| owners.get(path).is_some_and(|(_, owner)| *owner == name);
        match &mut dist.contents {
            Contents::Unchanged(files) => files.retain(|p| owned(p)),
            Contents::Fresh(sources) => sources.retain(|p, _| owned(p)),
        }
    }
}

/// File operations turning the `previous` state into the `resolved` one
///
/// Creates and overwrites come first, in path order, then deletes. A path
/// is only deleted when no resolved distribution claims it.
pub fn compute(previous: &InstalledSet, resolved: &ResolvedSet) -> Vec<FileOperation> {
    let claimed: BTreeSet<&str> = resolved.values().flat_map(|d| d.paths()).collect();

    let mut writes = Vec::new();
    let mut deletes = BTreeSet::new();

    let names: BTreeSet<&String> = previous.keys().chain(resolved.keys()).collect();
    for name in names {
        let before = previous.get(name);
        let after = resolved.get(name);

        let old_files: BTreeSet<&str> = before
            .map(|r| r.files.iter().map(String::as_str).collect())
            .unwrap_or_default();

        if let Some(dist) = after {
            let replaced = match before {
                Some(record) => record.version != dist.version || dist.is_fresh(),
                None => false,
            };
            writes.extend(write_operations(dist, &old_files, replaced));
            let new_files: BTreeSet<&str> = dist.paths().into_iter().collect();
            deletes.extend(old_files.difference(&new_files).copied());
        } else {
            deletes.extend(old_files.iter().copied());
        }
    }

    writes.sort_by(|a: &FileOperation, b| a.path().cmp(b.path()));
    writes.extend(
        deletes
            .into_iter()
            .filter(|path| !claimed.contains(path))
            .map(|path| FileOperation::Delete {
                path: path.to_string(),
            }),
    );
    writes
}

fn write_operations(
    dist: &ResolvedDistribution,
    old_files: &BTreeSet<&str>,
    replaced: bool,
) -> Vec<FileOperation> {
    let Contents::Fresh(sources) = &dist.contents else {
        return Vec::new();
    };
    sources
        .iter()
        .filter_map(|(path, source)| {
            if !old_files.contains(path.as_str()) {
                Some(FileOperation::Create {
                    path: path.clone(),
                    source: source.clone(),
                })
            } else if replaced {
                Some(FileOperation::Overwrite {
                    path: path.clone(),
                    source: source.clone(),
                })
            } else {
                None
            }
        })
        .collect()
}

/// Names whose records disappear in the resolved state
pub fn removed_distributions(previous: &InstalledSet, resolved: &ResolvedSet) -> Vec<String> {
    previous
        .keys()
        .filter(|name| !resolved.contains_key(*name))
        .cloned()
        .collect()
}
