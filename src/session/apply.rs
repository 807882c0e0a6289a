// src/session/apply.rs

//! Carrying out file operations on the target and committing records
//!
//! Writes go first, deletes after them, then directories emptied by the
//! deletes are removed. Records are written only once every file
//! operation succeeded, so an interrupted apply never leaves a record
//! pointing at files that aren't there.

use super::diff::FileOperation;
use super::workspace::ResolvedSet;
use crate::error::Result;
use crate::manifest::{InstalledSet, ManifestStore};
use crate::progress::Progress;
use crate::target::{Target, is_inside, join_path, parent_path};
use std::collections::BTreeSet;
use std::fs;
use tracing::debug;

/// Perform `operations` in order, stopping at the first failure
pub fn apply(
    target: &mut dyn Target,
    operations: &[FileOperation],
    progress: &dyn Progress,
) -> Result<()> {
    let install_dir = target.install_dir().to_string();
    let mut touched_dirs = BTreeSet::new();

    for op in operations {
        let full_path = join_path(&install_dir, op.path());
        match op {
            FileOperation::Create { source, .. } | FileOperation::Overwrite { source, .. } => {
                let content = fs::read(source)?;
                debug!("Writing {} from {}", full_path, source.display());
                target.write_file(&full_path, &content)?;
                progress.tick();
            }
            FileOperation::Delete { .. } => {
                target.remove_file(&full_path)?;
                let mut dir = parent_path(&full_path);
                while let Some(d) = dir {
                    if !is_inside(d, &install_dir) {
                        break;
                    }
                    touched_dirs.insert(d.to_string());
                    dir = parent_path(d);
                }
            }
        }
    }
    progress.finish_line();

    // Deepest first, so a parent is tried after its children are gone
    let mut dirs: Vec<String> = touched_dirs.into_iter().collect();
    dirs.sort_by_key(|d| std::cmp::Reverse(d.matches('/').count()));
    for dir in dirs {
        target.remove_dir_if_empty(&dir)?;
    }
    Ok(())
}

/// Write records for the resolved state and drop records of removed
/// distributions; records equal to the stored ones are left alone
pub fn finalize(
    target: &mut dyn Target,
    store: &ManifestStore,
    previous: &InstalledSet,
    resolved: &ResolvedSet,
) -> Result<()> {
    for (name, dist) in resolved {
        let record = dist.to_record();
        if previous.get(name) != Some(&record) {
            debug!("Saving record for {} {}", name, record.version);
            store.save(target, &record)?;
        }
    }
    for name in previous.keys().filter(|n| !resolved.contains_key(*n)) {
        debug!("Removing record for {}", name);
        store.remove(target, name)?;
    }
    Ok(())
}
