// src/session/mod.rs

//! Installation sessions
//!
//! A session reconciles the target with what the external installer
//! resolves:
//!
//! 1. Discover: load the manifest store from the target
//! 2. Resolve: mirror it into the scratch directory and run the installer
//! 3. Diff: compare recorded manifests with the installer's result
//! 4. Apply: write, then delete files on the target
//! 5. Finalize: commit the new records, only after Apply succeeded

pub mod apply;
pub mod compile;
pub mod diff;
pub mod installer;
pub mod workspace;

pub use diff::FileOperation;
pub use installer::{Installer, InstallerOutput, PipInstaller};
pub use workspace::{Contents, ResolvedDistribution, ResolvedSet};

use crate::error::Result;
use crate::manifest::{InstalledSet, ManifestStore};
use crate::progress::Progress;
use crate::target::Target;
use std::path::Path;
use tempfile::TempDir;
use tracing::{debug, info};

/// What a state-changing command did
#[derive(Debug, Default)]
pub struct Outcome {
    pub installer: InstallerOutput,
    pub operations: Vec<FileOperation>,
    /// Distributions whose records were removed
    pub removed: Vec<String>,
    /// False when the user declined the change
    pub applied: bool,
}

pub struct Session<'a> {
    target: &'a mut dyn Target,
    installer: &'a mut dyn Installer,
    progress: &'a dyn Progress,
    store: ManifestStore,
    installed: Option<InstalledSet>,
}

impl<'a> Session<'a> {
    pub fn new(
        target: &'a mut dyn Target,
        installer: &'a mut dyn Installer,
        progress: &'a dyn Progress,
    ) -> Self {
        let store = ManifestStore::for_target(&*target);
        Self {
            target,
            installer,
            progress,
            store,
            installed: None,
        }
    }

    /// Records currently on the target, loaded once per session
    pub fn discover(&mut self) -> Result<&InstalledSet> {
        if self.installed.is_none() {
            let installed = self.store.load(self.target)?;
            info!("Found {} installed distributions", installed.len());
            self.installed = Some(installed);
        }
        Ok(self.installed.get_or_insert_with(InstalledSet::new))
    }

    /// Run the installer against a mirror of the target without changing
    /// the target (list, show, freeze, check, download, wheel)
    pub fn query(&mut self, args: &[String]) -> Result<InstallerOutput> {
        let installed = self.discover()?.clone();
        workspace::populate(self.installer.site_packages(), &installed)?;
        self.installer.run(args)
    }

    /// Install or upgrade, then bring the target in line
    pub fn install(&mut self, args: &[String], mpy_cross: Option<&Path>) -> Result<Outcome> {
        let installed = self.discover()?.clone();
        let (output, resolved) = self.resolve(&installed, args)?;
        self.reconcile(installed, resolved, output, mpy_cross, &mut |_| Ok(true))
    }

    /// Uninstall, asking `confirm` with the affected names before touching
    /// the target
    pub fn uninstall(
        &mut self,
        args: &[String],
        confirm: &mut dyn FnMut(&[String]) -> Result<bool>,
    ) -> Result<Outcome> {
        let installed = self.discover()?.clone();
        let (output, resolved) = self.resolve(&installed, args)?;
        self.reconcile(installed, resolved, output, None, confirm)
    }

    pub fn close(self) -> Result<()> {
        self.target.close()
    }

    fn resolve(
        &mut self,
        installed: &InstalledSet,
        args: &[String],
    ) -> Result<(InstallerOutput, ResolvedSet)> {
        let site_packages = self.installer.site_packages().to_path_buf();
        workspace::populate(&site_packages, installed)?;
        let output = self.installer.run(args)?;
        let resolved = workspace::read_state(&site_packages, installed)?;
        debug!("Installer left {} distributions", resolved.len());
        Ok((output, resolved))
    }

    fn reconcile(
        &mut self,
        installed: InstalledSet,
        mut resolved: ResolvedSet,
        output: InstallerOutput,
        mpy_cross: Option<&Path>,
        confirm: &mut dyn FnMut(&[String]) -> Result<bool>,
    ) -> Result<Outcome> {
        let removed = diff::removed_distributions(&installed, &resolved);
        if !removed.is_empty() && !confirm(&removed)? {
            info!("Leaving the target unchanged");
            return Ok(Outcome {
                installer: output,
                removed: Vec::new(),
                ..Default::default()
            });
        }

        // Compiled files must outlive Apply
        let compiled_dir = match mpy_cross {
            Some(mpy_cross) => {
                let dir = TempDir::new()?;
                compile::compile_sources(&mut resolved, mpy_cross, dir.path())?;
                Some(dir)
            }
            None => None,
        };

        diff::assign_ownership(&mut resolved);
        let operations = diff::compute(&installed, &resolved);

        if !operations.is_empty() {
            self.progress
                .message("Starting to apply changes to the target.");
            for name in &removed {
                self.progress.message(&format!("Removing {name}"));
            }
            for dist in resolved.values().filter(|d| d.is_fresh()) {
                let verb = if installed.contains_key(&dist.name) { "Updating" } else { "Copying" };
                self.progress.message(&format!("{verb} {} {}", dist.name, dist.version));
            }
            apply::apply(self.target, &operations, self.progress)?;
        }
        apply::finalize(self.target, &self.store, &installed, &resolved)?;
        if !operations.is_empty() {
            self.progress.message("All changes applied.");
        }
        drop(compiled_dir);

        self.installed = Some(
            resolved
                .values()
                .map(|d| (d.name.clone(), d.to_record()))
                .collect(),
        );
        Ok(Outcome {
            installer: output,
            operations,
            removed,
            applied: true,
        })
    }
}
