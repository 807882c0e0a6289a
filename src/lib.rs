// src/lib.rs

//! pipkin: installs MicroPython and CircuitPython distributions onto boards
//!
//! pip does the resolving; pipkin mirrors the target's installed set into
//! pip's scratch directory, serves pip a filtered view of the package
//! indexes and copies the resulting difference onto the target.
//!
//! # Architecture
//!
//! - Index proxy: a local HTTP index merging micropython.org and PyPI
//! - Archive tweaker: restores build scripts in stripped source archives
//! - Targets: local directories, mounted volumes and raw-REPL boards
//! - Sessions: Discover, Resolve, Diff, Apply, Finalize
//! - Manifest store: per-distribution records kept on the target

pub mod archive;
pub mod cli;
pub mod commands;
pub mod config;
mod error;
pub mod index;
pub mod manifest;
pub mod naming;
pub mod progress;
pub mod proxy;
pub mod pyliteral;
pub mod session;
pub mod target;

pub use error::{Error, Result};
pub use manifest::{InstalledDistribution, InstalledSet, ManifestStore};
pub use progress::{ConsoleProgress, Progress, SilentProgress};
pub use proxy::{ProxyHandle, ProxyState};
pub use session::{Installer, InstallerOutput, Outcome, Session};
pub use target::{LocalTarget, Target, TargetSpec};
