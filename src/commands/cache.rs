// src/commands/cache.rs
//! Cache directory management

use crate::cli::CacheAction;
use crate::config::Config;
use crate::error::Result;
use crate::session::{Installer, PipInstaller};
use std::fs;
use std::io::IsTerminal;
use std::path::Path;
use tracing::{debug, info};

pub fn cmd_cache(config: &Config, action: CacheAction, quiet: bool) -> Result<()> {
    let cache_dir = &config.cache_dir;
    match action {
        CacheAction::Dir => {
            println!("{}", cache_dir.display());
        }
        CacheAction::Info => {
            let (count, bytes) = scan_cache(cache_dir);
            println!("Location: {}", cache_dir.display());
            println!("Files: {}", count);
            println!("Size: {}", human_bytes(bytes));
        }
        CacheAction::List => {
            if !cache_dir.exists() {
                println!("Cache directory {} does not exist yet", cache_dir.display());
                return Ok(());
            }
            let color = std::io::stdout().is_terminal();
            let mut installer = PipInstaller::prepare(&config.python, cache_dir, color)?;
            let output = installer.run(&["cache".to_string(), "list".to_string()])?;
            print!("{}", output.stdout);
        }
        CacheAction::Purge => {
            if cache_dir.exists() {
                let (count, _) = scan_cache(cache_dir);
                info!("Purging {}", cache_dir.display());
                fs::remove_dir_all(cache_dir)?;
                if !quiet {
                    println!("Files removed: {}", count);
                }
            } else if !quiet {
                println!("Cache directory {} does not exist", cache_dir.display());
            }
        }
    }
    Ok(())
}

/// Number of files and their total size under `dir`
pub fn scan_cache(dir: &Path) -> (usize, u64) {
    if !dir.exists() {
        return (0, 0);
    }

    let mut count = 0usize;
    let mut total_bytes = 0u64;
    for entry in walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file() {
            if let Ok(metadata) = entry.metadata() {
                count += 1;
                total_bytes += metadata.len();
            }
        }
    }

    debug!("Cache: {} files, {} bytes", count, total_bytes);
    (count, total_bytes)
}

pub fn human_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} kB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
