// src/config.rs
//! Configuration file parsing
//!
//! An optional TOML file at `$XDG_CONFIG_HOME/pipkin/config.toml` (or the
//! path given with `--config`) supplies defaults for index selection, the
//! workspace interpreter and the cache. Command line flags override it.
//!
//! ```toml
//! index_url = "https://pypi.org/simple"
//! extra_index_urls = ["https://example.com/simple"]
//! no_mp_org = false
//! python = "/usr/bin/python3"
//! cache_dir = "/home/me/.cache/pipkin"
//! fetch_timeout_secs = 30
//! proxy_port = 36628
//! irrelevant_packages = ["rpi-gpio"]
//! ```

use crate::error::{Error, Result};
use crate::index::{DEFAULT_FETCH_TIMEOUT, IndexSettings, PYPI_SIMPLE_INDEX};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Contents of the configuration file; every key is optional
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub index_url: Option<String>,
    #[serde(default)]
    pub extra_index_urls: Vec<String>,
    pub no_mp_org: Option<bool>,
    pub python: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub fetch_timeout_secs: Option<u64>,
    pub proxy_port: Option<u16>,
    #[serde(default)]
    pub irrelevant_packages: Vec<String>,
}

impl FileConfig {
    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| Error::user(format!("Invalid config file {}: {e}", origin.display())))
    }

    /// Load `explicit`, or the default location if it exists
    ///
    /// An explicitly given file must exist; a missing default file means
    /// built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => match default_config_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        match std::fs::read_to_string(&path) {
            Ok(text) => {
                debug!("Loading config from {}", path.display());
                Self::parse(&text, &path)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                Ok(Self::default())
            }
            Err(e) => Err(Error::user(format!(
                "Could not read config file {}: {e}",
                path.display()
            ))),
        }
    }
}

/// Index flags given on the command line
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexOverrides {
    pub index_url: Option<String>,
    pub extra_index_urls: Vec<String>,
    pub no_mp_org: bool,
}

/// Effective settings after merging flags, file and defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub index: IndexSettings,
    pub python: PathBuf,
    pub cache_dir: PathBuf,
    pub fetch_timeout: Duration,
    pub proxy_port: Option<u16>,
    pub irrelevant_packages: Vec<String>,
}

impl Config {
    pub fn resolve(file: FileConfig, overrides: IndexOverrides) -> Self {
        let extra_index_urls = if overrides.extra_index_urls.is_empty() {
            file.extra_index_urls
        } else {
            overrides.extra_index_urls
        };
        Self {
            index: IndexSettings {
                index_url: overrides
                    .index_url
                    .or(file.index_url)
                    .unwrap_or_else(|| PYPI_SIMPLE_INDEX.to_string()),
                extra_index_urls,
                no_mp_org: overrides.no_mp_org || file.no_mp_org.unwrap_or(false),
            },
            python: file.python.unwrap_or_else(default_python),
            cache_dir: file.cache_dir.unwrap_or_else(default_cache_dir),
            fetch_timeout: file
                .fetch_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_FETCH_TIMEOUT),
            proxy_port: file.proxy_port,
            irrelevant_packages: file.irrelevant_packages,
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pipkin").join("config.toml"))
}

pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("pipkin")
}

/// Interpreter used to build the workspace: the first python on PATH
pub fn default_python() -> PathBuf {
    ["python3", "python"]
        .iter()
        .find_map(|name| which::which(name).ok())
        .unwrap_or_else(|| PathBuf::from("python3"))
}
