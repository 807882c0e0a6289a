// src/naming.rs

//! Distribution naming and archive file name parsing
//!
//! Distribution names are compared in normalized form: lowercase, with every
//! run of `-`, `_` and `.` collapsed into a single `-`.
//!
//! File names are split into name and version with one deterministic rule:
//! the version is the first dash-separated segment (after the first one)
//! that starts with an ASCII digit. For sdists everything from that segment
//! on is the version; for wheels only that segment is, the rest being build
//! and compatibility tags. When no segment starts with a digit the rightmost
//! dash separates name and version.

use crate::error::{Error, Result};
use std::fmt;

/// Normalize a distribution name for comparison and lookup
pub fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                out.push('-');
                in_separator = true;
            }
        } else {
            out.extend(c.to_lowercase());
            in_separator = false;
        }
    }
    out
}

/// Archive formats the proxy knows how to serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveSuffix {
    TarGz,
    Wheel,
    Zip,
}

impl ArchiveSuffix {
    pub const ALL: [ArchiveSuffix; 3] = [Self::TarGz, Self::Wheel, Self::Zip];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TarGz => ".tar.gz",
            Self::Wheel => ".whl",
            Self::Zip => ".zip",
        }
    }

    /// Detect the suffix of a file name, case-insensitively
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let lower = file_name.to_ascii_lowercase();
        // Longest suffix first
        Self::ALL
            .iter()
            .copied()
            .filter(|s| lower.ends_with(s.as_str()))
            .max_by_key(|s| s.as_str().len())
    }
}

impl fmt::Display for ArchiveSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `{name}-{version}{suffix}` file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistFileName {
    /// Normalized distribution name
    pub name: String,
    pub version: String,
    pub suffix: ArchiveSuffix,
}

impl fmt::Display for DistFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}{}", self.name, self.version, self.suffix)
    }
}

/// Parse an archive file name into normalized name, version and suffix
pub fn parse_file_name(file_name: &str) -> Result<DistFileName> {
    let suffix = ArchiveSuffix::from_file_name(file_name)
        .ok_or_else(|| Error::Parse(format!("unexpected file name {file_name}")))?;
    let stem = &file_name[..file_name.len() - suffix.as_str().len()];
    let segments: Vec<&str> = stem.split('-').collect();

    let (name_segments, version) = match suffix {
        ArchiveSuffix::Wheel => {
            // name-version[-build]-python-abi-platform
            if segments.len() < 5 {
                return Err(Error::Parse(format!("unexpected wheel file name {file_name}")));
            }
            let head = &segments[..segments.len() - 3];
            let split = version_start(head);
            (&head[..split], head[split].to_string())
        }
        ArchiveSuffix::TarGz | ArchiveSuffix::Zip => {
            if segments.len() < 2 {
                return Err(Error::Parse(format!(
                    "no version separator in file name {file_name}"
                )));
            }
            let split = version_start(&segments);
            (&segments[..split], segments[split..].join("-"))
        }
    };

    let name = name_segments.join("-");
    if name.is_empty() || version.is_empty() {
        return Err(Error::Parse(format!("can't split name and version in {file_name}")));
    }

    Ok(DistFileName {
        name: normalize(&name),
        version,
        suffix,
    })
}

/// Index of the segment where the version begins (always >= 1)
fn version_start(segments: &[&str]) -> usize {
    segments
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, s)| s.starts_with(|c: char| c.is_ascii_digit()))
        .map(|(i, _)| i)
        .unwrap_or(segments.len() - 1)
}

/// Name of the `.dist-info` directory for a distribution version
pub fn dist_info_dir_name(name: &str, version: &str) -> String {
    format!("{}-{}.dist-info", safe_component(name), safe_component(version))
}

/// Split a `{name}-{version}.dist-info` directory name
pub fn parse_dist_info_dir_name(dir_name: &str) -> Option<(String, String)> {
    let stem = dir_name.strip_suffix(".dist-info")?;
    let (name, version) = stem.split_once('-')?;
    if name.is_empty() || version.is_empty() {
        return None;
    }
    Some((name.to_string(), version.to_string()))
}

/// Escape a name or version for use in wheel and dist-info file names
pub fn safe_component(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
        .collect()
}
