// src/archive/tweak.rs

//! Rebuilding setup metadata for upip-style source archives
//!
//! micropython-lib used to publish sdists with `setup.py` stripped out so
//! that upip could unpack them without setuptools. Such an archive still
//! carries its egg-info block, which is enough to synthesize the build
//! script a standard installer needs. The transform is pure: bytes in,
//! bytes out, and anything unexpected returns the input untouched.

use super::metadata::CoreMetadata;
use crate::error::{Error, Result};
use crate::naming::ArchiveSuffix;
use crate::pyliteral::{py_list, py_str};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::Read;
use tar::{EntryType, Header};
use tracing::{debug, warn};

/// mtime used for synthesized entries when the source gives none
const DEFAULT_MTIME: u64 = 1704067200; // 2024-01-01

const SETUP_CFG: &[u8] = b"[egg_info]\ntag_build = \ntag_date = 0\n";

/// Globs for `package_data`, so every unclassified file still gets installed
const PACKAGE_DATA_GLOBS: [&str; 8] = [
    "*",
    "*/*",
    "*/*/*",
    "*/*/*/*",
    "*/*/*/*/*",
    "*/*/*/*/*/*",
    "*/*/*/*/*/*/*",
    "*/*/*/*/*/*/*/*",
];

/// Return `data` with a synthesized `setup.py` if it is an upip-style sdist
///
/// Non-tar.gz files, archives that already have a `setup.py`, and archives
/// that cannot be repaired are returned unchanged.
pub fn tweak_archive(dist_name: &str, file_name: &str, data: Vec<u8>) -> Vec<u8> {
    if ArchiveSuffix::from_file_name(file_name) != Some(ArchiveSuffix::TarGz) {
        return data;
    }

    match rebuild_setup(&data) {
        Ok(Some(tweaked)) => {
            debug!("Reconstructed setup files for {} ({})", file_name, dist_name);
            tweaked
        }
        Ok(None) => {
            debug!("{} contains setup.py, no tweaks needed", file_name);
            data
        }
        Err(e) => {
            warn!("Serving {} unmodified: {}", file_name, e);
            data
        }
    }
}

struct TarItem {
    path: String,
    header: Header,
    data: Vec<u8>,
}

/// Facts gathered from one pass over an sdist
#[derive(Debug, Default)]
struct SdistLayout {
    wrapper_dir: Option<String>,
    egg_info_dir: Option<String>,
    metadata: Option<(Vec<u8>, u64)>,
    requirements: Vec<String>,
    py_modules: Vec<String>,
    packages: Vec<String>,
    has_setup_py: bool,
}

impl SdistLayout {
    fn scan(items: &[TarItem]) -> Self {
        let mut layout = Self::default();

        for item in items {
            let trimmed = item.path.trim_start_matches("./").trim_end_matches('/');
            let (wrapper, rel_name) = match trimmed.split_once('/') {
                Some((wrapper, rest)) => (wrapper, rest.trim_matches('/')),
                None => (trimmed, ""),
            };
            if layout.wrapper_dir.is_none() && !wrapper.is_empty() {
                layout.wrapper_dir = Some(wrapper.to_string());
            }
            if rel_name.is_empty() {
                continue;
            }

            let segments: Vec<&str> = rel_name.split('/').collect();
            let is_dir = item.header.entry_type() == EntryType::Directory;

            if rel_name == "setup.py" {
                layout.has_setup_py = true;
            } else if rel_name.contains(".egg-info") {
                if let Some(dir) = rel_name.strip_suffix("/PKG-INFO") {
                    if dir.ends_with(".egg-info") {
                        let mtime = item.header.mtime().unwrap_or(DEFAULT_MTIME);
                        layout.egg_info_dir = Some(dir.to_string());
                        layout.metadata = Some((item.data.clone(), mtime));
                    }
                } else if rel_name.ends_with(".egg-info/requires.txt") {
                    layout.requirements = String::from_utf8_lossy(&item.data)
                        .lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(String::from)
                        .collect();
                }
            } else if segments.len() == 1 {
                if !is_dir {
                    if let Some(module) = rel_name.strip_suffix(".py") {
                        layout.py_modules.push(module.to_string());
                    }
                } else if !layout.packages.iter().any(|p| p == rel_name) {
                    layout.packages.push(rel_name.to_string());
                }
            } else if !layout.packages.iter().any(|p| p == segments[0]) {
                // Directories don't always have their own entry
                layout.packages.push(segments[0].to_string());
            }
        }

        layout
    }
}

fn read_items(data: &[u8]) -> Result<Vec<TarItem>> {
    let mut archive = tar::Archive::new(GzDecoder::new(data));
    let mut items = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        if matches!(
            entry.header().entry_type(),
            EntryType::XGlobalHeader | EntryType::XHeader
        ) {
            continue;
        }
        let path = entry.path()?.to_string_lossy().into_owned();
        let header = entry.header().clone();
        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;
        items.push(TarItem {
            path,
            header,
            data: content,
        });
    }
    Ok(items)
}

/// `Ok(None)` when the archive already has a build script
fn rebuild_setup(data: &[u8]) -> Result<Option<Vec<u8>>> {
    let items = read_items(data)?;
    let layout = SdistLayout::scan(&items);
    if layout.has_setup_py {
        return Ok(None);
    }

    let wrapper = layout
        .wrapper_dir
        .as_deref()
        .ok_or_else(|| Error::Parse("archive has no wrapper directory".to_string()))?;
    let (metadata_bytes, mtime) = layout
        .metadata
        .as_ref()
        .ok_or_else(|| Error::Parse("no setup.py and no egg-info metadata".to_string()))?;
    let egg_info = layout.egg_info_dir.as_deref().unwrap_or_default();

    debug!("py_modules: {:?}", layout.py_modules);
    debug!("packages: {:?}", layout.packages);
    debug!("requirements: {:?}", layout.requirements);

    let metadata = CoreMetadata::from_bytes(metadata_bytes);
    let setup_py = render_setup_py(
        &metadata,
        &layout.py_modules,
        &layout.packages,
        &layout.requirements,
    );

    let mut top_level: Vec<String> = layout.packages.clone();
    top_level.extend(layout.py_modules.iter().cloned());
    let top_level_txt = format!("{}\n", top_level.join("\n"));

    let mut output = Vec::new();
    {
        let encoder = GzEncoder::new(&mut output, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        for item in &items {
            let mut header = item.header.clone();
            builder.append_data(&mut header, &item.path, item.data.as_slice())?;
        }

        let added: [(String, &[u8]); 5] = [
            (format!("{wrapper}/setup.py"), setup_py.as_bytes()),
            (format!("{wrapper}/PKG-INFO"), metadata_bytes.as_slice()),
            (format!("{wrapper}/setup.cfg"), SETUP_CFG),
            (format!("{wrapper}/{egg_info}/dependency_links.txt"), b"\n".as_slice()),
            (format!("{wrapper}/{egg_info}/top_level.txt"), top_level_txt.as_bytes()),
        ];
        for (path, content) in added {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Regular);
            header.set_mode(0o644);
            header.set_size(content.len() as u64);
            header.set_mtime(*mtime);
            header.set_cksum();
            builder.append_data(&mut header, &path, content)?;
        }

        let encoder = builder.into_inner()?;
        encoder.finish()?;
    }

    Ok(Some(output))
}

/// Render a setuptools build script for the collected layout
fn render_setup_py(
    metadata: &CoreMetadata,
    py_modules: &[String],
    packages: &[String],
    requirements: &[String],
) -> String {
    let mut src = String::from("from setuptools import setup\nsetup (\n");

    let keywords = [
        ("name", &metadata.name),
        ("version", &metadata.version),
        ("description", &metadata.summary),
        ("url", &metadata.home_page),
        ("author", &metadata.author),
        ("author_email", &metadata.author_email),
        ("license", &metadata.license),
    ];
    for (keyword, value) in keywords {
        if let Some(value) = value {
            src.push_str(&format!("    {keyword}={},\n", py_str(value)));
        }
    }

    if !requirements.is_empty() {
        src.push_str(&format!("    install_requires={},\n", py_list(requirements)));
    }
    if !py_modules.is_empty() {
        src.push_str(&format!("    py_modules={},\n", py_list(py_modules)));
    }
    if !packages.is_empty() {
        src.push_str(&format!("    packages={},\n", py_list(packages)));
    }

    src.push_str(&format!(
        "    package_data={{\"*\": {}}}\n",
        py_list(&PACKAGE_DATA_GLOBS)
    ));
    src.push_str(")\n");
    src
}
