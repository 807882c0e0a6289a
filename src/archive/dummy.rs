// src/archive/dummy.rs

//! Placeholder archives for distributions the device never needs
//!
//! Some requirements (host-side hardware shims, native extensions) only
//! have to be formally satisfied. The proxy answers them with an archive
//! that carries metadata and nothing else.

use super::metadata::CoreMetadata;
use super::zip::ZipWriter;
use crate::error::{Error, Result};
use crate::naming::{self, ArchiveSuffix};
use crate::pyliteral::py_str;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use tar::{EntryType, Header};
use tracing::info;

pub const DUMMY_SUMMARY: &str = "Dummy package for satisfying formal requirements";

const DUMMY_MTIME: u64 = 1704067200; // 2024-01-01

/// Build a placeholder archive matching the suffix of `file_name`
pub fn create_dummy_dist(dist_name: &str, file_name: &str) -> Result<Vec<u8>> {
    info!("Creating dummy content for {}", file_name);
    let parsed = naming::parse_file_name(file_name)?;
    if parsed.name != naming::normalize(dist_name) {
        return Err(Error::Parse(format!(
            "{file_name} does not belong to distribution {dist_name}"
        )));
    }

    let mut metadata = CoreMetadata::new(dist_name, &parsed.version);
    metadata.summary = Some(DUMMY_SUMMARY.to_string());

    match parsed.suffix {
        ArchiveSuffix::Wheel => dummy_wheel(dist_name, &parsed.version, &metadata),
        ArchiveSuffix::Zip | ArchiveSuffix::TarGz => {
            let wrapper = format!("{}-{}", dist_name, parsed.version);
            let files = [
                (format!("{wrapper}/PKG-INFO"), metadata.render()),
                (format!("{wrapper}/setup.py"), dummy_setup_py(dist_name, &parsed.version)),
            ];
            if parsed.suffix == ArchiveSuffix::Zip {
                let mut zip = ZipWriter::new();
                for (path, content) in &files {
                    zip.add_file(path, content.as_bytes())?;
                }
                Ok(zip.finish()?)
            } else {
                tar_gz(&files)
            }
        }
    }
}

fn dummy_setup_py(dist_name: &str, version: &str) -> String {
    format!(
        "from setuptools import setup\nsetup(\n    name={},\n    version={},\n    description={},\n)\n",
        py_str(dist_name),
        py_str(version),
        py_str(DUMMY_SUMMARY),
    )
}

fn dummy_wheel(dist_name: &str, version: &str, metadata: &CoreMetadata) -> Result<Vec<u8>> {
    let dist_info = naming::dist_info_dir_name(dist_name, version);
    let files = [
        (format!("{dist_info}/METADATA"), metadata.render()),
        (
            format!("{dist_info}/WHEEL"),
            "Wheel-Version: 1.0\nGenerator: pipkin\nRoot-Is-Purelib: true\nTag: py3-none-any\n"
                .to_string(),
        ),
    ];

    let mut record = String::new();
    let mut zip = ZipWriter::new();
    for (path, content) in &files {
        zip.add_file(path, content.as_bytes())?;
        record.push_str(&format!(
            "{},sha256={},{}\n",
            path,
            URL_SAFE_NO_PAD.encode(Sha256::digest(content.as_bytes())),
            content.len()
        ));
    }
    let record_path = format!("{dist_info}/RECORD");
    record.push_str(&format!("{record_path},,\n"));
    zip.add_file(&record_path, record.as_bytes())?;

    Ok(zip.finish()?)
}

fn tar_gz(files: &[(String, String)]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    {
        let encoder = GzEncoder::new(&mut output, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, content) in files {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Regular);
            header.set_mode(0o644);
            header.set_size(content.len() as u64);
            header.set_mtime(DUMMY_MTIME);
            header.set_cksum();
            builder.append_data(&mut header, path, content.as_bytes())?;
        }
        let encoder = builder.into_inner()?;
        encoder.finish()?;
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::testing::read_tar_gz;
    use crate::archive::zip::read_stored_entries;

    #[test]
    fn test_dummy_wheel() {
        let bytes = create_dummy_dist("numpy", "numpy-1.24.0-py3-none-any.whl").unwrap();
        let entries = read_stored_entries(&bytes).unwrap();
        let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            [
                "numpy-1.24.0.dist-info/METADATA",
                "numpy-1.24.0.dist-info/WHEEL",
                "numpy-1.24.0.dist-info/RECORD"
            ]
        );

        let metadata = CoreMetadata::from_bytes(&entries[0].1);
        assert_eq!(metadata.name.as_deref(), Some("numpy"));
        assert_eq!(metadata.version.as_deref(), Some("1.24.0"));
        assert_eq!(metadata.summary.as_deref(), Some(DUMMY_SUMMARY));

        let record = String::from_utf8(entries[2].1.clone()).unwrap();
        let digest = URL_SAFE_NO_PAD.encode(Sha256::digest(&entries[0].1));
        assert!(record.contains(&format!("numpy-1.24.0.dist-info/METADATA,sha256={digest},")));
        assert!(record.ends_with("numpy-1.24.0.dist-info/RECORD,,\n"));
    }

    #[test]
    fn test_dummy_wheel_escapes_name() {
        let bytes =
            create_dummy_dist("adafruit-blinka", "adafruit_blinka-8.0.0-py3-none-any.whl").unwrap();
        let entries = read_stored_entries(&bytes).unwrap();
        assert_eq!(entries[0].0, "adafruit_blinka-8.0.0.dist-info/METADATA");
    }

    #[test]
    fn test_dummy_tar_gz() {
        let bytes = create_dummy_dist("pyserial", "pyserial-3.5.tar.gz").unwrap();
        let entries = read_tar_gz(&bytes);
        assert_eq!(entries.len(), 2);
        let setup_py = String::from_utf8(entries["pyserial-3.5/setup.py"].clone()).unwrap();
        assert!(setup_py.contains("name=\"pyserial\""));
        assert!(setup_py.contains("version=\"3.5\""));
        let pkg_info = CoreMetadata::from_bytes(&entries["pyserial-3.5/PKG-INFO"]);
        assert_eq!(pkg_info.version.as_deref(), Some("3.5"));
    }

    #[test]
    fn test_dummy_zip() {
        let bytes = create_dummy_dist("scipy", "scipy-1.10.0.zip").unwrap();
        let entries = read_stored_entries(&bytes).unwrap();
        assert_eq!(entries[0].0, "scipy-1.10.0/PKG-INFO");
        assert_eq!(entries[1].0, "scipy-1.10.0/setup.py");
    }

    #[test]
    fn test_mismatched_file_name_is_rejected() {
        assert!(create_dummy_dist("numpy", "scipy-1.0.tar.gz").is_err());
        assert!(create_dummy_dist("numpy", "numpy-1.0.exe").is_err());
    }
}
