// src/archive/mod.rs

//! Distribution archive handling
//!
//! - `tweak`: repairs upip-style sdists that lack `setup.py`
//! - `dummy`: placeholder wheels and sdists for irrelevant distributions
//! - `metadata`: `PKG-INFO` / `METADATA` header blocks
//! - `zip`: stored-zip writer used for wheels and zip sdists

pub mod dummy;
pub mod metadata;
pub mod tweak;
pub mod zip;

pub use dummy::create_dummy_dist;
pub use metadata::CoreMetadata;
pub use tweak::tweak_archive;

#[cfg(test)]
pub(crate) mod testing {
    use flate2::Compression;
    use flate2::read::GzDecoder;
    use flate2::write::GzEncoder;
    use std::collections::BTreeMap;
    use std::io::Read;

    /// Build a tar.gz from `(path, content)`; `None` content makes a directory
    pub fn build_tar_gz(entries: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, content) in entries {
            let mut header = tar::Header::new_gnu();
            match content {
                Some(data) => {
                    header.set_entry_type(tar::EntryType::Regular);
                    header.set_mode(0o644);
                    header.set_size(data.len() as u64);
                }
                None => {
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_mode(0o755);
                    header.set_size(0);
                }
            }
            header.set_mtime(1704067200);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.unwrap_or_default())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    /// Regular files of a tar.gz keyed by path
    pub fn read_tar_gz(data: &[u8]) -> BTreeMap<String, Vec<u8>> {
        let mut archive = tar::Archive::new(GzDecoder::new(data));
        let mut files = BTreeMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            if entry.header().entry_type() != tar::EntryType::Regular {
                continue;
            }
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            files.insert(path, content);
        }
        files
    }
}
