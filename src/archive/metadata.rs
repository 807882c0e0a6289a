// src/archive/metadata.rs

//! Core metadata (`PKG-INFO` / `METADATA`) parsing and rendering
//!
//! Only the header block is read; the description body after the first
//! blank line is ignored. Continuation lines are folded into the previous
//! value.

/// The handful of core metadata fields pipkin cares about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreMetadata {
    pub metadata_version: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub summary: Option<String>,
    pub home_page: Option<String>,
    pub author: Option<String>,
    pub author_email: Option<String>,
    pub license: Option<String>,
    pub requires_dist: Vec<String>,
}

impl CoreMetadata {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            metadata_version: Some("2.1".to_string()),
            name: Some(name.to_string()),
            version: Some(version.to_string()),
            ..Default::default()
        }
    }

    pub fn parse(text: &str) -> Self {
        let mut fields: Vec<(String, String)> = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                break;
            }
            if line.starts_with([' ', '\t']) {
                if let Some((_, value)) = fields.last_mut() {
                    value.push('\n');
                    value.push_str(line.trim());
                }
                continue;
            }
            if let Some((key, value)) = line.split_once(':') {
                fields.push((key.trim().to_ascii_lowercase(), value.trim().to_string()));
            }
        }

        let first = |key: &str| {
            fields
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        Self {
            metadata_version: first("metadata-version"),
            name: first("name"),
            version: first("version"),
            summary: first("summary"),
            home_page: first("home-page"),
            author: first("author"),
            author_email: first("author-email"),
            license: first("license"),
            requires_dist: fields
                .iter()
                .filter(|(k, _)| k == "requires-dist")
                .map(|(_, v)| v.clone())
                .collect(),
        }
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        Self::parse(&String::from_utf8_lossy(data))
    }

    /// Fields in canonical order, as `(header, value)` pairs
    pub fn fields(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::new();
        let single = [
            ("Metadata-Version", &self.metadata_version),
            ("Name", &self.name),
            ("Version", &self.version),
            ("Summary", &self.summary),
            ("Home-page", &self.home_page),
            ("Author", &self.author),
            ("Author-email", &self.author_email),
            ("License", &self.license),
        ];
        for (key, value) in single {
            if let Some(value) = value {
                out.push((key, value.as_str()));
            }
        }
        for req in &self.requires_dist {
            out.push(("Requires-Dist", req.as_str()));
        }
        out
    }

    pub fn render(&self) -> String {
        let mut text = String::new();
        for (key, value) in self.fields() {
            text.push_str(key);
            text.push_str(": ");
            text.push_str(&value.replace('\n', "\n        "));
            text.push('\n');
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PKG_INFO: &str = "Metadata-Version: 1.0\n\
Name: micropython-logging\n\
Version: 0.5.2\n\
Summary: logging module for MicroPython\n\
Home-page: https://github.com/micropython/micropython-lib\n\
Author: micropython-lib Developers\n\
Author-email: micro-python@googlegroups.com\n\
License: MIT\n\
Description: This is a module reimplemented specifically for MicroPython\n\
        standard library, with efficient and lean design in mind.\n\
Platform: UNKNOWN\n";

    #[test]
    fn test_parse_pkg_info() {
        let meta = CoreMetadata::parse(PKG_INFO);
        assert_eq!(meta.name.as_deref(), Some("micropython-logging"));
        assert_eq!(meta.version.as_deref(), Some("0.5.2"));
        assert_eq!(meta.summary.as_deref(), Some("logging module for MicroPython"));
        assert_eq!(meta.license.as_deref(), Some("MIT"));
        assert_eq!(meta.author_email.as_deref(), Some("micro-python@googlegroups.com"));
        assert!(meta.requires_dist.is_empty());
    }

    #[test]
    fn test_body_is_ignored() {
        let meta = CoreMetadata::parse("Name: demo\nVersion: 1.0\n\nLicense: not a header\n");
        assert_eq!(meta.name.as_deref(), Some("demo"));
        assert_eq!(meta.license, None);
    }

    #[test]
    fn test_render_then_parse() {
        let mut meta = CoreMetadata::new("demo", "1.0");
        meta.summary = Some("A demo".to_string());
        meta.requires_dist = vec!["foo>=1".to_string(), "bar".to_string()];
        assert_eq!(CoreMetadata::parse(&meta.render()), meta);
    }
}
