// src/index/json.rs

//! JSON release-metadata (`/{name}/json`) downloader

use super::{FileUrlMap, fetch_text, join_index_url};
use crate::error::{Error, Result};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct ProjectJson {
    #[serde(default)]
    releases: BTreeMap<String, Vec<ReleaseFile>>,
}

#[derive(Debug, Deserialize)]
struct ReleaseFile {
    url: String,
    filename: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JsonIndexDownloader {
    client: Client,
    index_url: String,
}

impl JsonIndexDownloader {
    pub fn new(client: Client, index_url: &str) -> Self {
        Self {
            client,
            index_url: index_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn index_url(&self) -> &str {
        &self.index_url
    }

    pub async fn get_file_urls(&self, dist_name: &str) -> Result<Option<FileUrlMap>> {
        let url = join_index_url(&self.index_url, &format!("{dist_name}/json"));
        info!("Downloading file urls from json index at {}", url);

        let Some((_, body)) = fetch_text(&self.client, &url).await? else {
            debug!("{} not found on {}", dist_name, self.index_url);
            return Ok(None);
        };
        let project: ProjectJson = serde_json::from_str(&body)
            .map_err(|e| Error::Fetch(format!("{url}: malformed release metadata: {e}")))?;
        Ok(Some(collect_file_urls(dist_name, project)))
    }
}

fn collect_file_urls(dist_name: &str, project: ProjectJson) -> FileUrlMap {
    let mut urls = FileUrlMap::new();
    for file in project.releases.into_values().flatten() {
        let file_name = match file.filename {
            Some(name) => name,
            None => file_name_from_url(dist_name, &file.url),
        };
        urls.insert(file_name, file.url);
    }
    urls
}

/// Derive a file name from a download URL
///
/// micropython.org omits `filename` and its file names may lack the
/// `micropython-` prefix; those get the requested name put in front of the
/// part after the first dash.
fn file_name_from_url(dist_name: &str, url: &str) -> String {
    let last = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .next()
        .unwrap_or(url);
    if last.starts_with(dist_name) {
        return last.to_string();
    }
    match last.split_once('-') {
        Some((_, rest)) => format!("{dist_name}-{rest}"),
        None => last.to_string(),
    }
}
