// src/index/mod.rs

//! Upstream package index downloaders
//!
//! A downloader answers one question: which files does a distribution have
//! on this index, and where can they be fetched. `Ok(None)` means the index
//! doesn't know the distribution; it is a normal result, not an error.

mod json;
mod simple;

pub use json::JsonIndexDownloader;
pub use simple::SimpleIndexDownloader;

use crate::error::{Error, Result};
use crate::naming;
use reqwest::{Client, StatusCode};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// File name to download URL, for one distribution on one index
pub type FileUrlMap = BTreeMap<String, String>;

/// micropython.org's legacy JSON index
pub const MP_ORG_INDEX: &str = "https://micropython.org/pi";

/// Default PyPI simple index
pub const PYPI_SIMPLE_INDEX: &str = "https://pypi.org/simple";

/// Normalized prefix of distributions worth asking micropython.org about
pub const MICROPYTHON_PREFIX: &str = "micropython-";

/// Default timeout for upstream requests
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the proxy looks for distributions, in priority order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSettings {
    pub index_url: String,
    pub extra_index_urls: Vec<String>,
    pub no_mp_org: bool,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            index_url: PYPI_SIMPLE_INDEX.to_string(),
            extra_index_urls: Vec::new(),
            no_mp_org: false,
        }
    }
}

/// One upstream index
#[derive(Debug, Clone)]
pub enum IndexDownloader {
    /// HTML anchor list per distribution
    Simple(SimpleIndexDownloader),
    /// `/{name}/json` release metadata
    Json(JsonIndexDownloader),
    /// JSON index consulted only for names with a given normalized prefix
    Namespaced {
        prefix: String,
        inner: JsonIndexDownloader,
    },
}

impl IndexDownloader {
    pub fn simple(client: Client, index_url: &str) -> Self {
        Self::Simple(SimpleIndexDownloader::new(client, index_url))
    }

    pub fn json(client: Client, index_url: &str) -> Self {
        Self::Json(JsonIndexDownloader::new(client, index_url))
    }

    pub fn namespaced(client: Client, index_url: &str, prefix: &str) -> Self {
        Self::Namespaced {
            prefix: prefix.to_string(),
            inner: JsonIndexDownloader::new(client, index_url),
        }
    }

    pub fn index_url(&self) -> &str {
        match self {
            Self::Simple(d) => d.index_url(),
            Self::Json(d) => d.index_url(),
            Self::Namespaced { inner, .. } => inner.index_url(),
        }
    }

    /// Files of `dist_name` on this index, or `None` if the index lacks it
    pub async fn get_file_urls(&self, dist_name: &str) -> Result<Option<FileUrlMap>> {
        match self {
            Self::Simple(d) => d.get_file_urls(dist_name).await,
            Self::Json(d) => d.get_file_urls(dist_name).await,
            Self::Namespaced { prefix, inner } => {
                if !naming::normalize(dist_name).starts_with(prefix.as_str()) {
                    debug!("{} is outside {}, skipping {}", dist_name, prefix, inner.index_url());
                    return Ok(None);
                }
                inner.get_file_urls(dist_name).await
            }
        }
    }
}

/// Build the async HTTP client shared by all downloaders
pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("pipkin/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::Fetch(format!("failed to create HTTP client: {e}")))
}

/// Downloaders for `settings`: micropython.org first (unless disabled),
/// then the main index, then extra indexes in the given order
pub fn default_downloaders(client: &Client, settings: &IndexSettings) -> Vec<IndexDownloader> {
    let mut downloaders = Vec::new();
    if !settings.no_mp_org {
        downloaders.push(IndexDownloader::namespaced(
            client.clone(),
            MP_ORG_INDEX,
            MICROPYTHON_PREFIX,
        ));
    }
    downloaders.push(IndexDownloader::simple(client.clone(), &settings.index_url));
    for url in &settings.extra_index_urls {
        downloaders.push(IndexDownloader::simple(client.clone(), url));
    }
    downloaders
}

/// GET `url`; `Ok(None)` on 404, `Error::Fetch` on any other failure
///
/// Returns the final URL after redirects along with the body.
pub(crate) async fn fetch_text(client: &Client, url: &str) -> Result<Option<(url::Url, String)>> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Fetch(format!("{url}: {e}")))?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        return Err(Error::Fetch(format!("{url} returned {status}")));
    }

    let final_url = response.url().clone();
    let body = response
        .text()
        .await
        .map_err(|e| Error::Fetch(format!("{url}: {e}")))?;
    Ok(Some((final_url, body)))
}

/// GET `url` as bytes, treating every non-success status as a failure
pub async fn fetch_bytes(client: &Client, url: &str) -> Result<Vec<u8>> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Fetch(format!("{url}: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Fetch(format!("{url} returned {status}")));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::Fetch(format!("{url}: {e}")))?;
    Ok(bytes.to_vec())
}

fn join_index_url(index_url: &str, tail: &str) -> String {
    format!("{}/{}", index_url.trim_end_matches('/'), tail)
}
