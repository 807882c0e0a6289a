// src/index/simple.rs

//! Simple repository API (PEP 503) downloader

use super::{FileUrlMap, fetch_text, join_index_url};
use crate::error::Result;
use regex::Regex;
use reqwest::Client;
use url::Url;
use std::sync::LazyLock;
use tracing::{debug, info};

static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a\s*>"#).unwrap()
});

#[derive(Debug, Clone)]
pub struct SimpleIndexDownloader {
    client: Client,
    index_url: String,
}

impl SimpleIndexDownloader {
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
        let url = join_index_url(&self.index_url, dist_name);
        info!("Downloading file urls from simple index {}", url);

        let Some((page_url, body)) = fetch_text(&self.client, &url).await? else {
            debug!("{} not found on {}", dist_name, self.index_url);
            return Ok(None);
        };
        Ok(Some(parse_anchors(&page_url, &body)))
    }
}

/// Map anchor text to absolute href for every anchor in `html`
pub(crate) fn parse_anchors(page_url: &Url, html: &str) -> FileUrlMap {
    // Relative hrefs resolve against the directory form of the page URL
    let base = if page_url.path().ends_with('/') {
        page_url.clone()
    } else {
        let mut with_slash = page_url.clone();
        with_slash.set_path(&format!("{}/", page_url.path()));
        with_slash
    };

    let mut urls = FileUrlMap::new();
    for caps in ANCHOR_RE.captures_iter(html) {
        let href = unescape_html(caps[1].trim());
        let text = unescape_html(strip_tags(&caps[2]).trim());
        if text.is_empty() {
            continue;
        }
        let resolved = match base.join(&href) {
            Ok(url) => url.to_string(),
            Err(e) => {
                debug!("Skipping anchor {:?} with bad href {:?}: {}", text, href, e);
                continue;
            }
        };
        urls.insert(text, resolved);
    }
    urls
}

fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn unescape_html(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}
