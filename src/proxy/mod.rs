// src/proxy/mod.rs

//! Local package index proxy
//!
//! pip is pointed at this server instead of a public index. For every
//! distribution the proxy asks its downloaders in priority order, serves a
//! listing from the first one that knows the distribution, and serves files
//! after repairing upip-style archives. Distributions that only need to be
//! formally satisfied get dummy archives and are never fetched.
//!
//! The server runs on its own tokio runtime so the synchronous session can
//! block on the installer subprocess while requests are being answered.

pub mod cache;
mod handlers;
mod routes;

pub use routes::create_router;

use crate::archive;
use crate::error::{Error, Result};
use crate::index::{self, FileUrlMap, IndexDownloader, IndexSettings};
use crate::naming;
use cache::MemoCache;
use reqwest::Client;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Port tried first, so pip's HTTP cache stays valid across sessions
pub const PREFERRED_PORT: u16 = 36628;

/// Offset for sessions without micropython.org, which see a different index
pub const NO_MP_ORG_PORT_OFFSET: u16 = 7;

/// Distributions whose functionality the device already provides or
/// can never use, compared in normalized form
pub const IRRELEVANT_DISTRIBUTIONS: [&str; 10] = [
    "adafruit-blinka",
    "adafruit-blinka-bleio",
    "adafruit-blinka-displayio",
    "adafruit-blinka-pyportal",
    "adafruit-python-extended-bus",
    "numpy",
    "pillow",
    "pyasn1",
    "pyserial",
    "scipy",
];

/// Any normalized name with this prefix is irrelevant as well
pub const IRRELEVANT_PREFIX: &str = "adafruit-blinka-";

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

pub fn preferred_port(no_mp_org: bool) -> u16 {
    if no_mp_org {
        PREFERRED_PORT + NO_MP_ORG_PORT_OFFSET
    } else {
        PREFERRED_PORT
    }
}

/// Shared state behind the proxy's handlers
pub struct ProxyState {
    client: Client,
    downloaders: Vec<IndexDownloader>,
    /// (downloader index, normalized name) -> listing
    file_urls: MemoCache<(usize, String), Option<FileUrlMap>>,
    /// normalized name -> index of the downloader that knows it
    winners: MemoCache<String, Option<usize>>,
    irrelevant: HashSet<String>,
}

impl ProxyState {
    pub fn new(client: Client, downloaders: Vec<IndexDownloader>) -> Self {
        Self {
            client,
            downloaders,
            file_urls: MemoCache::new(),
            winners: MemoCache::new(),
            irrelevant: IRRELEVANT_DISTRIBUTIONS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// State with the default downloader chain for `settings`
    pub fn from_settings(settings: &IndexSettings, timeout: Duration) -> Result<Self> {
        let client = index::http_client(timeout)?;
        let downloaders = index::default_downloaders(&client, settings);
        Ok(Self::new(client, downloaders))
    }

    /// Add names to the denylist
    pub fn with_irrelevant<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.irrelevant
            .extend(names.into_iter().map(|n| naming::normalize(n.as_ref())));
        self
    }

    pub fn downloaders(&self) -> &[IndexDownloader] {
        &self.downloaders
    }

    pub fn is_irrelevant(&self, dist_name: &str) -> bool {
        let normalized = naming::normalize(dist_name);
        self.irrelevant.contains(&normalized) || normalized.starts_with(IRRELEVANT_PREFIX)
    }

    /// Listing of one downloader, fetched at most once per distribution
    async fn downloader_file_urls(&self, idx: usize, dist_name: &str) -> Result<Option<FileUrlMap>> {
        let key = (idx, naming::normalize(dist_name));
        let downloader = &self.downloaders[idx];
        self.file_urls
            .get_or_try_fetch(key, || downloader.get_file_urls(dist_name))
            .await
    }

    /// Files of `dist_name` from the first downloader that has it
    pub async fn file_urls(&self, dist_name: &str) -> Result<Option<FileUrlMap>> {
        let winner = self
            .winners
            .get_or_try_fetch(naming::normalize(dist_name), || async {
                for idx in 0..self.downloaders.len() {
                    if self.downloader_file_urls(idx, dist_name).await?.is_some() {
                        debug!(
                            "{} resolved by {}",
                            dist_name,
                            self.downloaders[idx].index_url()
                        );
                        return Ok(Some(idx));
                    }
                }
                Ok(None)
            })
            .await?;

        match winner {
            Some(idx) => self.downloader_file_urls(idx, dist_name).await,
            None => Ok(None),
        }
    }

    /// Bytes to serve for `file_name`; `None` if the distribution doesn't have it
    pub async fn file_content(&self, dist_name: &str, file_name: &str) -> Result<Option<Vec<u8>>> {
        if self.is_irrelevant(dist_name) {
            return archive::create_dummy_dist(dist_name, file_name).map(Some);
        }

        let Some(urls) = self.file_urls(dist_name).await? else {
            return Ok(None);
        };
        let Some(url) = urls.get(file_name) else {
            return Ok(None);
        };

        info!("Downloading {}", url);
        let original = index::fetch_bytes(&self.client, url).await?;

        let dist = dist_name.to_string();
        let file = file_name.to_string();
        let tweaked =
            tokio::task::spawn_blocking(move || archive::tweak_archive(&dist, &file, original))
                .await
                .map_err(|e| Error::Fetch(format!("archive processing failed: {e}")))?;
        Ok(Some(tweaked))
    }

    /// Number of upstream listing fetches performed so far
    pub fn listing_fetch_count(&self) -> u64 {
        self.file_urls.fetch_count()
    }
}

/// A running proxy; shuts down when dropped
pub struct ProxyHandle {
    addr: SocketAddr,
    runtime: Option<Runtime>,
    shutdown: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<std::io::Result<()>>>,
}

impl ProxyHandle {
    /// Bind to `preferred_port` on localhost (falling back to any free port)
    /// and start serving `state` in the background
    pub fn start(state: ProxyState, preferred_port: u16) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("pipkin-proxy")
            .enable_all()
            .build()?;

        let listener = runtime.block_on(bind_listener(preferred_port))?;
        let addr = listener.local_addr()?;
        let router = create_router(Arc::new(state));
        let (tx, rx) = oneshot::channel::<()>();

        let server = runtime.spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
        });

        info!("Index proxy listening on {}", addr);
        Ok(Self {
            addr,
            runtime: Some(runtime),
            shutdown: Some(tx),
            server: Some(server),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Base URL to hand to the installer as its index
    pub fn index_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.addr.port())
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(runtime) = self.runtime.take() {
            if let Some(server) = self.server.take() {
                match runtime.block_on(async {
                    tokio::time::timeout(SHUTDOWN_TIMEOUT, server).await
                }) {
                    Ok(Ok(Ok(()))) => debug!("Index proxy stopped"),
                    Ok(Ok(Err(e))) => warn!("Index proxy failed: {}", e),
                    Ok(Err(e)) => warn!("Index proxy task failed: {}", e),
                    Err(_) => warn!("Index proxy did not stop in time"),
                }
            }
            runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
        }
    }
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn bind_listener(preferred_port: u16) -> Result<TcpListener> {
    let preferred = SocketAddr::from((Ipv4Addr::LOCALHOST, preferred_port));
    match TcpListener::bind(preferred).await {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == ErrorKind::AddrInUse && preferred_port != 0 => {
            warn!("Port {} was in use. Letting OS choose.", preferred_port);
            Ok(TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).await?)
        }
        Err(e) => Err(e.into()),
    }
}
