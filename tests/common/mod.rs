// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use axum::Router;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use pipkin::naming;
use pipkin::session::{Installer, InstallerOutput};
use pipkin::target::{LocalTarget, Target};
use pipkin::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;
use tempfile::TempDir;
use tokio::sync::oneshot;

/// Files per distribution: (file name, bytes)
pub type Listing = BTreeMap<String, Vec<(String, Vec<u8>)>>;

#[derive(Clone)]
struct UpstreamState {
    listing: Arc<Listing>,
    page_hits: Arc<AtomicUsize>,
}

/// A PEP 503 index served from memory on a background thread
pub struct Upstream {
    addr: SocketAddr,
    page_hits: Arc<AtomicUsize>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Upstream {
    pub fn start(listing: Listing) -> Self {
        let page_hits = Arc::new(AtomicUsize::new(0));
        let state = UpstreamState {
            listing: Arc::new(listing),
            page_hits: page_hits.clone(),
        };
        let router = Router::new()
            .route("/simple/:dist", get(upstream_page))
            .route("/simple/:dist/", get(upstream_page))
            .route("/files/:file", get(upstream_file))
            .with_state(state);

        let (addr_tx, addr_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let thread = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
                addr_tx.send(listener.local_addr().unwrap()).unwrap();
                axum::serve(listener, router)
                    .with_graceful_shutdown(async {
                        let _ = shutdown_rx.await;
                    })
                    .await
                    .unwrap();
            });
        });

        Self {
            addr: addr_rx.recv().unwrap(),
            page_hits,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        }
    }

    pub fn index_url(&self) -> String {
        format!("http://{}/simple", self.addr)
    }

    /// Distribution pages served so far, found or not
    pub fn page_hits(&self) -> usize {
        self.page_hits.load(Ordering::SeqCst)
    }
}

impl Drop for Upstream {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn upstream_page(
    State(state): State<UpstreamState>,
    UrlPath(dist): UrlPath<String>,
) -> Response {
    state.page_hits.fetch_add(1, Ordering::SeqCst);
    match state.listing.get(&naming::normalize(&dist)) {
        Some(files) => {
            let body: String = files
                .iter()
                .map(|(name, _)| format!("<a href=\"/files/{name}\">{name}</a><br/>\n"))
                .collect();
            Html(format!("<html><body>\n{body}</body></html>")).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn upstream_file(
    State(state): State<UpstreamState>,
    UrlPath(file): UrlPath<String>,
) -> Response {
    state
        .listing
        .values()
        .flatten()
        .find(|(name, _)| *name == file)
        .map(|(_, data)| data.clone().into_response())
        .unwrap_or_else(|| StatusCode::NOT_FOUND.into_response())
}

/// A setuptools sdist `{name}-{version}.tar.gz` holding `modules`
pub fn sdist(name: &str, version: &str, modules: &[(&str, &str)]) -> (String, Vec<u8>) {
    let wrapper = format!("{name}-{version}");
    let pkg_info = format!("Metadata-Version: 2.1\nName: {name}\nVersion: {version}\nSummary: {name} for tests\n");
    let setup_py = format!("from setuptools import setup\nsetup(name={name:?}, version={version:?})\n");

    let mut entries: Vec<(String, Vec<u8>)> = vec![
        (format!("{wrapper}/PKG-INFO"), pkg_info.into_bytes()),
        (format!("{wrapper}/setup.py"), setup_py.into_bytes()),
    ];
    for (path, content) in modules {
        entries.push((format!("{wrapper}/{path}"), content.as_bytes().to_vec()));
    }

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, data) in &entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(1_700_000_000);
        header.set_cksum();
        builder.append_data(&mut header, path, data.as_slice()).unwrap();
    }
    let bytes = builder.into_inner().unwrap().finish().unwrap();
    (format!("{wrapper}.tar.gz"), bytes)
}

/// Listing with the given sdists, grouped by normalized name
pub fn listing(sdists: Vec<(&str, (String, Vec<u8>))>) -> Listing {
    let mut listing = Listing::new();
    for (name, file) in sdists {
        listing.entry(naming::normalize(name)).or_default().push(file);
    }
    listing
}

/// Stands in for pip: installs `name==version` specs from the index it is
/// pointed at by unpacking sdists into its scratch directory
pub struct FakeInstaller {
    _dir: TempDir,
    site_packages: PathBuf,
    pub runs: Vec<Vec<String>>,
}

impl FakeInstaller {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let site_packages = dir.path().join("site-packages");
        fs::create_dir_all(&site_packages).unwrap();
        // Bootstrap distribution that must never reach the target
        fs::create_dir_all(site_packages.join("pip-22.2.2.dist-info")).unwrap();
        Self {
            _dir: dir,
            site_packages,
            runs: Vec::new(),
        }
    }

    fn find_dist_info(&self, name: &str) -> Option<String> {
        let wanted = naming::normalize(name);
        fs::read_dir(&self.site_packages)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .find(|dir_name| {
                naming::parse_dist_info_dir_name(dir_name)
                    .is_some_and(|(n, _)| naming::normalize(&n) == wanted)
            })
    }

    fn remove_dist(&self, dir_name: &str) -> Result<()> {
        let meta_dir = self.site_packages.join(dir_name);
        let record = fs::read_to_string(meta_dir.join("RECORD"))?;
        for line in record.lines() {
            let path = line.split(',').next().unwrap_or_default();
            if path.is_empty() || path.starts_with("..") {
                continue;
            }
            let _ = fs::remove_file(self.site_packages.join(path));
        }
        fs::remove_dir_all(meta_dir)?;
        Ok(())
    }

    fn unpack(&self, name: &str, version: &str, data: &[u8]) -> Result<()> {
        let mut archive = tar::Archive::new(GzDecoder::new(data));
        let mut files = Vec::new();
        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.to_string_lossy().into_owned();
            let Some((_, rel)) = path.split_once('/') else {
                continue;
            };
            if rel.is_empty() || rel == "setup.py" || rel == "PKG-INFO" {
                continue;
            }
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            let dest = self.site_packages.join(rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(dest, content)?;
            files.push(rel.to_string());
        }

        let dir_name = naming::dist_info_dir_name(name, version);
        let meta_dir = self.site_packages.join(&dir_name);
        fs::create_dir_all(&meta_dir)?;
        fs::write(
            meta_dir.join("METADATA"),
            format!("Metadata-Version: 2.1\nName: {name}\nVersion: {version}\nSummary: {name} for tests\n"),
        )?;
        fs::write(meta_dir.join("INSTALLER"), "pip\n")?;

        let mut record: String = files.iter().map(|f| format!("{f},,\n")).collect();
        for file in ["METADATA", "INSTALLER", "RECORD"] {
            record.push_str(&format!("{dir_name}/{file},,\n"));
        }
        // Console scripts land outside site-packages
        record.push_str(&format!("../../../bin/{name}-tool,,\n"));
        fs::write(meta_dir.join("RECORD"), record)?;
        Ok(())
    }

    fn install(&mut self, args: &[String]) -> Result<InstallerOutput> {
        let index_url = args
            .iter()
            .position(|a| a == "--index-url")
            .and_then(|i| args.get(i + 1))
            .ok_or_else(|| Error::management("no index given", "pip install", "", ""))?
            .trim_end_matches('/')
            .to_string();
        let force = args.iter().any(|a| a == "--force-reinstall");

        let mut stdout = String::new();
        for spec in args.iter().filter(|a| a.contains("==")) {
            let (name, version) = spec.split_once("==").unwrap();
            if let Some(existing) = self.find_dist_info(name) {
                if existing == naming::dist_info_dir_name(name, version) && !force {
                    stdout.push_str(&format!("Requirement already satisfied: {spec}\n"));
                    continue;
                }
                self.remove_dist(&existing)?;
            }

            let file_name = format!("{name}-{version}.tar.gz");
            let page = http_get(&format!("{index_url}/{name}/"))?;
            let listed = page.status().is_success()
                && page.text().map_err(fetch_error)?.contains(&file_name);
            if !listed {
                return Err(Error::management(
                    format!("No matching distribution found for {spec}"),
                    "pip install",
                    "",
                    format!("ERROR: No matching distribution found for {spec}\n"),
                ));
            }
            let data = http_get(&format!("{index_url}/{name}/{file_name}/"))?
                .error_for_status()
                .and_then(|r| r.bytes())
                .map_err(fetch_error)?;
            self.unpack(name, version, &data)?;
            stdout.push_str(&format!("Successfully installed {name}-{version}\n"));
        }
        Ok(InstallerOutput {
            stdout,
            stderr: String::new(),
        })
    }

    fn uninstall(&mut self, args: &[String]) -> Result<InstallerOutput> {
        let mut output = InstallerOutput::default();
        for name in args.iter().skip(1).filter(|a| !a.starts_with('-')) {
            match self.find_dist_info(name) {
                Some(dir_name) => {
                    self.remove_dist(&dir_name)?;
                    output
                        .stdout
                        .push_str(&format!("Successfully uninstalled {name}\n"));
                }
                None => output
                    .stderr
                    .push_str(&format!("WARNING: Skipping {name} as it is not installed.\n")),
            }
        }
        Ok(output)
    }
}

impl Installer for FakeInstaller {
    fn site_packages(&self) -> &Path {
        &self.site_packages
    }

    fn run(&mut self, args: &[String]) -> Result<InstallerOutput> {
        self.runs.push(args.to_vec());
        match args.first().map(String::as_str) {
            Some("install") => self.install(args),
            Some("uninstall") => self.uninstall(args),
            _ => Ok(InstallerOutput::default()),
        }
    }
}

/// A local target whose link drops after a number of writes
pub struct FailingTarget {
    inner: LocalTarget,
    writes_left: usize,
}

impl FailingTarget {
    pub fn new(root: &Path, writes_before_failure: usize) -> Self {
        Self {
            inner: LocalTarget::dir(root).unwrap(),
            writes_left: writes_before_failure,
        }
    }
}

impl Target for FailingTarget {
    fn install_dir(&self) -> &str {
        self.inner.install_dir()
    }

    fn read_file(&mut self, path: &str) -> Result<Option<Vec<u8>>> {
        self.inner.read_file(path)
    }

    fn write_file(&mut self, path: &str, content: &[u8]) -> Result<()> {
        if self.writes_left == 0 {
            return Err(Error::Communication(format!(
                "connection lost while writing {path}"
            )));
        }
        self.writes_left -= 1;
        self.inner.write_file(path, content)
    }

    fn remove_file(&mut self, path: &str) -> Result<()> {
        self.inner.remove_file(path)
    }

    fn remove_dir_if_empty(&mut self, path: &str) -> Result<bool> {
        self.inner.remove_dir_if_empty(path)
    }

    fn list_dir(&mut self, path: &str) -> Result<Option<Vec<String>>> {
        self.inner.list_dir(path)
    }
}

/// Relative paths of every file under `root`, sorted
pub fn tree(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    files.sort();
    files
}

fn fetch_error(err: reqwest::Error) -> Error {
    Error::Fetch(err.to_string())
}

fn http_get(url: &str) -> Result<reqwest::blocking::Response> {
    reqwest::blocking::get(url).map_err(fetch_error)
}
