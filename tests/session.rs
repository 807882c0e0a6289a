// tests/session.rs

//! Install, upgrade and uninstall sessions against local targets, with the
//! index proxy in front of an in-process upstream index.

mod common;

use common::{FailingTarget, FakeInstaller, Upstream, listing, sdist, tree};
use pipkin::index::IndexSettings;
use pipkin::manifest::ManifestStore;
use pipkin::progress::SilentProgress;
use pipkin::proxy::{ProxyHandle, ProxyState};
use pipkin::session::{FileOperation, Session};
use pipkin::target::{LocalTarget, Target};
use std::time::Duration;
use tempfile::TempDir;

fn demo_upstream() -> Upstream {
    Upstream::start(listing(vec![
        (
            "demo",
            sdist(
                "demo",
                "1.0",
                &[("demo.py", "VERSION = 1\n"), ("demo_extras/colors.py", "RED = 1\n")],
            ),
        ),
        ("demo", sdist("demo", "2.0", &[("demo.py", "VERSION = 2\n")])),
    ]))
}

fn start_proxy(upstream: &Upstream) -> ProxyHandle {
    let settings = IndexSettings {
        index_url: upstream.index_url(),
        extra_index_urls: Vec::new(),
        no_mp_org: true,
    };
    let state = ProxyState::from_settings(&settings, Duration::from_secs(10)).unwrap();
    ProxyHandle::start(state, 0).unwrap()
}

fn install_args(proxy: &ProxyHandle, spec: &str) -> Vec<String> {
    vec![
        "install".to_string(),
        "--no-compile".to_string(),
        spec.to_string(),
        "--index-url".to_string(),
        proxy.index_url(),
    ]
}

fn installed_version(target: &mut dyn Target, name: &str) -> Option<String> {
    let store = ManifestStore::for_target(&*target);
    store.load(target).unwrap().get(name).map(|r| r.version.clone())
}

#[test]
fn test_install_into_empty_directory() {
    let upstream = demo_upstream();
    let proxy = start_proxy(&upstream);
    let device = TempDir::new().unwrap();
    let mut target = LocalTarget::dir(device.path()).unwrap();
    let mut installer = FakeInstaller::new();

    let mut session = Session::new(&mut target, &mut installer, &SilentProgress);
    let outcome = session
        .install(&install_args(&proxy, "demo==1.0"), None)
        .unwrap();
    session.close().unwrap();

    assert!(outcome.applied);
    assert!(outcome.operations.iter().all(|op| matches!(op, FileOperation::Create { .. })));
    assert_eq!(
        tree(device.path()),
        vec![
            ".pipkin/demo.json",
            "demo-1.0.dist-info/METADATA",
            "demo.py",
            "demo_extras/colors.py",
        ]
    );
    assert_eq!(
        std::fs::read_to_string(device.path().join("demo.py")).unwrap(),
        "VERSION = 1\n"
    );
    assert_eq!(installed_version(&mut target, "demo").as_deref(), Some("1.0"));
}

#[test]
fn test_repeated_install_changes_nothing() {
    let upstream = demo_upstream();
    let proxy = start_proxy(&upstream);
    let device = TempDir::new().unwrap();
    let mut target = LocalTarget::dir(device.path()).unwrap();
    let mut installer = FakeInstaller::new();

    {
        let mut session = Session::new(&mut target, &mut installer, &SilentProgress);
        session
            .install(&install_args(&proxy, "demo==1.0"), None)
            .unwrap();
    }
    let before = tree(device.path());

    let mut session = Session::new(&mut target, &mut installer, &SilentProgress);
    let outcome = session
        .install(&install_args(&proxy, "demo==1.0"), None)
        .unwrap();

    assert!(outcome.operations.is_empty());
    assert!(outcome.installer.stdout.contains("already satisfied"));
    assert_eq!(tree(device.path()), before);
}

#[test]
fn test_upgrade_removes_files_the_new_version_dropped() {
    let upstream = demo_upstream();
    let proxy = start_proxy(&upstream);
    let device = TempDir::new().unwrap();
    let mut target = LocalTarget::dir(device.path()).unwrap();
    let mut installer = FakeInstaller::new();

    let mut session = Session::new(&mut target, &mut installer, &SilentProgress);
    session
        .install(&install_args(&proxy, "demo==1.0"), None)
        .unwrap();
    let outcome = session
        .install(&install_args(&proxy, "demo==2.0"), None)
        .unwrap();
    session.close().unwrap();

    assert!(outcome.operations.iter().any(
        |op| matches!(op, FileOperation::Overwrite { path, .. } if path == "demo.py")
    ));
    assert_eq!(
        tree(device.path()),
        vec![".pipkin/demo.json", "demo-2.0.dist-info/METADATA", "demo.py"]
    );
    // Directories emptied by the upgrade are gone
    assert!(!device.path().join("demo_extras").exists());
    assert!(!device.path().join("demo-1.0.dist-info").exists());
    assert_eq!(installed_version(&mut target, "demo").as_deref(), Some("2.0"));
}

#[test]
fn test_failed_apply_keeps_previous_records() {
    let upstream = demo_upstream();
    let proxy = start_proxy(&upstream);
    let device = TempDir::new().unwrap();

    {
        let mut target = LocalTarget::dir(device.path()).unwrap();
        let mut installer = FakeInstaller::new();
        let mut session = Session::new(&mut target, &mut installer, &SilentProgress);
        session
            .install(&install_args(&proxy, "demo==1.0"), None)
            .unwrap();
    }

    // The link drops on the first write of the upgrade
    let mut failing = FailingTarget::new(device.path(), 0);
    let mut installer = FakeInstaller::new();
    let mut session = Session::new(&mut failing, &mut installer, &SilentProgress);
    let err = session
        .install(&install_args(&proxy, "demo==2.0"), None)
        .unwrap_err();
    assert!(err.is_communication());

    let mut target = LocalTarget::dir(device.path()).unwrap();
    assert_eq!(installed_version(&mut target, "demo").as_deref(), Some("1.0"));

    // Re-running against a healthy link finishes the upgrade
    let mut installer = FakeInstaller::new();
    let mut session = Session::new(&mut target, &mut installer, &SilentProgress);
    session
        .install(&install_args(&proxy, "demo==2.0"), None)
        .unwrap();
    session.close().unwrap();
    assert_eq!(installed_version(&mut target, "demo").as_deref(), Some("2.0"));
    assert!(!device.path().join("demo_extras").exists());
}

#[test]
fn test_uninstall_honors_confirmation() {
    let upstream = demo_upstream();
    let proxy = start_proxy(&upstream);
    let device = TempDir::new().unwrap();
    let mut target = LocalTarget::dir(device.path()).unwrap();
    let mut installer = FakeInstaller::new();
    let uninstall = vec![
        "uninstall".to_string(),
        "--yes".to_string(),
        "demo".to_string(),
    ];

    let mut session = Session::new(&mut target, &mut installer, &SilentProgress);
    session
        .install(&install_args(&proxy, "demo==1.0"), None)
        .unwrap();
    let installed_tree = tree(device.path());

    let mut asked = Vec::new();
    let outcome = session
        .uninstall(&uninstall, &mut |names| {
            asked.extend(names.iter().cloned());
            Ok(false)
        })
        .unwrap();
    assert!(!outcome.applied);
    assert_eq!(asked, vec!["demo"]);
    assert_eq!(tree(device.path()), installed_tree);

    let outcome = session.uninstall(&uninstall, &mut |_| Ok(true)).unwrap();
    session.close().unwrap();
    assert!(outcome.applied);
    assert_eq!(outcome.removed, vec!["demo"]);
    assert!(tree(device.path()).is_empty());
}

#[test]
fn test_workspace_never_reaches_target() {
    let upstream = demo_upstream();
    let proxy = start_proxy(&upstream);
    let device = TempDir::new().unwrap();
    let mut target = LocalTarget::mount(device.path()).unwrap();
    let mut installer = FakeInstaller::new();

    let mut session = Session::new(&mut target, &mut installer, &SilentProgress);
    session
        .install(&install_args(&proxy, "demo==1.0"), None)
        .unwrap();

    let files = tree(device.path());
    assert!(files.iter().all(|f| f.starts_with("lib/")));
    assert!(!files.iter().any(|f| f.contains("pip-") || f.contains("bin/")));
}
