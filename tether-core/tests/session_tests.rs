//! Session file error-message, discovery and atomic-save integration tests.

use std::fs;
use std::path::PathBuf;

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use rstest::rstest;
use tether_core::{
    session::{self, SESSION_FILE},
    LifecycleCommands, Service, Session, SessionEntry, SessionError, SyncSettings,
};

fn sample_session() -> Session {
    Session {
        settings: SyncSettings {
            poll_interval_ms: 250,
            ..Default::default()
        },
        services: vec![
            SessionEntry {
                service: Service::new("web", "127.0.0.1:3001").with_commands(LifecycleCommands {
                    build: Some("npm install".into()),
                    start: Some("npm start".into()),
                    ..Default::default()
                }),
                path: Some(PathBuf::from("web")),
            },
            SessionEntry {
                service: Service::new("db", "127.0.0.1:3002"),
                path: None,
            },
        ],
    }
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_session_returns_not_found() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let err = session::load_at(&dir.path().join(SESSION_FILE)).unwrap_err();
    assert!(matches!(err, SessionError::NotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("tether.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child(SESSION_FILE);
    file.write_str("services: [unclosed\n  - : :").expect("write");

    let err = session::load_at(file.path()).unwrap_err();
    assert!(matches!(err, SessionError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("tether.yaml"));
}

#[rstest]
#[case::duplicate(
    "services:\n  - name: web\n    address: a:1\n  - name: web\n    address: b:2\n",
    "duplicate service name 'web'"
)]
#[case::empty_name("services:\n  - name: ''\n    address: a:1\n", "empty name")]
fn load_rejects_invalid_service_lists(#[case] yaml: &str, #[case] reason: &str) {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child(SESSION_FILE);
    file.write_str(yaml).expect("write");

    let err = session::load_at(file.path()).unwrap_err();
    assert!(matches!(err, SessionError::Invalid { .. }), "got: {err}");
    assert!(err.to_string().contains(reason), "got: {err}");
}

#[test]
fn empty_file_is_an_empty_session() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child(SESSION_FILE);
    file.touch().expect("touch");

    let loaded = session::load_at(file.path()).expect("load");
    assert_eq!(loaded, Session::default());
}

// ---------------------------------------------------------------------------
// 2. Save / load
// ---------------------------------------------------------------------------

#[test]
fn save_then_load_preserves_services_and_settings() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = dir.path().join(SESSION_FILE);

    session::save_at(&path, &sample_session()).expect("save");
    let loaded = session::load_at(&path).expect("load");
    assert_eq!(loaded, sample_session());

    dir.child(SESSION_FILE)
        .assert(predicate::str::contains("build: npm install"));
    dir.child("tether.yaml.tmp").assert(predicate::path::missing());
}

// ---------------------------------------------------------------------------
// 3. Discovery
// ---------------------------------------------------------------------------

#[test]
fn discover_walks_up_to_parent_directories() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    dir.child(SESSION_FILE).write_str("services: []\n").expect("write");
    let nested = dir.child("a").child("b");
    nested.create_dir_all().expect("mkdir");

    let found = session::discover_from(nested.path()).expect("discover");
    assert_eq!(found, dir.path().join(SESSION_FILE));
}

#[test]
fn discover_gives_up_beyond_depth() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    dir.child(SESSION_FILE).write_str("services: []\n").expect("write");
    let deep = dir.child("1").child("2").child("3").child("4").child("5");
    deep.create_dir_all().expect("mkdir");

    let err = session::discover_from(deep.path()).unwrap_err();
    assert!(matches!(err, SessionError::NotFound { .. }), "got: {err}");
    fs::remove_dir_all(deep.path()).ok();
}
