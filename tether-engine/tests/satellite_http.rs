//! `SatelliteClient` against a real HTTP server standing in for a satellite.

use std::collections::BTreeMap;
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;
use tether_core::{ChangeStatus, LifecycleCommands, Service};
use tether_engine::{
    wait_healthy, Endpoint, EngineError, FileTransfer, SatelliteClient, Transport,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct Upload {
    method: &'static str,
    fields: BTreeMap<String, Vec<u8>>,
}

#[derive(Clone, Default)]
struct Satellite {
    uploads: Arc<Mutex<Vec<Upload>>>,
    /// When set, every upload is answered with this error message.
    failure: Option<&'static str>,
}

impl Satellite {
    fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().unwrap().clone()
    }
}

async fn collect(satellite: &Satellite, method: &'static str, mut multipart: Multipart) {
    let mut fields = BTreeMap::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        let data = field.bytes().await.unwrap();
        fields.insert(name, data.to_vec());
    }
    satellite.uploads.lock().unwrap().push(Upload { method, fields });
}

fn answer(satellite: &Satellite, ok: &str) -> Json<Value> {
    match satellite.failure {
        Some(message) => Json(json!({ "status": "error", "error": message })),
        None => Json(json!({ "status": ok })),
    }
}

async fn create(State(satellite): State<Satellite>, multipart: Multipart) -> Json<Value> {
    collect(&satellite, "POST", multipart).await;
    answer(&satellite, "created")
}

async fn update(State(satellite): State<Satellite>, multipart: Multipart) -> Json<Value> {
    collect(&satellite, "PUT", multipart).await;
    answer(&satellite, "updated")
}

async fn serve(satellite: Satellite) -> String {
    let app = Router::new()
        .route("/", post(create).put(update))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(satellite);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    address
}

/// An address nothing is listening on.
async fn dead_address() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    address
}

fn field(upload: &Upload, name: &str) -> String {
    String::from_utf8(upload.fields.get(name).cloned().unwrap_or_default()).unwrap()
}

#[tokio::test]
async fn bootstrap_posts_archive_with_lifecycle_commands() {
    let satellite = Satellite::default();
    let address = serve(satellite.clone()).await;
    let tmp = TempDir::new().unwrap();
    let archive = tmp.path().join("web_upload.tgz");
    fs::write(&archive, b"fake-archive-bytes").unwrap();

    let service = Service::new("web", address).with_commands(LifecycleCommands {
        build: Some("npm run build".into()),
        start: Some("npm start".into()),
        ..LifecycleCommands::default()
    });
    let client = SatelliteClient::new().unwrap();
    client.bootstrap(&service, &archive).await.unwrap();

    let uploads = satellite.uploads();
    assert_eq!(uploads.len(), 1);
    let upload = &uploads[0];
    assert_eq!(upload.method, "POST");
    assert_eq!(upload.fields["file"], b"fake-archive-bytes".to_vec());
    assert_eq!(field(upload, "build"), "npm run build");
    assert_eq!(field(upload, "start"), "npm start");
    assert!(!upload.fields.contains_key("init"));
    assert!(!upload.fields.contains_key("test"));
}

#[tokio::test]
async fn update_carries_path_mode_and_content() {
    let satellite = Satellite::default();
    let address = serve(satellite.clone()).await;
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("main.rs");
    fs::write(&source, "fn main() {}").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&source, fs::Permissions::from_mode(0o640)).unwrap();
    }

    let client = SatelliteClient::new().unwrap();
    let service = Service::new("api", address);
    client
        .transfer(
            &service,
            FileTransfer {
                status: ChangeStatus::Update,
                path: "src/main.rs",
                source: Some(&source),
            },
        )
        .await
        .unwrap();

    let uploads = satellite.uploads();
    let upload = &uploads[0];
    assert_eq!(upload.method, "PUT");
    assert_eq!(field(upload, "type"), "update");
    assert_eq!(field(upload, "path"), "src/main.rs");
    assert_eq!(field(upload, "file"), "fn main() {}");
    #[cfg(unix)]
    assert_eq!(field(upload, "mode"), (0o640).to_string());
}

#[tokio::test]
async fn delete_sends_no_content() {
    let satellite = Satellite::default();
    let address = serve(satellite.clone()).await;

    let client = SatelliteClient::new().unwrap();
    client
        .transfer(
            &Service::new("api", address),
            FileTransfer {
                status: ChangeStatus::Delete,
                path: "old/gone.txt",
                source: None,
            },
        )
        .await
        .unwrap();

    let upload = &satellite.uploads()[0];
    assert_eq!(field(upload, "type"), "delete");
    assert_eq!(field(upload, "path"), "old/gone.txt");
    assert!(!upload.fields.contains_key("file"));
    assert!(!upload.fields.contains_key("mode"));
}

#[tokio::test]
async fn rejected_upload_surfaces_satellite_message() {
    let satellite = Satellite {
        failure: Some("disk full"),
        ..Satellite::default()
    };
    let address = serve(satellite).await;
    let tmp = TempDir::new().unwrap();
    let archive = tmp.path().join("a.tgz");
    fs::write(&archive, b"x").unwrap();

    let client = SatelliteClient::new().unwrap();
    let err = client
        .bootstrap(&Service::new("web", address), &archive)
        .await
        .unwrap_err();
    match err {
        EngineError::Rejected {
            endpoint,
            status,
            message,
            ..
        } => {
            assert_eq!(endpoint, Endpoint::Bootstrap);
            assert_eq!(status, "error");
            assert_eq!(message, "disk full");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn missing_source_is_reported_as_vanished() {
    let satellite = Satellite::default();
    let address = serve(satellite.clone()).await;
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("gone.txt");

    let client = SatelliteClient::new().unwrap();
    let err = client
        .transfer(
            &Service::new("api", address),
            FileTransfer {
                status: ChangeStatus::Create,
                path: "gone.txt",
                source: Some(&missing),
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_vanished(), "got: {err}");
    assert!(satellite.uploads().is_empty());
}

#[tokio::test]
async fn refused_connection_is_transient_sync_unavailable() {
    let address = dead_address().await;
    let tmp = TempDir::new().unwrap();
    let archive = tmp.path().join("a.tgz");
    fs::write(&archive, b"x").unwrap();

    let client = SatelliteClient::new().unwrap();
    let err = client
        .bootstrap(&Service::new("web", address), &archive)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SyncUnavailable { .. }), "got: {err}");
    assert!(err.is_transient());
}

#[tokio::test]
async fn health_wait_succeeds_when_up_and_gives_up_when_down() {
    let client = SatelliteClient::new().unwrap();
    let cancel = CancellationToken::new();

    let up = Service::new("web", serve(Satellite::default()).await);
    assert!(wait_healthy(&client, &up, 3, Duration::from_millis(5), &cancel)
        .await
        .unwrap());

    let down = Service::new("db", dead_address().await);
    let err = wait_healthy(&client, &down, 3, Duration::from_millis(5), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err.root(), EngineError::Unreachable { attempts: 3, .. }));
    assert!(err.to_string().starts_with("(db): "));

    cancel.cancel();
    assert!(!wait_healthy(&client, &down, 3, Duration::from_millis(5), &cancel)
        .await
        .unwrap());
}

#[tokio::test]
async fn stalled_satellite_times_out_as_transient() {
    let app = Router::new().route(
        "/",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Json(json!({ "status": "created" }))
        })
        .put(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Json(json!({ "status": "updated" }))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = SatelliteClient::with_timeout(Duration::from_millis(300)).unwrap();
    let started = std::time::Instant::now();
    let err = client
        .transfer(
            &Service::new("api", address),
            FileTransfer {
                status: ChangeStatus::Delete,
                path: "slow.txt",
                source: None,
            },
        )
        .await
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(matches!(err, EngineError::Http(_)), "got: {err}");
    assert!(err.is_transient());
}
