use std::fs;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tremium_core::config::DEFAULT_ARCHIVE_PATTERN;
use tremium_core::maintenance::parse_manifest;
use tremium_core::{
    Acceptor, AcceptorError, ArchivePattern, ConnectionHandler, HubClient, MaintenanceError,
    MaintenanceOrchestrator, NodeConfig, ProtocolConfig, TransferEnd,
};
use tremium_store::{CoordinationStore, DataFileLock, MemoryStore};

fn protocol() -> ProtocolConfig {
    ProtocolConfig {
        idle_timeout_ms: 200,
        connect_timeout_ms: 1_000,
        max_chunk_size: 1024,
    }
}

async fn start_hub(images: &Path, transfer: &Path) -> (SocketAddr, JoinHandle<Result<(), AcceptorError>>) {
    let handler = ConnectionHandler::new(
        images,
        transfer,
        ArchivePattern::new(DEFAULT_ARCHIVE_PATTERN).unwrap(),
        protocol(),
    );
    let acceptor = Acceptor::bind("127.0.0.1:0", handler, None).await.unwrap();
    let addr = acceptor.local_addr().unwrap();
    (addr, tokio::spawn(acceptor.run()))
}

struct Node {
    images: TempDir,
    transfer: TempDir,
    _state: TempDir,
    config: NodeConfig,
}

fn node(hub_addr: &str) -> Node {
    let images = tempfile::tempdir().unwrap();
    let transfer = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();

    let config = NodeConfig {
        node_id: "nodeA-07".to_string(),
        hub_addr: hub_addr.to_string(),
        image_archive_dir: images.path().to_path_buf(),
        file_transfer_dir: transfer.path().to_path_buf(),
        data_file: "extracted-data.json".to_string(),
        archived_data_file: "archived-data.json".to_string(),
        data_file_max_size: 8,
        manifest_path: state.path().join("image-updates.txt"),
        registry_prefix: "registry.local/".to_string(),
        archive_pattern: DEFAULT_ARCHIVE_PATTERN.to_string(),
        store_path: state.path().join("store.json"),
        lock_poll_interval_ms: 10,
        lock_timeout_secs: None,
        check_interval_secs: 3600,
        protocol: protocol(),
    };

    Node {
        images,
        transfer,
        _state: state,
        config,
    }
}

fn names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_store_then_get_is_byte_identical() {
    let shared = tempfile::tempdir().unwrap();
    let (addr, hub) = start_hub(shared.path(), shared.path()).await;
    let client = HubClient::new(addr.to_string(), protocol());

    let local = tempfile::tempdir().unwrap();
    let payload: Vec<u8> = (0..50_000u32).map(|i| (i * 7 % 256) as u8).collect();
    let source: PathBuf = local.path().join("sample-2020-01-01_00-00-00.bin");
    fs::write(&source, &payload).unwrap();

    let uploaded = client.store_file(&source).await.unwrap();
    assert_eq!(uploaded.bytes, payload.len() as u64);
    assert_eq!(uploaded.ended_by, TransferEnd::PeerClosed);

    let fetched_dir = tempfile::tempdir().unwrap();
    let fetched = client
        .get_update("sample-2020-01-01_00-00-00.bin", fetched_dir.path())
        .await
        .unwrap();

    assert_eq!(fetched.bytes, payload.len() as u64);
    assert_eq!(
        fs::read(fetched_dir.path().join("sample-2020-01-01_00-00-00.bin")).unwrap(),
        payload
    );
    hub.abort();
}

#[tokio::test]
async fn test_empty_archive_dir_means_no_updates() {
    let hub_images = tempfile::tempdir().unwrap();
    let hub_transfer = tempfile::tempdir().unwrap();
    let (addr, hub) = start_hub(hub_images.path(), hub_transfer.path()).await;

    let client = HubClient::new(addr.to_string(), protocol());
    assert!(client.check_available_updates("nodeA").await.unwrap().is_empty());
    hub.abort();
}

#[tokio::test]
async fn test_full_maintenance_run() {
    let hub_images = tempfile::tempdir().unwrap();
    let hub_transfer = tempfile::tempdir().unwrap();
    let (addr, hub) = start_hub(hub_images.path(), hub_transfer.path()).await;

    fs::write(
        hub_images.path().join("nodeA_comp1_2021-01-01_00-00-00.tar.gz"),
        b"new comp1 image",
    )
    .unwrap();
    fs::write(
        hub_images.path().join("nodeA_comp2_2021-01-01_00-00-00.tar.gz"),
        b"comp2 image",
    )
    .unwrap();
    fs::write(
        hub_images.path().join("nodeB_comp1_2022-01-01_00-00-00.tar.gz"),
        b"other fleet",
    )
    .unwrap();

    let node = node(&addr.to_string());
    fs::write(
        node.images.path().join("nodeA_comp1_2020-01-01_00-00-00.tar.gz"),
        b"old",
    )
    .unwrap();
    fs::write(
        node.images.path().join("nodeA_comp1_2020-01-01_00-00-00.tar"),
        b"old unpacked",
    )
    .unwrap();
    fs::write(
        node.transfer.path().join("extracted-data.json"),
        b"{\"t\": 1}\n{\"t\": 2}\n",
    )
    .unwrap();
    fs::write(node.transfer.path().join("node.log"), b"log line\n").unwrap();

    let store = Arc::new(MemoryStore::spawn());
    let orchestrator = MaintenanceOrchestrator::new(&node.config, store.clone()).unwrap();

    let report = orchestrator.run_once().await.unwrap();

    let rotated = report.rotated.expect("data file over threshold is rotated");
    let rotated_name = rotated.file_name().unwrap().to_string_lossy().into_owned();
    assert_eq!(report.uploaded.len(), 2);
    assert_eq!(report.skipped, vec!["nodeA_comp2_2021-01-01_00-00-00.tar.gz"]);
    assert_eq!(report.entries.len(), 1);

    // uploads landed on the hub and were removed locally
    assert_eq!(
        names(hub_transfer.path()),
        vec![rotated_name.clone(), "node.log".to_string()]
    );
    assert_eq!(
        fs::read(hub_transfer.path().join(&rotated_name)).unwrap(),
        b"{\"t\": 1}\n{\"t\": 2}\n"
    );
    assert_eq!(names(node.transfer.path()), vec!["extracted-data.json"]);

    // the superseded image is gone in both forms
    assert_eq!(
        names(node.images.path()),
        vec!["nodeA_comp1_2021-01-01_00-00-00.tar.gz"]
    );
    assert_eq!(
        fs::read(node.images.path().join("nodeA_comp1_2021-01-01_00-00-00.tar.gz")).unwrap(),
        b"new comp1 image"
    );

    let manifest = fs::read_to_string(&node.config.manifest_path).unwrap();
    assert_eq!(
        manifest,
        "registry.local/nodeA_comp1 nodeA_comp1_2021-01-01_00-00-00.tar.gz registry.local/nodeA_comp1\nEnd"
    );
    assert_eq!(parse_manifest(&manifest), report.entries);
    assert!(!store.data_collection_enabled().await.unwrap());

    hub.abort();
}

#[tokio::test]
async fn test_no_updates_leaves_manifest_and_collection_alone() {
    let hub_images = tempfile::tempdir().unwrap();
    let hub_transfer = tempfile::tempdir().unwrap();
    let (addr, hub) = start_hub(hub_images.path(), hub_transfer.path()).await;

    let node = node(&addr.to_string());
    fs::write(
        node.images.path().join("nodeA_comp1_2020-01-01_00-00-00.tar.gz"),
        b"old",
    )
    .unwrap();

    let store = Arc::new(MemoryStore::spawn());
    let orchestrator = MaintenanceOrchestrator::new(&node.config, store.clone()).unwrap();
    let report = orchestrator.run_once().await.unwrap();

    assert!(report.entries.is_empty());
    assert!(report.rotated.is_none());
    assert!(!node.config.manifest_path.exists());
    assert!(store.data_collection_enabled().await.unwrap());
    assert_eq!(
        names(node.images.path()),
        vec!["nodeA_comp1_2020-01-01_00-00-00.tar.gz"]
    );
    hub.abort();
}

#[tokio::test]
async fn test_empty_fetch_keeps_superseded_image() {
    let hub_images = tempfile::tempdir().unwrap();
    let hub_transfer = tempfile::tempdir().unwrap();
    let (addr, hub) = start_hub(hub_images.path(), hub_transfer.path()).await;
    fs::write(hub_images.path().join("nodeA_comp1_2021-01-01_00-00-00.tar.gz"), b"").unwrap();

    let node = node(&addr.to_string());
    fs::write(
        node.images.path().join("nodeA_comp1_2020-01-01_00-00-00.tar.gz"),
        b"old",
    )
    .unwrap();

    let store = Arc::new(MemoryStore::spawn());
    let orchestrator = MaintenanceOrchestrator::new(&node.config, store.clone()).unwrap();
    let err = orchestrator.run_once().await.unwrap_err();

    assert!(matches!(err, MaintenanceError::EmptyTransfer { .. }));
    assert_eq!(
        names(node.images.path()),
        vec!["nodeA_comp1_2020-01-01_00-00-00.tar.gz"]
    );
    assert!(!node.config.manifest_path.exists());
    assert!(store.data_collection_enabled().await.unwrap());

    hub.abort();
}

#[tokio::test]
async fn test_unreachable_hub_is_logged_not_raised() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let node = node(&addr.to_string());
    let store = Arc::new(MemoryStore::spawn());
    let orchestrator = MaintenanceOrchestrator::new(&node.config, store).unwrap();

    let err = orchestrator.run_once().await.unwrap_err();
    assert!(err.is_hub_unreachable(), "unexpected error: {err}");
    assert!(orchestrator.run().await.is_none());
}

#[tokio::test]
async fn test_rotation_waits_for_held_lock() {
    let node = node("127.0.0.1:9");
    fs::write(
        node.transfer.path().join("extracted-data.json"),
        b"0123456789abcdef",
    )
    .unwrap();

    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::spawn());
    let producer_lock = DataFileLock::new(Arc::clone(&store), Duration::from_millis(10));
    let held = producer_lock.acquire().await.unwrap();

    let orchestrator = MaintenanceOrchestrator::new(&node.config, store).unwrap();
    let data_file = orchestrator.data_file().clone();
    let lock = orchestrator.lock().clone();
    let rotation = tokio::spawn(async move { data_file.rotate(&lock).await });

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!rotation.is_finished());
    assert_eq!(names(node.transfer.path()), vec!["extracted-data.json"]);

    held.release().await.unwrap();
    let rotated = rotation.await.unwrap().unwrap().expect("rotation proceeds after release");

    assert!(rotated.exists());
    assert_eq!(
        fs::metadata(node.transfer.path().join("extracted-data.json"))
            .unwrap()
            .len(),
        0
    );
}

#[tokio::test]
async fn test_failed_upload_aborts_remaining_steps() {
    // Hub accepts the first upload, then goes away
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hub = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        socket.read_to_end(&mut received).await.unwrap();
        drop(listener);
        drop(socket);
        received
    });

    let node = node(&addr.to_string());
    fs::write(node.transfer.path().join("a.log"), b"first\n").unwrap();
    fs::write(node.transfer.path().join("b.log"), b"second\n").unwrap();

    let store = Arc::new(MemoryStore::spawn());
    let orchestrator = MaintenanceOrchestrator::new(&node.config, store.clone()).unwrap();
    let err = orchestrator.run_once().await.unwrap_err();

    assert!(err.is_hub_unreachable(), "unexpected error: {err}");
    assert_eq!(hub.await.unwrap(), b"STORE_FILE a.log\nfirst\n");
    assert_eq!(names(node.transfer.path()), vec!["b.log"]);
    assert!(!node.config.manifest_path.exists());
    assert!(store.data_collection_enabled().await.unwrap());
}

#[tokio::test]
async fn test_active_log_file_stays_local() {
    let hub_images = tempfile::tempdir().unwrap();
    let hub_transfer = tempfile::tempdir().unwrap();
    let (addr, hub) = start_hub(hub_images.path(), hub_transfer.path()).await;

    let node = node(&addr.to_string());
    let log_path = node.transfer.path().join("maintenance.log");
    let mut log = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .unwrap();
    log.write_all(b"starting\n").unwrap();
    fs::write(node.transfer.path().join("node.log"), b"log line\n").unwrap();

    let store = Arc::new(MemoryStore::spawn());
    let orchestrator = MaintenanceOrchestrator::new(&node.config, store)
        .unwrap()
        .exclude_from_upload(&log_path);
    let report = orchestrator.run_once().await.unwrap();

    assert_eq!(report.uploaded, vec![node.transfer.path().join("node.log")]);
    assert_eq!(names(hub_transfer.path()), vec!["node.log"]);

    log.write_all(b"still writing\n").unwrap();
    assert_eq!(
        fs::read(&log_path).unwrap(),
        b"starting\nstill writing\n"
    );
    hub.abort();
}

#[tokio::test]
async fn test_lock_timeout_is_retryable() {
    let node = node("127.0.0.1:9");
    let mut config = node.config.clone();
    config.lock_timeout_secs = Some(0);
    fs::write(
        node.transfer.path().join("extracted-data.json"),
        b"0123456789abcdef",
    )
    .unwrap();

    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::spawn());
    let producer_lock = DataFileLock::new(Arc::clone(&store), Duration::from_millis(10));
    let held = producer_lock.acquire().await.unwrap();

    let orchestrator = MaintenanceOrchestrator::new(&config, store).unwrap();
    let err = orchestrator.run_once().await.unwrap_err();

    assert!(err.is_store_retryable(), "unexpected error: {err}");
    assert!(!err.is_hub_unreachable());
    assert!(orchestrator.run().await.is_none());
    assert_eq!(names(node.transfer.path()), vec!["extracted-data.json"]);
    held.release().await.unwrap();
}
