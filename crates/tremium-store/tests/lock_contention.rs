use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use tremium_store::*;

fn file_lock(path: &std::path::Path) -> DataFileLock {
    let store = FileStore::open(path).unwrap();
    DataFileLock::new(Arc::new(store), Duration::from_millis(10))
}

#[tokio::test]
async fn test_held_lock_blocks_second_process_until_release() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");

    // Two independent handles on one file stand in for two processes
    let first = file_lock(&path);
    let second = file_lock(&path);

    let guard = first.acquire().await.unwrap();

    let (acquired_tx, mut acquired_rx) = oneshot::channel();
    let waiter = tokio::spawn(async move {
        let guard = second.acquire().await.unwrap();
        acquired_tx.send(()).unwrap();
        guard.release().await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(
        acquired_rx.try_recv().is_err(),
        "second holder must wait while the first holds the lock"
    );

    guard.release().await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("second holder should acquire after release")
        .unwrap();
    assert!(!first.is_held().await.unwrap());
}

#[tokio::test]
async fn test_concurrent_critical_sections_never_overlap() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let log_path = dir.path().join("sections.log");
    std::fs::write(&log_path, "").unwrap();

    let mut workers = Vec::new();
    for worker in 0..4 {
        let lock = file_lock(&path);
        let log_path = log_path.clone();
        workers.push(tokio::spawn(async move {
            for _ in 0..5 {
                let guard = lock.acquire().await.unwrap();
                let mut log = std::fs::read_to_string(&log_path).unwrap();
                log.push_str(&format!("begin {worker}\n"));
                std::fs::write(&log_path, &log).unwrap();
                tokio::time::sleep(Duration::from_millis(2)).await;
                let mut log = std::fs::read_to_string(&log_path).unwrap();
                log.push_str(&format!("end {worker}\n"));
                std::fs::write(&log_path, &log).unwrap();
                guard.release().await.unwrap();
            }
        }));
    }
    for worker in workers {
        worker.await.unwrap();
    }

    let log = std::fs::read_to_string(&log_path).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 40);
    for pair in lines.chunks(2) {
        let begin = pair[0].strip_prefix("begin ").unwrap();
        let end = pair[1].strip_prefix("end ").unwrap();
        assert_eq!(begin, end, "sections interleaved: {pair:?}");
    }
}

#[tokio::test]
async fn test_memory_and_file_backends_agree_on_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let stores: Vec<Arc<dyn CoordinationStore>> = vec![
        Arc::new(MemoryStore::spawn()),
        Arc::new(FileStore::open(dir.path().join("store.json")).unwrap()),
    ];

    for store in stores {
        let snapshot = store.snapshot().await.unwrap();
        assert!(!snapshot.initialized, "{}", store.backend());
        assert!(snapshot.data_collection, "{}", store.backend());
        assert!(!snapshot.data_file_lock, "{}", store.backend());
        assert_eq!(snapshot.pending_export_requests, 0);
    }
}
