//! Port allocation against a shared on-disk store

use std::collections::HashSet;
use std::sync::Arc;

use holehub_control::port::SEQ_BUCKET;
use holehub_control::{PortAllocator, SequencePortAllocator, PORT_COUNTER_KEY};
use holehub_store::{open, Store};

fn db_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join("holehub.db").display())
}

#[tokio::test]
async fn test_concurrent_allocations_are_distinct() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn Store> = Arc::new(open(&db_url(&dir)).await.unwrap());
    let allocator = Arc::new(SequencePortAllocator::new(store, 10000));

    let tasks = (0..40).map(|_| {
        let allocator = allocator.clone();
        tokio::spawn(async move { allocator.next().await.unwrap() })
    });
    let ports: Vec<u16> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let unique: HashSet<_> = ports.iter().copied().collect();
    assert_eq!(unique.len(), ports.len());
    assert!(ports.iter().all(|p| *p >= 10000));
}

#[tokio::test]
async fn test_counter_never_decreases_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let url = db_url(&dir);

    {
        let store: Arc<dyn Store> = Arc::new(open(&url).await.unwrap());
        // A counter left below the floor by an older deployment
        store.set(SEQ_BUCKET, PORT_COUNTER_KEY, "17").await.unwrap();

        let allocator = SequencePortAllocator::new(store, 10000);
        assert_eq!(allocator.next().await.unwrap(), 10000);
        assert_eq!(allocator.next().await.unwrap(), 10001);
    }

    // Restart with a lower floor: allocation continues from the persisted value
    let store: Arc<dyn Store> = Arc::new(open(&url).await.unwrap());
    let allocator = SequencePortAllocator::new(store.clone(), 2000);
    assert_eq!(allocator.next().await.unwrap(), 10002);
    assert_eq!(
        store.get(SEQ_BUCKET, PORT_COUNTER_KEY).await.unwrap().as_deref(),
        Some("10002")
    );
}
