use std::sync::Arc;

use dsheap::{DocumentStore, InMemoryStore, ObjectId, Value};
use tempfile::tempdir;

use crate::helpers::store_on;

#[tokio::test]
async fn test_heap_survives_save_and_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("heap.json");

    // Setup: commit something and save the backend
    {
        let backend = Arc::new(InMemoryStore::new());
        let store = store_on(&backend, "writer").await;
        store
            .transact(|txn| {
                let root = txn.root();
                txn.set(root, "title", "saved")?;
                Ok(())
            })
            .await
            .unwrap();
        backend.save_to_file(&path).await.unwrap();
    }

    assert!(path.exists());

    // A new store over the loaded backend sees the committed state
    let backend = Arc::new(InMemoryStore::load_from_file(&path).await.unwrap());
    let store = store_on(&backend, "reader").await;
    let title = store
        .transact(|txn| Ok(txn.get(txn.root(), "title")?))
        .await
        .unwrap();
    assert_eq!(title, Value::from("saved"));
    assert!(backend.get(&ObjectId::ROOT.to_hex()).await.is_some());
}

#[tokio::test]
async fn test_load_missing_file_gives_empty_store() {
    let dir = tempdir().unwrap();
    let store = InMemoryStore::load_from_file(dir.path().join("absent.json"))
        .await
        .unwrap();
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_load_rejects_corrupt_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("corrupt.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = InMemoryStore::load_from_file(&path).await.unwrap_err();
    assert!(err.is_io_error());
}

#[tokio::test]
async fn test_load_rejects_unknown_version() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("future.json");
    std::fs::write(&path, r#"{"_v": 9, "documents": []}"#).unwrap();

    assert!(InMemoryStore::load_from_file(&path).await.is_err());
    // The trait object is still usable for a fresh store
    let fresh: Arc<dyn DocumentStore> = Arc::new(InMemoryStore::new());
    assert!(fresh.as_any().is::<InMemoryStore>());
}
