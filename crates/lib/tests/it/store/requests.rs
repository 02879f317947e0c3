use std::sync::Arc;

use dsheap::store::StoreError;
use dsheap::{Error, InMemoryStore, ObjectId, Store, Value};

use crate::helpers::{store_on, stored, test_config, test_store};

#[tokio::test]
async fn test_handler_result_is_returned() {
    let (store, _backend) = test_store().await;
    let len = store
        .transact(|txn| {
            let root = txn.root();
            txn.set(root, "a", 1)?;
            txn.set(root, "b", 2)?;
            Ok(txn.len(root)?)
        })
        .await
        .unwrap();
    assert_eq!(len, 2);

    let stats = store.stats().await;
    assert_eq!(stats.requests, 1);
    assert_eq!(stats.commits, 1);
    assert_eq!(stats.cached_objects, 1);
}

#[tokio::test]
async fn test_handler_error_undoes_the_attempt() {
    let (store, backend) = test_store().await;
    store
        .transact(|txn| {
            let root = txn.root();
            txn.set(root, "kept", 1)?;
            Ok(())
        })
        .await
        .unwrap();

    let mut calls = 0;
    let err = store
        .transact(|txn| -> dsheap::Result<()> {
            calls += 1;
            let root = txn.root();
            txn.set(root, "kept", 2)?;
            txn.set(root, "added", true)?;
            Err(Error::handler("insufficient funds"))
        })
        .await
        .unwrap_err();
    assert!(err.is_handler_error());
    assert_eq!(calls, 1);

    // Neither the store nor the cache sees the abandoned writes
    let root = stored(&backend, ObjectId::ROOT).await.unwrap();
    assert_eq!(root.rev, 1);
    let (kept, added) = store
        .transact(|txn| {
            let root = txn.root();
            Ok((txn.get(root, "kept")?, txn.get(root, "added")?))
        })
        .await
        .unwrap();
    assert_eq!(kept, 1.0);
    assert_eq!(added, Value::Undefined);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let backend = Arc::new(InMemoryStore::new());
    let config = test_config("impatient").with_max_attempts(1);
    let impatient = Store::open(backend.clone(), config).await.unwrap();
    let other = store_on(&backend, "other").await;

    let bump = |store: &Store| {
        let store = store.clone();
        async move {
            store
                .transact(|txn| {
                    let root = txn.root();
                    let n = txn.get(root, "n")?.as_f64().unwrap_or(0.0);
                    txn.set(root, "n", n + 1.0)?;
                    Ok(())
                })
                .await
        }
    };

    bump(&impatient).await.unwrap();
    bump(&other).await.unwrap();

    let err = bump(&impatient).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Store(StoreError::RetriesExhausted { attempts: 1 })
    ));

    // The conflict refreshed the cache, so the next request goes through
    bump(&impatient).await.unwrap();
    let root = stored(&backend, ObjectId::ROOT).await.unwrap();
    assert_eq!(root.rev, 3);
}

#[tokio::test]
async fn test_untrackable_field_is_a_structural_error() {
    let (store, backend) = test_store().await;
    let err = store
        .transact(|txn| {
            let root = txn.root();
            txn.set(root, "late", 1)?;
            txn.freeze(root)?;
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(err.is_structural_violation());
    assert_eq!(stored(&backend, ObjectId::ROOT).await.unwrap().rev, 0);

    // The frozen copy with its untracked field was dropped
    let (late, frozen) = store
        .transact(|txn| {
            let root = txn.root();
            Ok((txn.contains(root, "late")?, txn.is_frozen(root)?))
        })
        .await
        .unwrap();
    assert!(!late);
    assert!(!frozen);
}

#[tokio::test]
async fn test_clear_cache_forces_reloads() {
    let (store, _backend) = test_store().await;
    store
        .transact(|txn| {
            let root = txn.root();
            txn.set(root, "x", 1)?;
            Ok(())
        })
        .await
        .unwrap();
    assert!(store.is_cached(ObjectId::ROOT).await);

    store.clear_cache().await;
    let before = store.stats().await;
    assert_eq!(before.cached_objects, 0);
    assert!(before.evictions >= 1);

    let x = store
        .transact(|txn| Ok(txn.get(txn.root(), "x")?))
        .await
        .unwrap();
    assert_eq!(x, 1.0);
    assert_eq!(store.stats().await.reloads, before.reloads + 1);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let backend = Arc::new(InMemoryStore::new());
    let err = Store::open(backend.clone(), test_config("x").with_max_attempts(0))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Store(ref e) if e.is_config_error()));

    // Nothing was created
    assert!(backend.is_empty().await);
}

#[tokio::test]
async fn test_clones_share_the_cache() {
    let (store, _backend) = test_store().await;
    let clone = store.clone();
    clone
        .transact(|txn| {
            let root = txn.root();
            txn.set(root, "shared", true)?;
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(store.stats().await, clone.stats().await);
    assert_eq!(store.config().owner, "primary");
}
