use std::sync::Arc;
use std::time::Duration;

use dsheap::engine::DistributedMutex;
use dsheap::{Draft, InMemoryStore, ObjectId, Store, Value};

use crate::helpers::{ref_id, store_on, stored, test_config};

async fn increment(store: &Store) {
    store
        .transact(|txn| {
            let root = txn.root();
            let n = txn.get(root, "counter")?.as_f64().unwrap_or(0.0);
            txn.set(root, "counter", n + 1.0)?;
            Ok(())
        })
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_increments_are_not_lost() {
    let backend = Arc::new(InMemoryStore::new());
    let a = store_on(&backend, "a").await;
    let b = store_on(&backend, "b").await;

    let run = |store: Store| {
        tokio::spawn(async move {
            for _ in 0..10 {
                increment(&store).await;
            }
            store
        })
    };
    let (a, b) = tokio::join!(run(a), run(b));
    let (a, b) = (a.unwrap(), b.unwrap());

    let reader = store_on(&backend, "reader").await;
    let total = reader
        .transact(|txn| Ok(txn.get(txn.root(), "counter")?))
        .await
        .unwrap();
    assert_eq!(total, 20.0);

    // Each conflict cost exactly one extra handler run
    let (sa, sb) = (a.stats().await, b.stats().await);
    assert_eq!(sa.commits + sb.commits, 20);
    assert_eq!(sa.retries + sb.retries, sa.conflicts + sb.conflicts);
}

#[tokio::test]
async fn test_stale_cache_is_refreshed_after_a_conflict() {
    let backend = Arc::new(InMemoryStore::new());
    let a = store_on(&backend, "a").await;
    let b = store_on(&backend, "b").await;

    increment(&a).await;
    increment(&b).await;
    // a still caches the root at the revision before b's write
    increment(&a).await;

    let stats = a.stats().await;
    assert_eq!(stats.conflicts, 1);
    assert_eq!(stats.retries, 1);
    let total = b
        .transact(|txn| Ok(txn.get(txn.root(), "counter")?))
        .await
        .unwrap();
    // Reads are served from b's cache without validation
    assert_eq!(total, 2.0);

    let fresh = store_on(&backend, "c").await;
    let total = fresh
        .transact(|txn| Ok(txn.get(txn.root(), "counter")?))
        .await
        .unwrap();
    assert_eq!(total, 3.0);
}

#[tokio::test]
async fn test_read_only_requests_skip_the_lock() {
    let backend = Arc::new(InMemoryStore::new());
    let store = store_on(&backend, "reader").await;

    let other = DistributedMutex::new(backend.clone(), &test_config("other"));
    let token = other.acquire().await.unwrap();

    let read = tokio::time::timeout(
        Duration::from_secs(5),
        store.transact(|txn| Ok(txn.len(txn.root())?)),
    )
    .await
    .expect("Read-only request waited for the lock")
    .unwrap();
    assert_eq!(read, 0);

    other.release(&token).await.unwrap();
}

#[tokio::test]
async fn test_missing_reference_is_loaded_and_retried() {
    let backend = Arc::new(InMemoryStore::new());
    let writer = store_on(&backend, "writer").await;
    let profile = writer
        .transact(|txn| {
            let root = txn.root();
            txn.set(root, "profile", Draft::map([("name", "ann")]))?;
            Ok(ref_id(&txn.get(root, "profile")?))
        })
        .await
        .unwrap();

    let reader = store_on(&backend, "reader").await;
    let mut calls = 0;
    let name = reader
        .transact(|txn| {
            calls += 1;
            Ok(txn.get_path(&["profile", "name"])?)
        })
        .await
        .unwrap();

    assert_eq!(name, "ann");
    assert_eq!(calls, 2);
    assert!(reader.is_cached(profile).await);
    let stats = reader.stats().await;
    assert_eq!(stats.reloads, 2);
    assert_eq!(stats.retries, 1);
    assert_eq!(stats.commits, 0);
}

#[tokio::test]
async fn test_reference_to_a_removed_object_reloads_its_owner() {
    let backend = Arc::new(InMemoryStore::new());
    let writer = store_on(&backend, "writer").await;
    writer
        .transact(|txn| {
            let root = txn.root();
            txn.set(root, "item", Draft::map([("n", 1)]))?;
            Ok(())
        })
        .await
        .unwrap();

    // The reader caches the root but not the item
    let reader = store_on(&backend, "reader").await;
    reader
        .transact(|txn| Ok(txn.len(txn.root())?))
        .await
        .unwrap();

    writer
        .transact(|txn| {
            let root = txn.root();
            txn.remove(root, "item")?;
            Ok(())
        })
        .await
        .unwrap();

    let item = reader
        .transact(|txn| Ok(txn.get(txn.root(), "item")?))
        .await
        .unwrap();
    assert_eq!(item, Value::Undefined);
    assert!(reader.is_cached(ObjectId::ROOT).await);
}

#[tokio::test]
async fn test_link_to_a_collected_object_is_rejected() {
    let backend = Arc::new(InMemoryStore::new());
    let writer = store_on(&backend, "writer").await;
    writer
        .transact(|txn| {
            let root = txn.root();
            txn.set(root, "p", Draft::map([("b", Draft::map([("n", 1)]))]))?;
            Ok(())
        })
        .await
        .unwrap();

    let linker = store_on(&backend, "linker").await;
    let b = linker
        .transact(|txn| {
            let root = txn.root();
            let p = ref_id(&txn.get(root, "p")?);
            Ok(ref_id(&txn.get(p, "b")?))
        })
        .await
        .unwrap();
    assert!(linker.is_cached(b).await);

    writer
        .transact(|txn| {
            let p = ref_id(&txn.get(txn.root(), "p")?);
            txn.remove(p, "b")?;
            Ok(())
        })
        .await
        .unwrap();
    assert!(stored(&backend, b).await.is_none());

    // The linker still caches b, so only validation can catch the removal
    let err = linker
        .transact(|txn| {
            let root = txn.root();
            txn.set(root, "c", Value::Ref(b))?;
            Ok(())
        })
        .await
        .unwrap_err();
    assert_eq!(err.unresolved_reference(), Some((ObjectId::ROOT, b)));

    let root = stored(&backend, ObjectId::ROOT).await.unwrap();
    assert!(!root.references().contains(&b));
    let reader = store_on(&backend, "reader").await;
    let c = reader
        .transact(|txn| Ok(txn.get(txn.root(), "c")?))
        .await
        .unwrap();
    assert_eq!(c, Value::Undefined);
}
