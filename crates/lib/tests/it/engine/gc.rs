use dsheap::{Draft, ObjectId};

use crate::helpers::{object_count, ref_id, stored, test_store};

#[tokio::test]
async fn test_dropping_an_edge_collects_the_subtree() {
    let (store, backend) = test_store().await;
    let (a, b, c) = store
        .transact(|txn| {
            let root = txn.root();
            txn.set(
                root,
                "a",
                Draft::map([("b", Draft::map([("c", Draft::empty_list())]))]),
            )?;
            let a = ref_id(&txn.get(root, "a")?);
            let b = ref_id(&txn.get(a, "b")?);
            let c = ref_id(&txn.get(b, "c")?);
            Ok((a, b, c))
        })
        .await
        .unwrap();

    assert_eq!(object_count(&backend).await, 4);
    for id in [a, b, c] {
        assert_eq!(stored(&backend, id).await.unwrap().refs, 1);
    }

    store
        .transact(|txn| {
            let root = txn.root();
            txn.remove(root, "a")?;
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(object_count(&backend).await, 1);
    for id in [a, b, c] {
        assert!(stored(&backend, id).await.is_none());
        assert!(!store.is_cached(id).await);
    }
}

#[tokio::test]
async fn test_shared_objects_live_while_referenced() {
    let (store, backend) = test_store().await;
    let shared = store
        .transact(|txn| {
            let root = txn.root();
            txn.set(root, "x", Draft::map([("n", 1)]))?;
            let shared = txn.get(root, "x")?;
            txn.set(root, "y", shared.clone())?;
            Ok(ref_id(&shared))
        })
        .await
        .unwrap();
    assert_eq!(stored(&backend, shared).await.unwrap().refs, 2);

    store
        .transact(|txn| {
            let root = txn.root();
            txn.remove(root, "x")?;
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(stored(&backend, shared).await.unwrap().refs, 1);

    // Overwriting the last reference releases it
    store
        .transact(|txn| {
            let root = txn.root();
            txn.set(root, "y", "gone")?;
            Ok(())
        })
        .await
        .unwrap();
    assert!(stored(&backend, shared).await.is_none());
}

#[tokio::test]
async fn test_unreferenced_new_objects_are_collected() {
    let (store, backend) = test_store().await;
    let detached = store
        .transact(|txn| Ok(txn.create(Draft::map([("tmp", true)]))?))
        .await
        .unwrap();

    assert!(stored(&backend, detached).await.is_none());
    assert_eq!(object_count(&backend).await, 1);
}

#[tokio::test]
async fn test_cycles_are_not_collected() {
    let (store, backend) = test_store().await;
    let node = store
        .transact(|txn| {
            let root = txn.root();
            txn.set(root, "node", Draft::empty_map())?;
            Ok(ref_id(&txn.get(root, "node")?))
        })
        .await
        .unwrap();

    store
        .transact(move |txn| {
            txn.set(node, "me", node)?;
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(stored(&backend, node).await.unwrap().refs, 2);

    store
        .transact(|txn| {
            let root = txn.root();
            txn.remove(root, "node")?;
            Ok(())
        })
        .await
        .unwrap();

    // The self reference keeps it alive
    let doc = stored(&backend, node).await.unwrap();
    assert_eq!(doc.refs, 1);
    assert_eq!(object_count(&backend).await, 2);
    assert!(stored(&backend, ObjectId::ROOT).await.is_some());
}
