use std::collections::BTreeMap;
use std::sync::Arc;

use dsheap::engine::{EngineError, ObjectDoc};
use dsheap::mtx::{MtxError, NewObject, Op, OpRecord};
use dsheap::{Body, CommitOutcome, Draft, Engine, InMemoryStore, Mtx, ObjectId, Value};

use crate::helpers::{FlakyStore, oid, ref_id, store_on, stored, test_config, test_store};

async fn engine_on(backend: Arc<InMemoryStore>) -> Engine {
    let engine = Engine::new(backend, &test_config("engine"));
    engine.prepare().await.unwrap();
    engine
}

fn record(op: Op) -> Option<OpRecord> {
    Some(OpRecord {
        op,
        last_change: None,
    })
}

fn write_root(prop: &str, value: Value) -> Mtx {
    let mut mtx = Mtx::default();
    mtx.readset.insert(ObjectId::ROOT, 0);
    mtx.changeset.push(record(Op::Write {
        owner: ObjectId::ROOT,
        prop: prop.to_string(),
        value,
        previous: None,
    }));
    mtx
}

#[tokio::test]
async fn test_written_objects_move_one_revision_past_the_read() {
    let (store, backend) = test_store().await;
    let list = store
        .transact(|txn| {
            let root = txn.root();
            txn.set(root, "list", Draft::list([1, 2]))?;
            Ok(ref_id(&txn.get(root, "list")?))
        })
        .await
        .unwrap();
    assert_eq!(stored(&backend, ObjectId::ROOT).await.unwrap().rev, 1);
    assert_eq!(stored(&backend, list).await.unwrap().rev, 0);

    // Three writes to the same object in one request bump it once
    store
        .transact(move |txn| {
            txn.push(list, 3)?;
            txn.set_at(list, 0, 10)?;
            txn.shift(list)?;
            Ok(())
        })
        .await
        .unwrap();
    let doc = stored(&backend, list).await.unwrap();
    assert_eq!(doc.rev, 1);
    assert_eq!(doc.body().unwrap(), Body::List(vec![Value::from(2), Value::from(3)]));

    // The root was only read
    assert_eq!(stored(&backend, ObjectId::ROOT).await.unwrap().rev, 1);
}

#[tokio::test]
async fn test_second_commit_on_the_same_read_conflicts() {
    let backend = Arc::new(InMemoryStore::new());
    let engine = engine_on(backend.clone()).await;

    let first = write_root("x", Value::from(1));
    let second = write_root("x", Value::from(2));

    assert!(!engine.commit(&first).await.unwrap().is_conflict());
    match engine.commit(&second).await.unwrap() {
        CommitOutcome::Conflict { ids, updates } => {
            assert_eq!(ids, vec![ObjectId::ROOT]);
            assert_eq!(updates.len(), 1);
            assert_eq!(updates[0].rev, 1);
            assert_eq!(
                updates[0].body().unwrap(),
                Body::Map(vec![("x".to_string(), Value::from(1))])
            );
        }
        other => panic!("expected a conflict, got {other:?}"),
    }

    // Nothing from the losing transaction was written
    let root = stored(&backend, ObjectId::ROOT).await.unwrap();
    assert_eq!(root.rev, 1);
    assert!(!engine.mutex().holder().await.unwrap().unwrap().locked);
}

#[tokio::test]
async fn test_validate_reports_every_stale_entry() {
    let backend = Arc::new(InMemoryStore::new());
    let engine = engine_on(backend.clone()).await;

    let mut readset = BTreeMap::new();
    readset.insert(ObjectId::ROOT, 0);
    assert!(engine.validate(&readset).await.unwrap().is_empty());

    readset.insert(ObjectId::ROOT, 3);
    readset.insert(oid(5), 0);
    let stale = engine.validate(&readset).await.unwrap();
    assert_eq!(stale, vec![ObjectId::ROOT, oid(5)]);
}

#[tokio::test]
async fn test_newset_must_be_ordered() {
    let backend = Arc::new(InMemoryStore::new());
    let engine = engine_on(backend.clone()).await;

    let mut mtx = write_root("parent", Value::Ref(oid(1)));
    mtx.newset.push(NewObject {
        id: oid(1),
        body: Body::List(vec![Value::Ref(oid(2))]),
    });
    mtx.newset.push(NewObject {
        id: oid(2),
        body: Body::List(vec![]),
    });

    let err = engine.commit(&mtx).await.unwrap_err();
    assert!(matches!(
        err,
        dsheap::Error::Mtx(MtxError::ForwardReference { .. })
    ));
    assert!(stored(&backend, oid(1)).await.is_none());
}

#[tokio::test]
async fn test_link_to_a_missing_object_writes_nothing() {
    let backend = Arc::new(InMemoryStore::new());
    let engine = engine_on(backend.clone()).await;

    let mut mtx = write_root("kept", Value::from(1));
    mtx.changeset.push(record(Op::Write {
        owner: ObjectId::ROOT,
        prop: "link".to_string(),
        value: Value::Ref(oid(99)),
        previous: None,
    }));
    let err = engine.commit(&mtx).await.unwrap_err();
    assert!(matches!(
        err,
        dsheap::Error::Engine(EngineError::MissingDocument { .. })
    ));

    let root = stored(&backend, ObjectId::ROOT).await.unwrap();
    assert_eq!(root.rev, 0);
    assert_eq!(root.body().unwrap(), Body::Map(vec![]));
    assert!(!engine.mutex().holder().await.unwrap().unwrap().locked);
}

#[tokio::test]
async fn test_delete_from_the_middle_of_an_array_is_rejected() {
    let backend = Arc::new(InMemoryStore::new());
    let engine = engine_on(backend.clone()).await;
    let store = store_on(&backend, "writer").await;
    let list = store
        .transact(|txn| {
            let root = txn.root();
            txn.set(root, "list", Draft::list([1, 2, 3]))?;
            Ok(ref_id(&txn.get(root, "list")?))
        })
        .await
        .unwrap();

    let mut mtx = Mtx::default();
    mtx.readset.insert(list, 0);
    mtx.changeset.push(record(Op::Delete {
        owner: list,
        prop: "0".to_string(),
    }));
    let err = engine.commit(&mtx).await.unwrap_err();
    assert!(err.is_structural_violation());
    assert!(!engine.mutex().holder().await.unwrap().unwrap().locked);
}

#[tokio::test]
async fn test_sorted_arrays_are_rewritten() {
    let (store, backend) = test_store().await;
    let list = store
        .transact(|txn| {
            let root = txn.root();
            txn.set(root, "names", Draft::list(["c", "a", "b"]))?;
            Ok(ref_id(&txn.get(root, "names")?))
        })
        .await
        .unwrap();

    store
        .transact(move |txn| {
            txn.sort(list)?;
            Ok(())
        })
        .await
        .unwrap();

    let doc = stored(&backend, list).await.unwrap();
    assert_eq!(doc.rev, 1);
    assert_eq!(doc.refs, 1);
    assert_eq!(
        doc.body().unwrap(),
        Body::List(vec![Value::from("a"), Value::from("b"), Value::from("c")])
    );
}

#[tokio::test]
async fn test_store_failure_releases_the_lock() {
    let backend = Arc::new(FlakyStore::new());
    let store = dsheap::Store::open(backend.clone(), test_config("flaky"))
        .await
        .unwrap();

    backend.set_failing(true);
    let err = store
        .transact(|txn| {
            let root = txn.root();
            txn.set(root, "x", 1)?;
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(err.is_store_failure());
    assert!(err.is_io_error());

    let lock = backend.inner.get("mutex").await.unwrap();
    assert_eq!(lock["locked"], serde_json::json!(false));

    // The attempt was undone, so the same request succeeds once the store is back
    backend.set_failing(false);
    store
        .transact(|txn| {
            let root = txn.root();
            txn.set(root, "x", 1)?;
            Ok(())
        })
        .await
        .unwrap();
    let root = ObjectDoc::from_document(backend.inner.get(&ObjectId::ROOT.to_hex()).await.unwrap())
        .unwrap();
    assert_eq!(root.rev, 1);
    assert_eq!(
        root.body().unwrap(),
        Body::Map(vec![("x".to_string(), Value::from(1))])
    );
}

#[tokio::test]
async fn test_reachable_walks_references() {
    let (store, backend) = test_store().await;
    store
        .transact(|txn| {
            let root = txn.root();
            txn.set(root, "a", Draft::map([("b", Draft::list([Draft::empty_map()]))]))?;
            Ok(())
        })
        .await
        .unwrap();

    let engine = Engine::new(backend, &test_config("reader"));
    let docs = engine.reachable(ObjectId::ROOT).await.unwrap();
    assert_eq!(docs.len(), 4);
    assert_eq!(docs[0].id, ObjectId::ROOT);
}
