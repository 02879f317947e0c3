use std::collections::HashMap;

use dsheap::codec::ObjectWriter;
use dsheap::{Body, ObjectId, Value};

use crate::helpers::test_store;

#[test]
fn test_shared_children_are_written_at_each_use() {
    let shared = ObjectId::from_bytes([2; 12]);
    let mut objects: HashMap<ObjectId, (u64, Body)> = HashMap::new();
    objects.insert(
        ObjectId::ROOT,
        (
            0,
            Body::List(vec![Value::Ref(shared), Value::Ref(shared)]),
        ),
    );
    objects.insert(shared, (1, Body::Map(vec![("n".to_string(), Value::from(1))])));

    let out = ObjectWriter::new(&objects).write(&ObjectId::ROOT);
    assert_eq!(out, r#"[{"n":1},{"n":1}]"#);
}

#[tokio::test]
async fn test_store_snapshot_includes_revisions() {
    let (store, _backend) = test_store().await;
    let child = store
        .transact(|txn| {
            let root = txn.root();
            txn.set(root, "tags", dsheap::Draft::list(["a", "b"]))?;
            Ok(txn.get(root, "tags")?.as_ref_id().unwrap())
        })
        .await
        .unwrap();

    let snapshot = store.snapshot(ObjectId::ROOT).await.unwrap();
    assert_eq!(
        snapshot,
        format!(
            r#"#{}:1{{"tags":#{}:0["a","b"]}}"#,
            ObjectId::ROOT,
            child
        )
    );
}
