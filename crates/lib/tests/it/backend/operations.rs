use dsheap::backend::{Document, FieldPath, FindAndModify, Filter, Update};
use dsheap::{DocumentStore, InMemoryStore};
use serde_json::{Value as Json, json};

fn doc(value: Json) -> Document {
    match value {
        Json::Object(map) => map,
        _ => panic!("expected an object"),
    }
}

async fn take(store: &InMemoryStore, owner: &str) -> Option<Document> {
    store
        .find_and_modify(
            &Filter::by_id("mutex").eq("locked", false),
            &Update::new().set("locked", true).set("owner", owner),
            FindAndModify::returning_new(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_compare_and_set_on_a_flag() {
    let store = InMemoryStore::new();
    store
        .insert(doc(json!({"_id": "mutex", "locked": false})))
        .await
        .unwrap();

    let first = take(&store, "a").await.expect("First taker wins");
    assert_eq!(first["owner"], json!("a"));
    assert!(take(&store, "b").await.is_none());

    let holder = store.get("mutex").await.unwrap();
    assert_eq!(holder["owner"], json!("a"));
}

#[tokio::test]
async fn test_find_and_modify_can_return_the_old_document() {
    let store = InMemoryStore::new();
    store.insert(doc(json!({"_id": "x", "_rev": 4}))).await.unwrap();

    let before = store
        .find_and_modify(
            &Filter::by_id("x"),
            &Update::new().inc("_rev", 1),
            FindAndModify::default(),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(before["_rev"], json!(4));
    assert_eq!(store.get("x").await.unwrap()["_rev"], json!(5));
}

#[tokio::test]
async fn test_upsert_builds_from_the_filter() {
    let store = InMemoryStore::new();
    let written = store
        .update(
            &Filter::by_id("counter"),
            &Update::new().inc("n", 2),
            true,
        )
        .await
        .unwrap();
    assert_eq!(written, 1);
    assert_eq!(store.get("counter").await.unwrap(), doc(json!({"_id": "counter", "n": 2})));

    // Without upsert nothing is created
    let written = store
        .update(&Filter::by_id("other"), &Update::new().inc("n", 1), false)
        .await
        .unwrap();
    assert_eq!(written, 0);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_array_operators() {
    let store = InMemoryStore::new();
    store
        .insert(doc(json!({"_id": "list", "_data": ["\"a\"", "\"b\"", "\"c\""]})))
        .await
        .unwrap();

    let update = Update::new()
        .pop_first("_data")
        .pop_last("_data")
        .insert_at("_data", 0, vec![json!("1"), json!("2")])
        .set(FieldPath::field("_data").child("3"), json!("\"z\""));
    store.update(&Filter::by_id("list"), &update, false).await.unwrap();

    assert_eq!(
        store.get("list").await.unwrap()["_data"],
        json!(["1", "2", "\"b\"", "\"z\""])
    );
}

#[tokio::test]
async fn test_count_and_remove_with_conditions() {
    let store = InMemoryStore::new();
    for (id, refs) in [("a", 0), ("b", 1), ("c", 0)] {
        store
            .insert(doc(json!({"_id": id, "_ref": refs})))
            .await
            .unwrap();
    }

    assert_eq!(store.count(&Filter::new().eq("_ref", 0)).await.unwrap(), 2);
    assert_eq!(store.count(&Filter::by_id("b").eq("_ref", 0)).await.unwrap(), 0);

    // A stale condition protects the document
    assert_eq!(store.remove(&Filter::by_id("b").eq("_ref", 0)).await.unwrap(), 0);
    assert_eq!(store.remove(&Filter::by_id("a").eq("_ref", 0)).await.unwrap(), 1);
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn test_projection_limits_fields() {
    let store = InMemoryStore::new();
    store
        .insert(doc(json!({"_id": "x", "_rev": 1, "_data": {"a": "1", "b": "2"}})))
        .await
        .unwrap();

    let projection = [FieldPath::new(["_data", "b"])];
    let found = store
        .find_one(&Filter::by_id("x"), Some(projection.as_slice()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found, doc(json!({"_id": "x", "_data": {"b": "2"}})));
}

#[tokio::test]
async fn test_update_errors_leave_the_document_unchanged() {
    let store = InMemoryStore::new();
    store.insert(doc(json!({"_id": "x", "n": "text"}))).await.unwrap();

    let err = store
        .update(
            &Filter::by_id("x"),
            &Update::new().set("m", 1).inc("n", 1),
            false,
        )
        .await
        .unwrap_err();
    assert!(err.is_store_failure());
    assert_eq!(store.get("x").await.unwrap(), doc(json!({"_id": "x", "n": "text"})));
}

#[tokio::test]
async fn test_downcast_through_the_trait() {
    let store: Box<dyn DocumentStore> = Box::new(InMemoryStore::new());
    assert!(store.as_any().downcast_ref::<InMemoryStore>().is_some());
}
