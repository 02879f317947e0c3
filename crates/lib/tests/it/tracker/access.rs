use dsheap::tracker::TrackerError;
use dsheap::{Body, Draft, ObjectId, ObjectKind, Txn, Value};

use crate::helpers::{loaded_heap, oid};

fn map(fields: &[(&str, Value)]) -> Body {
    Body::Map(
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
    )
}

#[test]
fn test_reads_follow_references() {
    let user = oid(1);
    let (mut heap, mut builder) = loaded_heap(vec![
        (ObjectId::ROOT, map(&[("user", Value::Ref(user))])),
        (user, map(&[("name", Value::from("ann"))])),
    ]);

    let mut txn = Txn::new(&mut heap, &mut builder);
    assert_eq!(txn.get_path(&["user", "name"]).unwrap(), "ann");
    assert_eq!(txn.get_path(&["user", "name", "first"]).unwrap(), Value::Undefined);
    assert_eq!(txn.get(ObjectId::ROOT, "missing").unwrap(), Value::Undefined);
    assert_eq!(txn.kind(user).unwrap(), ObjectKind::Object);
    assert_eq!(txn.keys(user).unwrap(), vec!["name".to_string()]);

    // Both objects are dependencies now
    assert_eq!(builder.mtx().readset.len(), 2);
    assert!(builder.mtx().is_read_only());
}

#[test]
fn test_unloaded_reference_names_owner_and_target() {
    let (mut heap, mut builder) = loaded_heap(vec![(
        ObjectId::ROOT,
        map(&[("child", Value::Ref(oid(9)))]),
    )]);

    let mut txn = Txn::new(&mut heap, &mut builder);
    let err = txn.get(ObjectId::ROOT, "child").unwrap_err();
    assert_eq!(err.unresolved(), Some((ObjectId::ROOT, oid(9))));

    // Reading the object itself reports it as its own owner
    let err = txn.len(oid(9)).unwrap_err();
    assert_eq!(err.unresolved(), Some((oid(9), oid(9))));
}

#[test]
fn test_nested_drafts_become_new_objects() {
    let (mut heap, mut builder) = loaded_heap(vec![(ObjectId::ROOT, map(&[]))]);

    let user = {
        let mut txn = Txn::new(&mut heap, &mut builder);
        txn.set(
            ObjectId::ROOT,
            "user",
            Draft::map([
                ("name", Draft::from("ann")),
                ("tags", Draft::list(["admin", "ops"])),
            ]),
        )
        .unwrap();
        let user = txn.get(ObjectId::ROOT, "user").unwrap().as_ref_id().unwrap();
        let tags = txn.get(user, "tags").unwrap().as_ref_id().unwrap();
        assert_eq!(txn.get_at(tags, 1).unwrap(), "ops");
        user
    };

    builder.collect(&mut heap).unwrap();
    let mtx = builder.finish().unwrap();

    // Children are listed before the objects linking to them
    assert_eq!(mtx.newset.len(), 2);
    assert_eq!(mtx.newset[0].body.kind(), ObjectKind::Array);
    assert_eq!(mtx.newset[1].id, user);

    // New objects are not dependencies, and only the root write is an op
    assert_eq!(mtx.readset.keys().collect::<Vec<_>>(), vec![&ObjectId::ROOT]);
    let ops: Vec<_> = mtx.ops().map(|op| op.kind()).collect();
    assert_eq!(ops, vec!["write"]);
}

#[test]
fn test_create_needs_a_map_or_list() {
    let (mut heap, mut builder) = loaded_heap(vec![(ObjectId::ROOT, map(&[]))]);
    let mut txn = Txn::new(&mut heap, &mut builder);

    assert_eq!(txn.create(42).unwrap_err(), TrackerError::NotAnObject);
    let detached = txn.create(Draft::empty_list()).unwrap();
    assert_eq!(txn.len(detached).unwrap(), 0);
}

#[test]
fn test_frozen_objects_reject_writes() {
    let (mut heap, mut builder) = loaded_heap(vec![(
        ObjectId::ROOT,
        map(&[("a", Value::from(1))]),
    )]);
    let mut txn = Txn::new(&mut heap, &mut builder);

    txn.freeze(ObjectId::ROOT).unwrap();
    assert!(txn.is_frozen(ObjectId::ROOT).unwrap());
    assert!(matches!(
        txn.set(ObjectId::ROOT, "a", 2),
        Err(TrackerError::Frozen { .. })
    ));
    assert!(matches!(
        txn.remove(ObjectId::ROOT, "a"),
        Err(TrackerError::Frozen { .. })
    ));
    assert_eq!(txn.get(ObjectId::ROOT, "a").unwrap(), 1.0);
}

#[test]
fn test_array_operations_on_a_map_are_rejected() {
    let (mut heap, mut builder) = loaded_heap(vec![(ObjectId::ROOT, map(&[]))]);
    let mut txn = Txn::new(&mut heap, &mut builder);

    let err = txn.push(ObjectId::ROOT, 1).unwrap_err();
    assert!(matches!(
        err,
        TrackerError::KindMismatch {
            expected: ObjectKind::Array,
            found: ObjectKind::Object,
            ..
        }
    ));
}
