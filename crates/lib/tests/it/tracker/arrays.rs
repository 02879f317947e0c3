use dsheap::mtx::Op;
use dsheap::tracker::TrackerError;
use dsheap::{Body, Draft, ObjectId, Txn, Value};

use crate::helpers::{loaded_heap, oid};

fn list_root(items: &[i32]) -> (dsheap::heap::Heap, dsheap::mtx::MtxBuilder, ObjectId) {
    let list = oid(1);
    let (heap, builder) = loaded_heap(vec![
        (
            ObjectId::ROOT,
            Body::Map(vec![("items".to_string(), Value::Ref(list))]),
        ),
        (list, Body::List(items.iter().map(|n| Value::from(*n)).collect())),
    ]);
    (heap, builder, list)
}

#[test]
fn test_shift_then_push_records_edge_ops() {
    let (mut heap, mut builder, list) = list_root(&[1, 2, 3]);
    {
        let mut txn = Txn::new(&mut heap, &mut builder);
        assert_eq!(txn.shift(list).unwrap(), 1.0);
        assert_eq!(txn.push(list, 4).unwrap(), 3);
    }
    builder.collect(&mut heap).unwrap();

    let ops: Vec<&Op> = builder.mtx().ops().collect();
    assert_eq!(ops.len(), 2);
    assert!(matches!(
        ops[0],
        Op::Shift { at: 0, count: 1, len: 3, .. }
    ));
    match ops[1] {
        Op::Write { prop, value, previous, .. } => {
            assert_eq!(prop, "2");
            assert_eq!(*value, 4.0);
            assert!(previous.is_none());
        }
        other => panic!("expected a write, got {other:?}"),
    }
}

#[test]
fn test_unshift_inserts_at_the_front() {
    let (mut heap, mut builder, list) = list_root(&[3]);
    let mut txn = Txn::new(&mut heap, &mut builder);

    let len = txn
        .unshift(list, vec![Draft::from(1), Draft::from(2)])
        .unwrap();
    assert_eq!(len, 3);
    assert_eq!(txn.get_at(list, 0).unwrap(), 1.0);
    assert_eq!(txn.get_at(list, 2).unwrap(), 3.0);
}

#[test]
fn test_pop_records_a_trailing_delete() {
    let (mut heap, mut builder, list) = list_root(&[1, 2, 3]);
    {
        let mut txn = Txn::new(&mut heap, &mut builder);
        assert_eq!(txn.pop(list).unwrap(), 3.0);
        assert_eq!(txn.pop(list).unwrap(), 2.0);
    }
    builder.collect(&mut heap).unwrap();

    // Deletes run from the end so each removes the last item
    let deleted: Vec<String> = builder
        .mtx()
        .ops()
        .filter_map(|op| match op {
            Op::Delete { prop, .. } => Some(prop.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(deleted, vec!["2".to_string(), "1".to_string()]);
}

#[test]
fn test_reorders_become_a_rewrite() {
    let (mut heap, mut builder, list) = list_root(&[3, 1, 2]);
    {
        let mut txn = Txn::new(&mut heap, &mut builder);
        txn.sort_by(list, |a, b| {
            a.as_f64()
                .unwrap_or_default()
                .total_cmp(&b.as_f64().unwrap_or_default())
        })
        .unwrap();
        txn.reverse(list).unwrap();
        assert_eq!(txn.get_at(list, 0).unwrap(), 3.0);
    }
    builder.collect(&mut heap).unwrap();

    let ops: Vec<&Op> = builder.mtx().ops().collect();
    assert_eq!(ops.len(), 1);
    match ops[0] {
        Op::Reinit { body, .. } => assert_eq!(
            body,
            &Body::List(vec![Value::from(3), Value::from(2), Value::from(1)])
        ),
        other => panic!("expected a rewrite, got {other:?}"),
    }
}

#[test]
fn test_middle_splice_becomes_a_rewrite() {
    let (mut heap, mut builder, list) = list_root(&[1, 2, 3, 4]);
    {
        let mut txn = Txn::new(&mut heap, &mut builder);
        let removed = txn.splice(list, 1, 2, vec![Draft::from(9)]).unwrap();
        assert_eq!(removed, vec![Value::from(2), Value::from(3)]);
    }
    builder.collect(&mut heap).unwrap();

    let kinds: Vec<&str> = builder.mtx().ops().map(|op| op.kind()).collect();
    assert_eq!(kinds, vec!["reinit"]);
}

#[test]
fn test_index_writes() {
    let (mut heap, mut builder, list) = list_root(&[1]);
    let mut txn = Txn::new(&mut heap, &mut builder);

    txn.set_at(list, 0, 5).unwrap();
    // Writing past the end pads with undefined
    txn.set_at(list, 3, 7).unwrap();
    assert_eq!(txn.len(list).unwrap(), 4);
    assert_eq!(txn.get_at(list, 1).unwrap(), Value::Undefined);

    let err = txn.set(list, "first", 1).unwrap_err();
    assert!(matches!(err, TrackerError::InvalidIndex { .. }));
}
