use dsheap::codec::{CodecError, Scanner, decode, decode_all, encode_all};
use dsheap::{ObjectId, Value};

#[test]
fn test_stream_of_every_kind() {
    let id = ObjectId::from_bytes([0xab; 12]);
    let values = vec![
        Value::Undefined,
        Value::Null,
        Value::from(true),
        Value::from(-3),
        Value::from("x, y"),
        Value::Ref(id),
        Value::Number(f64::NEG_INFINITY),
    ];
    let stream = encode_all(&values);
    assert_eq!(decode_all(&stream).unwrap(), values);
}

#[test]
fn test_separators_are_flexible() {
    let values = decode_all("  1,2 ,\n3\t,, 4 ").unwrap();
    assert_eq!(
        values,
        vec![Value::from(1), Value::from(2), Value::from(3), Value::from(4)]
    );
    assert!(decode_all("").unwrap().is_empty());
}

#[test]
fn test_scanner_tracks_position() {
    let mut scanner = Scanner::new("true, \"ab\"");
    assert_eq!(scanner.next_value().unwrap(), Some(Value::from(true)));
    assert_eq!(scanner.position(), 4);
    assert_eq!(scanner.next_value().unwrap(), Some(Value::from("ab")));
    assert_eq!(scanner.position(), 10);
    assert_eq!(scanner.next_value().unwrap(), None);
}

#[test]
fn test_scanner_stops_after_an_error() {
    let mut scanner = Scanner::new("1, oops, 2");
    assert_eq!(scanner.next().unwrap().unwrap(), Value::from(1));
    let err = scanner.next().unwrap().unwrap_err();
    assert_eq!(err.position(), Some(3));
    assert!(scanner.next().is_none());
}

#[test]
fn test_error_positions() {
    let err = decode_all("1, \"unterminated").unwrap_err();
    assert!(matches!(err, CodecError::UnterminatedString { position: 3 }));

    let err = decode("truex").unwrap_err();
    assert!(matches!(err, CodecError::UnexpectedToken { position: 0, .. }));

    let err = decode("@").unwrap_err();
    assert!(matches!(err, CodecError::UnexpectedToken { position: 0, .. }));

    let err = decode("<0000>").unwrap_err();
    assert!(err.is_reference_error());
}
