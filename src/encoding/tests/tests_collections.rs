use super::super::*;

#[test]
fn byte_vec_round_trips() {
    let value = vec![1u8, 2, 3, 4, 5];
    let bytes = encode_to_vec(&value).unwrap();
    let (decoded, consumed) = decode_from_slice::<Vec<u8>>(&bytes).unwrap();
    assert_eq!(decoded, value);
    assert_eq!(consumed, bytes.len());
}

#[test]
fn empty_byte_vec_round_trips() {
    let value: Vec<u8> = Vec::new();
    let bytes = encode_to_vec(&value).unwrap();
    let (decoded, _) = decode_from_slice::<Vec<u8>>(&bytes).unwrap();
    assert_eq!(decoded, value);
}

#[test]
fn byte_slice_encodes_same_as_owned_vec() {
    let owned = vec![9u8, 8, 7];
    let borrowed: &[u8] = &owned;
    let mut buf_owned = Vec::new();
    owned.encode_to(&mut buf_owned).unwrap();
    let mut buf_borrowed = Vec::new();
    borrowed.encode_to(&mut buf_borrowed).unwrap();
    assert_eq!(buf_owned, buf_borrowed);
}

#[test]
fn vec_of_u32_round_trips_via_encode_vec_decode_vec() {
    let items: Vec<u32> = vec![1, 2, 3, 100, u32::MAX];
    let mut buf = Vec::new();
    encode_vec(&items, &mut buf).unwrap();
    let (decoded, consumed) = decode_vec::<u32>(&buf).unwrap();
    assert_eq!(decoded, items);
    assert_eq!(consumed, buf.len());
}

#[test]
fn vec_of_strings_round_trips() {
    let items: Vec<String> = vec!["a".to_string(), "bb".to_string(), "ccc".to_string()];
    let mut buf = Vec::new();
    encode_vec(&items, &mut buf).unwrap();
    let (decoded, _) = decode_vec::<String>(&buf).unwrap();
    assert_eq!(decoded, items);
}

#[test]
fn multiple_values_decode_sequentially_from_one_buffer() {
    let mut buf = Vec::new();
    42u32.encode_to(&mut buf).unwrap();
    "tag".to_string().encode_to(&mut buf).unwrap();
    true.encode_to(&mut buf).unwrap();

    let (n, consumed1) = u32::decode_from(&buf).unwrap();
    assert_eq!(n, 42);
    let (s, consumed2) = String::decode_from(&buf[consumed1..]).unwrap();
    assert_eq!(s, "tag");
    let (b, consumed3) = bool::decode_from(&buf[consumed1 + consumed2..]).unwrap();
    assert!(b);
    assert_eq!(consumed1 + consumed2 + consumed3, buf.len());
}

#[test]
fn hex_round_trips_arbitrary_bytes() {
    let bytes = vec![0x00, 0xff, 0xde, 0xad, 0xbe, 0xef];
    let hex = to_hex(&bytes);
    assert_eq!(hex, "00ffdeadbeef");
    assert_eq!(from_hex(&hex), bytes);
}

#[test]
fn hex_round_trips_empty_input() {
    assert_eq!(to_hex(&[]), "");
    assert_eq!(from_hex(""), Vec::<u8>::new());
}
