use super::super::*;

#[test]
fn byte_vec_decode_rejects_length_over_max_byte_len() {
    let mut buf = Vec::new();
    (MAX_BYTE_LEN + 1).encode_to(&mut buf).unwrap();
    let err = Vec::<u8>::decode_from(&buf).unwrap_err();
    assert!(matches!(err, EncodingError::LengthOverflow(_)));
}

#[test]
fn string_decode_rejects_length_over_max_byte_len() {
    let mut buf = Vec::new();
    (MAX_BYTE_LEN + 1).encode_to(&mut buf).unwrap();
    let err = String::decode_from(&buf).unwrap_err();
    assert!(matches!(err, EncodingError::LengthOverflow(_)));
}

#[test]
fn path_buf_decode_rejects_length_over_max_byte_len() {
    let mut buf = Vec::new();
    (MAX_BYTE_LEN + 1).encode_to(&mut buf).unwrap();
    let err = std::path::PathBuf::decode_from(&buf).unwrap_err();
    assert!(matches!(err, EncodingError::LengthOverflow(_)));
}

#[test]
fn decode_vec_rejects_count_over_max_vec_elements() {
    let mut buf = Vec::new();
    (MAX_VEC_ELEMENTS + 1).encode_to(&mut buf).unwrap();
    let err = decode_vec::<u32>(&buf).unwrap_err();
    assert!(matches!(err, EncodingError::LengthOverflow(_)));
}

#[test]
fn byte_vec_decode_rejects_truncated_data() {
    let mut buf = Vec::new();
    10u32.encode_to(&mut buf).unwrap();
    buf.extend_from_slice(&[1, 2, 3]);
    let err = Vec::<u8>::decode_from(&buf).unwrap_err();
    assert!(matches!(err, EncodingError::UnexpectedEof { .. }));
}

#[test]
fn option_decode_rejects_invalid_tag() {
    let err = Option::<u32>::decode_from(&[2, 0, 0, 0, 0]).unwrap_err();
    assert!(matches!(err, EncodingError::InvalidTag { tag: 2, .. }));
}

#[test]
fn len_to_u32_rejects_lengths_over_u32_max() {
    let err = super::super::len_to_u32((u32::MAX as usize) + 1).unwrap_err();
    assert!(matches!(err, EncodingError::LengthOverflow(_)));
    assert!(super::super::len_to_u32(u32::MAX as usize).is_ok());
}
