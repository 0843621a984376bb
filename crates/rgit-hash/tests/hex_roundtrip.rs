use proptest::prelude::*;
use rgit_hash::hex::{hex_decode, hex_to_string};
use rgit_hash::ObjectId;

proptest! {
    #[test]
    fn hex_encode_decode_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
        let hex = hex_to_string(&bytes);
        let mut decoded = vec![0u8; bytes.len()];
        hex_decode(hex.as_bytes(), &mut decoded).unwrap();
        prop_assert_eq!(&decoded, &bytes);
    }

    #[test]
    fn hex_is_always_lowercase(bytes in proptest::collection::vec(any::<u8>(), 1..64)) {
        let hex = hex_to_string(&bytes);
        prop_assert!(hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn hex_length_is_double(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
        let hex = hex_to_string(&bytes);
        prop_assert_eq!(hex.len(), bytes.len() * 2);
    }

    #[test]
    fn uppercase_input_decodes_the_same(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        let upper = hex_to_string(&bytes).to_ascii_uppercase();
        let mut decoded = vec![0u8; bytes.len()];
        hex_decode(upper.as_bytes(), &mut decoded).unwrap();
        prop_assert_eq!(&decoded, &bytes);
    }

    #[test]
    fn oid_hex_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 20..=20)) {
        let oid = ObjectId::from_bytes(&bytes).unwrap();
        let hex = oid.to_hex();
        let parsed: ObjectId = hex.parse().unwrap();
        prop_assert_eq!(oid, parsed);
    }

    #[test]
    fn oid_only_null_is_null(bytes in proptest::collection::vec(1u8..=255, 1..=1)) {
        // Any id with at least one nonzero byte is not the null sentinel.
        let mut raw = [0u8; 20];
        raw[7] = bytes[0];
        let oid = ObjectId::from_bytes(&raw).unwrap();
        prop_assert!(!oid.is_null());
    }
}
