//! Deterministic value hashing.
//!
//! Every peer must compute bitwise-identical hashes for identical key
//! tuples: `hash % size` decides the home peer, so any divergence silently
//! drops matches. Scalars go through xxh3 with a per-type seed; containers
//! fold element hashes with an order-dependent combiner.

use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::shardlines::values::{JsonObject, JsonValue};

const GOLDEN64: u64 = 0x9e37_79b9_7f4a_7c15;

// Per-type seeds keep scalar domains apart.
const SEED_NULL: u64 = 0xA0;
const SEED_BOOL: u64 = 0xA1;
const SEED_NUMERIC: u64 = 0xA2;
const SEED_DOUBLE: u64 = 0xA3;
const SEED_STRING: u64 = 0xA4;

/// Order-dependent hash combiner: `combine(a, b) != combine(b, a)`.
pub fn combine(seed: u64, component: u64) -> u64 {
    seed ^ component
        .wrapping_add(GOLDEN64)
        .wrapping_add(seed << 6)
        .wrapping_add(seed >> 2)
}

/// Recursive hash of one value.
///
/// `Int` and `UInt` share one numeric domain: `1i64` and `1u64` compare
/// equal, so they must land on the same home peer. A negative `Int` hashes
/// its two's-complement bits, which can only collide with a `UInt` the
/// verifier will reject.
pub fn hash_value(value: &JsonValue) -> u64 {
    match value {
        JsonValue::Null => xxh3_64_with_seed(b"null", SEED_NULL),
        JsonValue::Bool(b) => xxh3_64_with_seed(&[*b as u8], SEED_BOOL),
        JsonValue::Int(v) => xxh3_64_with_seed(&(*v as u64).to_le_bytes(), SEED_NUMERIC),
        JsonValue::UInt(v) => xxh3_64_with_seed(&v.to_le_bytes(), SEED_NUMERIC),
        JsonValue::Double(v) => xxh3_64_with_seed(&v.to_bits().to_le_bytes(), SEED_DOUBLE),
        JsonValue::Str(s) => xxh3_64_with_seed(s.as_bytes(), SEED_STRING),
        JsonValue::Array(elements) => elements
            .iter()
            .fold(0, |seed, element| combine(seed, hash_value(element))),
        JsonValue::Object(obj) => obj.iter().fold(0, |seed, (key, val)| {
            let seed = combine(seed, xxh3_64_with_seed(key.as_bytes(), SEED_STRING));
            combine(seed, hash_value(val))
        }),
    }
}

/// Hash of a record's key-column tuple, folded in column-list order.
///
/// An absent key column contributes `hash(null)`: a record missing a key
/// field and a record carrying an explicit null must meet in the same
/// candidate group, and the verifier treats them as equal too.
pub fn hash_key_tuple(record: &JsonObject, columns: &[String]) -> u64 {
    columns.iter().fold(0, |seed, column| {
        let value = record.get(column).unwrap_or(&JsonValue::Null);
        combine(seed, hash_value(value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(text: &str) -> JsonObject {
        serde_json::from_str(text).unwrap()
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn combine_is_order_dependent() {
        let a = hash_value(&JsonValue::Int(1));
        let b = hash_value(&JsonValue::Int(2));
        assert_ne!(combine(combine(0, a), b), combine(combine(0, b), a));
    }

    #[test]
    fn hashing_is_deterministic() {
        let rec = record(r#"{"k": [1, {"x": "y"}], "s": "abc"}"#);
        let columns = cols(&["k", "s"]);
        assert_eq!(hash_key_tuple(&rec, &columns), hash_key_tuple(&rec, &columns));
    }

    #[test]
    fn equal_int_and_uint_hash_identically() {
        assert_eq!(
            hash_value(&JsonValue::Int(42)),
            hash_value(&JsonValue::UInt(42))
        );
    }

    #[test]
    fn int_and_double_hash_apart() {
        assert_ne!(
            hash_value(&JsonValue::Int(1)),
            hash_value(&JsonValue::Double(1.0))
        );
    }

    #[test]
    fn missing_key_column_hashes_like_explicit_null() {
        let missing = record(r#"{"a": "q"}"#);
        let explicit = record(r#"{"k": null, "a": "other"}"#);
        let columns = cols(&["k"]);
        assert_eq!(
            hash_key_tuple(&missing, &columns),
            hash_key_tuple(&explicit, &columns)
        );
    }

    #[test]
    fn key_tuple_depends_on_column_order() {
        let rec = record(r#"{"a": 1, "b": 2}"#);
        assert_ne!(
            hash_key_tuple(&rec, &cols(&["a", "b"])),
            hash_key_tuple(&rec, &cols(&["b", "a"]))
        );
    }

    #[test]
    fn object_hash_follows_iteration_order() {
        let ab = record(r#"{"o": {"a": 1, "b": 2}}"#);
        let ba = record(r#"{"o": {"b": 2, "a": 1}}"#);
        // Equal as values, but hashed in iteration order.
        assert_eq!(ab, ba);
        let columns = cols(&["o"]);
        assert_ne!(hash_key_tuple(&ab, &columns), hash_key_tuple(&ba, &columns));
    }
}
