//! Core record value types.
//!
//! This module contains the value model shared by every shard operation:
//! - [`JsonValue`] - the recursive JSON value sum type
//! - [`JsonObject`] - an insertion-ordered field map, the record type
//!
//! Field order is preserved end-to-end: a record written to a segment and
//! read back iterates its fields in the original order. Equality between
//! objects ignores order; only iteration (and therefore hashing) sees it.

use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A single JSON value stored in a shard record.
///
/// Signed and unsigned integers are distinct variants (the segment codec
/// keeps integers above `i64::MAX` unsigned), but values representable in
/// both compare equal across the two variants.
#[derive(Debug, Clone)]
pub enum JsonValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    Str(String),
    Array(Vec<JsonValue>),
    Object(JsonObject),
}

impl JsonValue {
    /// Type tag name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            JsonValue::Null => "null",
            JsonValue::Bool(_) => "bool",
            JsonValue::Int(_) => "int",
            JsonValue::UInt(_) => "uint",
            JsonValue::Double(_) => "double",
            JsonValue::Str(_) => "string",
            JsonValue::Array(_) => "array",
            JsonValue::Object(_) => "object",
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, JsonValue::Object(_))
    }

    pub fn as_object(&self) -> Option<&JsonObject> {
        match self {
            JsonValue::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

impl PartialEq for JsonValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (JsonValue::Null, JsonValue::Null) => true,
            (JsonValue::Bool(a), JsonValue::Bool(b)) => a == b,
            (JsonValue::Int(a), JsonValue::Int(b)) => a == b,
            (JsonValue::UInt(a), JsonValue::UInt(b)) => a == b,
            // Cross-signedness: equal only when the value fits both.
            (JsonValue::Int(a), JsonValue::UInt(b)) | (JsonValue::UInt(b), JsonValue::Int(a)) => {
                *a >= 0 && *a as u64 == *b
            }
            // Bitwise, as hashed: NaN == NaN, 0.0 != -0.0.
            (JsonValue::Double(a), JsonValue::Double(b)) => a.to_bits() == b.to_bits(),
            (JsonValue::Str(a), JsonValue::Str(b)) => a == b,
            (JsonValue::Array(a), JsonValue::Array(b)) => a == b,
            (JsonValue::Object(a), JsonValue::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for JsonValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(text) => f.write_str(&text),
            Err(_) => Err(fmt::Error),
        }
    }
}

impl From<JsonObject> for JsonValue {
    fn from(obj: JsonObject) -> Self {
        JsonValue::Object(obj)
    }
}

/// An insertion-ordered string-to-value map: the record type.
///
/// `insert` of an existing key replaces the value in place, so field
/// positions are stable across updates. Lookups are linear; records are
/// small and the scan beats hashing for the observed field counts.
#[derive(Debug, Clone, Default)]
pub struct JsonObject {
    entries: Vec<(String, JsonValue)>,
}

impl JsonObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert a field, returning the previous value if the key existed.
    /// Replacement keeps the field's original position.
    pub fn insert(&mut self, key: String, value: JsonValue) -> Option<JsonValue> {
        for (name, slot) in &mut self.entries {
            if *name == key {
                return Some(std::mem::replace(slot, value));
            }
        }
        self.entries.push((key, value));
        None
    }

    /// Iterate fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &JsonValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Ordered projection: keep `columns` in the given order, silently
    /// skipping columns the record does not carry. An empty projection
    /// list selects every field.
    pub fn project(&self, columns: &[String]) -> JsonObject {
        if columns.is_empty() {
            return self.clone();
        }
        let mut projected = JsonObject::with_capacity(columns.len());
        for column in columns {
            if let Some(value) = self.get(column) {
                projected.insert(column.clone(), value.clone());
            }
        }
        projected
    }
}

/// Order-insensitive: same key set, equal values.
impl PartialEq for JsonObject {
    fn eq(&self, other: &Self) -> bool {
        if self.entries.len() != other.entries.len() {
            return false;
        }
        self.entries
            .iter()
            .all(|(key, value)| other.get(key) == Some(value))
    }
}

impl FromIterator<(String, JsonValue)> for JsonObject {
    fn from_iter<I: IntoIterator<Item = (String, JsonValue)>>(iter: I) -> Self {
        let mut obj = JsonObject::new();
        for (key, value) in iter {
            obj.insert(key, value);
        }
        obj
    }
}

impl fmt::Display for JsonObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(text) => f.write_str(&text),
            Err(_) => Err(fmt::Error),
        }
    }
}

impl Serialize for JsonValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            JsonValue::Null => serializer.serialize_unit(),
            JsonValue::Bool(b) => serializer.serialize_bool(*b),
            JsonValue::Int(i) => serializer.serialize_i64(*i),
            JsonValue::UInt(u) => serializer.serialize_u64(*u),
            JsonValue::Double(d) => serializer.serialize_f64(*d),
            JsonValue::Str(s) => serializer.serialize_str(s),
            JsonValue::Array(elements) => {
                let mut seq = serializer.serialize_seq(Some(elements.len()))?;
                for element in elements {
                    seq.serialize_element(element)?;
                }
                seq.end()
            }
            JsonValue::Object(obj) => obj.serialize(serializer),
        }
    }
}

impl Serialize for JsonObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = JsonValue;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a JSON value")
    }

    fn visit_unit<E>(self) -> Result<JsonValue, E> {
        Ok(JsonValue::Null)
    }

    fn visit_bool<E>(self, v: bool) -> Result<JsonValue, E> {
        Ok(JsonValue::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<JsonValue, E> {
        Ok(JsonValue::Int(v))
    }

    fn visit_u64<E>(self, v: u64) -> Result<JsonValue, E> {
        // Positive JSON integers arrive here; stay signed while it fits.
        if v <= i64::MAX as u64 {
            Ok(JsonValue::Int(v as i64))
        } else {
            Ok(JsonValue::UInt(v))
        }
    }

    fn visit_f64<E>(self, v: f64) -> Result<JsonValue, E> {
        Ok(JsonValue::Double(v))
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<JsonValue, E> {
        Ok(JsonValue::Str(v.to_owned()))
    }

    fn visit_string<E>(self, v: String) -> Result<JsonValue, E> {
        Ok(JsonValue::Str(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<JsonValue, A::Error> {
        let mut elements = Vec::new();
        while let Some(element) = seq.next_element()? {
            elements.push(element);
        }
        Ok(JsonValue::Array(elements))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<JsonValue, A::Error> {
        let mut obj = JsonObject::new();
        while let Some((key, value)) = map.next_entry::<String, JsonValue>()? {
            obj.insert(key, value);
        }
        Ok(JsonValue::Object(obj))
    }
}

impl<'de> Deserialize<'de> for JsonValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

impl<'de> Deserialize<'de> for JsonObject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match JsonValue::deserialize(deserializer)? {
            JsonValue::Object(obj) => Ok(obj),
            other => Err(serde::de::Error::custom(format!(
                "expected a JSON object record, found {}",
                other.type_name()
            ))),
        }
    }
}
