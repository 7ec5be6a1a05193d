use std::{borrow::Borrow, fmt};

use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};

/// String form of a numeric server identifier.
///
/// The server is inconsistent about whether ids travel as JSON numbers or
/// strings, so both decode into the same key. Ids are compared as strings
/// only; `"07"` and `"7"` are different ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalId(String);

impl CanonicalId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Numeric form for fields the server expects as integers.
    pub fn as_i64(&self) -> Option<i64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CanonicalId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CanonicalId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CanonicalId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<i64> for CanonicalId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl Serialize for CanonicalId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

struct CanonicalIdVisitor;

impl<'de> Visitor<'de> for CanonicalIdVisitor {
    type Value = CanonicalId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer or string identifier")
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        Ok(CanonicalId(value.to_string()))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        Ok(CanonicalId(value.to_string()))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
        if value.fract() == 0.0 && value.is_finite() {
            Ok(CanonicalId(format!("{value:.0}")))
        } else {
            Err(E::invalid_value(de::Unexpected::Float(value), &self))
        }
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        Ok(CanonicalId(value.to_string()))
    }

    fn visit_string<E: de::Error>(self, value: String) -> Result<Self::Value, E> {
        Ok(CanonicalId(value))
    }
}

impl<'de> Deserialize<'de> for CanonicalId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(CanonicalIdVisitor)
    }
}
