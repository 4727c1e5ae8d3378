//! Reading sets: the field-name → value maps assembled between `BEGIN`/`END`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single numeric sensor value as it arrived on the serial link.
///
/// The peripheral prints integers and decimals without any type marker; a
/// value is a float exactly when its text contained a decimal point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            // `{:?}` keeps the trailing `.0` so the value re-parses as a float.
            Self::Float(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

/// One finalized block of readings.
///
/// The field set is open: whatever keys appeared between the markers, plus
/// the locally injected temperature. Keys are kept sorted so log lines and
/// line-protocol output are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReadingSet {
    fields: BTreeMap<String, FieldValue>,
}

impl ReadingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a field. Returns the previous value, if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Option<FieldValue> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<FieldValue> {
        self.fields.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for ReadingSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (k, v) in iter {
            set.insert(k, v);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_display_keeps_decimal_point() {
        assert_eq!(FieldValue::Float(7.0).to_string(), "7.0");
        assert_eq!(FieldValue::Float(7.5).to_string(), "7.5");
        assert_eq!(FieldValue::Int(7).to_string(), "7");
    }

    #[test]
    fn test_serializes_as_plain_json_object() {
        let set: ReadingSet = [("pm1", FieldValue::Int(12)), ("pm2", FieldValue::Float(7.5))]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"{"pm1":12,"pm2":7.5}"#);
    }

    #[test]
    fn test_insert_overwrites() {
        let mut set = ReadingSet::new();
        assert!(set.insert("lux", 1i64).is_none());
        assert_eq!(set.insert("lux", 2.5f64), Some(FieldValue::Int(1)));
        assert_eq!(set.get("lux"), Some(FieldValue::Float(2.5)));
        assert_eq!(set.len(), 1);
    }
}
