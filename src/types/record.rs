use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value as Json};

use crate::error::{Error, Result};

/// One decoded field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A base-10 integer (optional leading sign).
    Int(i64),
    /// Any other text.
    Text(String),
    /// A bare token without `=`.
    Flag,
    /// A `|`-delimited value, each piece decoded as its own record.
    List(Vec<Record>),
}

impl Value {
    /// Integer payload, if this is [`Value::Int`].
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Text payload, if this is [`Value::Text`].
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Nested records, if this is [`Value::List`].
    #[must_use]
    pub fn as_list(&self) -> Option<&[Record]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    fn to_json(&self) -> Json {
        match self {
            Self::Int(n) => Json::from(*n),
            Self::Text(s) => Json::from(s.as_str()),
            Self::Flag => Json::Null,
            Self::List(items) => Json::Array(items.iter().map(Record::to_json).collect()),
        }
    }
}

/// Generic decode unit: field name to [`Value`].
///
/// Produced by [`crate::decode::decode`]. Keys are unique within one record;
/// a repeated key keeps the last value seen on the line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// An empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(key.into(), value)
    }

    /// Look up a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Integer field.
    #[must_use]
    pub fn int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_int)
    }

    /// Text field.
    #[must_use]
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_text)
    }

    /// Nested list field.
    #[must_use]
    pub fn list(&self, key: &str) -> Option<&[Record]> {
        self.get(key).and_then(Value::as_list)
    }

    /// `true` if `key` is present as a bare flag.
    #[must_use]
    pub fn has_flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some(Value::Flag))
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// `true` if the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// JSON view: ints become numbers, text strings, flags `null`, lists
    /// arrays of objects.
    #[must_use]
    pub fn to_json(&self) -> Json {
        let map: Map<String, Json> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        Json::Object(map)
    }

    /// Deserialize into a typed view.
    ///
    /// Fields not named by `T` are ignored unless `T` denies unknown fields.
    /// The error message carries the failing field path.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        serde_path_to_error::deserialize(self.to_json())
            .map_err(|e| Error::decode(format!("invalid record: {e}")))
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_view_maps_every_value_kind() {
        let mut nested = Record::new();
        nested.insert("clid", Value::Int(7));

        let mut record = Record::new();
        record.insert("id", Value::Int(-3));
        record.insert("name", Value::Text("x".into()));
        record.insert("away", Value::Flag);
        record.insert("entries", Value::List(vec![nested]));

        assert_eq!(
            record.to_json(),
            serde_json::json!({"id": -3, "name": "x", "away": null, "entries": [{"clid": 7}]})
        );
    }

    #[test]
    fn deserialize_reports_field_path() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Typed {
            id: i64,
        }

        let mut record = Record::new();
        record.insert("id", Value::Text("nope".into()));

        let err = record.deserialize::<Typed>().unwrap_err();
        assert!(err.to_string().contains("id"), "{err}");
    }
}
