//! Extracted records

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

/// One extracted record: field values in extractor registration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    extracted_at: DateTime<Utc>,
    fields: Map<String, Value>,
}

impl Record {
    pub(crate) fn new() -> Self {
        Self::at(Utc::now())
    }

    pub(crate) fn at(extracted_at: DateTime<Utc>) -> Self {
        Self {
            extracted_at,
            fields: Map::new(),
        }
    }

    /// Build a record from already extracted values (fixtures, replays).
    pub fn from_fields(extracted_at: DateTime<Utc>, fields: Map<String, Value>) -> Self {
        Self {
            extracted_at,
            fields,
        }
    }

    pub(crate) fn insert(&mut self, field: &str, value: Value) {
        self.fields.insert(field.to_string(), value);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Field value as a string slice, if it is a JSON string
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn extracted_at(&self) -> DateTime<Utc> {
        self.extracted_at
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Consume into a flat JSON object (`extracted_at` first)
    pub fn into_json(self) -> Value {
        let mut map = Map::with_capacity(self.fields.len() + 1);
        map.insert(
            "extracted_at".to_string(),
            Value::from(self.extracted_at.timestamp()),
        );
        map.extend(self.fields);
        Value::Object(map)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        map.serialize_entry("extracted_at", &self.extracted_at.timestamp())?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}
