use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

/// A domain entity as the engine sees it: a JSON document keyed by field name.
///
/// Typed models convert in and out through serde with [`Record::from_model`]
/// and [`Record::to_model`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Returns the field value, treating a missing field as `null`.
    pub fn value(&self, field: &str) -> Value {
        self.0.get(field).cloned().unwrap_or(Value::Null)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.set(field, value);
        self
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Copies only the listed fields, skipping those the record does not carry.
    pub fn project<'a, I>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut projected = Map::new();
        for field in fields {
            if let Some(value) = self.0.get(field) {
                projected.insert(field.to_string(), value.clone());
            }
        }
        Self(projected)
    }

    pub fn from_model<T: Serialize>(model: &T) -> Result<Self, serde_json::Error> {
        match serde_json::to_value(model)? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(serde::ser::Error::custom(format!(
                "expected a JSON object for an entity, found {other}"
            ))),
        }
    }

    pub fn to_model<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.0.clone()))
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Object(record.0)
    }
}

impl TryFrom<Value> for Record {
    type Error = Value;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}
