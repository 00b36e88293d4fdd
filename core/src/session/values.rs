use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::schema::RelaxedSchema;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValuesError {
    #[error("Extracted values are not a JSON object")]
    NotAnObject,
    #[error("Value for `{field}` does not match its declared type: {value}")]
    TypeMismatch { field: String, value: Value },
    #[error("Field `{0}` is not part of the schema")]
    UnknownField(String),
    #[error("Mandatory fields are still missing: {0:?}")]
    Incomplete(Vec<String>),
    #[error("Failed to deserialize known values: {0}")]
    Deserialize(String),
}

/// The session's current field -> value mapping.
///
/// Holds exactly the relaxed schema's fields, in schema order, with `null`
/// standing in for anything not known yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KnownValues(Map<String, Value>);

impl KnownValues {
    pub(crate) fn unset(schema: &RelaxedSchema) -> Self {
        Self(
            schema
                .fields()
                .iter()
                .map(|f| {
                    let default = f.default_value().cloned().unwrap_or(Value::Null);
                    (f.name().to_string(), default)
                })
                .collect(),
        )
    }

    /// Normalises a model reply: absent fields become `null`, keys outside the schema are dropped.
    pub(crate) fn from_candidate(schema: &RelaxedSchema, raw: Value) -> Result<Self, ValuesError> {
        let Value::Object(mut raw) = raw else {
            return Err(ValuesError::NotAnObject);
        };
        let values = Self::collect(schema, &mut raw)?;
        if !raw.is_empty() {
            debug!(
                ignored = ?raw.keys().collect::<Vec<_>>(),
                "Dropping extracted keys outside the schema"
            );
        }
        Ok(values)
    }

    /// Like [`KnownValues::from_candidate`] but keys outside the schema are an error.
    pub(crate) fn from_existing(
        schema: &RelaxedSchema,
        mut values: Map<String, Value>,
    ) -> Result<Self, ValuesError> {
        if let Some(unknown) = values.keys().find(|k| schema.field(k).is_none()) {
            return Err(ValuesError::UnknownField(unknown.clone()));
        }
        Self::collect(schema, &mut values)
    }

    fn collect(schema: &RelaxedSchema, raw: &mut Map<String, Value>) -> Result<Self, ValuesError> {
        let mut values = Map::new();
        for field in schema.fields() {
            let value = field.normalize(raw.remove(field.name()).unwrap_or(Value::Null));
            if !field.accepts(&value) {
                return Err(ValuesError::TypeMismatch {
                    field: field.name().to_string(),
                    value,
                });
            }
            values.insert(field.name().to_string(), value);
        }
        Ok(Self(values))
    }

    /// Takes every non-null value of `candidate`. Values already known are
    /// never replaced by `null`.
    pub(crate) fn merge(&mut self, mut candidate: KnownValues) {
        for (field, current) in &mut self.0 {
            match candidate.0.remove(field) {
                Some(Value::Null) | None => {}
                Some(new) => *current = new,
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.0.values_mut().for_each(|v| *v = Value::Null);
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Whether `field` holds a non-null value.
    #[must_use]
    pub fn is_set(&self, field: &str) -> bool {
        self.0.get(field).is_some_and(|v| !v.is_null())
    }

    /// Nothing has been learned yet.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.values().all(Value::is_null)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<KnownValues> for Map<String, Value> {
    fn from(values: KnownValues) -> Self {
        values.0
    }
}
