pub mod relax;

pub use relax::{relax, MandatoryFields, RelaxedSchema};

use schemars::gen::SchemaSettings;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::completion::sanitize_name;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Malformed schema: {0}")]
    Malformed(String),
    #[error("Failed to reflect schema: {0}")]
    Reflection(String),
}

/// A single named field of a [`Schema`].
///
/// The declared type is kept as a JSON Schema fragment, so anything the
/// provider understands can be described, including nested objects.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    description: Option<String>,
    type_schema: Value,
    default: Option<Value>,
    nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, type_schema: Value) -> Self {
        let nullable = admits_null(&type_schema);
        Self {
            name: name.into(),
            description: None,
            type_schema,
            default: None,
            nullable,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn type_schema(&self) -> &Value {
        &self.type_schema
    }

    #[must_use]
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Whether the declared type itself admits `null`.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Checks `value` against the declared JSON type(s).
    ///
    /// Only the top level `type` keyword (and `anyOf`/`oneOf` branches) is
    /// checked; fields without one accept any non-null value.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        if value.is_null() {
            return self.nullable;
        }
        type_matches(&self.type_schema, value)
    }

    /// Turns an integral float such as `30.0` into an integer when the
    /// field only takes integers.
    pub(crate) fn normalize(&self, value: Value) -> Value {
        let integral = match value.as_f64() {
            Some(f) if !value.is_i64() && !value.is_u64() && f.fract() == 0.0 => f,
            _ => return value,
        };
        if self.accepts(&json!(0.5)) {
            return value;
        }
        if integral >= 0.0 {
            json!(integral as u64)
        } else {
            json!(integral as i64)
        }
    }

    pub(crate) fn into_nullable(self) -> Self {
        Self {
            type_schema: make_nullable(&self.type_schema),
            default: Some(Value::Null),
            nullable: true,
            ..self
        }
    }

    pub(crate) fn to_property(&self) -> Value {
        let mut property = self.type_schema.clone();
        if let (Some(obj), Some(description)) = (property.as_object_mut(), &self.description) {
            obj.insert("description".to_string(), json!(description));
        }
        property
    }
}

/// An ordered set of named, typed fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    name: String,
    description: Option<String>,
    fields: Vec<Field>,
}

impl Schema {
    pub fn builder(name: impl AsRef<str>) -> SchemaBuilder {
        SchemaBuilder {
            name: sanitize_name(name.as_ref()),
            description: None,
            fields: Vec::new(),
        }
    }

    /// Reflects a `schemars` type. Fields keep their declaration order and
    /// doc comments become field descriptions.
    pub fn from_extractor<T: schemars::JsonSchema>() -> Result<Self, SchemaError> {
        let settings = SchemaSettings::default().with(|s| {
            s.inline_subschemas = true;
        });
        let generator = settings.into_generator();
        let root = generator.into_root_schema_for::<T>();
        let value =
            serde_json::to_value(&root).map_err(|e| SchemaError::Reflection(e.to_string()))?;
        Self::from_json_schema(T::schema_name(), &value)
    }

    /// Reads an object schema with a `properties` map.
    pub fn from_json_schema(name: impl AsRef<str>, schema: &Value) -> Result<Self, SchemaError> {
        let root = schema
            .as_object()
            .ok_or_else(|| SchemaError::Malformed("schema root must be a JSON object".into()))?;

        match root.get("type") {
            None => {}
            Some(Value::String(t)) if t == "object" => {}
            Some(other) => {
                return Err(SchemaError::Malformed(format!(
                    "expected an object schema, found type {other}"
                )))
            }
        }

        let properties = root
            .get("properties")
            .and_then(Value::as_object)
            .ok_or_else(|| SchemaError::Malformed("schema has no `properties` map".into()))?;

        let mut builder = Self::builder(name);
        if let Some(description) = root.get("description").and_then(Value::as_str) {
            builder = builder.description(description);
        }
        for (name, property) in properties {
            builder = builder.field(field_from_property(name, property)?);
        }
        builder.build()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

pub struct SchemaBuilder {
    name: String,
    description: Option<String>,
    fields: Vec<Field>,
}

impl SchemaBuilder {
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        for (i, field) in self.fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(SchemaError::Malformed("field names can't be empty".into()));
            }
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(SchemaError::Malformed(format!(
                    "duplicate field `{}`",
                    field.name
                )));
            }
        }
        Ok(Schema {
            name: self.name,
            description: self.description,
            fields: self.fields,
        })
    }
}

fn field_from_property(name: &str, property: &Value) -> Result<Field, SchemaError> {
    let mut type_schema: Map<String, Value> = match property {
        Value::Object(obj) => obj.clone(),
        Value::Bool(true) => Map::new(),
        _ => {
            return Err(SchemaError::Malformed(format!(
                "property `{name}` is not a schema object"
            )))
        }
    };
    if type_schema.contains_key("$ref") {
        return Err(SchemaError::Malformed(format!(
            "property `{name}` holds an unresolved `$ref`"
        )));
    }

    let description = type_schema
        .remove("description")
        .and_then(|d| d.as_str().map(str::to_owned));
    let default = type_schema.remove("default");

    let mut field = Field::new(name, Value::Object(type_schema));
    if let Some(description) = description {
        field = field.with_description(description);
    }
    if let Some(default) = default {
        field = field.with_default(default);
    }
    Ok(field)
}

fn admits_null(schema: &Value) -> bool {
    let Some(obj) = schema.as_object() else {
        return false;
    };
    if obj.get("nullable").and_then(Value::as_bool) == Some(true) {
        return true;
    }
    match obj.get("type") {
        Some(Value::String(t)) if t == "null" => return true,
        Some(Value::Array(types)) if types.iter().any(|t| t == "null") => return true,
        _ => {}
    }
    subschemas(obj).any(admits_null)
}

fn make_nullable(schema: &Value) -> Value {
    if admits_null(schema) {
        return schema.clone();
    }
    let mut nullable = schema.clone();
    if let Some(obj) = nullable.as_object_mut() {
        let widened = match obj.get_mut("type") {
            Some(ty @ Value::String(_)) => {
                let t = ty.take();
                *ty = json!([t, "null"]);
                true
            }
            Some(Value::Array(types)) => {
                types.push(json!("null"));
                true
            }
            _ => false,
        };
        if widened {
            if let Some(Value::Array(variants)) = obj.get_mut("enum") {
                variants.push(Value::Null);
            }
            return nullable;
        }
    }
    json!({ "anyOf": [schema, { "type": "null" }] })
}

fn type_matches(schema: &Value, value: &Value) -> bool {
    let Some(obj) = schema.as_object() else {
        return schema.as_bool().unwrap_or(true);
    };
    match obj.get("type") {
        Some(Value::String(t)) => json_type_matches(t, value),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| json_type_matches(t, value)),
        _ => {
            let mut branches = subschemas(obj).peekable();
            branches.peek().is_none() || branches.any(|b| type_matches(b, value))
        }
    }
}

fn json_type_matches(json_type: &str, value: &Value) -> bool {
    match json_type {
        "string" => value.is_string(),
        "integer" => {
            value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn subschemas(obj: &Map<String, Value>) -> impl Iterator<Item = &Value> {
    ["anyOf", "oneOf"]
        .into_iter()
        .filter_map(move |k| obj.get(k).and_then(Value::as_array))
        .flatten()
}
