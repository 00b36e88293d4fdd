use async_trait::async_trait;
use schemars::gen::SchemaSettings;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info};

/// Message that'll be sent in Completions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// System prompt
    Preamble(String),
    /// Message sent by the user
    User(String),
    /// Response from the assistant
    Assistant(String),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

impl TokenUsage {
    /// Adds `usage` onto the running totals. Counts the provider didn't report stay untouched.
    pub fn accumulate(&mut self, usage: &TokenUsage) {
        self.prompt_tokens = combine_options(self.prompt_tokens, usage.prompt_tokens);
        self.completion_tokens = combine_options(self.completion_tokens, usage.completion_tokens);
        self.total_tokens = combine_options(self.total_tokens, usage.total_tokens);
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error("Provider error -> HTTP Status {0}: {1}")]
    ProviderError(u16, String),
    #[error("RequestError: {0}")]
    RequestError(String),
    #[error("ParseError: {0}")]
    ParseError(String),
    #[error("Invalid model config: {0}")]
    InvalidConfig(String),
    #[error("Failed to fetch env var `{0}`")]
    MissingApiKey(String),
}

/// Types the model can be asked to produce directly.
pub trait Extractor: schemars::JsonSchema + serde::de::DeserializeOwned {}

impl<T> Extractor for T where T: schemars::JsonSchema + serde::de::DeserializeOwned {}

/// A named JSON schema the model's reply has to conform to.
///
/// The schema is normalised on construction so providers with a strict
/// structured-output mode accept it as is.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFormat {
    name: String,
    schema: Value,
}

impl ResponseFormat {
    pub fn new(name: impl AsRef<str>, mut schema: Value) -> Self {
        if let Some(obj) = schema.as_object_mut() {
            obj.remove("$schema");
            obj.remove("format");
            obj.remove("title");
        }
        process_json_value(&mut schema);
        Self {
            name: sanitize_name(name.as_ref()),
            schema,
        }
    }

    /// Builds the response format for a `schemars` type, inlining all subschemas.
    pub fn for_extractor<T: schemars::JsonSchema>() -> Result<Self, serde_json::Error> {
        let settings = SchemaSettings::default().with(|s| {
            s.inline_subschemas = true;
        });
        let generator = settings.into_generator();
        let schema = generator.into_root_schema_for::<T>();
        let schema_value = serde_json::to_value(&schema)?;
        Ok(Self::new(T::schema_name(), schema_value))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn schema(&self) -> &Value {
        &self.schema
    }
}

#[async_trait]
pub trait CompletionModel: Send {
    /// Send the messages to the LLM and get back a JSON value conforming to `format`
    async fn extract_json(
        &mut self,
        format: &ResponseFormat,
        messages: &[Message],
        temperature: f64,
        max_tokens: usize,
    ) -> Result<(Value, TokenUsage), CompletionError>;

    /// Send the messages to the LLM and have the response deserialized to the type you specified
    async fn extract<T: Extractor>(
        &mut self,
        messages: &[Message],
        temperature: f64,
        max_tokens: usize,
    ) -> Result<(T, TokenUsage), CompletionError> {
        let format = ResponseFormat::for_extractor::<T>().map_err(|e| {
            error!(error = ?e, "Failed to serialize extractor");
            CompletionError::ParseError(format!("Failed to serialize extractor: {e}"))
        })?;

        let (value, usage) = self
            .extract_json(&format, messages, temperature, max_tokens)
            .await?;

        let extracted: T = serde_json::from_value(value).map_err(|e| {
            error!(error = ?e, extractor = format.name(), "Failed to deserialize extracted content");
            CompletionError::ParseError(e.to_string())
        })?;

        info!(
            extractor_type = std::any::type_name::<T>(),
            "Successfully extracted data"
        );
        Ok((extracted, usage))
    }
}

pub(crate) fn process_json_value(value: &mut Value) {
    match value {
        Value::Object(obj) => {
            let fields_to_remove = ["$schema", "format", "title", "minimum"];
            for &f in &fields_to_remove {
                if obj.get(f).is_some_and(|v| v.is_string() || v.is_number()) {
                    obj.remove(f);
                }
            }
            if let Some(v) = obj.remove("oneOf") {
                obj.insert("anyOf".to_string(), v);
            };

            if let Some(properties) = obj.get("properties").and_then(Value::as_object) {
                let required: Vec<Value> = properties.keys().cloned().map(Value::String).collect();
                obj.insert("required".to_string(), Value::Array(required));
                obj.insert("additionalProperties".to_string(), json!(false));
            }
            for (_, v) in obj.iter_mut() {
                process_json_value(v);
            }
        }
        Value::Array(arr) => {
            for elem in arr.iter_mut() {
                process_json_value(elem);
            }
        }
        _ => {}
    }
}

/// Providers only accept `[A-Za-z0-9_-]` in schema and tool names
pub(crate) fn sanitize_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if sanitized.is_empty() {
        "ExtractorType".to_string()
    } else {
        sanitized
    }
}

fn combine_options(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a_val), Some(b_val)) => Some(a_val + b_val),
        (Some(v), None) | (None, Some(v)) => Some(v),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;

    #[allow(unused)]
    #[derive(JsonSchema, serde::Deserialize)]
    struct Meeting {
        /// Date of the meeting in YYYY-MM-DD format
        date: String,
        attendees: Vec<Attendee>,
    }

    #[allow(unused)]
    #[derive(JsonSchema, serde::Deserialize)]
    struct Attendee {
        name: String,
        age: Option<u8>,
    }

    #[test]
    fn extractor_format_is_strict_friendly() {
        let format = ResponseFormat::for_extractor::<Meeting>().unwrap();
        assert_eq!(format.name(), "Meeting");

        let schema = format.schema();
        assert!(schema.get("$schema").is_none());
        assert!(schema.get("title").is_none());
        assert_eq!(schema["additionalProperties"], json!(false));
        assert_eq!(
            schema["properties"]["date"]["description"],
            json!("Date of the meeting in YYYY-MM-DD format")
        );

        let attendee = &schema["properties"]["attendees"]["items"];
        assert_eq!(attendee["additionalProperties"], json!(false));
        assert!(attendee["properties"]["age"].get("format").is_none());
        assert!(attendee["properties"]["age"].get("minimum").is_none());
    }

    #[allow(unused)]
    #[derive(JsonSchema, serde::Deserialize)]
    struct Lead {
        company: String,
        contact: Contact,
    }

    #[allow(unused)]
    #[derive(JsonSchema, serde::Deserialize)]
    struct Contact {
        name: String,
        phone: Option<String>,
    }

    #[test]
    fn nested_objects_require_every_property() {
        let format = ResponseFormat::for_extractor::<Lead>().unwrap();
        let schema = format.schema();
        assert_eq!(schema["required"], json!(["company", "contact"]));

        let contact = &schema["properties"]["contact"];
        assert_eq!(contact["required"], json!(["name", "phone"]));
        assert_eq!(contact["additionalProperties"], json!(false));

        let attendee = ResponseFormat::for_extractor::<Meeting>().unwrap();
        assert_eq!(
            attendee.schema()["properties"]["attendees"]["items"]["required"],
            json!(["name", "age"])
        );
    }

    #[test]
    fn one_of_becomes_any_of() {
        let format = ResponseFormat::new(
            "Choice",
            json!({
                "type": "object",
                "properties": {
                    "pick": { "oneOf": [{ "type": "string" }, { "type": "integer" }] }
                }
            }),
        );
        let pick = &format.schema()["properties"]["pick"];
        assert!(pick.get("oneOf").is_none());
        assert_eq!(pick["anyOf"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize_name("Partial Task<String>"), "PartialTaskString");
        assert_eq!(sanitize_name("due-date_v2"), "due-date_v2");
        assert_eq!(sanitize_name("<>"), "ExtractorType");
    }

    #[test]
    fn token_usage_accumulates_reported_counts() {
        let mut total = TokenUsage::default();
        total.accumulate(&TokenUsage {
            prompt_tokens: Some(10),
            completion_tokens: Some(4),
            total_tokens: Some(14),
        });
        total.accumulate(&TokenUsage {
            prompt_tokens: Some(3),
            completion_tokens: None,
            total_tokens: Some(3),
        });
        assert_eq!(
            total,
            TokenUsage {
                prompt_tokens: Some(13),
                completion_tokens: Some(4),
                total_tokens: Some(17),
            }
        );
    }
}
