use async_trait::async_trait;
use chatstract::completion::{CompletionError, CompletionModel, Message, ResponseFormat, TokenUsage};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument};

const API_KEY_ENV_VAR: &str = "CHATSTRACT_ANTHROPIC_API_KEY";
const URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-3-7-sonnet-20250219";

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelConfig {
    api_key: Option<String>,
    api_url: Option<String>,
    model: Option<String>,
}

/// Implementation of chatstract's `CompletionModel` trait for [Anthropic](https://anthropic.com).
///
/// The Messages API has no JSON schema response format, so extraction is
/// done through a single tool whose `input_schema` is the requested schema,
/// with `tool_choice` forcing the model to call it. The tool input is the
/// extracted value.
///
/// # Supported Configuration
///
/// The model accepts the following configuration parameters:
///
/// - `model`: String identifier for the model to use
/// - `api_key`: Environment variable name containing the API key
/// - `api_url`: Custom API endpoint URL
///
/// All of them are optional so the config can be left out altogether or parts of it could be specified
///
/// # Examples
///
/// ```rust,no_run
/// use chatstract::session::Session;
/// use chatstract::schema::{Field, Schema};
/// use chatstract_anthropic::AnthropicCompletionModel;
/// use serde_json::json;
///
/// # fn main() -> Result<(), chatstract::error::Error> {
/// let model = AnthropicCompletionModel::new(Some(
///     r#"{ "model": "claude-3-7-sonnet-20250219", "api_key": "ENV_VAR" }"#,
/// ))?;
/// let schema = Schema::builder("User")
///     .field(Field::new("name", json!({ "type": "string" })))
///     .build()?;
/// let session = Session::new(model, &schema);
/// # Ok(())
/// # }
/// ```
pub struct AnthropicCompletionModel {
    api_key: String,
    api_url: String,
    client: reqwest::Client,
    model: String,
}

impl AnthropicCompletionModel {
    /// Creates a new `AnthropicCompletionModel` instance with optional configuration.
    ///
    /// # Errors
    /// - `InvalidConfig` if the JSON is malformed or contains unknown fields
    /// - `MissingApiKey` if the API key environment variable isn't set
    #[instrument]
    pub fn new(config_json: Option<&str>) -> Result<Self, CompletionError> {
        let (api_key_var, api_url, model) = if let Some(json) = config_json {
            let config: ModelConfig = serde_json::from_str(json).map_err(|e| {
                let e = format!("Failed to deserialize json config: {e}");
                error!(e);
                CompletionError::InvalidConfig(e)
            })?;
            (
                config.api_key.unwrap_or(API_KEY_ENV_VAR.to_string()),
                config.api_url.unwrap_or(URL.to_string()),
                config.model.unwrap_or(DEFAULT_MODEL.to_string()),
            )
        } else {
            (
                API_KEY_ENV_VAR.to_string(),
                URL.to_string(),
                DEFAULT_MODEL.to_string(),
            )
        };
        let api_key = std::env::var(&api_key_var).map_err(|e| {
            error!(error = %e, "Failed to fetch env var `{api_key_var}`");
            CompletionError::MissingApiKey(api_key_var.clone())
        })?;
        Ok(Self {
            api_key,
            api_url,
            client: reqwest::Client::new(),
            model,
        })
    }

    fn request_body(
        &self,
        format: &ResponseFormat,
        messages: &[Message],
        temperature: f64,
        max_tokens: usize,
    ) -> Value {
        let (system, messages) = split_system(messages);
        let mut request_body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens,
            "tools": [{
                "name": format.name(),
                "description": "Record the extracted data. The input must follow the schema exactly.",
                "input_schema": format.schema(),
            }],
            "tool_choice": { "type": "tool", "name": format.name() },
        });

        if let (Some(system), Some(obj)) = (system, request_body.as_object_mut()) {
            obj.insert("system".to_string(), Value::String(system));
        }
        request_body
    }
}

#[derive(Serialize, Deserialize, Debug, Eq, PartialEq)]
#[serde(tag = "role", content = "content")]
#[allow(non_camel_case_types)]
pub(crate) enum AnthropicMessage {
    user(String),
    assistant(String),
}

/// Pulls the preambles out into the `system` parameter and folds consecutive
/// messages of the same role together, the API wants them alternating.
fn split_system(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
    let mut system: Vec<&str> = vec![];
    let mut out: Vec<AnthropicMessage> = vec![];
    for message in messages {
        match (message, out.last_mut()) {
            (Message::Preamble(p), _) => system.push(p),
            (Message::User(s), Some(AnthropicMessage::user(prev)))
            | (Message::Assistant(s), Some(AnthropicMessage::assistant(prev))) => {
                prev.push_str("\n\n");
                prev.push_str(s);
            }
            (Message::User(s), _) => out.push(AnthropicMessage::user(s.clone())),
            (Message::Assistant(s), _) => out.push(AnthropicMessage::assistant(s.clone())),
        }
    }
    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, out)
}

#[async_trait]
impl CompletionModel for AnthropicCompletionModel {
    #[instrument(
        skip(self, format, messages, temperature),
        fields(schema = format.name(), message_count = messages.len())
    )]
    async fn extract_json(
        &mut self,
        format: &ResponseFormat,
        messages: &[Message],
        temperature: f64,
        max_tokens: usize,
    ) -> Result<(Value, TokenUsage), CompletionError> {
        let request_body = self.request_body(format, messages, temperature, max_tokens);
        debug!(request_body = ?request_body, "Sending extraction request");

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                error!(error = ?e, "Request failed");
                CompletionError::RequestError(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_msg = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error (failed to read response body)".to_string());

            error!(status = %status, error = %error_msg, "API returned error response");
            return Err(CompletionError::ProviderError(status.into(), error_msg));
        }

        let response_json: Value = response
            .json()
            .await
            .map_err(|e| CompletionError::ParseError(e.to_string()))?;

        let (extracted, token_usage) = parse_tool_input(&response_json, format.name())?;
        info!(
            prompt_tokens = token_usage.prompt_tokens,
            completion_tokens = token_usage.completion_tokens,
            total_tokens = token_usage.total_tokens,
            "Token usage recorded"
        );
        Ok((extracted, token_usage))
    }
}

fn parse_tool_input(
    response_json: &Value,
    tool_name: &str,
) -> Result<(Value, TokenUsage), CompletionError> {
    let input = response_json["content"]
        .as_array()
        .ok_or_else(|| CompletionError::ParseError("Invalid response body".to_string()))?
        .iter()
        .find(|c| c["type"] == "tool_use" && c["name"] == tool_name)
        .map(|c| c["input"].clone())
        .ok_or_else(|| {
            error!(stop_reason = %response_json["stop_reason"], "No tool_use block in response");
            CompletionError::ParseError(format!("Response has no `{tool_name}` tool call"))
        })?;

    let usage_response = &response_json["usage"];
    let usage_parse_error =
        CompletionError::ParseError("Failed to parse usage data from response".to_string());
    let input_tokens = usage_response["input_tokens"]
        .as_u64()
        .ok_or(usage_parse_error.clone())?;
    let output_tokens = usage_response["output_tokens"]
        .as_u64()
        .ok_or(usage_parse_error)?;
    let token_usage = TokenUsage {
        prompt_tokens: Some(input_tokens),
        completion_tokens: Some(output_tokens),
        total_tokens: Some(input_tokens + output_tokens),
    };
    Ok((input, token_usage))
}
