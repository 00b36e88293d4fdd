use crate::completion::{CompletionError, CompletionModel, Message, ResponseFormat, TokenUsage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument};

const API_KEY_ENV_VAR: &str = "CHATSTRACT_OPENAI_API_KEY";
const URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct ModelConfig {
    api_key: Option<String>,
    api_url: Option<String>,
    model: Option<String>,
}

/// [`CompletionModel`] backed by the OpenAI Chat Completions API.
///
/// Extraction uses the `json_schema` response format in strict mode.
///
/// # Supported Configuration
///
/// - `model`: model identifier, `gpt-4o-mini` by default
/// - `api_key`: name of the environment variable holding the API key,
///   `CHATSTRACT_OPENAI_API_KEY` by default
/// - `api_url`: custom endpoint, e.g. an OpenAI compatible gateway
///
/// ```rust,no_run
/// use chatstract::providers::completions::OpenAI;
///
/// let model = OpenAI::new(Some(r#"{ "model": "gpt-4o" }"#))?;
/// # Ok::<(), chatstract::completion::CompletionError>(())
/// ```
pub struct OpenAICompletionModel {
    api_key: String,
    api_url: String,
    client: reqwest::Client,
    model: String,
}

impl OpenAICompletionModel {
    /// Reads the optional JSON config and the API key from the environment.
    #[instrument]
    pub fn new(json_config: Option<&str>) -> Result<Self, CompletionError> {
        let (api_key_var, api_url, model) = if let Some(json) = json_config {
            let config = serde_json::from_str::<ModelConfig>(json).map_err(|e| {
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
        Ok(Self::from_parts(api_key, api_url, model))
    }

    #[must_use]
    pub fn from_parts(
        api_key: impl Into<String>,
        api_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: api_url.into(),
            client: reqwest::Client::new(),
            model: model.into(),
        }
    }

    fn request_body(
        &self,
        format: &ResponseFormat,
        messages: &[Message],
        temperature: f64,
        max_tokens: usize,
    ) -> Value {
        let messages: Vec<_> = messages
            .iter()
            .cloned()
            .map(Into::<OpenAIMessage>::into)
            .collect();

        json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": format.name(),
                    "strict": true,
                    "schema": format.schema(),
                }
            },
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Eq, PartialEq)]
#[serde(tag = "role", content = "content")]
#[allow(non_camel_case_types)]
enum OpenAIMessage {
    system(String),
    user(String),
    assistant(String),
}

impl From<Message> for OpenAIMessage {
    fn from(value: Message) -> OpenAIMessage {
        match value {
            Message::Preamble(s) => OpenAIMessage::system(s),
            Message::User(s) => OpenAIMessage::user(s),
            Message::Assistant(s) => OpenAIMessage::assistant(s),
        }
    }
}

#[async_trait]
impl CompletionModel for OpenAICompletionModel {
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
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                error!(error = ?e, "Request failed");
                CompletionError::RequestError(e.to_string())
            })?;

        let status = response.status();
        debug!(%status, "Received extraction response");

        if !status.is_success() {
            let error_msg = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error (failed to read response body)".to_string());

            error!(
                status = %status,
                error = %error_msg,
                "Extraction API returned error"
            );
            return Err(CompletionError::ProviderError(status.into(), error_msg));
        }

        let response_json: Value = response.json().await.map_err(|e| {
            error!(error = ?e, "Failed to parse extraction response JSON");
            CompletionError::ParseError(e.to_string())
        })?;

        let (extracted, token_usage) = parse_extraction(&response_json)?;
        info!(
            prompt_tokens = token_usage.prompt_tokens,
            completion_tokens = token_usage.completion_tokens,
            total_tokens = token_usage.total_tokens,
            "Token usage recorded"
        );
        Ok((extracted, token_usage))
    }
}

fn parse_extraction(response_json: &Value) -> Result<(Value, TokenUsage), CompletionError> {
    let message = &response_json["choices"][0]["message"];
    if let Some(refusal) = message["refusal"].as_str() {
        error!(%refusal, "Model refused the extraction");
        return Err(CompletionError::ParseError(format!(
            "Model refused to answer: {refusal}"
        )));
    }

    let extracted_str = message["content"].as_str().ok_or_else(|| {
        error!("Missing content in extraction response");
        CompletionError::ParseError("Missing content".to_string())
    })?;

    let extracted: Value = serde_json::from_str(extracted_str).map_err(|e| {
        error!(error = ?e, raw_response = %extracted_str, "Failed to deserialize extracted content");
        CompletionError::ParseError(e.to_string())
    })?;

    let usage_response = &response_json["usage"];
    let usage_parse_error =
        CompletionError::ParseError("Failed to parse usage data from response".to_string());
    let token_usage = TokenUsage {
        prompt_tokens: Some(
            usage_response["prompt_tokens"]
                .as_u64()
                .ok_or(usage_parse_error.clone())?,
        ),
        completion_tokens: Some(
            usage_response["completion_tokens"]
                .as_u64()
                .ok_or(usage_parse_error.clone())?,
        ),
        total_tokens: Some(
            usage_response["total_tokens"]
                .as_u64()
                .ok_or(usage_parse_error)?,
        ),
    };
    Ok((extracted, token_usage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{relax, Field, Schema};

    fn task_format() -> ResponseFormat {
        let schema = Schema::builder("Task")
            .field(Field::new("description", json!({ "type": "string" })))
            .field(Field::new("due_date", json!({ "type": ["string", "null"] })))
            .build()
            .unwrap();
        relax(&schema).0.response_format()
    }

    #[test]
    fn request_carries_strict_json_schema() {
        let model = OpenAICompletionModel::from_parts("key", URL, DEFAULT_MODEL);
        let body = model.request_body(
            &task_format(),
            &[
                Message::Preamble("be precise".to_string()),
                Message::User("clean the office".to_string()),
            ],
            0.0,
            100,
        );

        assert_eq!(
            body["messages"],
            json!([
                { "role": "system", "content": "be precise" },
                { "role": "user", "content": "clean the office" }
            ])
        );
        let format = &body["response_format"];
        assert_eq!(format["type"], json!("json_schema"));
        assert_eq!(format["json_schema"]["name"], json!("PartialTask"));
        assert_eq!(format["json_schema"]["strict"], json!(true));
        assert_eq!(
            format["json_schema"]["schema"]["required"],
            json!(["description", "due_date"])
        );
    }

    #[test]
    fn parses_content_and_usage() {
        let response = json!({
            "choices": [{ "message": {
                "role": "assistant",
                "content": "{\"description\":\"clean the office\",\"due_date\":null}",
                "refusal": null
            } }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 8, "total_tokens": 20 }
        });
        let (value, usage) = parse_extraction(&response).unwrap();
        assert_eq!(
            value,
            json!({ "description": "clean the office", "due_date": null })
        );
        assert_eq!(usage.total_tokens, Some(20));
    }

    #[test]
    fn refusals_and_garbage_are_parse_errors() {
        let refusal = json!({
            "choices": [{ "message": { "content": null, "refusal": "I can't help with that" } }],
            "usage": { "prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2 }
        });
        assert!(matches!(
            parse_extraction(&refusal),
            Err(CompletionError::ParseError(e)) if e.contains("refused")
        ));

        let garbage = json!({
            "choices": [{ "message": { "content": "not json" } }],
            "usage": { "prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2 }
        });
        assert!(matches!(
            parse_extraction(&garbage),
            Err(CompletionError::ParseError(_))
        ));
    }

    #[test]
    fn config_rejects_unknown_fields() {
        let result = OpenAICompletionModel::new(Some(r#"{ "temperature": 0.2 }"#));
        assert!(matches!(result, Err(CompletionError::InvalidConfig(_))));
    }

    #[test]
    fn config_reports_missing_api_key() {
        let result = OpenAICompletionModel::new(Some(
            r#"{ "api_key": "CHATSTRACT_TEST_KEY_THAT_IS_NEVER_SET" }"#,
        ));
        assert!(matches!(
            result,
            Err(CompletionError::MissingApiKey(var)) if var == "CHATSTRACT_TEST_KEY_THAT_IS_NEVER_SET"
        ));
    }

    #[tokio::test]
    #[ignore]
    async fn openai_extraction_request() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let mut model = OpenAICompletionModel::new(None).unwrap();
        let (value, usage) = model
            .extract_json(
                &task_format(),
                &[Message::User("John has to clean the office".to_string())],
                0.0,
                200,
            )
            .await
            .unwrap();

        assert!(value["description"].is_string());
        assert!(value["due_date"].is_null());
        assert!(usage.total_tokens.is_some());
    }
}
