mod prompts;
mod questions;
mod values;

pub use questions::Question;
pub use values::{KnownValues, ValuesError};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use crate::{
    completion::{CompletionModel, TokenUsage},
    error::Error,
    schema::{relax, MandatoryFields, RelaxedSchema, Schema, SchemaError},
};
use questions::FollowUpQuestions;

const DEFAULT_TEMP: f64 = 0.0;
const DEFAULT_TOKENS: usize = 2400;

/// A conversation that fills in a schema one user message at a time.
///
/// Every [`Session::advance`] call makes two model requests, strictly in
/// order: one extracting (or updating) values from the message, then one
/// proposing follow-up questions for whatever mandatory fields are still
/// missing.
pub struct Session<M: CompletionModel> {
    model: M,
    relaxed_schema: RelaxedSchema,
    mandatory_fields: MandatoryFields,
    known_values: KnownValues,

    temperature: f64,
    max_tokens: usize,
    token_usage: TokenUsage,
}

impl<M: CompletionModel> Session<M> {
    pub fn new(model: M, schema: &Schema) -> Self {
        let (relaxed_schema, mandatory_fields) = relax(schema);
        let known_values = KnownValues::unset(&relaxed_schema);
        Self {
            model,
            relaxed_schema,
            mandatory_fields,
            known_values,
            temperature: DEFAULT_TEMP,
            max_tokens: DEFAULT_TOKENS,
            token_usage: TokenUsage::default(),
        }
    }

    /// Builds a session for a `schemars` type, see [`Schema::from_extractor`].
    pub fn for_extractor<T: schemars::JsonSchema>(model: M) -> Result<Self, SchemaError> {
        Ok(Self::new(model, &Schema::from_extractor::<T>()?))
    }

    /// Sampling temperature for every request, `0.0` by default
    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Token limit for every reply, `2400` by default
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Resumes from previously exported values. Fields left out are `null`.
    pub fn with_known_values(
        mut self,
        values: impl Into<Map<String, Value>>,
    ) -> Result<Self, ValuesError> {
        self.known_values = KnownValues::from_existing(&self.relaxed_schema, values.into())?;
        Ok(self)
    }

    /// Feeds one user message into the conversation and returns the
    /// follow-up questions for the mandatory fields that are still missing.
    ///
    /// If the extraction request fails nothing is committed. If the question
    /// request fails the merged values are kept and the error is returned.
    #[instrument(skip(self, message), fields(schema = %self.relaxed_schema.name()))]
    pub async fn advance(&mut self, message: &str) -> Result<Vec<Question>, Error> {
        self.update_known_values(message).await?;
        self.follow_up_questions().await
    }

    async fn update_known_values(&mut self, message: &str) -> Result<(), Error> {
        let format = self.relaxed_schema.response_format();

        if self.known_values.is_blank() {
            let messages = prompts::initial_extraction(message);
            let (raw, usage) = self
                .model
                .extract_json(&format, &messages, self.temperature, self.max_tokens)
                .await?;
            self.record_usage(&usage);
            self.known_values = KnownValues::from_candidate(&self.relaxed_schema, raw)?;
        } else {
            let messages = prompts::update_extraction(&self.known_values, message);
            let (raw, usage) = self
                .model
                .extract_json(&format, &messages, self.temperature, self.max_tokens)
                .await?;
            self.record_usage(&usage);
            let candidate = KnownValues::from_candidate(&self.relaxed_schema, raw)?;
            self.known_values.merge(candidate);
        }

        info!(
            known_values = %self.known_values.to_json(),
            missing = ?self.missing_mandatory(),
            "Known values updated"
        );
        Ok(())
    }

    async fn follow_up_questions(&mut self) -> Result<Vec<Question>, Error> {
        let messages = prompts::follow_up(&self.known_values, &self.mandatory_fields);
        let (proposed, usage) = self
            .model
            .extract::<FollowUpQuestions>(&messages, self.temperature, self.max_tokens)
            .await?;
        self.record_usage(&usage);

        let proposed_count = proposed.questions.len();
        let questions = questions::retain_answerable(
            proposed.questions,
            &self.known_values,
            &self.mandatory_fields,
        );
        if questions.len() < proposed_count {
            debug!(
                dropped = proposed_count - questions.len(),
                "Discarded questions about optional or already known fields"
            );
        }
        Ok(questions)
    }

    fn record_usage(&mut self, usage: &TokenUsage) {
        self.token_usage.accumulate(usage);
        if usage.total_tokens.is_some() {
            info!(
                "Request used up: {:?} tokens, Total tokens used: {:?}",
                usage.total_tokens, self.token_usage.total_tokens
            );
        }
    }

    #[must_use]
    pub fn known_values(&self) -> &KnownValues {
        &self.known_values
    }

    #[must_use]
    pub fn relaxed_schema(&self) -> &RelaxedSchema {
        &self.relaxed_schema
    }

    #[must_use]
    pub fn mandatory_fields(&self) -> &MandatoryFields {
        &self.mandatory_fields
    }

    /// Mandatory fields still holding `null`, in schema order
    #[must_use]
    pub fn missing_mandatory(&self) -> Vec<&str> {
        self.mandatory_fields
            .iter()
            .filter(|f| !self.known_values.is_set(f))
            .collect()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing_mandatory().is_empty()
    }

    #[must_use]
    pub fn token_usage(&self) -> &TokenUsage {
        &self.token_usage
    }

    /// Forget everything extracted so far
    pub fn reset(&mut self) {
        self.known_values.clear();
    }

    /// Deserializes the known values into the caller's type once every mandatory field is set.
    pub fn finish<T: DeserializeOwned>(&self) -> Result<T, ValuesError> {
        let missing = self.missing_mandatory();
        if !missing.is_empty() {
            return Err(ValuesError::Incomplete(
                missing.into_iter().map(str::to_owned).collect(),
            ));
        }
        serde_json::from_value(self.known_values.to_json())
            .map_err(|e| ValuesError::Deserialize(e.to_string()))
    }
}
