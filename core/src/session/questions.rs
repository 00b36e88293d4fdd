use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::KnownValues;
use crate::schema::MandatoryFields;

/// A follow-up question about one missing field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Question {
    /// Key of the missing value the question asks about
    pub field: String,
    /// The follow-up question to ask the user
    pub question: String,
}

/// Reply shape requested from the model when asking for follow-up questions
#[derive(Debug, Deserialize, JsonSchema)]
pub(crate) struct FollowUpQuestions {
    /// One question per key whose value is null
    pub questions: Vec<Question>,
}

/// Keeps the questions that target a mandatory field still holding `null`, in order.
pub(crate) fn retain_answerable(
    questions: Vec<Question>,
    known: &KnownValues,
    mandatory: &MandatoryFields,
) -> Vec<Question> {
    questions
        .into_iter()
        .filter(|q| mandatory.contains(&q.field) && !known.is_set(&q.field))
        .collect()
}
