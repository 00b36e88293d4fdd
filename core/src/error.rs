use crate::{completion::CompletionError, schema::SchemaError, session::ValuesError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Completion error: {0}")]
    Completion(#[from] CompletionError),
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("Values error: {0}")]
    Values(#[from] ValuesError),
}
