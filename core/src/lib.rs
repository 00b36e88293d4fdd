//! # chatstract - Core API Documentation
//!
//! chatstract fills in structured data through conversation. Give it a schema
//! and the user's messages; it asks a language model to extract the values it
//! can, keeps what it already knows, and comes back with follow-up questions
//! for the mandatory fields that are still missing.
//!
//! ## Pieces
//!
//! - **Schemas**: field tables reflected from `schemars` types or built at runtime,
//!   and [`schema::relax`] which derives the all-optional variant the model fills in
//! - **Sessions**: [`session::Session`] drives the conversation, one
//!   [`advance`](session::Session::advance) per user message
//! - **Completion models**: the [`completion::CompletionModel`] trait and the
//!   builtin OpenAI provider; other providers live in their own crates
//!
//! ## Example
//!
//! ```rust,no_run
//! use chatstract::prelude::*;
//! use chatstract::providers::completions::OpenAI;
//! use schemars::JsonSchema;
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize, JsonSchema)]
//! struct Task {
//!     /// A short description of the task.
//!     description: String,
//!     /// The deadline for the task.
//!     due_date: Option<String>,
//!     /// The person assigned to solve the task
//!     responsable: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let model = OpenAI::new(None)?;
//!     let mut session = Session::for_extractor::<Task>(model)?;
//!
//!     // description is known, responsable is not: expect one question
//!     for question in session.advance("Someone has to clean the office").await? {
//!         println!("{}: {}", question.field, question.question);
//!     }
//!
//!     session.advance("John will do it").await?;
//!     let task: Task = session.finish()?;
//!     println!("{task:?}");
//!     Ok(())
//! }
//! ```

/// Language model requests
///
/// Contains:
/// - Role tagged messages
/// - The `CompletionModel` trait providers implement
/// - Response formats for structured extraction
pub mod completion;

/// Error types for all library operations
pub mod error;

/// Convenience prelude exports
pub mod prelude;

/// Builtin completion model providers
pub mod providers;

/// Schema reflection and relaxation
pub mod schema;

/// Conversation sessions: extraction, merging and follow-up questions
pub mod session;
