pub use crate::completion::{CompletionModel, Extractor, Message};
pub use crate::error::Error;
pub use crate::schema::{relax, Field, Schema};
pub use crate::session::{KnownValues, Question, Session};

pub type Result<T, E = Error> = std::result::Result<T, E>;
