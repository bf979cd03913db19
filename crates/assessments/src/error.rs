//! Assessment error types

use thiserror::Error;
use uuid::Uuid;

pub type AssessmentResult<T> = Result<T, AssessmentError>;

#[derive(Debug, Error)]
pub enum AssessmentError {
    #[error("Assessment tool not found: {0}")]
    ToolNotFound(Uuid),

    #[error("Assessment not found: {0}")]
    AssessmentNotFound(String),

    #[error("Assessment tool {tool_id} failed: {message}")]
    ToolFailed { tool_id: Uuid, message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<sqlx::Error> for AssessmentError {
    fn from(e: sqlx::Error) -> Self {
        AssessmentError::Database(e.to_string())
    }
}
