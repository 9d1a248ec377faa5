use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DocforgeError>;

#[derive(Error, Debug)]
pub enum DocforgeError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{}", malformed_message(.source_index, .reason))]
    MalformedInput {
        /// 1-indexed position of the offending buffer when several were given
        source_index: Option<usize>,
        reason: String,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Markup rendering failed: {0}")]
    Render(String),

    #[error("PDF operation failed: {0}")]
    OperationError(String),
}

fn malformed_message(source_index: &Option<usize>, reason: &str) -> String {
    match source_index {
        Some(index) => format!("Failed to parse PDF (source {}): {}", index, reason),
        None => format!("Failed to parse PDF: {}", reason),
    }
}

/// Coarse failure category a transport layer maps to status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidInput,
    MalformedInput,
    InvalidParameter,
    UnsupportedOperation,
    Render,
    Internal,
}

impl DocforgeError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        DocforgeError::MalformedInput {
            source_index: None,
            reason: reason.into(),
        }
    }

    pub fn malformed_source(index: usize, reason: impl Into<String>) -> Self {
        DocforgeError::MalformedInput {
            source_index: Some(index),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DocforgeError::InvalidInput(_) => ErrorKind::InvalidInput,
            DocforgeError::MalformedInput { .. } => ErrorKind::MalformedInput,
            DocforgeError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            DocforgeError::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            DocforgeError::Render(_) => ErrorKind::Render,
            DocforgeError::OperationError(_) => ErrorKind::Internal,
        }
    }
}
