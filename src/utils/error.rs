//! Error handling for mlir-agent

use std::path::PathBuf;

use crate::utils::Span;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Crate error
#[derive(Error, Debug)]
pub enum Error {
    // ==================== History Errors ====================

    #[error("History directory not found: {}", path.display())]
    HistoryNotFound { path: PathBuf },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ==================== Parser Errors ====================

    #[error("Parse error at {span}: {message}")]
    Parse { message: String, span: Span },

    #[error("Unexpected end of input: expected {expected}")]
    UnexpectedEof { expected: String, span: Span },

    #[error("Unregistered dialect '{dialect}' (operation {op})")]
    UnregisteredDialect { dialect: String, op: String, span: Span },

    // ==================== Arena Errors ====================

    #[error("Handle belongs to a different parsing context")]
    ForeignHandle,

    #[error("Attribute '{name}' cannot be modified")]
    ImmutableAttribute { name: String },

    #[error("Unknown attribute '{name}'")]
    UnknownAttribute { name: String },

    // ==================== Tool Errors ====================

    #[error("Failed to launch {program}: {source}")]
    ToolLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command timed out after {seconds} seconds: {command}")]
    Timeout { command: String, seconds: u64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Get the span associated with this error
    pub fn span(&self) -> Option<Span> {
        match self {
            Self::Parse { span, .. } => Some(*span),
            Self::UnexpectedEof { span, .. } => Some(*span),
            Self::UnregisteredDialect { span, .. } => Some(*span),
            _ => None,
        }
    }

    /// Wrap an IO error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_only_for_parse_errors() {
        let err = Error::Parse { message: "bad".to_string(), span: Span::new(3, 4, 1, 4) };
        assert_eq!(err.span(), Some(Span::new(3, 4, 1, 4)));
        assert_eq!(err.to_string(), "Parse error at 1:4: bad");

        let err = Error::HistoryNotFound { path: PathBuf::from("/nope/ir_pass_history") };
        assert_eq!(err.span(), None);
        assert_eq!(err.to_string(), "History directory not found: /nope/ir_pass_history");
    }
}
