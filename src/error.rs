//! FlowQuery Error Types

use thiserror::Error;

/// Errors raised anywhere in the query pipeline.
///
/// Every failure is fatal to the enclosing run: the pipeline unwinds and the
/// runner's results stay empty. Token positions are byte offsets into the
/// statement text, reported where the failing token is known.
#[derive(Error, Debug)]
pub enum Error {
    /// Lexical error (unterminated literal, unknown character)
    #[error("Lexical error at position {position}: {message}")]
    Lexical { message: String, position: usize },

    /// Parse error (unexpected token, structural rule violation)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Reference to an identifier no operation has introduced
    #[error("Undefined identifier: {0}")]
    UndefinedIdentifier(String),

    /// Evaluation error (operator type error, division by zero, ...)
    #[error("{0}")]
    Eval(String),

    /// Structural graph error during traversal
    #[error("{0}")]
    Graph(String),

    /// Unknown label at traversal time
    #[error("Physical node not found for label {0}")]
    UnknownLabel(String),

    /// Unknown relationship type at traversal time
    #[error("Physical relationship not found for type {0}")]
    UnknownRelationshipType(String),

    /// Loader failure, surfaced verbatim
    #[error("Load failed: {0}")]
    Load(String),

    /// JSON (de)serialisation error from a loader or value conversion
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Parse error with a token position appended for diagnostics.
    pub fn parse_at(message: impl Into<String>, position: usize) -> Self {
        Error::Parse(format!("{} (at position {position})", message.into()))
    }
}

/// Result type used across the query pipeline
pub type Result<T> = std::result::Result<T, Error>;
