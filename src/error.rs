//! Error types shared by the model, the command engine and the
//! import/export pipeline.

use std::fmt;
use thiserror::Error;

/// Malformed external input, with the 1-based position of the offending token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Top-level error type of the crate
#[derive(Debug, Error)]
pub enum EditorError {
    /// Malformed LilyPond or CanorusML text
    #[error("parse error at {0}")]
    Parse(#[from] ParseError),

    /// A command would break a document invariant; the document is unchanged
    #[error("structural violation: {0}")]
    StructuralViolation(String),

    /// A command or accessor referenced a sheet/context/voice/element that does not exist
    #[error("invalid location: {0}")]
    InvalidLocation(String),

    /// A value outside its domain (e.g. a pitch step of 9)
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Source or target file could not be read or written
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The LilyPond document template failed to render
    #[error("template error: {0}")]
    Template(String),

    /// An import was aborted by the caller
    #[error("import cancelled")]
    Cancelled,

    /// Nothing to undo or redo. `undo()`/`redo()` report this as `Ok(false)`;
    /// the variant exists for hosts that surface it as a message.
    #[error("nothing to undo")]
    UndoStackEmpty,
}

impl From<mustache::Error> for EditorError {
    fn from(e: mustache::Error) -> Self {
        EditorError::Template(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EditorError>;

/// Shorthand for a structural violation error
pub(crate) fn violation(message: impl Into<String>) -> EditorError {
    EditorError::StructuralViolation(message.into())
}

/// Shorthand for an invalid location error
pub(crate) fn bad_location(message: impl Into<String>) -> EditorError {
    EditorError::InvalidLocation(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let e = ParseError::new(3, 14, "unexpected 'X'");
        assert_eq!(e.to_string(), "3:14: unexpected 'X'");

        let wrapped: EditorError = e.into();
        assert!(wrapped.to_string().contains("3:14"));
    }
}
