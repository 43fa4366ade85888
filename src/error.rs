//! Error types for the TeamTalk protocol engine.
//!
//! This module defines error types for wire-codec failures, transport
//! failures, and trigger-engine failures.

use thiserror::Error;

/// Convenience type alias for Results using [`TtcomError`].
pub type Result<T, E = TtcomError> = std::result::Result<T, E>;

/// Top-level errors surfaced by the engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TtcomError {
    /// I/O error during reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 decoding error.
    #[error("decode error: {0}")]
    Decode(#[from] std::string::FromUtf8Error),

    /// Failed to parse a parmline.
    #[error("invalid parmline: {line}")]
    InvalidParmLine {
        /// The raw line that failed to parse.
        line: String,
        /// The underlying parse error.
        #[source]
        cause: ParmLineParseError,
    },

    /// Trigger configuration or evaluation error.
    #[error("trigger error: {0}")]
    Trigger(#[from] TriggerError),

    /// Server sent something other than `welcome`/`teamtalk` as its first
    /// line.
    #[error("expected welcome frame, server sent: {0:?}")]
    NoWelcome(String),

    /// A correlated request was not answered within its deadline.
    #[error("request id={0} timed out")]
    CorrelationTimeout(u8),
}

/// Errors encountered when parsing a parmline.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParmLineParseError {
    /// Line was empty.
    #[error("empty line")]
    EmptyLine,

    /// Event keyword was missing or contained illegal characters.
    #[error("invalid event keyword: {0:?}")]
    InvalidKeyword(String),

    /// A parameter name was malformed.
    #[error("invalid parameter name: {0:?}")]
    InvalidParmName(String),

    /// A quoted string value was not terminated or had a bad escape.
    #[error("invalid string value: {0:?}")]
    InvalidString(String),

    /// An integer value failed to parse.
    #[error("invalid integer value: {0:?}")]
    InvalidInt(String),

    /// A bracketed list value was malformed.
    #[error("invalid list value: {0:?}")]
    InvalidList(String),

    /// Parser combinator failure with context, preserved as text because
    /// `nom`'s error type borrows from the input and cannot outlive it.
    #[error("parse failed: {context}")]
    Nom {
        /// Description of what failed.
        context: String,
    },
}

impl Clone for ParmLineParseError {
    fn clone(&self) -> Self {
        match self {
            Self::EmptyLine => Self::EmptyLine,
            Self::InvalidKeyword(s) => Self::InvalidKeyword(s.clone()),
            Self::InvalidParmName(s) => Self::InvalidParmName(s.clone()),
            Self::InvalidString(s) => Self::InvalidString(s.clone()),
            Self::InvalidInt(s) => Self::InvalidInt(s.clone()),
            Self::InvalidList(s) => Self::InvalidList(s.clone()),
            Self::Nom { context } => Self::Nom {
                context: context.clone(),
            },
        }
    }
}

/// Errors raised while compiling or evaluating triggers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TriggerError {
    /// A match-spec regular expression failed to compile.
    #[error("bad pattern for {parm}: {source_message}")]
    BadPattern {
        /// The parameter name the pattern was attached to.
        parm: String,
        /// Preserved message from the underlying `regex::Error`, which is
        /// not `Clone`.
        source_message: String,
    },

    /// An action referenced a substitution name not present on the
    /// triggering event.
    #[error("unknown substitution %({0})")]
    UnknownSubstitution(String),
}

impl Clone for TriggerError {
    fn clone(&self) -> Self {
        match self {
            Self::BadPattern {
                parm,
                source_message,
            } => Self::BadPattern {
                parm: parm.clone(),
                source_message: source_message.clone(),
            },
            Self::UnknownSubstitution(s) => Self::UnknownSubstitution(s.clone()),
        }
    }
}

impl From<regex::Error> for TriggerError {
    fn from(_err: regex::Error) -> Self {
        // Callers that need the parameter name attach it themselves via
        // `BadPattern`; this conversion exists only for `?` ergonomics in
        // contexts that don't have a parameter name in scope.
        Self::BadPattern {
            parm: String::new(),
            source_message: _err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TtcomError::CorrelationTimeout(42);
        assert_eq!(format!("{}", err), "request id=42 timed out");
    }

    #[test]
    fn test_invalid_parmline_chaining() {
        let cause = ParmLineParseError::InvalidKeyword("3bad".to_string());
        let err = TtcomError::InvalidParmLine {
            line: "3bad foo=1".to_string(),
            cause,
        };
        let source = std::error::Error::source(&err);
        assert!(source.is_some());
    }

    #[test]
    fn test_trigger_error_clone_preserves_message() {
        let err = TriggerError::BadPattern {
            parm: "address".to_string(),
            source_message: "unclosed group".to_string(),
        };
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }

    #[test]
    fn test_error_conversion() {
        let io_err =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        let err: TtcomError = io_err.into();
        matches!(err, TtcomError::Io(_));
    }
}
