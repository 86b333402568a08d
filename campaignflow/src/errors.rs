//! Error types for the campaignflow engine.
//!
//! Every error maps onto a [`State`] so that a failure can be written into
//! a persisted stage outcome without losing its classification.

use crate::core::State;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// The main error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The request could not be resolved (malformed body, missing key).
    #[error("{0}")]
    BadRequest(String),

    /// A referenced record does not exist.
    #[error("{kind} '{name}' is not found")]
    NotFound {
        /// The kind of record (campaign, activation, stage).
        kind: &'static str,
        /// The name that was looked up.
        name: String,
    },

    /// A configuration value is present but invalid.
    #[error("bad config: {0}")]
    BadConfig(String),

    /// A required configuration value is absent.
    #[error("missing config: {0}")]
    MissingConfig(String),

    /// A stage provider failed while processing.
    #[error("provider failed: {0}")]
    Provider(String),

    /// An expression template could not be evaluated.
    #[error("{0}")]
    Expression(#[from] ExpressionError),

    /// A generic internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Creates a bad request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Creates a not found error.
    #[must_use]
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Creates a provider error.
    #[must_use]
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the status code this error is recorded as.
    #[must_use]
    pub fn state(&self) -> State {
        match self {
            Self::BadRequest(_) | Self::Serialization(_) => State::BadRequest,
            Self::NotFound { .. } => State::NotFound,
            Self::BadConfig(_) => State::BadConfig,
            Self::MissingConfig(_) => State::MissingConfig,
            Self::Provider(_) | Self::Expression(_) | Self::Internal(_) => State::InternalError,
        }
    }

    /// Returns true if the error is a lookup miss.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("state".to_string(), serde_json::json!(self.state().code()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Errors raised by the expression evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ExpressionError {
    /// The scanner hit a token it could not place.
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),

    /// The expression ended in the middle of a construct.
    #[error("unexpected end of expression")]
    UnexpectedEnd,

    /// An unknown `$function()` was called.
    #[error("unknown function ${0}()")]
    UnknownFunction(String),

    /// A function was called with the wrong number of arguments.
    #[error("${name}() expects {expected} arguments, found {found}")]
    Arity {
        /// The function name.
        name: String,
        /// Description of the accepted argument count.
        expected: String,
        /// The number of arguments supplied.
        found: usize,
    },

    /// A numeric comparison received a non-number.
    #[error("{0} is not a valid number")]
    NotANumber(String),

    /// A boolean operator received a non-boolean.
    #[error("{0} is not a valid boolean")]
    NotABool(String),

    /// An `$input()` or `$output()` lookup failed.
    #[error("{0}")]
    Lookup(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_state_mapping() {
        assert_eq!(EngineError::bad_request("x").state(), State::BadRequest);
        assert_eq!(EngineError::not_found("campaign", "c").state(), State::NotFound);
        assert_eq!(EngineError::provider("boom").state(), State::InternalError);
        assert_eq!(
            EngineError::from(ExpressionError::UnexpectedEnd).state(),
            State::InternalError
        );
    }

    #[test]
    fn test_not_found_message() {
        let err = EngineError::not_found("activation", "act1");
        assert_eq!(err.to_string(), "activation 'act1' is not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_arity_message() {
        let err = ExpressionError::Arity {
            name: "if".to_string(),
            expected: "3".to_string(),
            found: 2,
        };
        assert_eq!(err.to_string(), "$if() expects 3 arguments, found 2");
    }

    #[test]
    fn test_error_to_dict() {
        let dict = EngineError::bad_request("operation x is not supported").to_dict();
        assert_eq!(dict["state"], 400);
        assert_eq!(dict["message"], "operation x is not supported");
    }
}
