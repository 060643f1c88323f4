//! Deterministic business failures. Storage and provider failures belong to
//! the infrastructure layer and are not represented here.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// E.g. retrying a completed job or cancelling a failed one.
    #[error("cannot {action} a job that is {from}")]
    InvalidStateTransition { from: String, action: String },

    #[error("no {action} credits left")]
    InsufficientCredits { action: String },

    /// A versioned write lost the race.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn invalid_transition(from: impl Into<String>, action: impl Into<String>) -> Self {
        Self::InvalidStateTransition {
            from: from.into(),
            action: action.into(),
        }
    }

    pub fn insufficient_credits(action: impl Into<String>) -> Self {
        Self::InsufficientCredits { action: action.into() }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_state() {
        assert_eq!(
            DomainError::invalid_transition("completed", "retry").to_string(),
            "cannot retry a job that is completed"
        );
        assert_eq!(DomainError::insufficient_credits("fix").to_string(), "no fix credits left");
    }
}
