use thiserror::Error;

use crate::domain::email::EmailAddressError;
use crate::domain::posts::TransitionError;
use crate::domain::slug::SlugError;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("domain entity `{entity}` not found")]
    NotFound { entity: &'static str },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
    #[error("domain invariant violated: {message}")]
    Invariant { message: String },
}

impl DomainError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }
}

impl From<EmailAddressError> for DomainError {
    fn from(err: EmailAddressError) -> Self {
        Self::validation(err.to_string())
    }
}

impl From<SlugError> for DomainError {
    fn from(err: SlugError) -> Self {
        match err {
            SlugError::Exhausted { .. } => Self::invariant(err.to_string()),
            other => Self::validation(other.to_string()),
        }
    }
}

impl From<TransitionError> for DomainError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::ScheduleInPast => Self::validation(err.to_string()),
            TransitionError::InvalidTransition { .. } => Self::invariant(err.to_string()),
        }
    }
}
