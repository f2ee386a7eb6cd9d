use location_provider::{ModuleId, StatusCode};
use thiserror::Error;

use crate::controller::RequestId;

/// Failure while establishing a session with the location service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("location service unavailable: {0}")]
    ServiceUnavailable(StatusCode),
    #[error("positioning module {module_id} unavailable: {status}")]
    ProviderUnavailable {
        module_id: ModuleId,
        status: StatusCode,
    },
    #[error("requestor registration refused: {0}")]
    RequestorRejected(StatusCode),
    #[error("update policy rejected by provider: {0}")]
    PolicyRejected(StatusCode),
}

impl SessionError {
    /// Platform status reported by the failing step.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ServiceUnavailable(status)
            | Self::RequestorRejected(status)
            | Self::PolicyRejected(status) => *status,
            Self::ProviderUnavailable { status, .. } => *status,
        }
    }
}

/// Failure of a blocking one-shot position query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("position update failed: {0}")]
    Provider(StatusCode),
    #[error("provider reported a fix without valid coordinates")]
    InvalidFix,
}

impl QueryError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Session(error) => error.status(),
            Self::Provider(status) => *status,
            Self::InvalidFix => StatusCode::INVALID_FIX,
        }
    }
}

/// Programming error that must stop whoever is driving the positioner.
///
/// These are never recovered from internally: the event loop stops pumping and
/// hands the error to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("`{operation}` called on a closed positioner")]
    UseAfterClose { operation: &'static str },
    #[error("position handler for request {request} failed: {reason}")]
    CallbackFailure { request: RequestId, reason: String },
}

/// Invalid positioner configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key} must be a whole number of microseconds, got {value:?}")]
    InvalidValue { key: &'static str, value: String },
}
