use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error classification surfaced to callers.
///
/// Every [`GuestError`] maps onto exactly one kind, and every kind maps onto
/// one response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A required field is absent.
    MissingParameter,
    /// A field is present but has the wrong shape or type.
    InputParameter,
    /// A field references an external resource that cannot be used as given.
    BadRequest,
    /// A provisioning operation is already in flight for the guest.
    Conflict,
    /// The originating request context was cancelled or timed out.
    Cancelled,
    /// Invariant violation; not user-facing.
    Internal,
}

impl ErrorKind {
    /// HTTP-style status code for this kind.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingParameter | Self::InputParameter | Self::BadRequest => 400,
            Self::Conflict => 409,
            Self::Cancelled => 499,
            Self::Internal => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::MissingParameter => "MissingParameterError",
            Self::InputParameter => "InputParameterError",
            Self::BadRequest => "BadRequestError",
            Self::Conflict => "ConflictError",
            Self::Cancelled => "CancelledError",
            Self::Internal => "InternalServerError",
        };
        f.write_str(name)
    }
}

/// A3S Guest error types
#[derive(Error, Debug)]
pub enum GuestError {
    /// Required request field is absent
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    /// Request field has the wrong shape
    #[error("Invalid input parameter: {0}")]
    InputParameter(String),

    /// Request references an unusable resource
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Provisioning already in flight for this guest
    #[error("Creation already in progress for guest {guest_id}")]
    Conflict { guest_id: String },

    /// Request context cancelled or deadline exceeded
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Registry or dispatcher invariant violated
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl GuestError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingParameter(_) => ErrorKind::MissingParameter,
            Self::InputParameter(_) | Self::SerializationError(_) => ErrorKind::InputParameter,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Internal(_) | Self::IoError(_) | Self::ConfigError(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for a missing-parameter error naming the field.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingParameter(field.into())
    }

    /// Shorthand for a conflict on `guest_id`.
    pub fn conflict(guest_id: impl Into<String>) -> Self {
        Self::Conflict {
            guest_id: guest_id.into(),
        }
    }
}

impl From<serde_json::Error> for GuestError {
    fn from(err: serde_json::Error) -> Self {
        GuestError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for GuestError {
    fn from(err: serde_yaml::Error) -> Self {
        GuestError::ConfigError(err.to_string())
    }
}

/// Result type alias for A3S Guest operations
pub type Result<T> = std::result::Result<T, GuestError>;
