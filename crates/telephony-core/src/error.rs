//! Error types for the telephony backend

use thiserror::Error;

use crate::provider::ProviderError;

/// Result type for backend operations
pub type TelephonyResult<T> = Result<T, TelephonyError>;

/// Errors that can occur in the telephony backend
#[derive(Debug, Error)]
pub enum TelephonyError {
    /// A precondition on the referenced service or call does not hold
    #[error("Not allowed: {message}")]
    NotAllowed { message: String },

    /// The request carried an argument that fails validation
    #[error("Invalid argument {name}: {reason}")]
    InvalidArgument { name: String, reason: String },

    /// The operation is not supported by this backend
    #[error("Operation not supported: {operation}")]
    NotSupported { operation: String },

    /// The provider rejected or failed the operation
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A reply payload could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be loaded
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The backend task is gone
    #[error("Backend unavailable: {message}")]
    Unavailable { message: String },
}

impl TelephonyError {
    pub fn not_allowed(message: impl Into<String>) -> Self {
        Self::NotAllowed {
            message: message.into(),
        }
    }

    pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn not_supported(operation: impl Into<String>) -> Self {
        Self::NotSupported {
            operation: operation.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Convenience for the common "unknown service" rejection
    pub fn unknown_service(service_id: &str) -> Self {
        Self::not_allowed(format!("Unknown service {}", service_id))
    }

    /// Convenience for the common "unknown call" rejection
    pub fn unknown_call(call_id: &str) -> Self {
        Self::not_allowed(format!("Unknown call {}", call_id))
    }

    /// Whether the error maps to the wire `NotSupportedError`
    pub fn is_not_supported(&self) -> bool {
        matches!(self, TelephonyError::NotSupported { .. })
    }
}

impl From<config::ConfigError> for TelephonyError {
    fn from(err: config::ConfigError) -> Self {
        Self::config(err.to_string())
    }
}
