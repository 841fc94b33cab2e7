//! Unified error handling for the speedtrack library.
//!
//! Collaborator failures (platform location source, storage) are converted
//! into [`TrackingError`] at the boundary. The engine turns them into an
//! advisory message on the tracking state instead of propagating them.

use thiserror::Error;

/// Unified error type for speedtrack operations.
#[derive(Debug, Clone, PartialEq, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
pub enum TrackingError {
    /// Foreground or background location access was refused
    #[error("Location permission denied: {message}")]
    PermissionDenied { message: String },
    /// The platform location stream failed or could not start
    #[error("Location provider failure: {message}")]
    ProviderFailure { message: String },
    /// A storage read/write/delete did not complete
    #[error("Persistence failure: {message}")]
    PersistenceFailure { message: String },
    /// Operation not valid in the current lifecycle state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },
    /// JSON/MessagePack encoding or decoding failed
    #[error("Serialization error: {message}")]
    Serialization { message: String },
    /// Configuration could not be parsed
    #[error("Configuration error: {message}")]
    ConfigError { message: String },
}

impl TrackingError {
    pub fn provider(message: impl Into<String>) -> Self {
        TrackingError::ProviderFailure {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        TrackingError::PersistenceFailure {
            message: message.into(),
        }
    }

    pub fn permission(message: impl Into<String>) -> Self {
        TrackingError::PermissionDenied {
            message: message.into(),
        }
    }

    /// Whether this error should be shown to the user. Invalid state
    /// transitions are swallowed and only logged.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, TrackingError::InvalidState { .. })
    }
}

impl From<serde_json::Error> for TrackingError {
    fn from(e: serde_json::Error) -> Self {
        TrackingError::Serialization {
            message: e.to_string(),
        }
    }
}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for TrackingError {
    fn from(e: rusqlite::Error) -> Self {
        TrackingError::PersistenceFailure {
            message: e.to_string(),
        }
    }
}

#[cfg(feature = "persistence")]
impl From<rmp_serde::encode::Error> for TrackingError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        TrackingError::Serialization {
            message: e.to_string(),
        }
    }
}

#[cfg(feature = "persistence")]
impl From<rmp_serde::decode::Error> for TrackingError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        TrackingError::Serialization {
            message: e.to_string(),
        }
    }
}

/// Result type alias for speedtrack operations.
pub type Result<T> = std::result::Result<T, TrackingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrackingError::persistence("disk full");
        assert_eq!(err.to_string(), "Persistence failure: disk full");

        let err = TrackingError::permission("foreground");
        assert!(err.to_string().contains("foreground"));
    }

    #[test]
    fn test_invalid_state_not_user_facing() {
        let err = TrackingError::InvalidState {
            message: "no active session".to_string(),
        };
        assert!(!err.is_user_facing());
        assert!(TrackingError::provider("x").is_user_facing());
    }

    #[test]
    fn test_json_error_conversion() {
        let parsed: std::result::Result<Vec<u8>, _> = serde_json::from_str("{");
        let err: TrackingError = parsed.unwrap_err().into();
        assert!(matches!(err, TrackingError::Serialization { .. }));
    }
}
