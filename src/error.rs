//! Error types for Avatalk
//!
//! This module defines all error types used throughout the crate,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Avatalk operations
///
/// Covers the three failure families of an avatar session: provisioning
/// failures (bad proxy response, unauthorized, malformed descriptor),
/// transport failures reported by the room, and precondition failures
/// (calling a session action before a room exists).
#[derive(Error, Debug)]
pub enum AvatalkError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Non-success response from the provisioning endpoint
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    /// The provisioning endpoint rejected our credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The provisioning response did not contain a usable session descriptor
    #[error("Invalid session descriptor: {0}")]
    InvalidDescriptor(String),

    /// A session action was invoked before a room was joined
    #[error("Room is not initialized")]
    NotInitialized,

    /// `join` was called while a session is joining or joined
    #[error("Session already active: {0}")]
    AlreadyActive(String),

    /// Error reported by the room transport
    #[error("Room error [{code}]: {message}")]
    Room {
        /// Machine-readable error code from the SDK
        code: String,
        /// Human-readable detail
        message: String,
    },

    /// Stream proxy failures
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for Avatalk operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation. Callers that
/// need to branch on the failure kind downcast to [`AvatalkError`].
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = AvatalkError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_not_initialized_display() {
        assert_eq!(
            AvatalkError::NotInitialized.to_string(),
            "Room is not initialized"
        );
    }

    #[test]
    fn test_room_error_display() {
        let error = AvatalkError::Room {
            code: "AVATAR_CONNECTION_FAILED".to_string(),
            message: "peer closed".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Room error [AVATAR_CONNECTION_FAILED]: peer closed"
        );
    }

    #[test]
    fn test_invalid_descriptor_display() {
        let error = AvatalkError::InvalidDescriptor("missing session_id".to_string());
        assert!(error.to_string().contains("missing session_id"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: AvatalkError = io_error.into();
        assert!(matches!(error, AvatalkError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: AvatalkError = json_error.into();
        assert!(matches!(error, AvatalkError::Serialization(_)));
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let result: Result<()> = Err(AvatalkError::Unauthorized("401".to_string()).into());
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AvatalkError>(),
            Some(AvatalkError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AvatalkError>();
    }
}
