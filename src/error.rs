use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Main error type for the storage cluster
#[derive(Debug)]
pub enum SdfsError {
    /// Configuration or CLI argument errors
    Config(String),

    /// Gossip protocol errors (never leave the failure detector)
    Gossip(GossipError),

    /// Peer unreachable, connection or framing failures
    Transport(String),

    /// System I/O errors
    Io(std::io::Error),

    /// Local read/write/delete failures in the storage directory
    Storage(String),

    /// Requested file is not held where it was asked for
    NotFound(String),

    /// Structured error reported by a remote peer
    Remote(String),

    /// Serialization/deserialization errors
    Serialization(SerializationError),
}

/// Gossip protocol specific errors
#[derive(Debug)]
pub enum GossipError {
    /// Message parsing or validation errors
    Message(String),

    /// Local node is no longer a member
    NotMember(String),
}

/// Serialization related errors
#[derive(Debug)]
pub enum SerializationError {
    /// Binary encoding errors
    Encode(bincode::error::EncodeError),

    /// Binary decoding errors
    Decode(bincode::error::DecodeError),

    /// JSON serialization/deserialization errors
    Json(serde_json::Error),
}

impl fmt::Display for SdfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdfsError::Config(msg) => write!(f, "Configuration error: {}", msg),
            SdfsError::Gossip(err) => write!(f, "Gossip error: {}", err),
            SdfsError::Transport(msg) => write!(f, "Transport error: {}", msg),
            SdfsError::Io(err) => write!(f, "I/O error: {}", err),
            SdfsError::Storage(msg) => write!(f, "Storage error: {}", msg),
            SdfsError::NotFound(name) => write!(f, "Not found: {}", name),
            SdfsError::Remote(msg) => write!(f, "Remote error: {}", msg),
            SdfsError::Serialization(err) => write!(f, "Serialization error: {}", err),
        }
    }
}

impl fmt::Display for GossipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GossipError::Message(msg) => write!(f, "Message: {}", msg),
            GossipError::NotMember(msg) => write!(f, "Not a member: {}", msg),
        }
    }
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationError::Encode(err) => write!(f, "Binary encode: {}", err),
            SerializationError::Decode(err) => write!(f, "Binary decode: {}", err),
            SerializationError::Json(err) => write!(f, "JSON: {}", err),
        }
    }
}

impl std::error::Error for SdfsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SdfsError::Io(err) => Some(err),
            SdfsError::Serialization(err) => Some(err),
            SdfsError::Gossip(err) => Some(err),
            _ => None,
        }
    }
}

impl std::error::Error for GossipError {}
impl std::error::Error for SerializationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SerializationError::Encode(err) => Some(err),
            SerializationError::Decode(err) => Some(err),
            SerializationError::Json(err) => Some(err),
        }
    }
}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, SdfsError>;

impl SdfsError {
    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            SdfsError::Config(_) => StatusCode::BAD_REQUEST,
            SdfsError::NotFound(_) => StatusCode::NOT_FOUND,
            SdfsError::Transport(_) | SdfsError::Remote(_) | SdfsError::Gossip(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            SdfsError::Io(_) | SdfsError::Storage(_) | SdfsError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            SdfsError::Config(_) => "configuration_error",
            SdfsError::Gossip(_) => "gossip_error",
            SdfsError::Transport(_) => "transport_error",
            SdfsError::Io(_) => "io_error",
            SdfsError::Storage(_) => "storage_error",
            SdfsError::NotFound(_) => "not_found",
            SdfsError::Remote(_) => "remote_error",
            SdfsError::Serialization(_) => "serialization_error",
        }
    }

    /// True when a peer could not be reached at all
    pub fn is_unreachable(&self) -> bool {
        matches!(self, SdfsError::Transport(_))
    }
}

// Axum IntoResponse implementation for HTTP error responses
impl IntoResponse for SdfsError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_response = json!({
            "error": {
                "code": status_code.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });

        (status_code, Json(error_response)).into_response()
    }
}

// Conversions from common error types
impl From<std::io::Error> for SdfsError {
    fn from(err: std::io::Error) -> Self {
        SdfsError::Io(err)
    }
}

impl From<serde_json::Error> for SdfsError {
    fn from(err: serde_json::Error) -> Self {
        SdfsError::Serialization(SerializationError::Json(err))
    }
}

impl From<bincode::error::EncodeError> for SdfsError {
    fn from(err: bincode::error::EncodeError) -> Self {
        SdfsError::Serialization(SerializationError::Encode(err))
    }
}

impl From<bincode::error::DecodeError> for SdfsError {
    fn from(err: bincode::error::DecodeError) -> Self {
        SdfsError::Serialization(SerializationError::Decode(err))
    }
}

impl From<GossipError> for SdfsError {
    fn from(err: GossipError) -> Self {
        SdfsError::Gossip(err)
    }
}

impl From<SerializationError> for SdfsError {
    fn from(err: SerializationError) -> Self {
        SdfsError::Serialization(err)
    }
}

impl From<tokio::time::error::Elapsed> for SdfsError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        SdfsError::Transport(format!("Remote call timed out: {}", err))
    }
}

// Helper macros for common error construction patterns
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::SdfsError::Config($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::SdfsError::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! storage_error {
    ($msg:expr) => {
        $crate::error::SdfsError::Storage($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::SdfsError::Storage(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! transport_error {
    ($msg:expr) => {
        $crate::error::SdfsError::Transport($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::SdfsError::Transport(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let config_err = SdfsError::Config("Invalid port".to_string());
        assert_eq!(config_err.to_string(), "Configuration error: Invalid port");

        let io_err = SdfsError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "File not found",
        ));
        assert!(io_err.to_string().contains("I/O error"));

        let missing = SdfsError::NotFound("movie.mp4".to_string());
        assert_eq!(missing.to_string(), "Not found: movie.mp4");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let sdfs_err: SdfsError = io_err.into();

        assert!(matches!(sdfs_err, SdfsError::Io(_)));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            SdfsError::NotFound("x".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            SdfsError::Transport("down".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert!(SdfsError::Transport("down".to_string()).is_unreachable());
        assert!(!SdfsError::Remote("disk full".to_string()).is_unreachable());
    }

    #[test]
    fn test_macros() {
        let err = config_error!("Chunk size {} is invalid", 0);
        assert_eq!(err.to_string(), "Configuration error: Chunk size 0 is invalid");

        let err = storage_error!("disk full");
        assert_eq!(err.to_string(), "Storage error: disk full");

        let err = transport_error!("Connection refused by {}", "10.0.0.1:2335");
        assert_eq!(
            err.to_string(),
            "Transport error: Connection refused by 10.0.0.1:2335"
        );
    }
}
