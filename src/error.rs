use std::time::Duration;

use thiserror::Error;

/// Custom error types for the proctoring client
#[derive(Debug, Error)]
pub enum ProctorError {
    /// Camera acquisition errors
    #[error("Camera permission denied: {0}")]
    PermissionDenied(String),

    #[error("No camera device found: {0}")]
    DeviceNotFound(String),

    #[error("Camera device is busy: {0}")]
    DeviceBusy(String),

    #[error("Camera access is not supported: {0}")]
    UnsupportedPlatform(String),

    #[error("Camera did not deliver video within {0:?}")]
    AcquisitionTimeout(Duration),

    #[error("Camera stream is not active")]
    StreamInactive,

    #[error("Camera error: {0}")]
    Camera(String),

    /// Server errors
    #[error("Server rejected proctoring start: {0}")]
    ServerRejected(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Malformed server response: {0}")]
    MalformedResponse(String),

    #[error("HTTP client error: {0}")]
    Http(String),

    /// Session errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Proctoring start aborted: {0}")]
    StartAborted(String),

    /// Persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Failed to serialize state: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using ProctorError
pub type Result<T> = std::result::Result<T, ProctorError>;

impl ProctorError {
    /// Helper to create Internal errors with context
    pub fn internal(msg: impl Into<String>) -> Self {
        ProctorError::Internal(msg.into())
    }

    /// Helper to create network errors
    pub fn network(msg: impl Into<String>) -> Self {
        ProctorError::NetworkError(msg.into())
    }

    /// Helper to create storage errors
    pub fn storage(msg: impl Into<String>) -> Self {
        ProctorError::Storage(msg.into())
    }

    /// Errors the monitoring loop absorbs and retries on its next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProctorError::NetworkError(_)
                | ProctorError::MalformedResponse(_)
                | ProctorError::Http(_)
        )
    }

    /// User-facing copy explaining what to do about this error.
    pub fn guidance(&self) -> String {
        match self {
            ProctorError::PermissionDenied(_) => {
                "Camera access was denied. Please allow camera access and refresh the page."
                    .to_string()
            }
            ProctorError::DeviceNotFound(_) => {
                "No camera found. Please connect a camera and refresh the page.".to_string()
            }
            ProctorError::DeviceBusy(_) => {
                "Camera is already in use by another application.".to_string()
            }
            ProctorError::UnsupportedPlatform(_) => {
                "Your browser does not support camera access. Please use Chrome, Firefox, or Edge."
                    .to_string()
            }
            ProctorError::AcquisitionTimeout(_) => {
                "Camera initialization timed out. Please check camera permissions and try again."
                    .to_string()
            }
            ProctorError::StreamInactive => {
                "Camera stream is not active. Please check camera permissions and try again."
                    .to_string()
            }
            ProctorError::ServerRejected(msg) => msg.clone(),
            ProctorError::NetworkError(_) | ProctorError::Http(_) => {
                "Could not reach the proctoring server. Please check your connection.".to_string()
            }
            ProctorError::MalformedResponse(_) => {
                "The proctoring server sent an unexpected response.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for ProctorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProctorError::MalformedResponse(err.to_string())
        } else {
            ProctorError::NetworkError(err.to_string())
        }
    }
}

impl From<std::io::Error> for ProctorError {
    fn from(err: std::io::Error) -> Self {
        ProctorError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProctorError::ServerRejected("contest closed".to_string());
        assert_eq!(
            err.to_string(),
            "Server rejected proctoring start: contest closed"
        );
    }

    #[test]
    fn test_error_helpers() {
        let err = ProctorError::internal("Something went wrong");
        assert!(matches!(err, ProctorError::Internal(_)));

        let err = ProctorError::network("connection reset");
        assert!(err.is_transient());
    }

    #[test]
    fn test_guidance_is_cause_specific() {
        let denied = ProctorError::PermissionDenied("NotAllowedError".into()).guidance();
        let missing = ProctorError::DeviceNotFound("NotFoundError".into()).guidance();
        let busy = ProctorError::DeviceBusy("NotReadableError".into()).guidance();
        let timeout = ProctorError::AcquisitionTimeout(Duration::from_secs(10)).guidance();

        assert!(denied.contains("allow camera access"));
        assert!(missing.contains("connect a camera"));
        assert!(busy.contains("in use"));
        assert!(timeout.contains("timed out"));
        assert_ne!(denied, missing);
    }

    #[test]
    fn test_acquisition_errors_are_not_transient() {
        assert!(!ProctorError::PermissionDenied(String::new()).is_transient());
        assert!(!ProctorError::StreamInactive.is_transient());
        assert!(ProctorError::MalformedResponse("eof".into()).is_transient());
    }
}
