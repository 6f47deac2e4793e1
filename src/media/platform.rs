use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use super::stream::CameraStream;
use crate::error::ProctorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    Environment,
}

/// Constraints passed to the platform when requesting a camera.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamConstraints {
    pub facing_mode: FacingMode,
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub min_width: u32,
    pub min_height: u32,
    pub audio: bool,
}

impl Default for StreamConstraints {
    fn default() -> Self {
        Self {
            facing_mode: FacingMode::User,
            ideal_width: 320,
            ideal_height: 240,
            min_width: 240,
            min_height: 180,
            audio: false,
        }
    }
}

/// Failure reported by the platform camera API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("NotAllowedError: {0}")]
    NotAllowed(String),

    #[error("NotFoundError: {0}")]
    NotFound(String),

    #[error("NotReadableError: {0}")]
    NotReadable(String),

    #[error("NotSupportedError: {0}")]
    NotSupported(String),

    #[error("{0}")]
    Other(String),
}

impl PlatformError {
    /// Classifies a raw platform error from its name, falling back to
    /// keywords in the message when the name is not recognised.
    pub fn classify(name: &str, message: &str) -> Self {
        let message_owned = message.to_string();
        match name {
            "NotAllowedError" | "PermissionDeniedError" | "SecurityError" => {
                return PlatformError::NotAllowed(message_owned)
            }
            "NotFoundError" | "DevicesNotFoundError" | "OverconstrainedError" => {
                return PlatformError::NotFound(message_owned)
            }
            "NotReadableError" | "TrackStartError" | "AbortError" => {
                return PlatformError::NotReadable(message_owned)
            }
            "NotSupportedError" | "TypeError" => {
                return PlatformError::NotSupported(message_owned)
            }
            _ => {}
        }

        let lowered = message.to_lowercase();
        if lowered.contains("denied") {
            PlatformError::NotAllowed(message_owned)
        } else if lowered.contains("not supported") {
            PlatformError::NotSupported(message_owned)
        } else if lowered.contains("found") {
            PlatformError::NotFound(message_owned)
        } else if lowered.contains("use") {
            PlatformError::NotReadable(message_owned)
        } else {
            PlatformError::Other(message_owned)
        }
    }
}

impl From<PlatformError> for ProctorError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::NotAllowed(m) => ProctorError::PermissionDenied(m),
            PlatformError::NotFound(m) => ProctorError::DeviceNotFound(m),
            PlatformError::NotReadable(m) => ProctorError::DeviceBusy(m),
            PlatformError::NotSupported(m) => ProctorError::UnsupportedPlatform(m),
            PlatformError::Other(m) => ProctorError::Camera(m),
        }
    }
}

/// The platform camera API.
#[async_trait]
pub trait CameraPlatform: Send + Sync {
    /// Whether the platform exposes a camera API at all.
    fn is_supported(&self) -> bool {
        true
    }

    /// Prompts for (or reuses an existing) camera grant and opens a stream.
    async fn request_stream(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<CameraStream, PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constraints() {
        let constraints = StreamConstraints::default();
        assert_eq!(constraints.facing_mode, FacingMode::User);
        assert_eq!((constraints.ideal_width, constraints.ideal_height), (320, 240));
        assert_eq!((constraints.min_width, constraints.min_height), (240, 180));
        assert!(!constraints.audio);
    }

    #[test]
    fn test_classify_by_name() {
        assert!(matches!(
            PlatformError::classify("NotAllowedError", "Permission dismissed"),
            PlatformError::NotAllowed(_)
        ));
        assert!(matches!(
            PlatformError::classify("NotFoundError", ""),
            PlatformError::NotFound(_)
        ));
        assert!(matches!(
            PlatformError::classify("NotReadableError", "Could not start video source"),
            PlatformError::NotReadable(_)
        ));
    }

    #[test]
    fn test_classify_by_message() {
        assert!(matches!(
            PlatformError::classify("Error", "Permission denied by system"),
            PlatformError::NotAllowed(_)
        ));
        assert!(matches!(
            PlatformError::classify("Error", "Requested device not found"),
            PlatformError::NotFound(_)
        ));
        assert!(matches!(
            PlatformError::classify("Error", "Device in use"),
            PlatformError::NotReadable(_)
        ));
        assert!(matches!(
            PlatformError::classify("Error", "Camera access is not supported here"),
            PlatformError::NotSupported(_)
        ));
        assert!(matches!(
            PlatformError::classify("Error", "boom"),
            PlatformError::Other(_)
        ));
    }

    #[test]
    fn test_into_proctor_error() {
        let err: ProctorError = PlatformError::NotAllowed("denied".into()).into();
        assert!(matches!(err, ProctorError::PermissionDenied(_)));

        let err: ProctorError = PlatformError::NotReadable("busy".into()).into();
        assert!(matches!(err, ProctorError::DeviceBusy(_)));
    }
}
