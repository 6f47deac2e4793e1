use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::platform::{CameraPlatform, PlatformError, StreamConstraints};
use super::stream::{CameraStream, Dimensions, FrameSource, MediaTrack};
use crate::error::{ProctorError, Result};

/// Camera backend that replays JPEG files from a directory in name order,
/// looping at the end. Lets the proctoring loop run headless.
pub struct ReplayCamera {
    frames_dir: PathBuf,
}

impl ReplayCamera {
    pub fn new(frames_dir: impl Into<PathBuf>) -> Self {
        Self {
            frames_dir: frames_dir.into(),
        }
    }

    pub fn frames_dir(&self) -> &Path {
        &self.frames_dir
    }

    async fn list_frames(&self) -> io::Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.frames_dir).await?;
        let mut frames = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_jpeg = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg"))
                .unwrap_or(false);
            if is_jpeg {
                frames.push(path);
            }
        }

        frames.sort();
        Ok(frames)
    }
}

#[async_trait]
impl CameraPlatform for ReplayCamera {
    async fn request_stream(
        &self,
        constraints: &StreamConstraints,
    ) -> std::result::Result<CameraStream, PlatformError> {
        let frames = self
            .list_frames()
            .await
            .map_err(|e| frames_dir_error(&self.frames_dir, &e))?;

        if frames.is_empty() {
            return Err(PlatformError::NotFound(format!(
                "No JPEG frames found in {}",
                self.frames_dir.display()
            )));
        }

        tracing::info!(
            frames_dir = %self.frames_dir.display(),
            frame_count = frames.len(),
            "Opening replay camera"
        );

        let source = Arc::new(ReplaySource {
            frames,
            cursor: AtomicUsize::new(0),
        });
        let label = format!("replay:{}", self.frames_dir.display());
        let stream = CameraStream::new(vec![MediaTrack::video(label)], source);
        stream.report_dimensions(Dimensions::new(
            constraints.ideal_width,
            constraints.ideal_height,
        ));

        Ok(stream)
    }
}

/// Maps a directory read failure onto the platform error a browser would
/// raise for the same condition.
fn frames_dir_error(dir: &Path, err: &io::Error) -> PlatformError {
    let name = match err.kind() {
        io::ErrorKind::NotFound => "NotFoundError",
        io::ErrorKind::PermissionDenied => "NotAllowedError",
        _ => "NotReadableError",
    };
    PlatformError::classify(
        name,
        &format!("Cannot read frames directory {}: {}", dir.display(), err),
    )
}

struct ReplaySource {
    frames: Vec<PathBuf>,
    cursor: AtomicUsize,
}

#[async_trait]
impl FrameSource for ReplaySource {
    async fn grab_jpeg(&self, _width: u32, _height: u32, _quality: f32) -> Result<Vec<u8>> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.frames.len();
        let path = &self.frames[index];

        tokio::fs::read(path).await.map_err(|e| {
            ProctorError::Camera(format!("Failed to read frame {}: {}", path.display(), e))
        })
    }
}
