use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::Result;

/// Video dimensions reported once a stream starts delivering frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_usable(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Produces encoded frames for a stream. Implemented by each camera backend.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Grab the current frame scaled to `width`x`height` and JPEG-encoded.
    /// An empty buffer means no frame was available.
    async fn grab_jpeg(&self, width: u32, height: u32, quality: f32) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    Live,
    Ended,
}

/// One track of a camera stream.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

struct TrackInner {
    id: String,
    kind: &'static str,
    label: String,
    live: AtomicBool,
}

impl MediaTrack {
    pub fn video(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: uuid::Uuid::new_v4().to_string(),
                kind: "video",
                label: label.into(),
                live: AtomicBool::new(true),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> &str {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst)
    }

    pub fn ready_state(&self) -> TrackState {
        if self.is_live() {
            TrackState::Live
        } else {
            TrackState::Ended
        }
    }

    /// Ends the track. Ended tracks never come back.
    pub fn stop(&self) {
        self.inner.live.store(false, Ordering::SeqCst);
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

/// Handle to a live, audio-less camera capture. Clones share the same
/// underlying platform stream.
#[derive(Clone)]
pub struct CameraStream {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    id: String,
    tracks: Vec<MediaTrack>,
    source: Arc<dyn FrameSource>,
    dimensions: watch::Sender<Option<Dimensions>>,
}

impl CameraStream {
    pub fn new(tracks: Vec<MediaTrack>, source: Arc<dyn FrameSource>) -> Self {
        let (dimensions, _) = watch::channel(None);
        Self {
            inner: Arc::new(StreamInner {
                id: uuid::Uuid::new_v4().to_string(),
                tracks,
                source,
                dimensions,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.inner.tracks
    }

    /// True while at least one track is live.
    pub fn active(&self) -> bool {
        self.inner.tracks.iter().any(MediaTrack::is_live)
    }

    pub fn stop(&self) {
        for track in &self.inner.tracks {
            track.stop();
        }
        tracing::debug!(stream_id = %self.inner.id, "Camera stream tracks stopped");
    }

    pub fn same_stream(&self, other: &CameraStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Called by the backend once the stream delivers usable video.
    pub fn report_dimensions(&self, dimensions: Dimensions) {
        self.inner.dimensions.send_replace(Some(dimensions));
    }

    pub fn dimensions(&self) -> Option<Dimensions> {
        *self.inner.dimensions.borrow()
    }

    pub fn has_video(&self) -> bool {
        self.dimensions().map(|d| d.is_usable()).unwrap_or(false)
    }

    pub(crate) fn watch_dimensions(&self) -> watch::Receiver<Option<Dimensions>> {
        self.inner.dimensions.subscribe()
    }

    pub async fn grab_jpeg(&self, width: u32, height: u32, quality: f32) -> Result<Vec<u8>> {
        self.inner.source.grab_jpeg(width, height, quality).await
    }
}

impl PartialEq for CameraStream {
    fn eq(&self, other: &Self) -> bool {
        self.same_stream(other)
    }
}

impl Eq for CameraStream {}

impl fmt::Debug for CameraStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraStream")
            .field("id", &self.inner.id)
            .field("active", &self.active())
            .field("tracks", &self.inner.tracks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticFrames;

    fn stream() -> CameraStream {
        CameraStream::new(vec![MediaTrack::video("cam")], Arc::new(StaticFrames::jpeg()))
    }

    #[test]
    fn test_stream_active_until_stopped() {
        let stream = stream();
        assert!(stream.active());

        stream.stop();
        assert!(!stream.active());
        assert_eq!(stream.tracks()[0].ready_state(), TrackState::Ended);
    }

    #[test]
    fn test_clones_share_identity() {
        let a = stream();
        let b = a.clone();
        let c = stream();

        assert_eq!(a, b);
        assert_ne!(a, c);

        b.stop();
        assert!(!a.active());
    }

    #[test]
    fn test_dimensions_reported_once_video_flows() {
        let stream = stream();
        assert!(!stream.has_video());

        stream.report_dimensions(Dimensions::new(320, 240));
        assert!(stream.has_video());
        assert_eq!(stream.dimensions(), Some(Dimensions::new(320, 240)));
    }

    #[test]
    fn test_zero_dimensions_are_not_usable() {
        let stream = stream();
        stream.report_dimensions(Dimensions::new(0, 0));
        assert!(!stream.has_video());
    }
}
