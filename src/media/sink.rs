use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;

use super::stream::CameraStream;
use crate::error::{ProctorError, Result};

static NEXT_SINK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SinkId(u64);

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// On-screen preview owned by the UI
    Visible,
    /// Off-screen, zero-opacity keepalive element
    Hidden,
    /// Element the proctoring session grabs frames from
    Capture,
}

/// Discovery markers other components look for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkFlags {
    pub monitoring: bool,
    pub global_managed: bool,
    pub persistent: bool,
    pub global_camera: bool,
}

/// A presentation element bound (or bindable) to a camera stream.
#[derive(Clone)]
pub struct VideoSink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    id: SinkId,
    kind: SinkKind,
    name: String,
    flags: Mutex<SinkFlags>,
    source: Mutex<Option<CameraStream>>,
    removed: watch::Sender<bool>,
}

impl VideoSink {
    pub fn new(kind: SinkKind, name: impl Into<String>) -> Self {
        let (removed, _) = watch::channel(false);
        Self {
            inner: Arc::new(SinkInner {
                id: SinkId(NEXT_SINK_ID.fetch_add(1, Ordering::Relaxed)),
                kind,
                name: name.into(),
                flags: Mutex::new(SinkFlags::default()),
                source: Mutex::new(None),
                removed,
            }),
        }
    }

    pub fn id(&self) -> SinkId {
        self.inner.id
    }

    pub fn kind(&self) -> SinkKind {
        self.inner.kind
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn flags(&self) -> SinkFlags {
        *self.inner.flags.lock()
    }

    pub fn update_flags(&self, update: impl FnOnce(&mut SinkFlags)) {
        update(&mut self.inner.flags.lock());
    }

    pub fn set_source(&self, stream: Option<CameraStream>) {
        *self.inner.source.lock() = stream;
    }

    pub fn source(&self) -> Option<CameraStream> {
        self.inner.source.lock().clone()
    }

    /// The bound stream, if it is still live.
    pub fn live_source(&self) -> Option<CameraStream> {
        self.source().filter(CameraStream::active)
    }

    /// Live source that has reported usable video dimensions.
    pub fn is_ready(&self) -> bool {
        self.live_source().map(|s| s.has_video()).unwrap_or(false)
    }

    /// Resolves once the bound stream reports usable video dimensions.
    pub async fn wait_until_ready(&self) -> Result<()> {
        let stream = self.source().ok_or(ProctorError::StreamInactive)?;
        let mut dimensions = stream.watch_dimensions();
        dimensions
            .wait_for(|d| d.map(|d| d.is_usable()).unwrap_or(false))
            .await
            .map_err(|_| ProctorError::StreamInactive)?;
        Ok(())
    }

    pub fn is_removed(&self) -> bool {
        *self.inner.removed.borrow()
    }

    /// Resolves when the sink is taken out of its directory.
    pub async fn removed(&self) {
        let mut rx = self.inner.removed.subscribe();
        let _ = rx.wait_for(|removed| *removed).await;
    }

    fn mark_removed(&self) {
        self.inner.removed.send_replace(true);
    }

    pub fn same_sink(&self, other: &VideoSink) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for VideoSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoSink")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("name", &self.inner.name)
            .field("flags", &self.flags())
            .field("has_source", &self.inner.source.lock().is_some())
            .finish()
    }
}

/// Every sink currently present on the page.
#[derive(Default)]
pub struct SinkDirectory {
    sinks: RwLock<Vec<VideoSink>>,
}

impl SinkDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a sink and inserts it into the directory.
    pub fn create(&self, kind: SinkKind, name: impl Into<String>) -> VideoSink {
        let sink = VideoSink::new(kind, name);
        self.insert(sink.clone());
        sink
    }

    pub fn insert(&self, sink: VideoSink) {
        let mut sinks = self.sinks.write();
        if !sinks.iter().any(|s| s.same_sink(&sink)) {
            sinks.push(sink);
        }
    }

    /// Removes a sink and notifies anything watching for its removal.
    pub fn remove(&self, id: SinkId) -> Option<VideoSink> {
        let removed = {
            let mut sinks = self.sinks.write();
            let index = sinks.iter().position(|s| s.id() == id)?;
            sinks.remove(index)
        };
        removed.mark_removed();
        tracing::debug!(sink = %id, name = %removed.name(), "Sink removed");
        Some(removed)
    }

    pub fn get(&self, id: SinkId) -> Option<VideoSink> {
        self.sinks.read().iter().find(|s| s.id() == id).cloned()
    }

    pub fn contains(&self, id: SinkId) -> bool {
        self.sinks.read().iter().any(|s| s.id() == id)
    }

    pub fn find(&self, predicate: impl Fn(&VideoSink) -> bool) -> Option<VideoSink> {
        self.sinks.read().iter().find(|s| predicate(s)).cloned()
    }

    pub fn filter(&self, predicate: impl Fn(&VideoSink) -> bool) -> Vec<VideoSink> {
        self.sinks.read().iter().filter(|s| predicate(s)).cloned().collect()
    }

    /// First sink holding a live stream, in insertion order.
    pub fn find_live_stream(&self) -> Option<(VideoSink, CameraStream)> {
        self.sinks
            .read()
            .iter()
            .find_map(|s| s.live_source().map(|stream| (s.clone(), stream)))
    }

    pub fn len(&self) -> usize {
        self.sinks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::stream::Dimensions;
    use crate::testing::live_stream;
    use std::time::Duration;

    #[test]
    fn test_directory_finds_first_live_stream() {
        let directory = SinkDirectory::new();
        let dead = directory.create(SinkKind::Visible, "dead");
        let live = directory.create(SinkKind::Visible, "live");

        let stopped = live_stream();
        stopped.stop();
        dead.set_source(Some(stopped));

        let stream = live_stream();
        live.set_source(Some(stream.clone()));

        let (sink, found) = directory.find_live_stream().unwrap();
        assert!(sink.same_sink(&live));
        assert_eq!(found, stream);
    }

    #[test]
    fn test_remove_marks_sink_removed() {
        let directory = SinkDirectory::new();
        let sink = directory.create(SinkKind::Hidden, "keepalive");

        assert!(!sink.is_removed());
        assert!(directory.remove(sink.id()).is_some());
        assert!(sink.is_removed());
        assert!(directory.is_empty());
        assert!(directory.remove(sink.id()).is_none());
    }

    #[test]
    fn test_insert_is_idempotent() {
        let directory = SinkDirectory::new();
        let sink = VideoSink::new(SinkKind::Capture, "capture");
        directory.insert(sink.clone());
        directory.insert(sink);
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_readiness_requires_dimensions() {
        let sink = VideoSink::new(SinkKind::Capture, "capture");
        assert!(!sink.is_ready());

        let stream = live_stream();
        sink.set_source(Some(stream.clone()));
        assert!(!sink.is_ready());

        stream.report_dimensions(Dimensions::new(320, 240));
        assert!(sink.is_ready());

        stream.stop();
        assert!(!sink.is_ready());
    }

    #[tokio::test]
    async fn test_wait_until_ready_resolves_on_metadata() {
        let sink = VideoSink::new(SinkKind::Capture, "capture");
        let stream = live_stream();
        sink.set_source(Some(stream.clone()));

        let waiter = {
            let sink = sink.clone();
            tokio::spawn(async move { sink.wait_until_ready().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        stream.report_dimensions(Dimensions::new(640, 480));

        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_wait_until_ready_without_source_fails() {
        let sink = VideoSink::new(SinkKind::Capture, "capture");
        assert!(matches!(
            sink.wait_until_ready().await,
            Err(ProctorError::StreamInactive)
        ));
    }

    #[tokio::test]
    async fn test_removed_future_completes() {
        let directory = SinkDirectory::new();
        let sink = directory.create(SinkKind::Visible, "preview");

        let watcher = {
            let sink = sink.clone();
            tokio::spawn(async move { sink.removed().await })
        };

        directory.remove(sink.id());
        tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .expect("removal not observed")
            .unwrap();
    }
}
