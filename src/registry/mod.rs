//! Long-lived owner of the contest camera stream
//!
//! One `StreamRegistry` is built by the composition root and shared by every
//! consumer. It holds at most one stream, adopts live streams from existing
//! sinks before asking the platform for a new one, and keeps a record of its
//! intent in the `PersistenceChannel` so a reloaded page can pick the stream
//! back up.

pub mod navigation;
pub mod persistence;

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::RegistryConfig;
use crate::error::{ProctorError, Result};
use crate::media::{CameraPlatform, CameraStream, SinkDirectory, SinkId, SinkKind, StreamConstraints, VideoSink};

pub use navigation::{ChannelNavigator, NavigationGuard, NavigationIntent, Navigator, PageEvent};
pub use persistence::{
    now_millis, FileStore, KeyValueStore, MemoryStore, PersistenceChannel, RegistryState,
    NAVIGATION_TIME_KEY, STATE_KEY,
};

/// Snapshot returned by [`StreamRegistry::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStatus {
    pub is_active: bool,
    pub has_stream: bool,
    pub stream_active: bool,
    pub contest_id: Option<String>,
    pub tracked_sinks: usize,
}

#[derive(Default)]
struct RegistryInner {
    stream: Option<CameraStream>,
    is_active: bool,
    contest_id: Option<String>,
    tracked: Vec<VideoSink>,
    hidden: Vec<SinkId>,
}

pub struct StreamRegistry {
    this: Weak<StreamRegistry>,
    platform: Arc<dyn CameraPlatform>,
    sinks: Arc<SinkDirectory>,
    persistence: PersistenceChannel,
    config: RegistryConfig,
    constraints: StreamConstraints,
    inner: RwLock<RegistryInner>,
    acquire_lock: tokio::sync::Mutex<()>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl StreamRegistry {
    pub fn new(
        platform: Arc<dyn CameraPlatform>,
        sinks: Arc<SinkDirectory>,
        persistence: PersistenceChannel,
        config: RegistryConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            platform,
            sinks,
            persistence,
            config,
            constraints: StreamConstraints::default(),
            inner: RwLock::new(RegistryInner::default()),
            acquire_lock: tokio::sync::Mutex::new(()),
            heartbeat: Mutex::new(None),
        })
    }

    pub fn sinks(&self) -> &Arc<SinkDirectory> {
        &self.sinks
    }

    pub fn persistence(&self) -> &PersistenceChannel {
        &self.persistence
    }

    /// Returns the owned stream, adopting a live one from the sink directory
    /// before asking the platform for a new grant.
    pub async fn acquire(&self, contest_id: &str, force_new: bool) -> Result<CameraStream> {
        let _guard = self.acquire_lock.lock().await;

        {
            let mut inner = self.inner.write();
            inner.contest_id = Some(contest_id.to_string());
            if !force_new {
                if let Some(stream) = inner.stream.clone().filter(CameraStream::active) {
                    inner.is_active = true;
                    drop(inner);
                    tracing::debug!(contest_id = %contest_id, stream_id = %stream.id(), "Reusing owned camera stream");
                    self.persist_quietly();
                    self.start_heartbeat();
                    return Ok(stream);
                }
            }
        }

        if !force_new {
            if let Some((sink, stream)) = self.sinks.find_live_stream() {
                {
                    let mut inner = self.inner.write();
                    inner.stream = Some(stream.clone());
                    inner.is_active = true;
                    track(&mut inner, &sink);
                }
                tracing::info!(
                    contest_id = %contest_id,
                    stream_id = %stream.id(),
                    sink = %sink.id(),
                    "Adopted existing camera stream"
                );
                self.persist_quietly();
                self.start_heartbeat();
                return Ok(stream);
            }
        }

        match self.request_from_platform().await {
            Ok(stream) => {
                if let Some(previous) = self.inner.write().stream.replace(stream.clone()) {
                    if !previous.same_stream(&stream) {
                        previous.stop();
                    }
                }
                self.inner.write().is_active = true;
                tracing::info!(contest_id = %contest_id, stream_id = %stream.id(), "Camera started");
                self.persist_quietly();
                self.start_heartbeat();
                Ok(stream)
            }
            Err(e) => {
                tracing::error!(contest_id = %contest_id, error = %e, "{}", failure_message(&e));
                self.inner.write().is_active = false;
                self.persist_quietly();
                Err(e)
            }
        }
    }

    async fn request_from_platform(&self) -> Result<CameraStream> {
        if !self.platform.is_supported() {
            return Err(ProctorError::UnsupportedPlatform(
                "Camera access is not supported on this platform".to_string(),
            ));
        }
        tracing::debug!(constraints = ?self.constraints, "Requesting camera from platform");
        let stream = self.platform.request_stream(&self.constraints).await?;
        Ok(stream)
    }

    /// Binds the owned stream to `sink`. Returns false when no live stream
    /// is owned.
    pub fn attach(&self, sink: &VideoSink, mark_as_monitored: bool) -> bool {
        let stream = match self.stream().filter(CameraStream::active) {
            Some(stream) => stream,
            None => {
                tracing::warn!(sink = %sink.id(), "No active stream to attach");
                return false;
            }
        };

        sink.set_source(Some(stream));
        if mark_as_monitored {
            sink.update_flags(|flags| {
                flags.monitoring = true;
                flags.global_managed = true;
            });
        }

        let newly_tracked = track(&mut self.inner.write(), sink);
        if newly_tracked {
            self.watch_removal(sink.clone());
        }
        true
    }

    fn watch_removal(&self, sink: VideoSink) {
        let registry = self.this.clone();
        tokio::spawn(async move {
            sink.removed().await;
            if let Some(registry) = registry.upgrade() {
                let mut inner = registry.inner.write();
                inner.tracked.retain(|s| !s.same_sink(&sink));
                inner.hidden.retain(|id| *id != sink.id());
                tracing::debug!(sink = %sink.id(), "Stopped tracking removed sink");
            }
        });
    }

    /// Creates an off-screen keepalive sink bound to the owned stream.
    pub fn create_hidden_sink(&self) -> VideoSink {
        let name = format!("global-camera-stream-{}", now_millis());
        let sink = self.sinks.create(SinkKind::Hidden, name);
        sink.update_flags(|flags| {
            flags.global_camera = true;
            flags.monitoring = true;
        });
        self.inner.write().hidden.push(sink.id());
        self.attach(&sink, false);
        tracing::debug!(sink = %sink.id(), "Created hidden keepalive sink");
        sink
    }

    /// The existing keepalive sink, or a new one.
    pub fn ensure_hidden_sink(&self) -> VideoSink {
        match self.sinks.find(|s| s.flags().global_camera) {
            Some(existing) => existing,
            None => self.create_hidden_sink(),
        }
    }

    /// Takes ownership of a stream acquired by someone else, binds it to
    /// `sink` and adds a keepalive sink.
    pub fn register_stream(&self, stream: CameraStream, contest_id: &str, sink: &VideoSink) {
        {
            let mut inner = self.inner.write();
            inner.stream = Some(stream.clone());
            inner.is_active = true;
            inner.contest_id = Some(contest_id.to_string());
        }
        tracing::info!(contest_id = %contest_id, stream_id = %stream.id(), "Registered camera stream");

        self.attach(sink, true);
        self.persist_quietly();
        self.create_hidden_sink();
        self.start_heartbeat();
    }

    pub fn persist(&self) -> Result<()> {
        let state = {
            let inner = self.inner.read();
            RegistryState {
                is_active: inner.is_active,
                contest_id: inner.contest_id.clone(),
                timestamp: now_millis(),
                stream_active: inner.stream.as_ref().map(CameraStream::active).unwrap_or(false),
            }
        };
        self.persistence.save(&state)
    }

    fn persist_quietly(&self) {
        if let Err(e) = self.persist() {
            tracing::warn!(error = %e, "Failed to save camera state");
        }
    }

    /// Re-adopts a stream recorded by a previous page. Succeeds only when the
    /// record is active and fresh and a live sink still holds the stream.
    pub fn restore(&self) -> bool {
        let state = match self.persistence.load() {
            Some(state) => state,
            None => {
                tracing::debug!("No saved camera state found");
                return false;
            }
        };

        if !state.is_adoptable(now_millis(), self.config.freshness_window) {
            tracing::debug!(
                is_active = state.is_active,
                timestamp = state.timestamp,
                "Saved camera state is stale or inactive"
            );
            return false;
        }

        let (sink, stream) = match self.sinks.find_live_stream() {
            Some(found) => found,
            None => {
                tracing::debug!("Saved camera state found but no live sink holds a stream");
                return false;
            }
        };

        {
            let mut inner = self.inner.write();
            inner.is_active = true;
            inner.contest_id = state.contest_id.clone();
            inner.stream = Some(stream.clone());
            track(&mut inner, &sink);
        }
        tracing::info!(
            contest_id = ?state.contest_id,
            stream_id = %stream.id(),
            "Camera state restored with existing stream"
        );
        self.start_heartbeat();
        true
    }

    /// Stops the stream, removes keepalive sinks and clears persisted state.
    pub fn release(&self) {
        self.stop_heartbeat();

        let (stream, hidden) = {
            let mut inner = self.inner.write();
            inner.is_active = false;
            inner.contest_id = None;
            inner.tracked.clear();
            (inner.stream.take(), std::mem::take(&mut inner.hidden))
        };

        if let Some(stream) = stream {
            stream.stop();
            tracing::info!(stream_id = %stream.id(), "Camera stopped");
        }

        for sink in self.sinks.filter(|s| s.flags().global_camera) {
            self.sinks.remove(sink.id());
        }
        for id in hidden {
            self.sinks.remove(id);
        }

        if let Err(e) = self.persistence.clear() {
            tracing::warn!(error = %e, "Failed to clear camera state");
        }
    }

    pub fn stream(&self) -> Option<CameraStream> {
        self.inner.read().stream.clone()
    }

    pub fn is_active(&self) -> bool {
        self.inner.read().is_active
    }

    pub fn contest_id(&self) -> Option<String> {
        self.inner.read().contest_id.clone()
    }

    /// Active flag set and the owned stream still live.
    pub fn is_stream_active(&self) -> bool {
        let inner = self.inner.read();
        inner.is_active && inner.stream.as_ref().map(CameraStream::active).unwrap_or(false)
    }

    /// True when the registry is active and `stream` is the one it owns.
    pub fn owns(&self, stream: &CameraStream) -> bool {
        self.is_stream_active()
            && self
                .stream()
                .map(|owned| owned.same_stream(stream))
                .unwrap_or(false)
    }

    pub fn status(&self) -> RegistryStatus {
        let inner = self.inner.read();
        RegistryStatus {
            is_active: inner.is_active,
            has_stream: inner.stream.is_some(),
            stream_active: inner.stream.as_ref().map(CameraStream::active).unwrap_or(false),
            contest_id: inner.contest_id.clone(),
            tracked_sinks: inner.tracked.len(),
        }
    }

    fn start_heartbeat(&self) {
        let mut heartbeat = self.heartbeat.lock();
        if heartbeat.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }

        let registry = self.this.clone();
        let period = self.config.heartbeat_interval;
        *heartbeat = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(live) = registry.upgrade() else {
                    break;
                };
                if live.is_active() {
                    live.persist_quietly();
                }
            }
        }));
    }

    fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for StreamRegistry {
    fn drop(&mut self) {
        if let Some(handle) = self.heartbeat.get_mut().take() {
            handle.abort();
        }
    }
}

/// Returns true if the sink was not tracked yet.
fn track(inner: &mut RegistryInner, sink: &VideoSink) -> bool {
    if inner.tracked.iter().any(|s| s.same_sink(sink)) {
        return false;
    }
    inner.tracked.push(sink.clone());
    true
}

/// User-facing message for a failed camera acquisition.
pub fn failure_message(err: &ProctorError) -> String {
    format!("Failed to access camera. {}", err.guidance())
}
