use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::capture::CaptureSurface;
use super::evaluator::{MonitorResponse, StatusResponse, ViolationEvaluator};
use super::events::{Indicator, SessionEvent};
use super::state::SessionState;
use crate::config::MonitorConfig;
use crate::error::{ProctorError, Result};
use crate::media::{CameraPlatform, CameraStream, SinkDirectory, StreamConstraints, VideoSink};
use crate::registry::{NavigationGuard, NavigationIntent, StreamRegistry};

const EVENT_CAPACITY: usize = 64;
const PERSISTENT_SINK_GRACE: Duration = Duration::from_secs(1);
const DEFAULT_WARNING_MESSAGE: &str = "Face detection violation detected.";

/// Face-presence monitoring for one contest attempt.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct ProctoringSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    contest_id: String,
    csrf_token: String,
    config: MonitorConfig,
    evaluator: Arc<dyn ViolationEvaluator>,
    platform: Arc<dyn CameraPlatform>,
    sinks: Arc<SinkDirectory>,
    registry: Option<Arc<StreamRegistry>>,
    navigation: Option<Arc<NavigationGuard>>,
    capture: CaptureSurface,
    data: Mutex<SessionData>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    events: broadcast::Sender<SessionEvent>,
}

#[derive(Default)]
struct SessionData {
    state: SessionState,
    violation_count: u32,
    warning_count: u32,
    terminated: bool,
    stream: Option<HeldStream>,
    last_error: Option<String>,
    /// Bumped by every start and stop. A start attempt only commits while
    /// its generation is still current.
    generation: u64,
}

impl SessionData {
    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.state == SessionState::Starting
    }
}

/// Where the session's stream came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamOrigin {
    /// The registry's shared stream.
    Registry,
    /// Borrowed from another sink on the page.
    Page,
    /// Granted to this session by the platform.
    Fresh,
}

struct HeldStream {
    stream: CameraStream,
    origin: StreamOrigin,
}

pub struct SessionBuilder {
    contest_id: String,
    csrf_token: String,
    config: MonitorConfig,
    evaluator: Arc<dyn ViolationEvaluator>,
    platform: Arc<dyn CameraPlatform>,
    sinks: Arc<SinkDirectory>,
    registry: Option<Arc<StreamRegistry>>,
    navigation: Option<Arc<NavigationGuard>>,
}

impl SessionBuilder {
    pub fn registry(mut self, registry: Arc<StreamRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn navigation(mut self, navigation: Arc<NavigationGuard>) -> Self {
        self.navigation = Some(navigation);
        self
    }

    pub fn build(self) -> Result<ProctoringSession> {
        if self.contest_id.trim().is_empty() {
            return Err(ProctorError::InvalidArgument(
                "contest id is required".to_string(),
            ));
        }
        if self.csrf_token.trim().is_empty() {
            return Err(ProctorError::InvalidArgument(
                "csrf token is required".to_string(),
            ));
        }

        let capture = CaptureSurface::new(
            &self.sinks,
            self.config.capture_width,
            self.config.capture_height,
            self.config.jpeg_quality,
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(ProctoringSession {
            inner: Arc::new(SessionInner {
                contest_id: self.contest_id,
                csrf_token: self.csrf_token,
                config: self.config,
                evaluator: self.evaluator,
                platform: self.platform,
                sinks: self.sinks,
                registry: self.registry,
                navigation: self.navigation,
                capture,
                data: Mutex::new(SessionData::default()),
                tasks: Mutex::new(Vec::new()),
                events,
            }),
        })
    }
}

impl ProctoringSession {
    pub fn builder(
        contest_id: impl Into<String>,
        csrf_token: impl Into<String>,
        config: MonitorConfig,
        evaluator: Arc<dyn ViolationEvaluator>,
        platform: Arc<dyn CameraPlatform>,
        sinks: Arc<SinkDirectory>,
    ) -> SessionBuilder {
        SessionBuilder {
            contest_id: contest_id.into(),
            csrf_token: csrf_token.into(),
            config,
            evaluator,
            platform,
            sinks,
            registry: None,
            navigation: None,
        }
    }

    /// Session without a registry or navigation guard.
    pub fn new(
        contest_id: impl Into<String>,
        csrf_token: impl Into<String>,
        config: MonitorConfig,
        evaluator: Arc<dyn ViolationEvaluator>,
        platform: Arc<dyn CameraPlatform>,
        sinks: Arc<SinkDirectory>,
    ) -> Result<Self> {
        Self::builder(contest_id, csrf_token, config, evaluator, platform, sinks).build()
    }

    pub fn contest_id(&self) -> &str {
        &self.inner.contest_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.inner.data.lock().state
    }

    pub fn is_monitoring_active(&self) -> bool {
        self.state().is_monitoring()
    }

    pub fn violation_count(&self) -> u32 {
        self.inner.data.lock().violation_count
    }

    pub fn warning_count(&self) -> u32 {
        self.inner.data.lock().warning_count
    }

    pub fn is_contest_terminated(&self) -> bool {
        self.inner.data.lock().terminated
    }

    pub fn stream(&self) -> Option<CameraStream> {
        self.inner
            .data
            .lock()
            .stream
            .as_ref()
            .map(|held| held.stream.clone())
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.data.lock().last_error.clone()
    }

    pub fn capture_sink(&self) -> &VideoSink {
        self.inner.capture.sink()
    }

    /// Obtains a camera stream, announces the session to the server and
    /// starts sampling. Returns true once monitoring is running; failures
    /// are reported through `last_error` and an `Error` event.
    pub async fn start(&self) -> bool {
        let generation = {
            let mut data = self.inner.data.lock();
            match data.state {
                SessionState::Active | SessionState::Warning => {
                    tracing::debug!(contest_id = %self.inner.contest_id, "Proctoring already active");
                    return true;
                }
                SessionState::Starting => {
                    tracing::debug!(contest_id = %self.inner.contest_id, "Proctoring start already in progress");
                    return false;
                }
                SessionState::Terminated => {
                    data.last_error = Some("Contest has been terminated.".to_string());
                    return false;
                }
                SessionState::Inactive => {
                    data.state = SessionState::Starting;
                    data.generation += 1;
                    data.last_error = None;
                    data.generation
                }
            }
        };

        tracing::info!(contest_id = %self.inner.contest_id, "Starting real-time proctoring");
        self.emit(SessionEvent::status(Indicator::Warning, "Proctoring: Starting..."));

        match self.try_start(generation).await {
            Ok(()) => true,
            Err(ProctorError::StartAborted(reason)) => {
                // stop() already released whatever this attempt bound.
                tracing::info!(contest_id = %self.inner.contest_id, reason = %reason, "Proctoring start abandoned");
                false
            }
            Err(e) => {
                self.fail_start(generation, e);
                false
            }
        }
    }

    async fn try_start(&self, generation: u64) -> Result<()> {
        let stream = self.resolve_stream(generation).await?;
        if !stream.active() {
            return Err(ProctorError::StreamInactive);
        }
        tracing::debug!(
            stream_id = %stream.id(),
            tracks = stream.tracks().len(),
            dimensions = ?stream.dimensions(),
            "Camera stream ready"
        );
        self.ensure_current(generation, "session stopped while acquiring the camera")?;

        let response = self
            .inner
            .evaluator
            .start_session(&self.inner.contest_id, &self.inner.csrf_token)
            .await?;
        if !response.success {
            return Err(ProctorError::ServerRejected(
                response
                    .message
                    .unwrap_or_else(|| "Failed to start proctoring on server".to_string()),
            ));
        }

        {
            let mut data = self.inner.data.lock();
            if !data.is_current(generation) {
                return Err(ProctorError::StartAborted(
                    "session stopped during server negotiation".to_string(),
                ));
            }
            data.state = SessionState::Active;
            data.violation_count = 0;
            data.warning_count = 0;
        }

        self.start_monitoring();
        tracing::info!(contest_id = %self.inner.contest_id, "Real-time proctoring started");
        self.emit(SessionEvent::status(Indicator::Active, "Proctoring: Active ✓"));
        self.emit(SessionEvent::Started);
        Ok(())
    }

    fn ensure_current(&self, generation: u64, reason: &str) -> Result<()> {
        if !self.inner.data.lock().is_current(generation) {
            return Err(ProctorError::StartAborted(reason.to_string()));
        }
        Ok(())
    }

    /// Finds a stream to sample from: the registry's, a persistent sink left
    /// by the previous page, a monitoring sink, any live sink, and finally
    /// a fresh platform grant.
    async fn resolve_stream(&self, generation: u64) -> Result<CameraStream> {
        let inner = &self.inner;
        let capture = inner.capture.sink();

        if let Some(registry) = &inner.registry {
            if registry.is_stream_active() {
                if let Some(stream) = registry.stream() {
                    tracing::info!(stream_id = %stream.id(), "Using registry stream for proctoring");
                    self.adopt(&stream, StreamOrigin::Registry, generation)?;
                    capture.wait_until_ready().await?;
                    return Ok(stream);
                }
            }
        }

        let persistent = inner
            .sinks
            .find(|s| !s.same_sink(capture) && s.flags().persistent && s.live_source().is_some());
        if let Some(sink) = persistent {
            if let Some(stream) = sink.live_source() {
                tracing::info!(sink = %sink.id(), "Found persistent camera stream from navigation");
                self.adopt(&stream, StreamOrigin::Page, generation)?;
                self.schedule_sink_cleanup(sink);
                capture.wait_until_ready().await?;
                return Ok(stream);
            }
        }

        let existing = inner
            .sinks
            .find(|s| !s.same_sink(capture) && s.flags().monitoring && s.live_source().is_some())
            .or_else(|| {
                inner
                    .sinks
                    .find(|s| !s.same_sink(capture) && s.live_source().is_some())
            });
        if let Some(sink) = existing {
            if let Some(stream) = sink.live_source() {
                tracing::info!(sink = %sink.id(), "Reusing existing camera stream for proctoring");
                self.adopt(&stream, StreamOrigin::Page, generation)?;
                sink.update_flags(|flags| flags.monitoring = true);
                capture.wait_until_ready().await?;
                return Ok(stream);
            }
        }

        self.acquire_fresh(generation).await
    }

    async fn acquire_fresh(&self, generation: u64) -> Result<CameraStream> {
        let inner = &self.inner;
        if !inner.platform.is_supported() {
            return Err(ProctorError::UnsupportedPlatform(
                "Camera access is not supported on this platform".to_string(),
            ));
        }

        tracing::info!("Requesting new camera access");
        let stream = inner
            .platform
            .request_stream(&StreamConstraints::default())
            .await?;

        if let Err(e) = self.adopt(&stream, StreamOrigin::Fresh, generation) {
            stream.stop();
            return Err(e);
        }
        if let Some(registry) = &inner.registry {
            registry.register_stream(stream.clone(), &inner.contest_id, inner.capture.sink());
        }

        let timeout = inner.config.acquisition_timeout;
        tokio::time::timeout(timeout, inner.capture.sink().wait_until_ready())
            .await
            .map_err(|_| ProctorError::AcquisitionTimeout(timeout))??;
        Ok(stream)
    }

    /// Binds `stream` to the capture surface and records it as ours, unless
    /// the start attempt `generation` has been stopped in the meantime.
    fn adopt(&self, stream: &CameraStream, origin: StreamOrigin, generation: u64) -> Result<()> {
        let mut data = self.inner.data.lock();
        if !data.is_current(generation) {
            return Err(ProctorError::StartAborted(
                "session stopped while acquiring the camera".to_string(),
            ));
        }

        self.inner.capture.bind(Some(stream.clone()));
        self.inner.capture.sink().update_flags(|flags| {
            flags.monitoring = true;
            flags.global_managed = origin == StreamOrigin::Registry;
        });
        data.stream = Some(HeldStream {
            stream: stream.clone(),
            origin,
        });
        Ok(())
    }

    fn schedule_sink_cleanup(&self, sink: VideoSink) {
        let sinks = self.inner.sinks.clone();
        tokio::spawn(async move {
            tokio::time::sleep(PERSISTENT_SINK_GRACE).await;
            if sinks.remove(sink.id()).is_some() {
                tracing::debug!(sink = %sink.id(), "Cleaned up persistent sink");
            }
        });
    }

    fn fail_start(&self, generation: u64, err: ProctorError) {
        let message = format!("Failed to start camera proctoring. {}", err.guidance());

        let held = {
            let mut data = self.inner.data.lock();
            if data.generation != generation {
                None
            } else {
                data.state = SessionState::Inactive;
                data.last_error = Some(message.clone());
                Some(self.detach_stream(&mut data))
            }
        };
        let Some(held) = held else {
            tracing::debug!(error = %err, "Stopped start attempt failed afterwards");
            return;
        };

        tracing::error!(contest_id = %self.inner.contest_id, error = %err, "Failed to start proctoring");
        self.dispose_stream(held, true);

        self.emit(SessionEvent::status(Indicator::Error, "Proctoring: Error"));
        self.emit(SessionEvent::Error { message });
    }

    /// Stops sampling and lets go of the stream. The registry keeps streams
    /// it owns alive.
    pub fn stop(&self) {
        let held = {
            let mut data = self.inner.data.lock();
            match data.state {
                SessionState::Inactive | SessionState::Terminated => return,
                _ => {
                    data.state = SessionState::Inactive;
                    data.generation += 1;
                    self.detach_stream(&mut data)
                }
            }
        };

        self.stop_monitoring();
        self.dispose_stream(held, false);
        tracing::info!(contest_id = %self.inner.contest_id, "Real-time proctoring stopped");
        self.emit(SessionEvent::status(Indicator::Inactive, "Proctoring: Stopped"));
        self.emit(SessionEvent::Stopped);
    }

    /// Final-submission teardown. Stops proctoring, then releases the
    /// registry's camera and wipes the persisted camera state so no later
    /// page picks the stream back up.
    pub fn finish_contest(&self) {
        tracing::info!(contest_id = %self.inner.contest_id, "Stopping camera for final submission");
        self.stop();
        if let Some(registry) = &self.inner.registry {
            registry.release();
        }
        tracing::info!(contest_id = %self.inner.contest_id, "Final submission cleanup complete");
    }

    /// Takes the held stream and unbinds the capture surface. Called with
    /// the data lock held so binding and unbinding never interleave.
    fn detach_stream(&self, data: &mut SessionData) -> Option<HeldStream> {
        let held = data.stream.take();
        if held.is_some() {
            self.inner.capture.bind(None);
        }
        held
    }

    /// Ends a stream the session let go of. Registry streams always keep
    /// running; `keep_borrowed` also spares streams taken from page sinks.
    fn dispose_stream(&self, held: Option<HeldStream>, keep_borrowed: bool) {
        let Some(HeldStream { stream, origin }) = held else {
            return;
        };
        let registry_owned = self
            .inner
            .registry
            .as_ref()
            .map(|registry| registry.owns(&stream))
            .unwrap_or(false);

        if registry_owned {
            tracing::debug!(stream_id = %stream.id(), "Leaving registry-managed stream running");
        } else if keep_borrowed && origin != StreamOrigin::Fresh {
            tracing::debug!(stream_id = %stream.id(), ?origin, "Leaving borrowed stream with its sink");
        } else {
            stream.stop();
        }
    }

    fn start_monitoring(&self) {
        let period = self.inner.config.check_interval;
        let initial_delay = self.inner.config.initial_check_delay;
        tracing::info!(interval_ms = period.as_millis() as u64, "Starting face monitoring");

        let weak = Arc::downgrade(&self.inner);
        let sampler = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                ticker.tick().await;
                let Some(session) = upgrade(&weak) else {
                    break;
                };
                tokio::spawn(async move { session.check_face().await });
            }
        });

        let weak = Arc::downgrade(&self.inner);
        let initial = tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            if let Some(session) = upgrade(&weak) {
                tracing::debug!("Performing initial face check");
                session.check_face().await;
            }
        });

        let mut tasks = self.inner.tasks.lock();
        for task in tasks.drain(..) {
            task.abort();
        }
        tasks.push(sampler);
        tasks.push(initial);
    }

    fn stop_monitoring(&self) {
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Samples one frame and applies the server's verdict. Does nothing
    /// unless monitoring is running and the capture surface has video.
    pub async fn check_face(&self) {
        if !self.is_monitoring_active() {
            tracing::debug!(state = ?self.state(), "Face check skipped, session not monitoring");
            return;
        }
        if !self.inner.capture.is_ready() {
            tracing::debug!("Video not ready for capture");
            return;
        }

        let image = match self.inner.capture.capture_data_url().await {
            Ok(Some(image)) => image,
            Ok(None) => {
                tracing::warn!("Failed to capture valid image data");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Frame capture failed");
                self.emit(SessionEvent::status(Indicator::Error, "Proctoring: Connection Error"));
                return;
            }
        };

        tracing::debug!(bytes = image.len(), "Sending frame for analysis");
        let verdict = self
            .inner
            .evaluator
            .evaluate_frame(&self.inner.contest_id, &self.inner.csrf_token, &image)
            .await;

        if !self.is_monitoring_active() {
            tracing::debug!("Discarding verdict that arrived after monitoring ended");
            return;
        }

        match verdict {
            Ok(verdict) => self.apply_verdict(verdict),
            Err(e) => {
                tracing::warn!(error = %e, transient = e.is_transient(), "Face check failed");
                self.emit(SessionEvent::status(Indicator::Error, "Proctoring: Connection Error"));
            }
        }
    }

    fn apply_verdict(&self, verdict: MonitorResponse) {
        if verdict.contest_terminated {
            self.handle_termination(&verdict);
            return;
        }

        let max_warnings = self.inner.config.max_warnings;
        let warning_count = {
            let mut data = self.inner.data.lock();
            if !data.state.is_monitoring() {
                return;
            }
            data.violation_count = verdict.violation_count.unwrap_or(0);
            data.warning_count = verdict.warning_count.unwrap_or(0);
            if verdict.violation_added {
                data.state = SessionState::Warning;
            } else if verdict.face_detected {
                data.state = SessionState::Active;
            }
            data.warning_count
        };

        if verdict.violation_added {
            tracing::warn!(
                contest_id = %self.inner.contest_id,
                violation_type = ?verdict.violation_type,
                violation_count = verdict.violation_count.unwrap_or(0),
                warning_count,
                "Proctoring violation detected"
            );
            self.emit(SessionEvent::status(
                Indicator::Warning,
                format!("Warning {}/{}", warning_count, max_warnings),
            ));
            self.emit(SessionEvent::Warning {
                warning_count,
                max_warnings,
                message: verdict
                    .message
                    .unwrap_or_else(|| DEFAULT_WARNING_MESSAGE.to_string()),
            });
        } else if verdict.face_detected {
            self.emit(SessionEvent::status(Indicator::Active, "Proctoring: Face Detected ✓"));
        } else {
            self.emit(SessionEvent::status(Indicator::Warning, "Proctoring: No Face Detected"));
        }
    }

    fn handle_termination(&self, verdict: &MonitorResponse) {
        let held = {
            let mut data = self.inner.data.lock();
            if data.state.is_terminal() {
                return;
            }
            data.state = SessionState::Terminated;
            data.terminated = true;
            if let Some(count) = verdict.violation_count {
                data.violation_count = count;
            }
            if let Some(count) = verdict.warning_count {
                data.warning_count = count;
            }
            self.detach_stream(&mut data)
        };

        let violation_count = verdict
            .violation_count
            .unwrap_or(self.inner.config.max_warnings + 1);
        tracing::warn!(
            contest_id = %self.inner.contest_id,
            violation_count,
            "Contest terminated"
        );

        self.stop_monitoring();
        self.dispose_stream(held, false);

        let url = self.inner.config.redirect_url.clone();
        let delay = self.inner.config.redirect_delay;
        self.emit(SessionEvent::status(Indicator::Terminated, "Contest Terminated"));
        self.emit(SessionEvent::Terminated { violation_count });
        self.emit(SessionEvent::RedirectScheduled {
            url: url.clone(),
            delay_secs: delay.as_secs(),
        });

        let events = self.inner.events.clone();
        let navigation = self.inner.navigation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(SessionEvent::Redirect { url: url.clone() });
            if let Some(navigation) = navigation {
                if let Err(e) = navigation.navigate(NavigationIntent::Assign(url)).await {
                    tracing::error!(error = %e, "Redirect after termination failed");
                }
            }
        });
    }

    /// Advisory counts from the server; `None` if it cannot be reached.
    pub async fn status(&self) -> Option<StatusResponse> {
        match self.inner.evaluator.status(&self.inner.contest_id).await {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to get proctoring status");
                None
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

fn upgrade(session: &Weak<SessionInner>) -> Option<ProctoringSession> {
    session.upgrade().map(|inner| ProctoringSession { inner })
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
