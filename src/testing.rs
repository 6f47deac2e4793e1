//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

use crate::error::{ProctorError, Result};
use crate::media::{
    CameraPlatform, CameraStream, Dimensions, FrameSource, MediaTrack, PlatformError,
    StreamConstraints,
};
use crate::proctoring::{
    MonitorResponse, StartResponse, StatusResponse, TerminateResponse, ViolationEvaluator,
};

/// Smallest JPEG-looking payload: SOI followed by EOI.
pub const TINY_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xD9];

pub struct StaticFrames {
    bytes: Vec<u8>,
}

impl StaticFrames {
    pub fn jpeg() -> Self {
        Self {
            bytes: TINY_JPEG.to_vec(),
        }
    }

    pub fn empty() -> Self {
        Self { bytes: Vec::new() }
    }
}

#[async_trait]
impl FrameSource for StaticFrames {
    async fn grab_jpeg(&self, _width: u32, _height: u32, _quality: f32) -> Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }
}

pub fn live_stream() -> CameraStream {
    CameraStream::new(vec![MediaTrack::video("test-cam")], Arc::new(StaticFrames::jpeg()))
}

pub fn ready_stream() -> CameraStream {
    let stream = live_stream();
    stream.report_dimensions(Dimensions::new(320, 240));
    stream
}

#[derive(Clone, Copy)]
pub enum CameraBehavior {
    /// Stream reports dimensions immediately
    Ready,
    /// Stream never reports dimensions
    Silent,
    Deny,
    Missing,
    Busy,
    Unsupported,
}

/// Camera platform with a fixed behavior that counts requests.
pub struct ScriptedCamera {
    behavior: CameraBehavior,
    requests: AtomicUsize,
    issued: Mutex<Vec<CameraStream>>,
}

impl ScriptedCamera {
    pub fn new(behavior: CameraBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            requests: AtomicUsize::new(0),
            issued: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn last_issued(&self) -> Option<CameraStream> {
        self.issued.lock().last().cloned()
    }
}

#[async_trait]
impl CameraPlatform for ScriptedCamera {
    fn is_supported(&self) -> bool {
        !matches!(self.behavior, CameraBehavior::Unsupported)
    }

    async fn request_stream(
        &self,
        _constraints: &StreamConstraints,
    ) -> std::result::Result<CameraStream, PlatformError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let stream = match self.behavior {
            CameraBehavior::Ready => ready_stream(),
            CameraBehavior::Silent => live_stream(),
            CameraBehavior::Deny => {
                return Err(PlatformError::NotAllowed("Permission denied".into()))
            }
            CameraBehavior::Missing => {
                return Err(PlatformError::NotFound("Requested device not found".into()))
            }
            CameraBehavior::Busy => {
                return Err(PlatformError::NotReadable("Device in use".into()))
            }
            CameraBehavior::Unsupported => {
                return Err(PlatformError::NotSupported("not supported".into()))
            }
        };
        self.issued.lock().push(stream.clone());
        Ok(stream)
    }
}

/// Evaluator that replays queued verdicts and records what it was sent.
pub struct ScriptedEvaluator {
    start: Mutex<Result<StartResponse>>,
    verdicts: Mutex<VecDeque<Result<MonitorResponse>>>,
    frames: Mutex<Vec<String>>,
    starts: AtomicUsize,
    held: AtomicBool,
    release: Notify,
    starts_held: AtomicBool,
    start_gate: Semaphore,
}

impl ScriptedEvaluator {
    pub fn accepting() -> Arc<Self> {
        Self::with_start(Ok(StartResponse {
            success: true,
            message: Some("Real-time proctoring started".into()),
            monitoring_active: Some(true),
        }))
    }

    pub fn with_start(start: Result<StartResponse>) -> Arc<Self> {
        Arc::new(Self {
            start: Mutex::new(start),
            verdicts: Mutex::new(VecDeque::new()),
            frames: Mutex::new(Vec::new()),
            starts: AtomicUsize::new(0),
            held: AtomicBool::new(false),
            release: Notify::new(),
            starts_held: AtomicBool::new(false),
            start_gate: Semaphore::new(0),
        })
    }

    pub fn push(&self, verdict: MonitorResponse) {
        self.verdicts.lock().push_back(Ok(verdict));
    }

    pub fn push_error(&self, err: ProctorError) {
        self.verdicts.lock().push_back(Err(err));
    }

    pub fn frames_sent(&self) -> Vec<String> {
        self.frames.lock().clone()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Makes the next frame evaluation wait until `resume` is called.
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }

    /// Makes `start_session` calls wait until `release_starts` is called.
    pub fn hold_starts(&self) {
        self.starts_held.store(true, Ordering::SeqCst);
    }

    pub fn release_starts(&self) {
        self.starts_held.store(false, Ordering::SeqCst);
        self.start_gate.add_permits(1);
    }
}

fn clone_result<T: Clone>(result: &Result<T>) -> Result<T> {
    match result {
        Ok(value) => Ok(value.clone()),
        Err(ProctorError::ServerRejected(m)) => Err(ProctorError::ServerRejected(m.clone())),
        Err(ProctorError::NetworkError(m)) => Err(ProctorError::NetworkError(m.clone())),
        Err(other) => Err(ProctorError::internal(other.to_string())),
    }
}

#[async_trait]
impl ViolationEvaluator for ScriptedEvaluator {
    async fn start_session(&self, _contest_id: &str, _csrf_token: &str) -> Result<StartResponse> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.starts_held.load(Ordering::SeqCst) {
            // The permit goes back on drop, letting every waiter through.
            let _permit = self.start_gate.acquire().await;
        }
        clone_result(&*self.start.lock())
    }

    async fn evaluate_frame(
        &self,
        _contest_id: &str,
        _csrf_token: &str,
        image_data_url: &str,
    ) -> Result<MonitorResponse> {
        self.frames.lock().push(image_data_url.to_string());
        if self.held.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        let next = self.verdicts.lock().pop_front();
        next.unwrap_or_else(|| {
            Ok(MonitorResponse {
                face_detected: true,
                faces_count: Some(1),
                ..MonitorResponse::default()
            })
        })
    }

    async fn status(&self, _contest_id: &str) -> Result<StatusResponse> {
        Ok(StatusResponse::default())
    }

    async fn terminate(&self, _contest_id: &str, _csrf_token: &str) -> Result<TerminateResponse> {
        Ok(TerminateResponse {
            success: true,
            message: None,
            contest_terminated: true,
        })
    }
}

/// Verdict the server sends when it registers a missing-face violation.
pub fn violation(violation_count: u32, warning_count: u32, terminated: bool) -> MonitorResponse {
    MonitorResponse {
        face_detected: false,
        faces_count: Some(0),
        violation_added: true,
        violation_type: Some("FACE_NOT_DETECTED".into()),
        violation_count: Some(violation_count),
        warning_count: Some(warning_count),
        contest_terminated: terminated,
        can_continue: Some(!terminated),
        message: None,
        error: None,
    }
}

pub fn face_ok(violation_count: u32, warning_count: u32) -> MonitorResponse {
    MonitorResponse {
        face_detected: true,
        faces_count: Some(1),
        violation_count: Some(violation_count),
        warning_count: Some(warning_count),
        ..MonitorResponse::default()
    }
}
