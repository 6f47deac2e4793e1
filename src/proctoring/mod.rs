//! Proctoring session and its server client
//!
//! This module provides:
//! - `ProctoringSession`: start/stop, the sampling loop and the
//!   Active/Warning/Terminated state machine
//! - `ViolationEvaluator`: the remote service that judges frames and owns
//!   the authoritative violation counts, with an HTTP implementation
//! - `SessionEvent`: notifications for the presentation layer

mod capture;
mod evaluator;
mod events;
mod session;
mod state;

pub use capture::CaptureSurface;
pub use evaluator::{
    HttpEvaluator, MonitorResponse, StartResponse, StatusResponse, TerminateResponse,
    ViolationEvaluator, CSRF_HEADER,
};
pub use events::{Indicator, SessionEvent};
pub use session::{ProctoringSession, SessionBuilder};
pub use state::SessionState;
