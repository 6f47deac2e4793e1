pub mod config;
pub mod error;
pub mod media;
pub mod presenter;
pub mod proctoring;
pub mod registry;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{ProctorError, Result};
pub use proctoring::{ProctoringSession, SessionEvent, SessionState};
pub use registry::{NavigationGuard, StreamRegistry};
