//! Camera stream and sink plumbing
//!
//! - `stream`: the shared `CameraStream` handle, its tracks and frame source
//! - `sink`: presentation sinks and the `SinkDirectory` used for discovery
//! - `platform`: the `CameraPlatform` seam and error classification
//! - `replay`: a directory-backed camera for headless runs

mod platform;
mod replay;
mod sink;
mod stream;

pub use platform::{CameraPlatform, FacingMode, PlatformError, StreamConstraints};
pub use replay::ReplayCamera;
pub use sink::{SinkDirectory, SinkFlags, SinkId, SinkKind, VideoSink};
pub use stream::{CameraStream, Dimensions, FrameSource, MediaTrack, TrackState};
