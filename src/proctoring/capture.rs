use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::Result;
use crate::media::{CameraStream, SinkDirectory, SinkKind, VideoSink};

const DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// The hidden element and canvas a session grabs frames through.
pub struct CaptureSurface {
    sink: VideoSink,
    width: u32,
    height: u32,
    quality: f32,
}

impl CaptureSurface {
    pub fn new(sinks: &SinkDirectory, width: u32, height: u32, quality: f32) -> Self {
        Self {
            sink: sinks.create(SinkKind::Capture, "proctoring-capture"),
            width,
            height,
            quality,
        }
    }

    pub fn sink(&self) -> &VideoSink {
        &self.sink
    }

    pub fn bind(&self, stream: Option<CameraStream>) {
        self.sink.set_source(stream);
    }

    pub fn is_ready(&self) -> bool {
        self.sink.is_ready()
    }

    /// Grabs the current frame as a JPEG data URL. `None` when the source
    /// produced no image.
    pub async fn capture_data_url(&self) -> Result<Option<String>> {
        let stream = match self.sink.live_source() {
            Some(stream) => stream,
            None => return Ok(None),
        };

        let jpeg = stream.grab_jpeg(self.width, self.height, self.quality).await?;
        if jpeg.is_empty() {
            return Ok(None);
        }

        let mut data_url = String::with_capacity(DATA_URL_PREFIX.len() + jpeg.len() * 4 / 3 + 4);
        data_url.push_str(DATA_URL_PREFIX);
        STANDARD.encode_string(&jpeg, &mut data_url);
        Ok(Some(data_url))
    }
}
