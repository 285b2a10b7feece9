//! Camera capture: device backends plus a single-owner session around them
//!
//! - [`FfmpegCamera`]: a V4L2 video device streamed through `ffmpeg`
//! - [`StillImageSource`]: an image file or byte buffer behaving like a one-frame camera
//!
//! Every snapshot is re-encoded by [`encode_snapshot`] as JPEG at [`JPEG_QUALITY`] using
//! the frame's own dimensions.

mod ffmpeg;
mod still;

use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use tracing::{debug, info, warn};

use crate::error::CaptureError;
use crate::models::Snapshot;
use crate::traits::CaptureSource;

pub use ffmpeg::{FfmpegCamera, FfmpegStream, MjpegSplitter};
pub use still::{StillImageSource, StillStream};

/// JPEG quality for snapshots (0.8 on a 0-1 scale)
pub const JPEG_QUALITY: u8 = 80;

/// Preferred capture resolution; devices may negotiate lower
pub const PREFERRED_WIDTH: u32 = 1920;
pub const PREFERRED_HEIGHT: u32 = 1080;

/// Decodes any supported frame and encodes it as a snapshot JPEG at native size
pub fn encode_snapshot(frame: &[u8]) -> Result<Snapshot, CaptureError> {
    let decoded = image::load_from_memory(frame)
        .map_err(|e| CaptureError::DeviceUnavailable(format!("unreadable frame: {e}")))?;
    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| CaptureError::DeviceUnavailable(format!("failed to encode snapshot: {e}")))?;

    debug!(width, height, bytes = jpeg.len(), "Encoded snapshot");

    Ok(Snapshot {
        jpeg,
        width,
        height,
        captured_at: Utc::now(),
    })
}

/// Owns at most one live stream of a capture source.
///
/// Starting again releases the current stream, and waits for the device to be free, before it
/// is re-acquired. `stop` releases the same way; dropping a live session only drops the stream.
pub struct CameraSession<S: CaptureSource> {
    source: S,
    stream: Option<S::Stream>,
}

impl<S: CaptureSource> CameraSession<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            stream: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    /// (Re)acquires the device. On failure the session stays stopped and `start` may be
    /// called again to retry.
    pub async fn start(&mut self) -> Result<(), CaptureError> {
        self.stop().await;
        let stream = self.source.acquire().await?;
        self.stream = Some(stream);
        info!("Camera stream started");
        Ok(())
    }

    /// Grabs the current frame of the active stream
    pub fn snapshot(&self) -> Result<Snapshot, CaptureError> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| CaptureError::DeviceUnavailable("camera is not started".to_string()))?;
        self.source.capture(stream)
    }

    pub async fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.source.release(stream).await;
            info!("Camera stream released");
        }
    }
}

impl<S: CaptureSource> Drop for CameraSession<S> {
    fn drop(&mut self) {
        if self.stream.take().is_some() {
            warn!("Camera session dropped while streaming");
        }
    }
}
