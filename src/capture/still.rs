//! A still image used in place of a live camera

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::info;

use super::encode_snapshot;
use crate::error::CaptureError;
use crate::models::Snapshot;
use crate::traits::CaptureSource;

#[derive(Debug, Clone)]
enum StillImage {
    File(PathBuf),
    Bytes(Vec<u8>),
}

/// Capture source whose "stream" is a single image, e.g. a photo taken with another app
#[derive(Debug, Clone)]
pub struct StillImageSource {
    image: StillImage,
}

/// The loaded image bytes
#[derive(Debug)]
pub struct StillStream {
    frame: Vec<u8>,
}

impl StillImageSource {
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            image: StillImage::File(path.into()),
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            image: StillImage::Bytes(bytes),
        }
    }
}

#[async_trait]
impl CaptureSource for StillImageSource {
    type Stream = StillStream;

    async fn acquire(&self) -> Result<StillStream, CaptureError> {
        let frame = match &self.image {
            StillImage::Bytes(bytes) => bytes.clone(),
            StillImage::File(path) => {
                info!(path = %path.display(), "Loading still image");
                tokio::fs::read(path).await.map_err(|e| match e.kind() {
                    ErrorKind::PermissionDenied => {
                        CaptureError::PermissionDenied(format!("cannot read {}: {e}", path.display()))
                    }
                    _ => CaptureError::DeviceUnavailable(format!(
                        "cannot read {}: {e}",
                        path.display()
                    )),
                })?
            }
        };

        if frame.is_empty() {
            return Err(CaptureError::DeviceUnavailable("image is empty".to_string()));
        }

        Ok(StillStream { frame })
    }

    fn capture(&self, stream: &StillStream) -> Result<Snapshot, CaptureError> {
        encode_snapshot(&stream.frame)
    }

    async fn release(&self, _stream: StillStream) {}
}
