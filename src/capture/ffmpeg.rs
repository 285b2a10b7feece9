//! V4L2 camera capture through an `ffmpeg` child process

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{PREFERRED_HEIGHT, PREFERRED_WIDTH, encode_snapshot};
use crate::error::CaptureError;
use crate::models::Snapshot;
use crate::traits::CaptureSource;

const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(10);
const READ_CHUNK: usize = 64 * 1024;
/// Largest frame kept while waiting for its end marker
const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

type LatestFrame = Option<Arc<Vec<u8>>>;

/// Camera backed by `ffmpeg -f v4l2`, streaming MJPEG frames over a pipe
pub struct FfmpegCamera {
    device: PathBuf,
    program: String,
    width: u32,
    height: u32,
    first_frame_timeout: Duration,
}

/// A running `ffmpeg` capture. The newest decoded frame is kept in a watch channel.
///
/// Dropping it without [`CaptureSource::release`] still kills the process, but does not wait
/// for it to exit.
#[derive(Debug)]
pub struct FfmpegStream {
    child: Child,
    frames: watch::Receiver<LatestFrame>,
    reader: JoinHandle<()>,
    stderr_logger: Option<JoinHandle<()>>,
}

impl FfmpegCamera {
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
            program: "ffmpeg".to_string(),
            width: PREFERRED_WIDTH,
            height: PREFERRED_HEIGHT,
            first_frame_timeout: FIRST_FRAME_TIMEOUT,
        }
    }

    /// Uses a different `ffmpeg` binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn args(&self) -> Vec<String> {
        vec![
            "-f".to_string(),
            "v4l2".to_string(),
            "-video_size".to_string(),
            format!("{}x{}", self.width, self.height),
            "-i".to_string(),
            self.device.display().to_string(),
            "-f".to_string(),
            "image2pipe".to_string(),
            "-vcodec".to_string(),
            "mjpeg".to_string(),
            "-q:v".to_string(),
            "2".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-".to_string(),
        ]
    }

    /// Fails early with a precise error when the device node is missing or unreadable
    async fn check_device(&self) -> Result<(), CaptureError> {
        match tokio::fs::File::open(&self.device).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(CaptureError::PermissionDenied(
                format!("cannot open {}: {e}", self.device.display()),
            )),
            Err(e) => Err(CaptureError::DeviceUnavailable(format!(
                "cannot open {}: {e}",
                self.device.display()
            ))),
        }
    }
}

#[async_trait]
impl CaptureSource for FfmpegCamera {
    type Stream = FfmpegStream;

    async fn acquire(&self) -> Result<FfmpegStream, CaptureError> {
        self.check_device().await?;

        info!(device = %self.device.display(), width = self.width, height = self.height, "Opening camera");

        let mut child = Command::new(&self.program)
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => CaptureError::DeviceUnavailable(format!(
                    "'{}' was not found; install ffmpeg to use the camera",
                    self.program
                )),
                _ => CaptureError::DeviceUnavailable(format!("failed to start {}: {e}", self.program)),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            CaptureError::DeviceUnavailable("ffmpeg stdout was not captured".to_string())
        })?;

        let stderr_logger = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(target: "card_scanner::capture::ffmpeg", "{}", line.trim());
                }
            })
        });

        let (tx, mut frames) = watch::channel::<LatestFrame>(None);
        let reader = tokio::spawn(async move {
            let mut stdout = stdout;
            let mut splitter = MjpegSplitter::default();
            let mut chunk = vec![0u8; READ_CHUNK];

            loop {
                match stdout.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        for frame in splitter.push(&chunk[..n]) {
                            tx.send_replace(Some(Arc::new(frame)));
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Camera pipe read failed");
                        break;
                    }
                }
            }
            debug!("Camera pipe closed");
        });

        let mut stream = FfmpegStream {
            child,
            frames: frames.clone(),
            reader,
            stderr_logger,
        };

        let first_frame = tokio::time::timeout(
            self.first_frame_timeout,
            frames.wait_for(Option::is_some),
        )
        .await
        .map(|waited| waited.map(|_| ()));

        match first_frame {
            Ok(Ok(())) => {
                info!(device = %self.device.display(), "Camera streaming");
                Ok(stream)
            }
            Ok(Err(_)) => {
                let status = stream.child.try_wait().ok().flatten();
                stream.shutdown().await;
                Err(CaptureError::DeviceUnavailable(format!(
                    "camera stream ended before the first frame (ffmpeg exit: {})",
                    status.map_or_else(|| "unknown".to_string(), |s| s.to_string())
                )))
            }
            Err(_) => {
                stream.shutdown().await;
                Err(CaptureError::DeviceUnavailable(format!(
                    "no frame from {} within {}s",
                    self.device.display(),
                    self.first_frame_timeout.as_secs()
                )))
            }
        }
    }

    fn capture(&self, stream: &FfmpegStream) -> Result<Snapshot, CaptureError> {
        if stream.frames.has_changed().is_err() {
            return Err(CaptureError::DeviceUnavailable(
                "camera stream has stopped".to_string(),
            ));
        }

        let frame = stream
            .frames
            .borrow()
            .clone()
            .ok_or_else(|| CaptureError::DeviceUnavailable("no frame available yet".to_string()))?;

        encode_snapshot(&frame)
    }

    async fn release(&self, stream: FfmpegStream) {
        stream.shutdown().await;
        info!(device = %self.device.display(), "Camera released");
    }
}

impl FfmpegStream {
    /// Kills `ffmpeg` and waits for it to exit, so the device node is free on return
    async fn shutdown(mut self) {
        if let Err(e) = self.child.kill().await {
            // Already exited and reaped
            debug!(error = %e, "ffmpeg kill skipped");
        }
        self.reader.abort();
        if let Some(logger) = self.stderr_logger.take() {
            logger.abort();
        }
    }
}

/// Splits a concatenated MJPEG byte stream into individual JPEG images
#[derive(Debug)]
pub struct MjpegSplitter {
    buffer: Vec<u8>,
    max_frame: usize,
}

impl Default for MjpegSplitter {
    fn default() -> Self {
        Self {
            buffer: Vec::new(),
            max_frame: MAX_FRAME_BYTES,
        }
    }
}

impl MjpegSplitter {
    const SOI: [u8; 2] = [0xFF, 0xD8];
    const EOI: [u8; 2] = [0xFF, 0xD9];

    /// Feeds bytes and returns every frame completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            let Some(start) = find(&self.buffer, &Self::SOI, 0) else {
                // Keep a trailing 0xFF, it may begin the next marker
                let keep = usize::from(self.buffer.last() == Some(&0xFF));
                let drop_len = self.buffer.len() - keep;
                self.buffer.drain(..drop_len);
                break;
            };

            let Some(end) = find(&self.buffer, &Self::EOI, start + 2) else {
                if self.buffer.len() - start > self.max_frame {
                    // No end marker in sight; resync on the next start marker
                    warn!(buffered = self.buffer.len() - start, "Dropping oversized MJPEG frame");
                    self.buffer.drain(..start + 2);
                    continue;
                }
                self.buffer.drain(..start);
                break;
            };

            let frame_end = end + 2;
            frames.push(self.buffer[start..frame_end].to_vec());
            self.buffer.drain(..frame_end);
        }

        frames
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut frame = vec![0xFF, 0xD8];
        frame.extend_from_slice(body);
        frame.extend_from_slice(&[0xFF, 0xD9]);
        frame
    }

    #[test]
    fn splitter_yields_whole_frames() {
        let mut splitter = MjpegSplitter::default();
        let a = jpeg(&[1, 2, 3]);
        let b = jpeg(&[4, 5]);
        let mut stream = a.clone();
        stream.extend_from_slice(&b);

        assert_eq!(splitter.push(&stream), vec![a, b]);
    }

    #[test]
    fn splitter_handles_frames_split_across_reads() {
        let mut splitter = MjpegSplitter::default();
        let frame = jpeg(&[9, 8, 7, 6]);

        // Split right between 0xFF and 0xD9 of the end marker
        let cut = frame.len() - 1;
        assert!(splitter.push(&frame[..cut]).is_empty());
        assert_eq!(splitter.push(&frame[cut..]), vec![frame]);
    }

    #[test]
    fn splitter_skips_leading_garbage() {
        let mut splitter = MjpegSplitter::default();
        let frame = jpeg(&[0x10]);
        assert!(splitter.push(&[0x00, 0x01, 0xFF]).is_empty());

        // The kept 0xFF pairs with the next 0xD8
        let mut rest = frame[1..].to_vec();
        rest.extend_from_slice(&[0x42]);
        assert_eq!(splitter.push(&rest), vec![frame]);
    }

    #[test]
    fn splitter_drops_frame_without_end_marker() {
        let mut splitter = MjpegSplitter {
            buffer: Vec::new(),
            max_frame: 16,
        };
        assert!(splitter.push(&[0xFF, 0xD8]).is_empty());
        assert!(splitter.push(&[0u8; 32]).is_empty());
        assert!(splitter.buffer.len() <= 16);

        let frame = jpeg(&[1, 2]);
        assert_eq!(splitter.push(&frame), vec![frame]);
    }

    #[tokio::test]
    async fn missing_device_is_unavailable() {
        let camera = FfmpegCamera::new("/dev/definitely-not-a-camera-0");
        let err = camera.acquire().await.unwrap_err();
        assert!(matches!(err, CaptureError::DeviceUnavailable(_)));
    }

    #[tokio::test]
    async fn missing_ffmpeg_binary_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let device = dir.path().join("video0");
        std::fs::write(&device, b"").unwrap();

        let camera = FfmpegCamera::new(&device).with_program("ffmpeg-binary-that-does-not-exist");
        let err = camera.acquire().await.unwrap_err();
        match err {
            CaptureError::DeviceUnavailable(message) => assert!(message.contains("not found")),
            other => panic!("expected DeviceUnavailable, got {other:?}"),
        }
    }

    /// Writes an executable shell script standing in for `ffmpeg`; it ignores its arguments
    #[cfg(unix)]
    fn fake_ffmpeg(dir: &std::path::Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    /// A device node stand-in plus one JPEG frame of `width` x `height`
    #[cfg(unix)]
    fn camera_fixture(width: u32, height: u32) -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let device = dir.path().join("video0");
        std::fs::write(&device, b"").unwrap();

        let frame = dir.path().join("frame.jpg");
        let jpeg = crate::capture::encode_snapshot(&crate::capture::tests::png_frame(width, height))
            .unwrap()
            .jpeg;
        std::fs::write(&frame, jpeg).unwrap();

        (dir, device, frame)
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn streaming_camera_captures_frames_and_release_waits_for_exit() {
        let (dir, device, frame) = camera_fixture(40, 30);
        let script = fake_ffmpeg(dir.path(), &format!("cat '{}'\nexec sleep 30", frame.display()));
        let camera = FfmpegCamera::new(&device).with_program(script);

        let stream = camera.acquire().await.unwrap();
        let snapshot = camera.capture(&stream).unwrap();
        assert_eq!((snapshot.width, snapshot.height), (40, 30));
        assert_eq!(&snapshot.jpeg[..2], &[0xFF, 0xD8]);

        let pid = stream.child.id().unwrap();
        camera.release(stream).await;

        // Killed and reaped before release returns
        assert!(!std::path::Path::new(&format!("/proc/{pid}")).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn capture_reports_stopped_stream_after_exit() {
        let (dir, device, frame) = camera_fixture(8, 8);
        let script = fake_ffmpeg(dir.path(), &format!("cat '{}'\nexit 0", frame.display()));
        let camera = FfmpegCamera::new(&device).with_program(script);

        let stream = camera.acquire().await.unwrap();

        let stopped = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Err(e) = camera.capture(&stream) {
                    return e;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        match stopped {
            CaptureError::DeviceUnavailable(message) => assert!(message.contains("stopped")),
            other => panic!("expected DeviceUnavailable, got {other:?}"),
        }
        camera.release(stream).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_camera_times_out() {
        let (dir, device, _frame) = camera_fixture(8, 8);
        let script = fake_ffmpeg(dir.path(), "exec sleep 30");
        let mut camera = FfmpegCamera::new(&device).with_program(script);
        camera.first_frame_timeout = Duration::from_millis(300);

        match camera.acquire().await.unwrap_err() {
            CaptureError::DeviceUnavailable(message) => assert!(message.contains("no frame")),
            other => panic!("expected DeviceUnavailable, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn camera_exiting_before_first_frame_is_unavailable() {
        let (dir, device, _frame) = camera_fixture(8, 8);
        let script = fake_ffmpeg(dir.path(), "echo 'Cannot open video device' >&2\nexit 1");
        let camera = FfmpegCamera::new(&device).with_program(script);

        match camera.acquire().await.unwrap_err() {
            CaptureError::DeviceUnavailable(message) => {
                assert!(message.contains("before the first frame"))
            }
            other => panic!("expected DeviceUnavailable, got {other:?}"),
        }
    }
}
