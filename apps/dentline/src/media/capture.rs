use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::MediaConstraints;

/// One captured frame, ready to be written onto an RTP track.
pub struct MediaFrame {
    pub data: Bytes,
    pub duration: Duration,
}

/// Raw frame streams produced by an opened capture device pair.
///
/// Dropping the receivers stops the producing device tasks.
pub struct CaptureSource {
    pub audio: mpsc::Receiver<MediaFrame>,
    pub video: mpsc::Receiver<MediaFrame>,
}

/// Raw acquisition failure as reported by a backend.
///
/// Carries the context flags separately so the controller can classify the
/// failure; an insecure execution context wins over a permission denial
/// because fixing permissions cannot help until the origin is secure.
#[derive(Debug, Clone)]
pub struct CaptureFailure {
    pub insecure_context: bool,
    pub permission_denied: bool,
    pub detail: String,
}

/// Device-acquisition seam.
///
/// Production embedders plug in a hardware backend; [`SyntheticCapture`]
/// serves headless environments and tests.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    async fn open(&self, constraints: &MediaConstraints) -> Result<CaptureSource, CaptureFailure>;
}

/// Hardware-free capture backend producing Opus silence and empty video
/// frames at the requested cadence.
#[derive(Debug, Default)]
pub struct SyntheticCapture;

/// Canonical Opus silence frame (one 20 ms DTX frame).
const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];
const AUDIO_FRAME: Duration = Duration::from_millis(20);

#[async_trait]
impl CaptureBackend for SyntheticCapture {
    async fn open(&self, constraints: &MediaConstraints) -> Result<CaptureSource, CaptureFailure> {
        let (audio_tx, audio_rx) = mpsc::channel(8);
        let (video_tx, video_rx) = mpsc::channel(8);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(AUDIO_FRAME);
            loop {
                ticker.tick().await;
                let frame = MediaFrame {
                    data: Bytes::from_static(&OPUS_SILENCE),
                    duration: AUDIO_FRAME,
                };
                if audio_tx.send(frame).await.is_err() {
                    break;
                }
            }
        });

        let frame_interval =
            Duration::from_millis(1_000 / u64::from(constraints.video.frames_per_second.max(1)));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame_interval);
            loop {
                ticker.tick().await;
                let frame = MediaFrame {
                    data: Bytes::from_static(&[0u8; 16]),
                    duration: frame_interval,
                };
                if video_tx.send(frame).await.is_err() {
                    break;
                }
            }
        });

        Ok(CaptureSource {
            audio: audio_rx,
            video: video_rx,
        })
    }
}
