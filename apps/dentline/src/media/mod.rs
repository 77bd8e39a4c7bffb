//! Local media lifecycle: acquisition with constraint fallback, track-level
//! mute toggles, and hardware release.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

pub mod capture;

pub use capture::{CaptureBackend, CaptureFailure, CaptureSource, MediaFrame, SyntheticCapture};

/// Requested capture parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: VideoProfile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoProfile {
    pub width: u32,
    pub height: u32,
    pub frames_per_second: u32,
}

impl MediaConstraints {
    /// Preferred profile, tried first.
    pub fn ideal() -> Self {
        Self {
            audio: true,
            video: VideoProfile {
                width: 1280,
                height: 720,
                frames_per_second: 30,
            },
        }
    }

    /// Minimal profile retried after the ideal constraints are refused.
    pub fn fallback() -> Self {
        Self {
            audio: true,
            video: VideoProfile {
                width: 640,
                height: 480,
                frames_per_second: 15,
            },
        }
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self::ideal()
    }
}

/// Fatal media acquisition failure. Each variant maps to a distinct
/// user-facing remediation hint.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media capture requires a secure context: {detail}")]
    InsecureContext { detail: String },

    #[error("media capture permission denied: {detail}")]
    PermissionDenied { detail: String },

    #[error("no usable capture device: {detail}")]
    DeviceUnavailable { detail: String },
}

impl MediaError {
    pub fn user_hint(&self) -> &'static str {
        match self {
            MediaError::InsecureContext { .. } => {
                "Video calls need a secure origin. Open the app over HTTPS or localhost and retry."
            }
            MediaError::PermissionDenied { .. } => {
                "Camera and microphone access was blocked. Grant permission and retry."
            }
            MediaError::DeviceUnavailable { .. } => {
                "No camera or microphone was found. Check that a device is connected and not in use."
            }
        }
    }
}

impl From<CaptureFailure> for MediaError {
    fn from(failure: CaptureFailure) -> Self {
        if failure.insecure_context {
            MediaError::InsecureContext {
                detail: failure.detail,
            }
        } else if failure.permission_denied {
            MediaError::PermissionDenied {
                detail: failure.detail,
            }
        } else {
            MediaError::DeviceUnavailable {
                detail: failure.detail,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// One locally captured track: the RTP-facing sample track plus the
/// enabled/stopped bits the lifecycle controller flips.
///
/// Disabling a track drops its frames at the pump; the capture device and
/// the negotiated sender stay untouched (no renegotiation).
#[derive(Debug)]
pub struct LocalTrack {
    kind: TrackKind,
    rtp: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl LocalTrack {
    fn new(kind: TrackKind) -> Self {
        let (capability, id) = match kind {
            TrackKind::Audio => (
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48_000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                    rtcp_feedback: vec![],
                },
                "audio",
            ),
            TrackKind::Video => (
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    clock_rate: 90_000,
                    ..Default::default()
                },
                "video",
            ),
        };
        Self {
            kind,
            rtp: Arc::new(TrackLocalStaticSample::new(
                capability,
                id.to_owned(),
                "dentline".to_owned(),
            )),
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn rtp(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.rtp)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// The session's exclusively owned capture pair.
#[derive(Debug)]
pub struct LocalTracks {
    pub audio: Arc<LocalTrack>,
    pub video: Arc<LocalTrack>,
}

impl LocalTracks {
    pub fn all(&self) -> [Arc<LocalTrack>; 2] {
        [Arc::clone(&self.audio), Arc::clone(&self.video)]
    }
}

/// Owns acquisition, mute toggles, and release of the local capture pair.
///
/// Only this controller mutates track state; the peer connection manager
/// reads the tracks for attachment but never flips their flags.
pub struct MediaController {
    backend: Arc<dyn CaptureBackend>,
    tracks: Mutex<Option<Arc<LocalTracks>>>,
    audio_enabled: AtomicBool,
    video_enabled: AtomicBool,
    pumps: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl MediaController {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self {
            backend,
            tracks: Mutex::new(None),
            audio_enabled: AtomicBool::new(true),
            video_enabled: AtomicBool::new(true),
            pumps: Mutex::new(Vec::new()),
        }
    }

    /// Acquire local audio+video capture with graceful constraint fallback:
    /// the requested constraints first, then [`MediaConstraints::fallback`].
    /// Only when both attempts fail is the failure fatal.
    pub async fn acquire(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Arc<LocalTracks>, MediaError> {
        if let Some(existing) = self.tracks.lock().expect("tracks lock poisoned").as_ref() {
            return Ok(Arc::clone(existing));
        }

        let source = match self.backend.open(constraints).await {
            Ok(source) => source,
            Err(first) => {
                tracing::warn!(
                    target = "media",
                    detail = %first.detail,
                    "ideal constraints refused, retrying with fallback profile"
                );
                match self.backend.open(&MediaConstraints::fallback()).await {
                    Ok(source) => source,
                    Err(second) => {
                        let failure = if second.insecure_context || !first.insecure_context {
                            second
                        } else {
                            first
                        };
                        return Err(MediaError::from(failure));
                    }
                }
            }
        };

        let tracks = Arc::new(LocalTracks {
            audio: Arc::new(LocalTrack::new(TrackKind::Audio)),
            video: Arc::new(LocalTrack::new(TrackKind::Video)),
        });
        self.audio_enabled.store(true, Ordering::SeqCst);
        self.video_enabled.store(true, Ordering::SeqCst);

        let mut pumps = self.pumps.lock().expect("pumps lock poisoned");
        pumps.push(tokio::spawn(pump_frames(
            Arc::clone(&tracks.audio),
            source.audio,
        )));
        pumps.push(tokio::spawn(pump_frames(
            Arc::clone(&tracks.video),
            source.video,
        )));
        drop(pumps);

        *self.tracks.lock().expect("tracks lock poisoned") = Some(Arc::clone(&tracks));
        tracing::info!(target = "media", "local capture acquired");
        Ok(tracks)
    }

    /// Flip the enabled flag on every local audio track and return the new
    /// state. Never stops or renegotiates tracks.
    pub fn toggle_audio(&self) -> bool {
        let enabled = !self.audio_enabled.load(Ordering::SeqCst);
        self.audio_enabled.store(enabled, Ordering::SeqCst);
        if let Some(tracks) = self.tracks.lock().expect("tracks lock poisoned").as_ref() {
            tracks.audio.set_enabled(enabled);
        }
        tracing::debug!(target = "media", enabled, "audio toggled");
        enabled
    }

    /// Flip the enabled flag on every local video track and return the new
    /// state.
    pub fn toggle_video(&self) -> bool {
        let enabled = !self.video_enabled.load(Ordering::SeqCst);
        self.video_enabled.store(enabled, Ordering::SeqCst);
        if let Some(tracks) = self.tracks.lock().expect("tracks lock poisoned").as_ref() {
            tracks.video.set_enabled(enabled);
        }
        tracing::debug!(target = "media", enabled, "video toggled");
        enabled
    }

    pub fn is_audio_enabled(&self) -> bool {
        self.audio_enabled.load(Ordering::SeqCst)
    }

    pub fn is_video_enabled(&self) -> bool {
        self.video_enabled.load(Ordering::SeqCst)
    }

    /// Stop every local track and release the underlying device. Idempotent;
    /// a later [`acquire`](Self::acquire) starts fresh.
    pub fn release(&self) {
        let mut pumps = self.pumps.lock().expect("pumps lock poisoned");
        for pump in pumps.drain(..) {
            pump.abort();
        }
        drop(pumps);

        if let Some(tracks) = self.tracks.lock().expect("tracks lock poisoned").take() {
            tracks.audio.mark_stopped();
            tracks.video.mark_stopped();
            tracing::info!(target = "media", "local capture released");
        }
    }
}

impl Drop for MediaController {
    fn drop(&mut self) {
        self.release();
    }
}

async fn pump_frames(
    track: Arc<LocalTrack>,
    mut frames: tokio::sync::mpsc::Receiver<MediaFrame>,
) {
    while let Some(frame) = frames.recv().await {
        if track.is_stopped() {
            break;
        }
        // A disabled track keeps consuming frames so the device stays open;
        // nothing is written to the wire.
        if !track.is_enabled() {
            continue;
        }
        let sample = Sample {
            data: frame.data,
            duration: frame.duration,
            ..Default::default()
        };
        if let Err(err) = track.rtp.write_sample(&sample).await {
            tracing::debug!(target = "media", error = %err, "sample write failed");
        }
    }
}
