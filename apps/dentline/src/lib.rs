//! Dentline call core: peer-to-peer consultation call coordination for the
//! teledentistry client — relay signaling, peer connection management,
//! local media lifecycle, session state, and the consultation submission
//! side-channel.

pub mod auth;
pub mod call;
pub mod config;
pub mod consult;
pub mod media;
pub mod session;
pub mod signaling;
pub mod telemetry;

pub use auth::{AuthContext, Role, UserProfile};
pub use call::{MediaSink, NullSink, PeerManager, RemoteMediaAggregate};
pub use config::Config;
pub use consult::{AppointmentId, ConsultationClient, ConsultationDraft, MedicationEntry};
pub use media::{MediaConstraints, MediaController, MediaError, SyntheticCapture};
pub use session::{EndReason, Session, SessionConfig, SessionEvent, SessionState};
pub use signaling::{PeerId, RoomId, SignalingClient};
