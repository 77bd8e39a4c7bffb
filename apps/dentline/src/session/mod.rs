//! Call session lifecycle: owns the signaling client, the local capture,
//! and the peer map, and drives them through one dispatch loop.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::auth::AuthContext;
use crate::call::{CallEvent, MediaSink, NegotiationError, PeerManager};
use crate::config::Config;
use crate::consult::AppointmentId;
use crate::media::{CaptureBackend, MediaConstraints, MediaController, MediaError};
use crate::signaling::{PeerId, RelayMessage, RoomId, SignalingClient, SignalingError};

/// Call lifecycle. `Negotiating → Active` is implicit on the first remote
/// track; the consumer treats "has remote media" as the active signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Negotiating,
    Active,
    Ending,
    Ended,
}

/// How a session terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Clinician/initiator semantics: the whole room ends.
    EndForAll,
    /// Participant semantics: depart locally, the call continues.
    Leave,
    /// The remote side already ended the call for everyone.
    RemoteEnded,
}

/// Outward notifications; the embedding UI consumes these (the navigation
/// collaborator reacts to `Ended`).
#[derive(Debug)]
pub enum SessionEvent {
    RemoteTrack { peer: PeerId, mime: String },
    PeerLeft { peer: PeerId },
    NegotiationFailed { peer: PeerId },
    Ended { reason: EndReason },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
}

/// Per-call parameters. The room doubles as the resumption token: callers
/// persist [`Session::resume_token`] and feed it back here to rejoin after
/// a restart, instead of the original's browser-local-storage side channel.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub room: RoomId,
    /// External appointment the call is tied to; carried alongside the room
    /// id, never derived from it.
    pub appointment_id: Option<AppointmentId>,
    pub constraints: MediaConstraints,
}

impl SessionConfig {
    pub fn new(room: RoomId) -> Self {
        Self {
            room,
            appointment_id: None,
            constraints: MediaConstraints::ideal(),
        }
    }

    /// Rebuild a config from a persisted resumption token.
    pub fn resume(token: RoomId) -> Self {
        Self::new(token)
    }
}

/// Top-level owner of one signaling client, one local capture, and the set
/// of peer handles. Terminal once teardown begins: inbound signaling is
/// discarded from that point on.
pub struct Session {
    auth: AuthContext,
    room: RoomId,
    appointment_id: Option<AppointmentId>,
    signaling: Arc<SignalingClient>,
    media: Arc<MediaController>,
    peers: Arc<PeerManager>,
    state_tx: watch::Sender<SessionState>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
}

impl Session {
    /// Acquire media, connect to the relay, join the room, and start the
    /// dispatch loop. Media failures are fatal and reported before any
    /// join is attempted.
    pub async fn start(
        app: &Config,
        auth: AuthContext,
        config: SessionConfig,
        backend: Arc<dyn CaptureBackend>,
        sink: Arc<dyn MediaSink>,
    ) -> Result<Arc<Self>, SessionError> {
        let media = Arc::new(MediaController::new(backend));
        media.acquire(&config.constraints).await?;
        let signaling = SignalingClient::connect(app.signaling_url()).await?;
        Self::attach(app, auth, config, signaling, media, sink).await
    }

    /// Wire a session over an already-connected signaling client. The
    /// public entry point for embedders that manage their own transport
    /// (and for the in-memory relay link).
    pub async fn attach(
        app: &Config,
        auth: AuthContext,
        config: SessionConfig,
        signaling: Arc<SignalingClient>,
        media: Arc<MediaController>,
        sink: Arc<dyn MediaSink>,
    ) -> Result<Arc<Self>, SessionError> {
        let tracks = media.acquire(&config.constraints).await?;

        let (call_tx, call_rx) = mpsc::unbounded_channel();
        let peers = Arc::new(PeerManager::new(
            Arc::clone(&signaling),
            app.ice_servers(),
            tracks,
            sink,
            call_tx,
        )?);

        let (state_tx, _) = watch::channel(SessionState::Initializing);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let relay_rx = signaling
            .take_events()
            .ok_or_else(|| SignalingError::Protocol("relay event stream already taken".into()))?;

        let session = Arc::new(Self {
            auth,
            room: config.room.clone(),
            appointment_id: config.appointment_id,
            signaling,
            media,
            peers,
            state_tx,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        });

        session.signaling.join(config.room)?;
        session.signaling.announce_ready()?;
        let _ = session.state_tx.send(SessionState::Negotiating);
        tracing::info!(target = "session", room = %session.room, "session negotiating");

        tokio::spawn(Arc::clone(&session).run(relay_rx, call_rx));
        Ok(session)
    }

    async fn run(
        self: Arc<Self>,
        mut relay_rx: mpsc::UnboundedReceiver<RelayMessage>,
        mut call_rx: mpsc::UnboundedReceiver<CallEvent>,
    ) {
        let mut state_rx = self.state_tx.subscribe();
        while !self.is_ending() {
            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() || self.is_ending() {
                        break;
                    }
                }
                message = relay_rx.recv() => {
                    match message {
                        // Discard anything that raced with teardown.
                        Some(_) if self.is_ending() => break,
                        Some(message) => self.handle_relay_message(message).await,
                        None => {
                            // Transport dropped under us; clean up locally.
                            self.shutdown(EndReason::Leave).await;
                            break;
                        }
                    }
                }
                event = call_rx.recv() => {
                    match event {
                        Some(event) => self.handle_call_event(event),
                        None => break,
                    }
                }
            }
        }
    }

    /// Dispatch one typed relay message. Kept free of transport concerns so
    /// the protocol is exercisable without a socket.
    pub async fn handle_relay_message(&self, message: RelayMessage) {
        match message {
            RelayMessage::PeerJoined { socket_id } | RelayMessage::PeerReady { socket_id } => {
                if let Err(err) = self.peers.maybe_offer(&socket_id).await {
                    tracing::warn!(target = "session", peer = %socket_id, error = %err, "offer failed");
                }
            }
            RelayMessage::Offer { offer, from } => {
                if let Err(err) = self.peers.accept_offer(&from, offer).await {
                    tracing::warn!(target = "session", peer = %from, error = %err, "offer rejected");
                }
            }
            RelayMessage::Answer { answer, from } => {
                if let Err(err) = self.peers.accept_answer(&from, answer).await {
                    tracing::warn!(target = "session", peer = %from, error = %err, "answer rejected");
                }
            }
            RelayMessage::IceCandidate { candidate, from } => {
                self.peers.add_remote_candidate(&from, candidate).await;
            }
            RelayMessage::PeerLeft { socket_id } => {
                self.peers.drop_peer(&socket_id).await;
                let _ = self.events_tx.send(SessionEvent::PeerLeft { peer: socket_id });
            }
            RelayMessage::EndCall => {
                // The remote end already terminated for everyone: local
                // cleanup only, never re-broadcast.
                self.shutdown(EndReason::RemoteEnded).await;
            }
        }
    }

    fn handle_call_event(&self, event: CallEvent) {
        match event {
            CallEvent::RemoteTrackArrived { peer, mime } => {
                self.state_tx.send_if_modified(|state| {
                    if *state == SessionState::Negotiating {
                        *state = SessionState::Active;
                        true
                    } else {
                        false
                    }
                });
                let _ = self.events_tx.send(SessionEvent::RemoteTrack { peer, mime });
            }
            CallEvent::PeerClosed { peer } => {
                let _ = self
                    .events_tx
                    .send(SessionEvent::NegotiationFailed { peer });
            }
        }
    }

    /// Terminate with role-dependent semantics: clinicians end the call for
    /// the whole room, everyone else just leaves.
    pub async fn hang_up(&self) {
        let reason = if self.auth.role().is_clinician() {
            EndReason::EndForAll
        } else {
            EndReason::Leave
        };
        self.shutdown(reason).await;
    }

    /// Tear the session down exactly once: close peer connections, release
    /// media, broadcast `end-call` when ending for all, then disconnect.
    pub async fn shutdown(&self, reason: EndReason) {
        if !self.begin_ending() {
            return;
        }
        tracing::info!(target = "session", room = %self.room, ?reason, "session ending");

        self.peers.close_all().await;
        self.media.release();
        if reason == EndReason::EndForAll {
            if let Err(err) = self.signaling.send_end_call() {
                tracing::debug!(target = "session", error = %err, "end-call broadcast failed");
            }
        }
        self.signaling.disconnect();

        let _ = self.state_tx.send(SessionState::Ended);
        let _ = self.events_tx.send(SessionEvent::Ended { reason });
    }

    /// Move to `Ending` if not already terminal. Returns whether this call
    /// won the transition.
    fn begin_ending(&self) -> bool {
        let mut started = false;
        self.state_tx.send_if_modified(|state| {
            if matches!(*state, SessionState::Ending | SessionState::Ended) {
                false
            } else {
                *state = SessionState::Ending;
                started = true;
                true
            }
        });
        started
    }

    fn is_ending(&self) -> bool {
        matches!(
            *self.state_tx.borrow(),
            SessionState::Ending | SessionState::Ended
        )
    }

    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn current_state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Take the outward event stream. Yields `None` after the first call.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx.lock().expect("events lock poisoned").take()
    }

    /// The room identifier to persist for resuming this call after a
    /// restart.
    pub fn resume_token(&self) -> &RoomId {
        &self.room
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn appointment_id(&self) -> Option<&AppointmentId> {
        self.appointment_id.as_ref()
    }

    pub fn media(&self) -> &MediaController {
        &self.media
    }

    pub fn peers(&self) -> &PeerManager {
        &self.peers
    }
}
