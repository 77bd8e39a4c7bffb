//! Peer connection management: one negotiable connection per remote
//! participant, driven entirely by typed relay messages.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::media::LocalTracks;
use crate::signaling::{PeerId, SignalingClient, SignalingError};

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("webrtc failure: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error(transparent)]
    Signaling(#[from] SignalingError),
}

/// Notifications from the connection layer to the session.
#[derive(Debug)]
pub enum CallEvent {
    RemoteTrackArrived { peer: PeerId, mime: String },
    /// A handle was torn down after a failed negotiation.
    PeerClosed { peer: PeerId },
}

/// Accumulates tracks arriving asynchronously from one peer connection into
/// a single playable unit.
pub struct RemoteMediaAggregate {
    peer_id: PeerId,
    tracks: Mutex<Vec<Arc<TrackRemote>>>,
}

impl RemoteMediaAggregate {
    fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            tracks: Mutex::new(Vec::new()),
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    fn push(&self, track: Arc<TrackRemote>) -> usize {
        let mut tracks = self.tracks.lock().expect("tracks lock poisoned");
        tracks.push(track);
        tracks.len()
    }

    fn clear(&self) {
        self.tracks.lock().expect("tracks lock poisoned").clear();
    }

    pub fn track_count(&self) -> usize {
        self.tracks.lock().expect("tracks lock poisoned").len()
    }
}

/// Playback destination for remote media; the embedding UI implements this
/// (the original attaches a `MediaStream` to a video element).
pub trait MediaSink: Send + Sync {
    /// Called whenever a track lands in `media`; implementations must
    /// tolerate repeated attachment of the same aggregate.
    fn attach(&self, peer: &PeerId, media: &Arc<RemoteMediaAggregate>);

    /// Remove the peer's playback; its aggregate has been cleared.
    fn clear(&self, peer: &PeerId);
}

/// Sink for headless operation and tests.
pub struct NullSink;

impl MediaSink for NullSink {
    fn attach(&self, _peer: &PeerId, _media: &Arc<RemoteMediaAggregate>) {}
    fn clear(&self, _peer: &PeerId) {}
}

/// One remote participant: the negotiable connection plus its remote media.
pub struct PeerHandle {
    peer_id: PeerId,
    connection: Arc<RTCPeerConnection>,
    remote_media: Arc<RemoteMediaAggregate>,
}

impl PeerHandle {
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn connection(&self) -> &Arc<RTCPeerConnection> {
        &self.connection
    }

    pub fn remote_media(&self) -> &Arc<RemoteMediaAggregate> {
        &self.remote_media
    }
}

/// Owns the map of peer handles and runs the offer/answer protocol over the
/// signaling channel. No other component writes to the map.
///
/// Simultaneous presence signals can make both sides offer at once; this
/// implementation keeps the source's last-offer-wins behavior instead of
/// polite/impolite perfect negotiation, so crossed offers occasionally
/// require the peers to retry.
pub struct PeerManager {
    api: API,
    signaling: Arc<SignalingClient>,
    ice_servers: Vec<RTCIceServer>,
    local_tracks: Arc<LocalTracks>,
    sink: Arc<dyn MediaSink>,
    events: mpsc::UnboundedSender<CallEvent>,
    peers: AsyncMutex<HashMap<PeerId, Arc<PeerHandle>>>,
}

impl PeerManager {
    pub fn new(
        signaling: Arc<SignalingClient>,
        ice_servers: Vec<RTCIceServer>,
        local_tracks: Arc<LocalTracks>,
        sink: Arc<dyn MediaSink>,
        events: mpsc::UnboundedSender<CallEvent>,
    ) -> Result<Self, NegotiationError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let api = APIBuilder::new().with_media_engine(media_engine).build();
        Ok(Self {
            api,
            signaling,
            ice_servers,
            local_tracks,
            sink,
            events,
            peers: AsyncMutex::new(HashMap::new()),
        })
    }

    /// Create-or-reuse the handle for `peer_id`. Both negotiation entry
    /// points (peer presence and peer readiness) route through here, so one
    /// remote identifier never accumulates a second live connection.
    async fn ensure_peer(
        &self,
        peer_id: &PeerId,
    ) -> Result<(Arc<PeerHandle>, bool), NegotiationError> {
        let mut peers = self.peers.lock().await;
        if let Some(existing) = peers.get(peer_id) {
            return Ok((Arc::clone(existing), false));
        }

        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let connection = Arc::new(self.api.new_peer_connection(config).await?);

        for track in self.local_tracks.all() {
            let rtp: Arc<dyn TrackLocal + Send + Sync> = track.rtp();
            connection.add_track(rtp).await?;
        }

        let remote_media = Arc::new(RemoteMediaAggregate::new(peer_id.clone()));

        let signaling = Arc::clone(&self.signaling);
        let candidate_peer = peer_id.clone();
        connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let signaling = Arc::clone(&signaling);
            let peer = candidate_peer.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        if let Err(err) = signaling.send_candidate(init) {
                            tracing::debug!(
                                target = "call",
                                peer = %peer,
                                error = %err,
                                "dropping candidate, signaling unavailable"
                            );
                        }
                    }
                    Err(err) => {
                        tracing::warn!(target = "call", peer = %peer, error = %err, "candidate serialization failed");
                    }
                }
            })
        }));

        let aggregate = Arc::clone(&remote_media);
        let sink = Arc::clone(&self.sink);
        let events = self.events.clone();
        let track_peer = peer_id.clone();
        connection.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                let aggregate = Arc::clone(&aggregate);
                let sink = Arc::clone(&sink);
                let events = events.clone();
                let peer = track_peer.clone();
                Box::pin(async move {
                    let mime = track.codec().capability.mime_type.clone();
                    let count = aggregate.push(track);
                    sink.attach(&peer, &aggregate);
                    tracing::info!(target = "call", peer = %peer, mime = %mime, tracks = count, "remote track arrived");
                    let _ = events.send(CallEvent::RemoteTrackArrived { peer, mime });
                })
            },
        ));

        let handle = Arc::new(PeerHandle {
            peer_id: peer_id.clone(),
            connection,
            remote_media,
        });
        peers.insert(peer_id.clone(), Arc::clone(&handle));
        tracing::debug!(target = "call", peer = %peer_id, "peer connection created");
        Ok((handle, true))
    }

    /// React to a peer's presence or readiness announcement: create the
    /// connection if needed and send an offer, unless an offer for this
    /// peer is already outstanding.
    pub async fn maybe_offer(&self, peer_id: &PeerId) -> Result<(), NegotiationError> {
        let (handle, created) = self.ensure_peer(peer_id).await?;
        if !created && handle.connection.local_description().await.is_some() {
            tracing::debug!(target = "call", peer = %peer_id, "offer already outstanding");
            return Ok(());
        }

        let result: Result<(), NegotiationError> = async {
            let offer = handle.connection.create_offer(None).await?;
            handle.connection.set_local_description(offer.clone()).await?;
            self.signaling.send_offer(offer)?;
            Ok(())
        }
        .await;

        if let Err(err) = result {
            self.abort_handle(peer_id).await;
            return Err(err);
        }
        tracing::info!(target = "call", peer = %peer_id, "offer sent");
        Ok(())
    }

    /// Install a remote offer and reply with an answer.
    pub async fn accept_offer(
        &self,
        from: &PeerId,
        offer: RTCSessionDescription,
    ) -> Result<(), NegotiationError> {
        let (handle, _) = self.ensure_peer(from).await?;

        let result: Result<(), NegotiationError> = async {
            handle.connection.set_remote_description(offer).await?;
            let answer = handle.connection.create_answer(None).await?;
            handle.connection.set_local_description(answer.clone()).await?;
            self.signaling.send_answer(answer)?;
            Ok(())
        }
        .await;

        if let Err(err) = result {
            self.abort_handle(from).await;
            return Err(err);
        }
        tracing::info!(target = "call", peer = %from, "answer sent");
        Ok(())
    }

    /// Install a remote answer on the sender's connection. An answer for a
    /// connection already in stable state is ignored rather than
    /// renegotiated.
    pub async fn accept_answer(
        &self,
        from: &PeerId,
        answer: RTCSessionDescription,
    ) -> Result<(), NegotiationError> {
        let handle = {
            let peers = self.peers.lock().await;
            peers.get(from).cloned()
        };
        let Some(handle) = handle else {
            tracing::debug!(target = "call", peer = %from, "answer for unknown peer, discarded");
            return Ok(());
        };

        if handle.connection.signaling_state() == RTCSignalingState::Stable {
            tracing::debug!(target = "call", peer = %from, "connection already stable, answer ignored");
            return Ok(());
        }

        if let Err(err) = handle.connection.set_remote_description(answer).await {
            self.abort_handle(from).await;
            return Err(err.into());
        }
        tracing::info!(target = "call", peer = %from, "answer installed");
        Ok(())
    }

    /// Feed a remote ICE candidate to the sender's connection. A bad or
    /// late candidate must not abort the call, so failures are swallowed.
    pub async fn add_remote_candidate(&self, from: &PeerId, candidate: RTCIceCandidateInit) {
        let handle = {
            let peers = self.peers.lock().await;
            peers.get(from).cloned()
        };
        let Some(handle) = handle else {
            tracing::debug!(target = "call", peer = %from, "candidate for unknown peer, discarded");
            return;
        };
        if let Err(err) = handle.connection.add_ice_candidate(candidate).await {
            tracing::debug!(target = "call", peer = %from, error = %err, "candidate rejected");
        }
    }

    /// Tear down one peer's connection and playback.
    pub async fn drop_peer(&self, peer_id: &PeerId) {
        let removed = {
            let mut peers = self.peers.lock().await;
            peers.remove(peer_id)
        };
        if let Some(handle) = removed {
            close_handle(&handle, self.sink.as_ref()).await;
            tracing::info!(target = "call", peer = %peer_id, "peer connection closed");
        }
    }

    /// Close every stored connection and clear the map. Runs before local
    /// media release so no half-closed connection receives frames.
    pub async fn close_all(&self) {
        let drained: Vec<Arc<PeerHandle>> = {
            let mut peers = self.peers.lock().await;
            peers.drain().map(|(_, handle)| handle).collect()
        };
        for handle in drained {
            close_handle(&handle, self.sink.as_ref()).await;
        }
    }

    async fn abort_handle(&self, peer_id: &PeerId) {
        self.drop_peer(peer_id).await;
        let _ = self.events.send(CallEvent::PeerClosed {
            peer: peer_id.clone(),
        });
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.lock().await.len()
    }

    pub async fn handle(&self, peer_id: &PeerId) -> Option<Arc<PeerHandle>> {
        self.peers.lock().await.get(peer_id).cloned()
    }

    /// Snapshot of each handle's signaling state.
    pub async fn signaling_states(&self) -> Vec<(PeerId, RTCSignalingState)> {
        self.peers
            .lock()
            .await
            .values()
            .map(|handle| (handle.peer_id.clone(), handle.connection.signaling_state()))
            .collect()
    }
}

async fn close_handle(handle: &PeerHandle, sink: &dyn MediaSink) {
    if let Err(err) = handle.connection.close().await {
        tracing::debug!(target = "call", peer = %handle.peer_id, error = %err, "connection close failed");
    }
    handle.remote_media.clear();
    sink.clear(&handle.peer_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaConstraints, MediaController, SyntheticCapture};
    use crate::signaling::{ClientMessage, LocalRelay};

    async fn test_manager() -> (PeerManager, LocalRelay, mpsc::UnboundedReceiver<CallEvent>) {
        let (signaling, relay) = LocalRelay::pair();
        signaling.join(crate::signaling::RoomId::new("room")).unwrap();
        let media = MediaController::new(Arc::new(SyntheticCapture));
        let tracks = media.acquire(&MediaConstraints::ideal()).await.unwrap();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager =
            PeerManager::new(signaling, vec![], tracks, Arc::new(NullSink), events_tx).unwrap();
        (manager, relay, events_rx)
    }

    async fn next_outbound(relay: &mut LocalRelay) -> ClientMessage {
        // Skip join/ready bookkeeping and interleaved ICE candidates; the
        // negotiation tests only care about the SDP exchange.
        loop {
            match relay.from_client.recv().await.expect("outbound message") {
                ClientMessage::Join { .. }
                | ClientMessage::Ready { .. }
                | ClientMessage::IceCandidate { .. } => continue,
                other => return other,
            }
        }
    }

    #[tokio::test]
    async fn ensure_peer_never_duplicates_handles() {
        let (manager, _relay, _events) = test_manager().await;
        let peer = PeerId::new("remote-1");

        let (first, created_first) = manager.ensure_peer(&peer).await.unwrap();
        let (second, created_second) = manager.ensure_peer(&peer).await.unwrap();

        assert!(created_first);
        assert!(!created_second);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.peer_count().await, 1);
    }

    #[tokio::test]
    async fn presence_and_readiness_produce_one_offer() {
        let (manager, mut relay, _events) = test_manager().await;
        let peer = PeerId::new("remote-1");

        manager.maybe_offer(&peer).await.unwrap();
        manager.maybe_offer(&peer).await.unwrap();

        let mut offers = 0;
        while let Ok(msg) = relay.from_client.try_recv() {
            if matches!(msg, ClientMessage::Offer { .. }) {
                offers += 1;
            }
        }
        assert_eq!(offers, 1);
        assert_eq!(manager.peer_count().await, 1);
    }

    #[tokio::test]
    async fn offer_answer_reaches_stable_and_repeat_answer_is_noop() {
        let (alice, mut alice_relay, _alice_events) = test_manager().await;
        let (bob, mut bob_relay, _bob_events) = test_manager().await;
        let alice_id = PeerId::new("alice");
        let bob_id = PeerId::new("bob");

        alice.maybe_offer(&bob_id).await.unwrap();
        let ClientMessage::Offer { offer, .. } = next_outbound(&mut alice_relay).await else {
            panic!("expected offer");
        };

        bob.accept_offer(&alice_id, offer).await.unwrap();
        let ClientMessage::Answer { answer, .. } = next_outbound(&mut bob_relay).await else {
            panic!("expected answer");
        };

        alice.accept_answer(&bob_id, answer.clone()).await.unwrap();
        let states = alice.signaling_states().await;
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].1, RTCSignalingState::Stable);

        // Redundant answer for a stable connection: no error, no state change.
        alice.accept_answer(&bob_id, answer).await.unwrap();
        assert_eq!(
            alice.signaling_states().await[0].1,
            RTCSignalingState::Stable
        );
    }

    #[tokio::test]
    async fn candidates_for_unknown_peers_are_swallowed() {
        let (manager, _relay, _events) = test_manager().await;
        manager
            .add_remote_candidate(
                &PeerId::new("ghost"),
                RTCIceCandidateInit {
                    candidate: "not a candidate".into(),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(manager.peer_count().await, 0);
    }

    #[tokio::test]
    async fn close_all_clears_the_map() {
        let (manager, _relay, _events) = test_manager().await;
        manager.ensure_peer(&PeerId::new("a")).await.unwrap();
        manager.ensure_peer(&PeerId::new("b")).await.unwrap();
        manager.close_all().await;
        assert_eq!(manager.peer_count().await, 0);
    }
}
