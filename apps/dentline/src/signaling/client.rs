use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{error::ProtocolError, Error as WsError, Message},
};
use url::Url;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::messages::{ClientMessage, RelayMessage, RoomId};
use super::SignalingError;

/// Client side of the relay signaling channel.
///
/// One instance exists per call session. A writer task serializes outbound
/// [`ClientMessage`]s onto the socket; a single reader task demultiplexes
/// inbound frames into a typed [`RelayMessage`] stream, so message handlers
/// are plain functions over typed values rather than socket callbacks.
/// Per-connection arrival order is preserved by the single reader.
pub struct SignalingClient {
    /// Dropped on disconnect so the writer task drains queued messages
    /// (an end-call broadcast must reach the wire before the socket dies).
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<RelayMessage>>>,
    room: RwLock<Option<RoomId>>,
    closed: AtomicBool,
    reader: Mutex<Option<tokio::task::JoinHandle<()>>>,
    writer: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SignalingClient {
    /// Connect to the relay at `relay_url` (http/https addresses are
    /// rewritten to their WebSocket equivalents).
    ///
    /// Connect failures are returned as-is; this component never retries.
    pub async fn connect(relay_url: &str) -> Result<Arc<Self>, SignalingError> {
        let ws_url = derive_ws_url(relay_url)?;
        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|err| SignalingError::Connect(err.to_string()))?;
        tracing::debug!(target = "signaling", url = %ws_url, "relay websocket connected");
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<RelayMessage>();

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let Ok(text) = serde_json::to_string(&message) else {
                    continue;
                };
                if ws_write.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_write.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        dispatch_frame(text.as_bytes(), &event_tx);
                    }
                    Ok(Message::Binary(data)) => {
                        dispatch_frame(&data, &event_tx);
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        match &err {
                            WsError::ConnectionClosed
                            | WsError::AlreadyClosed
                            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                                tracing::debug!(target = "signaling", "relay websocket closed: {err}");
                            }
                            _ => {
                                tracing::warn!(target = "signaling", "relay websocket error: {err}");
                            }
                        }
                        break;
                    }
                }
            }
        });

        let client = Arc::new(Self {
            outbound: Mutex::new(Some(outbound)),
            events: Mutex::new(Some(event_rx)),
            room: RwLock::new(None),
            closed: AtomicBool::new(false),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
        });
        Ok(client)
    }

    /// Announce presence in `room`. Idempotent for the same room; joining a
    /// second room over one signaling connection is a protocol violation.
    pub fn join(&self, room: RoomId) -> Result<(), SignalingError> {
        {
            let mut guard = self.room.write().expect("room lock poisoned");
            match guard.as_ref() {
                Some(current) if *current == room => return Ok(()),
                Some(current) => {
                    return Err(SignalingError::Protocol(format!(
                        "already joined room {current}, refusing to join {room}"
                    )));
                }
                None => *guard = Some(room.clone()),
            }
        }
        tracing::info!(target = "signaling", room = %room, "joining room");
        self.send(ClientMessage::Join { room_id: room })
    }

    /// Announce that local media is attached and negotiation may begin.
    pub fn announce_ready(&self) -> Result<(), SignalingError> {
        let room_id = self.current_room()?;
        self.send(ClientMessage::Ready { room_id })
    }

    pub fn send_offer(&self, offer: RTCSessionDescription) -> Result<(), SignalingError> {
        let room_id = self.current_room()?;
        self.send(ClientMessage::Offer { room_id, offer })
    }

    pub fn send_answer(&self, answer: RTCSessionDescription) -> Result<(), SignalingError> {
        let room_id = self.current_room()?;
        self.send(ClientMessage::Answer { room_id, answer })
    }

    pub fn send_candidate(&self, candidate: RTCIceCandidateInit) -> Result<(), SignalingError> {
        let room_id = self.current_room()?;
        self.send(ClientMessage::IceCandidate { room_id, candidate })
    }

    /// Broadcast call termination to the room.
    pub fn send_end_call(&self) -> Result<(), SignalingError> {
        let room_id = self.current_room()?;
        self.send(ClientMessage::EndCall { room_id })
    }

    fn send(&self, message: ClientMessage) -> Result<(), SignalingError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SignalingError::ChannelClosed);
        }
        let guard = self.outbound.lock().expect("outbound lock poisoned");
        guard
            .as_ref()
            .ok_or(SignalingError::ChannelClosed)?
            .send(message)
            .map_err(|_| SignalingError::ChannelClosed)
    }

    fn current_room(&self) -> Result<RoomId, SignalingError> {
        self.room
            .read()
            .expect("room lock poisoned")
            .clone()
            .ok_or(SignalingError::NotJoined)
    }

    /// Take the inbound message stream. Yields `None` after the first call.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<RelayMessage>> {
        self.events.lock().expect("events lock poisoned").take()
    }

    /// Close the transport. Safe to call repeatedly and from teardown paths
    /// even when the connection never succeeded. Queued outbound messages
    /// are flushed by the writer before the socket closes; inbound traffic
    /// stops immediately.
    pub fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        drop(self.outbound.lock().expect("outbound lock poisoned").take());
        if let Some(reader) = self.reader.lock().expect("reader lock poisoned").take() {
            reader.abort();
        }
        tracing::debug!(target = "signaling", "relay channel disconnected");
    }

    pub(super) fn from_parts(
        outbound: mpsc::UnboundedSender<ClientMessage>,
        events: mpsc::UnboundedReceiver<RelayMessage>,
    ) -> Arc<Self> {
        Arc::new(Self {
            outbound: Mutex::new(Some(outbound)),
            events: Mutex::new(Some(events)),
            room: RwLock::new(None),
            closed: AtomicBool::new(false),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        })
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        for slot in [&self.reader, &self.writer] {
            if let Ok(mut guard) = slot.lock() {
                if let Some(handle) = guard.take() {
                    handle.abort();
                }
            }
        }
    }
}

fn dispatch_frame(bytes: &[u8], event_tx: &mpsc::UnboundedSender<RelayMessage>) {
    match serde_json::from_slice::<RelayMessage>(bytes) {
        Ok(message) => {
            if event_tx.send(message).is_err() {
                tracing::debug!(target = "signaling", "event stream dropped; discarding frame");
            }
        }
        Err(err) => {
            tracing::warn!(target = "signaling", error = %err, "unparseable relay frame");
        }
    }
}

/// Rewrite an http(s) relay address to its ws(s) endpoint. The caller passes
/// the configured relay address, or the API origin when no dedicated relay
/// address is set.
fn derive_ws_url(relay_url: &str) -> Result<Url, SignalingError> {
    let mut url = Url::parse(relay_url).map_err(|err| SignalingError::Address {
        url: relay_url.to_string(),
        reason: err.to_string(),
    })?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SignalingError::Address {
                url: relay_url.to_string(),
                reason: format!("unsupported scheme {other}"),
            });
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| SignalingError::Address {
            url: relay_url.to_string(),
            reason: "invalid websocket scheme".into(),
        })?;
    url.set_path("/ws");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
