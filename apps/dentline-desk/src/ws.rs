use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use dentline_core::signaling::{ClientMessage, PeerId, RelayMessage, RoomId};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::rooms::RoomRegistry;

/// Shared relay state: the room registry.
#[derive(Clone, Default)]
pub struct DeskState {
    pub rooms: Arc<RoomRegistry>,
}

impl DeskState {
    pub fn new() -> Self {
        Self::default()
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<DeskState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: DeskState) {
    // Fresh identity per transport connection; clients that reconnect get a
    // new one.
    let socket_id = PeerId::new(Uuid::new_v4().to_string());
    info!(peer = %socket_id, "socket connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<RelayMessage>();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&message) else {
                continue;
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut joined_room: Option<RoomId> = None;

    while let Some(Ok(frame)) = ws_rx.next().await {
        let text = match frame {
            Message::Text(text) => text,
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Message::Close(_) => break,
            _ => continue,
        };
        let message = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(message) => message,
            Err(err) => {
                warn!(peer = %socket_id, error = %err, "unparseable client frame");
                continue;
            }
        };
        handle_client_message(&state, &socket_id, &tx, &mut joined_room, message);
    }

    if let Some(room) = joined_room {
        state.rooms.leave(&room, &socket_id);
        state.rooms.broadcast_except(
            &room,
            &socket_id,
            RelayMessage::PeerLeft {
                socket_id: socket_id.clone(),
            },
        );
        info!(peer = %socket_id, room = %room, "socket left room");
    }
    writer.abort();
}

fn handle_client_message(
    state: &DeskState,
    socket_id: &PeerId,
    sender: &mpsc::UnboundedSender<RelayMessage>,
    joined_room: &mut Option<RoomId>,
    message: ClientMessage,
) {
    match message {
        ClientMessage::Join { room_id } => {
            if let Some(current) = joined_room {
                debug!(peer = %socket_id, room = %current, "repeat join ignored");
                return;
            }
            state
                .rooms
                .join(room_id.clone(), socket_id.clone(), sender.clone());
            *joined_room = Some(room_id.clone());
            let notified = state.rooms.broadcast_except(
                &room_id,
                socket_id,
                RelayMessage::PeerJoined {
                    socket_id: socket_id.clone(),
                },
            );
            info!(peer = %socket_id, room = %room_id, notified, "peer joined room");
        }
        ClientMessage::Ready { room_id } => {
            if !is_member(joined_room, &room_id, socket_id) {
                return;
            }
            state.rooms.broadcast_except(
                &room_id,
                socket_id,
                RelayMessage::PeerReady {
                    socket_id: socket_id.clone(),
                },
            );
        }
        ClientMessage::Offer { room_id, offer } => {
            if !is_member(joined_room, &room_id, socket_id) {
                return;
            }
            state.rooms.broadcast_except(
                &room_id,
                socket_id,
                RelayMessage::Offer {
                    offer,
                    from: socket_id.clone(),
                },
            );
        }
        ClientMessage::Answer { room_id, answer } => {
            if !is_member(joined_room, &room_id, socket_id) {
                return;
            }
            state.rooms.broadcast_except(
                &room_id,
                socket_id,
                RelayMessage::Answer {
                    answer,
                    from: socket_id.clone(),
                },
            );
        }
        ClientMessage::IceCandidate { room_id, candidate } => {
            if !is_member(joined_room, &room_id, socket_id) {
                return;
            }
            state.rooms.broadcast_except(
                &room_id,
                socket_id,
                RelayMessage::IceCandidate {
                    candidate,
                    from: socket_id.clone(),
                },
            );
        }
        ClientMessage::EndCall { room_id } => {
            if !is_member(joined_room, &room_id, socket_id) {
                return;
            }
            let notified =
                state
                    .rooms
                    .broadcast_except(&room_id, socket_id, RelayMessage::EndCall);
            info!(peer = %socket_id, room = %room_id, notified, "call ended for room");
        }
    }
}

fn is_member(joined_room: &Option<RoomId>, room_id: &RoomId, socket_id: &PeerId) -> bool {
    if joined_room.as_ref() == Some(room_id) {
        true
    } else {
        debug!(peer = %socket_id, room = %room_id, "message for room the peer never joined");
        false
    }
}
