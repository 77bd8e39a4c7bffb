use serde::{Deserialize, Serialize};
use std::fmt;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Rendezvous namespace shared by the participants of one call.
///
/// Opaque to the client; the relay creates the room on first join and drops
/// it when the last participant leaves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Relay-assigned identifier for one participant connection.
///
/// Assigned per transport connection; not stable across reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Messages sent from a call client to the relay.
///
/// Tags and payload fields follow the relay's socket event names
/// (kebab-case tags, camelCase fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Announce presence in a room; the relay creates the room if needed.
    Join {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    /// Announce that local media is attached and negotiation may start.
    Ready {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    /// Local session description offered to the other participants.
    Offer {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        offer: RTCSessionDescription,
    },
    /// Answer to a previously received offer.
    Answer {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        answer: RTCSessionDescription,
    },
    /// A locally discovered ICE candidate.
    #[serde(rename = "signal-ice-candidate")]
    IceCandidate {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        candidate: RTCIceCandidateInit,
    },
    /// Terminate the call for every participant in the room.
    EndCall {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
}

/// Messages fanned out by the relay to call clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayMessage {
    /// Another participant joined the room.
    PeerJoined {
        #[serde(rename = "socketId")]
        socket_id: PeerId,
    },
    /// Another participant finished attaching media.
    PeerReady {
        #[serde(rename = "socketId")]
        socket_id: PeerId,
    },
    Offer {
        offer: RTCSessionDescription,
        from: PeerId,
    },
    Answer {
        answer: RTCSessionDescription,
        from: PeerId,
    },
    #[serde(rename = "signal-ice-candidate")]
    IceCandidate {
        candidate: RTCIceCandidateInit,
        from: PeerId,
    },
    /// A participant disconnected from the room.
    PeerLeft {
        #[serde(rename = "socketId")]
        socket_id: PeerId,
    },
    /// The call was terminated for everyone by another participant.
    EndCall,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_uses_socket_event_names() {
        let msg = ClientMessage::Join {
            room_id: RoomId::new("r1"),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "join");
        assert_eq!(json["roomId"], "r1");
    }

    #[test]
    fn ice_candidate_tag_matches_relay_event() {
        let msg = RelayMessage::IceCandidate {
            candidate: RTCIceCandidateInit {
                candidate: "candidate:0 1 UDP 1 127.0.0.1 9 typ host".into(),
                ..Default::default()
            },
            from: PeerId::new("abc"),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "signal-ice-candidate");
        assert_eq!(json["from"], "abc");
    }

    #[test]
    fn end_call_round_trips_without_payload() {
        let json = r#"{"type":"end-call"}"#;
        let msg: RelayMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, RelayMessage::EndCall));
    }
}
