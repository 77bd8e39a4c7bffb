use dashmap::DashMap;
use dentline_core::signaling::{PeerId, RelayMessage, RoomId};
use tokio::sync::mpsc;

pub type PeerSender = mpsc::UnboundedSender<RelayMessage>;

/// In-memory registry of rooms and their connected peers.
///
/// Rooms come into existence on first join and disappear when the last
/// participant leaves; nothing is persisted.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<RoomId, DashMap<PeerId, PeerSender>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, room: RoomId, peer: PeerId, sender: PeerSender) {
        self.rooms.entry(room).or_default().insert(peer, sender);
    }

    pub fn leave(&self, room: &RoomId, peer: &PeerId) {
        let mut room_emptied = false;
        if let Some(peers) = self.rooms.get(room) {
            peers.remove(peer);
            // Decide outside the guard to avoid deadlocking the shard.
            room_emptied = peers.is_empty();
        }
        if room_emptied {
            self.rooms.remove_if(room, |_, peers| peers.is_empty());
        }
    }

    /// Fan a message out to every room member except the sender. Returns
    /// how many peers received it.
    pub fn broadcast_except(&self, room: &RoomId, except: &PeerId, message: RelayMessage) -> usize {
        let Some(peers) = self.rooms.get(room) else {
            return 0;
        };
        let mut delivered = 0;
        for entry in peers.iter() {
            if entry.key() == except {
                continue;
            }
            if entry.value().send(message.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn member_count(&self, room: &RoomId) -> usize {
        self.rooms.get(room).map(|peers| peers.len()).unwrap_or(0)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (RoomId, PeerId, PeerId) {
        (RoomId::new("r1"), PeerId::new("a"), PeerId::new("b"))
    }

    #[test]
    fn broadcast_skips_the_sender() {
        let registry = RoomRegistry::new();
        let (room, alice, bob) = ids();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        registry.join(room.clone(), alice.clone(), alice_tx);
        registry.join(room.clone(), bob.clone(), bob_tx);

        let delivered = registry.broadcast_except(
            &room,
            &alice,
            RelayMessage::PeerJoined {
                socket_id: alice.clone(),
            },
        );

        assert_eq!(delivered, 1);
        assert!(bob_rx.try_recv().is_ok());
        assert!(alice_rx.try_recv().is_err());
    }

    #[test]
    fn room_is_dropped_when_last_peer_leaves() {
        let registry = RoomRegistry::new();
        let (room, alice, bob) = ids();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        registry.join(room.clone(), alice.clone(), tx_a);
        registry.join(room.clone(), bob.clone(), tx_b);
        assert_eq!(registry.member_count(&room), 2);

        registry.leave(&room, &alice);
        assert_eq!(registry.member_count(&room), 1);
        assert_eq!(registry.room_count(), 1);

        registry.leave(&room, &bob);
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn broadcast_to_unknown_room_reaches_nobody() {
        let registry = RoomRegistry::new();
        let (room, alice, _) = ids();
        assert_eq!(
            registry.broadcast_except(&room, &alice, RelayMessage::EndCall),
            0
        );
    }
}
