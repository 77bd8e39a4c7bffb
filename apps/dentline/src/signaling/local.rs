use std::sync::Arc;

use tokio::sync::mpsc;

use super::client::SignalingClient;
use super::messages::{ClientMessage, RelayMessage};

/// In-memory stand-in for the relay, used by tests and local development.
///
/// The returned [`SignalingClient`] behaves exactly like a connected one,
/// except frames cross a channel pair instead of a socket: messages the
/// client sends arrive on `from_client`, and anything pushed into
/// `to_client` is delivered to the client's event stream.
pub struct LocalRelay {
    pub from_client: mpsc::UnboundedReceiver<ClientMessage>,
    pub to_client: mpsc::UnboundedSender<RelayMessage>,
}

impl LocalRelay {
    pub fn pair() -> (Arc<SignalingClient>, LocalRelay) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let client = SignalingClient::from_parts(outbound_tx, event_rx);
        (
            client,
            LocalRelay {
                from_client: outbound_rx,
                to_client: event_tx,
            },
        )
    }
}
