use log::{debug, warn};
use tokio::sync::mpsc;

pub use hyper_tungstenite::tungstenite::Message;

use crate::events::ServerEvent;
use crate::ConnId;

pub type WebSocketSender = mpsc::UnboundedSender<Message>;

/// Outbound handle for one WebSocket connection.
///
/// Sends are fire-and-forget: the frame is queued on the connection's
/// unbounded channel and a closed peer simply drops it. Handlers never block
/// on, or await acknowledgement from, another client.
#[derive(Debug, Clone)]
pub struct ClientChannel {
    pub conn_id: ConnId,
    sender: WebSocketSender,
}

impl ClientChannel {
    pub fn new(conn_id: ConnId, sender: WebSocketSender) -> Self {
        Self { conn_id, sender }
    }

    pub fn send(&self, event: &ServerEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                if self.sender.send(Message::Text(json)).is_err() {
                    debug!("dropping event for closed connection {}", self.conn_id);
                }
            }
            Err(e) => warn!("failed to serialize outbound event: {}", e),
        }
    }

    /// Queue a close frame. The connection task tears the socket down when
    /// the frame is flushed.
    pub fn close(&self) {
        let _ = self.sender.send(Message::Close(None));
    }
}
