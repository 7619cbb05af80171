//! Notification dispatcher: state-machine transitions out, wire frames in
//! flight. Delivery is fire-and-forget; a slow or vanished client never
//! blocks a transition or delivery to the other party.

use std::sync::Arc;

use serde::Serialize;

use crate::protocol::WireMessage;
use crate::registry::Registry;

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Fan a frame out to every live handle of a user.
    pub fn send_to_user(&self, user_id: &str, command: &str, payload: &impl Serialize) {
        let msg = WireMessage::from_payload(command, payload);
        let senders = self.registry.handles_for(user_id);
        if senders.is_empty() {
            tracing::debug!("No live handles for {}, dropping {}", user_id, command);
            return;
        }
        for sender in senders {
            if let Err(e) = sender.try_send(msg.clone()) {
                tracing::warn!("Dropping {} to {}: {}", command, user_id, e);
            }
        }
    }

    /// Send the same frame to both participants. Delivery order between
    /// the two is not guaranteed and nothing may depend on it.
    pub fn send_to_pair(&self, user_a: &str, user_b: &str, command: &str, payload: &impl Serialize) {
        self.send_to_user(user_a, command, payload);
        self.send_to_user(user_b, command, payload);
    }
}
