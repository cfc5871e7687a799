// MIT License - Copyright (c) 2026 Peter Wright
// Connection events

use std::time::Duration;

use crate::connection::ConnectionState;
use crate::models::UnsolicitedMessage;

/// All events that can be emitted by a connection.
///
/// Users subscribe via `connection.subscribe()` to receive a
/// `tokio::sync::broadcast::Receiver<ClientEvent>`.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Lifecycle state changed
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// `~Name=...` line pushed by the device
    Unsolicited(UnsolicitedMessage),
    /// A reconnect has been scheduled
    Reconnecting { attempt: u32, delay: Duration },
    /// A transport or protocol fault, including ones seen while idle
    Fault(String),
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<ClientEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<ClientEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}
