//! Publish/subscribe message bus contract.
//!
//! The calibration protocol only needs to publish payloads, subscribe to a
//! topic, and receive [`BusEvent`]s. Connection management, buffering and
//! reconnection belong to the bus implementation.

mod local;

use thiserror::Error;

pub use local::{ConnectOptions, LocalBroker, LocalClient, DEFAULT_OFFLINE_BUFFER, DEFAULT_QUEUE_SIZE};

/// Message bus errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Client is not connected")]
    NotConnected,
    #[error("Offline buffer full ({0} messages)")]
    BufferFull(usize),
    #[error("Bad user name or password")]
    Unauthorized,
    #[error("Client id already in use: {0}")]
    ClientIdInUse(String),
    #[error("Bus closed")]
    Closed,
}

/// Events delivered from the bus to its client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// Connection established. `reconnect` is set after a connection loss.
    Connected { reconnect: bool },
    /// Connection lost. Subscriptions are gone until re-established.
    Disconnected,
    /// A message arrived on a subscribed topic.
    Message { topic: String, payload: Vec<u8> },
}

/// Outcome of an accepted publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the bus for delivery.
    Sent,
    /// Held in the offline buffer until the connection returns.
    Buffered { pending: usize },
}

/// Narrow send/subscribe interface used by the calibration protocol.
///
/// Both calls enqueue and return immediately; neither waits for network
/// acknowledgment.
pub trait MessageBus: Send + Sync {
    /// Publish `payload` on `topic` with at-most-once delivery.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<Delivery, BusError>;

    /// Subscribe to `topic`. Messages arrive as [`BusEvent::Message`].
    fn subscribe(&self, topic: &str) -> Result<(), BusError>;

    /// Whether publishes currently go straight to the broker rather than
    /// into the offline buffer.
    fn is_connected(&self) -> bool;
}
