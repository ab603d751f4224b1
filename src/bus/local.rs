//! In-process broker implementing [`MessageBus`].
//!
//! Behaves like a clean-session broker with QoS 0: subscriptions are dropped
//! when a client disconnects, a full subscriber queue drops the message, and
//! publishes made while disconnected are held in a bounded offline buffer
//! that is flushed on reconnect.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::{BusError, BusEvent, Delivery, MessageBus};

/// Default number of publishes held while disconnected.
pub const DEFAULT_OFFLINE_BUFFER: usize = 100;

/// Default capacity of each client's event queue.
pub const DEFAULT_QUEUE_SIZE: usize = 256;

/// Options for connecting a client to a [`LocalBroker`].
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub client_id: String,
    pub username: String,
    pub password: String,
    /// Publishes kept while disconnected. Oldest are kept, newest rejected.
    pub offline_buffer: usize,
    /// Capacity of the client's event queue.
    pub queue_size: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            client_id: "ledroid".to_string(),
            username: String::new(),
            password: String::new(),
            offline_buffer: DEFAULT_OFFLINE_BUFFER,
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }
}

impl ConnectOptions {
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_offline_buffer(mut self, size: usize) -> Self {
        self.offline_buffer = size;
        self
    }

    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.queue_size = size.max(1);
        self
    }
}

struct ClientSlot {
    events: mpsc::Sender<BusEvent>,
    subscriptions: HashSet<String>,
    connected: bool,
    offline: VecDeque<(String, Vec<u8>)>,
    offline_capacity: usize,
}

#[derive(Default)]
struct BrokerState {
    clients: HashMap<String, ClientSlot>,
    credentials: Option<(String, String)>,
    closed: bool,
}

impl BrokerState {
    fn route(&self, topic: &str, payload: &[u8]) {
        for (client_id, slot) in &self.clients {
            if !slot.connected || !slot.subscriptions.contains(topic) {
                continue;
            }
            let event = BusEvent::Message {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            };
            match slot.events.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!("Queue full for {}, dropping message on {}", client_id, topic);
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!("Client {} stopped listening", client_id);
                }
            }
        }
    }

    fn notify(&self, client_id: &str, event: BusEvent) {
        if let Some(slot) = self.clients.get(client_id) {
            if slot.events.try_send(event).is_err() {
                tracing::warn!("Could not notify {} of connection change", client_id);
            }
        }
    }
}

/// Shared in-process broker. Cloning yields another handle to the same broker.
#[derive(Clone, Default)]
pub struct LocalBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker that only accepts clients presenting these credentials.
    pub fn with_credentials(username: impl Into<String>, password: impl Into<String>) -> Self {
        let broker = Self::new();
        broker.lock().credentials = Some((username.into(), password.into()));
        broker
    }

    /// Connect a client. The returned receiver yields its events, starting
    /// with `Connected { reconnect: false }`.
    pub fn connect(
        &self,
        options: ConnectOptions,
    ) -> Result<(LocalClient, mpsc::Receiver<BusEvent>), BusError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BusError::Closed);
        }
        if let Some((user, pass)) = &state.credentials {
            if *user != options.username || *pass != options.password {
                return Err(BusError::Unauthorized);
            }
        }
        if state.clients.contains_key(&options.client_id) {
            return Err(BusError::ClientIdInUse(options.client_id));
        }

        let (tx, rx) = mpsc::channel(options.queue_size.max(1));
        let slot = ClientSlot {
            events: tx,
            subscriptions: HashSet::new(),
            connected: true,
            offline: VecDeque::new(),
            offline_capacity: options.offline_buffer,
        };
        state.clients.insert(options.client_id.clone(), slot);
        state.notify(&options.client_id, BusEvent::Connected { reconnect: false });
        tracing::debug!("Client {} connected", options.client_id);

        let client = LocalClient {
            client_id: options.client_id,
            broker: self.clone(),
        };
        Ok((client, rx))
    }

    /// Simulate a connection loss for `client_id`.
    pub fn disconnect(&self, client_id: &str) {
        let mut state = self.lock();
        if let Some(slot) = state.clients.get_mut(client_id) {
            if !slot.connected {
                return;
            }
            slot.connected = false;
            slot.subscriptions.clear();
        }
        state.notify(client_id, BusEvent::Disconnected);
    }

    /// Restore the connection of `client_id` and flush its offline buffer.
    pub fn reconnect(&self, client_id: &str) {
        let mut state = self.lock();
        let pending = match state.clients.get_mut(client_id) {
            Some(slot) if !slot.connected => {
                slot.connected = true;
                std::mem::take(&mut slot.offline)
            }
            _ => return,
        };
        state.notify(client_id, BusEvent::Connected { reconnect: true });
        if !pending.is_empty() {
            tracing::info!("Flushing {} buffered messages for {}", pending.len(), client_id);
        }
        for (topic, payload) in pending {
            state.route(&topic, &payload);
        }
    }

    /// Number of connected clients subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock()
            .clients
            .values()
            .filter(|slot| slot.connected && slot.subscriptions.contains(topic))
            .count()
    }

    /// Close the broker; every client's event stream ends.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.clients.clear();
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A client connection to a [`LocalBroker`].
pub struct LocalClient {
    client_id: String,
    broker: LocalBroker,
}

impl LocalClient {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Messages waiting in the offline buffer.
    pub fn buffered_count(&self) -> usize {
        self.broker
            .lock()
            .clients
            .get(&self.client_id)
            .map_or(0, |slot| slot.offline.len())
    }
}

impl MessageBus for LocalClient {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<Delivery, BusError> {
        let mut state = self.broker.lock();
        if state.closed {
            return Err(BusError::Closed);
        }
        let slot = state
            .clients
            .get_mut(&self.client_id)
            .ok_or(BusError::Closed)?;

        if !slot.connected {
            if slot.offline.len() >= slot.offline_capacity {
                return Err(BusError::BufferFull(slot.offline_capacity));
            }
            slot.offline.push_back((topic.to_string(), payload.to_vec()));
            return Ok(Delivery::Buffered {
                pending: slot.offline.len(),
            });
        }

        state.route(topic, payload);
        Ok(Delivery::Sent)
    }

    fn subscribe(&self, topic: &str) -> Result<(), BusError> {
        let mut state = self.broker.lock();
        if state.closed {
            return Err(BusError::Closed);
        }
        let slot = state
            .clients
            .get_mut(&self.client_id)
            .ok_or(BusError::Closed)?;
        if !slot.connected {
            return Err(BusError::NotConnected);
        }
        slot.subscriptions.insert(topic.to_string());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        let state = self.broker.lock();
        !state.closed
            && state
                .clients
                .get(&self.client_id)
                .is_some_and(|slot| slot.connected)
    }
}

impl Drop for LocalClient {
    fn drop(&mut self) {
        self.broker.lock().clients.remove(&self.client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(broker: &LocalBroker, id: &str) -> (LocalClient, mpsc::Receiver<BusEvent>) {
        let (client, mut rx) = broker
            .connect(ConnectOptions::default().with_client_id(id))
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), BusEvent::Connected { reconnect: false });
        (client, rx)
    }

    #[test]
    fn test_publish_fans_out_to_subscribers() {
        let broker = LocalBroker::new();
        let (a, mut a_rx) = connect(&broker, "a");
        let (b, mut b_rx) = connect(&broker, "b");
        let (publisher, _p_rx) = connect(&broker, "p");
        a.subscribe("t").unwrap();
        b.subscribe("other").unwrap();

        assert_eq!(publisher.publish("t", b"hello"), Ok(Delivery::Sent));
        assert_eq!(
            a_rx.try_recv().unwrap(),
            BusEvent::Message {
                topic: "t".to_string(),
                payload: b"hello".to_vec()
            }
        );
        assert!(b_rx.try_recv().is_err());
        assert_eq!(broker.subscriber_count("t"), 1);
    }

    #[test]
    fn test_disconnect_drops_subscriptions_and_buffers() {
        let broker = LocalBroker::new();
        let (client, mut rx) = connect(&broker, "c");
        let (listener, mut l_rx) = connect(&broker, "l");
        client.subscribe("in").unwrap();
        listener.subscribe("out").unwrap();

        broker.disconnect("c");
        assert_eq!(rx.try_recv().unwrap(), BusEvent::Disconnected);
        assert!(!client.is_connected());
        assert_eq!(broker.subscriber_count("in"), 0);
        assert_eq!(client.subscribe("in"), Err(BusError::NotConnected));

        assert_eq!(client.publish("out", b"1"), Ok(Delivery::Buffered { pending: 1 }));
        assert_eq!(client.buffered_count(), 1);
        assert!(l_rx.try_recv().is_err());

        broker.reconnect("c");
        assert_eq!(rx.try_recv().unwrap(), BusEvent::Connected { reconnect: true });
        assert_eq!(client.buffered_count(), 0);
        assert!(matches!(l_rx.try_recv().unwrap(), BusEvent::Message { .. }));
    }

    #[test]
    fn test_offline_buffer_rejects_when_full() {
        let broker = LocalBroker::new();
        let (client, _rx) = broker
            .connect(
                ConnectOptions::default()
                    .with_client_id("c")
                    .with_offline_buffer(2),
            )
            .unwrap();
        broker.disconnect("c");
        assert!(client.publish("t", b"1").is_ok());
        assert!(client.publish("t", b"2").is_ok());
        assert_eq!(client.publish("t", b"3"), Err(BusError::BufferFull(2)));
    }

    #[test]
    fn test_full_queue_drops_message() {
        let broker = LocalBroker::new();
        let (slow, mut slow_rx) = broker
            .connect(ConnectOptions::default().with_client_id("slow").with_queue_size(2))
            .unwrap();
        let (publisher, _rx) = connect(&broker, "p");
        slow.subscribe("t").unwrap();

        // the Connected event already occupies one slot
        assert_eq!(publisher.publish("t", b"1"), Ok(Delivery::Sent));
        assert_eq!(publisher.publish("t", b"2"), Ok(Delivery::Sent));

        assert!(matches!(slow_rx.try_recv().unwrap(), BusEvent::Connected { .. }));
        assert!(matches!(slow_rx.try_recv().unwrap(), BusEvent::Message { .. }));
        assert!(slow_rx.try_recv().is_err());
    }

    #[test]
    fn test_credentials_checked() {
        let broker = LocalBroker::with_credentials("user", "secret");
        assert!(matches!(
            broker.connect(ConnectOptions::default()),
            Err(BusError::Unauthorized)
        ));
        assert!(broker
            .connect(ConnectOptions::default().with_credentials("user", "secret"))
            .is_ok());
    }

    #[test]
    fn test_duplicate_client_id_rejected() {
        let broker = LocalBroker::new();
        let _first = connect(&broker, "dup");
        assert!(matches!(
            broker.connect(ConnectOptions::default().with_client_id("dup")),
            Err(BusError::ClientIdInUse(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_ends_event_stream() {
        let broker = LocalBroker::new();
        let (client, mut rx) = connect(&broker, "c");
        broker.shutdown();
        assert_eq!(rx.recv().await, None);
        assert_eq!(client.publish("t", b"x"), Err(BusError::Closed));
    }
}
