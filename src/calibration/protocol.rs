//! Message-level calibration protocol.
//!
//! Bridges bus events and extracted frames to the shared
//! [`CalibrationSession`](super::CalibrationSession):
//!
//! - a `start` control message on the subscribe topic begins a round;
//! - every frame's points are accumulated, and a completed round is
//!   published once on the publish topic as a data message;
//! - [`CalibrationProtocol::start_calibration`] sends a `start` trigger
//!   outward when this process initiates the exchange.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use super::session::{Phase, RoundStatus, SessionConfig, SharedSession};
use super::wire::{self, ControlMessage, WireError};
use crate::bus::{BusError, BusEvent, Delivery, MessageBus};
use crate::points::PointSet;

/// Protocol errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("Publish failed: {0}")]
    Publish(#[from] BusError),
}

/// Topics and observability settings for the protocol.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Topic carrying inbound control messages.
    pub subscribe_topic: String,
    /// Topic for outbound start triggers and data messages.
    pub publish_topic: String,
    /// A capturing round idle for longer than this is reported.
    pub stall_warning: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            subscribe_topic: "ledroid/server".to_string(),
            publish_topic: "ledroid/client".to_string(),
            stall_warning: Duration::from_secs(30),
        }
    }
}

impl ProtocolConfig {
    pub fn with_subscribe_topic(mut self, topic: impl Into<String>) -> Self {
        self.subscribe_topic = topic.into();
        self
    }

    pub fn with_publish_topic(mut self, topic: impl Into<String>) -> Self {
        self.publish_topic = topic.into();
        self
    }

    pub fn with_stall_warning(mut self, stall: Duration) -> Self {
        self.stall_warning = stall;
        self
    }
}

/// Calibration protocol endpoint. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct CalibrationProtocol {
    bus: Arc<dyn MessageBus>,
    session: SharedSession,
    config: ProtocolConfig,
    /// Round and capture count of the last stall reported.
    stall_reported: Arc<Mutex<Option<(Uuid, usize)>>>,
}

impl CalibrationProtocol {
    pub fn new(bus: Arc<dyn MessageBus>, session: SessionConfig, config: ProtocolConfig) -> Self {
        Self {
            bus,
            session: SharedSession::new(session),
            config,
            stall_reported: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn status(&self) -> RoundStatus {
        self.session.status()
    }

    /// React to one event from the bus. Never fails; problems are logged.
    pub fn handle_event(&self, event: BusEvent) {
        match event {
            BusEvent::Connected { reconnect } => {
                if reconnect {
                    tracing::info!("Reconnected");
                } else {
                    tracing::info!("Connected");
                }
                self.subscribe();
            }
            BusEvent::Disconnected => {
                tracing::warn!("The connection was lost");
            }
            BusEvent::Message { topic, payload } => {
                if topic != self.config.subscribe_topic {
                    tracing::debug!("Ignoring message on unexpected topic {}", topic);
                    return;
                }
                if let Err(e) = self.handle_message(&payload) {
                    tracing::warn!("Discarding inbound message: {}", e);
                }
            }
        }
    }

    fn subscribe(&self) {
        match self.bus.subscribe(&self.config.subscribe_topic) {
            Ok(()) => tracing::info!("Subscribed to {}", self.config.subscribe_topic),
            Err(e) => tracing::error!(
                "Failed to subscribe to {}: {}",
                self.config.subscribe_topic,
                e
            ),
        }
    }

    /// Apply one inbound control payload. Returns the id of the round begun.
    pub fn handle_message(&self, payload: &[u8]) -> Result<Uuid, ProtocolError> {
        tracing::debug!("Incoming message: {}", String::from_utf8_lossy(payload));
        match wire::parse_control(payload)? {
            ControlMessage::Start => Ok(self.session.begin()),
        }
    }

    /// Feed one frame's points into the active round.
    ///
    /// Returns `Ok(Some(_))` when this frame completed the round and the
    /// dataset was accepted by the bus, `Ok(None)` otherwise.
    pub fn on_points(&self, points: PointSet) -> Result<Option<Delivery>, ProtocolError> {
        let Some(dataset) = self.session.accumulate(points) else {
            return Ok(None);
        };

        tracing::info!(
            "Calibration round {} complete: {} captures, {} points",
            dataset.round_id,
            dataset.len(),
            dataset.point_count()
        );

        let payload = wire::encode_data(&dataset.captures).map_err(|e| {
            tracing::error!("Cannot encode round {}: {}", dataset.round_id, e);
            e
        })?;

        self.publish(payload.as_bytes()).map(Some)
    }

    /// Ask the remote controller to start a calibration round.
    pub fn start_calibration(&self) -> Result<Delivery, ProtocolError> {
        self.publish(&wire::encode_start())
    }

    /// Whether the bus client currently has a live broker connection.
    pub fn is_connected(&self) -> bool {
        self.bus.is_connected()
    }

    fn publish(&self, payload: &[u8]) -> Result<Delivery, ProtocolError> {
        let topic = &self.config.publish_topic;
        if !self.bus.is_connected() {
            tracing::warn!("Client offline; message to {} will be buffered", topic);
        }
        match self.bus.publish(topic, payload) {
            Ok(delivery) => {
                tracing::info!("Sent {} bytes to {}", payload.len(), topic);
                if let Delivery::Buffered { pending } = delivery {
                    tracing::info!("{} messages in buffer", pending);
                }
                Ok(delivery)
            }
            Err(e) => {
                tracing::error!("Error publishing to {}: {}", topic, e);
                Err(e.into())
            }
        }
    }

    /// Report a capturing round that has not progressed within the stall
    /// interval. Each stall is reported once. Returns whether it reported.
    pub fn check_stall(&self) -> bool {
        let status = self.session.status();
        let (Phase::Capturing, Some(round_id)) = (status.phase, status.round_id) else {
            return false;
        };
        let Some(last_activity) = status.last_capture_at.or(status.started_at) else {
            return false;
        };

        let idle = (Utc::now() - last_activity).to_std().unwrap_or_default();
        if idle < self.config.stall_warning {
            return false;
        }

        let key = (round_id, status.captured);
        let mut reported = self
            .stall_reported
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *reported == Some(key) {
            return false;
        }
        *reported = Some(key);

        tracing::warn!(
            "Calibration round {} stalled at {}/{} captures for {}s",
            round_id,
            status.captured,
            status.target,
            idle.as_secs()
        );
        true
    }
}
