//! Multi-frame capture state machine.
//!
//! A session sits in [`Phase::Idle`] until [`CalibrationSession::begin`] is
//! called, then collects one [`PointSet`] per frame until the configured
//! capture count is reached. The completed round is handed back to the caller
//! exactly once and the session returns to idle.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::points::PointSet;

/// Default number of frames collected per calibration round.
pub const DEFAULT_CAPTURE_COUNT: usize = 20;

/// Session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Phase {
    #[default]
    Idle,
    Capturing,
}

/// Configuration for a calibration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Frames per round. Always at least 1.
    pub capture_count: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture_count: DEFAULT_CAPTURE_COUNT,
        }
    }
}

impl SessionConfig {
    pub fn with_capture_count(mut self, count: usize) -> Self {
        self.capture_count = count.max(1);
        self
    }
}

/// A finished calibration round.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub round_id: Uuid,
    pub captures: Vec<PointSet>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.captures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }

    /// Total number of points across all captures.
    pub fn point_count(&self) -> usize {
        self.captures.iter().map(Vec::len).sum()
    }
}

/// Snapshot of a session for logging and status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundStatus {
    pub phase: Phase,
    pub captured: usize,
    pub target: usize,
    pub round_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_capture_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct ActiveRound {
    id: Uuid,
    started_at: DateTime<Utc>,
    last_capture_at: Option<DateTime<Utc>>,
    captures: Vec<PointSet>,
}

/// Calibration round state machine.
///
/// Not synchronized; see [`SharedSession`] for use from several threads.
#[derive(Debug)]
pub struct CalibrationSession {
    config: SessionConfig,
    round: Option<ActiveRound>,
}

impl CalibrationSession {
    pub fn new(config: SessionConfig) -> Self {
        let config = SessionConfig {
            capture_count: config.capture_count.max(1),
        };
        Self {
            config,
            round: None,
        }
    }

    pub fn phase(&self) -> Phase {
        if self.round.is_some() {
            Phase::Capturing
        } else {
            Phase::Idle
        }
    }

    pub fn capture_count(&self) -> usize {
        self.config.capture_count
    }

    /// Number of captures held by the active round.
    pub fn captured(&self) -> usize {
        self.round.as_ref().map_or(0, |r| r.captures.len())
    }

    /// Start a fresh round, discarding any round in progress.
    ///
    /// Returns the new round id.
    pub fn begin(&mut self) -> Uuid {
        if let Some(previous) = self.round.take() {
            tracing::info!(
                "Restarting calibration: discarding round {} with {}/{} captures",
                previous.id,
                previous.captures.len(),
                self.config.capture_count
            );
        }

        let round = ActiveRound {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            last_capture_at: None,
            captures: Vec::with_capacity(self.config.capture_count),
        };
        let id = round.id;
        self.round = Some(round);
        tracing::info!(
            "Calibration round {} started ({} captures)",
            id,
            self.config.capture_count
        );
        id
    }

    /// Record one frame's points.
    ///
    /// Ignored while idle. Returns the completed round when this capture
    /// reaches the target count; the session is idle again afterwards.
    pub fn accumulate(&mut self, points: PointSet) -> Option<Dataset> {
        let target = self.config.capture_count;
        let round = self.round.as_mut()?;

        round.captures.push(points);
        round.last_capture_at = Some(Utc::now());
        tracing::debug!(
            "Round {}: capture {}/{} ({} points)",
            round.id,
            round.captures.len(),
            target,
            round.captures.last().map_or(0, Vec::len)
        );

        if round.captures.len() < target {
            return None;
        }

        let finished = self.round.take()?;
        Some(Dataset {
            round_id: finished.id,
            captures: finished.captures,
        })
    }

    pub fn status(&self) -> RoundStatus {
        RoundStatus {
            phase: self.phase(),
            captured: self.captured(),
            target: self.config.capture_count,
            round_id: self.round.as_ref().map(|r| r.id),
            started_at: self.round.as_ref().map(|r| r.started_at),
            last_capture_at: self.round.as_ref().and_then(|r| r.last_capture_at),
        }
    }
}

impl Default for CalibrationSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

/// A session shared between the frame thread and the message handler.
///
/// Every transition happens under one lock, so `begin` and `accumulate`
/// are linearizable with respect to each other.
#[derive(Debug, Clone, Default)]
pub struct SharedSession {
    inner: Arc<Mutex<CalibrationSession>>,
}

impl SharedSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CalibrationSession::new(config))),
        }
    }

    pub fn begin(&self) -> Uuid {
        self.lock().begin()
    }

    pub fn accumulate(&self, points: PointSet) -> Option<Dataset> {
        self.lock().accumulate(points)
    }

    pub fn status(&self) -> RoundStatus {
        self.lock().status()
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase()
    }

    fn lock(&self) -> MutexGuard<'_, CalibrationSession> {
        // transitions never panic part-way, so a poisoned session is still consistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
