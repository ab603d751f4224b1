//! Top-level driver wiring a frame source, the extractor and the protocol.
//!
//! Two independent tasks run side by side: the event loop drains bus events
//! into the protocol, and the frame loop pulls frames at a fixed rate and
//! feeds their points to it. Neither owns calibration state; both go through
//! the protocol's shared session.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::DynamicImage;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::bus::{BusEvent, Delivery};
use crate::calibration::{CalibrationProtocol, ProtocolError, RoundStatus};
use crate::vision::PointExtractor;

/// Image file extensions picked up by [`DirectoryFrames`].
const FRAME_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "tif"];

/// Source of camera frames.
pub trait FrameSource: Send + 'static {
    /// Next frame, or `None` when the source is exhausted.
    fn next_frame(&mut self) -> Option<DynamicImage>;
}

/// Frame source errors.
#[derive(Error, Debug)]
pub enum FrameSourceError {
    #[error("Failed to read frame directory {0}: {1}")]
    ReadDir(PathBuf, std::io::Error),
    #[error("No image files in {0}")]
    Empty(PathBuf),
}

/// Frames read from the image files of a directory, in file name order.
#[derive(Debug, Clone)]
pub struct DirectoryFrames {
    paths: Vec<PathBuf>,
    cursor: usize,
    repeat: bool,
}

impl DirectoryFrames {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, FrameSourceError> {
        let dir = dir.as_ref();
        let entries =
            std::fs::read_dir(dir).map_err(|e| FrameSourceError::ReadDir(dir.to_path_buf(), e))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(FrameSourceError::Empty(dir.to_path_buf()));
        }
        Ok(Self {
            paths,
            cursor: 0,
            repeat: false,
        })
    }

    /// Start over from the first file once the last one was delivered.
    pub fn with_repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for DirectoryFrames {
    fn next_frame(&mut self) -> Option<DynamicImage> {
        // unreadable files are skipped, but at most one full pass per call
        for _ in 0..self.paths.len() {
            if self.cursor >= self.paths.len() {
                if !self.repeat {
                    return None;
                }
                self.cursor = 0;
            }
            let path = &self.paths[self.cursor];
            self.cursor += 1;
            match image::open(path) {
                Ok(frame) => return Some(frame),
                Err(e) => tracing::warn!("Skipping frame {}: {}", path.display(), e),
            }
        }
        None
    }
}

/// In-memory frame source.
#[derive(Debug, Clone, Default)]
pub struct FrameQueue {
    frames: VecDeque<DynamicImage>,
    repeat: bool,
}

impl FrameQueue {
    pub fn new(frames: impl IntoIterator<Item = DynamicImage>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            repeat: false,
        }
    }

    pub fn with_repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }
}

impl FrameSource for FrameQueue {
    fn next_frame(&mut self) -> Option<DynamicImage> {
        let frame = self.frames.pop_front()?;
        if self.repeat {
            self.frames.push_back(frame.clone());
        }
        Some(frame)
    }
}

/// Configuration for [`CalibrationRunner`].
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Interval between frames.
    pub frame_interval: Duration,
    /// How often a capturing round is checked for stalls.
    pub stall_check_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(33),
            stall_check_interval: Duration::from_secs(5),
        }
    }
}

impl RunnerConfig {
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn with_stall_check_interval(mut self, interval: Duration) -> Self {
        self.stall_check_interval = interval;
        self
    }
}

/// Control commands for the runner.
#[derive(Debug, Clone)]
enum ControlCommand {
    Stop,
}

/// Runner errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    #[error("Runner is not running")]
    NotRunning,
}

/// Handle for controlling a running [`CalibrationRunner`].
#[derive(Clone)]
pub struct RunnerHandle {
    control_tx: mpsc::Sender<ControlCommand>,
    protocol: CalibrationProtocol,
    running: Arc<AtomicBool>,
}

impl RunnerHandle {
    /// Publish a start trigger to the remote controller.
    pub fn start_calibration(&self) -> Result<Delivery, ProtocolError> {
        self.protocol.start_calibration()
    }

    pub fn status(&self) -> RoundStatus {
        self.protocol.status()
    }

    /// Stop both loops.
    pub async fn stop(&self) -> Result<(), RunnerError> {
        self.running.store(false, Ordering::SeqCst);
        self.control_tx
            .send(ControlCommand::Stop)
            .await
            .map_err(|_| RunnerError::NotRunning)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Drives one calibration endpoint.
pub struct CalibrationRunner<S: FrameSource> {
    protocol: CalibrationProtocol,
    extractor: PointExtractor,
    source: S,
    events: mpsc::Receiver<BusEvent>,
    config: RunnerConfig,
    running: Arc<AtomicBool>,
}

impl<S: FrameSource> CalibrationRunner<S> {
    pub fn new(
        protocol: CalibrationProtocol,
        extractor: PointExtractor,
        source: S,
        events: mpsc::Receiver<BusEvent>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            protocol,
            extractor,
            source,
            events,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the event and frame loops. Returns a handle and the join handles
    /// of both tasks.
    pub fn run(self) -> (RunnerHandle, RunnerTasks) {
        let (control_tx, control_rx) = mpsc::channel::<ControlCommand>(4);
        self.running.store(true, Ordering::SeqCst);

        let handle = RunnerHandle {
            control_tx,
            protocol: self.protocol.clone(),
            running: self.running.clone(),
        };

        let events = tokio::spawn(event_loop(
            self.protocol.clone(),
            self.events,
            control_rx,
            self.config.stall_check_interval,
            self.running.clone(),
        ));
        let frames = tokio::spawn(frame_loop(
            self.protocol,
            self.extractor,
            self.source,
            self.config.frame_interval,
            self.running,
        ));

        (handle, RunnerTasks { events, frames })
    }
}

/// Join handles of the runner's tasks.
pub struct RunnerTasks {
    pub events: JoinHandle<()>,
    pub frames: JoinHandle<()>,
}

impl RunnerTasks {
    /// Wait for both loops to finish.
    pub async fn join(self) {
        if let Err(e) = self.events.await {
            tracing::error!("Event loop panicked: {}", e);
        }
        if let Err(e) = self.frames.await {
            tracing::error!("Frame loop panicked: {}", e);
        }
    }
}

async fn event_loop(
    protocol: CalibrationProtocol,
    mut events: mpsc::Receiver<BusEvent>,
    mut control_rx: mpsc::Receiver<ControlCommand>,
    stall_check: Duration,
    running: Arc<AtomicBool>,
) {
    let mut stall_interval = interval(stall_check);
    stall_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            Some(cmd) = control_rx.recv() => {
                match cmd {
                    ControlCommand::Stop => {
                        tracing::info!("Runner stopping...");
                        break;
                    }
                }
            }

            event = events.recv() => {
                match event {
                    Some(event) => protocol.handle_event(event),
                    None => {
                        tracing::warn!("Message bus closed");
                        break;
                    }
                }
            }

            _ = stall_interval.tick() => {
                protocol.check_stall();
            }
        }

        if !running.load(Ordering::SeqCst) {
            break;
        }
    }

    running.store(false, Ordering::SeqCst);
    tracing::info!("Event loop stopped");
}

async fn frame_loop<S: FrameSource>(
    protocol: CalibrationProtocol,
    extractor: PointExtractor,
    mut source: S,
    frame_interval: Duration,
    running: Arc<AtomicBool>,
) {
    let mut ticker = interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while running.load(Ordering::SeqCst) {
        ticker.tick().await;

        // frame decoding and extraction block, so they run off the async workers
        let extractor = extractor.clone();
        let step = tokio::task::spawn_blocking(move || {
            let points = source.next_frame().map(|frame| extractor.extract(&frame));
            (source, points)
        })
        .await;
        let points = match step {
            Ok((returned, Some(points))) => {
                source = returned;
                points
            }
            Ok((_, None)) => {
                tracing::info!("Frame source exhausted");
                break;
            }
            Err(e) => {
                tracing::error!("Frame extraction panicked: {}", e);
                break;
            }
        };

        // publish failures are logged by the protocol and not retried
        let _ = protocol.on_points(points);
    }

    tracing::info!("Frame loop stopped");
}
