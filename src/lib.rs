// Copyright 2017 Matt Everett (Original Android implementation)
// Copyright 2025 ModerRAS (Rust implementation)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # ledroid
//!
//! Locates bright LED markers in camera frames and runs a multi-frame
//! calibration exchange with a remote controller over a publish/subscribe
//! message bus.
//!
//! The pipeline per frame is: threshold → opening → boundary tracing →
//! centroids ([`PointExtractor`]). A `start` message from the controller
//! begins a round; the next N frames' points are collected by the
//! [`CalibrationSession`] and published once as a single data message.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ledroid::{
//!     CalibrationProtocol, CalibrationRunner, ConnectOptions, DirectoryFrames,
//!     LocalBroker, PointExtractor, ProtocolConfig, RunnerConfig, SessionConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let broker = LocalBroker::new();
//!     let (client, events) = broker.connect(ConnectOptions::default())?;
//!
//!     let protocol = CalibrationProtocol::new(
//!         Arc::new(client),
//!         SessionConfig::default().with_capture_count(20),
//!         ProtocolConfig::default(),
//!     );
//!     let runner = CalibrationRunner::new(
//!         protocol,
//!         PointExtractor::default(),
//!         DirectoryFrames::open("frames")?.with_repeat(true),
//!         events,
//!         RunnerConfig::default(),
//!     );
//!
//!     let (handle, tasks) = runner.run();
//!     handle.start_calibration()?;
//!     tasks.join().await;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod calibration;
pub mod points;
pub mod runner;
pub mod settings;
pub mod vision;

pub use bus::{BusError, BusEvent, ConnectOptions, Delivery, LocalBroker, LocalClient, MessageBus};
pub use calibration::{
    CalibrationProtocol, CalibrationSession, Dataset, Phase, ProtocolConfig, ProtocolError,
    RoundStatus, SessionConfig, SharedSession, WireError,
};
pub use points::{normalize, NormalizeError, NormalizedPointSet, Point, PointSet};
pub use runner::{
    CalibrationRunner, DirectoryFrames, FrameQueue, FrameSource, FrameSourceError, RunnerConfig,
    RunnerHandle,
};
pub use settings::AppSettings;
pub use vision::{ExtractorConfig, PointExtractor};
