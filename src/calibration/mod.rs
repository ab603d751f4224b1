//! Multi-frame calibration: session state machine, wire format and protocol.

mod protocol;
mod session;
pub mod wire;

pub use protocol::{CalibrationProtocol, ProtocolConfig, ProtocolError};
pub use session::{
    CalibrationSession, Dataset, Phase, RoundStatus, SessionConfig, SharedSession,
    DEFAULT_CAPTURE_COUNT,
};
pub use wire::{ControlMessage, WireError};
