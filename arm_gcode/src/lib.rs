//! G-code protocol core for a serial-attached robot arm.
//!
//! Layers, leaves first:
//!
//! * [`transport`]: raw serial byte channel,
//! * [`drivers::DeviceLink`]: one command, one bounded reply, connection retries,
//! * [`controller::RobotController`]: G-code formatting, reply parsing and the
//!   robot state machine,
//! * [`trajectory`]: recorded programs on disk and their playback.

pub mod errors;
pub use errors::*;

mod role;
pub use role::Role;

pub mod transport;
pub mod drivers;
pub mod gcode;
pub mod reply;
pub mod trajectory;
pub mod controller;

pub use controller::{RobotController, RobotSnapshot, RobotState, SharedController};
pub use drivers::{CoordinateMode, DeviceLink, ExecutionMode, LinkConfig, OperationMode};
pub use reply::CommandOutcome;
pub use trajectory::{PlaybackReport, TrajectoryStore};
