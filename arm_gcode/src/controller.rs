//! Robot-level protocol and state machine.
//!
//! [`RobotController`] is the only writer of [`RobotState`]. Every operation
//! checks its preconditions before touching the serial line, sends exactly one
//! G-code line, and interprets the firmware reply. Callers share one
//! controller through [`SharedController`], which serialises access to the
//! half-duplex link.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::drivers::{CoordinateMode, DeviceLink, ExecutionMode, OperationMode};
use crate::gcode::GCode;
use crate::reply::{log_reply, CommandOutcome};
use crate::trajectory::{PlaybackReport, PlaybackTarget, TrajectoryPlayer, TrajectoryStore};
use crate::{ArmError, Role};

pub const HOME_TIMEOUT: Duration = Duration::from_secs(6);
pub const MOVE_TIMEOUT: Duration = Duration::from_secs(3);
pub const GRIPPER_TIMEOUT: Duration = Duration::from_secs(4);
pub const MOTORS_TIMEOUT: Duration = Duration::from_secs(4);
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Controller shared between request handlers.
pub type SharedController = Arc<Mutex<RobotController>>;

/// In-memory robot state. Not persisted across restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RobotState {
    pub coordinate_mode: CoordinateMode,
    pub operation_mode: OperationMode,
    pub execution_mode: ExecutionMode,
    pub motors_enabled: bool,
}

/// Point-in-time view of the controller for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotSnapshot {
    pub connected: bool,
    pub coordinate_mode: CoordinateMode,
    pub operation_mode: OperationMode,
    pub execution_mode: ExecutionMode,
    pub motors_enabled: bool,
    pub recording: Option<String>,
}

pub struct RobotController {
    link: DeviceLink,
    store: TrajectoryStore,
    state: RobotState,
}

impl RobotController {
    pub fn new(link: DeviceLink, store: TrajectoryStore) -> Self {
        Self {
            link,
            store,
            state: RobotState::default(),
        }
    }

    pub fn into_shared(self) -> SharedController {
        Arc::new(Mutex::new(self))
    }

    pub fn state(&self) -> RobotState {
        self.state
    }

    pub fn store(&self) -> &TrajectoryStore {
        &self.store
    }

    pub fn snapshot(&self) -> RobotSnapshot {
        RobotSnapshot {
            connected: self.is_connected(),
            coordinate_mode: self.state.coordinate_mode,
            operation_mode: self.state.operation_mode,
            execution_mode: self.state.execution_mode,
            motors_enabled: self.state.motors_enabled,
            recording: self.store.recording_file().map(str::to_string),
        }
    }

    // ---- connection ----

    /// Connects the link and puts the firmware in absolute mode.
    /// Returns `true` straight away when already connected.
    pub fn connect(&mut self, retries: u32) -> bool {
        if self.link.is_connected() {
            return true;
        }
        if !self.link.connect(retries) {
            return false;
        }
        if let Err(e) = self.try_set_coordinate_mode(CoordinateMode::Absolute) {
            warn!("connected, but could not select absolute mode: {}", e);
        }
        true
    }

    /// Closes the link. The board resets when the port is next opened, so
    /// the motors are considered off from here on.
    pub fn disconnect(&mut self) {
        self.link.disconnect();
        self.state.execution_mode = ExecutionMode::Stopped;
        self.state.operation_mode = OperationMode::Manual;
        self.state.motors_enabled = false;
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    // ---- single commands ----

    pub fn home(&mut self) -> Result<CommandOutcome, ArmError> {
        self.require_motors()?;
        self.run_motion(GCode::Home, HOME_TIMEOUT)
    }

    pub fn move_to(&mut self, x: f64, y: f64, z: f64, feed: f64) -> Result<CommandOutcome, ArmError> {
        self.require_motors()?;
        let cmd = GCode::Move { x, y, z, feed };
        self.record(&cmd);
        self.run_motion(cmd, MOVE_TIMEOUT)
    }

    pub fn set_gripper(&mut self, on: bool) -> Result<CommandOutcome, ArmError> {
        self.require_motors()?;
        let cmd = GCode::Gripper(on);
        self.record(&cmd);
        self.execute(cmd, Some(GRIPPER_TIMEOUT))
    }

    /// Enables or disables the steppers. Asking for the current state is
    /// refused without talking to the firmware.
    pub fn set_motors(&mut self, on: bool) -> Result<CommandOutcome, ArmError> {
        self.require_connected()?;
        if self.state.motors_enabled == on {
            let msg = if on { "motors already enabled" } else { "motors already disabled" };
            return Err(ArmError::InvalidState(msg.to_string()));
        }
        let outcome = self.execute(GCode::Motors(on), Some(MOTORS_TIMEOUT))?;
        self.state.motors_enabled = on;
        Ok(outcome)
    }

    pub fn set_coordinate_mode(&mut self, mode: CoordinateMode) -> bool {
        self.try_set_coordinate_mode(mode).is_ok()
    }

    /// Like [`set_coordinate_mode`](Self::set_coordinate_mode), keeping the reason for a failure.
    pub fn try_set_coordinate_mode(&mut self, mode: CoordinateMode) -> Result<CommandOutcome, ArmError> {
        self.require_connected()?;
        let outcome = self.execute(GCode::Mode(mode), None)?;
        self.state.coordinate_mode = mode;
        Ok(outcome)
    }

    /// Raw status text reported by the firmware for `M114`.
    ///
    /// The reply is returned as it came (trimmed) unless it carries an
    /// `ERROR:` line or is empty.
    pub fn status(&mut self) -> Result<String, ArmError> {
        self.require_connected()?;
        let line = GCode::Status.to_line();
        let raw = self.link.send_command(&line, Some(STATUS_TIMEOUT))?;
        let reply = log_reply(&line, &raw);
        if let Some(first) = reply.errors.into_iter().next() {
            return Err(ArmError::Protocol(first));
        }
        let text = raw.trim();
        if text.is_empty() {
            return Err(ArmError::NoAcknowledgment);
        }
        Ok(text.to_string())
    }

    // ---- recording ----

    pub fn start_recording(&mut self, owner: i64, name: &str) -> bool {
        self.store.start_recording(owner, name)
    }

    pub fn stop_recording(&mut self) -> bool {
        self.store.stop_recording()
    }

    pub fn is_recording(&self) -> bool {
        self.store.is_recording()
    }

    // ---- stored trajectories ----

    /// Plays back a stored trajectory. Operation mode is automatic for the
    /// duration of the run and manual afterwards, whatever the outcome.
    pub fn run_file(&mut self, owner: i64, name: &str) -> Result<PlaybackReport, ArmError> {
        self.require_connected()?;
        let filename = self.store.resolve(owner, name)?;
        let lines = self.store.load(owner, &filename)?;

        info!("running trajectory {} ({} lines)", filename, lines.len());
        self.state.operation_mode = OperationMode::Automatic;
        let result = TrajectoryPlayer::new(&filename, &lines).run(self);
        self.state.operation_mode = OperationMode::Manual;
        self.state.execution_mode = ExecutionMode::Stopped;

        if let Err(e) = &result {
            error!("trajectory {} aborted: {}", filename, e);
        }
        result
    }

    pub fn list_files(&self, owner: i64, role: Role) -> Vec<String> {
        self.store.list(owner, role)
    }

    /// Stores uploaded G-code and returns the filename it was given.
    pub fn upload_file(&mut self, owner: i64, name: &str, content: &str) -> Result<String, ArmError> {
        self.store.save(owner, name, content)
    }

    /// Deletes a trajectory. `Ok(false)` when it did not exist.
    pub fn delete_file(&mut self, owner: i64, name: &str) -> Result<bool, ArmError> {
        let filename = match self.store.resolve(owner, name) {
            Ok(filename) => filename,
            Err(ArmError::EmptyTrajectory(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        self.store.delete(&filename)
    }

    // ---- internals ----

    fn require_connected(&self) -> Result<(), ArmError> {
        if self.link.is_connected() {
            Ok(())
        } else {
            Err(ArmError::NotConnected)
        }
    }

    fn require_motors(&self) -> Result<(), ArmError> {
        self.require_connected()?;
        if self.state.motors_enabled {
            Ok(())
        } else {
            Err(ArmError::MotorsDisabled)
        }
    }

    fn record(&mut self, cmd: &GCode) {
        if self.store.is_recording() && !self.store.append_line(&cmd.to_line()) {
            warn!("could not record '{}'", cmd);
        }
    }

    /// Sends a command that keeps the arm busy; execution mode is running
    /// only while it is in flight.
    fn run_motion(&mut self, cmd: GCode, timeout: Duration) -> Result<CommandOutcome, ArmError> {
        let _running = Running::enter(&mut self.state);
        send(&mut self.link, cmd, Some(timeout))
    }

    fn execute(&mut self, cmd: GCode, timeout: Option<Duration>) -> Result<CommandOutcome, ArmError> {
        send(&mut self.link, cmd, timeout)
    }
}

/// Marks execution as running until dropped.
struct Running<'a> {
    state: &'a mut RobotState,
}

impl<'a> Running<'a> {
    fn enter(state: &'a mut RobotState) -> Self {
        state.execution_mode = ExecutionMode::Running;
        Self { state }
    }
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.state.execution_mode = ExecutionMode::Stopped;
    }
}

fn send(link: &mut DeviceLink, cmd: GCode, timeout: Option<Duration>) -> Result<CommandOutcome, ArmError> {
    let line = cmd.to_line();
    let raw = link.send_command(&line, timeout).inspect_err(|e| {
        error!("[{}] {}", line, e);
    })?;
    log_reply(&line, &raw).outcome().inspect_err(|e| {
        warn!("[{}] failed: {} (raw reply {:?})", line, e, raw);
    })
}

impl PlaybackTarget for RobotController {
    fn set_motors(&mut self, on: bool) -> Result<CommandOutcome, ArmError> {
        RobotController::set_motors(self, on)
    }

    fn try_set_coordinate_mode(&mut self, mode: CoordinateMode) -> Result<CommandOutcome, ArmError> {
        RobotController::try_set_coordinate_mode(self, mode)
    }

    fn home(&mut self) -> Result<CommandOutcome, ArmError> {
        RobotController::home(self)
    }

    fn move_to(&mut self, x: f64, y: f64, z: f64, feed: f64) -> Result<CommandOutcome, ArmError> {
        RobotController::move_to(self, x, y, z, feed)
    }

    fn set_gripper(&mut self, on: bool) -> Result<CommandOutcome, ArmError> {
        RobotController::set_gripper(self, on)
    }
}
