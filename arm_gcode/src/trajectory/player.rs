use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::drivers::CoordinateMode;
use crate::gcode::{classify_line, PlaybackStep};
use crate::reply::{CommandOutcome, MESSAGE_SEPARATOR};
use crate::ArmError;

/// Single-command operations playback is built from.
pub trait PlaybackTarget {
    fn set_motors(&mut self, on: bool) -> Result<CommandOutcome, ArmError>;
    fn try_set_coordinate_mode(&mut self, mode: CoordinateMode) -> Result<CommandOutcome, ArmError>;
    fn home(&mut self) -> Result<CommandOutcome, ArmError>;
    fn move_to(&mut self, x: f64, y: f64, z: f64, feed: f64) -> Result<CommandOutcome, ArmError>;
    fn set_gripper(&mut self, on: bool) -> Result<CommandOutcome, ArmError>;
}

/// What a completed playback did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackReport {
    pub file: String,
    pub executed: usize,
    pub skipped: usize,
    /// Firmware messages from every executed line, in order.
    pub messages: Vec<String>,
}

impl PlaybackReport {
    pub fn summary(&self) -> String {
        format!(
            "trajectory '{}' executed: {} commands, {} skipped",
            self.file, self.executed, self.skipped
        )
    }

    pub fn firmware_log(&self) -> String {
        self.messages.join(MESSAGE_SEPARATOR)
    }
}

/// Drives a loaded trajectory through a [`PlaybackTarget`].
pub struct TrajectoryPlayer<'a> {
    file: &'a str,
    lines: &'a [String],
}

impl<'a> TrajectoryPlayer<'a> {
    pub fn new(file: &'a str, lines: &'a [String]) -> Self {
        Self { file, lines }
    }

    /// Prepares the arm (motors on, absolute mode, homing), then runs every
    /// line in order. The first failing line aborts the run; motions already
    /// made are not undone.
    pub fn run<T: PlaybackTarget + ?Sized>(&self, target: &mut T) -> Result<PlaybackReport, ArmError> {
        if self.lines.is_empty() {
            return Err(ArmError::EmptyTrajectory(self.file.to_string()));
        }

        let mut report = PlaybackReport {
            file: self.file.to_string(),
            ..PlaybackReport::default()
        };

        self.prepare(target, &mut report)?;

        for (index, line) in self.lines.iter().enumerate() {
            let line_number = index + 1;
            let result = match classify_line(line) {
                PlaybackStep::Move { x, y, z, feed } => target.move_to(x, y, z, feed),
                PlaybackStep::Gripper(on) => target.set_gripper(on),
                PlaybackStep::Blank => continue,
                PlaybackStep::Unsupported => {
                    warn!("{}:{} skipping unsupported line '{}'", self.file, line_number, line);
                    report.skipped += 1;
                    continue;
                }
            };

            match result {
                Ok(outcome) => {
                    report.executed += 1;
                    report.messages.extend(outcome.messages);
                }
                Err(e) => {
                    warn!("{}:{} '{}' failed: {}", self.file, line_number, line, e);
                    return Err(ArmError::Playback {
                        line_number,
                        line: line.clone(),
                        source: Box::new(e),
                    });
                }
            }
        }

        info!("{}", report.summary());
        Ok(report)
    }

    fn prepare<T: PlaybackTarget + ?Sized>(&self, target: &mut T, report: &mut PlaybackReport) -> Result<(), ArmError> {
        match target.set_motors(true) {
            Ok(outcome) => report.messages.extend(outcome.messages),
            Err(ArmError::InvalidState(msg)) => info!("{} ({})", msg, self.file),
            Err(e) => return Err(e),
        }
        let outcome = target.try_set_coordinate_mode(CoordinateMode::Absolute)?;
        report.messages.extend(outcome.messages);
        let outcome = target.home()?;
        report.messages.extend(outcome.messages);
        Ok(())
    }
}
