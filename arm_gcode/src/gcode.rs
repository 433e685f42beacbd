//! G-code lines understood by the arm firmware.

use std::fmt;

use crate::drivers::CoordinateMode;

/// Feed rate used when a stored `G1` line carries no `F` word.
pub const DEFAULT_PLAYBACK_FEED: f64 = 50.0;

/// One firmware instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GCode {
    /// Linear move. A non-positive feed leaves the `F` word out.
    Move { x: f64, y: f64, z: f64, feed: f64 },
    Home,
    Gripper(bool),
    Motors(bool),
    Mode(CoordinateMode),
    Status,
}

// `format!("{:.2}", -0.0)` prints "-0.00"
fn coord(value: f64) -> f64 {
    if value == 0.0 {
        0.0
    } else {
        value
    }
}

impl GCode {
    /// The instruction as stored in trajectories and logs, without terminator.
    pub fn to_line(&self) -> String {
        self.to_string()
    }

    /// The instruction as written to the serial line.
    pub fn to_wire(&self) -> String {
        format!("{}\r\n", self)
    }
}

impl fmt::Display for GCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            GCode::Move { x, y, z, feed } => {
                write!(f, "G1 X{:.2} Y{:.2} Z{:.2}", coord(x), coord(y), coord(z))?;
                if feed > 0.0 {
                    write!(f, " F{}", feed.round() as i64)?;
                }
                Ok(())
            }
            GCode::Home => write!(f, "G28"),
            GCode::Gripper(true) => write!(f, "M3"),
            GCode::Gripper(false) => write!(f, "M5"),
            GCode::Motors(true) => write!(f, "M17"),
            GCode::Motors(false) => write!(f, "M18"),
            GCode::Mode(CoordinateMode::Absolute) => write!(f, "G90"),
            GCode::Mode(CoordinateMode::Relative) => write!(f, "G91"),
            GCode::Status => write!(f, "M114"),
        }
    }
}

/// What playback does with one stored line.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackStep {
    Move { x: f64, y: f64, z: f64, feed: f64 },
    Gripper(bool),
    Blank,
    Unsupported,
}

/// Classifies a stored trajectory line.
///
/// `G1` lines are read word by word; missing or unreadable axis words fall
/// back to 0 and a missing feed to [`DEFAULT_PLAYBACK_FEED`]. Only bare `M3`
/// and `M5` count as gripper commands.
pub fn classify_line(line: &str) -> PlaybackStep {
    let line = line.trim();
    if line.is_empty() {
        return PlaybackStep::Blank;
    }

    let mut words = line.split_whitespace();
    match words.next() {
        Some("G1") => {
            let (mut x, mut y, mut z, mut feed) = (0.0, 0.0, 0.0, DEFAULT_PLAYBACK_FEED);
            for word in words {
                let mut chars = word.chars();
                let axis = chars.next();
                let value = chars.as_str().parse::<f64>().unwrap_or(0.0);
                match axis {
                    Some('X' | 'x') => x = value,
                    Some('Y' | 'y') => y = value,
                    Some('Z' | 'z') => z = value,
                    Some('F' | 'f') => feed = value,
                    _ => {}
                }
            }
            PlaybackStep::Move { x, y, z, feed }
        }
        Some("M3") if line == "M3" => PlaybackStep::Gripper(true),
        Some("M5") if line == "M5" => PlaybackStep::Gripper(false),
        _ => PlaybackStep::Unsupported,
    }
}
