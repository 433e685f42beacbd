use thiserror::Error;

/// Failure of a robot operation, from the serial line up to trajectory playback.
#[derive(Debug, Error)]
pub enum ArmError {
    #[error("robot not connected")]
    NotConnected,

    #[error("motors are disabled")]
    MotorsDisabled,

    /// The firmware answered with an `ERROR:` line.
    #[error("firmware error: {0}")]
    Protocol(String),

    #[error("no acknowledgment received")]
    NoAcknowledgment,

    #[error("transport failure: {0}")]
    Transport(String),

    /// A redundant transition, e.g. enabling motors that are already enabled.
    #[error("{0}")]
    InvalidState(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("file does not exist or is empty: '{0}'")]
    EmptyTrajectory(String),

    #[error("line {line_number} '{line}' failed: {source}")]
    Playback {
        line_number: usize,
        line: String,
        #[source]
        source: Box<ArmError>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArmError {
    /// True for failures reported by the firmware itself, whether it said
    /// `ERROR:` or never acknowledged.
    pub fn is_protocol(&self) -> bool {
        matches!(self, ArmError::Protocol(_) | ArmError::NoAcknowledgment)
    }

    /// Message to show a client, without the variant prefix for firmware errors.
    pub fn client_message(&self) -> String {
        match self {
            ArmError::Protocol(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}
