//! Firmware reply grammar.
//!
//! A reply is the text accumulated for one command. Every line is trimmed and
//! classified:
//!
//! * `OK` marks the command as acknowledged,
//! * `INFO: <text>` adds a message for the client,
//! * `ERROR: <text>` fails the command (the first one is reported),
//! * any other non-empty line is kept as an extra message.

use tracing::{debug, error, info, warn};

use crate::ArmError;

/// Message returned when the firmware acknowledged without saying anything.
pub const GENERIC_SUCCESS: &str = "command completed";

/// Separator between messages when rendered as one string.
pub const MESSAGE_SEPARATOR: &str = " | ";

/// One non-empty reply line, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyLine {
    Ok,
    Info(String),
    Error(String),
    Other(String),
}

impl ReplyLine {
    fn classify(line: &str) -> Self {
        if line == "OK" {
            ReplyLine::Ok
        } else if let Some(rest) = line.strip_prefix("INFO:") {
            ReplyLine::Info(rest.trim_start().to_string())
        } else if let Some(rest) = line.strip_prefix("ERROR:") {
            ReplyLine::Error(rest.trim_start().to_string())
        } else {
            ReplyLine::Other(line.to_string())
        }
    }
}

/// Classified content of one reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirmwareReply {
    pub acknowledged: bool,
    /// `INFO:` payloads and unprefixed lines, in arrival order.
    pub messages: Vec<String>,
    pub errors: Vec<String>,
    /// Every line as classified, in arrival order.
    pub lines: Vec<ReplyLine>,
}

impl FirmwareReply {
    pub fn parse(raw: &str) -> Self {
        let mut reply = FirmwareReply::default();
        for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let line = ReplyLine::classify(line);
            match &line {
                ReplyLine::Ok => reply.acknowledged = true,
                ReplyLine::Info(text) | ReplyLine::Other(text) => reply.messages.push(text.clone()),
                ReplyLine::Error(text) => reply.errors.push(text.clone()),
            }
            reply.lines.push(line);
        }
        reply
    }

    /// Writes every line to the log at a severity matching its class.
    pub fn log(&self, command: &str) {
        if self.lines.is_empty() {
            warn!("[{}] no reply from firmware", command);
            return;
        }
        for line in &self.lines {
            match line {
                ReplyLine::Ok => debug!("[{}] OK", command),
                ReplyLine::Info(text) => info!("[{}] firmware: {}", command, text),
                ReplyLine::Error(text) => error!("[{}] firmware error: {}", command, text),
                ReplyLine::Other(text) => debug!("[{}] firmware says: {}", command, text),
            }
        }
    }

    /// Success when acknowledged and free of errors.
    pub fn outcome(self) -> Result<CommandOutcome, ArmError> {
        if let Some(first) = self.errors.into_iter().next() {
            return Err(ArmError::Protocol(first));
        }
        if !self.acknowledged {
            return Err(ArmError::NoAcknowledgment);
        }
        Ok(CommandOutcome {
            messages: self.messages,
        })
    }
}

/// Acknowledged command and what the firmware had to say about it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    pub messages: Vec<String>,
}

impl CommandOutcome {
    /// Single client-facing string.
    pub fn summary(&self) -> String {
        if self.messages.is_empty() {
            GENERIC_SUCCESS.to_string()
        } else {
            self.messages.join(MESSAGE_SEPARATOR)
        }
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

/// Parses `raw` once and logs it. The parse is returned for interpretation.
pub fn log_reply(command: &str, raw: &str) -> FirmwareReply {
    let reply = FirmwareReply::parse(raw);
    reply.log(command);
    reply
}
