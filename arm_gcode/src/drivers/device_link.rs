use std::thread::sleep;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::LinkConfig;
use crate::gcode::GCode;
use crate::transport::Transport;
use crate::ArmError;

/// One command, one bounded reply.
///
/// `DeviceLink` owns the transport exclusively and adds the connection
/// lifecycle on top of it: board stabilization, flushing boot output,
/// verifying the firmware answers, and retrying.
pub struct DeviceLink {
    config: LinkConfig,
    transport: Box<dyn Transport + Send>,
    connected: bool,
}

impl DeviceLink {
    pub fn new(transport: Box<dyn Transport + Send>, config: LinkConfig) -> Self {
        Self {
            config,
            transport,
            connected: false,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Connects, making up to `max_retries` attempts (at least one).
    ///
    /// An attempt succeeds only when the transport opens and the firmware
    /// answers a status probe with a non-empty reply that does not mention
    /// an error. Between failed attempts the link waits the configured
    /// backoff. Calling this while connected returns `true` immediately.
    pub fn connect(&mut self, max_retries: u32) -> bool {
        if self.connected {
            return true;
        }

        let attempts = max_retries.max(1);
        for attempt in 1..=attempts {
            info!("connecting to {} (attempt {}/{})", self.config.port, attempt, attempts);

            if self.transport.connect() {
                sleep(self.config.stabilization());
                self.flush_input();
                self.connected = true;

                if self.verify_connection() {
                    info!("firmware on {} is responding", self.config.port);
                    return true;
                }

                warn!("firmware on {} did not answer the status probe", self.config.port);
                self.disconnect();
            }

            if attempt < attempts {
                sleep(self.config.retry_backoff());
            }
        }

        error!("could not connect to {} after {} attempts", self.config.port, attempts);
        false
    }

    pub fn disconnect(&mut self) {
        self.transport.disconnect();
        if self.connected {
            info!("disconnected from {}", self.config.port);
        }
        self.connected = false;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Writes `command` (CRLF appended when missing) and returns the raw
    /// reply read within `timeout`, or the configured default window.
    ///
    /// An empty string is a valid result: it means nothing came back.
    pub fn send_command(&mut self, command: &str, timeout: Option<Duration>) -> Result<String, ArmError> {
        if !self.connected {
            return Err(ArmError::NotConnected);
        }

        let line = if command.ends_with("\r\n") {
            command.to_string()
        } else {
            format!("{}\r\n", command)
        };

        debug!("-> {}", command.trim_end());
        if !self.transport.send(line.as_bytes()) {
            return Err(ArmError::Transport(format!(
                "failed to send '{}'",
                command.trim_end()
            )));
        }

        sleep(self.config.settle());

        let window = timeout.unwrap_or_else(|| self.config.response_timeout());
        let raw = self.transport.receive(window);
        let reply = String::from_utf8_lossy(&raw).into_owned();
        debug!("<- {:?}", reply);
        Ok(reply)
    }

    fn flush_input(&mut self) {
        let stale = self.transport.receive(self.config.flush());
        if !stale.is_empty() {
            debug!("discarded {} stale bytes", stale.len());
        }
    }

    fn verify_connection(&mut self) -> bool {
        match self.send_command(&GCode::Status.to_line(), None) {
            Ok(reply) => !reply.trim().is_empty() && !reply.to_lowercase().contains("error"),
            Err(e) => {
                warn!("status probe failed: {}", e);
                false
            }
        }
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        if self.connected {
            self.disconnect();
        }
    }
}
