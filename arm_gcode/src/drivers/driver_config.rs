use serde::{Deserialize, Serialize};
use std::time::Duration;

/// ```rust,ignore
/// // Open the arm on its usual USB adapter
/// let config = LinkConfig::new("/dev/ttyUSB0".to_string(), 115200);
///
/// // Validate the configuration
/// if let Err(e) = config.validate() {
///     println!("Configuration error: {}", e);
///     return;
/// }
///
/// let transport = SerialTransport::new(config.port.clone(), config.baud_rate)
///     .with_grace(config.grace());
/// let mut link = DeviceLink::new(Box::new(transport), config);
/// if link.connect(3) {
///     let reply = link.send_command("M114", None)?;
///     println!("{}", reply);
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LinkConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Time the board needs after the port opens (most boards reset on open).
    pub stabilization_ms: u64,
    /// Default read window for a command reply.
    pub response_timeout_ms: u64,
    /// Pause between writing a command and starting to read.
    pub settle_ms: u64,
    /// Read window used to discard boot chatter after connecting.
    pub flush_ms: u64,
    pub retry_backoff_ms: u64,
    pub grace_ms: u64,
}

impl LinkConfig {
    pub fn new(port: String, baud_rate: u32) -> Self {
        Self {
            port,
            baud_rate,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.port.is_empty() {
            return Err("Serial port cannot be empty.".to_string());
        }
        #[cfg(feature = "serial")]
        if !crate::transport::SUPPORTED_BAUD_RATES.contains(&self.baud_rate) {
            return Err(format!("Unsupported baud rate {}.", self.baud_rate));
        }
        if self.response_timeout_ms == 0 {
            return Err("Response timeout must be greater than 0.".to_string());
        }
        Ok(())
    }

    pub fn stabilization(&self) -> Duration {
        Duration::from_millis(self.stabilization_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn flush(&self) -> Duration {
        Duration::from_millis(self.flush_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    /// Same windows with every wait shrunk to zero except the reply timeout.
    /// Meant for in-process firmware that answers immediately.
    pub fn without_delays(mut self) -> Self {
        self.stabilization_ms = 0;
        self.settle_ms = 0;
        self.flush_ms = 0;
        self.retry_backoff_ms = 0;
        self
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115200,
            stabilization_ms: 3000,
            response_timeout_ms: 2000,
            settle_ms: 200,
            flush_ms: 100,
            retry_backoff_ms: 1000,
            grace_ms: 100,
        }
    }
}
