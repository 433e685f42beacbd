// Library exports for the arm firmware simulator

pub mod firmware;

pub use firmware::FirmwareState;

use std::sync::Arc;
use std::time::Duration;

use arm_gcode::transport::Transport;
use parking_lot::Mutex;
use tracing::debug;

#[derive(Default)]
struct SimInner {
    firmware: FirmwareState,
    open: bool,
    refuse_connect: bool,
    silent: bool,
    fail_next: Option<String>,
    received: Vec<String>,
    pending: Vec<u8>,
}

/// In-process firmware reachable through [`Transport`].
///
/// Clones share the same board, so a test can hand one clone to a
/// `DeviceLink` and keep another to inspect or sabotage the firmware.
#[derive(Clone, Default)]
pub struct SimFirmware {
    inner: Arc<Mutex<SimInner>>,
}

impl SimFirmware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `connect` fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.lock().refuse_connect = refuse;
    }

    /// Stops answering anything until switched back.
    pub fn go_silent(&self, silent: bool) {
        self.inner.lock().silent = silent;
    }

    /// Answers the next command with `ERROR: <message>` instead of running it.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.inner.lock().fail_next = Some(message.into());
    }

    /// Every line received so far, terminators stripped.
    pub fn received(&self) -> Vec<String> {
        self.inner.lock().received.clone()
    }

    pub fn state(&self) -> FirmwareState {
        self.inner.lock().firmware.clone()
    }
}

impl Transport for SimFirmware {
    fn connect(&mut self) -> bool {
        let mut inner = self.inner.lock();
        if inner.refuse_connect {
            return false;
        }
        // opening the port resets the board
        inner.firmware = FirmwareState::default();
        inner.open = true;
        inner.pending.extend_from_slice(b"start\r\n");
        true
    }

    fn disconnect(&mut self) {
        let mut inner = self.inner.lock();
        inner.open = false;
        inner.pending.clear();
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().open
    }

    fn send(&mut self, bytes: &[u8]) -> bool {
        let mut inner = self.inner.lock();
        if !inner.open {
            return false;
        }
        let text = String::from_utf8_lossy(bytes).into_owned();
        for line in text.split(['\r', '\n']).filter(|l| !l.trim().is_empty()) {
            debug!("sim <- {}", line);
            inner.received.push(line.to_string());
            if inner.silent {
                continue;
            }
            let reply = match inner.fail_next.take() {
                Some(message) => format!("ERROR: {}\r\n", message),
                None => inner.firmware.respond(line),
            };
            inner.pending.extend_from_slice(reply.as_bytes());
        }
        true
    }

    fn receive(&mut self, _timeout: Duration) -> Vec<u8> {
        std::mem::take(&mut self.inner.lock().pending)
    }
}
