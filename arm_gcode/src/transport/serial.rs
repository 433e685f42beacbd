use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::time::{Duration, Instant};

use nix::sys::termios::{tcgetattr, tcsetattr, SetArg, SpecialCharacterIndices, Termios};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits, TTYPort};
use tracing::{debug, error, info, warn};

use super::Transport;

/// Baud rates the firmware link can run at.
pub const SUPPORTED_BAUD_RATES: [u32; 5] = [9600, 19200, 38400, 57600, 115200];

/// Quiet period granted after the first newline so multi-line replies
/// arrive in one read.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(100);

const OPEN_TIMEOUT: Duration = Duration::from_millis(500);
const READ_CHUNK: usize = 256;

pub fn is_supported_baud(baud: u32) -> bool {
    SUPPORTED_BAUD_RATES.contains(&baud)
}

/// Serial port configured 8N1, raw, without flow control.
///
/// The terminal attributes found on the device are saved before the port is
/// opened and put back on disconnect, so the port is left the way it was
/// found. `control` is a second descriptor on the same device used only for
/// that snapshot.
pub struct SerialTransport {
    port: String,
    baud_rate: u32,
    grace: Duration,
    device: Option<TTYPort>,
    control: Option<File>,
    saved: Option<Termios>,
}

impl SerialTransport {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            grace: DEFAULT_GRACE,
            device: None,
            control: None,
            saved: None,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn open_control(&self) -> std::io::Result<(File, Termios)> {
        let control = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(nix::libc::O_NOCTTY | nix::libc::O_NONBLOCK)
            .open(&self.port)?;
        let original = tcgetattr(control.as_fd())?;
        Ok((control, original))
    }

    fn open_device(&self) -> serialport::Result<TTYPort> {
        let device = serialport::new(&self.port, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(OPEN_TIMEOUT)
            .open_native()?;
        device.clear(ClearBuffer::All)?;
        Ok(device)
    }

    fn restore(&self, control: &File, original: &Termios) {
        if let Err(e) = tcsetattr(control.as_fd(), SetArg::TCSANOW, original) {
            warn!("could not restore terminal settings on {}: {}", self.port, e);
        }
    }
}

// VMIN=0, VTIME=5: a read returns whatever arrived, or nothing after 0.5 s.
fn set_read_timing(control: &File) -> nix::Result<()> {
    let mut tty = tcgetattr(control.as_fd())?;
    tty.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    tty.control_chars[SpecialCharacterIndices::VTIME as usize] = 5;
    tcsetattr(control.as_fd(), SetArg::TCSANOW, &tty)
}

impl Transport for SerialTransport {
    fn connect(&mut self) -> bool {
        if self.is_connected() {
            return true;
        }
        if !is_supported_baud(self.baud_rate) {
            error!("unsupported baud rate {} for {}", self.baud_rate, self.port);
            return false;
        }

        let (control, original) = match self.open_control() {
            Ok(opened) => opened,
            Err(e) => {
                error!("failed to open serial port {}: {}", self.port, e);
                return false;
            }
        };

        let device = match self.open_device() {
            Ok(device) => device,
            Err(e) => {
                error!("failed to configure {} at {} baud: {}", self.port, self.baud_rate, e);
                self.restore(&control, &original);
                return false;
            }
        };

        if let Err(e) = set_read_timing(&control) {
            error!("failed to set read timing on {}: {}", self.port, e);
            self.restore(&control, &original);
            return false;
        }

        info!("serial port {} open at {} baud", self.port, self.baud_rate);
        self.saved = Some(original);
        self.control = Some(control);
        self.device = Some(device);
        true
    }

    fn disconnect(&mut self) {
        let Some(device) = self.device.take() else {
            return;
        };
        if let (Some(control), Some(original)) = (self.control.take(), self.saved.take()) {
            self.restore(&control, &original);
        }
        drop(device);
        info!("serial port {} closed", self.port);
    }

    fn is_connected(&self) -> bool {
        self.device.is_some()
    }

    fn send(&mut self, bytes: &[u8]) -> bool {
        let Some(device) = self.device.as_mut() else {
            warn!("send on closed serial port {}", self.port);
            return false;
        };
        if let Err(e) = device.write_all(bytes) {
            error!("write to {} failed: {}", self.port, e);
            return false;
        }
        // flush drains the output queue
        if let Err(e) = device.flush() {
            error!("drain on {} failed: {}", self.port, e);
            return false;
        }
        true
    }

    fn receive(&mut self, timeout: Duration) -> Vec<u8> {
        let mut response = Vec::new();
        let Some(device) = self.device.as_mut() else {
            return response;
        };

        let start = Instant::now();
        let mut saw_newline = false;
        let mut buf = [0u8; READ_CHUNK];

        while start.elapsed() < timeout {
            let window = if saw_newline {
                self.grace
            } else {
                timeout.saturating_sub(start.elapsed())
            };
            if let Err(e) = device.set_timeout(window) {
                error!("cannot set read timeout on {}: {}", self.port, e);
                break;
            }

            match device.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    response.extend_from_slice(&buf[..n]);
                    if !saw_newline && response.contains(&b'\n') {
                        saw_newline = true;
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("read from {} failed: {}", self.port, e);
                    break;
                }
            }
        }

        debug!("received {} bytes from {} in {:?}", response.len(), self.port, start.elapsed());
        response
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}
