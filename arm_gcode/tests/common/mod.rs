#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arm_gcode::transport::Transport;
use arm_gcode::{DeviceLink, LinkConfig, RobotController, TrajectoryStore};
use parking_lot::Mutex;

type Responder = Box<dyn FnMut(&str) -> String + Send>;

struct Script {
    refuse_connect: bool,
    connect_attempts: usize,
    open: bool,
    sent: Vec<String>,
    pending: VecDeque<u8>,
    responder: Responder,
}

/// Transport double answering each command through a closure.
/// Clones share state, so a test keeps a handle after giving one away.
#[derive(Clone)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    /// Acknowledges every command with a bare `OK`.
    pub fn new() -> Self {
        Self::with_responder(|_| "OK\r\n".to_string())
    }

    pub fn with_responder(responder: impl FnMut(&str) -> String + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Script {
                refuse_connect: false,
                connect_attempts: 0,
                open: false,
                sent: Vec::new(),
                pending: VecDeque::new(),
                responder: Box::new(responder),
            })),
        }
    }

    pub fn refusing() -> Self {
        let transport = Self::new();
        transport.inner.lock().refuse_connect = true;
        transport
    }

    pub fn set_responder(&self, responder: impl FnMut(&str) -> String + Send + 'static) {
        self.inner.lock().responder = Box::new(responder);
    }

    /// Commands written so far, without line terminators.
    pub fn sent(&self) -> Vec<String> {
        self.inner.lock().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.inner.lock().sent.clear();
    }

    pub fn connect_attempts(&self) -> usize {
        self.inner.lock().connect_attempts
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self) -> bool {
        let mut script = self.inner.lock();
        script.connect_attempts += 1;
        if script.refuse_connect {
            return false;
        }
        script.open = true;
        true
    }

    fn disconnect(&mut self) {
        self.inner.lock().open = false;
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().open
    }

    fn send(&mut self, bytes: &[u8]) -> bool {
        let mut script = self.inner.lock();
        if !script.open {
            return false;
        }
        let command = String::from_utf8_lossy(bytes).trim_end().to_string();
        let reply = (script.responder)(&command);
        script.pending.extend(reply.into_bytes());
        script.sent.push(command);
        true
    }

    fn receive(&mut self, _timeout: Duration) -> Vec<u8> {
        self.inner.lock().pending.drain(..).collect()
    }
}

pub fn fast_config() -> LinkConfig {
    LinkConfig::new("scripted".to_string(), 115200).without_delays()
}

pub fn controller_with(transport: &ScriptedTransport, dir: &Path) -> RobotController {
    let link = DeviceLink::new(Box::new(transport.clone()), fast_config());
    let store = TrajectoryStore::open(dir).expect("store");
    RobotController::new(link, store)
}

/// Connected controller with motors enabled; the wire log is cleared.
pub fn ready_controller(transport: &ScriptedTransport, dir: &Path) -> RobotController {
    let mut controller = controller_with(transport, dir);
    assert!(controller.connect(1), "scripted connect failed");
    controller.set_motors(true).expect("enable motors");
    transport.clear_sent();
    controller
}

/// Typical firmware reply for a command.
pub fn firmware_reply(command: &str) -> String {
    match command.split_whitespace().next() {
        Some("M114") => "INFO: CURRENT POSITION: [X:0.00 Y:0.00 Z:0.00 E:0.00]\r\nOK\r\n".to_string(),
        Some("G28") => "INFO: HOMING COMPLETE\r\nOK\r\n".to_string(),
        Some("G90") => "INFO: ABSOLUTE MODE ON\r\nOK\r\n".to_string(),
        Some("G91") => "INFO: RELATIVE MODE ON\r\nOK\r\n".to_string(),
        Some("M17") => "INFO: MOTORS ENABLED\r\nOK\r\n".to_string(),
        Some("M18") => "INFO: MOTORS DISABLED\r\nOK\r\n".to_string(),
        Some("M3") => "INFO: GRIPPER ON\r\nOK\r\n".to_string(),
        Some("M5") => "INFO: GRIPPER OFF\r\nOK\r\n".to_string(),
        Some("G1") => "OK\r\n".to_string(),
        _ => "ERROR: COMMAND NOT RECOGNIZED\r\n".to_string(),
    }
}
