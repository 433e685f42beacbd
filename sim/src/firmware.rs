//! Reply logic of the arm firmware, without any I/O.

/// What the simulated board currently believes.
#[derive(Debug, Clone, PartialEq)]
pub struct FirmwareState {
    pub position: [f64; 3],
    pub absolute: bool,
    pub motors_enabled: bool,
    pub gripper_closed: bool,
}

impl Default for FirmwareState {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            absolute: true,
            motors_enabled: false,
            gripper_closed: false,
        }
    }
}

const UNKNOWN: &str = "ERROR: COMMAND NOT RECOGNIZED\r\n";

impl FirmwareState {
    /// Applies one received line and returns the full reply text.
    pub fn respond(&mut self, line: &str) -> String {
        let line = line.trim();
        let mut words = line.split_whitespace();
        let Some(code) = words.next() else {
            return String::new();
        };

        match code {
            "G1" | "G0" => {
                if !self.motors_enabled {
                    return "ERROR: MOTORS DISABLED\r\n".to_string();
                }
                let mut target = if self.absolute { self.position } else { [0.0; 3] };
                for word in words {
                    let mut chars = word.chars();
                    let axis = chars.next();
                    let Ok(value) = chars.as_str().parse::<f64>() else {
                        continue;
                    };
                    match axis {
                        Some('X') => target[0] = value,
                        Some('Y') => target[1] = value,
                        Some('Z') => target[2] = value,
                        _ => {}
                    }
                }
                if !self.absolute {
                    for (axis, delta) in target.iter_mut().enumerate() {
                        *delta += self.position[axis];
                    }
                }
                self.position = target;
                format!(
                    "INFO: LINEAR MOVE: [X:{:.2} Y:{:.2} Z:{:.2}]\r\nOK\r\n",
                    target[0], target[1], target[2]
                )
            }
            "G28" => {
                if !self.motors_enabled {
                    return "ERROR: MOTORS DISABLED\r\n".to_string();
                }
                self.position = [0.0; 3];
                "INFO: HOMING COMPLETE\r\nOK\r\n".to_string()
            }
            "G90" => {
                self.absolute = true;
                "INFO: ABSOLUTE MODE ON\r\nOK\r\n".to_string()
            }
            "G91" => {
                self.absolute = false;
                "INFO: RELATIVE MODE ON\r\nOK\r\n".to_string()
            }
            "M3" => {
                self.gripper_closed = true;
                "INFO: GRIPPER ON\r\nOK\r\n".to_string()
            }
            "M5" => {
                self.gripper_closed = false;
                "INFO: GRIPPER OFF\r\nOK\r\n".to_string()
            }
            "M17" => {
                self.motors_enabled = true;
                "INFO: MOTORS ENABLED\r\nOK\r\n".to_string()
            }
            "M18" => {
                self.motors_enabled = false;
                "INFO: MOTORS DISABLED\r\nOK\r\n".to_string()
            }
            "M114" => format!(
                "INFO: CURRENT POSITION: [X:{:.2} Y:{:.2} Z:{:.2} E:0.00]\r\nOK\r\n",
                self.position[0], self.position[1], self.position[2]
            ),
            _ => UNKNOWN.to_string(),
        }
    }
}
