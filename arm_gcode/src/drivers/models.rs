use serde::{Deserialize, Serialize};

#[derive(Copy, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateMode {
    Absolute,
    Relative,
}
impl Default for CoordinateMode {
    fn default() -> Self {
        Self::Absolute
    }
}

#[derive(Copy, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationMode {
    Manual,
    Automatic,
}
impl Default for OperationMode {
    fn default() -> Self {
        Self::Manual
    }
}

/// Whether a physical command is in flight.
#[derive(Copy, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    Stopped,
    Running,
}
impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Stopped
    }
}
