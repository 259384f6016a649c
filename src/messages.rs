// Message types emitted by the supervisor

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::drive::FaultMask;
use crate::supervisor::DriveState;

/// Per-cycle status while the drive is running
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    pub cycle: u64,
    /// Raw torque counts, absent when this cycle's read failed
    pub raw_torque: Option<i32>,
    /// Physical torque derived from `raw_torque`
    pub torque: Option<f64>,
    /// Last setpoint the drive acknowledged, absent while a rejected write is pending retry
    pub setpoint: Option<i32>,
    /// Absent when this cycle's fault read failed
    pub fault_mask: Option<FaultMask>,
    /// Time since the drive entered `Running`
    pub elapsed: Duration,
}

// Everything an observer can see, tagged for JSON consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SupervisorEvent {
    Transition { from: DriveState, to: DriveState },
    Status(StatusEvent),
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    CompletedNormally,
    StoppedByUser,
    Faulted(FaultMask),
    ConnectionFailed(String),
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::CompletedNormally | Self::StoppedByUser)
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CompletedNormally => write!(f, "completed normally"),
            Self::StoppedByUser => write!(f, "stopped by user"),
            Self::Faulted(mask) => write!(f, "faulted: {}", mask),
            Self::ConnectionFailed(reason) => write!(f, "connection failed: {}", reason),
        }
    }
}
