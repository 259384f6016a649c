// Supervisor lifecycle phases and the legal transitions between them

use std::fmt;

use serde::Serialize;

/// Lifecycle phase of a supervised drive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveState {
    Disconnected,
    Connecting,
    FaultCheck,
    FaultClearing,
    Enabling,
    ModeSelecting,
    Running,
    EmergencyStopped,
    Faulted,
    Disabling,
}

impl DriveState {
    /// Whether the supervisor may move from `self` to `next`.
    ///
    /// Bring-up phases abort through `Disabling` (or `Faulted` for a fault
    /// that survives clearing) so cleanup always runs once a handle exists.
    pub const fn can_transition_to(self, next: DriveState) -> bool {
        use DriveState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, FaultCheck)
                | (Connecting, Disconnected)
                | (FaultCheck, FaultClearing)
                | (FaultCheck, Enabling)
                | (FaultClearing, Enabling)
                | (FaultClearing, Faulted)
                | (Enabling, ModeSelecting)
                | (ModeSelecting, Running)
                | (Running, EmergencyStopped)
                | (Running, Faulted)
                | (Running, Disabling)
                | (FaultCheck | FaultClearing | Enabling | ModeSelecting, Disabling)
                | (EmergencyStopped | Faulted | Disabling, Disconnected)
        )
    }

    /// States in which cleanup is the only remaining step.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            DriveState::EmergencyStopped | DriveState::Faulted | DriveState::Disabling
        )
    }

    /// Whether a bus handle is held in this state.
    pub const fn holds_handle(self) -> bool {
        !matches!(self, DriveState::Disconnected | DriveState::Connecting)
    }
}

impl fmt::Display for DriveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriveState::Disconnected => "Disconnected",
            DriveState::Connecting => "Connecting",
            DriveState::FaultCheck => "FaultCheck",
            DriveState::FaultClearing => "FaultClearing",
            DriveState::Enabling => "Enabling",
            DriveState::ModeSelecting => "ModeSelecting",
            DriveState::Running => "Running",
            DriveState::EmergencyStopped => "EmergencyStopped",
            DriveState::Faulted => "Faulted",
            DriveState::Disabling => "Disabling",
        };
        f.write_str(name)
    }
}
