// Drive supervisor: lifecycle state machine over one bus session
//
// Provides:
// - The supervisor itself (bring-up, control loop, shutdown)
// - Lifecycle states and their legal transitions
// - The externally settable stop signal
// - Event sinks for status observers

mod session;
mod state;


use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::drive::{FaultMask, TransportError};
use crate::messages::SupervisorEvent;

pub use session::{DriveSupervisor, SupervisorOptions};
pub use state::DriveState;

/// Error types for a supervised session
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Cannot connect to drive on {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: TransportError,
    },

    #[error("Communication with drive failed: {0}")]
    Communication(#[source] TransportError),

    #[error("Drive fault {0} persists after clearing")]
    UnrecoverableFault(FaultMask),

    #[error("Drive rejected {action}: {source}")]
    DriveRejected {
        action: &'static str,
        #[source]
        source: TransportError,
    },
}

/// Emergency stop request shared between the supervisor and whatever watches
/// for user input
///
/// The supervisor polls it once per control cycle.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Re-arm before reusing the signal for another session
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Receives transitions and status events as they happen
pub trait EventSink {
    fn emit(&mut self, event: SupervisorEvent);
}

impl EventSink for Vec<SupervisorEvent> {
    fn emit(&mut self, event: SupervisorEvent) {
        self.push(event);
    }
}

impl EventSink for tokio::sync::mpsc::UnboundedSender<SupervisorEvent> {
    fn emit(&mut self, event: SupervisorEvent) {
        // receiver gone means nobody is listening any more
        let _ = self.send(event);
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn emit(&mut self, event: SupervisorEvent) {
        (**self).emit(event);
    }
}
