// Drive-facing building blocks for the supervisor
//
// Provides:
// - Parameter addresses and control bit flags
// - Fault mask decoding
// - Raw torque -> physical torque conversion
// - Collaborator traits for the parameter bus and configuration-mode trigger
// - An in-memory simulated drive

pub mod fault;
pub mod params;
pub mod sim;
pub mod torque;
pub mod transport;

pub use fault::{Fault, FaultMask};
pub use params::{ControlBits, ControlMode, DEFAULT_AXIS, ParamMap};
pub use sim::{BusOp, SimulatedDrive};
pub use torque::{COUNTS_PER_AMP, TorqueSample, TorqueWindow, to_physical_torque};
pub use transport::{BusConnector, ConfigModeTrigger, DriveBus, TransportError};
