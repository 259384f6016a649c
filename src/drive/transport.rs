// Collaborator seams: the parameter bus and the configuration-mode trigger
//
// The bus protocol itself is provided by whoever implements these traits.
// Calls are synchronous and may block; implementations are not assumed to be
// reentrant, so a bus value is only ever driven from one thread.

/// Error types for bus and side-channel collaborators
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Cannot open {endpoint}: {reason}")]
    Open { endpoint: String, reason: String },

    #[error("Read of parameter {param} on axis {axis} failed: {reason}")]
    Read { axis: u8, param: u16, reason: String },

    #[error("Write of {value} to parameter {param} on axis {axis} failed: {reason}")]
    Write {
        axis: u8,
        param: u16,
        value: i32,
        reason: String,
    },

    #[error("Bus already closed")]
    Closed,

    #[error("Closing the bus failed: {reason}")]
    Close { reason: String },

    #[error("Configuration mode trigger failed for {vendor_id:04x}:{product_id:04x}: {reason}")]
    ConfigMode {
        vendor_id: u16,
        product_id: u16,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Opens sessions to a drive
pub trait BusConnector {
    type Bus: DriveBus;

    /// Open a session; the returned bus value is the session handle
    fn open(&mut self, endpoint: &str) -> Result<Self::Bus>;
}

/// One open parameter-bus session
pub trait DriveBus {
    fn read_parameter(&mut self, axis: u8, param: u16) -> Result<i32>;

    fn write_parameter(&mut self, axis: u8, param: u16, value: i32) -> Result<()>;

    /// Release the session. Further calls return `TransportError::Closed`.
    fn close(&mut self) -> Result<()>;
}

/// Side channel that switches drive firmware into the mode where the bus
/// becomes usable
pub trait ConfigModeTrigger {
    fn trigger_config_mode(&mut self, vendor_id: u16, product_id: u16) -> Result<()>;
}
