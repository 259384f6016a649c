// Parameter addresses and command bit flags for IONI-class servo drives
//
// The supervisor only cares about six semantic parameters. Their numeric
// addresses belong to the drive firmware, so they live in a ParamMap that
// can be overridden from the config file.

use serde::{Deserialize, Serialize};

/// Axis used by single-drive setups
pub const DEFAULT_AXIS: u8 = 1;

/// Granite Devices USB vendor id (configuration-mode side channel)
pub const GD_USB_VENDOR_ID: u16 = 0x16d0;
/// Simucube 1 product id (configuration-mode side channel)
pub const SIMUCUBE_PRODUCT_ID: u16 = 0x0d5a;

/// Numeric addresses of the parameters the supervisor reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamMap {
    pub fault_status: u16,
    pub control_mode: u16,
    pub control_bits: u16,
    pub absolute_setpoint: u16,
    pub actual_torque: u16,
    pub torque_constant: u16,
}

impl Default for ParamMap {
    fn default() -> Self {
        // SimpleMotion V2 addresses as used by IONI firmware
        Self {
            fault_status: 552,
            control_mode: 559,
            control_bits: 2533,
            absolute_setpoint: 551,
            actual_torque: 901,
            torque_constant: 420,
        }
    }
}

impl ParamMap {
    /// Human-readable role of an address, for log lines
    pub fn describe(&self, param: u16) -> &'static str {
        match param {
            p if p == self.fault_status => "fault-status",
            p if p == self.control_mode => "control-mode",
            p if p == self.control_bits => "control-bits",
            p if p == self.absolute_setpoint => "absolute-setpoint",
            p if p == self.actual_torque => "actual-torque",
            p if p == self.torque_constant => "torque-constant",
            _ => "unknown",
        }
    }
}

/// Control modes selectable through the control-mode parameter
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    None = 0,
    Position = 1,
    Velocity = 2,
    Torque = 3,
}

impl ControlMode {
    pub fn raw(self) -> i32 {
        self as i32
    }
}

/// Value written to the control-bits parameter
///
/// Built up through named operations; writing `ControlBits::empty()` disables
/// the drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlBits(i32);

impl ControlBits {
    const ENABLE: i32 = 1 << 0;
    const CLEAR_FAULTS: i32 = 1 << 1;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn with_enable(self) -> Self {
        Self(self.0 | Self::ENABLE)
    }

    pub const fn with_clear_faults(self) -> Self {
        Self(self.0 | Self::CLEAR_FAULTS)
    }

    pub const fn enables(self) -> bool {
        self.0 & Self::ENABLE != 0
    }

    pub const fn clears_faults(self) -> bool {
        self.0 & Self::CLEAR_FAULTS != 0
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_bits_compose() {
        assert_eq!(ControlBits::empty().raw(), 0);
        assert_eq!(ControlBits::empty().with_enable().raw(), 1);
        assert_eq!(ControlBits::empty().with_clear_faults().raw(), 2);

        let both = ControlBits::empty().with_enable().with_clear_faults();
        assert!(both.enables());
        assert!(both.clears_faults());
        assert!(!ControlBits::empty().enables());
    }

    #[test]
    fn test_param_map_describe() {
        let params = ParamMap::default();
        assert_eq!(params.describe(params.fault_status), "fault-status");
        assert_eq!(params.describe(params.absolute_setpoint), "absolute-setpoint");
        assert_eq!(params.describe(1), "unknown");
    }

    #[test]
    fn test_param_map_partial_override() {
        let params: ParamMap = serde_json::from_str(r#"{"actual_torque": 77}"#).unwrap();
        assert_eq!(params.actual_torque, 77);
        assert_eq!(params.fault_status, ParamMap::default().fault_status);
    }
}
