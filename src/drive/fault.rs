// Drive fault mask decoding
//
// The drive reports faults as a 32-bit mask. Known bits decode to a `Fault`,
// anything else is kept as residual unknown bits.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Fault conditions with a known bit position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    FollowingError,
    OverCurrent,
    /// Communication watchdog expired on the drive side
    Communication,
    Encoder,
    OverTemperature,
    UnderVoltage,
    OverVoltage,
    ProgramOrMemory,
    Hardware,
    OverVelocity,
    Initialization,
    Motion,
    Range,
    PowerStageForcedOff,
    HostCommunication,
    Configuration,
}

impl Fault {
    pub const ALL: [Fault; 16] = [
        Fault::FollowingError,
        Fault::OverCurrent,
        Fault::Communication,
        Fault::Encoder,
        Fault::OverTemperature,
        Fault::UnderVoltage,
        Fault::OverVoltage,
        Fault::ProgramOrMemory,
        Fault::Hardware,
        Fault::OverVelocity,
        Fault::Initialization,
        Fault::Motion,
        Fault::Range,
        Fault::PowerStageForcedOff,
        Fault::HostCommunication,
        Fault::Configuration,
    ];

    pub const fn bit(self) -> u32 {
        match self {
            Fault::FollowingError => 1 << 1,
            Fault::OverCurrent => 1 << 2,
            Fault::Communication => 1 << 3,
            Fault::Encoder => 1 << 4,
            Fault::OverTemperature => 1 << 5,
            Fault::UnderVoltage => 1 << 6,
            Fault::OverVoltage => 1 << 7,
            Fault::ProgramOrMemory => 1 << 8,
            Fault::Hardware => 1 << 9,
            Fault::OverVelocity => 1 << 10,
            Fault::Initialization => 1 << 11,
            Fault::Motion => 1 << 12,
            Fault::Range => 1 << 13,
            Fault::PowerStageForcedOff => 1 << 14,
            Fault::HostCommunication => 1 << 15,
            Fault::Configuration => 1 << 16,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Fault::FollowingError => "following error",
            Fault::OverCurrent => "over current",
            Fault::Communication => "communication watchdog timeout",
            Fault::Encoder => "encoder",
            Fault::OverTemperature => "over temperature",
            Fault::UnderVoltage => "under voltage",
            Fault::OverVoltage => "over voltage",
            Fault::ProgramOrMemory => "program or memory",
            Fault::Hardware => "hardware",
            Fault::OverVelocity => "over velocity",
            Fault::Initialization => "initialization",
            Fault::Motion => "motion",
            Fault::Range => "range",
            Fault::PowerStageForcedOff => "power stage forced off",
            Fault::HostCommunication => "host communication",
            Fault::Configuration => "configuration",
        }
    }
}

const KNOWN_BITS: u32 = {
    let mut bits = 0;
    let mut i = 0;
    while i < Fault::ALL.len() {
        bits |= Fault::ALL[i].bit();
        i += 1;
    }
    bits
};

/// Raw fault mask as read from the fault-status parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaultMask(u32);

impl FaultMask {
    /// Mask reported when the supervisor itself detects a watchdog lapse
    pub const WATCHDOG_TIMEOUT: FaultMask = FaultMask(Fault::Communication.bit());

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Reinterpret a raw parameter value as a mask
    pub const fn from_param(value: i32) -> Self {
        Self(value as u32)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn is_clear(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, fault: Fault) -> bool {
        self.0 & fault.bit() != 0
    }

    pub fn is_watchdog_timeout(self) -> bool {
        self.contains(Fault::Communication)
    }

    /// Known faults present in the mask, lowest bit first
    pub fn faults(self) -> Vec<Fault> {
        Fault::ALL.into_iter().filter(|f| self.contains(*f)).collect()
    }

    /// Bits that don't map to a known fault
    pub const fn unknown_bits(self) -> u32 {
        self.0 & !KNOWN_BITS
    }
}

impl From<Fault> for FaultMask {
    fn from(fault: Fault) -> Self {
        Self(fault.bit())
    }
}

impl fmt::Display for FaultMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:06X}", self.0)?;
        if self.is_clear() {
            return Ok(());
        }

        let mut parts: Vec<String> = self.faults().iter().map(|f| f.name().to_string()).collect();
        if self.unknown_bits() != 0 {
            parts.push(format!("unknown 0x{:X}", self.unknown_bits()));
        }
        write!(f, " [{}]", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_mask() {
        let mask = FaultMask::new(0);
        assert!(mask.is_clear());
        assert!(mask.faults().is_empty());
        assert_eq!(mask.to_string(), "0x000000");
    }

    #[test]
    fn test_known_and_unknown_bits() {
        let mask = FaultMask::new(0x481001);
        assert!(!mask.is_clear());
        assert_eq!(mask.faults(), vec![Fault::Motion]);
        assert_eq!(mask.unknown_bits(), 0x480001);
        assert_eq!(mask.to_string(), "0x481001 [motion, unknown 0x480001]");
    }

    #[test]
    fn test_watchdog_mask() {
        assert!(FaultMask::WATCHDOG_TIMEOUT.is_watchdog_timeout());
        assert_eq!(FaultMask::WATCHDOG_TIMEOUT.faults(), vec![Fault::Communication]);
        assert_eq!(FaultMask::from(Fault::Communication), FaultMask::WATCHDOG_TIMEOUT);
    }

    #[test]
    fn test_negative_param_value_keeps_all_bits() {
        let mask = FaultMask::from_param(-1);
        assert_eq!(mask.raw(), u32::MAX);
        assert_eq!(mask.faults().len(), Fault::ALL.len());
    }
}
