// Timing defaults, zenoh topics, and the session config file
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::drive::{DEFAULT_AXIS, ParamMap};

// Control loop period
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

// Longest gap between successful bus operations before the session faults
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_millis(500);

// Upper bound for the tick and watchdog intervals
pub const MAX_INTERVAL: Duration = Duration::from_secs(60);

// Cycles run when no budget is configured (100 ms ticks -> ~8 minutes)
pub const DEFAULT_RUN_CYCLES: u64 = 5000;

// Example calibration for the torque-adaptive policy (raw counts / velocity units)
pub const ADAPTIVE_LOW_THRESHOLD: i32 = 10_000;
pub const ADAPTIVE_HIGH_SETPOINT: i32 = 2000;
pub const ADAPTIVE_LOW_SETPOINT: i32 = 0;

// Zenoh topics
pub const TOPIC_CMD_STOP: &str = "ioni/cmd/stop"; // emergency stop requests
pub const TOPIC_STATUS: &str = "ioni/state/status"; // supervisor events
pub const TOPIC_OUTCOME: &str = "ioni/state/outcome"; // terminal outcome

// Endpoint name used by the bench command when none is given
pub const SIM_ENDPOINT: &str = "sim://ioni";

/// How the supervisor picks the next setpoint each cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlPolicy {
    /// Constant setpoint commanded once on entering `Running`
    FixedSetpoint(i32),
    /// Run at `high_setpoint` while torque stays below `low_threshold`,
    /// back off to `low_setpoint` otherwise
    TorqueAdaptive {
        low_threshold: i32,
        high_setpoint: i32,
        low_setpoint: i32,
    },
}

impl Default for ControlPolicy {
    fn default() -> Self {
        ControlPolicy::TorqueAdaptive {
            low_threshold: ADAPTIVE_LOW_THRESHOLD,
            high_setpoint: ADAPTIVE_HIGH_SETPOINT,
            low_setpoint: ADAPTIVE_LOW_SETPOINT,
        }
    }
}

impl ControlPolicy {
    /// Setpoint commanded on entering `Running`
    pub fn initial_setpoint(&self) -> i32 {
        match *self {
            ControlPolicy::FixedSetpoint(value) => value,
            // no torque reading yet, start from standstill
            ControlPolicy::TorqueAdaptive { .. } => 0,
        }
    }

    /// Setpoint for this cycle given the (averaged) raw torque, if any
    pub fn target(&self, torque: Option<f64>) -> Option<i32> {
        match *self {
            ControlPolicy::FixedSetpoint(value) => Some(value),
            ControlPolicy::TorqueAdaptive {
                low_threshold,
                high_setpoint,
                low_setpoint,
            } => torque.map(|t| {
                if t < low_threshold as f64 {
                    high_setpoint
                } else {
                    low_setpoint
                }
            }),
        }
    }
}

/// When a normal run ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunBudget {
    Cycles(u64),
    #[serde(rename = "duration_ms", with = "millis")]
    Duration(Duration),
}

impl Default for RunBudget {
    fn default() -> Self {
        RunBudget::Cycles(DEFAULT_RUN_CYCLES)
    }
}

impl RunBudget {
    pub fn is_exhausted(&self, completed_cycles: u64, elapsed: Duration) -> bool {
        match *self {
            RunBudget::Cycles(limit) => completed_cycles >= limit,
            RunBudget::Duration(limit) => elapsed >= limit,
        }
    }

    fn is_empty(&self) -> bool {
        match *self {
            RunBudget::Cycles(limit) => limit == 0,
            RunBudget::Duration(limit) => limit.is_zero(),
        }
    }
}

/// Error types for loading a session config
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Everything needed to run one supervised session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub axis: u8,
    pub params: ParamMap,
    #[serde(rename = "tick_interval_ms", with = "millis")]
    pub tick_interval: Duration,
    #[serde(rename = "watchdog_interval_ms", with = "millis")]
    pub watchdog_interval: Duration,
    pub run_budget: RunBudget,
    pub policy: ControlPolicy,
    /// Number of torque readings averaged by the adaptive policy
    pub torque_average_window: usize,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            axis: DEFAULT_AXIS,
            params: ParamMap::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
            run_budget: RunBudget::default(),
            policy: ControlPolicy::default(),
            torque_average_window: 1,
        }
    }
}

impl DriveConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: DriveConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Invalid("tick interval must be non-zero".into()));
        }
        if self.tick_interval > MAX_INTERVAL || self.watchdog_interval > MAX_INTERVAL {
            return Err(ConfigError::Invalid(format!(
                "tick and watchdog intervals must not exceed {:?}",
                MAX_INTERVAL
            )));
        }
        if self.watchdog_interval <= self.tick_interval {
            return Err(ConfigError::Invalid(format!(
                "watchdog interval ({:?}) must be longer than the tick interval ({:?})",
                self.watchdog_interval, self.tick_interval
            )));
        }
        if self.torque_average_window == 0 {
            return Err(ConfigError::Invalid(
                "torque average window must hold at least one sample".into(),
            ));
        }
        if self.run_budget.is_empty() {
            return Err(ConfigError::Invalid("run budget must be non-zero".into()));
        }
        Ok(())
    }
}

// Durations as integer milliseconds in config files
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
