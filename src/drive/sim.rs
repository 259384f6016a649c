// In-memory drive for bench runs and tests
//
// Behaves like a single-axis drive behind the parameter bus: a fault mask
// that clears on request, enable/disable through the control bits, and a
// torque reading that either follows a script or a simple load model.
// Every bus operation is recorded so callers can check ordering afterwards.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::debug;

use super::params::{ControlBits, GD_USB_VENDOR_ID, ParamMap, SIMUCUBE_PRODUCT_ID};
use super::transport::{BusConnector, ConfigModeTrigger, DriveBus, Result, TransportError};

/// One recorded interaction with the simulated drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOp {
    ConfigMode,
    Open,
    Read { axis: u8, param: u16 },
    Write { axis: u8, param: u16, value: i32 },
    Close,
}

/// Failure window: the first `after` calls succeed, the next `count` fail
#[derive(Debug, Clone, Copy)]
struct FailWindow {
    after: usize,
    count: usize,
}

impl FailWindow {
    fn hits(&self, call_index: usize) -> bool {
        call_index >= self.after && call_index - self.after < self.count
    }
}

#[derive(Debug)]
struct DriveModel {
    params: ParamMap,
    registers: HashMap<u16, i32>,
    fault_mask: u32,
    fault_mask_after_clear: u32,
    scheduled_fault: Option<(usize, u32)>,
    torque_script: VecDeque<i32>,
    load_factor: i32,
    torque_constant: Option<i32>,
    failing_reads: HashMap<u16, FailWindow>,
    failing_writes: HashMap<u16, FailWindow>,
    read_delays: HashMap<u16, Duration>,
    fail_close: bool,
    read_calls: HashMap<u16, usize>,
    write_calls: HashMap<u16, usize>,
    refuse_open: bool,
    require_config_mode: bool,
    config_mode: bool,
    open: bool,
    log: Vec<BusOp>,
}

impl DriveModel {
    fn new(params: ParamMap) -> Self {
        Self {
            params,
            registers: HashMap::new(),
            fault_mask: 0,
            fault_mask_after_clear: 0,
            scheduled_fault: None,
            torque_script: VecDeque::new(),
            load_factor: 0,
            torque_constant: None,
            failing_reads: HashMap::new(),
            failing_writes: HashMap::new(),
            read_delays: HashMap::new(),
            fail_close: false,
            read_calls: HashMap::new(),
            write_calls: HashMap::new(),
            refuse_open: false,
            require_config_mode: false,
            config_mode: false,
            open: false,
            log: Vec::new(),
        }
    }

    fn register(&self, param: u16) -> i32 {
        self.registers.get(&param).copied().unwrap_or(0)
    }

    fn read(&mut self, axis: u8, param: u16) -> Result<i32> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        self.log.push(BusOp::Read { axis, param });

        let calls = self.read_calls.entry(param).or_insert(0);
        let index = *calls;
        *calls += 1;

        if self.failing_reads.get(&param).is_some_and(|w| w.hits(index)) {
            return Err(TransportError::Read {
                axis,
                param,
                reason: "no response".to_string(),
            });
        }

        let params = self.params;
        if param == params.fault_status {
            if let Some((at, mask)) = self.scheduled_fault {
                if index >= at {
                    self.fault_mask |= mask;
                    self.scheduled_fault = None;
                }
            }
            Ok(self.fault_mask as i32)
        } else if param == params.actual_torque {
            let torque = match self.torque_script.pop_front() {
                Some(t) => t,
                None => self
                    .register(params.absolute_setpoint)
                    .saturating_mul(self.load_factor),
            };
            Ok(torque)
        } else if param == params.torque_constant {
            self.torque_constant.ok_or_else(|| TransportError::Read {
                axis,
                param,
                reason: "parameter not supported".to_string(),
            })
        } else {
            Ok(self.register(param))
        }
    }

    fn write(&mut self, axis: u8, param: u16, value: i32) -> Result<()> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        self.log.push(BusOp::Write { axis, param, value });

        let calls = self.write_calls.entry(param).or_insert(0);
        let index = *calls;
        *calls += 1;

        if self.failing_writes.get(&param).is_some_and(|w| w.hits(index)) {
            return Err(TransportError::Write {
                axis,
                param,
                value,
                reason: "drive refused".to_string(),
            });
        }

        if param == self.params.control_bits && ControlBits::from_raw(value).clears_faults() {
            debug!("Simulated drive clearing faults 0x{:X}", self.fault_mask);
            self.fault_mask = self.fault_mask_after_clear;
        }
        self.registers.insert(param, value);
        Ok(())
    }
}

/// Simulated drive, shared between the connector and every bus it opens
#[derive(Debug, Clone)]
pub struct SimulatedDrive {
    model: Arc<Mutex<DriveModel>>,
}

impl Default for SimulatedDrive {
    fn default() -> Self {
        Self::new(ParamMap::default())
    }
}

impl SimulatedDrive {
    pub fn new(params: ParamMap) -> Self {
        Self {
            model: Arc::new(Mutex::new(DriveModel::new(params))),
        }
    }

    fn model(&self) -> MutexGuard<'_, DriveModel> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // === Scenario setup ===

    /// Fault mask present at power-up; cleared by a clear-faults request
    pub fn with_faults(self, mask: u32) -> Self {
        self.model().fault_mask = mask;
        self
    }

    /// Mask left behind after a clear-faults request (0 = clears fully)
    pub fn with_faults_after_clear(self, mask: u32) -> Self {
        self.model().fault_mask_after_clear = mask;
        self
    }

    /// Raise `mask` starting from the `at`-th fault-status read (0-based)
    pub fn with_fault_at_read(self, at: usize, mask: u32) -> Self {
        self.model().scheduled_fault = Some((at, mask));
        self
    }

    /// Torque readings returned in order before the load model takes over
    pub fn with_torque_script(self, readings: impl IntoIterator<Item = i32>) -> Self {
        self.model().torque_script.extend(readings);
        self
    }

    /// Torque reading = commanded setpoint * factor once the script runs out
    pub fn with_load_factor(self, factor: i32) -> Self {
        self.model().load_factor = factor;
        self
    }

    /// Raw torque constant reported by the drive (`None` = read fails)
    pub fn with_torque_constant(self, raw: Option<i32>) -> Self {
        self.model().torque_constant = raw;
        self
    }

    /// Let the first `after` reads of `param` succeed, then fail `count` of them
    pub fn fail_reads(self, param: u16, after: usize, count: usize) -> Self {
        self.model()
            .failing_reads
            .insert(param, FailWindow { after, count });
        self
    }

    /// Let the first `after` writes to `param` succeed, then fail `count` of them
    pub fn fail_writes(self, param: u16, after: usize, count: usize) -> Self {
        self.model()
            .failing_writes
            .insert(param, FailWindow { after, count });
        self
    }

    /// Every read of `param` takes `delay` before it answers
    pub fn with_read_delay(self, param: u16, delay: Duration) -> Self {
        self.model().read_delays.insert(param, delay);
        self
    }

    /// Closing reports an error and leaves the port held
    pub fn fail_close(self) -> Self {
        self.model().fail_close = true;
        self
    }

    pub fn refuse_open(self) -> Self {
        self.model().refuse_open = true;
        self
    }

    /// Refuse to open until the configuration-mode trigger has been sent
    pub fn require_config_mode(self) -> Self {
        self.model().require_config_mode = true;
        self
    }

    // === Inspection ===

    pub fn log(&self) -> Vec<BusOp> {
        self.model().log.clone()
    }

    /// Values written to `param`, in order
    pub fn writes_to(&self, param: u16) -> Vec<i32> {
        self.model()
            .log
            .iter()
            .filter_map(|op| match *op {
                BusOp::Write { param: p, value, .. } if p == param => Some(value),
                _ => None,
            })
            .collect()
    }

    /// Number of read attempts on `param`
    pub fn reads_of(&self, param: u16) -> usize {
        self.model()
            .log
            .iter()
            .filter(|op| matches!(op, BusOp::Read { param: p, .. } if *p == param))
            .count()
    }

    pub fn is_open(&self) -> bool {
        self.model().open
    }

    /// Enable bit as last written through the control bits
    pub fn is_enabled(&self) -> bool {
        let model = self.model();
        ControlBits::from_raw(model.register(model.params.control_bits)).enables()
    }

    pub fn setpoint(&self) -> i32 {
        let model = self.model();
        model.register(model.params.absolute_setpoint)
    }
}

impl BusConnector for SimulatedDrive {
    type Bus = SimulatedBus;

    fn open(&mut self, endpoint: &str) -> Result<SimulatedBus> {
        let mut model = self.model();
        model.log.push(BusOp::Open);

        if model.refuse_open {
            return Err(TransportError::Open {
                endpoint: endpoint.to_string(),
                reason: "device not found".to_string(),
            });
        }
        if model.require_config_mode && !model.config_mode {
            return Err(TransportError::Open {
                endpoint: endpoint.to_string(),
                reason: "drive not in configuration mode".to_string(),
            });
        }
        if model.open {
            return Err(TransportError::Open {
                endpoint: endpoint.to_string(),
                reason: "port busy".to_string(),
            });
        }

        model.open = true;
        Ok(SimulatedBus {
            model: Arc::clone(&self.model),
            closed: false,
        })
    }
}

impl ConfigModeTrigger for SimulatedDrive {
    fn trigger_config_mode(&mut self, vendor_id: u16, product_id: u16) -> Result<()> {
        let mut model = self.model();
        model.log.push(BusOp::ConfigMode);

        if (vendor_id, product_id) != (GD_USB_VENDOR_ID, SIMUCUBE_PRODUCT_ID) {
            return Err(TransportError::ConfigMode {
                vendor_id,
                product_id,
                reason: "no such device".to_string(),
            });
        }
        model.config_mode = true;
        Ok(())
    }
}

/// Open session on a `SimulatedDrive`
#[derive(Debug)]
pub struct SimulatedBus {
    model: Arc<Mutex<DriveModel>>,
    closed: bool,
}

impl SimulatedBus {
    fn model(&self) -> MutexGuard<'_, DriveModel> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DriveBus for SimulatedBus {
    fn read_parameter(&mut self, axis: u8, param: u16) -> Result<i32> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let delay = self.model().read_delays.get(&param).copied();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        self.model().read(axis, param)
    }

    fn write_parameter(&mut self, axis: u8, param: u16, value: i32) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.model().write(axis, param, value)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.closed = true;

        let mut model = self.model();
        model.log.push(BusOp::Close);
        if model.fail_close {
            return Err(TransportError::Close {
                reason: "port did not release".to_string(),
            });
        }
        model.open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_faults_request() {
        let params = ParamMap::default();
        let mut drive = SimulatedDrive::new(params).with_faults(0x10);
        let mut bus = drive.open("sim").unwrap();

        assert_eq!(bus.read_parameter(1, params.fault_status).unwrap(), 0x10);
        let clear = ControlBits::empty().with_clear_faults().raw();
        bus.write_parameter(1, params.control_bits, clear).unwrap();
        assert_eq!(bus.read_parameter(1, params.fault_status).unwrap(), 0);
    }

    #[test]
    fn test_sticky_faults() {
        let params = ParamMap::default();
        let mut drive = SimulatedDrive::new(params)
            .with_faults(0x10)
            .with_faults_after_clear(0x10);
        let mut bus = drive.open("sim").unwrap();

        let clear = ControlBits::empty().with_clear_faults().raw();
        bus.write_parameter(1, params.control_bits, clear).unwrap();
        assert_eq!(bus.read_parameter(1, params.fault_status).unwrap(), 0x10);
    }

    #[test]
    fn test_torque_script_then_load_model() {
        let params = ParamMap::default();
        let mut drive = SimulatedDrive::new(params)
            .with_torque_script([7, 8])
            .with_load_factor(3);
        let mut bus = drive.open("sim").unwrap();

        bus.write_parameter(1, params.absolute_setpoint, 100).unwrap();
        assert_eq!(bus.read_parameter(1, params.actual_torque).unwrap(), 7);
        assert_eq!(bus.read_parameter(1, params.actual_torque).unwrap(), 8);
        assert_eq!(bus.read_parameter(1, params.actual_torque).unwrap(), 300);
    }

    #[test]
    fn test_fail_window() {
        let params = ParamMap::default();
        let mut drive = SimulatedDrive::new(params).fail_reads(params.fault_status, 1, 2);
        let mut bus = drive.open("sim").unwrap();

        assert!(bus.read_parameter(1, params.fault_status).is_ok());
        assert!(bus.read_parameter(1, params.fault_status).is_err());
        assert!(bus.read_parameter(1, params.fault_status).is_err());
        assert!(bus.read_parameter(1, params.fault_status).is_ok());
        assert_eq!(drive.reads_of(params.fault_status), 4);
    }

    #[test]
    fn test_config_mode_gate() {
        let mut drive = SimulatedDrive::default().require_config_mode();
        assert!(drive.open("sim").is_err());

        assert!(drive.trigger_config_mode(0x1234, 0x5678).is_err());
        drive
            .trigger_config_mode(GD_USB_VENDOR_ID, SIMUCUBE_PRODUCT_ID)
            .unwrap();
        assert!(drive.open("sim").is_ok());
    }

    #[test]
    fn test_closed_bus_rejects_calls() {
        let params = ParamMap::default();
        let mut drive = SimulatedDrive::new(params);
        let mut bus = drive.open("sim").unwrap();
        assert!(drive.is_open());

        bus.close().unwrap();
        assert!(!drive.is_open());
        assert!(matches!(
            bus.read_parameter(1, params.fault_status),
            Err(TransportError::Closed)
        ));
        assert!(matches!(bus.close(), Err(TransportError::Closed)));
        assert_eq!(drive.log().last(), Some(&BusOp::Close));
    }

    #[test]
    fn test_failed_close_keeps_port_held() {
        let mut drive = SimulatedDrive::default().fail_close();
        let mut bus = drive.open("sim").unwrap();

        assert!(matches!(bus.close(), Err(TransportError::Close { .. })));
        assert!(drive.is_open());
        assert!(drive.open("sim").is_err());
    }

    #[test]
    fn test_read_delay() {
        let params = ParamMap::default();
        let mut drive = SimulatedDrive::new(params)
            .with_read_delay(params.actual_torque, Duration::from_millis(15));
        let mut bus = drive.open("sim").unwrap();

        let started = std::time::Instant::now();
        bus.read_parameter(1, params.actual_torque).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(15));
    }
}
