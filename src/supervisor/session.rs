// Supervised drive session
//
// fault check -> fault clear -> enable -> velocity mode -> run -> stop -> disable -> close
//
// The control loop runs on the caller's thread. Every bus call blocks until
// the transport answers; there is no per-call timeout.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::state::DriveState;
use super::{EventSink, StopSignal, SupervisorError};
use crate::config::{ControlPolicy, DriveConfig, RunBudget};
use crate::drive::params::{GD_USB_VENDOR_ID, SIMUCUBE_PRODUCT_ID};
use crate::drive::torque::FALLBACK_TORQUE_CONSTANT;
use crate::drive::{
    BusConnector, ConfigModeTrigger, ControlBits, ControlMode, DriveBus, FaultMask, ParamMap,
    TorqueWindow, TransportError, to_physical_torque,
};
use crate::messages::{SessionOutcome, StatusEvent, SupervisorEvent};

/// Static settings for a supervisor instance
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorOptions {
    pub axis: u8,
    pub params: ParamMap,
    pub tick_interval: Duration,
    pub torque_average_window: usize,
    /// USB vendor/product id addressed by the configuration-mode trigger
    pub config_mode_device: (u16, u16),
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self::from(&DriveConfig::default())
    }
}

impl From<&DriveConfig> for SupervisorOptions {
    fn from(config: &DriveConfig) -> Self {
        Self {
            axis: config.axis,
            params: config.params,
            tick_interval: config.tick_interval,
            torque_average_window: config.torque_average_window,
            config_mode_device: (GD_USB_VENDOR_ID, SIMUCUBE_PRODUCT_ID),
        }
    }
}

/// Owns one bus session at a time and drives it through its lifecycle
pub struct DriveSupervisor<C: BusConnector, S: EventSink> {
    connector: C,
    bus: Option<C::Bus>,
    state: DriveState,
    options: SupervisorOptions,
    stop: StopSignal,
    sink: S,
    // last setpoint the drive acknowledged; None forces a rewrite
    setpoint: Option<i32>,
    // setpoint 0 and disable both acknowledged on the current handle
    halted: bool,
    last_refresh: Instant,
    // widest gap between successful exchanges since the last watchdog check
    widest_gap: Duration,
    last_error: Option<SupervisorError>,
}

impl<C: BusConnector, S: EventSink> DriveSupervisor<C, S> {
    pub fn new(connector: C, options: SupervisorOptions, stop: StopSignal, sink: S) -> Self {
        Self {
            connector,
            bus: None,
            state: DriveState::Disconnected,
            options,
            stop,
            sink,
            setpoint: None,
            halted: false,
            last_refresh: Instant::now(),
            widest_gap: Duration::ZERO,
            last_error: None,
        }
    }

    pub fn state(&self) -> DriveState {
        self.state
    }

    /// Fatal error behind the last session's outcome, if any
    pub fn last_error(&self) -> Option<&SupervisorError> {
        self.last_error.as_ref()
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Run one complete session on `endpoint`
    ///
    /// Always returns with the drive disabled (best effort) and the bus closed.
    /// A stop signal that is still set from an earlier session ends this one
    /// as `StoppedByUser` before the bus is opened; `StopSignal::reset`
    /// re-arms it.
    pub fn start(
        &mut self,
        endpoint: &str,
        policy: ControlPolicy,
        watchdog_interval: Duration,
        run_budget: RunBudget,
    ) -> SessionOutcome {
        if self.bus.is_some() {
            warn!("Previous session still holds the bus, shutting it down");
            self.shutdown();
        }
        self.last_error = None;

        if self.stop_pending(endpoint) {
            return SessionOutcome::StoppedByUser;
        }

        if watchdog_interval <= self.options.tick_interval {
            warn!(
                "Watchdog interval {:?} is not longer than the tick interval {:?}",
                watchdog_interval, self.options.tick_interval
            );
        }

        info!("Starting session on {} with {:?}", endpoint, policy);
        let outcome = match self.bring_up(endpoint) {
            Ok(()) => self.run(policy, watchdog_interval, run_budget),
            Err(err) => self.abort(err),
        };

        self.shutdown();
        info!("Session on {} ended: {}", endpoint, outcome);
        outcome
    }

    /// Send the configuration-mode trigger once, then run a session
    pub fn start_with_trigger<T: ConfigModeTrigger + ?Sized>(
        &mut self,
        trigger: &mut T,
        endpoint: &str,
        policy: ControlPolicy,
        watchdog_interval: Duration,
        run_budget: RunBudget,
    ) -> SessionOutcome {
        if self.stop_pending(endpoint) {
            return SessionOutcome::StoppedByUser;
        }

        let (vendor_id, product_id) = self.options.config_mode_device;
        info!(
            "Switching {:04x}:{:04x} to configuration mode",
            vendor_id, product_id
        );

        if let Err(source) = trigger.trigger_config_mode(vendor_id, product_id) {
            let err = SupervisorError::Connect {
                endpoint: endpoint.to_string(),
                source,
            };
            error!("{}", err);
            let outcome = SessionOutcome::ConnectionFailed(err.to_string());
            self.last_error = Some(err);
            return outcome;
        }

        self.start(endpoint, policy, watchdog_interval, run_budget)
    }

    /// Bring the drive to a safe state and release the bus
    ///
    /// Idempotent: without a live handle this does nothing. Cleanup failures
    /// are logged and never stop the supervisor from reaching `Disconnected`.
    pub fn shutdown(&mut self) {
        if !self.state.holds_handle() {
            return;
        }

        if !self.state.is_terminal() {
            self.transition(DriveState::Disabling);
        }
        self.halt();

        if let Some(mut bus) = self.bus.take() {
            match bus.close() {
                Ok(()) => info!("Bus closed"),
                Err(err) => warn!("Failed to close bus: {}", err),
            }
        }
        self.transition(DriveState::Disconnected);
    }

    // === Lifecycle ===

    fn stop_pending(&self, endpoint: &str) -> bool {
        if !self.stop.is_triggered() {
            return false;
        }
        warn!(
            "Stop already requested, not connecting to {} until the stop signal is reset",
            endpoint
        );
        true
    }

    fn bring_up(&mut self, endpoint: &str) -> Result<(), SupervisorError> {
        self.transition(DriveState::Connecting);
        let bus = self
            .connector
            .open(endpoint)
            .map_err(|source| SupervisorError::Connect {
                endpoint: endpoint.to_string(),
                source,
            })?;
        self.bus = Some(bus);
        self.setpoint = None;
        self.halted = false;
        self.last_refresh = Instant::now();
        self.widest_gap = Duration::ZERO;
        info!("Bus opened on {}", endpoint);

        self.transition(DriveState::FaultCheck);
        let faults = self.read_faults().map_err(SupervisorError::Communication)?;

        if !faults.is_clear() {
            warn!("Drive reports faults {}", faults);
            self.transition(DriveState::FaultClearing);

            self.write_control_bits(ControlBits::empty().with_clear_faults())
                .map_err(SupervisorError::Communication)?;
            let remaining = self.read_faults().map_err(SupervisorError::Communication)?;
            if !remaining.is_clear() {
                return Err(SupervisorError::UnrecoverableFault(remaining));
            }
            info!("Faults cleared");
        }

        self.transition(DriveState::Enabling);
        self.write_control_bits(ControlBits::empty().with_enable())
            .map_err(|source| SupervisorError::DriveRejected {
                action: "enable",
                source,
            })?;

        self.transition(DriveState::ModeSelecting);
        let mode_param = self.options.params.control_mode;
        self.write_param(mode_param, ControlMode::Velocity.raw())
            .map_err(|source| SupervisorError::DriveRejected {
                action: "velocity control mode",
                source,
            })?;

        Ok(())
    }

    fn abort(&mut self, err: SupervisorError) -> SessionOutcome {
        error!("Bring-up failed in {}: {}", self.state, err);

        let outcome = match &err {
            SupervisorError::UnrecoverableFault(mask) => {
                self.transition(DriveState::Faulted);
                SessionOutcome::Faulted(*mask)
            }
            SupervisorError::Connect { .. } => {
                self.transition(DriveState::Disconnected);
                SessionOutcome::ConnectionFailed(err.to_string())
            }
            SupervisorError::Communication(_) | SupervisorError::DriveRejected { .. } => {
                self.transition(DriveState::Disabling);
                SessionOutcome::ConnectionFailed(err.to_string())
            }
        };

        self.last_error = Some(err);
        outcome
    }

    fn run(
        &mut self,
        policy: ControlPolicy,
        watchdog_interval: Duration,
        run_budget: RunBudget,
    ) -> SessionOutcome {
        self.transition(DriveState::Running);
        let params = self.options.params;

        let torque_constant = match self.read_param(params.torque_constant) {
            Ok(raw) => Some(raw),
            Err(err) => {
                warn!(
                    "Torque constant unavailable, assuming {}: {}",
                    FALLBACK_TORQUE_CONSTANT, err
                );
                None
            }
        };

        self.command_setpoint(policy.initial_setpoint());

        let mut window = TorqueWindow::new(self.options.torque_average_window);
        let mut pacer = Pacer::new(self.options.tick_interval);
        let started = Instant::now();
        let mut cycle: u64 = 0;

        loop {
            if run_budget.is_exhausted(cycle, started.elapsed()) {
                info!("Run budget exhausted after {} cycles", cycle);
                self.transition(DriveState::Disabling);
                return SessionOutcome::CompletedNormally;
            }

            pacer.wait();

            // user stop wins over anything observed later in the cycle
            if self.stop.is_triggered() {
                warn!("Emergency stop requested in cycle {}", cycle);
                self.transition(DriveState::EmergencyStopped);
                self.halt();
                return SessionOutcome::StoppedByUser;
            }

            let raw_torque = match self.read_param(params.actual_torque) {
                Ok(raw) => {
                    window.push(raw);
                    Some(raw)
                }
                Err(err) => {
                    warn!("Torque read failed in cycle {}: {}", cycle, err);
                    None
                }
            };

            if let Some(target) = policy.target(window.mean()) {
                if self.setpoint != Some(target) {
                    self.command_setpoint(target);
                }
            }

            // doubles as the watchdog refresh
            let fault_mask = match self.read_faults() {
                Ok(mask) => Some(mask),
                Err(err) => {
                    warn!("Fault read failed in cycle {}: {}", cycle, err);
                    None
                }
            };

            if let Some(mask) = fault_mask.filter(|m| !m.is_clear()) {
                error!("Drive fault in cycle {}: {}", cycle, mask);
                self.transition(DriveState::Faulted);
                self.halt();
                return SessionOutcome::Faulted(mask);
            }

            // a slow call that eventually succeeds still counts as silence
            let silence = self.widest_gap.max(self.last_refresh.elapsed());
            self.widest_gap = Duration::ZERO;
            if silence > watchdog_interval {
                error!(
                    "No successful bus exchange for {:?} (watchdog {:?})",
                    silence, watchdog_interval
                );
                self.transition(DriveState::Faulted);
                self.halt();
                return SessionOutcome::Faulted(FaultMask::WATCHDOG_TIMEOUT);
            }

            let status = StatusEvent {
                cycle,
                raw_torque,
                torque: raw_torque.map(|raw| to_physical_torque(raw, torque_constant)),
                setpoint: self.setpoint,
                fault_mask,
                elapsed: started.elapsed(),
            };
            self.sink.emit(SupervisorEvent::Status(status));
            cycle += 1;
        }
    }

    // === Drive commands ===

    fn command_setpoint(&mut self, value: i32) {
        debug_assert_eq!(self.state, DriveState::Running);

        let param = self.options.params.absolute_setpoint;
        match self.write_param(param, value) {
            Ok(()) => {
                debug!("Setpoint {} acknowledged", value);
                self.setpoint = Some(value);
            }
            Err(err) => {
                warn!("Setpoint {} not accepted, retrying next cycle: {}", value, err);
                self.setpoint = None;
            }
        }
    }

    /// Setpoint 0 then disable, skipped once both have been acknowledged
    fn halt(&mut self) {
        if self.halted || self.bus.is_none() {
            return;
        }

        let param = self.options.params.absolute_setpoint;
        let zeroed = match self.write_param(param, 0) {
            Ok(()) => {
                self.setpoint = Some(0);
                true
            }
            Err(err) => {
                warn!("Failed to zero setpoint: {}", err);
                false
            }
        };

        let disabled = match self.write_control_bits(ControlBits::empty()) {
            Ok(()) => true,
            Err(err) => {
                warn!("Failed to disable drive: {}", err);
                false
            }
        };

        if zeroed && disabled {
            info!("Drive stopped and disabled");
        }
        self.halted = zeroed && disabled;
    }

    fn read_faults(&mut self) -> Result<FaultMask, TransportError> {
        let param = self.options.params.fault_status;
        self.read_param(param).map(FaultMask::from_param)
    }

    fn write_control_bits(&mut self, bits: ControlBits) -> Result<(), TransportError> {
        let param = self.options.params.control_bits;
        self.write_param(param, bits.raw())
    }

    // === Bus access ===

    fn bus(&mut self) -> Result<&mut C::Bus, TransportError> {
        self.bus.as_mut().ok_or(TransportError::Closed)
    }

    /// Any successful exchange refreshes the drive's communication watchdog
    fn read_param(&mut self, param: u16) -> Result<i32, TransportError> {
        let axis = self.options.axis;
        let value = self.bus()?.read_parameter(axis, param)?;
        self.refresh_watchdog();
        Ok(value)
    }

    fn write_param(&mut self, param: u16, value: i32) -> Result<(), TransportError> {
        let axis = self.options.axis;
        debug!(
            "Write {} ({}) = {}",
            self.options.params.describe(param),
            param,
            value
        );
        self.bus()?.write_parameter(axis, param, value)?;
        self.refresh_watchdog();
        Ok(())
    }

    fn refresh_watchdog(&mut self) {
        self.widest_gap = self.widest_gap.max(self.last_refresh.elapsed());
        self.last_refresh = Instant::now();
    }

    fn transition(&mut self, next: DriveState) {
        let from = self.state;
        if from == next {
            return;
        }
        debug_assert!(
            from.can_transition_to(next),
            "illegal transition {} -> {}",
            from,
            next
        );

        info!("{} -> {}", from, next);
        self.state = next;
        self.sink
            .emit(SupervisorEvent::Transition { from, to: next });
    }
}

impl<C: BusConnector, S: EventSink> Drop for DriveSupervisor<C, S> {
    fn drop(&mut self) {
        // Never leave an enabled drive behind
        self.shutdown();
    }
}

/// Fixed-period tick schedule
///
/// Deadlines advance by exactly one period. When the loop falls more than a
/// full period behind, the schedule restarts from now instead of bursting.
struct Pacer {
    period: Duration,
    next: Instant,
}

impl Pacer {
    fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now() + period,
        }
    }

    fn wait(&mut self) {
        let now = Instant::now();
        if now < self.next {
            thread::sleep(self.next - now);
            self.next += self.period;
        } else if now - self.next >= self.period {
            self.next = now + self.period;
        } else {
            self.next += self.period;
        }
    }
}
