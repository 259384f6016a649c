// Bench runtime: one supervised session plus everything that watches it
//
// The supervisor loop is blocking, so it runs on tokio's blocking pool while
// this task fans its events out to the log and (optionally) zenoh, and turns
// Ctrl-C, key presses and stop requests on the bus into the stop signal.

use std::thread;
use std::time::Duration;

use crossterm::event::{self, Event, KeyEvent, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{DriveConfig, TOPIC_CMD_STOP, TOPIC_OUTCOME, TOPIC_STATUS};
use crate::drive::SimulatedDrive;
use crate::messages::{SessionOutcome, SupervisorEvent};
use crate::supervisor::{DriveSupervisor, StopSignal, SupervisorOptions};

// Status lines at info level once per this many cycles, debug otherwise
const STATUS_LOG_EVERY: u64 = 10;

const KEY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One bench session: which drive, which endpoint, and who may stop it
#[derive(Debug, Clone)]
pub struct BenchPlan {
    pub config: DriveConfig,
    pub endpoint: String,
    pub drive: SimulatedDrive,
    /// Publish events on zenoh and accept stop requests from it
    pub zenoh: bool,
    /// Any key press triggers an emergency stop
    pub keyboard_stop: bool,
}

fn log_event(event: &SupervisorEvent) {
    match event {
        // the supervisor logs its own transitions
        SupervisorEvent::Transition { from, to } => debug!("Observed {} -> {}", from, to),
        SupervisorEvent::Status(status) => {
            let faults = status
                .fault_mask
                .map_or_else(|| "unread".to_string(), |mask| mask.to_string());
            if status.cycle % STATUS_LOG_EVERY == 0 {
                info!(
                    "cycle {}: torque {:?} (raw {:?}), setpoint {:?}, faults {}",
                    status.cycle, status.torque, status.raw_torque, status.setpoint, faults
                );
            } else {
                debug!(
                    "cycle {}: torque {:?}, setpoint {:?}, faults {}",
                    status.cycle, status.torque, status.setpoint, faults
                );
            }
        }
    }
}

/// Raw-mode key watcher on its own thread
struct KeyboardStop {
    finished: StopSignal,
    handle: thread::JoinHandle<()>,
}

impl KeyboardStop {
    fn spawn(stop: StopSignal) -> std::io::Result<Self> {
        enable_raw_mode()?;
        let finished = StopSignal::new();
        let watcher_finished = finished.clone();

        let handle = thread::spawn(move || {
            while !watcher_finished.is_triggered() && !stop.is_triggered() {
                match event::poll(KEY_POLL_INTERVAL) {
                    Ok(true) => {
                        if let Ok(Event::Key(KeyEvent {
                            kind: KeyEventKind::Press,
                            ..
                        })) = event::read()
                        {
                            warn!("Key pressed, requesting emergency stop");
                            stop.trigger();
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Keyboard polling failed, key stop disabled: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self { finished, handle })
    }

    fn finish(self) {
        self.finished.trigger();
        if self.handle.join().is_err() {
            warn!("Keyboard watcher panicked");
        }
        if let Err(e) = disable_raw_mode() {
            warn!("Failed to restore terminal: {}", e);
        }
    }
}

/// Run one session against the simulated drive and report how it ended
pub async fn run_bench(
    plan: BenchPlan,
) -> Result<SessionOutcome, Box<dyn std::error::Error + Send + Sync>> {
    let BenchPlan {
        config,
        endpoint,
        drive,
        zenoh,
        keyboard_stop,
    } = plan;

    let session = if zenoh {
        info!("Opening Zenoh session...");
        Some(zenoh::open(zenoh::Config::default()).await?)
    } else {
        None
    };
    let (pub_status, pub_outcome, stop_requests) = match &session {
        Some(session) => {
            info!("Publishing to: {}, {}", TOPIC_STATUS, TOPIC_OUTCOME);
            info!("Subscribed to: {}", TOPIC_CMD_STOP);
            (
                Some(session.declare_publisher(TOPIC_STATUS).await?),
                Some(session.declare_publisher(TOPIC_OUTCOME).await?),
                Some(session.declare_subscriber(TOPIC_CMD_STOP).await?),
            )
        }
        None => (None, None, None),
    };

    let stop = StopSignal::new();
    let keyboard = if keyboard_stop {
        info!("Press any key for an emergency stop");
        Some(KeyboardStop::spawn(stop.clone())?)
    } else {
        None
    };

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let options = SupervisorOptions::from(&config);
    let session_stop = stop.clone();
    let mut supervised = tokio::task::spawn_blocking(move || {
        let mut trigger = drive.clone();
        let mut supervisor = DriveSupervisor::new(drive, options, session_stop, events_tx);
        supervisor.start_with_trigger(
            &mut trigger,
            &endpoint,
            config.policy,
            config.watchdog_interval,
            config.run_budget,
        )
    });

    info!(
        "Bench started: {}ms tick, {}ms watchdog, budget {:?}",
        config.tick_interval.as_millis(),
        config.watchdog_interval.as_millis(),
        config.run_budget
    );

    let mut ctrl_c_armed = true;
    let mut stop_requests_armed = stop_requests.is_some();
    let joined = loop {
        tokio::select! {
            Some(event) = events_rx.recv() => {
                log_event(&event);
                if let Some(publisher) = &pub_status {
                    let json = serde_json::to_string(&event)?;
                    if let Err(e) = publisher.put(json).await {
                        warn!("Failed to publish status: {}", e);
                    }
                }
            }
            signal = tokio::signal::ctrl_c(), if ctrl_c_armed => {
                match signal {
                    Ok(()) => {
                        warn!("Ctrl-C received, requesting emergency stop");
                        stop.trigger();
                    }
                    Err(e) => {
                        warn!("Cannot listen for Ctrl-C: {}", e);
                        ctrl_c_armed = false;
                    }
                }
            }
            request = async {
                match &stop_requests {
                    Some(subscriber) => subscriber.recv_async().await.is_ok(),
                    None => std::future::pending::<bool>().await,
                }
            }, if stop_requests_armed => {
                if request {
                    warn!("Stop requested on {}, requesting emergency stop", TOPIC_CMD_STOP);
                    stop.trigger();
                } else {
                    stop_requests_armed = false;
                }
            }
            joined = &mut supervised => break joined,
        }
    };

    if let Some(keyboard) = keyboard {
        keyboard.finish();
    }
    let outcome = joined?;

    // events sent after the last poll
    while let Ok(event) = events_rx.try_recv() {
        log_event(&event);
        if let Some(publisher) = &pub_status {
            publisher.put(serde_json::to_string(&event)?).await?;
        }
    }

    if let Some(publisher) = &pub_outcome {
        publisher.put(serde_json::to_string(&outcome)?).await?;
    }

    info!("Bench finished: {}", outcome);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ControlPolicy, RunBudget};
    use crate::drive::{FaultMask, ParamMap};

    fn plan(drive: SimulatedDrive) -> BenchPlan {
        let config = DriveConfig {
            tick_interval: Duration::from_millis(1),
            watchdog_interval: Duration::from_secs(2),
            run_budget: RunBudget::Cycles(5),
            policy: ControlPolicy::FixedSetpoint(300),
            ..DriveConfig::default()
        };
        BenchPlan {
            config,
            endpoint: "sim://bench".to_string(),
            drive,
            zenoh: false,
            keyboard_stop: false,
        }
    }

    #[tokio::test]
    async fn test_bench_completes() {
        let drive = SimulatedDrive::default().with_faults(0x481001);
        let outcome = run_bench(plan(drive.clone())).await.unwrap();

        assert_eq!(outcome, SessionOutcome::CompletedNormally);
        assert_eq!(drive.writes_to(ParamMap::default().absolute_setpoint), vec![300, 0]);
        assert!(!drive.is_open());
        assert!(!drive.is_enabled());
    }

    #[tokio::test]
    async fn test_bench_reports_sticky_fault() {
        let drive = SimulatedDrive::default()
            .with_faults(0x20)
            .with_faults_after_clear(0x20);
        let outcome = run_bench(plan(drive.clone())).await.unwrap();

        assert_eq!(outcome, SessionOutcome::Faulted(FaultMask::new(0x20)));
        assert!(!drive.is_open());
    }
}
