use crate::config::{Config, TimingConfig};
use crate::error::ConfigError;
use crate::executor::{ExecutionReport, Injector, PathExecutor};
use crate::models::{DaemonState, ProbeBackend, StatusSnapshot};
use crate::signal::Shutdown;
use crate::windmouse::WindMouse;
use chrono::Utc;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info};

/// Summary of one completed movement.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub threshold_ms: u64,
    pub next_threshold_ms: u64,
    pub target: (f64, f64),
    pub path_len: usize,
    pub arrived: bool,
    pub report: ExecutionReport,
}

pub struct ActionScheduler<I: Injector, R: Rng> {
    timing: TimingConfig,
    wind_mouse: WindMouse,
    executor: PathExecutor<I>,
    rng: R,
    shutdown: Shutdown,
    state: DaemonState,
    action_threshold_ms: u64,
    actions: u64,
}

impl<I: Injector, R: Rng> ActionScheduler<I, R> {
    /// Validates `config` before anything runs; an invalid ordering of the
    /// warning and action limits never reaches the first tick.
    pub fn new(
        config: &Config,
        injector: I,
        rng: R,
        shutdown: Shutdown,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let executor = PathExecutor::new(
            injector,
            config.executor.mode,
            config.executor.batch_delay_us,
            shutdown.clone(),
        );
        let mut scheduler = Self {
            timing: config.timing.clone(),
            wind_mouse: WindMouse::new(config.wind_mouse.clone()),
            executor,
            rng,
            shutdown,
            state: DaemonState::Safe,
            action_threshold_ms: 0,
            actions: 0,
        };
        scheduler.action_threshold_ms = scheduler.draw_threshold();
        Ok(scheduler)
    }

    pub fn state(&self) -> DaemonState {
        self.state
    }

    pub fn action_threshold_ms(&self) -> u64 {
        self.action_threshold_ms
    }

    pub fn actions(&self) -> u64 {
        self.actions
    }

    fn draw_threshold(&mut self) -> u64 {
        self.rng.gen_range(self.timing.min_action_ms..self.timing.max_action_ms)
    }

    /// Moves the state machine for one idle reading and returns the new state.
    ///
    /// `Acting` is only reachable from `Warning`, so a reading that jumps past
    /// the action threshold while `Safe` reports `Warning` first.
    pub fn evaluate(&mut self, idle_ms: u64) -> DaemonState {
        if self.state == DaemonState::Terminating {
            return self.state;
        }
        if self.shutdown.is_requested() {
            info!("Shutdown requested, scheduler stopping");
            self.state = DaemonState::Terminating;
            return self.state;
        }

        let next = if self.state == DaemonState::Warning && idle_ms > self.action_threshold_ms {
            DaemonState::Acting
        } else if idle_ms > self.timing.warning_limit_ms {
            DaemonState::Warning
        } else {
            DaemonState::Safe
        };

        if next != self.state {
            debug!(from = %self.state, to = %next, idle_ms, "State change");
        }
        self.state = next;
        self.state
    }

    /// Synthesizes and replays one path, redraws the threshold and waits for
    /// the movement to register before returning to `Safe`.
    pub fn perform_action(&mut self, idle_ms: u64) -> ActionOutcome {
        let threshold_ms = self.action_threshold_ms;
        info!(
            idle_secs = idle_ms / 1000,
            limit_secs = threshold_ms / 1000,
            "Idle limit reached, moving pointer"
        );

        let (tx, ty) = self.wind_mouse.random_target(&mut self.rng);
        let path = self.wind_mouse.synthesize(&mut self.rng, tx, ty);
        debug!(
            target_x = tx.round(),
            target_y = ty.round(),
            points = path.len(),
            arrived = path.arrived,
            mode = %self.executor.mode(),
            "Path synthesized"
        );

        let report = self.executor.execute(&path);

        self.action_threshold_ms = self.draw_threshold();
        self.actions += 1;
        info!(
            dispatched = report.dispatched,
            failed = report.failed,
            cancelled = report.cancelled,
            next_secs = self.action_threshold_ms / 1000,
            "Movement done"
        );

        if !report.cancelled {
            self.shutdown.sleep(Duration::from_millis(self.timing.settle_delay_ms));
        }
        self.state = if self.shutdown.is_requested() {
            DaemonState::Terminating
        } else {
            DaemonState::Safe
        };

        ActionOutcome {
            threshold_ms,
            next_threshold_ms: self.action_threshold_ms,
            target: (tx, ty),
            path_len: path.len(),
            arrived: path.arrived,
            report,
        }
    }

    /// `evaluate` followed by `perform_action` when a movement is due.
    pub fn tick(&mut self, idle_ms: u64) -> Option<ActionOutcome> {
        match self.evaluate(idle_ms) {
            DaemonState::Acting => Some(self.perform_action(idle_ms)),
            _ => None,
        }
    }

    pub fn snapshot(&self, idle_ms: u64, backend: ProbeBackend) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state,
            idle_ms,
            warning_limit_ms: self.timing.warning_limit_ms,
            action_threshold_ms: self.action_threshold_ms,
            mode: self.executor.mode(),
            backend,
            actions: self.actions,
            pid: std::process::id(),
            updated_at: Utc::now(),
        }
    }
}
