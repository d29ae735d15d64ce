//! Supervisor: reads the probe once per tick, drives the scheduler and
//! publishes a [`StatusSnapshot`] to every observer.

use crate::executor::Injector;
use crate::models::{DaemonState, StatusSnapshot};
use crate::probe::ActivityProbe;
use crate::scheduler::ActionScheduler;
use crate::signal::Shutdown;
use crate::storage::StateFile;
use anyhow::Result;
use rand::Rng;
use std::time::Duration;
use tracing::warn;

/// Receives the daemon status after every tick.
pub trait StatusObserver {
    fn on_status(&mut self, snapshot: &StatusSnapshot) -> Result<()>;
}

impl StatusObserver for StateFile {
    fn on_status(&mut self, snapshot: &StatusSnapshot) -> Result<()> {
        self.save(snapshot)
    }
}

fn publish(observers: &mut [&mut dyn StatusObserver], snapshot: &StatusSnapshot) {
    for observer in observers.iter_mut() {
        // Reporting is best effort; it never stops the daemon.
        if let Err(err) = observer.on_status(snapshot) {
            warn!(error = %err, "Status observer failed");
        }
    }
}

/// Runs until shutdown is requested. The last snapshot published is always
/// `Terminating`.
pub fn run<I: Injector, R: Rng>(
    probe: &ActivityProbe,
    scheduler: &mut ActionScheduler<I, R>,
    observers: &mut [&mut dyn StatusObserver],
    tick_interval: Duration,
    shutdown: &Shutdown,
) {
    let backend = probe.backend();
    loop {
        let idle_ms = probe.idle_duration_ms();
        let state = scheduler.evaluate(idle_ms);
        publish(observers, &scheduler.snapshot(idle_ms, backend));

        match state {
            DaemonState::Terminating => break,
            DaemonState::Acting => {
                scheduler.perform_action(idle_ms);
                let idle_ms = probe.idle_duration_ms();
                publish(observers, &scheduler.snapshot(idle_ms, backend));
                if scheduler.state() == DaemonState::Terminating {
                    break;
                }
            }
            DaemonState::Safe | DaemonState::Warning => {}
        }

        shutdown.sleep(tick_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::InjectError;
    use crate::models::ProbeBackend;
    use crate::probe::IdleSource;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Replays scripted idle readings, repeating the last one.
    struct Scripted {
        readings: Vec<u64>,
        next: AtomicUsize,
    }

    impl IdleSource for Scripted {
        fn idle_duration_ms(&self) -> u64 {
            let i = self.next.fetch_add(1, Ordering::SeqCst);
            self.readings[i.min(self.readings.len() - 1)]
        }
    }

    struct NullInjector(Arc<AtomicU64>);

    impl Injector for NullInjector {
        fn move_relative(&mut self, _dx: i32, _dy: i32) -> Result<(), InjectError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Records states and requests shutdown after `limit` snapshots.
    struct Recorder {
        states: Vec<DaemonState>,
        limit: usize,
        shutdown: Shutdown,
    }

    impl StatusObserver for Recorder {
        fn on_status(&mut self, snapshot: &StatusSnapshot) -> Result<()> {
            self.states.push(snapshot.state);
            if self.states.len() >= self.limit {
                self.shutdown.request();
            }
            Ok(())
        }
    }

    struct Broken;

    impl StatusObserver for Broken {
        fn on_status(&mut self, _snapshot: &StatusSnapshot) -> Result<()> {
            Err(anyhow::anyhow!("disk full"))
        }
    }

    #[test]
    fn test_run_walks_states_and_stops() {
        let mut config = Config::default();
        config.timing.settle_delay_ms = 0;
        config.executor.batch_delay_us = 0;

        let shutdown = Shutdown::new();
        let moves = Arc::new(AtomicU64::new(0));
        let mut scheduler = ActionScheduler::new(
            &config,
            NullInjector(moves.clone()),
            StdRng::seed_from_u64(9),
            shutdown.clone(),
        )
        .unwrap();

        let past_any_threshold = config.timing.max_action_ms + 1;
        let probe = ActivityProbe::from_source(
            ProbeBackend::Local,
            Arc::new(Scripted {
                readings: vec![0, 31_000, past_any_threshold, 0, 0],
                next: AtomicUsize::new(0),
            }),
        );
        let mut recorder = Recorder {
            states: Vec::new(),
            limit: 5,
            shutdown: shutdown.clone(),
        };
        let mut broken = Broken;
        let mut observers: [&mut dyn StatusObserver; 2] = [&mut recorder, &mut broken];

        run(
            &probe,
            &mut scheduler,
            &mut observers,
            Duration::from_millis(1),
            &shutdown,
        );

        assert_eq!(
            recorder.states,
            vec![
                DaemonState::Safe,
                DaemonState::Warning,
                DaemonState::Acting,
                DaemonState::Safe,
                DaemonState::Safe,
                DaemonState::Terminating,
            ]
        );
        assert_eq!(scheduler.actions(), 1);
        assert!(moves.load(Ordering::SeqCst) > 0);
    }
}
