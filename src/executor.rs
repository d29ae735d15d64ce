//! Replays a [`MotionPath`] through an [`Injector`].

use crate::config::ExecutorConfig;
use crate::error::InjectError;
use crate::models::{ExecMode, MotionPath};
use crate::signal::Shutdown;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Performs one relative pointer move at the OS/session level.
pub trait Injector {
    fn move_relative(&mut self, dx: i32, dy: i32) -> Result<(), InjectError>;
}

/// Runs `ydotool mousemove -- dx dy` for every step, without a shell.
pub struct YdotoolInjector {
    program: String,
    socket: Option<String>,
}

impl YdotoolInjector {
    pub fn new(program: impl Into<String>, socket: Option<String>) -> Self {
        Self {
            program: program.into(),
            socket,
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(config.ydotool_path.clone(), config.ydotool_socket.clone())
    }
}

impl Injector for YdotoolInjector {
    fn move_relative(&mut self, dx: i32, dy: i32) -> Result<(), InjectError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["mousemove", "--", dx.to_string().as_str(), dy.to_string().as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(socket) = &self.socket {
            cmd.env("YDOTOOL_SOCKET", socket);
        }

        let status = cmd.status().map_err(|source| InjectError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        if !status.success() {
            return Err(InjectError::ExitStatus {
                program: self.program.clone(),
                code: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionReport {
    pub dispatched: usize,
    pub failed: usize,
    /// True when shutdown abandoned the rest of the path.
    pub cancelled: bool,
}

pub struct PathExecutor<I: Injector> {
    injector: I,
    mode: ExecMode,
    batch_delay: Duration,
    shutdown: Shutdown,
}

impl<I: Injector> PathExecutor<I> {
    pub fn new(injector: I, mode: ExecMode, batch_delay_us: u64, shutdown: Shutdown) -> Self {
        Self {
            injector,
            mode,
            batch_delay: Duration::from_micros(batch_delay_us),
            shutdown,
        }
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    pub fn injector(&self) -> &I {
        &self.injector
    }

    /// Sends every step in order. A failed step is skipped, never retried.
    pub fn execute(&mut self, path: &MotionPath) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        for (index, step) in path.steps.iter().enumerate() {
            if self.shutdown.is_requested() {
                debug!(remaining = path.len() - index, "Path abandoned on shutdown");
                report.cancelled = true;
                break;
            }

            match self.injector.move_relative(step.dx, step.dy) {
                Ok(()) => report.dispatched += 1,
                Err(err) => {
                    if report.failed == 0 {
                        warn!(error = %err, step = index, "Pointer move failed");
                    } else {
                        debug!(error = %err, step = index, "Pointer move failed");
                    }
                    report.failed += 1;
                }
            }

            let pause = match self.mode {
                ExecMode::Batch => self.batch_delay,
                ExecMode::Smooth => Duration::from_micros(step.delay_us),
            };
            if !pause.is_zero() {
                thread::sleep(pause);
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MotionStep, WindParams};
    use std::time::Instant;

    #[derive(Default)]
    struct Recorder {
        moves: Vec<(i32, i32)>,
        fail_on: Vec<usize>,
        stop_after: Option<(usize, Shutdown)>,
    }

    impl Injector for Recorder {
        fn move_relative(&mut self, dx: i32, dy: i32) -> Result<(), InjectError> {
            let index = self.moves.len();
            self.moves.push((dx, dy));
            if let Some((after, shutdown)) = &self.stop_after {
                if self.moves.len() >= *after {
                    shutdown.request();
                }
            }
            if self.fail_on.contains(&index) {
                return Err(InjectError::ExitStatus {
                    program: "ydotool".into(),
                    code: 1,
                });
            }
            Ok(())
        }
    }

    fn path(n: i32, delay_us: u64) -> MotionPath {
        MotionPath {
            steps: (1..=n)
                .map(|i| MotionStep {
                    dx: i,
                    dy: -i,
                    delay_us,
                })
                .collect(),
            params: WindParams {
                speed: 30.0,
                gravity: 4.0,
                wind: 40.0,
                target_radius: 5.0,
                max_step: 3.0,
            },
            target: (0.0, 0.0),
            arrived: true,
        }
    }

    #[test]
    fn test_batch_sends_all_steps_in_order() {
        let mut executor =
            PathExecutor::new(Recorder::default(), ExecMode::Batch, 0, Shutdown::new());

        let report = executor.execute(&path(4, 1_000_000));

        assert_eq!(report.dispatched, 4);
        assert!(!report.cancelled);
        assert_eq!(executor.injector().moves, vec![(1, -1), (2, -2), (3, -3), (4, -4)]);
    }

    #[test]
    fn test_batch_ignores_step_delay() {
        let mut executor =
            PathExecutor::new(Recorder::default(), ExecMode::Batch, 0, Shutdown::new());
        let start = Instant::now();

        executor.execute(&path(3, 500_000));

        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_smooth_honours_step_delay() {
        let mut executor =
            PathExecutor::new(Recorder::default(), ExecMode::Smooth, 0, Shutdown::new());
        let start = Instant::now();

        let report = executor.execute(&path(3, 10_000));

        assert_eq!(report.dispatched, 3);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_failed_step_does_not_abort() {
        let injector = Recorder {
            fail_on: vec![0, 2],
            ..Recorder::default()
        };
        let mut executor = PathExecutor::new(injector, ExecMode::Batch, 0, Shutdown::new());

        let report = executor.execute(&path(5, 0));

        assert_eq!(report.dispatched, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(executor.injector().moves.len(), 5);
    }

    #[test]
    fn test_shutdown_mid_smooth_replay_stops() {
        let shutdown = Shutdown::new();
        let injector = Recorder {
            stop_after: Some((2, shutdown.clone())),
            ..Recorder::default()
        };
        let mut executor = PathExecutor::new(injector, ExecMode::Smooth, 0, shutdown);

        let report = executor.execute(&path(10, 1_000));

        assert!(report.cancelled);
        assert_eq!(report.dispatched, 2);
        assert_eq!(executor.injector().moves, vec![(1, -1), (2, -2)]);
    }

    #[test]
    fn test_empty_path_is_noop() {
        let mut executor =
            PathExecutor::new(Recorder::default(), ExecMode::Smooth, 0, Shutdown::new());
        let report = executor.execute(&path(0, 0));
        assert_eq!(report, ExecutionReport::default());
    }

    #[test]
    fn test_missing_binary_is_spawn_error() {
        let mut injector = YdotoolInjector::new("/nonexistent/ydotool-binary", None);
        assert!(matches!(
            injector.move_relative(1, 1),
            Err(InjectError::Spawn { .. })
        ));
    }
}
