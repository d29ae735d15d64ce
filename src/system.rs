use crate::error::ProbeError;
use crate::probe::IdleSource;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, warn};

const GDBUS_ARGS: [&str; 9] = [
    "call",
    "--session",
    "--dest",
    "org.gnome.Mutter.IdleMonitor",
    "--object-path",
    "/org/gnome/Mutter/IdleMonitor/Core",
    "--method",
    "org.gnome.Mutter.IdleMonitor.GetIdletime",
    "--timeout=2",
];

/// Parses a `GetIdletime` reply such as `(uint64 12345,)`.
pub fn parse_idle_reply(reply: &str) -> Result<u64, ProbeError> {
    let parse_err = || ProbeError::Parse(reply.trim().to_string());
    let inner = reply
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(parse_err)?;
    let value = inner.trim_end_matches(',').trim();
    let digits = value.strip_prefix("uint64").unwrap_or(value).trim();
    digits.parse().map_err(|_| parse_err())
}

/// Queries the compositor's idle time once.
pub fn query_mutter_idle() -> Result<u64, ProbeError> {
    let output = Command::new("gdbus")
        .args(GDBUS_ARGS)
        .stdin(Stdio::null())
        .output()
        .map_err(|err| ProbeError::Query(format!("gdbus failed to execute: {err}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::Query(format!(
            "gdbus exited with {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }

    parse_idle_reply(&String::from_utf8_lossy(&output.stdout))
}

struct Reading {
    idle_ms: u64,
    at: Instant,
    failing: bool,
}

type IdleQuery = Box<dyn Fn() -> Result<u64, ProbeError> + Send + Sync>;

/// Remote backend. When a query fails the last good reading keeps ageing, so
/// the daemon degrades toward "always idle" instead of never acting.
pub struct MutterIdleMonitor {
    query: IdleQuery,
    last: Mutex<Reading>,
}

impl MutterIdleMonitor {
    pub fn new() -> Self {
        Self::with_query(query_mutter_idle)
    }

    /// Uses `query` in place of the gdbus call.
    pub fn with_query<F>(query: F) -> Self
    where
        F: Fn() -> Result<u64, ProbeError> + Send + Sync + 'static,
    {
        Self {
            query: Box::new(query),
            last: Mutex::new(Reading {
                idle_ms: 0,
                at: Instant::now(),
                failing: false,
            }),
        }
    }
}

impl Default for MutterIdleMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleSource for MutterIdleMonitor {
    fn idle_duration_ms(&self) -> u64 {
        let result = (self.query)();
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match result {
            Ok(idle_ms) => {
                if last.failing {
                    debug!("Idle monitor answering again");
                }
                *last = Reading {
                    idle_ms,
                    at: Instant::now(),
                    failing: false,
                };
                idle_ms
            }
            Err(err) => {
                if !last.failing {
                    warn!(error = %err, "Idle monitor query failed, extrapolating");
                    last.failing = true;
                }
                last.idle_ms + last.at.elapsed().as_millis() as u64
            }
        }
    }
}
