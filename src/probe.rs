//! Idle-duration measurement.
//!
//! [`ActivityProbe`] hides which backend answers "how long has the user been
//! idle". The local backend is an evdev listener thread writing an
//! [`ActivityClock`]; the Mutter backend asks the compositor.

use crate::error::ProbeError;
use crate::input;
use crate::models::ProbeBackend;
use crate::system::MutterIdleMonitor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Something that can report the current idle duration.
pub trait IdleSource: Send + Sync {
    fn idle_duration_ms(&self) -> u64;
}

/// Milliseconds since an origin `Instant`, stamped on every qualifying input
/// event. Single writer (the listener), any number of readers.
#[derive(Debug)]
pub struct ActivityClock {
    origin: Instant,
    last_activity_ms: AtomicU64,
}

impl ActivityClock {
    /// A fresh clock counts as "active now".
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    /// Stamps the current millisecond. Returns false when the write was
    /// skipped because the stored value is already this millisecond.
    pub fn record_activity(&self) -> bool {
        self.record_at(self.now_ms())
    }

    fn record_at(&self, now: u64) -> bool {
        if self.last_activity_ms.load(Ordering::Relaxed) >= now {
            return false;
        }
        // fetch_max keeps the counter monotonic even if a stale `now` races in.
        self.last_activity_ms.fetch_max(now, Ordering::Relaxed);
        true
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleSource for ActivityClock {
    fn idle_duration_ms(&self) -> u64 {
        self.now_ms().saturating_sub(self.last_activity_ms())
    }
}

pub struct ActivityProbe {
    backend: ProbeBackend,
    source: Arc<dyn IdleSource>,
}

impl ActivityProbe {
    /// Starts the selected backend.
    pub fn start(backend: ProbeBackend) -> Self {
        match backend {
            ProbeBackend::Local => Self::local(input::spawn_listener),
            ProbeBackend::Mutter => Self::from_source(backend, Arc::new(MutterIdleMonitor::new())),
        }
    }

    /// Local backend fed by whatever `spawn` attaches to the clock.
    ///
    /// A listener that cannot start still yields a usable probe: its clock
    /// never advances, so idle time grows without bound and the scheduler
    /// keeps acting. This is logged once here.
    fn local<F>(spawn: F) -> Self
    where
        F: FnOnce(Arc<ActivityClock>) -> ProbeResult<usize>,
    {
        let clock = Arc::new(ActivityClock::new());
        match spawn(Arc::clone(&clock)) {
            Ok(devices) => info!(devices, "Activity listener started"),
            Err(err) => warn!(
                error = %err,
                "Activity listener unavailable, idle time will only grow"
            ),
        }
        Self::from_source(ProbeBackend::Local, clock)
    }

    /// Wraps an existing source; used by tests and alternative front ends.
    pub fn from_source(backend: ProbeBackend, source: Arc<dyn IdleSource>) -> Self {
        Self { backend, source }
    }

    pub fn backend(&self) -> ProbeBackend {
        self.backend
    }

    pub fn idle_duration_ms(&self) -> u64 {
        self.source.idle_duration_ms()
    }
}

/// Result type of fallible probe setup.
pub type ProbeResult<T> = Result<T, ProbeError>;
