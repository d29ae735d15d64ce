use crate::models::{DaemonState, StatusSnapshot};
use crate::storage::StateFile;
use crate::utils::format_millis;
use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use fd_lock::RwLock;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

/// Snapshots older than this while not stopped mean the daemon died uncleanly.
const STALE_AFTER_SECS: i64 = 10;

/// True while some process holds the single-instance lock at `lock_path`.
pub fn daemon_running(lock_path: &Path) -> Result<bool> {
    let file = match OpenOptions::new().read(true).write(true).open(lock_path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err.into()),
    };
    let mut lock = RwLock::new(file);
    let running = match lock.try_write() {
        Ok(_guard) => false,
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => true,
        Err(err) => return Err(err.into()),
    };
    Ok(running)
}

pub struct Reporter {
    state_file: StateFile,
    lock_path: PathBuf,
}

impl Reporter {
    pub fn new(state_file: StateFile, lock_path: PathBuf) -> Self {
        Self {
            state_file,
            lock_path,
        }
    }

    pub fn report(&self) -> Result<()> {
        match self.state_file.load()? {
            Some(snapshot) => println!("{}", render(&snapshot, Utc::now())),
            None => println!("idlewind has not run yet."),
        }
        Ok(())
    }

    /// Sends SIGTERM to the daemon recorded in the state file.
    ///
    /// The pid is only trusted while the instance lock is held: after a crash
    /// the state file outlives the daemon and its pid may belong to anything.
    pub fn stop(&self) -> Result<()> {
        if !daemon_running(&self.lock_path)? {
            println!("idlewind is not running.");
            return Ok(());
        }
        let snapshot = match self.state_file.load()? {
            Some(s) if s.state != DaemonState::Terminating => s,
            Some(_) => {
                println!("idlewind is already stopping.");
                return Ok(());
            }
            None => {
                println!("idlewind has not published its state yet, try again.");
                return Ok(());
            }
        };

        let pid = snapshot.pid as libc::pid_t;
        // SAFETY: kill(2) has no memory-safety preconditions.
        if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                println!("idlewind (pid {}) is no longer running.", pid);
                return Ok(());
            }
            return Err(anyhow::anyhow!("Could not signal pid {}: {}", pid, err));
        }

        println!("Sent stop request to idlewind (pid {}).", pid);
        Ok(())
    }
}

pub fn render(snapshot: &StatusSnapshot, now: DateTime<Utc>) -> String {
    let mut lines = Vec::new();
    lines.push(format!("idlewind: {}", snapshot.state));
    lines.push("==========".to_string());
    lines.push(format!("  Idle:            {}", format_millis(snapshot.idle_ms)));

    if snapshot.state != DaemonState::Terminating {
        if snapshot.until_warning_ms() > 0 {
            lines.push(format!(
                "  Warning in:      {}",
                format_millis(snapshot.until_warning_ms())
            ));
        }
        lines.push(format!(
            "  Next movement:   {}",
            format_millis(snapshot.until_action_ms())
        ));
    }

    lines.push(format!("  Movements:       {}", snapshot.actions));
    lines.push(format!(
        "  Mode / probe:    {} / {}",
        snapshot.mode, snapshot.backend
    ));
    lines.push(format!("  Pid:             {}", snapshot.pid));
    lines.push(format!(
        "  Updated:         {}",
        snapshot.updated_at.with_timezone(&Local).format("%H:%M:%S")
    ));

    let age = now - snapshot.updated_at;
    if snapshot.state != DaemonState::Terminating && age.num_seconds() > STALE_AFTER_SECS {
        lines.push(format!(
            "  (stale for {}s, the daemon may have crashed)",
            age.num_seconds()
        ));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecMode, ProbeBackend};
    use chrono::TimeZone;
    use std::os::unix::process::ExitStatusExt;
    use std::process::{Child, Command};
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    fn snapshot(state: DaemonState) -> StatusSnapshot {
        StatusSnapshot {
            state,
            idle_ms: 45_000,
            warning_limit_ms: 30_000,
            action_threshold_ms: 100_000,
            mode: ExecMode::Batch,
            backend: ProbeBackend::Local,
            actions: 2,
            pid: 1234,
            updated_at: Utc.with_ymd_and_hms(2023, 1, 1, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_render_warning() {
        let snap = snapshot(DaemonState::Warning);
        let text = render(&snap, snap.updated_at);

        assert!(text.starts_with("idlewind: WARNING"));
        assert!(text.contains("Idle:            45s"));
        assert!(text.contains("Next movement:   55s"));
        assert!(!text.contains("Warning in"));
        assert!(text.contains("BATCH / local"));
        assert!(!text.contains("stale"));
    }

    #[test]
    fn test_render_stale() {
        let snap = snapshot(DaemonState::Safe);
        let text = render(&snap, snap.updated_at + chrono::Duration::seconds(60));
        assert!(text.contains("stale for 60s"));
    }

    #[test]
    fn test_render_stopped() {
        let snap = snapshot(DaemonState::Terminating);
        let text = render(&snap, snap.updated_at + chrono::Duration::seconds(600));

        assert!(text.starts_with("idlewind: STOPPED"));
        assert!(!text.contains("Next movement"));
        assert!(!text.contains("stale"));
    }

    fn daemon_stand_in(state_file: &StateFile) -> Result<Child> {
        let child = Command::new("sleep").arg("30").spawn()?;
        let mut snap = snapshot(DaemonState::Warning);
        snap.pid = child.id();
        snap.updated_at = Utc::now() - chrono::Duration::hours(1);
        state_file.save(&snap)?;
        Ok(child)
    }

    #[test]
    fn test_stop_ignores_pid_without_lock_holder() -> Result<()> {
        let dir = tempdir()?;
        let state_file = StateFile::in_dir(dir.path())?;
        let mut child = daemon_stand_in(&state_file)?;
        let lock_path = dir.path().join("idlewind.lock");
        // Left behind by a crashed daemon, nobody holds it.
        std::fs::write(&lock_path, "")?;

        Reporter::new(state_file, lock_path).stop()?;
        thread::sleep(Duration::from_millis(100));
        let alive = child.try_wait()?.is_none();
        child.kill()?;
        child.wait()?;

        assert!(alive);
        Ok(())
    }

    #[test]
    fn test_stop_without_lock_file() -> Result<()> {
        let dir = tempdir()?;
        let lock_path = dir.path().join("idlewind.lock");

        assert!(!daemon_running(&lock_path)?);
        Reporter::new(StateFile::in_dir(dir.path())?, lock_path).stop()?;

        Ok(())
    }

    #[test]
    fn test_stop_signals_lock_holder() -> Result<()> {
        let dir = tempdir()?;
        let state_file = StateFile::in_dir(dir.path())?;
        let mut child = daemon_stand_in(&state_file)?;
        let lock_path = dir.path().join("idlewind.lock");
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&lock_path)?;
        let mut lock = RwLock::new(lock_file);
        let _guard = lock.try_write()?;

        assert!(daemon_running(&lock_path)?);
        Reporter::new(state_file, lock_path.clone()).stop()?;

        let status = child.wait()?;
        assert_eq!(status.signal(), Some(libc::SIGTERM));
        Ok(())
    }
}
