use crate::models::StatusSnapshot;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// The JSON status file other tools read (`~/.idlewind/state.json`).
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn in_dir(dir: &Path) -> Result<Self> {
        Self::from_path(dir.join("state.json"))
    }

    /// Creates the parent directory if needed.
    pub fn from_path(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Could not create state directory {}", parent.display())
            })?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<StatusSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&self.path)?;
        let snapshot = serde_json::from_str(&data)?;
        Ok(Some(snapshot))
    }

    /// Written to a temp file and renamed so readers never see half a snapshot.
    pub fn save(&self, snapshot: &StatusSnapshot) -> Result<()> {
        let data = serde_json::to_string_pretty(snapshot)?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DaemonState, ExecMode, ProbeBackend};
    use chrono::Utc;
    use tempfile::tempdir;

    fn snapshot(state: DaemonState) -> StatusSnapshot {
        StatusSnapshot {
            state,
            idle_ms: 42_000,
            warning_limit_ms: 30_000,
            action_threshold_ms: 99_000,
            mode: ExecMode::Smooth,
            backend: ProbeBackend::Local,
            actions: 3,
            pid: 4242,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_state_file_save_load() -> Result<()> {
        let dir = tempdir()?;
        let state_file = StateFile::in_dir(dir.path())?;

        state_file.save(&snapshot(DaemonState::Warning))?;
        state_file.save(&snapshot(DaemonState::Terminating))?;

        let loaded = state_file.load()?.expect("snapshot written");
        assert_eq!(loaded.state, DaemonState::Terminating);
        assert_eq!(loaded.mode, ExecMode::Smooth);
        assert_eq!(loaded.pid, 4242);
        assert!(!state_file.path().with_extension("tmp").exists());

        Ok(())
    }

    #[test]
    fn test_state_file_load_nonexistent() -> Result<()> {
        let dir = tempdir()?;
        let state_file = StateFile::from_path(dir.path().join("nested").join("state.json"))?;

        assert!(state_file.load()?.is_none());
        assert!(dir.path().join("nested").is_dir());

        Ok(())
    }

    #[test]
    fn test_state_file_unusable_parent() -> Result<()> {
        let dir = tempdir()?;
        let blocker = dir.path().join("occupied");
        fs::write(&blocker, "not a directory")?;

        assert!(StateFile::from_path(blocker.join("state.json")).is_err());

        Ok(())
    }
}
