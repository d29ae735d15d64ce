use crate::error::ConfigError;
use crate::models::{ExecMode, ProbeBackend};
use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Inclusive-exclusive sampling range `[min, max)`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Bounds<T> {
    pub min: T,
    pub max: T,
}

impl<T> Bounds<T> {
    pub const fn new(min: T, max: T) -> Self {
        Self { min, max }
    }
}

impl Bounds<f64> {
    /// Uniform draw; a degenerate range yields `min`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.max > self.min {
            rng.gen_range(self.min..self.max)
        } else {
            self.min
        }
    }
}

impl Bounds<u64> {
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        if self.max > self.min {
            rng.gen_range(self.min..self.max)
        } else {
            self.min
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// Idle time after which the daemon reports a warning.
    pub warning_limit_ms: u64,
    pub min_action_ms: u64,
    pub max_action_ms: u64,
    pub tick_interval_ms: u64,
    /// Pause after a movement so the session can register it.
    pub settle_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            warning_limit_ms: 30_000,
            min_action_ms: 87_000,
            max_action_ms: 180_000,
            tick_interval_ms: 1_000,
            settle_delay_ms: 3_000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WindMouseConfig {
    pub speed: Bounds<f64>,
    pub gravity: Bounds<f64>,
    pub wind: Bounds<f64>,
    pub target_radius: Bounds<f64>,
    pub max_step: Bounds<f64>,
    pub max_path_points: usize,
    pub delay_us: Bounds<u64>,
    /// Targets are drawn from `[-target_range_px, target_range_px)` on each axis.
    pub target_range_px: f64,
}

impl Default for WindMouseConfig {
    fn default() -> Self {
        Self {
            speed: Bounds::new(26.0, 43.0),
            gravity: Bounds::new(3.0, 5.0),
            wind: Bounds::new(23.0, 78.0),
            target_radius: Bounds::new(3.0, 7.0),
            max_step: Bounds::new(2.0, 4.0),
            max_path_points: 1783,
            delay_us: Bounds::new(5_000, 15_000),
            target_range_px: 400.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ExecutorConfig {
    pub mode: ExecMode,
    pub batch_delay_us: u64,
    pub ydotool_path: String,
    pub ydotool_socket: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            mode: ExecMode::Batch,
            batch_delay_us: 5_000,
            ydotool_path: "ydotool".to_string(),
            ydotool_socket: Some("/tmp/.ydotool_socket".to_string()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub timing: TimingConfig,
    pub wind_mouse: WindMouseConfig,
    pub executor: ExecutorConfig,
    pub backend: ProbeBackend,
    pub notifications: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            wind_mouse: WindMouseConfig::default(),
            executor: ExecutorConfig::default(),
            backend: ProbeBackend::Local,
            notifications: true,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timing.validate()?;
        self.wind_mouse.validate()
    }
}

impl TimingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_action_ms >= self.max_action_ms {
            return Err(ConfigError::ActionWindowEmpty {
                min: self.min_action_ms,
                max: self.max_action_ms,
            });
        }
        if self.min_action_ms <= self.warning_limit_ms {
            return Err(ConfigError::ActionBelowWarning {
                min_action: self.min_action_ms,
                warning: self.warning_limit_ms,
            });
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::ZeroTickInterval);
        }
        Ok(())
    }
}

impl WindMouseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Speed divides the acceleration; gravity and max step must be able to
        // move the cursor at all, otherwise the path never converges.
        check_positive_range("speed", self.speed)?;
        check_positive_range("gravity", self.gravity)?;
        check_positive_range("max_step", self.max_step)?;
        check_range("wind", self.wind)?;
        check_range("target_radius", self.target_radius)?;
        if self.wind.min < 0.0 {
            return Err(ConfigError::NotPositive { name: "wind" });
        }
        if self.target_radius.min < 0.0 {
            return Err(ConfigError::NotPositive {
                name: "target_radius",
            });
        }
        if self.delay_us.min > self.delay_us.max {
            return Err(ConfigError::InvalidRange {
                name: "delay_us",
                min: self.delay_us.min as f64,
                max: self.delay_us.max as f64,
            });
        }
        if self.max_path_points == 0 {
            return Err(ConfigError::ZeroPathCap);
        }
        if self.target_range_px.is_nan() || self.target_range_px <= 0.0 {
            return Err(ConfigError::NotPositive {
                name: "target_range_px",
            });
        }
        Ok(())
    }
}

fn check_range(name: &'static str, bounds: Bounds<f64>) -> Result<(), ConfigError> {
    if !bounds.min.is_finite() || !bounds.max.is_finite() || bounds.min > bounds.max {
        return Err(ConfigError::InvalidRange {
            name,
            min: bounds.min,
            max: bounds.max,
        });
    }
    Ok(())
}

fn check_positive_range(name: &'static str, bounds: Bounds<f64>) -> Result<(), ConfigError> {
    check_range(name, bounds)?;
    if bounds.min <= 0.0 {
        return Err(ConfigError::NotPositive { name });
    }
    Ok(())
}

/// `~/.idlewind`, created on first use.
pub fn base_dir() -> Result<PathBuf> {
    let mut path =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
    path.push(".idlewind");
    if !path.exists() {
        fs::create_dir_all(&path)?;
    }
    Ok(path)
}

pub fn load_config() -> Result<Config> {
    load_from(&base_dir()?.join("config.json"))
}

/// Reads the config at `path`, writing the defaults there if it does not exist yet.
pub fn load_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        let config = Config::default();
        let data = serde_json::to_string_pretty(&config)?;
        fs::write(path, data)
            .with_context(|| format!("Could not write default config to {}", path.display()))?;
        return Ok(config);
    }

    let data = fs::read_to_string(path)
        .with_context(|| format!("Could not read config {}", path.display()))?;
    let config = serde_json::from_str(&data)
        .with_context(|| format!("Malformed config {}", path.display()))?;
    Ok(config)
}
