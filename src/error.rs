use std::io;
use thiserror::Error;

/// Configuration that would break the ordering the scheduler relies on.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("min_action_ms ({min}) must be below max_action_ms ({max})")]
    ActionWindowEmpty { min: u64, max: u64 },

    #[error("min_action_ms ({min_action}) must exceed warning_limit_ms ({warning})")]
    ActionBelowWarning { min_action: u64, warning: u64 },

    #[error("Invalid range for {name}: min {min} is greater than max {max}")]
    InvalidRange {
        name: &'static str,
        min: f64,
        max: f64,
    },

    #[error("{name} must be positive")]
    NotPositive { name: &'static str },

    #[error("tick_interval_ms must be non-zero")]
    ZeroTickInterval,

    #[error("max_path_points must be non-zero")]
    ZeroPathCap,
}

/// Failures of the activity probe. None of these stop the daemon.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("No readable keyboard or pointer devices (is the user in the 'input' group?)")]
    NoDevices,

    #[error("Waiting for device input failed: {0}")]
    Wait(#[source] io::Error),

    #[error("Could not start the listener thread: {0}")]
    Thread(#[source] io::Error),

    #[error("Idle monitor query failed: {0}")]
    Query(String),

    #[error("Unexpected idle monitor reply: {0:?}")]
    Parse(String),
}

/// A single relative move that could not be injected.
#[derive(Debug, Error)]
pub enum InjectError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with status {code}")]
    ExitStatus { program: String, code: i32 },
}
