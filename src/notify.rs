use std::process::{Command, Stdio};
use std::thread;
use tracing::debug;

/// Desktop notification through `notify-send`. Fire and forget: the caller
/// never waits and a missing binary is only logged.
pub fn notify(title: &str, body: &str) {
    let spawned = Command::new("notify-send")
        .args(["--app-name=idlewind", title, body])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    match spawned {
        // Reaped off-thread so no zombie is left behind.
        Ok(mut child) => {
            thread::spawn(move || {
                let _ = child.wait();
            });
        }
        Err(err) => debug!(error = %err, "notify-send unavailable"),
    }
}
