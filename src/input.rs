//! evdev listener feeding the [`ActivityClock`].

use crate::error::ProbeError;
use crate::probe::{ActivityClock, ProbeResult};
use evdev::{AttributeSetRef, Device, EventType, InputEvent, PropType};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const INPUT_DIR: &str = "/dev/input";
/// How often the listener looks for newly plugged devices.
const RESCAN_INTERVAL: Duration = Duration::from_secs(5);

// Linux input-event-codes.h
const BTN_MISC: u16 = 0x100;
const KEY_OK: u16 = 0x160;
const BTN_DPAD_UP: u16 = 0x220;
const BTN_DPAD_RIGHT: u16 = 0x223;
const BTN_TRIGGER_HAPPY: u16 = 0x2c0;
const REL_HWHEEL: u16 = 0x06;
const REL_WHEEL: u16 = 0x08;
const REL_WHEEL_HI_RES: u16 = 0x0b;
const REL_HWHEEL_HI_RES: u16 = 0x0c;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Key,
    PointerButton,
    PointerMotionRelative,
    PointerMotionAbsolute,
    PointerAxis,
}

fn is_button(code: u16) -> bool {
    (BTN_MISC..KEY_OK).contains(&code)
        || (BTN_DPAD_UP..=BTN_DPAD_RIGHT).contains(&code)
        || code >= BTN_TRIGGER_HAPPY
}

/// Maps a raw event to the kind of user activity it represents, if any.
pub fn classify(event: &InputEvent) -> Option<ActivityKind> {
    let code = event.code();
    match event.event_type() {
        EventType::KEY if is_button(code) => Some(ActivityKind::PointerButton),
        // Releases do not count as a key press.
        EventType::KEY if event.value() != 0 => Some(ActivityKind::Key),
        EventType::RELATIVE => match code {
            REL_WHEEL | REL_HWHEEL | REL_WHEEL_HI_RES | REL_HWHEEL_HI_RES => {
                Some(ActivityKind::PointerAxis)
            }
            _ => Some(ActivityKind::PointerMotionRelative),
        },
        EventType::ABSOLUTE => Some(ActivityKind::PointerMotionAbsolute),
        _ => None,
    }
}

/// Keyboards and pointers. Accelerometers also report EV_ABS, but they stream
/// readings on their own and would keep the user "active" forever.
fn is_activity_source(
    events: &AttributeSetRef<EventType>,
    properties: &AttributeSetRef<PropType>,
) -> bool {
    if properties.contains(PropType::ACCELEROMETER) {
        return false;
    }
    events.contains(EventType::KEY)
        || events.contains(EventType::RELATIVE)
        || events.contains(EventType::ABSOLUTE)
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fd belongs to an open evdev Device for the duration of the call.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

struct WatchedDevice {
    path: PathBuf,
    device: Device,
}

/// Opens event nodes it has not examined yet. A node that disappears is
/// forgotten, so a device re-plugged under the same name is opened again.
struct DeviceScanner {
    dir: PathBuf,
    seen: HashSet<PathBuf>,
}

impl DeviceScanner {
    fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seen: HashSet::new(),
        }
    }

    fn scan(&mut self) -> Vec<WatchedDevice> {
        let present = match event_nodes(&self.dir) {
            Ok(nodes) => nodes,
            Err(err) => {
                debug!(dir = %self.dir.display(), error = %err, "Listing input devices failed");
                return Vec::new();
            }
        };
        self.seen.retain(|path| present.contains(path));

        let mut opened = Vec::new();
        for path in present {
            if !self.seen.insert(path.clone()) {
                continue;
            }
            if let Some(device) = open_device(&path) {
                opened.push(WatchedDevice { path, device });
            }
        }
        opened
    }
}

fn event_nodes(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut nodes = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with("event") {
            nodes.push(entry.path());
        }
    }
    nodes.sort();
    Ok(nodes)
}

/// Opens `path` in non-blocking mode if it is a keyboard or pointer.
fn open_device(path: &Path) -> Option<Device> {
    let device = match Device::open(path) {
        Ok(device) => device,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "Cannot open input device");
            return None;
        }
    };
    if !is_activity_source(device.supported_events(), device.properties()) {
        return None;
    }
    if let Err(err) = set_nonblocking(device.as_raw_fd()) {
        debug!(path = %path.display(), error = %err, "Skipping device");
        return None;
    }
    debug!(
        path = %path.display(),
        name = device.name().unwrap_or("unknown"),
        "Watching input device"
    );
    Some(device)
}

/// Opens the devices and starts the listener thread. Returns how many devices
/// are being watched.
pub fn spawn_listener(clock: Arc<ActivityClock>) -> ProbeResult<usize> {
    let mut scanner = DeviceScanner::new(INPUT_DIR);
    let devices = scanner.scan();
    if devices.is_empty() {
        return Err(ProbeError::NoDevices);
    }
    let count = devices.len();

    thread::Builder::new()
        .name("activity-listener".into())
        .spawn(move || {
            if let Err(err) = listen(scanner, devices, &clock) {
                error!(error = %err, "Activity listener stopped, idle time is frozen");
            }
        })
        .map_err(ProbeError::Thread)?;

    Ok(count)
}

/// Blocks on device readiness and stamps the clock whenever a drained batch
/// contains user activity. Devices that hang up are closed; new ones are
/// picked up by a periodic rescan. Only returns on failure.
fn listen(
    mut scanner: DeviceScanner,
    mut devices: Vec<WatchedDevice>,
    clock: &ActivityClock,
) -> ProbeResult<()> {
    let mut last_scan = Instant::now();

    loop {
        let mut fds: Vec<libc::pollfd> = devices
            .iter()
            .map(|watched| libc::pollfd {
                fd: watched.device.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();
        let timeout =
            RESCAN_INTERVAL.saturating_sub(last_scan.elapsed()).as_millis() as libc::c_int;

        // SAFETY: `fds` is a valid, exclusively borrowed pollfd array.
        let ready = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(ProbeError::Wait(err));
        }

        let mut lost = Vec::new();
        for (index, (pfd, watched)) in fds.iter().zip(devices.iter_mut()).enumerate() {
            if pfd.revents & libc::POLLIN != 0 && drain(&mut watched.device) {
                clock.record_activity();
            }
            if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
                debug!(path = %watched.path.display(), "Input device went away");
                lost.push(index);
            }
        }
        if !lost.is_empty() {
            // Highest index first, so swap_remove never moves a lost device.
            for index in lost.into_iter().rev() {
                devices.swap_remove(index);
            }
            if devices.is_empty() {
                warn!("All input devices disconnected, waiting for new ones");
            }
        }

        if last_scan.elapsed() >= RESCAN_INTERVAL {
            let added = scanner.scan();
            if !added.is_empty() {
                info!(
                    added = added.len(),
                    watching = devices.len() + added.len(),
                    "New input devices"
                );
                devices.extend(added);
            }
            last_scan = Instant::now();
        }
    }
}

/// Reads everything pending on `device`. Returns true if any of it was user
/// activity.
fn drain(device: &mut Device) -> bool {
    let mut active = false;
    loop {
        match device.fetch_events() {
            Ok(events) => {
                for event in events {
                    active |= classify(&event).is_some();
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!(error = %err, "Reading input device failed");
                break;
            }
        }
    }
    active
}
