//! Event source adapters.
//!
//! - [`ManualPowerNotifier`] / [`ManualInputSource`]: fed programmatically
//!   (HTTP surface, tests).
//! - [`BacklightNotifier`]: polls a backlight brightness file; zero means
//!   the screen is off.
//! - [`DeviceInputSource`]: reads Linux evdev devices and reports one event
//!   per touch or key report.

use std::io::Read;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use coreplug_core::{InputEvent, PowerEvent};

use crate::collaborators::{Fanout, InputEventSource, PowerStateNotifier, SUBSCRIBER_BUFFER};
use crate::error::SourceError;

/// Power-state notifier driven by [`notify`](Self::notify).
#[derive(Default)]
pub struct ManualPowerNotifier {
    fanout: Fanout<PowerEvent>,
}

impl ManualPowerNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every subscriber. Returns the number reached.
    pub fn notify(&self, event: PowerEvent) -> usize {
        self.fanout.publish(event)
    }
}

impl PowerStateNotifier for ManualPowerNotifier {
    fn subscribe(&self) -> Result<mpsc::Receiver<PowerEvent>, SourceError> {
        Ok(self.fanout.subscribe())
    }
}

/// Input source driven by [`publish`](Self::publish).
#[derive(Default)]
pub struct ManualInputSource {
    fanout: Fanout<InputEvent>,
}

impl ManualInputSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self) -> usize {
        self.fanout.publish(InputEvent)
    }
}

impl InputEventSource for ManualInputSource {
    fn subscribe(&self) -> Result<mpsc::Receiver<InputEvent>, SourceError> {
        Ok(self.fanout.subscribe())
    }
}

/// Never delivers anything. Used when no input devices are configured.
pub struct NoInput;

impl InputEventSource for NoInput {
    fn subscribe(&self) -> Result<mpsc::Receiver<InputEvent>, SourceError> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }
}

// ── Backlight ──────────────────────────────────────────────────

pub const DEFAULT_BACKLIGHT_POLL: Duration = Duration::from_millis(500);

/// Polls a sysfs backlight `brightness` file and reports on/off edges.
pub struct BacklightNotifier {
    path: PathBuf,
    poll_interval: Duration,
}

impl BacklightNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: DEFAULT_BACKLIGHT_POLL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

fn read_screen_on(path: &Path) -> Result<bool, SourceError> {
    let raw = std::fs::read_to_string(path)?;
    let level: u64 = raw
        .trim()
        .parse()
        .map_err(|_| SourceError::Unavailable(format!("{}: not a brightness value", path.display())))?;
    Ok(level > 0)
}

impl PowerStateNotifier for BacklightNotifier {
    fn subscribe(&self) -> Result<mpsc::Receiver<PowerEvent>, SourceError> {
        let mut screen_on = read_screen_on(&self.path)
            .map_err(|e| SourceError::Unavailable(format!("{}: {e}", self.path.display())))?;

        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let path = self.path.clone();
        let poll_interval = self.poll_interval;
        info!(path = %path.display(), screen_on, "watching backlight");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                let now_on = match read_screen_on(&path) {
                    Ok(on) => on,
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "backlight read failed");
                        continue;
                    }
                };
                if now_on == screen_on {
                    continue;
                }
                screen_on = now_on;
                let event = if now_on {
                    PowerEvent::ScreenOn
                } else {
                    PowerEvent::ScreenOff
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            debug!(path = %path.display(), "backlight watcher stopped");
        });

        Ok(rx)
    }
}

// ── evdev ──────────────────────────────────────────────────────

/// `struct input_event` as laid out on the build target.
const INPUT_EVENT_SIZE: usize = std::mem::size_of::<libc::input_event>();
const TYPE_OFFSET: usize = std::mem::offset_of!(libc::input_event, type_);
/// Whole events fetched per read.
const READ_BATCH: usize = 64;
const EV_SYN: u16 = 0x00;
const EV_KEY: u16 = 0x01;
const EV_ABS: u16 = 0x03;

/// Reads raw evdev devices (`/dev/input/eventN`).
///
/// Devices are opened non-blocking and polled through the reactor, so a
/// reader holds no thread while idle. Readers stop when their subscriber
/// goes away, when the source is subscribed again, or when it is dropped.
pub struct DeviceInputSource {
    devices: Vec<PathBuf>,
    readers: Mutex<Vec<JoinHandle<()>>>,
}

impl DeviceInputSource {
    pub fn new(devices: Vec<PathBuf>) -> Self {
        Self {
            devices,
            readers: Mutex::new(Vec::new()),
        }
    }

    fn replace_readers(&self, next: Vec<JoinHandle<()>>) {
        let mut readers = self.readers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for handle in readers.drain(..) {
            handle.abort();
        }
        *readers = next;
    }
}

impl Drop for DeviceInputSource {
    fn drop(&mut self) {
        self.replace_readers(Vec::new());
    }
}

fn open_device(path: &Path) -> std::io::Result<AsyncFd<std::fs::File>> {
    let file = std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
        .open(path)?;
    AsyncFd::new(file)
}

impl InputEventSource for DeviceInputSource {
    fn subscribe(&self) -> Result<mpsc::Receiver<InputEvent>, SourceError> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut readers = Vec::new();

        for path in &self.devices {
            let fd = match open_device(path) {
                Ok(fd) => fd,
                Err(e) => {
                    warn!(device = %path.display(), error = %e, "cannot open input device");
                    continue;
                }
            };
            readers.push(tokio::spawn(read_device(path.clone(), fd, tx.clone())));
        }

        if readers.is_empty() {
            return Err(SourceError::Unavailable("no readable input device".to_string()));
        }
        info!(devices = readers.len(), "watching input devices");
        self.replace_readers(readers);
        Ok(rx)
    }
}

/// Emit one [`InputEvent`] per `EV_SYN` report that carried key or
/// absolute-axis activity.
async fn read_device(path: PathBuf, fd: AsyncFd<std::fs::File>, tx: mpsc::Sender<InputEvent>) {
    let mut buf = vec![0u8; INPUT_EVENT_SIZE * READ_BATCH];
    let mut active = false;
    loop {
        let mut guard = tokio::select! {
            _ = tx.closed() => break,
            ready = fd.readable() => match ready {
                Ok(guard) => guard,
                Err(e) => {
                    debug!(device = %path.display(), error = %e, "input device poll failed");
                    break;
                }
            },
        };
        let n = match guard.try_io(|inner| inner.get_ref().read(&mut buf)) {
            Ok(Ok(0)) => {
                debug!(device = %path.display(), "input device closed");
                break;
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                debug!(device = %path.display(), error = %e, "input device read failed");
                break;
            }
            Err(_would_block) => continue,
        };
        // evdev never splits an event across reads.
        for event in buf[..n].chunks_exact(INPUT_EVENT_SIZE) {
            match u16::from_ne_bytes([event[TYPE_OFFSET], event[TYPE_OFFSET + 1]]) {
                EV_KEY | EV_ABS => active = true,
                EV_SYN if active => {
                    active = false;
                    // A full buffer already holds an undelivered event.
                    if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(InputEvent) {
                        return;
                    }
                }
                _ => {}
            }
        }
    }
}
