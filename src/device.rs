//! Real device plumbing: enumeration, grabbing, and the uinput output
//! sink. Everything here adapts the `evdev`/`uinput`/`nix` crates to the
//! [`EventSource`]/[`EventSink`] traits so the rest of the crate never
//! has to know it's talking to a kernel device rather than a CSV file.

use std::os::fd::BorrowedFd;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use evdev::{Device, EventType};
use log::warn;

use crate::error::{Error, Result};
use crate::event::{Event, EventKind, EventTime};
use crate::io::{EventSink, EventSource};

/// How long `fetch_events` may block waiting for the next chunk before
/// we re-check whatever shutdown signal the caller is polling.
const EPOLL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Many devices emit `EV_KEY` (power buttons, lid switches, ...); what
/// sets a real keyboard apart is that it also emits `EV_REP` (autorepeat)
/// events. This is the same heuristic as device enumeration elsewhere
/// in this codebase, just reached through the `evdev` crate's typed
/// capability set instead of a raw type-code scan.
pub fn is_real_keyboard(device: &Device) -> bool {
    device
        .supported_events()
        .contains(EventType::REPEAT)
}

/// Enumerates `/dev/input/event*` and returns the path and name of
/// every device that looks like a real keyboard, for `list-devices` and
/// interactive device selection.
pub fn list_keyboards() -> Vec<(PathBuf, String)> {
    evdev::enumerate()
        .filter(|(_, dev)| is_real_keyboard(dev))
        .map(|(path, dev)| (path, dev.name().unwrap_or("unknown").to_string()))
        .collect()
}

/// Opens and grabs the device at `path` for exclusive access, and puts
/// its file descriptor in non-blocking mode so [`DeviceSource`] can poll
/// it with epoll instead of blocking forever in `fetch_events`.
pub fn open_and_grab(path: &Path) -> Result<Device> {
    let mut device = Device::open(path).map_err(|e| Error::DeviceOpen {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    device.grab().map_err(|e| Error::DeviceOpen {
        path: path.to_path_buf(),
        message: format!("grab failed: {e}"),
    })?;

    let raw_fd = device.as_raw_fd();
    set_nonblocking(raw_fd).map_err(|e| Error::DeviceOpen {
        path: path.to_path_buf(),
        message: format!("failed to set O_NONBLOCK: {e}"),
    })?;

    Ok(device)
}

fn set_nonblocking(raw_fd: std::os::fd::RawFd) -> std::result::Result<(), nix::Error> {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    let current = OFlag::from_bits_truncate(fcntl(raw_fd, FcntlArg::F_GETFL)?);
    fcntl(raw_fd, FcntlArg::F_SETFL(current | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// An [`EventSource`] backed by one grabbed, non-blocking evdev device.
/// Blocks in epoll between `fetch_events` calls so the reader thread
/// wakes periodically even with nothing to read, letting the owning
/// loop notice cancellation promptly.
pub struct DeviceSource {
    device: Device,
    name: String,
    epoll: nix::sys::epoll::Epoll,
}

impl DeviceSource {
    pub fn new(device: Device) -> Result<Self> {
        let name = device.name().unwrap_or("unknown").to_string();
        let epoll = nix::sys::epoll::Epoll::new(nix::sys::epoll::EpollCreateFlags::EPOLL_CLOEXEC)
            .map_err(|e| Error::device_io(&name, e))?;
        let raw_fd = device.as_raw_fd();
        let borrowed = unsafe { BorrowedFd::borrow_raw(raw_fd) };
        let ev = nix::sys::epoll::EpollEvent::new(nix::sys::epoll::EpollFlags::EPOLLIN, 0);
        epoll.add(borrowed, ev).map_err(|e| Error::device_io(&name, e))?;
        Ok(DeviceSource { device, name, epoll })
    }

    fn to_event(raw: evdev::InputEvent) -> Event {
        Event {
            time: EventTime::now(),
            kind: EventKind::from_raw_type(raw.event_type().0),
            code: raw.code(),
            value: raw.value(),
        }
    }
}

impl EventSource for DeviceSource {
    fn next_event(&mut self) -> Result<Option<Event>> {
        loop {
            match self.device.fetch_events() {
                Ok(events) => {
                    let mut iter = events.into_iter();
                    match iter.next() {
                        Some(first) => {
                            // fetch_events may hand back a batch; stash
                            // nothing here and rely on the kernel
                            // buffering the rest for the next call — the
                            // crate-level `Event` carries its own
                            // per-read timestamp via `EventTime::now()`.
                            let _ = iter;
                            return Ok(Some(Self::to_event(first)));
                        }
                        None => continue,
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    let mut epoll_events = [nix::sys::epoll::EpollEvent::empty(); 2];
                    let _ = self.epoll.wait(&mut epoll_events, EPOLL_POLL_INTERVAL);
                    continue;
                }
                Err(e) => return Err(Error::device_io(&self.name, e)),
            }
        }
    }
}

/// An [`EventSink`] backed by a cloned uinput device, built with the
/// same builder the teacher uses, generalised from a fixed Dvorak
/// keymap to whatever the Rewriter decides to write.
pub struct UinputSink {
    device: uinput::Device,
}

impl UinputSink {
    pub fn create(name: &str) -> Result<Self> {
        let device = uinput::default()
            .and_then(|b| b.name(name))
            .and_then(|b| b.event(uinput::event::Keyboard::All))
            .and_then(|b| b.create())
            .map_err(|e| Error::Uinput {
                name: name.to_string(),
                message: e.to_string(),
            })?;
        Ok(UinputSink { device })
    }
}

impl EventSink for UinputSink {
    fn write_one(&mut self, ev: Event) -> Result<()> {
        self.device
            .write(ev.kind.raw_type() as i32, ev.code as i32, ev.value)
            .map_err(|e| Error::DeviceIo {
                device: "uinput".to_string(),
                message: e.to_string(),
            })
    }
}

/// How long `find_device` waits for any candidate to produce a key-up
/// event before giving up.
const FIND_DEVICE_TIMEOUT: Duration = Duration::from_secs(30);

/// Interactive device discovery: opens every keyboard-looking device
/// read-only (not grabbed) and returns the path of whichever one first
/// emits a `KEY_*` up-event, for the common case of "run against
/// whatever I press next" instead of naming a path on the command
/// line. Used when no device is given to `print`/`csv`.
pub fn find_device() -> Result<PathBuf> {
    let candidates = list_keyboards();
    if candidates.is_empty() {
        return Err(Error::NoDeviceFound);
    }

    let (tx, rx) = std::sync::mpsc::channel();
    for (path, _name) in &candidates {
        let path = path.clone();
        let tx = tx.clone();
        std::thread::spawn(move || {
            let mut device = match Device::open(&path) {
                Ok(d) => d,
                Err(_) => return,
            };
            loop {
                match device.fetch_events() {
                    Ok(events) => {
                        for ev in events {
                            if ev.event_type() == EventType::KEY && ev.value() == 0 {
                                let _ = tx.send(path.clone());
                                return;
                            }
                        }
                    }
                    Err(_) => return,
                }
            }
        });
    }
    drop(tx);

    rx.recv_timeout(FIND_DEVICE_TIMEOUT)
        .map_err(|_| Error::NoDeviceFound)
}

/// `evdev::EventType::KEY`/`SYNCHRONIZATION` re-exported narrowly for
/// call sites that want to filter a raw `InputEvent` stream before it
/// reaches [`crate::event::Event`] (used by `print`/`csv` dumping).
pub fn is_key_event_type(t: EventType) -> bool {
    t == EventType::KEY
}
