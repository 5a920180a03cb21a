//! Multi-device orchestration.
//!
//! Each grabbed device gets its own [`RewriterState`], its own cloned
//! uinput sink, and its own thread. The combo table is the only thing
//! shared between them, by `Arc`. The coordinator's only job is to
//! notice the first fatal error and tell every other device's loop to
//! stop without flushing.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use log::{error, info, warn};

use crate::combo::ComboTable;
use crate::device::{open_and_grab, DeviceSource, UinputSink};
use crate::error::{Error, Result};
use crate::io;
use crate::rewriter::RewriterState;

const UINPUT_DEVICE_NAME: &str = "keychord";

/// One device's outcome, reported back to the coordinator when its
/// thread exits for any reason.
struct DeviceResult {
    path: PathBuf,
    result: Result<()>,
}

/// Grabs every device in `paths`, runs an independent Rewriter per
/// device against `combos`, and blocks until either all of them reach
/// end-of-stream, one fails, or `shutdown` is set by the caller (e.g. a
/// signal handler) — in every case the rest are cancelled. Devices that
/// fail to open are logged and skipped; if none open at all, returns
/// [`Error::NoDeviceFound`].
pub fn run_all(
    combos: Arc<ComboTable>,
    paths: &[PathBuf],
    debug: bool,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let cancel = shutdown;
    let (tx, rx) = mpsc::channel::<DeviceResult>();
    let mut running = 0usize;

    for path in paths {
        let device = match open_and_grab(path) {
            Ok(d) => d,
            Err(e) => {
                warn!("skipping {}: {e}", path.display());
                continue;
            }
        };

        let source = match DeviceSource::new(device) {
            Ok(s) => s,
            Err(e) => {
                warn!("skipping {}: {e}", path.display());
                continue;
            }
        };

        let sink = match UinputSink::create(UINPUT_DEVICE_NAME) {
            Ok(s) => s,
            Err(e) => {
                error!("failed to create uinput clone for {}: {e}", path.display());
                continue;
            }
        };

        info!("grabbed {}", path.display());
        let state = RewriterState::new(Arc::clone(&combos));
        let cancel = Arc::clone(&cancel);
        let tx = tx.clone();
        let path = path.clone();
        let thread_path = path.clone();

        std::thread::spawn(move || {
            let result = if debug {
                io::run(state, Box::new(io::DebugLoggingSource::new(source)), Box::new(sink), &cancel)
            } else {
                io::run(state, Box::new(source), Box::new(sink), &cancel)
            };
            let _ = tx.send(DeviceResult {
                path: thread_path,
                result,
            });
        });
        running += 1;
    }
    drop(tx);

    if running == 0 {
        return Err(Error::NoDeviceFound);
    }

    let mut first_error = None;
    for _ in 0..running {
        match rx.recv() {
            Ok(DeviceResult { path, result: Ok(()) }) => {
                info!("{} reached end of stream", path.display());
            }
            Ok(DeviceResult { path, result: Err(e) }) => {
                error!("{} failed: {e}", path.display());
                if first_error.is_none() {
                    cancel.store(true, Ordering::Relaxed);
                    first_error = Some(e);
                }
            }
            Err(_) => break,
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
