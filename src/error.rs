//! The crate's error hierarchy.
//!
//! Kinds follow the error-handling design: *configuration* errors fail
//! before any Rewriter starts, *device-open* errors are tolerated
//! per-device, *device-I/O* errors are fatal for that device only, and
//! invariant violations abort the process rather than propagate (see
//! [`Error::Invariant`] and the `invariant!` macro in `rewriter`).

use std::path::PathBuf;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no compatible keyboard device found under /dev/input (try sudo?)")]
    NoDeviceFound,

    #[error("failed to open device {path}: {message}")]
    DeviceOpen { path: PathBuf, message: String },

    #[error("device I/O error on {device}: {message}")]
    DeviceIo { device: String, message: String },

    #[error("failed to create virtual output device {name}: {message}")]
    Uinput { name: String, message: String },

    #[error("failed to read log {path}: {message}")]
    LogRead { path: PathBuf, message: String },

    #[error("internal invariant violated: {0}")]
    Invariant(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn device_io(device: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Error::DeviceIo {
            device: device.into(),
            message: err.to_string(),
        }
    }
}
