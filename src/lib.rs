//! Combo-aware keyboard rewriter: grabs a keyboard, recognises
//! multi-key chords, and republishes the transformed stream on a
//! cloned virtual device.

pub mod cli;
pub mod combo;
pub mod config;
pub mod coordinator;
pub mod csv;
pub mod device;
pub mod error;
pub mod event;
pub mod io;
pub mod keycode;
pub mod rewriter;

pub use combo::{Combo, ComboTable};
pub use error::{Error, Result};
pub use event::{Event, EventTime, KeyValue};
pub use rewriter::RewriterState;
