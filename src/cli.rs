//! The command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "keychordd", about = "Combo-aware keyboard rewriter for Linux evdev")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List keyboard-looking devices under /dev/input.
    ListDevices,

    /// Grab one device and print each event in human-readable form.
    Print {
        /// Path to grab. If omitted, waits for the first keyboard-looking
        /// device to emit a key-up event and uses that one.
        device: Option<PathBuf>,
    },

    /// Grab one device and dump its raw event stream as CSV.
    Csv {
        device: Option<PathBuf>,
    },

    /// Parse a CSV event log and print the reconstructed events.
    CreateEventsFromCsv {
        csv_path: PathBuf,
    },

    /// Run the combo Rewriter against one or more grabbed devices.
    Combos {
        /// Path to the YAML combo table.
        config: PathBuf,
        /// Devices to grab. If none given, all detected keyboards are used.
        devices: Vec<PathBuf>,
        /// Emit a `|>>`-prefixed debug replay line for every rewritten event.
        #[arg(long)]
        debug: bool,
    },

    /// Replay a debug log's rewritten events through a fresh Rewriter.
    ReplayComboLog {
        config: PathBuf,
        log_path: PathBuf,
    },
}
