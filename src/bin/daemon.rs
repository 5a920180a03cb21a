//! `keychordd` — the command-line entry point.
//!
//! Thin dispatch over the library: parse the subcommand, wire up
//! sources/sinks, and flatten any error to one diagnostic line and a
//! non-zero exit code, matching the pattern the rest of this codebase
//! uses for fatal failures.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use evdev::{EventType, Key};
use log::info;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::flag;

use keychord::cli::{Cli, Command};
use log::LevelFilter;
use keychord::config::load_combo_table;
use keychord::coordinator::run_all;
use keychord::csv as csv_fmt;
use keychord::device;
use keychord::error::{Error, Result};
use keychord::event::{Event, EventKind, EventTime, KeyValue};

fn main() {
    let cli = Cli::parse();
    init_logger(&cli);

    if let Err(e) = run(cli) {
        eprintln!("keychordd: {e}");
        std::process::exit(1);
    }
}

/// `--debug` must turn on the replay log by itself, without the caller
/// also having to set `RUST_LOG` out of band. `RUST_LOG`, if set, still
/// wins for whatever modules/levels it names.
fn init_logger(cli: &Cli) {
    let mut builder = env_logger::Builder::from_default_env();
    if matches!(cli.command, Command::Combos { debug: true, .. }) {
        builder.filter_level(LevelFilter::Debug);
    }
    builder.init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::ListDevices => list_devices(),
        Command::Print { device } => print_events(device),
        Command::Csv { device } => dump_csv(device),
        Command::CreateEventsFromCsv { csv_path } => create_events_from_csv(&csv_path),
        Command::Combos { config, devices, debug } => run_combos(&config, devices, debug),
        Command::ReplayComboLog { config, log_path } => replay_combo_log(&config, &log_path),
    }
}

fn list_devices() -> Result<()> {
    for (path, name) in device::list_keyboards() {
        println!("{}\t{}", path.display(), name);
    }
    Ok(())
}

fn resolve_device(path: Option<PathBuf>) -> Result<PathBuf> {
    match path {
        Some(p) => Ok(p),
        None => {
            info!("no device given, waiting for a key press to pick one");
            device::find_device()
        }
    }
}

/// How long `print` waits with no events before exiting.
const PRINT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// A second `x` within this long of the first counts as the exit
/// double-tap.
const DOUBLE_TAP_WINDOW: Duration = Duration::from_millis(500);

fn print_events(path: Option<PathBuf>) -> Result<()> {
    let path = resolve_device(path)?;
    let raw = device::open_and_grab(&path)?;
    let mut source = device::DeviceSource::new(raw)?;
    let mut down_at: std::collections::HashMap<u16, EventTime> = std::collections::HashMap::new();
    let mut last_x_down: Option<EventTime> = None;

    loop {
        let ev = match recv_with_idle_timeout(&mut source, PRINT_IDLE_TIMEOUT)? {
            Some(ev) => ev,
            None => {
                println!("(idle timeout, exiting)");
                return Ok(());
            }
        };
        if !ev.is_key() {
            continue;
        }
        let name = keychord::keycode::KeyCode(ev.code).to_string();
        match ev.key_value() {
            Some(KeyValue::Down) => {
                if let Some(&prev) = down_at.get(&ev.code) {
                    println!("{name}\u{2193} (overlap {:?})", ev.time.since(prev));
                } else {
                    println!("{name}\u{2193}");
                }
                down_at.insert(ev.code, ev.time);

                if ev.code == Key::KEY_X.code() {
                    if let Some(prev) = last_x_down {
                        if ev.time.since(prev) <= DOUBLE_TAP_WINDOW {
                            println!("(double-tap x, exiting)");
                            return Ok(());
                        }
                    }
                    last_x_down = Some(ev.time);
                }
            }
            Some(KeyValue::Up) => {
                down_at.remove(&ev.code);
                println!("{name}\u{2191}");
            }
            _ => {}
        }
    }
}

fn recv_with_idle_timeout(
    source: &mut device::DeviceSource,
    idle: Duration,
) -> Result<Option<Event>> {
    // `DeviceSource::next_event` already blocks internally with its own
    // short epoll poll; we bound the total wait by wall-clock instead of
    // plumbing a timeout through the trait, since only this subcommand
    // needs one.
    let deadline = EventTime::now().add(idle);
    loop {
        let ev = source.next_event()?;
        if let Some(ev) = ev {
            return Ok(Some(ev));
        }
        if EventTime::now() >= deadline {
            return Ok(None);
        }
    }
}

fn dump_csv(path: Option<PathBuf>) -> Result<()> {
    let path = resolve_device(path)?;
    let raw = device::open_and_grab(&path)?;
    let mut source = device::DeviceSource::new(raw)?;
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    loop {
        match source.next_event()? {
            Some(ev) => {
                if should_skip_for_csv(&ev) {
                    continue;
                }
                writeln!(handle, "{}", csv_fmt::format_event(&ev)).map_err(Error::from)?;
            }
            None => return Ok(()),
        }
    }
}

fn should_skip_for_csv(ev: &Event) -> bool {
    matches!(ev.kind, EventKind::Sync) || ev.kind.raw_type() == EventType::MISC.0
}

fn create_events_from_csv(path: &std::path::Path) -> Result<()> {
    let events = csv_fmt::read_events(path)?;
    for ev in &events {
        println!("{ev}");
    }
    Ok(())
}

fn run_combos(config: &std::path::Path, devices: Vec<PathBuf>, debug: bool) -> Result<()> {
    let combos = Arc::new(load_combo_table(config)?);
    let devices = if devices.is_empty() {
        device::list_keyboards().into_iter().map(|(p, _)| p).collect()
    } else {
        devices
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    if let Err(e) = flag::register(SIGTERM, Arc::clone(&shutdown)) {
        log::warn!("failed to register SIGTERM handler: {e}");
    }
    if let Err(e) = flag::register(SIGINT, Arc::clone(&shutdown)) {
        log::warn!("failed to register SIGINT handler: {e}");
    }

    run_all(combos, &devices, debug, shutdown)
}

fn replay_combo_log(config: &std::path::Path, log_path: &std::path::Path) -> Result<()> {
    let combos = Arc::new(load_combo_table(config)?);
    let trace = csv_fmt::read_replay_log(log_path)?;
    let mut state = keychord::RewriterState::new(combos);
    let mut sink = keychord::io::VecSink::default();
    keychord::io::run_with_trace(&mut state, &trace, &mut sink)?;
    for ev in sink.into_inner() {
        println!("{ev}");
    }
    Ok(())
}
