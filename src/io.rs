//! Event sources and sinks, and the two loop drivers built on them.
//!
//! `run()` drives a live device: a reader thread blocks in
//! `fetch_events()` and forwards onto an `mpsc` channel, while this
//! thread owns the [`RewriterState`] and services both the channel and
//! the armed deadline with `recv_timeout`. `run_with_trace()` drives the
//! same state machine against an in-memory trace with a virtual clock,
//! so the scenario tests in `rewriter` are byte-for-byte deterministic
//! without needing real time to pass.

use std::sync::mpsc;
use std::time::Duration;

use log::{info, warn};

use crate::error::{Error, Result};
use crate::event::Event;
use crate::rewriter::RewriterState;

/// Where incoming events come from. Implemented by the real evdev
/// device reader and by in-memory/CSV replay sources in tests and the
/// `replay-combo-log`/`create-events-from-csv` subcommands.
pub trait EventSource {
    /// Blocks until the next event is available, or returns `Ok(None)`
    /// at end of stream. A fatal I/O error ends the device's Rewriter
    /// but does not otherwise unwind the process.
    fn next_event(&mut self) -> Result<Option<Event>>;
}

/// Where outgoing events are written. Implemented by the uinput sink,
/// and by [`VecSink`] for tests and the `print`/`csv` subcommands.
pub trait EventSink {
    fn write_one(&mut self, ev: Event) -> Result<()>;
}

/// An in-memory sink that simply records everything written to it, in
/// order. Used by the deterministic trace-driven tests and by any
/// subcommand that wants to inspect the rewritten stream without
/// opening a uinput device.
#[derive(Debug, Default)]
pub struct VecSink(Vec<Event>);

impl VecSink {
    pub fn into_inner(self) -> Vec<Event> {
        self.0
    }
}

impl EventSink for VecSink {
    fn write_one(&mut self, ev: Event) -> Result<()> {
        self.0.push(ev);
        Ok(())
    }
}

/// A fixed, pre-recorded sequence of events played back with no virtual
/// clock involved — each call to `next_event` returns the next item
/// immediately. Useful for unit tests that don't care about deadline
/// timing at all.
#[derive(Debug, Default)]
pub struct VecSource {
    events: std::collections::VecDeque<Event>,
}

impl VecSource {
    pub fn new(events: Vec<Event>) -> Self {
        VecSource {
            events: events.into(),
        }
    }
}

impl EventSource for VecSource {
    fn next_event(&mut self) -> Result<Option<Event>> {
        Ok(self.events.pop_front())
    }
}

/// Drives a [`RewriterState`] against a fixed trace using a purely
/// virtual clock: before each event we fire any deadline the trace has
/// already passed, then feed the event itself; at end of stream we
/// flush whatever remains buffered. No wall-clock sleeping occurs, so
/// this runs instantly regardless of the millisecond gaps in the trace.
pub fn run_with_trace(state: &mut RewriterState, trace: &[Event], sink: &mut dyn EventSink) -> Result<()> {
    for &ev in trace {
        if let Some(deadline) = state.deadline() {
            if ev.time > deadline {
                state.on_timer(deadline, sink)?;
            }
        }
        state.on_event(ev, sink)?;
    }
    state.flush(sink)
}

/// One message from a device's reader thread to the owning Rewriter
/// loop: either a forwarded event, or news that the device is done
/// (EOF, or a fatal read error).
enum ReaderMsg {
    Event(Event),
    Eof,
    Err(Error),
}

/// Spawns a reader thread pulling from `source` and forwards every
/// event onto `tx`. Runs until `source` returns `Ok(None)` or errors;
/// either way the channel is told so the owning loop can stop waiting
/// on it. The thread does not touch Rewriter state itself — that stays
/// single-threaded in the caller of [`run`].
fn spawn_reader(mut source: Box<dyn EventSource + Send>, tx: mpsc::Sender<ReaderMsg>) {
    std::thread::spawn(move || loop {
        match source.next_event() {
            Ok(Some(ev)) => {
                if tx.send(ReaderMsg::Event(ev)).is_err() {
                    return;
                }
            }
            Ok(None) => {
                let _ = tx.send(ReaderMsg::Eof);
                return;
            }
            Err(e) => {
                let _ = tx.send(ReaderMsg::Err(e));
                return;
            }
        }
    });
}

/// The production loop for one grabbed device: reads events from
/// `source` on a dedicated thread, rewrites them through `state`, and
/// writes the result to `sink`, using the real wall clock to service
/// the Rewriter's armed deadlines. Returns once the source reaches EOF
/// (after a final flush) or `cancel` fires (no flush — see module
/// docs on cancellation semantics).
pub fn run(
    mut state: RewriterState,
    source: Box<dyn EventSource + Send>,
    mut sink: Box<dyn EventSink + Send>,
    cancel: &std::sync::atomic::AtomicBool,
) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    spawn_reader(source, tx);

    loop {
        if cancel.load(std::sync::atomic::Ordering::Relaxed) {
            info!("device loop cancelled, dropping without flush");
            return Ok(());
        }

        let timeout = match state.deadline() {
            Some(deadline) => deadline.saturating_duration_until(crate::event::EventTime::now()),
            None => Duration::from_millis(200),
        };

        match rx.recv_timeout(timeout) {
            Ok(ReaderMsg::Event(ev)) => {
                state.on_event(ev, sink.as_mut())?;
            }
            Ok(ReaderMsg::Eof) => {
                info!("device reached end of stream, flushing");
                state.flush(sink.as_mut())?;
                return Ok(());
            }
            Ok(ReaderMsg::Err(e)) => {
                warn!("device read error: {e}");
                return Err(e);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if let Some(deadline) = state.deadline() {
                    if crate::event::EventTime::now() >= deadline {
                        state.on_timer(deadline, sink.as_mut())?;
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                info!("reader thread gone, flushing");
                state.flush(sink.as_mut())?;
                return Ok(());
            }
        }
    }
}

/// Wraps a source and logs every event it yields at `debug` level as a
/// `|>>`-prefixed replay line before returning it, so a `combos
/// --debug` run can be captured and later re-driven offline with
/// `replay-combo-log`.
pub struct DebugLoggingSource<S> {
    inner: S,
}

impl<S> DebugLoggingSource<S> {
    pub fn new(inner: S) -> Self {
        DebugLoggingSource { inner }
    }
}

impl<S: EventSource> EventSource for DebugLoggingSource<S> {
    fn next_event(&mut self) -> Result<Option<Event>> {
        let ev = self.inner.next_event()?;
        if let Some(ev) = ev {
            log::debug!("{}", crate::csv::format_replay_line(&ev));
        }
        Ok(ev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_source_yields_events_then_none() {
        let ev = Event::sync_report(crate::event::EventTime::new(0, 0));
        let mut source = VecSource::new(vec![ev]);
        assert_eq!(source.next_event().unwrap(), Some(ev));
        assert_eq!(source.next_event().unwrap(), None);
    }

    #[test]
    fn vec_sink_records_in_order() {
        let mut sink = VecSink::default();
        let e1 = Event::sync_report(crate::event::EventTime::new(0, 0));
        let e2 = Event::sync_report(crate::event::EventTime::new(1, 0));
        sink.write_one(e1).unwrap();
        sink.write_one(e2).unwrap();
        assert_eq!(sink.into_inner(), vec![e1, e2]);
    }
}
