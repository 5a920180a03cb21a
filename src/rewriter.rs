//! The combo recognizer.
//!
//! This is the heart of the crate: a stateful, timing-aware
//! man-in-the-middle that decides, for every incoming key event,
//! whether it belongs to an in-progress combo, a naturally-typed
//! sequence, or a stale swallow of a previously-fired combo. Everything
//! in here is synchronous and non-suspending; the only suspension
//! points live in the driver loops in `loop_drivers`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::combo::{Combo, ComboTable};
use crate::error::Result;
use crate::event::{Event, EventTime, KeyValue};
use crate::io::EventSink;
use crate::keycode::KeyCode;

/// Every key-down arms the deadline this far in the future.
pub const HOLD_TIMEOUT: Duration = Duration::from_millis(150);
/// Minimum gap between the last in-key-down and the first in-key-up for
/// a press to count as a chord rather than two sequential keystrokes.
pub const MIN_OVERLAP: Duration = Duration::from_millis(40);
/// Minimum time all in-keys must be simultaneously held before a combo
/// may commit its out-downs.
pub const MIN_HOLD_AGE: Duration = Duration::from_millis(140);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    NoMatch,
    NotFinished,
    AllDownSeen,
    AllDownSeenWritten,
    WriteUpKeys,
}

/// Per-device Rewriter state: the pending-event buffer, the
/// already-written-down-keys set, the swallow multiset, and the armed
/// deadline. Owned and mutated by exactly one task for the lifetime of
/// one grabbed device.
pub struct RewriterState {
    combos: Arc<ComboTable>,
    buf: Vec<Event>,
    down_written: HashSet<usize>,
    swallow: HashSet<KeyCode>,
    deadline: Option<EventTime>,
}

impl RewriterState {
    pub fn new(combos: Arc<ComboTable>) -> Self {
        let buf = Vec::with_capacity(combos.max_in_keys());
        RewriterState {
            combos,
            buf,
            down_written: HashSet::new(),
            swallow: HashSet::new(),
            deadline: None,
        }
    }

    /// The currently armed deadline, if any. `None` means the loop can
    /// block indefinitely (subject to its own shutdown-polling cadence).
    pub fn deadline(&self) -> Option<EventTime> {
        self.deadline
    }

    /// Handle one inbound event: a new key event, or a non-key/repeat
    /// event passed straight through. Every key down/up is unconditionally
    /// appended to the buffer — the only place a swallowed key ever gets
    /// consumed without being flushed is the same-code down/up shortcut
    /// inside `evaluate_and_decide`.
    pub fn on_event(&mut self, ev: Event, sink: &mut dyn EventSink) -> Result<()> {
        if !ev.is_key() || ev.key_value() == Some(KeyValue::Repeat) {
            return emit(ev, sink);
        }

        if ev.key_value() == Some(KeyValue::Down) {
            self.deadline = Some(ev.time.add(HOLD_TIMEOUT));
        }

        self.buf.push(ev);
        let result = self.evaluate_and_decide(ev.time, sink);
        self.clear_deadline_if_idle();
        result
    }

    /// Called when the armed deadline elapses (real timer tick, or the
    /// virtual clock noticing the next event's timestamp is past it).
    /// The deadline fires at most once per arming.
    pub fn on_timer(&mut self, deadline: EventTime, sink: &mut dyn EventSink) -> Result<()> {
        self.deadline = None;
        let result = self.evaluate_and_decide(deadline, sink);
        self.clear_deadline_if_idle();
        result
    }

    /// Write out every buffered event verbatim and clear all state. Used
    /// both mid-stream (no combo matches) and at end-of-stream. Not
    /// called on cancellation — the source device is being released
    /// there, not drained.
    pub fn flush(&mut self, sink: &mut dyn EventSink) -> Result<()> {
        let buf = std::mem::take(&mut self.buf);
        for ev in buf {
            emit(ev, sink)?;
        }
        self.deadline = None;
        Ok(())
    }

    fn clear_deadline_if_idle(&mut self) {
        if self.buf.is_empty() {
            self.deadline = None;
        }
    }

    fn evaluate_and_decide(&mut self, now: EventTime, sink: &mut dyn EventSink) -> Result<()> {
        // Same-code down/up with nothing else buffered: either this key
        // was left over from a combo that already fired (swallow it
        // silently, no flush) or it's an ordinary keystroke (flush it
        // verbatim). Checked before any per-combo evaluation, same as the
        // combo loop below.
        if self.buf.len() == 2 && self.buf[0].code == self.buf[1].code {
            let down_then_up =
                self.buf[0].key_value() == Some(KeyValue::Down) && self.buf[1].key_value() == Some(KeyValue::Up);
            if down_then_up {
                let code = KeyCode(self.buf[0].code);
                if self.swallow.remove(&code) {
                    debug!("swallowing stale release of {code}");
                    self.buf.clear();
                    self.deadline = None;
                    return Ok(());
                }
                debug!("single key press, flushing");
                return self.flush(sink);
            }
        }

        let verdicts: Vec<Verdict> = (0..self.combos.len())
            .map(|i| self.evaluate_combo(self.combos.get(i), now, i))
            .collect();

        if verdicts.iter().any(|v| *v == Verdict::WriteUpKeys) {
            for i in 0..verdicts.len() {
                if verdicts[i] == Verdict::WriteUpKeys {
                    self.commit_up(i, sink)?;
                }
            }
            return Ok(());
        }

        if verdicts.iter().any(|v| *v == Verdict::AllDownSeen) {
            for i in 0..verdicts.len() {
                if verdicts[i] == Verdict::AllDownSeen {
                    self.commit_down(i, sink)?;
                }
            }
            return Ok(());
        }

        if verdicts
            .iter()
            .any(|v| matches!(v, Verdict::NotFinished | Verdict::AllDownSeenWritten))
        {
            return Ok(());
        }

        // every combo is NoMatch
        self.flush(sink)
    }

    /// The per-combo evaluation algorithm: walk the buffer, reject on
    /// any foreign key, check the in-key prefix, then apply the overlap
    /// and hold-age tempo gates.
    fn evaluate_combo(&self, combo: &Combo, now: EventTime, idx: usize) -> Verdict {
        let mut seen_down: Vec<KeyCode> = Vec::new();
        let mut seen_up: Vec<KeyCode> = Vec::new();
        let mut last_down: Option<Event> = None;
        let mut first_up: Option<Event> = None;

        for &ev in &self.buf {
            let code = KeyCode(ev.code);
            if !combo.in_keys.contains(&code) {
                return Verdict::NoMatch;
            }
            match ev.key_value() {
                Some(KeyValue::Down) => {
                    last_down = Some(ev);
                    seen_down.push(code);
                }
                Some(KeyValue::Up) => {
                    if first_up.is_none() {
                        first_up = Some(ev);
                    }
                    seen_up.push(code);
                }
                _ => invariant("buffer must only ever hold key down/up events"),
            }
        }

        if seen_down.is_empty() {
            return Verdict::NoMatch;
        }

        for (i, key) in combo.in_keys.iter().enumerate() {
            if i >= seen_down.len() {
                return Verdict::NotFinished;
            }
            if seen_down[i] != *key {
                return Verdict::NoMatch;
            }
        }

        let last_down = last_down.expect("seen_down non-empty implies last_down is set");

        if let Some(first_up) = first_up {
            if last_down.time < first_up.time && last_down.code != first_up.code {
                let overlap = first_up.time.since(last_down.time);
                if overlap < MIN_OVERLAP {
                    return Verdict::NoMatch;
                }
            }
        }

        let age = now.since(last_down.time);
        if age < MIN_HOLD_AGE {
            return Verdict::NotFinished;
        }

        if !seen_up.is_empty() {
            return Verdict::WriteUpKeys;
        }
        if self.down_written.contains(&idx) {
            Verdict::AllDownSeenWritten
        } else {
            Verdict::AllDownSeen
        }
    }

    fn commit_down_keys(&mut self, combo: &Combo, time: EventTime, sink: &mut dyn EventSink) -> Result<()> {
        for &out in &combo.out_keys {
            emit(Event::key(time, out.code(), KeyValue::Down), sink)?;
        }
        Ok(())
    }

    fn commit_down(&mut self, idx: usize, sink: &mut dyn EventSink) -> Result<()> {
        let combo = self.combos.get(idx).clone();
        debug!("commit down: {combo}");
        let time = self.buf[0].time;
        self.commit_down_keys(&combo, time, sink)?;
        self.down_written.insert(idx);
        Ok(())
    }

    fn commit_up(&mut self, idx: usize, sink: &mut dyn EventSink) -> Result<()> {
        let combo = self.combos.get(idx).clone();
        debug!("commit up: {combo}");
        let time = self.buf[0].time;
        if !self.down_written.contains(&idx) {
            self.commit_down_keys(&combo, time, sink)?;
        }
        for &out in &combo.out_keys {
            emit(Event::key(time, out.code(), KeyValue::Up), sink)?;
        }
        self.down_written.remove(&idx);

        // Keys already released (their up-event is in the buffer) are
        // fully consumed here. Keys still physically held are not in the
        // buffer as up-events yet; expect one more release for them later
        // and swallow it silently instead of forwarding a stray keypress.
        let seen_up: Vec<KeyCode> = self
            .buf
            .iter()
            .filter(|e| combo.in_keys.contains(&KeyCode(e.code)) && e.key_value() == Some(KeyValue::Up))
            .map(|e| KeyCode(e.code))
            .collect();
        for &key in &combo.in_keys {
            if !seen_up.contains(&key) {
                self.swallow.insert(key);
            }
        }
        self.buf.retain(|e| !seen_up.contains(&KeyCode(e.code)));
        Ok(())
    }
}

/// Write one event to the sink, followed by a sync-report if it was a
/// key event. This is how every emitted key event — forwarded or
/// combo-generated — ends up framed for downstream consumers.
fn emit(ev: Event, sink: &mut dyn EventSink) -> Result<()> {
    sink.write_one(ev)?;
    if ev.is_key() {
        sink.write_one(Event::sync_report(ev.time))?;
    }
    Ok(())
}

/// Abort the process with a descriptive diagnostic. Used for conditions
/// the evaluator's own invariants rule out; reaching one means a logic
/// bug, not a recoverable runtime error.
fn invariant(message: &str) -> ! {
    panic!("keychord: internal invariant violated: {message}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::VecSink;
    use evdev::Key;

    fn kc(key: Key) -> KeyCode {
        KeyCode::from(key)
    }

    fn table(combos: Vec<(Vec<Key>, Vec<Key>)>) -> Arc<ComboTable> {
        let combos = combos
            .into_iter()
            .map(|(ins, outs)| {
                Combo::new(
                    ins.into_iter().map(kc).collect(),
                    outs.into_iter().map(kc).collect(),
                )
                .unwrap()
            })
            .collect();
        Arc::new(ComboTable::new(combos).unwrap())
    }

    fn t(ms: i64) -> EventTime {
        EventTime::new(ms / 1000, (ms % 1000) * 1000)
    }

    fn down(ms: i64, key: Key) -> Event {
        Event::key(t(ms), key.code(), KeyValue::Down)
    }

    fn up(ms: i64, key: Key) -> Event {
        Event::key(t(ms), key.code(), KeyValue::Up)
    }

    /// Drives the Rewriter purely through the virtual clock — see
    /// `io::run_with_trace` for the mechanics. This is what makes the
    /// scenario tests below deterministic without real time or threads.
    fn run_with_trace(combos: Arc<ComboTable>, trace: &[Event]) -> Vec<Event> {
        let mut state = RewriterState::new(combos);
        let mut sink = VecSink::default();
        crate::io::run_with_trace(&mut state, trace, &mut sink).unwrap();
        sink.into_inner()
    }

    fn keys_and_values(events: &[Event]) -> Vec<(u16, i32)> {
        events
            .iter()
            .filter(|e| e.is_key())
            .map(|e| (e.code, e.value))
            .collect()
    }

    #[test]
    fn scenario_1_plain_typing_no_match() {
        let combos = table(vec![
            (vec![Key::KEY_F, Key::KEY_J], vec![Key::KEY_X]),
            (vec![Key::KEY_F, Key::KEY_K], vec![Key::KEY_Y]),
        ]);
        let trace = vec![
            down(0, Key::KEY_B),
            up(20, Key::KEY_B),
            down(700, Key::KEY_F),
            up(720, Key::KEY_F),
            down(1100, Key::KEY_J),
            up(1110, Key::KEY_J),
            down(1800, Key::KEY_C),
            up(1900, Key::KEY_C),
        ];
        let out = run_with_trace(combos, &trace);
        assert_eq!(keys_and_values(&out), keys_and_values(&trace));
    }

    #[test]
    fn scenario_2_clean_chord_nested_release() {
        let combos = table(vec![(vec![Key::KEY_F, Key::KEY_J], vec![Key::KEY_X])]);
        let trace = vec![
            down(700, Key::KEY_F),
            down(720, Key::KEY_J),
            up(1100, Key::KEY_J),
            up(1110, Key::KEY_F),
        ];
        let out = run_with_trace(combos, &trace);
        assert_eq!(
            keys_and_values(&out),
            vec![
                (Key::KEY_X.code(), KeyValue::Down.to_raw()),
                (Key::KEY_X.code(), KeyValue::Up.to_raw()),
            ]
        );
    }

    #[test]
    fn scenario_3_crossed_release() {
        let combos = table(vec![(vec![Key::KEY_F, Key::KEY_J], vec![Key::KEY_X])]);
        let trace = vec![
            down(700, Key::KEY_F),
            down(720, Key::KEY_J),
            up(1100, Key::KEY_F),
            up(1110, Key::KEY_J),
        ];
        let out = run_with_trace(combos, &trace);
        assert_eq!(
            keys_and_values(&out),
            vec![
                (Key::KEY_X.code(), KeyValue::Down.to_raw()),
                (Key::KEY_X.code(), KeyValue::Up.to_raw()),
            ]
        );
    }

    #[test]
    fn scenario_4_short_overlap_is_not_a_chord() {
        let combos = table(vec![(vec![Key::KEY_F, Key::KEY_J], vec![Key::KEY_X])]);
        let trace = vec![
            down(0, Key::KEY_F),
            down(493, Key::KEY_J),
            up(513, Key::KEY_F),
            up(530, Key::KEY_J),
        ];
        let out = run_with_trace(combos, &trace);
        assert_eq!(keys_and_values(&out), keys_and_values(&trace));
    }

    #[test]
    fn scenario_5_two_chords_back_to_back_shared_prefix_held() {
        let combos = table(vec![
            (vec![Key::KEY_F, Key::KEY_J], vec![Key::KEY_X]),
            (vec![Key::KEY_F, Key::KEY_K], vec![Key::KEY_Y]),
        ]);
        let trace = vec![
            down(0, Key::KEY_F),
            down(100, Key::KEY_J),
            up(400, Key::KEY_J),
            down(600, Key::KEY_K),
            up(800, Key::KEY_K),
            up(1000, Key::KEY_F),
        ];
        let out = run_with_trace(combos, &trace);
        assert_eq!(
            keys_and_values(&out),
            vec![
                (Key::KEY_X.code(), KeyValue::Down.to_raw()),
                (Key::KEY_X.code(), KeyValue::Up.to_raw()),
                (Key::KEY_Y.code(), KeyValue::Down.to_raw()),
                (Key::KEY_Y.code(), KeyValue::Up.to_raw()),
            ]
        );
    }

    #[test]
    fn scenario_6_ordered_combos_distinguish_order() {
        let combos = table(vec![
            (vec![Key::KEY_F, Key::KEY_J], vec![Key::KEY_X]),
            (vec![Key::KEY_J, Key::KEY_F], vec![Key::KEY_A]),
        ]);
        let trace = vec![
            down(0, Key::KEY_F),
            down(20, Key::KEY_J),
            up(400, Key::KEY_F),
            up(410, Key::KEY_J),
            down(1000, Key::KEY_J),
            down(1020, Key::KEY_F),
            up(1400, Key::KEY_J),
            up(1410, Key::KEY_F),
        ];
        let out = run_with_trace(combos, &trace);
        assert_eq!(
            keys_and_values(&out),
            vec![
                (Key::KEY_X.code(), KeyValue::Down.to_raw()),
                (Key::KEY_X.code(), KeyValue::Up.to_raw()),
                (Key::KEY_A.code(), KeyValue::Down.to_raw()),
                (Key::KEY_A.code(), KeyValue::Up.to_raw()),
            ]
        );
    }

    #[test]
    fn scenario_7_single_key_press_is_flushed_immediately() {
        let combos = table(vec![(vec![Key::KEY_F, Key::KEY_J], vec![Key::KEY_X])]);
        let trace = vec![down(0, Key::KEY_F), up(120, Key::KEY_F)];
        let out = run_with_trace(combos, &trace);
        assert_eq!(keys_and_values(&out), keys_and_values(&trace));
    }

    #[test]
    fn every_emitted_key_event_is_followed_by_a_sync_report() {
        let combos = table(vec![(vec![Key::KEY_F, Key::KEY_J], vec![Key::KEY_X])]);
        let trace = vec![
            down(700, Key::KEY_F),
            down(720, Key::KEY_J),
            up(1100, Key::KEY_J),
            up(1110, Key::KEY_F),
        ];
        let out = run_with_trace(combos, &trace);
        let mut iter = out.iter().peekable();
        while let Some(ev) = iter.next() {
            if ev.is_key() {
                let next = iter.peek().expect("key event must be followed by something");
                assert!(!next.is_key(), "expected a sync-report after a key event");
            }
        }
    }

    #[test]
    fn buffer_empty_implies_deadline_cleared() {
        let combos = table(vec![(vec![Key::KEY_F, Key::KEY_J], vec![Key::KEY_X])]);
        let mut state = RewriterState::new(combos);
        let mut sink = VecSink::default();
        state.on_event(down(0, Key::KEY_B), &mut sink).unwrap();
        state.on_event(up(20, Key::KEY_B), &mut sink).unwrap();
        assert!(state.deadline().is_none());
    }
}
