//! The CSV interchange format.
//!
//! One event per line: `secs;micros;type-name;code-name;value`, e.g.
//! `0;20000;EV_KEY;KEY_F;down`. Blank lines and lines starting with `#`
//! are comments and are skipped on read. A debug replay log additionally
//! carries lines prefixed `|>>` — those are the raw inbound events a
//! Rewriter run with `--debug` saw, logged before evaluation, so a
//! captured session can be re-driven through a fresh Rewriter offline;
//! `read_replay_log` pulls out just that half.

use std::io::{BufRead, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::event::{Event, EventKind, EventTime, KeyValue, EV_MSC, MSC_SCAN, SYN_REPORT};
use crate::keycode::{self, KeyCode};

const REPLAY_PREFIX: &str = "|>>";

/// The kernel macro name for `ev`'s code, as written in the CSV
/// interchange format's `code-name` column: `KEY_*` for key events,
/// `SYN_REPORT` for the sync marker, `MSC_SCAN` for scancode echoes.
fn code_name(ev: &Event) -> String {
    match ev.kind {
        EventKind::Key => keycode::canonical_name(KeyCode(ev.code)),
        EventKind::Sync if ev.code == SYN_REPORT => "SYN_REPORT".to_string(),
        EventKind::Sync => format!("SYN_{}", ev.code),
        EventKind::Other(t) if t == EV_MSC && ev.code == MSC_SCAN => "MSC_SCAN".to_string(),
        EventKind::Other(_) => format!("CODE_{}", ev.code),
    }
}

/// The inverse of [`code_name`]: parses a `code-name` column value back
/// into a raw scancode, given the type it was already parsed against.
fn parse_code_name(kind: EventKind, name: &str, line: &str) -> Result<u16> {
    match kind {
        EventKind::Key => keycode::parse_canonical_name(name)
            .map(|k| k.code())
            .ok_or_else(|| Error::Invariant(format!("unknown key name {name:?} in csv line: {line:?}"))),
        EventKind::Sync if name == "SYN_REPORT" => Ok(SYN_REPORT),
        EventKind::Sync => name
            .strip_prefix("SYN_")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| Error::Invariant(format!("unknown sync code name {name:?} in csv line: {line:?}"))),
        EventKind::Other(t) if t == EV_MSC && name == "MSC_SCAN" => Ok(MSC_SCAN),
        EventKind::Other(_) => name
            .strip_prefix("CODE_")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| Error::Invariant(format!("unknown code name {name:?} in csv line: {line:?}"))),
    }
}

/// The `value` column: `up`/`down`/`repeat` for key events, the raw
/// signed integer for anything else (sync markers and misc echoes carry
/// no such vocabulary).
fn value_str(ev: &Event) -> String {
    match ev.key_value() {
        Some(v) => v.as_str().to_string(),
        None => ev.value.to_string(),
    }
}

/// Serializes one event as one CSV line, without a trailing newline:
/// `seconds;microseconds;type-name;code-name;value`.
pub fn format_event(ev: &Event) -> String {
    format!(
        "{};{};{};{};{}",
        ev.time.secs(),
        ev.time.micros(),
        ev.kind.type_name(),
        code_name(ev),
        value_str(ev)
    )
}

/// Parses one CSV line (no `#`/`|>>` prefix, no surrounding whitespace)
/// into an [`Event`].
pub fn parse_event_line(line: &str) -> Result<Event> {
    let fields: Vec<&str> = line.split(';').collect();
    if fields.len() != 5 {
        return Err(Error::Invariant(format!(
            "malformed csv line, expected 5 fields, got {}: {line:?}",
            fields.len()
        )));
    }
    let secs: i64 = fields[0]
        .trim()
        .parse()
        .map_err(|_| Error::Invariant(format!("malformed secs in csv line: {line:?}")))?;
    let micros: i64 = fields[1]
        .trim()
        .parse()
        .map_err(|_| Error::Invariant(format!("malformed micros in csv line: {line:?}")))?;
    let kind = EventKind::parse_type_name(fields[2].trim())
        .ok_or_else(|| Error::Invariant(format!("unknown type name {:?} in csv line: {line:?}", fields[2])))?;
    let code = parse_code_name(kind, fields[3].trim(), line)?;
    let value = match fields[4].trim() {
        "up" => KeyValue::Up.to_raw(),
        "down" => KeyValue::Down.to_raw(),
        "repeat" => KeyValue::Repeat.to_raw(),
        other => other
            .parse()
            .map_err(|_| Error::Invariant(format!("malformed value {other:?} in csv line: {line:?}")))?,
    };
    Ok(Event {
        time: EventTime::new(secs, micros),
        kind,
        code,
        value,
    })
}

/// Writes `events` to `w` in CSV interchange format, one per line.
pub fn write_events(w: &mut dyn Write, events: &[Event]) -> Result<()> {
    for ev in events {
        writeln!(w, "{}", format_event(ev))?;
    }
    Ok(())
}

/// Reads a plain (non-replay) CSV event file: comments and blank lines
/// are skipped, everything else must parse as an event line.
pub fn read_events(path: &Path) -> Result<Vec<Event>> {
    let file = std::fs::File::open(path).map_err(|e| Error::LogRead {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let reader = std::io::BufReader::new(file);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| Error::LogRead {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        events.push(parse_event_line(line)?);
    }
    Ok(events)
}

/// Reads a debug replay log (as produced with `combos --debug`) and
/// returns only the `|>>`-prefixed lines — the raw inbound events the
/// Rewriter saw — in order, stripped of their prefix and parsed. Used
/// by `replay-combo-log` to re-drive the same input through a fresh
/// Rewriter offline.
pub fn read_replay_log(path: &Path) -> Result<Vec<Event>> {
    let file = std::fs::File::open(path).map_err(|e| Error::LogRead {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let reader = std::io::BufReader::new(file);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| Error::LogRead {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if let Some(rest) = line.strip_prefix(REPLAY_PREFIX) {
            events.push(parse_event_line(rest.trim())?);
        }
    }
    Ok(events)
}

/// Formats one event as a `|>>`-prefixed replay log line, for a debug
/// run that wants to capture every inbound event before it's evaluated.
pub fn format_replay_line(ev: &Event) -> String {
    format!("{REPLAY_PREFIX}{}", format_event(ev))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::KeyValue;
    use evdev::Key;

    #[test]
    fn roundtrips_a_key_event() {
        let ev = Event::key(EventTime::new(12, 345), Key::KEY_F.code(), KeyValue::Down);
        let line = format_event(&ev);
        assert_eq!(line, "12;345;EV_KEY;KEY_F;down");
        assert_eq!(parse_event_line(&line).unwrap(), ev);
    }

    #[test]
    fn roundtrips_a_sync_report() {
        let ev = Event::sync_report(EventTime::new(0, 0));
        let line = format_event(&ev);
        assert_eq!(line, "0;0;EV_SYN;SYN_REPORT;0");
        assert_eq!(parse_event_line(&line).unwrap(), ev);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_event_line("1;2;3").is_err());
        assert!(parse_event_line("a;2;EV_KEY;KEY_F;down").is_err());
        assert!(parse_event_line("0;0;EV_KEY;KEY_NOT_A_KEY;down").is_err());
    }

    #[test]
    fn read_events_skips_comments_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.csv");
        std::fs::write(
            &path,
            "# a comment\n\n0;0;EV_KEY;KEY_F;down\n0;20000;EV_KEY;KEY_F;up\n",
        )
        .unwrap();
        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn replay_log_extracts_only_prefixed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.log");
        let ev = Event::key(EventTime::new(1, 0), Key::KEY_F.code(), KeyValue::Down);
        let contents = format!("0;0;EV_KEY;KEY_F;down\n{}\n# comment\n", format_replay_line(&ev));
        std::fs::write(&path, contents).unwrap();
        let events = read_replay_log(&path).unwrap();
        assert_eq!(events, vec![ev]);
    }
}
