//! The event value type the whole crate is built around.
//!
//! Events are copied freely; nothing in this crate keeps a reference back
//! into device- or reader-owned memory. A [`Event`] is a plain snapshot of
//! one evdev-style input event: a timestamp, a type, a code and a value.

use std::fmt;
use std::time::Duration;

/// Wall-clock timestamp with microsecond resolution, matching the
/// `seconds;microseconds` pair used by the CSV interchange format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventTime {
    secs: i64,
    micros: i64,
}

impl EventTime {
    pub const fn new(secs: i64, micros: i64) -> Self {
        EventTime { secs, micros }
    }

    pub const fn secs(&self) -> i64 {
        self.secs
    }

    pub const fn micros(&self) -> i64 {
        self.micros
    }

    fn as_micros_since_epoch(&self) -> i128 {
        self.secs as i128 * 1_000_000 + self.micros as i128
    }

    /// Duration elapsed between `earlier` and `self`. `self` must not be
    /// before `earlier` — that would mean a caller fed us events out of
    /// order, which is an invariant violation, not a recoverable error.
    pub fn since(&self, earlier: EventTime) -> Duration {
        let diff = self.as_micros_since_epoch() - earlier.as_micros_since_epoch();
        assert!(
            diff >= 0,
            "EventTime::since: {self:?} is not after {earlier:?}"
        );
        Duration::from_micros(diff as u64)
    }

    /// Like [`Self::since`] but saturates at zero instead of panicking,
    /// for scheduling code that only cares "how long until then".
    pub fn saturating_duration_until(&self, from: EventTime) -> Duration {
        if *self <= from {
            Duration::ZERO
        } else {
            self.since(from)
        }
    }

    pub fn add(&self, d: Duration) -> EventTime {
        let total = self.as_micros_since_epoch() + d.as_micros() as i128;
        EventTime::new((total / 1_000_000) as i64, (total % 1_000_000) as i64)
    }

    /// The current wall-clock time, used by the real (non-virtual) loop.
    pub fn now() -> EventTime {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        EventTime::new(now.as_secs() as i64, now.subsec_micros() as i64)
    }
}

/// One byte saying whether an event was a key-down, key-up, or
/// autorepeat. Mirrors the evdev EV_KEY value space (0/1/2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyValue {
    Up,
    Down,
    Repeat,
}

impl KeyValue {
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(KeyValue::Up),
            1 => Some(KeyValue::Down),
            2 => Some(KeyValue::Repeat),
            _ => None,
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            KeyValue::Up => 0,
            KeyValue::Down => 1,
            KeyValue::Repeat => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KeyValue::Up => "up",
            KeyValue::Down => "down",
            KeyValue::Repeat => "repeat",
        }
    }
}

/// Coarse classification of the evdev event types the Rewriter cares
/// about. Anything that isn't a key or a sync marker is carried through
/// as `Other` with its raw type code intact (e.g. `EV_MSC`/`MSC_SCAN`
/// echoes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Key,
    Sync,
    Other(u16),
}

/// evdev type codes this crate needs to recognise by number.
pub const EV_SYN: u16 = 0x00;
pub const EV_KEY: u16 = 0x01;
pub const EV_REL: u16 = 0x02;
pub const EV_ABS: u16 = 0x03;
pub const EV_MSC: u16 = 0x04;
pub const EV_SW: u16 = 0x05;
pub const EV_LED: u16 = 0x11;
pub const EV_SND: u16 = 0x12;
pub const EV_REP: u16 = 0x14;
pub const EV_FF: u16 = 0x15;
pub const EV_PWR: u16 = 0x16;
pub const EV_FF_STATUS: u16 = 0x17;
pub const SYN_REPORT: u16 = 0;
pub const MSC_SCAN: u16 = 0x04;

impl EventKind {
    pub fn from_raw_type(raw_type: u16) -> Self {
        match raw_type {
            EV_KEY => EventKind::Key,
            EV_SYN => EventKind::Sync,
            other => EventKind::Other(other),
        }
    }

    pub fn raw_type(self) -> u16 {
        match self {
            EventKind::Key => EV_KEY,
            EventKind::Sync => EV_SYN,
            EventKind::Other(t) => t,
        }
    }

    /// The kernel's `EV_*` macro name for this type, as written in the CSV
    /// interchange format's `type-name` column.
    pub fn type_name(self) -> String {
        match self.raw_type() {
            EV_SYN => "EV_SYN".to_string(),
            EV_KEY => "EV_KEY".to_string(),
            EV_REL => "EV_REL".to_string(),
            EV_ABS => "EV_ABS".to_string(),
            EV_MSC => "EV_MSC".to_string(),
            EV_SW => "EV_SW".to_string(),
            EV_LED => "EV_LED".to_string(),
            EV_SND => "EV_SND".to_string(),
            EV_REP => "EV_REP".to_string(),
            EV_FF => "EV_FF".to_string(),
            EV_PWR => "EV_PWR".to_string(),
            EV_FF_STATUS => "EV_FF_STATUS".to_string(),
            other => format!("EV_UNKNOWN_{other}"),
        }
    }

    /// The inverse of [`Self::type_name`]: parses a kernel `EV_*` macro
    /// name back into an [`EventKind`]. Returns `None` on an unrecognised
    /// name.
    pub fn parse_type_name(name: &str) -> Option<Self> {
        let raw = match name {
            "EV_SYN" => EV_SYN,
            "EV_KEY" => EV_KEY,
            "EV_REL" => EV_REL,
            "EV_ABS" => EV_ABS,
            "EV_MSC" => EV_MSC,
            "EV_SW" => EV_SW,
            "EV_LED" => EV_LED,
            "EV_SND" => EV_SND,
            "EV_REP" => EV_REP,
            "EV_FF" => EV_FF,
            "EV_PWR" => EV_PWR,
            "EV_FF_STATUS" => EV_FF_STATUS,
            other => other.strip_prefix("EV_UNKNOWN_")?.parse().ok()?,
        };
        Some(Self::from_raw_type(raw))
    }
}

/// An immutable input event: `(time, type, code, value)`.
///
/// `code` is the raw numeric scancode. For key events it identifies the
/// key (e.g. `KEY_F`); `value` is interpreted via [`Event::key_value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Event {
    pub time: EventTime,
    pub kind: EventKind,
    pub code: u16,
    pub value: i32,
}

impl Event {
    pub fn key(time: EventTime, code: u16, value: KeyValue) -> Event {
        Event {
            time,
            kind: EventKind::Key,
            code,
            value: value.to_raw(),
        }
    }

    pub fn sync_report(time: EventTime) -> Event {
        Event {
            time,
            kind: EventKind::Sync,
            code: SYN_REPORT,
            value: 0,
        }
    }

    pub fn is_key(&self) -> bool {
        self.kind == EventKind::Key
    }

    pub fn key_value(&self) -> Option<KeyValue> {
        if self.is_key() {
            KeyValue::from_raw(self.value)
        } else {
            None
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key_value() {
            Some(v) => write!(f, "key {}={}", self.code, v.as_str()),
            None => write!(f, "type={} code={} value={}", self.kind.raw_type(), self.code, self.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn since_computes_microsecond_precise_durations() {
        let t0 = EventTime::new(1, 0);
        let t1 = EventTime::new(1, 500);
        assert_eq!(t1.since(t0), Duration::from_micros(500));
    }

    #[test]
    #[should_panic]
    fn since_panics_when_not_after() {
        let t0 = EventTime::new(1, 0);
        let t1 = EventTime::new(0, 0);
        let _ = t0.since(t1);
    }

    #[test]
    fn add_carries_into_seconds() {
        let t0 = EventTime::new(1, 900_000);
        let t1 = t0.add(Duration::from_millis(200));
        assert_eq!(t1, EventTime::new(2, 100_000));
    }

    #[test]
    fn key_value_roundtrips() {
        let ev = Event::key(EventTime::new(0, 0), 30, KeyValue::Down);
        assert_eq!(ev.key_value(), Some(KeyValue::Down));
        assert!(ev.is_key());
    }

    #[test]
    fn sync_report_is_not_a_key_event() {
        let ev = Event::sync_report(EventTime::new(0, 0));
        assert!(!ev.is_key());
        assert_eq!(ev.key_value(), None);
    }
}
