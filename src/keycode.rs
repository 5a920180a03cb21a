//! Key name parsing and the [`KeyCode`] newtype.
//!
//! The config loader accepts single lowercase letters/digits (`f`, `j`,
//! `1`) and canonical key names (`capslock`, `tab`, `leftshift`, ...),
//! matching the set of keys a laptop keyboard actually has. Anything
//! else — an unknown name, or a token with an uppercase letter in it —
//! is a fatal config error.

use std::fmt;

use evdev::Key;

use crate::config::ConfigError;

/// A key identified by its numeric evdev scancode (`KEY_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCode(pub u16);

impl KeyCode {
    pub fn code(&self) -> u16 {
        self.0
    }
}

impl From<Key> for KeyCode {
    fn from(key: Key) -> Self {
        KeyCode(key.code())
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", canonical_name(*self).trim_start_matches("KEY_").to_ascii_lowercase())
    }
}

/// The kernel's `KEY_*` macro name for this key, as written in the CSV
/// interchange format's `code-name` column (e.g. `KEY_F`).
pub fn canonical_name(key: KeyCode) -> String {
    format!("{:?}", Key::new(key.0))
}

/// The inverse of [`canonical_name`]: parses a `KEY_*` macro name (full
/// uppercase, e.g. `KEY_F`) back into a [`KeyCode`].
pub fn parse_canonical_name(name: &str) -> Option<KeyCode> {
    key_by_name(name).map(KeyCode::from)
}

/// Parses one whitespace-delimited token from a combo config line into a
/// [`KeyCode`]. Accepts a single lowercase letter/digit, or a lowercase
/// canonical key name (with or without the `key_`/`KEY_` prefix).
pub fn parse_key_token(token: &str) -> Result<KeyCode, ConfigError> {
    if token.is_empty() {
        return Err(ConfigError::UnknownKey(token.to_string()));
    }
    if token.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(ConfigError::NotLowercase(token.to_string()));
    }

    let canonical = token.strip_prefix("key_").unwrap_or(token);
    let name = format!("KEY_{}", canonical.to_ascii_uppercase());
    key_by_name(&name)
        .map(KeyCode::from)
        .ok_or_else(|| ConfigError::UnknownKey(token.to_string()))
}

/// A small, explicit table of the keys a combo config is expected to
/// name: letters, digits and the modifier/whitespace/function keys
/// relevant to chord definitions. Grown on demand rather than trying to
/// cover the entire evdev key space.
fn key_by_name(name: &str) -> Option<Key> {
    use Key::*;
    Some(match name {
        "KEY_A" => KEY_A,
        "KEY_B" => KEY_B,
        "KEY_C" => KEY_C,
        "KEY_D" => KEY_D,
        "KEY_E" => KEY_E,
        "KEY_F" => KEY_F,
        "KEY_G" => KEY_G,
        "KEY_H" => KEY_H,
        "KEY_I" => KEY_I,
        "KEY_J" => KEY_J,
        "KEY_K" => KEY_K,
        "KEY_L" => KEY_L,
        "KEY_M" => KEY_M,
        "KEY_N" => KEY_N,
        "KEY_O" => KEY_O,
        "KEY_P" => KEY_P,
        "KEY_Q" => KEY_Q,
        "KEY_R" => KEY_R,
        "KEY_S" => KEY_S,
        "KEY_T" => KEY_T,
        "KEY_U" => KEY_U,
        "KEY_V" => KEY_V,
        "KEY_W" => KEY_W,
        "KEY_X" => KEY_X,
        "KEY_Y" => KEY_Y,
        "KEY_Z" => KEY_Z,
        "KEY_0" => KEY_0,
        "KEY_1" => KEY_1,
        "KEY_2" => KEY_2,
        "KEY_3" => KEY_3,
        "KEY_4" => KEY_4,
        "KEY_5" => KEY_5,
        "KEY_6" => KEY_6,
        "KEY_7" => KEY_7,
        "KEY_8" => KEY_8,
        "KEY_9" => KEY_9,
        "KEY_CAPSLOCK" => KEY_CAPSLOCK,
        "KEY_TAB" => KEY_TAB,
        "KEY_SPACE" => KEY_SPACE,
        "KEY_ENTER" => KEY_ENTER,
        "KEY_ESC" => KEY_ESC,
        "KEY_BACKSPACE" => KEY_BACKSPACE,
        "KEY_LEFTSHIFT" => KEY_LEFTSHIFT,
        "KEY_RIGHTSHIFT" => KEY_RIGHTSHIFT,
        "KEY_LEFTCTRL" => KEY_LEFTCTRL,
        "KEY_RIGHTCTRL" => KEY_RIGHTCTRL,
        "KEY_LEFTALT" => KEY_LEFTALT,
        "KEY_RIGHTALT" => KEY_RIGHTALT,
        "KEY_LEFTMETA" => KEY_LEFTMETA,
        "KEY_RIGHTMETA" => KEY_RIGHTMETA,
        "KEY_MINUS" => KEY_MINUS,
        "KEY_EQUAL" => KEY_EQUAL,
        "KEY_LEFTBRACE" => KEY_LEFTBRACE,
        "KEY_RIGHTBRACE" => KEY_RIGHTBRACE,
        "KEY_SEMICOLON" => KEY_SEMICOLON,
        "KEY_APOSTROPHE" => KEY_APOSTROPHE,
        "KEY_GRAVE" => KEY_GRAVE,
        "KEY_BACKSLASH" => KEY_BACKSLASH,
        "KEY_COMMA" => KEY_COMMA,
        "KEY_DOT" => KEY_DOT,
        "KEY_SLASH" => KEY_SLASH,
        "KEY_F1" => KEY_F1,
        "KEY_F2" => KEY_F2,
        "KEY_F3" => KEY_F3,
        "KEY_F4" => KEY_F4,
        "KEY_F5" => KEY_F5,
        "KEY_F6" => KEY_F6,
        "KEY_F7" => KEY_F7,
        "KEY_F8" => KEY_F8,
        "KEY_F9" => KEY_F9,
        "KEY_F10" => KEY_F10,
        "KEY_F11" => KEY_F11,
        "KEY_F12" => KEY_F12,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_lowercase_letter() {
        assert_eq!(parse_key_token("f").unwrap(), KeyCode::from(Key::KEY_F));
    }

    #[test]
    fn single_digit() {
        assert_eq!(parse_key_token("1").unwrap(), KeyCode::from(Key::KEY_1));
    }

    #[test]
    fn canonical_multi_char_name() {
        assert_eq!(
            parse_key_token("capslock").unwrap(),
            KeyCode::from(Key::KEY_CAPSLOCK)
        );
    }

    #[test]
    fn uppercase_token_rejected() {
        assert!(matches!(
            parse_key_token("F"),
            Err(ConfigError::NotLowercase(_))
        ));
    }

    #[test]
    fn unknown_token_rejected() {
        assert!(matches!(
            parse_key_token("key_not_existing"),
            Err(ConfigError::UnknownKey(_))
        ));
    }
}
