//! YAML combo table loader.
//!
//! Config shape:
//!
//! ```yaml
//! combos:
//!   - keys: f j
//!     outKeys: a b c
//!   - keys: f k
//!     outKeys: x
//! ```
//!
//! `keys`/`outKeys` are whitespace-separated key tokens (§ keycode). An
//! empty list in either slot, or any unrecognised/mixed-case token, is
//! a fatal load error — the Rewriter never starts on a half-parsed
//! config.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::combo::{Combo, ComboTable};
use crate::keycode::{parse_key_token, KeyCode};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse combo config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("empty list in '{0}' is not allowed")]
    EmptyList(String),

    #[error("key {0:?} is invalid: only lower case characters are allowed")]
    NotLowercase(String),

    #[error("unknown key {0:?}")]
    UnknownKey(String),

    #[error("combo table must contain at least one combo")]
    EmptyTable,
}

#[derive(Debug, Deserialize)]
struct RawYaml {
    combos: Vec<RawCombo>,
}

#[derive(Debug, Deserialize)]
struct RawCombo {
    keys: String,
    #[serde(rename = "outKeys")]
    out_keys: String,
}

pub fn load_combo_table(path: &Path) -> Result<ComboTable, ConfigError> {
    let data = std::fs::read(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    load_combo_table_from_bytes(&data)
}

pub fn load_combo_table_from_bytes(data: &[u8]) -> Result<ComboTable, ConfigError> {
    let raw: RawYaml = serde_yaml::from_slice(data)?;
    let mut combos = Vec::with_capacity(raw.combos.len());
    for rc in raw.combos {
        let in_keys = parse_key_list(&rc.keys, "keys")?;
        let out_keys = parse_key_list(&rc.out_keys, "outKeys")?;
        combos.push(Combo::new(in_keys, out_keys)?);
    }
    ComboTable::new(combos)
}

fn parse_key_list(s: &str, field: &str) -> Result<Vec<KeyCode>, ConfigError> {
    let tokens: Vec<&str> = s.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(ConfigError::EmptyList(field.to_string()));
    }
    tokens.into_iter().map(parse_key_token).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_well_formed_table() {
        let yaml = "combos:\n  - keys: f  j\n    outKeys: a b  c\n";
        let table = load_combo_table_from_bytes(yaml.as_bytes()).unwrap();
        assert_eq!(table.len(), 1);
        let combo = table.get(0);
        assert_eq!(combo.in_keys.len(), 2);
        assert_eq!(combo.out_keys.len(), 3);
    }

    #[test]
    fn rejects_empty_out_keys() {
        let yaml = "combos:\n  - keys: f j\n    outKeys: \"\"\n";
        let err = load_combo_table_from_bytes(yaml.as_bytes()).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyList(field) if field == "outKeys"));
    }

    #[test]
    fn rejects_empty_keys() {
        let yaml = "combos:\n  - keys: \"\"\n    outKeys: a b c\n";
        let err = load_combo_table_from_bytes(yaml.as_bytes()).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyList(field) if field == "keys"));
    }

    #[test]
    fn rejects_unknown_key_name() {
        let yaml = "combos:\n  - keys: f j\n    outKeys: a b key_not_existing\n";
        let err = load_combo_table_from_bytes(yaml.as_bytes()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey(_)));
    }

    #[test]
    fn rejects_mixed_case_token() {
        let yaml = "combos:\n  - keys: f j\n    outKeys: a b KEY_not_existing\n";
        let err = load_combo_table_from_bytes(yaml.as_bytes()).unwrap_err();
        assert!(matches!(err, ConfigError::NotLowercase(_)));
    }

    #[test]
    fn loads_from_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("combos.yaml");
        std::fs::write(&path, "combos:\n  - keys: f j\n    outKeys: x\n").unwrap();
        let table = load_combo_table(&path).unwrap();
        assert_eq!(table.len(), 1);
    }
}
