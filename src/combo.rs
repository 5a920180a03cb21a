//! Combos and the combo table.

use crate::config::ConfigError;
use crate::keycode::KeyCode;

/// One chord rule: pressing `in_keys` together and releasing them emits
/// `out_keys` instead. `in_keys` order matters — `(F,J)` and `(J,F)` are
/// distinct combos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combo {
    pub in_keys: Vec<KeyCode>,
    pub out_keys: Vec<KeyCode>,
}

impl Combo {
    pub fn new(in_keys: Vec<KeyCode>, out_keys: Vec<KeyCode>) -> Result<Self, ConfigError> {
        if in_keys.is_empty() {
            return Err(ConfigError::EmptyList("keys".to_string()));
        }
        if out_keys.is_empty() {
            return Err(ConfigError::EmptyList("outKeys".to_string()));
        }
        Ok(Combo { in_keys, out_keys })
    }
}

impl std::fmt::Display for Combo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self.in_keys.iter().map(|k| k.to_string()).collect();
        let out: Vec<String> = self.out_keys.iter().map(|k| k.to_string()).collect();
        write!(f, "{} -> {}", keys.join(" "), out.join(" "))
    }
}

/// The immutable, ordered set of combos a Rewriter runs against. Rule
/// precedence is list order: when more than one combo matches at a
/// given step, the earliest in this list wins ties (see the evaluator).
#[derive(Debug, Clone)]
pub struct ComboTable(Vec<Combo>);

impl ComboTable {
    pub fn new(combos: Vec<Combo>) -> Result<Self, ConfigError> {
        if combos.is_empty() {
            return Err(ConfigError::EmptyTable);
        }
        Ok(ComboTable(combos))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, idx: usize) -> &Combo {
        &self.0[idx]
    }

    /// The longest `in_keys` across the table — the minimum buffer
    /// capacity a Rewriter needs to hold one in-progress combo, used by
    /// `RewriterState::new` to size `buf` up front.
    pub fn max_in_keys(&self) -> usize {
        self.0.iter().map(|c| c.in_keys.len()).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u16) -> KeyCode {
        KeyCode(n)
    }

    #[test]
    fn combo_rejects_empty_in_keys() {
        assert!(matches!(
            Combo::new(vec![], vec![key(1)]),
            Err(ConfigError::EmptyList(_))
        ));
    }

    #[test]
    fn combo_rejects_empty_out_keys() {
        assert!(matches!(
            Combo::new(vec![key(1)], vec![]),
            Err(ConfigError::EmptyList(_))
        ));
    }

    #[test]
    fn table_rejects_empty_combo_list() {
        assert!(matches!(ComboTable::new(vec![]), Err(ConfigError::EmptyTable)));
    }

    #[test]
    fn max_in_keys_is_the_longest_combo() {
        let table = ComboTable::new(vec![
            Combo::new(vec![key(1)], vec![key(9)]).unwrap(),
            Combo::new(vec![key(1), key(2), key(3)], vec![key(9)]).unwrap(),
        ])
        .unwrap();
        assert_eq!(table.max_in_keys(), 3);
    }
}
