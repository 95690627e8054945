//! Bounded conversation history and its versioned storage format.
//!
//! History is a plain list of `{role, text}` entries. Stored form:
//!
//! ```json
//! {"version": 1, "turns": [{"role": "user", "text": "..."}]}
//! ```
//!
//! When the cap is exceeded the oldest entries are evicted first; the most
//! recent exchange is what question condensation needs next turn.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::Turn;

/// Default number of retained entries (ten question/answer exchanges).
pub const DEFAULT_MAX_HISTORY: usize = 20;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct History {
    turns: Vec<Turn>,
    cap: usize,
}

#[derive(Serialize, Deserialize)]
struct StoredHistory {
    version: u32,
    turns: Vec<Turn>,
}

impl History {
    pub fn new(cap: usize) -> Self {
        Self {
            turns: Vec::new(),
            cap,
        }
    }

    pub fn from_turns(turns: Vec<Turn>, cap: usize) -> Self {
        let mut history = Self { turns, cap };
        history.enforce_cap();
        history
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Append one question/answer exchange.
    pub fn push_exchange(&mut self, question: &str, answer: &str) {
        self.turns.push(Turn::user(question));
        self.turns.push(Turn::assistant(answer));
        self.enforce_cap();
    }

    fn enforce_cap(&mut self) {
        if self.turns.len() > self.cap {
            let excess = self.turns.len() - self.cap;
            self.turns.drain(..excess);
        }
    }

    pub fn to_json(&self) -> Result<String> {
        let stored = StoredHistory {
            version: FORMAT_VERSION,
            turns: self.turns.clone(),
        };
        Ok(serde_json::to_string(&stored)?)
    }

    pub fn from_json(json: &str, cap: usize) -> Result<Self> {
        let stored: StoredHistory =
            serde_json::from_str(json).context("Failed to parse stored conversation history")?;
        if stored.version != FORMAT_VERSION {
            bail!("unsupported history format version {}", stored.version);
        }
        Ok(Self::from_turns(stored.turns, cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn test_evicts_oldest_first() {
        let mut h = History::new(4);
        h.push_exchange("q1", "a1");
        h.push_exchange("q2", "a2");
        h.push_exchange("q3", "a3");
        assert_eq!(h.len(), 4);
        assert_eq!(h.turns()[0], Turn::user("q2"));
        assert_eq!(h.turns()[3], Turn::assistant("a3"));
    }

    #[test]
    fn test_json_format_is_versioned() {
        let mut h = History::new(DEFAULT_MAX_HISTORY);
        h.push_exchange("What is the warranty?", "Two years.");
        let json = h.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["turns"][0]["role"], "user");

        let back = History::from_json(&json, DEFAULT_MAX_HISTORY).unwrap();
        assert_eq!(back, h);
        assert_eq!(back.turns()[1].role, Role::Assistant);
    }

    #[test]
    fn test_rejects_unknown_version() {
        assert!(History::from_json(r#"{"version":9,"turns":[]}"#, 10).is_err());
        assert!(History::from_json("not json", 10).is_err());
    }

    #[test]
    fn test_load_applies_cap() {
        let turns = (0..6).map(|i| Turn::user(format!("q{}", i))).collect();
        let h = History::from_turns(turns, 2);
        assert_eq!(h.turns(), &[Turn::user("q4"), Turn::user("q5")]);
    }
}
