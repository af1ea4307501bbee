//! Macro state: the live dictionary of a parse and the significant-macro fingerprint
//! that tells one parsed version of a header from another.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// State of a single macro at the point a file was entered
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MacroState {
    Undefined,
    Defined(String),
}

/// Macros whose state at inclusion time influenced how a file was preprocessed
///
/// Two inclusions of the same header with equal significant macros produce the same
/// content, so the pair (location, significant macros) identifies a version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignificantMacros(BTreeMap<String, MacroState>);

impl SignificantMacros {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&MacroState> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MacroState)> {
        self.0.iter()
    }

    /// Record a macro test; the first recorded state wins
    pub fn record(&mut self, name: impl Into<String>, state: MacroState) {
        self.0.entry(name.into()).or_insert(state);
    }

    /// Whether a parse entering the file with `dictionary` would see the same macro states
    pub fn is_satisfied_by(&self, dictionary: &MacroDictionary) -> bool {
        self.0
            .iter()
            .all(|(name, expected)| dictionary.state(name) == *expected)
    }
}

impl<const N: usize> From<[(&str, MacroState); N]> for SignificantMacros {
    fn from(entries: [(&str, MacroState); N]) -> Self {
        Self(
            entries
                .into_iter()
                .map(|(name, state)| (name.to_string(), state))
                .collect(),
        )
    }
}

impl fmt::Display for SignificantMacros {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<none>");
        }
        let mut first = true;
        for (name, state) in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            match state {
                MacroState::Undefined => write!(f, "!{name}")?,
                MacroState::Defined(value) => write!(f, "{name}={value}")?,
            }
        }
        Ok(())
    }
}

/// What a directive did to the macro dictionary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacroEventKind {
    Define { value: String },
    Undefine,
}

/// A `#define`/`#undef` encountered in an active region, with its byte offset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroEvent {
    pub name: String,
    pub kind: MacroEventKind,
    pub offset: u32,
}

impl MacroEvent {
    pub fn define(name: impl Into<String>, value: impl Into<String>, offset: u32) -> Self {
        Self {
            name: name.into(),
            kind: MacroEventKind::Define {
                value: value.into(),
            },
            offset,
        }
    }

    pub fn undefine(name: impl Into<String>, offset: u32) -> Self {
        Self {
            name: name.into(),
            kind: MacroEventKind::Undefine,
            offset,
        }
    }
}

/// Macros defined at some point of a parse
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacroDictionary {
    macros: BTreeMap<String, String>,
}

impl MacroDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.macros.insert(name.into(), value.into());
    }

    pub fn undefine(&mut self, name: &str) {
        self.macros.remove(name);
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.macros.get(name).map(String::as_str)
    }

    pub fn state(&self, name: &str) -> MacroState {
        match self.macros.get(name) {
            Some(value) => MacroState::Defined(value.clone()),
            None => MacroState::Undefined,
        }
    }

    pub fn apply(&mut self, event: &MacroEvent) {
        match &event.kind {
            MacroEventKind::Define { value } => self.define(event.name.clone(), value.clone()),
            MacroEventKind::Undefine => self.undefine(&event.name),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MacroDictionary {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            macros: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}
