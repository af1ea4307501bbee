//! Names and comments extracted from a parsed file

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Struct,
    Class,
    Union,
    Enum,
    Typedef,
    Variable,
    Macro,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameRole {
    Declaration,
    Definition,
    Reference,
}

/// One occurrence of a name inside a file version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameOccurrence {
    pub name: String,
    pub kind: SymbolKind,
    pub role: NameRole,
    pub offset: u32,
    pub length: u32,
}

impl NameOccurrence {
    pub fn new(name: impl Into<String>, kind: SymbolKind, role: NameRole, offset: u32) -> Self {
        let name = name.into();
        let length = name.len() as u32;
        Self {
            name,
            kind,
            role,
            offset,
            length,
        }
    }

    /// Declarations and definitions are indexed by name; references are not
    pub fn is_declaration(&self) -> bool {
        matches!(self.role, NameRole::Declaration | NameRole::Definition)
    }
}

/// A source comment, kept for annotation scanning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub text: String,
    pub offset: u32,
    pub is_block: bool,
}
