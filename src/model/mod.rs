//! Value types shared by the store, the parsers and the indexer

pub mod content;
pub mod linkage;
pub mod location;
pub mod macros;
pub mod symbol;

pub use content::{ContentStamp, FileContent, FileStat, DEFAULT_ENCODING};
pub use linkage::LinkageId;
pub use location::FileLocation;
pub use macros::{MacroDictionary, MacroEvent, MacroEventKind, MacroState, SignificantMacros};
pub use symbol::{Comment, NameOccurrence, NameRole, SymbolKind};
