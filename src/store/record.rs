//! Persistent records: one per (linkage, location, significant macros) version

use crate::model::{
    ContentStamp, FileLocation, LinkageId, MacroEvent, NameOccurrence, SignificantMacros,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Storage identity of a file version; stable across content replacement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Key of a file version in the all-files index
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileKey {
    pub linkage: LinkageId,
    pub location: FileLocation,
    pub macros: SignificantMacros,
}

impl FileKey {
    pub fn new(linkage: LinkageId, location: FileLocation, macros: SignificantMacros) -> Self {
        Self {
            linkage,
            location,
            macros,
        }
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.linkage, self.location, self.macros)
    }
}

/// An include directive as stored in the including version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeRecord {
    pub spelled: String,
    pub system: bool,
    pub offset: u32,
    pub active: bool,
    /// Resolved location; `None` for unresolved includes
    pub target_location: Option<FileLocation>,
    /// Stored version the include pulled in, when known
    pub target: Option<FileId>,
    pub target_macros: SignificantMacros,
    /// Skipped because the target was already included with pragma-once semantics
    pub skipped: bool,
}

impl IncludeRecord {
    pub fn is_resolved(&self) -> bool {
        self.target_location.is_some()
    }
}

/// Everything one parse produced for a version, before it has a storage identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionContent {
    pub stamp: ContentStamp,
    pub pragma_once: bool,
    pub has_unresolved_include: bool,
    pub defective: bool,
    /// Version of the includer this file was parsed inside
    pub context: Option<FileId>,
    pub includes: Vec<IncludeRecord>,
    pub macros: Vec<MacroEvent>,
    pub names: Vec<NameOccurrence>,
    pub replacement_header: Option<String>,
}

impl VersionContent {
    pub fn new(stamp: ContentStamp) -> Self {
        Self {
            stamp,
            pragma_once: false,
            has_unresolved_include: false,
            defective: false,
            context: None,
            includes: Vec::new(),
            macros: Vec::new(),
            names: Vec::new(),
            replacement_header: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub key: FileKey,
    pub content: VersionContent,
    /// Versions whose include directives point at this one
    pub included_by: BTreeSet<FileId>,
}

impl FileRecord {
    pub fn new(id: FileId, key: FileKey, content: VersionContent) -> Self {
        Self {
            id,
            key,
            content,
            included_by: BTreeSet::new(),
        }
    }

    pub fn linkage(&self) -> LinkageId {
        self.key.linkage
    }

    pub fn location(&self) -> &FileLocation {
        &self.key.location
    }

    pub fn context(&self) -> Option<FileId> {
        self.content.context
    }

    pub fn pragma_once(&self) -> bool {
        self.content.pragma_once
    }

    /// Targets of active includes that resolved to a stored version
    pub fn include_targets(&self) -> impl Iterator<Item = FileId> + '_ {
        self.content
            .includes
            .iter()
            .filter(|include| include.active)
            .filter_map(|include| include.target)
    }
}
