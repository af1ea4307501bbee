//! Parser collaborator interface
//!
//! A [`Parser`] turns one top-level file into a [`ParsedUnit`]: the top file plus every
//! header it pulled in, in include order. Whenever the parser reaches an include it asks
//! the [`IncludeResolver`] what to do: parse the header, reuse a stored version of it by
//! replaying that version's macro effects, or give up because the header is outdated and
//! has to be refreshed first.

pub mod replacement;
pub mod scanner;

pub use scanner::DirectiveScanner;

use crate::model::{
    Comment, ContentStamp, FileContent, FileLocation, LinkageId, MacroDictionary, MacroEvent,
    NameOccurrence, SignificantMacros,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Preprocessor configuration for one translation unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ScannerConfig {
    /// Searched for `<...>` and `"..."` includes
    pub include_paths: Vec<PathBuf>,
    /// Searched for `"..."` includes only, before `include_paths`
    pub quote_include_paths: Vec<PathBuf>,
    pub defines: Vec<(String, String)>,
    pub undefines: Vec<String>,
}

impl ScannerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_include_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.include_paths.push(path.into());
        self
    }

    pub fn with_quote_include_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.quote_include_paths.push(path.into());
        self
    }

    pub fn with_define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.push((name.into(), value.into()));
        self
    }

    pub fn with_undefine(mut self, name: impl Into<String>) -> Self {
        self.undefines.push(name.into());
        self
    }

    /// Macro dictionary at the start of the top-level file
    pub fn initial_dictionary(&self) -> MacroDictionary {
        let mut dictionary: MacroDictionary = self.defines.iter().cloned().collect();
        for name in &self.undefines {
            dictionary.undefine(name);
        }
        dictionary
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Parse cancelled")]
    Cancelled,

    #[error("Include of outdated file {location} must be refreshed first")]
    DependsOnOutdatedFile { location: FileLocation },

    #[error("Resource exhausted while parsing {location}: {reason}")]
    ResourceExhausted {
        location: FileLocation,
        reason: String,
    },

    #[error("Failed to read {location}: {reason}")]
    Io {
        location: FileLocation,
        reason: String,
    },

    #[error("Malformed input in {location}: {reason}")]
    Malformed {
        location: FileLocation,
        reason: String,
    },
}

/// Parse `context` so that `target`, which it includes, gets fresh content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseContext {
    pub context: FileLocation,
    pub target: FileLocation,
}

pub struct ParseRequest<'a> {
    pub linkage: LinkageId,
    pub content: &'a FileContent,
    pub config: &'a ScannerConfig,
    pub context: Option<&'a ParseContext>,
}

impl ParseRequest<'_> {
    pub fn location(&self) -> &FileLocation {
        &self.content.location
    }
}

/// A stored version the parser may use instead of parsing the header again
#[derive(Debug, Clone, PartialEq)]
pub struct ReusedVersion {
    pub significant: SignificantMacros,
    pub pragma_once: bool,
    /// Macro definitions the version (and what it includes) performs, in order
    pub effects: Vec<MacroEvent>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IncludeAction {
    Parse,
    Reuse(ReusedVersion),
    DependsOnOutdated,
}

#[cfg_attr(test, mockall::automock)]
pub trait IncludeResolver {
    fn resolve_include(
        &self,
        includer: &FileLocation,
        spelled: &str,
        system: bool,
    ) -> Option<FileLocation>;

    fn read(&self, location: &FileLocation) -> Result<FileContent, ParseError>;

    /// Decide how to handle an include of `location` entered with `dictionary`
    fn include_action(&self, location: &FileLocation, dictionary: &MacroDictionary)
    -> IncludeAction;

    fn is_cancelled(&self) -> bool;
}

/// An include directive as seen by the parser
#[derive(Debug, Clone, PartialEq)]
pub struct IncludeDirective {
    pub spelled: String,
    pub system: bool,
    pub offset: u32,
    pub active: bool,
    pub target: Option<FileLocation>,
    /// Significant macros of the target version this include produced or reused
    pub significant: SignificantMacros,
    pub reused: bool,
    pub skipped: bool,
}

/// One file of a parsed unit
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFile {
    pub location: FileLocation,
    pub stamp: ContentStamp,
    pub significant_macros: SignificantMacros,
    pub pragma_once: bool,
    pub includes: Vec<IncludeDirective>,
    pub macros: Vec<MacroEvent>,
    pub names: Vec<NameOccurrence>,
    pub comments: Vec<Comment>,
    pub has_unresolved_include: bool,
    /// Could not be read; stored without content
    pub defective: bool,
    /// Index of the file that first included this one; `None` for the top file
    pub includer: Option<usize>,
}

impl ParsedFile {
    pub fn new(location: FileLocation, stamp: ContentStamp, includer: Option<usize>) -> Self {
        Self {
            location,
            stamp,
            significant_macros: SignificantMacros::none(),
            pragma_once: false,
            includes: Vec::new(),
            macros: Vec::new(),
            names: Vec::new(),
            comments: Vec::new(),
            has_unresolved_include: false,
            defective: false,
            includer,
        }
    }

    pub fn defective(location: FileLocation, includer: Option<usize>) -> Self {
        let mut file = Self::new(location, ContentStamp::unreadable(), includer);
        file.defective = true;
        file
    }
}

/// The top file and every header parsed along with it, in include order
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedUnit {
    pub linkage: LinkageId,
    pub files: Vec<ParsedFile>,
}

impl ParsedUnit {
    pub fn top(&self) -> Option<&ParsedFile> {
        self.files.first()
    }

    pub fn find(&self, location: &FileLocation) -> Option<&ParsedFile> {
        self.files.iter().find(|file| &file.location == location)
    }
}

pub trait Parser: Send + Sync {
    fn parse(
        &self,
        request: &ParseRequest<'_>,
        resolver: &dyn IncludeResolver,
    ) -> Result<ParsedUnit, ParseError>;
}

/// Parsers by linkage
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: HashMap<LinkageId, Arc<dyn Parser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the directive scanner for C and C++
    pub fn c_family() -> Result<Self, regex::Error> {
        let scanner: Arc<dyn Parser> = Arc::new(DirectiveScanner::new()?);
        Ok(Self::new()
            .with_parser(LinkageId::C, scanner.clone())
            .with_parser(LinkageId::Cpp, scanner))
    }

    pub fn with_parser(mut self, linkage: LinkageId, parser: Arc<dyn Parser>) -> Self {
        self.parsers.insert(linkage, parser);
        self
    }

    pub fn get(&self, linkage: LinkageId) -> Option<Arc<dyn Parser>> {
        self.parsers.get(&linkage).cloned()
    }

    pub fn linkages(&self) -> Vec<LinkageId> {
        let mut linkages: Vec<LinkageId> = self.parsers.keys().copied().collect();
        linkages.sort();
        linkages
    }
}
