//! `compile_commands.json` loading
//!
//! Every entry becomes a [`CompileUnit`]: an absolute source path, the linkage it is
//! compiled in and the preprocessor configuration taken from its command line.

use super::ProjectError;
use crate::model::LinkageId;
use crate::parser::ScannerConfig;
use json_compilation_db::Entry;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// One compiled source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileUnit {
    pub file: PathBuf,
    pub linkage: LinkageId,
    pub config: ScannerConfig,
}

#[derive(Debug)]
pub struct CompilationDatabase {
    path: PathBuf,
    units: Vec<CompileUnit>,
}

impl CompilationDatabase {
    /// Load and parse the database at `path`
    pub fn new(path: PathBuf) -> Result<Self, ProjectError> {
        if !path.exists() {
            return Err(ProjectError::CompilationDatabaseNotFound {
                path: path.to_string_lossy().to_string(),
            });
        }
        let file = std::fs::File::open(&path)?;
        let reader = std::io::BufReader::new(file);
        let entries: Vec<Entry> = serde_json::from_reader(reader).map_err(|e| {
            ProjectError::CompilationDatabaseInvalid {
                error: e.to_string(),
            }
        })?;
        Self::from_entries(path, &entries)
    }

    pub fn from_entries(path: PathBuf, entries: &[Entry]) -> Result<Self, ProjectError> {
        if entries.is_empty() {
            return Err(ProjectError::CompilationDatabaseEmpty);
        }
        let mut units: Vec<CompileUnit> = Vec::with_capacity(entries.len());
        for entry in entries {
            let unit = compile_unit(entry);
            // the first command for a file wins, as with clang tooling
            if units.iter().any(|existing| existing.file == unit.file) {
                trace!("Skipping duplicate entry for {}", unit.file.display());
                continue;
            }
            units.push(unit);
        }
        debug!(
            "Loaded compilation database {} ({} units)",
            path.display(),
            units.len()
        );
        Ok(Self { path, units })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn units(&self) -> &[CompileUnit] {
        &self.units
    }

    pub fn unit(&self, file: &Path) -> Option<&CompileUnit> {
        self.units.iter().find(|unit| unit.file == file)
    }

    pub fn contains_file(&self, file: &Path) -> bool {
        self.unit(file).is_some()
    }

    /// Sorted, deduplicated source paths
    pub fn source_files(&self) -> Vec<&Path> {
        let mut files: Vec<&Path> = self.units.iter().map(|unit| unit.file.as_path()).collect();
        files.sort();
        files.dedup();
        files
    }
}

fn absolute(directory: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        directory.join(path)
    }
}

/// Value of a flag given either attached (`-Ifoo`) or as the next argument (`-I foo`)
fn flag_value<'a>(
    argument: &'a str,
    flag: &str,
    rest: &mut impl Iterator<Item = &'a String>,
) -> Option<&'a str> {
    let attached = argument.strip_prefix(flag)?;
    if attached.is_empty() {
        rest.next().map(String::as_str)
    } else {
        Some(attached)
    }
}

fn compile_unit(entry: &Entry) -> CompileUnit {
    let file = absolute(&entry.directory, &entry.file);
    let mut config = ScannerConfig::new();
    let mut language: Option<LinkageId> = None;
    let mut standard: Option<LinkageId> = None;

    let mut arguments = entry.arguments.iter();
    let compiler = arguments.next().map(String::as_str).unwrap_or_default();
    while let Some(argument) = arguments.next() {
        let argument = argument.as_str();
        if let Some(value) = flag_value(argument, "-isystem", &mut arguments) {
            config.include_paths.push(absolute(&entry.directory, Path::new(value)));
        } else if let Some(value) = flag_value(argument, "-iquote", &mut arguments) {
            config
                .quote_include_paths
                .push(absolute(&entry.directory, Path::new(value)));
        } else if let Some(value) = flag_value(argument, "-I", &mut arguments) {
            config.include_paths.push(absolute(&entry.directory, Path::new(value)));
        } else if let Some(value) = flag_value(argument, "-D", &mut arguments) {
            let (name, value) = value.split_once('=').unwrap_or((value, "1"));
            config.defines.push((name.to_string(), value.to_string()));
        } else if let Some(value) = flag_value(argument, "-U", &mut arguments) {
            config.undefines.push(value.to_string());
        } else if let Some(value) = argument.strip_prefix("-std=") {
            standard = Some(if value.contains("++") {
                LinkageId::Cpp
            } else {
                LinkageId::C
            });
        } else if let Some(value) = flag_value(argument, "-x", &mut arguments) {
            language = match value {
                "c" | "c-header" => Some(LinkageId::C),
                "c++" | "c++-header" => Some(LinkageId::Cpp),
                _ => language,
            };
        }
    }

    let linkage = language
        .or_else(|| {
            file.extension()
                .and_then(|ext| ext.to_str())
                .and_then(LinkageId::for_source_extension)
        })
        .or(standard)
        .unwrap_or(if compiler.ends_with("++") {
            LinkageId::Cpp
        } else {
            LinkageId::C
        });

    CompileUnit {
        file,
        linkage,
        config,
    }
}
