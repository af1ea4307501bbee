//! Commits one parsed unit into the store
//!
//! Every file of the unit becomes an uncommitted version first, so the final identity of
//! each one is known before include edges and context links are filled in. The versions
//! are then committed deepest-first under the write lock, yielding to waiting readers
//! between files.

use super::errors::IndexerError;
use crate::model::FileLocation;
use crate::parser::replacement::{ReplacementHeaderMap, ReplacementHeaderScanner};
use crate::parser::{ParsedFile, ParsedUnit};
use crate::store::{
    FileId, FileKey, IncludeRecord, ReadLockGuard, StoreError, StoreView, VersionContent,
    WriteLockGuard,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// What the engine lets the writer do with existing versions
#[derive(Debug, Clone, Default)]
pub struct WritePlan {
    /// Outdated versions of each location that new content may take over
    pub replaceable: HashMap<FileLocation, Vec<FileId>>,
    /// Leave the top file alone when it already has a current version (context parses)
    pub keep_current_top: bool,
}

impl WritePlan {
    /// Identity a new version of `key` should reuse, if any
    fn take_replaceable(&mut self, key: &FileKey, existing: Option<FileId>) -> Option<FileId> {
        let candidates = self.replaceable.get_mut(&key.location)?;
        if let Some(existing) = existing {
            candidates.retain(|id| *id != existing);
            return None;
        }
        (!candidates.is_empty()).then(|| candidates.remove(0))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WrittenFile {
    pub key: FileKey,
    pub id: FileId,
    pub context: Option<FileId>,
    pub added: bool,
    /// Version folded into `id`; it no longer exists
    pub merged: Option<FileId>,
    pub pragma_once_lost: bool,
    pub is_top: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteReport {
    /// Committed files in include order
    pub files: Vec<WrittenFile>,
}

impl WriteReport {
    pub fn find(&self, location: &FileLocation) -> Option<&WrittenFile> {
        self.files.iter().find(|file| &file.key.location == location)
    }

    pub fn lost_pragma_once(&self, location: &FileLocation) -> bool {
        self.files
            .iter()
            .any(|file| &file.key.location == location && file.pragma_once_lost)
    }
}

struct Entry {
    /// Index into the unit's files
    index: usize,
    key: FileKey,
    /// Existing version kept as is
    kept: Option<FileId>,
    staged: Option<FileId>,
    replaces: Option<FileId>,
    identity: Option<FileId>,
}

impl Entry {
    fn identity(&self) -> Option<FileId> {
        self.kept.or(self.identity)
    }
}

pub struct IndexWriter<'a> {
    reader: &'a ReadLockGuard<'a>,
    scanner: &'a ReplacementHeaderScanner,
    yield_threshold: Duration,
    cancel: &'a CancellationToken,
}

impl<'a> IndexWriter<'a> {
    pub fn new(
        reader: &'a ReadLockGuard<'a>,
        scanner: &'a ReplacementHeaderScanner,
        yield_threshold: Duration,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            reader,
            scanner,
            yield_threshold,
            cancel,
        }
    }

    /// Write `unit`. The caller's read lock is given up while the write lock is held and
    /// is held again when this returns.
    pub fn write(
        &self,
        unit: &ParsedUnit,
        plan: &mut WritePlan,
        replacements: &mut ReplacementHeaderMap,
    ) -> Result<WriteReport, IndexerError> {
        let Some(top) = unit.top() else {
            return Ok(WriteReport::default());
        };
        let started = Instant::now();
        let (mut entries, entry_of) = self.collect_entries(unit, plan);
        if entries.iter().all(|entry| entry.kept.is_some()) {
            return Ok(WriteReport::default());
        }

        let mut writer = self.reader.upgrade(self.cancel)?;
        let result =
            self.stage_and_commit(&mut writer, unit, plan, replacements, &mut entries, &entry_of);
        let staged: Vec<FileId> = entries.iter().filter_map(|entry| entry.staged).collect();
        writer.discard_uncommitted(&staged);

        match result {
            Ok(report) => {
                writer.finish(false)?;
                debug!(
                    "IndexWriter: {} ({} files) written in {:?}",
                    top.location,
                    report.files.len(),
                    started.elapsed()
                );
                Ok(report)
            }
            // the guard already handed the read lock back
            Err(WriteFailure::LockLost(error)) => Err(error.into()),
            Err(WriteFailure::Store(source)) => {
                if let Err(e) = writer.finish(false) {
                    warn!("IndexWriter: releasing write lock failed: {}", e);
                }
                warn!("IndexWriter: commit of {} failed: {}", top.location, source);
                Err(IndexerError::Commit {
                    location: top.location.clone(),
                    touched: entries.iter().map(|entry| entry.key.location.clone()).collect(),
                    source,
                })
            }
        }
    }

    /// One entry per distinct key, in include order; duplicates map to the first
    fn collect_entries(&self, unit: &ParsedUnit, plan: &WritePlan) -> (Vec<Entry>, Vec<usize>) {
        let mut entries: Vec<Entry> = Vec::new();
        let mut entry_of = Vec::with_capacity(unit.files.len());
        let mut seen: HashMap<FileKey, usize> = HashMap::new();

        for (index, file) in unit.files.iter().enumerate() {
            let key = FileKey::new(
                unit.linkage,
                file.location.clone(),
                file.significant_macros.clone(),
            );
            if let Some(existing) = seen.get(&key) {
                entry_of.push(*existing);
                continue;
            }
            let kept = (index == 0 && plan.keep_current_top)
                .then(|| self.reader.find_version_id(&key))
                .flatten()
                .filter(|id| {
                    !plan
                        .replaceable
                        .get(&key.location)
                        .is_some_and(|ids| ids.contains(id))
                });
            if let Some(id) = kept {
                trace!("IndexWriter: keeping current context file {} {}", key, id);
            }
            seen.insert(key.clone(), entries.len());
            entry_of.push(entries.len());
            entries.push(Entry {
                index,
                key,
                kept,
                staged: None,
                replaces: None,
                identity: None,
            });
        }
        (entries, entry_of)
    }

    fn stage_and_commit(
        &self,
        writer: &mut WriteLockGuard<'_>,
        unit: &ParsedUnit,
        plan: &mut WritePlan,
        replacements: &mut ReplacementHeaderMap,
        entries: &mut [Entry],
        entry_of: &[usize],
    ) -> Result<WriteReport, WriteFailure> {
        for entry in entries.iter_mut().filter(|entry| entry.kept.is_none()) {
            let file = &unit.files[entry.index];
            let staged = writer.add_uncommitted_version(
                entry.key.clone(),
                VersionContent::new(file.stamp.clone()),
            )?;
            let existing = writer.find_version_id(&entry.key);
            entry.replaces = plan.take_replaceable(&entry.key, existing);
            entry.identity = Some(writer.identity_on_commit(staged, &entry.key, entry.replaces));
            entry.staged = Some(staged);
        }

        for position in 0..entries.len() {
            let Some(staged) = entries[position].staged else {
                continue;
            };
            let index = entries[position].index;
            let content = self.content(writer, unit, index, entries, entry_of, replacements);
            writer.replace_uncommitted_content(staged, content)?;
        }

        let mut report = WriteReport::default();
        let mut remaining = entries.iter().filter(|entry| entry.staged.is_some()).count();
        for entry in entries.iter_mut().rev() {
            let Some(staged) = entry.staged else {
                continue;
            };
            let result = writer.commit_uncommitted_version(staged, entry.replaces)?;
            entry.staged = None;
            remaining -= 1;
            if result.pragma_once_lost {
                debug!("IndexWriter: {} lost pragma-once semantics", entry.key);
            }
            report.files.push(WrittenFile {
                key: entry.key.clone(),
                id: result.id,
                context: writer.record(result.id).and_then(|record| record.context()),
                added: result.added,
                merged: result.merged,
                pragma_once_lost: result.pragma_once_lost,
                is_top: entry.index == 0,
            });
            if remaining > 0 {
                writer
                    .yield_lock(self.yield_threshold, self.cancel)
                    .map_err(WriteFailure::LockLost)?;
            }
        }
        report.files.reverse();
        Ok(report)
    }

    fn content(
        &self,
        store: &StoreView<'_>,
        unit: &ParsedUnit,
        index: usize,
        entries: &[Entry],
        entry_of: &[usize],
        replacements: &mut ReplacementHeaderMap,
    ) -> VersionContent {
        let file = &unit.files[index];
        let identity_of = |unit_index: usize| entries[entry_of[unit_index]].identity();
        let own_identity = identity_of(index);

        let mut children = unit
            .files
            .iter()
            .enumerate()
            .filter(|(_, child)| child.includer == Some(index))
            .map(|(child_index, _)| child_index);
        let includes = file
            .includes
            .iter()
            .map(|directive| {
                let target = match &directive.target {
                    Some(location) if directive.active && !directive.skipped => {
                        if directive.reused {
                            store.find_version_id(&FileKey::new(
                                unit.linkage,
                                location.clone(),
                                directive.significant.clone(),
                            ))
                        } else {
                            children.next().and_then(identity_of)
                        }
                    }
                    _ => None,
                };
                IncludeRecord {
                    spelled: directive.spelled.clone(),
                    system: directive.system,
                    offset: directive.offset,
                    active: directive.active,
                    target_location: directive.target.clone(),
                    target,
                    target_macros: directive.significant.clone(),
                    skipped: directive.skipped,
                }
            })
            .collect();

        let context = match file.includer {
            Some(includer) => identity_of(includer),
            None => own_identity
                .and_then(|id| store.record(id))
                .and_then(|record| record.context()),
        }
        .filter(|context| Some(*context) != own_identity);

        VersionContent {
            stamp: file.stamp.clone(),
            pragma_once: file.pragma_once,
            has_unresolved_include: file.has_unresolved_include,
            defective: file.defective,
            context,
            includes,
            macros: file.macros.clone(),
            names: file.names.clone(),
            replacement_header: self.replacement(unit, file, replacements),
        }
    }

    fn replacement(
        &self,
        unit: &ParsedUnit,
        file: &ParsedFile,
        replacements: &mut ReplacementHeaderMap,
    ) -> Option<String> {
        let own = self.scanner.extract(&file.comments);
        let includer = file
            .includer
            .and_then(|index| unit.files.get(index))
            .map(|includer| &includer.location);
        replacements.resolve(&file.location, own, includer)
    }
}

enum WriteFailure {
    /// A yield could not get the write lock back
    LockLost(StoreError),
    Store(StoreError),
}

impl From<StoreError> for WriteFailure {
    fn from(error: StoreError) -> Self {
        WriteFailure::Store(error)
    }
}
