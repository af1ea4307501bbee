//! Persistent index store
//!
//! Holds one [`FileRecord`] per (linkage, location, significant macros) version together
//! with three ordered secondary indices: all files, defective files and files with
//! unresolved includes. Access follows a read/write lock protocol ([`IndexLock`]):
//! queries are only reachable through a [`ReadLockGuard`] or [`WriteLockGuard`],
//! mutations only through the latter, and every release clears the [`ResultCache`].
//! Releasing the write lock delivers a [`ChangeEvent`] to the
//! registered listeners.

pub mod cache;
pub mod change;
pub mod error;
pub mod lock;
pub mod persist;
pub mod record;
pub mod versions;

pub use cache::{CacheKey, ResultCache};
pub use change::{ChangeEvent, ChangeListener};
pub use error::StoreError;
pub use lock::IndexLock;
pub use record::{FileId, FileKey, FileRecord, IncludeRecord, VersionContent};
pub use versions::{FileVersions, VersionInfo, VersionRegistry};

use crate::model::{
    ContentStamp, FileLocation, LinkageId, MacroDictionary, NameOccurrence, SignificantMacros,
};
use parking_lot::{Mutex, RwLock};
use persist::StorePayload;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Summary counts, mostly for logging and the CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub files: usize,
    pub defective: usize,
    pub unresolved: usize,
    pub names: usize,
    pub uncommitted: usize,
}

/// Result of committing an uncommitted version
#[derive(Debug, Clone, PartialEq)]
pub struct CommitResult {
    /// Identity the version ended up with
    pub id: FileId,
    /// No earlier version existed for this key or the replaced one
    pub added: bool,
    /// Record that was folded into `id` and no longer exists
    pub merged: Option<FileId>,
    /// The previous content had pragma-once semantics and the new one does not
    pub pragma_once_lost: bool,
}

/// Result of removing a version
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedVersion {
    pub key: FileKey,
    /// Versions whose parsed-in-context link pointed at the removed one
    pub orphaned: Vec<FileId>,
}

#[derive(Default)]
struct StoreState {
    records: HashMap<FileId, FileRecord>,
    uncommitted: HashMap<FileId, FileRecord>,
    next_id: u64,
    all_files: BTreeMap<FileKey, FileId>,
    defective: BTreeSet<FileKey>,
    unresolved: BTreeSet<FileKey>,
    names: BTreeMap<String, BTreeSet<FileId>>,
    /// Includers that point at a version not committed yet
    dangling_includers: HashMap<FileId, BTreeSet<FileId>>,
    pending_change: ChangeEvent,
    dirty: bool,
}

impl StoreState {
    fn from_payload(payload: StorePayload) -> Self {
        let mut state = StoreState {
            next_id: payload.next_id,
            ..Default::default()
        };
        for record in payload.records {
            state.next_id = state.next_id.max(record.id.0 + 1);
            state.index(&record);
            state.records.insert(record.id, record);
        }
        state
    }

    fn to_payload(&self) -> StorePayload {
        let mut records: Vec<FileRecord> = self.records.values().cloned().collect();
        records.sort_by_key(|record| record.id);
        StorePayload {
            next_id: self.next_id,
            records,
        }
    }

    fn allocate_id(&mut self) -> FileId {
        self.next_id += 1;
        FileId(self.next_id)
    }

    fn index(&mut self, record: &FileRecord) {
        self.all_files.insert(record.key.clone(), record.id);
        if record.content.defective {
            self.defective.insert(record.key.clone());
        }
        if record.content.has_unresolved_include {
            self.unresolved.insert(record.key.clone());
        }
        for name in record.content.names.iter().filter(|n| n.is_declaration()) {
            self.names
                .entry(name.name.clone())
                .or_default()
                .insert(record.id);
        }
    }

    fn unindex(&mut self, record: &FileRecord) {
        if self.all_files.get(&record.key) == Some(&record.id) {
            self.all_files.remove(&record.key);
        }
        self.defective.remove(&record.key);
        self.unresolved.remove(&record.key);
        for name in record.content.names.iter().filter(|n| n.is_declaration()) {
            if let Some(ids) = self.names.get_mut(&name.name) {
                ids.remove(&record.id);
                if ids.is_empty() {
                    self.names.remove(&name.name);
                }
            }
        }
    }

    /// Drop the back-links `includer` contributed to its include targets
    fn unlink_includes(&mut self, includer: FileId, targets: &[FileId]) {
        for target in targets {
            if let Some(record) = self.records.get_mut(target) {
                record.included_by.remove(&includer);
            }
            if let Some(dangling) = self.dangling_includers.get_mut(target) {
                dangling.remove(&includer);
            }
        }
    }

    fn link_includes(&mut self, includer: FileId, targets: &[FileId]) {
        for target in targets {
            match self.records.get_mut(target) {
                Some(record) => {
                    record.included_by.insert(includer);
                }
                None => {
                    self.dangling_includers
                        .entry(*target)
                        .or_default()
                        .insert(includer);
                }
            }
        }
    }

    /// Clear context links that point at `context` from targets it no longer includes
    fn drop_stale_contexts(&mut self, context: FileId, old_targets: &[FileId], kept: &[FileId]) {
        for target in old_targets.iter().filter(|t| !kept.contains(t)) {
            if let Some(record) = self.records.get_mut(target)
                && record.content.context == Some(context)
            {
                trace!("Clearing context of {} (no longer included by {})", target, context);
                record.content.context = None;
            }
        }
    }

    /// Move every reference to `from` over to `into` and delete `from`
    fn fold_into(&mut self, from: FileId, into: FileId) {
        let Some(old) = self.records.remove(&from) else {
            return;
        };
        debug!("IndexStore: folding {} into {}", from, into);
        self.unindex(&old);
        let old_targets: Vec<FileId> = old.include_targets().collect();
        self.unlink_includes(from, &old_targets);

        for includer in &old.included_by {
            if let Some(record) = self.records.get_mut(includer) {
                for include in record.content.includes.iter_mut() {
                    if include.target == Some(from) {
                        include.target = Some(into);
                    }
                }
            }
        }
        let contexts: Vec<FileId> = self
            .records
            .values()
            .filter(|record| record.content.context == Some(from))
            .map(|record| record.id)
            .collect();
        for id in contexts {
            if let Some(record) = self.records.get_mut(&id) {
                record.content.context = Some(into);
            }
        }
        if let Some(record) = self.records.get_mut(&into) {
            record.included_by.extend(old.included_by.iter().copied());
        }
        self.pending_change.record_cleared(&old.key.location);
    }

    fn versions_of(&self, linkage: LinkageId, location: &FileLocation) -> Vec<&FileRecord> {
        let start = FileKey::new(linkage, location.clone(), SignificantMacros::none());
        self.all_files
            .range(start..)
            .take_while(|(key, _)| key.linkage == linkage && &key.location == location)
            .filter_map(|(_, id)| self.records.get(id))
            .collect()
    }
}

pub struct IndexStore {
    path: Option<PathBuf>,
    lock: IndexLock,
    state: RwLock<StoreState>,
    cache: ResultCache,
    listeners: Mutex<Vec<ChangeListener>>,
}

impl IndexStore {
    /// Store that lives only in memory
    pub fn in_memory(lock_poll_interval: Duration) -> Self {
        Self::with_state(None, StoreState::default(), lock_poll_interval)
    }

    /// Open the store at `path`, starting empty if the file does not exist
    pub fn open(
        path: impl Into<PathBuf>,
        lock_poll_interval: Duration,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let state = match persist::read_store(&path)? {
            Some(payload) => StoreState::from_payload(payload),
            None => StoreState::default(),
        };
        Ok(Self::with_state(Some(path), state, lock_poll_interval))
    }

    /// Open the store at `path`; a corrupted or incompatible file is discarded and the
    /// store starts empty. Returns whether that happened.
    pub fn open_or_rebuild(
        path: impl Into<PathBuf>,
        lock_poll_interval: Duration,
    ) -> Result<(Self, bool), StoreError> {
        let path = path.into();
        match Self::open(path.clone(), lock_poll_interval) {
            Ok(store) => Ok((store, false)),
            Err(e) if e.is_structural() => {
                warn!("Discarding index store {}: {}", path.display(), e);
                std::fs::remove_file(&path)?;
                let state = StoreState {
                    pending_change: ChangeEvent::reloaded(),
                    dirty: true,
                    ..Default::default()
                };
                Ok((Self::with_state(Some(path), state, lock_poll_interval), true))
            }
            Err(e) => Err(e),
        }
    }

    fn with_state(path: Option<PathBuf>, state: StoreState, lock_poll_interval: Duration) -> Self {
        Self {
            path,
            lock: IndexLock::new(lock_poll_interval),
            state: RwLock::new(state),
            cache: ResultCache::new(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn add_change_listener(&self, listener: ChangeListener) {
        self.listeners.lock().push(listener);
    }

    // ========================================================================
    // Locking
    // ========================================================================

    /// Wait for a read lock; every query goes through the returned guard
    pub fn read_lock(&self, cancel: &CancellationToken) -> Result<ReadLockGuard<'_>, StoreError> {
        self.lock.acquire_read(cancel)?;
        Ok(ReadLockGuard {
            view: StoreView { store: self },
        })
    }

    /// Wait for the write lock; every mutation goes through the returned guard
    pub fn write_lock(&self, cancel: &CancellationToken) -> Result<WriteLockGuard<'_>, StoreError> {
        self.write_lock_within(None, cancel)
    }

    /// Like [`IndexStore::write_lock`], giving up with [`StoreError::LockTimeout`]
    pub fn write_lock_within(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<WriteLockGuard<'_>, StoreError> {
        self.lock.acquire_write(0, timeout, cancel)?;
        Ok(WriteLockGuard::new(self, 0))
    }

    pub fn is_write_locked(&self) -> bool {
        self.lock.is_write_locked()
    }

    pub fn read_lock_count(&self) -> usize {
        self.lock.read_lock_count()
    }

    pub fn has_waiting_readers(&self) -> bool {
        self.lock.has_waiting_readers()
    }

    fn release_read_lock(&self) {
        self.lock.release_read();
        self.cache.clear();
    }

    /// Release the write lock, re-establishing `establish_read_locks` read locks.
    ///
    /// Listeners are notified after the lock is released. With `flush` set, a file-backed
    /// store is written to disk first.
    fn release_write_lock(
        &self,
        establish_read_locks: usize,
        flush: bool,
    ) -> Result<(), StoreError> {
        let flushed = if flush { self.flush_locked() } else { Ok(()) };
        let event = std::mem::take(&mut self.state.write().pending_change);
        self.cache.clear();
        if let Some(held) = self.lock.release_write(establish_read_locks) {
            trace!("IndexStore: write lock held for {:?}", held);
        }
        self.notify(&event);
        flushed
    }

    fn notify(&self, event: &ChangeEvent) {
        if event.is_empty() {
            return;
        }
        let listeners = self.listeners.lock().clone();
        debug!(
            "IndexStore: change event ({} added, {} rewritten, {} cleared, reloaded={})",
            event.added.len(),
            event.rewritten.len(),
            event.cleared.len(),
            event.reloaded
        );
        for listener in listeners {
            listener(event);
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    fn flush_locked(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let payload = {
            let state = self.state.read();
            if !state.dirty {
                return Ok(());
            }
            state.to_payload()
        };
        let started = Instant::now();
        persist::write_store(path, &payload)?;
        self.state.write().dirty = false;
        crate::log_timing!(tracing::Level::DEBUG, "store_flush", started.elapsed());
        Ok(())
    }

    /// Deliver the rebuild notification of a freshly rebuilt store
    pub fn announce_reload(&self) {
        let event = std::mem::take(&mut self.state.write().pending_change);
        if event.reloaded {
            info!("Index store was rebuilt; notifying listeners");
        }
        self.notify(&event);
    }
}

/// Queries against the store; only reachable through a lock guard
#[derive(Clone, Copy)]
pub struct StoreView<'a> {
    store: &'a IndexStore,
}

impl<'a> StoreView<'a> {
    /// Results cached until the lock is released
    pub fn cache(&self) -> &'a ResultCache {
        &self.store.cache
    }

    pub fn record(&self, id: FileId) -> Option<FileRecord> {
        self.store.state.read().records.get(&id).cloned()
    }

    pub fn get_versions(&self, linkage: LinkageId, location: &FileLocation) -> Vec<FileRecord> {
        self.store
            .state
            .read()
            .versions_of(linkage, location)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn find_version(
        &self,
        linkage: LinkageId,
        location: &FileLocation,
        macros: &SignificantMacros,
    ) -> Option<FileRecord> {
        let state = self.store.state.read();
        let key = FileKey::new(linkage, location.clone(), macros.clone());
        state
            .all_files
            .get(&key)
            .and_then(|id| state.records.get(id))
            .cloned()
    }

    pub fn find_version_id(&self, key: &FileKey) -> Option<FileId> {
        self.store.state.read().all_files.get(key).copied()
    }

    /// Version whose significant macros agree with `dictionary`
    pub fn find_version_satisfied_by(
        &self,
        linkage: LinkageId,
        location: &FileLocation,
        dictionary: &MacroDictionary,
    ) -> Option<FileRecord> {
        self.store
            .state
            .read()
            .versions_of(linkage, location)
            .into_iter()
            .find(|record| record.key.macros.is_satisfied_by(dictionary))
            .cloned()
    }

    /// Linkages in which `location` has at least one version
    pub fn linkages_of(&self, location: &FileLocation) -> Vec<LinkageId> {
        let state = self.store.state.read();
        LinkageId::ALL
            .into_iter()
            .filter(|linkage| !state.versions_of(*linkage, location).is_empty())
            .collect()
    }

    pub fn all_files(&self) -> Vec<FileKey> {
        self.store.state.read().all_files.keys().cloned().collect()
    }

    pub fn defective_files(&self) -> Vec<FileKey> {
        self.store.state.read().defective.iter().cloned().collect()
    }

    pub fn unresolved_include_files(&self) -> Vec<FileKey> {
        self.store.state.read().unresolved.iter().cloned().collect()
    }

    /// Declarations and definitions of `name`, with the version they appear in
    pub fn find_declarations(&self, name: &str) -> Vec<(FileKey, NameOccurrence)> {
        let state = self.store.state.read();
        let Some(ids) = state.names.get(name) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| state.records.get(id))
            .flat_map(|record| {
                record
                    .content
                    .names
                    .iter()
                    .filter(|occurrence| occurrence.name == name && occurrence.is_declaration())
                    .map(|occurrence| (record.key.clone(), occurrence.clone()))
            })
            .collect()
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.store.state.read();
        StoreStats {
            files: state.records.len(),
            defective: state.defective.len(),
            unresolved: state.unresolved.len(),
            names: state.names.len(),
            uncommitted: state.uncommitted.len(),
        }
    }

    /// Write a file-backed store to disk if it changed since the last flush
    pub fn flush(&self) -> Result<(), StoreError> {
        self.store.flush_locked()
    }
}

/// Read lock released on drop
pub struct ReadLockGuard<'a> {
    view: StoreView<'a>,
}

impl ReadLockGuard<'_> {
    /// Trade this read lock for the write lock. The read lock is re-established when the
    /// returned guard is released.
    pub fn upgrade(&self, cancel: &CancellationToken) -> Result<WriteLockGuard<'_>, StoreError> {
        self.view.store.lock.acquire_write(1, None, cancel)?;
        Ok(WriteLockGuard::new(self.view.store, 1))
    }
}

impl<'a> std::ops::Deref for ReadLockGuard<'a> {
    type Target = StoreView<'a>;

    fn deref(&self) -> &StoreView<'a> {
        &self.view
    }
}

impl Drop for ReadLockGuard<'_> {
    fn drop(&mut self) {
        self.view.store.release_read_lock();
    }
}

/// Write lock released on drop without flushing
pub struct WriteLockGuard<'a> {
    view: StoreView<'a>,
    /// Read locks given up for this write lock and restored on release
    establish_read_locks: usize,
    released: bool,
}

impl<'a> WriteLockGuard<'a> {
    fn new(store: &'a IndexStore, establish_read_locks: usize) -> Self {
        Self {
            view: StoreView { store },
            establish_read_locks,
            released: false,
        }
    }

    fn held(&self) -> Result<&'a IndexStore, StoreError> {
        if self.released {
            Err(StoreError::WriteLockNotHeld)
        } else {
            Ok(self.view.store)
        }
    }

    /// Release now, optionally flushing to disk
    pub fn finish(mut self, flush: bool) -> Result<(), StoreError> {
        self.released = true;
        self.view
            .store
            .release_write_lock(self.establish_read_locks, flush)
    }

    /// Let blocked readers in when the lock has been held longer than `threshold`.
    ///
    /// On error the write lock is gone, the given-up read locks are back and every
    /// further mutation through this guard fails with [`StoreError::WriteLockNotHeld`].
    pub fn yield_lock(
        &mut self,
        threshold: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool, StoreError> {
        let store = self.held()?;
        let yielded = store.lock.yield_write(threshold, cancel, || {
            let event = std::mem::take(&mut store.state.write().pending_change);
            store.cache.clear();
            store.notify(&event);
        });
        match yielded {
            Ok(yielded) => Ok(yielded),
            Err(e) => {
                self.released = true;
                for _ in 0..self.establish_read_locks {
                    store.lock.acquire_read(&CancellationToken::new())?;
                }
                Err(e)
            }
        }
    }

    /// Stage a version without making it visible to queries
    pub fn add_uncommitted_version(
        &self,
        key: FileKey,
        content: VersionContent,
    ) -> Result<FileId, StoreError> {
        let mut state = self.held()?.state.write();
        let id = state.allocate_id();
        trace!("IndexStore: staged {} as {}", key, id);
        state
            .uncommitted
            .insert(id, FileRecord::new(id, key, content));
        Ok(id)
    }

    /// Identity a staged version will get when committed with `replaces`
    pub fn identity_on_commit(
        &self,
        staged: FileId,
        key: &FileKey,
        replaces: Option<FileId>,
    ) -> FileId {
        let state = self.view.store.state.read();
        state
            .all_files
            .get(key)
            .copied()
            .or(replaces.filter(|id| state.records.contains_key(id)))
            .unwrap_or(staged)
    }

    /// Swap the content of a staged version, e.g. once include targets are known
    pub fn replace_uncommitted_content(
        &self,
        staged: FileId,
        content: VersionContent,
    ) -> Result<(), StoreError> {
        let mut state = self.held()?.state.write();
        let record = state
            .uncommitted
            .get_mut(&staged)
            .ok_or(StoreError::NotUncommitted(staged))?;
        record.content = content;
        Ok(())
    }

    /// Point the parsed-in-context link of a committed version elsewhere
    pub fn set_context(&self, id: FileId, context: Option<FileId>) -> Result<(), StoreError> {
        let store = self.held()?;
        let mut state = store.state.write();
        let record = state
            .records
            .get_mut(&id)
            .ok_or(StoreError::UnknownRecord(id))?;
        record.content.context = context;
        let location = record.key.location.clone();
        state.pending_change.record_rewritten(&location);
        state.dirty = true;
        drop(state);
        store.cache.clear();
        Ok(())
    }

    /// Drop staged versions that will not be committed
    pub fn discard_uncommitted(&self, ids: &[FileId]) {
        let mut state = self.view.store.state.write();
        for id in ids {
            state.uncommitted.remove(id);
        }
    }

    /// Make a staged version visible.
    ///
    /// An existing version with the same key keeps its identity and takes the new
    /// content. Otherwise `replaces` (a version of the same file being superseded) keeps
    /// its identity under the new key. If both exist, `replaces` is folded into the
    /// existing version and every back-link is ported across.
    pub fn commit_uncommitted_version(
        &self,
        staged: FileId,
        replaces: Option<FileId>,
    ) -> Result<CommitResult, StoreError> {
        let store = self.held()?;
        let mut state = store.state.write();
        let mut incoming = state
            .uncommitted
            .remove(&staged)
            .ok_or(StoreError::NotUncommitted(staged))?;

        let existing = state.all_files.get(&incoming.key).copied();
        let replaced =
            replaces.filter(|id| Some(*id) != existing && state.records.contains_key(id));
        let target = existing.or(replaced);

        let mut merged = None;
        if let (Some(existing), Some(replaced)) = (existing, replaced) {
            state.fold_into(replaced, existing);
            merged = Some(replaced);
        }

        let result = match target {
            Some(id) => {
                let mut record = state
                    .records
                    .remove(&id)
                    .ok_or(StoreError::UnknownRecord(id))?;
                state.unindex(&record);

                let old_targets: Vec<FileId> = record.include_targets().collect();
                let new_targets: Vec<FileId> = incoming.include_targets().collect();
                state.unlink_includes(id, &old_targets);
                state.drop_stale_contexts(id, &old_targets, &new_targets);

                let pragma_once_lost = record.content.pragma_once && !incoming.content.pragma_once;
                if record.key != incoming.key {
                    state.pending_change.record_cleared(&record.key.location);
                }
                record.key = incoming.key;
                record.content = incoming.content;
                state.index(&record);
                state.link_includes(id, &new_targets);
                state.pending_change.record_rewritten(&record.key.location);
                state.records.insert(id, record);

                CommitResult {
                    id,
                    added: false,
                    merged,
                    pragma_once_lost,
                }
            }
            None => {
                let id = incoming.id;
                if let Some(includers) = state.dangling_includers.remove(&id) {
                    incoming.included_by.extend(includers);
                }
                let new_targets: Vec<FileId> = incoming.include_targets().collect();
                state.index(&incoming);
                state.link_includes(id, &new_targets);
                state.pending_change.record_added(&incoming.key.location);
                state.records.insert(id, incoming);
                CommitResult {
                    id,
                    added: true,
                    merged: None,
                    pragma_once_lost: false,
                }
            }
        };

        state.dirty = true;
        drop(state);
        store.cache.clear();
        Ok(result)
    }

    /// Stage and commit in one step
    pub fn add_or_replace_version(
        &self,
        key: FileKey,
        content: VersionContent,
    ) -> Result<CommitResult, StoreError> {
        let staged = self.add_uncommitted_version(key, content)?;
        self.commit_uncommitted_version(staged, None)
    }

    /// Remove a version, clearing the back-links and context links that point at it
    pub fn remove_version(&self, id: FileId) -> Result<RemovedVersion, StoreError> {
        let store = self.held()?;
        let mut state = store.state.write();
        let record = state
            .records
            .remove(&id)
            .ok_or(StoreError::UnknownRecord(id))?;
        state.unindex(&record);

        let targets: Vec<FileId> = record.include_targets().collect();
        state.unlink_includes(id, &targets);

        let mut orphaned = Vec::new();
        for target in &targets {
            if let Some(included) = state.records.get_mut(target)
                && included.content.context == Some(id)
            {
                included.content.context = None;
                orphaned.push(*target);
            }
        }
        for includer in &record.included_by {
            if let Some(including) = state.records.get_mut(includer) {
                for include in including.content.includes.iter_mut() {
                    if include.target == Some(id) {
                        include.target = None;
                    }
                }
            }
        }

        state.pending_change.record_cleared(&record.key.location);
        state.dirty = true;
        drop(state);
        store.cache.clear();
        debug!("IndexStore: removed {} {}", id, record.key);
        Ok(RemovedVersion {
            key: record.key,
            orphaned,
        })
    }

    /// Record a new stamp for content that is known to be unchanged
    pub fn update_stamp(&self, id: FileId, stamp: ContentStamp) -> Result<(), StoreError> {
        let mut state = self.held()?.state.write();
        let record = state
            .records
            .get_mut(&id)
            .ok_or(StoreError::UnknownRecord(id))?;
        record.content.stamp = stamp;
        state.dirty = true;
        Ok(())
    }

    pub fn clear_result_cache(&self) {
        self.view.store.cache.clear();
    }
}

impl<'a> std::ops::Deref for WriteLockGuard<'a> {
    type Target = StoreView<'a>;

    fn deref(&self) -> &StoreView<'a> {
        &self.view
    }
}

impl Drop for WriteLockGuard<'_> {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self
                .view
                .store
                .release_write_lock(self.establish_read_locks, false)
        {
            warn!("IndexStore: releasing write lock failed: {}", e);
        }
    }
}
