//! The indexing task: classification, removal and ordered parsing of one request

use super::errors::IndexerError;
use super::location_task::{LocationTask, TaskGraph, UpdateKind, VersionTask};
use super::progress::{IndexerProgress, ProgressHandle};
use super::request::{IndexRequest, IndexerTaskOptions, TaskId};
use super::resolver::EngineResolver;
use super::writer::{IndexWriter, WritePlan, WriteReport, WrittenFile};
use crate::config::IndexerConfig;
use crate::model::{ContentStamp, FileLocation, LinkageId};
use crate::parser::replacement::{ReplacementHeaderMap, ReplacementHeaderScanner};
use crate::parser::{ParseContext, ParseError, ParseRequest, ParsedFile, ParsedUnit, ParserRegistry};
use crate::project::ProjectModel;
use crate::store::{FileId, IndexStore, StoreError, WriteLockGuard};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Everything a task needs from its surroundings
#[derive(Clone)]
pub struct IndexerContext {
    pub store: Arc<IndexStore>,
    pub project: Arc<dyn ProjectModel>,
    pub parsers: ParserRegistry,
    pub config: IndexerConfig,
    replacement_scanner: Arc<ReplacementHeaderScanner>,
}

impl IndexerContext {
    pub fn new(
        store: Arc<IndexStore>,
        project: Arc<dyn ProjectModel>,
        parsers: ParserRegistry,
        config: IndexerConfig,
    ) -> Self {
        Self {
            store,
            project,
            parsers,
            config,
            replacement_scanner: Arc::new(ReplacementHeaderScanner::default()),
        }
    }
}

#[derive(Default)]
struct InboxState {
    tasks: VecDeque<IndexerTask>,
    closed: bool,
}

/// Urgent tasks handed to a running task by the scheduler
#[derive(Clone, Default)]
pub struct UrgentInbox {
    inner: Arc<Mutex<InboxState>>,
}

impl UrgentInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand `task` over; gives it back once the running task has finished
    pub fn offer(&self, task: IndexerTask) -> Result<(), IndexerTask> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(task);
        }
        state.tasks.push_back(task);
        Ok(())
    }

    pub fn has_work(&self) -> bool {
        !self.inner.lock().tasks.is_empty()
    }

    fn take_next(&self) -> Option<IndexerTask> {
        self.inner.lock().tasks.pop_front()
    }

    /// Refuse further offers and return whatever was not run
    pub fn close(&self) -> Vec<IndexerTask> {
        let mut state = self.inner.lock();
        state.closed = true;
        state.tasks.drain(..).collect()
    }
}

pub(super) enum ParseOutcome {
    Written(WriteReport),
    DependsOn(FileLocation),
    Failed,
}

pub(super) struct ParseJob {
    pub linkage: LinkageId,
    /// Location whose task fails with the parse
    pub location: FileLocation,
    pub context: Option<ParseContext>,
    /// Headers the parse is meant to refresh inside `context`
    pub refreshing: Vec<FileLocation>,
    /// Outdated version to hand the new content to first
    pub preferred: Option<FileId>,
}

impl ParseJob {
    pub fn direct(linkage: LinkageId, location: &FileLocation) -> Self {
        Self {
            linkage,
            location: location.clone(),
            context: None,
            refreshing: Vec::new(),
            preferred: None,
        }
    }
}

enum Flow {
    Done,
    Urgent,
}

pub struct IndexerTask {
    pub(super) id: TaskId,
    request: IndexRequest,
    pub(super) options: IndexerTaskOptions,
    pub(super) graph: TaskGraph,
    pub(super) progress: ProgressHandle,
    inbox: UrgentInbox,
    classified: bool,
    pub(super) removals: Vec<FileId>,
    pub(super) stamp_refreshes: Vec<(FileId, ContentStamp)>,
    replacements: ReplacementHeaderMap,
    errors: usize,
    oom_failures: usize,
    polls: usize,
    written: Vec<(LinkageId, WrittenFile)>,
    pub(super) removed: Vec<(LinkageId, FileLocation, FileId)>,
}

impl IndexerTask {
    pub fn new(request: IndexRequest, options: IndexerTaskOptions) -> Self {
        let progress = ProgressHandle::new();
        progress.update(|p| {
            p.requested = request.file_count();
            p.remaining = request.file_count();
        });
        Self {
            id: TaskId::new(),
            request,
            options,
            graph: TaskGraph::new(),
            progress,
            inbox: UrgentInbox::new(),
            classified: false,
            removals: Vec::new(),
            stamp_refreshes: Vec::new(),
            replacements: ReplacementHeaderMap::new(),
            errors: 0,
            oom_failures: 0,
            polls: 0,
            written: Vec::new(),
            removed: Vec::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn request(&self) -> &IndexRequest {
        &self.request
    }

    pub fn options(&self) -> &IndexerTaskOptions {
        &self.options
    }

    pub fn file_count(&self) -> usize {
        self.request.file_count()
    }

    pub fn progress(&self) -> ProgressHandle {
        self.progress.clone()
    }

    pub fn inbox(&self) -> UrgentInbox {
        self.inbox.clone()
    }

    /// Whether `other` may run inside this task
    pub fn is_compatible(&self, other: &IndexerTask) -> bool {
        self.options == other.options
    }

    /// Work still outstanding, in files
    pub fn remaining(&self) -> usize {
        if self.classified {
            self.graph.pending()
        } else {
            self.file_count()
        }
    }

    /// Run to completion. A cancelled or failed run keeps its task graph, so running it
    /// again resumes where it stopped.
    pub fn run(
        &mut self,
        ctx: &IndexerContext,
        cancel: &CancellationToken,
    ) -> Result<IndexerProgress, IndexerError> {
        let started = Instant::now();
        info!(
            "IndexerTask {}: {} files requested, {} removed",
            self.id,
            self.request.files.len(),
            self.request.removed.len()
        );

        if !self.classified {
            self.classify(ctx, cancel)?;
            self.classified = true;
        }
        self.apply_removals(ctx, cancel)?;
        self.update_remaining();

        let linkages = self.linkage_order(ctx);
        let mut position = 0;
        while position < linkages.len() {
            match self.parse_linkage(ctx, linkages[position], cancel)? {
                Flow::Done => position += 1,
                Flow::Urgent => self.run_urgent_tasks(ctx, cancel)?,
            }
        }

        ctx.store.read_lock(cancel)?.flush()?;
        self.update_remaining();
        let progress = self.progress.snapshot();
        crate::log_timing!(tracing::Level::INFO, "indexer_task", started.elapsed());
        info!("IndexerTask {}: finished: {}", self.id, progress);
        Ok(progress)
    }

    /// Configured linkages first, in order, then any other linkage with tasks
    fn linkage_order(&self, ctx: &IndexerContext) -> Vec<LinkageId> {
        let mut linkages = ctx.config.linkages.clone();
        for linkage in self.graph.linkages() {
            if !linkages.contains(&linkage) {
                linkages.push(linkage);
            }
        }
        linkages
    }

    fn parse_linkage(
        &mut self,
        ctx: &IndexerContext,
        linkage: LinkageId,
        cancel: &CancellationToken,
    ) -> Result<Flow, IndexerError> {
        let Some(tasks) = self.graph.linkage(linkage) else {
            return Ok(Flow::Done);
        };
        let priorities = tasks.priorities();
        debug!(
            "IndexerTask {}: [{}] {} location tasks, {} pending",
            self.id,
            linkage,
            tasks.len(),
            tasks.pending()
        );

        for priority in priorities {
            let sources = self.select(linkage, |task| {
                task.priority == priority
                    && task.kind == UpdateKind::RequiredSource
                    && task.is_pending()
                    && !task.parse_attempted
            });
            for location in sources {
                if self.checkpoint(ctx, cancel)? {
                    return Ok(Flow::Urgent);
                }
                if self.is_pending(linkage, &location) {
                    self.parse_directly(ctx, linkage, &location, cancel)?;
                }
            }

            let headers = self.select(linkage, |task| {
                task.priority == priority && !task.failed && !task.outdated_in_context().is_empty()
            });
            for location in headers {
                let outdated = self
                    .graph
                    .task(linkage, &location)
                    .map(|task| task.outdated_in_context())
                    .unwrap_or_default();
                for id in outdated {
                    if self.checkpoint(ctx, cancel)? {
                        return Ok(Flow::Urgent);
                    }
                    if self.graph.is_outdated(linkage, &location, id) {
                        self.refresh_in_context(ctx, linkage, &location, id, cancel)?;
                    }
                }
            }

            let lonely = self.select(linkage, |task| {
                task.priority == priority
                    && task.needs_version()
                    && !task.failed
                    && !task.parse_attempted
            });
            for location in lonely {
                if self.checkpoint(ctx, cancel)? {
                    return Ok(Flow::Urgent);
                }
                if self
                    .graph
                    .task(linkage, &location)
                    .is_some_and(|task| task.needs_version())
                {
                    self.parse_directly(ctx, linkage, &location, cancel)?;
                }
            }
        }

        self.remove_unreachable(ctx, linkage, cancel)?;
        Ok(Flow::Done)
    }

    fn select(
        &self,
        linkage: LinkageId,
        predicate: impl Fn(&LocationTask) -> bool,
    ) -> Vec<FileLocation> {
        self.graph
            .linkage(linkage)
            .map(|tasks| tasks.select(predicate))
            .unwrap_or_default()
    }

    fn is_pending(&self, linkage: LinkageId, location: &FileLocation) -> bool {
        self.graph
            .task(linkage, location)
            .is_some_and(|task| task.is_pending())
    }

    /// Poll cancellation every few files; urgent work is looked for before every file
    fn checkpoint(
        &mut self,
        ctx: &IndexerContext,
        cancel: &CancellationToken,
    ) -> Result<bool, IndexerError> {
        self.polls += 1;
        if self.polls % ctx.config.cancel_poll_files.max(1) == 0 && cancel.is_cancelled() {
            return Err(IndexerError::Cancelled);
        }
        Ok(self.inbox.has_work())
    }

    pub(super) fn parse_directly(
        &mut self,
        ctx: &IndexerContext,
        linkage: LinkageId,
        location: &FileLocation,
        cancel: &CancellationToken,
    ) -> Result<ParseOutcome, IndexerError> {
        if let Some(task) = self.graph.task_mut(linkage, location) {
            task.parse_attempted = true;
        }
        self.parse_file(ctx, ParseJob::direct(linkage, location), cancel)
    }

    /// Parse one top-level file (directly or as the context of a header) and commit it
    pub(super) fn parse_file(
        &mut self,
        ctx: &IndexerContext,
        job: ParseJob,
        cancel: &CancellationToken,
    ) -> Result<ParseOutcome, IndexerError> {
        if cancel.is_cancelled() {
            return Err(IndexerError::Cancelled);
        }
        let top = job
            .context
            .as_ref()
            .map_or(&job.location, |context| &context.context)
            .clone();
        let Some(parser) = ctx.parsers.get(job.linkage) else {
            let error = IndexerError::NoParser {
                linkage: job.linkage,
            };
            return self.handle_failure(ctx, &job, error, cancel);
        };

        let unit = match ctx.project.content(&top) {
            Ok(content) => {
                trace!("IndexerTask {}: parsing {} for {}", self.id, top, job.location);
                let config = ctx.project.scanner_config(&top, job.linkage);
                let guard = ctx.store.read_lock(cancel)?;
                let resolver = EngineResolver::new(
                    &guard,
                    ctx.project.as_ref(),
                    &self.graph,
                    job.linkage,
                    &config,
                    &job.refreshing,
                    cancel,
                );
                let request = ParseRequest {
                    linkage: job.linkage,
                    content: &content,
                    config: &config,
                    context: job.context.as_ref(),
                };
                let parsed = parser.parse(&request, &resolver);
                drop(guard);
                match parsed {
                    Ok(unit) => unit,
                    Err(ParseError::DependsOnOutdatedFile { location }) => {
                        debug!("IndexerTask {}: {} depends on outdated {}", self.id, top, location);
                        return Ok(ParseOutcome::DependsOn(location));
                    }
                    Err(ParseError::ResourceExhausted { reason, .. }) => {
                        let error = IndexerError::ResourceExhausted {
                            retries: self.oom_failures,
                            reason,
                        };
                        return self.handle_failure(ctx, &job, error, cancel);
                    }
                    Err(e) => {
                        let error = IndexerError::from_parse(&top, e);
                        return self.handle_failure(ctx, &job, error, cancel);
                    }
                }
            }
            Err(e) if e.is_not_found() => {
                debug!("IndexerTask {}: {} is gone", self.id, top);
                self.fail(job.linkage, &job.location);
                return Ok(ParseOutcome::Failed);
            }
            Err(e) => {
                warn!("IndexerTask {}: cannot read {}: {}", self.id, top, e);
                ParsedUnit {
                    linkage: job.linkage,
                    files: vec![ParsedFile::defective(top.clone(), None)],
                }
            }
        };

        match self.commit(ctx, &job, &unit, cancel) {
            Ok(report) => {
                self.record_written(ctx, job.linkage, &report);
                Ok(ParseOutcome::Written(report))
            }
            Err(error) => self.handle_failure(ctx, &job, error, cancel),
        }
    }

    fn commit(
        &mut self,
        ctx: &IndexerContext,
        job: &ParseJob,
        unit: &ParsedUnit,
        cancel: &CancellationToken,
    ) -> Result<WriteReport, IndexerError> {
        let mut plan = WritePlan {
            keep_current_top: job.context.is_some(),
            ..Default::default()
        };
        for file in &unit.files {
            if plan.replaceable.contains_key(&file.location) {
                continue;
            }
            if let Some(task) = self.graph.task(job.linkage, &file.location) {
                let mut ids = task.outdated_ids();
                if let Some(preferred) = job.preferred
                    && file.location == job.location
                    && let Some(position) = ids.iter().position(|id| *id == preferred)
                {
                    ids.swap(0, position);
                }
                plan.replaceable.insert(file.location.clone(), ids);
            }
        }

        let guard = ctx.store.read_lock(cancel)?;
        let writer = IndexWriter::new(
            &guard,
            &ctx.replacement_scanner,
            ctx.config.yield_threshold,
            cancel,
        );
        writer.write(unit, &mut plan, &mut self.replacements)
    }

    fn record_written(&mut self, ctx: &IndexerContext, linkage: LinkageId, report: &WriteReport) {
        for file in &report.files {
            let location = &file.key.location;
            let requested = match self.graph.task_mut(linkage, location) {
                Some(task) => {
                    task.mark_stored(file.id, file.key.macros.clone(), file.context, file.merged);
                    task.requested
                }
                None => false,
            };
            self.graph.claim(location, linkage);
            let is_source = ctx.project.is_source(location);
            self.progress.update(|p| {
                if is_source {
                    p.completed_sources += 1;
                } else {
                    p.completed_headers += 1;
                    if requested {
                        p.primary_headers += 1;
                    }
                }
            });
            self.written.push((linkage, file.clone()));
        }
        self.update_remaining();
    }

    pub(super) fn update_remaining(&self) {
        let remaining = self.graph.pending();
        self.progress.update(|p| p.remaining = remaining);
    }

    pub(super) fn fail(&mut self, linkage: LinkageId, location: &FileLocation) {
        if let Some(task) = self.graph.task_mut(linkage, location) {
            task.failed = true;
            task.parse_attempted = true;
        }
        self.update_remaining();
    }

    fn handle_failure(
        &mut self,
        ctx: &IndexerContext,
        job: &ParseJob,
        error: IndexerError,
        cancel: &CancellationToken,
    ) -> Result<ParseOutcome, IndexerError> {
        match error {
            IndexerError::Cancelled => Err(IndexerError::Cancelled),
            IndexerError::ResourceExhausted { reason, .. } => {
                self.oom_failures += 1;
                if self.oom_failures > ctx.config.max_oom_retries {
                    return Err(IndexerError::ResourceExhausted {
                        retries: ctx.config.max_oom_retries,
                        reason,
                    });
                }
                warn!(
                    "IndexerTask {}: out of resources on {} ({} of {}): {}",
                    self.id, job.location, self.oom_failures, ctx.config.max_oom_retries, reason
                );
                self.fail(job.linkage, &job.location);
                Ok(ParseOutcome::Failed)
            }
            IndexerError::Commit {
                location,
                touched,
                source,
            } if !source.is_structural() => {
                self.graph.withdraw(job.linkage, &touched);
                self.update_remaining();
                let error = IndexerError::Commit {
                    location,
                    touched,
                    source,
                };
                self.record_error(ctx, &error, cancel)?;
                Ok(ParseOutcome::Failed)
            }
            error if error.is_fatal() => Err(error),
            error => {
                self.record_error(ctx, &error, cancel)?;
                self.fail(job.linkage, &job.location);
                Ok(ParseOutcome::Failed)
            }
        }
    }

    /// Count a recovered fault and drop whatever the caches derived from the failed work
    fn record_error(
        &mut self,
        ctx: &IndexerContext,
        error: &IndexerError,
        cancel: &CancellationToken,
    ) -> Result<(), IndexerError> {
        self.errors += 1;
        self.progress.update(|p| p.errors += 1);
        warn!("IndexerTask {}: {}", self.id, error);

        let guard = ctx.store.write_lock(cancel)?;
        guard.clear_result_cache();
        guard.finish(false)?;

        if self.errors > ctx.config.max_errors {
            return Err(IndexerError::TooManyErrors { count: self.errors });
        }
        Ok(())
    }

    /// Delete outdated versions nothing refreshed and nothing needs
    fn remove_unreachable(
        &mut self,
        ctx: &IndexerContext,
        linkage: LinkageId,
        cancel: &CancellationToken,
    ) -> Result<(), IndexerError> {
        loop {
            let doomed = self.unreachable(linkage);
            if doomed.is_empty() {
                return Ok(());
            }

            let guard = ctx.store.write_lock(cancel)?;
            for (location, id) in doomed {
                match guard.remove_version(id) {
                    Ok(removed) => {
                        debug!("IndexerTask {}: removed unreachable {}", self.id, removed.key);
                        self.progress.update(|p| p.removed_files += 1);
                        self.removed.push((linkage, location.clone(), id));
                        self.settle_orphans(&guard, removed.orphaned)?;
                    }
                    Err(StoreError::UnknownRecord(_)) => {}
                    Err(e) => return Err(e.into()),
                }
                if let Some(task) = self.graph.task_mut(linkage, &location) {
                    task.mark_removed(id);
                }
            }
            guard.finish(false)?;
            self.update_remaining();
        }
    }

    fn unreachable(&self, linkage: LinkageId) -> Vec<(FileLocation, FileId)> {
        self.graph
            .linkage(linkage)
            .map(|tasks| {
                tasks
                    .iter()
                    .filter(|task| !task.failed && !task.needs_version())
                    .flat_map(|task| {
                        task.outdated_ids()
                            .into_iter()
                            .map(|id| (task.location.clone(), id))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Versions whose context was removed move under a remaining includer. Those nobody
    /// includes any more are left for removal.
    pub(super) fn settle_orphans(
        &mut self,
        store: &WriteLockGuard<'_>,
        orphans: Vec<FileId>,
    ) -> Result<(), StoreError> {
        for orphan in orphans {
            let Some(record) = store.record(orphan) else {
                continue;
            };
            let linkage = record.linkage();
            match record.included_by.iter().next() {
                Some(includer) => {
                    trace!("Re-homing {} under {}", orphan, includer);
                    store.set_context(orphan, Some(*includer))?;
                    if let Some(task) = self.graph.task_mut(linkage, record.location()) {
                        task.set_context(orphan, Some(*includer));
                    }
                }
                None => {
                    store.set_context(orphan, None)?;
                    let task = self
                        .graph
                        .linkage_mut(linkage)
                        .require(record.location(), UpdateKind::OtherHeader, 0);
                    task.add_version(VersionTask {
                        id: orphan,
                        macros: record.key.macros.clone(),
                        context: None,
                        outdated: true,
                    });
                }
            }
        }
        Ok(())
    }

    fn run_urgent_tasks(
        &mut self,
        ctx: &IndexerContext,
        cancel: &CancellationToken,
    ) -> Result<(), IndexerError> {
        while let Some(mut urgent) = self.inbox.take_next() {
            info!(
                "IndexerTask {}: running urgent task {} ({} files)",
                self.id,
                urgent.id,
                urgent.file_count()
            );
            let progress = urgent.run(ctx, cancel)?;
            self.progress.update(|p| {
                p.requested += progress.requested;
                p.absorb(&progress);
            });
            self.absorb_writes(&urgent);
        }
        self.update_remaining();
        Ok(())
    }

    /// Take over what a nested task stored and removed, so it is not redone
    fn absorb_writes(&mut self, urgent: &IndexerTask) {
        for (linkage, file) in &urgent.written {
            if let Some(task) = self.graph.task_mut(*linkage, &file.key.location) {
                task.mark_stored(file.id, file.key.macros.clone(), file.context, file.merged);
            }
            self.graph.claim(&file.key.location, *linkage);
        }
        for (linkage, location, id) in &urgent.removed {
            if let Some(task) = self.graph.task_mut(*linkage, location) {
                task.mark_removed(*id);
            }
        }
        self.written.extend(urgent.written.iter().cloned());
        self.removed.extend(urgent.removed.iter().cloned());
    }
}
