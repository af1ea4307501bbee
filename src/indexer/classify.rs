//! Turning a request into the run's task graph, and applying requested removals

use super::errors::IndexerError;
use super::location_task::{UpdateKind, VersionTask};
use super::request::{IndexerTaskOptions, RequestedFile};
use super::task::{IndexerContext, IndexerTask};
use crate::config::UnusedHeaderStrategy;
use crate::model::{ContentStamp, FileLocation, FileStat, LinkageId};
use crate::project::ProjectModel;
use crate::store::{FileRecord, StoreError, StoreView};
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Staleness {
    Current,
    /// Unchanged content under a new stamp; the stored stamp is refreshed
    StampOnly(ContentStamp),
    Outdated,
}

/// Compares stored versions of one file against the live file. The stat and the content
/// hash are fetched at most once.
pub(super) struct StalenessCheck<'a> {
    project: &'a dyn ProjectModel,
    location: &'a FileLocation,
    options: IndexerTaskOptions,
    forced: bool,
    stat: Option<Option<FileStat>>,
    current: Option<Option<ContentStamp>>,
}

impl<'a> StalenessCheck<'a> {
    pub fn new(
        project: &'a dyn ProjectModel,
        location: &'a FileLocation,
        options: IndexerTaskOptions,
        forced: bool,
    ) -> Self {
        Self {
            project,
            location,
            options,
            forced,
            stat: None,
            current: None,
        }
    }

    pub fn check(&mut self, version: &FileRecord) -> Staleness {
        let content = &version.content;
        if self.forced || self.options.force {
            return Staleness::Outdated;
        }
        if self.options.force_unresolved && content.has_unresolved_include {
            return Staleness::Outdated;
        }
        if !self.options.check_timestamps {
            return Staleness::Current;
        }
        if content.defective {
            return Staleness::Outdated;
        }
        let Some(stat) = self.stat() else {
            return Staleness::Outdated;
        };
        let stored = &content.stamp;
        if stat.modified == stored.modified && stat.size_fingerprint == stored.size_fingerprint {
            return Staleness::Current;
        }
        if self.options.check_content_hash
            && stat.size_fingerprint == stored.size_fingerprint
            && let Some(current) = self.current_stamp()
            && current.content_hash == stored.content_hash
        {
            return Staleness::StampOnly(current);
        }
        Staleness::Outdated
    }

    fn stat(&mut self) -> Option<FileStat> {
        let (project, location) = (self.project, self.location);
        self.stat
            .get_or_insert_with(|| project.stat(location).ok())
            .clone()
    }

    fn current_stamp(&mut self) -> Option<ContentStamp> {
        let (project, location) = (self.project, self.location);
        self.current
            .get_or_insert_with(|| project.content(location).ok().map(|content| content.stamp))
            .clone()
    }
}

impl IndexerTask {
    /// Build the task graph from the request against the current store contents
    pub(super) fn classify(
        &mut self,
        ctx: &IndexerContext,
        cancel: &CancellationToken,
    ) -> Result<(), IndexerError> {
        let store = ctx.store.read_lock(cancel)?;
        let files: Vec<RequestedFile> = self.request().files.clone();
        for file in &files {
            if cancel.is_cancelled() {
                return Err(IndexerError::Cancelled);
            }
            let Some(location) = ctx.project.resolve_location(&file.path) else {
                debug!("IndexerTask {}: cannot resolve {}", self.id, file.path.display());
                continue;
            };
            self.classify_file(ctx, &store, file, &location);
        }

        let removed = self.request().removed.clone();
        for path in &removed {
            let location = ctx
                .project
                .resolve_location(path)
                .unwrap_or_else(|| FileLocation::file(path));
            for linkage in store.linkages_of(&location) {
                for record in store.get_versions(linkage, &location) {
                    trace!("IndexerTask {}: {} requested for removal", self.id, record.key);
                    self.removals.push(record.id);
                }
            }
        }
        drop(store);

        debug!(
            "IndexerTask {}: classified, {} pending, {} removals",
            self.id,
            self.graph.pending(),
            self.removals.len()
        );
        Ok(())
    }

    fn classify_file(
        &mut self,
        ctx: &IndexerContext,
        store: &StoreView<'_>,
        file: &RequestedFile,
        location: &FileLocation,
    ) {
        let options = self.options;
        let project = ctx.project.as_ref();
        let (kind, required) = required_linkages(ctx, options, location);

        let mut linkages: BTreeSet<LinkageId> = required.iter().copied().collect();
        linkages.extend(store.linkages_of(location));

        let mut check = StalenessCheck::new(project, location, options, file.force);
        let mut claimed = None;
        for linkage in linkages {
            let versions = store.get_versions(linkage, location);
            let is_required = required.contains(&linkage);
            if !is_required && versions.is_empty() {
                continue;
            }

            let mut tracked = Vec::new();
            for record in &versions {
                if !is_required && record.context().is_none() {
                    trace!("IndexerTask {}: {} is no longer needed", self.id, record.key);
                    self.removals.push(record.id);
                    continue;
                }
                let outdated = match check.check(record) {
                    Staleness::Current => false,
                    Staleness::StampOnly(stamp) => {
                        self.stamp_refreshes.push((record.id, stamp));
                        false
                    }
                    Staleness::Outdated => true,
                };
                if !outdated && kind == Some(UpdateKind::OneLinkageHeader) && claimed.is_none() {
                    claimed = Some(linkage);
                }
                tracked.push(VersionTask {
                    id: record.id,
                    macros: record.key.macros.clone(),
                    context: record.context(),
                    outdated,
                });
            }
            if !is_required && tracked.is_empty() {
                continue;
            }

            let (kind, priority) = match (is_required, kind) {
                (true, Some(kind)) => (kind, file.priority),
                _ => (UpdateKind::OtherHeader, file.priority),
            };
            let task = self.graph.linkage_mut(linkage).require(location, kind, priority);
            task.requested |= is_required;
            for version in tracked {
                task.add_version(version);
            }
        }

        if let Some(owner) = claimed {
            self.graph.claim(location, owner);
        }
    }

    /// Apply stamp refreshes and requested removals under one write lock
    pub(super) fn apply_removals(
        &mut self,
        ctx: &IndexerContext,
        cancel: &CancellationToken,
    ) -> Result<(), IndexerError> {
        if self.removals.is_empty() && self.stamp_refreshes.is_empty() {
            return Ok(());
        }
        let guard = ctx.store.write_lock(cancel)?;
        for (id, stamp) in std::mem::take(&mut self.stamp_refreshes) {
            match guard.update_stamp(id, stamp) {
                Ok(()) | Err(StoreError::UnknownRecord(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        for id in std::mem::take(&mut self.removals) {
            let removed = match guard.remove_version(id) {
                Ok(removed) => removed,
                Err(StoreError::UnknownRecord(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            debug!("IndexerTask {}: removed {}", self.id, removed.key);
            let linkage = removed.key.linkage;
            if let Some(task) = self.graph.task_mut(linkage, &removed.key.location) {
                task.mark_removed(id);
            }
            self.progress.update(|p| p.removed_files += 1);
            self.removed.push((linkage, removed.key.location.clone(), id));
            self.settle_orphans(&guard, removed.orphaned)?;
        }
        guard.finish(false)?;
        Ok(())
    }
}

/// The update kind a requested file needs and the linkages it needs it in
fn required_linkages(
    ctx: &IndexerContext,
    options: IndexerTaskOptions,
    location: &FileLocation,
) -> (Option<UpdateKind>, Vec<LinkageId>) {
    let project = ctx.project.as_ref();
    if !options.index_files_not_in_build && !project.is_in_build(location) {
        return (None, Vec::new());
    }
    if project.is_source(location) {
        let linkages = project
            .source_linkages(location)
            .into_iter()
            .filter(|linkage| ctx.parsers.get(*linkage).is_some())
            .collect();
        return (Some(UpdateKind::RequiredSource), linkages);
    }
    let kind = match options.unused_headers {
        UnusedHeaderStrategy::Skip => return (None, Vec::new()),
        UnusedHeaderStrategy::DefaultLanguage => UpdateKind::OneLinkageHeader,
        UnusedHeaderStrategy::Both => UpdateKind::RequiredHeader,
    };
    let linkages = ctx
        .config
        .linkages
        .iter()
        .copied()
        .filter(|linkage| ctx.parsers.get(*linkage).is_some())
        .collect();
    (Some(kind), linkages)
}
