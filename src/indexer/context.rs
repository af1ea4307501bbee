//! Refreshing headers in the context they were parsed in
//!
//! A header version parsed as part of a source carries a back-link to the file whose
//! parse produced it. When only the header changed, the cheapest correct refresh is to
//! parse that context again and let the writer keep the context's own version. Contexts
//! chain (a header's context may itself be a header parsed in context), so the walk goes
//! up to the first version without a context and refreshes outdated links on the way.

use super::errors::IndexerError;
use super::task::{IndexerContext, IndexerTask, ParseJob, ParseOutcome};
use crate::model::{FileLocation, LinkageId};
use crate::parser::ParseContext;
use crate::store::FileId;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

impl IndexerTask {
    pub(super) fn refresh_in_context(
        &mut self,
        ctx: &IndexerContext,
        linkage: LinkageId,
        location: &FileLocation,
        id: FileId,
        cancel: &CancellationToken,
    ) -> Result<(), IndexerError> {
        let mut safeguard = Vec::new();
        self.parse_version_in_context(ctx, linkage, location, id, &mut safeguard, cancel)
    }

    /// Refresh the outdated version `id` of `location` by parsing its context. `safeguard`
    /// holds the versions already on the current walk; it guards against context cycles.
    fn parse_version_in_context(
        &mut self,
        ctx: &IndexerContext,
        linkage: LinkageId,
        location: &FileLocation,
        id: FileId,
        safeguard: &mut Vec<FileId>,
        cancel: &CancellationToken,
    ) -> Result<(), IndexerError> {
        let mark = safeguard.len();
        let mut tried = HashSet::new();
        loop {
            if !self.graph.is_outdated(linkage, location, id) {
                return Ok(());
            }
            let Some((context_id, context_location)) =
                self.find_context(ctx, linkage, location, id, safeguard, cancel)?
            else {
                return Ok(());
            };
            if context_id == id || !tried.insert(context_id) {
                return Ok(());
            }

            trace!("IndexerTask {}: refreshing {} in {}", self.id, location, context_location);
            let context = ParseContext {
                context: context_location.clone(),
                target: location.clone(),
            };
            let mut refreshing = vec![location.clone()];
            let job = self.context_job(linkage, &context, &refreshing, id);
            let mut outcome = self.parse_file(ctx, job, cancel)?;
            while let ParseOutcome::DependsOn(dependency) = &outcome {
                if refreshing.contains(dependency) {
                    // a failed task keeps its stored version from removal as unreachable
                    warn!(
                        "IndexerTask {}: giving up on {} in {}: still waits for {}",
                        self.id, location, context_location, dependency
                    );
                    self.fail(linkage, location);
                    return Ok(());
                }
                debug!(
                    "IndexerTask {}: {} in {} waits for {}",
                    self.id, location, context_location, dependency
                );
                refreshing.push(dependency.clone());
                let nested = ParseContext {
                    context: context_location.clone(),
                    target: dependency.clone(),
                };
                let job = self.context_job(linkage, &nested, &refreshing, id);
                outcome = self.parse_file(ctx, job, cancel)?;
            }

            match outcome {
                ParseOutcome::Written(report) if report.lost_pragma_once(location) => {
                    // the context no longer reaches this version; look for another one
                    safeguard.truncate(mark);
                }
                _ => return Ok(()),
            }
        }
    }

    fn context_job(
        &self,
        linkage: LinkageId,
        context: &ParseContext,
        refreshing: &[FileLocation],
        preferred: FileId,
    ) -> ParseJob {
        ParseJob {
            linkage,
            location: context.target.clone(),
            context: Some(context.clone()),
            refreshing: refreshing.to_vec(),
            preferred: Some(preferred),
        }
    }

    /// Walk the context links of `id` up to a version without a context, refreshing any
    /// outdated link first. `None` when there is nothing to parse in.
    fn find_context(
        &mut self,
        ctx: &IndexerContext,
        linkage: LinkageId,
        location: &FileLocation,
        id: FileId,
        safeguard: &mut Vec<FileId>,
        cancel: &CancellationToken,
    ) -> Result<Option<(FileId, FileLocation)>, IndexerError> {
        let mut current = id;
        let mut current_location = location.clone();
        loop {
            let Some(record) = ctx.store.read_lock(cancel)?.record(current) else {
                return Ok(None);
            };
            let Some(next) = record.context() else {
                return Ok(Some((current, current_location)));
            };
            if safeguard.contains(&next) {
                debug!("IndexerTask {}: context cycle at {}", self.id, next);
                return Ok(None);
            }
            safeguard.push(next);
            let Some(next_record) = ctx.store.read_lock(cancel)?.record(next) else {
                return Ok(None);
            };
            let next_location = next_record.location().clone();

            if self.graph.is_outdated(linkage, &next_location, next) {
                if next_record.context().is_none() {
                    self.parse_directly(ctx, linkage, &next_location, cancel)?;
                } else {
                    self.parse_version_in_context(
                        ctx,
                        linkage,
                        &next_location,
                        next,
                        safeguard,
                        cancel,
                    )?;
                }
                // refreshing the link may have refreshed the target as well
                if self.graph.is_outdated(linkage, &next_location, next)
                    || !self.graph.is_outdated(linkage, location, id)
                {
                    return Ok(None);
                }
            }
            current = next;
            current_location = next_location;
        }
    }
}
