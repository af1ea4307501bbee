//! Location and version tasks: the transient work graph of one indexing run
//!
//! For every (linkage, location) that needs attention the run keeps a [`LocationTask`]
//! with the strongest [`UpdateKind`] any request asked for, and one [`VersionTask`] per
//! stored version of the file, each flagged outdated or current.

use crate::model::{FileLocation, LinkageId, SignificantMacros};
use crate::store::FileId;
use std::collections::BTreeMap;

/// How strongly a location needs to be indexed, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UpdateKind {
    /// Only refresh versions that already exist
    OtherHeader,
    /// Needs a version in one linkage; the first linkage to store one claims it
    OneLinkageHeader,
    RequiredHeader,
    RequiredSource,
}

impl UpdateKind {
    pub fn requires_version(self) -> bool {
        self >= UpdateKind::OneLinkageHeader
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VersionTask {
    pub id: FileId,
    pub macros: SignificantMacros,
    pub context: Option<FileId>,
    pub outdated: bool,
}

#[derive(Debug, Clone)]
pub struct LocationTask {
    pub location: FileLocation,
    pub kind: UpdateKind,
    pub priority: i32,
    /// Named by the request rather than discovered through the store
    pub requested: bool,
    versions: Vec<VersionTask>,
    stored_version: bool,
    pub parse_attempted: bool,
    pub failed: bool,
    pub claimed_elsewhere: bool,
}

impl LocationTask {
    pub fn new(location: FileLocation, kind: UpdateKind, priority: i32) -> Self {
        Self {
            location,
            kind,
            priority,
            requested: false,
            versions: Vec::new(),
            stored_version: false,
            parse_attempted: false,
            failed: false,
            claimed_elsewhere: false,
        }
    }

    /// Raise the kind and priority to the stronger of both
    pub fn strengthen(&mut self, kind: UpdateKind, priority: i32) {
        self.kind = self.kind.max(kind);
        self.priority = self.priority.max(priority);
    }

    pub fn versions(&self) -> &[VersionTask] {
        &self.versions
    }

    pub fn version(&self, id: FileId) -> Option<&VersionTask> {
        self.versions.iter().find(|v| v.id == id)
    }

    /// Track a stored version; an entry with the same id is replaced
    pub fn add_version(&mut self, version: VersionTask) {
        match self.versions.iter_mut().find(|v| v.id == version.id) {
            Some(existing) => *existing = version,
            None => self.versions.push(version),
        }
    }

    pub fn set_outdated(&mut self, id: FileId, outdated: bool) {
        if let Some(version) = self.versions.iter_mut().find(|v| v.id == id) {
            version.outdated = outdated;
        }
    }

    pub fn set_context(&mut self, id: FileId, context: Option<FileId>) {
        if let Some(version) = self.versions.iter_mut().find(|v| v.id == id) {
            version.context = context;
        }
    }

    pub fn has_outdated(&self) -> bool {
        self.versions.iter().any(|v| v.outdated)
    }

    pub fn is_outdated(&self, id: FileId) -> bool {
        self.version(id).is_some_and(|v| v.outdated)
    }

    pub fn outdated_ids(&self) -> Vec<FileId> {
        self.versions
            .iter()
            .filter(|v| v.outdated)
            .map(|v| v.id)
            .collect()
    }

    /// Outdated versions that were parsed inside an includer
    pub fn outdated_in_context(&self) -> Vec<FileId> {
        self.versions
            .iter()
            .filter(|v| v.outdated && v.context.is_some())
            .map(|v| v.id)
            .collect()
    }

    pub fn needs_version(&self) -> bool {
        self.kind.requires_version()
            && !self.claimed_elsewhere
            && !self.stored_version
            && self.versions.iter().all(|v| v.outdated)
    }

    pub fn is_complete(&self) -> bool {
        !self.has_outdated() && !self.needs_version()
    }

    /// Whether the run still has to do something here
    pub fn is_pending(&self) -> bool {
        !self.failed && !self.is_complete()
    }

    /// Record a committed version. `merged` names a version that was folded into `id`.
    pub fn mark_stored(
        &mut self,
        id: FileId,
        macros: SignificantMacros,
        context: Option<FileId>,
        merged: Option<FileId>,
    ) {
        if let Some(merged) = merged {
            self.versions.retain(|v| v.id != merged);
        }
        self.add_version(VersionTask {
            id,
            macros,
            context,
            outdated: false,
        });
        self.stored_version = true;
    }

    pub fn mark_removed(&mut self, id: FileId) {
        self.versions.retain(|v| v.id != id);
    }
}

/// Location tasks of one linkage
#[derive(Debug, Clone, Default)]
pub struct LinkageTasks {
    tasks: BTreeMap<FileLocation, LocationTask>,
}

impl LinkageTasks {
    pub fn get(&self, location: &FileLocation) -> Option<&LocationTask> {
        self.tasks.get(location)
    }

    pub fn get_mut(&mut self, location: &FileLocation) -> Option<&mut LocationTask> {
        self.tasks.get_mut(location)
    }

    /// Task for `location`, created or strengthened to `kind`
    pub fn require(
        &mut self,
        location: &FileLocation,
        kind: UpdateKind,
        priority: i32,
    ) -> &mut LocationTask {
        let task = self
            .tasks
            .entry(location.clone())
            .or_insert_with(|| LocationTask::new(location.clone(), kind, priority));
        task.strengthen(kind, priority);
        task
    }

    pub fn remove(&mut self, location: &FileLocation) -> Option<LocationTask> {
        self.tasks.remove(location)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocationTask> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Distinct priorities, highest first
    pub fn priorities(&self) -> Vec<i32> {
        let mut priorities: Vec<i32> = self.tasks.values().map(|t| t.priority).collect();
        priorities.sort_unstable_by(|a, b| b.cmp(a));
        priorities.dedup();
        priorities
    }

    pub fn select(&self, predicate: impl Fn(&LocationTask) -> bool) -> Vec<FileLocation> {
        self.tasks
            .values()
            .filter(|task| predicate(task))
            .map(|task| task.location.clone())
            .collect()
    }

    pub fn pending(&self) -> usize {
        self.tasks.values().filter(|t| t.is_pending()).count()
    }
}

/// Location tasks of every linkage
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    linkages: BTreeMap<LinkageId, LinkageTasks>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn linkage(&self, linkage: LinkageId) -> Option<&LinkageTasks> {
        self.linkages.get(&linkage)
    }

    pub fn linkage_mut(&mut self, linkage: LinkageId) -> &mut LinkageTasks {
        self.linkages.entry(linkage).or_default()
    }

    pub fn task(&self, linkage: LinkageId, location: &FileLocation) -> Option<&LocationTask> {
        self.linkage(linkage).and_then(|tasks| tasks.get(location))
    }

    pub fn task_mut(
        &mut self,
        linkage: LinkageId,
        location: &FileLocation,
    ) -> Option<&mut LocationTask> {
        self.linkages
            .get_mut(&linkage)
            .and_then(|tasks| tasks.get_mut(location))
    }

    pub fn linkages(&self) -> Vec<LinkageId> {
        self.linkages.keys().copied().collect()
    }

    pub fn is_outdated(&self, linkage: LinkageId, location: &FileLocation, id: FileId) -> bool {
        self.task(linkage, location)
            .is_some_and(|task| task.is_outdated(id))
    }

    /// Another linkage stored `location`; lazily indexed headers need nothing more here
    pub fn claim(&mut self, location: &FileLocation, owner: LinkageId) {
        for (linkage, tasks) in self.linkages.iter_mut() {
            if *linkage == owner {
                continue;
            }
            if let Some(task) = tasks.get_mut(location)
                && task.kind == UpdateKind::OneLinkageHeader
            {
                task.claimed_elsewhere = true;
            }
        }
    }

    /// Drop the tasks of `locations`; a later run picks them up again
    pub fn withdraw(&mut self, linkage: LinkageId, locations: &[FileLocation]) {
        if let Some(tasks) = self.linkages.get_mut(&linkage) {
            for location in locations {
                tasks.remove(location);
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.linkages.values().map(LinkageTasks::pending).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.linkages.values().all(LinkageTasks::is_empty)
    }
}
