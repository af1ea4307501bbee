//! File version registry
//!
//! In-memory view of the versions a file has in one linkage, layered over the store and
//! memoized in its result cache for the duration of a lock episode.

use super::{CacheKey, FileId, FileRecord, StoreView};
use crate::model::{ContentStamp, FileLocation, LinkageId, MacroDictionary, SignificantMacros};
use std::convert::Infallible;
use std::sync::Arc;

const VERSIONS_NAMESPACE: &str = "file-versions";

/// What the indexer needs to know about one stored version
#[derive(Debug, Clone, PartialEq)]
pub struct VersionInfo {
    pub id: FileId,
    pub macros: SignificantMacros,
    pub stamp: ContentStamp,
    pub pragma_once: bool,
    pub context: Option<FileId>,
    pub has_unresolved_include: bool,
    pub defective: bool,
}

impl From<&FileRecord> for VersionInfo {
    fn from(record: &FileRecord) -> Self {
        Self {
            id: record.id,
            macros: record.key.macros.clone(),
            stamp: record.content.stamp.clone(),
            pragma_once: record.content.pragma_once,
            context: record.content.context,
            has_unresolved_include: record.content.has_unresolved_include,
            defective: record.content.defective,
        }
    }
}

/// Known versions of one file in one linkage
#[derive(Debug, Clone, PartialEq)]
pub struct FileVersions {
    pub linkage: LinkageId,
    pub location: FileLocation,
    versions: Vec<VersionInfo>,
}

impl FileVersions {
    pub fn new(linkage: LinkageId, location: FileLocation, versions: Vec<VersionInfo>) -> Self {
        Self {
            linkage,
            location,
            versions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VersionInfo> {
        self.versions.iter()
    }

    pub fn find(&self, macros: &SignificantMacros) -> Option<&VersionInfo> {
        self.versions.iter().find(|v| &v.macros == macros)
    }

    pub fn find_by_id(&self, id: FileId) -> Option<&VersionInfo> {
        self.versions.iter().find(|v| v.id == id)
    }

    pub fn find_satisfied_by(&self, dictionary: &MacroDictionary) -> Option<&VersionInfo> {
        self.versions
            .iter()
            .find(|v| v.macros.is_satisfied_by(dictionary))
    }

    /// Whether any version was parsed inside an includer
    pub fn has_context(&self) -> bool {
        self.versions.iter().any(|v| v.context.is_some())
    }
}

/// Cached access to [`FileVersions`]; only valid while a lock is held
pub struct VersionRegistry<'a> {
    store: StoreView<'a>,
}

impl<'a> VersionRegistry<'a> {
    pub fn new(store: &StoreView<'a>) -> Self {
        Self { store: *store }
    }

    pub fn versions(&self, linkage: LinkageId, location: &FileLocation) -> Arc<FileVersions> {
        let key = CacheKey::new(VERSIONS_NAMESPACE, format!("{linkage}|{location}"));
        let computed = self.store.cache().get_or_try_insert_with(key, || {
            let versions = self
                .store
                .get_versions(linkage, location)
                .iter()
                .map(VersionInfo::from)
                .collect();
            Ok::<_, Infallible>(FileVersions::new(linkage, location.clone(), versions))
        });
        match computed {
            Ok(versions) => versions,
            Err(never) => match never {},
        }
    }

    /// Versions of `location` in every linkage that has any
    pub fn all_linkages(&self, location: &FileLocation) -> Vec<Arc<FileVersions>> {
        self.store
            .linkages_of(location)
            .into_iter()
            .map(|linkage| self.versions(linkage, location))
            .collect()
    }
}
