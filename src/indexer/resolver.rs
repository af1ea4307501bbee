//! Include resolution backed by the store and the run's task graph

use super::location_task::TaskGraph;
use crate::model::{FileContent, FileLocation, LinkageId, MacroDictionary, MacroEvent};
use crate::parser::{IncludeAction, IncludeResolver, ParseError, ReusedVersion, ScannerConfig};
use crate::project::ProjectModel;
use crate::store::{CacheKey, FileId, StoreView, VersionRegistry};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

const EFFECTS_NAMESPACE: &str = "macro-effects";

/// Answers the parser's include questions for one parse.
///
/// A stored version is reused when its significant macros are satisfied by the current
/// dictionary and the run does not consider it outdated. While parsing in context, an
/// outdated pragma-once header other than the ones being refreshed cannot be parsed
/// inline (its version would be recorded against the wrong context), so the parse is
/// aborted with a dependency on it.
pub struct EngineResolver<'a> {
    store: StoreView<'a>,
    project: &'a dyn ProjectModel,
    graph: &'a TaskGraph,
    linkage: LinkageId,
    config: &'a ScannerConfig,
    /// Headers this parse is meant to refresh; empty for a direct parse
    refreshing: &'a [FileLocation],
    cancel: &'a CancellationToken,
}

impl<'a> EngineResolver<'a> {
    pub fn new(
        store: &StoreView<'a>,
        project: &'a dyn ProjectModel,
        graph: &'a TaskGraph,
        linkage: LinkageId,
        config: &'a ScannerConfig,
        refreshing: &'a [FileLocation],
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            store: *store,
            project,
            graph,
            linkage,
            config,
            refreshing,
            cancel,
        }
    }

    fn in_context(&self) -> bool {
        !self.refreshing.is_empty()
    }

    /// Macro events a stored version performs, including those of the versions it
    /// includes, in source order
    pub fn macro_effects(&self, id: FileId) -> Arc<Vec<MacroEvent>> {
        let key = CacheKey::new(EFFECTS_NAMESPACE, id.to_string());
        if let Some(effects) = self.store.cache().get::<Vec<MacroEvent>>(&key) {
            return effects;
        }
        let mut effects = Vec::new();
        let mut visited = HashSet::new();
        self.collect_effects(id, &mut visited, &mut effects);
        let effects = Arc::new(effects);
        self.store.cache().insert(key, effects.clone());
        effects
    }

    fn collect_effects(
        &self,
        id: FileId,
        visited: &mut HashSet<FileId>,
        out: &mut Vec<MacroEvent>,
    ) {
        if !visited.insert(id) {
            return;
        }
        let Some(record) = self.store.record(id) else {
            return;
        };
        let mut includes: Vec<(u32, FileId)> = record
            .content
            .includes
            .iter()
            .filter(|include| include.active && !include.skipped)
            .filter_map(|include| include.target.map(|target| (include.offset, target)))
            .collect();
        includes.sort_by_key(|(offset, _)| *offset);

        let mut pending = includes.into_iter().peekable();
        for event in &record.content.macros {
            while let Some((_, target)) = pending.next_if(|(offset, _)| *offset < event.offset) {
                self.collect_effects(target, visited, out);
            }
            out.push(event.clone());
        }
        for (_, target) in pending {
            self.collect_effects(target, visited, out);
        }
    }
}

impl IncludeResolver for EngineResolver<'_> {
    fn resolve_include(
        &self,
        includer: &FileLocation,
        spelled: &str,
        system: bool,
    ) -> Option<FileLocation> {
        self.project
            .resolve_include(includer, spelled, system, self.config)
    }

    fn read(&self, location: &FileLocation) -> Result<FileContent, ParseError> {
        self.project
            .content(location)
            .map_err(|e| ParseError::Io {
                location: location.clone(),
                reason: e.to_string(),
            })
    }

    fn include_action(
        &self,
        location: &FileLocation,
        dictionary: &MacroDictionary,
    ) -> IncludeAction {
        if self.refreshing.contains(location) {
            return IncludeAction::Parse;
        }
        let versions = VersionRegistry::new(&self.store).versions(self.linkage, location);
        let Some(version) = versions.find_satisfied_by(dictionary) else {
            return IncludeAction::Parse;
        };
        if !self.graph.is_outdated(self.linkage, location, version.id) {
            trace!("Reusing {} {} ({})", location, version.id, version.macros);
            return IncludeAction::Reuse(ReusedVersion {
                significant: version.macros.clone(),
                pragma_once: version.pragma_once,
                effects: self.macro_effects(version.id).as_ref().clone(),
            });
        }
        if self.in_context() && version.pragma_once {
            return IncludeAction::DependsOnOutdated;
        }
        IncludeAction::Parse
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::location_task::{UpdateKind, VersionTask};
    use crate::model::{ContentStamp, MacroState, SignificantMacros};
    use crate::project::MemoryProject;
    use crate::store::{FileKey, IncludeRecord, IndexStore, ReadLockGuard, VersionContent};
    use std::time::Duration;

    struct Fixture {
        store: IndexStore,
        project: MemoryProject,
        config: ScannerConfig,
        cancel: CancellationToken,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: IndexStore::in_memory(Duration::from_millis(5)),
                project: MemoryProject::new(),
                config: ScannerConfig::new(),
                cancel: CancellationToken::new(),
            }
        }

        fn add(&self, path: &str, macros: SignificantMacros, content: VersionContent) -> FileId {
            let guard = self.store.write_lock(&self.cancel).unwrap();
            let id = guard
                .add_or_replace_version(
                    FileKey::new(LinkageId::C, FileLocation::file(path), macros),
                    content,
                )
                .unwrap()
                .id;
            guard.finish(false).unwrap();
            id
        }

        fn view(&self) -> ReadLockGuard<'_> {
            self.store.read_lock(&self.cancel).unwrap()
        }

        fn resolver<'a>(
            &'a self,
            view: &StoreView<'a>,
            graph: &'a TaskGraph,
            refreshing: &'a [FileLocation],
        ) -> EngineResolver<'a> {
            EngineResolver::new(
                view,
                &self.project,
                graph,
                LinkageId::C,
                &self.config,
                refreshing,
                &self.cancel,
            )
        }
    }

    fn content() -> VersionContent {
        VersionContent::new(ContentStamp::unreadable())
    }

    fn include(offset: u32, target: FileId, path: &str) -> IncludeRecord {
        IncludeRecord {
            spelled: path.to_string(),
            system: false,
            offset,
            active: true,
            target_location: Some(FileLocation::file(path)),
            target: Some(target),
            target_macros: SignificantMacros::none(),
            skipped: false,
        }
    }

    fn outdated(graph: &mut TaskGraph, path: &str, id: FileId) {
        graph
            .linkage_mut(LinkageId::C)
            .require(&FileLocation::file(path), UpdateKind::OtherHeader, 0)
            .add_version(VersionTask {
                id,
                macros: SignificantMacros::none(),
                context: None,
                outdated: true,
            });
    }

    #[test]
    fn test_effects_interleave_nested_includes() {
        let fixture = Fixture::new();
        let mut inner = content();
        inner.macros.push(MacroEvent::define("INNER", "1", 0));
        let inner = fixture.add("/inner.h", SignificantMacros::none(), inner);

        let mut outer = content();
        outer.macros.push(MacroEvent::define("FIRST", "", 0));
        outer.macros.push(MacroEvent::undefine("FIRST", 40));
        outer.includes.push(include(20, inner, "/inner.h"));
        let outer = fixture.add("/outer.h", SignificantMacros::none(), outer);

        let graph = TaskGraph::new();
        let view = fixture.view();
        let effects = fixture.resolver(&view, &graph, &[]).macro_effects(outer);
        let names: Vec<(&str, u32)> = effects.iter().map(|e| (e.name.as_str(), e.offset)).collect();
        assert_eq!(names, vec![("FIRST", 0), ("INNER", 0), ("FIRST", 40)]);
    }

    #[test]
    fn test_reuse_requires_satisfied_current_version() {
        let fixture = Fixture::new();
        let location = FileLocation::file("/h.h");
        let debug = SignificantMacros::from([("DEBUG", MacroState::Defined("1".to_string()))]);
        let id = fixture.add("/h.h", debug.clone(), content());

        let graph = TaskGraph::new();
        let view = fixture.view();
        let resolver = fixture.resolver(&view, &graph, &[]);
        let mut dictionary = MacroDictionary::new();
        assert_eq!(resolver.include_action(&location, &dictionary), IncludeAction::Parse);

        dictionary.define("DEBUG", "1");
        match resolver.include_action(&location, &dictionary) {
            IncludeAction::Reuse(reused) => assert_eq!(reused.significant, debug),
            other => panic!("expected reuse, got {other:?}"),
        }

        let mut graph = TaskGraph::new();
        outdated(&mut graph, "/h.h", id);
        assert_eq!(
            fixture
                .resolver(&view, &graph, &[])
                .include_action(&location, &dictionary),
            IncludeAction::Parse
        );
    }

    #[test]
    fn test_outdated_pragma_once_header_blocks_context_parse() {
        let fixture = Fixture::new();
        let mut once = content();
        once.pragma_once = true;
        let once_id = fixture.add("/once.h", SignificantMacros::none(), once);
        let target_id = fixture.add("/target.h", SignificantMacros::none(), content());

        let mut graph = TaskGraph::new();
        outdated(&mut graph, "/once.h", once_id);
        outdated(&mut graph, "/target.h", target_id);
        let dictionary = MacroDictionary::new();
        let refreshing = [FileLocation::file("/target.h")];

        let view = fixture.view();
        let resolver = fixture.resolver(&view, &graph, &refreshing);
        assert_eq!(
            resolver.include_action(&FileLocation::file("/once.h"), &dictionary),
            IncludeAction::DependsOnOutdated
        );
        assert_eq!(
            resolver.include_action(&FileLocation::file("/target.h"), &dictionary),
            IncludeAction::Parse
        );
        // a direct parse just parses it again
        assert_eq!(
            fixture
                .resolver(&view, &graph, &[])
                .include_action(&FileLocation::file("/once.h"), &dictionary),
            IncludeAction::Parse
        );
    }

    #[test]
    fn test_read_and_resolve_go_through_project() {
        let fixture = Fixture::new();
        fixture.project.add_file("/p/a.c", "#include \"a.h\"\n");
        fixture.project.add_file("/p/a.h", "int a;\n");
        let graph = TaskGraph::new();
        let view = fixture.view();
        let resolver = fixture.resolver(&view, &graph, &[]);

        let header = resolver
            .resolve_include(&FileLocation::file("/p/a.c"), "a.h", false)
            .unwrap();
        assert_eq!(resolver.read(&header).unwrap().text, "int a;\n");
        assert!(matches!(
            resolver.read(&FileLocation::file("/p/missing.h")),
            Err(ParseError::Io { .. })
        ));
        assert!(!resolver.is_cancelled());
        fixture.cancel.cancel();
        assert!(resolver.is_cancelled());
    }
}
