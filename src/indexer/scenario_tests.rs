//! End-to-end runs of the task engine against an in-memory project

use super::*;
use crate::config::IndexerConfig;
use crate::model::{FileLocation, LinkageId};
use crate::parser::{
    IncludeResolver, ParseError, ParseRequest, ParsedUnit, Parser, ParserRegistry,
};
use crate::project::{MemoryProject, ProjectModel};
use crate::store::{FileKey, FileRecord, IndexStore, ReadLockGuard, VersionContent};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "test-logging")]
crate::setup_test_logging!();

/// Wraps the directive scanner and records which top-level files get parsed
struct RecordingParser {
    inner: Arc<dyn Parser>,
    parsed: Mutex<Vec<FileLocation>>,
    /// Task offered to the inbox on the first parse
    urgent: Mutex<Option<(UrgentInbox, IndexerTask)>>,
    /// Context parses report a dependency on the header they refresh
    stall_context: AtomicBool,
}

impl RecordingParser {
    fn new() -> Arc<Self> {
        let registry = ParserRegistry::c_family().unwrap();
        Arc::new(Self {
            inner: registry.get(LinkageId::C).unwrap(),
            parsed: Mutex::new(Vec::new()),
            urgent: Mutex::new(None),
            stall_context: AtomicBool::new(false),
        })
    }

    fn parsed(&self) -> Vec<FileLocation> {
        self.parsed.lock().clone()
    }

    fn clear(&self) {
        self.parsed.lock().clear();
    }
}

impl Parser for RecordingParser {
    fn parse(
        &self,
        request: &ParseRequest<'_>,
        resolver: &dyn IncludeResolver,
    ) -> Result<ParsedUnit, ParseError> {
        self.parsed.lock().push(request.location().clone());
        if let Some((inbox, task)) = self.urgent.lock().take() {
            assert!(inbox.offer(task).is_ok());
        }
        if let Some(context) = request.context
            && self.stall_context.load(Ordering::SeqCst)
        {
            return Err(ParseError::DependsOnOutdatedFile {
                location: context.target.clone(),
            });
        }
        self.inner.parse(request, resolver)
    }
}

struct Scenario {
    project: Arc<MemoryProject>,
    parser: Arc<RecordingParser>,
    ctx: IndexerContext,
    cancel: CancellationToken,
}

impl Scenario {
    fn new() -> Self {
        let project = Arc::new(MemoryProject::new());
        let parser = RecordingParser::new();
        let parsers = ParserRegistry::new()
            .with_parser(LinkageId::C, parser.clone())
            .with_parser(LinkageId::Cpp, parser.clone());
        let ctx = IndexerContext::new(
            Arc::new(IndexStore::in_memory(Duration::from_millis(2))),
            project.clone(),
            parsers,
            IndexerConfig::default(),
        );
        Self {
            project,
            parser,
            ctx,
            cancel: CancellationToken::new(),
        }
    }

    fn options(&self) -> IndexerTaskOptions {
        IndexerTaskOptions::from_config(&self.ctx.config)
    }

    fn run(&self, request: IndexRequest) -> IndexerProgress {
        let mut task = IndexerTask::new(request, self.options());
        task.run(&self.ctx, &self.cancel).unwrap()
    }

    fn view(&self) -> ReadLockGuard<'_> {
        self.ctx.store.read_lock(&self.cancel).unwrap()
    }

    fn full_request(&self) -> IndexRequest {
        IndexRequest::full(self.project.as_ref(), &self.view())
    }

    fn run_full(&self) -> IndexerProgress {
        self.run(self.full_request())
    }

    fn versions(&self, path: &str) -> Vec<FileRecord> {
        self.view()
            .get_versions(LinkageId::C, &FileLocation::file(path))
    }

    fn assert_no_duplicate_versions(&self) {
        let view = self.view();
        let mut seen = HashSet::new();
        for key in view.all_files() {
            assert!(seen.insert(key.clone()), "duplicate version {key}");
        }
        assert_eq!(seen.len(), view.stats().files);
    }
}

const GUARDED_HEADER: &str = "#ifdef FOO\nint foo_enabled;\n#endif\nint shared;\n";

#[test]
fn test_header_gets_one_version_per_configuration() {
    let scenario = Scenario::new();
    scenario.project.add_file("/p/a.c", "#include \"h.h\"\nint a;\n");
    scenario.project.add_file("/p/h.h", GUARDED_HEADER);
    let first = scenario.run_full();
    assert_eq!(first.completed_sources, 1);
    assert_eq!(scenario.versions("/p/h.h").len(), 1);

    scenario
        .project
        .add_file("/p/b.c", "#define FOO 1\n#include \"h.h\"\nint b;\n");
    scenario.run(IndexRequest::new().with_file("/p/b.c"));

    let versions = scenario.versions("/p/h.h");
    assert_eq!(versions.len(), 2);
    assert_ne!(versions[0].key.macros, versions[1].key.macros);
    let a = scenario.versions("/p/a.c")[0].id;
    let b = scenario.versions("/p/b.c")[0].id;
    let contexts: HashSet<_> = versions.iter().filter_map(|v| v.context()).collect();
    assert_eq!(contexts, HashSet::from([a, b]));

    // the FOO variant declares the guarded name, the other does not
    let guarded = scenario.view().find_declarations("foo_enabled");
    assert_eq!(guarded.len(), 1);
    assert_eq!(guarded[0].0.location, FileLocation::file("/p/h.h"));
    scenario.assert_no_duplicate_versions();
}

#[test]
fn test_removing_source_removes_headers_only_it_reached() {
    let scenario = Scenario::new();
    scenario.project.add_file("/p/a.c", "#include \"h.h\"\nint a;\n");
    scenario.project.add_file("/p/h.h", "int h;\n");
    scenario.run_full();
    assert_eq!(scenario.view().all_files().len(), 2);

    scenario.project.remove_file("/p/a.c");
    let progress = scenario.run(IndexRequest::new().with_removed("/p/a.c"));

    assert!(scenario.view().all_files().is_empty());
    assert_eq!(progress.removed_files, 2);
    assert_eq!(progress.remaining, 0);
}

#[test]
fn test_removing_one_includer_moves_header_to_the_other() {
    let scenario = Scenario::new();
    scenario.project.add_file("/p/a.c", "#include \"h.h\"\nint a;\n");
    scenario.project.add_file("/p/b.c", "#include \"h.h\"\nint b;\n");
    scenario.project.add_file("/p/h.h", "int h;\n");
    scenario.run_full();
    let header = scenario.versions("/p/h.h");
    assert_eq!(header.len(), 1);

    let a = scenario.versions("/p/a.c")[0].id;
    let b = scenario.versions("/p/b.c")[0].id;
    let (gone, stays) = if header[0].context() == Some(a) {
        ("/p/a.c", b)
    } else {
        ("/p/b.c", a)
    };
    scenario.project.remove_file(gone);
    scenario.run(IndexRequest::new().with_removed(gone));

    let header = scenario.versions("/p/h.h");
    assert_eq!(header.len(), 1);
    assert_eq!(header[0].context(), Some(stays));
}

#[test]
fn test_urgent_task_runs_before_remaining_backlog() {
    let scenario = Scenario::new();
    for index in 0..5 {
        scenario
            .project
            .add_file(format!("/p/s{index}.c"), format!("int s{index};\n"));
    }
    scenario.project.add_file("/p/urgent.c", "int urgent;\n");

    let mut request = IndexRequest::new();
    for index in 0..5 {
        request = request.with_file(format!("/p/s{index}.c"));
    }
    let options = scenario.options();
    let mut task = IndexerTask::new(request, options);
    let urgent = IndexerTask::new(IndexRequest::new().with_file("/p/urgent.c"), options);
    assert!(task.is_compatible(&urgent));
    *scenario.parser.urgent.lock() = Some((task.inbox(), urgent));

    let progress = task.run(&scenario.ctx, &scenario.cancel).unwrap();

    let parsed = scenario.parser.parsed();
    assert_eq!(parsed.len(), 6);
    assert_eq!(parsed[0], FileLocation::file("/p/s0.c"));
    assert_eq!(parsed[1], FileLocation::file("/p/urgent.c"));
    assert_eq!(progress.requested, 6);
    assert_eq!(progress.completed_sources, 6);
    assert_eq!(progress.remaining, 0);
}

#[test]
fn test_reader_gets_in_between_write_batches() {
    let store = Arc::new(IndexStore::in_memory(Duration::from_millis(2)));
    let cancel = CancellationToken::new();
    let key = |path: &str| FileKey::new(LinkageId::C, FileLocation::file(path), Default::default());
    let content = || VersionContent::new(crate::model::ContentStamp::unreadable());

    let mut writer = store.write_lock(&cancel).unwrap();
    writer.add_or_replace_version(key("/p/first.c"), content()).unwrap();

    let observed = Arc::new(Mutex::new(None));
    let reader_done = Arc::new(AtomicBool::new(false));
    let reader = {
        let store = store.clone();
        let observed = observed.clone();
        let reader_done = reader_done.clone();
        thread::spawn(move || {
            let guard = store.read_lock(&CancellationToken::new()).unwrap();
            *observed.lock() = Some(guard.all_files());
            reader_done.store(true, Ordering::SeqCst);
        })
    };
    while !store.has_waiting_readers() {
        thread::sleep(Duration::from_millis(1));
    }

    assert!(writer.yield_lock(Duration::ZERO, &cancel).unwrap());
    // readers that were waiting are admitted before the writer gets back in
    assert!(reader_done.load(Ordering::SeqCst));
    writer.add_or_replace_version(key("/p/second.c"), content()).unwrap();
    writer.finish(false).unwrap();
    reader.join().unwrap();

    let seen = observed.lock().clone().unwrap();
    assert_eq!(seen, vec![key("/p/first.c")]);
    assert_eq!(store.read_lock(&cancel).unwrap().all_files().len(), 2);
}

#[test]
fn test_rerun_is_idempotent() {
    let scenario = Scenario::new();
    scenario.project.add_file("/p/a.c", "#include \"h.h\"\nint a;\n");
    scenario.project.add_file("/p/b.c", "#define FOO\n#include \"h.h\"\nint b;\n");
    scenario.project.add_file("/p/h.h", GUARDED_HEADER);
    scenario.run_full();
    scenario.parser.clear();

    let events = Arc::new(AtomicUsize::new(0));
    let counter = events.clone();
    scenario.ctx.store.add_change_listener(Arc::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    let progress = scenario.run_full();

    assert!(scenario.parser.parsed().is_empty());
    assert_eq!(events.load(Ordering::SeqCst), 0);
    assert_eq!(progress.completed_sources, 0);
    assert_eq!(progress.removed_files, 0);
    scenario.assert_no_duplicate_versions();
}

#[test]
fn test_touched_files_are_not_reparsed() {
    let scenario = Scenario::new();
    scenario.project.add_file("/p/a.c", "#include \"h.h\"\nint a;\n");
    scenario.project.add_file("/p/h.h", "int h;\n");
    scenario.run_full();
    scenario.parser.clear();

    scenario.project.touch("/p/a.c");
    scenario.project.touch("/p/h.h");
    scenario.run_full();
    assert!(scenario.parser.parsed().is_empty());

    // the stamps moved along, so a later run does not even hash the files again
    let live = scenario.project.stat(&FileLocation::file("/p/a.c")).unwrap();
    assert_eq!(scenario.versions("/p/a.c")[0].content.stamp.modified, live.modified);
}

#[test]
fn test_edited_header_is_refreshed_without_touching_other_sources() {
    let scenario = Scenario::new();
    scenario.project.add_file("/p/a.c", "#include \"h.h\"\nint a;\n");
    scenario.project.add_file("/p/b.c", "int b;\n");
    scenario.project.add_file("/p/h.h", "int h;\n");
    scenario.run_full();
    scenario.parser.clear();

    scenario.project.update_file("/p/h.h", "int h;\nint more;\n");
    let progress = scenario.run_full();

    assert_eq!(scenario.parser.parsed(), vec![FileLocation::file("/p/a.c")]);
    assert_eq!(progress.completed_headers, 1);
    assert_eq!(scenario.view().find_declarations("more").len(), 1);
}

#[test]
fn test_forced_run_reparses_everything_without_duplicates() {
    let scenario = Scenario::new();
    scenario.project.add_file("/p/a.c", "#include \"h.h\"\nint a;\n");
    scenario.project.add_file("/p/h.h", "int h;\n");
    scenario.run_full();
    let before = scenario.versions("/p/h.h")[0].id;
    scenario.parser.clear();

    let options = scenario.options().with_force(true);
    let mut task = IndexerTask::new(scenario.full_request(), options);
    task.run(&scenario.ctx, &scenario.cancel).unwrap();

    assert!(scenario.parser.parsed().contains(&FileLocation::file("/p/a.c")));
    assert_eq!(scenario.versions("/p/h.h")[0].id, before);
    scenario.assert_no_duplicate_versions();
}

#[test]
fn test_cancelled_run_resumes() {
    let scenario = Scenario::new();
    scenario.project.add_file("/p/a.c", "int a;\n");
    scenario.project.add_file("/p/b.c", "int b;\n");
    let mut task = IndexerTask::new(scenario.full_request(), scenario.options());

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(task.run(&scenario.ctx, &cancel), Err(IndexerError::Cancelled)));
    assert!(scenario.view().all_files().is_empty());

    let progress = task.run(&scenario.ctx, &scenario.cancel).unwrap();
    assert_eq!(progress.completed_sources, 2);
    assert_eq!(scenario.view().all_files().len(), 2);
}

#[test]
fn test_missing_file_fails_without_spending_error_budget() {
    let scenario = Scenario::new();
    scenario.project.add_file("/p/a.c", "int a;\n");
    let mut task = IndexerTask::new(scenario.full_request(), scenario.options());
    scenario.project.remove_file("/p/a.c");
    let progress = task.run(&scenario.ctx, &scenario.cancel).unwrap();
    assert_eq!(progress.errors, 0);
    assert!(scenario.view().all_files().is_empty());
}

#[test]
fn test_full_run_drops_files_deleted_from_the_project() {
    let scenario = Scenario::new();
    scenario.project.add_file("/p/a.c", "#include \"h.h\"\nint a;\n");
    scenario.project.add_file("/p/b.c", "int b;\n");
    scenario.project.add_file("/p/h.h", "int h;\n");
    scenario.run_full();
    assert_eq!(scenario.view().all_files().len(), 3);

    scenario.project.remove_file("/p/a.c");
    let progress = scenario.run_full();

    assert!(scenario.versions("/p/a.c").is_empty());
    // h.h was only reached through a.c
    assert!(scenario.versions("/p/h.h").is_empty());
    let remaining: Vec<FileLocation> = scenario
        .view()
        .all_files()
        .into_iter()
        .map(|key| key.location)
        .collect();
    assert_eq!(remaining, vec![FileLocation::file("/p/b.c")]);
    assert_eq!(progress.removed_files, 2);
    assert_eq!(progress.remaining, 0);
}

#[test]
fn test_header_losing_pragma_once_is_refreshed_in_place() {
    let scenario = Scenario::new();
    scenario.project.add_file("/p/a.c", "#include \"h.h\"\nint a;\n");
    scenario.project.add_file("/p/h.h", "#pragma once\nint h;\n");
    scenario.run_full();
    let before = scenario.versions("/p/h.h");
    assert_eq!(before.len(), 1);
    assert!(before[0].pragma_once());
    let source = scenario.versions("/p/a.c")[0].id;
    scenario.parser.clear();

    scenario.project.update_file("/p/h.h", "int h;\nint more;\n");
    let progress = scenario.run_full();

    let after = scenario.versions("/p/h.h");
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].id, before[0].id);
    assert!(!after[0].pragma_once());
    assert_eq!(after[0].context(), Some(source));
    assert_eq!(scenario.parser.parsed(), vec![FileLocation::file("/p/a.c")]);
    assert_eq!(scenario.view().find_declarations("more").len(), 1);
    assert_eq!(progress.completed_headers, 1);
    scenario.assert_no_duplicate_versions();
}

#[test]
fn test_outdated_pragma_once_dependency_is_refreshed_with_the_header() {
    let scenario = Scenario::new();
    scenario.project.add_file("/p/a.c", "#include \"h.h\"\nint a;\n");
    scenario.project.add_file("/p/h.h", "#include \"p.h\"\nint h;\n");
    scenario.project.add_file("/p/p.h", "#pragma once\nint p;\n");
    scenario.run_full();
    let header = scenario.versions("/p/h.h")[0].id;
    let once = scenario.versions("/p/p.h")[0].id;
    scenario.parser.clear();

    scenario
        .project
        .update_file("/p/h.h", "#include \"p.h\"\nint h;\nint h2;\n");
    scenario
        .project
        .update_file("/p/p.h", "#pragma once\nint p;\nint p2;\n");
    let progress = scenario.run_full();

    // the first context parse stops at p.h and is retried refreshing both
    let source = FileLocation::file("/p/a.c");
    assert_eq!(scenario.parser.parsed(), vec![source.clone(), source]);
    assert_eq!(scenario.versions("/p/h.h")[0].id, header);
    assert_eq!(scenario.versions("/p/p.h")[0].id, once);
    let view = scenario.view();
    assert_eq!(view.find_declarations("h2").len(), 1);
    assert_eq!(view.find_declarations("p2").len(), 1);
    drop(view);
    assert_eq!(progress.remaining, 0);
    scenario.assert_no_duplicate_versions();
}

#[test]
fn test_unsettled_context_refresh_keeps_the_stored_version() {
    let scenario = Scenario::new();
    scenario.project.add_file("/p/a.c", "#include \"h.h\"\nint a;\n");
    scenario.project.add_file("/p/h.h", "int h;\n");
    scenario.run_full();
    let header = scenario.versions("/p/h.h")[0].id;

    scenario.project.update_file("/p/h.h", "int h;\nint more;\n");
    scenario.parser.stall_context.store(true, Ordering::SeqCst);
    let progress = scenario.run_full();

    let versions = scenario.versions("/p/h.h");
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].id, header);
    assert!(scenario.view().find_declarations("more").is_empty());
    assert_eq!(progress.removed_files, 0);
    assert_eq!(progress.errors, 0);
}
