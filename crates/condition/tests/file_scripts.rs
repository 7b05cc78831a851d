//! File-backed script sources: routing of watch events and live reload.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use gatelog_condition::{Condition, ExpressionEngine, FileScripts, ScriptHandle};
use gatelog_core::{GateError, Level, LoggingContext, Result, SharedSink};
use gatelog_watch::{
    EventConsumer, FileWatchEvent, FileWatchService, FileWatcher, NotifyWatchService,
    WatchEventKind, WatchOptions, WatchProvider,
};
use tempfile::TempDir;

/// Watch service whose events are pushed by the test.
#[derive(Default, Clone)]
struct ManualWatchService {
    consumer: Arc<Mutex<Option<EventConsumer>>>,
}

impl ManualWatchService {
    fn emit(&self, event: FileWatchEvent) {
        let mut guard = self.consumer.lock().unwrap();
        (guard.as_mut().expect("watch started"))(event);
    }
}

impl FileWatchService for ManualWatchService {
    fn watch(&self, name: &str, paths: &[PathBuf], consumer: EventConsumer) -> Result<FileWatcher> {
        *self.consumer.lock().unwrap() = Some(consumer);
        let slot = Arc::clone(&self.consumer);
        Ok(FileWatcher::new(name, paths.to_vec(), move || {
            slot.lock().unwrap().take();
        }))
    }
}

#[derive(Default, Clone)]
struct RecordingSink {
    errors: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    fn shared(&self) -> SharedSink {
        let errors = Arc::clone(&self.errors);
        Arc::new(move |name: &str, error: &GateError| {
            errors.lock().unwrap().push(format!("{}: {}", name, error));
        })
    }

    fn messages(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

fn foo(value: &str) -> LoggingContext {
    LoggingContext::builder().argument("foo", value).build()
}

fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    false
}

#[test]
fn handles_are_shared_per_path() {
    let dir = TempDir::new().unwrap();
    let service = ManualWatchService::default();
    let scripts = FileScripts::open(&service, dir.path(), RecordingSink::default().shared()).unwrap();

    let a = scripts.handle("a.expr").unwrap();
    let again = scripts.handle(dir.path().join("a.expr")).unwrap();
    assert!(Arc::ptr_eq(&a, &again));
    assert!(scripts.handle("../escape.expr").is_err());
}

#[test]
fn events_invalidate_only_the_matching_handle() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.expr"), "true").unwrap();
    fs::write(dir.path().join("b.expr"), "true").unwrap();
    let service = ManualWatchService::default();
    let scripts = FileScripts::open(&service, dir.path(), RecordingSink::default().shared()).unwrap();

    let a = scripts.handle("a.expr").unwrap();
    let b = scripts.handle("b.expr").unwrap();
    a.current_text().unwrap();
    b.current_text().unwrap();

    service.emit(FileWatchEvent::new(a.path().to_path_buf(), WatchEventKind::Modify));
    assert!(a.is_invalid());
    assert!(!b.is_invalid());
}

#[test]
fn overflow_invalidates_every_handle() {
    let dir = TempDir::new().unwrap();
    let service = ManualWatchService::default();
    let scripts = FileScripts::open(&service, dir.path(), RecordingSink::default().shared()).unwrap();

    let handles: Vec<_> = ["a.expr", "nested/b.expr", "c.expr"]
        .iter()
        .map(|name| {
            if let Some(parent) = dir.path().join(name).parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(dir.path().join(name), "true").unwrap();
            let handle = scripts.handle(name).unwrap();
            handle.current_text().unwrap();
            handle
        })
        .collect();
    assert!(handles.iter().all(|h| !h.is_invalid()));

    service.emit(FileWatchEvent::overflow());
    assert!(handles.iter().all(|h| h.is_invalid()));
}

#[test]
fn deleted_file_keeps_last_good_predicate_and_reports() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gate.expr");
    fs::write(&path, r#"foo == "bar""#).unwrap();
    let service = ManualWatchService::default();
    let sink = RecordingSink::default();
    let scripts = FileScripts::open(&service, dir.path(), sink.shared()).unwrap();
    let cond = scripts.condition("gate.expr", ExpressionEngine::shared()).unwrap();
    assert!(cond.test(Level::Info, &foo("bar")));

    fs::remove_file(&path).unwrap();
    let handle = scripts.handle("gate.expr").unwrap();
    service.emit(FileWatchEvent::new(handle.path().to_path_buf(), WatchEventKind::Delete));

    assert!(cond.test(Level::Info, &foo("bar")));
    assert!(!cond.test(Level::Info, &foo("notbar")));
    let messages = sink.messages();
    assert_eq!(messages.len(), 1, "{:?}", messages);
    assert!(messages[0].contains("no readable script source"));
}

#[test]
fn closed_handle_stops_receiving_events() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.expr"), "true").unwrap();
    let service = ManualWatchService::default();
    let scripts = FileScripts::open(&service, dir.path(), RecordingSink::default().shared()).unwrap();

    let handle = scripts.handle("a.expr").unwrap();
    handle.current_text().unwrap();
    handle.close();
    handle.close();

    service.emit(FileWatchEvent::overflow());
    assert!(!handle.is_invalid());
    assert!(matches!(handle.current_text(), Err(GateError::Closed(_))));
}

#[test]
fn condition_reloads_when_the_file_changes_on_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("live.expr");
    fs::write(&path, r#"foo == "bar""#).unwrap();

    let service = NotifyWatchService::new(WatchProvider::detect(), WatchOptions::default());
    let sink = RecordingSink::default();
    let handle = FileScripts::open_file(&service, &path, sink.shared()).unwrap();
    let cond: Condition = gatelog_condition::ScriptCondition::new(
        Arc::clone(&handle) as Arc<dyn ScriptHandle>,
        ExpressionEngine::shared(),
    )
    .into();

    assert!(cond.test(Level::Info, &foo("bar")));
    assert!(!cond.test(Level::Info, &foo("baz")));

    fs::write(&path, r#"foo == "baz""#).unwrap();
    assert!(eventually(|| cond.test(Level::Info, &foo("baz"))));
    assert!(!cond.test(Level::Info, &foo("bar")));
    assert!(sink.messages().is_empty());

    handle.close();
    handle.close();
}
