//! Background worker that turns raw OS notifications into settled events.
//!
//! Raw events are coalesced per path until the stream has been quiet for the
//! debounce window, then each pending path is classified against its
//! fingerprint and handed to the consumer.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use indexmap::IndexSet;
use notify::{Event, EventKind};
use tracing::{debug, error, warn};

use crate::event::FileWatchEvent;
use crate::fingerprint::Fingerprints;
use crate::service::EventConsumer;

/// Upper bound on how long a continuous burst may postpone delivery,
/// in multiples of the debounce window.
const MAX_BURST_WINDOWS: u32 = 10;

pub(crate) enum Message {
    Raw(notify::Result<Event>),
    Stop,
}

pub(crate) struct Pipeline {
    name: String,
    roots: Vec<PathBuf>,
    fingerprints: Fingerprints,
    pending: IndexSet<PathBuf>,
    debounce: Duration,
    consumer: EventConsumer,
}

impl Pipeline {
    pub(crate) fn new(
        name: String,
        roots: Vec<PathBuf>,
        fingerprints: Fingerprints,
        debounce: Duration,
        consumer: EventConsumer,
    ) -> Self {
        Self {
            name,
            roots,
            fingerprints,
            pending: IndexSet::new(),
            debounce,
            consumer,
        }
    }

    /// Process messages until the watcher is stopped or every sender is gone.
    pub(crate) fn run(mut self, rx: Receiver<Message>) {
        let max_burst = self.debounce * MAX_BURST_WINDOWS;
        let mut burst_started: Option<Instant> = None;

        loop {
            let next = if self.pending.is_empty() {
                rx.recv().map_err(|_| RecvTimeoutError::Disconnected)
            } else {
                rx.recv_timeout(self.debounce)
            };

            match next {
                Ok(Message::Raw(Ok(event))) => {
                    self.absorb(event);
                    if self.pending.is_empty() {
                        continue;
                    }
                    let started = *burst_started.get_or_insert_with(Instant::now);
                    if started.elapsed() >= max_burst {
                        self.flush();
                        burst_started = None;
                    }
                }
                Ok(Message::Raw(Err(e))) => {
                    warn!(watcher = %self.name, error = %e, "file watch backend error");
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.flush();
                    burst_started = None;
                }
                Ok(Message::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        debug!(watcher = %self.name, "watch pipeline stopped");
    }

    fn absorb(&mut self, event: Event) {
        if event.need_rescan() {
            self.flush();
            self.overflow();
            return;
        }
        match event.kind {
            EventKind::Access(_) | EventKind::Other => {}
            _ => self.pending.extend(event.paths),
        }
    }

    fn flush(&mut self) {
        let pending: Vec<PathBuf> = self.pending.drain(..).collect();
        for path in pending {
            if let Some(kind) = self.fingerprints.settle(&path) {
                self.deliver(FileWatchEvent::new(path, kind));
            }
        }
    }

    fn overflow(&mut self) {
        warn!(watcher = %self.name, "file watch queue overflowed, assuming every path changed");
        self.deliver(FileWatchEvent::overflow());
        self.fingerprints.rescan(&self.roots);
    }

    fn deliver(&mut self, event: FileWatchEvent) {
        let consumer = &mut self.consumer;
        if catch_unwind(AssertUnwindSafe(|| consumer(event))).is_err() {
            error!(watcher = %self.name, "file watch consumer panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::mpsc::{self, Sender};
    use std::thread::{self, JoinHandle};

    use notify::event::{AccessKind, CreateKind, DataChange, Flag, ModifyKind, RenameMode};
    use tempfile::TempDir;

    use super::*;
    use crate::event::WatchEventKind;

    const DEADLINE: Duration = Duration::from_secs(5);

    struct Running {
        tx: Sender<Message>,
        worker: JoinHandle<()>,
    }

    impl Running {
        fn send(&self, message: Message) {
            self.tx.send(message).unwrap();
        }

        fn stop(self) {
            let _ = self.tx.send(Message::Stop);
            self.worker.join().unwrap();
        }
    }

    fn start(root: &Path, debounce: Duration, consumer: EventConsumer) -> Running {
        let roots = vec![root.to_path_buf()];
        let mut fingerprints = Fingerprints::new(true);
        fingerprints.rescan(&roots);
        let pipeline = Pipeline::new("test-pipeline".to_string(), roots, fingerprints, debounce, consumer);
        let (tx, rx) = mpsc::channel();
        let worker = thread::spawn(move || pipeline.run(rx));
        Running { tx, worker }
    }

    fn forwarding(root: &Path, debounce: Duration) -> (Running, mpsc::Receiver<FileWatchEvent>) {
        let (events_tx, events) = mpsc::channel();
        let running = start(
            root,
            debounce,
            Box::new(move |event| {
                let _ = events_tx.send(event);
            }),
        );
        (running, events)
    }

    fn raw(kind: EventKind, path: &Path) -> Message {
        Message::Raw(Ok(Event::new(kind).add_path(path.to_path_buf())))
    }

    fn created(path: &Path) -> Message {
        raw(EventKind::Create(CreateKind::File), path)
    }

    fn canonical_tempdir() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        (dir, root)
    }

    #[test]
    fn rename_away_of_known_file_is_delete() {
        let (_dir, root) = canonical_tempdir();
        let file = root.join("moved.txt");
        fs::write(&file, "a").unwrap();
        let (running, events) = forwarding(&root, Duration::from_millis(20));

        fs::rename(&file, root.join("elsewhere.bin")).unwrap();
        running.send(raw(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &file));

        let event = events.recv_timeout(DEADLINE).unwrap();
        assert_eq!(event, FileWatchEvent::new(file, WatchEventKind::Delete));
        running.stop();
    }

    #[test]
    fn rescan_flag_reports_overflow_and_refreshes_fingerprints() {
        let (_dir, root) = canonical_tempdir();
        let (running, events) = forwarding(&root, Duration::from_millis(20));

        // Written while the OS queue was overflowing: never reported itself.
        let missed = root.join("missed.txt");
        fs::write(&missed, "during overflow").unwrap();
        running.send(Message::Raw(Ok(Event::new(EventKind::Other).set_flag(Flag::Rescan))));
        assert!(events.recv_timeout(DEADLINE).unwrap().is_overflow());

        // The rescan recorded it, so a late event for unchanged content is quiet.
        running.send(raw(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &missed));
        let marker = root.join("after.txt");
        fs::write(&marker, "x").unwrap();
        running.send(created(&marker));

        let event = events.recv_timeout(DEADLINE).unwrap();
        assert_eq!(event, FileWatchEvent::new(marker, WatchEventKind::Create));
        assert!(events.recv_timeout(Duration::from_millis(200)).is_err());
        running.stop();
    }

    #[test]
    fn access_events_are_ignored() {
        let (_dir, root) = canonical_tempdir();
        let (running, events) = forwarding(&root, Duration::from_millis(20));

        let read = root.join("read.txt");
        fs::write(&read, "r").unwrap();
        running.send(raw(EventKind::Access(AccessKind::Read), &read));
        let written = root.join("written.txt");
        fs::write(&written, "w").unwrap();
        running.send(created(&written));

        let event = events.recv_timeout(DEADLINE).unwrap();
        assert_eq!(event.path(), Some(written.as_path()));
        running.stop();
    }

    #[test]
    fn endless_burst_is_still_delivered() {
        let (_dir, root) = canonical_tempdir();
        let debounce = Duration::from_millis(200);
        let (running, events) = forwarding(&root, debounce);

        let busy = root.join("busy.log");
        fs::write(&busy, "line").unwrap();
        let started = Instant::now();
        let mut delivered = None;
        // Raw events keep arriving well inside the debounce window.
        while started.elapsed() < DEADLINE {
            running.send(raw(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &busy));
            if let Ok(event) = events.try_recv() {
                delivered = Some(event);
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        let event = delivered.expect("burst never flushed");
        assert_eq!(event, FileWatchEvent::new(busy, WatchEventKind::Create));
        assert!(started.elapsed() >= debounce * 5, "flushed before the burst cap");
        running.stop();
    }

    #[test]
    fn panicking_consumer_does_not_stop_the_worker() {
        let (_dir, root) = canonical_tempdir();
        let (events_tx, events) = mpsc::channel();
        let mut calls = 0;
        let running = start(
            &root,
            Duration::from_millis(20),
            Box::new(move |event| {
                calls += 1;
                if calls == 1 {
                    panic!("consumer failed on {:?}", event);
                }
                let _ = events_tx.send(event);
            }),
        );

        let first = root.join("first.txt");
        fs::write(&first, "1").unwrap();
        running.send(created(&first));
        thread::sleep(Duration::from_millis(200));

        let second = root.join("second.txt");
        fs::write(&second, "2").unwrap();
        running.send(created(&second));

        let event = events.recv_timeout(DEADLINE).unwrap();
        assert_eq!(event, FileWatchEvent::new(second, WatchEventKind::Create));
        running.stop();
    }
}
