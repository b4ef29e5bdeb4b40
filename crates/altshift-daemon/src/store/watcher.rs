//! Profile directory watcher
//!
//! inotify events for `*.json` files are debounced with a trailing window and
//! then turn into one [`MappingStore::reload_with_retry`]. Everything runs on
//! the `altshift-profiles` thread, away from the input path.

use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use super::{is_profile_path, MappingStore, RetryPolicy, StoreError};

/// Trailing-edge debounce: fires once, `window` after the last request.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Record a change at `now`, pushing the deadline out
    pub fn request(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    /// Whether the quiet window has elapsed. Consumes the pending request.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }
}

enum WatchMessage {
    Fs(notify::Result<Event>),
    Stop,
}

/// Keeps the directory watch and its reload thread alive. Dropping it stops
/// both.
pub struct ProfileWatcher {
    _watcher: RecommendedWatcher,
    tx: Sender<WatchMessage>,
    thread: Option<JoinHandle<()>>,
}

impl ProfileWatcher {
    pub fn spawn(
        store: Arc<MappingStore>,
        policy: RetryPolicy,
        debounce: Duration,
    ) -> Result<Self, StoreError> {
        let (tx, rx) = mpsc::channel();

        let fs_tx = tx.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = fs_tx.send(WatchMessage::Fs(res));
            },
            notify::Config::default(),
        )?;
        watcher.watch(store.dir(), RecursiveMode::NonRecursive)?;

        tracing::info!("Watching {} for profile changes", store.dir().display());

        let thread = std::thread::Builder::new()
            .name("altshift-profiles".to_string())
            .spawn(move || {
                let mut debouncer = Debouncer::new(debounce);

                loop {
                    let message = match debouncer.deadline() {
                        Some(deadline) => {
                            let timeout = deadline.saturating_duration_since(Instant::now());
                            match rx.recv_timeout(timeout) {
                                Ok(message) => Some(message),
                                Err(RecvTimeoutError::Timeout) => None,
                                Err(RecvTimeoutError::Disconnected) => break,
                            }
                        }
                        None => match rx.recv() {
                            Ok(message) => Some(message),
                            Err(_) => break,
                        },
                    };

                    match message {
                        Some(WatchMessage::Stop) => break,
                        Some(WatchMessage::Fs(Ok(event))) => {
                            if is_relevant(&event) {
                                tracing::trace!("Profile change: {:?}", event);
                                debouncer.request(Instant::now());
                            }
                        }
                        Some(WatchMessage::Fs(Err(e))) => {
                            tracing::warn!("Profile watch error: {}", e);
                        }
                        None => {}
                    }

                    if debouncer.poll(Instant::now()) {
                        tracing::info!("Profiles changed, reloading");
                        if let Err(e) = store.reload_with_retry(&policy) {
                            // Already on the error channel
                            tracing::debug!("Profile reload: {}", e);
                        }
                    }
                }

                tracing::debug!("Profile watcher stopped");
            })
            .map_err(|source| StoreError::Io {
                path: "altshift-profiles thread".into(),
                source,
            })?;

        Ok(Self {
            _watcher: watcher,
            tx,
            thread: Some(thread),
        })
    }
}

impl Drop for ProfileWatcher {
    fn drop(&mut self) {
        let _ = self.tx.send(WatchMessage::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Create, modify, remove or rename touching a `*.json` file
fn is_relevant(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event.paths.iter().any(|path| is_profile_path(Path::new(path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RenameMode};
    use std::path::PathBuf;

    #[test]
    fn test_debouncer_idle() {
        let mut debouncer = Debouncer::new(Duration::from_millis(300));
        assert!(!debouncer.is_pending());
        assert!(!debouncer.poll(Instant::now()));
    }

    #[test]
    fn test_burst_produces_one_reload() {
        let start = Instant::now();
        let window = Duration::from_millis(300);
        let mut debouncer = Debouncer::new(window);
        let mut fired = 0;

        // Ten saves, 50ms apart: all inside one window of each other
        for i in 0..10u32 {
            let now = start + Duration::from_millis(50) * i;
            debouncer.request(now);
            if debouncer.poll(now) {
                fired += 1;
            }
        }
        assert_eq!(fired, 0);

        let last = start + Duration::from_millis(450);
        for offset in [299u64, 300, 301, 600, 5000] {
            if debouncer.poll(last + Duration::from_millis(offset)) {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn test_separate_bursts_fire_separately() {
        let start = Instant::now();
        let window = Duration::from_millis(100);
        let mut debouncer = Debouncer::new(window);

        debouncer.request(start);
        assert!(debouncer.poll(start + window));

        let later = start + Duration::from_secs(1);
        debouncer.request(later);
        assert!(!debouncer.poll(later));
        assert!(debouncer.poll(later + window));
    }

    #[test]
    fn test_relevant_events() {
        let json = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/p/chrome.json"));
        assert!(is_relevant(&json));

        let rename = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(PathBuf::from("/p/Chrome.JSON"));
        assert!(is_relevant(&rename));

        let swap = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/p/.chrome.json.swp"));
        assert!(!is_relevant(&swap));

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/p/chrome.json"));
        assert!(!is_relevant(&access));
    }

    #[test]
    fn test_watcher_reloads_after_change() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(MappingStore::open(dir.path(), None).unwrap());
        store.reload().unwrap();

        let watcher = ProfileWatcher::spawn(
            Arc::clone(&store),
            RetryPolicy {
                attempts: 2,
                backoff: Duration::from_millis(5),
            },
            Duration::from_millis(20),
        )
        .unwrap();

        std::fs::write(
            dir.path().join("default.json"),
            r#"{ "name": "default", "mappings": [ { "trigger": "Alt+C", "action": "Ctrl+C" } ] }"#,
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.snapshot().fallback().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(store.snapshot().fallback().len(), 1);

        drop(watcher);
    }

    #[test]
    fn test_watcher_coalesces_rapid_writes() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(MappingStore::open(dir.path(), None).unwrap());
        let debounce = Duration::from_millis(250);

        let watcher = ProfileWatcher::spawn(
            Arc::clone(&store),
            RetryPolicy {
                attempts: 3,
                backoff: Duration::from_millis(5),
            },
            debounce,
        )
        .unwrap();

        let path = dir.path().join("default.json");
        for i in 1..=10 {
            let mappings = vec![r#"{ "trigger": "Alt+C", "action": "Ctrl+C" }"#; i].join(", ");
            std::fs::write(&path, format!(r#"{{ "name": "default", "mappings": [ {} ] }}"#, mappings))
                .unwrap();
            std::thread::sleep(Duration::from_millis(5));
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.generation() == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        // Anything still queued would land well within three windows
        std::thread::sleep(debounce * 3);

        assert_eq!(store.generation(), 1);
        assert_eq!(store.snapshot().fallback().len(), 1);

        drop(watcher);
    }
}
