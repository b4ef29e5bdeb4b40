//! Per-application mapping store
//!
//! Profiles live in a directory of JSON files. Each reload compiles every
//! file into a fresh [`MappingSnapshot`] and swaps it in as a whole, so a
//! lookup sees either the old tables or the new ones, never a mix.

mod watcher;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use altshift_config::{
    compile_profile, parse_profile_file, CompiledMapping, MappingError, MappingTable,
    ProfileError, Settings, TriggerKey, DEFAULT_PROFILE_NAME,
};
use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

pub use watcher::{Debouncer, ProfileWatcher};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("profile directory {} does not exist", path.display())]
    DirectoryMissing { path: PathBuf },

    #[error("failed to list {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("profiles still changing after {attempts} attempt(s): {message}")]
    ReloadRace { attempts: u32, message: String },

    #[error("failed to watch profile directory: {0}")]
    Watch(#[from] notify::Error),
}

/// Compiled tables, replaced as a unit on every reload
#[derive(Debug, Default)]
pub struct MappingSnapshot {
    by_process: HashMap<String, Arc<MappingTable>>,
    fallback: Arc<MappingTable>,
}

impl MappingSnapshot {
    /// Process table first, then the fallback table
    pub fn lookup(&self, process: Option<&str>, trigger: &TriggerKey) -> Option<&CompiledMapping> {
        process
            .and_then(|name| self.by_process.get(name))
            .and_then(|table| table.get(trigger))
            .or_else(|| self.fallback.get(trigger))
    }

    pub fn table_for(&self, process: &str) -> Option<&MappingTable> {
        self.by_process.get(process).map(Arc::as_ref)
    }

    pub fn fallback(&self) -> &MappingTable {
        &self.fallback
    }

    pub fn process_count(&self) -> usize {
        self.by_process.len()
    }
}

/// Outcome of one directory scan
#[derive(Debug, Default)]
pub struct ReloadReport {
    /// Profile files compiled
    pub loaded: usize,
    /// Files that could not be loaded at all
    pub failures: Vec<ProfileError>,
    /// Mappings skipped inside otherwise loaded files
    pub mapping_errors: Vec<(PathBuf, MappingError)>,
    /// Processes (or the fallback) claimed by more than one file
    pub conflicts: Vec<String>,
}

impl ReloadReport {
    pub fn has_transient(&self) -> bool {
        self.failures.iter().any(ProfileError::is_transient)
    }

    /// Human-readable form of everything that went wrong
    pub fn messages(&self) -> Vec<String> {
        let mut messages: Vec<String> = self.failures.iter().map(ToString::to_string).collect();
        messages.extend(
            self.mapping_errors
                .iter()
                .map(|(path, err)| format!("{}: {}", path.display(), err)),
        );
        messages.extend(self.conflicts.iter().cloned());
        messages
    }
}

/// How hard a reload fights against half-written files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            attempts: settings.reload_attempts.max(1),
            backoff: settings.reload_backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

pub struct MappingStore {
    dir: PathBuf,
    snapshot: ArcSwap<MappingSnapshot>,
    /// Snapshots committed so far
    generation: AtomicU64,
    errors: Option<UnboundedSender<String>>,
}

impl MappingStore {
    /// Open a store on `dir`. The directory must exist; it starts empty
    /// until the first reload.
    pub fn open(
        dir: impl Into<PathBuf>,
        errors: Option<UnboundedSender<String>>,
    ) -> Result<Self, StoreError> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(StoreError::DirectoryMissing { path: dir });
        }
        Ok(Self {
            dir,
            snapshot: ArcSwap::from_pointee(MappingSnapshot::default()),
            generation: AtomicU64::new(0),
            errors,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve a trigger for a process. Lock-free; safe during a reload.
    pub fn lookup(&self, process: Option<&str>, trigger: &TriggerKey) -> Option<CompiledMapping> {
        self.snapshot.load().lookup(process, trigger).cloned()
    }

    /// The current snapshot, kept alive for as long as the caller holds it
    pub fn snapshot(&self) -> Arc<MappingSnapshot> {
        self.snapshot.load_full()
    }

    /// Number of reloads committed since the store was opened
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Scan, compile and swap in one pass. Problems are reported on the
    /// error channel and returned in the report.
    pub fn reload(&self) -> Result<ReloadReport, StoreError> {
        let (snapshot, report) = self.build()?;
        self.commit(snapshot, &report);
        self.report_all(&report);
        Ok(report)
    }

    /// Reload, retrying while files look half-written.
    ///
    /// The last attempt is committed even if it still saw transient
    /// failures; that case ends in [`StoreError::ReloadRace`].
    pub fn reload_with_retry(&self, policy: &RetryPolicy) -> Result<ReloadReport, StoreError> {
        let attempts = policy.attempts.max(1);
        let mut attempt = 1;
        let mut backoff = policy.backoff;

        loop {
            let (snapshot, report) = self.build()?;

            if report.has_transient() && attempt < attempts {
                tracing::debug!(
                    "Reload attempt {}/{} hit a file being written, retrying in {:?}",
                    attempt,
                    attempts,
                    backoff
                );
                std::thread::sleep(backoff);
                backoff = backoff.saturating_mul(2);
                attempt += 1;
                continue;
            }

            self.commit(snapshot, &report);
            self.report_all(&report);

            if !report.has_transient() {
                return Ok(report);
            }

            let message = report
                .failures
                .iter()
                .filter(|f| f.is_transient())
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            let err = StoreError::ReloadRace { attempts, message };
            self.report(err.to_string());
            return Err(err);
        }
    }

    fn commit(&self, snapshot: MappingSnapshot, report: &ReloadReport) {
        tracing::info!(
            "Loaded {} profile(s): {} process table(s), {} fallback mapping(s)",
            report.loaded,
            snapshot.by_process.len(),
            snapshot.fallback.len()
        );
        self.snapshot.store(Arc::new(snapshot));
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn build(&self) -> Result<(MappingSnapshot, ReloadReport), StoreError> {
        let mut report = ReloadReport::default();
        let mut snapshot = MappingSnapshot::default();
        let mut fallback_source: Option<PathBuf> = None;
        let mut owners: HashMap<String, PathBuf> = HashMap::new();

        let (paths, unreadable) = self.profile_paths()?;
        report.failures.extend(unreadable);

        for path in paths {
            let profile = match parse_profile_file(&path) {
                Ok(profile) => profile,
                Err(ProfileError::Io { source, .. })
                    if source.kind() == std::io::ErrorKind::NotFound =>
                {
                    // Removed between listing and reading
                    continue;
                }
                Err(err) => {
                    report.failures.push(err);
                    continue;
                }
            };

            let compiled = compile_profile(&profile);
            report
                .mapping_errors
                .extend(compiled.errors.into_iter().map(|e| (path.clone(), e)));
            report.loaded += 1;

            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            let table = Arc::new(compiled.table);

            if profile.is_default() || stem == DEFAULT_PROFILE_NAME {
                if let Some(previous) = fallback_source.replace(path.clone()) {
                    report.conflicts.push(format!(
                        "default profile in {} replaces the one in {}",
                        path.display(),
                        previous.display()
                    ));
                }
                snapshot.fallback = table;
                continue;
            }

            let mut processes = profile.process_keys();
            if processes.is_empty() {
                processes.push(stem);
            }

            for process in processes {
                if let Some(previous) = owners.insert(process.clone(), path.clone()) {
                    report.conflicts.push(format!(
                        "process '{}' claimed by {} and {}; using {}",
                        process,
                        previous.display(),
                        path.display(),
                        path.display()
                    ));
                }
                snapshot.by_process.insert(process, Arc::clone(&table));
            }
        }

        Ok((snapshot, report))
    }

    /// `*.json` files in lexicographic file-name order, plus the directory
    /// entries that could not be read
    fn profile_paths(&self) -> Result<(Vec<PathBuf>, Vec<ProfileError>), StoreError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                StoreError::DirectoryMissing {
                    path: self.dir.clone(),
                }
            } else {
                StoreError::Io {
                    path: self.dir.clone(),
                    source,
                }
            }
        })?;

        Ok(collect_profile_paths(
            &self.dir,
            entries.map(|entry| entry.map(|entry| entry.path())),
        ))
    }

    fn report_all(&self, report: &ReloadReport) {
        for message in report.messages() {
            self.report(message);
        }
    }

    fn report(&self, message: String) {
        match &self.errors {
            Some(tx) => {
                tracing::debug!("Reporting profile error: {}", message);
                if tx.send(message).is_err() {
                    tracing::warn!("Profile error channel closed");
                }
            }
            None => tracing::warn!("{}", message),
        }
    }
}

fn collect_profile_paths(
    dir: &Path,
    entries: impl Iterator<Item = io::Result<PathBuf>>,
) -> (Vec<PathBuf>, Vec<ProfileError>) {
    let mut paths = Vec::new();
    let mut unreadable = Vec::new();

    for entry in entries {
        match entry {
            Ok(path) if is_profile_path(&path) && path.is_file() => paths.push(path),
            Ok(_) => {}
            Err(source) => unreadable.push(ProfileError::Io {
                path: dir.to_path_buf(),
                source,
            }),
        }
    }

    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    (paths, unreadable)
}

pub(crate) fn is_profile_path(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use altshift_config::{ActionChord, ModifierFlags, SpecialAction};
    use evdev::Key;
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn write(dir: &TempDir, file: &str, content: &str) {
        fs::write(dir.path().join(file), content).unwrap();
    }

    fn trigger(key: Key) -> TriggerKey {
        TriggerKey::new(ModifierFlags::empty(), key)
    }

    fn ctrl(key: Key) -> CompiledMapping {
        CompiledMapping::Remap(ActionChord {
            modifiers: vec![Key::KEY_LEFTCTRL],
            key,
        })
    }

    fn chrome_and_default(dir: &TempDir) {
        write(
            dir,
            "chrome.json",
            r#"{ "name": "Chrome", "processes": ["Chrome"],
                 "mappings": [ { "trigger": "Alt+T", "action": "Ctrl+T" } ] }"#,
        );
        write(
            dir,
            "default.json",
            r#"{ "name": "Default",
                 "mappings": [ { "trigger": "Alt+C", "action": "Ctrl+C" },
                               { "trigger": "Alt+T", "action": "Ctrl+N" } ] }"#,
        );
    }

    #[test]
    fn test_open_missing_directory() {
        let result = MappingStore::open("/nonexistent/altshift/profiles", None);
        assert!(matches!(result, Err(StoreError::DirectoryMissing { .. })));
    }

    #[test]
    fn test_lookup_process_then_fallback() {
        let dir = TempDir::new().unwrap();
        chrome_and_default(&dir);
        let store = MappingStore::open(dir.path(), None).unwrap();
        let report = store.reload().unwrap();
        assert_eq!(report.loaded, 2);
        assert!(report.messages().is_empty());

        // Process table wins over fallback
        assert_eq!(store.lookup(Some("chrome"), &trigger(Key::KEY_T)), Some(ctrl(Key::KEY_T)));
        // Falls back for triggers the process table lacks
        assert_eq!(store.lookup(Some("chrome"), &trigger(Key::KEY_C)), Some(ctrl(Key::KEY_C)));
        // Unknown process and no process both use the fallback
        assert_eq!(store.lookup(Some("notepad"), &trigger(Key::KEY_T)), Some(ctrl(Key::KEY_N)));
        assert_eq!(store.lookup(None, &trigger(Key::KEY_C)), Some(ctrl(Key::KEY_C)));
        // Unmapped everywhere
        assert_eq!(store.lookup(Some("chrome"), &trigger(Key::KEY_Q)), None);
    }

    #[test]
    fn test_empty_store_has_no_mappings() {
        let dir = TempDir::new().unwrap();
        let store = MappingStore::open(dir.path(), None).unwrap();
        assert_eq!(store.lookup(Some("chrome"), &trigger(Key::KEY_T)), None);

        store.reload().unwrap();
        assert_eq!(store.lookup(None, &trigger(Key::KEY_T)), None);
    }

    #[test]
    fn test_file_stem_names_process_when_none_declared() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "Kitty.json",
            r#"{ "name": "Terminal", "mappings": [ { "trigger": "Alt+C", "action": "Ctrl+Shift+C" } ] }"#,
        );
        let store = MappingStore::open(dir.path(), None).unwrap();
        store.reload().unwrap();

        assert!(store.snapshot().table_for("kitty").is_some());
    }

    #[test]
    fn test_default_by_file_stem() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "default.json",
            r#"{ "name": "Everything", "mappings": [ { "trigger": "Alt+W", "action": "special:close-window" } ] }"#,
        );
        let store = MappingStore::open(dir.path(), None).unwrap();
        store.reload().unwrap();

        assert_eq!(
            store.lookup(Some("anything"), &trigger(Key::KEY_W)),
            Some(CompiledMapping::Special(SpecialAction::CloseWindow))
        );
        assert_eq!(store.snapshot().process_count(), 0);
    }

    #[test]
    fn test_later_file_wins_process_conflict() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "a.json",
            r#"{ "name": "A", "processes": ["chrome"], "mappings": [ { "trigger": "Alt+T", "action": "Ctrl+A" } ] }"#,
        );
        write(
            &dir,
            "b.json",
            r#"{ "name": "B", "processes": ["CHROME"], "mappings": [ { "trigger": "Alt+T", "action": "Ctrl+B" } ] }"#,
        );
        let store = MappingStore::open(dir.path(), None).unwrap();
        let report = store.reload().unwrap();

        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(store.lookup(Some("chrome"), &trigger(Key::KEY_T)), Some(ctrl(Key::KEY_B)));
    }

    #[test]
    fn test_bad_files_and_mappings_are_skipped() {
        let dir = TempDir::new().unwrap();
        chrome_and_default(&dir);
        write(&dir, "broken.json", r#"{ "name": 12 }"#);
        write(
            &dir,
            "partial.json",
            r#"{ "name": "Partial", "processes": ["foot"],
                 "mappings": [ { "trigger": "Alt+Nope", "action": "Ctrl+C" },
                               { "trigger": "Alt+V", "action": "Ctrl+V" } ] }"#,
        );
        write(&dir, "notes.txt", "not a profile");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let store = MappingStore::open(dir.path(), Some(tx)).unwrap();
        let report = store.reload().unwrap();

        assert_eq!(report.loaded, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.mapping_errors.len(), 1);
        assert_eq!(store.lookup(Some("foot"), &trigger(Key::KEY_V)), Some(ctrl(Key::KEY_V)));
        assert_eq!(store.lookup(Some("chrome"), &trigger(Key::KEY_T)), Some(ctrl(Key::KEY_T)));

        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().any(|m| m.contains("broken.json")));
        assert!(messages.iter().any(|m| m.contains("Nope")));
    }

    #[test]
    fn test_reload_replaces_snapshot() {
        let dir = TempDir::new().unwrap();
        chrome_and_default(&dir);
        let store = MappingStore::open(dir.path(), None).unwrap();
        store.reload().unwrap();
        let old = store.snapshot();

        fs::remove_file(dir.path().join("chrome.json")).unwrap();
        store.reload().unwrap();

        assert_eq!(store.lookup(Some("chrome"), &trigger(Key::KEY_T)), Some(ctrl(Key::KEY_N)));
        // A reader holding the old snapshot still sees it intact
        assert!(old.table_for("chrome").is_some());
    }

    #[test]
    fn test_retry_exhaustion_commits_and_reports_race() {
        let dir = TempDir::new().unwrap();
        chrome_and_default(&dir);
        // Truncated mid-write, never completes
        write(&dir, "half.json", r#"{ "name": "Half", "processes": ["ha"#);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let store = MappingStore::open(dir.path(), Some(tx)).unwrap();
        let policy = RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(1),
        };

        let result = store.reload_with_retry(&policy);
        assert!(matches!(result, Err(StoreError::ReloadRace { attempts: 3, .. })));
        // The rest of the profiles were still committed
        assert_eq!(store.lookup(Some("chrome"), &trigger(Key::KEY_T)), Some(ctrl(Key::KEY_T)));

        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        assert!(messages.iter().any(|m| m.contains("3 attempt")));
    }

    #[test]
    fn test_retry_without_transient_failures_succeeds_once() {
        let dir = TempDir::new().unwrap();
        chrome_and_default(&dir);
        write(&dir, "wrong.json", r#"{ "name": [] }"#);

        let store = MappingStore::open(dir.path(), None).unwrap();
        let report = store.reload_with_retry(&RetryPolicy::default()).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert!(!report.has_transient());
    }

    #[test]
    fn test_unreadable_entries_are_reported() {
        let dir = TempDir::new().unwrap();
        write(&dir, "b.json", "{}");
        write(&dir, "a.json", "{}");
        write(&dir, "notes.txt", "");

        let entries = vec![
            Ok(dir.path().join("b.json")),
            Err(io::Error::from_raw_os_error(5)),
            Ok(dir.path().join("notes.txt")),
            Ok(dir.path().join("a.json")),
            Ok(dir.path().join("gone.json")),
        ];
        let (paths, unreadable) = collect_profile_paths(dir.path(), entries.into_iter());

        assert_eq!(paths, vec![dir.path().join("a.json"), dir.path().join("b.json")]);
        assert_eq!(unreadable.len(), 1);
        assert!(unreadable[0].is_transient());
        assert!(unreadable[0].to_string().contains(&dir.path().display().to_string()));
    }

    #[test]
    fn test_generation_counts_commits() {
        let dir = TempDir::new().unwrap();
        chrome_and_default(&dir);
        let store = MappingStore::open(dir.path(), None).unwrap();
        assert_eq!(store.generation(), 0);

        store.reload().unwrap();
        store.reload_with_retry(&RetryPolicy::default()).unwrap();
        assert_eq!(store.generation(), 2);
    }

    #[test]
    fn test_readers_never_see_mixed_snapshot() {
        let dir = TempDir::new().unwrap();
        let letters = [Key::KEY_A, Key::KEY_B, Key::KEY_C, Key::KEY_D];

        let write_version = |key: Key| {
            let name = altshift_config::key_name(key).unwrap();
            for process in ["chrome", "notepad"] {
                write(
                    &dir,
                    &format!("{}.json", process),
                    &format!(
                        r#"{{ "name": "{p}", "processes": ["{p}"],
                             "mappings": [ {{ "trigger": "Alt+T", "action": "Ctrl+{k}" }} ] }}"#,
                        p = process,
                        k = name
                    ),
                );
            }
        };

        write_version(letters[0]);
        let store = Arc::new(MappingStore::open(dir.path(), None).unwrap());
        store.reload().unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let done = Arc::clone(&done);
                std::thread::spawn(move || {
                    let t = trigger(Key::KEY_T);
                    while !done.load(Ordering::Acquire) {
                        let snapshot = store.snapshot();
                        let chrome = snapshot.lookup(Some("chrome"), &t).cloned();
                        let notepad = snapshot.lookup(Some("notepad"), &t).cloned();
                        assert_eq!(chrome, notepad, "mixed snapshot observed");
                        assert!(chrome.is_some());
                    }
                })
            })
            .collect();

        for round in 0..20 {
            write_version(letters[round % letters.len()]);
            store.reload().unwrap();
        }
        done.store(true, Ordering::Release);

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
