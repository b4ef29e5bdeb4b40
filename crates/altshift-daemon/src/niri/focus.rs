//! Foreground process tracking
//!
//! The tracker follows niri's event stream, keeps its own window table and
//! publishes the focused window's process name through an `ArcSwapOption`,
//! which the keyboard hook reads without locking.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::time::sleep;

use super::client::NiriEventStream;
use super::types::WindowInfo;
use super::NiriError;

/// Source of the process name that selects a profile
pub trait ProcessNameProvider: Send + Sync {
    /// Lowercased process name of the focused window, if known
    fn foreground_process(&self) -> Option<Arc<String>>;
}

#[derive(Debug, Default)]
pub struct FocusTracker {
    current: ArcSwapOption<String>,
}

impl FocusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, process: Option<String>) {
        self.current.store(process.map(Arc::new));
    }
}

impl ProcessNameProvider for FocusTracker {
    fn foreground_process(&self) -> Option<Arc<String>> {
        self.current.load_full()
    }
}

/// The subset of niri events that affect focus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusUpdate {
    /// Full window list, replaces everything
    Windows(Vec<WindowInfo>),
    Opened(WindowInfo),
    Closed(u64),
    Focused(Option<u64>),
}

impl FocusUpdate {
    pub fn from_event(event: niri_ipc::Event) -> Option<Self> {
        match event {
            niri_ipc::Event::WindowsChanged { windows } => Some(FocusUpdate::Windows(
                windows.into_iter().map(WindowInfo::from).collect(),
            )),
            niri_ipc::Event::WindowOpenedOrChanged { window } => {
                Some(FocusUpdate::Opened(window.into()))
            }
            niri_ipc::Event::WindowClosed { id } => Some(FocusUpdate::Closed(id)),
            niri_ipc::Event::WindowFocusChanged { id } => Some(FocusUpdate::Focused(id)),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct WindowTable {
    windows: HashMap<u64, WindowInfo>,
    focused: Option<u64>,
}

impl WindowTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, update: FocusUpdate) {
        match update {
            FocusUpdate::Windows(windows) => {
                self.focused = windows.iter().find(|w| w.is_focused).map(|w| w.id);
                self.windows = windows.into_iter().map(|w| (w.id, w)).collect();
            }
            FocusUpdate::Opened(window) => {
                if window.is_focused {
                    self.focused = Some(window.id);
                } else if self.focused == Some(window.id) {
                    self.focused = None;
                }
                self.windows.insert(window.id, window);
            }
            FocusUpdate::Closed(id) => {
                self.windows.remove(&id);
                if self.focused == Some(id) {
                    self.focused = None;
                }
            }
            FocusUpdate::Focused(id) => self.focused = id,
        }
    }

    pub fn focused(&self) -> Option<&WindowInfo> {
        self.focused.and_then(|id| self.windows.get(&id))
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Process name for a window: `/proc/<pid>/comm`, else the app_id.
pub fn process_name(window: &WindowInfo) -> Option<String> {
    let from_proc = window.pid.and_then(|pid| {
        std::fs::read_to_string(format!("/proc/{}/comm", pid))
            .ok()
            .map(|comm| comm.trim().to_lowercase())
    });

    from_proc
        .filter(|name| !name.is_empty())
        .or_else(|| Some(window.app_id.trim().to_lowercase()))
        .filter(|name| !name.is_empty())
}

/// Follow niri focus until the task is dropped.
///
/// Returns immediately when niri is not running; every lookup then uses
/// the default profile.
pub async fn run_focus_tracker(tracker: Arc<FocusTracker>) {
    loop {
        let mut stream = match NiriEventStream::connect_with_retry(5).await {
            Ok(stream) => stream,
            Err(NiriError::SocketNotSet) => {
                tracing::info!("niri not detected, per-application profiles disabled");
                return;
            }
            Err(e) => {
                tracing::warn!("niri event stream unavailable: {}", e);
                tracker.set(None);
                sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        tracing::info!("Following niri focus changes");
        let mut table = WindowTable::new();
        let mut last: Option<String> = None;

        loop {
            let event = match stream.next_event().await {
                Ok(event) => event,
                Err(NiriError::DeserializeFailed(e)) => {
                    // Newer niri events we have no type for
                    tracing::trace!("Skipping unknown niri event: {}", e);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("niri event stream lost: {}", e);
                    break;
                }
            };

            let Some(update) = FocusUpdate::from_event(event) else {
                continue;
            };
            table.apply(update);

            let current = table.focused().and_then(process_name);
            if current != last {
                tracing::debug!("Foreground process: {:?}", current);
                tracker.set(current.clone());
                last = current;
            }
        }

        tracker.set(None);
    }
}
