//! Special actions
//!
//! Mappings can name a built-in behaviour instead of a key chord. The
//! keyboard hook only queues the action; window enumeration and IPC happen
//! on the `altshift-special` worker thread.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use altshift_config::SpecialAction;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;

use crate::niri::{NiriClient, NiriError, WindowInfo};

#[derive(Error, Debug)]
pub enum SpecialError {
    #[error(transparent)]
    Niri(#[from] NiriError),

    #[error("failed to signal process: {0}")]
    Signal(#[from] nix::errno::Errno),

    #[error("failed to start special action runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Job {
    Run(SpecialAction),
    Stop,
}

/// Non-blocking handle the keyboard hook queues actions on
#[derive(Debug, Clone)]
pub struct SpecialSender {
    tx: Sender<Job>,
}

impl SpecialSender {
    /// Queue an action. Hands it back if the worker is gone.
    pub fn send(&self, action: SpecialAction) -> Result<(), SpecialAction> {
        self.tx.send(Job::Run(action)).map_err(|_| action)
    }
}

#[cfg(test)]
pub(crate) fn test_channel() -> (SpecialSender, Receiver<Job>) {
    let (tx, rx) = mpsc::channel();
    (SpecialSender { tx }, rx)
}

/// Window operations the special actions are built from
pub trait WindowOps {
    fn focused_window(&mut self) -> Result<Option<WindowInfo>, SpecialError>;
    fn windows(&mut self) -> Result<Vec<WindowInfo>, SpecialError>;
    fn focus_window(&mut self, id: u64) -> Result<(), SpecialError>;
    fn close_window(&mut self, id: u64) -> Result<(), SpecialError>;
    /// Ask a process to quit (SIGTERM)
    fn terminate(&mut self, pid: i32) -> Result<(), SpecialError>;
}

/// [`WindowOps`] over niri IPC, one short-lived connection per request
pub struct NiriWindowOps {
    runtime: tokio::runtime::Runtime,
}

impl NiriWindowOps {
    pub fn new() -> Result<Self, SpecialError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(SpecialError::Runtime)?;
        Ok(Self { runtime })
    }
}

impl WindowOps for NiriWindowOps {
    fn focused_window(&mut self) -> Result<Option<WindowInfo>, SpecialError> {
        let window = self.runtime.block_on(async {
            let mut client = NiriClient::connect().await?;
            client.focused_window().await
        })?;
        Ok(window)
    }

    fn windows(&mut self) -> Result<Vec<WindowInfo>, SpecialError> {
        let windows = self.runtime.block_on(async {
            let mut client = NiriClient::connect().await?;
            client.windows().await
        })?;
        Ok(windows)
    }

    fn focus_window(&mut self, id: u64) -> Result<(), SpecialError> {
        self.runtime.block_on(async {
            let mut client = NiriClient::connect().await?;
            client.action(niri_ipc::Action::FocusWindow { id }).await
        })?;
        Ok(())
    }

    fn close_window(&mut self, id: u64) -> Result<(), SpecialError> {
        self.runtime.block_on(async {
            let mut client = NiriClient::connect().await?;
            client.action(niri_ipc::Action::CloseWindow { id: Some(id) }).await
        })?;
        Ok(())
    }

    fn terminate(&mut self, pid: i32) -> Result<(), SpecialError> {
        kill(Pid::from_raw(pid), Signal::SIGTERM)?;
        Ok(())
    }
}

/// Next window of the same application after `focused`, by window id,
/// wrapping around. `None` when the application has a single window.
pub fn next_app_window(focused: &WindowInfo, windows: &[WindowInfo]) -> Option<u64> {
    let mut ids: Vec<u64> = windows
        .iter()
        .filter(|w| w.app_id == focused.app_id)
        .map(|w| w.id)
        .collect();
    ids.sort_unstable();
    ids.dedup();

    if ids.len() < 2 {
        return None;
    }

    ids.iter()
        .find(|id| **id > focused.id)
        .or_else(|| ids.first())
        .copied()
        .filter(|id| *id != focused.id)
}

/// Run one action to completion. Nothing focused is not an error.
pub fn execute(action: SpecialAction, ops: &mut dyn WindowOps) -> Result<(), SpecialError> {
    let Some(focused) = ops.focused_window()? else {
        tracing::debug!("{}: no focused window", action);
        return Ok(());
    };

    match action {
        SpecialAction::CycleAppWindows => {
            let windows = ops.windows()?;
            match next_app_window(&focused, &windows) {
                Some(id) => ops.focus_window(id),
                None => Ok(()),
            }
        }
        SpecialAction::CloseWindow => ops.close_window(focused.id),
        SpecialAction::QuitApp => match focused.pid {
            Some(pid) => ops.terminate(pid),
            None => {
                tracing::debug!("quit-app: window {} has no pid, closing it", focused.id);
                ops.close_window(focused.id)
            }
        },
    }
}

/// Owns the special-action thread. Dropping it finishes the queued actions
/// and joins.
pub struct SpecialWorker {
    tx: Sender<Job>,
    thread: Option<JoinHandle<()>>,
}

impl SpecialWorker {
    /// Start the worker. `make_ops` runs on the worker thread.
    pub fn spawn<F>(make_ops: F) -> std::io::Result<Self>
    where
        F: FnOnce() -> Result<Box<dyn WindowOps>, SpecialError> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let thread = std::thread::Builder::new()
            .name("altshift-special".to_string())
            .spawn(move || run_worker(make_ops, rx))?;

        Ok(Self {
            tx,
            thread: Some(thread),
        })
    }

    pub fn sender(&self) -> SpecialSender {
        SpecialSender {
            tx: self.tx.clone(),
        }
    }
}

impl Drop for SpecialWorker {
    fn drop(&mut self) {
        let _ = self.tx.send(Job::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_worker<F>(make_ops: F, rx: Receiver<Job>)
where
    F: FnOnce() -> Result<Box<dyn WindowOps>, SpecialError>,
{
    let mut ops = match make_ops() {
        Ok(ops) => Some(ops),
        Err(e) => {
            tracing::error!("Special actions unavailable: {}", e);
            None
        }
    };

    for job in rx {
        let action = match job {
            Job::Run(action) => action,
            Job::Stop => break,
        };
        let Some(ops) = ops.as_mut() else {
            tracing::warn!("Dropping special action {}", action);
            continue;
        };
        tracing::debug!("Running special action {}", action);
        if let Err(e) = execute(action, ops.as_mut()) {
            tracing::warn!("Special action {} failed: {}", action, e);
        }
    }
}
