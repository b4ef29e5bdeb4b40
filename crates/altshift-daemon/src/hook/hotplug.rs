//! Input device hotplug
//!
//! A udev monitor on the `input` subsystem runs on `altshift-hotplug` and
//! reports evdev nodes coming and going. [`Hooks::handle_hotplug`] does the
//! grabbing.
//!
//! [`Hooks::handle_hotplug`]: super::Hooks::handle_hotplug

use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

use futures::StreamExt;
use tokio::sync::{mpsc, Notify};
use tokio_udev::AsyncMonitorSocket;
use udev::{EventType, MonitorBuilder};

use super::device::is_event_node;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    Add { devnode: PathBuf },
    Remove { devnode: PathBuf },
}

impl HotplugEvent {
    /// `None` for anything but an evdev node being added or removed
    pub fn from_udev(event_type: EventType, devnode: Option<&Path>) -> Option<Self> {
        let devnode = devnode.filter(|path| is_event_node(path))?.to_path_buf();
        match event_type {
            EventType::Add => Some(HotplugEvent::Add { devnode }),
            EventType::Remove => Some(HotplugEvent::Remove { devnode }),
            _ => None,
        }
    }

    pub fn devnode(&self) -> &Path {
        match self {
            HotplugEvent::Add { devnode } | HotplugEvent::Remove { devnode } => devnode,
        }
    }
}

/// The running udev monitor. Dropping it stops the thread.
pub struct HotplugMonitor {
    stop: Arc<Notify>,
    thread: Option<JoinHandle<()>>,
}

impl HotplugMonitor {
    /// Start watching; events go to `events` until it is closed
    pub fn spawn(events: mpsc::UnboundedSender<HotplugEvent>) -> io::Result<Self> {
        let stop = Arc::new(Notify::new());
        let thread_stop = Arc::clone(&stop);
        let (ready_tx, ready_rx) = sync_channel(1);

        let thread = std::thread::Builder::new()
            .name("altshift-hotplug".to_string())
            .spawn(move || run(events, thread_stop, ready_tx))?;

        let started = match ready_rx.recv() {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::Other,
                "hotplug thread exited during startup",
            )),
        };
        if let Err(e) = started {
            let _ = thread.join();
            return Err(e);
        }

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }
}

impl Drop for HotplugMonitor {
    fn drop(&mut self) {
        self.stop.notify_one();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("altshift-hotplug panicked");
            }
        }
    }
}

fn open_monitor() -> io::Result<AsyncMonitorSocket> {
    let socket = MonitorBuilder::new()?.match_subsystem("input")?.listen()?;
    AsyncMonitorSocket::new(socket)
}

fn run(
    events: mpsc::UnboundedSender<HotplugEvent>,
    stop: Arc<Notify>,
    ready: SyncSender<io::Result<()>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    runtime.block_on(async {
        // The socket registers with this runtime's reactor
        let mut socket = match open_monitor() {
            Ok(socket) => socket,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        let _ = ready.send(Ok(()));
        tracing::info!("Watching udev for input devices");

        loop {
            tokio::select! {
                _ = stop.notified() => break,
                event = socket.next() => {
                    let event = match event {
                        Some(Ok(event)) => event,
                        Some(Err(e)) => {
                            tracing::warn!("udev monitor error: {}", e);
                            continue;
                        }
                        None => {
                            tracing::warn!("udev monitor closed");
                            break;
                        }
                    };
                    let Some(hotplug) = HotplugEvent::from_udev(event.event_type(), event.devnode())
                    else {
                        continue;
                    };
                    tracing::debug!(devnode = %hotplug.devnode().display(), "{:?}", event.event_type());
                    if events.send(hotplug).is_err() {
                        break;
                    }
                }
            }
        }
    });

    tracing::debug!("Hotplug monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_nodes_are_reported() {
        let node = Path::new("/dev/input/event21");
        assert_eq!(
            HotplugEvent::from_udev(EventType::Add, Some(node)),
            Some(HotplugEvent::Add {
                devnode: node.to_path_buf()
            })
        );
        let removed = HotplugEvent::from_udev(EventType::Remove, Some(node)).unwrap();
        assert_eq!(removed.devnode(), node);
        assert!(matches!(removed, HotplugEvent::Remove { .. }));
    }

    #[test]
    fn test_other_events_are_ignored() {
        let node = Path::new("/dev/input/event21");
        assert_eq!(HotplugEvent::from_udev(EventType::Change, Some(node)), None);
        assert_eq!(HotplugEvent::from_udev(EventType::Bind, Some(node)), None);

        // The parent input device has no node; legacy nodes are not evdev
        assert_eq!(HotplugEvent::from_udev(EventType::Add, None), None);
        assert_eq!(
            HotplugEvent::from_udev(EventType::Add, Some(Path::new("/dev/input/mouse2"))),
            None
        );
    }
}
