//! Hook threads
//!
//! Each hook type owns one OS thread running a current-thread tokio runtime.
//! Every grabbed device gets a reader task that cuts its stream into frames;
//! the frames are merged into a single queue so the handler sees one device's
//! frame at a time and runs strictly single-threaded. Devices plugged in
//! later are attached to the running thread.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use evdev::{Device, EventType, InputEvent};
use tokio::sync::{mpsc, Notify};

use super::device::DeviceInfo;
use super::{Activity, HookError};

/// Handler time per event above which a warning is logged
pub const CALLBACK_BUDGET: Duration = Duration::from_millis(5);

const FRAME_QUEUE: usize = 256;

enum Input {
    Frame(Vec<InputEvent>),
    Lost(DeviceInfo),
}

/// Per-event callback of a hook thread
pub trait EventHandler: Send + 'static {
    fn on_event(&mut self, event: InputEvent);

    /// A device stopped delivering events, usually because it was unplugged
    fn on_device_lost(&mut self, _info: &DeviceInfo) {}

    /// Runs once after the last event, before the devices are closed
    fn on_stop(&mut self) {}
}

pub struct HookThread<H> {
    name: &'static str,
    stop: Arc<Notify>,
    attach: mpsc::UnboundedSender<(DeviceInfo, Device)>,
    thread: Option<JoinHandle<H>>,
}

impl<H: EventHandler> HookThread<H> {
    pub fn spawn(
        name: &'static str,
        devices: Vec<(DeviceInfo, Device)>,
        handler: H,
        activity: Arc<Activity>,
    ) -> Result<Self, HookError> {
        let stop = Arc::new(Notify::new());
        let thread_stop = Arc::clone(&stop);
        let (attach, attach_rx) = mpsc::unbounded_channel();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(name, devices, attach_rx, handler, thread_stop, activity))
            .map_err(|source| HookError::Spawn { name, source })?;

        Ok(Self {
            name,
            stop,
            attach,
            thread: Some(thread),
        })
    }

    /// Hand a grabbed device to the running thread. `false` once the
    /// thread has exited.
    pub fn attach(&self, info: DeviceInfo, device: Device) -> bool {
        !self.is_finished() && self.attach.send((info, device)).is_ok()
    }

    /// The thread exited on its own, e.g. because every device vanished
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the thread, close its devices and hand the handler back.
    /// `None` if the thread panicked.
    pub fn stop(mut self) -> Option<H> {
        // A stored permit covers a thread that is not waiting yet
        self.stop.notify_one();
        let thread = self.thread.take()?;
        match thread.join() {
            Ok(handler) => Some(handler),
            Err(_) => {
                tracing::error!("{} thread panicked", self.name);
                None
            }
        }
    }
}

fn run<H: EventHandler>(
    name: &'static str,
    devices: Vec<(DeviceInfo, Device)>,
    mut attach: mpsc::UnboundedReceiver<(DeviceInfo, Device)>,
    mut handler: H,
    stop: Arc<Notify>,
    activity: Arc<Activity>,
) -> H {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("{}: failed to start runtime: {}", name, e);
            return handler;
        }
    };

    runtime.block_on(async {
        let (tx, mut rx) = mpsc::channel::<Input>(FRAME_QUEUE);
        let mut readers = 0usize;

        for (info, device) in devices {
            if start_reader(info, device, &tx) {
                readers += 1;
            }
        }

        tracing::debug!("{} running with {} devices", name, readers);

        loop {
            tokio::select! {
                _ = stop.notified() => break,
                Some((info, device)) = attach.recv() => {
                    tracing::debug!("{}: attaching {}", name, info.path.display());
                    if start_reader(info, device, &tx) {
                        readers += 1;
                    }
                }
                input = rx.recv() => {
                    // `tx` lives in this scope, so the queue never closes
                    let Some(input) = input else { break };
                    match input {
                        Input::Frame(frame) => {
                            activity.touch();
                            for event in frame {
                                let started = Instant::now();
                                handler.on_event(event);
                                let elapsed = started.elapsed();
                                if elapsed > CALLBACK_BUDGET {
                                    tracing::warn!(
                                        elapsed_us = elapsed.as_micros() as u64,
                                        "{} callback over budget",
                                        name
                                    );
                                }
                            }
                        }
                        Input::Lost(info) => {
                            handler.on_device_lost(&info);
                            readers = readers.saturating_sub(1);
                            if readers == 0 {
                                tracing::warn!("{}: no input devices left", name);
                                break;
                            }
                        }
                    }
                }
            }
        }

        handler.on_stop();
    });

    // Dropping the runtime drops the streams, which closes and ungrabs the devices
    drop(runtime);
    tracing::debug!("{} stopped", name);
    handler
}

fn start_reader(info: DeviceInfo, device: Device, tx: &mpsc::Sender<Input>) -> bool {
    match device.into_event_stream() {
        Ok(stream) => {
            tokio::spawn(read_frames(info, stream, tx.clone()));
            true
        }
        Err(e) => {
            tracing::warn!(
                "Failed to create event stream for '{}' at {}: {}",
                info.name,
                info.path.display(),
                e
            );
            false
        }
    }
}

async fn read_frames(info: DeviceInfo, mut stream: evdev::EventStream, tx: mpsc::Sender<Input>) {
    let mut frame = Vec::new();
    loop {
        match stream.next_event().await {
            Ok(event) => {
                let end_of_frame = event.event_type() == EventType::SYNCHRONIZATION;
                frame.push(event);
                if end_of_frame && tx.send(Input::Frame(std::mem::take(&mut frame))).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(
                    "'{}' at {} stopped delivering events: {}",
                    info.name,
                    info.path.display(),
                    e
                );
                let _ = tx.send(Input::Lost(info)).await;
                return;
            }
        }
    }
}
