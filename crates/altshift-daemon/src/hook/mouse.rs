//! Alt+click to Ctrl+click
//!
//! The mouse callback never injects. It suppresses the physical left button,
//! flips flags and unparks the worker; the worker owns every synthetic mouse
//! transition and the stuck-button watchdog. Keyboards that also carry a left
//! button route it through the same [`ClickSwap`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, Thread};
use std::time::{Duration, Instant};

use altshift_config::PRIMARY_MODIFIER;
use evdev::{InputEvent, InputEventKind, Key};

use crate::engine::{EngineShared, EngineState};
use crate::event_value;
use crate::sender::{self, Forwarder, InputBatch, SharedSink};

use super::runner::EventHandler;
use super::HookError;

const TARGET_MODIFIER: Key = Key::KEY_LEFTCTRL;

/// Longest the worker sleeps without a click in flight
const IDLE_PARK: Duration = Duration::from_millis(500);

/// Flags shared between the mouse callback and the worker
#[derive(Debug, Default)]
pub struct MouseFlags {
    /// A physical click is currently being replaced
    swapped: AtomicBool,
    pending_down: AtomicBool,
    pending_up: AtomicBool,
    disposed: AtomicBool,
    stuck_resolved: AtomicU64,
}

impl MouseFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_swapped(&self) -> bool {
        self.swapped.load(Ordering::Acquire)
    }

    /// Clicks the watchdog had to force-release
    pub fn stuck_resolved(&self) -> u64 {
        self.stuck_resolved.load(Ordering::Acquire)
    }
}

/// The Alt+left-click takeover, shared by the pointer hook and the keyboard
/// hook for devices that are both
#[derive(Clone)]
pub struct ClickSwap {
    engine: EngineShared,
    flags: Arc<MouseFlags>,
    worker: Thread,
}

impl ClickSwap {
    pub fn new(engine: EngineShared, flags: Arc<MouseFlags>, worker: Thread) -> Self {
        Self {
            engine,
            flags,
            worker,
        }
    }

    /// Returns `true` if the left button transition was taken over.
    /// Anything still queued in `forwarder` is flushed ahead of a swap.
    pub fn on_left_button(&self, value: i32, forwarder: &mut Forwarder, sink: &SharedSink) -> bool {
        match value {
            event_value::PRESS => {
                if !self.engine.is_enabled() || !self.engine.modifiers.primary_down() {
                    return false;
                }
                if let Err(e) = forwarder.flush(sink) {
                    tracing::warn!("Failed to forward pointer input: {}", e);
                }
                self.flags.swapped.store(true, Ordering::Release);
                self.flags.pending_down.store(true, Ordering::Release);
                self.worker.unpark();
                true
            }
            event_value::RELEASE => {
                if !self.flags.swapped.load(Ordering::Acquire) {
                    return false;
                }
                self.flags.pending_up.store(true, Ordering::Release);
                self.worker.unpark();
                true
            }
            _ => false,
        }
    }
}

/// Mouse hook callback
pub struct MouseHandler {
    swap: ClickSwap,
    sink: SharedSink,
    forwarder: Forwarder,
}

impl MouseHandler {
    pub fn new(swap: ClickSwap, sink: SharedSink) -> Self {
        Self {
            swap,
            sink,
            forwarder: Forwarder::new(),
        }
    }

    fn forward(&mut self, event: InputEvent) {
        if let Err(e) = self.forwarder.push(&self.sink, event) {
            tracing::warn!("Failed to forward pointer input: {}", e);
        }
    }
}

impl EventHandler for MouseHandler {
    fn on_event(&mut self, event: InputEvent) {
        if let InputEventKind::Key(Key::BTN_LEFT) = event.kind() {
            if self
                .swap
                .on_left_button(event.value(), &mut self.forwarder, &self.sink)
            {
                return;
            }
        }
        self.forward(event);
    }

    fn on_stop(&mut self) {
        if let Err(e) = self.forwarder.flush(&self.sink) {
            tracing::warn!("Failed to forward pointer input: {}", e);
        }
    }
}

/// What one worker step did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    pub pressed: bool,
    pub released: bool,
    pub forced: bool,
}

/// Performs all synthetic mouse input
pub struct MouseWorker {
    engine: EngineShared,
    flags: Arc<MouseFlags>,
    sink: SharedSink,
    watchdog: Duration,
    /// When the synthetic Ctrl+click went down
    down_since: Option<Instant>,
}

impl MouseWorker {
    pub fn new(
        engine: EngineShared,
        flags: Arc<MouseFlags>,
        sink: SharedSink,
        watchdog: Duration,
    ) -> Self {
        Self {
            engine,
            flags,
            sink,
            watchdog,
            down_since: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.down_since.is_some()
    }

    /// Consume pending flags and run the watchdog
    pub fn step(&mut self, now: Instant) -> StepReport {
        let mut report = StepReport::default();

        if self.flags.pending_down.swap(false, Ordering::AcqRel) {
            self.inject(&down_sequence());
            self.down_since = Some(now);
            report.pressed = true;
        }

        if self.flags.pending_up.swap(false, Ordering::AcqRel) {
            if self.is_active() {
                self.release();
                report.released = true;
            } else {
                tracing::debug!("Discarding release of a click that is no longer held");
            }
        }

        if let Some(since) = self.down_since {
            if now.saturating_duration_since(since) >= self.watchdog {
                tracing::warn!(
                    held_ms = now.saturating_duration_since(since).as_millis() as u64,
                    "Stuck Ctrl+click detected, forcing release"
                );
                self.release();
                self.flags.pending_up.store(false, Ordering::Release);
                self.flags.stuck_resolved.fetch_add(1, Ordering::AcqRel);
                report.forced = true;
            }
        }

        report
    }

    /// How long to park before the next step
    pub fn park_timeout(&self, now: Instant) -> Duration {
        match self.down_since {
            Some(since) => (since + self.watchdog)
                .saturating_duration_since(now)
                .min(IDLE_PARK),
            None => IDLE_PARK,
        }
    }

    fn release(&mut self) {
        let restore_primary = self.engine.modifiers.primary_down()
            && self.engine.state.load() != EngineState::ChordActive;
        self.inject(&up_sequence(restore_primary));
        self.down_since = None;
        self.flags.swapped.store(false, Ordering::Release);
    }

    fn inject(&self, batch: &InputBatch) {
        if let Err(e) = sender::send(&self.sink, batch) {
            tracing::warn!("Failed to inject mouse input: {}", e);
        }
    }

    fn run(mut self) {
        loop {
            if self.flags.disposed.load(Ordering::Acquire) {
                break;
            }
            self.step(Instant::now());
            std::thread::park_timeout(self.park_timeout(Instant::now()));
        }

        if self.is_active() {
            tracing::debug!("Releasing swapped click on shutdown");
            self.release();
        }
        self.flags.pending_down.store(false, Ordering::Release);
        self.flags.pending_up.store(false, Ordering::Release);
        self.flags.swapped.store(false, Ordering::Release);
    }
}

fn down_sequence() -> InputBatch {
    InputBatch::builder()
        .up(PRIMARY_MODIFIER)
        .down(TARGET_MODIFIER)
        .down(Key::BTN_LEFT)
        .build()
}

fn up_sequence(restore_primary: bool) -> InputBatch {
    let batch = InputBatch::builder().up(Key::BTN_LEFT).up(TARGET_MODIFIER);
    if restore_primary {
        batch.down(PRIMARY_MODIFIER).build()
    } else {
        batch.build()
    }
}

/// The running worker thread
pub struct WorkerHandle {
    flags: Arc<MouseFlags>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn spawn(worker: MouseWorker) -> Result<Self, HookError> {
        let flags = Arc::clone(&worker.flags);
        let thread = std::thread::Builder::new()
            .name("altshift-mouse-worker".to_string())
            .spawn(move || worker.run())
            .map_err(|source| HookError::Spawn {
                name: "altshift-mouse-worker",
                source,
            })?;
        Ok(Self {
            flags,
            thread: Some(thread),
        })
    }

    /// Handle for unparking from the callback
    pub fn thread(&self) -> Option<Thread> {
        self.thread.as_ref().map(|t| t.thread().clone())
    }

    /// Stop the worker; a swapped click is released before it exits
    pub fn dispose(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.flags.disposed.store(true, Ordering::Release);
        thread.thread().unpark();
        if thread.join().is_err() {
            tracing::error!("altshift-mouse-worker panicked");
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}
