//! System-wide input interception
//!
//! [`Hooks`] grabs every physical keyboard and pointer, runs the keyboard
//! callback (engine) on `altshift-keyboard` and the pointer callback on
//! `altshift-mouse`, and owns the mouse worker. Everything not suppressed is
//! re-emitted through the altshift virtual device. Devices plugged in while
//! installed are grabbed from [`HotplugEvent`]s.

pub mod device;
pub mod hotplug;
mod keyboard;
mod mouse;
mod runner;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use evdev::Device;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::engine::{Engine, EngineShared, KeyEvent};
use crate::niri::ProcessNameProvider;
use crate::sender::{self, SendError, SharedSink, UinputSink};
use crate::special::SpecialSender;
use crate::store::MappingStore;

pub use device::{enumerate_devices, DeviceInfo, DeviceKind};
pub use hotplug::{HotplugEvent, HotplugMonitor};
pub use keyboard::KeyboardHandler;
pub use mouse::{ClickSwap, MouseFlags, MouseHandler, MouseWorker, StepReport, WorkerHandle};
pub use runner::{EventHandler, HookThread, CALLBACK_BUDGET};

const RAW_KEY_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum HookError {
    #[error("no keyboard could be grabbed (is the user in the 'input' group?)")]
    NoKeyboard,

    #[error("failed to list input devices: {0}")]
    Enumerate(#[source] std::io::Error),

    #[error("failed to create virtual device: {0}")]
    VirtualDevice(#[source] SendError),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Time of the last input event seen by any hook
#[derive(Debug)]
pub struct Activity {
    epoch: Instant,
    /// Milliseconds since `epoch`, plus one; zero means never
    last: AtomicU64,
}

impl Default for Activity {
    fn default() -> Self {
        Self {
            epoch: Instant::now(),
            last: AtomicU64::new(0),
        }
    }
}

impl Activity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&self) {
        self.touch_at(Instant::now());
    }

    pub fn touch_at(&self, now: Instant) {
        let ms = now.saturating_duration_since(self.epoch).as_millis() as u64;
        self.last.store(ms + 1, Ordering::Release);
    }

    pub fn last(&self) -> Option<Instant> {
        match self.last.load(Ordering::Acquire) {
            0 => None,
            ms => Some(self.epoch + Duration::from_millis(ms - 1)),
        }
    }

    pub fn age(&self) -> Option<Duration> {
        self.last().map(|last| last.elapsed())
    }
}

#[derive(Debug, Clone)]
pub struct HookOptions {
    pub mouse_swap: bool,
    pub mouse_watchdog: Duration,
}

impl Default for HookOptions {
    fn default() -> Self {
        Self {
            mouse_swap: true,
            mouse_watchdog: Duration::from_millis(3000),
        }
    }
}

/// What a fresh engine is built from
struct EngineParts {
    store: Arc<MappingStore>,
    focus: Arc<dyn ProcessNameProvider>,
    special: Option<SpecialSender>,
}

pub struct Hooks {
    options: HookOptions,
    parts: EngineParts,
    shared: EngineShared,
    /// Parked here while not installed
    engine: Option<Engine>,
    sink: Option<SharedSink>,
    activity: Arc<Activity>,
    raw_keys: broadcast::Sender<KeyEvent>,
    mouse_flags: Arc<MouseFlags>,
    worker: Option<WorkerHandle>,
    click_swap: Option<ClickSwap>,
    keyboard: Option<HookThread<KeyboardHandler>>,
    mouse: Option<HookThread<MouseHandler>>,
    /// Device nodes currently held by a hook thread
    grabbed: HashSet<PathBuf>,
}

impl Hooks {
    pub fn new(
        store: Arc<MappingStore>,
        focus: Arc<dyn ProcessNameProvider>,
        special: Option<SpecialSender>,
        enabled: bool,
        options: HookOptions,
    ) -> Self {
        let parts = EngineParts {
            store,
            focus,
            special,
        };
        let shared = EngineShared::new(enabled);
        let (raw_keys, _) = broadcast::channel(RAW_KEY_CAPACITY);

        let mut hooks = Self {
            options,
            parts,
            shared,
            engine: None,
            sink: None,
            activity: Arc::new(Activity::new()),
            raw_keys,
            mouse_flags: Arc::new(MouseFlags::new()),
            worker: None,
            click_swap: None,
            keyboard: None,
            mouse: None,
            grabbed: HashSet::new(),
        };
        hooks.engine = Some(hooks.build_engine());
        hooks
    }

    /// Use `sink` instead of creating the uinput device on install
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn is_installed(&self) -> bool {
        self.keyboard.is_some()
    }

    /// Grab devices and start the hook threads. No-op if already installed.
    pub fn install(&mut self) -> Result<(), HookError> {
        if self.is_installed() {
            return Ok(());
        }

        let sink = self.sink()?;

        let keyboards =
            device::grab_devices(DeviceKind::Keyboard).map_err(HookError::Enumerate)?;
        if keyboards.is_empty() {
            return Err(HookError::NoKeyboard);
        }
        let keyboard_paths: Vec<PathBuf> =
            keyboards.iter().map(|(info, _)| info.path.clone()).collect();

        // The worker comes first so keyboards with a left button share it
        if self.options.mouse_swap {
            if let Err(e) = self.start_click_swap(sink.clone()) {
                tracing::warn!("Mouse worker unavailable, Alt+click swap disabled: {}", e);
            }
        }

        let mut engine = self.engine.take().unwrap_or_else(|| self.build_engine());
        engine.reset();

        let mut handler = KeyboardHandler::new(engine, sink, self.raw_keys.clone());
        if let Some(swap) = &self.click_swap {
            handler = handler.with_click_swap(swap.clone());
        }
        let keyboard = match HookThread::spawn(
            "altshift-keyboard",
            keyboards,
            handler,
            Arc::clone(&self.activity),
        ) {
            Ok(keyboard) => keyboard,
            Err(e) => {
                self.stop_click_swap();
                return Err(e);
            }
        };
        self.keyboard = Some(keyboard);
        self.grabbed.extend(keyboard_paths.iter().cloned());
        self.activity.touch();

        if self.click_swap.is_some() {
            match device::grab_devices(DeviceKind::Pointer) {
                Ok(pointers) if pointers.is_empty() => {
                    tracing::info!("No pointer to grab yet, Alt+click swap waits for one")
                }
                Ok(pointers) => {
                    let count = pointers.len();
                    match self.start_mouse(pointers) {
                        Ok(()) => tracing::info!("Mouse hook active on {} pointer(s)", count),
                        Err(e) => tracing::warn!("Mouse hook unavailable: {}", e),
                    }
                }
                Err(e) => tracing::warn!("Mouse hook unavailable: {}", e),
            }
        }

        tracing::info!("Keyboard hook active on {} keyboard(s)", keyboard_paths.len());
        Ok(())
    }

    fn start_click_swap(&mut self, sink: SharedSink) -> Result<(), HookError> {
        let worker = WorkerHandle::spawn(MouseWorker::new(
            self.shared.clone(),
            Arc::clone(&self.mouse_flags),
            sink,
            self.options.mouse_watchdog,
        ))?;
        if let Some(thread) = worker.thread() {
            self.click_swap = Some(ClickSwap::new(
                self.shared.clone(),
                Arc::clone(&self.mouse_flags),
                thread,
            ));
        }
        self.worker = Some(worker);
        Ok(())
    }

    fn stop_click_swap(&mut self) {
        self.click_swap = None;
        if let Some(mut worker) = self.worker.take() {
            worker.dispose();
        }
    }

    /// Start the pointer hook thread on `pointers`
    fn start_mouse(&mut self, pointers: Vec<(DeviceInfo, Device)>) -> Result<(), HookError> {
        let (Some(swap), Some(sink)) = (self.click_swap.clone(), self.sink.clone()) else {
            return Ok(());
        };
        let paths: Vec<PathBuf> = pointers.iter().map(|(info, _)| info.path.clone()).collect();
        let handler = MouseHandler::new(swap, sink);
        self.mouse = Some(HookThread::spawn(
            "altshift-mouse",
            pointers,
            handler,
            Arc::clone(&self.activity),
        )?);
        self.grabbed.extend(paths);
        Ok(())
    }

    /// Stop everything and release all grabs. Idempotent.
    pub fn uninstall(&mut self) {
        if let Some(mouse) = self.mouse.take() {
            mouse.stop();
        }

        let keyboard = self.keyboard.take();
        let was_installed = keyboard.is_some();
        if let Some(keyboard) = keyboard {
            match keyboard.stop() {
                Some(handler) => self.engine = Some(handler.into_engine()),
                None => tracing::warn!("Keyboard hook lost its engine, a new one will be built"),
            }
        }

        // A swapped click is released before the worker exits
        self.stop_click_swap();
        self.grabbed.clear();

        if !was_installed {
            return;
        }

        if let Some(sink) = &self.sink {
            if let Err(e) = sender::release_all(sink) {
                tracing::warn!("Failed to release virtual device keys: {}", e);
            }
        }
        self.shared.modifiers.reset();

        tracing::info!("Hooks uninstalled");
    }

    /// Grab a device that was just plugged in, or forget one that left
    pub fn handle_hotplug(&mut self, event: &HotplugEvent) {
        match event {
            HotplugEvent::Add { devnode } => self.device_added(devnode),
            HotplugEvent::Remove { devnode } => {
                if self.grabbed.remove(devnode) {
                    tracing::info!("Released device at {}", devnode.display());
                } else {
                    tracing::debug!("Device disconnected at {}", devnode.display());
                }
            }
        }
    }

    fn device_added(&mut self, path: &Path) {
        tracing::debug!("Device connected at {}", path.display());

        let keyboard_alive = self.keyboard.as_ref().is_some_and(|k| !k.is_finished());
        if !keyboard_alive {
            // First keyboard, or every earlier one has gone
            let result = if self.is_installed() {
                self.reinstall()
            } else {
                self.install()
            };
            match result {
                Ok(()) => {}
                Err(HookError::NoKeyboard) => {
                    tracing::debug!("{} is not a keyboard, still waiting for one", path.display())
                }
                Err(e) => tracing::warn!("Failed to install hooks: {}", e),
            }
            return;
        }

        if self.grabbed.contains(path) {
            return;
        }

        let (info, mut device) = match device::open_device(path) {
            Ok(opened) => opened,
            Err(e) => {
                tracing::debug!("Could not open {}: {}", path.display(), e);
                return;
            }
        };

        let Some(kind) = placement(&info, self.click_swap.is_some()) else {
            return;
        };

        if let Err(e) = device::grab(&info, &mut device) {
            tracing::warn!(
                "Failed to grab {} '{}' at {}: {}",
                kind,
                info.name,
                path.display(),
                e
            );
            return;
        }

        let attached = match kind {
            DeviceKind::Keyboard => self
                .keyboard
                .as_ref()
                .is_some_and(|keyboard| keyboard.attach(info, device)),
            DeviceKind::Pointer => self.attach_pointer(info, device),
        };

        if attached {
            self.grabbed.insert(path.to_path_buf());
        } else {
            tracing::warn!("No running {} hook for {}", kind, path.display());
        }
    }

    fn attach_pointer(&mut self, info: DeviceInfo, device: Device) -> bool {
        if let Some(mouse) = self.mouse.as_ref().filter(|mouse| !mouse.is_finished()) {
            return mouse.attach(info, device);
        }
        // First pointer, or the thread ran out of devices
        if let Some(finished) = self.mouse.take() {
            finished.stop();
        }
        match self.start_mouse(vec![(info, device)]) {
            Ok(()) => self.mouse.is_some(),
            Err(e) => {
                tracing::warn!("Mouse hook unavailable: {}", e);
                false
            }
        }
    }

    pub fn reinstall(&mut self) -> Result<(), HookError> {
        tracing::info!("Reinstalling hooks");
        self.uninstall();
        self.install()
    }

    /// Installed, but the keyboard thread is gone or has been silent for
    /// longer than `threshold`
    pub fn needs_reinstall(&self, threshold: Duration) -> bool {
        let Some(keyboard) = &self.keyboard else {
            return false;
        };
        keyboard.is_finished() || self.activity.age().is_some_and(|age| age >= threshold)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::Release);
        tracing::info!("Translation {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.is_enabled()
    }

    pub fn last_event(&self) -> Option<Instant> {
        self.activity.last()
    }

    pub fn last_event_age(&self) -> Option<Duration> {
        self.activity.age()
    }

    /// Physical key events, for recording shortcuts
    pub fn subscribe_raw_keys(&self) -> broadcast::Receiver<KeyEvent> {
        self.raw_keys.subscribe()
    }

    /// Clicks the mouse watchdog force-released
    pub fn stuck_clicks_resolved(&self) -> u64 {
        self.mouse_flags.stuck_resolved()
    }

    pub fn shared(&self) -> &EngineShared {
        &self.shared
    }

    fn sink(&mut self) -> Result<SharedSink, HookError> {
        if let Some(sink) = &self.sink {
            return Ok(sink.clone());
        }
        let sink = sender::shared(UinputSink::create().map_err(HookError::VirtualDevice)?);
        self.sink = Some(sink.clone());
        Ok(sink)
    }

    fn build_engine(&self) -> Engine {
        Engine::new(
            Arc::clone(&self.parts.store),
            Arc::clone(&self.parts.focus),
            self.shared.clone(),
            self.parts.special.clone(),
        )
    }
}

/// Which hook a new device belongs to, if any
fn placement(info: &DeviceInfo, click_swap: bool) -> Option<DeviceKind> {
    if info.is_virtual() {
        return None;
    }
    match info.kind {
        Some(DeviceKind::Pointer) if !click_swap => None,
        kind => kind,
    }
}

impl Drop for Hooks {
    fn drop(&mut self) {
        self.uninstall();
    }
}
