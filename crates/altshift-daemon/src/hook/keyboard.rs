//! Keyboard hook callback

use evdev::{InputEvent, InputEventKind};
use tokio::sync::broadcast;

use crate::engine::{Engine, KeyEvent, Verdict};
use crate::sender::{self, Forwarder, SharedSink};

use super::device::DeviceInfo;
use super::mouse::ClickSwap;
use super::runner::EventHandler;

/// Runs the engine for every key event and executes its outcome
pub struct KeyboardHandler {
    engine: Engine,
    sink: SharedSink,
    forwarder: Forwarder,
    raw_keys: broadcast::Sender<KeyEvent>,
    /// Left button of keyboards that are also pointers
    click_swap: Option<ClickSwap>,
}

impl KeyboardHandler {
    pub fn new(engine: Engine, sink: SharedSink, raw_keys: broadcast::Sender<KeyEvent>) -> Self {
        Self {
            engine,
            sink,
            forwarder: Forwarder::new(),
            raw_keys,
            click_swap: None,
        }
    }

    pub fn with_click_swap(mut self, swap: ClickSwap) -> Self {
        self.click_swap = Some(swap);
        self
    }

    pub fn into_engine(self) -> Engine {
        self.engine
    }

    fn on_key(&mut self, event: InputEvent, key: evdev::Key) {
        let key_event = KeyEvent::new(key, event.value());

        if !key_event.synthetic && self.raw_keys.receiver_count() > 0 {
            let _ = self.raw_keys.send(key_event);
        }

        let outcome = self.engine.handle(key_event);

        if let Some(batch) = outcome.inject {
            // Physical events already passed through go out first
            if let Err(e) = self.forwarder.flush(&self.sink) {
                tracing::warn!("Failed to forward input: {}", e);
            }
            if let Err(e) = sender::send(&self.sink, &batch) {
                tracing::warn!("Failed to inject {} key transitions: {}", batch.len(), e);
            }
        }

        if outcome.verdict == Verdict::PassThrough {
            self.forward(event);
        }
    }

    fn forward(&mut self, event: InputEvent) {
        if let Err(e) = self.forwarder.push(&self.sink, event) {
            tracing::warn!("Failed to forward input: {}", e);
        }
    }
}

impl EventHandler for KeyboardHandler {
    fn on_event(&mut self, event: InputEvent) {
        match event.kind() {
            InputEventKind::Key(evdev::Key::BTN_LEFT) => {
                let taken = self.click_swap.as_ref().is_some_and(|swap| {
                    swap.on_left_button(event.value(), &mut self.forwarder, &self.sink)
                });
                if !taken {
                    self.forward(event);
                }
            }
            InputEventKind::Key(key) => self.on_key(event, key),
            _ => self.forward(event),
        }
    }

    fn on_device_lost(&mut self, info: &DeviceInfo) {
        if let Err(e) = self.forwarder.flush(&self.sink) {
            tracing::warn!("Failed to forward input: {}", e);
        }
        // Keys that device held down will never see their release
        self.engine.reset();
        if let Err(e) = sender::release_all(&self.sink) {
            tracing::warn!("Failed to release keys after losing {}: {}", info.path.display(), e);
        }
    }

    fn on_stop(&mut self) {
        if let Err(e) = self.forwarder.flush(&self.sink) {
            tracing::warn!("Failed to forward input: {}", e);
        }
        if let Some(batch) = self.engine.release_all() {
            if let Err(e) = sender::send(&self.sink, &batch) {
                tracing::warn!("Failed to release held keys: {}", e);
            }
        }
    }
}
