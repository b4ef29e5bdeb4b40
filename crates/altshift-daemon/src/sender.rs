//! Synthetic input via uinput
//!
//! Every injected chord goes out as one [`InputBatch`]: one
//! `VirtualDevice::emit` made while the sink lock is held, with a
//! `SYN_REPORT` after each transition. evdev writes the events and then a
//! closing `SYN_REPORT` of its own in a second write; no other forwarded or
//! injected event can land between the two.
//!
//! The same virtual device re-emits passed-through physical events
//! (see [`Forwarder`]). Its reserved name is how the hook layer tells
//! synthetic input from physical input.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use evdev::{uinput::VirtualDeviceBuilder, AttributeSet, EventType, InputEvent, Key, RelativeAxisType};
use thiserror::Error;

use crate::event_value;

/// Name of the altshift virtual device. Devices carrying it are never grabbed.
pub const VIRTUAL_DEVICE_NAME: &str = "altshift virtual input";

#[derive(Error, Debug)]
pub enum SendError {
    #[error("uinput write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("virtual device lock poisoned")]
    Poisoned,
}

/// Direction of a single synthetic key transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Down,
    Up,
    Repeat,
}

impl Transition {
    pub fn value(self) -> i32 {
        match self {
            Transition::Down => event_value::PRESS,
            Transition::Up => event_value::RELEASE,
            Transition::Repeat => event_value::REPEAT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyTransition {
    pub key: Key,
    pub transition: Transition,
}

/// Ordered list of synthetic key transitions, dispatched atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputBatch {
    transitions: Vec<KeyTransition>,
}

impl InputBatch {
    pub fn builder() -> BatchBuilder {
        BatchBuilder::default()
    }

    pub fn transitions(&self) -> &[KeyTransition] {
        &self.transitions
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    /// Wire form: each transition followed by `SYN_REPORT`
    pub fn to_events(&self) -> Vec<InputEvent> {
        let mut events = Vec::with_capacity(self.transitions.len() * 2);
        for t in &self.transitions {
            events.push(InputEvent::new(EventType::KEY, t.key.code(), t.transition.value()));
            events.push(syn_report());
        }
        events
    }
}

/// Builds an [`InputBatch`] in press order.
#[derive(Debug, Default)]
pub struct BatchBuilder {
    transitions: Vec<KeyTransition>,
}

impl BatchBuilder {
    pub fn down(mut self, key: Key) -> Self {
        self.push(key, Transition::Down);
        self
    }

    pub fn up(mut self, key: Key) -> Self {
        self.push(key, Transition::Up);
        self
    }

    pub fn repeat(mut self, key: Key) -> Self {
        self.push(key, Transition::Repeat);
        self
    }

    pub fn push(&mut self, key: Key, transition: Transition) {
        self.transitions.push(KeyTransition { key, transition });
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn build(self) -> InputBatch {
        InputBatch {
            transitions: self.transitions,
        }
    }
}

fn syn_report() -> InputEvent {
    InputEvent::new(EventType::SYNCHRONIZATION, 0, 0)
}

/// Destination for synthetic and forwarded input
pub trait InputSink: Send {
    /// Write a whole batch in one operation
    fn send_batch(&mut self, batch: &InputBatch) -> Result<(), SendError>;

    /// Re-emit one frame of physical events, already terminated by `SYN_REPORT`
    fn forward_frame(&mut self, events: &[InputEvent]) -> Result<(), SendError>;

    /// Release every key this sink still reports as down
    fn release_all(&mut self) -> Result<(), SendError>;
}

/// Sink shared by the keyboard hook, the mouse hook and the mouse worker.
///
/// The lock is only ever held for the duration of one write.
pub type SharedSink = Arc<Mutex<dyn InputSink>>;

pub fn shared<S: InputSink + 'static>(sink: S) -> SharedSink {
    Arc::new(Mutex::new(sink))
}

/// Dispatch a batch through a shared sink
pub fn send(sink: &SharedSink, batch: &InputBatch) -> Result<(), SendError> {
    if batch.is_empty() {
        return Ok(());
    }
    let mut guard = sink.lock().map_err(|_| SendError::Poisoned)?;
    guard.send_batch(batch)
}

/// Forward a frame through a shared sink
pub fn forward(sink: &SharedSink, events: &[InputEvent]) -> Result<(), SendError> {
    if events.is_empty() {
        return Ok(());
    }
    let mut guard = sink.lock().map_err(|_| SendError::Poisoned)?;
    guard.forward_frame(events)
}

/// The uinput-backed sink
pub struct UinputSink {
    device: evdev::uinput::VirtualDevice,
    /// Key codes currently down on the virtual device
    down: BTreeSet<u16>,
}

impl UinputSink {
    /// Create the virtual keyboard + pointer device.
    ///
    /// Needs write access to `/dev/uinput`.
    pub fn create() -> Result<Self, SendError> {
        let mut keys = AttributeSet::<Key>::new();
        for code in 1..256u16 {
            keys.insert(Key::new(code));
        }
        // Mouse buttons, BTN_LEFT through BTN_TASK
        for code in Key::BTN_LEFT.code()..=Key::BTN_TASK.code() {
            keys.insert(Key::new(code));
        }

        let mut axes = AttributeSet::<RelativeAxisType>::new();
        for axis in [
            RelativeAxisType::REL_X,
            RelativeAxisType::REL_Y,
            RelativeAxisType::REL_WHEEL,
            RelativeAxisType::REL_HWHEEL,
            RelativeAxisType::REL_WHEEL_HI_RES,
            RelativeAxisType::REL_HWHEEL_HI_RES,
        ] {
            axes.insert(axis);
        }

        let device = VirtualDeviceBuilder::new()?
            .name(VIRTUAL_DEVICE_NAME)
            .with_keys(&keys)?
            .with_relative_axes(&axes)?
            .build()?;

        tracing::info!("Created virtual device '{}'", VIRTUAL_DEVICE_NAME);
        Ok(Self {
            device,
            down: BTreeSet::new(),
        })
    }

    fn track(&mut self, code: u16, value: i32) {
        if value == event_value::RELEASE {
            self.down.remove(&code);
        } else {
            self.down.insert(code);
        }
    }
}

impl InputSink for UinputSink {
    fn send_batch(&mut self, batch: &InputBatch) -> Result<(), SendError> {
        self.device.emit(&batch.to_events())?;
        for t in batch.transitions() {
            self.track(t.key.code(), t.transition.value());
        }
        Ok(())
    }

    fn forward_frame(&mut self, events: &[InputEvent]) -> Result<(), SendError> {
        self.device.emit(events)?;
        for event in events {
            if event.event_type() == EventType::KEY {
                self.track(event.code(), event.value());
            }
        }
        Ok(())
    }

    fn release_all(&mut self) -> Result<(), SendError> {
        if self.down.is_empty() {
            return Ok(());
        }
        let mut batch = InputBatch::builder();
        for code in std::mem::take(&mut self.down) {
            batch.push(Key::new(code), Transition::Up);
        }
        tracing::debug!("Releasing {} keys held on the virtual device", batch.transitions.len());
        self.device.emit(&batch.build().to_events())?;
        Ok(())
    }
}

/// Release everything held on a shared sink
pub fn release_all(sink: &SharedSink) -> Result<(), SendError> {
    let mut guard = sink.lock().map_err(|_| SendError::Poisoned)?;
    guard.release_all()
}

/// Buffers passed-through events until `SYN_REPORT` so frames stay intact.
///
/// Call [`Forwarder::flush`] before injecting a batch, otherwise the injected
/// events could overtake physical events that were already passed through.
#[derive(Debug, Default)]
pub struct Forwarder {
    pending: Vec<InputEvent>,
}

impl Forwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event for pass-through; writes the frame on `SYN_REPORT`.
    pub fn push(&mut self, sink: &SharedSink, event: InputEvent) -> Result<(), SendError> {
        match event.event_type() {
            EventType::SYNCHRONIZATION => {
                if self.pending.is_empty() {
                    return Ok(());
                }
                self.pending.push(event);
                self.flush_frame(sink)
            }
            // The virtual device only declares keys and relative axes
            EventType::KEY | EventType::RELATIVE => {
                self.pending.push(event);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Write out a partially collected frame, terminating it.
    pub fn flush(&mut self, sink: &SharedSink) -> Result<(), SendError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.pending.push(syn_report());
        self.flush_frame(sink)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn flush_frame(&mut self, sink: &SharedSink) -> Result<(), SendError> {
        let result = forward(sink, &self.pending);
        self.pending.clear();
        result
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// What reached the sink, in order
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Written {
        Batch(InputBatch),
        Frame(Vec<(EventType, u16, i32)>),
    }

    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub written: Vec<Written>,
        pub releases: usize,
    }

    impl RecordingSink {
        pub fn batches(&self) -> Vec<InputBatch> {
            self.written
                .iter()
                .filter_map(|w| match w {
                    Written::Batch(batch) => Some(batch.clone()),
                    Written::Frame(_) => None,
                })
                .collect()
        }

        pub fn frames(&self) -> Vec<Vec<(EventType, u16, i32)>> {
            self.written
                .iter()
                .filter_map(|w| match w {
                    Written::Frame(frame) => Some(frame.clone()),
                    Written::Batch(_) => None,
                })
                .collect()
        }
    }

    impl InputSink for RecordingSink {
        fn send_batch(&mut self, batch: &InputBatch) -> Result<(), SendError> {
            self.written.push(Written::Batch(batch.clone()));
            Ok(())
        }

        fn forward_frame(&mut self, events: &[InputEvent]) -> Result<(), SendError> {
            self.written.push(Written::Frame(
                events
                    .iter()
                    .map(|e| (e.event_type(), e.code(), e.value()))
                    .collect(),
            ));
            Ok(())
        }

        fn release_all(&mut self) -> Result<(), SendError> {
            self.releases += 1;
            Ok(())
        }
    }

    /// A recorder plus the same sink as a [`SharedSink`]
    pub fn recording_sink() -> (Arc<Mutex<RecordingSink>>, SharedSink) {
        let recorder = Arc::new(Mutex::new(RecordingSink::default()));
        let sink: SharedSink = recorder.clone();
        (recorder, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn key(code: Key, value: i32) -> InputEvent {
        InputEvent::new(EventType::KEY, code.code(), value)
    }

    #[test]
    fn test_batch_builder_order() {
        let batch = InputBatch::builder()
            .up(Key::KEY_LEFTALT)
            .down(Key::KEY_LEFTCTRL)
            .down(Key::KEY_C)
            .build();

        assert_eq!(batch.len(), 3);
        assert_eq!(
            batch.transitions(),
            &[
                KeyTransition { key: Key::KEY_LEFTALT, transition: Transition::Up },
                KeyTransition { key: Key::KEY_LEFTCTRL, transition: Transition::Down },
                KeyTransition { key: Key::KEY_C, transition: Transition::Down },
            ]
        );
    }

    #[test]
    fn test_batch_wire_form_has_syn_after_each() {
        let batch = InputBatch::builder()
            .down(Key::KEY_LEFTCTRL)
            .repeat(Key::KEY_C)
            .build();
        let events = batch.to_events();

        assert_eq!(events.len(), 4);
        assert_eq!(events[0].code(), Key::KEY_LEFTCTRL.code());
        assert_eq!(events[0].value(), event_value::PRESS);
        assert_eq!(events[1].event_type(), EventType::SYNCHRONIZATION);
        assert_eq!(events[2].code(), Key::KEY_C.code());
        assert_eq!(events[2].value(), event_value::REPEAT);
        assert_eq!(events[3].event_type(), EventType::SYNCHRONIZATION);
    }

    #[test]
    fn test_send_skips_empty_batch() {
        let (recorder, sink) = recording_sink();
        send(&sink, &InputBatch::default()).unwrap();
        assert!(recorder.lock().unwrap().written.is_empty());
    }

    #[test]
    fn test_forwarder_emits_whole_frames() {
        let (recorder, sink) = recording_sink();
        let mut forwarder = Forwarder::new();

        forwarder.push(&sink, key(Key::KEY_A, 1)).unwrap();
        assert!(recorder.lock().unwrap().written.is_empty());
        assert!(forwarder.has_pending());

        forwarder.push(&sink, syn_report()).unwrap();
        let frames = recorder.lock().unwrap().frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0],
            vec![
                (EventType::KEY, Key::KEY_A.code(), 1),
                (EventType::SYNCHRONIZATION, 0, 0),
            ]
        );
        assert!(!forwarder.has_pending());
    }

    #[test]
    fn test_forwarder_drops_misc_and_lone_syn() {
        let (recorder, sink) = recording_sink();
        let mut forwarder = Forwarder::new();

        forwarder.push(&sink, InputEvent::new(EventType::MISC, 4, 30)).unwrap();
        forwarder.push(&sink, syn_report()).unwrap();
        assert!(recorder.lock().unwrap().written.is_empty());
    }

    #[test]
    fn test_flush_before_batch_preserves_order() {
        let (recorder, sink) = recording_sink();
        let mut forwarder = Forwarder::new();

        forwarder.push(&sink, key(Key::KEY_LEFTALT, 1)).unwrap();
        forwarder.flush(&sink).unwrap();
        send(&sink, &InputBatch::builder().down(Key::KEY_LEFTCTRL).build()).unwrap();

        let written = recorder.lock().unwrap().written.clone();
        assert_eq!(written.len(), 2);
        assert!(matches!(written[0], Written::Frame(ref f) if f.len() == 2));
        assert!(matches!(written[1], Written::Batch(_)));
    }
}
