//! Chord translation
//!
//! # State Machine
//!
//! ```text
//!              Alt down                      mapped key down
//!   ┌──────┐ ───────────► ┌────────────────┐ ───────────────► ┌─────────────┐
//!   │ IDLE │              │ PRIMARY_PENDING│                  │ CHORD_ACTIVE│
//!   └──────┘ ◄─────────── └────────────────┘ ◄─────────────── └─────────────┘
//!      ▲      Alt up          │      ▲        unmapped key         │
//!      │      (passed)        └──────┘        (Alt restored)       │
//!      │                   unmapped key                            │
//!      │                   (passed)                                │
//!      └───────────────────────────────────────────────────────────┘
//!                         Alt up (suppressed)
//! ```
//!
//! Left Alt is the primary modifier. Its down and up pass through untouched
//! until a mapped key fires; from then on the OS has been told Alt is up, so
//! the engine owns the primary until it is released physically or an
//! unmapped key needs it back.
//!
//! The injected chord is tied to the physical trigger key rather than to the
//! state: the trigger's repeats and release always reach the chord it
//! started, even if Alt was let go first. Alt pressed again during such a
//! chord is kept from the OS; a key pressed with Alt up ends the chord
//! before it passes.
//!
//! The engine never performs I/O. [`Engine::handle`] returns an [`Outcome`]
//! that the keyboard hook executes: first the injected batch, then the
//! original event if it passes through.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use altshift_config::{ActionChord, CompiledMapping, ModifierFlags, TriggerKey, PRIMARY_MODIFIER};
use evdev::Key;

use crate::event_value;
use crate::modifiers::{is_modifier, ModifierTracker};
use crate::niri::ProcessNameProvider;
use crate::sender::{BatchBuilder, InputBatch, Transition};
use crate::special::SpecialSender;
use crate::store::MappingStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Idle = 0,
    PrimaryPending = 1,
    ChordActive = 2,
}

/// Engine state published for the mouse worker
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl Default for StateCell {
    fn default() -> Self {
        Self(AtomicU8::new(EngineState::Idle as u8))
    }
}

impl StateCell {
    pub fn load(&self) -> EngineState {
        match self.0.load(Ordering::Acquire) {
            1 => EngineState::PrimaryPending,
            2 => EngineState::ChordActive,
            _ => EngineState::Idle,
        }
    }

    pub fn store(&self, state: EngineState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// State shared between the keyboard hook, the mouse hook and the public
/// hook surface
#[derive(Debug, Clone)]
pub struct EngineShared {
    pub modifiers: Arc<ModifierTracker>,
    pub state: Arc<StateCell>,
    pub enabled: Arc<AtomicBool>,
}

impl EngineShared {
    pub fn new(enabled: bool) -> Self {
        Self {
            modifiers: Arc::new(ModifierTracker::new()),
            state: Arc::new(StateCell::default()),
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

/// One physical key transition as seen by the hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    /// 0 = release, 1 = press, 2 = repeat
    pub value: i32,
    /// Produced by altshift itself
    pub synthetic: bool,
}

impl KeyEvent {
    pub fn new(key: Key, value: i32) -> Self {
        Self {
            key,
            value,
            synthetic: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    PassThrough,
    Suppress,
}

/// What the hook must do with one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub verdict: Verdict,
    /// Injected before the event is passed through
    pub inject: Option<InputBatch>,
}

impl Outcome {
    fn pass() -> Self {
        Self {
            verdict: Verdict::PassThrough,
            inject: None,
        }
    }

    fn suppress() -> Self {
        Self {
            verdict: Verdict::Suppress,
            inject: None,
        }
    }

    fn with(verdict: Verdict, batch: BatchBuilder) -> Self {
        Self {
            verdict,
            inject: (!batch.is_empty()).then(|| batch.build()),
        }
    }
}

/// A synthetic chord currently held down
#[derive(Debug, Clone)]
struct HeldChord {
    action: ActionChord,
    /// Modifiers injected down, in press order
    pressed: Vec<Key>,
    /// Physical secondaries injected up for the duration of the chord
    released: Vec<Key>,
}

#[derive(Debug, Clone)]
enum ActiveKind {
    Remap(HeldChord),
    Special,
}

/// The trigger currently held and what it started
#[derive(Debug, Clone)]
struct Active {
    trigger: TriggerKey,
    kind: ActiveKind,
}

pub struct Engine {
    store: Arc<MappingStore>,
    focus: Arc<dyn ProcessNameProvider>,
    shared: EngineShared,
    special: Option<SpecialSender>,
    active: Option<Active>,
    /// The OS was told the primary is up while it is physically down
    primary_released: bool,
    state: EngineState,
}

impl Engine {
    pub fn new(
        store: Arc<MappingStore>,
        focus: Arc<dyn ProcessNameProvider>,
        shared: EngineShared,
        special: Option<SpecialSender>,
    ) -> Self {
        Self {
            store,
            focus,
            shared,
            special,
            active: None,
            primary_released: false,
            state: EngineState::Idle,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn shared(&self) -> &EngineShared {
        &self.shared
    }

    /// Forget everything, e.g. after the hooks were reinstalled and the
    /// virtual device released all its keys.
    pub fn reset(&mut self) {
        self.active = None;
        self.primary_released = false;
        self.shared.modifiers.reset();
        self.set_state(EngineState::Idle);
    }

    /// Undo everything the engine holds: the injected chord and a released
    /// primary. Returns `None` when nothing is held.
    pub fn release_all(&mut self) -> Option<InputBatch> {
        let mut batch = InputBatch::builder();
        self.release_active(&mut batch);
        if self.primary_released {
            if self.shared.modifiers.primary_down() {
                batch.push(PRIMARY_MODIFIER, Transition::Down);
            }
            self.primary_released = false;
        }
        let state = if self.shared.modifiers.primary_down() {
            EngineState::PrimaryPending
        } else {
            EngineState::Idle
        };
        self.set_state(state);
        (!batch.is_empty()).then(|| batch.build())
    }

    /// Translate one physical key event
    pub fn handle(&mut self, event: KeyEvent) -> Outcome {
        if event.synthetic {
            return Outcome::pass();
        }

        self.shared.modifiers.record(event.key, event.value);

        if !self.shared.is_enabled() {
            // State keeps following the physical primary so a re-enable
            // while Alt is held starts in PrimaryPending
            let inject = self.release_all();
            return Outcome {
                verdict: Verdict::PassThrough,
                inject,
            };
        }

        if event.key == PRIMARY_MODIFIER {
            return self.handle_primary(event.value);
        }

        match event.value {
            event_value::PRESS => self.handle_press(event.key),
            event_value::REPEAT => self.handle_repeat(event.key),
            event_value::RELEASE => self.handle_release(event.key),
            _ => Outcome::pass(),
        }
    }

    fn handle_primary(&mut self, value: i32) -> Outcome {
        match value {
            event_value::PRESS if self.holds_chord() => {
                // The injected chord is still down; Alt stays hidden from the
                // OS until an unmapped key asks for it back
                self.primary_released = true;
                self.set_state(EngineState::ChordActive);
                Outcome::suppress()
            }
            event_value::PRESS => {
                self.primary_released = false;
                self.set_state(EngineState::PrimaryPending);
                Outcome::pass()
            }
            event_value::REPEAT if self.primary_released => Outcome::suppress(),
            event_value::RELEASE => {
                let outcome = if self.primary_released {
                    // The OS already saw it go up
                    Outcome::suppress()
                } else {
                    Outcome::pass()
                };
                self.primary_released = false;
                self.set_state(EngineState::Idle);
                outcome
            }
            _ => Outcome::pass(),
        }
    }

    fn handle_press(&mut self, key: Key) -> Outcome {
        if is_modifier(key) {
            return Outcome::pass();
        }
        if self.state == EngineState::Idle {
            // A chord outliving its Alt must not combine with this key
            let mut batch = InputBatch::builder();
            self.release_active(&mut batch);
            return Outcome::with(Verdict::PassThrough, batch);
        }

        let trigger = TriggerKey::new(self.shared.modifiers.secondary_flags(), key);
        let process = self.focus.foreground_process();
        let mapping = self.store.lookup(process.as_deref().map(String::as_str), &trigger);

        match mapping {
            Some(CompiledMapping::Remap(action)) => {
                tracing::debug!(
                    "{} -> {} ({})",
                    trigger,
                    action,
                    process.as_deref().map_or("default", String::as_str)
                );
                let mut batch = InputBatch::builder();
                self.release_active(&mut batch);
                self.release_primary(&mut batch);
                let held = self.press_chord(&mut batch, action);
                self.active = Some(Active {
                    trigger,
                    kind: ActiveKind::Remap(held),
                });
                self.set_state(EngineState::ChordActive);
                Outcome::with(Verdict::Suppress, batch)
            }
            Some(CompiledMapping::Special(action)) => {
                tracing::debug!("{} -> {}", trigger, action);
                let mut batch = InputBatch::builder();
                self.release_active(&mut batch);
                self.release_primary(&mut batch);
                match &self.special {
                    Some(special) => {
                        if let Err(action) = special.send(action) {
                            tracing::warn!("Special action worker is gone, dropping {}", action);
                        }
                    }
                    None => tracing::warn!("No special action worker, dropping {}", action),
                }
                self.active = Some(Active {
                    trigger,
                    kind: ActiveKind::Special,
                });
                self.set_state(EngineState::ChordActive);
                Outcome::with(Verdict::Suppress, batch)
            }
            None if self.state == EngineState::ChordActive => {
                // Give the application its Alt back for this key
                let mut batch = InputBatch::builder();
                self.release_active(&mut batch);
                if self.primary_released && self.shared.modifiers.primary_down() {
                    batch.push(PRIMARY_MODIFIER, Transition::Down);
                }
                self.primary_released = false;
                self.set_state(EngineState::PrimaryPending);
                Outcome::with(Verdict::PassThrough, batch)
            }
            None => Outcome::pass(),
        }
    }

    fn handle_repeat(&mut self, key: Key) -> Outcome {
        match &self.active {
            Some(active) if active.trigger.key == key => match &active.kind {
                ActiveKind::Remap(held) => {
                    Outcome::with(Verdict::Suppress, InputBatch::builder().repeat(held.action.key))
                }
                ActiveKind::Special => Outcome::suppress(),
            },
            _ => Outcome::pass(),
        }
    }

    fn handle_release(&mut self, key: Key) -> Outcome {
        let is_trigger = self
            .active
            .as_ref()
            .is_some_and(|active| active.trigger.key == key);
        if !is_trigger {
            return Outcome::pass();
        }

        let mut batch = InputBatch::builder();
        self.release_active(&mut batch);
        Outcome::with(Verdict::Suppress, batch)
    }

    fn holds_chord(&self) -> bool {
        matches!(
            self.active,
            Some(Active {
                kind: ActiveKind::Remap(_),
                ..
            })
        )
    }

    /// Tell the OS the primary is up, once per chord sequence
    fn release_primary(&mut self, batch: &mut BatchBuilder) {
        if !self.primary_released {
            batch.push(PRIMARY_MODIFIER, Transition::Up);
            self.primary_released = true;
        }
    }

    /// Secondaries the action does not use go up, missing action modifiers
    /// go down, then the key.
    fn press_chord(&self, batch: &mut BatchBuilder, action: ActionChord) -> HeldChord {
        let wanted = action
            .modifiers
            .iter()
            .filter_map(|key| ModifierFlags::from_key(*key))
            .fold(ModifierFlags::empty(), |flags, flag| flags | flag);

        let mut released = Vec::new();
        let mut held = ModifierFlags::empty();
        for key in self.shared.modifiers.held_secondaries() {
            match ModifierFlags::from_key(key) {
                Some(flag) if wanted.contains(flag) => held |= flag,
                _ => {
                    batch.push(key, Transition::Up);
                    released.push(key);
                }
            }
        }

        let mut pressed = Vec::new();
        for key in &action.modifiers {
            let already_held = ModifierFlags::from_key(*key).is_some_and(|flag| held.contains(flag));
            if !already_held {
                batch.push(*key, Transition::Down);
                pressed.push(*key);
            }
        }

        batch.push(action.key, Transition::Down);

        HeldChord {
            action,
            pressed,
            released,
        }
    }

    /// Release the held chord and restore secondaries still physically down
    fn release_active(&mut self, batch: &mut BatchBuilder) {
        let Some(active) = self.active.take() else {
            return;
        };
        let ActiveKind::Remap(held) = active.kind else {
            return;
        };

        batch.push(held.action.key, Transition::Up);
        for key in held.pressed.iter().rev() {
            batch.push(*key, Transition::Up);
        }
        for key in held.released {
            if self.shared.modifiers.is_down(key) {
                batch.push(key, Transition::Down);
            }
        }
    }

    fn set_state(&mut self, state: EngineState) {
        self.state = state;
        self.shared.state.store(state);
    }
}
