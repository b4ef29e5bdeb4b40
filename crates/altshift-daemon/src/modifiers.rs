//! Physical modifier state
//!
//! Written only from the keyboard hook path, read from the engine and the
//! mouse hook. Left and right variants are tracked separately; only the left
//! Alt counts as the primary modifier.

use std::sync::atomic::{AtomicU8, Ordering};

use altshift_config::{ModifierFlags, PRIMARY_MODIFIER};
use evdev::Key;

use crate::event_value;

/// Tracked keys in bit order
const TRACKED: [Key; 6] = [
    Key::KEY_LEFTALT,
    Key::KEY_RIGHTALT,
    Key::KEY_LEFTSHIFT,
    Key::KEY_RIGHTSHIFT,
    Key::KEY_LEFTCTRL,
    Key::KEY_RIGHTCTRL,
];

/// Secondary modifiers, in the order they are released and restored
pub const SECONDARY_KEYS: [Key; 4] = [
    Key::KEY_LEFTSHIFT,
    Key::KEY_RIGHTSHIFT,
    Key::KEY_LEFTCTRL,
    Key::KEY_RIGHTCTRL,
];

fn bit(key: Key) -> Option<u8> {
    TRACKED
        .iter()
        .position(|tracked| *tracked == key)
        .map(|index| 1 << index)
}

/// Lock-free bit set of held modifiers
#[derive(Debug, Default)]
pub struct ModifierTracker {
    held: AtomicU8,
}

impl ModifierTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a physical key transition. Returns `true` if the key is tracked.
    ///
    /// Repeats leave the state unchanged.
    pub fn record(&self, key: Key, value: i32) -> bool {
        let Some(mask) = bit(key) else {
            return false;
        };

        match value {
            event_value::PRESS => {
                self.held.fetch_or(mask, Ordering::AcqRel);
            }
            event_value::RELEASE => {
                self.held.fetch_and(!mask, Ordering::AcqRel);
            }
            _ => {}
        }
        true
    }

    pub fn is_down(&self, key: Key) -> bool {
        bit(key).is_some_and(|mask| self.held.load(Ordering::Acquire) & mask != 0)
    }

    /// Whether the primary modifier (left Alt) is physically held
    pub fn primary_down(&self) -> bool {
        self.is_down(PRIMARY_MODIFIER)
    }

    /// Secondary modifiers currently held, either side
    pub fn secondary_flags(&self) -> ModifierFlags {
        self.held_secondaries()
            .into_iter()
            .filter_map(ModifierFlags::from_key)
            .fold(ModifierFlags::empty(), |flags, flag| flags | flag)
    }

    /// Physical secondary modifier keys currently held
    pub fn held_secondaries(&self) -> Vec<Key> {
        let held = self.held.load(Ordering::Acquire);
        SECONDARY_KEYS
            .into_iter()
            .filter(|key| bit(*key).is_some_and(|mask| held & mask != 0))
            .collect()
    }

    pub fn reset(&self) {
        self.held.store(0, Ordering::Release);
    }
}

/// Whether a key is any modifier, tracked or not (Meta included)
pub fn is_modifier(key: Key) -> bool {
    matches!(
        key,
        Key::KEY_LEFTALT
            | Key::KEY_RIGHTALT
            | Key::KEY_LEFTSHIFT
            | Key::KEY_RIGHTSHIFT
            | Key::KEY_LEFTCTRL
            | Key::KEY_RIGHTCTRL
            | Key::KEY_LEFTMETA
            | Key::KEY_RIGHTMETA
    )
}
