//! altshift daemon library
//!
//! Rewrites left-Alt shortcuts into Ctrl chords per focused application.
//! The binary `altshiftd` wires these modules together; they are exposed as
//! a library so the CLI and tests can reach them.

pub mod engine;
pub mod hook;
pub mod modifiers;
pub mod niri;
pub mod sender;
pub mod special;
pub mod store;

/// `value` of an `EV_KEY` event
pub mod event_value {
    pub const RELEASE: i32 = 0;
    pub const PRESS: i32 = 1;
    pub const REPEAT: i32 = 2;
}
