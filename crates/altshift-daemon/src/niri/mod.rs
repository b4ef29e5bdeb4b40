//! niri compositor integration
//!
//! Supplies the foreground process name to the engine (via the event
//! stream) and backs the window-level special actions.
//!
//! niri exposes a Unix socket at `$NIRI_SOCKET`. Clients send JSON-formatted
//! `Request` messages, one per line, and receive JSON `Reply` lines.

mod client;
mod error;
mod focus;
mod types;

pub use client::{get_socket_path, NiriClient, NiriEventStream};
pub use error::NiriError;
pub use focus::{
    process_name, run_focus_tracker, FocusTracker, FocusUpdate, ProcessNameProvider, WindowTable,
};
pub use types::WindowInfo;
