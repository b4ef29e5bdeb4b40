//! Internal view of niri windows
//!
//! Only the fields focus tracking and the special actions need, decoupled
//! from the `niri-ipc` crate's own types.

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowInfo {
    /// Stable for the lifetime of the window
    pub id: u64,
    /// Wayland app_id, empty if the client never set one
    pub app_id: String,
    pub pid: Option<i32>,
    pub is_focused: bool,
}

impl From<niri_ipc::Window> for WindowInfo {
    fn from(window: niri_ipc::Window) -> Self {
        Self {
            id: window.id,
            app_id: window.app_id.unwrap_or_default(),
            pid: window.pid,
            is_focused: window.is_focused,
        }
    }
}
