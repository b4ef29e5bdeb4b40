//! Input device discovery and grabbing

use std::io;
use std::path::{Path, PathBuf};

use evdev::{Device, Key, RelativeAxisType};

use crate::sender::VIRTUAL_DEVICE_NAME;

const INPUT_DIR: &str = "/dev/input";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Keyboard,
    Pointer,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Keyboard => write!(f, "keyboard"),
            DeviceKind::Pointer => write!(f, "pointer"),
        }
    }
}

/// Information about an input device
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub name: String,
    pub vendor: u16,
    pub product: u16,
    pub kind: Option<DeviceKind>,
}

impl DeviceInfo {
    /// Get vendor:product string (e.g., "3434:0361")
    pub fn vendor_product(&self) -> String {
        format!("{:04x}:{:04x}", self.vendor, self.product)
    }

    /// The altshift virtual device, never grabbed
    pub fn is_virtual(&self) -> bool {
        is_virtual_name(&self.name)
    }

    fn read(path: &Path, device: &Device) -> Self {
        let id = device.input_id();
        Self {
            path: path.to_path_buf(),
            name: device.name().unwrap_or("Unknown").to_string(),
            vendor: id.vendor(),
            product: id.product(),
            kind: classify(device),
        }
    }
}

pub fn is_virtual_name(name: &str) -> bool {
    name == VIRTUAL_DEVICE_NAME
}

/// What a device can do, as far as classification cares
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub key_a: bool,
    pub btn_left: bool,
    pub rel_x: bool,
}

impl Capabilities {
    pub fn of(device: &Device) -> Self {
        let keys = device.supported_keys();
        Self {
            key_a: keys.is_some_and(|keys| keys.contains(Key::KEY_A)),
            btn_left: keys.is_some_and(|keys| keys.contains(Key::BTN_LEFT)),
            rel_x: device
                .supported_relative_axes()
                .is_some_and(|axes| axes.contains(RelativeAxisType::REL_X)),
        }
    }

    /// Keyboards win over pointers for combined devices; their left button
    /// is handled by the keyboard hook
    pub fn kind(self) -> Option<DeviceKind> {
        if self.key_a {
            Some(DeviceKind::Keyboard)
        } else if self.btn_left && self.rel_x {
            Some(DeviceKind::Pointer)
        } else {
            None
        }
    }
}

pub fn classify(device: &Device) -> Option<DeviceKind> {
    Capabilities::of(device).kind()
}

/// `/dev/input/eventN`, as opposed to the legacy `mouseN`/`jsN` nodes
pub fn is_event_node(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("event"))
}

fn event_nodes() -> io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(INPUT_DIR)? {
        let path = entry?.path();
        if is_event_node(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Open a device and read what it is
pub fn open_device(path: &Path) -> io::Result<(DeviceInfo, Device)> {
    let device = Device::open(path)?;
    Ok((DeviceInfo::read(path, &device), device))
}

/// Take exclusive access to an opened device
pub fn grab(info: &DeviceInfo, device: &mut Device) -> io::Result<()> {
    device.grab()?;
    tracing::info!(
        "Grabbed {} '{}' ({}) at {}",
        info.kind.map_or_else(|| "device".to_string(), |kind| kind.to_string()),
        info.name,
        info.vendor_product(),
        info.path.display()
    );
    Ok(())
}

/// Enumerate all input devices
pub fn enumerate_devices() -> io::Result<Vec<DeviceInfo>> {
    let mut devices = Vec::new();

    for path in event_nodes()? {
        match Device::open(&path) {
            Ok(device) => devices.push(DeviceInfo::read(&path, &device)),
            Err(e) => {
                tracing::debug!("Could not open {}: {}", path.display(), e);
            }
        }
    }

    Ok(devices)
}

/// Open and exclusively grab every physical device of `kind`.
///
/// Devices that cannot be opened or grabbed are skipped with a warning.
pub fn grab_devices(kind: DeviceKind) -> io::Result<Vec<(DeviceInfo, Device)>> {
    let mut grabbed = Vec::new();

    for path in event_nodes()? {
        let (info, mut device) = match open_device(&path) {
            Ok(opened) => opened,
            Err(e) => {
                tracing::debug!("Could not open {}: {}", path.display(), e);
                continue;
            }
        };

        if info.is_virtual() || info.kind != Some(kind) {
            continue;
        }

        if let Err(e) = grab(&info, &mut device) {
            tracing::warn!(
                "Failed to grab {} '{}' at {}: {}. Is another application using it?",
                kind,
                info.name,
                path.display(),
                e
            );
            continue;
        }

        grabbed.push((info, device));
    }

    Ok(grabbed)
}
