//! Configuration data model

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Name (and file stem) reserved for the fallback profile.
pub const DEFAULT_PROFILE_NAME: &str = "default";

/// Daemon settings, read from the KDL settings file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub log_level: LogLevel,
    /// Directory holding one JSON profile per application
    pub profiles_dir: PathBuf,
    /// Whether translation starts enabled
    pub enabled: bool,
    /// Whether Alt+click is translated to Ctrl+click
    pub mouse_swap: bool,
    /// Quiet window before a burst of file changes triggers one reload
    pub debounce: Duration,
    /// Attempts for a reload that keeps hitting half-written files
    pub reload_attempts: u32,
    /// First retry delay; doubled on every further attempt
    pub reload_backoff: Duration,
    /// How long a swapped mouse click may stay pressed before it is force-released
    pub mouse_watchdog: Duration,
    /// Reinstall the hooks when no input was seen for this long
    pub reinstall_after: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            profiles_dir: PathBuf::from("~/.config/altshift/profiles"),
            enabled: true,
            mouse_swap: true,
            debounce: Duration::from_millis(300),
            reload_attempts: 5,
            reload_backoff: Duration::from_millis(100),
            mouse_watchdog: Duration::from_millis(3000),
            reinstall_after: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// A profile as authored on disk (one JSON file per application).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFile {
    /// Display name; `"default"` marks the fallback profile
    pub name: String,
    /// Process names this profile applies to (case-insensitive)
    #[serde(default)]
    pub processes: Vec<String>,
    /// Ordered trigger/action pairs; later duplicates win
    #[serde(default)]
    pub mappings: Vec<MappingEntry>,
}

impl ProfileFile {
    /// Whether this profile is the fallback profile
    pub fn is_default(&self) -> bool {
        self.name.eq_ignore_ascii_case(DEFAULT_PROFILE_NAME)
    }

    /// Lowercased, deduplicated process names in declaration order
    pub fn process_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::with_capacity(self.processes.len());
        for process in &self.processes {
            let key = process.trim().to_lowercase();
            if !key.is_empty() && !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }
}

/// One authored shortcut mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    /// e.g. `"Alt+T"`
    pub trigger: String,
    /// e.g. `"Ctrl+T"` or `"special:close-window"`
    pub action: String,
}

impl MappingEntry {
    pub fn new(trigger: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            trigger: trigger.into(),
            action: action.into(),
        }
    }
}
