//! Settings (KDL) and profile (JSON) parsers

use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, ProfileError};
use crate::model::*;

/// Parse the settings file at `path`. A missing file yields defaults.
pub fn parse_settings(path: &Path) -> Result<Settings, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_settings_str(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("No settings file at {}, using defaults", path.display());
            Ok(Settings::default())
        }
        Err(e) => Err(e.into()),
    }
}

/// Parse settings from a string
pub fn parse_settings_str(content: &str) -> Result<Settings, ConfigError> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        // kdl carries its own miette version, rebuild the span for ours
        let offset = e.span.offset();
        let len = e.span.len();
        let span = miette::SourceSpan::from((offset, len));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut settings = Settings::default();

    for node in doc.nodes() {
        match node.name().value() {
            "global" => parse_global(node, &mut settings)?,
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    Ok(settings)
}

fn parse_global(node: &kdl::KdlNode, settings: &mut Settings) -> Result<(), ConfigError> {
    let Some(children) = node.children() else {
        return Ok(());
    };

    for child in children.nodes() {
        let name = child.name().value();
        let Some(value) = child.entries().first().map(|entry| entry.value()) else {
            tracing::warn!("Global option '{}' has no value", name);
            continue;
        };

        match name {
            "log-level" => {
                let val = expect_string(name, value)?;
                settings.log_level = val
                    .parse()
                    .map_err(|message| ConfigError::Invalid { message })?;
            }
            "profiles-dir" => {
                let val = expect_string(name, value)?;
                settings.profiles_dir = shellexpand::tilde(val).into_owned().into();
            }
            "enabled" => settings.enabled = expect_bool(name, value)?,
            "mouse-swap" => settings.mouse_swap = expect_bool(name, value)?,
            "debounce-ms" => {
                settings.debounce = Duration::from_millis(expect_u64(name, value)?);
            }
            "reload-attempts" => {
                let attempts = expect_u64(name, value)?;
                if attempts == 0 {
                    return Err(ConfigError::Invalid {
                        message: "reload-attempts must be at least 1".to_string(),
                    });
                }
                settings.reload_attempts = u32::try_from(attempts).unwrap_or(u32::MAX);
            }
            "reload-backoff-ms" => {
                settings.reload_backoff = Duration::from_millis(expect_u64(name, value)?);
            }
            "mouse-watchdog-ms" => {
                let ms = expect_u64(name, value)?;
                if ms == 0 {
                    return Err(ConfigError::Invalid {
                        message: "mouse-watchdog-ms must be greater than 0".to_string(),
                    });
                }
                settings.mouse_watchdog = Duration::from_millis(ms);
            }
            "reinstall-after-secs" => {
                settings.reinstall_after = Duration::from_secs(expect_u64(name, value)?);
            }
            name => {
                tracing::warn!("Unknown global config option: {}", name);
            }
        }
    }

    Ok(())
}

fn expect_string<'a>(name: &str, value: &'a kdl::KdlValue) -> Result<&'a str, ConfigError> {
    value.as_string().ok_or_else(|| ConfigError::Invalid {
        message: format!("'{}' expects a string, got {}", name, value),
    })
}

fn expect_bool(name: &str, value: &kdl::KdlValue) -> Result<bool, ConfigError> {
    value.as_bool().ok_or_else(|| ConfigError::Invalid {
        message: format!("'{}' expects true or false, got {}", name, value),
    })
}

fn expect_u64(name: &str, value: &kdl::KdlValue) -> Result<u64, ConfigError> {
    value
        .as_i64()
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| ConfigError::Invalid {
            message: format!("'{}' expects a non-negative integer, got {}", name, value),
        })
}

/// Parse a JSON profile from a string. `path` is only used for error context.
pub fn parse_profile_str(content: &str, path: &Path) -> Result<ProfileFile, ProfileError> {
    serde_json::from_str(content).map_err(|source| ProfileError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Read and parse a JSON profile file
pub fn parse_profile_file(path: &Path) -> Result<ProfileFile, ProfileError> {
    let content = std::fs::read_to_string(path).map_err(|source| ProfileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_profile_str(&content, path)
}
