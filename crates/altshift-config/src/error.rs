use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Errors from the daemon settings file.
#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("Failed to parse KDL")]
    #[diagnostic(code(altshift::config::parse_error))]
    ParseError {
        #[source_code]
        src: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source]
        source: kdl::KdlError,
    },

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(altshift::config::invalid))]
    Invalid { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A trigger or action string that does not follow the shortcut grammar.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GrammarError {
    #[error("empty shortcut")]
    Empty,

    #[error("empty component in '{input}'")]
    EmptyComponent { input: String },

    #[error("no key in '{input}' (only modifiers)")]
    NoKey { input: String },

    #[error("more than one key in '{input}': '{first}' and '{second}'")]
    MultipleKeys {
        input: String,
        first: String,
        second: String,
    },

    #[error("duplicate modifier '{modifier}' in '{input}'")]
    DuplicateModifier { input: String, modifier: String },

    #[error("unknown key '{key}' in '{input}'")]
    UnknownKey { input: String, key: String },

    #[error("function key '{key}' out of range (F1-F24)")]
    FunctionKeyOutOfRange { key: String },

    #[error("unknown special action '{name}'")]
    UnknownSpecialAction { name: String },
}

/// A single mapping that failed to compile inside an otherwise loadable profile.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("mapping #{index} ('{trigger}' -> '{action}'): {source}")]
pub struct MappingError {
    pub index: usize,
    pub trigger: String,
    pub action: String,
    #[source]
    pub source: GrammarError,
}

/// A profile file that could not be loaded at all.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ProfileError {
    /// Whether retrying the read could succeed, e.g. because a writer
    /// was still holding or truncating the file.
    pub fn is_transient(&self) -> bool {
        match self {
            ProfileError::Io { source, .. } => source.kind() != std::io::ErrorKind::NotFound,
            ProfileError::Json { source, .. } => source.is_eof(),
        }
    }
}
