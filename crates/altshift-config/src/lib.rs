//! Configuration for altshift
//!
//! This crate owns the shortcut grammar, the JSON profile format and its
//! compilation into lookup tables, and the KDL daemon settings file.

mod compile;
mod error;
pub mod grammar;
mod model;
mod parser;

pub use compile::{compile_mappings, compile_profile, CompiledProfile, MappingTable};
pub use error::{ConfigError, GrammarError, MappingError, ProfileError};
pub use grammar::{
    format_action, format_trigger, key_name, key_names, parse_action, parse_key,
    parse_mapping_action, parse_trigger, ActionChord, CompiledMapping, ModifierFlags,
    SpecialAction, TriggerKey, PRIMARY_MODIFIER, SPECIAL_PREFIX,
};
pub use model::*;
pub use parser::{parse_profile_file, parse_profile_str, parse_settings, parse_settings_str};
