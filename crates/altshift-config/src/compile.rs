//! Profile compilation
//!
//! Turns the authored `{trigger, action}` string pairs of a profile into a
//! [`MappingTable`]. Bad mappings are collected, never fatal.

use std::collections::HashMap;

use crate::error::MappingError;
use crate::grammar::{parse_mapping_action, parse_trigger, CompiledMapping, TriggerKey};
use crate::model::{MappingEntry, ProfileFile};

/// Per-profile lookup table
pub type MappingTable = HashMap<TriggerKey, CompiledMapping>;

/// Result of compiling one profile
#[derive(Debug, Default)]
pub struct CompiledProfile {
    pub table: MappingTable,
    pub errors: Vec<MappingError>,
}

/// Compile an ordered mapping list. A trigger that appears more than once
/// keeps the last valid action.
pub fn compile_mappings(mappings: &[MappingEntry]) -> CompiledProfile {
    let mut compiled = CompiledProfile::default();

    for (index, entry) in mappings.iter().enumerate() {
        let result = parse_trigger(&entry.trigger).and_then(|trigger| {
            parse_mapping_action(&entry.action).map(|action| (trigger, action))
        });

        match result {
            Ok((trigger, action)) => {
                if let Some(previous) = compiled.table.insert(trigger, action) {
                    tracing::debug!(
                        "Mapping {} overrides earlier action {} for {}",
                        index,
                        previous,
                        trigger
                    );
                }
            }
            Err(source) => compiled.errors.push(MappingError {
                index,
                trigger: entry.trigger.clone(),
                action: entry.action.clone(),
                source,
            }),
        }
    }

    compiled
}

pub fn compile_profile(profile: &ProfileFile) -> CompiledProfile {
    compile_mappings(&profile.mappings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GrammarError;
    use crate::grammar::{ActionChord, ModifierFlags, SpecialAction};
    use evdev::Key;

    fn profile(mappings: &[(&str, &str)]) -> ProfileFile {
        ProfileFile {
            name: "Test".to_string(),
            processes: vec!["test".to_string()],
            mappings: mappings
                .iter()
                .map(|(trigger, action)| MappingEntry::new(*trigger, *action))
                .collect(),
        }
    }

    #[test]
    fn test_compile_basic_profile() {
        let compiled = compile_profile(&profile(&[
            ("Alt+T", "Ctrl+T"),
            ("Alt+Shift+Z", "Ctrl+Shift+Z"),
            ("Alt+`", "special:cycle-app-windows"),
        ]));

        assert!(compiled.errors.is_empty());
        assert_eq!(compiled.table.len(), 3);
        assert_eq!(
            compiled.table[&TriggerKey::new(ModifierFlags::empty(), Key::KEY_T)],
            CompiledMapping::Remap(ActionChord {
                modifiers: vec![Key::KEY_LEFTCTRL],
                key: Key::KEY_T,
            })
        );
        assert_eq!(
            compiled.table[&TriggerKey::new(ModifierFlags::SHIFT, Key::KEY_Z)],
            CompiledMapping::Remap(ActionChord {
                modifiers: vec![Key::KEY_LEFTCTRL, Key::KEY_LEFTSHIFT],
                key: Key::KEY_Z,
            })
        );
        assert_eq!(
            compiled.table[&TriggerKey::new(ModifierFlags::empty(), Key::KEY_GRAVE)],
            CompiledMapping::Special(SpecialAction::CycleAppWindows)
        );
    }

    #[test]
    fn test_compile_last_write_wins() {
        let compiled = compile_profile(&profile(&[
            ("Alt+T", "Ctrl+T"),
            ("Alt+T", "Ctrl+N"),
        ]));

        assert_eq!(compiled.table.len(), 1);
        assert_eq!(
            compiled.table[&TriggerKey::new(ModifierFlags::empty(), Key::KEY_T)],
            CompiledMapping::Remap(ActionChord {
                modifiers: vec![Key::KEY_LEFTCTRL],
                key: Key::KEY_N,
            })
        );
    }

    #[test]
    fn test_compile_invalid_later_duplicate_keeps_earlier() {
        let compiled = compile_profile(&profile(&[
            ("Alt+T", "Ctrl+T"),
            ("Alt+T", "Ctrl+Nope"),
        ]));

        assert_eq!(compiled.errors.len(), 1);
        assert_eq!(
            compiled.table[&TriggerKey::new(ModifierFlags::empty(), Key::KEY_T)],
            CompiledMapping::Remap(ActionChord {
                modifiers: vec![Key::KEY_LEFTCTRL],
                key: Key::KEY_T,
            })
        );
    }

    #[test]
    fn test_compile_skips_bad_mappings() {
        let compiled = compile_profile(&profile(&[
            ("Alt+C", "Ctrl+C"),
            ("Alt+A+B", "Ctrl+A"),
            ("Alt+V", "special:nope"),
            ("Alt+X", "Ctrl+X"),
        ]));

        assert_eq!(compiled.table.len(), 2);
        assert_eq!(compiled.errors.len(), 2);
        assert_eq!(compiled.errors[0].index, 1);
        assert!(matches!(compiled.errors[0].source, GrammarError::MultipleKeys { .. }));
        assert_eq!(compiled.errors[1].index, 2);
        assert!(matches!(
            compiled.errors[1].source,
            GrammarError::UnknownSpecialAction { .. }
        ));
    }

    #[test]
    fn test_compile_empty_profile() {
        let compiled = compile_profile(&profile(&[]));
        assert!(compiled.table.is_empty());
        assert!(compiled.errors.is_empty());
    }
}
