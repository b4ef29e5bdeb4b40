//! Shortcut grammar
//!
//! Triggers and actions are written as `[Alt+][Shift+][Ctrl+]<Key>`, tokens
//! separated by `+`, case-insensitive. Exactly one token must name a
//! non-modifier key.
//!
//! The primary modifier (left Alt) is implicit in every trigger: `"Alt+T"` and
//! `"T"` compile to the same [`TriggerKey`]. Actions keep their modifiers as
//! an ordered list of key codes, pressed in the order they were written.
//!
//! ```ignore
//! let trigger = parse_trigger("Alt+Shift+Z")?;
//! assert_eq!(trigger.flags, ModifierFlags::SHIFT);
//! assert_eq!(trigger.key, Key::KEY_Z);
//!
//! let action = parse_action("Ctrl+Shift+Z")?;
//! assert_eq!(action.modifiers, vec![Key::KEY_LEFTCTRL, Key::KEY_LEFTSHIFT]);
//! ```

use std::fmt;

use bitflags::bitflags;
use evdev::Key;

use crate::error::GrammarError;

/// The physical key every trigger implicitly starts with.
///
/// Only the left-hand Alt counts; right Alt (AltGr) is left alone.
pub const PRIMARY_MODIFIER: Key = Key::KEY_LEFTALT;

/// Prefix marking an action as a [`SpecialAction`] instead of a key chord.
pub const SPECIAL_PREFIX: &str = "special:";

bitflags! {
    /// Secondary modifiers of a trigger. The primary modifier is never encoded.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModifierFlags: u8 {
        const SHIFT = 0b01;
        const CTRL = 0b10;
    }
}

impl ModifierFlags {
    /// Flag for a physical Shift or Ctrl key, either side.
    pub fn from_key(key: Key) -> Option<Self> {
        match key {
            Key::KEY_LEFTSHIFT | Key::KEY_RIGHTSHIFT => Some(Self::SHIFT),
            Key::KEY_LEFTCTRL | Key::KEY_RIGHTCTRL => Some(Self::CTRL),
            _ => None,
        }
    }
}

/// The physical chord that activates a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerKey {
    pub flags: ModifierFlags,
    pub key: Key,
}

impl TriggerKey {
    pub fn new(flags: ModifierFlags, key: Key) -> Self {
        Self { flags, key }
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Alt+")?;
        if self.flags.contains(ModifierFlags::SHIFT) {
            write!(f, "Shift+")?;
        }
        if self.flags.contains(ModifierFlags::CTRL) {
            write!(f, "Ctrl+")?;
        }
        write_key(f, self.key)
    }
}

/// The synthetic chord injected in place of a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionChord {
    /// Modifier key codes in the order they are pressed
    pub modifiers: Vec<Key>,
    /// The terminal key
    pub key: Key,
}

impl fmt::Display for ActionChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for modifier in &self.modifiers {
            let name = Modifier::from_key(*modifier).map_or("?", Modifier::name);
            write!(f, "{}+", name)?;
        }
        write_key(f, self.key)
    }
}

/// Built-in behaviours an action can name instead of a key chord.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialAction {
    /// Focus the next window of the focused application
    CycleAppWindows,
    /// Close the focused window
    CloseWindow,
    /// Ask the focused application's process to quit
    QuitApp,
}

impl SpecialAction {
    pub const ALL: [SpecialAction; 3] = [
        SpecialAction::CycleAppWindows,
        SpecialAction::CloseWindow,
        SpecialAction::QuitApp,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SpecialAction::CycleAppWindows => "cycle-app-windows",
            SpecialAction::CloseWindow => "close-window",
            SpecialAction::QuitApp => "quit-app",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|action| action.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for SpecialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", SPECIAL_PREFIX, self.name())
    }
}

/// What a trigger compiles to. Exactly one form per mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompiledMapping {
    Remap(ActionChord),
    Special(SpecialAction),
}

impl fmt::Display for CompiledMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompiledMapping::Remap(chord) => chord.fmt(f),
            CompiledMapping::Special(action) => action.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Modifier {
    Alt,
    Shift,
    Ctrl,
}

impl Modifier {
    fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "ALT" => Some(Modifier::Alt),
            "SHIFT" => Some(Modifier::Shift),
            "CTRL" | "CONTROL" => Some(Modifier::Ctrl),
            _ => None,
        }
    }

    fn from_key(key: Key) -> Option<Self> {
        match key {
            Key::KEY_LEFTALT => Some(Modifier::Alt),
            Key::KEY_LEFTSHIFT => Some(Modifier::Shift),
            Key::KEY_LEFTCTRL => Some(Modifier::Ctrl),
            _ => None,
        }
    }

    fn key(self) -> Key {
        match self {
            Modifier::Alt => Key::KEY_LEFTALT,
            Modifier::Shift => Key::KEY_LEFTSHIFT,
            Modifier::Ctrl => Key::KEY_LEFTCTRL,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Modifier::Alt => "Alt",
            Modifier::Shift => "Shift",
            Modifier::Ctrl => "Ctrl",
        }
    }
}

// ============================================================================
// Key names
// ============================================================================

/// Canonical name for every non-modifier key the grammar accepts.
const NAMED_KEYS: &[(Key, &str)] = &[
    // Letters
    (Key::KEY_A, "A"),
    (Key::KEY_B, "B"),
    (Key::KEY_C, "C"),
    (Key::KEY_D, "D"),
    (Key::KEY_E, "E"),
    (Key::KEY_F, "F"),
    (Key::KEY_G, "G"),
    (Key::KEY_H, "H"),
    (Key::KEY_I, "I"),
    (Key::KEY_J, "J"),
    (Key::KEY_K, "K"),
    (Key::KEY_L, "L"),
    (Key::KEY_M, "M"),
    (Key::KEY_N, "N"),
    (Key::KEY_O, "O"),
    (Key::KEY_P, "P"),
    (Key::KEY_Q, "Q"),
    (Key::KEY_R, "R"),
    (Key::KEY_S, "S"),
    (Key::KEY_T, "T"),
    (Key::KEY_U, "U"),
    (Key::KEY_V, "V"),
    (Key::KEY_W, "W"),
    (Key::KEY_X, "X"),
    (Key::KEY_Y, "Y"),
    (Key::KEY_Z, "Z"),
    // Digits
    (Key::KEY_0, "0"),
    (Key::KEY_1, "1"),
    (Key::KEY_2, "2"),
    (Key::KEY_3, "3"),
    (Key::KEY_4, "4"),
    (Key::KEY_5, "5"),
    (Key::KEY_6, "6"),
    (Key::KEY_7, "7"),
    (Key::KEY_8, "8"),
    (Key::KEY_9, "9"),
    // Navigation
    (Key::KEY_LEFT, "Left"),
    (Key::KEY_RIGHT, "Right"),
    (Key::KEY_UP, "Up"),
    (Key::KEY_DOWN, "Down"),
    (Key::KEY_HOME, "Home"),
    (Key::KEY_END, "End"),
    (Key::KEY_PAGEUP, "PageUp"),
    (Key::KEY_PAGEDOWN, "PageDown"),
    // Editing
    (Key::KEY_BACKSPACE, "Backspace"),
    (Key::KEY_DELETE, "Delete"),
    (Key::KEY_INSERT, "Insert"),
    (Key::KEY_ENTER, "Enter"),
    (Key::KEY_TAB, "Tab"),
    (Key::KEY_ESC, "Escape"),
    (Key::KEY_SPACE, "Space"),
    (Key::KEY_CAPSLOCK, "CapsLock"),
    // Punctuation
    (Key::KEY_MINUS, "Minus"),
    (Key::KEY_EQUAL, "Equals"),
    (Key::KEY_LEFTBRACE, "LeftBracket"),
    (Key::KEY_RIGHTBRACE, "RightBracket"),
    (Key::KEY_SEMICOLON, "Semicolon"),
    (Key::KEY_APOSTROPHE, "Apostrophe"),
    (Key::KEY_GRAVE, "Grave"),
    (Key::KEY_BACKSLASH, "Backslash"),
    (Key::KEY_COMMA, "Comma"),
    (Key::KEY_DOT, "Period"),
    (Key::KEY_SLASH, "Slash"),
];

/// Alternative spellings accepted on input only.
const KEY_ALIASES: &[(&str, Key)] = &[
    ("LeftArrow", Key::KEY_LEFT),
    ("RightArrow", Key::KEY_RIGHT),
    ("UpArrow", Key::KEY_UP),
    ("DownArrow", Key::KEY_DOWN),
    ("PgUp", Key::KEY_PAGEUP),
    ("PgDn", Key::KEY_PAGEDOWN),
    ("PgDown", Key::KEY_PAGEDOWN),
    ("Back", Key::KEY_BACKSPACE),
    ("Del", Key::KEY_DELETE),
    ("Ins", Key::KEY_INSERT),
    ("Return", Key::KEY_ENTER),
    ("Esc", Key::KEY_ESC),
    ("Caps", Key::KEY_CAPSLOCK),
    ("-", Key::KEY_MINUS),
    ("Equal", Key::KEY_EQUAL),
    ("=", Key::KEY_EQUAL),
    ("LBracket", Key::KEY_LEFTBRACE),
    ("[", Key::KEY_LEFTBRACE),
    ("RBracket", Key::KEY_RIGHTBRACE),
    ("]", Key::KEY_RIGHTBRACE),
    (";", Key::KEY_SEMICOLON),
    ("Quote", Key::KEY_APOSTROPHE),
    ("'", Key::KEY_APOSTROPHE),
    ("Backtick", Key::KEY_GRAVE),
    ("`", Key::KEY_GRAVE),
    ("\\", Key::KEY_BACKSLASH),
    (",", Key::KEY_COMMA),
    ("Dot", Key::KEY_DOT),
    (".", Key::KEY_DOT),
    ("/", Key::KEY_SLASH),
];

const FUNCTION_KEYS: [(Key, &str); 24] = [
    (Key::KEY_F1, "F1"),
    (Key::KEY_F2, "F2"),
    (Key::KEY_F3, "F3"),
    (Key::KEY_F4, "F4"),
    (Key::KEY_F5, "F5"),
    (Key::KEY_F6, "F6"),
    (Key::KEY_F7, "F7"),
    (Key::KEY_F8, "F8"),
    (Key::KEY_F9, "F9"),
    (Key::KEY_F10, "F10"),
    (Key::KEY_F11, "F11"),
    (Key::KEY_F12, "F12"),
    (Key::KEY_F13, "F13"),
    (Key::KEY_F14, "F14"),
    (Key::KEY_F15, "F15"),
    (Key::KEY_F16, "F16"),
    (Key::KEY_F17, "F17"),
    (Key::KEY_F18, "F18"),
    (Key::KEY_F19, "F19"),
    (Key::KEY_F20, "F20"),
    (Key::KEY_F21, "F21"),
    (Key::KEY_F22, "F22"),
    (Key::KEY_F23, "F23"),
    (Key::KEY_F24, "F24"),
];

/// Canonical names of every key the grammar accepts, in table order.
pub fn key_names() -> impl Iterator<Item = &'static str> {
    NAMED_KEYS
        .iter()
        .chain(FUNCTION_KEYS.iter())
        .map(|(_, name)| *name)
}

/// Canonical grammar name for a key code, if the grammar can produce it.
pub fn key_name(key: Key) -> Option<&'static str> {
    NAMED_KEYS
        .iter()
        .chain(FUNCTION_KEYS.iter())
        .find(|(candidate, _)| *candidate == key)
        .map(|(_, name)| *name)
}

/// Resolve a single key name (case-insensitive).
pub fn parse_key(name: &str) -> Result<Key, GrammarError> {
    resolve_key(name.trim(), name)
}

fn resolve_key(token: &str, input: &str) -> Result<Key, GrammarError> {
    if let Some((key, _)) = NAMED_KEYS
        .iter()
        .find(|(_, name)| name.eq_ignore_ascii_case(token))
    {
        return Ok(*key);
    }

    if let Some((_, key)) = KEY_ALIASES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(token))
    {
        return Ok(*key);
    }

    if let Some(number) = function_key_number(token) {
        return number
            .checked_sub(1)
            .and_then(|index| FUNCTION_KEYS.get(index))
            .map(|(key, _)| *key)
            .ok_or_else(|| GrammarError::FunctionKeyOutOfRange {
                key: token.to_string(),
            });
    }

    Err(GrammarError::UnknownKey {
        input: input.trim().to_string(),
        key: token.to_string(),
    })
}

/// `F<digits>` -> the number, saturating for absurdly long suffixes
fn function_key_number(token: &str) -> Option<usize> {
    let digits = token
        .strip_prefix('F')
        .or_else(|| token.strip_prefix('f'))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(digits.parse().unwrap_or(usize::MAX))
}

/// Render a trigger back into the grammar, e.g. `Alt+Shift+PageUp`.
pub fn format_trigger(trigger: &TriggerKey) -> String {
    trigger.to_string()
}

/// Render an action chord back into the grammar, e.g. `Ctrl+Shift+T`.
pub fn format_action(action: &ActionChord) -> String {
    action.to_string()
}

fn write_key(f: &mut fmt::Formatter<'_>, key: Key) -> fmt::Result {
    match key_name(key) {
        Some(name) => write!(f, "{}", name),
        None => write!(f, "{:?}", key),
    }
}

// ============================================================================
// Chord parsing
// ============================================================================

struct Chord {
    modifiers: Vec<Modifier>,
    key: Key,
}

fn parse_chord(input: &str) -> Result<Chord, GrammarError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(GrammarError::Empty);
    }

    let mut modifiers = Vec::new();
    let mut key: Option<(Key, &str)> = None;

    for part in trimmed.split('+').map(str::trim) {
        if part.is_empty() {
            return Err(GrammarError::EmptyComponent {
                input: trimmed.to_string(),
            });
        }

        if let Some(modifier) = Modifier::from_token(part) {
            if modifiers.contains(&modifier) {
                return Err(GrammarError::DuplicateModifier {
                    input: trimmed.to_string(),
                    modifier: modifier.name().to_string(),
                });
            }
            modifiers.push(modifier);
            continue;
        }

        let resolved = resolve_key(part, trimmed)?;
        if let Some((_, first)) = key {
            return Err(GrammarError::MultipleKeys {
                input: trimmed.to_string(),
                first: first.to_string(),
                second: part.to_string(),
            });
        }
        key = Some((resolved, part));
    }

    match key {
        Some((key, _)) => Ok(Chord { modifiers, key }),
        None => Err(GrammarError::NoKey {
            input: trimmed.to_string(),
        }),
    }
}

/// Compile a trigger string. The primary modifier is implicit and dropped.
pub fn parse_trigger(input: &str) -> Result<TriggerKey, GrammarError> {
    let chord = parse_chord(input)?;
    let flags = chord
        .modifiers
        .iter()
        .fold(ModifierFlags::empty(), |flags, modifier| match modifier {
            Modifier::Alt => flags,
            Modifier::Shift => flags | ModifierFlags::SHIFT,
            Modifier::Ctrl => flags | ModifierFlags::CTRL,
        });
    Ok(TriggerKey::new(flags, chord.key))
}

/// Compile an action key chord, keeping modifier order.
pub fn parse_action(input: &str) -> Result<ActionChord, GrammarError> {
    let chord = parse_chord(input)?;
    Ok(ActionChord {
        modifiers: chord.modifiers.into_iter().map(Modifier::key).collect(),
        key: chord.key,
    })
}

/// Compile an action string, which is either a key chord or
/// `special:<name>`.
pub fn parse_mapping_action(input: &str) -> Result<CompiledMapping, GrammarError> {
    let trimmed = input.trim();
    let has_prefix = trimmed
        .get(..SPECIAL_PREFIX.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(SPECIAL_PREFIX));

    if has_prefix {
        let name = &trimmed[SPECIAL_PREFIX.len()..];
        return SpecialAction::from_name(name)
            .map(CompiledMapping::Special)
            .ok_or_else(|| GrammarError::UnknownSpecialAction {
                name: name.trim().to_string(),
            });
    }

    parse_action(trimmed).map(CompiledMapping::Remap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_trigger_basic() {
        let trigger = parse_trigger("Alt+T").unwrap();
        assert_eq!(trigger.flags, ModifierFlags::empty());
        assert_eq!(trigger.key, Key::KEY_T);
    }

    #[test]
    fn test_parse_trigger_primary_is_implicit() {
        assert_eq!(parse_trigger("Alt+T").unwrap(), parse_trigger("T").unwrap());
    }

    #[test]
    fn test_parse_trigger_secondary_flags() {
        let trigger = parse_trigger("Alt+Shift+Ctrl+Z").unwrap();
        assert_eq!(trigger.flags, ModifierFlags::SHIFT | ModifierFlags::CTRL);
        assert_eq!(trigger.key, Key::KEY_Z);

        // Order does not matter for triggers
        assert_eq!(trigger, parse_trigger("ctrl+alt+shift+z").unwrap());
    }

    #[test]
    fn test_parse_trigger_case_and_whitespace() {
        let trigger = parse_trigger("  alt + shift + pageup ").unwrap();
        assert_eq!(trigger.flags, ModifierFlags::SHIFT);
        assert_eq!(trigger.key, Key::KEY_PAGEUP);
    }

    #[test]
    fn test_parse_action_keeps_order() {
        let action = parse_action("Ctrl+Shift+Z").unwrap();
        assert_eq!(action.modifiers, vec![Key::KEY_LEFTCTRL, Key::KEY_LEFTSHIFT]);
        assert_eq!(action.key, Key::KEY_Z);

        let action = parse_action("Shift+Control+Z").unwrap();
        assert_eq!(action.modifiers, vec![Key::KEY_LEFTSHIFT, Key::KEY_LEFTCTRL]);
    }

    #[test]
    fn test_parse_action_alt_is_encoded() {
        let action = parse_action("Alt+F4").unwrap();
        assert_eq!(action.modifiers, vec![Key::KEY_LEFTALT]);
        assert_eq!(action.key, Key::KEY_F4);
    }

    #[test]
    fn test_parse_action_plain_key() {
        let action = parse_action("Home").unwrap();
        assert!(action.modifiers.is_empty());
        assert_eq!(action.key, Key::KEY_HOME);
    }

    #[test]
    fn test_parse_key_aliases() {
        assert_eq!(parse_key("Esc").unwrap(), Key::KEY_ESC);
        assert_eq!(parse_key("return").unwrap(), Key::KEY_ENTER);
        assert_eq!(parse_key("PgDn").unwrap(), Key::KEY_PAGEDOWN);
        assert_eq!(parse_key("`").unwrap(), Key::KEY_GRAVE);
        assert_eq!(parse_key("[").unwrap(), Key::KEY_LEFTBRACE);
        assert_eq!(parse_key("\\").unwrap(), Key::KEY_BACKSLASH);
    }

    #[test]
    fn test_parse_function_keys() {
        assert_eq!(parse_key("F1").unwrap(), Key::KEY_F1);
        assert_eq!(parse_key("f12").unwrap(), Key::KEY_F12);
        assert_eq!(parse_key("F13").unwrap(), Key::KEY_F13);
        assert_eq!(parse_key("F24").unwrap(), Key::KEY_F24);
        // The letter F is not a function key
        assert_eq!(parse_key("F").unwrap(), Key::KEY_F);
    }

    #[test]
    fn test_parse_function_key_out_of_range() {
        for name in ["F0", "F25", "F99", "F99999999999999999999999"] {
            assert!(
                matches!(parse_key(name), Err(GrammarError::FunctionKeyOutOfRange { .. })),
                "{} should be out of range",
                name
            );
        }
    }

    #[test]
    fn test_parse_fail_empty() {
        assert_eq!(parse_trigger(""), Err(GrammarError::Empty));
        assert_eq!(parse_action("   "), Err(GrammarError::Empty));
    }

    #[test]
    fn test_parse_fail_no_key() {
        assert!(matches!(parse_trigger("Alt+Shift"), Err(GrammarError::NoKey { .. })));
        assert!(matches!(parse_action("Ctrl"), Err(GrammarError::NoKey { .. })));
    }

    #[test]
    fn test_parse_fail_multiple_keys() {
        let err = parse_trigger("Alt+A+B").unwrap_err();
        assert_eq!(
            err,
            GrammarError::MultipleKeys {
                input: "Alt+A+B".to_string(),
                first: "A".to_string(),
                second: "B".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_fail_unknown_key() {
        assert!(matches!(
            parse_action("Ctrl+Banana"),
            Err(GrammarError::UnknownKey { ref key, .. }) if key == "Banana"
        ));
        // Modifiers outside the closed grammar are not keys either
        assert!(matches!(parse_action("Super+A"), Err(GrammarError::UnknownKey { .. })));
    }

    #[test]
    fn test_parse_fail_duplicate_modifier() {
        assert!(matches!(
            parse_trigger("Alt+Shift+shift+A"),
            Err(GrammarError::DuplicateModifier { .. })
        ));
    }

    #[test]
    fn test_parse_fail_empty_component() {
        assert!(matches!(parse_trigger("Alt++A"), Err(GrammarError::EmptyComponent { .. })));
        assert!(matches!(parse_trigger("Alt+"), Err(GrammarError::EmptyComponent { .. })));
        assert!(matches!(parse_trigger("+A"), Err(GrammarError::EmptyComponent { .. })));
    }

    #[test]
    fn test_parse_mapping_action_special() {
        assert_eq!(
            parse_mapping_action("special:cycle-app-windows").unwrap(),
            CompiledMapping::Special(SpecialAction::CycleAppWindows)
        );
        assert_eq!(
            parse_mapping_action("SPECIAL: Close-Window").unwrap(),
            CompiledMapping::Special(SpecialAction::CloseWindow)
        );
        assert!(matches!(
            parse_mapping_action("special:launch-rockets"),
            Err(GrammarError::UnknownSpecialAction { .. })
        ));
    }

    #[test]
    fn test_parse_mapping_action_chord() {
        assert_eq!(
            parse_mapping_action("Ctrl+C").unwrap(),
            CompiledMapping::Remap(ActionChord {
                modifiers: vec![Key::KEY_LEFTCTRL],
                key: Key::KEY_C,
            })
        );
    }

    #[test]
    fn test_display_formats_back_into_grammar() {
        let trigger = parse_trigger("shift+alt+ctrl+pgup").unwrap();
        assert_eq!(trigger.to_string(), "Alt+Shift+Ctrl+PageUp");

        let action = parse_action("ctrl+shift+esc").unwrap();
        assert_eq!(action.to_string(), "Ctrl+Shift+Escape");

        let special = parse_mapping_action("special:quit-app").unwrap();
        assert_eq!(special.to_string(), "special:quit-app");
    }

    #[test]
    fn test_modifier_flags_from_key() {
        assert_eq!(ModifierFlags::from_key(Key::KEY_RIGHTSHIFT), Some(ModifierFlags::SHIFT));
        assert_eq!(ModifierFlags::from_key(Key::KEY_LEFTCTRL), Some(ModifierFlags::CTRL));
        assert_eq!(ModifierFlags::from_key(Key::KEY_LEFTALT), None);
        assert_eq!(ModifierFlags::from_key(Key::KEY_A), None);
    }

    #[test]
    fn test_key_name_round_trip_exhaustive() {
        for name in key_names() {
            let key = parse_key(name).unwrap();
            assert_eq!(key_name(key), Some(name));
            assert_eq!(parse_key(key_name(key).unwrap()).unwrap(), key);
        }
    }

    #[test]
    fn test_aliases_have_canonical_names() {
        for (alias, key) in KEY_ALIASES {
            let canonical = key_name(*key).unwrap();
            assert_eq!(parse_key(canonical).unwrap(), *key, "alias {}", alias);
        }
    }

    #[test]
    fn test_key_name_unknown_code() {
        assert_eq!(key_name(Key::KEY_LEFTMETA), None);
        assert_eq!(key_name(Key::BTN_LEFT), None);
    }

    fn all_keys() -> Vec<Key> {
        NAMED_KEYS
            .iter()
            .chain(FUNCTION_KEYS.iter())
            .map(|(key, _)| *key)
            .collect()
    }

    proptest! {
        #[test]
        fn trigger_survives_format_and_reparse(
            index in 0usize..(NAMED_KEYS.len() + FUNCTION_KEYS.len()),
            shift in any::<bool>(),
            ctrl in any::<bool>(),
            lowercase in any::<bool>(),
        ) {
            let key = all_keys()[index];
            let mut flags = ModifierFlags::empty();
            flags.set(ModifierFlags::SHIFT, shift);
            flags.set(ModifierFlags::CTRL, ctrl);
            let trigger = TriggerKey::new(flags, key);

            let mut text = trigger.to_string();
            if lowercase {
                text = text.to_lowercase();
            }
            prop_assert_eq!(parse_trigger(&text).unwrap(), trigger);
        }
    }
}
