//! Key and chord representation.
//!
//! A recorded key is a [`KeyId`]: zero or more held modifiers plus one base key.
//! Its text form is `mod1+mod2+base` with modifiers in alphabetical order
//! (`alt`, `ctrl`, `shift`), or just `base` when nothing is held.

use crate::{Result, TaskRecorderError};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// A modifier key. The declaration order is the alphabetical chord order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    Alt,
    Ctrl,
    Shift,
}

impl Modifier {
    /// All modifiers in chord order
    pub const ALL: [Modifier; 3] = [Modifier::Alt, Modifier::Ctrl, Modifier::Shift];

    pub fn as_str(self) -> &'static str {
        match self {
            Modifier::Alt => "alt",
            Modifier::Ctrl => "ctrl",
            Modifier::Shift => "shift",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Modifier::Alt => 0b001,
            Modifier::Ctrl => 0b010,
            Modifier::Shift => 0b100,
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modifier {
    type Err = TaskRecorderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "alt" | "alt_l" | "alt_r" | "alt_gr" => Ok(Modifier::Alt),
            "ctrl" | "control" | "ctrl_l" | "ctrl_r" => Ok(Modifier::Ctrl),
            "shift" | "shift_l" | "shift_r" => Ok(Modifier::Shift),
            other => Err(TaskRecorderError::CaptureEncoding(format!(
                "'{}' is not a modifier",
                other
            ))),
        }
    }
}

/// Set of currently held modifiers, iterated in chord order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<Modifier>", into = "Vec<Modifier>")]
pub struct ModifierSet(u8);

impl ModifierSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, modifier: Modifier) {
        self.0 |= modifier.bit();
    }

    pub fn remove(&mut self, modifier: Modifier) {
        self.0 &= !modifier.bit();
    }

    pub fn contains(&self, modifier: Modifier) -> bool {
        self.0 & modifier.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Returns the union of both sets
    pub fn union(self, other: ModifierSet) -> ModifierSet {
        ModifierSet(self.0 | other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = Modifier> + '_ {
        Modifier::ALL.into_iter().filter(move |m| self.contains(*m))
    }
}

impl From<Modifier> for ModifierSet {
    fn from(modifier: Modifier) -> Self {
        ModifierSet(modifier.bit())
    }
}

impl FromIterator<Modifier> for ModifierSet {
    fn from_iter<I: IntoIterator<Item = Modifier>>(iter: I) -> Self {
        let mut set = ModifierSet::empty();
        for modifier in iter {
            set.insert(modifier);
        }
        set
    }
}

impl From<Vec<Modifier>> for ModifierSet {
    fn from(modifiers: Vec<Modifier>) -> Self {
        modifiers.into_iter().collect()
    }
}

impl From<ModifierSet> for Vec<Modifier> {
    fn from(set: ModifierSet) -> Self {
        set.iter().collect()
    }
}

/// Special, non-printable keys with a symbolic lower-case name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedKey {
    Enter,
    Tab,
    Space,
    Backspace,
    Esc,
    Up,
    Down,
    Left,
    Right,
    Delete,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    CapsLock,
    NumLock,
    ScrollLock,
    PrintScreen,
    Pause,
    Menu,
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
}

const NAMED_KEYS: &[(NamedKey, &str)] = &[
    (NamedKey::Enter, "enter"),
    (NamedKey::Tab, "tab"),
    (NamedKey::Space, "space"),
    (NamedKey::Backspace, "backspace"),
    (NamedKey::Esc, "esc"),
    (NamedKey::Up, "up"),
    (NamedKey::Down, "down"),
    (NamedKey::Left, "left"),
    (NamedKey::Right, "right"),
    (NamedKey::Delete, "delete"),
    (NamedKey::Home, "home"),
    (NamedKey::End, "end"),
    (NamedKey::PageUp, "page_up"),
    (NamedKey::PageDown, "page_down"),
    (NamedKey::Insert, "insert"),
    (NamedKey::CapsLock, "caps_lock"),
    (NamedKey::NumLock, "num_lock"),
    (NamedKey::ScrollLock, "scroll_lock"),
    (NamedKey::PrintScreen, "print_screen"),
    (NamedKey::Pause, "pause"),
    (NamedKey::Menu, "menu"),
    (NamedKey::F1, "f1"),
    (NamedKey::F2, "f2"),
    (NamedKey::F3, "f3"),
    (NamedKey::F4, "f4"),
    (NamedKey::F5, "f5"),
    (NamedKey::F6, "f6"),
    (NamedKey::F7, "f7"),
    (NamedKey::F8, "f8"),
    (NamedKey::F9, "f9"),
    (NamedKey::F10, "f10"),
    (NamedKey::F11, "f11"),
    (NamedKey::F12, "f12"),
];

impl NamedKey {
    pub fn as_str(self) -> &'static str {
        NAMED_KEYS
            .iter()
            .find(|(key, _)| *key == self)
            .map(|(_, name)| *name)
            .unwrap_or("unknown")
    }

    /// Look up a key by its symbolic name, ignoring case and a legacy `Key.` prefix
    pub fn from_name(name: &str) -> Option<NamedKey> {
        let name = name.strip_prefix("Key.").unwrap_or(name).to_ascii_lowercase();
        let name = match name.as_str() {
            "escape" => "esc",
            "return" => "enter",
            other => other,
        };
        NAMED_KEYS
            .iter()
            .find(|(_, candidate)| *candidate == name)
            .map(|(key, _)| *key)
    }
}

impl fmt::Display for NamedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The non-modifier part of a chord
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BaseKey {
    /// A single literal character
    Char(char),
    /// A special key with a symbolic name
    Named(NamedKey),
    /// Anything unrecognised, kept verbatim and passed through on playback
    Raw(String),
}

impl BaseKey {
    fn parse(s: &str) -> BaseKey {
        let mut chars = s.chars();
        match (chars.next(), chars.next(), chars.next(), chars.next()) {
            (Some(c), None, _, _) => return BaseKey::Char(c),
            // quoted literal such as 'a'
            (Some(q), Some(c), Some(q2), None) if q == q2 && (q == '\'' || q == '"') => {
                return BaseKey::Char(c)
            }
            _ => {}
        }
        match NamedKey::from_name(s) {
            Some(named) => BaseKey::Named(named),
            None => BaseKey::Raw(s.to_string()),
        }
    }
}

impl fmt::Display for BaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseKey::Char(c) => write!(f, "{}", c),
            BaseKey::Named(named) => f.write_str(named.as_str()),
            BaseKey::Raw(raw) => f.write_str(raw),
        }
    }
}

/// A key chord: held modifiers plus a base key.
///
/// Serialized as its text form, e.g. `"ctrl+shift+a"`, `"enter"` or `"x"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct KeyId {
    modifiers: ModifierSet,
    base: BaseKey,
}

impl KeyId {
    pub fn new(modifiers: ModifierSet, base: BaseKey) -> Self {
        Self { modifiers, base }
    }

    /// A key with no modifiers
    pub fn plain(base: BaseKey) -> Self {
        Self::new(ModifierSet::empty(), base)
    }

    pub fn modifiers(&self) -> ModifierSet {
        self.modifiers
    }

    pub fn base(&self) -> &BaseKey {
        &self.base
    }

    pub fn is_chord(&self) -> bool {
        !self.modifiers.is_empty()
    }

    /// Whether this is exactly `key` with nothing held
    pub fn is_bare(&self, key: NamedKey) -> bool {
        self.modifiers.is_empty() && self.base == BaseKey::Named(key)
    }

    /// Human-readable label, e.g. `Ctrl + Shift + A`
    pub fn label(&self) -> String {
        let base = match &self.base {
            BaseKey::Char(c) => c.to_uppercase().to_string(),
            BaseKey::Named(named) => named.as_str().to_uppercase(),
            BaseKey::Raw(raw) => raw.clone(),
        };
        if self.modifiers.is_empty() {
            return base;
        }
        let mut parts: Vec<String> = self.modifiers.iter().map(capitalize).collect();
        parts.push(base);
        parts.join(" + ")
    }

    fn raw(text: &str) -> Self {
        Self::plain(BaseKey::Raw(text.to_string()))
    }

    fn parse(text: &str) -> Self {
        if text.is_empty() {
            return Self::raw(text);
        }
        let split = if text == "+" {
            None
        } else if let Some(prefix) = text.strip_suffix("++") {
            Some((prefix, "+"))
        } else {
            text.rsplit_once('+')
        };

        let Some((modifiers, base)) = split else {
            return Self::plain(BaseKey::parse(text));
        };
        if modifiers.is_empty() || base.is_empty() || base.parse::<Modifier>().is_ok() {
            return Self::raw(text);
        }
        let parsed: Result<ModifierSet> = modifiers.split('+').map(str::parse::<Modifier>).collect();
        match parsed {
            Ok(set) => Self::new(set, BaseKey::parse(base)),
            Err(_) => Self::raw(text),
        }
    }
}

fn capitalize(modifier: Modifier) -> String {
    let name = modifier.as_str();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for modifier in self.modifiers.iter() {
            write!(f, "{}+", modifier)?;
        }
        write!(f, "{}", self.base)
    }
}

impl FromStr for KeyId {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(KeyId::parse(s))
    }
}

impl From<String> for KeyId {
    fn from(text: String) -> Self {
        KeyId::parse(&text)
    }
}

impl From<&str> for KeyId {
    fn from(text: &str) -> Self {
        KeyId::parse(text)
    }
}

impl From<KeyId> for String {
    fn from(key: KeyId) -> Self {
        key.to_string()
    }
}

/// A physical key as reported by the host input layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKey {
    /// Either side of Ctrl, Alt or Shift
    Modifier(Modifier),
    Named(NamedKey),
    /// A character key, reported with its unshifted character
    Char(char),
    /// A key the host layer could not name
    Unknown(String),
}

/// Modifiers held during an active capture session.
///
/// Only modifier press/release notifications mutate it; they never produce
/// an event of their own.
#[derive(Debug, Clone, Default)]
pub struct ModifierState {
    held: ModifierSet,
}

impl ModifierState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn held(&self) -> ModifierSet {
        self.held
    }

    pub fn reset(&mut self) {
        self.held = ModifierSet::empty();
    }

    /// Handle a key-down. Returns `None` for modifier keys.
    pub fn key_down(&mut self, key: &HostKey, text: Option<char>) -> Option<KeyId> {
        if let HostKey::Modifier(modifier) = key {
            self.held.insert(*modifier);
            return None;
        }
        Some(encode_chord(key, text, self.held))
    }

    /// Handle a key-up, composing with the modifiers still held.
    pub fn key_up(&mut self, key: &HostKey, text: Option<char>) -> Option<KeyId> {
        if let HostKey::Modifier(modifier) = key {
            self.held.remove(*modifier);
            return None;
        }
        Some(encode_chord(key, text, self.held))
    }
}

/// Compose the chord for a non-modifier key with `held` modifiers.
///
/// Unmappable input falls back to a raw encoding instead of failing.
pub fn encode_chord(key: &HostKey, text: Option<char>, held: ModifierSet) -> KeyId {
    match resolve_base(key, text) {
        Ok((base, implied)) => KeyId::new(held.union(implied), base),
        Err(e) => {
            debug!(error = %e, ?key, ?text, "Falling back to raw key encoding");
            KeyId::new(held, BaseKey::Raw(raw_name(key, text)))
        }
    }
}

/// Resolve the base key and any modifiers implied by the literal character.
pub fn resolve_base(key: &HostKey, text: Option<char>) -> Result<(BaseKey, ModifierSet)> {
    match key {
        HostKey::Named(named) => Ok((BaseKey::Named(*named), ModifierSet::empty())),
        HostKey::Modifier(modifier) => Err(TaskRecorderError::CaptureEncoding(format!(
            "modifier '{}' cannot be a chord base",
            modifier
        ))),
        HostKey::Char(c) => from_literal(text.unwrap_or(*c)),
        HostKey::Unknown(name) => match text {
            Some(literal) => from_literal(literal),
            None => Err(TaskRecorderError::CaptureEncoding(format!(
                "unrecognised key '{}'",
                name
            ))),
        },
    }
}

/// Map a literal character. Control characters 0x01-0x1A only arise while Ctrl
/// is down, so they decode to their letter with Ctrl implied.
fn from_literal(literal: char) -> Result<(BaseKey, ModifierSet)> {
    let code = literal as u32;
    match code {
        0x01..=0x1A => {
            let letter = char::from(b'a' + (code - 1) as u8);
            Ok((BaseKey::Char(letter), ModifierSet::from(Modifier::Ctrl)))
        }
        0x1B => Ok((BaseKey::Named(NamedKey::Esc), ModifierSet::empty())),
        _ if literal.is_control() => Err(TaskRecorderError::CaptureEncoding(format!(
            "unmapped control character {:#04x}",
            code
        ))),
        _ => Ok((BaseKey::Char(literal), ModifierSet::empty())),
    }
}

fn raw_name(key: &HostKey, text: Option<char>) -> String {
    match key {
        HostKey::Modifier(modifier) => modifier.as_str().to_string(),
        HostKey::Named(named) => named.as_str().to_string(),
        HostKey::Char(c) => c.to_string(),
        HostKey::Unknown(name) => match text {
            Some(literal) if !literal.is_control() => literal.to_string(),
            _ => name.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(modifiers: &[Modifier]) -> ModifierSet {
        modifiers.iter().copied().collect()
    }

    #[test]
    fn test_chord_text_round_trip() {
        let key: KeyId = "ctrl+shift+a".parse().unwrap();
        assert_eq!(key.modifiers(), set(&[Modifier::Ctrl, Modifier::Shift]));
        assert_eq!(key.base(), &BaseKey::Char('a'));
        assert_eq!(key.to_string(), "ctrl+shift+a");
    }

    #[test]
    fn test_modifiers_are_sorted_alphabetically() {
        let key = KeyId::new(
            set(&[Modifier::Shift, Modifier::Alt, Modifier::Ctrl]),
            BaseKey::Named(NamedKey::F4),
        );
        assert_eq!(key.to_string(), "alt+ctrl+shift+f4");

        let reordered = KeyId::from("shift+ctrl+x");
        assert_eq!(reordered.to_string(), "ctrl+shift+x");
    }

    #[test]
    fn test_plain_keys() {
        assert_eq!(KeyId::from("x").base(), &BaseKey::Char('x'));
        assert_eq!(KeyId::from("enter").base(), &BaseKey::Named(NamedKey::Enter));
        assert_eq!(KeyId::from("Key.esc").base(), &BaseKey::Named(NamedKey::Esc));
        assert_eq!(KeyId::from("escape").to_string(), "esc");
        assert!(!KeyId::from("page_down").is_chord());
    }

    #[test]
    fn test_plus_as_base_key() {
        assert_eq!(KeyId::from("+").base(), &BaseKey::Char('+'));
        let chord = KeyId::from("ctrl++");
        assert_eq!(chord.modifiers(), set(&[Modifier::Ctrl]));
        assert_eq!(chord.base(), &BaseKey::Char('+'));
        assert_eq!(chord.to_string(), "ctrl++");
    }

    #[test]
    fn test_malformed_text_falls_back_to_raw() {
        assert_eq!(
            KeyId::from("media_play_pause").base(),
            &BaseKey::Raw("media_play_pause".to_string())
        );
        assert_eq!(KeyId::from("hyper+a").base(), &BaseKey::Raw("hyper+a".to_string()));
        assert_eq!(KeyId::from("ctrl+shift").base(), &BaseKey::Raw("ctrl+shift".to_string()));
        assert_eq!(KeyId::from("ctrl").base(), &BaseKey::Raw("ctrl".to_string()));
        assert_eq!(KeyId::from("+a").base(), &BaseKey::Raw("+a".to_string()));
    }

    #[test]
    fn test_quoted_base_is_unwrapped() {
        let key = KeyId::from("ctrl+'c'");
        assert_eq!(key.base(), &BaseKey::Char('c'));
        assert_eq!(key.to_string(), "ctrl+c");
    }

    #[test]
    fn test_control_character_implies_ctrl() {
        let key = encode_chord(
            &HostKey::Char('a'),
            Some('\u{1}'),
            set(&[Modifier::Ctrl, Modifier::Shift]),
        );
        assert_eq!(key.to_string(), "ctrl+shift+a");

        // Ctrl not tracked as held, still composed
        let key = encode_chord(&HostKey::Char('z'), Some('\u{1a}'), ModifierSet::empty());
        assert_eq!(key.to_string(), "ctrl+z");
    }

    #[test]
    fn test_escape_control_character() {
        let key = encode_chord(&HostKey::Unknown("0x1b".into()), Some('\u{1b}'), ModifierSet::empty());
        assert!(key.is_bare(NamedKey::Esc));
    }

    #[test]
    fn test_named_key_wins_over_literal() {
        let key = encode_chord(&HostKey::Named(NamedKey::Enter), Some('\r'), ModifierSet::empty());
        assert_eq!(key.to_string(), "enter");
        let key = encode_chord(&HostKey::Named(NamedKey::Tab), Some('\t'), set(&[Modifier::Ctrl]));
        assert_eq!(key.to_string(), "ctrl+tab");
    }

    #[test]
    fn test_unknown_key_falls_back_to_raw() {
        let key = encode_chord(&HostKey::Unknown("Unknown(255)".into()), None, set(&[Modifier::Alt]));
        assert_eq!(key.to_string(), "alt+Unknown(255)");
        assert_eq!(key.base(), &BaseKey::Raw("Unknown(255)".to_string()));
    }

    #[test]
    fn test_modifier_state_tracks_press_and_release() {
        let mut state = ModifierState::new();
        assert_eq!(state.key_down(&HostKey::Modifier(Modifier::Ctrl), None), None);
        assert_eq!(state.key_down(&HostKey::Modifier(Modifier::Shift), None), None);

        let press = state.key_down(&HostKey::Char('s'), Some('S')).unwrap();
        assert_eq!(press.to_string(), "ctrl+shift+S");

        assert_eq!(state.key_up(&HostKey::Modifier(Modifier::Shift), None), None);
        let release = state.key_up(&HostKey::Char('s'), None).unwrap();
        assert_eq!(release.to_string(), "ctrl+s");

        state.reset();
        assert!(state.held().is_empty());
    }

    #[test]
    fn test_label_formatting() {
        assert_eq!(KeyId::from("ctrl+shift+a").label(), "Ctrl + Shift + A");
        assert_eq!(KeyId::from("f5").label(), "F5");
    }

    #[test]
    fn test_key_id_serializes_as_string() {
        let key = KeyId::from("alt+f4");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"alt+f4\"");
        let back: KeyId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
