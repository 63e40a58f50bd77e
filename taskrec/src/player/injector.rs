use crate::{BaseKey, Modifier, MouseButton, NamedKey, Result, TaskRecorderError};
use rdev::{Button, EventType, Key};
use std::sync::{Mutex, MutexGuard};
use tracing::trace;

/// Wheel units per recorded scroll step
pub const SCROLL_UNITS_PER_STEP: i64 = 100;

/// The output layer that synthesizes input on the host.
///
/// Implementations must be shareable across tasks; calls come from whichever
/// task currently owns the playback run.
pub trait InputInjector: Send + Sync {
    /// Move the pointer to absolute screen coordinates
    fn move_to(&self, x: i32, y: i32) -> Result<()>;

    /// Press or release a mouse button at the current pointer position
    fn button(&self, button: MouseButton, pressed: bool) -> Result<()>;

    /// Scroll vertically by `units` (positive is up)
    fn scroll(&self, units: i64) -> Result<()>;

    fn modifier(&self, modifier: Modifier, pressed: bool) -> Result<()>;

    /// Press or release a non-modifier key
    fn key(&self, key: &BaseKey, pressed: bool) -> Result<()>;
}

/// Injects input through rdev's `simulate`
#[derive(Debug, Default, Clone, Copy)]
pub struct RdevInjector;

impl RdevInjector {
    pub fn new() -> Self {
        Self
    }

    fn send(&self, event_type: &EventType) -> Result<()> {
        trace!(?event_type, "Simulating input");
        rdev::simulate(event_type).map_err(|_| {
            TaskRecorderError::Injection(format!("host rejected {:?}", event_type))
        })
    }
}

impl InputInjector for RdevInjector {
    fn move_to(&self, x: i32, y: i32) -> Result<()> {
        self.send(&EventType::MouseMove {
            x: x as f64,
            y: y as f64,
        })
    }

    fn button(&self, button: MouseButton, pressed: bool) -> Result<()> {
        let button = match button {
            MouseButton::Left => Button::Left,
            MouseButton::Right => Button::Right,
            MouseButton::Middle => Button::Middle,
        };
        if pressed {
            self.send(&EventType::ButtonPress(button))
        } else {
            self.send(&EventType::ButtonRelease(button))
        }
    }

    fn scroll(&self, units: i64) -> Result<()> {
        let mut steps = units / SCROLL_UNITS_PER_STEP;
        if steps == 0 {
            steps = units.signum();
        }
        self.send(&EventType::Wheel {
            delta_x: 0,
            delta_y: steps,
        })
    }

    fn modifier(&self, modifier: Modifier, pressed: bool) -> Result<()> {
        let key = match modifier {
            Modifier::Alt => Key::Alt,
            Modifier::Ctrl => Key::ControlLeft,
            Modifier::Shift => Key::ShiftLeft,
        };
        self.send(&key_event(key, pressed))
    }

    fn key(&self, key: &BaseKey, pressed: bool) -> Result<()> {
        let (host, shifted) = rdev_key(key)?;
        // Shift wraps the key so characters like 'A' or '!' come out as recorded
        if shifted && pressed {
            self.send(&key_event(Key::ShiftLeft, true))?;
        }
        self.send(&key_event(host, pressed))?;
        if shifted && !pressed {
            self.send(&key_event(Key::ShiftLeft, false))?;
        }
        Ok(())
    }
}

fn key_event(key: Key, pressed: bool) -> EventType {
    if pressed {
        EventType::KeyPress(key)
    } else {
        EventType::KeyRelease(key)
    }
}

/// Resolve a base key to an rdev key and whether Shift is needed to type it
fn rdev_key(key: &BaseKey) -> Result<(Key, bool)> {
    match key {
        BaseKey::Named(named) => Ok((named_key(*named), false)),
        BaseKey::Char(c) => char_key(*c).ok_or_else(|| {
            TaskRecorderError::Injection(format!("no key produces '{}'", c))
        }),
        BaseKey::Raw(raw) => {
            let mut chars = raw.chars();
            if let (Some(c), None) = (chars.next(), chars.next()) {
                if let Some(resolved) = char_key(c) {
                    return Ok(resolved);
                }
            }
            raw.strip_prefix("Unknown(")
                .and_then(|rest| rest.strip_suffix(')'))
                .and_then(|code| code.parse::<u32>().ok())
                .map(|code| (Key::Unknown(code), false))
                .ok_or_else(|| TaskRecorderError::Injection(format!("unknown key '{}'", raw)))
        }
    }
}

fn named_key(key: NamedKey) -> Key {
    match key {
        NamedKey::Enter => Key::Return,
        NamedKey::Tab => Key::Tab,
        NamedKey::Space => Key::Space,
        NamedKey::Backspace => Key::Backspace,
        NamedKey::Esc => Key::Escape,
        NamedKey::Up => Key::UpArrow,
        NamedKey::Down => Key::DownArrow,
        NamedKey::Left => Key::LeftArrow,
        NamedKey::Right => Key::RightArrow,
        NamedKey::Delete => Key::Delete,
        NamedKey::Home => Key::Home,
        NamedKey::End => Key::End,
        NamedKey::PageUp => Key::PageUp,
        NamedKey::PageDown => Key::PageDown,
        NamedKey::Insert => Key::Insert,
        NamedKey::CapsLock => Key::CapsLock,
        NamedKey::NumLock => Key::NumLock,
        NamedKey::ScrollLock => Key::ScrollLock,
        NamedKey::PrintScreen => Key::PrintScreen,
        NamedKey::Pause => Key::Pause,
        // rdev has no menu key; 0x5D is its virtual key code on Windows
        NamedKey::Menu => Key::Unknown(0x5D),
        NamedKey::F1 => Key::F1,
        NamedKey::F2 => Key::F2,
        NamedKey::F3 => Key::F3,
        NamedKey::F4 => Key::F4,
        NamedKey::F5 => Key::F5,
        NamedKey::F6 => Key::F6,
        NamedKey::F7 => Key::F7,
        NamedKey::F8 => Key::F8,
        NamedKey::F9 => Key::F9,
        NamedKey::F10 => Key::F10,
        NamedKey::F11 => Key::F11,
        NamedKey::F12 => Key::F12,
    }
}

/// US layout: the key typing `c`, and whether Shift is required
fn char_key(c: char) -> Option<(Key, bool)> {
    if c.is_ascii_uppercase() {
        return char_key(c.to_ascii_lowercase()).map(|(key, _)| (key, true));
    }
    let unshifted = match c {
        'a' => Key::KeyA,
        'b' => Key::KeyB,
        'c' => Key::KeyC,
        'd' => Key::KeyD,
        'e' => Key::KeyE,
        'f' => Key::KeyF,
        'g' => Key::KeyG,
        'h' => Key::KeyH,
        'i' => Key::KeyI,
        'j' => Key::KeyJ,
        'k' => Key::KeyK,
        'l' => Key::KeyL,
        'm' => Key::KeyM,
        'n' => Key::KeyN,
        'o' => Key::KeyO,
        'p' => Key::KeyP,
        'q' => Key::KeyQ,
        'r' => Key::KeyR,
        's' => Key::KeyS,
        't' => Key::KeyT,
        'u' => Key::KeyU,
        'v' => Key::KeyV,
        'w' => Key::KeyW,
        'x' => Key::KeyX,
        'y' => Key::KeyY,
        'z' => Key::KeyZ,
        '0' => Key::Num0,
        '1' => Key::Num1,
        '2' => Key::Num2,
        '3' => Key::Num3,
        '4' => Key::Num4,
        '5' => Key::Num5,
        '6' => Key::Num6,
        '7' => Key::Num7,
        '8' => Key::Num8,
        '9' => Key::Num9,
        ' ' => Key::Space,
        '`' => Key::BackQuote,
        '-' => Key::Minus,
        '=' => Key::Equal,
        '[' => Key::LeftBracket,
        ']' => Key::RightBracket,
        ';' => Key::SemiColon,
        '\'' => Key::Quote,
        '\\' => Key::BackSlash,
        ',' => Key::Comma,
        '.' => Key::Dot,
        '/' => Key::Slash,
        _ => {
            let shifted = match c {
                '~' => Key::BackQuote,
                '!' => Key::Num1,
                '@' => Key::Num2,
                '#' => Key::Num3,
                '$' => Key::Num4,
                '%' => Key::Num5,
                '^' => Key::Num6,
                '&' => Key::Num7,
                '*' => Key::Num8,
                '(' => Key::Num9,
                ')' => Key::Num0,
                '_' => Key::Minus,
                '+' => Key::Equal,
                '{' => Key::LeftBracket,
                '}' => Key::RightBracket,
                ':' => Key::SemiColon,
                '"' => Key::Quote,
                '|' => Key::BackSlash,
                '<' => Key::Comma,
                '>' => Key::Dot,
                '?' => Key::Slash,
                _ => return None,
            };
            return Some((shifted, true));
        }
    };
    Some((unshifted, false))
}

/// An action observed by [`MemoryInjector`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedAction {
    MoveTo(i32, i32),
    Button(MouseButton, bool),
    Scroll(i64),
    Modifier(Modifier, bool),
    Key(BaseKey, bool),
}

/// Records actions instead of synthesizing them, for dry runs and tests.
///
/// Like the host injector it rejects raw keys it cannot resolve.
#[derive(Debug, Default)]
pub struct MemoryInjector {
    actions: Mutex<Vec<InjectedAction>>,
}

impl MemoryInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<InjectedAction> {
        self.lock().clone()
    }

    pub fn take_actions(&self) -> Vec<InjectedAction> {
        std::mem::take(&mut *self.lock())
    }

    fn record(&self, action: InjectedAction) -> Result<()> {
        self.lock().push(action);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<InjectedAction>> {
        self.actions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl InputInjector for MemoryInjector {
    fn move_to(&self, x: i32, y: i32) -> Result<()> {
        self.record(InjectedAction::MoveTo(x, y))
    }

    fn button(&self, button: MouseButton, pressed: bool) -> Result<()> {
        self.record(InjectedAction::Button(button, pressed))
    }

    fn scroll(&self, units: i64) -> Result<()> {
        self.record(InjectedAction::Scroll(units))
    }

    fn modifier(&self, modifier: Modifier, pressed: bool) -> Result<()> {
        self.record(InjectedAction::Modifier(modifier, pressed))
    }

    fn key(&self, key: &BaseKey, pressed: bool) -> Result<()> {
        rdev_key(key)?;
        self.record(InjectedAction::Key(key.clone(), pressed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uppercase_needs_shift() {
        assert_eq!(char_key('A'), Some((Key::KeyA, true)));
        assert_eq!(char_key('a'), Some((Key::KeyA, false)));
        assert_eq!(char_key('?'), Some((Key::Slash, true)));
    }

    #[test]
    fn test_raw_keys_pass_through() {
        assert_eq!(
            rdev_key(&BaseKey::Raw("Unknown(93)".to_string())).unwrap(),
            (Key::Unknown(93), false)
        );
        assert_eq!(
            rdev_key(&BaseKey::Raw("x".to_string())).unwrap(),
            (Key::KeyX, false)
        );
        assert!(matches!(
            rdev_key(&BaseKey::Raw("<65437>".to_string())),
            Err(TaskRecorderError::Injection(_))
        ));
    }

    #[test]
    fn test_named_keys_resolve() {
        assert_eq!(rdev_key(&BaseKey::Named(NamedKey::Esc)).unwrap().0, Key::Escape);
        assert_eq!(rdev_key(&BaseKey::Named(NamedKey::F10)).unwrap().0, Key::F10);
    }

    #[test]
    fn test_memory_injector_records_in_order() {
        let injector = MemoryInjector::new();
        injector.move_to(1, 2).unwrap();
        injector.scroll(-100).unwrap();
        injector.key(&BaseKey::Char('q'), true).unwrap();

        assert_eq!(
            injector.take_actions(),
            vec![
                InjectedAction::MoveTo(1, 2),
                InjectedAction::Scroll(-100),
                InjectedAction::Key(BaseKey::Char('q'), true),
            ]
        );
        assert!(injector.actions().is_empty());
    }
}
