use crate::{
    HostKey, InputNotification, Modifier, MouseButton, NamedKey, Recorder, Result,
    TaskRecorderError,
};
use rdev::{Button, EventType, Key};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};
use std::time::Duration;
use tracing::{debug, error, info};

/// How long to wait for the host hook to report a startup failure
const STARTUP_GRACE: Duration = Duration::from_millis(200);

/// A running host input hook.
///
/// The underlying hook cannot be unregistered, so stopping only detaches the
/// handler. The hook thread lives until the process exits.
pub struct InputListener {
    stop_indicator: Arc<AtomicBool>,
}

impl InputListener {
    /// Stop forwarding notifications
    pub fn stop(&self) {
        self.stop_indicator.store(true, Ordering::SeqCst);
        info!("Input listener detached. The host hook stays registered until the process exits.");
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_indicator.load(Ordering::SeqCst)
    }
}

impl Drop for InputListener {
    fn drop(&mut self) {
        self.stop_indicator.store(true, Ordering::SeqCst);
    }
}

/// Forward every host input notification into `recorder`
pub fn install(recorder: Recorder) -> Result<InputListener> {
    listen(move |notification| {
        recorder.handle(notification);
    })
}

/// Hook host input on a dedicated thread and pass translated notifications to `handler`
pub fn listen<F>(mut handler: F) -> Result<InputListener>
where
    F: FnMut(InputNotification) + Send + 'static,
{
    let stop_indicator = Arc::new(AtomicBool::new(false));
    let callback_stop_indicator = Arc::clone(&stop_indicator);
    let (error_tx, error_rx) = mpsc::channel::<String>();

    std::thread::Builder::new()
        .name("taskrec-input".to_string())
        .spawn(move || {
            debug!("Input listener thread started");
            if let Err(error) = rdev::listen(move |event| {
                if callback_stop_indicator.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(notification) = translate(&event) {
                    handler(notification);
                }
            }) {
                error!("Failed to listen for input events: {:?}", error);
                let _ = error_tx.send(format!("{:?}", error));
            }
            info!("Input listener thread has finished");
        })?;

    match error_rx.recv_timeout(STARTUP_GRACE) {
        Ok(message) => Err(TaskRecorderError::Listener(message)),
        Err(_) => Ok(InputListener { stop_indicator }),
    }
}

/// Translate a host event into a notification, dropping the ones we do not track
pub fn translate(event: &rdev::Event) -> Option<InputNotification> {
    match &event.event_type {
        EventType::KeyPress(key) => Some(InputNotification::KeyDown {
            key: host_key(*key),
            text: typed_char(event.name.as_deref()),
        }),
        EventType::KeyRelease(key) => Some(InputNotification::KeyUp {
            key: host_key(*key),
            text: typed_char(event.name.as_deref()),
        }),
        EventType::ButtonPress(button) => Some(InputNotification::MouseButton {
            button: mouse_button(*button)?,
            pressed: true,
            position: None,
        }),
        EventType::ButtonRelease(button) => Some(InputNotification::MouseButton {
            button: mouse_button(*button)?,
            pressed: false,
            position: None,
        }),
        EventType::MouseMove { x, y } => Some(InputNotification::MouseMove {
            x: *x as i32,
            y: *y as i32,
        }),
        EventType::Wheel { delta_x, delta_y } => Some(InputNotification::Wheel {
            dx: *delta_x as i32,
            dy: *delta_y as i32,
        }),
    }
}

fn typed_char(name: Option<&str>) -> Option<char> {
    let mut chars = name?.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

fn mouse_button(button: Button) -> Option<MouseButton> {
    match button {
        Button::Left => Some(MouseButton::Left),
        Button::Right => Some(MouseButton::Right),
        Button::Middle => Some(MouseButton::Middle),
        Button::Unknown(_) => None,
    }
}

/// Map an rdev key to its host key. Left and right modifiers collapse.
pub fn host_key(key: Key) -> HostKey {
    match key {
        Key::ControlLeft | Key::ControlRight => HostKey::Modifier(Modifier::Ctrl),
        Key::Alt | Key::AltGr => HostKey::Modifier(Modifier::Alt),
        Key::ShiftLeft | Key::ShiftRight => HostKey::Modifier(Modifier::Shift),

        Key::Return | Key::KpReturn => HostKey::Named(NamedKey::Enter),
        Key::Tab => HostKey::Named(NamedKey::Tab),
        Key::Space => HostKey::Named(NamedKey::Space),
        Key::Backspace => HostKey::Named(NamedKey::Backspace),
        Key::Escape => HostKey::Named(NamedKey::Esc),
        Key::UpArrow => HostKey::Named(NamedKey::Up),
        Key::DownArrow => HostKey::Named(NamedKey::Down),
        Key::LeftArrow => HostKey::Named(NamedKey::Left),
        Key::RightArrow => HostKey::Named(NamedKey::Right),
        Key::Delete | Key::KpDelete => HostKey::Named(NamedKey::Delete),
        Key::Home => HostKey::Named(NamedKey::Home),
        Key::End => HostKey::Named(NamedKey::End),
        Key::PageUp => HostKey::Named(NamedKey::PageUp),
        Key::PageDown => HostKey::Named(NamedKey::PageDown),
        Key::Insert => HostKey::Named(NamedKey::Insert),
        Key::CapsLock => HostKey::Named(NamedKey::CapsLock),
        Key::NumLock => HostKey::Named(NamedKey::NumLock),
        Key::ScrollLock => HostKey::Named(NamedKey::ScrollLock),
        Key::PrintScreen => HostKey::Named(NamedKey::PrintScreen),
        Key::Pause => HostKey::Named(NamedKey::Pause),
        Key::F1 => HostKey::Named(NamedKey::F1),
        Key::F2 => HostKey::Named(NamedKey::F2),
        Key::F3 => HostKey::Named(NamedKey::F3),
        Key::F4 => HostKey::Named(NamedKey::F4),
        Key::F5 => HostKey::Named(NamedKey::F5),
        Key::F6 => HostKey::Named(NamedKey::F6),
        Key::F7 => HostKey::Named(NamedKey::F7),
        Key::F8 => HostKey::Named(NamedKey::F8),
        Key::F9 => HostKey::Named(NamedKey::F9),
        Key::F10 => HostKey::Named(NamedKey::F10),
        Key::F11 => HostKey::Named(NamedKey::F11),
        Key::F12 => HostKey::Named(NamedKey::F12),

        other => match key_char(other) {
            Some(c) => HostKey::Char(c),
            None => HostKey::Unknown(format!("{:?}", other)),
        },
    }
}

/// The unshifted character a key produces on a US layout
pub fn key_char(key: Key) -> Option<char> {
    let c = match key {
        Key::KeyA => 'a',
        Key::KeyB => 'b',
        Key::KeyC => 'c',
        Key::KeyD => 'd',
        Key::KeyE => 'e',
        Key::KeyF => 'f',
        Key::KeyG => 'g',
        Key::KeyH => 'h',
        Key::KeyI => 'i',
        Key::KeyJ => 'j',
        Key::KeyK => 'k',
        Key::KeyL => 'l',
        Key::KeyM => 'm',
        Key::KeyN => 'n',
        Key::KeyO => 'o',
        Key::KeyP => 'p',
        Key::KeyQ => 'q',
        Key::KeyR => 'r',
        Key::KeyS => 's',
        Key::KeyT => 't',
        Key::KeyU => 'u',
        Key::KeyV => 'v',
        Key::KeyW => 'w',
        Key::KeyX => 'x',
        Key::KeyY => 'y',
        Key::KeyZ => 'z',
        Key::Num0 | Key::Kp0 => '0',
        Key::Num1 | Key::Kp1 => '1',
        Key::Num2 | Key::Kp2 => '2',
        Key::Num3 | Key::Kp3 => '3',
        Key::Num4 | Key::Kp4 => '4',
        Key::Num5 | Key::Kp5 => '5',
        Key::Num6 | Key::Kp6 => '6',
        Key::Num7 | Key::Kp7 => '7',
        Key::Num8 | Key::Kp8 => '8',
        Key::Num9 | Key::Kp9 => '9',
        Key::BackQuote => '`',
        Key::Minus | Key::KpMinus => '-',
        Key::Equal => '=',
        Key::KpPlus => '+',
        Key::KpMultiply => '*',
        Key::KpDivide => '/',
        Key::LeftBracket => '[',
        Key::RightBracket => ']',
        Key::SemiColon => ';',
        Key::Quote => '\'',
        Key::BackSlash | Key::IntlBackslash => '\\',
        Key::Comma => ',',
        Key::Dot => '.',
        Key::Slash => '/',
        _ => return None,
    };
    Some(c)
}
