//! Task recorder crate
//!
//! This crate captures mouse and keyboard input into a timestamped event
//! sequence, encodes key chords into a compact symbolic form such as
//! `ctrl+shift+a`, and replays recorded sequences with adjustable speed,
//! looping and pausing. A scheduler can start playback automatically on
//! selected days inside a daily time window.
//!
//! Recorded tasks are saved as JSON files for later playback.

pub mod error;
pub mod events;
pub mod keys;
pub mod player;
pub mod recorder;
pub mod scheduler;
pub mod task;

pub use error::*;
pub use events::*;
pub use keys::*;
pub use player::*;
pub use recorder::*;
pub use scheduler::*;
pub use task::*;


#[cfg(test)]
mod type_tests {
    use super::*;

    #[test]
    fn test_mouse_button_equality() {
        assert_eq!(MouseButton::Left, MouseButton::Left);
        assert_ne!(MouseButton::Left, MouseButton::Right);
        assert_ne!(MouseButton::Right, MouseButton::Middle);
    }

    #[test]
    fn test_event_kinds_match_serialized_type() {
        let events = vec![
            Event::MouseMove {
                x: 1,
                y: 2,
                timestamp: 0.0,
            },
            Event::MouseButton {
                x: 1,
                y: 2,
                button: MouseButton::Right,
                pressed: false,
                timestamp: 0.1,
            },
            Event::MouseScroll {
                x: 1,
                y: 2,
                dx: 0,
                dy: -1,
                timestamp: 0.2,
            },
            Event::KeyPress {
                key: KeyId::from("alt+tab"),
                modifiers: ModifierSet::from(Modifier::Alt),
                timestamp: 0.3,
            },
            Event::KeyRelease {
                key: KeyId::from("alt+tab"),
                timestamp: 0.4,
            },
        ];

        for event in &events {
            let json = serde_json::to_value(event).unwrap();
            assert_eq!(json["type"], event.kind());
            assert_eq!(json["timestamp"], event.timestamp());
        }
    }

    #[test]
    fn test_event_accepts_short_field_names() {
        let json = r#"{"type": "key_release", "key_id": "enter", "t": 2.5}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            Event::KeyRelease {
                key: KeyId::plain(BaseKey::Named(NamedKey::Enter)),
                timestamp: 2.5,
            }
        );
    }

    #[test]
    fn test_event_display() {
        let click = Event::MouseButton {
            x: 100,
            y: 200,
            button: MouseButton::Left,
            pressed: true,
            timestamp: 0.0,
        };
        assert_eq!(click.to_string(), "Mouse Press left @ (100, 200)");

        let scroll = Event::MouseScroll {
            x: 0,
            y: 0,
            dx: 0,
            dy: 1,
            timestamp: 0.0,
        };
        assert_eq!(scroll.to_string(), "Scroll Up");

        let sideways = Event::MouseScroll {
            x: 0,
            y: 0,
            dx: -1,
            dy: 0,
            timestamp: 0.0,
        };
        assert_eq!(sideways.to_string(), "Scroll Left");

        let press = Event::KeyPress {
            key: KeyId::from("ctrl+shift+a"),
            modifiers: ModifierSet::empty(),
            timestamp: 0.0,
        };
        assert_eq!(press.to_string(), "Key Press Ctrl + Shift + A");
    }

    #[test]
    fn test_error_messages() {
        let error = TaskRecorderError::InvalidConfig("speed".to_string());
        assert_eq!(error.to_string(), "Invalid configuration: speed");
        assert_eq!(
            TaskRecorderError::AlreadyPlaying.to_string(),
            "A playback run is already active"
        );
    }
}
