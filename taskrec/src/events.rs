use crate::{KeyId, ModifierSet, Result, TaskRecorderError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a mouse button
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[serde(alias = "Button.left")]
    Left,
    #[serde(alias = "Button.right")]
    Right,
    #[serde(alias = "Button.middle")]
    Middle,
}

impl fmt::Display for MouseButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MouseButton::Left => f.write_str("left"),
            MouseButton::Right => f.write_str("right"),
            MouseButton::Middle => f.write_str("middle"),
        }
    }
}

/// A captured input event.
///
/// `timestamp` is in seconds relative to the start of the recording.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    MouseMove {
        x: i32,
        y: i32,
        #[serde(alias = "t")]
        timestamp: f64,
    },

    #[serde(rename = "mouse_click")]
    MouseButton {
        x: i32,
        y: i32,
        button: MouseButton,
        pressed: bool,
        #[serde(alias = "t")]
        timestamp: f64,
    },

    MouseScroll {
        x: i32,
        y: i32,
        dx: i32,
        dy: i32,
        #[serde(alias = "t")]
        timestamp: f64,
    },

    KeyPress {
        #[serde(alias = "key_id")]
        key: KeyId,
        /// Modifiers held at press time, also embedded in `key`
        #[serde(default)]
        modifiers: ModifierSet,
        #[serde(alias = "t")]
        timestamp: f64,
    },

    KeyRelease {
        #[serde(alias = "key_id")]
        key: KeyId,
        #[serde(alias = "t")]
        timestamp: f64,
    },
}

impl Event {
    pub fn timestamp(&self) -> f64 {
        match self {
            Event::MouseMove { timestamp, .. }
            | Event::MouseButton { timestamp, .. }
            | Event::MouseScroll { timestamp, .. }
            | Event::KeyPress { timestamp, .. }
            | Event::KeyRelease { timestamp, .. } => *timestamp,
        }
    }

    fn timestamp_mut(&mut self) -> &mut f64 {
        match self {
            Event::MouseMove { timestamp, .. }
            | Event::MouseButton { timestamp, .. }
            | Event::MouseScroll { timestamp, .. }
            | Event::KeyPress { timestamp, .. }
            | Event::KeyRelease { timestamp, .. } => timestamp,
        }
    }

    /// The `type` discriminator used in task files
    pub fn kind(&self) -> &'static str {
        match self {
            Event::MouseMove { .. } => "mouse_move",
            Event::MouseButton { .. } => "mouse_click",
            Event::MouseScroll { .. } => "mouse_scroll",
            Event::KeyPress { .. } => "key_press",
            Event::KeyRelease { .. } => "key_release",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::MouseMove { x, y, .. } => write!(f, "Mouse Move ({}, {})", x, y),
            Event::MouseButton {
                x, y, button, pressed, ..
            } => {
                let action = if *pressed { "Press" } else { "Release" };
                write!(f, "Mouse {} {} @ ({}, {})", action, button, x, y)
            }
            Event::MouseScroll { dx, dy, .. } => {
                let direction = match (dx.signum(), dy.signum()) {
                    (_, 1) => "Up",
                    (_, -1) => "Down",
                    (1, _) => "Right",
                    (-1, _) => "Left",
                    _ => "None",
                };
                write!(f, "Scroll {}", direction)
            }
            Event::KeyPress { key, .. } => write!(f, "Key Press {}", key.label()),
            Event::KeyRelease { key, .. } => write!(f, "Key Release {}", key.label()),
        }
    }
}

/// The ordered, timestamped events of one recording session.
///
/// Timestamps never decrease in insertion order. Editing operations must not
/// run while a playback of the same sequence is active.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Event>", into = "Vec<Event>")]
pub struct EventSequence {
    events: Vec<Event>,
}

impl EventSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a sequence from loaded events, keeping their order.
    ///
    /// Out-of-order timestamps are raised to their predecessor's.
    pub fn from_events(events: Vec<Event>) -> Self {
        let mut sequence = Self::new();
        for event in events {
            sequence.push(event);
        }
        sequence
    }

    /// Append an event at the end of the sequence
    pub fn push(&mut self, mut event: Event) {
        let floor = self.last_timestamp().unwrap_or(0.0);
        let timestamp = event.timestamp_mut();
        if timestamp.is_nan() || *timestamp < floor {
            *timestamp = floor;
        }
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Event> {
        self.events.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    pub fn last_timestamp(&self) -> Option<f64> {
        self.events.last().map(Event::timestamp)
    }

    /// Recorded duration in seconds, measured from the start of the recording
    pub fn duration(&self) -> f64 {
        self.last_timestamp().unwrap_or(0.0)
    }

    pub fn is_monotonic(&self) -> bool {
        self.events
            .windows(2)
            .all(|pair| pair[1].timestamp() >= pair[0].timestamp())
    }

    pub fn remove(&mut self, index: usize) -> Option<Event> {
        if index < self.events.len() {
            Some(self.events.remove(index))
        } else {
            None
        }
    }

    /// Remove a group of events. Duplicate and out-of-range indices are ignored.
    /// Returns the number of events removed.
    pub fn remove_many(&mut self, indices: &[usize]) -> usize {
        let mut indices: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|i| *i < self.events.len())
            .collect();
        indices.sort_unstable();
        indices.dedup();
        for index in indices.iter().rev() {
            self.events.remove(*index);
        }
        indices.len()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Rescale the gaps between the selected events by `1 / factor`.
    ///
    /// The first selected timestamp stays put. Unselected events keep their
    /// offset from the preceding selected event, capped by the next selected
    /// one, so the sequence stays non-decreasing. Returns how many selected
    /// events were rescaled.
    pub fn scale_timestamps(&mut self, indices: &[usize], factor: f64) -> Result<usize> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(TaskRecorderError::InvalidConfig(format!(
                "scale factor must be greater than 0, got {}",
                factor
            )));
        }
        let mut selected: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|i| *i < self.events.len())
            .collect();
        selected.sort_unstable();
        selected.dedup();
        if selected.len() < 2 {
            return Err(TaskRecorderError::InvalidConfig(
                "at least two events must be selected to scale timestamps".to_string(),
            ));
        }

        let original: Vec<f64> = self.events.iter().map(Event::timestamp).collect();
        let mut scaled = original.clone();
        for pair in selected.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            scaled[next] = scaled[prev] + (original[next] - original[prev]) / factor;
        }

        let mut anchor: Option<usize> = None;
        let mut upcoming = selected.iter().peekable();
        for i in 0..scaled.len() {
            if upcoming.peek() == Some(&&i) {
                upcoming.next();
                anchor = Some(i);
                continue;
            }
            if let Some(a) = anchor {
                let mut shifted = original[i] + (scaled[a] - original[a]);
                if let Some(&&next) = upcoming.peek() {
                    shifted = shifted.min(scaled[next]);
                }
                scaled[i] = shifted.max(scaled[a]);
            }
        }

        for (event, timestamp) in self.events.iter_mut().zip(scaled) {
            *event.timestamp_mut() = timestamp;
        }
        Ok(selected.len())
    }
}

impl<'a> IntoIterator for &'a EventSequence {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

impl From<Vec<Event>> for EventSequence {
    fn from(events: Vec<Event>) -> Self {
        Self::from_events(events)
    }
}

impl From<EventSequence> for Vec<Event> {
    fn from(sequence: EventSequence) -> Self {
        sequence.events
    }
}
