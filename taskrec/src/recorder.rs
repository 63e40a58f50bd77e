use crate::{Event, EventSequence, HostKey, ModifierState, MouseButton, NamedKey};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::{Duration, Instant},
};
use tokio::sync::{broadcast, watch};
use tokio_stream::Stream;
use tracing::{debug, info};

pub mod listener;

pub use self::listener::{listen, InputListener};

/// Configuration for the recorder
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Whether to record mouse events
    pub record_mouse: bool,

    /// Whether to record keyboard events
    pub record_keyboard: bool,

    /// A mouse move is kept only if more than this much time passed since the
    /// previously recorded event
    pub mouse_move_threshold: Duration,

    /// Keys that, pressed with no modifiers, end the recording
    pub stop_keys: Vec<NamedKey>,

    /// Capacity of the status broadcast channel
    pub status_buffer: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            record_mouse: true,
            record_keyboard: true,
            mouse_move_threshold: Duration::from_millis(100),
            stop_keys: vec![NamedKey::F9, NamedKey::Esc],
            status_buffer: 100,
        }
    }
}

/// A raw notification from the host input layer
#[derive(Debug, Clone, PartialEq)]
pub enum InputNotification {
    MouseMove {
        x: i32,
        y: i32,
    },
    /// Button notifications without a position use the last known pointer position
    MouseButton {
        button: MouseButton,
        pressed: bool,
        position: Option<(i32, i32)>,
    },
    Wheel {
        dx: i32,
        dy: i32,
    },
    KeyDown {
        key: HostKey,
        text: Option<char>,
    },
    KeyUp {
        key: HostKey,
        text: Option<char>,
    },
}

/// Status notifications emitted while recording
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderStatus {
    Started,
    /// An event was appended at `index`
    Captured { index: usize, description: String },
    /// The stop chord was pressed
    StopRequested,
    Stopped { event_count: usize },
}

impl fmt::Display for RecorderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecorderStatus::Started => f.write_str("Recording started"),
            RecorderStatus::Captured { description, .. } => f.write_str(description),
            RecorderStatus::StopRequested => f.write_str("Stop requested"),
            RecorderStatus::Stopped { event_count } => {
                write!(f, "Recording stopped ({} events)", event_count)
            }
        }
    }
}

#[derive(Default)]
struct CaptureSession {
    events: EventSequence,
    modifiers: ModifierState,
    started_at: Option<Instant>,
    pointer: Option<(i32, i32)>,
    stop_requested: bool,
}

struct RecorderInner {
    config: RecorderConfig,
    session: Mutex<CaptureSession>,
    recording: AtomicBool,
    status_tx: broadcast::Sender<RecorderStatus>,
    stop_tx: watch::Sender<bool>,
}

/// Captures host input into an [`EventSequence`].
///
/// Cloning is cheap and shares the same session, so the listener thread and
/// the caller can each hold a handle.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<RecorderInner>,
}

impl Recorder {
    /// Create a new recorder
    pub fn new(config: RecorderConfig) -> Self {
        let (status_tx, _) = broadcast::channel(config.status_buffer.max(1));
        let (stop_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(RecorderInner {
                config,
                session: Mutex::new(CaptureSession::default()),
                recording: AtomicBool::new(false),
                status_tx,
                stop_tx,
            }),
        }
    }

    /// Hook host input and feed it into this recorder
    pub fn attach(&self) -> crate::Result<InputListener> {
        listener::install(self.clone())
    }

    /// Get a stream of status notifications
    pub fn status_stream(&self) -> impl Stream<Item = RecorderStatus> {
        let mut rx = self.inner.status_tx.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(status) => yield status,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn is_recording(&self) -> bool {
        self.inner.recording.load(Ordering::SeqCst)
    }

    /// Start recording. Does nothing if already recording.
    pub fn start(&self) {
        let mut session = self.session();
        if self.inner.recording.load(Ordering::SeqCst) {
            debug!("Recorder already active, ignoring start");
            return;
        }
        info!("Starting task recording");

        session.events.clear();
        session.modifiers.reset();
        session.started_at = Some(Instant::now());
        session.stop_requested = false;
        self.inner.stop_tx.send_replace(false);
        self.inner.recording.store(true, Ordering::SeqCst);

        let _ = self.inner.status_tx.send(RecorderStatus::Started);
    }

    /// Stop recording and return the captured sequence.
    ///
    /// When not recording, returns the last sequence unchanged.
    pub fn stop(&self) -> EventSequence {
        let mut session = self.session();
        if !self.inner.recording.swap(false, Ordering::SeqCst) {
            return session.events.clone();
        }
        session.started_at = None;
        let event_count = session.events.len();
        info!(event_count, "Stopping task recording");

        let _ = self
            .inner
            .status_tx
            .send(RecorderStatus::Stopped { event_count });
        session.events.clone()
    }

    /// A snapshot of the events captured so far
    pub fn sequence(&self) -> EventSequence {
        self.session().events.clone()
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.inner.stop_tx.borrow()
    }

    /// Wait until the stop chord is pressed during the current recording
    pub async fn stop_requested(&self) {
        let mut rx = self.inner.stop_tx.subscribe();
        let _ = rx.wait_for(|requested| *requested).await;
    }

    /// Feed a host notification, timestamped now.
    pub fn handle(&self, notification: InputNotification) -> Option<Event> {
        let elapsed = self
            .session()
            .started_at
            .map(|start| start.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        self.handle_at(notification, elapsed)
    }

    /// Feed a host notification observed `t` seconds after recording started.
    ///
    /// Returns the event appended to the sequence, if any.
    pub fn handle_at(&self, notification: InputNotification, t: f64) -> Option<Event> {
        let mut session = self.session();

        if let InputNotification::MouseMove { x, y } = notification {
            session.pointer = Some((x, y));
        }
        if !self.inner.recording.load(Ordering::SeqCst) || session.stop_requested {
            return None;
        }

        let event = self.encode(&mut session, notification, t)?;
        session.events.push(event);
        let index = session.events.len() - 1;
        let appended = session.events.get(index).cloned()?;
        drop(session);

        debug!(index, kind = appended.kind(), timestamp = appended.timestamp(), "Captured event");
        let _ = self.inner.status_tx.send(RecorderStatus::Captured {
            index,
            description: appended.to_string(),
        });
        Some(appended)
    }

    fn encode(
        &self,
        session: &mut CaptureSession,
        notification: InputNotification,
        t: f64,
    ) -> Option<Event> {
        let config = &self.inner.config;
        match notification {
            InputNotification::MouseMove { x, y } => {
                if !config.record_mouse {
                    return None;
                }
                let threshold = config.mouse_move_threshold.as_secs_f64();
                let due = match session.events.last_timestamp() {
                    Some(last) => t - last > threshold,
                    None => true,
                };
                due.then_some(Event::MouseMove { x, y, timestamp: t })
            }
            InputNotification::MouseButton {
                button,
                pressed,
                position,
            } => {
                if !config.record_mouse {
                    return None;
                }
                let Some((x, y)) = position.or(session.pointer) else {
                    debug!(?button, "Pointer position unknown, dropping button event");
                    return None;
                };
                Some(Event::MouseButton {
                    x,
                    y,
                    button,
                    pressed,
                    timestamp: t,
                })
            }
            InputNotification::Wheel { dx, dy } => {
                if !config.record_mouse {
                    return None;
                }
                let (x, y) = session.pointer.unwrap_or_default();
                Some(Event::MouseScroll {
                    x,
                    y,
                    dx,
                    dy,
                    timestamp: t,
                })
            }
            InputNotification::KeyDown { key, text } => {
                let held = session.modifiers.held();
                let key = session.modifiers.key_down(&key, text)?;
                if config.stop_keys.iter().any(|stop| key.is_bare(*stop)) {
                    self.request_stop(session);
                    return None;
                }
                if !config.record_keyboard {
                    return None;
                }
                Some(Event::KeyPress {
                    modifiers: key.modifiers().union(held),
                    key,
                    timestamp: t,
                })
            }
            InputNotification::KeyUp { key, text } => {
                let key = session.modifiers.key_up(&key, text)?;
                if !config.record_keyboard {
                    return None;
                }
                Some(Event::KeyRelease { key, timestamp: t })
            }
        }
    }

    fn request_stop(&self, session: &mut CaptureSession) {
        info!("Stop chord pressed");
        session.stop_requested = true;
        self.inner.stop_tx.send_replace(true);
        let _ = self.inner.status_tx.send(RecorderStatus::StopRequested);
    }

    fn session(&self) -> MutexGuard<'_, CaptureSession> {
        // A panic while holding the lock leaves the session usable
        self.inner
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new(RecorderConfig::default())
    }
}
