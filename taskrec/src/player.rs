use crate::{
    Event, EventSequence, HostKey, InputListener, InputNotification, KeyId, ModifierSet, NamedKey,
    Result, TaskRecorderError,
};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, info, instrument, warn};

pub mod injector;

pub use self::injector::{
    InjectedAction, InputInjector, MemoryInjector, RdevInjector, SCROLL_UNITS_PER_STEP,
};

pub const MIN_SPEED: f64 = 0.1;
pub const MAX_SPEED: f64 = 10.0;

/// How often a paused run re-checks its flags
pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Gap between the press and release halves of a chord tap
pub const KEY_TAP_DELAY: Duration = Duration::from_millis(10);

/// How many times a sequence is replayed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    OneShot,
    FixedCount(u32),
    UntilCancelled,
}

impl LoopMode {
    /// The iteration bound, or `None` when unbounded
    pub fn iterations(&self) -> Option<u32> {
        match self {
            LoopMode::OneShot => Some(1),
            LoopMode::FixedCount(n) => Some(*n),
            LoopMode::UntilCancelled => None,
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopMode::OneShot => f.write_str("Once"),
            LoopMode::FixedCount(n) => write!(f, "Loop {}x", n),
            LoopMode::UntilCancelled => f.write_str("Until stopped"),
        }
    }
}

/// Validated speed and loop settings for one playback run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackConfig {
    speed: f64,
    loop_mode: LoopMode,
}

impl PlaybackConfig {
    pub fn new(speed: f64, loop_mode: LoopMode) -> Result<Self> {
        if !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
            return Err(TaskRecorderError::InvalidConfig(format!(
                "speed must be between {} and {}, got {}",
                MIN_SPEED, MAX_SPEED, speed
            )));
        }
        if loop_mode == LoopMode::FixedCount(0) {
            return Err(TaskRecorderError::InvalidConfig(
                "loop count must be at least 1".to_string(),
            ));
        }
        Ok(Self { speed, loop_mode })
    }

    /// Like [`PlaybackConfig::new`] but clamps out-of-range values instead of failing
    pub fn clamped(speed: f64, loop_mode: LoopMode) -> Self {
        let speed = if speed.is_nan() {
            1.0
        } else {
            speed.clamp(MIN_SPEED, MAX_SPEED)
        };
        let loop_mode = match loop_mode {
            LoopMode::FixedCount(0) => LoopMode::OneShot,
            other => other,
        };
        Self { speed, loop_mode }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            loop_mode: LoopMode::OneShot,
        }
    }
}

impl fmt::Display for PlaybackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x speed, {}", self.speed, self.loop_mode)
    }
}

fn default_speed() -> f64 {
    1.0
}

fn default_loop_count() -> u32 {
    1
}

/// Playback settings as persisted in task files and schedules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSettings {
    #[serde(default = "default_speed")]
    pub speed: f64,
    #[serde(rename = "loop", default)]
    pub looped: bool,
    #[serde(default = "default_loop_count")]
    pub loop_count: u32,
    #[serde(default)]
    pub run_until_stop: bool,
}

impl PlaybackSettings {
    /// Validate into a playback config. `run_until_stop` wins over `loop`.
    pub fn to_config(&self) -> Result<PlaybackConfig> {
        let loop_mode = if self.run_until_stop {
            LoopMode::UntilCancelled
        } else if self.looped {
            LoopMode::FixedCount(self.loop_count)
        } else {
            LoopMode::OneShot
        };
        PlaybackConfig::new(self.speed, loop_mode)
    }
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            speed: default_speed(),
            looped: false,
            loop_count: default_loop_count(),
            run_until_stop: false,
        }
    }
}

impl From<PlaybackConfig> for PlaybackSettings {
    fn from(config: PlaybackConfig) -> Self {
        let (looped, loop_count, run_until_stop) = match config.loop_mode {
            LoopMode::OneShot => (false, 1, false),
            LoopMode::FixedCount(n) => (true, n, false),
            LoopMode::UntilCancelled => (false, 1, true),
        };
        Self {
            speed: config.speed,
            looped,
            loop_count,
            run_until_stop,
        }
    }
}

/// Lifecycle of the player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlayerState {
    Idle = 0,
    Playing = 1,
    Paused = 2,
    Finished = 3,
    Cancelled = 4,
}

impl PlayerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PlayerState::Playing,
            2 => PlayerState::Paused,
            3 => PlayerState::Finished,
            4 => PlayerState::Cancelled,
            _ => PlayerState::Idle,
        }
    }

    /// Whether a run currently owns the player
    pub fn is_active(self) -> bool {
        matches!(self, PlayerState::Playing | PlayerState::Paused)
    }
}

/// Progress reported after every executed event
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackUpdate {
    Progress {
        iteration: u32,
        /// 1-based position of the event just executed
        index: usize,
        total: usize,
        percent: u8,
    },
    Error {
        iteration: u32,
        index: usize,
        message: String,
    },
}

impl fmt::Display for PlaybackUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackUpdate::Progress {
                index,
                total,
                percent,
                ..
            } => write!(f, "Playing {}/{} ({}%)", index, total, percent),
            PlaybackUpdate::Error { index, message, .. } => {
                write!(f, "Error at event {}: {}", index, message)
            }
        }
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackOutcome {
    /// `Finished` or `Cancelled`
    pub state: PlayerState,
    /// Iterations started, including a cancelled partial one
    pub iterations: u32,
    pub events_executed: usize,
    pub errors: usize,
}

struct PlayerShared {
    state: AtomicU8,
    cancel: AtomicBool,
    /// Set while one event's actions are being injected
    injecting: AtomicBool,
}

/// Claim on the player for one run. Dropping it before [`RunGuard::finish`]
/// leaves the player `Cancelled` so a dropped or aborted run can't wedge it.
struct RunGuard {
    shared: Arc<PlayerShared>,
    finished: bool,
}

impl RunGuard {
    fn finish(mut self, state: PlayerState) {
        self.shared.state.store(state as u8, Ordering::SeqCst);
        self.finished = true;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Playback dropped before it finished");
            self.shared.injecting.store(false, Ordering::SeqCst);
            self.shared.cancel.store(true, Ordering::SeqCst);
            self.shared
                .state
                .store(PlayerState::Cancelled as u8, Ordering::SeqCst);
        }
    }
}

/// Replays event sequences through an [`InputInjector`].
///
/// At most one run is active per player. Control calls (`pause`, `resume`,
/// `stop`) may come from any thread and take effect at the next safe point.
#[derive(Clone)]
pub struct Player {
    injector: Arc<dyn InputInjector>,
    shared: Arc<PlayerShared>,
}

impl Player {
    pub fn new(injector: Arc<dyn InputInjector>) -> Self {
        Self {
            injector,
            shared: Arc::new(PlayerShared {
                state: AtomicU8::new(PlayerState::Idle as u8),
                cancel: AtomicBool::new(false),
                injecting: AtomicBool::new(false),
            }),
        }
    }

    /// A player backed by the host injector
    pub fn with_host_injector() -> Self {
        Self::new(Arc::new(RdevInjector::new()))
    }

    pub fn state(&self) -> PlayerState {
        PlayerState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Pause at the next safe point. Ignored unless playing.
    pub fn pause(&self) -> bool {
        let paused = self.transition(PlayerState::Playing, PlayerState::Paused);
        if paused {
            info!("Playback paused");
        }
        paused
    }

    /// Resume a paused run. Ignored unless paused.
    pub fn resume(&self) -> bool {
        let resumed = self.transition(PlayerState::Paused, PlayerState::Playing);
        if resumed {
            info!("Playback resumed");
        }
        resumed
    }

    pub fn toggle_pause(&self) -> bool {
        self.pause() || self.resume()
    }

    /// Request cancellation. Idempotent and safe while idle.
    pub fn stop(&self) {
        if !self.shared.cancel.swap(true, Ordering::SeqCst) && self.is_active() {
            info!("Playback stop requested");
        }
    }

    /// Replay `sequence`, calling `progress` after each event.
    ///
    /// Fails with [`TaskRecorderError::AlreadyPlaying`] if another run is active.
    pub async fn play<F>(
        &self,
        sequence: &EventSequence,
        config: PlaybackConfig,
        progress: F,
    ) -> Result<PlaybackOutcome>
    where
        F: FnMut(&PlaybackUpdate) + Send,
    {
        let guard = self.begin()?;
        Ok(self.run(guard, sequence, config, progress).await)
    }

    /// Claim the player now and replay on a background task
    pub fn spawn<F>(
        &self,
        sequence: EventSequence,
        config: PlaybackConfig,
        progress: F,
    ) -> Result<JoinHandle<PlaybackOutcome>>
    where
        F: FnMut(&PlaybackUpdate) + Send + 'static,
    {
        let guard = self.begin()?;
        let player = self.clone();
        Ok(tokio::spawn(async move {
            player.run(guard, &sequence, config, progress).await
        }))
    }

    fn begin(&self) -> Result<RunGuard> {
        self.shared
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if PlayerState::from_u8(current).is_active() {
                    None
                } else {
                    Some(PlayerState::Playing as u8)
                }
            })
            .map_err(|_| TaskRecorderError::AlreadyPlaying)?;
        self.shared.cancel.store(false, Ordering::SeqCst);
        Ok(RunGuard {
            shared: self.shared.clone(),
            finished: false,
        })
    }

    #[instrument(skip_all, fields(events = sequence.len(), speed = config.speed(), loop_mode = %config.loop_mode()))]
    async fn run<F>(
        &self,
        guard: RunGuard,
        sequence: &EventSequence,
        config: PlaybackConfig,
        mut progress: F,
    ) -> PlaybackOutcome
    where
        F: FnMut(&PlaybackUpdate) + Send,
    {
        let speed = config.speed().clamp(MIN_SPEED, MAX_SPEED);
        let bound = config.loop_mode().iterations();
        let events = sequence.events();
        let total = events.len();
        let started = Instant::now();

        let mut outcome = PlaybackOutcome {
            state: PlayerState::Finished,
            iterations: 0,
            events_executed: 0,
            errors: 0,
        };

        if total == 0 {
            warn!("Nothing to play, sequence is empty");
        } else {
            info!("Starting playback");
        }

        'iterations: while total > 0 && bound.map_or(true, |max| outcome.iterations < max) {
            outcome.iterations += 1;
            let iteration = outcome.iterations;
            debug!(iteration, "Starting iteration");

            for (i, event) in events.iter().enumerate() {
                if !self.wait_while_paused().await {
                    break 'iterations;
                }
                if i > 0 {
                    let gap = (event.timestamp() - events[i - 1].timestamp()) / speed;
                    // Gaps too large for a Duration just wait until cancelled
                    let wait = Duration::try_from_secs_f64(gap).unwrap_or(Duration::MAX);
                    if gap > 0.0 && !self.delay(wait).await {
                        break 'iterations;
                    }
                    if !self.wait_while_paused().await {
                        break 'iterations;
                    }
                }

                self.shared.injecting.store(true, Ordering::SeqCst);
                let executed = self.execute(event).await;
                self.shared.injecting.store(false, Ordering::SeqCst);
                if let Err(e) = executed {
                    outcome.errors += 1;
                    warn!(iteration, index = i + 1, error = %e, "Failed to play event");
                    progress(&PlaybackUpdate::Error {
                        iteration,
                        index: i + 1,
                        message: e.to_string(),
                    });
                }
                outcome.events_executed += 1;
                progress(&PlaybackUpdate::Progress {
                    iteration,
                    index: i + 1,
                    total,
                    percent: ((i + 1) * 100 / total) as u8,
                });
            }

            if self.is_cancelled() {
                break;
            }
            // A sequence with no gaps would otherwise never yield between iterations
            tokio::task::yield_now().await;
        }

        if self.is_cancelled() {
            outcome.state = PlayerState::Cancelled;
        }
        guard.finish(outcome.state);

        info!(
            state = ?outcome.state,
            iterations = outcome.iterations,
            events = outcome.events_executed,
            errors = outcome.errors,
            duration_ms = started.elapsed().as_millis(),
            "Playback ended"
        );
        outcome
    }

    /// Whether the player is injecting an event right now
    pub fn is_injecting(&self) -> bool {
        self.shared.injecting.load(Ordering::SeqCst)
    }

    fn is_cancelled(&self) -> bool {
        self.shared.cancel.load(Ordering::SeqCst)
    }

    fn transition(&self, from: PlayerState, to: PlayerState) -> bool {
        self.shared
            .state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Block while paused. Returns false once cancelled.
    async fn wait_while_paused(&self) -> bool {
        while self.state() == PlayerState::Paused {
            if self.is_cancelled() {
                return false;
            }
            tokio::time::sleep(PAUSE_POLL_INTERVAL).await;
        }
        !self.is_cancelled()
    }

    /// Sleep for `duration`, waking every poll interval to honour cancellation.
    /// A deadline past the end of the clock never elapses.
    async fn delay(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                return true;
            }
            let slice = now + PAUSE_POLL_INTERVAL;
            tokio::time::sleep_until(deadline.map_or(slice, |deadline| deadline.min(slice))).await;
        }
    }

    async fn execute(&self, event: &Event) -> Result<()> {
        let injector = &self.injector;
        match event {
            Event::MouseMove { x, y, .. } => injector.move_to(*x, *y),
            Event::MouseButton {
                x,
                y,
                button,
                pressed,
                ..
            } => {
                injector.move_to(*x, *y)?;
                injector.button(*button, *pressed)
            }
            Event::MouseScroll { dy, .. } => {
                injector.scroll(i64::from(*dy) * SCROLL_UNITS_PER_STEP)
            }
            Event::KeyPress { key, .. } if key.is_chord() => self.tap_chord(key).await,
            Event::KeyPress { key, .. } => injector.key(key.base(), true),
            Event::KeyRelease { key, .. } => {
                let released = injector.key(key.base(), false);
                if key.is_chord() {
                    self.release_modifiers(key)?;
                }
                released
            }
        }
    }

    /// Press the modifiers in order, tap the base key, then release the modifiers in
    /// the same order. Modifiers that went down are always released.
    async fn tap_chord(&self, key: &KeyId) -> Result<()> {
        let injector = &self.injector;
        let mut held = Vec::new();
        let mut result = Ok(());

        for modifier in key.modifiers().iter() {
            if let Err(e) = injector.modifier(modifier, true) {
                result = Err(e);
                break;
            }
            held.push(modifier);
        }

        if result.is_ok() {
            result = injector.key(key.base(), true);
            if result.is_ok() {
                tokio::time::sleep(KEY_TAP_DELAY).await;
                result = injector.key(key.base(), false);
            }
        }

        for modifier in held {
            let released = injector.modifier(modifier, false);
            if result.is_ok() {
                result = released;
            }
        }
        result
    }

    fn release_modifiers(&self, key: &KeyId) -> Result<()> {
        for modifier in key.modifiers().iter() {
            self.injector.modifier(modifier, false)?;
        }
        Ok(())
    }
}

/// Global playback hotkeys: bare Esc or F9 stop, bare F10 toggles pause.
///
/// Returns the listener so callers can detach it once playback ends.
pub fn abort_keys(player: Player) -> Result<InputListener> {
    let mut hotkeys = Hotkeys::new(player);
    crate::listen(move |notification| hotkeys.handle(&notification))
}

/// Hotkey dispatch for one player. Keys pressed with a modifier held, or seen
/// while the player injects, belong to the replayed task and are ignored.
struct Hotkeys {
    player: Player,
    held: ModifierSet,
}

impl Hotkeys {
    fn new(player: Player) -> Self {
        Self {
            player,
            held: ModifierSet::empty(),
        }
    }

    fn handle(&mut self, notification: &InputNotification) {
        match notification {
            InputNotification::KeyDown {
                key: HostKey::Modifier(modifier),
                ..
            } => self.held.insert(*modifier),
            InputNotification::KeyUp {
                key: HostKey::Modifier(modifier),
                ..
            } => self.held.remove(*modifier),
            _ => {}
        }

        let Some(key) = hotkey(notification) else {
            return;
        };
        if !self.held.is_empty() || self.player.is_injecting() {
            debug!(?key, "Ignoring hotkey from a chord or injected input");
            return;
        }
        if key == NamedKey::F10 {
            self.player.toggle_pause();
        } else {
            self.player.stop();
        }
    }
}

fn hotkey(notification: &InputNotification) -> Option<NamedKey> {
    match notification {
        InputNotification::KeyDown {
            key: HostKey::Named(named @ (NamedKey::Esc | NamedKey::F9 | NamedKey::F10)),
            ..
        } => Some(*named),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Modifier;

    #[test]
    fn test_config_validation() {
        assert!(PlaybackConfig::new(1.0, LoopMode::OneShot).is_ok());
        assert!(PlaybackConfig::new(0.1, LoopMode::FixedCount(1)).is_ok());
        assert!(PlaybackConfig::new(10.0, LoopMode::UntilCancelled).is_ok());
        assert!(matches!(
            PlaybackConfig::new(0.05, LoopMode::OneShot),
            Err(TaskRecorderError::InvalidConfig(_))
        ));
        assert!(matches!(
            PlaybackConfig::new(f64::NAN, LoopMode::OneShot),
            Err(TaskRecorderError::InvalidConfig(_))
        ));
        assert!(matches!(
            PlaybackConfig::new(1.0, LoopMode::FixedCount(0)),
            Err(TaskRecorderError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_clamped() {
        let config = PlaybackConfig::clamped(25.0, LoopMode::FixedCount(0));
        assert_eq!(config.speed(), MAX_SPEED);
        assert_eq!(config.loop_mode(), LoopMode::OneShot);
        assert_eq!(PlaybackConfig::clamped(0.0, LoopMode::OneShot).speed(), MIN_SPEED);
    }

    #[test]
    fn test_settings_run_until_stop_wins() {
        let settings = PlaybackSettings {
            speed: 2.0,
            looped: true,
            loop_count: 3,
            run_until_stop: true,
        };
        let config = settings.to_config().unwrap();
        assert_eq!(config.loop_mode(), LoopMode::UntilCancelled);
        assert_eq!(config.speed(), 2.0);
    }

    #[test]
    fn test_settings_serde_uses_loop_key() {
        let settings: PlaybackSettings =
            serde_json::from_str(r#"{"speed": 1.5, "loop": true, "loop_count": 4}"#).unwrap();
        assert!(settings.looped);
        assert!(!settings.run_until_stop);
        assert_eq!(
            settings.to_config().unwrap().loop_mode(),
            LoopMode::FixedCount(4)
        );

        let json = serde_json::to_value(PlaybackSettings::default()).unwrap();
        assert_eq!(json["loop"], false);
        assert_eq!(json["loop_count"], 1);
    }

    #[test]
    fn test_settings_from_config() {
        let config = PlaybackConfig::new(0.5, LoopMode::FixedCount(2)).unwrap();
        let settings = PlaybackSettings::from(config);
        assert_eq!(settings.to_config().unwrap(), config);
    }

    #[test]
    fn test_pause_and_resume_require_matching_state() {
        let player = Player::new(Arc::new(MemoryInjector::new()));
        assert!(!player.pause());
        assert!(!player.resume());
        assert_eq!(player.state(), PlayerState::Idle);
        player.stop();
        assert_eq!(player.state(), PlayerState::Idle);
    }

    #[test]
    fn test_hotkeys_ignore_chords() {
        let player = Player::new(Arc::new(MemoryInjector::new()));
        let mut hotkeys = Hotkeys::new(player.clone());
        let down = |key| InputNotification::KeyDown { key, text: None };
        let up = |key| InputNotification::KeyUp { key, text: None };

        hotkeys.handle(&down(HostKey::Modifier(Modifier::Ctrl)));
        hotkeys.handle(&down(HostKey::Named(NamedKey::Esc)));
        assert!(!player.is_cancelled());

        hotkeys.handle(&up(HostKey::Modifier(Modifier::Ctrl)));
        hotkeys.handle(&down(HostKey::Named(NamedKey::Esc)));
        assert!(player.is_cancelled());
    }

    #[test]
    fn test_hotkeys_ignore_injected_keys() {
        let player = Player::new(Arc::new(MemoryInjector::new()));
        let mut hotkeys = Hotkeys::new(player.clone());
        player.shared.injecting.store(true, Ordering::SeqCst);

        hotkeys.handle(&InputNotification::KeyDown {
            key: HostKey::Named(NamedKey::F9),
            text: None,
        });
        assert!(!player.is_cancelled());
    }

    #[test]
    fn test_hotkey_mapping() {
        let down = |key| InputNotification::KeyDown { key, text: None };
        assert_eq!(hotkey(&down(HostKey::Named(NamedKey::F10))), Some(NamedKey::F10));
        assert_eq!(hotkey(&down(HostKey::Named(NamedKey::Esc))), Some(NamedKey::Esc));
        assert_eq!(hotkey(&down(HostKey::Named(NamedKey::F1))), None);
        assert_eq!(
            hotkey(&InputNotification::KeyUp {
                key: HostKey::Named(NamedKey::F9),
                text: None
            }),
            None
        );
    }
}
