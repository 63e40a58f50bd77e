use crate::{
    EventSequence, LoopMode, PlaybackConfig, PlaybackSettings, PlaybackUpdate, Player, Result,
    TaskRecorderError,
};
use chrono::{Datelike, Local, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default period between schedule evaluations
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(10);

const TIME_FORMAT: &str = "%H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Day {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Day {
    pub const ALL: [Day; 7] = [
        Day::Monday,
        Day::Tuesday,
        Day::Wednesday,
        Day::Thursday,
        Day::Friday,
        Day::Saturday,
        Day::Sunday,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Day::Monday => "monday",
            Day::Tuesday => "tuesday",
            Day::Wednesday => "wednesday",
            Day::Thursday => "thursday",
            Day::Friday => "friday",
            Day::Saturday => "saturday",
            Day::Sunday => "sunday",
        }
    }
}

impl From<Weekday> for Day {
    fn from(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => Day::Monday,
            Weekday::Tue => Day::Tuesday,
            Weekday::Wed => Day::Wednesday,
            Weekday::Thu => Day::Thursday,
            Weekday::Fri => Day::Friday,
            Weekday::Sat => Day::Saturday,
            Weekday::Sun => Day::Sunday,
        }
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A daily time-of-day window. When `from > to` the window wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: NaiveTime,
    pub to: NaiveTime,
}

impl TimeWindow {
    pub fn new(from: NaiveTime, to: NaiveTime) -> Self {
        Self { from, to }
    }

    /// Parse a window from two `HH:MM` strings
    pub fn parse(from: &str, to: &str) -> Result<Self> {
        Ok(Self::new(parse_time_of_day(from)?, parse_time_of_day(to)?))
    }

    pub fn wraps_midnight(&self) -> bool {
        self.from > self.to
    }

    /// Inclusive membership test
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.wraps_midnight() {
            time >= self.from || time <= self.to
        } else {
            self.from <= time && time <= self.to
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            self.from.format(TIME_FORMAT),
            self.to.format(TIME_FORMAT)
        )
    }
}

fn parse_time_of_day(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), TIME_FORMAT).map_err(|e| {
        TaskRecorderError::ScheduleEvaluation(format!("invalid time '{}': {}", value, e))
    })
}

/// When a task should run automatically
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub enabled: bool,
    #[serde(default)]
    pub days: Vec<Day>,
    #[serde(default)]
    pub time_interval_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to: Option<String>,
    /// Settings for scheduled runs; one-shot at normal speed when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback: Option<PlaybackSettings>,
}

impl ScheduleConfig {
    /// An enabled, all-day schedule on `days`
    pub fn new(days: impl IntoIterator<Item = Day>) -> Self {
        Self {
            enabled: true,
            days: days.into_iter().collect(),
            time_interval_enabled: false,
            time_from: None,
            time_to: None,
            playback: None,
        }
    }

    pub fn with_window(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.time_interval_enabled = true;
        self.time_from = Some(from.into());
        self.time_to = Some(to.into());
        self
    }

    pub fn with_playback(mut self, playback: PlaybackSettings) -> Self {
        self.playback = Some(playback);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.days.is_empty() {
            return Err(TaskRecorderError::InvalidConfig(
                "an enabled schedule needs at least one day".to_string(),
            ));
        }
        self.window().map_err(|e| match e {
            TaskRecorderError::ScheduleEvaluation(message) => {
                TaskRecorderError::InvalidConfig(message)
            }
            other => other,
        })?;
        if let Some(playback) = &self.playback {
            playback.to_config()?;
        }
        Ok(())
    }

    /// The active time window, or `None` when the whole day is allowed
    pub fn window(&self) -> Result<Option<TimeWindow>> {
        if !self.time_interval_enabled {
            return Ok(None);
        }
        match (&self.time_from, &self.time_to) {
            (Some(from), Some(to)) => TimeWindow::parse(from, to).map(Some),
            _ => Err(TaskRecorderError::ScheduleEvaluation(
                "time window is enabled but a bound is missing".to_string(),
            )),
        }
    }

    pub fn runs_on(&self, day: Day) -> bool {
        self.days.contains(&day)
    }

    /// Playback settings for a scheduled run
    pub fn playback_config(&self) -> Result<PlaybackConfig> {
        match &self.playback {
            Some(playback) => playback.to_config(),
            None => Ok(PlaybackConfig::default()),
        }
    }
}

impl fmt::Display for ScheduleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.enabled {
            return f.write_str("disabled");
        }
        let days: Vec<&str> = self.days.iter().map(|d| d.as_str()).collect();
        write!(f, "{}", days.join(", "))?;
        match self.window() {
            Ok(Some(window)) => write!(f, ", {}", window)?,
            Ok(None) => f.write_str(", all day")?,
            Err(_) => f.write_str(", invalid time window")?,
        }
        if let Ok(playback) = self.playback_config() {
            write!(f, " ({})", playback)?;
        }
        Ok(())
    }
}

/// Result of a single schedule evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Disabled,
    DayMismatch,
    OutsideWindow,
    EvaluationFailed,
    AlreadyPlaying,
    NoEvents,
    /// Already triggered during this minute
    Debounced,
    Triggered,
}

type ProgressCallback = Arc<dyn Fn(&PlaybackUpdate) + Send + Sync>;

#[derive(Default)]
struct SchedulerState {
    config: Option<ScheduleConfig>,
    sequence: EventSequence,
    last_trigger: Option<NaiveDateTime>,
}

/// Starts playback automatically on matching days and times
#[derive(Clone)]
pub struct Scheduler {
    player: Player,
    state: Arc<Mutex<SchedulerState>>,
    on_progress: Option<ProgressCallback>,
}

impl Scheduler {
    pub fn new(player: Player) -> Self {
        Self {
            player,
            state: Arc::new(Mutex::new(SchedulerState::default())),
            on_progress: None,
        }
    }

    /// Receive progress from scheduled runs
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PlaybackUpdate) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    /// Validate and replace the whole configuration
    pub fn configure(&self, config: ScheduleConfig) -> Result<()> {
        config.validate()?;
        info!(schedule = %config, "Schedule configured");
        self.lock().config = Some(config);
        Ok(())
    }

    /// Clear the configuration and forget the last trigger
    pub fn disable(&self) {
        let mut state = self.lock();
        state.config = None;
        state.last_trigger = None;
        info!("Schedule disabled");
    }

    pub fn config(&self) -> Option<ScheduleConfig> {
        self.lock().config.clone()
    }

    pub fn set_sequence(&self, sequence: EventSequence) {
        self.lock().sequence = sequence;
    }

    pub fn last_trigger(&self) -> Option<NaiveDateTime> {
        self.lock().last_trigger
    }

    /// Evaluate the schedule once at `now`, starting playback if it is due
    pub fn tick(&self, now: NaiveDateTime) -> TickOutcome {
        let mut state = self.lock();
        let Some(config) = state.config.as_ref().filter(|c| c.enabled) else {
            return TickOutcome::Disabled;
        };

        if !config.runs_on(Day::from(now.weekday())) {
            return TickOutcome::DayMismatch;
        }
        match config.window() {
            Ok(Some(window)) if !window.contains(now.time()) => {
                return TickOutcome::OutsideWindow
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Skipping schedule tick");
                return TickOutcome::EvaluationFailed;
            }
        }
        if self.player.is_active() {
            return TickOutcome::AlreadyPlaying;
        }
        if state.sequence.is_empty() {
            warn!("Schedule is due but there are no events to play");
            return TickOutcome::NoEvents;
        }

        let playback = match config.playback_config() {
            Ok(playback) => playback,
            Err(e) => {
                warn!(error = %e, "Skipping schedule tick");
                return TickOutcome::EvaluationFailed;
            }
        };

        if playback.loop_mode() != LoopMode::UntilCancelled {
            let minute = truncate_to_minute(now);
            if state.last_trigger.is_some_and(|last| last >= minute) {
                return TickOutcome::Debounced;
            }
            state.last_trigger = Some(minute);
        }

        let sequence = state.sequence.clone();
        drop(state);

        let on_progress = self.on_progress.clone();
        let started = self.player.spawn(sequence, playback, move |update| {
            debug!(%update, "Scheduled playback");
            if let Some(callback) = &on_progress {
                callback(update);
            }
        });
        match started {
            Ok(_) => {
                info!(%now, %playback, "Scheduled playback triggered");
                TickOutcome::Triggered
            }
            Err(TaskRecorderError::AlreadyPlaying) => TickOutcome::AlreadyPlaying,
            Err(e) => {
                warn!(error = %e, "Failed to start scheduled playback");
                TickOutcome::EvaluationFailed
            }
        }
    }

    /// Run the evaluation loop on a background task until the schedule is disabled
    pub fn spawn(&self, interval: Duration) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_secs = interval.as_secs_f64(), "Scheduler started");
            loop {
                ticker.tick().await;
                let outcome = scheduler.tick(Local::now().naive_local());
                debug!(?outcome, "Schedule tick");
                if outcome == TickOutcome::Disabled {
                    break;
                }
            }
            info!("Scheduler stopped");
        })
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn truncate_to_minute(now: NaiveDateTime) -> NaiveDateTime {
    now.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}
