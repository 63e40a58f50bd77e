use crate::{
    EventSequence, PlaybackConfig, PlaybackSettings, Result, ScheduleConfig, TaskRecorderError,
};
use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::{
    fmt,
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};
use tracing::{debug, warn};

/// Format version written into new task files
pub const TASK_DATA_VERSION: &str = "4.4";

/// Extension used for task files
pub const TASK_FILE_EXTENSION: &str = "json";

/// A recorded task as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFile {
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(deserialize_with = "deserialize_created")]
    pub created: DateTime<Local>,

    pub event_count: usize,

    pub events: EventSequence,

    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,

    #[serde(default)]
    pub playback: PlaybackSettings,
}

impl TaskFile {
    pub fn new(
        name: Option<String>,
        events: EventSequence,
        playback: PlaybackSettings,
        schedule: Option<ScheduleConfig>,
    ) -> Self {
        Self {
            version: TASK_DATA_VERSION.to_string(),
            name,
            created: Local::now(),
            event_count: events.len(),
            events,
            schedule,
            playback,
        }
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(json)?)
    }

    fn from_value(value: serde_json::Value) -> Result<Self> {
        if value.get("events").is_none() {
            return Err(TaskRecorderError::InvalidTask(
                "missing 'events' array".to_string(),
            ));
        }
        let mut task: TaskFile = serde_json::from_value(value)?;
        task.reconcile();
        Ok(task)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        debug!(path = %path.display(), events = self.events.len(), "Saved task file");
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let value: serde_json::Value = serde_json::from_reader(reader)?;
        let task = Self::from_value(value)?;
        debug!(path = %path.display(), events = task.events.len(), "Loaded task file");
        Ok(task)
    }

    /// Playback settings stored with the task
    pub fn playback_config(&self) -> Result<PlaybackConfig> {
        self.playback.to_config()
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            name: self.name.clone(),
            version: self.version.clone(),
            created: self.created,
            event_count: self.events.len(),
            duration: self.events.duration(),
            schedule: self.schedule.as_ref().map(ToString::to_string),
            playback: match self.playback_config() {
                Ok(config) => config.to_string(),
                Err(e) => format!("invalid ({})", e),
            },
        }
    }

    // The events array is authoritative
    fn reconcile(&mut self) {
        if self.event_count != self.events.len() {
            warn!(
                declared = self.event_count,
                actual = self.events.len(),
                "Task file event count does not match its events"
            );
            self.event_count = self.events.len();
        }
    }
}

/// Accept RFC 3339 as well as the offset-less ISO-8601 timestamps older files carry
fn deserialize_created<'de, D>(deserializer: D) -> std::result::Result<DateTime<Local>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(dt.with_timezone(&Local));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .and_then(|naive| naive.and_local_timezone(Local).earliest())
        .ok_or_else(|| serde::de::Error::custom(format!("invalid created timestamp '{}'", raw)))
}

/// A short description of a task for listings
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSummary {
    pub name: Option<String>,
    pub version: String,
    pub created: DateTime<Local>,
    pub event_count: usize,
    /// Recorded duration in seconds
    pub duration: f64,
    pub schedule: Option<String>,
    pub playback: String,
}

impl fmt::Display for TaskSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Task:     {}", self.name.as_deref().unwrap_or("(unnamed)"))?;
        writeln!(f, "Version:  {}", self.version)?;
        writeln!(f, "Created:  {}", self.created.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "Events:   {}", self.event_count)?;
        writeln!(f, "Duration: {:.2}s", self.duration)?;
        writeln!(f, "Playback: {}", self.playback)?;
        write!(
            f,
            "Schedule: {}",
            self.schedule.as_deref().unwrap_or("none")
        )
    }
}

/// Names of the task files in `dir`, sorted. A missing directory has no tasks.
pub fn list_tasks(dir: impl AsRef<Path>) -> Result<Vec<String>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let is_task = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(TASK_FILE_EXTENSION));
        if let (true, Some(stem)) = (is_task, path.file_stem()) {
            names.push(stem.to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Day, Event, KeyId, ModifierSet};

    const LEGACY_TASK: &str = r#"{
        "version": "4.4",
        "created": "2024-05-06T21:15:03.123456",
        "event_count": 3,
        "events": [
            {"type": "mouse_move", "x": 10, "y": 20, "timestamp": 0.0},
            {"type": "mouse_click", "x": 10, "y": 20, "button": "Button.left", "pressed": true, "timestamp": 0.5},
            {"type": "key_press", "key": "ctrl+c", "modifiers": ["ctrl"], "timestamp": 1.25}
        ],
        "schedule": {
            "enabled": true,
            "days": ["monday"],
            "time_interval_enabled": true,
            "time_from": "21:00",
            "time_to": "03:00"
        },
        "playback": {"speed": 2.0, "loop": true, "loop_count": 3, "run_until_stop": false}
    }"#;

    #[test]
    fn test_load_legacy_task() {
        let task = TaskFile::from_json(LEGACY_TASK).unwrap();
        assert_eq!(task.version, "4.4");
        assert_eq!(task.events.len(), 3);
        assert_eq!(task.schedule.as_ref().unwrap().days, vec![Day::Monday]);
        assert_eq!(task.playback.loop_count, 3);

        match task.events.get(2).unwrap() {
            Event::KeyPress { key, modifiers, .. } => {
                assert_eq!(key, &KeyId::from("ctrl+c"));
                assert_eq!(*modifiers, ModifierSet::from(crate::Modifier::Ctrl));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_missing_events_is_invalid() {
        let json = r#"{"version": "4.4", "created": "2024-05-06T21:15:03", "event_count": 0}"#;
        assert!(matches!(
            TaskFile::from_json(json),
            Err(TaskRecorderError::InvalidTask(_))
        ));
    }

    #[test]
    fn test_event_count_follows_events() {
        let json = LEGACY_TASK.replace("\"event_count\": 3", "\"event_count\": 7");
        let task = TaskFile::from_json(&json).unwrap();
        assert_eq!(task.event_count, 3);
    }

    #[test]
    fn test_summary_display() {
        let task = TaskFile::from_json(LEGACY_TASK).unwrap();
        let summary = task.summary();
        assert_eq!(summary.event_count, 3);
        assert!((summary.duration - 1.25).abs() < f64::EPSILON);

        let text = summary.to_string();
        assert!(text.contains("Task:     (unnamed)"));
        assert!(text.contains("Playback: 2x speed, Loop 3x"));
        assert!(text.contains("Schedule: monday, 21:00 - 03:00"));
    }
}
