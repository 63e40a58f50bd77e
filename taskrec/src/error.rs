use thiserror::Error;

/// Error types for task recording, playback and scheduling
#[derive(Debug, Error)]
pub enum TaskRecorderError {
    /// An input symbol could not be mapped to a known key representation
    #[error("Failed to encode captured input: {0}")]
    CaptureEncoding(String),

    /// The output layer rejected or failed an injected action
    #[error("Failed to inject input: {0}")]
    Injection(String),

    /// A playback or schedule configuration was rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A schedule could not be evaluated at tick time
    #[error("Failed to evaluate schedule: {0}")]
    ScheduleEvaluation(String),

    /// Another playback run already owns the injector
    #[error("A playback run is already active")]
    AlreadyPlaying,

    /// Error from the host input listener
    #[error("Input listener error: {0}")]
    Listener(String),

    /// A task file did not have the expected shape
    #[error("Invalid task file: {0}")]
    InvalidTask(String),

    /// Error when serializing or deserializing JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for task recorder operations
pub type Result<T> = std::result::Result<T, TaskRecorderError>;
