use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamrecError {
    #[error("Failed to start encoder: {0}")]
    StartFailure(String),

    #[error("A process is already running on this supervisor")]
    AlreadyRunning,

    #[error("This supervisor already ran its process; create a new one")]
    SupervisorSpent,

    #[error("A recording session is already active")]
    AlreadyActive,

    #[error("No recording session to finish")]
    NotRecording,

    #[error("Could not create work directory: {0}")]
    DirectoryCreation(String),

    #[error("No segment files found in directory {0}")]
    NoSegments(String),

    #[error("Encoder {phase} step exited with code {code}")]
    EncoderFailed { phase: String, code: i32 },

    #[error("Worker error: {0}")]
    WorkerError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid file pattern: {0}")]
    InvalidPattern(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StreamrecError>;
