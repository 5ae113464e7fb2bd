use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Which output stream of the child a line was read from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    /// Prefix used when echoing a line to the log
    pub fn prefix(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "[stdout]",
            OutputStream::Stderr => "[stderr]",
        }
    }
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "stdout"),
            OutputStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// One line drained from a child process. An empty `text` is a real blank line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

impl OutputLine {
    pub fn new(stream: OutputStream, text: impl Into<String>) -> Self {
        Self {
            stream,
            text: text.into(),
        }
    }
}

/// Lifecycle of the recording orchestrator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RecorderState {
    #[default]
    Idle,
    Recording,
    Stopping,
    Finalizing,
}

/// How the captured segments were turned into the final file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FinishMode {
    /// Several segments joined through the manifest
    Concat,
    /// A single segment remuxed into the output container
    Convert,
}

impl fmt::Display for FinishMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishMode::Concat => write!(f, "concat"),
            FinishMode::Convert => write!(f, "convert"),
        }
    }
}

/// State of one capture, from `start_record` until it is finished
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSession {
    pub id: Uuid,
    pub url: String,
    pub work_directory: PathBuf,
    pub output_file_name: String,
    pub started_at: DateTime<Utc>,
}

impl RecordingSession {
    pub fn new(url: String, work_directory: PathBuf, output_file_name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            url,
            work_directory,
            output_file_name,
            started_at: Utc::now(),
        }
    }

    /// Absolute location of the final artifact
    pub fn output_path(&self) -> PathBuf {
        self.work_directory.join(&self.output_file_name)
    }
}

/// Result of a successful finish step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSummary {
    pub session_id: Option<Uuid>,
    pub work_directory: PathBuf,
    pub output: PathBuf,
    pub mode: FinishMode,
    pub segment_count: usize,
    pub completed_at: DateTime<Utc>,
}
