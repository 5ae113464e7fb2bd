//! Recording Orchestrator
//!
//! Turns "record this stream into a file" into three encoder runs:
//! 1. Capture: stream-copy the URL into numbered segments and a manifest.
//! 2. Finish: concat the segments through the manifest, or remux a lone segment.
//! 3. Cleanup: delete segments and manifest once the output exists.
//!
//! State moves `Idle -> Recording -> Stopping -> Finalizing -> Idle`.

use std::path::Path;

use chrono::{Local, Utc};
use streamrec_core::{
    FinishMode, RecorderConfig, RecorderState, RecordingSession, RecordingSummary, Result,
    StreamrecError,
};
use streamrec_runner::{ExitHandle, Supervisor, SupervisorOptions};
use tracing::{error, info, warn};

use crate::commands::{concat_args, convert_args, CaptureCommandBuilder, MANIFEST_FILE};
use crate::workdir::{clean_intermediates, create_session_directory, find_segments};

/// Records one stream at a time
pub struct Recorder {
    config: RecorderConfig,
    state: RecorderState,
    session: Option<RecordingSession>,
    capture: Option<ExitHandle>,
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            state: RecorderState::Idle,
            session: None,
            capture: None,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// The current session, kept after `stop()` until it is finished
    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    pub fn current_work_directory(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.work_directory.as_path())
    }

    /// Whether the capture process is still going
    pub fn is_capturing(&self) -> bool {
        self.capture
            .as_ref()
            .map(|handle| handle.supervisor().is_running())
            .unwrap_or(false)
    }

    fn supervisor_options(&self, work_directory: &Path, print_messages: bool) -> SupervisorOptions {
        SupervisorOptions::new()
            .with_executable(self.config.executable.clone())
            .with_work_directory(work_directory)
            .with_print_messages(print_messages)
            .with_stop_grace(self.config.stop_grace())
    }

    /// Start capturing `url` into a new timestamped directory under
    /// `work_root`. The capture runs in the background until `stop()`.
    pub fn start_record(
        &mut self,
        url: &str,
        work_root: &Path,
        output_file_name: &str,
    ) -> Result<&RecordingSession> {
        if self.state != RecorderState::Idle || self.capture.is_some() {
            return Err(StreamrecError::AlreadyActive);
        }

        // Fail on a missing encoder before anything is created on disk.
        SupervisorOptions::new()
            .with_executable(self.config.executable.clone())
            .resolve()?;

        let work_directory = create_session_directory(work_root, &Local::now())?;
        let session = RecordingSession::new(
            url.to_string(),
            work_directory.clone(),
            output_file_name.to_string(),
        );

        let args = CaptureCommandBuilder::new(url)
            .with_segment_time(self.config.segment_time)
            .build();
        let options = self.supervisor_options(&work_directory, self.config.print_messages);
        let handle = Supervisor::new().start_async(args, options)?;

        info!(
            session_id = %session.id,
            url = %url,
            output = %session.output_path().display(),
            "Recording started"
        );

        self.capture = Some(handle);
        self.state = RecorderState::Recording;
        Ok(self.session.insert(session))
    }

    /// Stop the capture and wait until the encoder has exited, so the
    /// manifest is complete. Returns the capture's exit code, or `None` when
    /// nothing was capturing.
    ///
    /// The capture handle is only released once the encoder has exited, so a
    /// stop that is abandoned midway can simply be called again.
    pub async fn stop(&mut self) -> Result<Option<i32>> {
        let Some(handle) = self.capture.as_ref() else {
            return Ok(None);
        };

        self.state = RecorderState::Stopping;
        handle.cancel();

        let poll_interval = self.config.stop_poll_interval();
        while !handle.is_finished() {
            tokio::time::sleep(poll_interval).await;
        }

        let Some(handle) = self.capture.take() else {
            return Ok(None);
        };
        let result = handle.wait().await;
        self.state = RecorderState::Idle;

        let session_id = self.session.as_ref().map(|s| s.id);
        match result {
            Ok(code) => {
                info!(session_id = ?session_id, exit_code = code, "Capture stopped");
                Ok(Some(code))
            }
            Err(e) => {
                error!(session_id = ?session_id, error = %e, "Capture failed");
                Err(e)
            }
        }
    }

    /// Stop the capture, then build the output file from the captured
    /// segments and remove the intermediates.
    pub async fn stop_and_finish(&mut self) -> Result<RecordingSummary> {
        self.stop().await?;

        let session = self.session.clone().ok_or(StreamrecError::NotRecording)?;
        self.state = RecorderState::Finalizing;
        let result = self
            .finalize(&session.work_directory, &session.output_file_name)
            .await;
        self.state = RecorderState::Idle;

        match result {
            Ok(mut summary) => {
                summary.session_id = Some(session.id);
                self.session = None;
                Ok(summary)
            }
            Err(e) => {
                error!(
                    session_id = %session.id,
                    work_directory = %session.work_directory.display(),
                    error = %e,
                    "Finishing recording failed, leaving files in place"
                );
                Err(e)
            }
        }
    }

    /// Build `output_file_name` inside `work_directory` from whatever segments
    /// it holds. Also usable on a directory left behind by an interrupted run.
    pub async fn finalize(
        &self,
        work_directory: &Path,
        output_file_name: &str,
    ) -> Result<RecordingSummary> {
        // The encoder runs inside the directory, so every path handed to it
        // must be absolute.
        let absolute;
        let work_directory = if work_directory.is_relative() {
            absolute = std::env::current_dir()?.join(work_directory);
            absolute.as_path()
        } else {
            work_directory
        };

        let segments = find_segments(work_directory)?;
        let output = work_directory.join(output_file_name);

        let mode = match segments.as_slice() {
            [] => {
                return Err(StreamrecError::NoSegments(
                    work_directory.display().to_string(),
                ))
            }
            [single] => {
                self.convert(work_directory, single, &output).await?;
                FinishMode::Convert
            }
            _ => {
                self.concat(work_directory, &output).await?;
                FinishMode::Concat
            }
        };

        if let Err(e) = clean_intermediates(work_directory) {
            warn!(
                work_directory = %work_directory.display(),
                error = %e,
                "Output written but intermediates could not all be removed"
            );
        }

        info!(
            output = %output.display(),
            mode = %mode,
            segments = segments.len(),
            "Recording finished"
        );

        Ok(RecordingSummary {
            session_id: None,
            work_directory: work_directory.to_path_buf(),
            output,
            mode,
            segment_count: segments.len(),
            completed_at: Utc::now(),
        })
    }

    /// Join all segments listed in the manifest into `output`.
    pub async fn concat(&self, work_directory: &Path, output: &Path) -> Result<()> {
        self.run_phase("concat", concat_args(MANIFEST_FILE, output), work_directory)
            .await
    }

    /// Remux the single segment `input` into `output`.
    pub async fn convert(&self, work_directory: &Path, input: &Path, output: &Path) -> Result<()> {
        self.run_phase("convert", convert_args(input, output), work_directory)
            .await
    }

    async fn run_phase(&self, phase: &str, args: Vec<String>, work_directory: &Path) -> Result<()> {
        // No stdin: an overwrite prompt must fail instead of waiting forever.
        let options = self
            .supervisor_options(work_directory, true)
            .with_quit_command(None);

        info!(phase, work_directory = %work_directory.display(), "Running encoder");
        let code = Supervisor::new().start(args, options).await?;
        if code != 0 {
            return Err(StreamrecError::EncoderFailed {
                phase: phase.to_string(),
                code,
            });
        }
        Ok(())
    }
}
