//! Encoder Process Supervisor
//!
//! A [`Supervisor`] owns exactly one child process lifetime. It:
//! 1. Resolves options and spawns the child via [`ProcessHandle`].
//! 2. Drains stdout and stderr in one `select!` loop, neither starving the other.
//! 3. Treats process exit, not stream closure, as the end of the run.
//! 4. Turns [`Supervisor::stop`] into a graceful quit followed by a kill.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use streamrec_core::{OutputLine, OutputStream, Result, StreamrecError};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, trace, warn};

use crate::lines::LineReader;
use crate::process::{normalize_command_line, ProcessHandle, ResolvedOptions, SupervisorOptions};

/// Exit code reported when the process was ended by a signal
pub const SIGNAL_EXIT_CODE: i32 = -1;

/// Upper bound on reading leftover output once the process has exited.
/// Grandchildren holding the pipes open must not keep the run alive.
const FINAL_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SupervisorState {
    Idle,
    Running { pid: Option<u32> },
    Finished { exit_code: Option<i32> },
}

struct Inner {
    state: Mutex<SupervisorState>,
    cancel: watch::Sender<bool>,
    output: Option<mpsc::UnboundedSender<OutputLine>>,
}

/// Supervises a single encoder process.
///
/// Clones share the same process, so one clone can `stop()` while another is
/// awaiting `start()`.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A supervisor that also forwards every drained line to `output`.
    pub fn with_output(output: mpsc::UnboundedSender<OutputLine>) -> Self {
        Self::build(Some(output))
    }

    fn build(output: Option<mpsc::UnboundedSender<OutputLine>>) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SupervisorState::Idle),
                cancel,
                output,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SupervisorState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run the process to completion and return its exit code.
    pub async fn start(&self, args: Vec<String>, options: SupervisorOptions) -> Result<i32> {
        let cancel_rx = self.claim()?;
        self.run(args, options, cancel_rx).await
    }

    /// Run the process on a fresh worker task. Must be called from within a
    /// tokio runtime.
    pub fn start_async(&self, args: Vec<String>, options: SupervisorOptions) -> Result<ExitHandle> {
        let cancel_rx = self.claim()?;
        let supervisor = self.clone();
        let join = tokio::spawn(async move { supervisor.run(args, options, cancel_rx).await });

        Ok(ExitHandle {
            join,
            supervisor: self.clone(),
        })
    }

    /// Request termination of the live process, if any, and return at once.
    pub fn stop(&self) {
        let state = self.lock_state();
        let SupervisorState::Running { pid } = *state else {
            debug!("Stop requested but no process is running");
            return;
        };

        if self.inner.cancel.send_replace(true) {
            debug!(pid = ?pid, "Stop already requested");
        } else {
            info!(pid = ?pid, "Stop requested");
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lock_state(), SupervisorState::Running { .. })
    }

    /// Exit code of the finished process
    pub fn exit_code(&self) -> Option<i32> {
        match *self.lock_state() {
            SupervisorState::Finished { exit_code } => exit_code,
            _ => None,
        }
    }

    pub fn process_id(&self) -> Option<u32> {
        match *self.lock_state() {
            SupervisorState::Running { pid } => pid,
            _ => None,
        }
    }

    fn claim(&self) -> Result<watch::Receiver<bool>> {
        let mut state = self.lock_state();
        match *state {
            SupervisorState::Idle => {
                *state = SupervisorState::Running { pid: None };
                Ok(self.inner.cancel.subscribe())
            }
            SupervisorState::Running { .. } => Err(StreamrecError::AlreadyRunning),
            SupervisorState::Finished { .. } => Err(StreamrecError::SupervisorSpent),
        }
    }

    fn set_pid(&self, pid: Option<u32>) {
        let mut state = self.lock_state();
        if let SupervisorState::Running { .. } = *state {
            *state = SupervisorState::Running { pid };
        }
    }

    fn mark_finished(&self, exit_code: Option<i32>) {
        *self.lock_state() = SupervisorState::Finished { exit_code };
    }

    async fn run(
        &self,
        args: Vec<String>,
        options: SupervisorOptions,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<i32> {
        let result = self.supervise(args, options, cancel_rx).await;
        self.mark_finished(result.as_ref().ok().copied());
        result
    }

    async fn supervise(
        &self,
        args: Vec<String>,
        options: SupervisorOptions,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> Result<i32> {
        let options = options.resolve()?;
        let command_line = normalize_command_line(&options.executable_name, &args);

        let mut process = ProcessHandle::spawn(&command_line, &options)?;
        let pid = process.id();
        self.set_pid(pid);

        info!(
            pid = ?pid,
            executable = %process.executable().display(),
            work_directory = %process.work_directory().display(),
            args = %process.args().join(" "),
            "Started encoder process"
        );

        let mut stdin = process.take_stdin();
        let mut stdout = process.take_stdout().map(LineReader::new);
        let mut stderr = process.take_stderr().map(LineReader::new);

        let mut stop_requested = false;
        let mut kill_at: Option<Instant> = None;
        let mut killed = false;

        let exit_code = loop {
            tokio::select! {
                line = next_line(&mut stdout), if stdout.is_some() => {
                    if !self.handle_line(OutputStream::Stdout, line, &options) {
                        stdout = None;
                    }
                }
                line = next_line(&mut stderr), if stderr.is_some() => {
                    if !self.handle_line(OutputStream::Stderr, line, &options) {
                        stderr = None;
                    }
                }
                _ = cancel_rx.changed(), if !stop_requested => {
                    stop_requested = true;
                    let quit_sent = match (stdin.as_mut(), options.quit_command.as_deref()) {
                        (Some(stdin), Some(command)) => send_quit(stdin, command).await,
                        _ => false,
                    };

                    if quit_sent {
                        debug!(pid = ?pid, grace = ?options.stop_grace, "Sent quit command to encoder");
                        kill_at = Some(Instant::now() + options.stop_grace);
                    } else {
                        info!(pid = ?pid, "Killing encoder process");
                        if let Err(e) = process.start_kill() {
                            warn!(pid = ?pid, error = %e, "Failed to kill encoder process");
                        }
                        killed = true;
                    }
                }
                _ = sleep_until(kill_at.unwrap_or_else(Instant::now)), if kill_at.is_some() && !killed => {
                    killed = true;
                    if matches!(process.is_alive(), Ok(false)) {
                        continue;
                    }
                    warn!(pid = ?pid, grace = ?options.stop_grace, "Encoder ignored quit command, killing it");
                    if let Err(e) = process.start_kill() {
                        warn!(pid = ?pid, error = %e, "Failed to kill encoder process");
                    }
                }
                status = process.wait(SIGNAL_EXIT_CODE) => {
                    break status?;
                }
            }
        };

        let drain = async {
            while stdout.is_some() || stderr.is_some() {
                tokio::select! {
                    line = next_line(&mut stdout), if stdout.is_some() => {
                        if !self.handle_line(OutputStream::Stdout, line, &options) {
                            stdout = None;
                        }
                    }
                    line = next_line(&mut stderr), if stderr.is_some() => {
                        if !self.handle_line(OutputStream::Stderr, line, &options) {
                            stderr = None;
                        }
                    }
                }
            }
        };
        if timeout(FINAL_DRAIN_TIMEOUT, drain).await.is_err() {
            warn!(pid = ?pid, "Output streams still open after exit, no longer reading them");
        }

        info!(
            pid = ?pid,
            exit_code = ?process.exit_code(),
            stopped = stop_requested,
            "Encoder process exited"
        );
        Ok(exit_code)
    }

    /// Log and forward one read result. Returns false once the stream is done.
    fn handle_line(
        &self,
        stream: OutputStream,
        line: std::io::Result<Option<String>>,
        options: &ResolvedOptions,
    ) -> bool {
        match line {
            Ok(Some(text)) => {
                if options.print_messages {
                    info!(stream = %stream, "{} {}", stream.prefix(), text);
                } else {
                    trace!(stream = %stream, "{}", text);
                }
                if let Some(output) = &self.inner.output {
                    let _ = output.send(OutputLine::new(stream, text));
                }
                true
            }
            Ok(None) => {
                debug!(stream = %stream, "Encoder output stream closed");
                false
            }
            Err(e) => {
                warn!(stream = %stream, error = %e, "Failed to read encoder output, treating stream as closed");
                false
            }
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

async fn next_line<R: AsyncRead + Unpin>(
    reader: &mut Option<LineReader<R>>,
) -> std::io::Result<Option<String>> {
    match reader {
        Some(reader) => reader.next_line().await,
        None => std::future::pending().await,
    }
}

async fn send_quit(stdin: &mut ChildStdin, command: &str) -> bool {
    let payload = format!("{}\n", command);
    match stdin.write_all(payload.as_bytes()).await {
        Ok(()) => stdin.flush().await.is_ok(),
        Err(e) => {
            debug!(error = %e, "Could not write quit command");
            false
        }
    }
}

/// Handle to a process started with [`Supervisor::start_async`]
pub struct ExitHandle {
    join: JoinHandle<Result<i32>>,
    supervisor: Supervisor,
}

impl ExitHandle {
    /// Whether the worker has completed and `wait` will not block
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Same as [`Supervisor::stop`]
    pub fn cancel(&self) {
        self.supervisor.stop();
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub async fn wait(self) -> Result<i32> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => {
                self.supervisor.mark_finished(None);
                Err(StreamrecError::WorkerError(e.to_string()))
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    fn sh_options() -> SupervisorOptions {
        SupervisorOptions::new()
            .with_executable("sh")
            .with_stop_grace(Duration::from_millis(300))
    }

    fn collect(rx: &mut mpsc::UnboundedReceiver<OutputLine>, stream: OutputStream) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            if line.stream == stream {
                lines.push(line.text);
            }
        }
        lines
    }

    #[tokio::test]
    async fn test_start_returns_exit_code() {
        let supervisor = Supervisor::new();
        let code = supervisor.start(shell("exit 3"), sh_options()).await.unwrap();
        assert_eq!(code, 3);
        assert_eq!(supervisor.exit_code(), Some(3));
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_missing_executable_is_start_failure() {
        let supervisor = Supervisor::new();
        let options = SupervisorOptions::new().with_executable("/nonexistent/streamrec/ffmpeg");
        let result = supervisor.start(vec!["-version".to_string()], options).await;
        assert!(matches!(result, Err(StreamrecError::StartFailure(_))));
        assert!(!supervisor.is_running());
        assert_eq!(supervisor.exit_code(), None);
    }

    #[tokio::test]
    async fn test_missing_work_directory_is_start_failure() {
        let dir = tempfile::tempdir().unwrap();
        let options = sh_options().with_work_directory(dir.path().join("gone"));
        let result = Supervisor::new().start(shell("true"), options).await;
        assert!(matches!(result, Err(StreamrecError::StartFailure(_))));
    }

    #[tokio::test]
    async fn test_runs_in_work_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor::with_output(tx);
        let options = sh_options().with_work_directory(dir.path());
        supervisor.start(shell("pwd -P"), options).await.unwrap();

        let lines = collect(&mut rx, OutputStream::Stdout);
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(lines, vec![expected.to_string_lossy().to_string()]);
    }

    #[tokio::test]
    async fn test_drains_both_streams_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor::with_output(tx);
        let script = "echo out1; echo err1 >&2; echo; echo out2; echo err2 >&2";
        let code = supervisor.start(shell(script), sh_options()).await.unwrap();
        assert_eq!(code, 0);

        let mut all = Vec::new();
        while let Ok(line) = rx.try_recv() {
            all.push(line);
        }
        let stdout: Vec<_> = all
            .iter()
            .filter(|l| l.stream == OutputStream::Stdout)
            .map(|l| l.text.as_str())
            .collect();
        let stderr: Vec<_> = all
            .iter()
            .filter(|l| l.stream == OutputStream::Stderr)
            .map(|l| l.text.as_str())
            .collect();
        assert_eq!(stdout, vec!["out1", "", "out2"]);
        assert_eq!(stderr, vec!["err1", "err2"]);
    }

    #[tokio::test]
    async fn test_large_stderr_does_not_stall_stdout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor::with_output(tx);
        let script = "i=0; while [ $i -lt 5000 ]; do echo progress-line-$i >&2; i=$((i+1)); done; echo finished";
        let code = supervisor.start(shell(script), sh_options()).await.unwrap();
        assert_eq!(code, 0);
        assert_eq!(collect(&mut rx, OutputStream::Stdout), vec!["finished"]);
    }

    #[tokio::test]
    async fn test_waits_for_exit_after_streams_close() {
        let supervisor = Supervisor::new();
        let started = std::time::Instant::now();
        let code = supervisor
            .start(shell("exec >&- 2>&-; sleep 1; exit 4"), sh_options())
            .await
            .unwrap();
        assert_eq!(code, 4);
        assert!(started.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_while_running() {
        let supervisor = Supervisor::new();
        let handle = supervisor
            .start_async(shell("sleep 30"), sh_options())
            .unwrap();
        assert!(supervisor.is_running());

        let again = supervisor.start_async(shell("true"), sh_options());
        assert!(matches!(again, Err(StreamrecError::AlreadyRunning)));
        let blocking = supervisor.start(shell("true"), sh_options()).await;
        assert!(matches!(blocking, Err(StreamrecError::AlreadyRunning)));

        supervisor.stop();
        let code = handle.wait().await.unwrap();
        assert_eq!(code, SIGNAL_EXIT_CODE);
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_finished_supervisor_cannot_restart() {
        let supervisor = Supervisor::new();
        supervisor.start(shell("true"), sh_options()).await.unwrap();
        let result = supervisor.start(shell("true"), sh_options()).await;
        assert!(matches!(result, Err(StreamrecError::SupervisorSpent)));
    }

    #[tokio::test]
    async fn test_stop_sends_quit_command_first() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor::with_output(tx);
        let options = sh_options().with_stop_grace(Duration::from_secs(10));
        let handle = supervisor
            .start_async(shell("read key; echo \"quit:$key\"; exit 0"), options)
            .unwrap();

        handle.cancel();
        let code = handle.wait().await.unwrap();
        assert_eq!(code, 0);
        assert_eq!(collect(&mut rx, OutputStream::Stdout), vec!["quit:q"]);
    }

    #[tokio::test]
    async fn test_stop_without_quit_command_kills() {
        let supervisor = Supervisor::new();
        let options = sh_options()
            .with_quit_command(None)
            .with_stop_grace(Duration::from_secs(30));
        let handle = supervisor.start_async(shell("sleep 30"), options).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let started = std::time::Instant::now();
        supervisor.stop();
        assert_eq!(handle.wait().await.unwrap(), SIGNAL_EXIT_CODE);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_stop_is_a_noop_when_idle_or_finished() {
        let supervisor = Supervisor::new();
        supervisor.stop();
        supervisor.stop();
        assert!(!supervisor.is_running());
        assert_eq!(supervisor.exit_code(), None);

        supervisor.start(shell("exit 0"), sh_options()).await.unwrap();
        supervisor.stop();
        assert_eq!(supervisor.exit_code(), Some(0));
    }

    #[tokio::test]
    async fn test_concurrent_stop_calls() {
        let supervisor = Supervisor::new();
        let handle = supervisor
            .start_async(shell("sleep 30"), sh_options())
            .unwrap();

        let first = supervisor.clone();
        let second = supervisor.clone();
        let a = tokio::spawn(async move { first.stop() });
        let b = tokio::spawn(async move { second.stop() });
        a.await.unwrap();
        b.await.unwrap();

        assert_eq!(handle.wait().await.unwrap(), SIGNAL_EXIT_CODE);
        supervisor.stop();
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_process_id_visible_while_running() {
        let supervisor = Supervisor::new();
        let handle = supervisor
            .start_async(shell("sleep 30"), sh_options())
            .unwrap();

        let mut pid = None;
        for _ in 0..50 {
            pid = supervisor.process_id();
            if pid.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(pid.is_some());

        handle.cancel();
        handle.wait().await.unwrap();
        assert_eq!(supervisor.process_id(), None);
    }
}
