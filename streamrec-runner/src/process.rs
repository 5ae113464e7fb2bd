use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use streamrec_core::{Result, StreamrecError, DEFAULT_EXECUTABLE};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

/// Key the encoder treats as an interactive quit request
pub const DEFAULT_QUIT_COMMAND: &str = "q";

/// Options for one supervised invocation.
///
/// Unset fields are filled in by [`SupervisorOptions::resolve`] when the
/// invocation starts; the caller's value is never mutated afterwards.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub work_directory: Option<PathBuf>,
    pub print_messages: bool,
    pub executable_path: Option<String>,
    /// How long a graceful quit may take before the process is killed
    pub stop_grace: Duration,
    /// Written to stdin on stop. `None` closes stdin and stop kills outright.
    pub quit_command: Option<String>,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            work_directory: None,
            print_messages: false,
            executable_path: None,
            stop_grace: Duration::from_secs(5),
            quit_command: Some(DEFAULT_QUIT_COMMAND.to_string()),
        }
    }
}

impl SupervisorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_work_directory<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.work_directory = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_print_messages(mut self, print: bool) -> Self {
        self.print_messages = print;
        self
    }

    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.executable_path = Some(executable.into());
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_quit_command(mut self, command: Option<String>) -> Self {
        self.quit_command = command;
        self
    }

    /// Fill in defaults and locate the executable.
    pub fn resolve(self) -> Result<ResolvedOptions> {
        let work_directory = match self.work_directory {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        let executable_name = self
            .executable_path
            .unwrap_or_else(|| DEFAULT_EXECUTABLE.to_string());
        let executable = resolve_executable(&executable_name)?;

        Ok(ResolvedOptions {
            work_directory,
            print_messages: self.print_messages,
            executable_name,
            executable,
            stop_grace: self.stop_grace,
            quit_command: self.quit_command,
        })
    }
}

/// [`SupervisorOptions`] with every default applied
#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    pub work_directory: PathBuf,
    pub print_messages: bool,
    /// The executable as configured, used to recognise it in argument lists
    pub executable_name: String,
    /// Where the executable was actually found
    pub executable: PathBuf,
    pub stop_grace: Duration,
    pub quit_command: Option<String>,
}

fn has_path_separator(name: &str) -> bool {
    name.contains('/') || name.contains(std::path::MAIN_SEPARATOR)
}

/// A bare name is looked up on PATH; a name with a separator must point at an
/// existing executable file. The result is always absolute, so it still
/// names the same file once the child runs in another directory.
fn resolve_executable(name: &str) -> Result<PathBuf> {
    if name.is_empty() {
        return Err(StreamrecError::StartFailure(
            "empty executable name".to_string(),
        ));
    }

    let found = which::which(name).map_err(|e| {
        if has_path_separator(name) {
            StreamrecError::StartFailure(format!("{} is not an executable file: {}", name, e))
        } else {
            StreamrecError::StartFailure(format!("{} not found on PATH: {}", name, e))
        }
    })?;

    if found.is_absolute() {
        Ok(found)
    } else {
        Ok(std::env::current_dir()?.join(found))
    }
}

fn strip_exe_suffix(name: &str) -> &str {
    name.strip_suffix(".exe").unwrap_or(name)
}

fn file_name(name: &str) -> &str {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name)
}

/// Whether `candidate` already names `executable`, exactly, up to an `.exe`
/// suffix, or as the same file name when one side is a full path.
fn names_executable(candidate: &str, executable: &str) -> bool {
    if candidate == executable || strip_exe_suffix(candidate) == strip_exe_suffix(executable) {
        return true;
    }
    if has_path_separator(candidate) || has_path_separator(executable) {
        return strip_exe_suffix(file_name(candidate)) == strip_exe_suffix(file_name(executable));
    }
    false
}

/// Produce the full command line for `executable`.
///
/// Callers may pass either bare arguments or a command line that already
/// starts with the executable; the executable ends up first exactly once.
pub fn normalize_command_line(executable: &str, args: &[String]) -> Vec<String> {
    match args.first() {
        None => vec![executable.to_string()],
        Some(first) if names_executable(first, executable) => args.to_vec(),
        Some(_) => {
            let mut command_line = Vec::with_capacity(args.len() + 1);
            command_line.push(executable.to_string());
            command_line.extend(args.iter().cloned());
            command_line
        }
    }
}

/// One spawned child process and what it was started with
#[derive(Debug)]
pub struct ProcessHandle {
    executable: PathBuf,
    args: Vec<String>,
    work_directory: PathBuf,
    child: Child,
    exit_code: Option<i32>,
}

impl ProcessHandle {
    /// Spawn `command_line` (whose first element names the executable) with
    /// piped output streams.
    pub fn spawn(command_line: &[String], options: &ResolvedOptions) -> Result<Self> {
        let args: Vec<String> = command_line.iter().skip(1).cloned().collect();
        let stdin = if options.quit_command.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        };

        let child = Command::new(&options.executable)
            .args(&args)
            .current_dir(&options.work_directory)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                StreamrecError::StartFailure(format!(
                    "{} (in {}): {}",
                    options.executable.display(),
                    options.work_directory.display(),
                    e
                ))
            })?;

        Ok(Self {
            executable: options.executable.clone(),
            args,
            work_directory: options.work_directory.clone(),
            child,
            exit_code: None,
        })
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn work_directory(&self) -> &Path {
        &self.work_directory
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Present only once the process has been reaped
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Non-blocking liveness check
    pub fn is_alive(&mut self) -> Result<bool> {
        Ok(self.child.try_wait()?.is_none())
    }

    /// Send a kill signal without waiting for the process to go away.
    pub fn start_kill(&mut self) -> Result<()> {
        self.child.start_kill()?;
        Ok(())
    }

    /// Wait for exit and record the exit code. A signal death maps to `signal_code`.
    pub async fn wait(&mut self, signal_code: i32) -> Result<i32> {
        let status = self.child.wait().await?;
        let code = status.code().unwrap_or(signal_code);
        self.exit_code = Some(code);
        Ok(code)
    }
}
