//! Supervision of a single external encoder process.
//!
//! * `supervisor`: spawns the child, drains its output and handles stop requests.
//! * `process`: options, command-line normalization and the owned child handle.
//! * `lines`: cancel-safe line splitting for the child's output pipes.

pub mod lines;
pub mod process;
pub mod supervisor;

pub use process::{normalize_command_line, ProcessHandle, ResolvedOptions, SupervisorOptions};
pub use supervisor::{ExitHandle, Supervisor, SIGNAL_EXIT_CODE};
