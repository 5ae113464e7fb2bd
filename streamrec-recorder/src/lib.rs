//! Stream recording on top of the encoder supervisor.
//!
//! * `recorder`: the capture, stop and finish sequence for one session.
//! * `commands`: argument lists for the capture, concat and remux invocations.
//! * `workdir`: session directory naming, segment discovery and cleanup.

pub mod commands;
pub mod recorder;
pub mod workdir;

pub use commands::{concat_args, convert_args, CaptureCommandBuilder};
pub use recorder::Recorder;
pub use workdir::{clean, clean_intermediates, create_session_directory, find_segments};
