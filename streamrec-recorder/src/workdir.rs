//! Session directory layout: `<root>/<yyyyMMddHHmmss>/` holding the segments,
//! the manifest and finally the output file.

use std::fmt::Display;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};
use regex::Regex;
use streamrec_core::{Result, StreamrecError};
use tracing::{debug, info, warn};

/// Whole-name pattern of capture segments
pub const SEGMENT_FILE_PATTERN: &str = r"seg_\d.*\.ts";

/// Whole-name pattern of the segment manifest
pub const MANIFEST_FILE_PATTERN: &str = r"out\.ffcat";

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

pub fn timestamp_name<Tz>(now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    now.format(TIMESTAMP_FORMAT).to_string()
}

/// Create a fresh directory named after `now` under `root`, creating `root`
/// if needed. A name that is already taken gets a `_1`, `_2`, ... suffix.
pub fn create_session_directory<Tz>(root: &Path, now: &DateTime<Tz>) -> Result<PathBuf>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let root = if root.is_relative() {
        std::env::current_dir()
            .map_err(|e| StreamrecError::DirectoryCreation(format!("{}: {}", root.display(), e)))?
            .join(root)
    } else {
        root.to_path_buf()
    };

    fs::create_dir_all(&root)
        .map_err(|e| StreamrecError::DirectoryCreation(format!("{}: {}", root.display(), e)))?;

    let base = timestamp_name(now);
    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            base.clone()
        } else {
            format!("{}_{}", base, attempt)
        };
        let dir = root.join(name);

        match fs::create_dir(&dir) {
            Ok(()) => {
                debug!(path = %dir.display(), "Created session directory");
                return Ok(dir);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists && attempt < 1000 => {
                attempt += 1;
            }
            Err(e) => {
                return Err(StreamrecError::DirectoryCreation(format!(
                    "{}: {}",
                    dir.display(),
                    e
                )));
            }
        }
    }
}

fn compile_whole_name(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|e| StreamrecError::InvalidPattern(format!("{}: {}", pattern, e)))
}

fn matching_files(directory: &Path, pattern: &Regex) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if pattern.is_match(&name.to_string_lossy()) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Capture segments in `directory`, in name order
pub fn find_segments(directory: &Path) -> Result<Vec<PathBuf>> {
    matching_files(directory, &compile_whole_name(SEGMENT_FILE_PATTERN)?)
}

/// Delete every file in `directory` whose whole name matches `pattern`.
/// Returns how many files were removed.
pub fn clean(directory: &Path, pattern: &str) -> Result<usize> {
    let regex = compile_whole_name(pattern)?;
    let files = matching_files(directory, &regex)?;

    let mut removed = 0;
    for file in &files {
        match fs::remove_file(file) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    debug!(directory = %directory.display(), pattern, removed, "Cleaned files");
    Ok(removed)
}

/// Remove segments and manifest. Both patterns are attempted even if the
/// first fails; the first error is returned.
pub fn clean_intermediates(directory: &Path) -> Result<usize> {
    let mut removed = 0;
    let mut first_error = None;

    for pattern in [SEGMENT_FILE_PATTERN, MANIFEST_FILE_PATTERN] {
        match clean(directory, pattern) {
            Ok(count) => removed += count,
            Err(e) => {
                warn!(directory = %directory.display(), pattern, error = %e, "Cleanup failed");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => {
            info!(directory = %directory.display(), removed, "Removed intermediate files");
            Ok(removed)
        }
    }
}
