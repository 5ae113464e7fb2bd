use crate::error::{Result, StreamrecError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the encoder binary looked up on PATH when nothing else is configured
pub const DEFAULT_EXECUTABLE: &str = "ffmpeg";

/// Config file picked up from the current directory
pub const DEFAULT_CONFIG_FILE: &str = "streamrec.toml";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RecorderConfig {
    #[serde(default = "default_executable")]
    pub executable: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_root: Option<PathBuf>,
    #[serde(default)]
    pub print_messages: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_time: Option<u32>,
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    #[serde(default = "default_stop_poll_interval_ms")]
    pub stop_poll_interval_ms: u64,
}

fn default_executable() -> String {
    DEFAULT_EXECUTABLE.to_string()
}

fn default_stop_grace_ms() -> u64 {
    5000
}

fn default_stop_poll_interval_ms() -> u64 {
    300
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            work_root: None,
            print_messages: false,
            segment_time: None,
            stop_grace_ms: default_stop_grace_ms(),
            stop_poll_interval_ms: default_stop_poll_interval_ms(),
        }
    }
}

impl RecorderConfig {
    /// Load the config from `path`, or from `streamrec.toml` in the current
    /// directory when no path is given. A missing default file yields defaults;
    /// a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load_from_path(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            StreamrecError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            StreamrecError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        tracing::debug!(path = %path.display(), "Loaded recorder config");
        Ok(config)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms)
    }

    /// Root under which session directories are created
    pub fn resolve_work_root(&self) -> Result<PathBuf> {
        match &self.work_root {
            Some(root) => Ok(root.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }
}

/// Commented template written by `streamrec init`
pub fn config_template() -> &'static str {
    r#"# streamrec.toml - stream recorder configuration

# Encoder binary. A bare name is looked up on PATH.
executable = "ffmpeg"

# Directory under which timestamped session directories are created.
# Defaults to the current directory.
# work_root = "/var/lib/streamrec"

# Echo every encoder output line to the log.
print_messages = false

# Length of each captured segment in seconds (encoder default when unset).
# segment_time = 10

# Time the encoder gets to quit on its own before it is killed.
stop_grace_ms = 5000

# How often stop() checks whether the capture has exited.
stop_poll_interval_ms = 300
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RecorderConfig::default();
        assert_eq!(config.executable, "ffmpeg");
        assert_eq!(config.work_root, None);
        assert!(!config.print_messages);
        assert_eq!(config.stop_grace(), Duration::from_secs(5));
        assert_eq!(config.stop_poll_interval(), Duration::from_millis(300));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: RecorderConfig = toml::from_str("print_messages = true\n").unwrap();
        assert!(config.print_messages);
        assert_eq!(config.executable, "ffmpeg");
        assert_eq!(config.stop_grace_ms, 5000);
    }

    #[test]
    fn test_template_parses() {
        let config: RecorderConfig = toml::from_str(config_template()).unwrap();
        assert_eq!(config, RecorderConfig::default());
    }

    #[test]
    fn test_load_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streamrec.toml");
        fs::write(
            &path,
            r#"executable = "/opt/ffmpeg/bin/ffmpeg"
work_root = "/srv/recordings"
segment_time = 6
stop_grace_ms = 1500
"#,
        )
        .unwrap();

        let loaded = RecorderConfig::load(Some(&path)).unwrap();
        assert_eq!(
            loaded,
            RecorderConfig {
                executable: "/opt/ffmpeg/bin/ffmpeg".to_string(),
                work_root: Some(PathBuf::from("/srv/recordings")),
                segment_time: Some(6),
                stop_grace_ms: 1500,
                ..Default::default()
            }
        );
        assert_eq!(loaded.stop_grace(), Duration::from_millis(1500));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = RecorderConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(StreamrecError::ConfigError(_))));
    }

    #[test]
    fn test_invalid_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "stop_grace_ms = \"soon\"").unwrap();
        assert!(matches!(
            RecorderConfig::load_from_path(&path),
            Err(StreamrecError::ConfigError(_))
        ));
    }
}
