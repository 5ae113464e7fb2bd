use std::path::Path;

/// Numbered output pattern for captured segments
pub const SEGMENT_OUTPUT_PATTERN: &str = "seg_%03d.ts";

/// Segment list written during capture and read back by concat
pub const MANIFEST_FILE: &str = "out.ffcat";

/// Arguments for the segment-capture invocation: stream-copy the input into
/// numbered segments plus a manifest, all relative to the work directory.
#[derive(Debug, Clone)]
pub struct CaptureCommandBuilder {
    url: String,
    segment_time: Option<u32>,
    segment_list: String,
    output_pattern: String,
}

impl CaptureCommandBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            segment_time: None,
            segment_list: MANIFEST_FILE.to_string(),
            output_pattern: SEGMENT_OUTPUT_PATTERN.to_string(),
        }
    }

    pub fn with_segment_time(mut self, seconds: Option<u32>) -> Self {
        self.segment_time = seconds;
        self
    }

    pub fn build(&self) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(), self.url.clone(),
            "-c".to_string(), "copy".to_string(),
            "-f".to_string(), "segment".to_string(),
        ];

        if let Some(seconds) = self.segment_time {
            args.push("-segment_time".to_string());
            args.push(seconds.to_string());
        }

        args.extend([
            "-segment_list".to_string(), self.segment_list.clone(),
            self.output_pattern.clone(),
        ]);

        args
    }
}

/// Join the segments listed in `manifest` into `output` without re-encoding.
pub fn concat_args(manifest: &str, output: &Path) -> Vec<String> {
    vec![
        "-f".to_string(), "concat".to_string(),
        "-i".to_string(), manifest.to_string(),
        "-c".to_string(), "copy".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// Remux a single segment into `output`, keeping every stream.
pub fn convert_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-i".to_string(), input.to_string_lossy().to_string(),
        "-map".to_string(), "0".to_string(),
        "-c".to_string(), "copy".to_string(),
        output.to_string_lossy().to_string(),
    ]
}
