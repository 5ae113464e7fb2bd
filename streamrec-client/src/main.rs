use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use streamrec_core::{config_template, RecorderConfig, RecordingSummary, DEFAULT_CONFIG_FILE};
use streamrec_recorder::{clean, clean_intermediates, Recorder};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "streamrec")]
#[command(about = "Record a network stream to a file with ffmpeg", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a config file (defaults to ./streamrec.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Encoder executable, overriding the config file
    #[arg(long, global = true)]
    ffmpeg: Option<String>,

    /// Echo every encoder output line
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a stream until the duration elapses or Ctrl-C
    Record {
        /// Stream URL (anything ffmpeg accepts as input)
        url: String,

        /// Name of the final file inside the session directory
        #[arg(short, long, default_value = "output.mp4")]
        output: String,

        /// Directory under which the session directory is created
        #[arg(long)]
        root: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,

        /// Segment length in seconds
        #[arg(long)]
        segment_time: Option<u32>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Build the output file from an existing session directory
    Finish {
        /// Session directory holding seg_*.ts and out.ffcat
        dir: PathBuf,

        /// Name of the final file inside the directory
        #[arg(short, long, default_value = "output.mp4")]
        output: String,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove intermediate files from a session directory
    Clean {
        /// Session directory
        dir: PathBuf,

        /// Remove files whose whole name matches this regex instead
        #[arg(short, long)]
        pattern: Option<String>,
    },

    /// Generate a streamrec.toml template
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(rust_log.as_deref(), cli.verbose))
        .init();

    match cli.command {
        Commands::Init => {
            generate_config_template()?;
        }
        Commands::Record { url, output, root, duration, segment_time, json } => {
            let mut config = load_config(cli.config.as_deref(), cli.ffmpeg, cli.verbose)?;
            if segment_time.is_some() {
                config.segment_time = segment_time;
            }
            record(config, &url, &output, root, duration, json).await?;
        }
        Commands::Finish { dir, output, json } => {
            let config = load_config(cli.config.as_deref(), cli.ffmpeg, cli.verbose)?;
            let summary = Recorder::new(config)
                .finalize(&dir, &output)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to finish {}: {}", dir.display(), e))?;
            print_summary(&summary, json)?;
        }
        Commands::Clean { dir, pattern } => {
            let removed = match pattern {
                Some(pattern) => clean(&dir, &pattern)?,
                None => clean_intermediates(&dir)?,
            };
            println!("✓ Removed {} file(s) from {}", removed, dir.display());
        }
    }

    Ok(())
}

/// `RUST_LOG` wins when it is set and valid. Otherwise encoder output echoed
/// at info level is shown only with `--verbose`.
fn log_filter(rust_log: Option<&str>, verbose: bool) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(if verbose { "info" } else { "warn" }))
}

fn load_config(
    path: Option<&Path>,
    ffmpeg: Option<String>,
    verbose: bool,
) -> anyhow::Result<RecorderConfig> {
    let mut config = RecorderConfig::load(path)?;
    if let Some(executable) = ffmpeg {
        config.executable = executable;
    }
    if verbose {
        config.print_messages = true;
    }
    Ok(config)
}

async fn record(
    config: RecorderConfig,
    url: &str,
    output: &str,
    root: Option<PathBuf>,
    duration: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let root = match root {
        Some(root) => root,
        None => config.resolve_work_root()?,
    };

    let mut recorder = Recorder::new(config);
    let session = recorder
        .start_record(url, &root, output)
        .map_err(|e| anyhow::anyhow!("Failed to start recording: {}", e))?;

    println!("● Recording {}", url);
    println!("  Session:   {}", session.id);
    println!("  Directory: {}", session.work_directory.display());
    match duration {
        Some(secs) => println!("  Stopping after {}s (Ctrl-C to stop early)", secs),
        None => println!("  Press Ctrl-C to stop"),
    }

    tokio::select! {
        _ = wait_for(duration) => {
            info!("Recording duration reached");
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Interrupted, stopping recording");
        }
        _ = capture_ended(&recorder) => {
            eprintln!("Encoder exited on its own, finishing what was captured");
        }
    }

    println!("■ Stopping...");
    let summary = recorder.stop_and_finish().await.map_err(|e| {
        let dir = recorder
            .current_work_directory()
            .map(|d| d.display().to_string())
            .unwrap_or_default();
        anyhow::anyhow!("Failed to finish recording: {} (files left in {})", e, dir)
    })?;

    print_summary(&summary, json)
}

async fn wait_for(duration: Option<u64>) {
    match duration {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => std::future::pending().await,
    }
}

async fn capture_ended(recorder: &Recorder) {
    while recorder.is_capturing() {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

fn print_summary(summary: &RecordingSummary, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("✓ Recording saved: {}", summary.output.display());
    println!("  Mode:     {}", summary.mode);
    println!("  Segments: {}", summary.segment_count);
    if let Some(id) = summary.session_id {
        println!("  Session:  {}", id);
    }
    Ok(())
}

fn generate_config_template() -> anyhow::Result<()> {
    let path = DEFAULT_CONFIG_FILE;
    if Path::new(path).exists() {
        eprintln!("Error: {} already exists", path);
        eprintln!("Remove it first or edit it in place.");
        process::exit(1);
    }

    fs::write(path, config_template())?;
    println!("✓ Created config template at {}", path);
    Ok(())
}
