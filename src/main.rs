//! pqscope - trigger and framing engine
//!
//! Reads `v i p leakage` sample lines from stdin (or a named pipe) and
//! writes trigger-anchored frames to stdout for the display process.
//! Logs go to stderr so they never mix with frame data.

use anyhow::{Context, Result};
use clap::Parser;
use pqscope::scope::config::{notification_channel, ConfigPort};
use pqscope::scope::output::{FrameWriter, OutputFormat};
use pqscope::settings::{JsonSettingsFile, SettingsWatcher};
use pqscope::{Engine, Settings, DEFAULT_CAPACITY};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Output buffer size; frames are flushed explicitly when the stream goes idle
const OUTPUT_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Parser, Debug)]
#[command(name = "pqscope")]
#[command(version = pqscope::VERSION)]
#[command(about = "Oscilloscope-style trigger and framing for power-quality samples", long_about = None)]
struct Cli {
    /// Settings file (JSON); defaults to the user config directory
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Sample input (file or named pipe); defaults to stdin
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output line format
    #[arg(short, long, value_enum, default_value_t = Format::Raw)]
    format: Format,

    /// Ring buffer capacity in samples
    #[arg(short, long, default_value_t = DEFAULT_CAPACITY)]
    capacity: usize,

    /// Do not reload settings when the file changes
    #[arg(long)]
    no_watch: bool,

    /// Print the default settings as JSON and exit
    #[arg(long)]
    print_default_settings: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum Format {
    Raw,
    Pixels,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Raw => OutputFormat::Raw,
            Format::Pixels => OutputFormat::Pixels,
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Initialize logging (stderr, stdout carries frames)
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pqscope=info".parse()?)
                .add_directive("pqscope_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    if cli.print_default_settings {
        let json = serde_json::to_string_pretty(&Settings::default())?;
        println!("{}", json);
        return Ok(());
    }

    info!(
        version = pqscope::VERSION,
        build_date = pqscope::BUILD_DATE,
        "pqscope starting"
    );

    let settings_path = cli.settings.unwrap_or_else(JsonSettingsFile::default_path);
    let settings_file = JsonSettingsFile::new(&settings_path);

    let (notifier, notifications) = notification_channel();
    let _watcher = if cli.no_watch {
        None
    } else {
        match SettingsWatcher::start(&settings_path, notifier) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(error = %e, "Settings watcher unavailable, reload disabled");
                None
            }
        }
    };

    let port = ConfigPort::new(settings_file, Some(notifications), cli.capacity);

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let mut engine = Engine::new(port)?.with_shutdown(shutdown);

    let input: Box<dyn BufRead> = match &cli.input {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open input {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(io::stdin().lock()),
    };

    let stdout = io::stdout().lock();
    let mut out = FrameWriter::new(
        BufWriter::with_capacity(OUTPUT_BUFFER_SIZE, stdout),
        cli.format.into(),
    );

    let stats = engine.run(input, &mut out)?;
    out.into_inner().flush()?;

    info!(
        lines = stats.lines_read,
        frames = stats.frames_emitted,
        "pqscope finished"
    );
    Ok(())
}
