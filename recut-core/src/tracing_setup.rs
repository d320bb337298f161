//! Tracing setup for Recut
//!
//! Console output follows the level the user picked; a second layer writes
//! every event at trace level to a per-run log file so that stage-by-stage
//! pipeline activity can be inspected after an export fails.

use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

use tracing::{Level, Span};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};
use uuid::Uuid;

/// Log file written for each run, overwriting the previous one.
pub const LOG_FILE_NAME: &str = "recut-last-run.log";

/// Where and how verbosely to log.
#[derive(Debug, Clone)]
pub struct TracingOptions {
    pub console_level: Level,
    pub logs_dir: PathBuf,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            console_level: Level::INFO,
            logs_dir: PathBuf::from("logs"),
        }
    }
}

/// Initialize tracing with a console layer and a full-detail file layer.
///
/// `RUST_LOG` overrides the console level when set. Returns the path of the
/// log file.
///
/// # Errors
///
/// - `std::io::Error` - If the logs directory or log file cannot be created
pub fn init_tracing(options: &TracingOptions) -> Result<PathBuf, std::io::Error> {
    create_dir_all(&options.logs_dir)?;
    let log_file_path = options.logs_dir.join(LOG_FILE_NAME);
    let log_file = File::create(&log_file_path)?;

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.console_level.to_string()));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(console_filter);

    // Codec and frame-processor threads are named, keep them in the file log
    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(EnvFilter::new("trace"));

    // A second init (e.g. from tests) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init();

    tracing::info!(
        "Tracing initialized: console={}, debug_file={}",
        options.console_level,
        log_file_path.display()
    );

    Ok(log_file_path)
}

/// Span wrapping everything one export does, keyed by its identifier.
pub fn export_span(export_id: Uuid, output: &Path) -> Span {
    tracing::info_span!("export", id = %export_id, output = %output.display())
}

/// CLI log levels for user control
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Only error messages
    Error,
    /// Warning and error messages
    Warn,
    /// Progress, fallback and result messages
    Info,
    /// Stage lifecycle and codec selection
    Debug,
    /// Per-sample pipeline activity
    Trace,
}

impl CliLogLevel {
    /// Converts the CLI level to a tracing level.
    ///
    /// # Examples
    /// ```
    /// use recut_core::tracing_setup::CliLogLevel;
    ///
    /// assert_eq!(CliLogLevel::Debug.as_tracing_level(), tracing::Level::DEBUG);
    /// ```
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tracing_level().as_str())
    }
}
