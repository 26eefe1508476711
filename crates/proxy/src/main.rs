//! PTY Session Proxy
//!
//! Reads JSON commands from standard input, one per line, and runs the
//! requested programs on pseudo-terminals. Replies and session output are
//! written to standard output, one JSON document per line.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use proxy::config::{Config, LoggingConfig, SessionConfig};
use proxy::dispatcher::DEFAULT_ACTIVITY_CAPACITY;
use proxy::{spawn_line_reader, Dispatcher, ReplyWriter};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Exit status after a terminate command or the end of input.
const EXIT_OK: i32 = 0;
/// Exit status after a protocol fault or a broken output stream.
const EXIT_FAULT: i32 = 1;

/// PTY Session Proxy - runs programs on pseudo-terminals for a controller.
#[derive(Parser, Debug)]
#[command(name = "pty-proxy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (same as --log-level debug)
    #[arg(short, long)]
    pub verbose: bool,

    /// Logging level: trace, debug, info, warn or error
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Write logs to this file instead of standard error
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Replies that may queue between sessions and the dispatcher
    #[arg(long, value_name = "N", default_value_t = DEFAULT_ACTIVITY_CAPACITY)]
    pub activity_capacity: usize,
}

impl Cli {
    /// Builds the runtime configuration from the parsed flags.
    pub fn into_config(self) -> Config {
        let level = if self.verbose {
            "debug".to_string()
        } else {
            self.log_level
        };
        Config {
            logging: LoggingConfig {
                level,
                file: self.log_file,
            },
            session: SessionConfig {
                activity_capacity: self.activity_capacity,
            },
        }
    }
}

/// Installs the global subscriber. The returned guard flushes the log file
/// when dropped.
fn init_tracing(config: &Config) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(config.filter_directive())
        .with_context(|| format!("invalid log filter '{}'", config.logging.level))?;

    match &config.logging.file {
        Some(path) => {
            let directory = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let file_name = path
                .file_name()
                .with_context(|| format!("log file has no name: {}", path.display()))?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    let commands = spawn_line_reader(tokio::io::stdin());
    let mut writer = ReplyWriter::new(tokio::io::stdout());
    let (dispatcher, activity) = Dispatcher::with_capacity(config.session.activity_capacity);

    dispatcher
        .run(commands, activity, &mut writer)
        .await
        .context("dispatch loop failed")
}

#[tokio::main]
async fn main() {
    let config = Cli::parse().into_config();

    if let Err(err) = config.validate() {
        eprintln!("Error: {err}");
        std::process::exit(EXIT_FAULT);
    }

    let guard = match init_tracing(&config) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(EXIT_FAULT);
        }
    };

    tracing::info!(pid = std::process::id(), "PTY proxy starting");

    let status = match serve(&config).await {
        Ok(()) => {
            tracing::info!("PTY proxy exiting");
            EXIT_OK
        }
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "PTY proxy stopped");
            EXIT_FAULT
        }
    };

    // Blocking PTY reads may still be parked; leave without waiting for them.
    drop(guard);
    std::process::exit(status);
}
