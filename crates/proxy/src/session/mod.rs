//! Session management module.
//!
//! A [`Session`] is either a live PTY-backed process or a stand-in for a
//! process that failed to start. Both report activity on the shared
//! [`ActivitySender`] queue consumed by the dispatcher.

pub mod failed;
pub mod live;

use std::fmt;
use std::path::PathBuf;

use protocol::{Reply, SessionId};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::environment::EnvMap;

pub use failed::FailedSession;
pub use live::LiveSession;

/// Queue on which sessions post `output` and `closed` replies.
pub type ActivitySender = mpsc::Sender<Reply>;

/// Receiving end of the activity queue.
pub type ActivityReceiver = mpsc::Receiver<Reply>;

/// Errors that can occur while starting a session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// No program was given.
    #[error("argv is empty")]
    EmptyArgv,

    /// Failed to open the PTY pair.
    #[error("failed to open PTY: {0}")]
    OpenFailed(String),

    /// Failed to spawn the child process.
    #[error("failed to spawn command: {0}")]
    SpawnFailed(String),

    /// Failed to obtain the PTY reader or writer.
    #[error("failed to attach to PTY: {0}")]
    AttachFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything needed to start a process on a new PTY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    pub env: EnvMap,
    pub rows: u16,
    pub cols: u16,
}

impl LaunchOptions {
    /// The program name, or an empty string when `argv` is empty.
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }

    /// Argument vector and working directory, without the environment.
    pub fn command_line(&self) -> CommandLineSummary<'_> {
        CommandLineSummary(self)
    }
}

/// Renders as `argv: ['a', 'b'], cwd: '/dir'`.
pub struct CommandLineSummary<'a>(&'a LaunchOptions);

impl fmt::Display for CommandLineSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "argv: ")?;
        write_quoted_list(f, self.0.argv.iter().map(String::as_str))?;
        write!(f, ", cwd: '{}'", self.0.cwd.display())
    }
}

/// Renders as `argv: ['a', 'b'], cwd: '/dir', env: ['K=V']`.
impl fmt::Display for LaunchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, env: ", self.command_line())?;
        let pairs: Vec<String> = self.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write_quoted_list(f, pairs.iter().map(String::as_str))
    }
}

fn write_quoted_list<'a>(
    f: &mut fmt::Formatter<'_>,
    items: impl Iterator<Item = &'a str>,
) -> fmt::Result {
    write!(f, "[")?;
    for (index, item) in items.enumerate() {
        if index > 0 {
            write!(f, ", ")?;
        }
        write!(f, "'{item}'")?;
    }
    write!(f, "]")
}

/// A controller-visible unit of work.
pub enum Session {
    Live(LiveSession),
    Failed(FailedSession),
}

impl Session {
    /// Starts `launch` on a new PTY, falling back to a failed session.
    ///
    /// The failed variant posts its error text and a `closed` reply on
    /// `activity` by itself.
    pub fn start(id: SessionId, launch: &LaunchOptions, activity: ActivitySender) -> Self {
        tracing::info!(session_id = id, "Starting process: {}", launch.command_line());
        tracing::debug!(session_id = id, "Launch parameters: {}", launch);

        match LiveSession::spawn(id, launch, activity.clone()) {
            Ok(live) => Session::Live(live),
            Err(err) => {
                let message = format!(
                    "Error while starting process '{}'. {}\n{}",
                    launch.program(),
                    err,
                    launch
                );
                tracing::warn!(session_id = id, error = %err, "Failed to start process");
                Session::Failed(FailedSession::start(id, message, activity))
            }
        }
    }

    /// Whether a real process backs this session.
    pub fn is_live(&self) -> bool {
        matches!(self, Session::Live(_))
    }

    /// Sends input to the process.
    pub fn write(&self, data: &str) {
        match self {
            Session::Live(live) => live.write(data),
            Session::Failed(_) => {}
        }
    }

    /// Changes the PTY window size.
    pub fn resize(&self, rows: u16, cols: u16) {
        match self {
            Session::Live(live) => live.resize(rows, cols),
            Session::Failed(_) => {}
        }
    }

    /// Replaces the remaining output allowance.
    pub fn permit_data_size(&self, size: i64) {
        match self {
            Session::Live(live) => live.permit_data_size(size),
            Session::Failed(_) => {}
        }
    }

    /// Kills the process and waits for it to be reaped.
    pub async fn terminate(&self) {
        match self {
            Session::Live(live) => live.terminate().await,
            Session::Failed(_) => {}
        }
    }

    /// Best-effort working directory of the foreground process.
    pub fn working_directory(&self) -> String {
        match self {
            Session::Live(live) => live.working_directory(),
            Session::Failed(_) => String::new(),
        }
    }
}
