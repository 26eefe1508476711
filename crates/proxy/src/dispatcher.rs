//! Session registry and dispatch loop.
//!
//! The [`Dispatcher`] owns the id → session map. It applies commands read
//! from the controller, forwards activity posted by sessions, and is the only
//! place that allocates ids or removes sessions.

use std::collections::HashMap;

use protocol::messages::{
    CloseRequest, CreateRequest, Created, GetWorkingDirectoryRequest, PermitDataSizeRequest,
    ResizeRequest, WorkingDirectory, WriteRequest,
};
use protocol::{decode_command_bytes, Command, ProtocolError, Reply, SessionId};
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::environment::{resolve_environment, resolve_working_directory};
use crate::session::{ActivityReceiver, ActivitySender, LaunchOptions, Session};
use crate::stdio::{CommandLine, ReplyWriter};

/// Default capacity of the activity queue shared by all sessions.
pub const DEFAULT_ACTIVITY_CAPACITY: usize = 64;

/// Errors that stop the dispatch loop.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The controller sent something that is not a valid command.
    #[error("protocol fault: {0}")]
    Protocol(#[from] ProtocolError),

    /// The reply stream could not be written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the caller should do after a command has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Send this reply to the controller.
    Reply(Reply),
    /// Nothing to send.
    Silent,
    /// The controller asked the proxy to exit.
    Terminate,
}

/// Owner of the session registry.
pub struct Dispatcher {
    /// Last id handed out; ids start at 1.
    last_id: SessionId,
    sessions: HashMap<SessionId, Session>,
    activity_tx: ActivitySender,
}

impl Dispatcher {
    /// Creates a dispatcher and the activity queue its sessions report on.
    pub fn new() -> (Self, ActivityReceiver) {
        Self::with_capacity(DEFAULT_ACTIVITY_CAPACITY)
    }

    /// Creates a dispatcher with a specific activity queue capacity.
    pub fn with_capacity(capacity: usize) -> (Self, ActivityReceiver) {
        let (activity_tx, activity_rx) = mpsc::channel(capacity);
        let dispatcher = Dispatcher {
            last_id: 0,
            sessions: HashMap::new(),
            activity_tx,
        };
        (dispatcher, activity_rx)
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Whether `id` is registered and backed by a real process.
    pub fn is_live(&self, id: SessionId) -> bool {
        self.sessions.get(&id).is_some_and(Session::is_live)
    }

    /// Applies one command.
    pub async fn apply(&mut self, command: Command) -> Dispatch {
        match command {
            Command::Create(request) => self.create(request),
            Command::Write(WriteRequest { id, data }) => {
                if let Some(session) = self.sessions.get(&id) {
                    session.write(&data);
                }
                Dispatch::Silent
            }
            Command::Resize(ResizeRequest { id, rows, columns }) => {
                if let Some(session) = self.sessions.get(&id) {
                    session.resize(rows, columns);
                }
                Dispatch::Silent
            }
            Command::PermitDataSize(PermitDataSizeRequest { id, size }) => {
                if let Some(session) = self.sessions.get(&id) {
                    session.permit_data_size(size);
                }
                Dispatch::Silent
            }
            Command::Close(CloseRequest { id }) => {
                if let Some(session) = self.sessions.get(&id) {
                    session.terminate().await;
                }
                Dispatch::Silent
            }
            Command::GetWorkingDirectory(GetWorkingDirectoryRequest { id }) => {
                let cwd = self
                    .sessions
                    .get(&id)
                    .map(Session::working_directory)
                    .unwrap_or_default();
                Dispatch::Reply(Reply::WorkingDirectory(WorkingDirectory { id, cwd }))
            }
            Command::Terminate => Dispatch::Terminate,
        }
    }

    fn create(&mut self, request: CreateRequest) -> Dispatch {
        self.last_id += 1;
        let id = self.last_id;

        let launch = LaunchOptions {
            env: resolve_environment(request.env, request.extra_env),
            cwd: resolve_working_directory(
                request.suggested_cwd.as_deref(),
                request.cwd.as_deref(),
            ),
            argv: request.argv,
            rows: request.rows,
            cols: request.columns,
        };

        let session = Session::start(id, &launch, self.activity_tx.clone());
        let live = session.is_live();
        self.sessions.insert(id, session);

        if live {
            Dispatch::Reply(Reply::Created(Created { id }))
        } else {
            Dispatch::Silent
        }
    }

    /// Accepts a reply posted by a session and returns it for forwarding.
    ///
    /// A `closed` reply removes its session from the registry first.
    pub fn observe(&mut self, activity: Reply) -> Reply {
        if let Reply::Closed(closed) = &activity {
            if self.sessions.remove(&closed.id).is_some() {
                debug!(session_id = closed.id, "Removed closed session");
            }
        }
        activity
    }

    /// Runs until the controller terminates the proxy or the input ends.
    ///
    /// `commands` yields raw command lines. Blank lines are skipped. Any
    /// line that does not decode to a known command ends the loop with
    /// [`ProxyError::Protocol`], and a failed read with [`ProxyError::Io`].
    pub async fn run<W>(
        mut self,
        mut commands: mpsc::Receiver<CommandLine>,
        mut activity: ActivityReceiver,
        writer: &mut ReplyWriter<W>,
    ) -> Result<(), ProxyError>
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            tokio::select! {
                line = commands.recv() => {
                    let Some(line) = line else {
                        info!("Command stream closed");
                        return Ok(());
                    };
                    let line = line?;
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    debug!(line = %String::from_utf8_lossy(&line), "Received command");

                    let command = decode_command_bytes(&line)?;
                    match self.apply(command).await {
                        Dispatch::Reply(reply) => writer.send(&reply).await?,
                        Dispatch::Silent => {}
                        Dispatch::Terminate => {
                            info!("Terminate requested");
                            return Ok(());
                        }
                    }
                }
                Some(event) = activity.recv() => {
                    let reply = self.observe(event);
                    writer.send(&reply).await?;
                }
            }
        }
    }
}
