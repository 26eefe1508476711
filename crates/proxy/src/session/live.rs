//! PTY-backed session.
//!
//! A live session owns a child process attached to a pseudo-terminal and a
//! background reader that forwards the child's output as `output` replies,
//! never more than the controller has permitted.

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use portable_pty::{
    native_pty_system, Child, ChildKiller, CommandBuilder, ExitStatus, MasterPty, PtySize,
};
use protocol::messages::{Closed, Output};
use protocol::{Reply, SessionId};
use tokio::sync::watch;

use super::{ActivitySender, LaunchOptions, SessionError};
use crate::sanitize::Utf8Sanitizer;

/// Upper bound for a single read from the PTY.
pub const READ_CHUNK_SIZE: usize = 10 * 1024;

/// Exit code reported when the child's status could not be collected.
const UNKNOWN_EXIT_CODE: i32 = -1;

/// Delay between exit-status polls after the PTY has closed.
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Descriptor and process handle, guarded by the session lock.
///
/// `master` and `writer` become `None` once the reader has closed the PTY.
struct PtyState {
    master: Option<Box<dyn MasterPty + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    child: Box<dyn Child + Send + Sync>,
}

fn lock(pty: &Mutex<PtyState>) -> MutexGuard<'_, PtyState> {
    pty.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A running child process on its own PTY.
pub struct LiveSession {
    id: SessionId,
    pty: Arc<Mutex<PtyState>>,
    /// Bytes the reader may still forward. Overwritten by permits.
    allowance: Arc<watch::Sender<i64>>,
    pid: Option<u32>,
}

impl LiveSession {
    /// Spawns `launch` on a new PTY and starts the background reader.
    ///
    /// The child sees exactly `launch.env`. The reader stays parked until the
    /// first positive [`permit_data_size`](Self::permit_data_size).
    pub fn spawn(
        id: SessionId,
        launch: &LaunchOptions,
        activity: ActivitySender,
    ) -> Result<Self, SessionError> {
        if launch.argv.is_empty() {
            return Err(SessionError::EmptyArgv);
        }

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: launch.rows,
                cols: launch.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::OpenFailed(e.to_string()))?;

        let mut argv: Vec<OsString> = launch.argv.iter().map(OsString::from).collect();
        argv[0] = resolve_program(&launch.argv[0]);
        let mut cmd = CommandBuilder::from_argv(argv);
        cmd.env_clear();
        for (key, value) in &launch.env {
            cmd.env(key, value);
        }
        cmd.cwd(&launch.cwd);

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        // Only the child may keep the slave side open, or EOF never arrives.
        drop(pair.slave);

        let pid = child.process_id();

        let handles = pair
            .master
            .try_clone_reader()
            .and_then(|reader| Ok((reader, pair.master.take_writer()?)));
        let (reader, writer) = match handles {
            Ok(handles) => handles,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SessionError::AttachFailed(e.to_string()));
            }
        };

        let (allowance, _) = watch::channel(0i64);
        let session = LiveSession {
            id,
            pty: Arc::new(Mutex::new(PtyState {
                master: Some(pair.master),
                writer: Some(writer),
                child,
            })),
            allowance: Arc::new(allowance),
            pid,
        };

        session.start_read_loop(reader, activity);

        tracing::info!(
            session_id = id,
            pid = pid,
            rows = launch.rows,
            cols = launch.cols,
            "Created new session"
        );

        Ok(session)
    }

    /// Returns the session ID.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the process ID of the child, if available.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Bytes the reader may still forward before parking.
    pub fn remaining_allowance(&self) -> i64 {
        *self.allowance.borrow()
    }

    /// Whether the PTY descriptor is still open.
    pub fn is_open(&self) -> bool {
        lock(&self.pty).master.is_some()
    }

    /// Writes raw input to the PTY.
    pub fn write(&self, data: &str) {
        let mut state = lock(&self.pty);
        let Some(writer) = state.writer.as_mut() else {
            return;
        };

        if let Err(err) = writer
            .write_all(data.as_bytes())
            .and_then(|()| writer.flush())
        {
            tracing::warn!(session_id = self.id, error = %err, "Failed to write to PTY");
        }
    }

    /// Applies a new window size to the PTY.
    pub fn resize(&self, rows: u16, cols: u16) {
        let state = lock(&self.pty);
        let Some(master) = state.master.as_ref() else {
            return;
        };

        let result = master.resize(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        });
        match result {
            Ok(()) => tracing::debug!(session_id = self.id, rows, cols, "Resized PTY"),
            Err(err) => {
                tracing::debug!(session_id = self.id, error = %err, "Failed to resize PTY")
            }
        }
    }

    /// Replaces the remaining allowance with `size`.
    ///
    /// This is not additive: the controller accounts for bytes it has already
    /// received. A positive value wakes a parked reader.
    pub fn permit_data_size(&self, size: i64) {
        self.allowance.send_replace(size);
    }

    /// Kills the child and waits for it to be reaped.
    ///
    /// The reader notices the PTY going away and reports `closed`, so this
    /// does not.
    pub async fn terminate(&self) {
        let id = self.id;
        let pty = Arc::clone(&self.pty);

        let result = tokio::task::spawn_blocking(move || -> io::Result<Option<ExitStatus>> {
            let mut state = lock(&pty);
            if state.master.is_none() {
                return Ok(None);
            }
            if let Some(status) = state.child.try_wait()? {
                return Ok(Some(status));
            }
            if let Err(err) = kill_child(state.child.as_mut()) {
                tracing::debug!(session_id = id, error = %err, "Kill signal not delivered");
            }
            state.child.wait().map(Some)
        })
        .await;

        match result {
            Ok(Ok(Some(status))) => tracing::info!(
                session_id = id,
                exit_code = status.exit_code(),
                "Session terminated"
            ),
            Ok(Ok(None)) => tracing::debug!(session_id = id, "Session already closed"),
            Ok(Err(err)) => {
                tracing::warn!(session_id = id, error = %err, "Failed to terminate session")
            }
            Err(err) => {
                tracing::error!(session_id = id, error = %err, "Terminate task panicked")
            }
        }
    }

    /// Working directory of the PTY's foreground process group leader.
    ///
    /// Empty when the PTY is closed or the lookup fails.
    pub fn working_directory(&self) -> String {
        let state = lock(&self.pty);
        let Some(leader) = state
            .master
            .as_ref()
            .and_then(|master| master.process_group_leader())
        else {
            return String::new();
        };

        match std::fs::read_link(format!("/proc/{leader}/cwd")) {
            Ok(path) => path.to_string_lossy().into_owned(),
            Err(err) => {
                tracing::debug!(session_id = self.id, pid = leader, error = %err, "Working directory lookup failed");
                String::new()
            }
        }
    }

    /// Starts the reader task.
    ///
    /// Each iteration parks until the allowance is positive, reads at most
    /// `min(allowance, READ_CHUNK_SIZE)` bytes on a blocking thread and posts
    /// the sanitized text. On EOF or a read error the child is reaped,
    /// `closed` is posted and the PTY is released.
    fn start_read_loop(&self, reader: Box<dyn Read + Send>, activity: ActivitySender) {
        let id = self.id;
        let pty = Arc::clone(&self.pty);
        let allowance = Arc::clone(&self.allowance);
        let mut permits = allowance.subscribe();

        tokio::spawn(async move {
            let mut sanitizer = Utf8Sanitizer::new();
            let mut reader = reader;

            loop {
                let permitted = match permits.wait_for(|remaining| *remaining > 0).await {
                    Ok(remaining) => *remaining,
                    Err(_) => break,
                };
                let chunk_size = usize::try_from(permitted)
                    .unwrap_or(READ_CHUNK_SIZE)
                    .min(READ_CHUNK_SIZE);

                let result = tokio::task::spawn_blocking(move || {
                    let mut buffer = vec![0u8; chunk_size];
                    let read = reader.read(&mut buffer).map(|n| {
                        buffer.truncate(n);
                        buffer
                    });
                    (reader, read)
                })
                .await;

                match result {
                    Ok((returned, Ok(data))) if !data.is_empty() => {
                        reader = returned;
                        let text = sanitizer.sanitize(&data);
                        if text.is_empty() {
                            continue;
                        }

                        let consumed = data.len() as i64;
                        allowance.send_modify(|remaining| {
                            *remaining = remaining.saturating_sub(consumed)
                        });
                        tracing::trace!(session_id = id, bytes = consumed, "PTY output");

                        if activity
                            .send(Reply::Output(Output { id, data: text }))
                            .await
                            .is_err()
                        {
                            tracing::debug!(session_id = id, "Activity queue closed, reader stopping");
                            break;
                        }
                    }
                    Ok((_, Ok(_))) => {
                        tracing::debug!(session_id = id, "PTY EOF");
                        break;
                    }
                    Ok((_, Err(err))) => {
                        // EIO is the normal way a Linux PTY reports a hung-up slave.
                        tracing::debug!(session_id = id, error = %err, "PTY read ended");
                        break;
                    }
                    Err(err) => {
                        tracing::error!(session_id = id, error = %err, "Read task panicked");
                        break;
                    }
                }
            }

            if sanitizer.pending() > 0 {
                tracing::debug!(
                    session_id = id,
                    bytes = sanitizer.pending(),
                    "Dropping incomplete trailing character"
                );
            }

            let exit_code = reap(Arc::clone(&pty)).await;
            tracing::info!(session_id = id, exit_code, "Session closed");
            if activity
                .send(Reply::Closed(Closed { id, exit_code }))
                .await
                .is_err()
            {
                tracing::debug!(session_id = id, "Activity queue closed, closed reply dropped");
            }

            let mut state = lock(&pty);
            state.writer.take();
            state.master.take();
        });
    }
}

/// Waits for the child and returns its exit code.
///
/// Polls so that the session lock is free between attempts and a concurrent
/// terminate can still kill a child that hung up its terminal but kept running.
async fn reap(pty: Arc<Mutex<PtyState>>) -> i32 {
    loop {
        let polled = lock(&pty).child.try_wait();
        match polled {
            Ok(Some(status)) => return status.exit_code() as i32,
            Ok(None) => tokio::time::sleep(REAP_POLL_INTERVAL).await,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to collect exit status");
                return UNKNOWN_EXIT_CODE;
            }
        }
    }
}

/// Looks up a bare program name on the proxy's own `PATH`.
///
/// The child's environment may carry no `PATH` at all, so the lookup must not
/// depend on it. Names containing a `/` and names that cannot be found are
/// returned unchanged.
fn resolve_program(program: &str) -> OsString {
    if program.contains('/') {
        return OsString::from(program);
    }
    match which::which(program) {
        Ok(path) => path.into_os_string(),
        Err(err) => {
            tracing::debug!(program, error = %err, "Program not found on PATH");
            OsString::from(program)
        }
    }
}

/// Sends SIGKILL to the child.
fn kill_child(child: &mut (dyn Child + Send + Sync)) -> io::Result<()> {
    match child.process_id() {
        Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGKILL).map_err(io::Error::from),
        None => child.kill(),
    }
}
