//! Protocol message definitions for the PTY session proxy.
//!
//! Commands flow from the controller to the proxy, replies flow back. Every
//! record is a single JSON object carrying a `type` discriminant.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Identifier the proxy assigns to a session.
///
/// Ids start at 1 and are never reused during the life of the process.
pub type SessionId = u32;

/// Commands the controller can send to the proxy.
///
/// Serializing a `Command` produces the wire record including its `type`
/// field. Decoding goes through [`crate::codec::decode_command`], which
/// resolves the discriminant first and the payload second.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Command {
    /// Start a new process attached to a fresh PTY.
    Create(CreateRequest),
    /// Send input to a session.
    Write(WriteRequest),
    /// Change a session's window size.
    Resize(ResizeRequest),
    /// Set the number of output bytes a session may forward.
    PermitDataSize(PermitDataSizeRequest),
    /// Kill the process behind a session.
    Close(CloseRequest),
    /// Ask for a session's current working directory.
    GetWorkingDirectory(GetWorkingDirectoryRequest),
    /// Exit the proxy.
    Terminate,
}

impl Command {
    /// The wire discriminant of this command.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Create(_) => "create",
            Command::Write(_) => "write",
            Command::Resize(_) => "resize",
            Command::PermitDataSize(_) => "permit-data-size",
            Command::Close(_) => "close",
            Command::GetWorkingDirectory(_) => "get-working-directory",
            Command::Terminate => "terminate",
        }
    }
}

/// Request to start a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    /// Program followed by its arguments.
    pub argv: Vec<String>,
    /// Working directory named by the launch command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Preferred working directory, used when it exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_cwd: Option<String>,
    /// Terminal rows.
    pub rows: u16,
    /// Terminal columns.
    pub columns: u16,
    /// Complete environment replacing the proxy's own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    /// Variables layered on top of the base environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_env: Option<HashMap<String, String>>,
}

/// Input destined for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub id: SessionId,
    pub data: String,
}

/// New window size for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeRequest {
    pub id: SessionId,
    pub rows: u16,
    pub columns: u16,
}

/// Output allowance for a session.
///
/// `size` replaces whatever allowance the session had left; it does not add
/// to it. Zero or negative values pause the session's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitDataSizeRequest {
    pub id: SessionId,
    pub size: i64,
}

/// Request to kill a session's process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseRequest {
    pub id: SessionId,
}

/// Query for a session's working directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetWorkingDirectoryRequest {
    pub id: SessionId,
}

/// Records the proxy sends to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Reply {
    /// A session was started.
    Created(Created),
    /// Text produced by a session.
    Output(Output),
    /// A session ended. Always the last record for its id.
    Closed(Closed),
    /// Answer to a working directory query.
    WorkingDirectory(WorkingDirectory),
}

impl Reply {
    /// The session this reply concerns.
    pub fn session_id(&self) -> SessionId {
        match self {
            Reply::Created(created) => created.id,
            Reply::Output(output) => output.id,
            Reply::Closed(closed) => closed.id,
            Reply::WorkingDirectory(reply) => reply.id,
        }
    }
}

/// Confirmation that a session is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Created {
    pub id: SessionId,
}

/// Sanitized text read from a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub id: SessionId,
    pub data: String,
}

/// Session termination notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Closed {
    pub id: SessionId,
    pub exit_code: i32,
}

/// A session's working directory, empty when it could not be determined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingDirectory {
    pub id: SessionId,
    pub cwd: String,
}
