//! Line codec for commands and replies.
//!
//! Commands are decoded in two stages: the `type` discriminant is read from
//! the parsed document first, then the whole document is decoded into the
//! payload shape registered for that discriminant.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ProtocolError, Result};
use crate::messages::{Command, Reply};

/// Name of the discriminant field carried by every record.
pub const TYPE_FIELD: &str = "type";

/// Decode one command line.
pub fn decode_command(line: &str) -> Result<Command> {
    decode_command_bytes(line.as_bytes())
}

/// Decode one command line given as raw bytes.
///
/// Bytes that are not valid UTF-8 are rejected as [`ProtocolError::Malformed`].
pub fn decode_command_bytes(line: &[u8]) -> Result<Command> {
    let document: Value = serde_json::from_slice(line)?;
    let kind = document
        .get(TYPE_FIELD)
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .to_string();

    let command = match kind.as_str() {
        "create" => Command::Create(payload(&kind, document)?),
        "write" => Command::Write(payload(&kind, document)?),
        "resize" => Command::Resize(payload(&kind, document)?),
        "permit-data-size" => Command::PermitDataSize(payload(&kind, document)?),
        "close" => Command::Close(payload(&kind, document)?),
        "get-working-directory" => Command::GetWorkingDirectory(payload(&kind, document)?),
        "terminate" => Command::Terminate,
        _ => return Err(ProtocolError::UnknownCommand(kind)),
    };
    Ok(command)
}

fn payload<T: DeserializeOwned>(kind: &str, document: Value) -> Result<T> {
    serde_json::from_value(document).map_err(|e| ProtocolError::InvalidFields {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

/// Encode a reply as a single line, without the trailing newline.
pub fn encode_reply(reply: &Reply) -> Result<String> {
    serde_json::to_string(reply).map_err(|e| ProtocolError::Serialization(e.to_string()))
}

/// Encode a command as a single line, without the trailing newline.
pub fn encode_command(command: &Command) -> Result<String> {
    serde_json::to_string(command).map_err(|e| ProtocolError::Serialization(e.to_string()))
}
