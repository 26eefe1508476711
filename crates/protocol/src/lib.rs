//! # PTY Proxy Protocol Library
//!
//! Message definitions and the line codec spoken between a controller and
//! the PTY session proxy.
//!
//! ## Overview
//!
//! The proxy reads one JSON command per line on its standard input and writes
//! one JSON reply per line on its standard output. Every record carries a
//! `type` discriminant:
//!
//! ```text
//! controller ──► create / write / resize / permit-data-size /
//!                close / get-working-directory / terminate
//! controller ◄── created / output / closed / working-directory
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{decode_command, encode_reply, Command, Reply};
//! use protocol::messages::Created;
//!
//! let command = decode_command(r#"{"type":"close","id":1}"#).unwrap();
//! assert_eq!(command.kind(), "close");
//!
//! let line = encode_reply(&Reply::Created(Created { id: 1 })).unwrap();
//! assert_eq!(line, r#"{"type":"created","id":1}"#);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Command and reply definitions
//! - [`codec`]: Two-stage command decoding and reply encoding
//! - [`error`]: Error types

pub mod codec;
pub mod error;
pub mod messages;

pub use codec::{decode_command, decode_command_bytes, encode_command, encode_reply, TYPE_FIELD};
pub use error::{ProtocolError, Result};
pub use messages::{Command, Reply, SessionId};
