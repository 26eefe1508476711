//! # PTY Session Proxy
//!
//! Runs child processes on pseudo-terminals on behalf of a controller that
//! talks to the proxy over standard input and output.
//!
//! ## Overview
//!
//! The controller sends one JSON command per line. The proxy answers with
//! one JSON reply per line and streams each session's output back, never
//! faster than the controller has permitted.
//!
//! ## Architecture
//!
//! ```text
//!  stdin ──► line reader ──┐
//!                          ▼
//!                     Dispatcher ──► ReplyWriter ──► stdout
//!                          ▲
//!  PTY 1 ──► reader task ──┤  activity queue
//!  PTY 2 ──► reader task ──┘
//! ```
//!
//! The dispatcher is the only owner of the session registry. Each live
//! session runs its own reader task, which waits for an output allowance,
//! reads from the PTY, and posts sanitized text on the shared activity queue.
//!
//! ## Modules
//!
//! - [`config`]: Command-line driven configuration
//! - [`dispatcher`]: Session registry and dispatch loop
//! - [`environment`]: Environment and working-directory resolution
//! - [`sanitize`]: UTF-8 boundary sanitizer for PTY output
//! - [`session`]: Live and failed sessions
//! - [`stdio`]: Command line reader and reply writer

pub mod config;
pub mod dispatcher;
pub mod environment;
pub mod sanitize;
pub mod session;
pub mod stdio;

// Re-export protocol for convenience
pub use protocol;

pub use config::Config;
pub use dispatcher::{Dispatch, Dispatcher, ProxyError};
pub use sanitize::Utf8Sanitizer;
pub use session::{LaunchOptions, Session, SessionError};
pub use stdio::{spawn_line_reader, CommandLine, ReplyWriter};
