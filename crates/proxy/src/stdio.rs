//! Line-oriented plumbing between the controller and the dispatcher.
//!
//! Commands arrive one per line and are handed to the dispatcher through a
//! channel fed by a background task. Replies leave through [`ReplyWriter`],
//! one JSON document per line, flushed immediately.

use std::io;

use protocol::{encode_reply, Reply};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

/// Capacity of the command line queue.
const COMMAND_QUEUE_CAPACITY: usize = 1;

/// One raw command line, without its terminator, or the error that ended input.
pub type CommandLine = io::Result<Vec<u8>>;

/// Spawns a task that reads `input` line by line.
///
/// Lines are passed on as raw bytes, so a line that is not UTF-8 still
/// reaches the decoder. A read error is forwarded once and ends the task.
/// The returned receiver closes when the input reaches EOF.
pub fn spawn_line_reader<R>(input: R) -> mpsc::Receiver<CommandLine>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);

    tokio::spawn(async move {
        let mut lines = BufReader::new(input).split(b'\n');
        loop {
            match lines.next_segment().await {
                Ok(Some(mut line)) => {
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    if tx.send(Ok(line)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    tracing::debug!("Command input reached EOF");
                    break;
                }
                Err(err) => {
                    tracing::error!(error = %err, "Failed to read command input");
                    let _ = tx.send(Err(err)).await;
                    break;
                }
            }
        }
    });

    rx
}

/// Writes replies to the controller.
pub struct ReplyWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> ReplyWriter<W> {
    /// Wraps an output stream.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes one reply followed by a newline and flushes.
    pub async fn send(&mut self, reply: &Reply) -> io::Result<()> {
        let mut line =
            encode_reply(reply).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tracing::trace!(reply = %line, "Sending to controller");
        line.push('\n');

        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
