//! Stand-in for a session whose process could not be started.

use protocol::messages::{Closed, Output};
use protocol::{Reply, SessionId};

use super::ActivitySender;

/// A session that only reports why its process failed to start.
///
/// Construction posts one `output` carrying the error text followed by one
/// `closed` with exit code 0. Every other operation is a no-op.
#[derive(Debug)]
pub struct FailedSession {
    id: SessionId,
    message: String,
}

impl FailedSession {
    /// Creates the session and schedules its two replies.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(id: SessionId, message: String, activity: ActivitySender) -> Self {
        let output = Reply::Output(Output {
            id,
            data: message.clone(),
        });

        tokio::spawn(async move {
            if activity.send(output).await.is_err() {
                tracing::debug!(session_id = id, "Activity queue closed before failure report");
                return;
            }
            let _ = activity
                .send(Reply::Closed(Closed { id, exit_code: 0 }))
                .await;
        });

        Self { id, message }
    }

    /// Returns the session ID.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The captured spawn error.
    pub fn message(&self) -> &str {
        &self.message
    }
}
