//! Outbound connection handle for one participant.
//!
//! A `ConnectionHandle` is the session's view of a client socket: a bounded
//! queue of [`ServerMessage`]s drained by the transport's writer task. Sends
//! never wait. A full or closed queue is a transport fault and the session
//! removes the participant through the leave path.

use crate::errors::QcError;
use crate::protocol::ServerMessage;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

/// Sending half of a participant's outbound queue.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    connection_id: Uuid,
    sender: mpsc::Sender<ServerMessage>,
}

impl ConnectionHandle {
    /// Create a handle plus the receiver the transport drains.
    #[must_use]
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (
            Self {
                connection_id: Uuid::new_v4(),
                sender,
            },
            receiver,
        )
    }

    #[must_use]
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Queue a message without waiting.
    pub fn send(&self, message: ServerMessage) -> Result<(), QcError> {
        self.sender.try_send(message).map_err(|e| match e {
            TrySendError::Full(msg) => QcError::Transport(format!(
                "outbound queue full for {} ({})",
                self.connection_id,
                msg.message_type()
            )),
            TrySendError::Closed(_) => {
                QcError::Transport(format!("connection {} closed", self.connection_id))
            }
        })
    }
}
