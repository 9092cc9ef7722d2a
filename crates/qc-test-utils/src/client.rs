//! Fake participant for actor-level tests.
//!
//! A `TestClient` holds the receiving end of a participant's outbound queue,
//! the same queue the WebSocket writer drains in production.

use std::time::Duration;

use quiz_controller::actors::{ConnectionHandle, CreateSessionRequest};
use quiz_controller::protocol::ServerMessage;
use quiz_controller::questions::{DifficultyMode, Question};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Outbound queue depth for test connections.
pub const TEST_OUTBOUND_BUFFER: usize = 256;

/// Upper bound on how long a test waits for one frame. With paused time this
/// is virtual and only has to exceed the longest scheduled delay.
const RECV_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug)]
pub struct TestClient {
    pub identity: String,
    pub connection_id: Uuid,
    receiver: mpsc::Receiver<ServerMessage>,
}

impl TestClient {
    /// New client plus the handle to pass to `join_session`.
    #[must_use]
    pub fn connect(identity: impl Into<String>) -> (Self, ConnectionHandle) {
        let (connection, receiver) = ConnectionHandle::channel(TEST_OUTBOUND_BUFFER);
        let client = Self {
            identity: identity.into(),
            connection_id: connection.connection_id(),
            receiver,
        };
        (client, connection)
    }

    /// New client plus a progressive-mode create request owned by it.
    #[must_use]
    pub fn owner(
        identity: impl Into<String>,
        questions: Vec<Question>,
    ) -> (Self, CreateSessionRequest) {
        let (client, connection) = Self::connect(identity);
        let question_ids = (1..=questions.len() as u64).collect();
        let request = CreateSessionRequest {
            owner_identity: client.identity.clone(),
            connection,
            questions,
            question_ids,
            category_filter: None,
            difficulty_mode: DifficultyMode::Progressive,
        };
        (client, request)
    }

    /// Next frame. Panics if none arrives or the queue closed.
    pub async fn recv(&mut self) -> ServerMessage {
        match tokio::time::timeout(RECV_TIMEOUT, self.receiver.recv()).await {
            Ok(Some(msg)) => msg,
            Ok(None) => panic!("{}: connection closed", self.identity),
            Err(_) => panic!("{}: timed out waiting for a frame", self.identity),
        }
    }

    /// Skip frames until one of `message_type` arrives.
    pub async fn wait_for(&mut self, message_type: &str) -> ServerMessage {
        loop {
            let msg = self.recv().await;
            if msg.message_type() == message_type {
                return msg;
            }
        }
    }

    /// Every frame already queued, without waiting.
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut frames = Vec::new();
        while let Ok(msg) = self.receiver.try_recv() {
            frames.push(msg);
        }
        frames
    }

    /// Wait until the session drops this connection, returning the frames
    /// that arrived first.
    pub async fn until_closed(&mut self) -> Vec<ServerMessage> {
        let mut frames = Vec::new();
        loop {
            match tokio::time::timeout(RECV_TIMEOUT, self.receiver.recv()).await {
                Ok(Some(msg)) => frames.push(msg),
                Ok(None) => return frames,
                Err(_) => panic!("{}: connection never closed", self.identity),
            }
        }
    }

    /// Simulate the socket going away. Later sends to this participant fail.
    pub fn close_transport(self) {
        drop(self.receiver);
    }
}
