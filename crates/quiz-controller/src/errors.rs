//! Quiz Controller error types.
//!
//! Internal details are logged server-side but not exposed to clients.
//! Outbound `error` frames always carry [`QcError::client_message`].

use thiserror::Error;

/// Quiz Controller error type.
#[derive(Debug, Error)]
pub enum QcError {
    /// No live room with this code.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Room exists but is no longer accepting participants.
    #[error("Join rejected for room {code}: phase {phase}")]
    JoinRejected { code: String, phase: &'static str },

    /// Identity is not attached to any room.
    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    /// Registry is shutting down and refuses new rooms.
    #[error("Quiz controller is draining")]
    Draining,

    /// Inbound frame could not be decoded.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Outbound delivery to a connection failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error with context.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QcError {
    /// Returns a bounded label string for the error variant (for metrics).
    ///
    /// Uses enum variant names, not error message content.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            QcError::RoomNotFound(_) => "room_not_found",
            QcError::JoinRejected { .. } => "join_rejected",
            QcError::ParticipantNotFound(_) => "participant_not_found",
            QcError::Draining => "draining",
            QcError::InvalidMessage(_) => "invalid_message",
            QcError::Transport(_) => "transport",
            QcError::Config(_) => "config",
            QcError::Internal(_) => "internal",
        }
    }

    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            QcError::RoomNotFound(_) | QcError::JoinRejected { .. } => {
                "Room not found or game already started".to_string()
            }
            QcError::ParticipantNotFound(_) => "You are not in a room".to_string(),
            QcError::Draining => "Server is shutting down, please reconnect".to_string(),
            QcError::InvalidMessage(_) => "Invalid message".to_string(),
            QcError::Transport(_) | QcError::Config(_) | QcError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages_hide_internal_details() {
        let internal = QcError::Internal("mailbox closed for session 7f3a".to_string());
        assert!(!internal.client_message().contains("7f3a"));
        assert_eq!(internal.client_message(), "An internal error occurred");

        let config = QcError::Config("missing /etc/qc/questions.json".to_string());
        assert!(!config.client_message().contains("/etc"));

        let transport = QcError::Transport("queue full for conn-9".to_string());
        assert_eq!(transport.client_message(), "An internal error occurred");
    }

    #[test]
    fn test_join_failures_share_one_client_message() {
        let not_found = QcError::RoomNotFound("ZZZZZ".to_string());
        let rejected = QcError::JoinRejected {
            code: "ABCDE".to_string(),
            phase: "playing",
        };
        assert_eq!(not_found.client_message(), rejected.client_message());
        assert_eq!(
            not_found.client_message(),
            "Room not found or game already started"
        );
    }

    #[test]
    fn test_error_type_label_exhaustive() {
        assert_eq!(
            QcError::RoomNotFound("x".to_string()).error_type_label(),
            "room_not_found"
        );
        assert_eq!(
            QcError::JoinRejected {
                code: "x".to_string(),
                phase: "finished"
            }
            .error_type_label(),
            "join_rejected"
        );
        assert_eq!(
            QcError::ParticipantNotFound("x".to_string()).error_type_label(),
            "participant_not_found"
        );
        assert_eq!(QcError::Draining.error_type_label(), "draining");
        assert_eq!(
            QcError::InvalidMessage("x".to_string()).error_type_label(),
            "invalid_message"
        );
        assert_eq!(
            QcError::Transport("x".to_string()).error_type_label(),
            "transport"
        );
        assert_eq!(
            QcError::Config("x".to_string()).error_type_label(),
            "config"
        );
        assert_eq!(
            QcError::Internal("x".to_string()).error_type_label(),
            "internal"
        );
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!(
                "{}",
                QcError::JoinRejected {
                    code: "ABCDE".to_string(),
                    phase: "playing"
                }
            ),
            "Join rejected for room ABCDE: phase playing"
        );
        assert_eq!(
            format!("{}", QcError::Draining),
            "Quiz controller is draining"
        );
    }
}
