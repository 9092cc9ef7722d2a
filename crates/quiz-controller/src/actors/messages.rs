//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via
//! `tokio::sync::mpsc`. Request-reply uses `tokio::sync::oneshot`.

use super::connection::ConnectionHandle;
use crate::errors::QcError;
use crate::questions::{DifficultyMode, Question};

use tokio::sync::oneshot;
use uuid::Uuid;

/// Messages sent to `SessionRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Create a room with the requester as owner.
    CreateSession {
        request: CreateSessionRequest,
        respond_to: oneshot::Sender<Result<SessionSnapshot, QcError>>,
    },

    /// Join (or reconnect to) a waiting room.
    JoinSession {
        code: String,
        identity: String,
        connection: ConnectionHandle,
        respond_to: oneshot::Sender<Result<SessionSnapshot, QcError>>,
    },

    /// Remove an identity from whatever room it is in.
    LeaveSession {
        identity: String,
        respond_to: oneshot::Sender<LeaveOutcome>,
    },

    /// A transport closed. Only removes the participant if `connection_id`
    /// is still the one attached.
    Disconnect {
        code: String,
        identity: String,
        connection_id: Uuid,
        respond_to: oneshot::Sender<LeaveOutcome>,
    },

    /// Read-only snapshot by room code.
    Lookup {
        code: String,
        respond_to: oneshot::Sender<Option<SessionSnapshot>>,
    },

    /// Forwarded to the identity's room. Replies once queued there, or
    /// with `ParticipantNotFound` if the identity is in no room.
    StartGame {
        identity: String,
        respond_to: oneshot::Sender<Result<(), QcError>>,
    },

    /// Forwarded like `StartGame`.
    SubmitAnswer {
        identity: String,
        answer: usize,
        respond_to: oneshot::Sender<Result<(), QcError>>,
    },

    /// Forwarded like `StartGame`.
    Chat {
        identity: String,
        text: String,
        respond_to: oneshot::Sender<Result<(), QcError>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Stop accepting rooms and close every live one.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), QcError>>,
    },
}

/// Messages sent to `SessionActor`.
#[derive(Debug)]
pub enum SessionMessage {
    Join {
        identity: String,
        connection: ConnectionHandle,
        respond_to: oneshot::Sender<Result<SessionSnapshot, QcError>>,
    },

    /// Remove a participant. With `connection_id` set the removal only
    /// happens if that connection is still attached.
    Leave {
        identity: String,
        connection_id: Option<Uuid>,
        respond_to: oneshot::Sender<LeaveOutcome>,
    },

    Start { by: String },

    SubmitAnswer { identity: String, answer: usize },

    Chat { identity: String, text: String },

    GetState {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },

    /// A delayed step posted back by the session's own scheduler.
    Scheduled(Continuation),
}

/// Scheduled continuations. Each carries enough context to be discarded
/// when it no longer matches the session's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    CountdownTick { remaining: u32 },
    RoundTick { round: usize, remaining: u32 },
    AdvanceRound { round: usize },
    GraceExpired,
}

/// Notifications from sessions to the registry. Never awaited by the sender.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A participant was removed after a transport fault.
    ParticipantDropped {
        code: String,
        session_id: Uuid,
        identity: String,
    },
    /// The session closed itself and its task is exiting.
    Closed {
        code: String,
        session_id: Uuid,
        reason: CloseReason,
    },
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Inputs for a new room.
#[derive(Debug)]
pub struct CreateSessionRequest {
    pub owner_identity: String,
    pub connection: ConnectionHandle,
    pub questions: Vec<Question>,
    /// Index-aligned with `questions`. Missing ids fall back to the
    /// 1-based question number.
    pub question_ids: Vec<u64>,
    pub category_filter: Option<Vec<String>>,
    pub difficulty_mode: DifficultyMode,
}

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Waiting,
    Countdown,
    Playing,
    RevealingAnswer,
    Finished,
}

impl Phase {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Phase::Waiting => "waiting",
            Phase::Countdown => "countdown",
            Phase::Playing => "playing",
            Phase::RevealingAnswer => "revealing_answer",
            Phase::Finished => "finished",
        }
    }
}

/// Why a session was destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    HostLeft,
    Empty,
    Expired,
    Shutdown,
}

impl CloseReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CloseReason::HostLeft => "host_left",
            CloseReason::Empty => "empty",
            CloseReason::Expired => "expired",
            CloseReason::Shutdown => "shutdown",
        }
    }

    /// Text for the `room_closed` frame; `None` closes silently.
    #[must_use]
    pub const fn client_message(&self) -> Option<&'static str> {
        match self {
            CloseReason::HostLeft => Some("Host left the game"),
            CloseReason::Shutdown => Some("Server is shutting down"),
            CloseReason::Empty | CloseReason::Expired => None,
        }
    }
}

/// What triggered a reveal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealTrigger {
    Timeout,
    AllAnswered,
}

impl RevealTrigger {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RevealTrigger::Timeout => "timeout",
            RevealTrigger::AllAnswered => "all_answered",
        }
    }
}

/// Result of a leave request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The identity was not in a room (or a newer connection replaced it).
    NotPresent,
    /// Removed; the room continues with `remaining` participants.
    Left { remaining: usize },
    /// Removed and the room was destroyed.
    SessionClosed { reason: CloseReason },
}

/// Per-participant state inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantState {
    pub identity: String,
    pub connection_id: Uuid,
    pub score: u32,
    pub correct_count: u32,
    pub streak: u32,
    pub best_streak: u32,
    pub current_answer: Option<usize>,
    pub answered: bool,
    pub is_owner: bool,
}

/// Read-only view of a session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub code: String,
    pub session_id: Uuid,
    pub owner: String,
    pub phase: Phase,
    pub round_index: usize,
    pub total_questions: usize,
    /// In join order.
    pub participants: Vec<ParticipantState>,
    pub category_filter: Option<Vec<String>>,
    pub difficulty_mode: DifficultyMode,
    pub created_at: i64,
}

impl SessionSnapshot {
    #[must_use]
    pub fn participant(&self, identity: &str) -> Option<&ParticipantState> {
        self.participants.iter().find(|p| p.identity == identity)
    }
}

/// Status of the `SessionRegistryActor`.
#[derive(Debug, Clone)]
pub struct RegistryStatus {
    pub session_count: usize,
    pub participant_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}
