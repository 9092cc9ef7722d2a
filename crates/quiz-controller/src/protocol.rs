//! JSON wire messages exchanged with quiz clients.
//!
//! Every frame is a JSON object tagged by `type`. Inbound frames decode into
//! [`ClientMessage`]; everything the controller emits is a [`ServerMessage`].

use crate::errors::QcError;
use crate::questions::Difficulty;
use serde::{Deserialize, Serialize};

/// Maximum chat message length, in characters.
pub const MAX_CHAT_CHARS: usize = 200;

/// Intent sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Tagged form of [`RoomSettings`]. Ignored once the room exists.
    CreateRoom {
        #[serde(default)]
        categories: Option<String>,
        #[serde(default)]
        difficulty: Option<String>,
    },
    StartGame,
    SubmitAnswer {
        answer: usize,
    },
    Chat {
        #[serde(default)]
        message: String,
    },
}

impl ClientMessage {
    /// Decode one inbound text frame.
    pub fn decode(text: &str) -> Result<Self, QcError> {
        serde_json::from_str(text).map_err(|e| QcError::InvalidMessage(e.to_string()))
    }

    /// Bounded label for metrics.
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            ClientMessage::CreateRoom { .. } => "create_room",
            ClientMessage::StartGame => "start_game",
            ClientMessage::SubmitAnswer { .. } => "submit_answer",
            ClientMessage::Chat { .. } => "chat",
        }
    }
}

/// Settings frame read first on the `create` route.
///
/// Accepted with or without a `"type":"create_room"` tag. Unknown fields are
/// ignored, so any JSON object decodes; absent fields mean defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RoomSettings {
    #[serde(default)]
    pub categories: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
}

impl RoomSettings {
    pub fn decode(text: &str) -> Result<Self, QcError> {
        serde_json::from_str(text).map_err(|e| QcError::InvalidMessage(e.to_string()))
    }
}

/// Truncate chat text to [`MAX_CHAT_CHARS`] characters.
#[must_use]
pub fn truncate_chat(text: &str) -> String {
    text.chars().take(MAX_CHAT_CHARS).collect()
}

/// Roster entry describing one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub name: String,
    pub score: u32,
    pub correct_count: u32,
    pub streak: u32,
    pub answered: bool,
    pub is_host: bool,
}

/// One participant's outcome for a revealed round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResult {
    pub name: String,
    pub answer: Option<usize>,
    pub correct: bool,
    pub points_earned: u32,
    pub score: u32,
    pub streak: u32,
}

/// Final standing entry in `game_over`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalStanding {
    pub name: String,
    pub score: u32,
    pub correct_count: u32,
    pub best_streak: u32,
}

/// Message sent by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RoomCreated {
        room_code: String,
        host: String,
        players: Vec<PlayerSummary>,
    },
    RoomJoined {
        room_code: String,
        host: String,
        players: Vec<PlayerSummary>,
    },
    PlayerJoined {
        player: String,
        players: Vec<PlayerSummary>,
    },
    PlayerLeft {
        player: String,
        players: Vec<PlayerSummary>,
    },
    Countdown {
        count: u32,
    },
    GameStart {
        total_questions: usize,
    },
    Question {
        question_number: usize,
        total_questions: usize,
        question_id: u64,
        question: String,
        choices: Vec<String>,
        category: String,
        difficulty: Difficulty,
        time_limit: u32,
    },
    Timer {
        remaining: u32,
    },
    PlayerAnswered {
        player: String,
        players: Vec<PlayerSummary>,
    },
    AnswerResult {
        correct_answer: usize,
        explanation: String,
        results: Vec<RoundResult>,
        standings: Vec<PlayerSummary>,
    },
    GameOver {
        standings: Vec<FinalStanding>,
        total_questions: usize,
    },
    RoomClosed {
        reason: String,
    },
    Chat {
        player: String,
        message: String,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    /// Bounded label matching the `type` tag.
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            ServerMessage::RoomCreated { .. } => "room_created",
            ServerMessage::RoomJoined { .. } => "room_joined",
            ServerMessage::PlayerJoined { .. } => "player_joined",
            ServerMessage::PlayerLeft { .. } => "player_left",
            ServerMessage::Countdown { .. } => "countdown",
            ServerMessage::GameStart { .. } => "game_start",
            ServerMessage::Question { .. } => "question",
            ServerMessage::Timer { .. } => "timer",
            ServerMessage::PlayerAnswered { .. } => "player_answered",
            ServerMessage::AnswerResult { .. } => "answer_result",
            ServerMessage::GameOver { .. } => "game_over",
            ServerMessage::RoomClosed { .. } => "room_closed",
            ServerMessage::Chat { .. } => "chat",
            ServerMessage::Error { .. } => "error",
        }
    }

    /// Client-facing `error` frame for a failed request.
    #[must_use]
    pub fn error(err: &QcError) -> Self {
        ServerMessage::Error {
            message: err.client_message(),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, QcError> {
        serde_json::to_string(self).map_err(|e| QcError::Internal(e.to_string()))
    }
}
