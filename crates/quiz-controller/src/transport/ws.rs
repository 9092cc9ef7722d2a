//! WebSocket adapter.
//!
//! One socket per participant on `GET /ws/:room_code/:player_name`:
//!
//! - `room_code == "create"`: the first frame carries the room settings
//!   (`{categories?, difficulty?}`, optionally tagged `create_room`).
//!   Questions are selected from the bank and a room is created with the
//!   caller as owner.
//! - Any other code joins that room. A failed join gets an `error` frame and
//!   the socket is closed.
//!
//! After setup, inbound frames are decoded and routed through the registry.
//! Outbound frames are pumped from the participant's [`ConnectionHandle`]
//! queue by a writer task. When the session drops the handle (room closed or
//! transport fault) the writer ends and the socket closes.

use crate::actors::{ConnectionHandle, CreateSessionRequest, SessionRegistryHandle};
use crate::errors::QcError;
use crate::observability::metrics as prom;
use crate::protocol::{ClientMessage, RoomSettings, ServerMessage};
use crate::questions::{parse_category_filter, DifficultyMode, QuestionBank};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Route segment that creates a room instead of joining one.
pub const CREATE_ROUTE_CODE: &str = "create";

/// Capacity of the per-socket queue for direct replies (`error` frames).
const REPLY_BUFFER: usize = 8;

/// Shared state for WebSocket handlers.
#[derive(Clone, Debug)]
pub struct TransportState {
    pub registry: SessionRegistryHandle,
    pub bank: Arc<QuestionBank>,
    pub questions_per_game: usize,
    pub outbound_buffer: usize,
}

/// Router serving the WebSocket endpoint.
pub fn ws_router(state: TransportState) -> Router {
    Router::new()
        .route("/ws/:room_code/:player_name", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(
    State(state): State<TransportState>,
    Path((room_code, player_name)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, room_code, player_name, socket))
}

/// True when the route asks for a new room.
#[must_use]
pub fn is_create_route(room_code: &str) -> bool {
    room_code.trim().eq_ignore_ascii_case(CREATE_ROUTE_CODE)
}

/// Category filter and difficulty mode from a room settings frame.
#[must_use]
pub fn room_settings(settings: &RoomSettings) -> (Option<Vec<String>>, DifficultyMode) {
    (
        parse_category_filter(settings.categories.as_deref()),
        DifficultyMode::parse(settings.difficulty.as_deref()),
    )
}

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

#[instrument(skip_all, name = "qc.transport.socket", fields(room_code = %room_code, identity = %player_name))]
async fn handle_socket(
    state: TransportState,
    room_code: String,
    player_name: String,
    socket: WebSocket,
) {
    let (mut sink, mut stream) = socket.split();

    let identity = player_name.trim().to_string();
    if identity.is_empty() {
        reject(
            &mut sink,
            &QcError::InvalidMessage("empty player name".to_string()),
        )
        .await;
        return;
    }

    let (connection, outbound) = ConnectionHandle::channel(state.outbound_buffer);
    let connection_id = connection.connection_id();

    let setup = if is_create_route(&room_code) {
        create_room(&state, &identity, connection, &mut stream).await
    } else {
        state
            .registry
            .join_session(room_code.clone(), identity.clone(), connection)
            .await
            .map(|snapshot| snapshot.code)
    };

    let code = match setup {
        Ok(code) => code,
        Err(e) => {
            debug!(
                target: "qc.transport",
                room_code = %room_code,
                identity = %identity,
                error = %e,
                "Socket setup failed"
            );
            prom::record_error("setup", e.error_type_label());
            reject(&mut sink, &e).await;
            return;
        }
    };

    info!(
        target: "qc.transport",
        room_code = %code,
        identity = %identity,
        %connection_id,
        "Participant connected"
    );

    let (reply_tx, reply_rx) = mpsc::channel(REPLY_BUFFER);
    let mut writer = tokio::spawn(write_outbound(sink, outbound, reply_rx));

    loop {
        tokio::select! {
            _ = &mut writer => {
                debug!(
                    target: "qc.transport",
                    room_code = %code,
                    identity = %identity,
                    "Outbound queue closed by session"
                );
                break;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&state, &identity, &reply_tx, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(
                            target: "qc.transport",
                            room_code = %code,
                            identity = %identity,
                            error = %e,
                            "Socket read failed"
                        );
                        break;
                    }
                }
            }
        }
    }

    match state
        .registry
        .disconnect(code.clone(), identity.clone(), connection_id)
        .await
    {
        Ok(outcome) => {
            info!(
                target: "qc.transport",
                room_code = %code,
                identity = %identity,
                ?outcome,
                "Participant disconnected"
            );
        }
        Err(e) => {
            debug!(
                target: "qc.transport",
                room_code = %code,
                identity = %identity,
                error = %e,
                "Disconnect not delivered"
            );
        }
    }

    writer.abort();
}

/// Read the settings frame, pick questions and create the room.
async fn create_room(
    state: &TransportState,
    identity: &str,
    connection: ConnectionHandle,
    stream: &mut WsStream,
) -> Result<String, QcError> {
    let first = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => break RoomSettings::decode(&text)?,
            Some(Ok(Message::Close(_))) | None => {
                return Err(QcError::Transport("closed before room settings".to_string()));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(QcError::Transport(e.to_string())),
        }
    };

    let (category_filter, difficulty_mode) = room_settings(&first);
    let set = state.bank.select(
        state.questions_per_game,
        category_filter.as_deref(),
        difficulty_mode,
    );

    debug!(
        target: "qc.transport",
        identity = %identity,
        difficulty = difficulty_mode.as_str(),
        questions = set.questions.len(),
        "Creating room"
    );

    let snapshot = state
        .registry
        .create_session(CreateSessionRequest {
            owner_identity: identity.to_string(),
            connection,
            questions: set.questions,
            question_ids: set.question_ids,
            category_filter,
            difficulty_mode,
        })
        .await?;

    Ok(snapshot.code)
}

async fn handle_frame(
    state: &TransportState,
    identity: &str,
    replies: &mpsc::Sender<ServerMessage>,
    text: &str,
) {
    let started = Instant::now();

    let message = match ClientMessage::decode(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(
                target: "qc.transport",
                identity = %identity,
                error = %e,
                "Malformed frame"
            );
            prom::record_error("decode", e.error_type_label());
            let _ = replies.try_send(ServerMessage::error(&e));
            return;
        }
    };

    let message_type = message.message_type();
    let result = match message {
        ClientMessage::StartGame => state.registry.start_game(identity.to_string()).await,
        ClientMessage::SubmitAnswer { answer } => {
            state
                .registry
                .submit_answer(identity.to_string(), answer)
                .await
        }
        ClientMessage::Chat { message } => {
            state.registry.chat(identity.to_string(), message).await
        }
        ClientMessage::CreateRoom { .. } => {
            debug!(
                target: "qc.transport",
                identity = %identity,
                "Room settings ignored after setup"
            );
            Ok(())
        }
    };

    if let Err(e) = result {
        debug!(
            target: "qc.transport",
            identity = %identity,
            message_type,
            error = %e,
            "Failed to route client message"
        );
        prom::record_error(message_type, e.error_type_label());
        let _ = replies.try_send(ServerMessage::error(&e));
    }

    prom::record_message_latency(message_type, started.elapsed());
}

/// Pump queued messages to the socket until the session drops the queue.
async fn write_outbound(
    mut sink: WsSink,
    mut outbound: mpsc::Receiver<ServerMessage>,
    mut replies: mpsc::Receiver<ServerMessage>,
) {
    loop {
        let message = tokio::select! {
            msg = outbound.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
            Some(msg) = replies.recv() => msg,
        };

        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(target: "qc.transport", error = %e, "Failed to encode outbound message");
                continue;
            }
        };

        if sink.send(Message::Text(text)).await.is_err() {
            break;
        }
    }

    let _ = sink.close().await;
}

/// Send an `error` frame and close the socket.
async fn reject(sink: &mut WsSink, err: &QcError) {
    if let Ok(text) = ServerMessage::error(err).encode() {
        let _ = sink.send(Message::Text(text)).await;
    }
    let _ = sink.close().await;
}
