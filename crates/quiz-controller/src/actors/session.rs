//! `SessionActor` - per-room actor that owns one live quiz game.
//!
//! Each `SessionActor`:
//! - Owns the participants, question list, round index and phase
//! - Serializes every mutation through its mailbox
//! - Broadcasts through per-participant [`ConnectionHandle`]s
//! - Drives the countdown, round timer, settle delay and grace window as
//!   scheduled continuations
//!
//! # Round lifecycle
//!
//! ```text
//! Waiting -> Countdown -> Playing -> RevealingAnswer -> Playing -> ... -> Finished
//! ```
//!
//! A round is revealed exactly once, either when every participant has
//! answered or when the round timer reaches zero, whichever comes first.
//! `revealed_round` records the last revealed round and late ticks for it
//! are discarded.
//!
//! # Transport faults
//!
//! A failed send marks the participant. Marked participants are removed
//! through the leave path after the current handler finishes, so a
//! broadcast always completes its pass first.

use crate::config::SessionTimings;
use crate::errors::QcError;
use crate::observability::metrics as prom;
use crate::protocol::{truncate_chat, FinalStanding, PlayerSummary, RoundResult, ServerMessage};
use crate::questions::{DifficultyMode, Question};
use crate::scoring::ScoreCard;

use super::connection::ConnectionHandle;
use super::messages::{
    CloseReason, Continuation, CreateSessionRequest, LeaveOutcome, ParticipantState, Phase,
    RevealTrigger, SessionEvent, SessionMessage, SessionSnapshot,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::timer::{RoundTimer, Scheduler};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Default channel buffer size for the session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 500;

/// Handle to a `SessionActor`.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    code: String,
    session_id: Uuid,
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    monitor: Arc<MailboxMonitor>,
}

impl SessionHandle {
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Join or reconnect. Fails with `JoinRejected` once the game has started.
    pub async fn join(
        &self,
        identity: String,
        connection: ConnectionHandle,
    ) -> Result<SessionSnapshot, QcError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionMessage::Join {
            identity,
            connection,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| QcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Remove a participant. Pass `connection_id` to ignore stale disconnects
    /// from a connection that has since been replaced.
    pub async fn leave(
        &self,
        identity: String,
        connection_id: Option<Uuid>,
    ) -> Result<LeaveOutcome, QcError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionMessage::Leave {
            identity,
            connection_id,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| QcError::Internal(format!("response receive failed: {e}")))
    }

    pub async fn start(&self, by: String) -> Result<(), QcError> {
        self.send(SessionMessage::Start { by }).await
    }

    pub async fn submit_answer(&self, identity: String, answer: usize) -> Result<(), QcError> {
        self.send(SessionMessage::SubmitAnswer { identity, answer })
            .await
    }

    pub async fn chat(&self, identity: String, text: String) -> Result<(), QcError> {
        self.send(SessionMessage::Chat { identity, text }).await
    }

    pub async fn get_state(&self) -> Result<SessionSnapshot, QcError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionMessage::GetState { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| QcError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the session actor. Participants receive `room_closed`.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn send(&self, message: SessionMessage) -> Result<(), QcError> {
        self.monitor.record_enqueue();
        if let Err(e) = self.sender.send(message).await {
            self.monitor.record_drop();
            return Err(QcError::Internal(format!("channel send failed: {e}")));
        }
        Ok(())
    }
}

/// Everything needed to start a session actor.
#[derive(Debug)]
pub struct SessionSpawn {
    pub code: String,
    pub request: CreateSessionRequest,
    pub timings: SessionTimings,
    /// Child of the registry's token.
    pub cancel_token: CancellationToken,
    pub events: mpsc::UnboundedSender<SessionEvent>,
    pub metrics: Arc<ActorMetrics>,
}

#[derive(Debug)]
struct Participant {
    identity: String,
    connection: ConnectionHandle,
    card: ScoreCard,
    current_answer: Option<usize>,
    answered: bool,
    join_seq: u64,
}

impl Participant {
    fn new(identity: String, connection: ConnectionHandle, join_seq: u64) -> Self {
        Self {
            identity,
            connection,
            card: ScoreCard::default(),
            current_answer: None,
            answered: false,
            join_seq,
        }
    }

    fn summary(&self, owner: &str) -> PlayerSummary {
        PlayerSummary {
            name: self.identity.clone(),
            score: self.card.score,
            correct_count: self.card.correct_count,
            streak: self.card.streak,
            answered: self.answered,
            is_host: self.identity == owner,
        }
    }

    fn state(&self, owner: &str) -> ParticipantState {
        ParticipantState {
            identity: self.identity.clone(),
            connection_id: self.connection.connection_id(),
            score: self.card.score,
            correct_count: self.card.correct_count,
            streak: self.card.streak,
            best_streak: self.card.best_streak,
            current_answer: self.current_answer,
            answered: self.answered,
            is_owner: self.identity == owner,
        }
    }
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    code: String,
    session_id: Uuid,
    owner: String,
    receiver: mpsc::Receiver<SessionMessage>,
    cancel_token: CancellationToken,
    scheduler: Scheduler,
    participants: HashMap<String, Participant>,
    next_join_seq: u64,
    questions: Arc<[Question]>,
    question_ids: Vec<u64>,
    round_index: usize,
    phase: Phase,
    round_timer: Option<RoundTimer>,
    /// Last round whose answer was revealed.
    revealed_round: Option<usize>,
    category_filter: Option<Vec<String>>,
    difficulty_mode: DifficultyMode,
    timings: SessionTimings,
    created_at: i64,
    /// Identities whose connection failed during the current handler.
    faulted: Vec<String>,
    closed: bool,
    events: mpsc::UnboundedSender<SessionEvent>,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl SessionActor {
    /// Spawn a session with the owner as its first participant.
    ///
    /// The owner receives `room_created` as soon as the actor starts.
    pub fn spawn(spawn: SessionSpawn) -> (SessionHandle, JoinHandle<()>) {
        let (actor, handle) = Self::new(spawn);
        let task_handle = tokio::spawn(actor.run());
        (handle, task_handle)
    }

    fn new(spawn: SessionSpawn) -> (Self, SessionHandle) {
        let SessionSpawn {
            code,
            request,
            timings,
            cancel_token,
            events,
            metrics,
        } = spawn;

        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);
        let session_id = Uuid::new_v4();
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Session, &code));
        let scheduler = Scheduler::new(
            sender.downgrade(),
            Arc::clone(&mailbox),
            cancel_token.clone(),
        );

        let owner = request.owner_identity;
        let mut participants = HashMap::new();
        participants.insert(
            owner.clone(),
            Participant::new(owner.clone(), request.connection, 0),
        );
        metrics.participant_joined();

        let actor = Self {
            code: code.clone(),
            session_id,
            owner,
            receiver,
            cancel_token: cancel_token.clone(),
            scheduler,
            participants,
            next_join_seq: 1,
            questions: Arc::from(request.questions),
            question_ids: request.question_ids,
            round_index: 0,
            phase: Phase::Waiting,
            round_timer: None,
            revealed_round: None,
            category_filter: request.category_filter,
            difficulty_mode: request.difficulty_mode,
            timings,
            created_at: chrono::Utc::now().timestamp(),
            faulted: Vec::new(),
            closed: false,
            events,
            metrics,
            mailbox: Arc::clone(&mailbox),
        };

        let handle = SessionHandle {
            code,
            session_id,
            sender,
            cancel_token,
            monitor: mailbox,
        };

        (actor, handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "qc.actor.session", fields(room_code = %self.code, session_id = %self.session_id))]
    async fn run(mut self) {
        info!(
            target: "qc.actor.session",
            room_code = %self.code,
            owner = %self.owner,
            questions = self.questions.len(),
            "SessionActor started"
        );

        let created = ServerMessage::RoomCreated {
            room_code: self.code.clone(),
            host: self.owner.clone(),
            players: self.roster(),
        };
        let owner = self.owner.clone();
        self.send_to_one(&owner, created);
        self.drain_faults();

        while !self.closed {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "qc.actor.session",
                        room_code = %self.code,
                        "SessionActor received cancellation signal"
                    );
                    self.close(CloseReason::Shutdown);
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "qc.actor.session",
                                room_code = %self.code,
                                "SessionActor channel closed, exiting"
                            );
                            self.close(CloseReason::Shutdown);
                        }
                    }
                }
            }
        }

        info!(
            target: "qc.actor.session",
            room_code = %self.code,
            messages_processed = self.mailbox.messages_processed(),
            messages_dropped = self.mailbox.messages_dropped(),
            peak_mailbox_depth = self.mailbox.peak_depth(),
            "SessionActor stopped"
        );
    }

    fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Join {
                identity,
                connection,
                respond_to,
            } => {
                let result = self.handle_join(identity, connection);
                let _ = respond_to.send(result);
            }

            SessionMessage::Leave {
                identity,
                connection_id,
                respond_to,
            } => {
                let outcome = self.handle_leave(&identity, connection_id);
                let _ = respond_to.send(outcome);
            }

            SessionMessage::Start { by } => self.handle_start(&by),

            SessionMessage::SubmitAnswer { identity, answer } => {
                self.handle_submit(&identity, answer);
            }

            SessionMessage::Chat { identity, text } => self.handle_chat(&identity, &text),

            SessionMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }

            SessionMessage::Scheduled(continuation) => self.handle_continuation(continuation),
        }

        self.drain_faults();
    }

    #[instrument(skip_all, fields(room_code = %self.code))]
    fn handle_join(
        &mut self,
        identity: String,
        connection: ConnectionHandle,
    ) -> Result<SessionSnapshot, QcError> {
        if self.phase != Phase::Waiting {
            debug!(
                target: "qc.actor.session",
                %identity,
                phase = self.phase.as_str(),
                "Join rejected, game already started"
            );
            return Err(QcError::JoinRejected {
                code: self.code.clone(),
                phase: self.phase.as_str(),
            });
        }

        let reconnect = if let Some(existing) = self.participants.get_mut(&identity) {
            existing.connection = connection;
            true
        } else {
            let join_seq = self.next_join_seq;
            self.next_join_seq = self.next_join_seq.saturating_add(1);
            self.participants.insert(
                identity.clone(),
                Participant::new(identity.clone(), connection, join_seq),
            );
            self.metrics.participant_joined();
            false
        };

        info!(
            target: "qc.actor.session",
            room_code = %self.code,
            identity = %identity,
            reconnect,
            participants = self.participants.len(),
            "Participant joined"
        );

        let players = self.roster();
        self.send_to_one(
            &identity,
            ServerMessage::RoomJoined {
                room_code: self.code.clone(),
                host: self.owner.clone(),
                players: players.clone(),
            },
        );
        self.broadcast(ServerMessage::PlayerJoined {
            player: identity,
            players,
        });

        Ok(self.snapshot())
    }

    fn handle_leave(&mut self, identity: &str, connection_id: Option<Uuid>) -> LeaveOutcome {
        let Some(participant) = self.participants.get(identity) else {
            return LeaveOutcome::NotPresent;
        };

        if let Some(expected) = connection_id {
            if participant.connection.connection_id() != expected {
                debug!(
                    target: "qc.actor.session",
                    %identity,
                    "Ignoring disconnect from replaced connection"
                );
                return LeaveOutcome::NotPresent;
            }
        }

        self.remove_participant(identity)
    }

    /// Remove a participant and close the session if the owner left or
    /// nobody remains.
    fn remove_participant(&mut self, identity: &str) -> LeaveOutcome {
        if self.participants.remove(identity).is_none() {
            return LeaveOutcome::NotPresent;
        }
        self.metrics.participants_left(1);

        info!(
            target: "qc.actor.session",
            room_code = %self.code,
            identity = %identity,
            remaining = self.participants.len(),
            "Participant left"
        );

        if identity == self.owner {
            self.close(CloseReason::HostLeft);
            return LeaveOutcome::SessionClosed {
                reason: CloseReason::HostLeft,
            };
        }

        if self.participants.is_empty() {
            self.close(CloseReason::Empty);
            return LeaveOutcome::SessionClosed {
                reason: CloseReason::Empty,
            };
        }

        let players = self.roster();
        self.broadcast(ServerMessage::PlayerLeft {
            player: identity.to_string(),
            players,
        });

        LeaveOutcome::Left {
            remaining: self.participants.len(),
        }
    }

    #[instrument(skip_all, fields(room_code = %self.code))]
    fn handle_start(&mut self, by: &str) {
        if by != self.owner {
            debug!(target: "qc.actor.session", identity = %by, "Start ignored, not the owner");
            return;
        }
        if self.phase != Phase::Waiting {
            debug!(
                target: "qc.actor.session",
                phase = self.phase.as_str(),
                "Start ignored, game already started"
            );
            return;
        }

        for participant in self.participants.values_mut() {
            participant.card.reset();
            participant.current_answer = None;
            participant.answered = false;
        }
        self.round_index = 0;
        self.revealed_round = None;
        self.phase = Phase::Countdown;

        info!(
            target: "qc.actor.session",
            room_code = %self.code,
            participants = self.participants.len(),
            total_questions = self.questions.len(),
            "Game starting"
        );

        self.countdown_step(self.timings.countdown_from);
    }

    fn countdown_step(&mut self, count: u32) {
        if count == 0 {
            self.begin_play();
            return;
        }

        self.broadcast(ServerMessage::Countdown { count });
        self.scheduler.schedule(
            self.timings.tick,
            Continuation::CountdownTick {
                remaining: count.saturating_sub(1),
            },
        );
    }

    fn begin_play(&mut self) {
        self.broadcast(ServerMessage::GameStart {
            total_questions: self.questions.len(),
        });
        self.phase = Phase::Playing;
        self.advance();
    }

    /// Send the current question, or finish when none remain.
    fn advance(&mut self) {
        let questions = Arc::clone(&self.questions);
        let index = self.round_index;
        let Some(question) = questions.get(index) else {
            self.finish();
            return;
        };

        for participant in self.participants.values_mut() {
            participant.answered = false;
            participant.current_answer = None;
        }

        let question_id = self
            .question_ids
            .get(index)
            .copied()
            .unwrap_or(index as u64 + 1);

        debug!(target: "qc.actor.session", round = index, question_id, "Sending question");

        self.broadcast(ServerMessage::Question {
            question_number: index + 1,
            total_questions: questions.len(),
            question_id,
            question: question.text.clone(),
            choices: question.options.to_vec(),
            category: question.category.clone(),
            difficulty: question.difficulty,
            time_limit: self.timings.question_time_limit,
        });

        self.round_timer = Some(self.scheduler.round_timer(
            index,
            self.timings.question_time_limit,
            self.timings.tick,
        ));
    }

    fn handle_submit(&mut self, identity: &str, answer: usize) {
        if self.phase != Phase::Playing {
            debug!(
                target: "qc.actor.session",
                %identity,
                phase = self.phase.as_str(),
                "Answer ignored outside of play"
            );
            return;
        }

        let Some(participant) = self.participants.get_mut(identity) else {
            debug!(
                target: "qc.actor.session",
                %identity,
                "Answer from unknown participant ignored"
            );
            return;
        };

        if participant.answered {
            debug!(target: "qc.actor.session", %identity, "Duplicate answer ignored");
            return;
        }

        participant.answered = true;
        participant.current_answer = Some(answer);

        let players = self.roster();
        self.broadcast(ServerMessage::PlayerAnswered {
            player: identity.to_string(),
            players,
        });

        if self.all_answered() {
            if let Some(timer) = self.round_timer.take() {
                timer.cancel();
            }
            self.reveal(RevealTrigger::AllAnswered);
        }
    }

    fn handle_chat(&mut self, identity: &str, text: &str) {
        if !self.participants.contains_key(identity) {
            debug!(target: "qc.actor.session", %identity, "Chat from unknown participant ignored");
            return;
        }

        self.broadcast(ServerMessage::Chat {
            player: identity.to_string(),
            message: truncate_chat(text),
        });
    }

    fn handle_continuation(&mut self, continuation: Continuation) {
        match continuation {
            Continuation::CountdownTick { remaining } => {
                if self.phase != Phase::Countdown {
                    self.discard(continuation);
                    return;
                }
                self.countdown_step(remaining);
            }

            Continuation::RoundTick { round, remaining } => {
                if self.phase != Phase::Playing
                    || round != self.round_index
                    || self.revealed_round == Some(round)
                {
                    self.discard(continuation);
                    return;
                }

                if self.all_answered() {
                    self.reveal(RevealTrigger::AllAnswered);
                    return;
                }

                self.broadcast(ServerMessage::Timer { remaining });
                if remaining == 0 {
                    self.reveal(RevealTrigger::Timeout);
                }
            }

            Continuation::AdvanceRound { round } => {
                if self.phase != Phase::RevealingAnswer || round != self.round_index {
                    self.discard(continuation);
                    return;
                }
                self.round_index = self.round_index.saturating_add(1);
                self.phase = Phase::Playing;
                self.advance();
            }

            Continuation::GraceExpired => {
                if self.phase != Phase::Finished {
                    self.discard(continuation);
                    return;
                }
                info!(
                    target: "qc.actor.session",
                    room_code = %self.code,
                    "Finished session grace window elapsed"
                );
                self.close(CloseReason::Expired);
            }
        }
    }

    fn discard(&self, continuation: Continuation) {
        debug!(
            target: "qc.actor.session",
            phase = self.phase.as_str(),
            round = self.round_index,
            ?continuation,
            "Stale continuation discarded"
        );
    }

    /// Claim the reveal for the current round. False if already revealed.
    fn try_claim_reveal(&mut self) -> bool {
        if self.revealed_round == Some(self.round_index) {
            return false;
        }
        self.revealed_round = Some(self.round_index);
        true
    }

    #[instrument(skip_all, fields(room_code = %self.code, round = self.round_index))]
    fn reveal(&mut self, trigger: RevealTrigger) {
        let questions = Arc::clone(&self.questions);
        let Some(question) = questions.get(self.round_index) else {
            debug!(target: "qc.actor.session", "No question to reveal");
            return;
        };

        if !self.try_claim_reveal() {
            debug!(target: "qc.actor.session", "Reveal already done for this round");
            return;
        }

        self.round_timer = None;
        self.phase = Phase::RevealingAnswer;

        let mut ordered: Vec<&mut Participant> = self.participants.values_mut().collect();
        ordered.sort_by_key(|p| p.join_seq);

        let mut results: Vec<RoundResult> = ordered
            .into_iter()
            .map(|p| {
                let correct = p.current_answer.is_some_and(|a| question.is_correct(a));
                let points_earned = p.card.apply(correct, question.difficulty);
                RoundResult {
                    name: p.identity.clone(),
                    answer: p.current_answer,
                    correct,
                    points_earned,
                    score: p.card.score,
                    streak: p.card.streak,
                }
            })
            .collect();
        results.sort_by(|a, b| b.score.cmp(&a.score));

        prom::record_round_revealed(trigger.as_str());
        info!(
            target: "qc.actor.session",
            room_code = %self.code,
            round = self.round_index,
            trigger = trigger.as_str(),
            "Round revealed"
        );

        let standings = self.roster();
        self.broadcast(ServerMessage::AnswerResult {
            correct_answer: question.correct_index,
            explanation: question.explanation.clone(),
            results,
            standings,
        });

        self.scheduler.schedule(
            self.timings.ticks(self.timings.reveal_settle),
            Continuation::AdvanceRound {
                round: self.round_index,
            },
        );
    }

    fn finish(&mut self) {
        self.phase = Phase::Finished;
        self.round_timer = None;

        let mut standings: Vec<FinalStanding> = self
            .ordered()
            .into_iter()
            .map(|p| FinalStanding {
                name: p.identity.clone(),
                score: p.card.score,
                correct_count: p.card.correct_count,
                best_streak: p.card.best_streak,
            })
            .collect();
        standings.sort_by(|a, b| b.score.cmp(&a.score));

        info!(
            target: "qc.actor.session",
            room_code = %self.code,
            total_questions = self.questions.len(),
            winner = standings.first().map(|s| s.name.as_str()).unwrap_or_default(),
            "Game finished"
        );

        self.broadcast(ServerMessage::GameOver {
            standings,
            total_questions: self.questions.len(),
        });

        self.scheduler.schedule(
            self.timings.ticks(self.timings.finished_grace),
            Continuation::GraceExpired,
        );
    }

    /// Tear the session down. Idempotent.
    fn close(&mut self, reason: CloseReason) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.round_timer = None;
        // Stops every pending continuation.
        self.cancel_token.cancel();

        if let Some(text) = reason.client_message() {
            self.broadcast(ServerMessage::RoomClosed {
                reason: text.to_string(),
            });
        }
        self.faulted.clear();

        self.metrics.participants_left(self.participants.len());
        self.participants.clear();

        let _ = self.events.send(SessionEvent::Closed {
            code: self.code.clone(),
            session_id: self.session_id,
            reason,
        });

        info!(
            target: "qc.actor.session",
            room_code = %self.code,
            reason = reason.as_str(),
            "Session closed"
        );
    }

    fn all_answered(&self) -> bool {
        !self.participants.is_empty() && self.participants.values().all(|p| p.answered)
    }

    fn ordered(&self) -> Vec<&Participant> {
        let mut ordered: Vec<&Participant> = self.participants.values().collect();
        ordered.sort_by_key(|p| p.join_seq);
        ordered
    }

    fn roster(&self) -> Vec<PlayerSummary> {
        self.ordered()
            .into_iter()
            .map(|p| p.summary(&self.owner))
            .collect()
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            code: self.code.clone(),
            session_id: self.session_id,
            owner: self.owner.clone(),
            phase: self.phase,
            round_index: self.round_index,
            total_questions: self.questions.len(),
            participants: self
                .ordered()
                .into_iter()
                .map(|p| p.state(&self.owner))
                .collect(),
            category_filter: self.category_filter.clone(),
            difficulty_mode: self.difficulty_mode,
            created_at: self.created_at,
        }
    }

    /// Deliver to every participant, marking the ones whose send fails.
    fn broadcast(&mut self, message: ServerMessage) {
        for participant in self.participants.values() {
            if let Err(e) = participant.connection.send(message.clone()) {
                debug!(
                    target: "qc.actor.session",
                    identity = %participant.identity,
                    error = %e,
                    "Broadcast delivery failed"
                );
                self.faulted.push(participant.identity.clone());
            }
        }
    }

    fn send_to_one(&mut self, identity: &str, message: ServerMessage) {
        let Some(participant) = self.participants.get(identity) else {
            return;
        };
        if let Err(e) = participant.connection.send(message) {
            debug!(target: "qc.actor.session", %identity, error = %e, "Unicast delivery failed");
            self.faulted.push(identity.to_string());
        }
    }

    /// Remove participants whose connection failed since the last drain.
    fn drain_faults(&mut self) {
        while let Some(identity) = self.faulted.pop() {
            if self.closed {
                self.faulted.clear();
                return;
            }
            if !self.participants.contains_key(&identity) {
                continue;
            }

            warn!(
                target: "qc.actor.session",
                room_code = %self.code,
                identity = %identity,
                "Transport fault, removing participant"
            );
            self.metrics.record_transport_fault();
            let _ = self.events.send(SessionEvent::ParticipantDropped {
                code: self.code.clone(),
                session_id: self.session_id,
                identity: identity.clone(),
            });
            self.remove_participant(&identity);
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::questions::Difficulty;
    use std::time::Duration;

    fn question(text: &str, correct_index: usize, difficulty: Difficulty) -> Question {
        Question {
            text: text.to_string(),
            options: [
                "A".to_string(),
                "B".to_string(),
                "C".to_string(),
                "D".to_string(),
            ],
            correct_index,
            explanation: format!("{text} explained"),
            difficulty,
            category: "general".to_string(),
        }
    }

    fn timings() -> SessionTimings {
        SessionTimings {
            tick: Duration::from_secs(1),
            countdown_from: 3,
            question_time_limit: 3,
            reveal_settle: 2,
            finished_grace: 10,
        }
    }

    struct TestSession {
        handle: SessionHandle,
        owner_rx: mpsc::Receiver<ServerMessage>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        metrics: Arc<ActorMetrics>,
        _task: JoinHandle<()>,
    }

    fn spawn_session(questions: Vec<Question>) -> TestSession {
        let (connection, owner_rx) = ConnectionHandle::channel(64);
        let (events_tx, events) = mpsc::unbounded_channel();
        let metrics = ActorMetrics::new();
        let question_ids = (100..).take(questions.len()).collect();

        let (handle, task) = SessionActor::spawn(SessionSpawn {
            code: "QZ123".to_string(),
            request: CreateSessionRequest {
                owner_identity: "Ann".to_string(),
                connection,
                questions,
                question_ids,
                category_filter: None,
                difficulty_mode: DifficultyMode::Progressive,
            },
            timings: timings(),
            cancel_token: CancellationToken::new(),
            events: events_tx,
            metrics: Arc::clone(&metrics),
        });

        TestSession {
            handle,
            owner_rx,
            events,
            metrics,
            _task: task,
        }
    }

    async fn next(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(600), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("connection closed")
    }

    /// Skip frames until one of `message_type` arrives.
    async fn wait_for(rx: &mut mpsc::Receiver<ServerMessage>, message_type: &str) -> ServerMessage {
        loop {
            let msg = next(rx).await;
            if msg.message_type() == message_type {
                return msg;
            }
        }
    }

    #[tokio::test]
    async fn test_owner_receives_room_created() {
        let mut s = spawn_session(vec![]);

        let msg = next(&mut s.owner_rx).await;
        match msg {
            ServerMessage::RoomCreated {
                room_code,
                host,
                players,
            } => {
                assert_eq!(room_code, "QZ123");
                assert_eq!(host, "Ann");
                assert_eq!(players.len(), 1);
                assert!(players[0].is_host);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(s.metrics.participant_count(), 1);

        s.handle.cancel();
    }

    #[tokio::test]
    async fn test_join_notifies_joiner_then_room() {
        let mut s = spawn_session(vec![]);
        let _ = next(&mut s.owner_rx).await;

        let (bob, mut bob_rx) = ConnectionHandle::channel(64);
        let snapshot = s.handle.join("Bob".to_string(), bob).await.unwrap();
        assert_eq!(snapshot.participants.len(), 2);
        assert_eq!(snapshot.participants[0].identity, "Ann");
        assert_eq!(snapshot.participants[1].identity, "Bob");

        assert!(matches!(
            next(&mut bob_rx).await,
            ServerMessage::RoomJoined { ref host, .. } if host == "Ann"
        ));
        assert!(matches!(
            next(&mut bob_rx).await,
            ServerMessage::PlayerJoined { ref player, .. } if player == "Bob"
        ));
        assert!(matches!(
            next(&mut s.owner_rx).await,
            ServerMessage::PlayerJoined { ref players, .. } if players.len() == 2
        ));

        s.handle.cancel();
    }

    #[tokio::test]
    async fn test_reconnect_replaces_connection_without_duplicate() {
        let mut s = spawn_session(vec![]);
        let _ = next(&mut s.owner_rx).await;

        let (first, _first_rx) = ConnectionHandle::channel(64);
        let first_id = first.connection_id();
        s.handle.join("Bob".to_string(), first).await.unwrap();

        let (second, mut second_rx) = ConnectionHandle::channel(64);
        let second_id = second.connection_id();
        let snapshot = s.handle.join("Bob".to_string(), second).await.unwrap();

        assert_eq!(snapshot.participants.len(), 2);
        assert_eq!(
            snapshot.participant("Bob").unwrap().connection_id,
            second_id
        );
        assert_eq!(s.metrics.participant_count(), 2);
        assert!(matches!(
            next(&mut second_rx).await,
            ServerMessage::RoomJoined { .. }
        ));

        // The replaced socket closing must not evict the reconnected participant.
        let outcome = s
            .handle
            .leave("Bob".to_string(), Some(first_id))
            .await
            .unwrap();
        assert_eq!(outcome, LeaveOutcome::NotPresent);
        let state = s.handle.get_state().await.unwrap();
        assert!(state.participant("Bob").is_some());

        s.handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_owner_start_is_ignored() {
        let mut s = spawn_session(vec![question("q1", 0, Difficulty::Easy)]);
        let _ = next(&mut s.owner_rx).await;

        let (bob, _bob_rx) = ConnectionHandle::channel(64);
        s.handle.join("Bob".to_string(), bob).await.unwrap();

        s.handle.start("Bob".to_string()).await.unwrap();
        let state = s.handle.get_state().await.unwrap();
        assert_eq!(state.phase, Phase::Waiting);

        s.handle.start("Ann".to_string()).await.unwrap();
        let state = s.handle.get_state().await.unwrap();
        assert_eq!(state.phase, Phase::Countdown);

        s.handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_then_first_question() {
        let mut s = spawn_session(vec![question("q1", 2, Difficulty::Medium)]);
        let _ = next(&mut s.owner_rx).await;

        s.handle.start("Ann".to_string()).await.unwrap();

        for expected in [3, 2, 1] {
            assert_eq!(
                next(&mut s.owner_rx).await,
                ServerMessage::Countdown { count: expected }
            );
        }
        assert_eq!(
            next(&mut s.owner_rx).await,
            ServerMessage::GameStart { total_questions: 1 }
        );

        match next(&mut s.owner_rx).await {
            ServerMessage::Question {
                question_number,
                total_questions,
                question_id,
                time_limit,
                choices,
                ..
            } => {
                assert_eq!(question_number, 1);
                assert_eq!(total_questions, 1);
                assert_eq!(question_id, 100);
                assert_eq!(time_limit, 3);
                assert_eq!(choices.len(), 4);
            }
            other => panic!("unexpected {other:?}"),
        }

        s.handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_rejected_after_start() {
        let mut s = spawn_session(vec![question("q1", 0, Difficulty::Easy)]);
        let _ = next(&mut s.owner_rx).await;

        s.handle.start("Ann".to_string()).await.unwrap();
        let _ = wait_for(&mut s.owner_rx, "question").await;

        let (late, _late_rx) = ConnectionHandle::channel(64);
        let result = s.handle.join("Late".to_string(), late).await;
        assert!(matches!(result, Err(QcError::JoinRejected { .. })));

        s.handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reveal_after_timer_frames() {
        let mut s = spawn_session(vec![question("q1", 0, Difficulty::Easy)]);
        let _ = next(&mut s.owner_rx).await;

        s.handle.start("Ann".to_string()).await.unwrap();
        let _ = wait_for(&mut s.owner_rx, "question").await;

        for expected in [2, 1, 0] {
            assert_eq!(
                next(&mut s.owner_rx).await,
                ServerMessage::Timer {
                    remaining: expected
                }
            );
        }

        match next(&mut s.owner_rx).await {
            ServerMessage::AnswerResult { results, .. } => {
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].answer, None);
                assert!(!results[0].correct);
                assert_eq!(results[0].points_earned, 0);
            }
            other => panic!("unexpected {other:?}"),
        }

        s.handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_answered_reveals_without_timer_frames() {
        let mut s = spawn_session(vec![
            question("q1", 1, Difficulty::Hard),
            question("q2", 0, Difficulty::Easy),
        ]);
        let _ = next(&mut s.owner_rx).await;

        s.handle.start("Ann".to_string()).await.unwrap();
        let _ = wait_for(&mut s.owner_rx, "question").await;

        s.handle.submit_answer("Ann".to_string(), 1).await.unwrap();

        assert!(matches!(
            next(&mut s.owner_rx).await,
            ServerMessage::PlayerAnswered { .. }
        ));
        match next(&mut s.owner_rx).await {
            ServerMessage::AnswerResult {
                correct_answer,
                results,
                ..
            } => {
                assert_eq!(correct_answer, 1);
                assert_eq!(results[0].points_earned, 30);
            }
            other => panic!("expected answer_result, got {other:?}"),
        }

        // Nothing but the next question once the settle delay passes.
        let after_reveal = next(&mut s.owner_rx).await;
        assert_eq!(after_reveal.message_type(), "question");
        assert!(s.owner_rx.try_recv().is_err());

        s.handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_answer_wins() {
        let mut s = spawn_session(vec![question("q1", 0, Difficulty::Easy)]);
        let _ = next(&mut s.owner_rx).await;
        let (bob, _bob_rx) = ConnectionHandle::channel(64);
        s.handle.join("Bob".to_string(), bob).await.unwrap();

        s.handle.start("Ann".to_string()).await.unwrap();
        let _ = wait_for(&mut s.owner_rx, "question").await;

        s.handle.submit_answer("Ann".to_string(), 0).await.unwrap();
        s.handle.submit_answer("Ann".to_string(), 3).await.unwrap();

        let state = s.handle.get_state().await.unwrap();
        let ann = state.participant("Ann").unwrap();
        assert_eq!(ann.current_answer, Some(0));
        assert!(ann.answered);
        assert_eq!(state.phase, Phase::Playing);

        s.handle.cancel();
    }

    #[tokio::test]
    async fn test_reveal_past_last_question_keeps_phase() {
        let (connection, mut owner_rx) = ConnectionHandle::channel(64);
        let (events_tx, _events) = mpsc::unbounded_channel();
        let (mut actor, _handle) = SessionActor::new(SessionSpawn {
            code: "QZ999".to_string(),
            request: CreateSessionRequest {
                owner_identity: "Ann".to_string(),
                connection,
                questions: vec![question("q1", 0, Difficulty::Easy)],
                question_ids: vec![1],
                category_filter: None,
                difficulty_mode: DifficultyMode::Progressive,
            },
            timings: timings(),
            cancel_token: CancellationToken::new(),
            events: events_tx,
            metrics: ActorMetrics::new(),
        });
        actor.phase = Phase::Playing;
        actor.round_index = 1;

        actor.reveal(RevealTrigger::Timeout);

        assert_eq!(actor.phase, Phase::Playing);
        assert_eq!(actor.revealed_round, None);
        assert!(owner_rx.try_recv().is_err(), "No frame for a missing round");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_question_list_finishes_immediately() {
        let mut s = spawn_session(vec![]);
        let _ = next(&mut s.owner_rx).await;

        s.handle.start("Ann".to_string()).await.unwrap();
        let _ = wait_for(&mut s.owner_rx, "game_start").await;
        assert!(matches!(
            next(&mut s.owner_rx).await,
            ServerMessage::GameOver {
                total_questions: 0,
                ..
            }
        ));

        let state = s.handle.get_state().await.unwrap();
        assert_eq!(state.phase, Phase::Finished);
        s.handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_expiry_closes_silently() {
        let mut s = spawn_session(vec![]);
        let _ = next(&mut s.owner_rx).await;

        s.handle.start("Ann".to_string()).await.unwrap();
        let _ = wait_for(&mut s.owner_rx, "game_over").await;

        match s.events.recv().await.unwrap() {
            SessionEvent::Closed { reason, code, .. } => {
                assert_eq!(reason, CloseReason::Expired);
                assert_eq!(code, "QZ123");
            }
            other => panic!("unexpected {other:?}"),
        }

        // No room_closed frame; the connection just ends.
        assert_eq!(s.owner_rx.recv().await, None);
        assert_eq!(s.metrics.participant_count(), 0);
    }

    #[tokio::test]
    async fn test_owner_leave_closes_room_for_everyone() {
        let mut s = spawn_session(vec![]);
        let _ = next(&mut s.owner_rx).await;

        let (bob, mut bob_rx) = ConnectionHandle::channel(64);
        s.handle.join("Bob".to_string(), bob).await.unwrap();

        let outcome = s.handle.leave("Ann".to_string(), None).await.unwrap();
        assert_eq!(
            outcome,
            LeaveOutcome::SessionClosed {
                reason: CloseReason::HostLeft
            }
        );

        let closed = wait_for(&mut bob_rx, "room_closed").await;
        assert_eq!(
            closed,
            ServerMessage::RoomClosed {
                reason: "Host left the game".to_string()
            }
        );
        assert!(matches!(
            s.events.recv().await.unwrap(),
            SessionEvent::Closed {
                reason: CloseReason::HostLeft,
                ..
            }
        ));
        assert!(s.handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_non_owner_leave_broadcasts_roster() {
        let mut s = spawn_session(vec![]);
        let _ = next(&mut s.owner_rx).await;

        let (bob, _bob_rx) = ConnectionHandle::channel(64);
        s.handle.join("Bob".to_string(), bob).await.unwrap();
        let _ = wait_for(&mut s.owner_rx, "player_joined").await;

        let outcome = s.handle.leave("Bob".to_string(), None).await.unwrap();
        assert_eq!(outcome, LeaveOutcome::Left { remaining: 1 });

        match next(&mut s.owner_rx).await {
            ServerMessage::PlayerLeft { player, players } => {
                assert_eq!(player, "Bob");
                assert_eq!(players.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }

        // Idempotent
        let outcome = s.handle.leave("Bob".to_string(), None).await.unwrap();
        assert_eq!(outcome, LeaveOutcome::NotPresent);

        s.handle.cancel();
    }

    #[tokio::test]
    async fn test_transport_fault_removes_participant_after_broadcast() {
        let mut s = spawn_session(vec![]);
        let _ = next(&mut s.owner_rx).await;

        let (bob, bob_rx) = ConnectionHandle::channel(64);
        s.handle.join("Bob".to_string(), bob).await.unwrap();
        let _ = wait_for(&mut s.owner_rx, "player_joined").await;

        drop(bob_rx);
        s.handle
            .chat("Ann".to_string(), "anyone there?".to_string())
            .await
            .unwrap();

        // Ann still gets the chat, then learns Bob was dropped.
        assert!(matches!(
            next(&mut s.owner_rx).await,
            ServerMessage::Chat { .. }
        ));
        assert!(matches!(
            next(&mut s.owner_rx).await,
            ServerMessage::PlayerLeft { ref player, .. } if player == "Bob"
        ));
        assert!(matches!(
            s.events.recv().await.unwrap(),
            SessionEvent::ParticipantDropped { ref identity, .. } if identity == "Bob"
        ));
        assert_eq!(s.metrics.transport_fault_count(), 1);

        s.handle.cancel();
    }

    #[tokio::test]
    async fn test_chat_is_truncated() {
        let mut s = spawn_session(vec![]);
        let _ = next(&mut s.owner_rx).await;

        s.handle
            .chat("Ann".to_string(), "x".repeat(500))
            .await
            .unwrap();

        match next(&mut s.owner_rx).await {
            ServerMessage::Chat { player, message } => {
                assert_eq!(player, "Ann");
                assert_eq!(message.len(), 200);
            }
            other => panic!("unexpected {other:?}"),
        }

        s.handle.cancel();
    }

    #[tokio::test]
    async fn test_cancel_notifies_shutdown() {
        let mut s = spawn_session(vec![]);
        let _ = next(&mut s.owner_rx).await;

        s.handle.cancel();

        assert_eq!(
            next(&mut s.owner_rx).await,
            ServerMessage::RoomClosed {
                reason: "Server is shutting down".to_string()
            }
        );
        assert!(matches!(
            s.events.recv().await.unwrap(),
            SessionEvent::Closed {
                reason: CloseReason::Shutdown,
                ..
            }
        ));
    }
}
