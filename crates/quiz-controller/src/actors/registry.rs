//! `SessionRegistryActor` - singleton that owns every live room.
//!
//! The registry:
//!
//! - Generates room codes and spawns one `SessionActor` per room
//! - Maps each identity to the room it is currently in
//! - Routes player actions to the right session
//! - Removes sessions when they close, exactly once
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Watches session `JoinHandle`s for panics
//!
//! Sessions report back through an unbounded [`SessionEvent`] channel, so
//! a session never waits on the registry and the registry may await
//! sessions without risk of a cycle.
//!
//! # Graceful Shutdown
//!
//! On shutdown the registry:
//! 1. Sets `accepting_new = false`
//! 2. Cancels the root `CancellationToken` (each session sends `room_closed`)
//! 3. Waits for session tasks to finish

use crate::config::SessionTimings;
use crate::errors::QcError;
use crate::observability::metrics as prom;

use super::connection::ConnectionHandle;
use super::messages::{
    CloseReason, CreateSessionRequest, LeaveOutcome, RegistryMessage, RegistryStatus,
    SessionEvent, SessionSnapshot,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::session::{SessionActor, SessionHandle, SessionSpawn};

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// How long to wait for a removed session task to finish.
const SESSION_CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// How long graceful shutdown waits for each session task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub const ROOM_CODE_LENGTH: usize = 5;
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Random room code of [`ROOM_CODE_LENGTH`] characters from `[A-Z0-9]`.
pub fn generate_room_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..ROOM_CODE_LENGTH)
        .map(|_| char::from(ROOM_CODE_ALPHABET.choose(&mut *rng).copied().unwrap_or(b'A')))
        .collect()
}

/// Generate codes until one is not already in `existing`.
pub fn unique_room_code<V, R: Rng + ?Sized>(existing: &HashMap<String, V>, rng: &mut R) -> String {
    loop {
        let code = generate_room_code(rng);
        if !existing.contains_key(&code) {
            return code;
        }
    }
}

/// Room codes are case-insensitive; the canonical form is uppercase.
#[must_use]
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Handle to the `SessionRegistryActor`.
///
/// This is the public interface used by the transport layer. Every method
/// is async and request/reply methods resolve through oneshot channels.
#[derive(Clone, Debug)]
pub struct SessionRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
    monitor: Arc<MailboxMonitor>,
}

impl SessionRegistryHandle {
    /// Spawn the registry actor and return a handle to it.
    #[must_use]
    pub fn new(qc_id: String, timings: SessionTimings, metrics: Arc<ActorMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let monitor = Arc::new(MailboxMonitor::new(ActorType::Registry, &qc_id));

        let actor = SessionRegistryActor::new(
            qc_id,
            receiver,
            cancel_token.clone(),
            timings,
            metrics,
            Arc::clone(&monitor),
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            monitor,
        }
    }

    /// Create a room owned by `request.owner_identity`.
    ///
    /// Returns `Draining` once shutdown has begun.
    pub async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<SessionSnapshot, QcError> {
        if self.cancel_token.is_cancelled() {
            return Err(QcError::Draining);
        }

        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::CreateSession {
            request,
            respond_to: tx,
        })
        .await?;

        self.receive(rx).await?
    }

    /// Join (or reconnect to) the room with `code`, case-insensitively.
    pub async fn join_session(
        &self,
        code: String,
        identity: String,
        connection: ConnectionHandle,
    ) -> Result<SessionSnapshot, QcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::JoinSession {
            code,
            identity,
            connection,
            respond_to: tx,
        })
        .await?;

        self.receive(rx).await?
    }

    /// Remove `identity` from whatever room it is in.
    pub async fn leave_session(&self, identity: String) -> Result<LeaveOutcome, QcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::LeaveSession {
            identity,
            respond_to: tx,
        })
        .await?;

        self.receive(rx).await
    }

    /// Report a closed transport. Ignored if `connection_id` has since been
    /// replaced by a reconnect.
    pub async fn disconnect(
        &self,
        code: String,
        identity: String,
        connection_id: Uuid,
    ) -> Result<LeaveOutcome, QcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::Disconnect {
            code,
            identity,
            connection_id,
            respond_to: tx,
        })
        .await?;

        self.receive(rx).await
    }

    /// Snapshot of the room with `code`, or `None` if it does not exist.
    pub async fn lookup(&self, code: String) -> Result<Option<SessionSnapshot>, QcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::Lookup {
            code,
            respond_to: tx,
        })
        .await?;

        self.receive(rx).await
    }

    /// Ask the identity's room to start. Non-owner requests are ignored by
    /// the room, not rejected here.
    pub async fn start_game(&self, identity: String) -> Result<(), QcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::StartGame {
            identity,
            respond_to: tx,
        })
        .await?;

        self.receive(rx).await?
    }

    pub async fn submit_answer(&self, identity: String, answer: usize) -> Result<(), QcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::SubmitAnswer {
            identity,
            answer,
            respond_to: tx,
        })
        .await?;

        self.receive(rx).await?
    }

    pub async fn chat(&self, identity: String, text: String) -> Result<(), QcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::Chat {
            identity,
            text,
            respond_to: tx,
        })
        .await?;

        self.receive(rx).await?
    }

    pub async fn get_status(&self) -> Result<RegistryStatus, QcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::GetStatus { respond_to: tx })
            .await?;

        self.receive(rx).await
    }

    /// Stop accepting rooms and close every live one.
    pub async fn shutdown(&self) -> Result<(), QcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::Shutdown { respond_to: tx })
            .await?;

        self.receive(rx).await?
    }

    /// Cancel the registry actor and every session.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Child token that is cancelled when the registry shuts down.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    async fn send(&self, message: RegistryMessage) -> Result<(), QcError> {
        self.monitor.record_enqueue();
        if let Err(e) = self.sender.send(message).await {
            self.monitor.record_drop();
            if self.cancel_token.is_cancelled() {
                return Err(QcError::Draining);
            }
            return Err(QcError::Internal(format!("channel send failed: {e}")));
        }
        Ok(())
    }

    async fn receive<T>(&self, rx: oneshot::Receiver<T>) -> Result<T, QcError> {
        rx.await.map_err(|e| {
            if self.cancel_token.is_cancelled() {
                QcError::Draining
            } else {
                QcError::Internal(format!("response receive failed: {e}"))
            }
        })
    }
}

/// Managed session state.
struct ManagedSession {
    handle: SessionHandle,
    task_handle: JoinHandle<()>,
    session_id: Uuid,
    created_at: i64,
}

/// The `SessionRegistryActor` implementation.
pub struct SessionRegistryActor {
    qc_id: String,
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Root token; each session gets a child.
    cancel_token: CancellationToken,
    sessions: HashMap<String, ManagedSession>,
    /// Which room each identity is in.
    identity_to_code: HashMap<String, String>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    accepting_new: bool,
    timings: SessionTimings,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl SessionRegistryActor {
    fn new(
        qc_id: String,
        receiver: mpsc::Receiver<RegistryMessage>,
        cancel_token: CancellationToken,
        timings: SessionTimings,
        metrics: Arc<ActorMetrics>,
        mailbox: Arc<MailboxMonitor>,
    ) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();

        Self {
            qc_id,
            receiver,
            cancel_token,
            sessions: HashMap::new(),
            identity_to_code: HashMap::new(),
            events_tx,
            events,
            accepting_new: true,
            timings,
            metrics,
            mailbox,
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "qc.actor.registry", fields(qc_id = %self.qc_id))]
    async fn run(mut self) {
        info!(
            target: "qc.actor.registry",
            qc_id = %self.qc_id,
            "SessionRegistryActor started"
        );

        loop {
            self.check_session_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "qc.actor.registry",
                        qc_id = %self.qc_id,
                        "SessionRegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                Some(event) = self.events.recv() => {
                    self.handle_session_event(event);
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "qc.actor.registry",
                                qc_id = %self.qc_id,
                                "SessionRegistryActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "qc.actor.registry",
            qc_id = %self.qc_id,
            sessions_remaining = self.sessions.len(),
            messages_processed = self.mailbox.messages_processed(),
            messages_dropped = self.mailbox.messages_dropped(),
            peak_mailbox_depth = self.mailbox.peak_depth(),
            "SessionRegistryActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RegistryMessage) {
        // Apply session closures first so requests never see a dead room.
        self.drain_session_events();

        match message {
            RegistryMessage::CreateSession {
                request,
                respond_to,
            } => {
                let result = self.create_session(request).await;
                let _ = respond_to.send(result);
            }

            RegistryMessage::JoinSession {
                code,
                identity,
                connection,
                respond_to,
            } => {
                let result = self.join_session(&code, identity, connection).await;
                let _ = respond_to.send(result);
            }

            RegistryMessage::LeaveSession {
                identity,
                respond_to,
            } => {
                let outcome = self.leave_session(&identity).await;
                let _ = respond_to.send(outcome);
            }

            RegistryMessage::Disconnect {
                code,
                identity,
                connection_id,
                respond_to,
            } => {
                let outcome = self.disconnect(&code, &identity, connection_id).await;
                let _ = respond_to.send(outcome);
            }

            RegistryMessage::Lookup { code, respond_to } => {
                let snapshot = self.lookup(&code).await;
                let _ = respond_to.send(snapshot);
            }

            RegistryMessage::StartGame {
                identity,
                respond_to,
            } => {
                let result = match self.route(&identity) {
                    Ok(handle) => handle.start(identity).await,
                    Err(e) => Err(e),
                };
                let _ = respond_to.send(result);
            }

            RegistryMessage::SubmitAnswer {
                identity,
                answer,
                respond_to,
            } => {
                let result = match self.route(&identity) {
                    Ok(handle) => handle.submit_answer(identity, answer).await,
                    Err(e) => Err(e),
                };
                let _ = respond_to.send(result);
            }

            RegistryMessage::Chat {
                identity,
                text,
                respond_to,
            } => {
                let result = match self.route(&identity) {
                    Ok(handle) => handle.chat(identity, text).await,
                    Err(e) => Err(e),
                };
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            RegistryMessage::Shutdown { respond_to } => {
                let result = self.initiate_shutdown();
                let _ = respond_to.send(result);
            }
        }
    }

    async fn create_session(
        &mut self,
        request: CreateSessionRequest,
    ) -> Result<SessionSnapshot, QcError> {
        if !self.accepting_new {
            return Err(QcError::Draining);
        }

        let code = unique_room_code(&self.sessions, &mut rand::thread_rng());
        let owner = request.owner_identity.clone();

        debug!(
            target: "qc.actor.registry",
            qc_id = %self.qc_id,
            room_code = %code,
            owner = %owner,
            "Creating session actor"
        );

        let (handle, task_handle) = SessionActor::spawn(SessionSpawn {
            code: code.clone(),
            request,
            timings: self.timings,
            cancel_token: self.cancel_token.child_token(),
            events: self.events_tx.clone(),
            metrics: Arc::clone(&self.metrics),
        });

        let session_id = handle.session_id();
        self.sessions.insert(
            code.clone(),
            ManagedSession {
                handle: handle.clone(),
                task_handle,
                session_id,
                created_at: chrono::Utc::now().timestamp(),
            },
        );
        self.metrics.session_created();

        self.move_identity(&owner, &code).await;

        info!(
            target: "qc.actor.registry",
            qc_id = %self.qc_id,
            room_code = %code,
            total_sessions = self.sessions.len(),
            "Session actor created"
        );

        handle.get_state().await
    }

    async fn join_session(
        &mut self,
        code: &str,
        identity: String,
        connection: ConnectionHandle,
    ) -> Result<SessionSnapshot, QcError> {
        let code = normalize_code(code);
        let Some(managed) = self.sessions.get(&code) else {
            return Err(QcError::RoomNotFound(code));
        };
        let handle = managed.handle.clone();

        let snapshot = match handle.join(identity.clone(), connection).await {
            Ok(snapshot) => snapshot,
            Err(QcError::Internal(_)) if handle.is_cancelled() => {
                return Err(QcError::RoomNotFound(code));
            }
            Err(e) => return Err(e),
        };

        self.move_identity(&identity, &code).await;
        Ok(snapshot)
    }

    /// Record `identity` as being in `code`, leaving any other room first.
    async fn move_identity(&mut self, identity: &str, code: &str) {
        let previous = self
            .identity_to_code
            .insert(identity.to_string(), code.to_string());

        if let Some(previous) = previous.filter(|p| p != code) {
            debug!(
                target: "qc.actor.registry",
                identity = %identity,
                from = %previous,
                to = %code,
                "Identity moved rooms, leaving previous"
            );
            self.leave_in(&previous, identity, None).await;
        }
    }

    async fn leave_session(&mut self, identity: &str) -> LeaveOutcome {
        let Some(code) = self.identity_to_code.remove(identity) else {
            return LeaveOutcome::NotPresent;
        };
        self.leave_in(&code, identity, None).await
    }

    async fn disconnect(&mut self, code: &str, identity: &str, connection_id: Uuid) -> LeaveOutcome {
        let code = normalize_code(code);
        let outcome = self.leave_in(&code, identity, Some(connection_id)).await;

        if matches!(outcome, LeaveOutcome::Left { .. })
            && self.identity_to_code.get(identity) == Some(&code)
        {
            self.identity_to_code.remove(identity);
        }
        outcome
    }

    async fn leave_in(
        &mut self,
        code: &str,
        identity: &str,
        connection_id: Option<Uuid>,
    ) -> LeaveOutcome {
        let Some(managed) = self.sessions.get(code) else {
            return LeaveOutcome::NotPresent;
        };
        let handle = managed.handle.clone();

        let outcome = handle
            .leave(identity.to_string(), connection_id)
            .await
            .unwrap_or(LeaveOutcome::NotPresent);

        if let LeaveOutcome::SessionClosed { reason } = outcome {
            self.remove_session(code, reason);
        }
        outcome
    }

    async fn lookup(&mut self, code: &str) -> Option<SessionSnapshot> {
        let code = normalize_code(code);
        let handle = self.sessions.get(&code)?.handle.clone();

        match handle.get_state().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                debug!(
                    target: "qc.actor.registry",
                    room_code = %code,
                    error = %e,
                    "Session did not answer lookup"
                );
                None
            }
        }
    }

    /// Session the identity is currently in.
    fn route(&self, identity: &str) -> Result<SessionHandle, QcError> {
        self.identity_to_code
            .get(identity)
            .and_then(|code| self.sessions.get(code))
            .map(|m| m.handle.clone())
            .ok_or_else(|| QcError::ParticipantNotFound(identity.to_string()))
    }

    /// Forget a session. Safe to call for a code that is already gone.
    fn remove_session(&mut self, code: &str, reason: CloseReason) {
        let Some(managed) = self.sessions.remove(code) else {
            return;
        };

        self.identity_to_code.retain(|_, c| c.as_str() != code);
        managed.handle.cancel();
        self.metrics.session_removed();
        prom::record_session_closed(reason.as_str());

        let ManagedSession {
            task_handle,
            created_at,
            ..
        } = managed;
        let room_code = code.to_string();
        let qc_id = self.qc_id.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(SESSION_CLEANUP_TIMEOUT, task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "qc.actor.registry",
                        qc_id = %qc_id,
                        room_code = %room_code,
                        "Session actor task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "qc.actor.registry",
                        qc_id = %qc_id,
                        room_code = %room_code,
                        error = ?e,
                        "Session actor task panicked during removal"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "qc.actor.registry",
                        qc_id = %qc_id,
                        room_code = %room_code,
                        "Session actor task cleanup timed out"
                    );
                }
            }
        });

        info!(
            target: "qc.actor.registry",
            qc_id = %self.qc_id,
            room_code = %code,
            reason = reason.as_str(),
            lifetime_secs = chrono::Utc::now().timestamp().saturating_sub(created_at),
            total_sessions = self.sessions.len(),
            "Session removed"
        );
    }

    fn drain_session_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_session_event(event);
        }
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::ParticipantDropped {
                code,
                session_id,
                identity,
            } => {
                if self.is_current(&code, session_id)
                    && self.identity_to_code.get(&identity) == Some(&code)
                {
                    self.identity_to_code.remove(&identity);
                }
            }

            SessionEvent::Closed {
                code,
                session_id,
                reason,
            } => {
                // A late event from an older session with a reused code is ignored.
                if self.is_current(&code, session_id) {
                    self.remove_session(&code, reason);
                }
            }
        }
    }

    fn is_current(&self, code: &str, session_id: Uuid) -> bool {
        self.sessions
            .get(code)
            .is_some_and(|m| m.session_id == session_id)
    }

    fn get_status(&self) -> RegistryStatus {
        RegistryStatus {
            session_count: self.sessions.len(),
            participant_count: self.metrics.participant_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    fn initiate_shutdown(&mut self) -> Result<(), QcError> {
        info!(
            target: "qc.actor.registry",
            qc_id = %self.qc_id,
            session_count = self.sessions.len(),
            "Initiating graceful shutdown"
        );

        self.accepting_new = false;
        self.cancel_token.cancel();
        Ok(())
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "qc.actor.registry",
            qc_id = %self.qc_id,
            session_count = self.sessions.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        for managed in self.sessions.values() {
            managed.handle.cancel();
        }

        for (code, managed) in self.sessions.drain() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "qc.actor.registry",
                        qc_id = %self.qc_id,
                        room_code = %code,
                        "Session actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "qc.actor.registry",
                        qc_id = %self.qc_id,
                        room_code = %code,
                        error = ?e,
                        "Session actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "qc.actor.registry",
                        qc_id = %self.qc_id,
                        room_code = %code,
                        "Session actor shutdown timed out"
                    );
                }
            }
            self.metrics.session_removed();
            prom::record_session_closed(CloseReason::Shutdown.as_str());
        }
        self.identity_to_code.clear();

        info!(
            target: "qc.actor.registry",
            qc_id = %self.qc_id,
            "Graceful shutdown complete"
        );
    }

    /// Remove sessions whose task ended without reporting `Closed`.
    async fn check_session_health(&mut self) {
        self.drain_session_events();

        let finished: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(code, _)| code.clone())
            .collect();

        for code in finished {
            let Some(managed) = self.sessions.remove(&code) else {
                continue;
            };
            self.identity_to_code.retain(|_, c| *c != code);

            match managed.task_handle.await {
                Ok(()) => {
                    warn!(
                        target: "qc.actor.registry",
                        qc_id = %self.qc_id,
                        room_code = %code,
                        "Session actor exited without reporting closure"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "qc.actor.registry",
                            qc_id = %self.qc_id,
                            room_code = %code,
                            error = ?join_error,
                            "Session actor panicked"
                        );
                        self.metrics.record_panic(ActorType::Session);
                    }
                }
            }

            self.metrics.session_removed();
            prom::record_session_closed("failed");
        }
    }
}
