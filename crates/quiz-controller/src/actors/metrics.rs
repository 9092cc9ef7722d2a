//! Actor metrics and mailbox monitoring.
//!
//! Mailbox depth thresholds:
//!
//! | Actor Type | Normal | Warning | Critical |
//! |------------|--------|---------|----------|
//! | Registry   | < 100  | 100-500 | > 500    |
//! | Session    | < 50   | 50-200  | > 200    |
//!
//! `ActorMetrics` keeps lock-free counters for status queries and mirrors
//! the gauges into the Prometheus recorder.

use crate::observability::metrics as prom;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth thresholds for the registry actor.
pub const REGISTRY_MAILBOX_NORMAL: usize = 100;
pub const REGISTRY_MAILBOX_WARNING: usize = 500;

/// Mailbox depth thresholds for session actors.
pub const SESSION_MAILBOX_NORMAL: usize = 50;
pub const SESSION_MAILBOX_WARNING: usize = 200;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `SessionRegistryActor` (one per process).
    Registry,
    /// `SessionActor` (one per live room).
    Session,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Registry => "registry",
            ActorType::Session => "session",
        }
    }

    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Registry => REGISTRY_MAILBOX_WARNING,
            ActorType::Session => SESSION_MAILBOX_WARNING,
        }
    }

    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Registry => REGISTRY_MAILBOX_NORMAL,
            ActorType::Session => SESSION_MAILBOX_NORMAL,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Tracks queue depth for one actor mailbox.
///
/// Senders call [`record_enqueue`](Self::record_enqueue) before sending; the
/// actor calls [`record_dequeue`](Self::record_dequeue) after handling.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    actor_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
    messages_dropped: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }

    /// Record a message being added to the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);

        let level = self.level_for_depth(new_depth);
        if level == MailboxLevel::Critical {
            warn!(
                target: "qc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = new_depth,
                threshold = self.actor_type.warning_threshold(),
                "Mailbox depth critical"
            );
        } else if level == MailboxLevel::Warning
            && new_depth == self.actor_type.normal_threshold().saturating_add(1)
        {
            debug!(
                target: "qc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = new_depth,
                "Mailbox depth elevated"
            );
        }
    }

    /// Record a message being handled by the actor.
    pub fn record_dequeue(&self) {
        self.decrement_depth();
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message that was counted on enqueue but never delivered.
    pub fn record_drop(&self) {
        self.decrement_depth();
        let dropped = self.messages_dropped.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        debug!(
            target: "qc.actor.mailbox",
            actor_type = self.actor_type.as_str(),
            actor_id = %self.actor_id,
            dropped,
            "Message dropped, mailbox closed"
        );
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    fn decrement_depth(&self) {
        // Never wraps below zero if a dequeue races ahead of its enqueue.
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            });
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Aggregated metrics for the actor system.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    /// Live sessions.
    pub active_sessions: AtomicUsize,
    /// Participants across live sessions.
    pub active_participants: AtomicUsize,
    /// Participants dropped after a failed send.
    pub transport_faults: AtomicU64,
    /// Total actor panics (indicates bugs).
    pub actor_panics: AtomicU64,
    /// Total messages processed across all actors.
    pub total_messages_processed: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn session_created(&self) {
        let count = self.active_sessions.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        prom::set_sessions_active(count as u64);
    }

    pub fn session_removed(&self) {
        let count = saturating_decrement(&self.active_sessions, 1);
        prom::set_sessions_active(count as u64);
    }

    pub fn participant_joined(&self) {
        let count = self
            .active_participants
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1);
        prom::set_participants_active(count as u64);
    }

    pub fn participants_left(&self, n: usize) {
        if n == 0 {
            return;
        }
        let count = saturating_decrement(&self.active_participants, n);
        prom::set_participants_active(count as u64);
    }

    pub fn record_transport_fault(&self) {
        self.transport_faults.fetch_add(1, Ordering::Relaxed);
        prom::record_transport_fault();
    }

    /// Record an actor panic.
    pub fn record_panic(&self, actor_type: ActorType) {
        self.actor_panics.fetch_add(1, Ordering::Relaxed);
        prom::record_actor_panic(actor_type.as_str());
        tracing::error!(
            target: "qc.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = self.actor_panics.load(Ordering::Relaxed),
            "Actor panic detected - indicates bug, investigation required"
        );
    }

    pub fn record_message_processed(&self) {
        self.total_messages_processed
            .fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.active_participants.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn transport_fault_count(&self) -> u64 {
        self.transport_faults.load(Ordering::Relaxed)
    }
}

/// Subtract `n` without wrapping, returning the new value.
fn saturating_decrement(value: &AtomicUsize, n: usize) -> usize {
    let previous = value
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            Some(v.saturating_sub(n))
        })
        .unwrap_or_else(|v| v);
    previous.saturating_sub(n)
}
