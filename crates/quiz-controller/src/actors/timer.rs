//! Scheduled continuations and the per-round countdown.
//!
//! Nothing here mutates session state. Spawned tasks sleep and post
//! [`Continuation`]s back into the session mailbox, where the actor decides
//! whether they still apply. Every task is bound to a cancellation token so
//! a closed session leaves no timers behind.

use super::messages::{Continuation, SessionMessage};
use super::metrics::MailboxMonitor;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Posts delayed messages into one session's mailbox.
#[derive(Clone, Debug)]
pub struct Scheduler {
    mailbox: mpsc::WeakSender<SessionMessage>,
    monitor: Arc<MailboxMonitor>,
    cancel_token: CancellationToken,
}

impl Scheduler {
    /// `cancel_token` should be the session's own token; cancelling it stops
    /// every pending continuation.
    pub fn new(
        mailbox: mpsc::WeakSender<SessionMessage>,
        monitor: Arc<MailboxMonitor>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            mailbox,
            monitor,
            cancel_token,
        }
    }

    /// Deliver `continuation` after `delay`, unless cancelled first.
    pub fn schedule(&self, delay: Duration, continuation: Continuation) {
        let token = self.cancel_token.child_token();
        let this = self.clone();
        tokio::spawn(async move {
            if this.sleep(&token, delay).await {
                this.post(&token, continuation).await;
            }
        });
    }

    /// Start a countdown of `ticks` steps for `round`.
    ///
    /// Posts `RoundTick { remaining }` for `remaining = ticks - 1` down to 0,
    /// one per `tick`. A zero tick count is treated as one.
    pub fn round_timer(&self, round: usize, ticks: u32, tick: Duration) -> RoundTimer {
        let token = self.cancel_token.child_token();
        let task_token = token.clone();
        let this = self.clone();

        tokio::spawn(async move {
            for remaining in (0..ticks.max(1)).rev() {
                if !this.sleep(&task_token, tick).await {
                    return;
                }
                if !this
                    .post(&task_token, Continuation::RoundTick { round, remaining })
                    .await
                {
                    return;
                }
            }
        });

        RoundTimer { token }
    }

    /// Returns false if cancelled before `delay` elapsed.
    async fn sleep(&self, token: &CancellationToken, delay: Duration) -> bool {
        tokio::select! {
            biased;
            () = token.cancelled() => false,
            () = tokio::time::sleep(delay) => !token.is_cancelled(),
        }
    }

    /// Returns false if the session is gone or the token was cancelled.
    async fn post(&self, token: &CancellationToken, continuation: Continuation) -> bool {
        if token.is_cancelled() {
            return false;
        }
        let Some(sender) = self.mailbox.upgrade() else {
            return false;
        };
        self.monitor.record_enqueue();
        if sender
            .send(SessionMessage::Scheduled(continuation))
            .await
            .is_err()
        {
            self.monitor.record_drop();
            return false;
        }
        true
    }
}

/// Handle to a running round countdown. Dropping it cancels the countdown.
#[derive(Debug)]
pub struct RoundTimer {
    token: CancellationToken,
}

impl RoundTimer {
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for RoundTimer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::actors::metrics::ActorType;

    struct Harness {
        scheduler: Scheduler,
        rx: mpsc::Receiver<SessionMessage>,
        token: CancellationToken,
        // Holds the mailbox open; the scheduler only keeps a weak sender.
        _tx: mpsc::Sender<SessionMessage>,
    }

    fn harness() -> Harness {
        let (tx, rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let monitor = Arc::new(MailboxMonitor::new(ActorType::Session, "TEST1"));
        Harness {
            scheduler: Scheduler::new(tx.downgrade(), monitor, token.clone()),
            rx,
            token,
            _tx: tx,
        }
    }

    fn tick_of(msg: SessionMessage) -> Continuation {
        match msg {
            SessionMessage::Scheduled(c) => c,
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_fires_after_delay() {
        let Harness {
            scheduler,
            mut rx,
            _tx,
            ..
        } = harness();

        scheduler.schedule(Duration::from_secs(4), Continuation::AdvanceRound { round: 2 });

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err(), "Should not fire before the delay");

        let msg = rx.recv().await.unwrap();
        assert_eq!(tick_of(msg), Continuation::AdvanceRound { round: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_timer_counts_down_to_zero() {
        let Harness {
            scheduler,
            mut rx,
            _tx,
            ..
        } = harness();

        let _timer = scheduler.round_timer(0, 3, Duration::from_secs(1));

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(tick_of(rx.recv().await.unwrap()));
        }
        assert_eq!(
            seen,
            vec![
                Continuation::RoundTick { round: 0, remaining: 2 },
                Continuation::RoundTick { round: 0, remaining: 1 },
                Continuation::RoundTick { round: 0, remaining: 0 },
            ]
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err(), "No ticks after zero");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_round_timer_posts_nothing() {
        let Harness {
            scheduler,
            mut rx,
            _tx,
            ..
        } = harness();

        let timer = scheduler.round_timer(1, 5, Duration::from_secs(1));
        let first = tick_of(rx.recv().await.unwrap());
        assert_eq!(first, Continuation::RoundTick { round: 1, remaining: 4 });

        timer.cancel();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err(), "Cancelled timer must stay silent");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_round_timer_cancels_it() {
        let Harness {
            scheduler,
            mut rx,
            _tx,
            ..
        } = harness();

        drop(scheduler.round_timer(0, 5, Duration::from_secs(1)));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_token_cancels_pending_continuations() {
        let Harness {
            scheduler,
            mut rx,
            token,
            _tx,
        } = harness();

        scheduler.schedule(Duration::from_secs(60), Continuation::GraceExpired);
        let _timer = scheduler.round_timer(0, 15, Duration::from_secs(1));

        token.cancel();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ticks_still_fires_once() {
        let Harness {
            scheduler,
            mut rx,
            _tx,
            ..
        } = harness();

        let _timer = scheduler.round_timer(3, 0, Duration::from_secs(1));
        let msg = tick_of(rx.recv().await.unwrap());
        assert_eq!(msg, Continuation::RoundTick { round: 3, remaining: 0 });
    }
}
