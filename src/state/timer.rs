use futures::future::BoxFuture;
use tokio::{
    task::AbortHandle,
    time::{Instant, sleep_until},
};

use crate::state::game::SessionId;

/// Identifies the question a deadline belongs to.
///
/// A deadline whose key no longer matches the room's current question is stale and must be
/// ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeadlineKey {
    /// Session the deadline belongs to.
    pub session_id: SessionId,
    /// Question the deadline closes.
    pub question_index: usize,
}

/// Single pending question deadline of a room.
///
/// Scheduling a new deadline cancels the previous one; dropping the timer cancels whatever is
/// pending.
#[derive(Debug, Default)]
pub struct QuestionTimer {
    pending: Option<(DeadlineKey, AbortHandle)>,
}

impl QuestionTimer {
    /// Timer with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `on_elapsed` at `at`, replacing any pending deadline.
    pub fn schedule(&mut self, key: DeadlineKey, at: Instant, on_elapsed: BoxFuture<'static, ()>) {
        self.cancel();
        let handle = tokio::spawn(async move {
            sleep_until(at).await;
            on_elapsed.await;
        });
        self.pending = Some((key, handle.abort_handle()));
    }

    /// Abort the pending deadline, if any.
    pub fn cancel(&mut self) {
        if let Some((_, handle)) = self.pending.take() {
            handle.abort();
        }
    }

    /// Forget the pending deadline without aborting it.
    ///
    /// Called from inside the firing task so that effects it dispatches cannot abort itself.
    /// Returns `false` when `key` is not the pending deadline.
    pub fn disarm(&mut self, key: DeadlineKey) -> bool {
        let matches = self
            .pending
            .as_ref()
            .is_some_and(|(pending, _)| *pending == key);
        if matches {
            self.pending = None;
        }
        matches
    }

    /// Key of the pending deadline.
    pub fn pending(&self) -> Option<DeadlineKey> {
        self.pending.as_ref().map(|(key, _)| *key)
    }
}

impl Drop for QuestionTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;

    fn key(index: usize) -> DeadlineKey {
        DeadlineKey {
            session_id: Uuid::nil(),
            question_index: index,
        }
    }

    fn notify(tx: &mpsc::UnboundedSender<usize>, index: usize) -> BoxFuture<'static, ()> {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(index);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn fires_at_deadline() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = QuestionTimer::new();
        timer.schedule(key(0), Instant::now() + Duration::from_secs(10), notify(&tx, 0));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.recv().await, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_pending_deadline() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = QuestionTimer::new();
        timer.schedule(key(0), Instant::now() + Duration::from_secs(5), notify(&tx, 0));
        timer.schedule(key(1), Instant::now() + Duration::from_secs(10), notify(&tx, 1));
        assert_eq!(timer.pending(), Some(key(1)));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(rx.recv().await, Some(1));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_deadline_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = QuestionTimer::new();
        timer.schedule(key(0), Instant::now() + Duration::from_secs(5), notify(&tx, 0));
        assert_eq!(timer.pending(), Some(key(0)));
        timer.cancel();
        assert_eq!(timer.pending(), None);
        drop(tx);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_only_matches_pending_key() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timer = QuestionTimer::new();
        timer.schedule(key(2), Instant::now() + Duration::from_secs(5), notify(&tx, 2));

        assert!(!timer.disarm(key(1)));
        assert!(timer.disarm(key(2)));
        assert_eq!(timer.pending(), None);
    }
}
