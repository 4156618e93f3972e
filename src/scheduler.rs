use crate::games::types::{ChatId, RoundId};
use dashmap::{mapref::entry::Entry, DashMap};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::AbortHandle};

/// Emitted when a round's betting window has elapsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseRequest {
    pub chat: ChatId,
    pub round: RoundId,
}

/// One-shot close timers keyed by (chat, round)
///
/// A timer that fires removes itself and sends a [`CloseRequest`]; the
/// receiver is expected to settle the round. Cancellation is idempotent and a
/// request for an already settled round is harmless.
pub struct RoundScheduler {
    timers: Arc<DashMap<(ChatId, RoundId), AbortHandle>>,
    sender: mpsc::UnboundedSender<CloseRequest>,
}

impl RoundScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CloseRequest>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let scheduler = Self {
            timers: Arc::new(DashMap::new()),
            sender,
        };
        (scheduler, receiver)
    }

    /// Arm a close timer; returns false if one is already pending for this round
    pub fn arm(&self, chat: ChatId, round: RoundId, delay: Duration) -> bool {
        let key = (chat, round);
        match self.timers.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let timers = Arc::clone(&self.timers);
                let sender = self.sender.clone();
                // The task cannot remove its entry before the insert below
                // releases the shard lock.
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    timers.remove(&key);
                    if sender.send(CloseRequest { chat, round }).is_err() {
                        tracing::warn!(chat = %chat, round = %round, "Close request dropped: receiver gone");
                    }
                });
                slot.insert(handle.abort_handle());
                tracing::debug!(chat = %chat, round = %round, delay_ms = delay.as_millis() as u64, "Close timer armed");
                true
            }
        }
    }

    /// Cancel a pending timer; returns false if none was pending
    pub fn cancel(&self, chat: ChatId, round: RoundId) -> bool {
        match self.timers.remove(&(chat, round)) {
            Some((_, handle)) => {
                handle.abort();
                tracing::debug!(chat = %chat, round = %round, "Close timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer of a chat
    pub fn cancel_chat(&self, chat: ChatId) -> usize {
        let rounds: Vec<RoundId> = self
            .timers
            .iter()
            .filter(|entry| entry.key().0 == chat)
            .map(|entry| entry.key().1)
            .collect();
        rounds
            .into_iter()
            .filter(|&round| self.cancel(chat, round))
            .count()
    }

    pub fn is_armed(&self, chat: ChatId, round: RoundId) -> bool {
        self.timers.contains_key(&(chat, round))
    }

    pub fn pending_count(&self) -> usize {
        self.timers.len()
    }

    /// Abort every pending timer
    pub fn shutdown(&self) {
        self.timers.retain(|_, handle| {
            handle.abort();
            false
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once() {
        let (scheduler, mut rx) = RoundScheduler::new();
        assert!(scheduler.arm(ChatId(1), RoundId(1), Duration::from_secs(60)));
        assert!(!scheduler.arm(ChatId(1), RoundId(1), Duration::from_secs(60)));
        assert_eq!(scheduler.pending_count(), 1);

        let request = rx.recv().await.expect("timer should fire");
        assert_eq!(
            request,
            CloseRequest {
                chat: ChatId(1),
                round: RoundId(1)
            }
        );
        assert!(!scheduler.is_armed(ChatId(1), RoundId(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (scheduler, mut rx) = RoundScheduler::new();
        scheduler.arm(ChatId(1), RoundId(1), Duration::from_secs(60));
        scheduler.arm(ChatId(2), RoundId(1), Duration::from_secs(90));

        assert!(scheduler.cancel(ChatId(1), RoundId(1)));
        assert!(!scheduler.cancel(ChatId(1), RoundId(1)));

        let request = rx.recv().await.unwrap();
        assert_eq!(request.chat, ChatId(2));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_chat_and_shutdown() {
        let (scheduler, _rx) = RoundScheduler::new();
        scheduler.arm(ChatId(1), RoundId(1), Duration::from_secs(60));
        scheduler.arm(ChatId(1), RoundId(2), Duration::from_secs(60));
        scheduler.arm(ChatId(3), RoundId(1), Duration::from_secs(60));

        assert_eq!(scheduler.cancel_chat(ChatId(1)), 2);
        assert_eq!(scheduler.pending_count(), 1);

        scheduler.shutdown();
        assert_eq!(scheduler.pending_count(), 0);
    }
}
