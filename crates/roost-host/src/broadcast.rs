use std::collections::HashMap;
use std::sync::Arc;

use roost_core::LogChunk;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

/// Per-bot fan-out of live child output. Delivery is best effort: there is no
/// buffering and no replay, and a closed observer is pruned on the next write.
#[derive(Clone, Default)]
pub struct LogBroadcaster {
    inner: Arc<Mutex<HashMap<Uuid, Vec<mpsc::UnboundedSender<LogChunk>>>>>,
}

impl LogBroadcaster {
    /// Register an observer. Subscribing before the bot runs is fine; the
    /// receiver simply stays quiet until output arrives.
    pub async fn subscribe(&self, bot_id: Uuid) -> mpsc::UnboundedReceiver<LogChunk> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().await.entry(bot_id).or_default().push(tx);
        rx
    }

    pub async fn publish(&self, bot_id: Uuid, chunk: LogChunk) {
        let mut map = self.inner.lock().await;
        let Some(subs) = map.get_mut(&bot_id) else {
            return;
        };
        subs.retain(|tx| tx.send(chunk.clone()).is_ok());
        if subs.is_empty() {
            map.remove(&bot_id);
        }
    }

    /// Drop every observer of a bot (used when the bot is deleted).
    pub async fn drop_bot(&self, bot_id: Uuid) {
        self.inner.lock().await.remove(&bot_id);
    }

    #[cfg(test)]
    async fn observer_count(&self, bot_id: Uuid) -> usize {
        self.inner
            .lock()
            .await
            .get(&bot_id)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roost_core::LogSource;

    fn chunk(line: &str) -> LogChunk {
        LogChunk {
            source: LogSource::Stdout,
            line: line.to_string(),
        }
    }

    #[tokio::test]
    async fn every_observer_receives_each_chunk() {
        let hub = LogBroadcaster::default();
        let bot = Uuid::new_v4();
        let mut a = hub.subscribe(bot).await;
        let mut b = hub.subscribe(bot).await;

        hub.publish(bot, chunk("hello")).await;

        assert_eq!(a.recv().await.unwrap().line, "hello");
        assert_eq!(b.recv().await.unwrap().line, "hello");
    }

    #[tokio::test]
    async fn closed_observers_are_pruned_on_next_write() {
        let hub = LogBroadcaster::default();
        let bot = Uuid::new_v4();
        let _keep = hub.subscribe(bot).await;
        let gone = hub.subscribe(bot).await;
        drop(gone);

        assert_eq!(hub.observer_count(bot).await, 2);
        hub.publish(bot, chunk("tick")).await;
        assert_eq!(hub.observer_count(bot).await, 1);
    }

    #[tokio::test]
    async fn publish_without_observers_is_a_no_op() {
        let hub = LogBroadcaster::default();
        let bot = Uuid::new_v4();
        hub.publish(bot, chunk("dropped")).await;
        assert_eq!(hub.observer_count(bot).await, 0);
    }

    #[tokio::test]
    async fn observers_are_scoped_to_their_bot() {
        let hub = LogBroadcaster::default();
        let bot_a = Uuid::new_v4();
        let bot_b = Uuid::new_v4();
        let mut a = hub.subscribe(bot_a).await;
        let mut b = hub.subscribe(bot_b).await;

        hub.publish(bot_a, chunk("only-a")).await;

        assert_eq!(a.recv().await.unwrap().line, "only-a");
        assert!(b.try_recv().is_err());
    }
}
