//! Two-tier coordinator: a fast volatile `front` and a slow durable
//! `back`, joined by a drain timer (spec §4.6).
//!
//! Grounded in the teacher's `network::shutdown::ShutdownController`
//! pattern of a background task coordinating with the main object via
//! shared state (`Arc` + `parking_lot::Mutex`), generalized here to a
//! per-message timer instead of a single shutdown signal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, StorageError};
use crate::logger::Logger;
use crate::message::Message;
use crate::storage::{oldest_of, Storage};

/// Joins a fast `front` and a slow `back` engine. Every `store` lands in
/// `front` immediately and is promoted to `back` after `timeout` seconds
/// unless it is claimed and removed first.
pub struct Complex<F: Storage, B: Storage> {
    logger: Logger,
    front: Arc<F>,
    back: Arc<B>,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    /// Outstanding drain timers, keyed by message id, so shutdown can
    /// find and cancel/drain them.
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl<F: Storage + 'static, B: Storage + 'static> Complex<F, B> {
    /// Joins `front` and `back`, draining front entries to back after
    /// `timeout_secs` seconds, timestamped by the real system clock.
    #[must_use]
    pub fn new(front: F, back: B, timeout_secs: u64, logger: Logger) -> Self {
        Self::with_clock(front, back, timeout_secs, logger, Arc::new(SystemClock))
    }

    /// As [`Complex::new`], but with an injectable [`Clock`] so callers
    /// can make drain-age logging deterministic in tests.
    #[must_use]
    pub fn with_clock(
        front: F,
        back: B,
        timeout_secs: u64,
        logger: Logger,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            logger,
            front: Arc::new(front),
            back: Arc::new(back),
            timeout: Duration::from_secs(timeout_secs),
            clock,
            timers: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    async fn drain_one(&self, id: &str) {
        let ids = [id.to_string()];
        let Ok(found) = self.front.peek(&ids).await else {
            self.logger.error(&format!("drain peek failed for {id}"));
            return;
        };
        let Some(message) = found.into_iter().next() else {
            // Already claimed-and-removed, or already drained. No-op.
            return;
        };

        if !message.persistent {
            if let Err(e) = self.front.remove(&ids).await {
                self.logger
                    .error(&format!("drain remove (non-persistent) failed for {id}: {e}"));
            }
            return;
        }

        let age = self.clock.now_secs() - message.timestamp;
        self.logger
            .debug(&format!("promoting {id} to back, age={age}s"));

        if let Err(e) = self.back.store(message).await {
            self.logger.error(&format!("drain back-store failed for {id}: {e}"));
            return;
        }
        if let Err(e) = self.front.remove(&ids).await {
            self.logger
                .error(&format!("drain front-remove after promotion failed for {id}: {e}"));
        }
    }
}

#[async_trait]
impl<F: Storage + 'static, B: Storage + 'static> Storage for Arc<Complex<F, B>> {
    async fn store(&self, message: Message) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(StorageError::ShuttingDown);
        }
        let id = message.id.clone();
        self.front.store(message).await?;

        let this = self.clone();
        let timeout = self.timeout;
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            this.drain_one(&task_id).await;
            this.timers.lock().remove(&task_id);
        });
        self.timers.lock().insert(id, handle);
        Ok(())
    }

    async fn remove(&self, ids: &[String]) -> Result<Vec<Message>> {
        let mut front_removed = self.front.remove(ids).await?;
        let front_ids: std::collections::HashSet<_> =
            front_removed.iter().map(|m| m.id.clone()).collect();
        {
            let mut timers = self.timers.lock();
            for id in &front_ids {
                if let Some(handle) = timers.remove(id) {
                    handle.abort();
                }
            }
        }
        let remaining: Vec<String> = ids
            .iter()
            .filter(|id| !front_ids.contains(*id))
            .cloned()
            .collect();
        let back_removed = self.back.remove(&remaining).await?;
        front_removed.extend(back_removed);
        Ok(front_removed)
    }

    async fn empty(&self) -> Result<Vec<Message>> {
        {
            let mut timers = self.timers.lock();
            for (_, handle) in timers.drain() {
                handle.abort();
            }
        }
        let mut removed = self.front.empty().await?;
        removed.extend(self.back.empty().await?);
        Ok(removed)
    }

    async fn claim_and_retrieve(
        &self,
        destination: &str,
        client: &str,
    ) -> Result<(Option<Message>, String, String)> {
        let (front_hit, d, c) = self.front.claim_and_retrieve(destination, client).await?;
        if let Some(message) = front_hit {
            if let Some(handle) = self.timers.lock().remove(&message.id) {
                handle.abort();
            }
            return Ok((Some(message), d, c));
        }
        self.back.claim_and_retrieve(destination, client).await
    }

    async fn disown(&self, destination: &str, client: &str) -> Result<()> {
        self.front.disown(destination, client).await?;
        self.back.disown(destination, client).await
    }

    async fn peek(&self, ids: &[String]) -> Result<Vec<Message>> {
        let mut found = self.front.peek(ids).await?;
        let found_ids: std::collections::HashSet<_> =
            found.iter().map(|m| m.id.clone()).collect();
        let remaining: Vec<String> = ids
            .iter()
            .filter(|id| !found_ids.contains(*id))
            .cloned()
            .collect();
        found.extend(self.back.peek(&remaining).await?);
        Ok(found)
    }

    async fn peek_oldest(&self) -> Result<Option<Message>> {
        let front = self.front.peek_oldest().await?;
        let back = self.back.peek_oldest().await?;
        Ok(oldest_of(front.into_iter().chain(back)))
    }

    async fn storage_shutdown(&self) -> Result<()> {
        self.shutting_down.store(true, Ordering::SeqCst);
        let pending: Vec<String> = {
            let mut timers = self.timers.lock();
            timers.drain().map(|(id, handle)| {
                handle.abort();
                id
            }).collect()
        };
        for id in pending {
            self.drain_one(&id).await;
        }
        self.front.storage_shutdown().await?;
        self.back.storage_shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::memory_store::MemoryStoreSmall;
    use bytes::Bytes;

    fn msg(id: &str, destination: &str, persistent: bool, ts: i64) -> Message {
        Message::new(id, destination, persistent, Bytes::from_static(b"x"), ts)
    }

    fn stack() -> Arc<Complex<MemoryStoreSmall, MemoryStoreSmall>> {
        Arc::new(Complex::new(
            MemoryStoreSmall::new(Logger::new("FRONT")),
            MemoryStoreSmall::new(Logger::new("BACK")),
            1,
            Logger::new("COMPLEX"),
        ))
    }

    #[tokio::test]
    async fn store_lands_in_front_immediately() {
        let complex = stack();
        complex.store(msg("m1", "/q/a", true, 1)).await.unwrap();

        let found = complex.front.peek(&["m1".to_string()]).await.unwrap();
        assert_eq!(found.len(), 1);
        let in_back = complex.back.peek(&["m1".to_string()]).await.unwrap();
        assert!(in_back.is_empty());
    }

    #[tokio::test]
    async fn timer_promotes_persistent_message_to_back() {
        let complex = stack();
        complex.store(msg("m1", "/q/a", true, 1)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;

        let in_front = complex.front.peek(&["m1".to_string()]).await.unwrap();
        assert!(in_front.is_empty());
        let in_back = complex.back.peek(&["m1".to_string()]).await.unwrap();
        assert_eq!(in_back.len(), 1);
    }

    #[tokio::test]
    async fn timer_drops_non_persistent_message() {
        let complex = stack();
        complex.store(msg("m1", "/q/a", false, 1)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;

        let in_front = complex.front.peek(&["m1".to_string()]).await.unwrap();
        assert!(in_front.is_empty());
        let in_back = complex.back.peek(&["m1".to_string()]).await.unwrap();
        assert!(in_back.is_empty());
    }

    #[tokio::test]
    async fn claim_prefers_front_over_back() {
        let complex = stack();
        complex.back.store(msg("old", "/q/a", true, 1)).await.unwrap();
        complex.front.store(msg("new", "/q/a", true, 100)).await.unwrap();

        let (claimed, ..) = complex.claim_and_retrieve("/q/a", "1").await.unwrap();
        assert_eq!(claimed.unwrap().id, "new");
    }

    #[tokio::test]
    async fn remove_before_timer_cancels_promotion() {
        let complex = stack();
        complex.store(msg("m1", "/q/a", true, 1)).await.unwrap();
        complex.remove(&["m1".to_string()]).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;

        let in_back = complex.back.peek(&["m1".to_string()]).await.unwrap();
        assert!(in_back.is_empty());
    }

    #[tokio::test]
    async fn shutdown_rejects_subsequent_stores() {
        let complex = stack();
        complex.storage_shutdown().await.unwrap();

        let err = complex
            .store(msg("m1", "/q/a", true, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::StorageError::ShuttingDown));
    }
}
