//! Bounds concurrent `store` operations against a slow inner engine
//! (spec §4.5).
//!
//! Grounded in the teacher's `network::shutdown` use of a bounded
//! `tokio::sync::Semaphore`-style gate to cap concurrent work; here the
//! gate specifically bounds `store`, since that is the operation spec
//! §4.5 identifies as the bottleneck (BodyStore disk I/O under a
//! MetadataStore transaction).

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::{Result, StorageError};
use crate::message::Message;
use crate::storage::Storage;

/// Wraps `inner`, allowing at most `max_in_flight` concurrent `store`
/// calls; excess callers wait in FIFO order for a permit.
pub struct Throttle<E: Storage> {
    inner: E,
    permits: Semaphore,
    max_in_flight: u32,
    shutting_down: AtomicBool,
}

impl<E: Storage> Throttle<E> {
    /// Wraps `inner`, bounding concurrent stores to `max_in_flight`.
    #[must_use]
    pub fn new(inner: E, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            inner,
            permits: Semaphore::new(max_in_flight),
            max_in_flight: max_in_flight as u32,
            shutting_down: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl<E: Storage> Storage for Throttle<E> {
    async fn store(&self, message: Message) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(StorageError::ShuttingDown);
        }
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("semaphore is never closed");
        self.inner.store(message).await
    }

    async fn remove(&self, ids: &[String]) -> Result<Vec<Message>> {
        self.inner.remove(ids).await
    }

    async fn empty(&self) -> Result<Vec<Message>> {
        self.inner.empty().await
    }

    async fn claim_and_retrieve(
        &self,
        destination: &str,
        client: &str,
    ) -> Result<(Option<Message>, String, String)> {
        self.inner.claim_and_retrieve(destination, client).await
    }

    async fn disown(&self, destination: &str, client: &str) -> Result<()> {
        self.inner.disown(destination, client).await
    }

    async fn peek(&self, ids: &[String]) -> Result<Vec<Message>> {
        self.inner.peek(ids).await
    }

    async fn peek_oldest(&self) -> Result<Option<Message>> {
        self.inner.peek_oldest().await
    }

    async fn storage_shutdown(&self) -> Result<()> {
        self.shutting_down.store(true, Ordering::SeqCst);
        // Acquiring every permit blocks until no store is mid-flight.
        let _drained = self.permits.acquire_many(self.max_in_flight).await;
        self.inner.storage_shutdown().await
    }
}
