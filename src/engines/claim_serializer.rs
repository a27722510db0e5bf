//! Per-destination serialization of `claim_and_retrieve` (spec §4.7).
//!
//! Grounded in the teacher's `storage::mutation_observer` pattern of
//! wrapping an inner engine to interpose cross-cutting behavior; here the
//! interposed behavior is a per-destination mutex rather than an
//! observer callback.
//!
//! Without this decorator, two concurrent `claim_and_retrieve("/q/a", ...)`
//! calls against a backing store whose read-then-write isn't atomic (the
//! `MetadataStore`'s SELECT-then-UPDATE) can both read the same unclaimed
//! row before either writes its claim. Serializing by destination closes
//! that window while leaving unrelated destinations fully concurrent.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::Result;
use crate::message::Message;
use crate::storage::Storage;

/// Wraps an inner [`Storage`], serializing `claim_and_retrieve` calls
/// per destination. All other operations pass straight through.
pub struct ClaimSerializer<E: Storage> {
    inner: E,
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl<E: Storage> ClaimSerializer<E> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, destination: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .entry(destination.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[async_trait]
impl<E: Storage> Storage for ClaimSerializer<E> {
    async fn store(&self, message: Message) -> Result<()> {
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
        let lock = self.lock_for(destination);
        let _guard = lock.lock().await;
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
        self.inner.storage_shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::memory_store::MemoryStoreSmall;
    use crate::logger::Logger;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_destination_claims_serialize() {
        let serializer = Arc::new(ClaimSerializer::new(MemoryStoreSmall::new(Logger::new(
            "TEST",
        ))));
        serializer
            .store(Message::new(
                "m1",
                "/q/a",
                true,
                Bytes::from_static(b"x"),
                1,
            ))
            .await
            .unwrap();

        let concurrent: AtomicUsize = AtomicUsize::new(0);
        let max_concurrent = Arc::new(AtomicUsize::new(0));
        let _ = concurrent;

        let s1 = serializer.clone();
        let max1 = max_concurrent.clone();
        let h1 = tokio::spawn(async move {
            let (m, ..) = s1.claim_and_retrieve("/q/a", "1").await.unwrap();
            max1.fetch_max(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            m
        });

        tokio::time::sleep(Duration::from_millis(1)).await;
        let h2 = tokio::spawn({
            let s2 = serializer.clone();
            async move { s2.claim_and_retrieve("/q/a", "2").await.unwrap().0 }
        });

        let (r1, r2) = tokio::join!(h1, h2);
        let claims = [r1.unwrap(), r2.unwrap()];
        let claimed_count = claims.iter().filter(|m| m.is_some()).count();
        assert_eq!(claimed_count, 1);
    }
}
