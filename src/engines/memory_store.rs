//! Pure in-memory `Storage` implementations (spec §4.4).
//!
//! Grounded in the teacher's `storage::engines::hashmap::HashMapStorage`:
//! interior mutability via a concurrent map, no persistence, `destroy`
//! implemented in terms of `clear`. Two flavors share identical semantics
//! but trade simplicity for algorithmic complexity, exactly as the spec
//! prescribes.

use std::collections::BTreeSet;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;

use crate::error::Result;
use crate::logger::Logger;
use crate::message::Message;
use crate::storage::{oldest_of, Storage};

/// Linear-scan in-memory store. Correct and simple; every operation that
/// looks up by destination or claimant is O(n).
///
/// Use for small queues or as a baseline to validate `MemoryStoreBig`
/// against in tests.
pub struct MemoryStoreSmall {
    logger: Logger,
    entries: Mutex<Vec<Message>>,
}

impl MemoryStoreSmall {
    /// Creates an empty store.
    #[must_use]
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            entries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Storage for MemoryStoreSmall {
    async fn store(&self, message: Message) -> Result<()> {
        self.entries.lock().push(message);
        Ok(())
    }

    async fn remove(&self, ids: &[String]) -> Result<Vec<Message>> {
        let mut entries = self.entries.lock();
        let mut removed = Vec::new();
        entries.retain(|m| {
            if ids.contains(&m.id) {
                removed.push(m.clone());
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn empty(&self) -> Result<Vec<Message>> {
        Ok(std::mem::take(&mut *self.entries.lock()))
    }

    async fn claim_and_retrieve(
        &self,
        destination: &str,
        client: &str,
    ) -> Result<(Option<Message>, String, String)> {
        let mut entries = self.entries.lock();
        let found = entries
            .iter_mut()
            .find(|m| m.destination == destination && m.claimant.is_none());

        let claimed = found.map(|m| {
            m.claimant = Some(client.to_string());
            m.clone()
        });

        if claimed.is_none() {
            self.logger
                .debug(&format!("no unclaimed message in {destination}"));
        }

        Ok((claimed, destination.to_string(), client.to_string()))
    }

    async fn disown(&self, destination: &str, client: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        for m in entries.iter_mut() {
            if m.destination == destination && m.claimant.as_deref() == Some(client) {
                m.claimant = None;
            }
        }
        Ok(())
    }

    async fn peek(&self, ids: &[String]) -> Result<Vec<Message>> {
        let entries = self.entries.lock();
        Ok(entries
            .iter()
            .filter(|m| ids.contains(&m.id))
            .cloned()
            .collect())
    }

    async fn peek_oldest(&self) -> Result<Option<Message>> {
        let entries = self.entries.lock();
        Ok(oldest_of(entries.iter().cloned()))
    }

    async fn storage_shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Three-index in-memory store: primary by id, secondary by destination
/// (timestamp-ordered), tertiary by claimant. All three indexes must
/// agree at every observable moment (spec §4.4 invariant).
pub struct MemoryStoreBig {
    logger: Logger,
    /// Primary index: id -> Message.
    by_id: DashMap<String, Message>,
    /// Secondary index: destination -> ids ordered by (timestamp, id).
    by_destination: DashMap<String, Mutex<BTreeSet<(i64, String)>>>,
    /// Tertiary index: claimant -> set of claimed ids.
    by_claimant: DashMap<String, DashSet<String>>,
    /// Global timestamp order, for O(1)-ish `peek_oldest`.
    by_timestamp: Mutex<BTreeSet<(i64, String)>>,
}

impl MemoryStoreBig {
    /// Creates an empty store.
    #[must_use]
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            by_id: DashMap::new(),
            by_destination: DashMap::new(),
            by_claimant: DashMap::new(),
            by_timestamp: Mutex::new(BTreeSet::new()),
        }
    }

    fn insert_indexes(&self, message: &Message) {
        self.by_destination
            .entry(message.destination.clone())
            .or_default()
            .lock()
            .insert((message.timestamp, message.id.clone()));
        self.by_timestamp
            .lock()
            .insert((message.timestamp, message.id.clone()));
        if let Some(claimant) = &message.claimant {
            self.by_claimant
                .entry(claimant.clone())
                .or_default()
                .insert(message.id.clone());
        }
    }

    fn remove_indexes(&self, message: &Message) {
        if let Some(ids) = self.by_destination.get(&message.destination) {
            ids.lock().remove(&(message.timestamp, message.id.clone()));
        }
        self.by_timestamp
            .lock()
            .remove(&(message.timestamp, message.id.clone()));
        if let Some(claimant) = &message.claimant {
            if let Some(ids) = self.by_claimant.get(claimant) {
                ids.remove(&message.id);
            }
        }
    }
}

#[async_trait]
impl Storage for MemoryStoreBig {
    async fn store(&self, message: Message) -> Result<()> {
        self.insert_indexes(&message);
        self.by_id.insert(message.id.clone(), message);
        Ok(())
    }

    async fn remove(&self, ids: &[String]) -> Result<Vec<Message>> {
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, message)) = self.by_id.remove(id) {
                self.remove_indexes(&message);
                removed.push(message);
            }
        }
        Ok(removed)
    }

    async fn empty(&self) -> Result<Vec<Message>> {
        let removed: Vec<Message> = self.by_id.iter().map(|e| e.value().clone()).collect();
        self.by_id.clear();
        self.by_destination.clear();
        self.by_claimant.clear();
        self.by_timestamp.lock().clear();
        Ok(removed)
    }

    async fn claim_and_retrieve(
        &self,
        destination: &str,
        client: &str,
    ) -> Result<(Option<Message>, String, String)> {
        let Some(ids) = self.by_destination.get(destination) else {
            return Ok((None, destination.to_string(), client.to_string()));
        };

        let candidate_id = {
            let ids = ids.lock();
            ids.iter()
                .find(|(_, id)| {
                    self.by_id
                        .get(id)
                        .is_some_and(|m| m.claimant.is_none())
                })
                .map(|(_, id)| id.clone())
        };

        let Some(id) = candidate_id else {
            self.logger
                .debug(&format!("no unclaimed message in {destination}"));
            return Ok((None, destination.to_string(), client.to_string()));
        };

        let claimed = {
            let mut entry = self.by_id.get_mut(&id).expect("candidate id just found");
            entry.claimant = Some(client.to_string());
            entry.clone()
        };
        self.by_claimant
            .entry(client.to_string())
            .or_default()
            .insert(id);

        Ok((Some(claimed), destination.to_string(), client.to_string()))
    }

    async fn disown(&self, destination: &str, client: &str) -> Result<()> {
        let Some(ids) = self.by_claimant.get(client) else {
            return Ok(());
        };
        let ids: Vec<String> = ids.iter().map(|id| id.clone()).collect();
        for id in ids {
            if let Some(mut entry) = self.by_id.get_mut(&id) {
                if entry.destination == destination && entry.claimant.as_deref() == Some(client) {
                    entry.claimant = None;
                    if let Some(claimed_ids) = self.by_claimant.get(client) {
                        claimed_ids.remove(&id);
                    }
                }
            }
        }
        Ok(())
    }

    async fn peek(&self, ids: &[String]) -> Result<Vec<Message>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.by_id.get(id).map(|e| e.value().clone()))
            .collect())
    }

    async fn peek_oldest(&self) -> Result<Option<Message>> {
        let oldest_id = self.by_timestamp.lock().iter().next().map(|(_, id)| id.clone());
        Ok(oldest_id.and_then(|id| self.by_id.get(&id).map(|e| e.value().clone())))
    }

    async fn storage_shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn msg(id: &str, destination: &str, ts: i64) -> Message {
        Message::new(id, destination, true, Bytes::from_static(b"x"), ts)
    }

    async fn store_and_claim_round_trip(store: &dyn Storage) {
        store.store(msg("m1", "/q/a", 100)).await.unwrap();

        let (claimed, d, c) = store.claim_and_retrieve("/q/a", "42").await.unwrap();
        assert_eq!(d, "/q/a");
        assert_eq!(c, "42");
        let claimed = claimed.unwrap();
        assert_eq!(claimed.id, "m1");
        assert_eq!(claimed.claimant.as_deref(), Some("42"));

        let (none, ..) = store.claim_and_retrieve("/q/a", "43").await.unwrap();
        assert!(none.is_none());
    }

    async fn disown_makes_available_again(store: &dyn Storage) {
        store.store(msg("m1", "/q/a", 100)).await.unwrap();
        store.claim_and_retrieve("/q/a", "42").await.unwrap();

        store.disown("/q/a", "42").await.unwrap();

        let (claimed, ..) = store.claim_and_retrieve("/q/a", "43").await.unwrap();
        assert_eq!(claimed.unwrap().claimant.as_deref(), Some("43"));
    }

    async fn peek_oldest_breaks_ties_by_id(store: &dyn Storage) {
        store.store(msg("b", "/q/a", 100)).await.unwrap();
        store.store(msg("a", "/q/a", 100)).await.unwrap();
        store.store(msg("c", "/q/b", 50)).await.unwrap();

        let oldest = store.peek_oldest().await.unwrap().unwrap();
        assert_eq!(oldest.id, "c");
    }

    async fn remove_is_idempotent_with_never_stored(store: &dyn Storage) {
        store.store(msg("m1", "/q/a", 100)).await.unwrap();
        let removed = store.remove(&["m1".to_string()]).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert!(store.peek(&["m1".to_string()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn small_store_behaviors() {
        let store = MemoryStoreSmall::new(Logger::new("MEMORY"));
        store_and_claim_round_trip(&store).await;
    }

    #[tokio::test]
    async fn small_disown() {
        let store = MemoryStoreSmall::new(Logger::new("MEMORY"));
        disown_makes_available_again(&store).await;
    }

    #[tokio::test]
    async fn small_peek_oldest() {
        let store = MemoryStoreSmall::new(Logger::new("MEMORY"));
        peek_oldest_breaks_ties_by_id(&store).await;
    }

    #[tokio::test]
    async fn small_remove_idempotent() {
        let store = MemoryStoreSmall::new(Logger::new("MEMORY"));
        remove_is_idempotent_with_never_stored(&store).await;
    }

    #[tokio::test]
    async fn big_store_behaviors() {
        let store = MemoryStoreBig::new(Logger::new("MEMORY"));
        store_and_claim_round_trip(&store).await;
    }

    #[tokio::test]
    async fn big_disown() {
        let store = MemoryStoreBig::new(Logger::new("MEMORY"));
        disown_makes_available_again(&store).await;
    }

    #[tokio::test]
    async fn big_peek_oldest() {
        let store = MemoryStoreBig::new(Logger::new("MEMORY"));
        peek_oldest_breaks_ties_by_id(&store).await;
    }

    #[tokio::test]
    async fn big_remove_idempotent() {
        let store = MemoryStoreBig::new(Logger::new("MEMORY"));
        remove_is_idempotent_with_never_stored(&store).await;
    }

    #[tokio::test]
    async fn big_empty_clears_all_three_indexes() {
        let store = MemoryStoreBig::new(Logger::new("MEMORY"));
        store.store(msg("a", "/q/a", 1)).await.unwrap();
        store.store(msg("b", "/q/b", 2)).await.unwrap();
        store.claim_and_retrieve("/q/a", "1").await.unwrap();

        let removed = store.empty().await.unwrap();
        assert_eq!(removed.len(), 2);
        assert!(store.by_id.is_empty());
        assert!(store.by_claimant.is_empty());
        assert!(store.by_timestamp.lock().is_empty());
    }
}
