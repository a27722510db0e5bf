//! The `Storage` interface every engine in the stack implements (spec §4.1).
//!
//! Grounded in the teacher's `storage::map_data_store::MapDataStore` and
//! `storage::record_store::RecordStore` traits: an `#[async_trait]`
//! object-safe trait used as `Arc<dyn Storage>`/`Box<dyn Storage>`, with
//! `anyhow`-free, crate-typed errors threaded through every method.
//!
//! The spec's callback-based contract ("cb fires once...") is modeled
//! directly as the returned future resolving; there is no separate
//! callback type. Fire-and-forget corresponds to spawning the returned
//! future and dropping its `JoinHandle`.

use async_trait::async_trait;

use crate::error::Result;
use crate::message::Message;

/// Every engine in the tiered stack implements exactly this contract.
///
/// Wrapping engines delegate most operations to an inner `Storage` while
/// interposing their own logic (the decorator pattern described in
/// spec §2/§9).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert `m`. Resolves once `m` is durably visible to subsequent
    /// operations on this engine.
    async fn store(&self, message: Message) -> Result<()>;

    /// Delete by id. Ids with no matching record are simply absent from
    /// the result, never an error.
    async fn remove(&self, ids: &[String]) -> Result<Vec<Message>>;

    /// Remove every message this engine holds.
    async fn empty(&self) -> Result<Vec<Message>>;

    /// Find the oldest unclaimed message in `destination`, set its
    /// claimant to `client`, and return it. `None` if no eligible message
    /// exists -- a documented empty result, not an error (spec §7).
    async fn claim_and_retrieve(
        &self,
        destination: &str,
        client: &str,
    ) -> Result<(Option<Message>, String, String)>;

    /// Clear claimant for every `destination`-message claimed by `client`.
    async fn disown(&self, destination: &str, client: &str) -> Result<()>;

    /// Read without mutating claim state. Missing ids are absent from
    /// the result.
    async fn peek(&self, ids: &[String]) -> Result<Vec<Message>>;

    /// Return a single oldest message across all destinations, tie-broken
    /// by id ascending order.
    async fn peek_oldest(&self) -> Result<Option<Message>>;

    /// Flush all pending work. After this resolves, no further operation
    /// is accepted -- subsequent calls return
    /// [`crate::error::StorageError::ShuttingDown`].
    async fn storage_shutdown(&self) -> Result<()>;
}

/// Picks the single oldest message from a set of candidates, tie-breaking
/// by id ascending (spec §4.1 `peek_oldest`).
///
/// Shared by every engine (`MemoryStore`, `MetadataStore`, `Complex`) that
/// needs this exact tie-break rule, so the comparison lives in one place.
#[must_use]
pub fn oldest_of(messages: impl IntoIterator<Item = Message>) -> Option<Message> {
    messages
        .into_iter()
        .min_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)))
}
