//! The broker's unit of storage: an immutable message record with one
//! mutable field (`claimant`).

use bytes::Bytes;

/// A message in flight through the storage stack.
///
/// Every field except `claimant` is set at construction and never changes;
/// engines that "mutate" a message (claim, disown) do so by replacing the
/// stored record with a clone that has a different `claimant`, never by
/// mutating in place through a shared reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Opaque id, globally unique within a broker lifetime.
    pub id: String,
    /// Destination (queue) name this message was sent to.
    pub destination: String,
    /// Whether this message should survive a process restart.
    pub persistent: bool,
    /// Opaque body bytes. No framing, no checksum, no interpretation.
    pub body: Bytes,
    /// Monotonic seconds since epoch at receive time (see [`crate::clock::Clock`]).
    pub timestamp: i64,
    /// Body length in bytes. Kept alongside `body` rather than derived so
    /// that a bodyless metadata-only record (post-split in `BodyStore`)
    /// still reports an accurate size.
    pub size: u64,
    /// Client id holding an exclusive claim, if any.
    pub claimant: Option<String>,
}

impl Message {
    /// Builds a fresh, unclaimed message. `size` is derived from `body`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        destination: impl Into<String>,
        persistent: bool,
        body: impl Into<Bytes>,
        timestamp: i64,
    ) -> Self {
        let body = body.into();
        let size = body.len() as u64;
        Self {
            id: id.into(),
            destination: destination.into(),
            persistent,
            body,
            timestamp,
            size,
            claimant: None,
        }
    }

    /// Returns a copy of this message with `claimant` set.
    #[must_use]
    pub fn with_claimant(&self, claimant: Option<String>) -> Self {
        Self {
            claimant,
            ..self.clone()
        }
    }
}
