//! Assembles the default storage stack from a [`StorageStackConfig`]
//! (spec §3/§6): `Complex(front = MemoryStore, back = Throttle(BodyStore(
//! ClaimSerializer(MetadataStore))))`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clock::{Clock, SystemClock};
use crate::config::{FrontStoreKind, StorageStackConfig};
use crate::engines::{BodyStore, ClaimSerializer, Complex, MemoryStoreBig, MemoryStoreSmall, MetadataStore, Throttle};
use crate::error::Result;
use crate::logger::Logger;
use crate::message::Message;
use crate::storage::Storage;

/// Front-tier engine selected by [`FrontStoreKind`]. `Complex` is generic
/// over its front engine, but the default composition is a single
/// concrete type, so this enum lets `build_default_stack` pick the
/// engine at runtime without exposing `Complex`'s type parameter.
pub enum FrontStore {
    Small(MemoryStoreSmall),
    Big(MemoryStoreBig),
}

#[async_trait]
impl Storage for FrontStore {
    async fn store(&self, message: Message) -> Result<()> {
        match self {
            Self::Small(s) => s.store(message).await,
            Self::Big(s) => s.store(message).await,
        }
    }

    async fn remove(&self, ids: &[String]) -> Result<Vec<Message>> {
        match self {
            Self::Small(s) => s.remove(ids).await,
            Self::Big(s) => s.remove(ids).await,
        }
    }

    async fn empty(&self) -> Result<Vec<Message>> {
        match self {
            Self::Small(s) => s.empty().await,
            Self::Big(s) => s.empty().await,
        }
    }

    async fn claim_and_retrieve(
        &self,
        destination: &str,
        client: &str,
    ) -> Result<(Option<Message>, String, String)> {
        match self {
            Self::Small(s) => s.claim_and_retrieve(destination, client).await,
            Self::Big(s) => s.claim_and_retrieve(destination, client).await,
        }
    }

    async fn disown(&self, destination: &str, client: &str) -> Result<()> {
        match self {
            Self::Small(s) => s.disown(destination, client).await,
            Self::Big(s) => s.disown(destination, client).await,
        }
    }

    async fn peek(&self, ids: &[String]) -> Result<Vec<Message>> {
        match self {
            Self::Small(s) => s.peek(ids).await,
            Self::Big(s) => s.peek(ids).await,
        }
    }

    async fn peek_oldest(&self) -> Result<Option<Message>> {
        match self {
            Self::Small(s) => s.peek_oldest().await,
            Self::Big(s) => s.peek_oldest().await,
        }
    }

    async fn storage_shutdown(&self) -> Result<()> {
        match self {
            Self::Small(s) => s.storage_shutdown().await,
            Self::Big(s) => s.storage_shutdown().await,
        }
    }
}

/// The default tiered stack: a configurable in-memory front and a
/// throttled, body-splitting, claim-serialized SQLite back.
pub type DefaultStack = Arc<Complex<FrontStore, Throttle<BodyStore<ClaimSerializer<MetadataStore>>>>>;

/// Builds the default storage stack described in spec §3, rooted at
/// `config.data_dir`, timestamping drain-age logging with the real
/// system clock. See [`build_stack_with_clock`] to inject a test clock.
pub async fn build_default_stack(config: &StorageStackConfig) -> Result<DefaultStack> {
    build_stack_with_clock(config, Arc::new(SystemClock)).await
}

/// As [`build_default_stack`], but with an injectable [`Clock`] used by
/// `Complex` to log message age at drain/promotion time.
///
/// Creates `data_dir` if missing, opens (or creates) the SQLite metadata
/// database at `<data_dir>/mq.db` unless `config.metadata.dsn` overrides
/// it, and wires up claim serialization, body splitting, write
/// throttling, and the front/back tier split per the defaults in
/// `config`.
pub async fn build_stack_with_clock(
    config: &StorageStackConfig,
    clock: Arc<dyn Clock>,
) -> Result<DefaultStack> {
    tokio::fs::create_dir_all(&config.data_dir).await?;

    let dsn = config.metadata.dsn.clone().unwrap_or_else(|| {
        format!("sqlite://{}/mq.db", config.data_dir.display())
    });

    let metadata = MetadataStore::open(&dsn, Logger::new("METADATA")).await?;
    let serialized = ClaimSerializer::new(metadata);
    let bodies = BodyStore::new(serialized, config.data_dir.clone(), Logger::new("BODYSTORE"));
    let throttled = Throttle::new(bodies, config.throttle.max_in_flight);

    let front = match config.front_store {
        FrontStoreKind::Small => FrontStore::Small(MemoryStoreSmall::new(Logger::new("FRONT"))),
        FrontStoreKind::Big => FrontStore::Big(MemoryStoreBig::new(Logger::new("FRONT"))),
    };
    let complex = Complex::with_clock(front, throttled, config.timeout_secs, Logger::new("COMPLEX"), clock);
    Ok(Arc::new(complex))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;

    #[tokio::test]
    async fn builds_and_round_trips_a_message() {
        let dir = TempDir::new().unwrap();
        let config = StorageStackConfig {
            data_dir: dir.path().to_path_buf(),
            ..StorageStackConfig::default()
        };

        let stack = build_default_stack(&config).await.unwrap();
        stack
            .store(crate::message::Message::new(
                "m1",
                "/q/a",
                true,
                Bytes::from_static(b"hi"),
                1,
            ))
            .await
            .unwrap();

        let (claimed, ..) = stack.claim_and_retrieve("/q/a", "7").await.unwrap();
        assert_eq!(claimed.unwrap().body, Bytes::from_static(b"hi"));
    }

    #[tokio::test]
    async fn big_front_store_is_selectable_and_round_trips() {
        let dir = TempDir::new().unwrap();
        let config = StorageStackConfig {
            data_dir: dir.path().to_path_buf(),
            front_store: crate::config::FrontStoreKind::Big,
            ..StorageStackConfig::default()
        };

        let stack = build_default_stack(&config).await.unwrap();
        stack
            .store(crate::message::Message::new(
                "m1",
                "/q/a",
                true,
                Bytes::from_static(b"hi"),
                1,
            ))
            .await
            .unwrap();

        let (claimed, ..) = stack.claim_and_retrieve("/q/a", "7").await.unwrap();
        assert_eq!(claimed.unwrap().body, Bytes::from_static(b"hi"));
    }
}
