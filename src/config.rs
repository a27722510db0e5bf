//! Configuration surface for the storage stack (spec §6).
//!
//! Grounded in the teacher's `network/config.rs`: plain structs with a
//! hand-rolled `Default`, not a config-file parser — loading these from
//! disk or environment is the broker's job, out of scope here per §1.

use std::path::PathBuf;

/// Top-level configuration for the default storage composition.
#[derive(Debug, Clone)]
pub struct StorageStackConfig {
    /// Root of persistent state. Created if missing.
    pub data_dir: PathBuf,
    /// `Complex` front->back drain delay.
    pub timeout_secs: u64,
    /// Max concurrent back-store `store` calls.
    pub throttle: ThrottleConfig,
    /// Metadata store connection settings. `None` selects the default
    /// SQLite database at `<data_dir>/mq.db`.
    pub metadata: MetadataConfig,
    /// Which in-memory engine backs the `Complex` front tier.
    pub front_store: FrontStoreKind,
}

impl Default for StorageStackConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            timeout_secs: 4,
            throttle: ThrottleConfig::default(),
            metadata: MetadataConfig::default(),
            front_store: FrontStoreKind::default(),
        }
    }
}

/// Selects which in-memory engine backs the `Complex` front tier (spec §6).
///
/// `Small` does a linear scan per operation and suits low-cardinality
/// destinations; `Big` trades memory for three maintained indexes and
/// suits high message-count destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrontStoreKind {
    #[default]
    Small,
    Big,
}

/// Configuration for the `Throttle` decorator (spec §4.5).
#[derive(Debug, Clone, Copy)]
pub struct ThrottleConfig {
    /// Maximum number of concurrent inner `store` calls.
    pub max_in_flight: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self { max_in_flight: 2 }
    }
}

/// Connection settings for the relational metadata store (spec §4.2/§6).
///
/// `dsn: None` means "use the default SQLite file under `data_dir`";
/// `Some(dsn)` lets a caller point at an alternative SQLite database
/// (e.g. an in-memory `sqlite::memory:` DSN for tests).
#[derive(Debug, Clone, Default)]
pub struct MetadataConfig {
    /// Connection string override. `None` = `sqlite://<data_dir>/mq.db`.
    pub dsn: Option<String>,
    /// Username, for backends that require authentication. Unused by the
    /// default SQLite backend; carried for parity with §6.
    pub username: Option<String>,
    /// Password, for backends that require authentication. Unused by the
    /// default SQLite backend; carried for parity with §6.
    pub password: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = StorageStackConfig::default();
        assert_eq!(config.timeout_secs, 4);
        assert_eq!(config.throttle.max_in_flight, 2);
        assert!(config.metadata.dsn.is_none());
        assert_eq!(config.front_store, FrontStoreKind::Small);
    }
}
