//! SQLite-backed durable index of message records (spec §4.2).
//!
//! Grounded in the teacher's `storage::impls::default_record_store`
//! (an engine that owns a backing connection pool and exposes the same
//! trait the in-memory engine implements) and `service/config.rs`'s use
//! of `sqlx`. Bodies are not stored here in the default composition --
//! see [`crate::engines::body_store::BodyStore`] -- so the `body` column
//! is always left null by this engine.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use async_trait::async_trait;

use crate::error::{Result, StorageError};
use crate::logger::Logger;
use crate::message::Message;
use crate::storage::Storage;

const CURRENT_SCHEMA_VERSION: &str = "0.1.8";

/// Durable message index backed by a SQLite database.
///
/// Owns the full lifecycle described in spec §4.2: schema creation,
/// in-place migration, residual-claim clearing, and the two-statement
/// claim protocol (relying on an outer [`crate::engines::claim_serializer::ClaimSerializer`]
/// to prevent double-claims between the SELECT and the UPDATE).
pub struct MetadataStore {
    logger: Logger,
    pool: SqlitePool,
}

impl MetadataStore {
    /// Opens (creating if absent) the database at `dsn`, runs pending
    /// migrations, clears residual claims, and returns the ready store.
    ///
    /// `dsn` examples: `sqlite://./data/mq.db`, `sqlite::memory:`.
    pub async fn open(dsn: &str, logger: Logger) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(dsn)
            .map_err(|e| StorageError::Fatal(format!("invalid metadata dsn: {e}")))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Fatal(format!("opening metadata store: {e}")))?;

        let store = Self { logger, pool };
        store.migrate().await?;
        store.clear_residual_claims().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let meta_exists = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'meta'",
        )
        .fetch_optional(&mut *tx)
        .await?
        .is_some();

        let messages_exists = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'messages'",
        )
        .fetch_optional(&mut *tx)
        .await?
        .is_some();

        if !messages_exists {
            Self::create_messages_table(&mut tx, "messages").await?;
        } else {
            let columns = sqlx::query("PRAGMA table_info(messages)")
                .fetch_all(&mut *tx)
                .await?;

            let has_timestamp = columns.iter().any(|row| row.get::<String, _>("name") == "timestamp");
            if !has_timestamp {
                self.logger.info("migrating messages: pre-0.1.7 -> 0.1.7");
                sqlx::query("ALTER TABLE messages ADD COLUMN timestamp INTEGER NOT NULL DEFAULT 0")
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("ALTER TABLE messages ADD COLUMN size INTEGER NOT NULL DEFAULT 0")
                    .execute(&mut *tx)
                    .await?;
            }

            let id_is_text = columns
                .iter()
                .find(|row| row.get::<String, _>("name") == "id")
                .map(|row| row.get::<String, _>("type").eq_ignore_ascii_case("TEXT"))
                .unwrap_or(false);

            if !id_is_text {
                self.logger
                    .info("migrating messages: 0.1.7 -> 0.1.8 (id INTEGER -> TEXT)");
                sqlx::query("ALTER TABLE messages RENAME TO old_messages")
                    .execute(&mut *tx)
                    .await?;
                Self::create_messages_table(&mut tx, "messages").await?;
                sqlx::query(
                    "INSERT INTO messages (id, destination, persistent, claimant, body, timestamp, size)
                     SELECT CAST(id AS TEXT), destination, persistent, claimant, body, timestamp, size
                     FROM old_messages",
                )
                .execute(&mut *tx)
                .await?;
                sqlx::query("DROP TABLE old_messages")
                    .execute(&mut *tx)
                    .await?;
            }
        }

        if !meta_exists {
            self.logger.info("migrating: 0.1.7 -> 0.1.8 (meta table)");
            sqlx::query("CREATE TABLE meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)")
                .execute(&mut *tx)
                .await?;
            sqlx::query("INSERT INTO meta (key, value) VALUES ('version', ?)")
                .bind(CURRENT_SCHEMA_VERSION)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn create_messages_table(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        table: &str,
    ) -> Result<()> {
        sqlx::query(&format!(
            "CREATE TABLE {table} (
                id TEXT PRIMARY KEY,
                destination TEXT NOT NULL,
                persistent CHAR(1) NOT NULL,
                claimant TEXT,
                body TEXT,
                timestamp INTEGER NOT NULL,
                size INTEGER NOT NULL
            )"
        ))
        .execute(&mut **tx)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX idx_{table}_destination ON {table}(destination)"
        ))
        .execute(&mut **tx)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX idx_{table}_timestamp ON {table}(timestamp)"
        ))
        .execute(&mut **tx)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX idx_{table}_claimant ON {table}(claimant)"
        ))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn clear_residual_claims(&self) -> Result<()> {
        sqlx::query("UPDATE messages SET claimant = NULL WHERE claimant IS NOT NULL")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Message {
        Message {
            id: row.get("id"),
            destination: row.get("destination"),
            persistent: row.get::<String, _>("persistent") == "1",
            body: bytes::Bytes::new(),
            timestamp: row.get("timestamp"),
            size: row.get::<i64, _>("size") as u64,
            claimant: row.get("claimant"),
        }
    }
}

#[async_trait]
impl Storage for MetadataStore {
    async fn store(&self, message: Message) -> Result<()> {
        sqlx::query(
            "INSERT INTO messages (id, destination, persistent, claimant, body, timestamp, size)
             VALUES (?, ?, ?, ?, NULL, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.destination)
        .bind(if message.persistent { "1" } else { "0" })
        .bind(&message.claimant)
        .bind(message.timestamp)
        .bind(message.size as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, ids: &[String]) -> Result<Vec<Message>> {
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = sqlx::query("SELECT * FROM messages WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
            {
                removed.push(Self::row_to_message(&row));
                sqlx::query("DELETE FROM messages WHERE id = ?")
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(removed)
    }

    async fn empty(&self) -> Result<Vec<Message>> {
        let rows = sqlx::query("SELECT * FROM messages")
            .fetch_all(&self.pool)
            .await?;
        let removed = rows.iter().map(Self::row_to_message).collect();
        sqlx::query("DELETE FROM messages").execute(&self.pool).await?;
        Ok(removed)
    }

    async fn claim_and_retrieve(
        &self,
        destination: &str,
        client: &str,
    ) -> Result<(Option<Message>, String, String)> {
        let Some(row) = sqlx::query(
            "SELECT * FROM messages WHERE destination = ? AND claimant IS NULL
             ORDER BY id ASC LIMIT 1",
        )
        .bind(destination)
        .fetch_optional(&self.pool)
        .await?
        else {
            self.logger
                .debug(&format!("no unclaimed message in {destination}"));
            return Ok((None, destination.to_string(), client.to_string()));
        };

        let id: String = row.get("id");
        sqlx::query("UPDATE messages SET claimant = ? WHERE id = ?")
            .bind(client)
            .bind(&id)
            .execute(&self.pool)
            .await?;

        let message = Self::row_to_message(&row).with_claimant(Some(client.to_string()));
        Ok((Some(message), destination.to_string(), client.to_string()))
    }

    async fn disown(&self, destination: &str, client: &str) -> Result<()> {
        sqlx::query(
            "UPDATE messages SET claimant = NULL WHERE destination = ? AND claimant = ?",
        )
        .bind(destination)
        .bind(client)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn peek(&self, ids: &[String]) -> Result<Vec<Message>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = sqlx::query("SELECT * FROM messages WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
            {
                found.push(Self::row_to_message(&row));
            }
        }
        Ok(found)
    }

    async fn peek_oldest(&self) -> Result<Option<Message>> {
        let row = sqlx::query("SELECT * FROM messages ORDER BY timestamp ASC, id ASC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Self::row_to_message(&r)))
    }

    async fn storage_shutdown(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;

    async fn open_memory() -> MetadataStore {
        MetadataStore::open("sqlite::memory:", Logger::new("METADATA"))
            .await
            .unwrap()
    }

    fn msg(id: &str, destination: &str, ts: i64) -> Message {
        Message::new(id, destination, true, Bytes::new(), ts)
    }

    #[tokio::test]
    async fn open_creates_schema_and_meta_version() {
        let store = open_memory().await;
        let row = sqlx::query("SELECT value FROM meta WHERE key = 'version'")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        let version: String = row.get("value");
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn store_then_claim_then_disown() {
        let store = open_memory().await;
        store.store(msg("m1", "/q/a", 10)).await.unwrap();

        let (claimed, ..) = store.claim_and_retrieve("/q/a", "7").await.unwrap();
        assert_eq!(claimed.unwrap().claimant.as_deref(), Some("7"));

        store.disown("/q/a", "7").await.unwrap();
        let rows = store.peek(&["m1".to_string()]).await.unwrap();
        assert!(rows[0].claimant.is_none());
    }

    #[tokio::test]
    async fn open_clears_residual_claims() {
        let store = open_memory().await;
        store.store(msg("m1", "/q/a", 10)).await.unwrap();
        store.claim_and_retrieve("/q/a", "7").await.unwrap();

        // Reopening simulates a process restart against the same data.
        let dsn = "sqlite::memory:";
        // in-memory DSN doesn't survive reopen across pools, so verify the
        // clearing logic directly against a pool we keep open.
        sqlx::query("UPDATE messages SET claimant = 'stale' WHERE id = 'm1'")
            .execute(&store.pool)
            .await
            .unwrap();
        store.clear_residual_claims().await.unwrap();
        let rows = store.peek(&["m1".to_string()]).await.unwrap();
        assert!(rows[0].claimant.is_none());
        let _ = dsn;
    }

    #[tokio::test]
    async fn peek_oldest_orders_by_timestamp_then_id() {
        let store = open_memory().await;
        store.store(msg("b", "/q/a", 100)).await.unwrap();
        store.store(msg("a", "/q/a", 100)).await.unwrap();
        store.store(msg("c", "/q/b", 50)).await.unwrap();

        let oldest = store.peek_oldest().await.unwrap().unwrap();
        assert_eq!(oldest.id, "c");
    }

    /// A pre-0.1.8 database has an INTEGER `messages.id`, no `timestamp`/
    /// `size` columns, and no `meta` table. Opening it must rebuild
    /// `messages` with a TEXT id, preserve every row, stamp the schema
    /// version, and clear any residual claim (spec §8 migration
    /// monotonicity). In-memory DSNs don't survive reopening across
    /// pools, so this uses a real temp-file database.
    #[tokio::test]
    async fn migration_monotonicity_from_pre_0_1_8() {
        let dir = TempDir::new().unwrap();
        let dsn = format!("sqlite://{}/legacy.db", dir.path().display());

        {
            let options = SqliteConnectOptions::from_str(&dsn)
                .unwrap()
                .create_if_missing(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(options)
                .await
                .unwrap();
            sqlx::query(
                "CREATE TABLE messages (
                    id INTEGER PRIMARY KEY,
                    destination TEXT NOT NULL,
                    persistent CHAR(1) NOT NULL,
                    claimant TEXT,
                    body TEXT
                )",
            )
            .execute(&pool)
            .await
            .unwrap();
            sqlx::query(
                "INSERT INTO messages (id, destination, persistent, claimant, body)
                 VALUES (1, '/q/a', '1', 'stale-claimant', NULL)",
            )
            .execute(&pool)
            .await
            .unwrap();
            pool.close().await;
        }

        let store = MetadataStore::open(&dsn, Logger::new("METADATA"))
            .await
            .unwrap();

        let row = sqlx::query("SELECT value FROM meta WHERE key = 'version'")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        let version: String = row.get("value");
        assert_eq!(version, CURRENT_SCHEMA_VERSION);

        let rows = store.peek(&["1".to_string()]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].destination, "/q/a");
        assert!(rows[0].claimant.is_none());
    }
}
