//! Redis-backed retry spool.
//!
//! One Redis list per routing key, under the `spool:` namespace:
//!
//! - `append` RPUSHes a JSON-encoded entry, so a key's list is its batch in
//!   append order.
//! - `read_all` LRANGEs the whole list.
//! - `delete_key` DELs the list after a fully successful replay.
//! - `list_keys` SCANs the namespace and returns plain routing keys.
//!
//! Entries survive process restarts; they are deleted only by a replay that
//! got the whole batch through.

use questline_core::spool::{SpoolError, SpoolStore, SpooledEvent};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

const KEY_PREFIX: &str = "spool:";

/// Durable [`SpoolStore`] on Redis lists.
///
/// `Clone` shares the same [`ConnectionManager`]; each operation clones the
/// manager, which multiplexes over one reconnecting connection.
#[derive(Clone)]
pub struct RedisSpoolStore {
    conn_manager: ConnectionManager,
}

impl RedisSpoolStore {
    /// Connect to Redis at the given URL.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError::Storage`] if the URL is malformed or the
    /// connection cannot be established.
    pub async fn new(redis_url: &str) -> Result<Self, SpoolError> {
        let client = Client::open(redis_url)
            .map_err(|e| SpoolError::Storage(format!("failed to create Redis client: {e}")))?;
        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| SpoolError::Storage(format!("failed to connect to Redis: {e}")))?;

        tracing::info!("redis spool store connected");
        Ok(Self { conn_manager })
    }

    fn spool_key(routing_key: &str) -> String {
        format!("{KEY_PREFIX}{routing_key}")
    }
}

#[async_trait::async_trait]
impl SpoolStore for RedisSpoolStore {
    async fn append(&self, routing_key: &str, entry: SpooledEvent) -> Result<(), SpoolError> {
        let mut conn = self.conn_manager.clone();
        let key = Self::spool_key(routing_key);
        let encoded =
            serde_json::to_string(&entry).map_err(|e| SpoolError::Serialization(e.to_string()))?;

        let _: () = conn
            .rpush(&key, encoded)
            .await
            .map_err(|e| SpoolError::Storage(format!("failed to append spool entry: {e}")))?;

        tracing::debug!(routing_key, "event spooled");
        Ok(())
    }

    async fn read_all(&self, routing_key: &str) -> Result<Vec<SpooledEvent>, SpoolError> {
        let mut conn = self.conn_manager.clone();
        let key = Self::spool_key(routing_key);

        let raw: Vec<String> = conn
            .lrange(&key, 0, -1)
            .await
            .map_err(|e| SpoolError::Storage(format!("failed to read spool batch: {e}")))?;

        raw.iter()
            .map(|entry| {
                serde_json::from_str(entry).map_err(|e| SpoolError::Serialization(e.to_string()))
            })
            .collect()
    }

    async fn delete_key(&self, routing_key: &str) -> Result<(), SpoolError> {
        let mut conn = self.conn_manager.clone();
        let key = Self::spool_key(routing_key);

        let _: () = conn
            .del(&key)
            .await
            .map_err(|e| SpoolError::Storage(format!("failed to delete spool key: {e}")))?;

        tracing::debug!(routing_key, "spool batch deleted");
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>, SpoolError> {
        let mut conn = self.conn_manager.clone();

        // Cursor-driven SCAN instead of KEYS, so a large spool never blocks
        // the server.
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(format!("{KEY_PREFIX}*"))
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| SpoolError::Storage(format!("failed to scan spool keys: {e}")))?;

            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(KEY_PREFIX))
            .map(str::to_string)
            .collect())
    }

    async fn close(&self) -> Result<(), SpoolError> {
        // The connection manager closes when its last clone drops; nothing
        // to flush, entries are durable on append.
        tracing::debug!("redis spool store closed");
        Ok(())
    }
}
