//! CacheStore — redb-backed persistence for probe results.
//!
//! Values are JSON-serialized into redb's `&[u8]` value columns together
//! with the time they were written. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::PROBE_RESULTS;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// A cached probe result.
///
/// Serializes to `{"latency":"123"}` for a success and `{}` for a
/// recorded failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<String>,
}

impl CacheEntry {
    pub fn success(latency: impl Into<String>) -> Self {
        Self {
            latency: Some(latency.into()),
        }
    }

    pub fn failure() -> Self {
        Self { latency: None }
    }

    pub fn is_success(&self) -> bool {
        self.latency.is_some()
    }
}

/// Key-value cache consulted by the prober.
///
/// `get` returns `None` for unknown or expired keys.
pub trait ResultCache: Send + Sync {
    fn get(&self, key: &str) -> StateResult<Option<CacheEntry>>;
    fn set(&self, key: &str, entry: &CacheEntry) -> StateResult<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    #[serde(flatten)]
    entry: CacheEntry,
    /// Unix timestamp (milliseconds) when the entry was written.
    stored_at: u64,
}

/// Thread-safe probe-result cache backed by redb.
#[derive(Clone)]
pub struct CacheStore {
    db: Arc<Database>,
    ttl: Duration,
}

impl CacheStore {
    /// Open (or create) a persistent cache at the given path.
    pub fn open(path: &Path, ttl: Duration) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            ttl,
        };
        store.ensure_tables()?;
        debug!(?path, ttl_ms = ttl.as_millis() as u64, "cache store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory cache (for testing).
    pub fn open_in_memory(ttl: Duration) -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            ttl,
        };
        store.ensure_tables()?;
        debug!("in-memory cache store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(PROBE_RESULTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Look up an entry, ignoring it if it is older than the TTL.
    pub fn get(&self, key: &str) -> StateResult<Option<CacheEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROBE_RESULTS).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let stored: StoredEntry =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                if is_expired(stored.stored_at, self.ttl, epoch_millis()) {
                    debug!(%key, "cache entry expired");
                    return Ok(None);
                }
                Ok(Some(stored.entry))
            }
            None => Ok(None),
        }
    }

    /// Insert or replace an entry, stamped with the current time.
    pub fn set(&self, key: &str, entry: &CacheEntry) -> StateResult<()> {
        self.put_stamped(key, entry, epoch_millis())
    }

    fn put_stamped(&self, key: &str, entry: &CacheEntry, stored_at: u64) -> StateResult<()> {
        let stored = StoredEntry {
            entry: entry.clone(),
            stored_at,
        };
        let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PROBE_RESULTS).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, success = entry.is_success(), "cache entry stored");
        Ok(())
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> StateResult<usize> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROBE_RESULTS).map_err(map_err!(Table))?;
        let mut count = 0;
        for entry in table.iter().map_err(map_err!(Read))? {
            entry.map_err(map_err!(Read))?;
            count += 1;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> StateResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove entries written more than `max_age` ago. Returns number removed.
    pub fn prune(&self, max_age: Duration) -> StateResult<usize> {
        let now = epoch_millis();
        self.remove_where(|stored| is_expired(stored.stored_at, max_age, now))
    }

    /// Remove every entry. Returns number removed.
    pub fn clear(&self) -> StateResult<usize> {
        self.remove_where(|_| true)
    }

    fn remove_where(&self, predicate: impl Fn(&StoredEntry) -> bool) -> StateResult<usize> {
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(PROBE_RESULTS).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                // Unreadable records are dropped along with the stale ones.
                let matches = serde_json::from_slice::<StoredEntry>(value.value())
                    .map(|stored| predicate(&stored))
                    .unwrap_or(true);
                if matches {
                    keys.push(key.value().to_string());
                }
            }
            keys
        };

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PROBE_RESULTS).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(removed = keys.len(), "cache entries removed");
        Ok(keys.len())
    }
}

impl ResultCache for CacheStore {
    fn get(&self, key: &str) -> StateResult<Option<CacheEntry>> {
        CacheStore::get(self, key)
    }

    fn set(&self, key: &str, entry: &CacheEntry) -> StateResult<()> {
        CacheStore::set(self, key, entry)
    }
}

fn is_expired(stored_at: u64, max_age: Duration, now: u64) -> bool {
    now.saturating_sub(stored_at) >= max_age.as_millis() as u64
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
