use anyhow::{Context, Result};
use async_trait::async_trait;
use rocksdb::{DB, Options};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use wc_types::WalletStorageData;

pub const DEFAULT_STORAGE_KEY: &str = "wallet_connection";

/// Origin-scoped durable string store, shared by every tab of the origin.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>>;
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;
    async fn remove_item(&self, key: &str) -> Result<()>;
}

#[derive(Default)]
pub struct NoopStore;

#[async_trait]
impl KeyValueStore for NoopStore {
    async fn get_item(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set_item(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    async fn remove_item(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    items: RwLock<HashMap<String, String>>,
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let guard = self.items.read().await;
        Ok(guard.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut guard = self.items.write().await;
        guard.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let mut guard = self.items.write().await;
        guard.remove(key);
        Ok(())
    }
}

pub struct RocksDbStore {
    db: Arc<DB>,
}

impl RocksDbStore {
    pub fn open_default(path: &str) -> Result<Self> {
        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DB::open(&options, path).with_context(|| format!("failed to open store at {path}"))?;
        Ok(Self { db: Arc::new(db) })
    }

    fn key_for_item(key: &str) -> String {
        format!("local-storage:{key}")
    }
}

#[async_trait]
impl KeyValueStore for RocksDbStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let value = self.db.get(Self::key_for_item(key).as_bytes())?;
        match value {
            Some(raw) => Ok(Some(String::from_utf8(raw).context("stored value is not UTF-8")?)),
            None => Ok(None),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.db.put(Self::key_for_item(key).as_bytes(), value.as_bytes())?;
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.db.delete(Self::key_for_item(key).as_bytes())?;
        Ok(())
    }
}

/// Reads and writes the persisted connection record under one key.
///
/// Records that fail to parse or carry no usable address are removed on read
/// and reported as absent.
#[derive(Clone)]
pub struct PersistenceStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl PersistenceStore {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn load(&self) -> Result<Option<WalletStorageData>> {
        let Some(raw) = self.store.get_item(&self.key).await? else {
            return Ok(None);
        };

        let record = match serde_json::from_str::<WalletStorageData>(&raw) {
            Ok(record) if has_address(&record) => record,
            Ok(_) => {
                warn!(key = %self.key, "discarding stored wallet record without an address");
                self.store.remove_item(&self.key).await?;
                return Ok(None);
            }
            Err(err) => {
                warn!(key = %self.key, "discarding malformed stored wallet record: {}", err);
                self.store.remove_item(&self.key).await?;
                return Ok(None);
            }
        };

        Ok(Some(record))
    }

    pub async fn save(&self, record: &WalletStorageData) -> Result<()> {
        let value = serde_json::to_string(record)?;
        self.store.set_item(&self.key, &value).await?;
        debug!(key = %self.key, "stored wallet record");
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.remove_item(&self.key).await?;
        debug!(key = %self.key, "cleared wallet record");
        Ok(())
    }
}

fn has_address(record: &WalletStorageData) -> bool {
    record
        .address
        .as_deref()
        .is_some_and(|address| !address.trim().is_empty())
}
