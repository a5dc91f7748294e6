use async_trait::async_trait;
use log::warn;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Fixed set of keys the app persists under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageEntry {
    Config,
    Library,
    FeedLatest,
    FeedTrending,
    SearchText,
    CurrentRoute,
}

impl StorageEntry {
    pub fn key(&self) -> &'static str {
        match self {
            StorageEntry::Config => "config",
            StorageEntry::Library => "library",
            StorageEntry::FeedLatest => "feedLatest",
            StorageEntry::FeedTrending => "feedTrending",
            StorageEntry::SearchText => "searchText",
            StorageEntry::CurrentRoute => "currentRoute",
        }
    }
}

/// Opaque JSON key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_item(&self, entry: StorageEntry) -> Result<Option<Value>>;

    async fn set_item(&self, entry: StorageEntry, value: Value) -> Result<()>;
}

/// Reads an entry and decodes it. Missing, unreadable and malformed entries
/// all come back as `None`; the latter two are logged.
pub async fn get_map<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    entry: StorageEntry,
) -> Option<T> {
    let value = match store.get_item(entry).await {
        Ok(value) => value?,
        Err(e) => {
            warn!("Failed to read '{}': {}", entry.key(), e);
            return None;
        }
    };

    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!("Discarding malformed '{}': {}", entry.key(), e);
            None
        }
    }
}

pub async fn set_map<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    entry: StorageEntry,
    value: &T,
) -> Result<()> {
    store.set_item(entry, serde_json::to_value(value)?).await
}

/// One pretty-printed JSON file per entry inside a directory.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under the platform config directory.
    pub fn in_config_dir() -> Self {
        let dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rapunzel");
        Self::new(dir)
    }

    fn path_for(&self, entry: StorageEntry) -> PathBuf {
        self.dir.join(format!("{}.json", entry.key()))
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get_item(&self, entry: StorageEntry) -> Result<Option<Value>> {
        let path = self.path_for(entry);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn set_item(&self, entry: StorageEntry, value: Value) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let content = serde_json::to_string_pretty(&value)?;
        tokio::fs::write(self.path_for(entry), content)
            .await
            .map_err(|e| Error::Storage {
                key: entry.key().to_string(),
                reason: e.to_string(),
            })
    }
}

/// Volatile store, mostly for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<StorageEntry, Value>>,
    writes: Mutex<Vec<StorageEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry written so far, in write order.
    pub fn writes(&self) -> Vec<StorageEntry> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_item(&self, entry: StorageEntry) -> Result<Option<Value>> {
        let entries = self.entries.lock().map_err(|e| Error::Storage {
            key: entry.key().to_string(),
            reason: e.to_string(),
        })?;
        Ok(entries.get(&entry).cloned())
    }

    async fn set_item(&self, entry: StorageEntry, value: Value) -> Result<()> {
        let poisoned = |reason: String| Error::Storage {
            key: entry.key().to_string(),
            reason,
        };
        self.entries
            .lock()
            .map_err(|e| poisoned(e.to_string()))?
            .insert(entry, value);
        self.writes
            .lock()
            .map_err(|e| poisoned(e.to_string()))?
            .push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn json_file_store_round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());

        assert!(get_map::<Sample>(&store, StorageEntry::SearchText).await.is_none());

        let sample = Sample {
            name: "berserk".into(),
            count: 3,
        };
        set_map(&store, StorageEntry::SearchText, &sample).await.unwrap();

        assert!(dir.path().join("searchText.json").exists());
        let loaded: Sample = get_map(&store, StorageEntry::SearchText).await.unwrap();
        assert_eq!(loaded, sample);
    }

    #[tokio::test]
    async fn malformed_entry_reads_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("library.json"), "{not json").unwrap();
        let store = JsonFileStore::new(dir.path());

        assert!(get_map::<Vec<String>>(&store, StorageEntry::Library).await.is_none());
    }

    #[tokio::test]
    async fn memory_store_records_writes() {
        let store = MemoryStore::new();
        set_map(&store, StorageEntry::FeedLatest, &vec!["a"]).await.unwrap();
        set_map(&store, StorageEntry::FeedTrending, &vec!["b"]).await.unwrap();

        assert_eq!(
            store.writes(),
            vec![StorageEntry::FeedLatest, StorageEntry::FeedTrending]
        );
        let latest: Vec<String> = get_map(&store, StorageEntry::FeedLatest).await.unwrap();
        assert_eq!(latest, vec!["a".to_string()]);
    }
}
