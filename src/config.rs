use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::backend::storage::{KeyValueStore, StorageEntry, get_map, set_map};
use crate::error::Result;

/// How many entries of a feed survive a restart.
pub const MAX_FEED_ITEMS: usize = 50;

pub const DEFAULT_REPOSITORY: &str = "mangadex";

/// Tunables persisted under [`StorageEntry::Config`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub max_feed_items: usize,
    /// Extensions tried, in order, when the guessed one is rejected.
    pub candidate_extensions: Vec<String>,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    /// `None` waits on a stalled download forever.
    pub download_timeout_secs: Option<u64>,
    pub persist_debounce_ms: u64,
    pub repository: String,
    pub cache_root: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_feed_items: MAX_FEED_ITEMS,
            candidate_extensions: vec!["jpg".into(), "png".into(), "jpeg".into()],
            jitter_min_ms: 500,
            jitter_max_ms: 1000,
            download_timeout_secs: None,
            persist_debounce_ms: 500,
            repository: DEFAULT_REPOSITORY.to_string(),
            cache_root: None,
        }
    }
}

impl Settings {
    pub async fn load(store: &dyn KeyValueStore) -> Self {
        match get_map::<Settings>(store, StorageEntry::Config).await {
            Some(settings) => settings,
            None => {
                info!("No stored settings, using defaults");
                Settings::default()
            }
        }
    }

    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        set_map(store, StorageEntry::Config, self).await
    }

    /// Settings with the randomized pre-download delay switched off.
    pub fn without_jitter(mut self) -> Self {
        self.jitter_min_ms = 0;
        self.jitter_max_ms = 0;
        self
    }

    pub fn download_timeout(&self) -> Option<Duration> {
        self.download_timeout_secs.map(Duration::from_secs)
    }

    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }

    /// Jitter bounds, reordered if stored backwards.
    pub fn jitter_range(&self) -> (u64, u64) {
        if self.jitter_min_ms > self.jitter_max_ms {
            warn!(
                "jitter_min_ms {} exceeds jitter_max_ms {}, swapping",
                self.jitter_min_ms, self.jitter_max_ms
            );
            (self.jitter_max_ms, self.jitter_min_ms)
        } else {
            (self.jitter_min_ms, self.jitter_max_ms)
        }
    }

    pub fn cache_root(&self) -> PathBuf {
        self.cache_root.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("rapunzel")
        })
    }
}
