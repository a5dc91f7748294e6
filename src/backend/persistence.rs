//! Feed snapshots: what gets written to the key-value store, how writes
//! are coalesced, and how a snapshot is validated on the way back in.

use futures::future::join_all;
use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::feed::{CachedImage, FeedState};
use super::fs::FileSystem;
use super::provider::BookBase;
use super::storage::{KeyValueStore, StorageEntry, get_map, set_map};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSnapshot {
    pub rendered: Vec<String>,
    pub book_list_record: IndexMap<String, BookBase>,
    pub cached_images_record: IndexMap<String, CachedImage>,
}

impl FeedSnapshot {
    /// The first `max_items` rendered ids that have both metadata and an
    /// image, with records restricted to exactly those ids.
    pub fn capture(feed: &FeedState, max_items: usize) -> Self {
        let mut snapshot = FeedSnapshot::default();

        for id in feed.rendered.iter().take(max_items) {
            let (Some(book), Some(image)) = (
                feed.book_list_record.get(id),
                feed.cached_images_record.get(id),
            ) else {
                continue;
            };
            snapshot.rendered.push(id.clone());
            snapshot.book_list_record.insert(id.clone(), book.clone());
            snapshot.cached_images_record.insert(id.clone(), image.clone());
        }

        snapshot
    }

    pub fn len(&self) -> usize {
        self.rendered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rendered.is_empty()
    }

    pub fn into_feed(self) -> FeedState {
        FeedState {
            rendered: self.rendered,
            book_list_record: self.book_list_record,
            cached_images_record: self.cached_images_record,
            ..FeedState::default()
        }
    }

    /// Drops ids without metadata or whose cached file is gone, then keeps
    /// at most `max_items`.
    pub async fn validate(self, fs: &dyn FileSystem, max_items: usize) -> Self {
        let FeedSnapshot {
            rendered,
            mut book_list_record,
            mut cached_images_record,
        } = self;

        let checks = rendered.iter().map(|id| {
            let image = cached_images_record.get(id).map(|c| c.value.clone());
            let has_book = book_list_record.contains_key(id);
            async move {
                match image {
                    Some(path) if has_book && !is_remote(&path) => fs.exists(Path::new(&path)).await,
                    _ => false,
                }
            }
        });
        let valid = join_all(checks).await;

        let mut snapshot = FeedSnapshot::default();
        for (id, ok) in rendered.into_iter().zip(valid) {
            if snapshot.rendered.len() >= max_items {
                break;
            }
            if !ok || snapshot.book_list_record.contains_key(&id) {
                debug!("Dropping '{}' from hydrated feed", id);
                continue;
            }
            if let (Some(book), Some(image)) = (
                book_list_record.swap_remove(&id),
                cached_images_record.swap_remove(&id),
            ) {
                snapshot.book_list_record.insert(id.clone(), book);
                snapshot.cached_images_record.insert(id.clone(), image);
                snapshot.rendered.push(id);
            }
        }
        snapshot
    }
}

fn is_remote(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}

/// Reads a persisted feed back, keeping only entries whose files still exist.
/// An unreadable snapshot counts as no snapshot.
pub async fn hydrate(
    store: &dyn KeyValueStore,
    fs: &dyn FileSystem,
    entry: StorageEntry,
    max_items: usize,
) -> Option<FeedState> {
    let snapshot: FeedSnapshot = get_map(store, entry).await?;
    let stored = snapshot.len();
    let snapshot = snapshot.validate(fs, max_items).await;

    info!(
        "Hydrated '{}': kept {} of {} entries",
        entry.key(),
        snapshot.len(),
        stored
    );
    Some(snapshot.into_feed())
}

/// Debounced snapshot writer, one background task per persisted feed.
///
/// Snapshots scheduled in quick succession collapse into a single write of
/// the newest one once `debounce` has passed without another.
pub struct FeedPersistence {
    senders: HashMap<StorageEntry, mpsc::UnboundedSender<FeedSnapshot>>,
    tasks: Vec<JoinHandle<()>>,
}

impl FeedPersistence {
    pub fn spawn(store: Arc<dyn KeyValueStore>, debounce: Duration) -> Self {
        let mut senders = HashMap::new();
        let mut tasks = Vec::new();

        for entry in [StorageEntry::FeedLatest, StorageEntry::FeedTrending] {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(entry, tx);
            tasks.push(tokio::spawn(run_writer(store.clone(), entry, debounce, rx)));
        }

        Self { senders, tasks }
    }

    pub fn schedule(&self, entry: StorageEntry, snapshot: FeedSnapshot) {
        match self.senders.get(&entry) {
            Some(tx) => {
                if tx.send(snapshot).is_err() {
                    warn!("Writer for '{}' has stopped", entry.key());
                }
            }
            None => warn!("'{}' is not a persisted feed", entry.key()),
        }
    }

    /// Writes anything still pending and stops the writers.
    pub async fn shutdown(self) {
        drop(self.senders);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Feed writer panicked: {}", e);
            }
        }
    }
}

async fn run_writer(
    store: Arc<dyn KeyValueStore>,
    entry: StorageEntry,
    debounce: Duration,
    mut rx: mpsc::UnboundedReceiver<FeedSnapshot>,
) {
    while let Some(mut latest) = rx.recv().await {
        loop {
            tokio::select! {
                next = rx.recv() => match next {
                    Some(snapshot) => latest = snapshot,
                    None => break,
                },
                _ = tokio::time::sleep(debounce) => break,
            }
        }

        match set_map(store.as_ref(), entry, &latest).await {
            Ok(()) => debug!("Persisted {} entries to '{}'", latest.len(), entry.key()),
            Err(e) => warn!("Failed to persist '{}': {}", entry.key(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cache::{LoadedImage, VirtualItem};
    use crate::backend::feed::LoadMode;
    use crate::backend::fs::mock::MockFileSystem;
    use crate::backend::provider::mock::MockProvider;
    use crate::backend::storage::MemoryStore;
    use std::path::PathBuf;

    fn cover_path(id: &str) -> String {
        format!("/cache/MainFeed/{}.cover.jpg", id)
    }

    fn feed_with(ids: &[String]) -> FeedState {
        let mut feed = FeedState::default();
        let batch = feed.merge_page(ids.iter().map(|id| MockProvider::book(id)).collect(), LoadMode::Clean);
        for item in batch {
            let local = PathBuf::from(cover_path(&item.id));
            feed.apply_image(&item.map(|remote| LoadedImage {
                remote,
                local: Some(local),
            }));
        }
        feed
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("b{}", i)).collect()
    }

    #[test]
    fn capture_is_a_prefix_cap() {
        let feed = feed_with(&ids(8));
        let snapshot = FeedSnapshot::capture(&feed, 5);

        assert_eq!(snapshot.rendered, ids(5));
        assert_eq!(snapshot.book_list_record.keys().cloned().collect::<Vec<_>>(), ids(5));
        assert_eq!(snapshot.cached_images_record.keys().cloned().collect::<Vec<_>>(), ids(5));
    }

    #[test]
    fn capture_drops_partial_entries() {
        let mut feed = feed_with(&ids(3));
        feed.cached_images_record.swap_remove("b1");
        feed.rendered.push("ghost".into());

        let snapshot = FeedSnapshot::capture(&feed, 10);
        assert_eq!(snapshot.rendered, ["b0", "b2"]);
        assert!(!snapshot.book_list_record.contains_key("b1"));
    }

    #[test]
    fn snapshot_uses_camel_case_keys() {
        let snapshot = FeedSnapshot::capture(&feed_with(&ids(1)), 10);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json.get("bookListRecord").is_some());
        assert!(json.get("cachedImagesRecord").is_some());
    }

    #[tokio::test]
    async fn hydration_drops_missing_files_and_metadata() {
        let fs = MockFileSystem::new();
        let store = MemoryStore::new();

        let all = ["x".to_string(), "missing-book".to_string(), "y".to_string(), "gone".to_string()];
        let mut snapshot = FeedSnapshot::capture(&feed_with(&all), 10);
        snapshot.book_list_record.swap_remove("missing-book");
        for id in ["x", "missing-book", "y"] {
            fs.add_file(cover_path(id), 10);
        }
        set_map(&store, StorageEntry::FeedLatest, &snapshot).await.unwrap();

        let feed = hydrate(&store, &fs, StorageEntry::FeedLatest, 10).await.unwrap();
        assert_eq!(feed.rendered, ["x", "y"]);
        assert_eq!(feed.book_list_record.len(), 2);
        assert!(!feed.cached_images_record.contains_key("gone"));
        assert_eq!(feed.page, 1);
    }

    #[tokio::test]
    async fn hydration_drops_uncached_remote_images_and_caps() {
        let fs = MockFileSystem::new();
        let mut feed = feed_with(&ids(4));
        for id in ids(4) {
            fs.add_file(cover_path(&id), 10);
        }
        feed.apply_image(&VirtualItem {
            id: "b0".into(),
            index: 0,
            value: LoadedImage {
                remote: "https://covers.test/b0/cover.jpg".into(),
                local: None,
            },
        });

        let snapshot = FeedSnapshot::capture(&feed, 10).validate(&fs, 2).await;
        assert_eq!(snapshot.rendered, ["b1", "b2"]);
    }

    #[tokio::test]
    async fn unreadable_snapshot_hydrates_to_nothing() {
        let fs = MockFileSystem::new();
        let store = MemoryStore::new();
        store
            .set_item(StorageEntry::FeedTrending, serde_json::json!({ "rendered": 42 }))
            .await
            .unwrap();

        assert!(hydrate(&store, &fs, StorageEntry::FeedTrending, 10).await.is_none());
        assert!(hydrate(&store, &fs, StorageEntry::FeedLatest, 10).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_schedules_collapse_into_one_write() {
        let store = Arc::new(MemoryStore::new());
        let persistence = FeedPersistence::spawn(store.clone(), Duration::from_millis(500));

        for n in 1..=5 {
            persistence.schedule(StorageEntry::FeedLatest, FeedSnapshot::capture(&feed_with(&ids(n)), 10));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        persistence.schedule(StorageEntry::FeedTrending, FeedSnapshot::capture(&feed_with(&ids(1)), 10));
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(
            store.writes(),
            [StorageEntry::FeedLatest, StorageEntry::FeedTrending]
        );
        let latest: FeedSnapshot = get_map(store.as_ref(), StorageEntry::FeedLatest).await.unwrap();
        assert_eq!(latest.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_pending_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let persistence = FeedPersistence::spawn(store.clone(), Duration::from_secs(60));

        persistence.schedule(StorageEntry::FeedTrending, FeedSnapshot::capture(&feed_with(&ids(2)), 10));
        persistence.shutdown().await;

        let trending: FeedSnapshot = get_map(store.as_ref(), StorageEntry::FeedTrending).await.unwrap();
        assert_eq!(trending.rendered, ids(2));
    }
}
