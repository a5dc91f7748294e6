use log::{info, warn};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

use super::cache::{DeviceCache, LoadedImage, Placement, VirtualItem};
use super::feed::{FeedKind, FeedState, LoadMode, LoadingFlags, LoadingKind};
use super::library::{self, Library, LibraryBook, LibraryId};
use super::persistence::{FeedPersistence, FeedSnapshot, hydrate};
use super::process::ProcessFence;
use super::provider::{BookBase, ContentProvider};
use super::storage::{KeyValueStore, StorageEntry, get_map, set_map};
use crate::config::Settings;
use crate::error::Result;

/// What a feed or chapter load achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadReport {
    /// Books (or pages) the provider returned.
    pub fetched: usize,
    /// Images that ended up on disk.
    pub cached: usize,
    /// A newer load took over before this one finished.
    pub superseded: bool,
}

impl LoadReport {
    pub fn is_empty(&self) -> bool {
        self.fetched == 0
    }
}

/// The chapter open in the reader. `pages[i]` is the image reference of
/// page `i` once it has been processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderState {
    pub book_id: String,
    pub chapter_id: String,
    pub pages: Vec<Option<String>>,
}

#[derive(Default)]
struct FeedSlot {
    state: RwLock<FeedState>,
    fence: ProcessFence,
}

struct StoreInner {
    cache: DeviceCache,
    provider: Arc<dyn ContentProvider>,
    kv: Arc<dyn KeyValueStore>,
    settings: Settings,
    browse: FeedSlot,
    latest: FeedSlot,
    trending: FeedSlot,
    reader: RwLock<ReaderState>,
    reader_fence: ProcessFence,
    library: RwLock<Library>,
    search_text: RwLock<String>,
    loading: Arc<LoadingFlags>,
    persistence: Mutex<Option<FeedPersistence>>,
}

/// App state shared by every screen. Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Must be called inside a tokio runtime: feed writers are spawned here.
    pub fn new(
        cache: DeviceCache,
        provider: Arc<dyn ContentProvider>,
        kv: Arc<dyn KeyValueStore>,
        settings: Settings,
    ) -> Self {
        let persistence = FeedPersistence::spawn(kv.clone(), settings.persist_debounce());

        Self {
            inner: Arc::new(StoreInner {
                cache,
                provider,
                kv,
                settings,
                browse: FeedSlot::default(),
                latest: FeedSlot::default(),
                trending: FeedSlot::default(),
                reader: RwLock::new(ReaderState::default()),
                reader_fence: ProcessFence::new(),
                library: RwLock::new(Library::default()),
                search_text: RwLock::new(String::new()),
                loading: Arc::new(LoadingFlags::default()),
                persistence: Mutex::new(Some(persistence)),
            }),
        }
    }

    fn slot(&self, kind: FeedKind) -> &FeedSlot {
        match kind {
            FeedKind::Browse => &self.inner.browse,
            FeedKind::Latest => &self.inner.latest,
            FeedKind::Trending => &self.inner.trending,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn cache(&self) -> &DeviceCache {
        &self.inner.cache
    }

    pub fn provider(&self) -> &Arc<dyn ContentProvider> {
        &self.inner.provider
    }

    pub fn repository(&self) -> &str {
        self.inner.provider.repository()
    }

    pub async fn feed(&self, kind: FeedKind) -> FeedState {
        self.slot(kind).state.read().await.clone()
    }

    pub async fn reader(&self) -> ReaderState {
        self.inner.reader.read().await.clone()
    }

    pub async fn search_text(&self) -> String {
        self.inner.search_text.read().await.clone()
    }

    pub fn is_loading(&self, kind: LoadingKind) -> bool {
        self.inner.loading.is_loading(kind)
    }

    /// Restores persisted feeds, the library and the last search query.
    /// Run once at startup, before any load.
    pub async fn hydrate(&self) {
        let max = self.inner.settings.max_feed_items;
        let fs = self.inner.cache.fs().clone();

        for kind in [FeedKind::Latest, FeedKind::Trending] {
            let Some(entry) = kind.storage_entry() else {
                continue;
            };
            if let Some(feed) = hydrate(self.inner.kv.as_ref(), fs.as_ref(), entry, max).await {
                let mut state = self.slot(kind).state.write().await;
                *state = feed;
                self.persist(kind, &state);
            }
        }

        *self.inner.library.write().await = Library::load(self.inner.kv.as_ref()).await;

        if let Some(text) = get_map::<String>(self.inner.kv.as_ref(), StorageEntry::SearchText).await {
            *self.inner.search_text.write().await = text;
        }
    }

    pub async fn load_latest(&self, mode: LoadMode) -> LoadReport {
        let provider = self.inner.provider.clone();
        let page = page_of(mode);
        self.load_feed(FeedKind::Latest, mode, async move {
            provider.get_latest_books(page).await.map(|p| p.results)
        })
        .await
    }

    /// Trending has no pages; every load is clean.
    pub async fn load_trending(&self) -> LoadReport {
        let provider = self.inner.provider.clone();
        self.load_feed(FeedKind::Trending, LoadMode::Clean, async move {
            provider.get_trending_books().await
        })
        .await
    }

    pub async fn search(&self, query: &str, mode: LoadMode) -> LoadReport {
        let query = query.trim().to_string();
        *self.inner.search_text.write().await = query.clone();
        if let Err(e) = set_map(self.inner.kv.as_ref(), StorageEntry::SearchText, &query).await {
            warn!("Failed to save search text: {}", e);
        }

        let provider = self.inner.provider.clone();
        let page = page_of(mode);
        self.load_feed(FeedKind::Browse, mode, async move {
            provider.search(&query, page).await
        })
        .await
    }

    async fn load_feed<Fut>(&self, kind: FeedKind, mode: LoadMode, fetch: Fut) -> LoadReport
    where
        Fut: Future<Output = Result<Vec<BookBase>>>,
    {
        let slot = self.slot(kind);
        let token = slot.fence.begin();
        let _loading = self.inner.loading.start(kind.loading());
        let mut report = LoadReport::default();

        let books = match fetch.await {
            Ok(books) => books,
            Err(e) => {
                warn!("Loading {:?} failed: {}", kind, e);
                return report;
            }
        };
        report.fetched = books.len();

        let batch = {
            let mut state = slot.state.write().await;
            if token.is_cancelled() {
                report.superseded = true;
                return report;
            }
            let batch = state.merge_page(books, mode);
            self.persist(kind, &state);
            batch
        };

        info!(
            "Loading {} covers for {:?} (batch {})",
            batch.len(),
            kind,
            token.id()
        );

        let store = self.clone();
        let loaded = self
            .inner
            .cache
            .load_all(batch, &Placement::Folder(kind.folder()), Some(&token), move |item| {
                let store = store.clone();
                async move { store.apply_cover(kind, item).await }
            })
            .await;

        report.cached = loaded.iter().flatten().count();
        report.superseded = token.is_cancelled();
        report
    }

    /// Records a finished cover even if a newer batch has started since.
    /// Ids dropped by a clean reload in the meantime are ignored.
    async fn apply_cover(&self, kind: FeedKind, item: VirtualItem<LoadedImage>) {
        let mut state = self.slot(kind).state.write().await;
        if state.apply_image(&item) {
            self.persist(kind, &state);
        }
    }

    fn persist(&self, kind: FeedKind, state: &FeedState) {
        let Some(entry) = kind.storage_entry() else {
            return;
        };
        let snapshot = FeedSnapshot::capture(state, self.inner.settings.max_feed_items);
        match self.inner.persistence.lock() {
            Ok(guard) => {
                if let Some(persistence) = guard.as_ref() {
                    persistence.schedule(entry, snapshot);
                }
            }
            Err(e) => warn!("Persistence unavailable: {}", e),
        }
    }

    /// Opens a chapter in the reader and caches its pages in order.
    pub async fn load_chapter(&self, book_id: &str, chapter_id: &str) -> LoadReport {
        let token = self.inner.reader_fence.begin();
        let _loading = self.inner.loading.start(LoadingKind::Reader);
        let mut report = LoadReport::default();

        let chapter = match self.inner.provider.get_chapter(chapter_id).await {
            Ok(chapter) => chapter,
            Err(e) => {
                warn!("Loading chapter {} failed: {}", chapter_id, e);
                return report;
            }
        };
        report.fetched = chapter.pages.len();

        {
            let mut reader = self.inner.reader.write().await;
            if token.is_cancelled() {
                report.superseded = true;
                return report;
            }
            *reader = ReaderState {
                book_id: book_id.to_string(),
                chapter_id: chapter_id.to_string(),
                pages: vec![None; chapter.pages.len()],
            };
        }

        let items = VirtualItem::sequence(
            (0..chapter.pages.len()).map(|i| format!("{}:{}", chapter_id, i)),
            chapter.pages.into_iter().map(|p| p.uri),
        );
        let placement = Placement::Chapter {
            repository: self.repository().to_string(),
            book_id: book_id.to_string(),
            chapter_id: chapter_id.to_string(),
        };

        let store = self.clone();
        let callback_token = token.clone();
        let loaded = self
            .inner
            .cache
            .load_all(items, &placement, Some(&token), move |item| {
                let store = store.clone();
                let token = callback_token.clone();
                async move {
                    let mut reader = store.inner.reader.write().await;
                    if token.is_current()
                        && let Some(slot) = reader.pages.get_mut(item.index)
                    {
                        *slot = Some(item.value.reference());
                    }
                }
            })
            .await;

        report.cached = loaded.iter().flatten().count();
        report.superseded = token.is_cancelled();
        report
    }

    /// Deletes a feed's cached covers and empties the feed.
    pub async fn clear_feed(&self, kind: FeedKind) -> Result<()> {
        let slot = self.slot(kind);
        slot.fence.cancel();
        self.inner.cache.clear_folder(kind.folder()).await?;

        let mut state = slot.state.write().await;
        state.reset();
        self.persist(kind, &state);
        Ok(())
    }

    pub async fn library(&self) -> Vec<LibraryBook> {
        let library = self.inner.library.read().await;
        library
            .rendered(self.repository())
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn is_saved(&self, book_id: &str) -> bool {
        let id = LibraryId::new(self.repository(), book_id);
        self.inner.library.read().await.is_saved(&id)
    }

    /// Returns whether the book is saved afterwards.
    pub async fn toggle_saved(&self, book: BookBase) -> bool {
        let mut saved_books = self.inner.library.write().await;
        let saved = saved_books.toggle(self.repository(), book, library::now());
        saved_books.save(self.inner.kv.as_ref()).await;
        saved
    }

    pub async fn remove_saved(&self, book_id: &str) -> bool {
        let id = LibraryId::new(self.repository(), book_id);
        let mut library = self.inner.library.write().await;
        let removed = library.remove(&id);
        if removed {
            library.save(self.inner.kv.as_ref()).await;
        }
        removed
    }

    /// Flushes pending feed snapshots. Later mutations are no longer persisted.
    pub async fn shutdown(&self) {
        let persistence = match self.inner.persistence.lock() {
            Ok(mut guard) => guard.take(),
            Err(e) => {
                warn!("Persistence unavailable: {}", e);
                None
            }
        };
        if let Some(persistence) = persistence {
            persistence.shutdown().await;
        }
    }
}

fn page_of(mode: LoadMode) -> u32 {
    match mode {
        LoadMode::Clean => 1,
        LoadMode::Append { page } => page,
    }
}
