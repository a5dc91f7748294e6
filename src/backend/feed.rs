use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::cache::{LoadedImage, VirtualItem};
use super::paths::StaticLibraryPaths;
use super::provider::BookBase;
use super::storage::StorageEntry;

/// The book lists the app keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    /// Search results.
    Browse,
    Latest,
    Trending,
}

impl FeedKind {
    pub const ALL: [FeedKind; 3] = [FeedKind::Browse, FeedKind::Latest, FeedKind::Trending];

    pub fn folder(&self) -> StaticLibraryPaths {
        match self {
            FeedKind::Browse => StaticLibraryPaths::SearchResults,
            FeedKind::Latest => StaticLibraryPaths::MainFeed,
            FeedKind::Trending => StaticLibraryPaths::Trending,
        }
    }

    /// Where the feed survives restarts; search results don't.
    pub fn storage_entry(&self) -> Option<StorageEntry> {
        match self {
            FeedKind::Browse => None,
            FeedKind::Latest => Some(StorageEntry::FeedLatest),
            FeedKind::Trending => Some(StorageEntry::FeedTrending),
        }
    }

    pub fn loading(&self) -> LoadingKind {
        match self {
            FeedKind::Browse => LoadingKind::Browse,
            FeedKind::Latest => LoadingKind::Latest,
            FeedKind::Trending => LoadingKind::Trending,
        }
    }
}

/// Image reference for one book: a cached path or, failing that, the
/// remote URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedImage {
    pub id: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Reset the feed and start over at page 1.
    Clean,
    /// Add `page` after what is already shown.
    Append { page: u32 },
}

/// Renderable state of one feed.
///
/// `rendered` is the display order. Both records keep insertion order,
/// and `cached_images_record` only ever holds ids that are also in
/// `book_list_record`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedState {
    pub rendered: Vec<String>,
    pub book_list_record: IndexMap<String, BookBase>,
    pub cached_images_record: IndexMap<String, CachedImage>,
    pub page: u32,
}

impl Default for FeedState {
    fn default() -> Self {
        Self {
            rendered: Vec::new(),
            book_list_record: IndexMap::new(),
            cached_images_record: IndexMap::new(),
            page: 1,
        }
    }
}

impl FeedState {
    pub fn reset(&mut self) {
        *self = FeedState::default();
    }

    pub fn is_empty(&self) -> bool {
        self.rendered.is_empty()
    }

    /// Merges a fetched page and returns the cover batch for the books it
    /// added, each item bound to its book id.
    pub fn merge_page(&mut self, books: Vec<BookBase>, mode: LoadMode) -> Vec<VirtualItem<String>> {
        match mode {
            LoadMode::Clean => {
                self.reset();
                self.page = 1;
            }
            LoadMode::Append { page } => self.page = page,
        }

        let mut added_ids = Vec::new();
        let mut covers = Vec::new();
        for book in books {
            let is_new = !self.book_list_record.contains_key(&book.id);
            if !self.rendered.contains(&book.id) {
                self.rendered.push(book.id.clone());
            }
            if is_new {
                added_ids.push(book.id.clone());
                covers.push(book.cover.clone());
            }
            self.book_list_record.insert(book.id.clone(), book);
        }

        debug!(
            "Merged {} new books, {} rendered on page {}",
            added_ids.len(),
            self.rendered.len(),
            self.page
        );
        VirtualItem::sequence(added_ids, covers)
    }

    /// Records where a book's cover ended up, keyed by the id the item was
    /// created with. Ids no longer in the feed are ignored.
    pub fn apply_image(&mut self, item: &VirtualItem<LoadedImage>) -> bool {
        if !self.book_list_record.contains_key(&item.id) {
            return false;
        }
        self.cached_images_record.insert(
            item.id.clone(),
            CachedImage {
                id: item.id.clone(),
                value: item.value.reference(),
            },
        );
        true
    }

    /// Books in display order.
    pub fn books(&self) -> impl Iterator<Item = &BookBase> {
        self.rendered
            .iter()
            .filter_map(|id| self.book_list_record.get(id))
    }

    pub fn image_of(&self, id: &str) -> Option<&str> {
        self.cached_images_record.get(id).map(|c| c.value.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingKind {
    Browse,
    Latest,
    Trending,
    Reader,
}

/// Busy indicators, one per loader.
#[derive(Debug, Default)]
pub struct LoadingFlags {
    browse: LoadingFlag,
    latest: LoadingFlag,
    trending: LoadingFlag,
    reader: LoadingFlag,
}

/// A flag plus the ticket of the guard that currently owns it.
#[derive(Debug, Default)]
struct LoadingFlag {
    busy: AtomicBool,
    owner: AtomicU64,
}

impl LoadingFlags {
    fn flag(&self, kind: LoadingKind) -> &LoadingFlag {
        match kind {
            LoadingKind::Browse => &self.browse,
            LoadingKind::Latest => &self.latest,
            LoadingKind::Trending => &self.trending,
            LoadingKind::Reader => &self.reader,
        }
    }

    pub fn is_loading(&self, kind: LoadingKind) -> bool {
        self.flag(kind).busy.load(Ordering::SeqCst)
    }

    /// Raises `kind` until the returned guard drops.
    ///
    /// Each call takes ownership of the flag, and a guard only lowers it
    /// while still the owner. Ownership is not tied to feed fences, so a
    /// batch cancelled without a successor still lowers its flag.
    pub fn start(self: &Arc<Self>, kind: LoadingKind) -> LoadingGuard {
        let flag = self.flag(kind);
        let ticket = flag.owner.fetch_add(1, Ordering::SeqCst) + 1;
        flag.busy.store(true, Ordering::SeqCst);
        LoadingGuard {
            flags: self.clone(),
            kind,
            ticket,
        }
    }
}

pub struct LoadingGuard {
    flags: Arc<LoadingFlags>,
    kind: LoadingKind,
    ticket: u64,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        let flag = self.flags.flag(self.kind);
        if flag.owner.load(Ordering::SeqCst) == self.ticket {
            flag.busy.store(false, Ordering::SeqCst);
        }
    }
}
