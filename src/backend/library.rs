use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::provider::BookBase;
use super::storage::{KeyValueStore, StorageEntry, get_map, set_map};

/// Identifies a saved book across repositories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LibraryId {
    pub repository: String,
    pub book_id: String,
}

impl LibraryId {
    pub fn new(repository: impl Into<String>, book_id: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            book_id: book_id.into(),
        }
    }
}

impl fmt::Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.repository, self.book_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryBook {
    pub id: LibraryId,
    pub book: BookBase,
    /// Epoch seconds.
    pub saved_at: i64,
}

/// Books the user saved, persisted on every change.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Library {
    books: Vec<LibraryBook>,
}

impl Library {
    pub async fn load(store: &dyn KeyValueStore) -> Self {
        get_map(store, StorageEntry::Library).await.unwrap_or_default()
    }

    pub async fn save(&self, store: &dyn KeyValueStore) {
        if let Err(e) = set_map(store, StorageEntry::Library, self).await {
            warn!("Failed to save library: {}", e);
        }
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    pub fn is_saved(&self, id: &LibraryId) -> bool {
        self.books.iter().any(|b| &b.id == id)
    }

    /// Saves `book` under `repository`, refreshing its metadata if present.
    /// The original `saved_at` is kept.
    pub fn add(&mut self, repository: &str, book: BookBase, saved_at: i64) -> LibraryId {
        let id = LibraryId::new(repository, book.id.clone());
        match self.books.iter_mut().find(|b| b.id == id) {
            Some(existing) => existing.book = book,
            None => self.books.push(LibraryBook {
                id: id.clone(),
                book,
                saved_at,
            }),
        }
        id
    }

    pub fn remove(&mut self, id: &LibraryId) -> bool {
        let before = self.books.len();
        self.books.retain(|b| &b.id != id);
        self.books.len() != before
    }

    /// Returns whether the book is saved afterwards.
    pub fn toggle(&mut self, repository: &str, book: BookBase, saved_at: i64) -> bool {
        let id = LibraryId::new(repository, book.id.clone());
        if self.remove(&id) {
            false
        } else {
            self.add(repository, book, saved_at);
            true
        }
    }

    /// Saved books of `repository`, most recently saved first.
    pub fn rendered(&self, repository: &str) -> Vec<&LibraryBook> {
        let mut books: Vec<&LibraryBook> = self
            .books
            .iter()
            .filter(|b| b.id.repository == repository)
            .collect();
        books.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        books
    }
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
