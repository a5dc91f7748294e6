use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Listing-level metadata for a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookBase {
    pub id: String,
    pub title: String,
    pub cover: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterBase {
    pub id: String,
    pub chapter: String,
    pub title: String,
    pub volume: Option<String>,
    pub pages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub base: BookBase,
    pub artist: String,
    pub description: String,
    pub chapters: Vec<ChapterBase>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub pages: Vec<Page>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestPage {
    pub page: u32,
    pub results: Vec<BookBase>,
}

/// A remote repository of books.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Repository name, used to namespace library ids and saved chapters.
    fn repository(&self) -> &str;

    async fn search(&self, query: &str, page: u32) -> Result<Vec<BookBase>>;

    async fn get_book(&self, id: &str) -> Result<Book>;

    async fn get_chapter(&self, id: &str) -> Result<Chapter>;

    async fn get_latest_books(&self, page: u32) -> Result<LatestPage>;

    async fn get_trending_books(&self) -> Result<Vec<BookBase>>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::error::Error;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Provider serving `per_page` canned books per call, covers under
    /// `https://covers.test/<id>/cover.jpg`.
    pub struct MockProvider {
        pub per_page: usize,
        pub chapters: HashMap<String, Chapter>,
        pub failing: bool,
        pub calls: Mutex<Vec<String>>,
    }

    impl MockProvider {
        pub fn new(per_page: usize) -> Self {
            Self {
                per_page,
                chapters: HashMap::new(),
                failing: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn book(id: &str) -> BookBase {
            BookBase {
                id: id.to_string(),
                title: format!("Title {}", id),
                cover: format!("https://covers.test/{}/cover.jpg", id),
                author: String::new(),
                status: "ongoing".into(),
            }
        }

        fn page_of(&self, prefix: &str, page: u32) -> Result<Vec<BookBase>> {
            self.calls.lock().unwrap().push(format!("{}:{}", prefix, page));
            if self.failing {
                return Err(Error::Provider("offline".into()));
            }
            Ok((0..self.per_page)
                .map(|i| Self::book(&format!("{}{}-{}", prefix, page, i)))
                .collect())
        }
    }

    #[async_trait]
    impl ContentProvider for MockProvider {
        fn repository(&self) -> &str {
            "mock"
        }

        async fn search(&self, query: &str, page: u32) -> Result<Vec<BookBase>> {
            self.page_of(query, page)
        }

        async fn get_book(&self, id: &str) -> Result<Book> {
            Ok(Book {
                base: Self::book(id),
                artist: String::new(),
                description: String::new(),
                chapters: Vec::new(),
            })
        }

        async fn get_chapter(&self, id: &str) -> Result<Chapter> {
            self.chapters
                .get(id)
                .cloned()
                .ok_or_else(|| Error::NotFound(id.to_string()))
        }

        async fn get_latest_books(&self, page: u32) -> Result<LatestPage> {
            Ok(LatestPage {
                page,
                results: self.page_of("latest", page)?,
            })
        }

        async fn get_trending_books(&self) -> Result<Vec<BookBase>> {
            self.page_of("trending", 1)
        }
    }
}
