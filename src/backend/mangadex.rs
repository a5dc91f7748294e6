use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use super::fs::build_client;
use super::provider::{Book, BookBase, Chapter, ChapterBase, ContentProvider, LatestPage, Page};
use crate::error::{Error, Result};

const BASE_URL: &str = "https://api.mangadex.org";
const COVER_URL: &str = "https://uploads.mangadex.org/covers";
const PAGE_SIZE: u32 = 20;
const INCLUDES: &str = "includes[]=author&includes[]=artist&includes[]=cover_art";

#[derive(Debug, Deserialize)]
struct ChapterResponse {
    data: Vec<ChapterData>,
}

#[derive(Debug, Deserialize)]
struct ChapterData {
    id: String,
    attributes: ChapterAttributes,
}

#[derive(Debug, Deserialize)]
struct ChapterAttributes {
    chapter: Option<String>,
    title: Option<String>,
    volume: Option<String>,
    pages: usize,
}

#[derive(Debug, Deserialize)]
struct AtHomeResponse {
    #[serde(rename = "baseUrl")]
    base_url: String,
    chapter: AtHomeChapter,
}

#[derive(Debug, Deserialize)]
struct AtHomeChapter {
    hash: String,
    #[serde(rename = "dataSaver")]
    data_saver: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MangaListResponse {
    data: Vec<MangaData>,
}

#[derive(Debug, Deserialize)]
struct MangaResponse {
    data: MangaData,
}

#[derive(Debug, Deserialize)]
struct MangaData {
    id: String,
    attributes: MangaAttributes,
    relationships: Vec<Relationship>,
}

#[derive(Debug, Deserialize)]
struct MangaAttributes {
    title: HashMap<String, String>,
    status: Option<String>,
    description: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    #[serde(rename = "type")]
    rel_type: String,
    attributes: Option<RelationshipAttributes>,
}

#[derive(Debug, Deserialize)]
struct RelationshipAttributes {
    name: Option<String>,
    #[serde(rename = "fileName")]
    file_name: Option<String>,
}

/// A parsed manga before it is split into listing and detail parts.
struct ParsedManga {
    base: BookBase,
    artist: String,
    description: String,
}

fn english_or_first(map: &HashMap<String, String>) -> Option<&String> {
    map.get("en").or_else(|| map.values().next())
}

fn parse_manga(m: MangaData) -> ParsedManga {
    let mut author = String::new();
    let mut artist = String::new();
    let mut cover_filename = String::new();

    for rel in &m.relationships {
        let Some(attrs) = &rel.attributes else {
            continue;
        };
        match rel.rel_type.as_str() {
            "author" => author = attrs.name.clone().unwrap_or_default(),
            "artist" => artist = attrs.name.clone().unwrap_or_default(),
            "cover_art" => cover_filename = attrs.file_name.clone().unwrap_or_default(),
            _ => {}
        }
    }

    // Thumbnail size (256px) keeps feed covers small
    let cover = if !cover_filename.is_empty() {
        format!("{}/{}/{}.256.jpg", COVER_URL, m.id, cover_filename)
    } else {
        String::new()
    };

    let title = english_or_first(&m.attributes.title)
        .cloned()
        .unwrap_or_else(|| "Unknown".to_string());

    let description = m
        .attributes
        .description
        .as_ref()
        .and_then(english_or_first)
        .cloned()
        .unwrap_or_default();

    ParsedManga {
        base: BookBase {
            id: m.id,
            title,
            cover,
            author,
            status: m.attributes.status.unwrap_or_else(|| "Unknown".to_string()),
        },
        artist,
        description,
    }
}

fn parse_manga_list(response: MangaListResponse) -> Vec<BookBase> {
    response
        .data
        .into_iter()
        .map(|m| parse_manga(m).base)
        .filter(|b| !b.cover.is_empty())
        .collect()
}

fn parse_chapters(response: ChapterResponse) -> Vec<ChapterBase> {
    response
        .data
        .into_iter()
        .filter(|c| c.attributes.pages > 0)
        .map(|c| ChapterBase {
            id: c.id,
            chapter: c.attributes.chapter.unwrap_or_else(|| "0".to_string()),
            title: c.attributes.title.unwrap_or_else(|| "No Title".to_string()),
            volume: c.attributes.volume,
            pages: c.attributes.pages,
        })
        .collect()
}

fn parse_pages(chapter_id: &str, response: AtHomeResponse) -> Chapter {
    let pages = response
        .chapter
        .data_saver
        .iter()
        .map(|filename| Page {
            uri: format!(
                "{}/data-saver/{}/{}",
                response.base_url, response.chapter.hash, filename
            ),
        })
        .collect();

    Chapter {
        id: chapter_id.to_string(),
        pages,
    }
}

fn offset(page: u32) -> u32 {
    page.saturating_sub(1) * PAGE_SIZE
}

/// [`ContentProvider`] over the public MangaDex API.
pub struct MangaDex {
    client: reqwest::Client,
}

impl MangaDex {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: build_client()?,
        })
    }

    async fn manga_list(&self, order: &str, page: u32) -> Result<Vec<BookBase>> {
        let url = format!(
            "{}/manga?{}&order[{}]=desc&limit={}&offset={}",
            BASE_URL,
            INCLUDES,
            order,
            PAGE_SIZE,
            offset(page)
        );
        let response: MangaListResponse = self.client.get(&url).send().await?.json().await?;
        Ok(parse_manga_list(response))
    }
}

#[async_trait]
impl ContentProvider for MangaDex {
    fn repository(&self) -> &str {
        "mangadex"
    }

    async fn search(&self, query: &str, page: u32) -> Result<Vec<BookBase>> {
        let url = format!(
            "{}/manga?title={}&{}&limit={}&offset={}",
            BASE_URL,
            urlencoding::encode(query),
            INCLUDES,
            PAGE_SIZE,
            offset(page)
        );
        let response: MangaListResponse = self.client.get(&url).send().await?.json().await?;
        Ok(parse_manga_list(response))
    }

    async fn get_book(&self, id: &str) -> Result<Book> {
        let url = format!("{}/manga/{}?{}", BASE_URL, id, INCLUDES);
        let response: MangaResponse = self.client.get(&url).send().await?.json().await?;
        let parsed = parse_manga(response.data);

        let url = format!(
            "{}/manga/{}/feed?translatedLanguage[]=en&order[chapter]=desc&limit=100",
            BASE_URL, id
        );
        let response: ChapterResponse = self.client.get(&url).send().await?.json().await?;

        Ok(Book {
            base: parsed.base,
            artist: parsed.artist,
            description: parsed.description,
            chapters: parse_chapters(response),
        })
    }

    async fn get_chapter(&self, id: &str) -> Result<Chapter> {
        let url = format!("{}/at-home/server/{}", BASE_URL, id);
        let response: AtHomeResponse = self.client.get(&url).send().await?.json().await?;
        let chapter = parse_pages(id, response);
        if chapter.pages.is_empty() {
            return Err(Error::NotFound(format!("pages of chapter {}", id)));
        }
        Ok(chapter)
    }

    async fn get_latest_books(&self, page: u32) -> Result<LatestPage> {
        let results = self.manga_list("latestUploadedChapter", page).await?;
        Ok(LatestPage { page, results })
    }

    async fn get_trending_books(&self) -> Result<Vec<BookBase>> {
        self.manga_list("followedCount", 1).await
    }
}
