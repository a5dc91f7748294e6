//! Naming rules for files in the image cache.
//!
//! Everything here is pure: the same input always maps to the same name, so
//! names double as deduplication keys.

use std::path::{Path, PathBuf};

/// Extension swapped in when a cached image fails to render.
pub const FALLBACK_CACHE_EXTENSION: &str = "png";

/// Extension assumed for page files whose URI has none.
const DEFAULT_EXTENSION: &str = "jpg";

/// Named subfolders of the cache root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaticLibraryPaths {
    MainFeed,
    Trending,
    SearchResults,
    ReadBooks,
}

impl StaticLibraryPaths {
    pub const ALL: [StaticLibraryPaths; 4] = [
        StaticLibraryPaths::MainFeed,
        StaticLibraryPaths::Trending,
        StaticLibraryPaths::SearchResults,
        StaticLibraryPaths::ReadBooks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StaticLibraryPaths::MainFeed => "MainFeed",
            StaticLibraryPaths::Trending => "Trending",
            StaticLibraryPaths::SearchResults => "SearchResults",
            StaticLibraryPaths::ReadBooks => "ReadBooks",
        }
    }

    pub fn under(&self, root: &Path) -> PathBuf {
        root.join(self.as_str())
    }
}

/// Joins the last two path segments of a URL with a dot.
///
/// `https://host/123/1.jpg` becomes `123.1.jpg`. Query strings and fragments
/// are ignored; input without a slash is returned as-is.
pub fn build_local_file_name(remote_uri: &str) -> String {
    let without_query = remote_uri
        .split(['?', '#'])
        .next()
        .unwrap_or(remote_uri)
        .trim_end_matches('/');

    let mut segments = without_query.rsplit('/');
    let file = segments.next().unwrap_or(without_query);
    match segments.next() {
        Some(parent) if !parent.is_empty() && !parent.ends_with(':') => {
            format!("{}.{}", parent, file)
        }
        _ => file.to_string(),
    }
}

/// Byte offset of the extension dot, looking only at the last path segment.
fn extension_dot(path: &str) -> Option<usize> {
    let segment_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    path[segment_start..].rfind('.').map(|i| segment_start + i)
}

/// Removes everything from the last dot onward.
pub fn strip_extension(path: &str) -> &str {
    match extension_dot(path) {
        Some(dot) => &path[..dot],
        None => path,
    }
}

pub fn change_extension(path: &str, new_ext: &str) -> String {
    format!("{}.{}", strip_extension(path), new_ext.trim_start_matches('.'))
}

/// Substring after the last dot, or an empty string when there is none.
pub fn extension_of(path: &str) -> &str {
    match extension_dot(path) {
        Some(dot) => &path[dot + 1..],
        None => "",
    }
}

/// Location of one page of a saved chapter:
/// `ReadBooks/<repository>/<book>/<chapter>/<index>.<ext>`.
pub fn page_path(
    root: &Path,
    repository: &str,
    book_id: &str,
    chapter_id: &str,
    index: usize,
    remote_uri: &str,
) -> PathBuf {
    let ext = match extension_of(remote_uri.split(['?', '#']).next().unwrap_or("")) {
        "" => DEFAULT_EXTENSION,
        ext => ext,
    };

    chapter_folder(root, repository, book_id, chapter_id).join(format!("{:04}.{}", index, ext))
}

pub fn chapter_folder(root: &Path, repository: &str, book_id: &str, chapter_id: &str) -> PathBuf {
    StaticLibraryPaths::ReadBooks
        .under(root)
        .join(repository)
        .join(book_id)
        .join(chapter_id)
}

/// Path to retry once when `path` fails to render, or `None` if it already
/// carries the fallback extension.
pub fn fallback_image_path(path: &Path) -> Option<PathBuf> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case(FALLBACK_CACHE_EXTENSION) => None,
        _ => Some(path.with_extension(FALLBACK_CACHE_EXTENSION)),
    }
}
