use async_trait::async_trait;
use log::debug;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::Result;

#[cfg(test)]
pub mod mock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// The filesystem operations the cache needs, plus the one network
/// primitive it relies on: streaming a URL straight into a file.
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;

    /// Fetches `from_url` into `to_file` and reports the HTTP status.
    ///
    /// Only a 200 response creates the file.
    async fn download_file(&self, from_url: &str, to_file: &Path) -> Result<u16>;

    async fn unlink(&self, path: &Path) -> Result<()>;

    async fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>>;

    async fn stat(&self, path: &Path) -> Result<FileStat>;

    async fn mkdir(&self, path: &Path) -> Result<()>;
}

pub(crate) fn build_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(concat!("rapunzel/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Device filesystem backed by `tokio::fs`, downloading with `reqwest`.
#[derive(Clone)]
pub struct LocalFileSystem {
    client: reqwest::Client,
}

impl LocalFileSystem {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: build_client()?,
        })
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn download_file(&self, from_url: &str, to_file: &Path) -> Result<u16> {
        let response = self.client.get(from_url).send().await?;
        let status = response.status().as_u16();
        if status != 200 {
            debug!("{} answered {}", from_url, status);
            return Ok(status);
        }

        let bytes = response.bytes().await?;
        if let Some(parent) = to_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // A partially written file must never look like a cache hit.
        let partial = to_file.with_extension("part");
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, to_file).await?;
        Ok(status)
    }

    async fn unlink(&self, path: &Path) -> Result<()> {
        let meta = tokio::fs::metadata(path).await?;
        if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await?;
        } else {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(path).await?;
        while let Some(entry) = dir.next_entry().await? {
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                is_dir: entry.file_type().await?.is_dir(),
            });
        }
        Ok(entries)
    }

    async fn stat(&self, path: &Path) -> Result<FileStat> {
        let meta = tokio::fs::metadata(path).await?;
        Ok(FileStat {
            size: meta.len(),
            modified: meta.modified().ok(),
        })
    }

    async fn mkdir(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }
}
