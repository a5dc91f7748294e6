use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use super::downloader::ExtensionFallback;
use super::fs::FileSystem;
use super::paths::{StaticLibraryPaths, build_local_file_name, page_path};
use super::process::ProcessToken;
use crate::config::Settings;
use crate::error::{Error, Result};

/// Prune stops once the cache is back under this share of the cap.
const PRUNE_TARGET_PERCENT: u64 = 80;

/// An id-addressable item at a fixed position of the batch it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualItem<T> {
    pub id: String,
    pub index: usize,
    pub value: T,
}

impl<T> VirtualItem<T> {
    /// Pairs `ids[i]` with `values[i]`; extra entries on either side are dropped.
    pub fn sequence(ids: impl IntoIterator<Item = String>, values: impl IntoIterator<Item = T>) -> Vec<Self> {
        ids.into_iter()
            .zip(values)
            .enumerate()
            .map(|(index, (id, value))| VirtualItem { id, index, value })
            .collect()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> VirtualItem<U> {
        VirtualItem {
            id: self.id,
            index: self.index,
            value: f(self.value),
        }
    }
}

/// Outcome of caching one remote image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage {
    pub remote: String,
    pub local: Option<PathBuf>,
}

impl LoadedImage {
    /// What the UI should render: the cached file, or the remote URI if
    /// nothing was cached.
    pub fn reference(&self) -> String {
        match &self.local {
            Some(path) => path.to_string_lossy().into_owned(),
            None => self.remote.clone(),
        }
    }
}

/// Where a batch's files land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Flat folder, files named after the URL's last two segments.
    Folder(StaticLibraryPaths),
    /// One page per file under the chapter's folder.
    Chapter {
        repository: String,
        book_id: String,
        chapter_id: String,
    },
}

impl Placement {
    fn target(&self, root: &Path, index: usize, remote_uri: &str) -> PathBuf {
        match self {
            Placement::Folder(folder) => folder.under(root).join(build_local_file_name(remote_uri)),
            Placement::Chapter {
                repository,
                book_id,
                chapter_id,
            } => page_path(root, repository, book_id, chapter_id, index, remote_uri),
        }
    }
}

/// Content-addressed image cache on the device filesystem.
#[derive(Clone)]
pub struct DeviceCache {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    fallback: ExtensionFallback,
    jitter: (u64, u64),
}

impl DeviceCache {
    pub fn new(fs: Arc<dyn FileSystem>, root: impl Into<PathBuf>, settings: &Settings) -> Self {
        Self {
            fs,
            root: root.into(),
            fallback: ExtensionFallback::new(
                settings.candidate_extensions.clone(),
                settings.download_timeout(),
            ),
            jitter: settings.jitter_range(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn local_path(&self, folder: StaticLibraryPaths, remote_uri: &str) -> PathBuf {
        Placement::Folder(folder).target(&self.root, 0, remote_uri)
    }

    pub async fn ensure_folders(&self) -> Result<()> {
        for folder in StaticLibraryPaths::ALL {
            self.fs.mkdir(&folder.under(&self.root)).await?;
        }
        Ok(())
    }

    /// Caches `remote_uri` into `folder`, downloading only on a miss.
    pub async fn ensure_cached(&self, folder: StaticLibraryPaths, remote_uri: &str) -> Option<PathBuf> {
        let target = self.local_path(folder, remote_uri);
        self.ensure_cached_at(remote_uri, &target).await
    }

    /// Caches `remote_uri` at `target` (or one of its extension variants).
    ///
    /// A hit never touches the network. On a miss the request is delayed by
    /// a random jitter, then tried under each candidate extension. `None`
    /// means nothing was written; the failure is logged, not returned.
    pub async fn ensure_cached_at(&self, remote_uri: &str, target: &Path) -> Option<PathBuf> {
        if let Some(existing) = self.find_existing(remote_uri, target).await {
            debug!("Cache hit for {}", remote_uri);
            return Some(existing);
        }

        self.jitter().await;

        let fs = self.fs.clone();
        let result = self
            .fallback
            .download(remote_uri, target, move |uri, path| {
                let fs = fs.clone();
                async move { fs.download_file(&uri, &path).await }
            })
            .await;

        if result.is_none() {
            warn!("Failed to cache {}", remote_uri);
        }
        result
    }

    async fn find_existing(&self, remote_uri: &str, target: &Path) -> Option<PathBuf> {
        if self.fs.exists(target).await {
            return Some(target.to_path_buf());
        }
        for ext in self.fallback.candidates_for(remote_uri) {
            let variant = target.with_extension(&ext);
            if variant != target && self.fs.exists(&variant).await {
                return Some(variant);
            }
        }
        None
    }

    async fn jitter(&self) {
        let (min, max) = self.jitter;
        if max == 0 {
            return;
        }
        let delay = rand::thread_rng().gen_range(min..=max);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    /// Caches every item strictly in order, one at a time.
    ///
    /// Item `i + 1` is not started until `on_item_loaded` for item `i` has
    /// finished. When `token` goes stale the loop stops scheduling and
    /// returns what it has; a download already under way still completes.
    /// The result is aligned with `items`: position `i` is item `i`, `None`
    /// where that item could not be cached.
    pub async fn load_all<F, Fut>(
        &self,
        items: Vec<VirtualItem<String>>,
        placement: &Placement,
        token: Option<&ProcessToken>,
        mut on_item_loaded: F,
    ) -> Vec<Option<PathBuf>>
    where
        F: FnMut(VirtualItem<LoadedImage>) -> Fut,
        Fut: Future<Output = ()>,
    {
        let total = items.len();
        let mut loaded = Vec::with_capacity(total);

        for item in items {
            if let Some(token) = token
                && token.is_cancelled()
            {
                info!(
                    "Batch {} superseded after {}/{} items",
                    token.id(),
                    loaded.len(),
                    total
                );
                break;
            }

            let target = placement.target(&self.root, item.index, &item.value);
            let local = self.ensure_cached_at(&item.value, &target).await;

            loaded.push(local.clone());
            on_item_loaded(item.map(|remote| LoadedImage { remote, local })).await;
        }

        loaded
    }

    /// Files currently present directly inside `folder`.
    pub async fn inventory(&self, folder: StaticLibraryPaths) -> HashSet<PathBuf> {
        match self.fs.read_dir(&folder.under(&self.root)).await {
            Ok(entries) => entries
                .into_iter()
                .filter(|e| !e.is_dir)
                .map(|e| e.path)
                .collect(),
            Err(e) => {
                debug!("No inventory for {}: {}", folder.as_str(), e);
                HashSet::new()
            }
        }
    }

    pub async fn folder_size(&self, folder: StaticLibraryPaths) -> Result<u64> {
        let files = self.walk(&folder.under(&self.root)).await?;
        Ok(files.iter().map(|(_, size, _)| size).sum())
    }

    pub async fn clear_folder(&self, folder: StaticLibraryPaths) -> Result<()> {
        let path = folder.under(&self.root);
        if !self.fs.exists(&path).await {
            return Ok(());
        }
        match self.fs.unlink(&path).await {
            Ok(()) | Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.fs.mkdir(&path).await?;
        info!("Cleared {}", path.display());
        Ok(())
    }

    /// Deletes the oldest files once the cache exceeds `max_bytes`, down to
    /// 80% of the cap. Returns the number of files removed.
    pub async fn prune(&self, max_bytes: u64) -> Result<usize> {
        let mut entries = self.walk(&self.root).await?;
        let total_size: u64 = entries.iter().map(|(_, size, _)| size).sum();

        if total_size <= max_bytes {
            return Ok(0);
        }

        entries.sort_by_key(|(_, _, modified)| *modified);

        let mut current_size = total_size;
        let mut removed = 0;
        for (path, size, _) in entries {
            if current_size <= max_bytes * PRUNE_TARGET_PERCENT / 100 {
                break;
            }
            match self.fs.unlink(&path).await {
                Ok(()) => {
                    current_size -= size;
                    removed += 1;
                }
                Err(e) => warn!("Failed to prune {}: {}", path.display(), e),
            }
        }

        info!(
            "Pruned {} files, cache now {} bytes (cap {})",
            removed, current_size, max_bytes
        );
        Ok(removed)
    }

    /// Every file below `dir` with its size and modification time.
    async fn walk(&self, dir: &Path) -> Result<Vec<(PathBuf, u64, Option<SystemTime>)>> {
        let mut files = Vec::new();
        let mut pending = vec![dir.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let entries = match self.fs.read_dir(&dir).await {
                Ok(entries) => entries,
                Err(Error::NotFound(_)) => continue,
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };

            for entry in entries {
                if entry.is_dir {
                    pending.push(entry.path);
                    continue;
                }
                match self.fs.stat(&entry.path).await {
                    Ok(stat) => files.push((entry.path, stat.size, stat.modified)),
                    Err(e) => debug!("Skipping {}: {}", entry.path.display(), e),
                }
            }
        }

        Ok(files)
    }
}
