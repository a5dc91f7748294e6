//! Scriptable in-memory filesystem for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;

use super::{DirEntry, FileStat, FileSystem};
use crate::error::{Error, Result};

/// Holds a download open until the test releases it.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

#[derive(Default)]
struct MockState {
    files: HashMap<PathBuf, FileStat>,
    statuses: HashMap<String, u16>,
    failing: Vec<String>,
    gates: HashMap<String, Arc<Gate>>,
    attempts: Vec<String>,
    clock: u64,
}

pub struct MockFileSystem {
    state: Mutex<MockState>,
    default_status: u16,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::with_default_status(200)
    }

    pub fn with_default_status(status: u16) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            default_status: status,
        }
    }

    pub fn add_file(&self, path: impl Into<PathBuf>, size: u64) {
        let mut state = self.state.lock().unwrap();
        state.clock += 1;
        let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(state.clock);
        state.files.insert(
            path.into(),
            FileStat {
                size,
                modified: Some(modified),
            },
        );
    }

    pub fn remove_file(&self, path: &Path) {
        self.state.lock().unwrap().files.remove(path);
    }

    pub fn respond(&self, url: &str, status: u16) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(url.to_string(), status);
    }

    pub fn fail(&self, url: &str) {
        self.state.lock().unwrap().failing.push(url.to_string());
    }

    pub fn gate(&self, url: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.state
            .lock()
            .unwrap()
            .gates
            .insert(url.to_string(), gate.clone());
        gate
    }

    pub fn attempts(&self) -> Vec<String> {
        self.state.lock().unwrap().attempts.clone()
    }

    pub fn has_file(&self, path: &Path) -> bool {
        self.state.lock().unwrap().files.contains_key(path)
    }

    pub fn file_count(&self) -> usize {
        self.state.lock().unwrap().files.len()
    }
}

#[async_trait]
impl FileSystem for MockFileSystem {
    async fn exists(&self, path: &Path) -> bool {
        let state = self.state.lock().unwrap();
        state.files.contains_key(path) || state.files.keys().any(|p| p.starts_with(path))
    }

    async fn download_file(&self, from_url: &str, to_file: &Path) -> Result<u16> {
        let gate = {
            let mut state = self.state.lock().unwrap();
            state.attempts.push(from_url.to_string());
            state.gates.get(from_url).cloned()
        };

        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let status = {
            let state = self.state.lock().unwrap();
            if state.failing.iter().any(|u| u == from_url) {
                None
            } else {
                Some(
                    state
                        .statuses
                        .get(from_url)
                        .copied()
                        .unwrap_or(self.default_status),
                )
            }
        };

        let Some(status) = status else {
            return Err(Error::Io(std::io::Error::other(format!(
                "connection reset fetching {}",
                from_url
            ))));
        };

        if status == 200 {
            self.add_file(to_file, 1024);
        }
        Ok(status)
    }

    async fn unlink(&self, path: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let before = state.files.len();
        state.files.retain(|p, _| !p.starts_with(path));
        if state.files.len() == before {
            return Err(Error::NotFound(path.display().to_string()));
        }
        Ok(())
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let state = self.state.lock().unwrap();
        let mut entries: Vec<DirEntry> = Vec::new();
        for file in state.files.keys() {
            let Ok(rest) = file.strip_prefix(path) else {
                continue;
            };
            let mut components = rest.components();
            let Some(first) = components.next() else {
                continue;
            };
            let name = first.as_os_str().to_string_lossy().into_owned();
            let is_dir = components.next().is_some();
            if !entries.iter().any(|e| e.name == name) {
                entries.push(DirEntry {
                    path: path.join(&name),
                    name,
                    is_dir,
                });
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn stat(&self, path: &Path) -> Result<FileStat> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(path)
            .copied()
            .ok_or_else(|| Error::NotFound(path.display().to_string()))
    }

    async fn mkdir(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}
