use log::{debug, warn};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::{change_extension, extension_of};
use crate::error::{Error, Result};

/// Retries a download under a list of alternative extensions.
///
/// Image hosts often serve a page as `.png` when the listing said `.jpg`.
/// Attempts run one after another and the first 200 wins.
#[derive(Debug, Clone)]
pub struct ExtensionFallback {
    candidates: Vec<String>,
    timeout: Option<Duration>,
}

impl ExtensionFallback {
    pub fn new(candidates: Vec<String>, timeout: Option<Duration>) -> Self {
        let candidates = candidates
            .into_iter()
            .map(|c| c.trim_start_matches('.').to_ascii_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        Self {
            candidates,
            timeout,
        }
    }

    /// Extensions to try for `remote_uri`: its own first, then the
    /// configured candidates it isn't already.
    pub fn candidates_for(&self, remote_uri: &str) -> Vec<String> {
        let own = extension_of(split_query(remote_uri).0).to_ascii_lowercase();
        let mut order = Vec::with_capacity(self.candidates.len() + 1);
        if !own.is_empty() {
            order.push(own);
        }
        for candidate in &self.candidates {
            if !order.contains(candidate) {
                order.push(candidate.clone());
            }
        }
        order
    }

    /// Runs `perform(candidate_uri, candidate_path)` for each candidate
    /// until one reports 200, returning that candidate's local path.
    ///
    /// Errors and non-200 statuses move on to the next candidate. `None`
    /// means every candidate failed.
    pub async fn download<F, Fut>(
        &self,
        remote_uri: &str,
        target: &Path,
        mut perform: F,
    ) -> Option<PathBuf>
    where
        F: FnMut(String, PathBuf) -> Fut,
        Fut: Future<Output = Result<u16>>,
    {
        for ext in self.candidates_for(remote_uri) {
            let candidate_uri = swap_uri_extension(remote_uri, &ext);
            let candidate_path = target.with_extension(&ext);

            match self.attempt(&candidate_uri, perform(candidate_uri.clone(), candidate_path.clone())).await {
                Ok(()) => {
                    debug!("Downloaded {} to {}", candidate_uri, candidate_path.display());
                    return Some(candidate_path);
                }
                Err(e) => {
                    debug!("{} failed: {}, trying next extension", candidate_uri, e);
                }
            }
        }

        warn!("No candidate extension worked for {}", remote_uri);
        None
    }

    async fn attempt<Fut>(&self, uri: &str, fut: Fut) -> Result<()>
    where
        Fut: Future<Output = Result<u16>>,
    {
        let status = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Error::DownloadTimeout(uri.to_string()))??,
            None => fut.await?,
        };
        match status {
            200 => Ok(()),
            status => Err(Error::DownloadStatus {
                url: uri.to_string(),
                status,
            }),
        }
    }
}

fn split_query(uri: &str) -> (&str, &str) {
    match uri.find(['?', '#']) {
        Some(i) => uri.split_at(i),
        None => (uri, ""),
    }
}

/// Changes the extension of the URI's path, keeping any query string.
fn swap_uri_extension(uri: &str, ext: &str) -> String {
    let (path, query) = split_query(uri);
    format!("{}{}", change_extension(path, ext), query)
}
