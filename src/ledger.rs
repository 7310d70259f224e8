//! Append-only record of posts that have been fully archived.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::Result;

/// File name of the ledger inside the output directory.
pub const VISITED_FILE: &str = "visited.txt";

/// Visited post URLs, mirrored to a newline-delimited file.
///
/// The file is only ever appended to. A URL is added to the in-memory set
/// after its line has been synced, so a crash can at worst cause one post to
/// be processed again.
pub struct VisitedLedger {
    path: PathBuf,
    visited: HashSet<String>,
    file: Option<File>,
}

impl VisitedLedger {
    /// Read every entry of `path`. A missing file yields an empty ledger.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let visited: HashSet<String> = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No ledger at {}, starting empty", path.display());
                HashSet::new()
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!("Loaded {} visited entries", visited.len());
        Ok(Self {
            path,
            visited,
            file: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, url: &str) -> bool {
        self.visited.contains(url)
    }

    pub fn len(&self) -> usize {
        self.visited.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visited.is_empty()
    }

    /// Durably append `url`, then record it in memory. Already-visited URLs
    /// are not written twice.
    pub async fn mark_visited(&mut self, url: &str) -> Result<()> {
        if self.visited.contains(url) {
            return Ok(());
        }

        let file = match &mut self.file {
            Some(file) => file,
            slot => {
                if let Some(parent) = self.path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let opened = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .await?;
                slot.insert(opened)
            }
        };

        file.write_all(format!("{url}\n").as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;

        self.visited.insert(url.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = VisitedLedger::load(dir.path().join(VISITED_FILE))
            .await
            .expect("load");
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn mark_appends_and_reloads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(VISITED_FILE);
        tokio::fs::write(&path, "https://www.patreon.com/posts/a-1\n")
            .await
            .expect("seed");

        let mut ledger = VisitedLedger::load(&path).await.expect("load");
        assert!(ledger.contains("https://www.patreon.com/posts/a-1"));
        ledger
            .mark_visited("https://www.patreon.com/posts/b-2")
            .await
            .expect("mark");
        ledger
            .mark_visited("https://www.patreon.com/posts/b-2")
            .await
            .expect("mark again");

        let contents = tokio::fs::read_to_string(&path).await.expect("read");
        assert_eq!(
            contents,
            "https://www.patreon.com/posts/a-1\nhttps://www.patreon.com/posts/b-2\n"
        );

        let reloaded = VisitedLedger::load(&path).await.expect("reload");
        assert_eq!(reloaded.len(), 2);
    }

    #[tokio::test]
    async fn blank_lines_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(VISITED_FILE);
        tokio::fs::write(&path, "\nhttps://x/posts/1\n\n  \n")
            .await
            .expect("seed");
        let ledger = VisitedLedger::load(&path).await.expect("load");
        assert_eq!(ledger.len(), 1);
    }
}
