//! Content-addressed asset cache shared by request interception.
//!
//! Entries live in memory and in a per-site directory on disk, named
//! `<sha256><ext>`. The in-memory map mirrors the disk store: it is warmed at
//! startup and filled lazily on a miss. Disk writes are handed to the
//! background worker and never block or fail a request.

mod stats;

pub use stats::CacheStats;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};
use url::Url;

use crate::error::Result;
use crate::handle::{CacheWriter, WriteJob};

/// Responses larger than this are streamed through without caching.
pub const MAX_CACHEABLE_BYTES: usize = 10 * 1024 * 1024;

/// A cached response body with the content type it was served with.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub bytes: Arc<[u8]>,
    pub content_type: String,
}

/// Strip query and fragment from `url`, returning `origin + pathname`.
pub fn normalize_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => format!("{}{}", parsed.origin().ascii_serialization(), parsed.path()),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

/// SHA-256 hex digest of the normalized URL. Cache-busting query parameters
/// and fragments do not change the key.
pub fn cache_key(url: &str) -> String {
    let digest = Sha256::digest(normalize_url(url).as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Extension of the URL's path including the dot, or `.bin`.
pub fn guess_extension(url: &str) -> String {
    let path = normalize_url(url);
    let file = path.rsplit('/').next().unwrap_or_default();
    match file.rfind('.') {
        Some(idx) if idx + 1 < file.len() => file[idx..].to_string(),
        _ => ".bin".to_string(),
    }
}

/// MIME type reconstructed from a file extension (with leading dot).
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        ".jpeg" | ".jpg" => "image/jpeg",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".svg" => "image/svg+xml",
        ".webp" => "image/webp",
        ".css" => "text/css",
        ".js" => "application/javascript",
        ".html" => "text/html",
        _ => "application/octet-stream",
    }
}

/// Two-level (memory + disk) asset cache for one site.
///
/// Constructed once by the orchestrator and shared by reference with the
/// interception policy.
pub struct AssetCache {
    dir: PathBuf,
    entries: RwLock<HashMap<String, CacheEntry>>,
    writer: CacheWriter,
    stats: Arc<CacheStats>,
}

impl AssetCache {
    /// Create an empty cache rooted at `dir`. Disk writes go through
    /// `writer`, whose storage must be rooted at the same directory.
    pub fn new(dir: impl Into<PathBuf>, writer: CacheWriter, stats: Arc<CacheStats>) -> Self {
        Self {
            dir: dir.into(),
            entries: RwLock::new(HashMap::new()),
            writer,
            stats,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stats(&self) -> &Arc<CacheStats> {
        &self.stats
    }

    /// Load every persisted entry into memory, creating the directory when it
    /// does not exist yet. Returns the number of entries loaded.
    pub async fn warm(&self) -> Result<usize> {
        if !tokio::fs::try_exists(&self.dir).await.unwrap_or(false) {
            tokio::fs::create_dir_all(&self.dir).await?;
            return Ok(0);
        }

        let mut loaded = HashMap::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let (hash, ext) = match file_name.find('.') {
                Some(idx) => (&file_name[..idx], &file_name[idx..]),
                None => (file_name.as_str(), ""),
            };
            let bytes = tokio::fs::read(entry.path()).await?;
            loaded.insert(
                hash.to_string(),
                CacheEntry {
                    bytes: bytes.into(),
                    content_type: mime_for_extension(ext).to_string(),
                },
            );
        }

        let count = loaded.len();
        if let Ok(mut entries) = self.entries.write() {
            entries.extend(loaded);
        }
        tracing::info!("Loaded {count} cached files from {}", self.dir.display());
        Ok(count)
    }

    /// Serve `url` from memory, falling back to the disk store. A disk hit is
    /// promoted into memory.
    pub async fn lookup(&self, url: &str) -> Option<CacheEntry> {
        let key = cache_key(url);
        if let Some(entry) = self.memory_get(&key) {
            return Some(entry);
        }

        let ext = guess_extension(url);
        let path = self.dir.join(format!("{key}{ext}"));
        let bytes = tokio::fs::read(&path).await.ok()?;
        let entry = CacheEntry {
            bytes: bytes.into(),
            content_type: mime_for_extension(&ext).to_string(),
        };
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key, entry.clone());
        }
        Some(entry)
    }

    /// Insert into memory and queue the disk write.
    pub fn store(&self, url: &str, bytes: Arc<[u8]>, content_type: &str) {
        let key = cache_key(url);
        let file_name = format!("{key}{}", guess_extension(url));
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                key,
                CacheEntry {
                    bytes: bytes.clone(),
                    content_type: content_type.to_string(),
                },
            );
        }
        self.writer.save_or_log(WriteJob {
            key: file_name,
            bytes,
            content_type: content_type.to_string(),
        });
    }

    /// Whether `url` is present in memory (disk is not consulted).
    pub fn contains(&self, url: &str) -> bool {
        self.memory_get(&cache_key(url)).is_some()
    }

    /// Path the entry for `url` is persisted under.
    pub fn disk_path(&self, url: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}", cache_key(url), guess_extension(url)))
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn memory_get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.read().ok()?.get(key).cloned()
    }
}
