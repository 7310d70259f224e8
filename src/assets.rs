//! Saving post assets (images, attachments) into the output directory.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Local};
use filetime::FileTime;
use rand::Rng;

use crate::browser::PostPage;
use crate::error::{ArchiverError, Result};

/// Extensions a saved name may already carry; anything else gets a sniffed
/// one appended.
const KNOWN_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "jfif", "png", "gif", "webp", "bmp", "avif", "svg", "mp4", "webm", "mov", "mp3",
    "wav", "zip", "rar", "7z", "pdf", "psd", "clip", "txt",
];

/// Suffix of a file still being written; renamed away once complete.
const PARTIAL_SUFFIX: &str = ".part";

/// Extension (without dot) detected from the leading bytes of `bytes`.
pub fn sniff_extension(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some("jpg"),
        [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some("png"),
        [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some("gif"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("webp"),
        [b'B', b'M', ..] => Some("bmp"),
        [_, _, _, _, b'f', b't', b'y', b'p', b'a', b'v', b'i', b'f', ..] => Some("avif"),
        [_, _, _, _, b'f', b't', b'y', b'p', b'q', b't', ..] => Some("mov"),
        [_, _, _, _, b'f', b't', b'y', b'p', ..] => Some("mp4"),
        [0x1A, 0x45, 0xDF, 0xA3, ..] => Some("webm"),
        [b'P', b'K', 0x03, 0x04, ..] => Some("zip"),
        [b'%', b'P', b'D', b'F', ..] => Some("pdf"),
        [b'8', b'B', b'P', b'S', ..] => Some("psd"),
        [b'I', b'D', b'3', ..] => Some("mp3"),
        _ => None,
    }
}

/// Whether `name` already ends in a recognised extension.
pub fn has_known_extension(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            KNOWN_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        }
        _ => false,
    }
}

/// `name` as-is when it has a known extension, otherwise with the sniffed
/// extension (or `.file`) appended.
pub fn file_name_for(name: &str, bytes: &[u8]) -> String {
    if has_known_extension(name) {
        name.to_string()
    } else {
        format!("{name}.{}", sniff_extension(bytes).unwrap_or("file"))
    }
}

/// Best-effort: set access and modification time of `path` to `timestamp`.
pub fn set_timestamp(path: &Path, timestamp: DateTime<Local>) {
    let time = FileTime::from_unix_time(timestamp.timestamp(), timestamp.timestamp_subsec_nanos());
    if let Err(e) = filetime::set_file_times(path, time, time) {
        tracing::warn!("Failed to set file time on {}: {e}", path.display());
    }
}

/// Names of the files already present in an output directory.
///
/// Lookups are by substring, so an asset id finds the file it was saved
/// under whatever prefix or extension was added to it.
#[derive(Debug, Default)]
pub struct FileIndex {
    names: RwLock<Vec<String>>,
}

impl FileIndex {
    /// Scan `dir` (non-recursively). A missing directory gives an empty index.
    /// Unfinished `.part` files are not indexed.
    pub async fn scan(dir: &Path) -> Result<Self> {
        let mut names = Vec::new();
        match tokio::fs::read_dir(dir).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if !name.ends_with(PARTIAL_SUFFIX) {
                        names.push(name);
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(Self {
            names: RwLock::new(names),
        })
    }

    /// First file whose name contains `id`.
    pub fn find(&self, id: &str) -> Option<String> {
        if id.is_empty() {
            return None;
        }
        self.names
            .read()
            .ok()?
            .iter()
            .find(|name| name.contains(id))
            .cloned()
    }

    pub fn insert(&self, name: impl Into<String>) {
        if let Ok(mut names) = self.names.write() {
            names.push(name.into());
        }
    }

    pub fn len(&self) -> usize {
        self.names.read().map(|n| n.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fetches asset bytes through the page and writes them into one output
/// directory, skipping anything already saved.
#[derive(Clone, Debug)]
pub struct AssetDownloader {
    dir: PathBuf,
    index: Arc<FileIndex>,
    attempts: u32,
    base_delay: Duration,
}

impl AssetDownloader {
    pub fn new(dir: impl Into<PathBuf>, index: Arc<FileIndex>) -> Self {
        Self {
            dir: dir.into(),
            index,
            attempts: 5,
            base_delay: Duration::from_millis(500),
        }
    }

    /// Retry policy for page fetches: `attempts` tries, with a jittered
    /// delay growing from `base_delay` between them.
    pub fn retry(mut self, attempts: u32, base_delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.base_delay = base_delay;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index(&self) -> &Arc<FileIndex> {
        &self.index
    }

    /// Name of the already-saved file matching `id`, if any.
    pub fn existing(&self, id: &str) -> Option<String> {
        self.index.find(id)
    }

    /// Fetch `url` from inside `page`, retrying transient failures.
    pub async fn fetch(&self, page: &dyn PostPage, url: &str) -> Result<Vec<u8>> {
        let mut attempt = 1;
        loop {
            match page.fetch_bytes(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if attempt < self.attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        "Fetch of {url} failed (attempt {attempt}/{}), retrying in {delay:?}: {e}",
                        self.attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(ArchiverError::Network(format!(
                        "{url}: giving up after {} attempts: {e}",
                        self.attempts
                    )));
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64 * u64::from(attempt);
        let jitter = if base > 0 {
            rand::thread_rng().gen_range(0..=base / 2)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }

    /// Write `bytes` as `name` (extension added when missing), stamp it with
    /// `timestamp`, and record it in the index. Returns the final file name.
    ///
    /// The bytes go to a `.part` file first, so a save cut short never
    /// leaves a file under the final name.
    pub async fn save(&self, name: &str, bytes: &[u8], timestamp: DateTime<Local>) -> Result<String> {
        let file_name = file_name_for(name, bytes);
        let path = self.dir.join(&file_name);
        let partial = self.dir.join(format!("{file_name}{PARTIAL_SUFFIX}"));
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&partial, bytes).await?;
        tokio::fs::rename(&partial, &path).await?;
        set_timestamp(&path, timestamp);
        self.index.insert(file_name.clone());
        tracing::info!("Saved {file_name}");
        Ok(file_name)
    }

    /// Save the asset at `url` as `name` unless a file matching `id` is
    /// already present, in which case its name is returned.
    pub async fn download(
        &self,
        page: &dyn PostPage,
        url: &str,
        id: &str,
        name: &str,
        timestamp: DateTime<Local>,
    ) -> Result<String> {
        if let Some(existing) = self.existing(id) {
            tracing::info!("Image {id} already exists as {existing}");
            return Ok(existing);
        }
        let bytes = self.fetch(page, url).await?;
        self.save(name, &bytes, timestamp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniff_common_types() {
        assert_eq!(sniff_extension(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0]), Some("jpg"));
        assert_eq!(
            sniff_extension(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"),
            Some("png")
        );
        assert_eq!(sniff_extension(b"GIF89a...."), Some("gif"));
        assert_eq!(sniff_extension(b"RIFF\0\0\0\0WEBPVP8 "), Some("webp"));
        assert_eq!(sniff_extension(b"\0\0\0\x20ftypisom\0\0"), Some("mp4"));
        assert_eq!(sniff_extension(b"PK\x03\x04rest"), Some("zip"));
        assert_eq!(sniff_extension(b"%PDF-1.7"), Some("pdf"));
        assert_eq!(sniff_extension(b"hello"), None);
        assert_eq!(sniff_extension(&[]), None);
    }

    #[test]
    fn file_names_keep_known_extensions() {
        assert_eq!(file_name_for("clip.MP4", b"junk"), "clip.MP4");
        assert_eq!(file_name_for("post-abc", b"%PDF-1.4"), "post-abc.pdf");
        assert_eq!(file_name_for("notes.v2", b"plain"), "notes.v2.file");
        assert_eq!(file_name_for(".png", b"GIF89a"), ".png.gif");
    }

    #[tokio::test]
    async fn index_finds_by_substring() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("my-post-123-abcdef.png"), b"x").expect("write");
        let index = FileIndex::scan(dir.path()).await.expect("scan");
        assert_eq!(index.find("abcdef"), Some("my-post-123-abcdef.png".to_string()));
        assert_eq!(index.find("zzz"), None);
        assert_eq!(index.find(""), None);

        index.insert("later-file.zip");
        assert_eq!(index.find("later"), Some("later-file.zip".to_string()));
    }

    #[tokio::test]
    async fn index_of_missing_dir_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = FileIndex::scan(&dir.path().join("nope")).await.expect("scan");
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn save_stamps_modification_time() {
        let dir = tempfile::tempdir().expect("tempdir");
        let downloader = AssetDownloader::new(dir.path(), Arc::new(FileIndex::default()));
        let when = DateTime::parse_from_rfc3339("2020-01-02T03:04:05Z")
            .expect("date")
            .with_timezone(&Local);

        let name = downloader
            .save("post-img", b"\xFF\xD8\xFFdata", when)
            .await
            .expect("save");
        assert_eq!(name, "post-img.jpg");

        let meta = std::fs::metadata(dir.path().join(&name)).expect("meta");
        let mtime = FileTime::from_last_modification_time(&meta);
        assert_eq!(mtime.unix_seconds(), when.timestamp());
        assert_eq!(downloader.existing("post-img"), Some(name));
        assert!(!dir.path().join("post-img.jpg.part").exists());
    }

    #[tokio::test]
    async fn unfinished_save_is_not_indexed() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("post-img-abc123.jpg.part"), b"\xFF\xD8").expect("write");
        let index = FileIndex::scan(dir.path()).await.expect("scan");
        assert_eq!(index.find("abc123"), None);

        let downloader = AssetDownloader::new(dir.path(), Arc::new(index));
        let name = downloader
            .save("post-img-abc123", b"\xFF\xD8\xFFfull", Local::now())
            .await
            .expect("save");
        assert_eq!(name, "post-img-abc123.jpg");
        assert_eq!(
            std::fs::read(dir.path().join(&name)).expect("read"),
            b"\xFF\xD8\xFFfull"
        );
        assert!(!dir.path().join("post-img-abc123.jpg.part").exists());
    }

    #[tokio::test]
    async fn aborted_save_leaves_no_truncated_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let downloader = AssetDownloader::new(dir.path(), Arc::new(FileIndex::default()));
        let mut bytes = vec![0xFF, 0xD8, 0xFF];
        bytes.resize(32 * 1024 * 1024, 0xAB);
        let expected = bytes.len() as u64;

        let task = {
            let downloader = downloader.clone();
            tokio::spawn(async move { downloader.save("big-img-777", &bytes, Local::now()).await })
        };
        tokio::task::yield_now().await;
        task.abort();
        let _ = task.await;

        let index = FileIndex::scan(dir.path()).await.expect("scan");
        match index.find("777") {
            Some(name) => {
                let meta = std::fs::metadata(dir.path().join(&name)).expect("meta");
                assert_eq!(meta.len(), expected);
            }
            None => assert!(!dir.path().join("big-img-777.jpg").exists()),
        }
    }
}
