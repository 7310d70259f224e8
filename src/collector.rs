//! Images captured from network responses while the carousel is stepped.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;

use crate::post::ImageMap;

/// Append-only id → filename map written by the response listener and read
/// by the stepping loop.
///
/// Entries are never removed or replaced, and the published count only
/// grows, so a reader always sees a consistent prefix of what was captured.
#[derive(Debug)]
pub struct ImageCollector {
    entries: Mutex<ImageMap>,
    count: watch::Sender<usize>,
}

impl Default for ImageCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCollector {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            entries: Mutex::new(ImageMap::new()),
            count,
        }
    }

    /// Seed with already-known entries (static images, files on disk).
    pub fn with_entries(entries: ImageMap) -> Self {
        let len = entries.len();
        let (count, _) = watch::channel(len);
        Self {
            entries: Mutex::new(entries),
            count,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains(id))
            .unwrap_or(false)
    }

    /// Record `id` as saved under `filename`. Returns `false` when the id was
    /// already present; the first filename recorded for an id is kept.
    pub fn record(&self, id: &str, filename: &str) -> bool {
        let len = {
            let Ok(mut entries) = self.entries.lock() else {
                return false;
            };
            if entries.contains(id) {
                return false;
            }
            entries.insert(id, filename);
            entries.len()
        };
        self.count.send_replace(len);
        true
    }

    pub fn len(&self) -> usize {
        *self.count.borrow()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> ImageMap {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Wait until at least `target` images are recorded or `timeout` passes.
    /// Returns whether the target was reached.
    pub async fn wait_for(&self, target: usize, timeout: Duration) -> bool {
        let mut rx = self.count.subscribe();
        let reached = tokio::time::timeout(timeout, rx.wait_for(|n| *n >= target)).await;
        matches!(reached, Ok(Ok(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn first_record_wins() {
        let collector = ImageCollector::new();
        assert!(collector.record("a", "post-a.png"));
        assert!(!collector.record("a", "post-a-again.png"));
        assert_eq!(collector.len(), 1);
        assert_eq!(collector.snapshot().get("a"), Some("post-a.png"));
    }

    #[test]
    fn seeded_entries_count() {
        let seeded: ImageMap = [("x", "x.png"), ("y", "y.png")].into_iter().collect();
        let collector = ImageCollector::with_entries(seeded);
        assert_eq!(collector.len(), 2);
        assert!(collector.contains("y"));
    }

    #[tokio::test]
    async fn wait_returns_once_target_reached() {
        let collector = Arc::new(ImageCollector::new());
        let writer = Arc::clone(&collector);
        tokio::spawn(async move {
            for i in 0..3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
                writer.record(&format!("id{i}"), &format!("img{i}.png"));
            }
        });
        assert!(collector.wait_for(3, Duration::from_secs(5)).await);
        assert_eq!(collector.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_gives_up_after_timeout() {
        let collector = ImageCollector::new();
        collector.record("only", "one.png");
        assert!(!collector.wait_for(2, Duration::from_secs(120)).await);
        assert!(collector.wait_for(1, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn zero_target_is_immediate() {
        let collector = ImageCollector::new();
        assert!(collector.wait_for(0, Duration::from_millis(1)).await);
    }
}
