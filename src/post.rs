//! Per-post data assembled during extraction.

use chrono::{DateTime, Local};
use serde::Serialize;

/// Ordered mapping from a site-specific asset id to the file it was saved
/// under. Insertion order is preserved so that substitution into the body
/// is deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageMap {
    entries: Vec<(String, String)>,
}

impl ImageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the filename for `id`, keeping its original
    /// position when it was already present.
    pub fn insert(&mut self, id: impl Into<String>, filename: impl Into<String>) {
        let id = id.into();
        let filename = filename.into();
        match self.entries.iter_mut().find(|(k, _)| *k == id) {
            Some(entry) => entry.1 = filename,
            None => self.entries.push((id, filename)),
        }
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == id)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn remove(&mut self, id: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == id)?;
        Some(self.entries.remove(idx).1)
    }

    /// First id (in insertion order) that occurs inside `haystack`.
    pub fn find_in(&self, haystack: &str) -> Option<&str> {
        self.entries
            .iter()
            .map(|(k, _)| k.as_str())
            .find(|k| !k.is_empty() && haystack.contains(k))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ImageMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Everything known about a post once its assets are on disk.
#[derive(Clone, Debug)]
pub struct PostRecord {
    pub url: String,
    pub name: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub tags: Vec<String>,
    pub timestamp: DateTime<Local>,
    pub attachments: Vec<String>,
    pub images: ImageMap,
}

/// The JSON sidecar written next to each Markdown file.
#[derive(Debug, Serialize)]
pub struct Sidecar<'a> {
    pub title: &'a str,
    /// Publish date as epoch milliseconds.
    pub date: i64,
}

impl PostRecord {
    pub fn sidecar(&self) -> Sidecar<'_> {
        Sidecar {
            title: &self.title,
            date: self.timestamp.timestamp_millis(),
        }
    }
}
