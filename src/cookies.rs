//! Session persistence between runs: `cookies.json` and `flags.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::browser::{BrowserSession, StoredCookie};
use crate::error::Result;
use crate::site::Site;

/// Cookie file shared by every site.
#[derive(Clone, Debug)]
pub struct CookieJar {
    path: PathBuf,
}

impl CookieJar {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored cookies, or none when the file is missing or unreadable.
    pub async fn load(&self) -> Vec<StoredCookie> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_str(&raw) {
            Ok(cookies) => cookies,
            Err(e) => {
                tracing::warn!("Ignoring malformed {}: {e}", self.path.display());
                Vec::new()
            }
        }
    }

    /// Overwrite the file with `cookies`. An empty list is not written so a
    /// logged-out session cannot clobber a good jar.
    pub async fn store(&self, cookies: &[StoredCookie]) -> Result<bool> {
        if cookies.is_empty() {
            tracing::warn!("Empty cookies, not saving");
            return Ok(false);
        }
        let json = serde_json::to_string(cookies)?;
        tokio::fs::write(&self.path, json).await?;
        tracing::info!("Cookies saved for future use");
        Ok(true)
    }

    /// Snapshot the session's cookies to disk.
    pub async fn save_from(&self, session: &dyn BrowserSession) -> Result<bool> {
        let cookies = session.cookies().await?;
        self.store(&cookies).await
    }
}

/// Per-site "operator has logged in once" markers.
#[derive(Clone, Debug)]
pub struct LoginFlags {
    path: PathBuf,
}

impl LoginFlags {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read(&self) -> BTreeMap<String, bool> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => BTreeMap::new(),
        }
    }

    pub async fn is_logged_in(&self, site: Site) -> bool {
        self.read().await.get(site.key()).copied().unwrap_or(false)
    }

    /// Record a completed login for `site`, keeping other sites' flags.
    pub async fn mark_logged_in(&self, site: Site) -> Result<()> {
        let mut flags = self.read().await;
        flags.insert(site.key().to_string(), true);
        tokio::fs::write(&self.path, serde_json::to_string(&flags)?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str) -> StoredCookie {
        StoredCookie {
            name: name.to_string(),
            value: "v".to_string(),
            domain: ".patreon.com".to_string(),
            path: "/".to_string(),
            expires: Some(1_900_000_000.0),
            http_only: true,
            secure: true,
        }
    }

    #[tokio::test]
    async fn empty_jar_is_not_written() {
        let dir = tempfile::tempdir().expect("tempdir");
        let jar = CookieJar::new(dir.path().join("cookies.json"));
        assert!(!jar.store(&[]).await.expect("store"));
        assert!(!jar.path().exists());
        assert!(jar.load().await.is_empty());
    }

    #[tokio::test]
    async fn cookies_round_trip_in_camel_case() {
        let dir = tempfile::tempdir().expect("tempdir");
        let jar = CookieJar::new(dir.path().join("cookies.json"));
        assert!(jar.store(&[cookie("session_id")]).await.expect("store"));

        let raw = std::fs::read_to_string(jar.path()).expect("read");
        assert!(raw.contains("\"httpOnly\":true"));
        assert_eq!(jar.load().await, vec![cookie("session_id")]);
    }

    #[tokio::test]
    async fn flags_are_per_site() {
        let dir = tempfile::tempdir().expect("tempdir");
        let flags = LoginFlags::new(dir.path().join("flags.json"));
        assert!(!flags.is_logged_in(Site::Patreon).await);

        flags.mark_logged_in(Site::Fanbox).await.expect("mark");
        flags.mark_logged_in(Site::Patreon).await.expect("mark");
        assert!(flags.is_logged_in(Site::Fanbox).await);
        assert!(flags.is_logged_in(Site::Patreon).await);
        assert!(!flags.is_logged_in(Site::Substack).await);

        let raw = std::fs::read_to_string(dir.path().join("flags.json")).expect("read");
        assert!(raw.contains("\"pixivFanbox\":true"));
    }
}
