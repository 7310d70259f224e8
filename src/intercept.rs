//! Per-site policy for requests intercepted from the browser.
//!
//! Rules are evaluated in order:
//!
//! 1. ad/tracking hosts are aborted;
//! 2. anything that is not a static asset, or an asset from a foreign host,
//!    passes through uncached;
//! 3. site-specific rogue images (thumbnails on listing pages, covers,
//!    avatars) are answered with an empty body;
//! 4. challenge, JSON and login-page traffic is never cached;
//! 5. cache hits are served from memory or disk;
//! 6. everything else is fetched, cached when small enough, and fulfilled.
//!
//! Any failure while resolving falls back to letting the request continue.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;

use crate::browser::{Fulfillment, InterceptOutcome, InterceptedRequest, RequestHandler};
use crate::cache::{
    AssetCache, CacheEntry, MAX_CACHEABLE_BYTES, guess_extension, mime_for_extension, normalize_url,
};
use crate::fetcher::{AssetFetcher, FetchedResponse};
use crate::site::{Site, strip_query};

const TRACKING_HOSTS: &[&str] = &[
    "doubleclick.net",
    "analytics.google.com",
    "googletagmanager.com",
    "googleoptimize.com",
    "twitter.com",
    "ads-twitter.com",
    "vimeo.com",
];

static ASSET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(js|css|jpg|jpeg|png|gif|svg)").expect("valid regex"));
static TRAILING_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)$").expect("valid regex"));
static FANBOX_DECOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"fanbox/public/images/(post/\d+/cover|user/\d+/icon|plan/\d+/cover)")
        .expect("valid regex")
});

/// Headers that no longer describe the body once it has been buffered.
const HOP_HEADERS: &[&str] = &["content-encoding", "content-length", "transfer-encoding"];

/// Classification of a request before any cache or network work.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Abort,
    FulfillEmpty { content_type: &'static str },
    PassThrough,
    Cacheable,
}

/// Final decision for a request, including the cache lookup.
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    Abort,
    FulfillEmpty { content_type: &'static str },
    PassThrough,
    ServeFromCache(CacheEntry),
    FetchThenCache,
}

/// The request-interception policy for one site.
pub struct InterceptPolicy {
    site: Site,
    cache: Arc<AssetCache>,
    fetcher: Arc<dyn AssetFetcher>,
    max_cacheable_bytes: usize,
}

impl InterceptPolicy {
    pub fn new(site: Site, cache: Arc<AssetCache>, fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self {
            site,
            cache,
            fetcher,
            max_cacheable_bytes: MAX_CACHEABLE_BYTES,
        }
    }

    /// Override the size ceiling above which responses bypass the cache.
    pub fn max_cacheable_bytes(mut self, limit: usize) -> Self {
        self.max_cacheable_bytes = limit;
        self
    }

    /// Apply rules 1-4.
    pub fn classify(&self, request: &InterceptedRequest) -> Verdict {
        let raw = request.url.as_str();
        if is_tracking(raw) {
            return Verdict::Abort;
        }
        if !is_asset(raw) {
            return Verdict::PassThrough;
        }
        if !self.site.asset_domains().iter().any(|d| raw.contains(d)) {
            return Verdict::PassThrough;
        }
        if let Some(verdict) = self.rogue_asset(request) {
            return verdict;
        }
        let url = normalize_url(raw);
        if raw.contains("cloudflare")
            || raw.contains("challenge")
            || url.contains("json")
            || request.top_url.contains("login")
        {
            return Verdict::PassThrough;
        }
        Verdict::Cacheable
    }

    /// Classify and, for cacheable requests, consult the cache (rule 5).
    pub async fn decide(&self, request: &InterceptedRequest) -> Decision {
        match self.classify(request) {
            Verdict::Abort => Decision::Abort,
            Verdict::FulfillEmpty { content_type } => Decision::FulfillEmpty { content_type },
            Verdict::PassThrough => Decision::PassThrough,
            Verdict::Cacheable => {
                let stats = self.cache.stats();
                stats.record_request();
                match self.cache.lookup(&request.url).await {
                    Some(entry) => {
                        stats.record_hit();
                        Decision::ServeFromCache(entry)
                    }
                    None => Decision::FetchThenCache,
                }
            }
        }
    }

    /// Rule 3: suppress images that do not belong to the open post.
    fn rogue_asset(&self, request: &InterceptedRequest) -> Option<Verdict> {
        let top = strip_query(&request.top_url);
        let on_feed = top.ends_with("/posts");
        let url = normalize_url(&request.url);
        let lower = url.to_ascii_lowercase();

        match self.site {
            Site::Patreon => {
                if !lower.ends_with(".gif") {
                    return None;
                }
                let page_id = TRAILING_ID_RE
                    .captures(&top)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str());
                let foreign = page_id.is_some_and(|id| !url.contains(id));
                if foreign || on_feed {
                    Some(Verdict::FulfillEmpty {
                        content_type: "image/gif",
                    })
                } else {
                    Some(Verdict::PassThrough)
                }
            }
            Site::Fanbox => {
                let fanbox_image = ["fanbox.cc/images/", "pximg.net"]
                    .iter()
                    .any(|h| url.contains(h))
                    && ["svg", "png", "jpg", "jpeg", "gif"]
                        .iter()
                        .any(|ext| lower.ends_with(ext));
                if fanbox_image && on_feed {
                    return Some(Verdict::FulfillEmpty {
                        content_type: "image/gif",
                    });
                }
                if FANBOX_DECOR_RE.is_match(&request.url) {
                    return Some(Verdict::FulfillEmpty {
                        content_type: "image/jpg",
                    });
                }
                None
            }
            Site::Substack => None,
        }
    }

    async fn fetch_then_cache(&self, request: &InterceptedRequest) -> InterceptOutcome {
        let referer = (!request.top_url.is_empty()).then_some(request.top_url.as_str());
        let response = match self.fetcher.fetch(&request.url, referer).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("Fetch failed for {}, continuing: {e}", request.url);
                return InterceptOutcome::Continue;
            }
        };

        if response.content_length() > self.max_cacheable_bytes {
            tracing::debug!("Not caching oversized response {}", request.url);
            return InterceptOutcome::Fulfill(passthrough_fulfillment(response));
        }

        let content_type = response
            .header("content-type")
            .map(str::to_string)
            .unwrap_or_else(|| mime_for_extension(&guess_extension(&request.url)).to_string());
        let status = response.status;
        let fulfillment = passthrough_fulfillment(response);
        if (200..300).contains(&status) {
            self.cache
                .store(&request.url, fulfillment.body.clone(), &content_type);
        }
        InterceptOutcome::Fulfill(fulfillment)
    }
}

#[async_trait]
impl RequestHandler for InterceptPolicy {
    async fn handle(&self, request: InterceptedRequest) -> InterceptOutcome {
        match self.decide(&request).await {
            Decision::Abort => InterceptOutcome::Abort,
            Decision::PassThrough => InterceptOutcome::Continue,
            Decision::FulfillEmpty { content_type } => InterceptOutcome::Fulfill(Fulfillment {
                status: 200,
                headers: vec![("Content-Type".to_string(), content_type.to_string())],
                body: Arc::from(Vec::new()),
            }),
            Decision::ServeFromCache(entry) => InterceptOutcome::Fulfill(Fulfillment {
                status: 200,
                headers: vec![("Content-Type".to_string(), entry.content_type)],
                body: entry.bytes,
            }),
            Decision::FetchThenCache => self.fetch_then_cache(&request).await,
        }
    }
}

fn passthrough_fulfillment(response: FetchedResponse) -> Fulfillment {
    Fulfillment {
        status: response.status,
        headers: response
            .headers
            .into_iter()
            .filter(|(k, _)| !HOP_HEADERS.iter().any(|h| k.eq_ignore_ascii_case(h)))
            .collect(),
        body: response.body.into(),
    }
}

fn is_tracking(url: &str) -> bool {
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };
    let host = parsed.host_str().unwrap_or_default();
    host.contains("twitter")
        || TRACKING_HOSTS
            .iter()
            .any(|t| host == *t || host.ends_with(&format!(".{t}")))
}

/// Whether the last path segment names a static asset.
fn is_asset(url: &str) -> bool {
    let path = normalize_url(url);
    let segment = path.rsplit('/').next().unwrap_or_default();
    ASSET_RE.is_match(segment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStats;
    use crate::error::Result;
    use crate::handle::CacheWorker;
    use crate::storage::FsStorage;
    use std::time::Duration;

    struct NoNetwork;

    #[async_trait]
    impl AssetFetcher for NoNetwork {
        async fn fetch(&self, url: &str, _referer: Option<&str>) -> Result<FetchedResponse> {
            Err(crate::error::ArchiverError::Network(format!("offline: {url}")))
        }
    }

    fn policy(site: Site, dir: &std::path::Path) -> (InterceptPolicy, CacheWorker) {
        let stats = Arc::new(CacheStats::new());
        let worker = CacheWorker::spawn(FsStorage::new(dir), stats.clone(), Duration::from_secs(60), 16);
        let cache = Arc::new(AssetCache::new(dir, worker.writer(), stats));
        (InterceptPolicy::new(site, cache, Arc::new(NoNetwork)), worker)
    }

    fn req(url: &str, top: &str) -> InterceptedRequest {
        InterceptedRequest {
            url: url.to_string(),
            top_url: top.to_string(),
        }
    }

    #[tokio::test]
    async fn tracking_is_aborted() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (p, worker) = policy(Site::Patreon, tmp.path());
        assert_eq!(
            p.classify(&req("https://stats.g.doubleclick.net/r/collect", "")),
            Verdict::Abort
        );
        assert_eq!(
            p.classify(&req("https://platform.twitter.com/widgets.js", "")),
            Verdict::Abort
        );
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn foreign_and_non_asset_requests_pass_through() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (p, worker) = policy(Site::Patreon, tmp.path());
        assert_eq!(
            p.classify(&req("https://cdn.jsdelivr.net/lib.js", "https://www.patreon.com/posts/a-1")),
            Verdict::PassThrough
        );
        assert_eq!(
            p.classify(&req("https://www.patreon.com/api/posts/1", "https://www.patreon.com/posts/a-1")),
            Verdict::PassThrough
        );
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn patreon_feed_gifs_are_emptied() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (p, worker) = policy(Site::Patreon, tmp.path());
        let feed = "https://www.patreon.com/c/artist/posts";
        assert_eq!(
            p.classify(&req("https://c10.patreonusercontent.com/p/post/555/anim.gif", feed)),
            Verdict::FulfillEmpty {
                content_type: "image/gif"
            }
        );
        let post = "https://www.patreon.com/posts/title-555";
        assert_eq!(
            p.classify(&req("https://c10.patreonusercontent.com/p/post/777/anim.gif", post)),
            Verdict::FulfillEmpty {
                content_type: "image/gif"
            }
        );
        assert_eq!(
            p.classify(&req("https://c10.patreonusercontent.com/p/post/555/anim.gif", post)),
            Verdict::PassThrough
        );
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn fanbox_listing_thumbnails_and_covers_are_emptied() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (p, worker) = policy(Site::Fanbox, tmp.path());
        assert_eq!(
            p.classify(&req(
                "https://downloads.fanbox.cc/images/post/1/abc.jpeg?w=1",
                "https://artist.fanbox.cc/posts"
            )),
            Verdict::FulfillEmpty {
                content_type: "image/gif"
            }
        );
        assert_eq!(
            p.classify(&req(
                "https://pixiv.pximg.net/c/1200x630_90_a2_g5/fanbox/public/images/post/123/cover/x.jpeg",
                "https://artist.fanbox.cc/posts/123"
            )),
            Verdict::FulfillEmpty {
                content_type: "image/jpg"
            }
        );
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn challenge_json_and_login_are_not_cached() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (p, worker) = policy(Site::Patreon, tmp.path());
        let post = "https://www.patreon.com/posts/t-1";
        assert_eq!(
            p.classify(&req("https://www.patreon.com/cdn-cgi/challenge-platform/x.js", post)),
            Verdict::PassThrough
        );
        assert_eq!(
            p.classify(&req("https://www.patreon.com/static/manifest.json", post)),
            Verdict::PassThrough
        );
        assert_eq!(
            p.classify(&req("https://www.patreon.com/static/app.js", "https://www.patreon.com/login")),
            Verdict::PassThrough
        );
        assert_eq!(
            p.classify(&req("https://www.patreon.com/static/app.js", post)),
            Verdict::Cacheable
        );
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn fetch_failure_continues() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (p, worker) = policy(Site::Patreon, tmp.path());
        let outcome = p
            .handle(req("https://www.patreon.com/static/app.js", "https://www.patreon.com/posts/t-1"))
            .await;
        assert_eq!(outcome, InterceptOutcome::Continue);
        assert_eq!(p.cache.stats().total(), 1);
        assert_eq!(p.cache.stats().hits(), 0);
        worker.shutdown().await;
    }
}
