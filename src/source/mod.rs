//! Per-site extraction behaviour behind one [`PostSource`] interface.
//!
//! Each platform is a plain struct implementing the trait; the orchestrator
//! picks one with [`for_site`] and holds it as a trait object for the rest of
//! the run. Default methods cover what the platforms share, so a variant
//! only overrides what differs.

mod fanbox;
mod patreon;
mod substack;

pub use fanbox::FanboxSource;
pub use patreon::PatreonSource;
pub use substack::SubstackSource;

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use futures::StreamExt;
use regex::Regex;
use url::Url;

use crate::assets::AssetDownloader;
use crate::browser::{ElementState, PostPage};
use crate::collector::ImageCollector;
use crate::error::{ArchiverError, Result};
use crate::guard::ChallengeGuard;
use crate::pacing::Pacing;
use crate::post::ImageMap;
use crate::site::{SelectorSet, Site, strip_query};

static IMAGE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.(jpg|jpeg|png|gif|webp|jfif|bmp)").expect("valid regex")
});

/// Collaborators a source needs while working on a live page.
pub struct SourceContext<'a> {
    pub guard: &'a ChallengeGuard,
    pub pacing: &'a Pacing,
    pub downloader: &'a AssetDownloader,
    pub wait_timeout: Duration,
    pub image_wait_timeout: Duration,
}

/// Result of applying the feed filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOutcome {
    /// Posts are listed and the walk can start.
    Ready,
    /// The feed shows its empty state.
    NoPosts,
}

#[async_trait]
pub trait PostSource: Send + Sync {
    fn site(&self) -> Site;

    fn selectors(&self) -> &'static SelectorSet {
        self.site().selectors()
    }

    /// Whether `url` lists posts rather than showing a single one.
    fn is_feed_url(&self, url: &str) -> bool;

    /// Whether feed walks need a year filter.
    fn requires_year(&self) -> bool {
        false
    }

    /// Whether loading more keeps earlier posts on the page, so an unchanged
    /// URL count means the feed is exhausted.
    fn accumulating_feed(&self) -> bool {
        false
    }

    /// Structural validation before anything touches the browser.
    fn validate_target(&self, url: &str, year: Option<&str>) -> Result<()> {
        if self.is_feed_url(url) && self.requires_year() && year.is_none_or(str::is_empty) {
            return Err(ArchiverError::MissingYear(url.to_string()));
        }
        Ok(())
    }

    /// Narrow the feed (year, unlocked only) and wait for posts.
    async fn apply_filter(
        &self,
        ctx: &SourceContext<'_>,
        page: &dyn PostPage,
        _year: Option<&str>,
    ) -> Result<FilterOutcome> {
        wait_for_posts(ctx, page, self.selectors()).await
    }

    /// Post hrefs currently listed on the feed page, resolved by the browser.
    async fn post_urls(&self, ctx: &SourceContext<'_>, page: &dyn PostPage) -> Result<Vec<String>> {
        if wait_for_posts(ctx, page, self.selectors()).await? == FilterOutcome::NoPosts {
            return Ok(Vec::new());
        }
        let links = page.links(self.selectors().post_urls).await?;
        Ok(links.into_iter().map(|l| l.href).collect())
    }

    /// File-name stem for the post currently open in `page`.
    async fn post_name(&self, page: &dyn PostPage) -> Result<String> {
        let url = page.current_url().await?;
        Ok(last_path_segment(&url))
    }

    async fn tags(&self, _page: &dyn PostPage) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn publish_date(&self, page: &dyn PostPage) -> Result<DateTime<Local>>;

    async fn title(&self, page: &dyn PostPage) -> Result<String> {
        let selector = self.selectors().content_title;
        page.inner_text(selector)
            .await?
            .map(|t| t.trim().to_string())
            .ok_or_else(|| ArchiverError::ElementNotFound(selector.to_string()))
    }

    async fn subtitle(&self, page: &dyn PostPage) -> Result<Option<String>> {
        let Some(selector) = self.selectors().subtitle else {
            return Ok(None);
        };
        if page.count(selector).await? == 0 {
            return Ok(None);
        }
        Ok(page
            .inner_text(selector)
            .await?
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()))
    }

    /// Inner HTML of the post body.
    async fn content_html(&self, page: &dyn PostPage) -> Result<String> {
        let selector = self.selectors().content_block;
        match page.inner_html(selector).await? {
            Some(html) => Ok(html),
            None => {
                tracing::warn!("No content block found for {selector}");
                Ok(String::new())
            }
        }
    }

    /// Name to save an attachment under, from its link.
    fn attachment_name(&self, _href: &str, text: &str) -> String {
        text.trim()
            .chars()
            .map(|c| if c.is_whitespace() { '-' } else { c })
            .collect()
    }

    /// Save every image of the open post, returning asset id → file name.
    async fn save_images(
        &self,
        ctx: &SourceContext<'_>,
        page: &dyn PostPage,
        name: &str,
        timestamp: DateTime<Local>,
    ) -> Result<ImageMap>;

    /// Advance the feed. Returns `false` when there is nothing more to load.
    async fn load_more(&self, ctx: &SourceContext<'_>, page: &dyn PostPage) -> Result<bool>;
}

/// The source implementation for `site`.
pub fn for_site(site: Site) -> Arc<dyn PostSource> {
    match site {
        Site::Patreon => Arc::new(PatreonSource),
        Site::Fanbox => Arc::new(FanboxSource),
        Site::Substack => Arc::new(SubstackSource),
    }
}

/// Query-stripped `url` ends with `suffix` (ignoring a trailing slash).
pub(crate) fn feed_path_ends_with(url: &str, suffix: &str) -> bool {
    strip_query(url).trim_end_matches('/').ends_with(suffix)
}

/// Last non-empty path segment of `url`.
pub(crate) fn last_path_segment(url: &str) -> String {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => strip_query(url),
    };
    path.rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Wait for the post list, or detect the feed's empty state.
pub(crate) async fn wait_for_posts(
    ctx: &SourceContext<'_>,
    page: &dyn PostPage,
    selectors: &SelectorSet,
) -> Result<FilterOutcome> {
    ctx.guard.clear(page).await?;
    if let Some(no_cards) = selectors.no_cards {
        if page.count(no_cards).await? == 1 {
            tracing::info!("No posts available");
            return Ok(FilterOutcome::NoPosts);
        }
    }
    page.wait_for(selectors.post_urls, ElementState::Attached, ctx.wait_timeout)
        .await
        .inspect_err(|e| tracing::error!("Something failed when waiting for posts: {e}"))?;
    Ok(FilterOutcome::Ready)
}

/// Wait for the feed loader to appear and then go away.
pub(crate) async fn wait_for_loader(
    ctx: &SourceContext<'_>,
    page: &dyn PostPage,
    loader: &str,
) -> Result<()> {
    tracing::debug!("Waiting for loader to appear");
    page.wait_for(loader, ElementState::Attached, ctx.wait_timeout).await?;
    tracing::debug!("Waiting for loader to hide");
    page.wait_for(loader, ElementState::Detached, ctx.wait_timeout).await?;
    let url = page.current_url().await?;
    tracing::info!("Loaded next page at {url}");
    Ok(())
}

/// Download each `(id, url)` pair unless a file for the id already exists.
pub(crate) async fn save_linked_images(
    ctx: &SourceContext<'_>,
    page: &dyn PostPage,
    pairs: Vec<(String, String)>,
    name: &str,
    timestamp: DateTime<Local>,
) -> Result<ImageMap> {
    let mut images = ImageMap::new();
    for (id, url) in pairs {
        if id.is_empty() {
            continue;
        }
        let file = ctx
            .downloader
            .download(page, &url, &id, &format!("{name}-{id}"), timestamp)
            .await
            .inspect_err(|e| tracing::error!("Failed to save {url}: {e}"))?;
        images.insert(id, file);
    }
    Ok(images)
}

/// How to step through one site's image lightbox.
pub(crate) struct CarouselSpec {
    pub clickable: &'static str,
    pub big_image: &'static str,
    pub next_button: &'static str,
    /// Which captured responses belong to this post.
    pub wants: Arc<dyn Fn(&str) -> bool + Send + Sync>,
    /// Asset id parsed from a captured image URL.
    pub image_id: fn(&str) -> Option<String>,
    /// Hover the open image before looking for the next control.
    pub hover_first: bool,
}

/// Open the lightbox and step through it while a listener saves every image
/// response that loads. Waits (bounded) until one image per clickable
/// trigger has been captured.
pub(crate) async fn drain_carousel(
    ctx: &SourceContext<'_>,
    page: &dyn PostPage,
    spec: CarouselSpec,
    name: &str,
    timestamp: DateTime<Local>,
) -> Result<ImageMap> {
    let image_count = page.count(spec.clickable).await?;
    tracing::info!("Found {image_count} clickable images");
    if image_count == 0 {
        return Ok(ImageMap::new());
    }

    let collector = Arc::new(ImageCollector::new());
    let wants = Arc::clone(&spec.wants);
    let filter: Arc<dyn Fn(&str) -> bool + Send + Sync> = Arc::new(move |url: &str| {
        wants(url) && IMAGE_URL_RE.is_match(&url.to_lowercase())
    });
    let mut responses = page.responses(filter).await?;

    let listener = {
        let collector = Arc::clone(&collector);
        let downloader = ctx.downloader.clone();
        let name = name.to_string();
        let image_id = spec.image_id;
        tokio::spawn(async move {
            while let Some(response) = responses.next().await {
                let Some(id) = image_id(&response.url) else {
                    continue;
                };
                if collector.contains(&id) {
                    tracing::debug!("Already saved {id}, skipping");
                    continue;
                }
                if let Some(existing) = downloader.existing(&id) {
                    tracing::info!("Already saved {id}, skipping");
                    collector.record(&id, &existing);
                    continue;
                }
                if response.body.is_empty() {
                    tracing::warn!("Ignoring zero-size buffer for {id}");
                    continue;
                }
                match downloader
                    .save(&format!("{name}-{id}"), &response.body, timestamp)
                    .await
                {
                    Ok(file) => {
                        collector.record(&id, &file);
                    }
                    Err(e) => tracing::error!("Failed to save image from {}: {e}", response.url),
                }
            }
        })
    };

    let stepped = step_carousel(ctx, page, &spec, image_count).await;
    if stepped.is_ok() {
        ctx.pacing.jitter().await;
        if !collector.wait_for(image_count, ctx.image_wait_timeout).await {
            tracing::warn!(
                "Captured {}/{image_count} images before timing out",
                collector.len()
            );
        }
    }
    listener.abort();
    stepped?;
    Ok(collector.snapshot())
}

async fn step_carousel(
    ctx: &SourceContext<'_>,
    page: &dyn PostPage,
    spec: &CarouselSpec,
    image_count: usize,
) -> Result<()> {
    tracing::info!("Downloading {image_count} images from the carousel");
    page.click(spec.clickable, 0).await?;
    page.wait_for(spec.big_image, ElementState::Attached, ctx.wait_timeout)
        .await?;
    if spec.hover_first {
        page.hover(spec.big_image).await?;
    }
    if page.count(spec.next_button).await? == 0 {
        tracing::info!("Only 1 image");
        return Ok(());
    }
    for i in 1..image_count {
        tracing::debug!("Waiting for image {}/{image_count} to load", i + 1);
        page.wait_for_image(spec.big_image).await?;
        page.hover(spec.big_image).await?;
        page.click(spec.next_button, 0).await?;
        ctx.pacing.step().await;
    }
    Ok(())
}
