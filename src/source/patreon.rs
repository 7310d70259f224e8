use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};

use super::{
    CarouselSpec, FilterOutcome, PostSource, SourceContext, drain_carousel, feed_path_ends_with,
    save_linked_images, wait_for_loader, wait_for_posts,
};
use crate::browser::PostPage;
use crate::date::parse_date;
use crate::error::{ArchiverError, Result};
use crate::post::ImageMap;
use crate::site::{Site, strip_query};

/// Marker present in the URL of full-size post images.
const FULL_SIZE_MARKER: &str = "eyJxIjoxMDAsIndlYnAiOjB9";

/// Asset id of a Patreon image URL: the third path segment from the end.
fn image_id(url: &str) -> Option<String> {
    let path = strip_query(url);
    let segments: Vec<&str> = path.split('/').collect();
    let idx = segments.len().checked_sub(3)?;
    let id = segments[idx];
    (!id.is_empty()).then(|| id.to_string())
}

/// Numeric post id: the trailing `-<id>` of the post slug.
fn post_id(name: &str) -> &str {
    name.rsplit('-').next().unwrap_or(name)
}

fn require(selector: Option<&'static str>, what: &str) -> Result<&'static str> {
    selector.ok_or_else(|| ArchiverError::Config(format!("patreon has no {what} selector")))
}

pub struct PatreonSource;

#[async_trait]
impl PostSource for PatreonSource {
    fn site(&self) -> Site {
        Site::Patreon
    }

    fn is_feed_url(&self, url: &str) -> bool {
        feed_path_ends_with(url, "/posts")
    }

    fn requires_year(&self) -> bool {
        true
    }

    fn accumulating_feed(&self) -> bool {
        true
    }

    async fn apply_filter(
        &self,
        ctx: &SourceContext<'_>,
        page: &dyn PostPage,
        year: Option<&str>,
    ) -> Result<FilterOutcome> {
        let Some(year) = year.filter(|y| !y.is_empty()) else {
            return Err(ArchiverError::MissingYear(page.current_url().await?));
        };
        let sel = self.selectors();
        tracing::info!("Applying filter by year {year}");

        if page.count(require(sel.filter_header, "filter header")?).await? == 0 {
            page.click(require(sel.filter_button, "filter button")?, 0).await?;
            tracing::info!("Opened filter modal");
        } else {
            tracing::info!("Filter modal already open");
        }

        let year_option = require(sel.year_filter, "year filter")?;
        let pattern = format!(r"^{} \(\d+\)$", regex::escape(year));
        if !page.click_matching(year_option, &pattern).await? {
            return Err(ArchiverError::ElementNotFound(format!(
                "year option {year} in {year_option}"
            )));
        }
        tracing::info!("Selected {year} year");
        ctx.pacing.step().await;

        page.click(require(sel.only_unlocked_filter, "unlocked filter")?, 0)
            .await?;
        tracing::info!("Selected only accessible");
        ctx.pacing.step().await;

        page.click(require(sel.apply_button, "apply button")?, 0).await?;
        tracing::info!("Applied");

        wait_for_posts(ctx, page, sel).await
    }

    async fn post_name(&self, page: &dyn PostPage) -> Result<String> {
        let url = page.current_url().await?;
        let path = url::Url::parse(&url)
            .map(|u| u.path().to_string())
            .unwrap_or(url);
        Ok(path
            .trim_start_matches('/')
            .trim_start_matches("posts/")
            .trim_end_matches('/')
            .to_string())
    }

    async fn tags(&self, page: &dyn PostPage) -> Result<Vec<String>> {
        match self.selectors().tags {
            Some(selector) => page.inner_texts(selector).await,
            None => Ok(Vec::new()),
        }
    }

    async fn publish_date(&self, page: &dyn PostPage) -> Result<DateTime<Local>> {
        let raw = page.inner_text(self.selectors().date).await?.unwrap_or_default();
        tracing::debug!("Raw date str: {raw}");
        Ok(parse_date(&raw))
    }

    async fn save_images(
        &self,
        ctx: &SourceContext<'_>,
        page: &dyn PostPage,
        name: &str,
        timestamp: DateTime<Local>,
    ) -> Result<ImageMap> {
        let sel = self.selectors();
        let id = post_id(name).to_string();

        let static_urls: Vec<String> = page
            .attributes(&format!("{} img", sel.content_block), "src")
            .await?
            .into_iter()
            .filter(|src| src.contains(&id))
            .collect();
        tracing::info!("Found {} static images", static_urls.len());
        let pairs = static_urls
            .into_iter()
            .filter_map(|url| Some((image_id(&url)?, url)))
            .collect();
        let mut images = save_linked_images(ctx, page, pairs, name, timestamp).await?;

        if let (Some(clickable), Some(big_image), Some(next_button)) =
            (sel.images_clickable, sel.big_image, sel.next_image_button)
        {
            let wanted_id = id.clone();
            let spec = CarouselSpec {
                clickable,
                big_image,
                next_button,
                wants: Arc::new(move |url: &str| {
                    url.contains(FULL_SIZE_MARKER) && url.contains(&wanted_id)
                }),
                image_id,
                hover_first: false,
            };
            for (image, file) in drain_carousel(ctx, page, spec, name, timestamp).await?.iter() {
                images.insert(image, file);
            }
        }
        Ok(images)
    }

    async fn load_more(&self, ctx: &SourceContext<'_>, page: &dyn PostPage) -> Result<bool> {
        tracing::info!("Loading more pages");
        if !page.click_matching("button", "^Load more$").await? {
            tracing::info!("No next button found");
            return Ok(false);
        }
        wait_for_loader(ctx, page, self.selectors().loader).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_id_is_third_segment_from_end() {
        let url = "https://c10.patreonusercontent.com/4/patreon-media/p/post/123/abcdef0123/eyJxIjoxMDAsIndlYnAiOjB9/1.jpg?token-time=1";
        assert_eq!(image_id(url).as_deref(), Some("abcdef0123"));
        assert_eq!(image_id("a.jpg"), None);
    }

    #[test]
    fn post_id_is_trailing_number() {
        assert_eq!(post_id("my-great-post-98765"), "98765");
        assert_eq!(post_id("98765"), "98765");
    }

    #[test]
    fn feed_urls() {
        let source = PatreonSource;
        assert!(source.is_feed_url("https://www.patreon.com/c/artist/posts"));
        assert!(source.is_feed_url("https://www.patreon.com/c/artist/posts?filters%5Bmonth%5D=2024-1"));
        assert!(!source.is_feed_url("https://www.patreon.com/posts/title-123"));
    }
}
