use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};

use super::{
    CarouselSpec, PostSource, SourceContext, drain_carousel, feed_path_ends_with,
    save_linked_images,
};
use crate::browser::{ElementState, PostPage};
use crate::date::parse_date_line;
use crate::error::Result;
use crate::post::ImageMap;
use crate::site::Site;

/// Transformation string the CDN uses for full-size images.
const FULL_SIZE_MARKER: &str = "f_auto,q_auto:good,fl_progressive:steep";

/// How long to wait for the feed loader after scrolling to the bottom.
const LOADER_APPEAR_TIMEOUT: Duration = Duration::from_secs(1);

/// Asset id of a CDN image URL: the last encoded path component, minus
/// extension.
fn image_id(url: &str) -> Option<String> {
    let last = url.rsplit('/').next()?;
    let inner = last.rsplit("%2F").next()?;
    let id = inner.split('.').next()?;
    (!id.is_empty()).then(|| id.to_string())
}

pub struct SubstackSource;

#[async_trait]
impl PostSource for SubstackSource {
    fn site(&self) -> Site {
        Site::Substack
    }

    fn is_feed_url(&self, url: &str) -> bool {
        feed_path_ends_with(url, "/archive")
    }

    fn accumulating_feed(&self) -> bool {
        true
    }

    async fn publish_date(&self, page: &dyn PostPage) -> Result<DateTime<Local>> {
        let header = page.inner_text(self.selectors().date).await?.unwrap_or_default();
        Ok(parse_date_line(&header))
    }

    async fn save_images(
        &self,
        ctx: &SourceContext<'_>,
        page: &dyn PostPage,
        name: &str,
        timestamp: DateTime<Local>,
    ) -> Result<ImageMap> {
        let sel = self.selectors();
        let mut images = ImageMap::new();

        if let (Some(clickable), Some(big_image), Some(next_button)) =
            (sel.images_clickable, sel.big_image, sel.next_image_button)
        {
            let spec = CarouselSpec {
                clickable,
                big_image,
                next_button,
                wants: Arc::new(|url: &str| url.contains(FULL_SIZE_MARKER)),
                image_id,
                hover_first: true,
            };
            images = drain_carousel(ctx, page, spec, name, timestamp).await?;
        }

        if let Some(anchor) = sel.image_anchor {
            let pairs = page
                .links(anchor)
                .await?
                .into_iter()
                .filter_map(|link| Some((image_id(&link.href)?, link.href)))
                .collect();
            for (id, file) in save_linked_images(ctx, page, pairs, name, timestamp)
                .await?
                .iter()
            {
                images.insert(id, file);
            }
        }
        Ok(images)
    }

    async fn load_more(&self, ctx: &SourceContext<'_>, page: &dyn PostPage) -> Result<bool> {
        tracing::info!("Loading more pages");
        page.scroll_to_bottom().await?;
        let loader = self.selectors().loader;
        if page
            .wait_for(loader, ElementState::Attached, LOADER_APPEAR_TIMEOUT)
            .await
            .is_err()
        {
            tracing::info!("No loader found.");
            return Ok(true);
        }
        page.wait_for(loader, ElementState::Detached, ctx.wait_timeout)
            .await?;
        tracing::info!("Loaded next page");
        Ok(true)
    }
}
