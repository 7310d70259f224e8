use async_trait::async_trait;
use chrono::{DateTime, Local};

use super::{
    PostSource, SourceContext, feed_path_ends_with, last_path_segment, save_linked_images,
    wait_for_loader,
};
use crate::browser::PostPage;
use crate::date::parse_ordinal_date;
use crate::error::Result;
use crate::post::ImageMap;
use crate::site::Site;

/// Asset id of a full-size image link: its file stem.
fn image_id(href: &str) -> Option<String> {
    let file = last_path_segment(href);
    let stem = file.split('.').next().unwrap_or_default();
    (!stem.is_empty()).then(|| stem.to_string())
}

pub struct FanboxSource;

#[async_trait]
impl PostSource for FanboxSource {
    fn site(&self) -> Site {
        Site::Fanbox
    }

    fn is_feed_url(&self, url: &str) -> bool {
        feed_path_ends_with(url, "/posts")
    }

    async fn tags(&self, page: &dyn PostPage) -> Result<Vec<String>> {
        let Some(selector) = self.selectors().tags else {
            return Ok(Vec::new());
        };
        if page.count(selector).await? == 0 {
            return Ok(Vec::new());
        }
        Ok(page
            .inner_text(selector)
            .await?
            .unwrap_or_default()
            .lines()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn publish_date(&self, page: &dyn PostPage) -> Result<DateTime<Local>> {
        match page.inner_text(self.selectors().date).await? {
            Some(raw) if !raw.trim().is_empty() => Ok(parse_ordinal_date(&raw)),
            _ => Ok(Local::now()),
        }
    }

    fn attachment_name(&self, href: &str, text: &str) -> String {
        let from_href = last_path_segment(href);
        if from_href.is_empty() {
            text.trim().replace(char::is_whitespace, "-")
        } else {
            from_href
        }
    }

    async fn save_images(
        &self,
        ctx: &SourceContext<'_>,
        page: &dyn PostPage,
        name: &str,
        timestamp: DateTime<Local>,
    ) -> Result<ImageMap> {
        let Some(anchor) = self.selectors().image_anchor else {
            return Ok(ImageMap::new());
        };
        let pairs = page
            .links(anchor)
            .await?
            .into_iter()
            .filter_map(|link| Some((image_id(&link.href)?, link.href)))
            .collect();
        save_linked_images(ctx, page, pairs, name, timestamp).await
    }

    async fn load_more(&self, ctx: &SourceContext<'_>, page: &dyn PostPage) -> Result<bool> {
        tracing::info!("Loading more pages");
        let Some(next_page) = self.selectors().next_page else {
            return Ok(false);
        };
        if page.count(next_page).await? == 0 {
            tracing::info!("No next button found");
            return Ok(false);
        }
        page.scroll_into_view(next_page).await?;
        page.click(next_page, 0).await?;
        wait_for_loader(ctx, page, self.selectors().loader).await?;
        Ok(true)
    }
}
