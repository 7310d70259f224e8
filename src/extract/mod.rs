//! Extraction of a single open post into `<name>.md` and `<name>.json`.

pub mod markdown;

use std::path::PathBuf;

use chrono::{DateTime, Local};

use crate::assets::set_timestamp;
use crate::browser::{ElementState, PostPage};
use crate::error::Result;
use crate::post::PostRecord;
use crate::rewriter;
use crate::source::{PostSource, SourceContext};
use crate::storage::{FsStorage, Storage};

/// What happened to one post.
#[derive(Clone, Debug)]
pub enum Extraction {
    /// Markdown and sidecar are on disk.
    Saved(PostRecord),
    /// The post is paywalled; nothing was written.
    Locked,
}

/// Turns the post currently open in a page into files in the downloader's
/// output directory.
pub struct PostExtractor<'a> {
    source: &'a dyn PostSource,
    ctx: &'a SourceContext<'a>,
}

impl<'a> PostExtractor<'a> {
    pub fn new(source: &'a dyn PostSource, ctx: &'a SourceContext<'a>) -> Self {
        Self { source, ctx }
    }

    fn out_dir(&self) -> PathBuf {
        self.ctx.downloader.dir().to_path_buf()
    }

    pub async fn extract(&self, page: &dyn PostPage) -> Result<Extraction> {
        let source = self.source;
        let ctx = self.ctx;
        let selectors = source.selectors();

        page.wait_for(selectors.loader, ElementState::Detached, ctx.wait_timeout)
            .await?;
        if let Some(locked) = selectors.locked {
            if page.count(locked).await? > 0 {
                tracing::info!("Locked post, skipping");
                return Ok(Extraction::Locked);
            }
        }

        let url = page.current_url().await?;
        let name = source.post_name(page).await?;
        let tags = ctx.guard.run(page, move || source.tags(page)).await?;
        let timestamp = ctx
            .guard
            .run(page, move || source.publish_date(page))
            .await?;

        let attachments = self.save_attachments(page, timestamp).await?;
        let images = ctx
            .guard
            .run(page, || source.save_images(ctx, page, &name, timestamp))
            .await?;
        tracing::debug!("Resulting image map: {images:?}");

        let html = source.content_html(page).await?;
        let rewritten = rewriter::rewrite(&html, &images, source.site(), &attachments);
        let title = source.title(page).await?;
        let subtitle = source.subtitle(page).await?;

        let record = PostRecord {
            url,
            name,
            title,
            subtitle,
            tags,
            timestamp,
            attachments,
            images,
        };
        let body = markdown::html_to_markdown(&rewritten.html);
        self.write(&record, &body, &rewritten.unclaimed).await?;
        Ok(Extraction::Saved(record))
    }

    /// Download every attachment link not already present on disk. Returns
    /// the file names of all attachments, skipped ones included.
    async fn save_attachments(
        &self,
        page: &dyn PostPage,
        timestamp: DateTime<Local>,
    ) -> Result<Vec<String>> {
        let Some(selector) = self.source.selectors().attachments else {
            return Ok(Vec::new());
        };
        let links = page.links(selector).await?;
        if links.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!("Found {} attachments", links.len());

        let downloader = self.ctx.downloader;
        let mut saved = Vec::with_capacity(links.len());
        for link in links {
            let file = self.source.attachment_name(&link.href, &link.text);
            if file.is_empty() {
                tracing::warn!("Attachment {} has no usable name, skipping", link.href);
                continue;
            }
            if let Some(existing) = downloader.existing(&file) {
                tracing::info!("File {existing} already exists, skipping");
                saved.push(existing);
                continue;
            }
            tracing::info!("Saving file {} to {file}", link.href);
            let bytes = downloader.fetch(page, &link.href).await?;
            saved.push(downloader.save(&file, &bytes, timestamp).await?);
        }
        Ok(saved)
    }

    async fn write(
        &self,
        record: &PostRecord,
        body: &str,
        gallery: &crate::post::ImageMap,
    ) -> Result<()> {
        let storage = FsStorage::new(self.out_dir());
        let md_key = format!("{}.md", record.name);
        let json_key = format!("{}.json", record.name);

        let markdown = markdown::render(record, body, gallery);
        storage
            .put(&md_key, markdown.as_bytes(), "text/markdown")
            .await?;
        let sidecar = serde_json::to_vec(&record.sidecar())?;
        storage.put(&json_key, &sidecar, "application/json").await?;

        set_timestamp(&storage.path_of(&md_key), record.timestamp);
        set_timestamp(&storage.path_of(&json_key), record.timestamp);
        tracing::info!("Saved post {}", record.name);
        Ok(())
    }
}
