//! Content rewriter: turns a post's raw body HTML into archive-ready HTML.
//!
//! Rewriting is a pure function of its inputs. Passes implement the
//! [`RewritePass`] trait and are composed into a [`RewritePipeline`] per
//! site:
//!
//! - [`SelectorPass`] -- CSS-selector-driven element edits (boilerplate
//!   removal, heading flattening, list-marker guarding, video removal).
//! - [`HoistLinkedImages`] -- promotes an enclosing link's target to the
//!   image source.
//! - [`EmbedAttachments`] -- inlines saved attachments as `<video>`/`<img>`.
//! - [`SubstituteImages`] -- points `<img>` tags at saved files, draining the
//!   image map. Runs last for every site.

mod media;
mod selector;

pub use media::{EmbedAttachments, HoistLinkedImages, SubstituteImages};
pub use selector::{Edit, EditSet, SelectorAction, SelectorPass, serialize};

use crate::post::ImageMap;
use crate::site::Site;

/// Mutable state threaded through a pipeline run: the run's own copy of the
/// image map and the attachment filenames saved for the post.
#[derive(Clone, Debug, Default)]
pub struct RewriteContext {
    pub images: ImageMap,
    pub attachments: Vec<String>,
}

/// A single HTML-to-HTML transformation step.
pub trait RewritePass: Send + Sync {
    fn apply(&self, html: &str, ctx: &mut RewriteContext) -> String;
}

/// An ordered chain of [`RewritePass`] implementations applied sequentially.
///
/// Each pass receives the output of the previous one. An empty pipeline is a
/// no-op.
pub struct RewritePipeline {
    passes: Vec<Box<dyn RewritePass>>,
}

impl RewritePipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// The passes that apply to posts from `site`, ending with image
    /// substitution.
    pub fn for_site(site: Site) -> Self {
        let mut pipeline = Self::new();
        match site {
            Site::Substack => {
                pipeline.add(SelectorPass::new(vec![
                    (".subscription-widget-wrap", SelectorAction::RemoveElement),
                    ("h2.header-anchor-post", SelectorAction::FlattenText),
                    ("p span", SelectorAction::GuardListMarker),
                ]));
            }
            Site::Fanbox => {
                pipeline.add(SelectorPass::new(vec![("video", SelectorAction::RemoveElement)]));
            }
            Site::Patreon => {}
        }
        if matches!(site, Site::Substack | Site::Fanbox) {
            pipeline.add(HoistLinkedImages);
            pipeline.add(EmbedAttachments);
        }
        pipeline.add(SubstituteImages);
        pipeline
    }

    /// Append a pass to the end of the pipeline.
    pub fn add(&mut self, pass: impl RewritePass + 'static) {
        self.passes.push(Box::new(pass));
    }

    /// Run every pass in order.
    pub fn run(&self, html: &str, ctx: &mut RewriteContext) -> String {
        self.passes
            .iter()
            .fold(html.to_string(), |acc, pass| pass.apply(&acc, ctx))
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

impl Default for RewritePipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Output of [`rewrite`].
#[derive(Clone, Debug, PartialEq)]
pub struct Rewritten {
    pub html: String,
    /// Image ids no `<img>` claimed, with their saved filenames.
    pub unclaimed: ImageMap,
}

/// Rewrite `html` for `site`, substituting saved filenames from `images` and
/// inlining `attachments`. The caller's map is left untouched.
pub fn rewrite(html: &str, images: &ImageMap, site: Site, attachments: &[String]) -> Rewritten {
    let mut ctx = RewriteContext {
        images: images.clone(),
        attachments: attachments.to_vec(),
    };
    let html = RewritePipeline::for_site(site).run(html, &mut ctx);
    Rewritten {
        html,
        unclaimed: ctx.images,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> ImageMap {
        entries.iter().copied().collect()
    }

    // ── hoisting ────────────────────────────────────────────────────

    #[test]
    fn linked_image_is_hoisted_for_hoisting_sites() {
        for site in [Site::Fanbox, Site::Substack] {
            let out = rewrite(r#"<a href="x"><img src="y"></a>"#, &ImageMap::new(), site, &[]);
            assert_eq!(out.html, r#"<img src="x">"#, "{site}");
            assert!(!out.html.contains("<a"));
        }
    }

    #[test]
    fn patreon_keeps_links_around_images() {
        let out = rewrite(r#"<a href="x"><img src="y"></a>"#, &ImageMap::new(), Site::Patreon, &[]);
        assert_eq!(out.html, r#"<a href="x"><img src="y"></a>"#);
    }

    #[test]
    fn hoisted_href_is_substituted() {
        let images = map(&[("abcdef", "post-1.png")]);
        let html = r#"<a href="https://downloads.fanbox.cc/images/post/1/abcdef.png"><img src="https://pixiv.pximg.net/c/1200x630/thumb.jpeg"></a>"#;
        let out = rewrite(html, &images, Site::Fanbox, &[]);
        assert_eq!(out.html, r#"<img src="post-1.png">"#);
        assert!(out.unclaimed.is_empty());
    }

    // ── site passes ─────────────────────────────────────────────────

    #[test]
    fn substack_cleanup() {
        let html = concat!(
            r##"<h2 class="header-anchor-post">Intro<div class="pencraft"><a href="#intro">#</a></div></h2>"##,
            r#"<p><span>2.</span> second point</p>"#,
            r#"<div class="subscription-widget-wrap"><p>Subscribe now</p></div>"#,
        );
        let out = rewrite(html, &ImageMap::new(), Site::Substack, &[]);
        assert!(!out.html.contains("Subscribe now"));
        assert!(out.html.contains(r#"<h2 class="header-anchor-post">Intro#</h2>"#));
        assert!(out.html.contains("<span>\u{200B}2.</span>"));
    }

    #[test]
    fn fanbox_drops_video_but_embeds_attachment() {
        let html = concat!(
            r#"<video src="blob:xyz"></video>"#,
            r#"<a href="https://downloads.fanbox.cc/files/post/1/movie.mp4" download="movie.mp4">movie</a>"#,
        );
        let out = rewrite(html, &ImageMap::new(), Site::Fanbox, &["movie.mp4".to_string()]);
        assert!(!out.html.contains("blob:xyz"));
        assert!(out.html.contains(r#"<source type="video/mp4" src="movie.mp4">"#));
    }

    #[test]
    fn patreon_ignores_site_specific_markup() {
        let html = r#"<div class="subscription-widget-wrap">keep</div><video></video>"#;
        let out = rewrite(html, &ImageMap::new(), Site::Patreon, &[]);
        assert_eq!(out.html, html);
    }

    // ── image map ───────────────────────────────────────────────────

    #[test]
    fn second_pass_with_drained_map_changes_nothing() {
        let images = map(&[("abc", "post-abc.png"), ("def", "post-def.png")]);
        let html = r#"<p><img src="https://cdn/abc.png"><img src="https://cdn/def.png"></p>"#;

        let first = rewrite(html, &images, Site::Patreon, &[]);
        assert!(first.unclaimed.is_empty());
        assert!(first.html.contains(r#"src="post-abc.png""#));
        assert!(first.html.contains(r#"src="post-def.png""#));

        let second = rewrite(&first.html, &first.unclaimed, Site::Patreon, &[]);
        assert_eq!(second.html, first.html);
        assert!(second.unclaimed.is_empty());
    }

    #[test]
    fn unclaimed_images_are_reported_and_input_untouched() {
        let images = map(&[("abc", "post-abc.png"), ("gallery", "post-gallery.png")]);
        let out = rewrite(r#"<img src="https://cdn/abc.png">"#, &images, Site::Patreon, &[]);
        assert_eq!(out.unclaimed, map(&[("gallery", "post-gallery.png")]));
        assert_eq!(images.len(), 2);
    }

    #[test]
    fn pipeline_default_is_empty() {
        assert!(RewritePipeline::default().is_empty());
        assert!(!RewritePipeline::for_site(Site::Patreon).is_empty());
    }
}
