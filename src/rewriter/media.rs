//! Passes that rewrite image and attachment references.

use ego_tree::NodeRef;
use scraper::node::Node;
use scraper::{Html, Selector};

use super::selector::{EditSet, Edit, img_with_src, push_escaped_attr, serialize};
use super::{RewriteContext, RewritePass};

fn select_all<'a>(document: &'a Html, css: &str) -> Vec<scraper::ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => document.select(&selector).collect(),
        Err(_) => {
            tracing::warn!("Invalid CSS selector: {css}");
            Vec::new()
        }
    }
}

/// Nearest `<a>` ancestor of `node`, if it carries an `href`.
fn linking_anchor<'a>(node: NodeRef<'a, Node>) -> Option<(NodeRef<'a, Node>, &'a str)> {
    let anchor = node
        .ancestors()
        .find(|n| matches!(n.value(), Node::Element(el) if el.name() == "a"))?;
    let href = anchor.value().as_element()?.attr("href")?;
    Some((anchor, href))
}

/// Replaces `<a href="full"><img src="thumb"></a>` with `<img src="full">`.
///
/// When several images share one anchor, the first one wins and the anchor
/// (with the rest of its content) is replaced by that image alone.
pub struct HoistLinkedImages;

impl RewritePass for HoistLinkedImages {
    fn apply(&self, html: &str, _ctx: &mut RewriteContext) -> String {
        let document = Html::parse_fragment(html);
        let mut edits = EditSet::new();

        for img in select_all(&document, "img") {
            let Some((anchor, href)) = linking_anchor(*img) else {
                continue;
            };
            if edits.is_replaced(anchor.id()) || anchor.ancestors().any(|a| edits.is_replaced(a.id())) {
                continue;
            }
            edits.push(anchor.id(), Edit::ReplaceWith(img_with_src(img.value(), href)));
        }

        if edits.is_empty() {
            html.to_string()
        } else {
            serialize(&document, &edits)
        }
    }
}

/// Turns download links to saved attachments into inline media: `.mp4`
/// becomes a `<video>` player, anything else an `<img>`.
pub struct EmbedAttachments;

impl EmbedAttachments {
    fn markup_for(href: &str, attachment: &str) -> String {
        let mut src = String::new();
        push_escaped_attr(attachment, &mut src);
        if href.ends_with(".mp4") {
            format!(r#"<video controls=""><source type="video/mp4" src="{src}"></video>"#)
        } else {
            format!(r#"<img alt="Attachment" src="{src}">"#)
        }
    }
}

impl RewritePass for EmbedAttachments {
    fn apply(&self, html: &str, ctx: &mut RewriteContext) -> String {
        if ctx.attachments.is_empty() {
            return html.to_string();
        }
        let document = Html::parse_fragment(html);
        let mut edits = EditSet::new();

        for anchor in select_all(&document, "a[href][download]") {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let Some(attachment) = ctx
                .attachments
                .iter()
                .find(|a| !a.is_empty() && href.contains(a.as_str()))
            else {
                continue;
            };
            tracing::debug!("Embedding attachment {attachment}");
            edits.push(anchor.id(), Edit::ReplaceWith(Self::markup_for(href, attachment)));
        }

        if edits.is_empty() {
            html.to_string()
        } else {
            serialize(&document, &edits)
        }
    }
}

/// Points every `<img>` at its saved file. Each id in the context's image
/// map is claimed by the first image whose `src` contains it and removed
/// from the map.
pub struct SubstituteImages;

impl RewritePass for SubstituteImages {
    fn apply(&self, html: &str, ctx: &mut RewriteContext) -> String {
        if ctx.images.is_empty() {
            return html.to_string();
        }
        let document = Html::parse_fragment(html);
        let mut edits = EditSet::new();

        for img in select_all(&document, "img[src]") {
            let Some(src) = img.value().attr("src") else {
                continue;
            };
            let Some(id) = ctx.images.find_in(src).map(str::to_string) else {
                continue;
            };
            if let Some(filename) = ctx.images.remove(&id) {
                edits.push(img.id(), Edit::SetAttr("src".to_string(), filename));
            }
        }

        if edits.is_empty() {
            html.to_string()
        } else {
            serialize(&document, &edits)
        }
    }
}
