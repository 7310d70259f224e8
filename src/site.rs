//! Supported site variants and their static DOM configuration.

use std::fmt;

use url::Url;

use crate::error::{ArchiverError, Result};

/// One of the supported creator platforms. Chosen once from the target URL
/// and fixed for the lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Site {
    Patreon,
    Fanbox,
    Substack,
}

impl Site {
    /// Resolve the site variant from a feed or post URL.
    pub fn detect(url: &str) -> Result<Self> {
        let parsed = Url::parse(url)?;
        let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
        if host == "patreon.com" || host.ends_with(".patreon.com") {
            Ok(Self::Patreon)
        } else if host == "fanbox.cc" || host.ends_with(".fanbox.cc") {
            Ok(Self::Fanbox)
        } else if host == "substack.com" || host.ends_with(".substack.com") {
            Ok(Self::Substack)
        } else {
            Err(ArchiverError::UnsupportedSite(url.to_string()))
        }
    }

    /// Key used for the per-site cache directory and the login flag file.
    pub fn key(self) -> &'static str {
        match self {
            Self::Patreon => "patreon",
            Self::Fanbox => "pixivFanbox",
            Self::Substack => "substack",
        }
    }

    pub fn login_url(self) -> &'static str {
        match self {
            Self::Patreon => "https://www.patreon.com/login",
            Self::Fanbox => "https://accounts.pixiv.net/login",
            Self::Substack => "https://substack.com/sign-in",
        }
    }

    /// Substrings identifying the site's own asset hosts. Asset requests to
    /// any other host bypass the cache.
    pub fn asset_domains(self) -> &'static [&'static str] {
        match self {
            Self::Patreon | Self::Fanbox => &["fanbox", "patreon", "pximg", "pixiv"],
            Self::Substack => &["substack"],
        }
    }

    pub fn selectors(self) -> &'static SelectorSet {
        match self {
            Self::Patreon => &PATREON,
            Self::Fanbox => &FANBOX,
            Self::Substack => &SUBSTACK,
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Static CSS selectors for one site variant. Optional entries are `None`
/// when the site has no such element.
#[derive(Debug)]
pub struct SelectorSet {
    pub post_urls: &'static str,
    pub loader: &'static str,
    pub content_title: &'static str,
    pub content_block: &'static str,
    pub date: &'static str,
    pub tags: Option<&'static str>,
    pub subtitle: Option<&'static str>,
    pub locked: Option<&'static str>,
    pub no_cards: Option<&'static str>,
    pub attachments: Option<&'static str>,
    pub images_clickable: Option<&'static str>,
    pub image_anchor: Option<&'static str>,
    pub big_image: Option<&'static str>,
    pub next_image_button: Option<&'static str>,
    pub next_page: Option<&'static str>,
    pub filter_header: Option<&'static str>,
    pub filter_button: Option<&'static str>,
    pub only_unlocked_filter: Option<&'static str>,
    pub year_filter: Option<&'static str>,
    pub apply_button: Option<&'static str>,
    /// Markers of an anti-automation challenge page.
    pub challenge: &'static str,
}

const CHALLENGE_MARKERS: &str = ".ray-id, ._challenge_basic_security";

pub static PATREON: SelectorSet = SelectorSet {
    post_urls: r#"[data-tag="post-title"] > a"#,
    loader: r#"[aria-label="loading more posts"]"#,
    content_title: r#"[data-tag="post-card"] [data-tag="post-title"]"#,
    content_block: r#"*:has(> * > [data-tag="post-details"]) > div:nth-of-type(1) > div:nth-of-type(2)"#,
    date: r#"[data-tag="post-card"] *:has(> * > [data-tag="post-details"]) > div:nth-of-type(1) > div:nth-of-type(1) > div:nth-of-type(2) p"#,
    tags: Some(r#"[data-tag="post-tag"]"#),
    subtitle: None,
    locked: None,
    no_cards: Some(r#"[data-tag="stream-empty-card"]"#),
    attachments: Some(r#"[data-tag="post-attachment-link"]"#),
    images_clickable: Some(
        r#"[data-tag="post-card"] .image-grid > img, [data-tag="post-card"] .image-carousel > img"#,
    ),
    image_anchor: None,
    big_image: Some(r#"[data-tag="lightboxImage"]"#),
    next_image_button: Some(r#"[data-tag="nextImage"]"#),
    next_page: None,
    filter_header: Some(r#"[data-tag="filter-dialog-modal-title"]"#),
    filter_button: Some(r#"[data-tag="post-feed-consolidated-filters-toggle"]"#),
    only_unlocked_filter: Some(r#"input[value="UNLOCKED_POSTS_ONLY"]"#),
    year_filter: Some(r#"fieldset[name="consolidated-date-filter"] p"#),
    apply_button: Some(r#"[data-tag="dialog-action-primary"]"#),
    challenge: CHALLENGE_MARKERS,
};

pub static FANBOX: SelectorSet = SelectorSet {
    post_urls: r#"[class^="CreatorPostItem__Wrapper"], [class^="CardPostItem__Wrapper"]"#,
    loader: r#"[class^="CreatorPostItem__DummyWrapper"], [class^="ProgressBar__StyledLoadingBar"]"#,
    content_title: r#"[class^="styled__PostTitle"]"#,
    content_block: r#"[class^="Body__PostBodyText"], [class^="styled__EditorWrapper"]"#,
    date: r#"[class^="styled__PostHeadBottom"]"#,
    tags: Some(r#"[class^="TagList__Wrapper"]"#),
    subtitle: None,
    locked: Some(r#"[class^="FeeRequiredSign"]"#),
    no_cards: None,
    attachments: Some(r#"[class^="FileContent__DownloadLink"]"#),
    images_clickable: None,
    image_anchor: Some(r#"[class^="PostImage__Anchor"]"#),
    big_image: None,
    next_image_button: None,
    next_page: Some(r#"[class^="Pagination__SelectedItemWrapper"] + a"#),
    filter_header: None,
    filter_button: None,
    only_unlocked_filter: None,
    year_filter: None,
    apply_button: None,
    challenge: CHALLENGE_MARKERS,
};

pub static SUBSTACK: SelectorSet = SelectorSet {
    post_urls: r#"[data-testid="post-preview-title"]"#,
    loader: r#"[class^="loadingContainerList"]"#,
    content_title: ".post-title",
    content_block: ".available-content",
    date: ".post-header",
    tags: None,
    subtitle: Some(".subtitle"),
    locked: None,
    no_cards: None,
    attachments: None,
    images_clickable: Some(".image-link.is-viewable-img"),
    image_anchor: Some(".image-link:not(.is-viewable-img)"),
    big_image: Some(r#"[class^="imgContainer"] img"#),
    next_image_button: Some(r#"[class*="modalImageSidebar"] button"#),
    next_page: None,
    filter_header: None,
    filter_button: None,
    only_unlocked_filter: None,
    year_filter: None,
    apply_button: None,
    challenge: CHALLENGE_MARKERS,
};

/// Strip query and fragment, keeping `origin + pathname`.
pub fn strip_query(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

/// Resolve a possibly-relative post href against the feed's origin.
pub fn absolutize(base: &str, href: &str) -> Result<String> {
    let base = Url::parse(base)?;
    Ok(base.join(href)?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_each_site() {
        assert_eq!(
            Site::detect("https://www.patreon.com/c/someone/posts").unwrap(),
            Site::Patreon
        );
        assert_eq!(
            Site::detect("https://creator.fanbox.cc/posts/123").unwrap(),
            Site::Fanbox
        );
        assert_eq!(
            Site::detect("https://writer.substack.com/archive").unwrap(),
            Site::Substack
        );
    }

    #[test]
    fn unknown_host_is_unsupported() {
        let err = Site::detect("https://example.org/posts").unwrap_err();
        assert!(matches!(err, ArchiverError::UnsupportedSite(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn lookalike_host_is_rejected() {
        assert!(Site::detect("https://notpatreon.com.evil.io/posts").is_err());
    }

    #[test]
    fn strip_query_drops_query_and_fragment() {
        assert_eq!(
            strip_query("https://www.patreon.com/c/a/posts?filters=1#top"),
            "https://www.patreon.com/c/a/posts"
        );
    }

    #[test]
    fn absolutize_resolves_relative_hrefs() {
        assert_eq!(
            absolutize("https://www.patreon.com/c/a/posts", "/posts/hello-42").unwrap(),
            "https://www.patreon.com/posts/hello-42"
        );
        assert_eq!(
            absolutize("https://www.patreon.com/c/a/posts", "https://x.fanbox.cc/posts/1").unwrap(),
            "https://x.fanbox.cc/posts/1"
        );
    }
}
