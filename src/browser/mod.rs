//! Capability surface of the automated browser.
//!
//! The archiver never talks to a concrete automation library directly. It
//! consumes the traits in this module: a [`BrowserSession`] that owns cookies
//! and request interception, and [`PostPage`] tabs that navigate, query the
//! DOM by CSS selector, click, and stream captured responses.
//!
//! With the `chromium` feature (default) [`chromium::ChromiumLauncher`]
//! provides an implementation backed by a real Chrome instance.

#[cfg(feature = "chromium")]
pub mod chromium;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Whether [`PostPage::wait_for`] waits for an element to appear or to vanish.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementState {
    Attached,
    Detached,
}

/// An anchor read from the page: resolved `href` plus its visible text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub href: String,
    pub text: String,
}

/// A response body captured by a [`PostPage::responses`] subscription.
#[derive(Clone, Debug)]
pub struct CapturedResponse {
    pub url: String,
    pub body: Vec<u8>,
}

/// A session cookie as persisted to `cookies.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

/// An outgoing network request paused by the browser.
#[derive(Clone, Debug)]
pub struct InterceptedRequest {
    pub url: String,
    /// URL of the top-level document that issued the request.
    pub top_url: String,
}

/// A synthetic or fetched response handed back to the browser.
#[derive(Clone, Debug, PartialEq)]
pub struct Fulfillment {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Arc<[u8]>,
}

/// What the browser should do with an intercepted request.
#[derive(Clone, Debug, PartialEq)]
pub enum InterceptOutcome {
    Abort,
    Continue,
    Fulfill(Fulfillment),
}

/// Decides the fate of every request the browser issues.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: InterceptedRequest) -> InterceptOutcome;
}

/// One live browser session (a persistent context).
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Open a new tab. Interception installed on the session applies to it.
    async fn new_page(&self) -> Result<Arc<dyn PostPage>>;

    /// Route every request of current and future tabs through `handler`.
    async fn intercept(&self, handler: Arc<dyn RequestHandler>) -> Result<()>;

    async fn cookies(&self) -> Result<Vec<StoredCookie>>;

    async fn add_cookies(&self, cookies: &[StoredCookie]) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Starts browser sessions. The recovery loop launches a fresh session per
/// attempt.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>>;
}

/// A single browser tab.
///
/// Selector-taking methods operate on CSS selectors; where a method reads a
/// single element it uses the first match.
#[async_trait]
pub trait PostPage: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    /// Wait until the DOM content of the current document has loaded.
    async fn wait_for_load(&self) -> Result<()>;

    async fn count(&self, selector: &str) -> Result<usize>;

    async fn wait_for(&self, selector: &str, state: ElementState, timeout: Duration) -> Result<()>;

    async fn inner_text(&self, selector: &str) -> Result<Option<String>>;

    async fn inner_texts(&self, selector: &str) -> Result<Vec<String>>;

    async fn inner_html(&self, selector: &str) -> Result<Option<String>>;

    /// Raw attribute values of every match (elements without the attribute
    /// are skipped).
    async fn attributes(&self, selector: &str, name: &str) -> Result<Vec<String>>;

    /// Resolved `href` and visible text of every matching anchor.
    async fn links(&self, selector: &str) -> Result<Vec<Link>>;

    async fn click(&self, selector: &str, nth: usize) -> Result<()>;

    /// Click the first match whose text matches `text_pattern`. Returns
    /// `false` when nothing matched.
    async fn click_matching(&self, selector: &str, text_pattern: &str) -> Result<bool>;

    async fn hover(&self, selector: &str) -> Result<()>;

    async fn scroll_by(&self, dy: i64) -> Result<()>;

    async fn scroll_into_view(&self, selector: &str) -> Result<()>;

    /// Scroll to the bottom in small, irregular steps.
    async fn scroll_to_bottom(&self) -> Result<()>;

    /// Viewport size in CSS pixels.
    async fn viewport(&self) -> Result<(u32, u32)>;

    async fn move_mouse(&self, x: f64, y: f64) -> Result<()>;

    /// Resolve once the first `<img>` matching `selector` has finished
    /// loading (or failed), or immediately when there is none.
    async fn wait_for_image(&self, selector: &str) -> Result<()>;

    /// Fetch `url` from inside the page so the session's cookies apply.
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;

    /// Stream every response whose URL satisfies `filter`, with its body.
    /// Dropping the stream unsubscribes.
    async fn responses(
        &self,
        filter: Arc<dyn for<'a> Fn(&'a str) -> bool + Send + Sync>,
    ) -> Result<BoxStream<'static, CapturedResponse>>;

    async fn close(&self) -> Result<()>;
}

/// Path helper shared by launchers: a directory counts only when it exists
/// and has at least one entry.
pub fn non_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
