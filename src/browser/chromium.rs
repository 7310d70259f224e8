//! Chrome-backed implementation of the browser capability traits, using
//! chromiumoxide over CDP.
//!
//! DOM operations are small scripts evaluated in the page. Request
//! interception uses the `Fetch` domain, response capture the `Network`
//! domain.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, AuthChallengeResponse, AuthChallengeResponseResponse, ContinueRequestParams,
    ContinueWithAuthParams, EventAuthRequired, EventRequestPaused, FailRequestParams,
    FulfillRequestParams, HeaderEntry, RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType,
};
use chromiumoxide::cdp::browser_protocol::network::{
    self, CookieParam, ErrorReason, EventLoadingFinished, EventResponseReceived,
    GetResponseBodyParams, TimeSinceEpoch,
};
use chromiumoxide::cdp::browser_protocol::page::EventFrameNavigated;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use super::{
    BrowserSession, CapturedResponse, ElementState, InterceptOutcome, InterceptedRequest, Link,
    PostPage, RequestHandler, SessionLauncher, StoredCookie, non_empty_dir,
};
use crate::error::{ArchiverError, Result};
use crate::fetcher::ProxyConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn browser_err(e: impl Display) -> ArchiverError {
    ArchiverError::Browser(e.to_string())
}

/// JSON-quote `s` for embedding in a script.
fn js(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// Launches a headful Chrome with a persistent profile.
#[derive(Clone, Debug)]
pub struct ChromiumLauncher {
    executable: Option<PathBuf>,
    profile_dir: PathBuf,
    extension_dir: PathBuf,
    proxy: Option<ProxyConfig>,
}

impl ChromiumLauncher {
    pub fn new(proxy: Option<ProxyConfig>) -> Self {
        Self {
            executable: None,
            profile_dir: PathBuf::from("./browser-profile"),
            extension_dir: PathBuf::from("./extensions/adblock"),
            proxy,
        }
    }

    /// Use this Chrome binary instead of auto-detection.
    pub fn executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    pub fn profile_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.profile_dir = path.into();
        self
    }

    /// Unpacked extension loaded when the directory is non-empty.
    pub fn extension_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.extension_dir = path.into();
        self
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--disable-features=ServiceWorker".to_string(),
            "--enable-features=WebRTC-H264WithOpenH264FFmpeg".to_string(),
            "--disable-blink-features=AutomationControlled".to_string(),
            "--no-first-run".to_string(),
            "--no-default-browser-check".to_string(),
        ];
        if non_empty_dir(&self.extension_dir) {
            let ext = self.extension_dir.display();
            args.push(format!("--disable-extensions-except={ext}"));
            args.push(format!("--load-extension={ext}"));
        }
        if let Some(proxy) = &self.proxy {
            args.push(format!("--proxy-server={}", proxy.server));
        }
        args
    }
}

#[async_trait]
impl SessionLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>> {
        if let Some(proxy) = &self.proxy {
            tracing::info!(
                "Provided proxy config: {}, user={}, password=<MASKED>",
                proxy.server,
                proxy.username.as_deref().unwrap_or_default()
            );
        }
        let mut builder = BrowserConfig::builder()
            .with_head()
            .viewport(None)
            .user_data_dir(&self.profile_dir)
            .args(self.args());
        if let Some(exe) = &self.executable {
            builder = builder.chrome_executable(exe);
        }
        let config = builder.build().map_err(ArchiverError::Browser)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(browser_err)?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("Browser handler error: {e}");
                }
            }
        });

        let credentials = self.proxy.as_ref().and_then(|p| {
            Some((p.username.clone()?, p.password.clone().unwrap_or_default()))
        });
        Ok(Arc::new(ChromiumSession {
            browser: tokio::sync::Mutex::new(browser),
            handler_task,
            interceptor: RwLock::new(None),
            pages: std::sync::Mutex::new(Vec::new()),
            credentials,
        }))
    }
}

/// A running Chrome instance.
pub struct ChromiumSession {
    browser: tokio::sync::Mutex<Browser>,
    handler_task: JoinHandle<()>,
    interceptor: RwLock<Option<Arc<dyn RequestHandler>>>,
    pages: std::sync::Mutex<Vec<Arc<ChromiumPage>>>,
    credentials: Option<(String, String)>,
}

impl ChromiumSession {
    fn handler(&self) -> Option<Arc<dyn RequestHandler>> {
        self.interceptor.read().ok().and_then(|h| h.clone())
    }

    fn open_pages(&self) -> Vec<Arc<ChromiumPage>> {
        self.pages.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn new_page(&self) -> Result<Arc<dyn PostPage>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(browser_err)?;
        let page = Arc::new(ChromiumPage::attach(page).await?);
        if self.handler().is_some() || self.credentials.is_some() {
            page.install_fetch(self.handler(), self.credentials.clone())
                .await?;
        }
        if let Ok(mut pages) = self.pages.lock() {
            pages.push(Arc::clone(&page));
        }
        Ok(page)
    }

    async fn intercept(&self, handler: Arc<dyn RequestHandler>) -> Result<()> {
        if let Ok(mut slot) = self.interceptor.write() {
            *slot = Some(Arc::clone(&handler));
        }
        for page in self.open_pages() {
            page.install_fetch(Some(Arc::clone(&handler)), self.credentials.clone())
                .await?;
        }
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<StoredCookie>> {
        let cookies = self
            .browser
            .lock()
            .await
            .get_cookies()
            .await
            .map_err(browser_err)?;
        Ok(cookies
            .into_iter()
            .map(|c| StoredCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                expires: (c.expires > 0.0).then_some(c.expires),
                http_only: c.http_only,
                secure: c.secure,
            })
            .collect())
    }

    async fn add_cookies(&self, cookies: &[StoredCookie]) -> Result<()> {
        let params: Vec<CookieParam> = cookies
            .iter()
            .map(|c| {
                let mut param = CookieParam::new(c.name.clone(), c.value.clone());
                param.domain = Some(c.domain.clone());
                param.path = Some(c.path.clone());
                param.expires = c.expires.map(TimeSinceEpoch::new);
                param.http_only = Some(c.http_only);
                param.secure = Some(c.secure);
                param
            })
            .collect();
        self.browser
            .lock()
            .await
            .set_cookies(params)
            .await
            .map_err(browser_err)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        for page in self.open_pages() {
            page.stop_tasks();
        }
        let mut browser = self.browser.lock().await;
        let closed = browser.close().await.map_err(browser_err);
        let _ = browser.wait().await;
        self.handler_task.abort();
        closed.map(|_| ())
    }
}

/// One Chrome tab.
pub struct ChromiumPage {
    page: Page,
    top_url: Arc<RwLock<String>>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ChromiumPage {
    async fn attach(page: Page) -> Result<Self> {
        let top_url = Arc::new(RwLock::new(String::new()));
        let mut navigations = page
            .event_listener::<EventFrameNavigated>()
            .await
            .map_err(browser_err)?;
        let tracked = Arc::clone(&top_url);
        let nav_task = tokio::spawn(async move {
            while let Some(event) = navigations.next().await {
                if event.frame.parent_id.is_none() {
                    if let Ok(mut url) = tracked.write() {
                        url.clone_from(&event.frame.url);
                    }
                }
            }
        });
        Ok(Self {
            page,
            top_url,
            tasks: std::sync::Mutex::new(vec![nav_task]),
        })
    }

    fn track(&self, task: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task);
        }
    }

    fn stop_tasks(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }

    /// Pause every request of this tab and resolve it through `handler`;
    /// answer proxy auth challenges with `credentials`.
    async fn install_fetch(
        &self,
        handler: Option<Arc<dyn RequestHandler>>,
        credentials: Option<(String, String)>,
    ) -> Result<()> {
        let mut paused = self
            .page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(browser_err)?;
        let mut auth = self
            .page
            .event_listener::<EventAuthRequired>()
            .await
            .map_err(browser_err)?;
        let pattern = RequestPattern::builder()
            .url_pattern("*")
            .request_stage(RequestStage::Request)
            .build();
        self.page
            .execute(
                fetch::EnableParams::builder()
                    .pattern(pattern)
                    .handle_auth_requests(credentials.is_some())
                    .build(),
            )
            .await
            .map_err(browser_err)?;

        let page = self.page.clone();
        let top_url = Arc::clone(&self.top_url);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = paused.next() => {
                        let page = page.clone();
                        let handler = handler.clone();
                        let top = top_url.read().map(|u| u.clone()).unwrap_or_default();
                        tokio::spawn(async move {
                            resolve_paused(&page, handler.as_deref(), &event, top).await;
                        });
                    }
                    Some(event) = auth.next() => {
                        let mut response =
                            AuthChallengeResponse::new(AuthChallengeResponseResponse::ProvideCredentials);
                        if let Some((user, pass)) = &credentials {
                            response.username = Some(user.clone());
                            response.password = Some(pass.clone());
                        }
                        let params = ContinueWithAuthParams::new(event.request_id.clone(), response);
                        if let Err(e) = page.execute(params).await {
                            tracing::warn!("Failed to answer proxy auth: {e}");
                        }
                    }
                    else => break,
                }
            }
        });
        self.track(task);
        Ok(())
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(ArchiverError::Browser)?;
        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(browser_err)?;
        result
            .into_value()
            .map_err(|e| ArchiverError::Browser(format!("unexpected script result: {e}")))
    }

    async fn element_center(&self, selector: &str) -> Result<(f64, f64)> {
        let center: Option<(f64, f64)> = self
            .eval(format!(
                "(() => {{ const el = document.querySelector({}); if (!el) return null; \
                 el.scrollIntoView({{block: 'center'}}); const r = el.getBoundingClientRect(); \
                 return [r.left + r.width / 2, r.top + r.height / 2]; }})()",
                js(selector)
            ))
            .await?;
        center.ok_or_else(|| ArchiverError::ElementNotFound(selector.to_string()))
    }
}

async fn resolve_paused(
    page: &Page,
    handler: Option<&dyn RequestHandler>,
    event: &EventRequestPaused,
    top_url: String,
) {
    let request_id = event.request_id.clone();
    let outcome = match handler {
        Some(handler) => {
            handler
                .handle(InterceptedRequest {
                    url: event.request.url.clone(),
                    top_url,
                })
                .await
        }
        None => InterceptOutcome::Continue,
    };

    let sent = match outcome {
        InterceptOutcome::Abort => page
            .execute(FailRequestParams::new(request_id, ErrorReason::BlockedByClient))
            .await
            .map(|_| ()),
        InterceptOutcome::Continue => page
            .execute(ContinueRequestParams::new(request_id))
            .await
            .map(|_| ()),
        InterceptOutcome::Fulfill(fulfillment) => {
            let headers: Vec<HeaderEntry> = fulfillment
                .headers
                .iter()
                .map(|(k, v)| HeaderEntry::new(k.clone(), v.clone()))
                .collect();
            let params = FulfillRequestParams::builder()
                .request_id(request_id.clone())
                .response_code(i64::from(fulfillment.status))
                .response_headers(headers)
                .body(STANDARD.encode(&fulfillment.body))
                .build();
            match params {
                Ok(params) => page.execute(params).await.map(|_| ()),
                Err(e) => {
                    tracing::warn!("Invalid fulfillment for {}: {e}", event.request.url);
                    page.execute(ContinueRequestParams::new(request_id))
                        .await
                        .map(|_| ())
                }
            }
        }
    };
    if let Err(e) = sent {
        tracing::debug!("Failed to resolve {}: {e}", event.request.url);
    }
}

#[async_trait]
impl PostPage for ChromiumPage {
    async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await.map_err(browser_err)?;
        if let Ok(mut top) = self.top_url.write() {
            *top = url.to_string();
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self
            .page
            .url()
            .await
            .map_err(browser_err)?
            .unwrap_or_default())
    }

    async fn wait_for_load(&self) -> Result<()> {
        let _: bool = self
            .eval(
                "new Promise(resolve => { if (document.readyState !== 'loading') resolve(true); \
                 else document.addEventListener('DOMContentLoaded', () => resolve(true)); })"
                    .to_string(),
            )
            .await?;
        Ok(())
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        self.eval(format!("document.querySelectorAll({}).length", js(selector)))
            .await
    }

    async fn wait_for(&self, selector: &str, state: ElementState, timeout: Duration) -> Result<()> {
        let want_present = state == ElementState::Attached;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let present = self.count(selector).await? > 0;
            if present == want_present {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ArchiverError::Timeout(format!(
                    "{selector} to be {state:?} after {timeout:?}"
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn inner_text(&self, selector: &str) -> Result<Option<String>> {
        self.eval(format!(
            "document.querySelector({})?.innerText ?? null",
            js(selector)
        ))
        .await
    }

    async fn inner_texts(&self, selector: &str) -> Result<Vec<String>> {
        self.eval(format!(
            "[...document.querySelectorAll({})].map(el => el.innerText)",
            js(selector)
        ))
        .await
    }

    async fn inner_html(&self, selector: &str) -> Result<Option<String>> {
        self.eval(format!(
            "document.querySelector({})?.innerHTML ?? null",
            js(selector)
        ))
        .await
    }

    async fn attributes(&self, selector: &str, name: &str) -> Result<Vec<String>> {
        self.eval(format!(
            "[...document.querySelectorAll({})].map(el => el.getAttribute({})).filter(v => v !== null)",
            js(selector),
            js(name)
        ))
        .await
    }

    async fn links(&self, selector: &str) -> Result<Vec<Link>> {
        let pairs: Vec<(String, String)> = self
            .eval(format!(
                "[...document.querySelectorAll({})].filter(el => el.href)\
                 .map(el => [String(el.href), el.innerText ?? ''])",
                js(selector)
            ))
            .await?;
        Ok(pairs
            .into_iter()
            .map(|(href, text)| Link { href, text })
            .collect())
    }

    async fn click(&self, selector: &str, nth: usize) -> Result<()> {
        let clicked: bool = self
            .eval(format!(
                "(() => {{ const el = document.querySelectorAll({})[{nth}]; if (!el) return false; \
                 el.scrollIntoView({{block: 'center'}}); el.click(); return true; }})()",
                js(selector)
            ))
            .await?;
        if !clicked {
            return Err(ArchiverError::ElementNotFound(format!("{selector} [{nth}]")));
        }
        Ok(())
    }

    async fn click_matching(&self, selector: &str, text_pattern: &str) -> Result<bool> {
        self.eval(format!(
            "(() => {{ const re = new RegExp({}); const el = [...document.querySelectorAll({})]\
             .find(el => re.test(el.innerText.trim())); if (!el) return false; \
             el.scrollIntoView({{block: 'center'}}); el.click(); return true; }})()",
            js(text_pattern),
            js(selector)
        ))
        .await
    }

    async fn hover(&self, selector: &str) -> Result<()> {
        let (x, y) = self.element_center(selector).await?;
        self.move_mouse(x, y).await
    }

    async fn scroll_by(&self, dy: i64) -> Result<()> {
        let _: bool = self
            .eval(format!("(() => {{ window.scrollBy(0, {dy}); return true; }})()"))
            .await?;
        Ok(())
    }

    async fn scroll_into_view(&self, selector: &str) -> Result<()> {
        self.element_center(selector).await.map(|_| ())
    }

    async fn scroll_to_bottom(&self) -> Result<()> {
        let _: bool = self
            .eval(
                "new Promise(resolve => { const step = () => { \
                 const before = window.scrollY; window.scrollBy(0, 200 + Math.random() * 400); \
                 if (window.scrollY === before || window.innerHeight + window.scrollY >= document.body.scrollHeight) resolve(true); \
                 else setTimeout(step, 50 + Math.random() * 150); }; step(); })"
                    .to_string(),
            )
            .await?;
        Ok(())
    }

    async fn viewport(&self) -> Result<(u32, u32)> {
        self.eval("[window.innerWidth, window.innerHeight]".to_string())
            .await
    }

    async fn move_mouse(&self, x: f64, y: f64) -> Result<()> {
        self.page
            .execute(DispatchMouseEventParams::new(
                DispatchMouseEventType::MouseMoved,
                x,
                y,
            ))
            .await
            .map_err(browser_err)?;
        Ok(())
    }

    async fn wait_for_image(&self, selector: &str) -> Result<()> {
        let _: bool = self
            .eval(format!(
                "new Promise(resolve => {{ const img = document.querySelector({}); \
                 if (!img || img.complete) return resolve(true); \
                 img.addEventListener('load', () => resolve(true), {{once: true}}); \
                 img.addEventListener('error', () => resolve(true), {{once: true}}); }})",
                js(selector)
            ))
            .await?;
        Ok(())
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let encoded: String = self
            .eval(format!(
                "fetch({}, {{credentials: 'include'}}).then(r => {{ \
                 if (!r.ok) throw new Error('HTTP ' + r.status); return r.arrayBuffer(); }}) \
                 .then(buf => {{ const bytes = new Uint8Array(buf); let s = ''; \
                 for (let i = 0; i < bytes.length; i += 0x8000) \
                 s += String.fromCharCode.apply(null, bytes.subarray(i, i + 0x8000)); \
                 return btoa(s); }})",
                js(url)
            ))
            .await?;
        STANDARD
            .decode(encoded)
            .map_err(|e| ArchiverError::Network(format!("{url}: bad body encoding: {e}")))
    }

    async fn responses(
        &self,
        filter: Arc<dyn for<'a> Fn(&'a str) -> bool + Send + Sync>,
    ) -> Result<BoxStream<'static, CapturedResponse>> {
        self.page
            .execute(network::EnableParams::default())
            .await
            .map_err(browser_err)?;
        let mut received = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(browser_err)?;
        let mut finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(browser_err)?;

        let (tx, rx) = futures::channel::mpsc::unbounded();
        let page = self.page.clone();
        let task = tokio::spawn(async move {
            let mut pending: HashMap<String, String> = HashMap::new();
            while !tx.is_closed() {
                tokio::select! {
                    Some(event) = received.next() => {
                        if filter(&event.response.url) {
                            pending.insert(event.request_id.inner().clone(), event.response.url.clone());
                        }
                    }
                    Some(event) = finished.next() => {
                        let Some(url) = pending.remove(event.request_id.inner()) else {
                            continue;
                        };
                        let body = match page
                            .execute(GetResponseBodyParams::new(event.request_id.clone()))
                            .await
                        {
                            Ok(response) if response.result.base64_encoded => {
                                STANDARD.decode(&response.result.body).unwrap_or_default()
                            }
                            Ok(response) => response.result.body.clone().into_bytes(),
                            Err(e) => {
                                tracing::debug!("No body for {url}: {e}");
                                continue;
                            }
                        };
                        if tx.unbounded_send(CapturedResponse { url, body }).is_err() {
                            break;
                        }
                    }
                    else => break,
                }
            }
        });
        self.track(task);
        Ok(rx.boxed())
    }

    async fn close(&self) -> Result<()> {
        self.stop_tasks();
        self.page.clone().close().await.map_err(browser_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_quote_selectors() {
        assert_eq!(js(r#"[data-tag="post-title"] > a"#), r#""[data-tag=\"post-title\"] > a""#);
    }

    #[test]
    fn proxy_and_extension_flags() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("manifest.json"), "{}").expect("write");
        let launcher = ChromiumLauncher::new(Some(ProxyConfig {
            server: "http://proxy:8080".into(),
            username: Some("u".into()),
            password: Some("p".into()),
        }))
        .extension_dir(dir.path());
        let args = launcher.args();
        assert!(args.contains(&"--proxy-server=http://proxy:8080".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--load-extension=")));
        assert!(args.contains(&"--disable-blink-features=AutomationControlled".to_string()));
    }

    #[test]
    fn empty_extension_dir_is_not_loaded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let launcher = ChromiumLauncher::new(None).extension_dir(dir.path());
        assert!(!launcher.args().iter().any(|a| a.contains("extension")));
    }

    #[tokio::test]
    #[ignore] // Requires Chrome to be installed
    async fn live_page_queries() {
        let profile = tempfile::tempdir().expect("tempdir");
        let session = ChromiumLauncher::new(None)
            .profile_dir(profile.path())
            .launch()
            .await
            .expect("launch");
        let page = session.new_page().await.expect("page");
        page.goto("data:text/html,<p class='a'>one</p><p class='a'>two</p><a href='https://example.org/x'>go</a>")
            .await
            .expect("goto");
        assert_eq!(page.count("p.a").await.expect("count"), 2);
        assert_eq!(
            page.inner_texts("p.a").await.expect("texts"),
            vec!["one".to_string(), "two".to_string()]
        );
        let links = page.links("a").await.expect("links");
        assert_eq!(links[0].href, "https://example.org/x");
        session.close().await.expect("close");
    }
}
