//! Top-level run: browser session, cache and interception wiring, login,
//! then either a feed walk or a single post.

use std::path::PathBuf;
use std::sync::Arc;

use crate::assets::{AssetDownloader, FileIndex};
use crate::browser::{BrowserSession, PostPage, SessionLauncher};
use crate::cache::{AssetCache, CacheStats};
use crate::config::ArchiverConfig;
use crate::cookies::{CookieJar, LoginFlags};
use crate::error::{ArchiverError, Result};
use crate::extract::{Extraction, PostExtractor};
use crate::fetcher::{AssetFetcher, ReqwestFetcher};
use crate::guard::ChallengeGuard;
use crate::handle::CacheWorker;
use crate::intercept::InterceptPolicy;
use crate::ledger::{VISITED_FILE, VisitedLedger};
use crate::operator::Operator;
use crate::site::Site;
use crate::source::{self, PostSource, SourceContext};
use crate::storage::FsStorage;
use crate::walker::{PostWalker, WalkSummary};

/// Result of a completed run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOutcome {
    /// Directory the posts were written to.
    pub out_dir: PathBuf,
    pub summary: WalkSummary,
}

/// Drives one archiving job from launch to shutdown.
///
/// The cache, interception policy, guard and ledger are all constructed
/// here per attempt and handed down explicitly.
pub struct Archiver {
    config: ArchiverConfig,
    launcher: Arc<dyn SessionLauncher>,
    operator: Arc<dyn Operator>,
    fetcher: Option<Arc<dyn AssetFetcher>>,
}

impl Archiver {
    pub fn new(
        config: ArchiverConfig,
        launcher: Arc<dyn SessionLauncher>,
        operator: Arc<dyn Operator>,
    ) -> Self {
        Self {
            config,
            launcher,
            operator,
            fetcher: None,
        }
    }

    /// Use `fetcher` for cache fills instead of a proxy-aware reqwest client.
    pub fn fetcher(mut self, fetcher: Arc<dyn AssetFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn config(&self) -> &ArchiverConfig {
        &self.config
    }

    /// Run once. A failure is returned as-is after the session is closed.
    pub async fn run(&self, url: &str, year: Option<&str>) -> Result<RunOutcome> {
        let mut resume = None;
        self.attempt(url, year, &mut resume).await
    }

    /// Run, restarting from the last known feed position after each
    /// non-fatal failure, at most `max_restarts` times.
    pub async fn run_with_recovery(&self, url: &str, year: Option<&str>) -> Result<RunOutcome> {
        tracing::info!("Running in auto-recover mode. Press Ctrl+C at any time to close");
        let mut resume: Option<String> = None;
        let mut restarts = 0;
        loop {
            let target = resume.clone().unwrap_or_else(|| url.to_string());
            if target != url {
                tracing::info!("Continuing from {target}");
            }
            match self.attempt(&target, year, &mut resume).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if restarts >= self.config.max_restarts => {
                    return Err(ArchiverError::RestartsExhausted {
                        attempts: restarts + 1,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    restarts += 1;
                    tracing::warn!(
                        "Failure, restarting ({restarts}/{}): {e}",
                        self.config.max_restarts
                    );
                    tokio::time::sleep(self.config.restart_delay).await;
                }
            }
        }
    }

    async fn attempt(
        &self,
        url: &str,
        year: Option<&str>,
        resume: &mut Option<String>,
    ) -> Result<RunOutcome> {
        let year = year.filter(|y| !y.is_empty());
        let site = Site::detect(url)?;
        let source = source::for_site(site);
        source.validate_target(url, year)?;

        tokio::fs::create_dir_all(&self.config.out_dir).await?;
        tracing::info!("Launching browser for {site}");
        let session = self.launcher.launch().await?;

        let stats = Arc::new(CacheStats::new());
        let cache_dir = self.config.cache_root.join(site.key());
        let worker = CacheWorker::spawn(
            FsStorage::new(&cache_dir),
            Arc::clone(&stats),
            self.config.report_interval,
            self.config.cache_channel_buffer,
        );
        let cache = Arc::new(AssetCache::new(&cache_dir, worker.writer(), stats));

        let result = self
            .in_session(&session, &cache, source.as_ref(), url, year, resume)
            .await;
        let result = match result {
            Ok(outcome) => self.finish(session.as_ref()).await.map(|()| outcome),
            Err(e) => {
                tracing::error!("Run failed: {e}");
                if let Err(close) = session.close().await {
                    tracing::warn!("Failed to close browser: {close}");
                }
                Err(e)
            }
        };
        worker.shutdown().await;
        result
    }

    async fn in_session(
        &self,
        session: &Arc<dyn BrowserSession>,
        cache: &Arc<AssetCache>,
        source: &dyn PostSource,
        url: &str,
        year: Option<&str>,
        resume: &mut Option<String>,
    ) -> Result<RunOutcome> {
        let site = source.site();
        cache.warm().await?;
        let fetcher = match &self.fetcher {
            Some(fetcher) => Arc::clone(fetcher),
            None => Arc::new(ReqwestFetcher::new(
                self.config.proxy.as_ref(),
                self.config.navigation_timeout,
            )?),
        };
        let policy = InterceptPolicy::new(site, Arc::clone(cache), fetcher)
            .max_cacheable_bytes(self.config.max_cacheable_bytes);
        session.intercept(Arc::new(policy)).await?;

        let page = session.new_page().await?;
        let jar = CookieJar::new(&self.config.cookies_path);
        self.login(session.as_ref(), page.as_ref(), site, &jar).await?;
        if let Err(e) = jar.save_from(session.as_ref()).await {
            tracing::warn!("Failed to save cookies: {e}");
        }

        let guard = ChallengeGuard::new(
            site.selectors().challenge,
            Arc::clone(session),
            Arc::clone(&self.operator),
            jar,
        );

        let feed = source.is_feed_url(url);
        let out_dir = match year {
            Some(year) if feed => self.config.out_dir.join(year),
            _ => self.config.out_dir.clone(),
        };
        let index = Arc::new(FileIndex::scan(&out_dir).await?);
        let downloader = AssetDownloader::new(&out_dir, index);
        let ctx = SourceContext {
            guard: &guard,
            pacing: &self.config.pacing,
            downloader: &downloader,
            wait_timeout: self.config.wait_timeout,
            image_wait_timeout: self.config.image_wait_timeout,
        };

        let summary = if feed {
            let mut ledger = VisitedLedger::load(self.config.out_dir.join(VISITED_FILE)).await?;
            let mut walker = PostWalker::new(
                source,
                &ctx,
                session.as_ref(),
                self.operator.as_ref(),
                &mut ledger,
            )
            .update_mode(self.config.update_mode);
            let walked = walker.walk(page.as_ref(), url, year).await;
            if walked.is_err() {
                *resume = walker.resume_url().map(str::to_string);
            }
            walked?
        } else {
            tracing::info!("Single post mode");
            single_post(source, &ctx, page.as_ref(), url).await?
        };

        Ok(RunOutcome { out_dir, summary })
    }

    /// Inject stored cookies, first sending the operator to the login page
    /// when this site has never been logged into.
    async fn login(
        &self,
        session: &dyn BrowserSession,
        page: &dyn PostPage,
        site: Site,
        jar: &CookieJar,
    ) -> Result<()> {
        let flags = LoginFlags::new(&self.config.flags_path);
        let cookies = jar.load().await;
        if !flags.is_logged_in(site).await {
            page.goto(site.login_url()).await?;
            self.operator.acknowledge("Please login and press Enter").await?;
            flags.mark_logged_in(site).await?;
        }
        if !cookies.is_empty() {
            tracing::info!("Loading {} cookies", cookies.len());
            session.add_cookies(&cookies).await?;
        }
        Ok(())
    }

    async fn finish(&self, session: &dyn BrowserSession) -> Result<()> {
        if let Err(e) = CookieJar::new(&self.config.cookies_path)
            .save_from(session)
            .await
        {
            tracing::warn!("Failed to save cookies: {e}");
        }
        self.operator
            .acknowledge("Extractor finished. Press Enter to close the browser.")
            .await?;
        session.close().await
    }
}

async fn single_post(
    source: &dyn PostSource,
    ctx: &SourceContext<'_>,
    page: &dyn PostPage,
    url: &str,
) -> Result<WalkSummary> {
    ctx.guard.run(page, move || page.goto(url)).await?;
    let mut summary = WalkSummary::default();
    match PostExtractor::new(source, ctx).extract(page).await? {
        Extraction::Saved(_) => summary.saved = 1,
        Extraction::Locked => summary.locked = 1,
    }
    Ok(summary)
}
