//! Feed walking: filter, scan, open unvisited posts, advance, repeat.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::browser::{BrowserSession, PostPage};
use crate::error::{ArchiverError, Result};
use crate::extract::{Extraction, PostExtractor};
use crate::ledger::VisitedLedger;
use crate::operator::Operator;
use crate::site::absolutize;
use crate::source::{FilterOutcome, PostSource, SourceContext};

/// Already-visited posts tolerated in update mode before the feed counts as
/// caught up. Feeds may pin a couple of old posts at the top.
pub const PINNED_POST_TOLERANCE: usize = 2;

/// Counts reported when a walk ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WalkSummary {
    pub saved: usize,
    pub locked: usize,
    /// Listed posts that were already in the ledger.
    pub skipped: usize,
}

impl fmt::Display for WalkSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} saved, {} locked, {} already visited",
            self.saved, self.locked, self.skipped
        )
    }
}

#[derive(Debug)]
enum WalkState {
    Idle,
    FilterApplied,
    ScanningPage,
    PostOpen(String),
    PostSaved(String),
    PageAdvance,
    Exhausted,
}

/// Next state once the current post is done: the next queued post, or the
/// end of this page. `queue` is kept in reverse listing order.
fn next_post(queue: &mut Vec<String>, caught_up: bool) -> WalkState {
    match queue.pop() {
        Some(url) => WalkState::PostOpen(url),
        None if caught_up => WalkState::Exhausted,
        None => WalkState::PageAdvance,
    }
}

/// Walks one feed page by page, archiving every post the ledger has not
/// seen yet. Posts are processed strictly one after another.
pub struct PostWalker<'a> {
    source: &'a dyn PostSource,
    ctx: &'a SourceContext<'a>,
    session: &'a dyn BrowserSession,
    operator: &'a dyn Operator,
    ledger: &'a mut VisitedLedger,
    update_mode: bool,
    resume_url: Option<String>,
}

impl<'a> PostWalker<'a> {
    pub fn new(
        source: &'a dyn PostSource,
        ctx: &'a SourceContext<'a>,
        session: &'a dyn BrowserSession,
        operator: &'a dyn Operator,
        ledger: &'a mut VisitedLedger,
    ) -> Self {
        Self {
            source,
            ctx,
            session,
            operator,
            ledger,
            update_mode: false,
            resume_url: None,
        }
    }

    /// Stop once previously archived posts start showing up.
    pub fn update_mode(mut self, enabled: bool) -> Self {
        self.update_mode = enabled;
        self
    }

    /// Feed URL to restart from after a failure: the last URL the feed page
    /// was seen at.
    pub fn resume_url(&self) -> Option<&str> {
        self.resume_url.as_deref()
    }

    /// Walk the feed at `feed_url` in `feed_page`, which is navigated there
    /// first.
    pub async fn walk(
        &mut self,
        feed_page: &dyn PostPage,
        feed_url: &str,
        year: Option<&str>,
    ) -> Result<WalkSummary> {
        let mut summary = WalkSummary::default();
        let mut state = WalkState::Idle;
        let mut post_page: Option<Arc<dyn PostPage>> = None;
        let mut queue: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut visited_hits = 0;
        let mut caught_up = false;
        let mut last_count: Option<usize> = None;

        loop {
            tracing::debug!("Walker state: {state:?}");
            state = match state {
                WalkState::Idle => {
                    self.source.validate_target(feed_url, year)?;
                    match year {
                        Some(year) => tracing::info!("All posts mode. Extracting from year {year}"),
                        None => tracing::info!("All posts mode"),
                    }
                    feed_page.goto(feed_url).await?;
                    self.resume_url = Some(feed_url.to_string());
                    match self.apply_filter(feed_page, year).await? {
                        FilterOutcome::Ready => WalkState::FilterApplied,
                        FilterOutcome::NoPosts => WalkState::Exhausted,
                    }
                }

                WalkState::FilterApplied => {
                    if let Ok(url) = feed_page.current_url().await {
                        self.resume_url = Some(url);
                    }
                    WalkState::ScanningPage
                }

                WalkState::ScanningPage => {
                    self.ctx.pacing.random_scroll(feed_page).await?;
                    let base = feed_page.current_url().await?;
                    let urls = self
                        .source
                        .post_urls(self.ctx, feed_page)
                        .await?
                        .iter()
                        .map(|href| absolutize(&base, href))
                        .collect::<Result<Vec<_>>>()?;
                    tracing::info!("Found {} posts on the page", urls.len());

                    if self.source.accumulating_feed() && last_count == Some(urls.len()) {
                        tracing::info!("No new posts appeared, feed exhausted");
                        WalkState::Exhausted
                    } else {
                        last_count = Some(urls.len());
                        for url in urls {
                            if !seen.insert(url.clone()) {
                                continue;
                            }
                            if !self.ledger.contains(&url) {
                                queue.push(url);
                                continue;
                            }
                            summary.skipped += 1;
                            if self.update_mode {
                                visited_hits += 1;
                                if visited_hits > PINNED_POST_TOLERANCE {
                                    tracing::info!("Reached processed post, exiting update mode.");
                                    caught_up = true;
                                    break;
                                }
                            }
                        }
                        queue.reverse();
                        next_post(&mut queue, caught_up)
                    }
                }

                WalkState::PostOpen(url) => {
                    self.ctx.pacing.think().await;
                    let page = match &post_page {
                        Some(page) => Arc::clone(page),
                        None => {
                            let page = self.session.new_page().await?;
                            post_page = Some(Arc::clone(&page));
                            page
                        }
                    };
                    self.ctx.pacing.random_mouse_movements(page.as_ref()).await?;
                    tracing::info!("Opening {url}");
                    let page_ref = page.as_ref();
                    let target = url.as_str();
                    self.ctx
                        .guard
                        .run(page_ref, move || page_ref.goto(target))
                        .await?;

                    match PostExtractor::new(self.source, self.ctx)
                        .extract(page_ref)
                        .await?
                    {
                        Extraction::Saved(_) => summary.saved += 1,
                        Extraction::Locked => summary.locked += 1,
                    }
                    WalkState::PostSaved(url)
                }

                WalkState::PostSaved(url) => {
                    self.ledger.mark_visited(&url).await?;
                    next_post(&mut queue, caught_up)
                }

                WalkState::PageAdvance => {
                    if self.source.load_more(self.ctx, feed_page).await? {
                        if let Ok(url) = feed_page.current_url().await {
                            self.resume_url = Some(url);
                        }
                        WalkState::ScanningPage
                    } else {
                        WalkState::Exhausted
                    }
                }

                WalkState::Exhausted => break,
            };
        }

        if let Some(page) = post_page {
            if let Err(e) = page.close().await {
                tracing::warn!("Failed to close post page: {e}");
            }
        }
        tracing::info!("Walk finished: {summary}");
        Ok(summary)
    }

    async fn apply_filter(&self, page: &dyn PostPage, year: Option<&str>) -> Result<FilterOutcome> {
        match self.source.apply_filter(self.ctx, page, year).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::error!("Failed to set filter: {e}");
                self.operator
                    .acknowledge("Filter could not be applied")
                    .await?;
                Err(ArchiverError::FilterFailed(Box::new(e)))
            }
        }
    }
}
