//! Anti-automation challenge detection around live-page operations.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::browser::{BrowserSession, PostPage};
use crate::cookies::CookieJar;
use crate::error::Result;
use crate::operator::Operator;

/// Runs page operations only once the page is free of challenge markers.
///
/// When a challenge is showing, the operator is asked to solve it, the
/// session cookies are saved, and the check starts over. A failing check
/// (for example because the page navigated mid-query) is retried after a
/// short random delay. Neither loop is bounded: a challenge that is never
/// solved blocks the run.
pub struct ChallengeGuard {
    markers: String,
    session: Arc<dyn BrowserSession>,
    operator: Arc<dyn Operator>,
    cookies: CookieJar,
    max_retry_delay: Duration,
}

impl ChallengeGuard {
    pub fn new(
        markers: impl Into<String>,
        session: Arc<dyn BrowserSession>,
        operator: Arc<dyn Operator>,
        cookies: CookieJar,
    ) -> Self {
        Self {
            markers: markers.into(),
            session,
            operator,
            cookies,
            max_retry_delay: Duration::from_secs(1),
        }
    }

    /// Upper bound of the random delay before re-running a failed check.
    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    async fn challenge_present(&self, page: &dyn PostPage) -> Result<bool> {
        page.wait_for_load().await?;
        Ok(page.count(&self.markers).await? > 0)
    }

    async fn retry_pause(&self) {
        let max = self.max_retry_delay.as_millis() as u64;
        if max == 0 {
            tokio::task::yield_now().await;
            return;
        }
        let ms = rand::thread_rng().gen_range(0..max);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    /// Wait until `page` is clear of challenges, then run `op`. If `op`
    /// fails and a challenge is showing afterwards, the challenge is handled
    /// and `op` runs again from the start.
    pub async fn run<T, F, Fut>(&self, page: &dyn PostPage, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        loop {
            self.clear(page).await?;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !self.challenge_present(page).await.unwrap_or(false) {
                        return Err(e);
                    }
                    tracing::warn!("Operation interrupted by a challenge, retrying: {e}");
                }
            }
        }
    }

    /// Block until no challenge marker is present on `page`.
    pub async fn clear(&self, page: &dyn PostPage) -> Result<()> {
        loop {
            match self.challenge_present(page).await {
                Ok(false) => return Ok(()),
                Ok(true) => {
                    tracing::warn!("Challenge detected on the page");
                    self.operator.acknowledge("Please solve the captcha").await?;
                    if let Err(e) = self.cookies.save_from(self.session.as_ref()).await {
                        tracing::warn!("Failed to save cookies after challenge: {e}");
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed guard, waiting: {e}");
                    self.retry_pause().await;
                }
            }
        }
    }
}
