//! Human-like timing: think time between posts, irregular scrolling and
//! mouse wandering.

use std::ops::Range;
use std::time::Duration;

use rand::Rng;

use crate::browser::PostPage;
use crate::error::Result;

/// Randomized delays and movements. [`Pacing::none`] turns every pause and
/// movement into a no-op.
#[derive(Clone, Debug)]
pub struct Pacing {
    enabled: bool,
    think_ms: Range<u64>,
    step_ms: Range<u64>,
    scroll_px: Range<i64>,
    mouse_moves: usize,
    mouse_steps: Range<usize>,
    mouse_pause_ms: Range<u64>,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            enabled: true,
            think_ms: 0..1000,
            step_ms: 100..1100,
            scroll_px: 200..1200,
            mouse_moves: 5,
            mouse_steps: 15..25,
            mouse_pause_ms: 200..500,
        }
    }
}

fn sample<T>(range: &Range<T>) -> T
where
    T: rand::distributions::uniform::SampleUniform + PartialOrd + Copy,
{
    if range.start < range.end {
        rand::thread_rng().gen_range(range.clone())
    } else {
        range.start
    }
}

impl Pacing {
    pub fn none() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Pause between posts.
    pub async fn think(&self) {
        self.sleep_in(&self.think_ms).await;
    }

    /// Pause between UI steps (carousel clicks, filter options).
    pub async fn step(&self) {
        self.sleep_in(&self.step_ms).await;
    }

    /// Random short pause, used when backing off a failed check.
    pub async fn jitter(&self) {
        self.sleep_in(&self.think_ms).await;
    }

    async fn sleep_in(&self, range: &Range<u64>) {
        if !self.enabled {
            return;
        }
        let ms = sample(range);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    /// Scroll down by a random distance.
    pub async fn random_scroll(&self, page: &dyn PostPage) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let dy = sample(&self.scroll_px);
        page.scroll_by(dy).await
    }

    /// Wander the mouse across the viewport in small steps.
    pub async fn random_mouse_movements(&self, page: &dyn PostPage) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let (width, height) = page.viewport().await?;
        if width == 0 || height == 0 {
            tracing::warn!("No valid viewport size found. Skipping random mouse movements.");
            return Ok(());
        }

        let plan: Vec<((f64, f64), usize, u64)> = {
            let mut rng = rand::thread_rng();
            (0..self.mouse_moves)
                .map(|_| {
                    let target = (
                        rng.gen_range(0..width) as f64,
                        rng.gen_range(0..height) as f64,
                    );
                    (target, sample(&self.mouse_steps), sample(&self.mouse_pause_ms))
                })
                .collect()
        };

        let (mut x, mut y) = (width as f64 / 2.0, height as f64 / 2.0);
        for ((tx, ty), steps, pause_ms) in plan {
            let steps = steps.max(1);
            for i in 1..=steps {
                let t = i as f64 / steps as f64;
                page.move_mouse(x + (tx - x) * t, y + (ty - y) * t).await?;
            }
            (x, y) = (tx, ty);
            tokio::time::sleep(Duration::from_millis(pause_ms)).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_respects_bounds() {
        for _ in 0..100 {
            let v = sample(&(100u64..1100));
            assert!((100..1100).contains(&v));
        }
        assert_eq!(sample(&(5u64..5)), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_pacing_never_sleeps() {
        let pacing = Pacing::none();
        let start = tokio::time::Instant::now();
        pacing.think().await;
        pacing.step().await;
        pacing.jitter().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn think_time_is_under_a_second() {
        let pacing = Pacing::default();
        let start = tokio::time::Instant::now();
        pacing.think().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
