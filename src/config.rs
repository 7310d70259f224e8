//! Builder for configuring an archiving run.

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::MAX_CACHEABLE_BYTES;
use crate::error::{ArchiverError, Result};
use crate::fetcher::ProxyConfig;
use crate::pacing::Pacing;

/// Validated settings for an [`Archiver`](crate::Archiver).
#[derive(Clone, Debug)]
pub struct ArchiverConfig {
    pub out_dir: PathBuf,
    pub update_mode: bool,
    pub cache_root: PathBuf,
    pub cookies_path: PathBuf,
    pub flags_path: PathBuf,
    pub pacing: Pacing,
    pub max_restarts: usize,
    pub restart_delay: Duration,
    pub report_interval: Duration,
    pub max_cacheable_bytes: usize,
    pub cache_channel_buffer: usize,
    pub navigation_timeout: Duration,
    pub wait_timeout: Duration,
    pub image_wait_timeout: Duration,
    pub proxy: Option<ProxyConfig>,
}

/// Fluent builder for [`ArchiverConfig`].
///
/// # Example
///
/// ```rust,no_run
/// use post_archiver::{ArchiverBuilder, Pacing};
/// use std::time::Duration;
///
/// let config = ArchiverBuilder::new("./archive")
///     .update_mode(true)
///     .cache_root("./custom-cache")
///     .wait_timeout(Duration::from_secs(30))
///     .pacing(Pacing::default())
///     .build()
///     .unwrap();
/// assert_eq!(config.max_restarts, 50);
/// ```
pub struct ArchiverBuilder {
    config: ArchiverConfig,
}

impl ArchiverBuilder {
    /// Defaults: cache in `./custom-cache`, cookies in `./cookies.json`,
    /// login flags in `./flags.json`, 50 restarts, hit-rate report every 60 s,
    /// 10 MiB cache ceiling, 50 s waits, 120 s for carousel images.
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            config: ArchiverConfig {
                out_dir: out_dir.into(),
                update_mode: false,
                cache_root: PathBuf::from("./custom-cache"),
                cookies_path: PathBuf::from("./cookies.json"),
                flags_path: PathBuf::from("./flags.json"),
                pacing: Pacing::default(),
                max_restarts: 50,
                restart_delay: Duration::from_secs(1),
                report_interval: Duration::from_secs(60),
                max_cacheable_bytes: MAX_CACHEABLE_BYTES,
                cache_channel_buffer: 1000,
                navigation_timeout: Duration::from_secs(999),
                wait_timeout: Duration::from_secs(50),
                image_wait_timeout: Duration::from_secs(120),
                proxy: None,
            },
        }
    }

    /// Stop a feed walk once already-archived posts show up.
    pub fn update_mode(mut self, enabled: bool) -> Self {
        self.config.update_mode = enabled;
        self
    }

    /// Parent of the per-site asset cache directories.
    pub fn cache_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cache_root = path.into();
        self
    }

    pub fn cookies_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cookies_path = path.into();
        self
    }

    pub fn flags_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.flags_path = path.into();
        self
    }

    pub fn pacing(mut self, pacing: Pacing) -> Self {
        self.config.pacing = pacing;
        self
    }

    /// How many times the recovery loop restarts a failed run.
    pub fn max_restarts(mut self, restarts: usize) -> Self {
        self.config.max_restarts = restarts;
        self
    }

    /// Pause between a failure and the restart.
    pub fn restart_delay(mut self, delay: Duration) -> Self {
        self.config.restart_delay = delay;
        self
    }

    /// Interval of the cache hit-rate status line.
    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.config.report_interval = interval;
        self
    }

    /// Responses larger than this are never cached.
    pub fn max_cacheable_bytes(mut self, limit: usize) -> Self {
        self.config.max_cacheable_bytes = limit;
        self
    }

    /// Capacity of the queue between interception and the cache writer.
    pub fn cache_channel_buffer(mut self, size: usize) -> Self {
        self.config.cache_channel_buffer = size;
        self
    }

    pub fn navigation_timeout(mut self, timeout: Duration) -> Self {
        self.config.navigation_timeout = timeout;
        self
    }

    /// Ceiling for selector waits (posts, loaders, lightbox).
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.wait_timeout = timeout;
        self
    }

    /// How long to wait for every carousel image to be captured.
    pub fn image_wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.image_wait_timeout = timeout;
        self
    }

    pub fn proxy(mut self, proxy: Option<ProxyConfig>) -> Self {
        self.config.proxy = proxy;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<ArchiverConfig> {
        let config = self.config;
        if config.out_dir.as_os_str().is_empty() {
            return Err(ArchiverError::Config("output directory is required".into()));
        }
        if config.report_interval.is_zero() {
            return Err(ArchiverError::Config(
                "report interval must be non-zero".into(),
            ));
        }
        if config.cache_channel_buffer == 0 {
            return Err(ArchiverError::Config(
                "cache channel buffer must be non-zero".into(),
            ));
        }
        if let Some(proxy) = &config.proxy {
            if proxy.server.trim().is_empty() {
                return Err(ArchiverError::Config("proxy server is empty".into()));
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ArchiverBuilder::new("out").build().unwrap();
        assert_eq!(config.cache_root, PathBuf::from("./custom-cache"));
        assert_eq!(config.cookies_path, PathBuf::from("./cookies.json"));
        assert_eq!(config.flags_path, PathBuf::from("./flags.json"));
        assert_eq!(config.max_restarts, 50);
        assert_eq!(config.report_interval, Duration::from_secs(60));
        assert_eq!(config.max_cacheable_bytes, 10 * 1024 * 1024);
        assert_eq!(config.wait_timeout, Duration::from_secs(50));
        assert!(!config.update_mode);
    }

    #[test]
    fn empty_out_dir_is_rejected() {
        let err = ArchiverBuilder::new("").build().unwrap_err();
        assert!(matches!(err, ArchiverError::Config(_)));
    }

    #[test]
    fn zero_report_interval_is_rejected() {
        let err = ArchiverBuilder::new("out")
            .report_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn blank_proxy_is_rejected() {
        let proxy = ProxyConfig {
            server: " ".into(),
            ..ProxyConfig::default()
        };
        assert!(ArchiverBuilder::new("out").proxy(Some(proxy)).build().is_err());
    }
}
