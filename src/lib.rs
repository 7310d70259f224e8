//! # post_archiver
//!
//! Browser-driven archiver for creator-subscription feeds (Patreon, pixiv
//! Fanbox, Substack).
//!
//! ## Overview
//!
//! An [`Archiver`] launches a browser session through a [`SessionLauncher`],
//! routes every request through an [`InterceptPolicy`] backed by a two-level
//! [`AssetCache`], logs in, and then either walks a feed with a
//! [`PostWalker`] or extracts a single post. Each post becomes
//! `<name>.md` plus a `<name>.json` sidecar, with images and attachments
//! saved next to them and every file stamped with the post's publish date.
//!
//! Walks are resumable: the [`VisitedLedger`] is appended only after a
//! post's files are on disk, and re-running skips assets that already exist.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use post_archiver::{Archiver, ArchiverBuilder, StdinOperator};
//! use post_archiver::browser::chromium::ChromiumLauncher;
//!
//! # async fn example() -> post_archiver::Result<()> {
//! let config = ArchiverBuilder::new("./archive").update_mode(true).build()?;
//! let launcher = Arc::new(ChromiumLauncher::new(None));
//! let archiver = Archiver::new(config, launcher, Arc::new(StdinOperator::new()));
//! let outcome = archiver
//!     .run("https://www.patreon.com/c/someone/posts", Some("2024"))
//!     .await?;
//! println!("{}", outcome.summary);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `chromium` | **yes** | Enables [`browser::chromium`], a Chrome-backed [`SessionLauncher`]. |

pub mod assets;
pub mod browser;
pub mod cache;
pub mod collector;
pub mod config;
pub mod cookies;
pub mod date;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod guard;
pub mod handle;
pub mod intercept;
pub mod ledger;
pub mod operator;
pub mod orchestrator;
pub mod pacing;
pub mod post;
pub mod rewriter;
pub mod site;
pub mod source;
pub mod storage;
pub mod walker;
mod worker;

pub use assets::{AssetDownloader, FileIndex};
pub use browser::{BrowserSession, PostPage, SessionLauncher};
pub use cache::{AssetCache, CacheEntry, CacheStats, cache_key};
pub use collector::ImageCollector;
pub use config::{ArchiverBuilder, ArchiverConfig};
pub use cookies::{CookieJar, LoginFlags};
pub use error::{ArchiverError, Result};
pub use extract::{Extraction, PostExtractor};
pub use fetcher::{AssetFetcher, ProxyConfig, ReqwestFetcher};
pub use guard::ChallengeGuard;
pub use handle::{CacheWorker, CacheWriter, WriteJob};
pub use intercept::{Decision, InterceptPolicy, Verdict};
pub use ledger::VisitedLedger;
pub use operator::{AutoOperator, Operator, StdinOperator};
pub use orchestrator::{Archiver, RunOutcome};
pub use pacing::Pacing;
pub use post::{ImageMap, PostRecord};
pub use rewriter::{RewritePass, RewritePipeline, Rewritten, rewrite};
pub use site::{SelectorSet, Site};
pub use source::{PostSource, SourceContext};
pub use storage::{FsStorage, Storage};
pub use walker::{PostWalker, WalkSummary};
