//! Error types for the `post_archiver` crate.

/// All errors that can occur while archiving a feed.
#[derive(Debug, thiserror::Error)]
pub enum ArchiverError {
    /// The browser automation layer failed (navigation, query, evaluation).
    #[error("Browser error: {0}")]
    Browser(String),

    /// A local filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON document could not be read or written.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An out-of-page network fetch failed.
    #[error("Network error: {0}")]
    Network(String),

    /// A URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The target URL does not belong to any supported site.
    #[error("Unsupported site: {0}")]
    UnsupportedSite(String),

    /// A feed URL was given for a site that requires a year filter, but no year was supplied.
    #[error("No year provided for feed {0}")]
    MissingYear(String),

    /// A required element was not present on the page.
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// A wait exceeded its ceiling.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// A storage backend failed to persist content.
    #[error("Storage write failed: {0}")]
    Storage(Box<dyn std::error::Error + Send + Sync>),

    /// The builder configuration is invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// The feed filter could not be applied; the walk cannot start.
    #[error("Failed to set filter: {0}")]
    FilterFailed(Box<ArchiverError>),

    /// Reading the operator's acknowledgement failed.
    #[error("Operator input failed: {0}")]
    Operator(String),

    /// The recovery loop gave up.
    #[error("Gave up after {attempts} attempts: {last}")]
    RestartsExhausted {
        attempts: usize,
        last: Box<ArchiverError>,
    },
}

impl ArchiverError {
    /// Structural errors are raised immediately and never retried by the
    /// recovery loop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedSite(_)
                | Self::MissingYear(_)
                | Self::Config(_)
                | Self::FilterFailed(_)
        )
    }
}

/// A type alias for `Result<T, ArchiverError>`.
pub type Result<T> = std::result::Result<T, ArchiverError>;
