//! Pluggable storage backends for archived output and cached assets.
//!
//! [`FsStorage`] is the only backend the archiver ships; the trait exists so
//! the cache-write worker can be driven against doubles in tests.

mod fs;

pub use fs::FsStorage;

use crate::error::Result;

use std::future::Future;

/// Trait for storage backends that can persist bytes under a key.
///
/// Implementations must be `Send + Sync + 'static` so they can be used from
/// the background worker task.
///
/// # Implementing a custom backend
///
/// ```rust,no_run
/// use post_archiver::{Storage, Result};
///
/// struct MyStorage;
///
/// impl Storage for MyStorage {
///     async fn put(&self, key: &str, content: &[u8], content_type: &str) -> Result<()> {
///         // write content somewhere ...
///         Ok(())
///     }
/// }
/// ```
pub trait Storage: Send + Sync + 'static {
    /// Persist `content` under the given `key` with the specified MIME
    /// `content_type`. Returns once the bytes are durable.
    fn put(
        &self,
        key: &str,
        content: &[u8],
        content_type: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}
