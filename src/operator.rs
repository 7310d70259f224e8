//! The human at the keyboard: login, challenges and the final farewell all
//! block until the operator acknowledges.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::Mutex;

use crate::error::{ArchiverError, Result};

#[async_trait]
pub trait Operator: Send + Sync {
    /// Show `prompt` and wait until the operator confirms.
    async fn acknowledge(&self, prompt: &str) -> Result<()>;
}

type LineReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;

/// Prompts on the log and waits for Enter on stdin.
///
/// One buffered reader is kept for the whole run, so lines typed ahead are
/// consumed by later prompts instead of being dropped.
pub struct StdinOperator {
    input: Mutex<LineReader>,
}

impl StdinOperator {
    pub fn new() -> Self {
        Self::from_reader(tokio::io::stdin())
    }

    /// Read confirmations from `reader` instead of stdin.
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            input: Mutex::new(BufReader::new(Box::new(reader))),
        }
    }
}

impl Default for StdinOperator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StdinOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdinOperator").finish_non_exhaustive()
    }
}

#[async_trait]
impl Operator for StdinOperator {
    async fn acknowledge(&self, prompt: &str) -> Result<()> {
        tracing::warn!("{prompt} (press Enter to continue)");
        let mut line = String::new();
        let read = self
            .input
            .lock()
            .await
            .read_line(&mut line)
            .await
            .map_err(|e| ArchiverError::Operator(format!("failed to read stdin: {e}")))?;
        if read == 0 {
            return Err(ArchiverError::Operator("stdin closed".to_string()));
        }
        Ok(())
    }
}

/// Operator that confirms immediately. Useful for unattended runs where no
/// interaction is expected.
#[derive(Clone, Copy, Debug, Default)]
pub struct AutoOperator;

#[async_trait]
impl Operator for AutoOperator {
    async fn acknowledge(&self, prompt: &str) -> Result<()> {
        tracing::info!("{prompt} (auto-confirmed)");
        Ok(())
    }
}
