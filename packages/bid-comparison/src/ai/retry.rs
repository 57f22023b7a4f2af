//! Retry decorator for completion calls.
//!
//! Attempts run strictly one after another. After failed attempt `n` the
//! decorator waits `n * base_delay` before the next one; exhausting all
//! attempts returns the last error.

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{error, warn};

use crate::error::CompletionResult;
use crate::traits::completion::{ChatMessage, Completion, CompletionOptions};
use crate::types::config::RetryPolicy;

/// Wraps a `Completion` with retry and linear backoff.
pub struct RetryingCompletion<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: Completion> RetryingCompletion<C> {
    /// Wrap with the default policy (3 attempts, 1s/2s waits).
    pub fn new(inner: C) -> Self {
        Self::with_policy(inner, RetryPolicy::default())
    }

    pub fn with_policy(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

#[async_trait]
impl<C: Completion> Completion for RetryingCompletion<C> {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> CompletionResult<String> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.inner.complete(messages, options).await {
                Ok(text) => return Ok(text),
                Err(e) if attempt < max_attempts && e.is_retryable() => {
                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        error = %e,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Completion failed, retrying..."
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(error = %e, attempt, "Completion failed after all retries");
                    return Err(e);
                }
            }
        }
    }

    async fn ensure_ready(&self) -> CompletionResult<()> {
        self.inner.ensure_ready().await
    }
}
