//! Per-call cancellation and deadline propagation.
//!
//! Every ObjectStore operation takes a [`CallContext`]. The daemon creates
//! one per kernel request from the mount's root token, so unmounting cancels
//! in-flight store traffic; the deadline bounds each call independently.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Result, StoreError};

/// Default per-call deadline applied by adapters.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Duration,
}

impl CallContext {
    pub fn new(cancel: CancellationToken, deadline: Duration) -> Self {
        Self { cancel, deadline }
    }

    /// A context that can only expire, never be cancelled externally.
    pub fn detached(deadline: Duration) -> Self {
        Self::new(CancellationToken::new(), deadline)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run a store future under this context.
    ///
    /// Cancellation and deadline expiry both surface as
    /// [`StoreError::Unavailable`] — the caller cannot distinguish a slow
    /// store from an absent one at this layer.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(StoreError::Unavailable("call cancelled".into()))
            }
            res = tokio::time::timeout(self.deadline, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(StoreError::Unavailable(format!(
                    "deadline of {:?} exceeded",
                    self.deadline
                ))),
            },
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::detached(DEFAULT_CALL_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_passes_through_success() {
        let ctx = CallContext::default();
        let out = ctx.run(async { Ok(7u32) }).await.unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn cancelled_context_maps_to_unavailable() {
        let token = CancellationToken::new();
        let ctx = CallContext::new(token.clone(), DEFAULT_CALL_TIMEOUT);
        token.cancel();

        let res: Result<()> = ctx.run(std::future::pending()).await;
        assert!(matches!(res, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn expired_deadline_maps_to_unavailable() {
        let ctx = CallContext::detached(Duration::from_millis(10));
        let res: Result<()> = ctx.run(std::future::pending()).await;
        assert!(matches!(res, Err(StoreError::Unavailable(_))));
    }
}
