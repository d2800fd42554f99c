//! Cancellation and deadline context shared by every suspension point.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// A cancellation scope handed down from the loop to LLM calls, tool
/// executions, and subprocesses. Cloning shares the same token; child
/// scopes created with [`Ctx::child`] are cancelled with their parent but
/// can also be cancelled independently (and may carry a tighter deadline).
#[derive(Debug, Clone)]
pub struct Ctx {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Ctx {
    fn default() -> Self {
        Self::new()
    }
}

impl Ctx {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A child scope: cancelled when this scope is, cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// A child scope with a deadline `timeout` from now. The effective
    /// deadline never extends past the parent's.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) => Some(parent.min(candidate)),
            None => Some(candidate),
        };
        Self {
            token: self.token.child_token(),
            deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, if one is set. Zero once passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail fast at a suspension point.
    pub fn check(&self) -> Result<(), Error> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::timeout("deadline exceeded"));
            }
        }
        Ok(())
    }

    /// Resolves when the scope is cancelled or its deadline passes.
    pub async fn done(&self) -> Error {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => Error::Cancelled,
                    _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                        Error::timeout("deadline exceeded")
                    }
                }
            }
            None => {
                self.token.cancelled().await;
                Error::Cancelled
            }
        }
    }

    /// Run `fut` until it completes or this scope ends, whichever is first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, Error>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            err = self.done() => Err(err),
            value = fut => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fresh_ctx_passes_check() {
        let ctx = Ctx::new();
        assert!(ctx.check().is_ok());
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_child() {
        let ctx = Ctx::new();
        let child = ctx.child();
        ctx.cancel();
        assert!(child.is_cancelled());
        assert!(matches!(child.check(), Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_child_cancel_leaves_parent() {
        let ctx = Ctx::new();
        let child = ctx.child();
        child.cancel();
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_deadline_check() {
        let ctx = Ctx::new().child_with_timeout(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(ctx.check(), Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_child_deadline_never_extends_parent() {
        let parent = Ctx::new().child_with_timeout(Duration::from_millis(10));
        let child = parent.child_with_timeout(Duration::from_secs(60));
        assert!(child.deadline().unwrap() <= parent.deadline().unwrap());
    }

    #[tokio::test]
    async fn test_run_returns_value() {
        let ctx = Ctx::new();
        let out = ctx.run(async { 7 }).await.unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn test_run_aborts_on_cancel() {
        let ctx = Ctx::new();
        let ctx2 = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            ctx2.cancel();
        });
        let out: Result<(), Error> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
            })
            .await;
        assert!(matches!(out, Err(Error::Cancelled)));
    }
}
