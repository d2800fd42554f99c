//! Blocking utilities for CPU-intensive operations.

use crate::error::Error;

/// Execute a CPU-intensive closure on Tokio's blocking threadpool.
///
/// Use this for directory walks, regex matching over large files, or any
/// other work that would starve the async runtime.
pub async fn run_blocking<F, T>(f: F) -> Result<T, Error>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::internal(format!("blocking task failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_blocking() {
        let out = run_blocking(|| 2 + 2).await.unwrap();
        assert_eq!(out, 4);
    }
}
