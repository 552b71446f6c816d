//! Deadline and cancellation for node calls

use std::future::Future;
use std::time::Duration;

use shardroute_core::resilience::timeout::NODE_CALL_TIMEOUT;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Bounds every call made during a pass.
///
/// A call that times out or is cancelled fails as `NodeUnreachable`, the same
/// as a transport failure.
#[derive(Debug, Clone)]
pub struct CallContext {
    timeout: Duration,
    cancel_token: CancellationToken,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new(NODE_CALL_TIMEOUT)
    }
}

impl CallContext {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Tie calls to an enclosing cancellation scope
    #[must_use]
    pub fn with_cancellation(timeout: Duration, cancel_token: CancellationToken) -> Self {
        Self {
            timeout,
            cancel_token,
        }
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Run `fut` against `address` under this context's deadline
    pub async fn run<T, F>(&self, address: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            () = self.cancel_token.cancelled() => {
                Err(Error::unreachable(address, "call cancelled"))
            }
            result = tokio::time::timeout(self.timeout, fut) => {
                result.unwrap_or_else(|_| {
                    Err(Error::unreachable(
                        address,
                        format!("timed out after {:?}", self.timeout),
                    ))
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_passes_result_through() {
        let ctx = CallContext::default();
        let value = ctx.run("10.0.0.1:6379", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_unreachable() {
        let ctx = CallContext::new(Duration::from_millis(50));
        let err = ctx
            .run("10.0.0.1:6379", async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NodeUnreachable { ref address, .. } if address == "10.0.0.1:6379"));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_promptly() {
        let token = CancellationToken::new();
        let ctx = CallContext::with_cancellation(Duration::from_secs(3600), token.clone());
        token.cancel();

        let err = ctx
            .run("10.0.0.1:6379", std::future::pending::<Result<()>>())
            .await
            .unwrap_err();

        assert!(ctx.is_cancelled());
        assert!(err.to_string().contains("cancelled"));
    }
}
