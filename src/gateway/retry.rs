use async_trait::async_trait;
use std::fmt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use super::{ChunkSink, GatewayRequest, ModelGateway};
use crate::config::RequestConfig;
use crate::error::{GatewayError, GatewayResult};

/// Decorator adding the per-round retry policy to any [`ModelGateway`].
///
/// Up to `max_attempts` attempts, a fixed delay between them. Cancellation
/// is never retried and also interrupts the back-off sleep.
pub struct RetryingGateway<G> {
    inner: G,
    max_attempts: u32,
    delay: Duration,
}

impl<G: ModelGateway> RetryingGateway<G> {
    pub fn new(inner: G, max_attempts: u32, delay: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_config(inner: G, config: &RequestConfig) -> Self {
        Self::new(
            inner,
            config.max_attempts,
            Duration::from_millis(config.retry_delay_ms),
        )
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }
}

impl<G> fmt::Debug for RetryingGateway<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingGateway")
            .field("max_attempts", &self.max_attempts)
            .field("delay", &self.delay)
            .finish()
    }
}

#[async_trait]
impl<G: ModelGateway> ModelGateway for RetryingGateway<G> {
    async fn invoke(
        &self,
        request: &GatewayRequest,
        cancel: &CancellationToken,
        on_chunk: ChunkSink<'_>,
    ) -> GatewayResult<String> {
        let total_start = Instant::now();
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }
            attempt += 1;

            let err = match self.inner.invoke(request, cancel, on_chunk).await {
                Ok(text) => return Ok(text),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if attempt >= self.max_attempts {
                error!(
                    attempt,
                    max = self.max_attempts,
                    elapsed_ms_total = total_start.elapsed().as_millis(),
                    error = %err,
                    "Model call exhausted retries"
                );
                return Err(GatewayError::Exhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            warn!(
                attempt,
                max = self.max_attempts,
                delay_ms = self.delay.as_millis(),
                error = %err,
                "Model call failed, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
    }

    fn is_configured(&self) -> bool {
        self.inner.is_configured()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ScriptedFailure, ScriptedGateway, ScriptedReply};
    use std::sync::Arc;

    fn retrying(script: Arc<ScriptedGateway>) -> RetryingGateway<Arc<ScriptedGateway>> {
        RetryingGateway::new(script, 3, Duration::from_millis(1000))
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let script = Arc::new(ScriptedGateway::new());
        script.push(ScriptedReply::transport("503"));
        script.push(ScriptedReply::quota("RESOURCE_EXHAUSTED"));
        script.push(ScriptedReply::text("{\"진위\": \"사실\"}"));

        let gateway = retrying(script.clone());
        let text = gateway
            .invoke(&GatewayRequest::new("p"), &CancellationToken::new(), &|_: &str| {})
            .await
            .unwrap();

        assert_eq!(text, "{\"진위\": \"사실\"}");
        assert_eq!(script.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_with_last_error() {
        let script = Arc::new(ScriptedGateway::new());
        for _ in 0..3 {
            script.push(ScriptedReply::transport("connection reset"));
        }

        let gateway = retrying(script.clone());
        let err = gateway
            .invoke(&GatewayRequest::new("p"), &CancellationToken::new(), &|_: &str| {})
            .await
            .unwrap_err();

        match err {
            GatewayError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(last.to_string().contains("connection reset"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(script.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_key_not_retried() {
        let script = Arc::new(ScriptedGateway::new());
        script.push(ScriptedReply::Fail(ScriptedFailure::MissingApiKey));

        let err = retrying(script.clone())
            .invoke(&GatewayRequest::new("p"), &CancellationToken::new(), &|_: &str| {})
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::MissingApiKey));
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let script = Arc::new(ScriptedGateway::new());
        script.push(ScriptedReply::transport("boom"));
        script.push(ScriptedReply::text("never reached"));

        let gateway = retrying(script.clone());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let err = gateway
            .invoke(&GatewayRequest::new("p"), &cancel, &|_: &str| {})
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_first_attempt() {
        let script = Arc::new(ScriptedGateway::new());
        script.push(ScriptedReply::text("unused"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = retrying(script.clone())
            .invoke(&GatewayRequest::new("p"), &cancel, &|_: &str| {})
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Cancelled));
        assert_eq!(script.calls(), 0);
    }
}
