use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ChunkSink, GatewayRequest, ModelGateway};
use crate::error::{GatewayError, GatewayResult};

/// Error a scripted call fails with.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedFailure {
    Transport(String),
    Quota(String),
    InvalidResponse(String),
    MissingApiKey,
}

impl ScriptedFailure {
    fn to_error(&self) -> GatewayError {
        match self {
            ScriptedFailure::Transport(message) => GatewayError::Transport {
                status: Some(503),
                message: message.clone(),
            },
            ScriptedFailure::Quota(message) => GatewayError::Quota {
                message: message.clone(),
            },
            ScriptedFailure::InvalidResponse(message) => GatewayError::InvalidResponse {
                message: message.clone(),
            },
            ScriptedFailure::MissingApiKey => GatewayError::MissingApiKey,
        }
    }
}

/// Outcome of one scripted call.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedReply {
    /// Complete text in one piece.
    Text(String),
    /// Text delivered as successive increments when streaming.
    Stream(Vec<String>),
    Fail(ScriptedFailure),
    /// Deliver the increments, then block until cancelled.
    Hang(Vec<String>),
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        ScriptedReply::Text(text.into())
    }

    pub fn stream<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScriptedReply::Stream(chunks.into_iter().map(Into::into).collect())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        ScriptedReply::Fail(ScriptedFailure::Transport(message.into()))
    }

    pub fn quota(message: impl Into<String>) -> Self {
        ScriptedReply::Fail(ScriptedFailure::Quota(message.into()))
    }

    pub fn hang<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScriptedReply::Hang(chunks.into_iter().map(Into::into).collect())
    }
}

/// In-process gateway replaying a queue of scripted replies and recording
/// every request it receives. An exhausted script fails with a transport
/// error.
#[derive(Debug)]
pub struct ScriptedGateway {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<GatewayRequest>>,
    configured: bool,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            configured: true,
        }
    }

    /// A gateway reporting no credential.
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new()
        }
    }

    pub fn with_replies(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        let gateway = Self::new();
        for reply in replies {
            gateway.push(reply);
        }
        gateway
    }

    pub fn push(&self, reply: ScriptedReply) {
        locked(&self.replies).push_back(reply);
    }

    /// Number of calls received so far.
    pub fn calls(&self) -> usize {
        locked(&self.requests).len()
    }

    /// Prompts received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        locked(&self.requests)
            .iter()
            .map(|request| request.prompt.clone())
            .collect()
    }

    pub fn requests(&self) -> Vec<GatewayRequest> {
        locked(&self.requests).clone()
    }

    /// Replies not consumed yet.
    pub fn remaining(&self) -> usize {
        locked(&self.replies).len()
    }

    async fn deliver(
        chunks: &[String],
        streaming: bool,
        cancel: &CancellationToken,
        on_chunk: ChunkSink<'_>,
    ) -> GatewayResult<String> {
        let mut accumulated = String::new();
        for chunk in chunks {
            if cancel.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }
            accumulated.push_str(chunk);
            if streaming {
                on_chunk(&accumulated);
                tokio::task::yield_now().await;
            }
        }
        Ok(accumulated)
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn invoke(
        &self,
        request: &GatewayRequest,
        cancel: &CancellationToken,
        on_chunk: ChunkSink<'_>,
    ) -> GatewayResult<String> {
        locked(&self.requests).push(request.clone());
        let reply = locked(&self.replies).pop_front();
        debug!(streaming = request.streaming, reply = ?reply, "Scripted call");

        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        match reply {
            Some(ScriptedReply::Text(text)) => {
                if request.streaming {
                    on_chunk(&text);
                }
                Ok(text)
            }
            Some(ScriptedReply::Stream(chunks)) => {
                Self::deliver(&chunks, request.streaming, cancel, on_chunk).await
            }
            Some(ScriptedReply::Fail(failure)) => Err(failure.to_error()),
            Some(ScriptedReply::Hang(chunks)) => {
                Self::deliver(&chunks, request.streaming, cancel, on_chunk).await?;
                cancel.cancelled().await;
                Err(GatewayError::Cancelled)
            }
            None => Err(GatewayError::Transport {
                status: None,
                message: "scripted gateway has no replies left".to_string(),
            }),
        }
    }

    fn is_configured(&self) -> bool {
        self.configured
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_stream_delivers_accumulated_text() {
        let gateway = ScriptedGateway::with_replies([ScriptedReply::stream(["{\"진위\"", ": \"사실\"}"])]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let text = gateway
            .invoke(
                &GatewayRequest::new("p").streaming(true),
                &CancellationToken::new(),
                &move |partial: &str| sink.lock().unwrap().push(partial.to_string()),
            )
            .await
            .unwrap();

        assert_eq!(text, "{\"진위\": \"사실\"}");
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["{\"진위\"".to_string(), "{\"진위\": \"사실\"}".to_string()]
        );
    }

    #[tokio::test]
    async fn test_non_streaming_skips_callback() {
        let gateway = ScriptedGateway::with_replies([ScriptedReply::stream(["a", "b"])]);
        let text = gateway
            .invoke(
                &GatewayRequest::new("p"),
                &CancellationToken::new(),
                &|_: &str| panic!("no increments expected"),
            )
            .await
            .unwrap();
        assert_eq!(text, "ab");
    }

    #[tokio::test]
    async fn test_records_prompts_and_exhausts() {
        let gateway = ScriptedGateway::with_replies([ScriptedReply::text("ok")]);
        let cancel = CancellationToken::new();

        gateway
            .invoke(&GatewayRequest::new("first"), &cancel, &|_: &str| {})
            .await
            .unwrap();
        let err = gateway
            .invoke(&GatewayRequest::new("second"), &cancel, &|_: &str| {})
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Transport { .. }));
        assert_eq!(gateway.prompts(), vec!["first", "second"]);
        assert_eq!(gateway.remaining(), 0);
    }

    #[tokio::test]
    async fn test_hang_until_cancelled() {
        let gateway = Arc::new(ScriptedGateway::with_replies([ScriptedReply::hang(["부분"])]));
        let cancel = CancellationToken::new();

        let task = {
            let gateway = gateway.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                gateway
                    .invoke(&GatewayRequest::new("p").streaming(true), &cancel, &|_: &str| {})
                    .await
            })
        };

        tokio::task::yield_now().await;
        cancel.cancel();
        let result = task.await.unwrap();
        assert!(matches!(result, Err(GatewayError::Cancelled)));
    }

    #[test]
    fn test_unconfigured() {
        assert!(!ScriptedGateway::unconfigured().is_configured());
        assert!(ScriptedGateway::new().is_configured());
    }
}
