//! Model gateway: the boundary to the generative-language API.
//!
//! The orchestrator only sees [`ModelGateway`]. [`GeminiClient`] talks to
//! the real HTTP endpoint, [`RetryingGateway`] adds the per-round retry
//! policy on top of any gateway, and [`ScriptedGateway`] replays canned
//! outcomes in tests.

mod client;
mod mock;
mod retry;
mod types;


pub use client::{classify_failure, GeminiClient, SseDecoder};
pub use mock::{ScriptedFailure, ScriptedGateway, ScriptedReply};
pub use retry::RetryingGateway;
pub use types::{
    ApiErrorBody, ApiErrorDetail, Candidate, CandidateContent, Content, GenerateContentRequest,
    GenerateContentResponse, Part, ResponsePart,
};

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::GatewayResult;

/// Receives the accumulated response text after every streamed increment.
pub type ChunkSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// One prompt submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayRequest {
    pub prompt: String,
    pub streaming: bool,
}

impl GatewayRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            streaming: false,
        }
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }
}

/// Submit a prompt and receive the complete text, or an error.
///
/// With `streaming` set, `on_chunk` is called with the text accumulated so
/// far after each increment. Once `cancel` fires no further increments are
/// delivered and the call resolves to [`GatewayError::Cancelled`].
///
/// [`GatewayError::Cancelled`]: crate::error::GatewayError::Cancelled
#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn invoke(
        &self,
        request: &GatewayRequest,
        cancel: &CancellationToken,
        on_chunk: ChunkSink<'_>,
    ) -> GatewayResult<String>;

    /// Whether a credential is present.
    fn is_configured(&self) -> bool;
}

#[async_trait]
impl<T: ModelGateway + ?Sized> ModelGateway for Arc<T> {
    async fn invoke(
        &self,
        request: &GatewayRequest,
        cancel: &CancellationToken,
        on_chunk: ChunkSink<'_>,
    ) -> GatewayResult<String> {
        (**self).invoke(request, cancel, on_chunk).await
    }

    fn is_configured(&self) -> bool {
        (**self).is_configured()
    }
}

/// Gemini client wrapped in the configured retry policy.
pub fn from_config(config: &Config) -> GatewayResult<RetryingGateway<GeminiClient>> {
    let client = GeminiClient::new(&config.gemini, &config.request)?;
    Ok(RetryingGateway::from_config(client, &config.request))
}
