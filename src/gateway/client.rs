use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::types::{ApiErrorBody, GenerateContentRequest, GenerateContentResponse};
use super::{ChunkSink, GatewayRequest, ModelGateway};
use crate::config::{GeminiConfig, RequestConfig};
use crate::error::{GatewayError, GatewayResult};

const QUOTA_MARKERS: &[&str] = &["RESOURCE_EXHAUSTED", "Resource exhausted", "quota"];

/// Client for the Gemini `generateContent` API
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("configured", &self.api_key.is_some())
            .finish()
    }
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(config: &GeminiConfig, request_config: &RequestConfig) -> GatewayResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(GatewayError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            timeout: Duration::from_millis(request_config.timeout_ms),
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, streaming: bool) -> String {
        let method = if streaming {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        format!("{}/v1beta/models/{}:{}", self.base_url, self.model, method)
    }

    async fn send(
        &self,
        request: &GatewayRequest,
        cancel: &CancellationToken,
    ) -> GatewayResult<reqwest::Response> {
        let api_key = self.api_key.as_deref().ok_or(GatewayError::MissingApiKey)?;
        let body = GenerateContentRequest::from_prompt(request.prompt.as_str());

        let mut builder = self
            .client
            .post(self.endpoint(request.streaming))
            .query(&[("key", api_key)])
            .json(&body);
        if request.streaming {
            builder = builder.query(&[("alt", "sse")]);
        } else {
            builder = builder.timeout(self.timeout);
        }

        debug!(
            model = %self.model,
            streaming = request.streaming,
            prompt_chars = request.prompt.chars().count(),
            "Calling Gemini"
        );

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            sent = builder.send() => sent.map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Transport {
                        status: None,
                        message: format!("request timed out after {}ms", self.timeout.as_millis()),
                    }
                } else {
                    GatewayError::Http(e)
                }
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            let error_body = tokio::select! {
                _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                text = response.text() => text.unwrap_or_default(),
            };
            return Err(classify_failure(Some(status.as_u16()), &error_body));
        }

        Ok(response)
    }

    async fn complete(
        &self,
        request: &GatewayRequest,
        cancel: &CancellationToken,
    ) -> GatewayResult<String> {
        let response = self.send(request, cancel).await?;

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            text = response.text() => text.map_err(GatewayError::Http)?,
        };

        let parsed: GenerateContentResponse =
            serde_json::from_str(&body).map_err(|e| GatewayError::InvalidResponse {
                message: format!("Failed to parse response: {}", e),
            })?;

        parsed
            .first_text()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::InvalidResponse {
                message: "Response contained no candidate text".to_string(),
            })
    }

    async fn stream(
        &self,
        request: &GatewayRequest,
        cancel: &CancellationToken,
        on_chunk: ChunkSink<'_>,
    ) -> GatewayResult<String> {
        let response = self.send(request, cancel).await?;
        let mut events = Box::pin(response.bytes_stream());
        let mut decoder = SseDecoder::default();
        let mut accumulated = String::new();
        let mut increments = 0usize;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(increments, "Stream cancelled");
                    return Err(GatewayError::Cancelled);
                }
                next = events.next() => next,
            };

            let finished = next.is_none();
            let payloads = match next {
                Some(Ok(bytes)) => decoder.push(&bytes),
                Some(Err(e)) => {
                    return Err(GatewayError::Transport {
                        status: None,
                        message: format!("stream interrupted: {}", e),
                    })
                }
                None => decoder.finish(),
            };

            for payload in payloads {
                let delta = decode_event(&payload)?;
                if delta.is_empty() {
                    continue;
                }
                accumulated.push_str(&delta);
                increments += 1;
                if cancel.is_cancelled() {
                    return Err(GatewayError::Cancelled);
                }
                on_chunk(&accumulated);
            }

            if finished {
                break;
            }
        }

        if accumulated.is_empty() {
            return Err(GatewayError::InvalidResponse {
                message: "Stream ended without any text".to_string(),
            });
        }

        debug!(increments, chars = accumulated.chars().count(), "Stream finished");
        Ok(accumulated)
    }
}

#[async_trait]
impl ModelGateway for GeminiClient {
    async fn invoke(
        &self,
        request: &GatewayRequest,
        cancel: &CancellationToken,
        on_chunk: ChunkSink<'_>,
    ) -> GatewayResult<String> {
        let start = Instant::now();
        let result = if request.streaming {
            self.stream(request, cancel, on_chunk).await
        } else {
            self.complete(request, cancel).await
        };

        match &result {
            Ok(text) => info!(
                model = %self.model,
                streaming = request.streaming,
                chars = text.chars().count(),
                latency_ms = start.elapsed().as_millis(),
                "Gemini call succeeded"
            ),
            Err(GatewayError::Cancelled) => {}
            Err(e) => warn!(
                model = %self.model,
                error = %e,
                latency_ms = start.elapsed().as_millis(),
                "Gemini call failed"
            ),
        }

        result
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

fn decode_event(payload: &str) -> GatewayResult<String> {
    let value: serde_json::Value =
        serde_json::from_str(payload).map_err(|e| GatewayError::InvalidResponse {
            message: format!("Malformed stream event: {}", e),
        })?;

    if value.get("error").is_some() {
        return Err(classify_failure(None, payload));
    }

    let event: GenerateContentResponse =
        serde_json::from_value(value).map_err(|e| GatewayError::InvalidResponse {
            message: format!("Unexpected stream event: {}", e),
        })?;
    Ok(event.all_text())
}

/// Map a failed response onto `Quota` or `Transport`.
pub fn classify_failure(status: Option<u16>, body: &str) -> GatewayError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|parsed| parsed.error.message)
        .ok()
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| body.trim().to_string());

    let lowered = body.to_lowercase();
    let quota = status == Some(429)
        || QUOTA_MARKERS
            .iter()
            .any(|marker| lowered.contains(&marker.to_lowercase()));

    if quota {
        GatewayError::Quota { message }
    } else {
        GatewayError::Transport { status, message }
    }
}

/// Incremental Server-Sent-Events decoder yielding `data:` payloads.
///
/// Bytes may split lines and UTF-8 sequences anywhere, so input is
/// buffered until a full line is available.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed bytes, returning every complete `data:` payload.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(payload) = data_payload(&line) {
                payloads.push(payload);
            }
        }

        payloads
    }

    /// Flush a trailing line without a newline.
    pub fn finish(&mut self) -> Vec<String> {
        let line = std::mem::take(&mut self.buffer);
        data_payload(&line).into_iter().collect()
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let payload = line.trim_end_matches(['\r', '\n']).strip_prefix("data:")?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        None
    } else {
        Some(payload.to_string())
    }
}
