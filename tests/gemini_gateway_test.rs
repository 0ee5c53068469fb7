//! Integration tests for the Gemini gateway
//!
//! Tests HTTP client behavior using wiremock for request/response mocking.

use serde_json::json;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

use factcheck_verifier::config::{GeminiConfig, RequestConfig};
use factcheck_verifier::error::GatewayError;
use factcheck_verifier::gateway::{GatewayRequest, GeminiClient, ModelGateway, RetryingGateway};

const GENERATE_PATH: &str = "/v1beta/models/gemini-2.0-flash:generateContent";
const STREAM_PATH: &str = "/v1beta/models/gemini-2.0-flash:streamGenerateContent";

/// Create a test client pointing to mock server
fn create_test_client(base_url: &str) -> GeminiClient {
    let config = GeminiConfig {
        api_key: Some("test-key".to_string()),
        base_url: base_url.to_string(),
        model: "gemini-2.0-flash".to_string(),
    };

    let request_config = RequestConfig {
        timeout_ms: 5000,
        max_attempts: 1,
        retry_delay_ms: 10,
    };

    GeminiClient::new(&config, &request_config).expect("Failed to create client")
}

fn text_body(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": { "parts": [{ "text": text }], "role": "model" },
            "finishReason": "STOP"
        }]
    })
}

fn sse_body(chunks: &[&str]) -> String {
    chunks
        .iter()
        .map(|chunk| format!("data: {}\r\n\r\n", text_body(chunk)))
        .collect()
}

async fn invoke(
    gateway: &dyn ModelGateway,
    request: GatewayRequest,
) -> (Result<String, GatewayError>, Vec<String>) {
    let seen = Mutex::new(Vec::new());
    let sink = |text: &str| seen.lock().unwrap().push(text.to_string());
    let result = gateway
        .invoke(&request, &CancellationToken::new(), &sink)
        .await;
    let seen = seen.into_inner().unwrap();
    (result, seen)
}

#[cfg(test)]
mod generate_tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_generate() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .and(query_param("key", "test-key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(text_body("진실성: 대체로 사실")),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let (result, chunks) = invoke(&client, GatewayRequest::new("기사 분석")).await;

        assert_eq!(result.unwrap(), "진실성: 대체로 사실");
        assert!(chunks.is_empty(), "Non-streaming calls deliver no increments");
    }

    #[tokio::test]
    async fn test_empty_candidates_is_invalid_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let (result, _) = invoke(&client, GatewayRequest::new("기사 분석")).await;

        assert!(matches!(result, Err(GatewayError::InvalidResponse { .. })));
    }

    #[tokio::test]
    async fn test_missing_api_key_sends_nothing() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let config = GeminiConfig {
            api_key: None,
            base_url: mock_server.uri(),
            ..Default::default()
        };
        let client = GeminiClient::new(&config, &RequestConfig::default()).unwrap();
        assert!(!client.is_configured());

        let (result, _) = invoke(&client, GatewayRequest::new("기사 분석")).await;
        assert!(matches!(result, Err(GatewayError::MissingApiKey)));
    }
}

#[cfg(test)]
mod stream_tests {
    use super::*;

    #[tokio::test]
    async fn test_streaming_accumulates_increments() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(STREAM_PATH))
            .and(query_param("alt", "sse"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body(&["진실성: ", "대체로 ", "사실"])),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let (result, chunks) =
            invoke(&client, GatewayRequest::new("기사 분석").streaming(true)).await;

        assert_eq!(result.unwrap(), "진실성: 대체로 사실");
        assert_eq!(
            chunks,
            vec!["진실성: ", "진실성: 대체로 ", "진실성: 대체로 사실"]
        );
    }

    #[tokio::test]
    async fn test_stream_without_text_is_invalid_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(STREAM_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("data: [DONE]\n\n"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let (result, chunks) =
            invoke(&client, GatewayRequest::new("기사 분석").streaming(true)).await;

        assert!(matches!(result, Err(GatewayError::InvalidResponse { .. })));
        assert!(chunks.is_empty());
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[tokio::test]
    async fn test_429_is_quota() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {
                    "code": 429,
                    "message": "Resource has been exhausted (e.g. check quota).",
                    "status": "RESOURCE_EXHAUSTED"
                }
            })))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let (result, _) = invoke(&client, GatewayRequest::new("기사 분석")).await;

        match result {
            Err(GatewayError::Quota { message }) => assert!(message.contains("exhausted")),
            other => panic!("Expected quota error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_500_is_transport() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal error"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let (result, _) = invoke(&client, GatewayRequest::new("기사 분석")).await;

        match result {
            Err(GatewayError::Transport { status, message }) => {
                assert_eq!(status, Some(500));
                assert_eq!(message, "Internal error");
            }
            other => panic!("Expected transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retrying_gateway_exhausts_attempts() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .expect(3)
            .mount(&mock_server)
            .await;

        let gateway = RetryingGateway::new(
            create_test_client(&mock_server.uri()),
            3,
            Duration::from_millis(10),
        );
        let (result, _) = invoke(&gateway, GatewayRequest::new("기사 분석")).await;

        let err = result.unwrap_err();
        assert!(matches!(err, GatewayError::Exhausted { attempts: 3, .. }));
        assert!(matches!(
            err.root(),
            GatewayError::Transport {
                status: Some(503),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_retrying_gateway_recovers() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_body("진실성: 사실")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let gateway = RetryingGateway::new(
            create_test_client(&mock_server.uri()),
            3,
            Duration::from_millis(10),
        );
        let (result, _) = invoke(&gateway, GatewayRequest::new("기사 분석")).await;

        assert_eq!(result.unwrap(), "진실성: 사실");
    }
}
