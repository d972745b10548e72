//! Integration tests for the summarization client
//!
//! Tests HTTP client behavior using wiremock for request/response mocking.

use serde_json::json;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use parliament_loop::ai::{MoonshotClient, Summarizer};
use parliament_loop::config::{AiConfig, RequestConfig};
use parliament_loop::error::AiError;
use parliament_loop::storage::{Comment, NodeType};

/// Create a test client pointing to mock server
fn create_test_client(base_url: &str) -> MoonshotClient {
    let config = AiConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
        model: "moonshot-v1-8k".to_string(),
        max_tokens: 2000,
        temperature: 0.5,
    };

    let request_config = RequestConfig {
        timeout_ms: 5000,
        max_retries: 0, // No retries for testing
        retry_delay_ms: 10,
    };

    MoonshotClient::new(&config, request_config).expect("Failed to create client")
}

/// A full round of comments for testing
fn round(n: usize) -> Vec<Comment> {
    (0..n)
        .map(|i| Comment::new(format!("comment {}", i), "topic-1", NodeType::Topic, None))
        .collect()
}

/// Chat-completions body wrapping a digest payload
fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "id": "cmpl-1",
        "choices": [
            {"index": 0, "message": {"role": "assistant", "content": content}}
        ]
    })
}

#[tokio::test]
async fn test_successful_summarization() {
    let mock_server = MockServer::start().await;

    let digest = json!({
        "consensus": "Most commenters favor congestion pricing",
        "disagreements": [
            {"point": "pricing level", "views": ["flat fee", "income-scaled"]}
        ],
        "new_questions": ["How should revenue be spent?"],
        "confidence_score": 0.9
    });

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer test-api-key"))
        .and(header("Content-Type", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(&digest.to_string())))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri());
    let result = client.summarize(&round(10)).await;

    assert!(result.is_ok(), "Summarization should succeed: {:?}", result.err());
    let metadata = result.unwrap();
    assert_eq!(metadata.consensus, "Most commenters favor congestion pricing");
    assert_eq!(metadata.disagreements.len(), 1);
    assert_eq!(metadata.new_questions.len(), 1);
    assert_eq!(metadata.confidence_score, Some(0.9));
    // Provenance appended by the client
    assert_eq!(metadata.model.as_deref(), Some("moonshot-v1-8k"));
    assert!(metadata.timestamp.is_some());
}

#[tokio::test]
async fn test_default_confidence_applied() {
    let mock_server = MockServer::start().await;

    let digest = json!({
        "consensus": "agreement",
        "disagreements": [],
        "new_questions": []
    });

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(&digest.to_string())))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri());
    let metadata = client.summarize(&round(10)).await.unwrap();
    assert_eq!(metadata.confidence_score, Some(0.8));
}

#[tokio::test]
async fn test_malformed_digest_rejected_without_retry() {
    let mock_server = MockServer::start().await;

    // Missing disagreements and new_questions
    let digest = json!({"consensus": "only consensus"});

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(&digest.to_string())))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri());
    let err = client.summarize(&round(10)).await.unwrap_err();
    assert!(matches!(err, AiError::MalformedResponse { .. }));
}

#[tokio::test]
async fn test_prose_completion_rejected() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body("Everyone mostly agrees, I think.")),
        )
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri());
    let err = client.summarize(&round(10)).await.unwrap_err();
    assert!(matches!(err, AiError::MalformedResponse { .. }));
}

#[tokio::test]
async fn test_server_errors_retried_until_exhaustion() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": {"message": "Internal server error"}
        })))
        .expect(3) // initial call + 2 retries
        .mount(&mock_server)
        .await;

    let config = AiConfig {
        api_key: "test-api-key".to_string(),
        base_url: mock_server.uri(),
        model: "moonshot-v1-8k".to_string(),
        max_tokens: 2000,
        temperature: 0.5,
    };
    let request_config = RequestConfig {
        timeout_ms: 5000,
        max_retries: 2,
        retry_delay_ms: 1,
    };
    let client = MoonshotClient::new(&config, request_config).unwrap();

    let err = client.summarize(&round(10)).await.unwrap_err();
    assert!(matches!(err, AiError::Unavailable { retries: 3, .. }));
}

#[tokio::test]
async fn test_auth_error_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Invalid API key"}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = AiConfig {
        api_key: "bad-key".to_string(),
        base_url: mock_server.uri(),
        model: "moonshot-v1-8k".to_string(),
        max_tokens: 2000,
        temperature: 0.5,
    };
    let request_config = RequestConfig {
        timeout_ms: 5000,
        max_retries: 3,
        retry_delay_ms: 1,
    };
    let client = MoonshotClient::new(&config, request_config).unwrap();

    let err = client.summarize(&round(10)).await.unwrap_err();
    assert!(matches!(err, AiError::Api { status: 401, .. }));
}

#[tokio::test]
async fn test_request_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body("{}"))
                .set_delay(std::time::Duration::from_secs(10)),
        )
        .mount(&mock_server)
        .await;

    let config = AiConfig {
        api_key: "test-api-key".to_string(),
        base_url: mock_server.uri(),
        model: "moonshot-v1-8k".to_string(),
        max_tokens: 2000,
        temperature: 0.5,
    };
    let request_config = RequestConfig {
        timeout_ms: 100,
        max_retries: 0,
        retry_delay_ms: 10,
    };
    let client = MoonshotClient::new(&config, request_config).unwrap();

    let err = client.summarize(&round(10)).await.unwrap_err();
    assert!(
        matches!(err, AiError::Unavailable { .. }),
        "Timeout is transient and exhausts the retry budget: {:?}",
        err
    );
}

#[tokio::test]
async fn test_empty_choices_is_malformed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cmpl-1",
            "choices": []
        })))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri());
    let err = client.summarize(&round(10)).await.unwrap_err();
    assert!(matches!(err, AiError::MalformedResponse { .. }));
}
