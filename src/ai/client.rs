use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{parse_digest, ChatRequest, ChatResponse, Message, ResponseFormat};
use super::Summarizer;
use crate::config::{AiConfig, RequestConfig};
use crate::error::{AiError, AiResult};
use crate::prompts::{build_distillation_prompt, DISTILLATION_SYSTEM_PROMPT};
use crate::storage::{Comment, SummaryMetadata};

/// Default confidence recorded when the model omits its own score.
const DEFAULT_CONFIDENCE: f64 = 0.8;

/// OpenAI-compatible chat-completions client for the distillation call.
#[derive(Clone)]
pub struct MoonshotClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    request_config: RequestConfig,
}

impl MoonshotClient {
    /// Create a new summarization client
    pub fn new(config: &AiConfig, request_config: RequestConfig) -> AiResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(AiError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            request_config,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Call the completions endpoint with bounded retry and exponential
    /// backoff. Permanent errors (auth failures, malformed output) are not
    /// retried here; transient ones are, up to the configured budget.
    async fn call_with_retry(&self, request: &ChatRequest) -> AiResult<ChatResponse> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = Duration::from_millis(
                    self.request_config.retry_delay_ms * (2_u64.pow(retries - 1)),
                );
                warn!(
                    model = %self.model,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying summarization request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_request(&url, request).await {
                Ok(response) => {
                    let latency = start.elapsed();
                    info!(
                        model = %self.model,
                        latency_ms = latency.as_millis(),
                        "Summarization call succeeded"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    let latency = start.elapsed();
                    error!(
                        model = %self.model,
                        error = %e,
                        latency_ms = latency.as_millis(),
                        retry = retries,
                        "Summarization call failed"
                    );
                    if !e.is_transient() {
                        return Err(e);
                    }
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(AiError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }

    /// Execute a single request (internal)
    async fn execute_request(&self, url: &str, request: &ChatRequest) -> AiResult<ChatResponse> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Calling summarization endpoint"
        );

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AiError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    AiError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(AiError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let chat_response: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| AiError::MalformedResponse {
                    message: format!("Failed to parse response: {}", e),
                })?;

        Ok(chat_response)
    }
}

#[async_trait]
impl Summarizer for MoonshotClient {
    async fn summarize(&self, comments: &[Comment]) -> AiResult<SummaryMetadata> {
        if comments.is_empty() {
            return Err(AiError::MalformedResponse {
                message: "cannot summarize an empty comment list".to_string(),
            });
        }

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(DISTILLATION_SYSTEM_PROMPT),
                Message::user(build_distillation_prompt(comments)),
            ],
            response_format: ResponseFormat::json_object(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self.call_with_retry(&request).await?;
        let completion = response.completion()?;

        let mut digest = parse_digest(completion)?;
        digest.model = Some(self.model.clone());
        digest.timestamp = Some(Utc::now().to_rfc3339());
        digest.confidence_score = digest.confidence_score.or(Some(DEFAULT_CONFIDENCE));

        Ok(digest)
    }
}
