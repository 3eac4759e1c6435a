//! LLM Chat Client
//!
//! Process-wide shared client for the chat-completions endpoint. Concurrency
//! is bounded by a semaphore and request rate by a token bucket; callers
//! block at the suspension point until both admit the request.
//! Authentication and quota failures surface immediately and are never
//! retried.

use edplan_core::{ChatModel, ChatRequest, ChatResponse};
use edplan_types::{EdPlanError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::debug;

/// Token bucket for request rate limiting
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            tokens: capacity as f64,
            capacity: capacity as f64,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token, returning how long to wait if none is available
    fn try_take(&mut self) -> Option<Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            let deficit = 1.0 - self.tokens;
            Some(Duration::from_secs_f64(deficit / self.refill_rate))
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [edplan_core::ChatMessage],
    temperature: f64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u32,
}

/// Shared HTTP chat-completions client
pub struct HttpChatModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    semaphore: Arc<Semaphore>,
    bucket: Arc<Mutex<TokenBucket>>,
}

impl HttpChatModel {
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        max_concurrent_requests: usize,
        requests_per_minute: u32,
        timeout_seconds: u64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            endpoint,
            api_key,
            semaphore: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
            bucket: Arc::new(Mutex::new(TokenBucket::new(
                requests_per_minute.max(1),
                requests_per_minute.max(1) as f64 / 60.0,
            ))),
        }
    }

    /// Block until the rate limiter admits one request
    async fn admit(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                bucket.try_take()
            };
            match wait {
                None => return,
                Some(delay) => {
                    debug!(delay_ms = delay.as_millis() as u64, "rate limited, waiting");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl ChatModel for HttpChatModel {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| EdPlanError::LockError("LLM semaphore closed".to_string()))?;
        self.admit().await;

        let body = CompletionRequest {
            model: &request.model_id,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_output_tokens,
            response_format: request.json_mode.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        };

        let mut http_request = self.client.post(&self.endpoint).json(&body);
        if let Some(ref key) = self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request
            .send()
            .await
            .map_err(|e| EdPlanError::upstream("llm", format!("request failed: {}", e)))?;

        let status = response.status();
        match status.as_u16() {
            // Authentication and quota errors are surfaced immediately; the
            // generator must not retry them.
            401 | 403 => {
                return Err(EdPlanError::HttpError(format!(
                    "LLM authentication rejected ({})",
                    status
                )))
            }
            429 => {
                return Err(EdPlanError::HttpError(
                    "LLM quota exhausted (429)".to_string(),
                ))
            }
            s if s >= 500 => {
                return Err(EdPlanError::upstream(
                    "llm",
                    format!("server error ({})", status),
                ))
            }
            _ => {}
        }
        if !status.is_success() {
            return Err(EdPlanError::upstream(
                "llm",
                format!("unexpected status {}", status),
            ));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| EdPlanError::upstream("llm", format!("invalid response body: {}", e)))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        Ok(ChatResponse {
            content,
            model_id: if completion.model.is_empty() {
                request.model_id.clone()
            } else {
                completion.model
            },
            total_tokens: completion.usage.map(|u| u.total_tokens),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_bucket_admits_up_to_capacity() {
        let mut bucket = TokenBucket::new(2, 1.0);
        assert!(bucket.try_take().is_none());
        assert!(bucket.try_take().is_none());
        // Third request must wait for a refill
        assert!(bucket.try_take().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_bucket_refills_over_time() {
        let mut bucket = TokenBucket::new(1, 10.0);
        assert!(bucket.try_take().is_none());
        assert!(bucket.try_take().is_some());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(bucket.try_take().is_none());
    }
}
