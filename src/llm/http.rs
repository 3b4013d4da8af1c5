//! OpenAI-compatible chat completions client (Groq, OpenAI).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LlmError;
use crate::llm::keys::KeyPool;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
};

/// HTTP provider speaking the `/chat/completions` dialect.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    provider: String,
    endpoint: String,
    keys: KeyPool,
    model: String,
    timeout: Duration,
    costs: (Decimal, Decimal),
}

impl OpenAiCompatProvider {
    pub fn new(
        provider: &str,
        endpoint: &str,
        keys: KeyPool,
        model: &str,
        timeout: Duration,
        costs: (Decimal, Decimal),
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: provider.to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            provider: provider.to_string(),
            endpoint: endpoint.to_string(),
            keys,
            model: model.to_string(),
            timeout,
            costs,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout {
                provider: self.provider.clone(),
                timeout: self.timeout,
            }
        } else {
            LlmError::Transport {
                provider: self.provider.clone(),
                reason: e.to_string(),
            }
        }
    }
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ApiResponse {
    id: Option<String>,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        self.costs
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = ApiRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let agent = request.agent.as_deref();
        let (key_index, api_key) = self.keys.key_for(agent).await;
        debug!(provider = %self.provider, model = %self.model, agent, key = key_index + 1, messages = request.messages.len(), "Sending completion request");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.keys.rotate(agent, key_index).await;
            return Err(LlmError::RateLimited {
                provider: self.provider.clone(),
                retry_after: parse_retry_after(response.headers().get(RETRY_AFTER)),
            });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            self.keys.rotate(agent, key_index).await;
            return Err(LlmError::AuthFailed {
                provider: self.provider.clone(),
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed {
                provider: self.provider.clone(),
                reason: format!("HTTP {status}: {}", text.chars().take(300).collect::<String>()),
            });
        }

        let parsed: ApiResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.map_send_error(e)
            } else {
                LlmError::InvalidResponse {
                    provider: self.provider.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: self.provider.clone(),
                reason: "response contained no choices".to_string(),
            })?;

        let usage = parsed.usage.unwrap_or(ApiUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            finish_reason: FinishReason::from_api(choice.finish_reason.as_deref()),
            response_id: parsed.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;
    use secrecy::SecretString;

    use super::*;

    #[test]
    fn retry_after_parses_seconds() {
        let v = HeaderValue::from_static("7");
        assert_eq!(parse_retry_after(Some(&v)), Some(Duration::from_secs(7)));
        let bad = HeaderValue::from_static("soon");
        assert_eq!(parse_retry_after(Some(&bad)), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn request_body_skips_unset_limits() {
        let messages = vec![ChatMessage::user("hello")];
        let body = ApiRequest {
            model: "m",
            messages: &messages,
            temperature: None,
            max_tokens: Some(10),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("temperature").is_none());
        assert_eq!(json["max_tokens"], 10);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn response_parses_openai_shape() {
        let raw = r#"{
            "id": "chatcmpl-1",
            "choices": [{"message": {"role": "assistant", "content": "{\"ok\":true}"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 5}
        }"#;
        let parsed: ApiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert_eq!(parsed.usage.unwrap().prompt_tokens, 12);
    }

    async fn chat(headers: axum::http::HeaderMap) -> axum::response::Response {
        use axum::response::IntoResponse;

        let auth = headers
            .get(reqwest::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if auth == "Bearer gsk-1" {
            return (axum::http::StatusCode::TOO_MANY_REQUESTS, [(RETRY_AFTER, "2")]).into_response();
        }
        axum::Json(serde_json::json!({
            "id": "chatcmpl-2",
            "choices": [{"message": {"content": "ok"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1}
        }))
        .into_response()
    }

    #[tokio::test]
    async fn rate_limited_key_is_rotated_for_that_agent() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().route("/v1/chat/completions", axum::routing::post(chat));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let keys = ["gsk-1", "gsk-2"].map(|k| SecretString::from(k.to_string()));
        let keys = KeyPool::new(keys.into()).unwrap();
        let provider = OpenAiCompatProvider::new(
            "groq",
            &format!("http://{addr}/v1/chat/completions"),
            keys,
            "m",
            Duration::from_secs(5),
            (Decimal::ZERO, Decimal::ZERO),
        )
        .unwrap();
        let request = |agent: &str| CompletionRequest::new(vec![ChatMessage::user("hi")]).with_agent(agent);

        let err = provider.complete(request("market_intelligence")).await.unwrap_err();
        assert!(matches!(
            err,
            LlmError::RateLimited { retry_after: Some(d), .. } if d == Duration::from_secs(2)
        ));
        let response = provider.complete(request("market_intelligence")).await.unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(response.input_tokens, 3);

        // The second agent was bound to the healthy key from the start.
        assert!(provider.complete(request("feedback_learning")).await.is_ok());
    }
}
