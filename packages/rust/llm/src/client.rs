use async_trait::async_trait;
use paperfeeder_shared::{LlmEndpoint, PaperFeederError, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{ChatClient, ChatMessage, ChatRequest};

/// User-Agent string for LLM requests.
const USER_AGENT: &str = concat!("PaperFeeder/", env!("CARGO_PKG_VERSION"));

/// Longest slice of an error body kept in error messages.
const MAX_ERROR_BODY: usize = 300;

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiCompatClient {
    /// Build a client from a resolved endpoint. Fails when the endpoint has no key.
    pub fn new(endpoint: &LlmEndpoint) -> Result<Self> {
        let api_key = endpoint.api_key.clone().ok_or_else(|| {
            PaperFeederError::config(format!("no API key for model {}", endpoint.model))
        })?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(endpoint.timeout)
            .build()
            .map_err(|e| PaperFeederError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            model: endpoint.model.clone(),
            api_key,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ChatClient for OpenAiCompatClient {
    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model))]
    async fn complete(&self, request: ChatRequest) -> Result<String> {
        let body = CompletionBody {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PaperFeederError::Llm(format!("request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PaperFeederError::Llm(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(map_http_error(status, &text));
        }

        let parsed: CompletionResponse = serde_json::from_str(&text)
            .map_err(|e| PaperFeederError::Llm(format!("malformed completion response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PaperFeederError::Llm("completion had no content".into()))?;

        debug!(chars = content.len(), "completion received");
        Ok(content)
    }
}

/// Map an HTTP status code to an LLM error with a short body excerpt.
fn map_http_error(status: StatusCode, body: &str) -> PaperFeederError {
    let excerpt: String = body.chars().take(MAX_ERROR_BODY).collect();
    let message = match status.as_u16() {
        401 | 403 => format!("authentication failed ({status}): {excerpt}"),
        429 => format!("rate limited ({status}): {excerpt}"),
        s if s >= 500 => format!("server error ({status}): {excerpt}"),
        _ => format!("HTTP {status}: {excerpt}"),
    };
    PaperFeederError::Llm(message)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn endpoint(server: &MockServer) -> LlmEndpoint {
        LlmEndpoint {
            base_url: format!("{}/v1/", server.uri()),
            model: "gpt-4o-mini".into(),
            api_key: Some("sk-test".into()),
            timeout: Duration::from_secs(5),
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        })
    }

    #[tokio::test]
    async fn sends_openai_shaped_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "hi"}
                ],
                "response_format": {"type": "json_object"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("{\"ok\":true}")))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiCompatClient::new(&endpoint(&server)).expect("client");
        let out = client
            .complete(ChatRequest::new("sys", "hi").json())
            .await
            .expect("completion");
        assert_eq!(out, "{\"ok\":true}");
    }

    #[tokio::test]
    async fn maps_rate_limit_and_auth_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let client = OpenAiCompatClient::new(&endpoint(&server)).expect("client");
        let err = client.complete(ChatRequest::new("s", "u")).await.unwrap_err();
        assert!(matches!(err, PaperFeederError::Llm(_)));
        assert!(err.to_string().contains("rate limited"));

        let err = map_http_error(StatusCode::UNAUTHORIZED, "bad key");
        assert!(err.to_string().contains("authentication failed"));
        let err = map_http_error(StatusCode::BAD_GATEWAY, "");
        assert!(err.to_string().contains("server error"));
    }

    #[tokio::test]
    async fn empty_choices_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let client = OpenAiCompatClient::new(&endpoint(&server)).expect("client");
        let err = client.complete(ChatRequest::new("s", "u")).await.unwrap_err();
        assert!(err.to_string().contains("no content"));
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let endpoint = LlmEndpoint {
            base_url: "http://localhost".into(),
            model: "m".into(),
            api_key: None,
            timeout: Duration::from_secs(1),
        };
        assert!(OpenAiCompatClient::new(&endpoint).unwrap_err().is_fatal());
    }
}
