//! OpenAI-compatible chat completion client.
//!
//! Both LLM stages and the report narrator talk to the model through the
//! [`ChatClient`] trait, so tests can substitute scripted responses without a
//! network. [`OpenAiCompatClient`] is the production implementation and works
//! against any endpoint exposing `POST {base_url}/chat/completions`.

mod client;
mod json;

use async_trait::async_trait;
use paperfeeder_shared::Result;
use serde::Serialize;

pub use client::OpenAiCompatClient;
pub use json::{extract_json, parse_json};

/// Message role in a chat request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A single-turn completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the endpoint for a JSON object response.
    pub json_mode: bool,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            temperature: 0.3,
            max_tokens: 1024,
            json_mode: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// Anything that can answer a chat request with text.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Model name, for logs.
    fn model(&self) -> &str;

    async fn complete(&self, request: ChatRequest) -> Result<String>;
}
