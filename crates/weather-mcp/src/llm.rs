//! Language model providers used to answer sampling requests.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A text generator.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model name reported back in sampling results.
    fn name(&self) -> &str;

    /// Generate a reply to `user_prompt`, optionally steered by
    /// `system_prompt`.
    async fn generate(&self, system_prompt: Option<&str>, user_prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Any provider speaking the OpenAI chat completions API.
#[derive(Debug, Clone)]
pub struct OpenAiCompatible {
    client: reqwest::Client,
    endpoint: Url,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompatible {
    /// Provider rooted at `base` (e.g. `https://api.openai.com/v1`), using
    /// `model` for every completion.
    pub fn new(base: &str, model: impl Into<String>) -> Result<Self> {
        let endpoint = crate::join_url(base, "chat/completions")?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint,
            model: model.into(),
            api_key: None,
        })
    }

    /// Send `key` as a bearer token.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// The chat completions URL requests go to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatible {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, system_prompt: Option<&str>, user_prompt: &str) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: user_prompt,
        });
        let body = ChatRequest {
            model: &self.model,
            messages,
        };

        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Provider(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!("{status}: {detail}")));
        }
        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("unexpected completion payload: {e}")))?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Provider("completion had no content".into()))
    }
}

/// Offline model that always answers with the same text.
#[derive(Debug, Clone)]
pub struct CannedModel {
    reply: String,
}

impl CannedModel {
    /// A model that always answers `reply`.
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

impl Default for CannedModel {
    fn default() -> Self {
        Self::new("Shall I compare thee to a summer's day? The sky declines to say.")
    }
}

#[async_trait]
impl LanguageModel for CannedModel {
    fn name(&self) -> &str {
        "canned"
    }

    async fn generate(&self, _system_prompt: Option<&str>, _user_prompt: &str) -> Result<String> {
        Ok(self.reply.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_keeps_base_path() {
        let model = OpenAiCompatible::new("https://api.example.com/v1", "gpt").unwrap();
        assert_eq!(
            model.endpoint().as_str(),
            "https://api.example.com/v1/chat/completions"
        );
        let model = OpenAiCompatible::new("https://api.example.com/v1/", "gpt").unwrap();
        assert_eq!(
            model.endpoint().as_str(),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_body_shape() {
        let body = ChatRequest {
            model: "m",
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You are a poet!",
                },
                ChatMessage {
                    role: "user",
                    content: "hi",
                },
            ],
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "model": "m",
                "messages": [
                    {"role": "system", "content": "You are a poet!"},
                    {"role": "user", "content": "hi"},
                ]
            })
        );
    }

    #[tokio::test]
    async fn test_canned_model() {
        let model = CannedModel::new("verse");
        assert_eq!(model.generate(Some("sys"), "prompt").await.unwrap(), "verse");
        assert_eq!(model.name(), "canned");
    }

    #[tokio::test]
    async fn test_unreachable_provider() {
        let model = OpenAiCompatible::new("http://127.0.0.1:9", "m").unwrap();
        assert!(matches!(
            model.generate(None, "hi").await,
            Err(Error::Provider(_))
        ));
    }
}
