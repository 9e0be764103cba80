use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::*;

/// Parameters of a `sampling/createMessage` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageParams {
    pub messages: Vec<SamplingMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_preferences: Option<ModelPreferences>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    pub max_tokens: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl CreateMessageParams {
    /// Single-turn request for `text`, capped at 1024 tokens.
    pub fn user_message(text: impl Into<String>) -> Self {
        Self {
            messages: vec![SamplingMessage::user_text(text)],
            model_preferences: None,
            system_prompt: None,
            temperature: None,
            max_tokens: 1024,
            stop_sequences: None,
            metadata: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: i64) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Prefer a model whose name contains `hint`.
    pub fn with_model_hint(mut self, hint: impl Into<String>) -> Self {
        let prefs = self.model_preferences.get_or_insert_with(ModelPreferences::default);
        prefs.hints.get_or_insert_with(Vec::new).push(ModelHint {
            name: Some(hint.into()),
        });
        self
    }

    /// Text of the first message, which is what single-turn sampling handlers
    /// forward to their model.
    pub fn first_text(&self) -> Option<&str> {
        self.messages.first().and_then(|m| m.content.as_text())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMessageResult {
    pub role: Role,
    pub content: ContentBlock,
    pub model: String,
    #[serde(rename = "stopReason", skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

impl CreateMessageResult {
    /// An assistant text reply produced by `model`.
    pub fn assistant_text(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: ContentBlock::text(text),
            model: model.into(),
            stop_reason: Some(StopReason::EndTurn),
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.content.as_text()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    EndTurn,
    StopSequence,
    MaxTokens,
    #[serde(untagged)]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingMessage {
    pub role: Role,
    pub content: ContentBlock,
}

impl SamplingMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: ContentBlock::text(text),
        }
    }
}

/// Advisory model selection. Priorities run from 0 to 1; the client is free
/// to ignore all of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPreferences {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<Vec<ModelHint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_priority: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_priority: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intelligence_priority: Option<f64>,
}

/// Substring of a preferred model name, e.g. `"anthropic"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_create_message_wire_shape() {
        let params = CreateMessageParams::user_message("write a poem")
            .with_system_prompt("You are a poet!")
            .with_model_hint("anthropic");
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["systemPrompt"], "You are a poet!");
        assert_eq!(value["modelPreferences"]["hints"][0]["name"], "anthropic");
        assert_eq!(value["messages"][0]["content"]["type"], "text");
        assert_eq!(params.first_text(), Some("write a poem"));
    }

    #[test]
    fn test_create_message_result_parse() {
        let result: CreateMessageResult = serde_json::from_value(json!({
            "role": "assistant",
            "content": {"type": "text", "text": "Hark!"},
            "model": "gpt",
            "stopReason": "endTurn"
        }))
        .unwrap();
        assert_eq!(result.text(), Some("Hark!"));
        assert_eq!(result.stop_reason, Some(StopReason::EndTurn));
    }
}
