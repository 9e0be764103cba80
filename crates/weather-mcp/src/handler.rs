//! Client-side handling of what the weather server sends unprompted.

use std::sync::Arc;

use async_trait::async_trait;
use mcplink::{
    ClientCtx, ClientHandler,
    schema::{CreateMessageParams, CreateMessageResult, LoggingMessageParams, ProgressParams},
};

use crate::llm::LanguageModel;

/// Logs progress and log notifications and answers sampling requests with a
/// [`LanguageModel`].
#[derive(Clone)]
pub struct WeatherClientHandler {
    model: Arc<dyn LanguageModel>,
}

impl WeatherClientHandler {
    /// Answer sampling requests with `model`.
    pub fn new(model: impl LanguageModel + 'static) -> Self {
        Self {
            model: Arc::new(model),
        }
    }

    /// Like [`new`](Self::new), sharing an already boxed model.
    pub fn from_arc(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

/// Render a progress notification the way the client logs it.
pub fn format_progress(params: &ProgressParams) -> String {
    let total = params
        .total
        .map(|t| t.to_string())
        .unwrap_or_else(|| "-".into());
    format!(
        "MCP PROGRESS: [{}] progress: {} total: {} message: {}",
        params.progress_token,
        params.progress,
        total,
        params.message.as_deref().unwrap_or("")
    )
}

/// Render a log notification the way the client logs it.
pub fn format_logging(params: &LoggingMessageParams) -> String {
    let data = match &params.data {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    format!("MCP LOGGING: [{}] {}", params.level, data)
}

#[async_trait]
impl ClientHandler for WeatherClientHandler {
    async fn create_message(
        &self,
        _context: &ClientCtx,
        params: CreateMessageParams,
    ) -> mcplink::Result<CreateMessageResult> {
        let prompt = params.first_text().ok_or_else(|| {
            mcplink::Error::InvalidRequest("sampling request has no text message".into())
        })?;
        tracing::info!("Sampling with {}", self.model.name());
        let text = self
            .model
            .generate(params.system_prompt.as_deref(), prompt)
            .await
            .map_err(|e| mcplink::Error::SamplingFailed(e.to_string()))?;
        Ok(CreateMessageResult::assistant_text(self.model.name(), text))
    }

    async fn on_progress(&self, _context: &ClientCtx, params: ProgressParams) -> mcplink::Result<()> {
        tracing::info!("{}", format_progress(&params));
        Ok(())
    }

    async fn on_logging_message(
        &self,
        _context: &ClientCtx,
        params: LoggingMessageParams,
    ) -> mcplink::Result<()> {
        tracing::info!("{}", format_logging(&params));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use mcplink::{LoggingLevel, schema::ProgressToken};
    use serde_json::json;

    use super::*;

    #[test]
    fn test_progress_line() {
        let params = ProgressParams {
            progress_token: ProgressToken::from("t1"),
            progress: 0.5,
            total: Some(1.0),
            message: Some("Start sampling".into()),
        };
        assert_eq!(
            format_progress(&params),
            "MCP PROGRESS: [t1] progress: 0.5 total: 1 message: Start sampling"
        );
    }

    #[test]
    fn test_logging_line() {
        let params = LoggingMessageParams {
            level: LoggingLevel::Info,
            logger: None,
            data: json!("hello"),
        };
        assert_eq!(format_logging(&params), "MCP LOGGING: [info] hello");

        let params = LoggingMessageParams {
            level: LoggingLevel::Error,
            logger: Some("weather".into()),
            data: json!({"code": 7}),
        };
        assert_eq!(format_logging(&params), "MCP LOGGING: [error] {\"code\":7}");
    }
}
