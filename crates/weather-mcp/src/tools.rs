//! The `getTemperature` tool and the server that hosts it.

use std::{sync::Arc, time::Duration};

use mcplink::{
    Arguments, CallToolResult, Capability, LoggingLevel, Server, ServerCtx, ToolDescriptor,
    ToolSet, schema::CreateMessageParams,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use crate::weather::WeatherSource;

/// Registered tool name.
pub const GET_TEMPERATURE: &str = "getTemperature";

/// Text used in place of a poem when the client cannot sample.
pub const NO_SAMPLING_FALLBACK: &str = "MCP client doesn't provide sampling capability.";

/// Name the server reports in `initialize`.
pub const SERVER_NAME: &str = "weather-server";

/// How long either side waits on the other's requests. Sampling goes
/// through a model provider, so this must exceed the provider timeout.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(120);

const SYSTEM_PROMPT: &str = "You are a poet!";
const MODEL_HINT: &str = "anthropic";

#[derive(Debug, Deserialize, JsonSchema)]
struct Coordinates {
    /// The location latitude
    latitude: f64,
    /// The location longitude
    longitude: f64,
}

/// Descriptor for `getTemperature`, looking temperatures up in `source`.
pub fn get_temperature(source: Arc<dyn WeatherSource>) -> ToolDescriptor {
    ToolDescriptor::new(GET_TEMPERATURE, move |ctx: ServerCtx, args: Arguments| {
        let source = source.clone();
        async move { run_get_temperature(&ctx, source.as_ref(), &args).await }
    })
    .with_description("Get the temperature (in celsius) for a specific location")
    .with_schema::<Coordinates>()
}

fn sampling_prompt(temperature: f64, at: &Coordinates) -> String {
    format!(
        "For a weather forecast (temperature is in Celsius): {temperature}.\n\
         At location with latitude: {} and longitude: {}.\n\
         Please write an epic poem about this forecast using a Shakespearean style.",
        at.latitude, at.longitude
    )
}

async fn run_get_temperature(
    ctx: &ServerCtx,
    source: &dyn WeatherSource,
    args: &Arguments,
) -> mcplink::Result<CallToolResult> {
    let at: Coordinates = args.deserialize(GET_TEMPERATURE)?;
    ctx.log(
        LoggingLevel::Info,
        format!(
            "Call getTemperature Tool with latitude: {} and longitude: {}",
            at.latitude, at.longitude
        ),
    )
    .await?;

    ctx.progress(0.0, Some(1.0), Some("Retrieving weather forecast"))
        .await?;
    let temperature = source
        .fetch_temperature(at.latitude, at.longitude)
        .await?;

    let poem = if ctx.client_supports(Capability::Sampling) {
        ctx.progress(0.5, Some(1.0), Some("Start sampling")).await?;
        let request = CreateMessageParams::user_message(sampling_prompt(temperature, &at))
            .with_system_prompt(SYSTEM_PROMPT)
            .with_model_hint(MODEL_HINT);
        match ctx.create_message(request).await {
            Ok(reply) => reply.text().unwrap_or(NO_SAMPLING_FALLBACK).to_string(),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!("Sampling failed, using fallback text: {}", e);
                NO_SAMPLING_FALLBACK.to_string()
            }
        }
    } else {
        NO_SAMPLING_FALLBACK.to_string()
    };

    ctx.progress(1.0, Some(1.0), Some("Task completed")).await?;

    Ok(CallToolResult::new()
        .with_text_content(format!(
            "Weather Poem: {poem}\nabout the weather: {temperature}°C at location with latitude: {} and longitude: {}",
            at.latitude, at.longitude
        ))
        .with_structured_content(json!({
            "temperature": temperature,
            "latitude": at.latitude,
            "longitude": at.longitude,
            "poem": poem,
        })))
}

/// The weather server: `getTemperature` backed by `source`, with logging.
pub fn weather_server(source: Arc<dyn WeatherSource>) -> mcplink::Result<Server> {
    let tools = ToolSet::new().with_tool(get_temperature(source))?;
    Ok(Server::new(SERVER_NAME, env!("CARGO_PKG_VERSION"))
        .with_tools(tools)
        .with_logging()
        .with_timeout(CALL_TIMEOUT)
        .with_instructions("Look up the current temperature for a latitude and longitude"))
}

#[cfg(test)]
mod tests {
    use mcplink::{
        Capabilities,
        schema::ProgressToken,
        testutils::TestServerContext,
    };

    use super::*;
    use crate::{error::Error, weather::FixedTemperature};

    struct Unreachable;

    #[async_trait::async_trait]
    impl WeatherSource for Unreachable {
        async fn fetch_temperature(&self, _latitude: f64, _longitude: f64) -> crate::Result<f64> {
            Err(Error::Network("connection refused".into()))
        }
    }

    fn args(latitude: f64, longitude: f64) -> Arguments {
        Arguments::new()
            .set("latitude", latitude)
            .set("longitude", longitude)
    }

    #[test]
    fn test_descriptor_schema() {
        let tool = get_temperature(Arc::new(FixedTemperature(1.0))).tool();
        assert_eq!(tool.name, GET_TEMPERATURE);
        let schema = serde_json::to_value(&tool.input_schema).unwrap();
        assert_eq!(schema["properties"]["latitude"]["type"], "number");
        assert_eq!(schema["properties"]["longitude"]["type"], "number");
        assert_eq!(
            schema["properties"]["latitude"]["description"],
            "The location latitude"
        );
        assert_eq!(
            schema["properties"]["longitude"]["description"],
            "The location longitude"
        );
        assert_eq!(schema["required"], json!(["latitude", "longitude"]));
        assert_eq!(
            tool.description.as_deref(),
            Some("Get the temperature (in celsius) for a specific location")
        );
    }

    #[test]
    fn test_server_outwaits_model_provider() {
        let server = weather_server(Arc::new(FixedTemperature(1.0))).unwrap();
        assert_eq!(server.timeout(), CALL_TIMEOUT);
        assert!(server.timeout() > crate::llm::REQUEST_TIMEOUT);
    }

    #[test]
    fn test_prompt_mentions_forecast() {
        let prompt = sampling_prompt(
            12.5,
            &Coordinates {
                latitude: 52.37,
                longitude: 4.89,
            },
        );
        assert!(prompt.starts_with("For a weather forecast (temperature is in Celsius): 12.5."));
        assert!(prompt.contains("latitude: 52.37 and longitude: 4.89"));
        assert!(prompt.ends_with("Shakespearean style."));
    }

    #[tokio::test]
    async fn test_fallback_without_sampling() {
        let mut test_ctx = TestServerContext::with_progress_token(ProgressToken::from("t1"))
            .await
            .unwrap();
        let result = run_get_temperature(
            &test_ctx.ctx(),
            &FixedTemperature(18.0),
            &args(52.37, 4.89),
        )
        .await
        .unwrap();
        let text = result.text().unwrap();
        assert!(text.starts_with(&format!("Weather Poem: {NO_SAMPLING_FALLBACK}")));
        assert!(text.contains("18°C at location with latitude: 52.37 and longitude: 4.89"));

        let mut progress = Vec::new();
        while let Some((method, params)) = test_ctx.try_recv_notification().await {
            if method == "notifications/progress" {
                progress.push(params.unwrap()["progress"].as_f64().unwrap());
            }
        }
        assert_eq!(progress, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_only_logs_reach_client_without_progress() {
        let mut test_ctx =
            TestServerContext::with_peer(Capabilities::default(), Some(ProgressToken::from("t1")))
                .await
                .unwrap();
        run_get_temperature(&test_ctx.ctx(), &FixedTemperature(18.0), &args(1.0, 2.0))
            .await
            .unwrap();

        let mut methods = Vec::new();
        while let Some((method, _)) = test_ctx.try_recv_notification().await {
            methods.push(method);
        }
        assert_eq!(methods, vec!["notifications/message"]);
    }

    #[tokio::test]
    async fn test_weather_failure_propagates() {
        let test_ctx = TestServerContext::new().await.unwrap();
        let err = run_get_temperature(&test_ctx.ctx(), &Unreachable, &args(0.0, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, mcplink::Error::InternalError(m) if m.contains("connection refused")));
    }
}
