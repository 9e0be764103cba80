//! End-to-end `getTemperature` calls over an in-memory session.

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use mcplink::{
        Capabilities, ClientCtx, ClientHandler, Server,
        schema::*,
        testutils::{connected_client_and_server_with_caps, shutdown_client_and_server},
    };
    use serde_json::json;
    use tokio::time::{Duration, sleep, timeout};
    use tracing_subscriber::fmt;
    use weather_mcp::{
        CannedModel, FixedTemperature, GET_TEMPERATURE, LanguageModel, NO_SAMPLING_FALLBACK,
        WeatherClientHandler, WeatherSource, weather_server,
    };

    /// Wraps the demo handler and records what reaches the client.
    #[derive(Clone)]
    struct Recorder {
        inner: WeatherClientHandler,
        progress: Arc<Mutex<Vec<(String, f64, Option<String>)>>>,
        logs: Arc<Mutex<Vec<String>>>,
        sampling: Arc<Mutex<Vec<CreateMessageParams>>>,
    }

    impl Recorder {
        fn new(model: impl LanguageModel + 'static) -> Self {
            Self {
                inner: WeatherClientHandler::new(model),
                progress: Arc::default(),
                logs: Arc::default(),
                sampling: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl ClientHandler for Recorder {
        async fn create_message(
            &self,
            context: &ClientCtx,
            params: CreateMessageParams,
        ) -> mcplink::Result<CreateMessageResult> {
            self.sampling.lock().unwrap().push(params.clone());
            self.inner.create_message(context, params).await
        }

        async fn on_progress(
            &self,
            context: &ClientCtx,
            params: ProgressParams,
        ) -> mcplink::Result<()> {
            self.progress.lock().unwrap().push((
                params.progress_token.to_string(),
                params.progress,
                params.message.clone(),
            ));
            self.inner.on_progress(context, params).await
        }

        async fn on_logging_message(
            &self,
            context: &ClientCtx,
            params: LoggingMessageParams,
        ) -> mcplink::Result<()> {
            self.logs.lock().unwrap().push(weather_mcp::format_logging(&params));
            self.inner.on_logging_message(context, params).await
        }
    }

    struct Broken;

    #[async_trait]
    impl LanguageModel for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn generate(&self, _system: Option<&str>, _user: &str) -> weather_mcp::Result<String> {
            Err(weather_mcp::Error::Provider("rate limited".into()))
        }
    }

    struct Offline;

    #[async_trait]
    impl WeatherSource for Offline {
        async fn fetch_temperature(&self, _lat: f64, _lon: f64) -> weather_mcp::Result<f64> {
            Err(weather_mcp::Error::Network("forecast service unreachable".into()))
        }
    }

    fn server(source: impl WeatherSource + 'static) -> Server {
        weather_server(Arc::new(source)).unwrap()
    }

    fn amsterdam() -> serde_json::Value {
        json!({"latitude": 52.37, "longitude": 4.89})
    }

    async fn wait_for_progress(recorder: &Recorder, count: usize) {
        timeout(Duration::from_secs(3), async {
            while recorder.progress.lock().unwrap().len() < count {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_temperature_with_sampling() {
        let _ = fmt::try_init();
        let recorder = Recorder::new(CannedModel::new("O gentle breeze"));
        let (mut client, server) = connected_client_and_server_with_caps(
            &server(FixedTemperature(12.5)),
            recorder.clone(),
            Capabilities::default().with_sampling().with_progress(),
        )
        .await
        .unwrap();
        client.init().await.unwrap();

        let result = timeout(
            Duration::from_secs(3),
            client.call_tool_with_progress(GET_TEMPERATURE, amsterdam(), "t1"),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(!result.is_error());
        assert_eq!(
            result.text(),
            Some(
                "Weather Poem: O gentle breeze\nabout the weather: 12.5°C at location with latitude: 52.37 and longitude: 4.89"
            )
        );
        let structured = result.structured_content.clone().unwrap();
        assert_eq!(structured["temperature"], json!(12.5));
        assert_eq!(structured["poem"], json!("O gentle breeze"));

        wait_for_progress(&recorder, 3).await;
        let progress = recorder.progress.lock().unwrap().clone();
        assert_eq!(
            progress,
            vec![
                ("t1".to_string(), 0.0, Some("Retrieving weather forecast".to_string())),
                ("t1".to_string(), 0.5, Some("Start sampling".to_string())),
                ("t1".to_string(), 1.0, Some("Task completed".to_string())),
            ]
        );

        let sampling = recorder.sampling.lock().unwrap().clone();
        assert_eq!(sampling.len(), 1);
        assert_eq!(sampling[0].system_prompt.as_deref(), Some("You are a poet!"));
        let prompt = sampling[0].first_text().unwrap();
        assert!(prompt.contains("(temperature is in Celsius): 12.5."));
        let hints = serde_json::to_value(&sampling[0].model_preferences).unwrap();
        assert_eq!(hints["hints"][0]["name"], "anthropic");

        assert_eq!(
            recorder.logs.lock().unwrap().as_slice(),
            &["MCP LOGGING: [info] Call getTemperature Tool with latitude: 52.37 and longitude: 4.89"]
        );

        shutdown_client_and_server(client, server).await;
    }

    #[tokio::test]
    async fn test_temperature_without_sampling() {
        let _ = fmt::try_init();
        let recorder = Recorder::new(CannedModel::default());
        let (mut client, server) = connected_client_and_server_with_caps(
            &server(FixedTemperature(-3.0)),
            recorder.clone(),
            Capabilities::default().with_progress(),
        )
        .await
        .unwrap();
        client.init().await.unwrap();

        let result = client
            .call_tool_with_progress(GET_TEMPERATURE, amsterdam(), "t2")
            .await
            .unwrap();
        let text = result.text().unwrap();
        assert!(text.starts_with(&format!("Weather Poem: {NO_SAMPLING_FALLBACK}\n")));
        assert!(text.contains("-3°C"));

        wait_for_progress(&recorder, 2).await;
        let steps: Vec<f64> = recorder
            .progress
            .lock()
            .unwrap()
            .iter()
            .map(|(_, p, _)| *p)
            .collect();
        assert_eq!(steps, vec![0.0, 1.0]);
        assert!(recorder.sampling.lock().unwrap().is_empty());

        shutdown_client_and_server(client, server).await;
    }

    #[tokio::test]
    async fn test_sampling_failure_falls_back() {
        let _ = fmt::try_init();
        let recorder = Recorder::new(Broken);
        let (mut client, server) = connected_client_and_server_with_caps(
            &server(FixedTemperature(20.0)),
            recorder.clone(),
            Capabilities::default().with_sampling(),
        )
        .await
        .unwrap();
        client.init().await.unwrap();

        let result = client.call_tool(GET_TEMPERATURE, amsterdam()).await.unwrap();
        assert!(!result.is_error());
        assert!(
            result
                .text()
                .unwrap()
                .starts_with(&format!("Weather Poem: {NO_SAMPLING_FALLBACK}"))
        );
        assert_eq!(recorder.sampling.lock().unwrap().len(), 1);

        shutdown_client_and_server(client, server).await;
    }

    #[tokio::test]
    async fn test_weather_failure_is_tool_error() {
        let _ = fmt::try_init();
        let recorder = Recorder::new(CannedModel::default());
        let (mut client, server) = connected_client_and_server_with_caps(
            &server(Offline),
            recorder.clone(),
            Capabilities::default().with_sampling(),
        )
        .await
        .unwrap();
        client.init().await.unwrap();

        let result = client.call_tool(GET_TEMPERATURE, amsterdam()).await.unwrap();
        assert!(result.is_error());
        assert!(result.all_text().contains("forecast service unreachable"));
        assert!(recorder.sampling.lock().unwrap().is_empty());

        shutdown_client_and_server(client, server).await;
    }

    #[tokio::test]
    async fn test_bad_coordinates_rejected() {
        let _ = fmt::try_init();
        let (mut client, server) = connected_client_and_server_with_caps(
            &server(FixedTemperature(1.0)),
            Recorder::new(CannedModel::default()),
            Capabilities::default(),
        )
        .await
        .unwrap();
        client.init().await.unwrap();

        let err = client
            .call_tool(GET_TEMPERATURE, json!({"latitude": "north"}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), INVALID_PARAMS);

        shutdown_client_and_server(client, server).await;
    }
}
