//! HTTP + SSE transport integration tests.

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use mcplink::{
        Arguments, Client, ClientCtx, ClientHandler, Result, Server, ToolDescriptor, ToolSet,
        schema::*,
    };
    use serde_json::json;
    use tokio::time::{Duration, sleep, timeout};
    use tracing_subscriber::fmt;

    #[derive(Clone, Default)]
    struct ProgressClient {
        progress: Arc<Mutex<Vec<f64>>>,
    }

    #[async_trait]
    impl ClientHandler for ProgressClient {
        async fn on_progress(&self, _context: &ClientCtx, params: ProgressParams) -> Result<()> {
            self.progress.lock().unwrap().push(params.progress);
            Ok(())
        }
    }

    #[derive(schemars::JsonSchema)]
    #[allow(dead_code)]
    struct EchoParams {
        /// Text
        message: String,
    }

    fn echo_server() -> Server {
        let tools = ToolSet::new();
        tools
            .register(
                ToolDescriptor::new("echo", |ctx, args: Arguments| async move {
                    let message: String = args.require("echo", "message")?;
                    ctx.progress(0.5, None, None).await?;
                    Ok(CallToolResult::new().with_text_content(message))
                })
                .with_description("Echo message")
                .with_schema::<EchoParams>(),
            )
            .unwrap();
        Server::new("http-echo-server", "0.1.0").with_tools(tools)
    }

    #[tokio::test]
    async fn test_http_roundtrip() {
        let _ = fmt::try_init();
        let server = echo_server().serve_http("127.0.0.1:0").await.unwrap();

        let handler = ProgressClient::default();
        let progress = handler.progress.clone();
        let mut client = Client::new("http-client", "0.1.0")
            .with_handler(handler)
            .with_capabilities(Capabilities::default().with_progress());
        let info = timeout(Duration::from_secs(5), client.connect_http(&server.sse_url()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.server_info.name, "http-echo-server");
        assert_eq!(server.session_count(), 1);

        let tools = client.list_tools().await.unwrap();
        assert!(tools.get("echo").is_some());

        let result = client
            .call_tool_with_progress("echo", json!({"message": "hello"}), "p1")
            .await
            .unwrap();
        assert_eq!(result.text(), Some("hello"));

        timeout(Duration::from_secs(3), async {
            while progress.lock().unwrap().is_empty() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(progress.lock().unwrap().as_slice(), &[0.5]);

        client.close().await;
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_http_sessions_are_independent() {
        let _ = fmt::try_init();
        let server = echo_server().serve_http("127.0.0.1:0").await.unwrap();

        let mut first = Client::new("one", "0.1.0");
        let mut second = Client::new("two", "0.1.0");
        first.connect_http(&server.sse_url()).await.unwrap();
        second.connect_http(&server.sse_url()).await.unwrap();
        assert_eq!(server.session_count(), 2);

        let (a, b) = tokio::join!(
            first.call_tool("echo", json!({"message": "a"})),
            second.call_tool("echo", json!({"message": "b"})),
        );
        assert_eq!(a.unwrap().text(), Some("a"));
        assert_eq!(b.unwrap().text(), Some("b"));

        first.close().await;
        second.close().await;
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_to_missing_server_fails() {
        let _ = fmt::try_init();
        let mut client = Client::new("lonely", "0.1.0");
        let err = client
            .connect_http("http://127.0.0.1:9/sse")
            .await
            .unwrap_err();
        assert!(matches!(err, mcplink::Error::Transport(_)));
    }
}
