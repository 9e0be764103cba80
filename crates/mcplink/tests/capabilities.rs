//! Handshake ordering and capability enforcement.
#[cfg(test)]
mod tests {
    use mcplink::{
        Capabilities, Error, LoggingLevel, Server, SessionState, ToolDescriptor, ToolSet,
        schema::*,
        testutils::{connected_client_and_server, shutdown_client_and_server},
    };
    use serde_json::json;
    use tracing_subscriber::fmt;

    #[derive(schemars::JsonSchema)]
    #[allow(dead_code)]
    struct AddParams {
        /// Left
        a: i64,
        /// Right
        b: i64,
    }

    fn server() -> Server {
        let tools = ToolSet::new();
        tools
            .register(
                ToolDescriptor::new("add", |_ctx, args| async move {
                    let a: i64 = args.require("add", "a")?;
                    let b: i64 = args.require("add", "b")?;
                    Ok(CallToolResult::new().with_text_content((a + b).to_string()))
                })
                .with_description("Add two integers")
                .with_schema::<AddParams>(),
            )
            .unwrap();
        Server::new("caps", "1.0.0").with_tools(tools)
    }

    #[tokio::test]
    async fn test_calls_before_initialize_fail_locally() {
        let _ = fmt::try_init();
        let (mut client, server) = connected_client_and_server(&server(), ()).await.unwrap();
        assert_eq!(
            client.session().unwrap().state(),
            SessionState::Uninitialized
        );
        assert!(matches!(
            client.session().unwrap().call("tools/list", None).await,
            Err(Error::NotInitialized(_))
        ));

        let info = client.init().await.unwrap();
        assert_eq!(info.server_info.name, "caps");
        assert_eq!(info.protocol_version, LATEST_PROTOCOL_VERSION);
        assert_eq!(client.session().unwrap().state(), SessionState::Ready);
        client.ping().await.unwrap();

        shutdown_client_and_server(client, server).await;
    }

    #[tokio::test]
    async fn test_tools_listed_with_schema() {
        let _ = fmt::try_init();
        let (mut client, server) = connected_client_and_server(&server(), ()).await.unwrap();
        client.init().await.unwrap();

        let tools = client.list_tools().await.unwrap();
        let add = tools.get("add").unwrap();
        assert_eq!(add.description.as_deref(), Some("Add two integers"));
        assert_eq!(add.input_schema.required, vec!["a", "b"]);

        let sum = client.call_tool("add", json!({"a": 2, "b": 3})).await.unwrap();
        assert_eq!(sum.text(), Some("5"));

        shutdown_client_and_server(client, server).await;
    }

    #[tokio::test]
    async fn test_tool_errors_are_invalid_params() {
        let _ = fmt::try_init();
        let (mut client, server) = connected_client_and_server(&server(), ()).await.unwrap();
        client.init().await.unwrap();

        let unknown = client.call_tool("nope", json!({})).await.unwrap_err();
        assert_eq!(unknown.code(), INVALID_PARAMS);

        let missing = client.call_tool("add", json!({"a": 1})).await.unwrap_err();
        assert_eq!(missing.code(), INVALID_PARAMS);

        let wrong = client
            .call_tool("add", json!({"a": 1, "b": "two"}))
            .await
            .unwrap_err();
        assert_eq!(wrong.code(), INVALID_PARAMS);

        let unknown_method = client
            .session()
            .unwrap()
            .call("resources/list", None)
            .await
            .unwrap_err();
        assert!(matches!(unknown_method, Error::MethodNotFound(_)));

        shutdown_client_and_server(client, server).await;
    }

    #[tokio::test]
    async fn test_undeclared_peer_capability_fails_locally() {
        let _ = fmt::try_init();
        // Without `with_logging`, the server does not declare logging.
        let (mut client, server) = connected_client_and_server(&server(), ()).await.unwrap();
        client.init().await.unwrap();
        assert_eq!(
            client.set_logging_level(LoggingLevel::Debug).await,
            Err(Error::CapabilityNotSupported("logging".into()))
        );

        let bare = Server::new("bare", "1.0.0").with_capabilities(Capabilities::default());
        let (mut client2, server2) = connected_client_and_server(&bare, ()).await.unwrap();
        client2.init().await.unwrap();
        assert_eq!(
            client2.list_tools().await.unwrap_err(),
            Error::CapabilityNotSupported("tools".into())
        );

        shutdown_client_and_server(client, server).await;
        shutdown_client_and_server(client2, server2).await;
    }
}
