//! Request/response correlation, timeouts and cancellation across a live
//! client and server.
#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use futures::{SinkExt, StreamExt};
    use mcplink::{
        Arguments, CallOptions, Client, Error, Server, ToolDescriptor, ToolSet,
        codec::JsonRpcCodec,
        schema::*,
        testutils::{connected_client_and_server, shutdown_client_and_server},
    };
    use serde_json::json;
    use tokio::{
        io::{DuplexStream, duplex},
        time::{Duration, sleep, timeout},
    };
    use tokio_util::{codec::Framed, sync::CancellationToken};
    use tracing_subscriber::fmt;

    type Raw = Framed<DuplexStream, JsonRpcCodec>;

    /// Records when a tool future is dropped before finishing.
    struct DropFlag(Arc<Mutex<Vec<String>>>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.lock().unwrap().push("dropped".into());
        }
    }

    #[derive(schemars::JsonSchema)]
    #[allow(dead_code)]
    struct SleepParams {
        /// Delay in milliseconds
        ms: u64,
    }

    fn sleepy_server(events: Arc<Mutex<Vec<String>>>) -> Server {
        let tools = ToolSet::new();
        tools
            .register(
                ToolDescriptor::new("sleep", |_ctx, args: Arguments| async move {
                    let ms: u64 = args.require("sleep", "ms")?;
                    sleep(Duration::from_millis(ms)).await;
                    Ok(CallToolResult::new().with_text_content(ms.to_string()))
                })
                .with_schema::<SleepParams>(),
            )
            .unwrap();
        tools
            .register(ToolDescriptor::new("hang", move |_ctx, _args| {
                let events = events.clone();
                async move {
                    let _flag = DropFlag(events.clone());
                    sleep(Duration::from_secs(60)).await;
                    events.lock().unwrap().push("finished".into());
                    Ok(CallToolResult::new())
                }
            }))
            .unwrap();
        Server::new("sleepy", "1.0.0").with_tools(tools)
    }

    async fn next(raw: &mut Raw) -> JSONRPCMessage {
        timeout(Duration::from_secs(3), raw.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
            .unwrap()
    }

    /// Play the server side of the handshake by hand.
    async fn raw_server() -> (Client, Raw) {
        let (ours, theirs) = duplex(64 * 1024);
        let mut raw = Framed::new(theirs, JsonRpcCodec::new());
        let handshake = tokio::spawn(async move {
            let JSONRPCMessage::Request(init) = next(&mut raw).await else {
                panic!("expected initialize");
            };
            assert_eq!(init.method, "initialize");
            raw.send(JSONRPCMessage::result(
                init.id,
                json!({
                    "protocolVersion": LATEST_PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "raw", "version": "0"}
                }),
            ))
            .await
            .unwrap();
            let initialized = next(&mut raw).await;
            assert_eq!(initialized.method(), Some("notifications/initialized"));
            raw
        });
        let (reader, writer) = tokio::io::split(ours);
        let mut client = Client::new("test-client", "1.0.0").with_timeout(Duration::from_millis(200));
        client.connect_stream(reader, writer).await.unwrap();
        (client, handshake.await.unwrap())
    }

    #[tokio::test]
    async fn test_concurrent_calls_resolve_by_id() {
        let _ = fmt::try_init();
        let (mut client, server) = connected_client_and_server(&sleepy_server(Default::default()), ())
            .await
            .unwrap();
        client.init().await.unwrap();

        let (a, b, c) = tokio::join!(
            client.call_tool("sleep", json!({"ms": 300})),
            client.call_tool("sleep", json!({"ms": 10})),
            client.call_tool("sleep", json!({"ms": 150})),
        );
        assert_eq!(a.unwrap().text(), Some("300"));
        assert_eq!(b.unwrap().text(), Some("10"));
        assert_eq!(c.unwrap().text(), Some("150"));
        assert_eq!(client.session().unwrap().pending_calls(), 0);

        shutdown_client_and_server(client, server).await;
    }

    #[tokio::test]
    async fn test_timeout_discards_late_response() {
        let _ = fmt::try_init();
        let (client, mut raw) = raw_server().await;

        let caller = tokio::spawn(async move {
            let err = client.call_tool("slow", json!({})).await.unwrap_err();
            (client, err)
        });
        let JSONRPCMessage::Request(request) = next(&mut raw).await else {
            panic!("expected tools/call");
        };
        let (client, err) = caller.await.unwrap();
        assert!(matches!(err, Error::Timeout { .. }));

        // The abandoned request is cancelled on the wire.
        let JSONRPCMessage::Notification(cancelled) = next(&mut raw).await else {
            panic!("expected cancellation");
        };
        assert_eq!(cancelled.method, "notifications/cancelled");
        assert_eq!(cancelled.params.unwrap()["requestId"], json!(request.id));

        // A late answer is ignored and the session keeps working.
        raw.send(JSONRPCMessage::result(request.id, json!({"content": []})))
            .await
            .unwrap();
        let follow_up = tokio::spawn(async move {
            let result = client.call_tool("fast", json!({})).await;
            (client, result)
        });
        let JSONRPCMessage::Request(second) = next(&mut raw).await else {
            panic!("expected second tools/call");
        };
        raw.send(JSONRPCMessage::result(
            second.id,
            json!({"content": [{"type": "text", "text": "fresh"}]}),
        ))
        .await
        .unwrap();
        let (client, result) = follow_up.await.unwrap();
        assert_eq!(result.unwrap().text(), Some("fresh"));
        assert_eq!(client.session().unwrap().pending_calls(), 0);
        assert!(!client.session().unwrap().is_closed());
    }

    #[tokio::test]
    async fn test_caller_cancellation_aborts_remote_handler() {
        let _ = fmt::try_init();
        let events = Arc::new(Mutex::new(Vec::new()));
        let (mut client, server) = connected_client_and_server(&sleepy_server(events.clone()), ())
            .await
            .unwrap();
        client.init().await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = client
            .call_tool_with("hang", json!({}), CallOptions::default().with_cancel(cancel))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));

        timeout(Duration::from_secs(3), async {
            while events.lock().unwrap().is_empty() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(events.lock().unwrap().as_slice(), &["dropped"]);

        shutdown_client_and_server(client, server).await;
    }

    #[tokio::test]
    async fn test_transport_loss_fails_pending_calls() {
        let _ = fmt::try_init();
        let (client, raw) = raw_server().await;
        let client = Arc::new(client);
        let caller = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .call_tool_with(
                        "slow",
                        json!({}),
                        CallOptions::default().with_timeout(Duration::from_secs(10)),
                    )
                    .await
            })
        };
        sleep(Duration::from_millis(50)).await;
        drop(raw);
        let err = timeout(Duration::from_secs(3), caller)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert_eq!(err, Error::SessionClosed);
        timeout(Duration::from_secs(3), client.session().unwrap().closed())
            .await
            .unwrap();
    }
}
