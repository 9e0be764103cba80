//! Client runtime: handshake and typed calls on top of a [`Session`].

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use serde_json::Value;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    process::Command,
};

use crate::{
    connection::ClientHandler,
    context::ClientCtx,
    error::{Error, Result},
    http::HttpClientTransport,
    negotiation::{PeerInfo, SessionState},
    request_handler::CallOptions,
    schema::{
        CallToolParams, CallToolResult, Capabilities, Capability, CreateMessageParams,
        EmptyResult, Implementation, InitializeParams, InitializeResult,
        LATEST_PROTOCOL_VERSION, ListToolsResult, LoggingLevel, LoggingMessageParams,
        ProgressParams, ProgressToken, SUPPORTED_PROTOCOL_VERSIONS, SetLevelParams, methods,
    },
    session::{Session, SessionConfig},
    transport::{GenericDuplex, ProcessTransport, StreamTransport, Transport},
};

/// Protocol client.
///
/// `C` handles what the server sends on its own initiative: sampling
/// requests, pings, progress and log notifications.
pub struct Client<C = ()> {
    info: Implementation,
    capabilities: Capabilities,
    timeout: Duration,
    handler: Arc<C>,
    session: Option<Session>,
    server_info: Option<InitializeResult>,
}

impl Client<()> {
    /// A client identifying itself as `name`/`version`, declaring no
    /// capabilities and ignoring server-initiated traffic.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: Implementation::new(name, version),
            capabilities: Capabilities::default(),
            timeout: crate::request_handler::DEFAULT_TIMEOUT,
            handler: Arc::new(()),
            session: None,
            server_info: None,
        }
    }
}

impl<C> Client<C>
where
    C: ClientHandler + 'static,
{
    /// Replace the handler for server-initiated traffic.
    pub fn with_handler<D: ClientHandler + 'static>(mut self, handler: D) -> Client<D> {
        Client {
            info: self.info.clone(),
            capabilities: self.capabilities.clone(),
            timeout: self.timeout,
            handler: Arc::new(handler),
            session: self.session.take(),
            server_info: self.server_info.take(),
        }
    }

    /// Capabilities declared in `initialize`. Declare `sampling` only when the
    /// handler implements [`ClientHandler::create_message`].
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Default timeout for calls to the server.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Connect over `transport` without running the handshake.
    pub async fn connect(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::InvalidConfiguration("client already connected".into()));
        }
        let session = Session::new(
            SessionConfig::new(format!("client:{}", self.info.name))
                .with_timeout(self.timeout)
                .with_capabilities(self.capabilities.clone()),
        );
        self.install(&session);
        session.attach(transport).await?;
        self.session = Some(session);
        Ok(())
    }

    /// Connect over a reader/writer pair without running the handshake.
    pub async fn connect_stream_raw<R, W>(&mut self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
        W: AsyncWrite + Send + Sync + Unpin + 'static,
    {
        let duplex = GenericDuplex::new(reader, writer);
        self.connect(Box::new(StreamTransport::new(duplex))).await
    }

    /// Connect over a reader/writer pair and initialize.
    pub async fn connect_stream<R, W>(&mut self, reader: R, writer: W) -> Result<InitializeResult>
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
        W: AsyncWrite + Send + Sync + Unpin + 'static,
    {
        self.connect_stream_raw(reader, writer).await?;
        self.init().await
    }

    /// Spawn `command` as a server on its stdio and initialize. The child is
    /// killed when the client closes.
    pub async fn connect_process(&mut self, command: Command) -> Result<InitializeResult> {
        self.connect(Box::new(ProcessTransport::new(command))).await?;
        self.init().await
    }

    /// Connect to an HTTP+SSE server at `url` (its SSE endpoint) and
    /// initialize.
    pub async fn connect_http(&mut self, url: &str) -> Result<InitializeResult> {
        self.connect(Box::new(HttpClientTransport::new(url)?)).await?;
        self.init().await
    }

    /// Run the handshake on a connected session.
    pub async fn init(&mut self) -> Result<InitializeResult> {
        let session = self.session()?.clone();
        session.set_state(SessionState::Negotiating)?;
        let params = InitializeParams {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: self.capabilities.clone(),
            client_info: self.info.clone(),
        };
        let result: InitializeResult = session
            .request(methods::INITIALIZE, &params, CallOptions::default())
            .await?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&result.protocol_version.as_str()) {
            session.close().await;
            return Err(Error::InvalidRequest(format!(
                "server chose unsupported protocol version {}",
                result.protocol_version
            )));
        }
        tracing::info!(
            "Connected to {} {} (protocol {})",
            result.server_info.name,
            result.server_info.version,
            result.protocol_version
        );
        session.set_peer(PeerInfo {
            implementation: result.server_info.clone(),
            capabilities: result.capabilities.clone(),
            protocol_version: result.protocol_version.clone(),
        });
        // Ready first, so a server request racing the notification is accepted.
        session.set_state(SessionState::Ready)?;
        session.notify(methods::INITIALIZED, None).await?;

        self.handler.on_connect(&ClientCtx::new(session)).await?;
        self.server_info = Some(result.clone());
        Ok(result)
    }

    /// The session, once connected.
    pub fn session(&self) -> Result<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| Error::InvalidConfiguration("client not connected".into()))
    }

    /// The server's answer to `initialize`, once the handshake is done.
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server_info.as_ref()
    }

    /// Check that the server is still responsive.
    pub async fn ping(&self) -> Result<()> {
        let _: EmptyResult = self
            .session()?
            .request(methods::PING, &Value::Null, CallOptions::default())
            .await?;
        Ok(())
    }

    /// Tools the server offers. Requires the server to declare `tools`.
    pub async fn list_tools(&self) -> Result<ListToolsResult> {
        let session = self.session()?;
        session.require_peer(Capability::Tools)?;
        session
            .request(methods::TOOLS_LIST, &Value::Null, CallOptions::default())
            .await
    }

    /// Call a tool. `arguments` must serialize to an object (or null).
    pub async fn call_tool(&self, name: &str, arguments: impl Serialize) -> Result<CallToolResult> {
        self.call_tool_with(name, arguments, CallOptions::default())
            .await
    }

    /// Call a tool and receive progress notifications tagged with `token`.
    ///
    /// Fails locally with `CapabilityNotSupported` unless this client
    /// declared `progress`; servers only report progress to clients that do.
    pub async fn call_tool_with_progress(
        &self,
        name: &str,
        arguments: impl Serialize,
        token: impl Into<ProgressToken>,
    ) -> Result<CallToolResult> {
        self.session()?.require_local(Capability::Progress)?;
        self.call_tool_with(
            name,
            arguments,
            CallOptions::default().with_progress_token(token),
        )
        .await
    }

    /// Call a tool with explicit per-call options.
    pub async fn call_tool_with(
        &self,
        name: &str,
        arguments: impl Serialize,
        options: CallOptions,
    ) -> Result<CallToolResult> {
        let session = self.session()?;
        session.require_peer(Capability::Tools)?;
        let arguments = match serde_json::to_value(arguments)? {
            Value::Null => None,
            v => Some(v),
        };
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
            _meta: None,
        };
        session.request(methods::TOOLS_CALL, &params, options).await
    }

    /// Ask the server to only send log messages at `level` or above.
    pub async fn set_logging_level(&self, level: LoggingLevel) -> Result<()> {
        let session = self.session()?;
        session.require_peer(Capability::Logging)?;
        let _: EmptyResult = session
            .request(
                methods::SET_LEVEL,
                &SetLevelParams { level },
                CallOptions::default(),
            )
            .await?;
        Ok(())
    }

    /// Close the connection. Outstanding calls fail with `SessionClosed`.
    pub async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = self.handler.on_shutdown(&ClientCtx::new(session.clone())).await {
                tracing::warn!("Client shutdown hook failed: {}", e);
            }
            session.close().await;
        }
    }

    fn install(&self, session: &Session) {
        let handler = self.handler.clone();
        session.register_request_handler(methods::CREATE_MESSAGE, move |ctx, params| {
            let handler = handler.clone();
            async move {
                ctx.session.require_local(Capability::Sampling)?;
                let params: CreateMessageParams =
                    serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|e| {
                        Error::InvalidRequest(format!("bad sampling params: {e}"))
                    })?;
                let client_ctx = ClientCtx::new(ctx.session).with_request_id(ctx.request_id);
                let result = handler.create_message(&client_ctx, params).await?;
                Ok(serde_json::to_value(result)?)
            }
        });

        let handler = self.handler.clone();
        session.register_request_handler(methods::PING, move |ctx, _| {
            let handler = handler.clone();
            async move {
                let client_ctx = ClientCtx::new(ctx.session).with_request_id(ctx.request_id);
                handler.pong(&client_ctx).await?;
                Ok(serde_json::to_value(EmptyResult::default())?)
            }
        });

        let handler = self.handler.clone();
        session.register_notification_listener(methods::PROGRESS, move |session, params| {
            let handler = handler.clone();
            async move {
                let params: ProgressParams = serde_json::from_value(params.unwrap_or(Value::Null))?;
                handler.on_progress(&ClientCtx::new(session), params).await
            }
        });

        let handler = self.handler.clone();
        session.register_notification_listener(methods::LOGGING_MESSAGE, move |session, params| {
            let handler = handler.clone();
            async move {
                let params: LoggingMessageParams =
                    serde_json::from_value(params.unwrap_or(Value::Null))?;
                handler.on_logging_message(&ClientCtx::new(session), params).await
            }
        });
    }
}

impl<C> Drop for Client<C> {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            session.abort();
        }
    }
}
