//! Server runtime: handshake, tool dispatch and logging control on top of a
//! [`Session`].

use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    context::{LogLevelFilter, ServerCtx},
    error::{Error, Result},
    http::{self, HttpServerHandle},
    negotiation::{PeerInfo, SessionState, negotiate_protocol_version},
    schema::{
        CallToolParams, CallToolResult, Capabilities, Capability, EmptyResult, Implementation,
        InitializeParams, InitializeResult, ListToolsResult, LoggingLevel, SetLevelParams,
        methods,
    },
    session::{Session, SessionConfig},
    toolset::ToolSet,
    transport::{GenericDuplex, StdioTransport, StreamTransport, Transport},
};

/// Protocol server. Cheap to clone; each connection gets its own session
/// sharing the same tool set.
#[derive(Clone)]
pub struct Server {
    info: Implementation,
    tools: ToolSet,
    capabilities: Capabilities,
    instructions: Option<String>,
    timeout: Duration,
}

impl Server {
    /// A server with no tools that declares the `tools` capability.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: Implementation::new(name, version),
            tools: ToolSet::new(),
            capabilities: Capabilities::default().with_tools(false),
            instructions: None,
            timeout: crate::request_handler::DEFAULT_TIMEOUT,
        }
    }

    /// Serve `tools` in `tools/list` and `tools/call`.
    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    /// Declare the `logging` capability so tools may emit log notifications.
    pub fn with_logging(mut self) -> Self {
        self.capabilities = self.capabilities.with_logging();
        self
    }

    /// Replace the declared capabilities wholesale.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Usage hints returned to clients in the `initialize` result.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Timeout for requests the server makes to its clients (sampling, ping).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The registered tools.
    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    /// Timeout applied to requests sent to clients.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Name and version reported in `initialize`.
    pub fn info(&self) -> &Implementation {
        &self.info
    }

    /// Start serving one connection over `transport`.
    pub async fn serve(&self, transport: Box<dyn Transport>) -> Result<ServerHandle> {
        let session = Session::new(
            SessionConfig::new(format!("server:{}", self.info.name))
                .with_timeout(self.timeout)
                .with_capabilities(self.capabilities.clone()),
        );
        self.install(&session);
        session.attach(transport).await?;
        Ok(ServerHandle { session })
    }

    /// Serve a single client on this process's stdin/stdout until it
    /// disconnects.
    pub async fn serve_stdio(self) -> Result<()> {
        let handle = self.serve(Box::new(StdioTransport)).await?;
        handle.closed().await;
        Ok(())
    }

    /// Serve a single client over a reader/writer pair until it disconnects.
    pub async fn serve_stream<R, W>(self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
        W: AsyncWrite + Send + Sync + Unpin + 'static,
    {
        let handle = ServerHandle::from_stream(&self, reader, writer).await?;
        handle.closed().await;
        Ok(())
    }

    /// Serve clients over HTTP with server-sent events. Each SSE connection
    /// is its own session.
    pub async fn serve_http(self, addr: impl AsRef<str>) -> Result<HttpServerHandle> {
        http::serve(self, addr.as_ref()).await
    }

    fn install(&self, session: &Session) {
        let log_level: LogLevelFilter = Arc::new(RwLock::new(LoggingLevel::Debug));

        let server = self.clone();
        session.register_request_handler(methods::INITIALIZE, move |ctx, params| {
            let server = server.clone();
            async move {
                let params: InitializeParams = parse_params(methods::INITIALIZE, params)?;
                let version = negotiate_protocol_version(&params.protocol_version);
                tracing::info!(
                    "Client {} {} initializing (requested {}, using {})",
                    params.client_info.name,
                    params.client_info.version,
                    params.protocol_version,
                    version
                );
                ctx.session.set_state(SessionState::Negotiating)?;
                ctx.session.set_peer(PeerInfo {
                    implementation: params.client_info,
                    capabilities: params.capabilities,
                    protocol_version: version.to_string(),
                });
                let result = InitializeResult::new(
                    server.info.clone(),
                    server.capabilities.clone(),
                    version,
                )
                .with_instructions(server.instructions.clone());
                Ok(serde_json::to_value(result)?)
            }
        });

        session.register_request_handler(methods::PING, |_, _| async {
            Ok(serde_json::to_value(EmptyResult::default())?)
        });

        let tools = self.tools.clone();
        session.register_request_handler(methods::TOOLS_LIST, move |_, _| {
            let result = ListToolsResult { tools: tools.list() };
            async move { Ok(serde_json::to_value(result)?) }
        });

        let tools = self.tools.clone();
        let level = log_level.clone();
        session.register_request_handler(methods::TOOLS_CALL, move |ctx, params| {
            let tools = tools.clone();
            let ctx = ServerCtx::new(ctx, level.clone());
            async move {
                let params: CallToolParams = parse_params(methods::TOOLS_CALL, params)?;
                let result = match tools.invoke(ctx, &params.name, params.arguments).await {
                    Ok(result) => result,
                    Err(e @ (Error::UnknownTool(_) | Error::InvalidArguments { .. })) => {
                        return Err(e);
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        tracing::warn!("Tool {} failed: {}", params.name, e);
                        CallToolResult::new()
                            .with_text_content(e.to_string())
                            .mark_as_error()
                    }
                };
                Ok(serde_json::to_value(result)?)
            }
        });

        session.register_request_handler(methods::SET_LEVEL, move |ctx, params| {
            let level = log_level.clone();
            async move {
                ctx.session.require_local(Capability::Logging)?;
                let params: SetLevelParams = parse_params(methods::SET_LEVEL, params)?;
                tracing::debug!("Client set log level to {}", params.level);
                *level.write().unwrap_or_else(|err| err.into_inner()) = params.level;
                Ok(serde_json::to_value(EmptyResult::default())?)
            }
        });

        session.register_notification_listener(methods::INITIALIZED, |session, _| async move {
            tracing::info!("{} ready", session.label());
            Ok(())
        });
    }
}

fn parse_params<T: DeserializeOwned>(method: &str, params: Option<Value>) -> Result<T> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| Error::InvalidRequest(format!("bad params for {method}: {e}")))
}

/// Handle to one served connection.
#[derive(Clone)]
pub struct ServerHandle {
    session: Session,
}

impl ServerHandle {
    /// Serve `server` over a reader/writer pair, returning immediately.
    pub async fn from_stream<R, W>(server: &Server, reader: R, writer: W) -> Result<Self>
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
        W: AsyncWrite + Send + Sync + Unpin + 'static,
    {
        let duplex = GenericDuplex::new(reader, writer);
        server.serve(Box::new(StreamTransport::new(duplex))).await
    }

    /// The session to the connected client.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Resolve once the client has gone away.
    pub async fn closed(&self) {
        self.session.closed().await;
    }

    /// Close the connection.
    pub async fn stop(self) {
        self.session.close().await;
    }
}
