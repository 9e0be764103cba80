//! Test utilities for `mcplink`.
//!
//! Helpers shared by the unit tests, the integration tests and downstream
//! crates: in-memory duplex pipes, connected client/server pairs, a raw
//! framed peer for poking a server with hand-written envelopes, and a
//! [`ServerCtx`] wired to a capturing peer.

use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{
    io::{self, AsyncRead, AsyncWrite, DuplexStream},
    sync::mpsc,
    time::timeout,
};
use tokio_util::codec::Framed;

use crate::{
    Client, ClientHandler, Server, ServerCtx, ServerHandle,
    codec::JsonRpcCodec,
    context::LogLevelFilter,
    error::{Error, Result},
    negotiation::{PeerInfo, SessionState},
    schema::{
        Capabilities, Implementation, JSONRPCMessage, LATEST_PROTOCOL_VERSION, LoggingLevel,
        ProgressToken, RequestId, RequestMeta, ResponsePayload, methods,
    },
    session::{RequestCtx, Session, SessionConfig},
    transport::StreamTransport,
};

/// How long helpers wait for something to arrive before giving up.
const RECV_TIMEOUT: Duration = Duration::from_secs(3);

/// Create two in-memory pipes forming one bidirectional channel. The first
/// pair goes to the server (`reader`, `writer`), the second to the client.
pub fn make_duplex_pair() -> (
    impl AsyncRead + Send + Sync + Unpin + 'static,
    impl AsyncWrite + Send + Sync + Unpin + 'static,
    impl AsyncRead + Send + Sync + Unpin + 'static,
    impl AsyncWrite + Send + Sync + Unpin + 'static,
) {
    let (server_reader, client_writer) = io::duplex(64 * 1024);
    let (client_reader, server_writer) = io::duplex(64 * 1024);
    (server_reader, server_writer, client_reader, client_writer)
}

/// Start `server` in-process and connect a client with `client_handler`,
/// without running the handshake.
pub async fn connected_client_and_server<C>(
    server: &Server,
    client_handler: C,
) -> Result<(Client<C>, ServerHandle)>
where
    C: ClientHandler + 'static,
{
    connected_client_and_server_with_caps(server, client_handler, Capabilities::default()).await
}

/// Like [`connected_client_and_server`], declaring `capabilities` for the
/// client.
pub async fn connected_client_and_server_with_caps<C>(
    server: &Server,
    client_handler: C,
    capabilities: Capabilities,
) -> Result<(Client<C>, ServerHandle)>
where
    C: ClientHandler + 'static,
{
    let (server_reader, server_writer, client_reader, client_writer) = make_duplex_pair();
    let server_handle = ServerHandle::from_stream(server, server_reader, server_writer).await?;
    let mut client = Client::new("test-client", "1.0.0")
        .with_handler(client_handler)
        .with_capabilities(capabilities);
    client
        .connect_stream_raw(client_reader, client_writer)
        .await?;
    Ok((client, server_handle))
}

/// Shut down a pair created by [`connected_client_and_server`]: drop the
/// client, then wait briefly for the server to notice.
pub async fn shutdown_client_and_server<C>(client: Client<C>, server: ServerHandle)
where
    C: ClientHandler + 'static,
{
    drop(client);
    if timeout(RECV_TIMEOUT, server.closed()).await.is_err() {
        tracing::warn!("server did not notice client shutdown");
    }
}

/// A framed endpoint talking to a server with hand-written envelopes.
pub struct RawPeer {
    framed: Framed<DuplexStream, JsonRpcCodec>,
    server: ServerHandle,
}

impl RawPeer {
    /// Serve `server` over an in-memory pipe and return the other end.
    pub async fn serve(server: &Server) -> Result<Self> {
        let (ours, theirs) = io::duplex(64 * 1024);
        let server = server.serve(Box::new(StreamTransport::new(theirs))).await?;
        Ok(Self {
            framed: Framed::new(ours, JsonRpcCodec::new()),
            server,
        })
    }

    /// Handle to the server being exercised.
    pub fn server(&self) -> &ServerHandle {
        &self.server
    }

    /// Send one envelope as-is.
    pub async fn send(&mut self, message: JSONRPCMessage) -> Result<()> {
        self.framed.send(message).await
    }

    /// Next envelope from the server.
    pub async fn recv(&mut self) -> Result<JSONRPCMessage> {
        match timeout(RECV_TIMEOUT, self.framed.next()).await {
            Err(_) => Err(Error::Timeout {
                request_id: "raw-peer".into(),
                timeout_ms: RECV_TIMEOUT.as_millis() as u64,
            }),
            Ok(None) => Err(Error::SessionClosed),
            Ok(Some(item)) => item?,
        }
    }

    /// Send a request and wait for its response, skipping anything else the
    /// server sends meanwhile. An error response becomes `Err`.
    pub async fn roundtrip(&mut self, request: JSONRPCMessage) -> Result<Value> {
        let JSONRPCMessage::Request(ref req) = request else {
            return Err(Error::InvalidRequest("roundtrip needs a request".into()));
        };
        let id = req.id.clone();
        self.send(request).await?;
        loop {
            if let JSONRPCMessage::Response(response) = self.recv().await?
                && response.id == id
            {
                return match response.payload {
                    ResponsePayload::Result(value) => Ok(value),
                    ResponsePayload::Error(error) => Err(Error::from_error_object(error)),
                };
            }
        }
    }
}

/// A [`ServerCtx`] for exercising tool handlers directly.
///
/// The context's session is joined to a peer that records every
/// notification it receives. Unless built with
/// [`with_peer`](Self::with_peer), the peer declares `progress` only when a
/// progress token is given.
pub struct TestServerContext {
    ctx: ServerCtx,
    log_level: LogLevelFilter,
    notifications: mpsc::UnboundedReceiver<(String, Option<Value>)>,
    _peer: Session,
}

impl TestServerContext {
    /// A context whose server declares `logging`, with no progress token.
    pub async fn new() -> Result<Self> {
        Self::build(
            Capabilities::default().with_logging(),
            Capabilities::default(),
            None,
        )
        .await
    }

    /// A context for a request that carried progress token `token`, from a
    /// peer that declared `progress`.
    pub async fn with_progress_token(token: impl Into<ProgressToken>) -> Result<Self> {
        Self::with_peer(Capabilities::default().with_progress(), Some(token.into())).await
    }

    /// A context whose server declares exactly `capabilities`.
    pub async fn with_capabilities(capabilities: Capabilities) -> Result<Self> {
        Self::build(capabilities, Capabilities::default(), None).await
    }

    /// A context whose peer declared `peer_capabilities` and attached
    /// `token`. The server declares `logging`.
    pub async fn with_peer(
        peer_capabilities: Capabilities,
        token: Option<ProgressToken>,
    ) -> Result<Self> {
        Self::build(Capabilities::default().with_logging(), peer_capabilities, token).await
    }

    async fn build(
        capabilities: Capabilities,
        peer_capabilities: Capabilities,
        token: Option<ProgressToken>,
    ) -> Result<Self> {
        let (a, b) = io::duplex(64 * 1024);
        let server = Session::new(SessionConfig::new("test-server").with_capabilities(capabilities));
        let peer = Session::new(SessionConfig::new("test-peer"));
        for session in [&server, &peer] {
            session.set_state(SessionState::Negotiating)?;
            session.set_state(SessionState::Ready)?;
        }
        server.set_peer(PeerInfo {
            implementation: Implementation::new("test-peer", "0"),
            capabilities: peer_capabilities,
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
        });

        let (tx, notifications) = mpsc::unbounded_channel();
        for method in [methods::PROGRESS, methods::LOGGING_MESSAGE] {
            let tx = tx.clone();
            peer.register_notification_listener(method, move |_, params| {
                let sent = tx.send((method.to_string(), params));
                async move {
                    sent.map_err(|_| Error::ChannelClosed)?;
                    Ok(())
                }
            });
        }
        server.attach(Box::new(StreamTransport::new(a))).await?;
        peer.attach(Box::new(StreamTransport::new(b))).await?;

        let log_level: LogLevelFilter = Arc::new(RwLock::new(LoggingLevel::Debug));
        let ctx = ServerCtx::new(
            RequestCtx {
                session: server,
                request_id: RequestId::Number(0),
                meta: RequestMeta {
                    progress_token: token,
                    ..RequestMeta::default()
                },
            },
            log_level.clone(),
        );
        Ok(Self {
            ctx,
            log_level,
            notifications,
            _peer: peer,
        })
    }

    /// The context to hand to a tool handler.
    pub fn ctx(&self) -> ServerCtx {
        self.ctx.clone()
    }

    /// The level filter `logging/setLevel` would update.
    pub fn log_level(&self) -> &LogLevelFilter {
        &self.log_level
    }

    /// The next notification the peer received, as `(method, params)`.
    /// `None` if nothing arrives shortly.
    pub async fn try_recv_notification(&mut self) -> Option<(String, Option<Value>)> {
        timeout(Duration::from_millis(100), self.notifications.recv())
            .await
            .ok()
            .flatten()
    }
}
