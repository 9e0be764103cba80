//! HTTP binding with server-sent events.
//!
//! A client opens `GET /sse`. The first event on that stream is
//! `event: endpoint` whose data is the relative URL
//! (`/mcp/message?sessionId=<id>`) the client POSTs its envelopes to. Every
//! server-to-client envelope then arrives as an `event: message`. One SSE
//! connection is one session; dropping it ends the session.

use std::{
    convert::Infallible,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Router,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use dashmap::DashMap;
use eventsource_stream::Eventsource;
use futures::{Sink, Stream, StreamExt, channel::mpsc};
use serde::Deserialize;
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    codec,
    error::{Error, Result},
    schema::JSONRPCMessage,
    server::{Server, ServerHandle},
    transport::{Transport, TransportStream},
};

/// Path of the SSE endpoint.
pub const SSE_PATH: &str = "/sse";
/// Path clients POST envelopes to.
pub const MESSAGE_PATH: &str = "/mcp/message";

/// How long a client waits for the `endpoint` event.
const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);

type Inbound = mpsc::UnboundedSender<Result<JSONRPCMessage>>;

#[derive(Clone)]
struct HttpServerState {
    server: Server,
    /// Inbound queues of live sessions keyed by session id.
    sessions: Arc<DashMap<String, Inbound>>,
    shutdown: CancellationToken,
}

/// A running HTTP server.
pub struct HttpServerHandle {
    /// The address actually bound (useful when binding port 0).
    pub bound_addr: SocketAddr,
    sessions: Arc<DashMap<String, Inbound>>,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

impl HttpServerHandle {
    /// URL of the SSE endpoint clients connect to.
    pub fn sse_url(&self) -> String {
        format!("http://{}{}", self.bound_addr, SSE_PATH)
    }

    /// Number of connected sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Resolve once the server task exits.
    pub async fn wait(self) -> Result<()> {
        self.handle
            .await
            .map_err(|e| Error::InternalError(format!("HTTP server task failed: {e}")))?
    }

    /// Close every session and stop listening.
    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        self.wait().await
    }
}

/// Bind `addr` and serve `server` until stopped.
pub(crate) async fn serve(server: Server, addr: &str) -> Result<HttpServerHandle> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Transport(format!("Failed to bind to {addr}: {e}")))?;
    let bound_addr = listener
        .local_addr()
        .map_err(|e| Error::Transport(format!("Failed to get local address: {e}")))?;

    let state = HttpServerState {
        server,
        sessions: Arc::new(DashMap::new()),
        shutdown: CancellationToken::new(),
    };
    let router = Router::new()
        .route(SSE_PATH, get(handle_sse))
        .route(MESSAGE_PATH, post(handle_message))
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    let shutdown = state.shutdown.clone();
    let handle = tokio::spawn(async move {
        info!("HTTP server listening on {}", bound_addr);
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(|e| Error::Transport(format!("Server error: {e}")))
    });

    Ok(HttpServerHandle {
        bound_addr,
        sessions: state.sessions,
        shutdown: state.shutdown,
        handle,
    })
}

/// Removes a session from the table and closes it when its SSE stream goes
/// away.
struct SessionGuard {
    id: String,
    sessions: Arc<DashMap<String, Inbound>>,
    handle: ServerHandle,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
        self.handle.session().abort();
        debug!("HTTP session {} ended", self.id);
    }
}

async fn handle_sse(State(state): State<HttpServerState>) -> Response {
    let id = Uuid::new_v4().to_string();
    let (inbound_tx, inbound_rx) = mpsc::unbounded();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded();
    let transport = HttpSessionTransport {
        id: id.clone(),
        inbound: Some(inbound_rx),
        outbound: Some(outbound_tx),
    };

    state.sessions.insert(id.clone(), inbound_tx);
    let handle = match state.server.serve(Box::new(transport)).await {
        Ok(handle) => handle,
        Err(e) => {
            state.sessions.remove(&id);
            error!("Failed to start HTTP session: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };
    info!("HTTP session {} opened", id);

    let endpoint = format!("{MESSAGE_PATH}?sessionId={id}");
    let shutdown = state.shutdown.clone();
    let guard = SessionGuard {
        id,
        sessions: state.sessions.clone(),
        handle,
    };
    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok::<_, Infallible>(Event::default().event("endpoint").data(endpoint));
        loop {
            let message = tokio::select! {
                () = shutdown.cancelled() => break,
                message = outbound_rx.next() => message,
            };
            let Some(message) = message else { break };
            match serde_json::to_string(&message) {
                Ok(data) => yield Ok(Event::default().event("message").data(data)),
                Err(e) => warn!("Dropping unserializable message: {}", e),
            }
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: String,
}

async fn handle_message(
    State(state): State<HttpServerState>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Response {
    let message = match codec::decode(&body) {
        Ok(message) => message,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let Some(inbound) = state.sessions.get(&query.session_id).map(|s| s.value().clone()) else {
        return (StatusCode::NOT_FOUND, "Session not found").into_response();
    };
    if inbound.unbounded_send(Ok(message)).is_err() {
        return (StatusCode::GONE, "Session closed").into_response();
    }
    StatusCode::ACCEPTED.into_response()
}

/// Server side of one SSE session.
struct HttpSessionTransport {
    id: String,
    inbound: Option<mpsc::UnboundedReceiver<Result<JSONRPCMessage>>>,
    outbound: Option<mpsc::UnboundedSender<JSONRPCMessage>>,
}

#[async_trait]
impl Transport for HttpSessionTransport {
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn framed(mut self: Box<Self>) -> Result<Box<dyn TransportStream>> {
        let receiver = self.inbound.take().ok_or(Error::ChannelClosed)?;
        let sender = self.outbound.take().ok_or(Error::ChannelClosed)?;
        Ok(Box::new(ChannelStream {
            sender,
            receiver,
            tasks: Vec::new(),
        }))
    }

    fn remote_addr(&self) -> String {
        format!("sse:{}", self.id)
    }
}

/// Client side of the HTTP binding.
pub struct HttpClientTransport {
    sse_url: Url,
    client: reqwest::Client,
    /// Filled in by `connect`.
    connected: Option<Connected>,
}

struct Connected {
    post_url: Url,
    receiver: mpsc::UnboundedReceiver<Result<JSONRPCMessage>>,
    inbound: Inbound,
    reader: JoinHandle<()>,
}

impl HttpClientTransport {
    /// `url` is the server's SSE endpoint, e.g. `http://127.0.0.1:8080/sse`.
    pub fn new(url: &str) -> Result<Self> {
        let sse_url = Url::parse(url)
            .map_err(|e| Error::InvalidConfiguration(format!("bad server URL {url}: {e}")))?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            sse_url,
            client,
            connected: None,
        })
    }
}

#[async_trait]
impl Transport for HttpClientTransport {
    async fn connect(&mut self) -> Result<()> {
        info!("Connecting to SSE endpoint {}", self.sse_url);
        let response = self
            .client
            .get(self.sse_url.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Failed to connect SSE: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "SSE connection failed with status: {}",
                response.status()
            )));
        }

        let mut events = Box::pin(response.bytes_stream().eventsource());
        let endpoint = tokio::time::timeout(ENDPOINT_TIMEOUT, async {
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) if event.event == "endpoint" => return Ok(event.data),
                    Ok(event) => debug!("Ignoring {} event before endpoint", event.event),
                    Err(e) => return Err(Error::Transport(format!("SSE error: {e}"))),
                }
            }
            Err(Error::Transport("SSE stream ended before endpoint".into()))
        })
        .await
        .map_err(|_| Error::Transport("Timed out waiting for endpoint event".into()))??;

        let post_url = self
            .sse_url
            .join(endpoint.trim())
            .map_err(|e| Error::Transport(format!("Bad endpoint {endpoint}: {e}")))?;
        debug!("Posting messages to {}", post_url);

        let (inbound, receiver) = mpsc::unbounded();
        let tx = inbound.clone();
        let reader = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let item = match event {
                    Ok(event) if event.event == "message" => codec::decode(event.data.as_bytes()),
                    Ok(event) => {
                        debug!("Ignoring SSE event {}", event.event);
                        continue;
                    }
                    Err(e) => Err(Error::Transport(format!("SSE error: {e}"))),
                };
                let fatal = matches!(item, Err(ref e) if e.is_fatal());
                if tx.unbounded_send(item).is_err() || fatal {
                    break;
                }
            }
            debug!("SSE stream ended");
        });

        self.connected = Some(Connected {
            post_url,
            receiver,
            inbound,
            reader,
        });
        Ok(())
    }

    fn framed(mut self: Box<Self>) -> Result<Box<dyn TransportStream>> {
        let Connected {
            post_url,
            receiver,
            inbound,
            reader,
        } = self.connected.take().ok_or(Error::ChannelClosed)?;

        let (sender, mut outbound) = mpsc::unbounded::<JSONRPCMessage>();
        let client = self.client.clone();
        let poster = tokio::spawn(async move {
            while let Some(message) = outbound.next().await {
                let result = client.post(post_url.clone()).json(&message).send().await;
                let failure = match result {
                    Ok(response) if response.status().is_success() => continue,
                    Ok(response) => format!("POST rejected with status {}", response.status()),
                    Err(e) => format!("POST failed: {e}"),
                };
                error!("{}", failure);
                inbound.unbounded_send(Err(Error::Transport(failure))).ok();
                break;
            }
        });

        Ok(Box::new(ChannelStream {
            sender,
            receiver,
            tasks: vec![reader, poster],
        }))
    }

    fn remote_addr(&self) -> String {
        self.sse_url.to_string()
    }
}

/// Envelope stream backed by channels, with the tasks feeding them.
struct ChannelStream {
    sender: mpsc::UnboundedSender<JSONRPCMessage>,
    receiver: mpsc::UnboundedReceiver<Result<JSONRPCMessage>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for ChannelStream {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Stream for ChannelStream {
    type Item = Result<JSONRPCMessage>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_next_unpin(cx)
    }
}

impl Sink<JSONRPCMessage> for ChannelStream {
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: JSONRPCMessage) -> Result<()> {
        self.sender
            .unbounded_send(item)
            .map_err(|_| Error::ChannelClosed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.sender.close_channel();
        Poll::Ready(Ok(()))
    }
}
