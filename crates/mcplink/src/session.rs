//! One bidirectional protocol session over one transport.
//!
//! A [`Session`] owns its transport stream. A single reader task decodes
//! inbound envelopes in wire order and routes them:
//!
//! - responses resolve the matching pending [`call`](Session::call);
//! - requests run their registered handler on a fresh task, so a handler may
//!   itself issue calls on the same session without stalling the reader;
//! - notifications are queued to a listener task that runs every listener
//!   registered for the method, in arrival order.
//!
//! Closing the session (or losing the transport) fails every outstanding
//! call with [`Error::SessionClosed`].

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use futures::{FutureExt, StreamExt, future::BoxFuture, stream::SplitStream};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot},
    task::AbortHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    negotiation::{Negotiation, PeerInfo, SessionState},
    request_handler::{CallOptions, RequestHandler},
    schema::{
        CancelledParams, Capabilities, Capability, JSONRPCMessage, JSONRPCNotification,
        JSONRPCRequest, RequestId, RequestMeta, methods,
    },
    transport::{Transport, TransportStream},
};

/// How long `close` waits for the outbound half to flush.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Boxed future returned by request handlers.
pub type HandlerFuture = BoxFuture<'static, Result<Value>>;
/// Type-erased request handler.
pub type RequestHandlerFn = Arc<dyn Fn(RequestCtx, Option<Value>) -> HandlerFuture + Send + Sync>;
/// Type-erased notification listener.
pub type NotificationListenerFn =
    Arc<dyn Fn(Session, Option<Value>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Settings fixed when a session is created.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Appears in log lines to tell the two sides apart.
    pub label: String,
    /// Default timeout for outbound calls.
    pub timeout: Duration,
    /// Capabilities this side declares during the handshake.
    pub capabilities: Capabilities,
}

impl SessionConfig {
    /// Defaults: [`DEFAULT_TIMEOUT`](crate::DEFAULT_TIMEOUT), no capabilities.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            timeout: crate::request_handler::DEFAULT_TIMEOUT,
            capabilities: Capabilities::default(),
        }
    }

    /// Default timeout for outbound calls.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Capabilities to declare during the handshake.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Context handed to a request handler.
#[derive(Clone)]
pub struct RequestCtx {
    /// The session the request arrived on. Handlers may call back through it.
    pub session: Session,
    /// Id of the request being handled.
    pub request_id: RequestId,
    /// The request's `_meta`, including any progress token.
    pub meta: RequestMeta,
}

/// A bidirectional protocol session. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    label: String,
    requests: RequestHandler,
    negotiation: Negotiation,
    handlers: RwLock<HashMap<String, RequestHandlerFn>>,
    listeners: RwLock<HashMap<String, Vec<NotificationListenerFn>>>,
    /// Inbound requests whose handler is still running, for cancellation.
    in_flight: DashMap<RequestId, AbortHandle>,
    shutdown: CancellationToken,
    terminated: AtomicBool,
    remote_addr: RwLock<String>,
}

impl Session {
    /// An unattached session in `Uninitialized` state. Nothing is read or
    /// written until [`attach`](Self::attach).
    pub fn new(config: SessionConfig) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            inner: Arc::new(Inner {
                label: config.label,
                requests: RequestHandler::new(shutdown.clone()).with_timeout(config.timeout),
                negotiation: Negotiation::new(config.capabilities),
                handlers: RwLock::new(HashMap::new()),
                listeners: RwLock::new(HashMap::new()),
                in_flight: DashMap::new(),
                shutdown,
                terminated: AtomicBool::new(false),
                remote_addr: RwLock::new(String::new()),
            }),
        }
    }

    /// Connect `transport` and start the reader. Handlers registered before
    /// this call see every inbound message.
    pub async fn attach(&self, mut transport: Box<dyn Transport>) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::SessionClosed);
        }
        transport.connect().await?;
        let remote = transport.remote_addr();
        let stream = transport.framed()?;
        let (sink, stream) = stream.split();
        self.inner.requests.set_transport(sink).await?;
        if let Ok(mut addr) = self.inner.remote_addr.write() {
            addr.clone_from(&remote);
        }
        tracing::info!("{} session attached to {}", self.inner.label, remote);

        let (notification_tx, notification_rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::listener_loop(self.clone(), notification_rx));
        tokio::spawn(Self::read_loop(self.clone(), stream, notification_tx));
        Ok(())
    }

    /// Register the handler for inbound requests named `method`. A later
    /// registration for the same method replaces this one.
    pub fn register_request_handler<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(RequestCtx, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let method = method.into();
        let handler: RequestHandlerFn = Arc::new(move |ctx, params| handler(ctx, params).boxed());
        if let Ok(mut handlers) = self.inner.handlers.write()
            && handlers.insert(method.clone(), handler).is_some()
        {
            tracing::warn!(
                "{} replaced existing request handler for {}",
                self.inner.label,
                method
            );
        }
    }

    /// Add a listener for inbound notifications named `method`. Every listener
    /// registered for a method runs once per notification.
    pub fn register_notification_listener<F, Fut>(&self, method: impl Into<String>, listener: F)
    where
        F: Fn(Session, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let listener: NotificationListenerFn =
            Arc::new(move |session, params| listener(session, params).boxed());
        if let Ok(mut listeners) = self.inner.listeners.write() {
            listeners.entry(method.into()).or_default().push(listener);
        }
    }

    /// Send a request and wait for its result using the session timeout.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.call_with(method, params, CallOptions::default()).await
    }

    /// Send a request with per-call timeout, progress token or cancellation.
    pub async fn call_with(
        &self,
        method: &str,
        params: Option<Value>,
        options: CallOptions,
    ) -> Result<Value> {
        self.inner.negotiation.check_method(method)?;
        self.inner.requests.request(method, params, options).await
    }

    /// Typed wrapper around [`call_with`](Self::call_with).
    pub async fn request<P, R>(&self, method: &str, params: &P, options: CallOptions) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = match serde_json::to_value(params)? {
            Value::Null => None,
            v => Some(v),
        };
        let value = self.call_with(method, params, options).await?;
        serde_json::from_value(value).map_err(|e| Error::JsonParse {
            message: format!("unexpected result for {method}: {e}"),
        })
    }

    /// Fire-and-forget notification.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.inner.negotiation.check_method(method)?;
        self.inner.requests.send_notification(method, params).await
    }

    /// Close the session. Outstanding calls fail with `SessionClosed`.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        self.terminate().await;
    }

    /// Begin closing without waiting. The reader finishes the shutdown.
    pub fn abort(&self) {
        self.inner.shutdown.cancel();
    }

    /// Resolve once the session has terminated for any reason.
    pub async fn closed(&self) {
        self.inner.shutdown.cancelled().await;
    }

    /// Whether the session has terminated.
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// The label given in [`SessionConfig`].
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Description of the peer reported by the transport.
    pub fn remote_addr(&self) -> String {
        self.inner
            .remote_addr
            .read()
            .map(|a| a.clone())
            .unwrap_or_default()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.negotiation.state()
    }

    pub(crate) fn set_state(&self, state: SessionState) -> Result<()> {
        self.inner.negotiation.transition(state)
    }

    /// Wait until the handshake completes.
    pub async fn ready(&self) -> Result<()> {
        self.inner.negotiation.ready().await
    }

    /// What the peer declared during the handshake, once known.
    pub fn peer(&self) -> Option<PeerInfo> {
        self.inner.negotiation.peer()
    }

    pub(crate) fn set_peer(&self, peer: PeerInfo) {
        self.inner.negotiation.set_peer(peer);
    }

    /// What this side declares during the handshake.
    pub fn local_capabilities(&self) -> Capabilities {
        self.inner.negotiation.local_capabilities()
    }

    /// Fail with `CapabilityNotSupported` unless the peer declared `capability`.
    pub fn require_peer(&self, capability: Capability) -> Result<()> {
        self.inner.negotiation.require_peer(capability)
    }

    /// Fail with `CapabilityNotSupported` unless this side declared `capability`.
    pub fn require_local(&self, capability: Capability) -> Result<()> {
        self.inner.negotiation.require_local(capability)
    }

    /// Number of outbound calls still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.requests.pending_count()
    }

    async fn read_loop(
        self,
        mut stream: SplitStream<Box<dyn TransportStream>>,
        notification_tx: mpsc::UnboundedSender<JSONRPCNotification>,
    ) {
        let label = self.inner.label.clone();
        loop {
            let next = tokio::select! {
                biased;
                () = self.inner.shutdown.cancelled() => break,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(message)) => self.dispatch(message, &notification_tx),
                Some(Err(Error::MalformedMessage { message })) => {
                    tracing::warn!("{} ignored malformed message: {}", label, message);
                }
                Some(Err(e)) => {
                    tracing::error!("{} transport failed: {}", label, e);
                    break;
                }
                None => {
                    tracing::info!("{} peer closed the connection", label);
                    break;
                }
            }
        }
        drop(stream);
        self.inner.shutdown.cancel();
        self.terminate().await;
    }

    fn dispatch(
        &self,
        message: JSONRPCMessage,
        notification_tx: &mpsc::UnboundedSender<JSONRPCNotification>,
    ) {
        match message {
            JSONRPCMessage::Response(response) => {
                if let Err(e) = self.inner.requests.handle_response(response) {
                    tracing::warn!("{} discarded response: {}", self.inner.label, e);
                }
            }
            JSONRPCMessage::Request(request) => self.spawn_request(request),
            JSONRPCMessage::Notification(notification) => {
                // Lifecycle effects apply before any later message is routed.
                match notification.method.as_str() {
                    methods::CANCELLED => self.cancel_in_flight(notification.params.as_ref()),
                    methods::INITIALIZED => {
                        if let Err(e) = self.set_state(SessionState::Ready) {
                            tracing::warn!("{} unexpected initialized: {}", self.inner.label, e);
                        }
                    }
                    _ => {}
                }
                if notification_tx.send(notification).is_err() {
                    tracing::debug!("{} listener task gone; notification dropped", self.inner.label);
                }
            }
        }
    }

    /// Run the handler for `request` on its own task and send its response.
    fn spawn_request(&self, request: JSONRPCRequest) {
        let JSONRPCRequest {
            id, method, params, ..
        } = request;
        tracing::debug!("{} received request {} ({})", self.inner.label, id, method);

        let gate = self.inner.negotiation.check_method(&method);
        let handler = self
            .inner
            .handlers
            .read()
            .ok()
            .and_then(|h| h.get(&method).cloned());
        let ctx = RequestCtx {
            session: self.clone(),
            request_id: id.clone(),
            meta: RequestMeta::from_params(params.as_ref()),
        };
        let session = self.clone();
        let task_id = id.clone();
        let (registered_tx, registered_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            // Wait until the abort handle is in `in_flight`, so the removal
            // below cannot run before the insert.
            if registered_rx.await.is_err() {
                return;
            }
            let result = match (gate, handler) {
                (Err(e), _) => Err(e),
                (Ok(()), None) => Err(Error::MethodNotFound(method.clone())),
                (Ok(()), Some(handler)) => handler(ctx, params).await,
            };
            let response = match result {
                Ok(value) => JSONRPCMessage::result(task_id.clone(), value),
                Err(e) => {
                    tracing::warn!(
                        "{} request {} ({}) failed: {}",
                        session.inner.label,
                        task_id,
                        method,
                        e
                    );
                    JSONRPCMessage::error(task_id.clone(), e.to_error_object())
                }
            };
            session.inner.in_flight.remove(&task_id);
            if let Err(e) = session.inner.requests.send_message(response).await {
                tracing::debug!(
                    "{} could not send response for {}: {}",
                    session.inner.label,
                    task_id,
                    e
                );
            }
        });

        self.inner.in_flight.insert(id, task.abort_handle());
        let _ = registered_tx.send(());
    }

    /// Abort the handler of a request the peer no longer wants answered.
    fn cancel_in_flight(&self, params: Option<&Value>) {
        let Some(params) = params
            .cloned()
            .and_then(|p| serde_json::from_value::<CancelledParams>(p).ok())
        else {
            tracing::debug!("{} ignored malformed cancellation", self.inner.label);
            return;
        };
        if let Some((id, handle)) = self.inner.in_flight.remove(&params.request_id) {
            tracing::info!(
                "{} cancelled request {} ({})",
                self.inner.label,
                id,
                params.reason.as_deref().unwrap_or("no reason")
            );
            handle.abort();
        }
    }

    async fn listener_loop(self, mut rx: mpsc::UnboundedReceiver<JSONRPCNotification>) {
        while let Some(notification) = rx.recv().await {
            let listeners = self
                .inner
                .listeners
                .read()
                .ok()
                .and_then(|l| l.get(&notification.method).cloned())
                .unwrap_or_default();
            if listeners.is_empty() {
                tracing::debug!(
                    "{} has no listener for {}",
                    self.inner.label,
                    notification.method
                );
                continue;
            }
            for listener in listeners {
                if let Err(e) = listener(self.clone(), notification.params.clone()).await {
                    tracing::warn!(
                        "{} listener for {} failed: {}",
                        self.inner.label,
                        notification.method,
                        e
                    );
                }
            }
        }
    }

    async fn terminate(&self) {
        if self.inner.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.inner.negotiation.transition(SessionState::Closed) {
            tracing::debug!("{}", e);
        }
        self.inner.requests.fail_all();
        for entry in self.inner.in_flight.iter() {
            entry.value().abort();
        }
        self.inner.in_flight.clear();
        if tokio::time::timeout(CLOSE_GRACE, self.inner.requests.close_transport())
            .await
            .is_err()
        {
            tracing::debug!("{} transport close timed out", self.inner.label);
        }
        tracing::info!("{} session closed", self.inner.label);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::transport::StreamTransport;

    /// Two sessions joined by an in-memory pipe, both already `Ready`.
    async fn ready_pair() -> (Session, Session) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let left = Session::new(SessionConfig::new("left"));
        let right = Session::new(SessionConfig::new("right"));
        for s in [&left, &right] {
            s.set_state(SessionState::Negotiating).unwrap();
            s.set_state(SessionState::Ready).unwrap();
        }
        left.attach(Box::new(StreamTransport::new(a))).await.unwrap();
        right.attach(Box::new(StreamTransport::new(b))).await.unwrap();
        (left, right)
    }

    #[tokio::test]
    async fn test_unknown_method_gets_error_response() {
        let (left, _right) = ready_pair().await;
        let err = left.call("nope", None).await.unwrap_err();
        assert!(matches!(err, Error::MethodNotFound(_)));
    }

    #[tokio::test]
    async fn test_handler_replacement_last_wins() {
        let (left, right) = ready_pair().await;
        right.register_request_handler("v", |_, _| async { Ok(json!(1)) });
        right.register_request_handler("v", |_, _| async { Ok(json!(2)) });
        assert_eq!(left.call("v", None).await.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn test_listener_errors_are_swallowed() {
        let (left, right) = ready_pair().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        right.register_notification_listener("n", |_, _| async {
            Err(Error::InternalError("listener broke".into()))
        });
        let log = seen.clone();
        right.register_notification_listener("n", move |_, params| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(params);
                Ok(())
            }
        });
        left.notify("n", Some(json!(1))).await.unwrap();
        left.notify("n", Some(json!(2))).await.unwrap();
        // A round trip after the notifications orders them before the reply.
        right.register_request_handler("sync", |_, _| async { Ok(json!(null)) });
        left.call("sync", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[Some(json!(1)), Some(json!(2))]
        );
        assert!(!right.is_closed());
    }

    #[tokio::test]
    async fn test_in_flight_cleared_after_fast_handlers() {
        let (left, right) = ready_pair().await;
        right.register_request_handler("fast", |_, params| async move {
            Ok(params.unwrap_or_default())
        });
        let calls = (0..200).map(|i| {
            let left = left.clone();
            async move { left.call("fast", Some(json!(i))).await }
        });
        let results = futures::future::join_all(calls).await;
        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap(), json!(i));
        }
        assert!(right.inner.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_close_fails_pending_calls() {
        let (left, right) = ready_pair().await;
        right.register_request_handler("slow", |_, _| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!(null))
        });
        let caller = left.clone();
        let pending = tokio::spawn(async move { caller.call("slow", None).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        left.close().await;
        assert_eq!(pending.await.unwrap().unwrap_err(), Error::SessionClosed);
        assert_eq!(left.state(), SessionState::Closed);
        assert_eq!(left.call("slow", None).await.unwrap_err(), Error::SessionClosed);
        // The peer notices the closed pipe.
        tokio::time::timeout(Duration::from_secs(2), right.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_not_initialized_gate() {
        let (a, b) = tokio::io::duplex(4096);
        let left = Session::new(SessionConfig::new("left"));
        let right = Session::new(SessionConfig::new("right"));
        left.attach(Box::new(StreamTransport::new(a))).await.unwrap();
        right.attach(Box::new(StreamTransport::new(b))).await.unwrap();

        assert!(matches!(
            left.call("tools/list", None).await,
            Err(Error::NotInitialized(_))
        ));
        assert!(matches!(
            left.notify("notifications/progress", None).await,
            Err(Error::NotInitialized(_))
        ));
        // Handshake methods are allowed through; the peer has no handler.
        assert!(matches!(
            left.call("ping", None).await,
            Err(Error::MethodNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_attach_twice_fails() {
        let session = Session::new(SessionConfig::new("s"));
        let (a, b) = tokio::io::duplex(1024);
        session.attach(Box::new(StreamTransport::new(a))).await.unwrap();
        assert!(matches!(
            session.attach(Box::new(StreamTransport::new(b))).await,
            Err(Error::InvalidConfiguration(_))
        ));
    }
}
