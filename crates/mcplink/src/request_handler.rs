//! Request/response routing and tracking.
//!
//! This module provides the [`RequestHandler`] which correlates outgoing requests
//! with incoming responses, handles timeouts, and supports cancellation.

use std::{
    result::Result as StdResult,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use futures::{SinkExt, stream::SplitSink};
use serde_json::Value;
use tokio::{
    sync::{Mutex, oneshot},
    time::{error::Elapsed, timeout},
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    schema::{
        CancelledParams, JSONRPCMessage, JSONRPCResponse, ProgressToken, RequestId,
        ResponsePayload, methods,
    },
    transport::TransportStream,
};

/// Default request timeout (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Type alias for the nested Result type from timeout + channel receive.
type TimeoutResult<T> = StdResult<StdResult<T, oneshot::error::RecvError>, Elapsed>;

/// Outbound half of a session's transport stream.
pub type TransportSink = SplitSink<Box<dyn TransportStream>, JSONRPCMessage>;

/// Per-call overrides for [`RequestHandler::request`].
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Overrides the session default timeout.
    pub timeout: Option<Duration>,
    /// Injected into `params._meta.progressToken`.
    pub progress_token: Option<ProgressToken>,
    /// Cancelling this token abandons the call.
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    /// Wait at most `timeout` for this call's response.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Ask the peer to report progress under `token`.
    pub fn with_progress_token(mut self, token: impl Into<ProgressToken>) -> Self {
        self.progress_token = Some(token.into());
        self
    }

    /// Abandon the call, telling the peer, once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Outstanding calls waiting for responses, with the channel they go out on.
///
/// The `RequestHandler` is responsible for:
/// - Correlating outgoing requests with incoming responses via request IDs
/// - Enforcing request timeouts so abandoned slots do not accumulate
/// - Failing every pending call once the session shuts down
#[derive(Clone)]
pub struct RequestHandler {
    /// Transport sink for sending messages. Empty before attach and after close.
    transport_tx: Arc<Mutex<Option<TransportSink>>>,
    /// Whether a sink was ever attached.
    attached: Arc<AtomicBool>,
    /// Pending requests waiting for responses, keyed by request ID.
    pending_requests: Arc<DashMap<RequestId, oneshot::Sender<ResponsePayload>>>,
    /// Next request ID counter.
    next_request_id: Arc<AtomicI64>,
    /// Default request timeout.
    timeout: Duration,
    /// Cancelled when the owning session closes.
    global_cancel: CancellationToken,
}

impl RequestHandler {
    /// Create a new RequestHandler with default timeout.
    pub fn new(global_cancel: CancellationToken) -> Self {
        Self {
            transport_tx: Arc::new(Mutex::new(None)),
            attached: Arc::new(AtomicBool::new(false)),
            pending_requests: Arc::new(DashMap::new()),
            next_request_id: Arc::new(AtomicI64::new(1)),
            timeout: DEFAULT_TIMEOUT,
            global_cancel,
        }
    }

    /// Set the default request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Set the transport sink (used when connecting). A handler attaches once.
    pub async fn set_transport(&self, transport_tx: TransportSink) -> Result<()> {
        if self.attached.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidConfiguration(
                "session already attached".to_string(),
            ));
        }
        *self.transport_tx.lock().await = Some(transport_tx);
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.pending_requests.len()
    }

    /// Send a request and wait for its response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        options: CallOptions,
    ) -> Result<Value> {
        let id = self.next_request_id();
        let params = inject_progress_token(params, options.progress_token.as_ref());

        let response_rx = self.store_and_send_request(id.clone(), method, params).await?;

        self.await_response(id, method, response_rx, &options).await
    }

    /// Store a pending request and send it over the transport.
    async fn store_and_send_request(
        &self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
    ) -> Result<oneshot::Receiver<ResponsePayload>> {
        let (response_tx, response_rx) = oneshot::channel();
        self.pending_requests.insert(id.clone(), response_tx);

        tracing::debug!(
            "Stored pending request with ID: {}, total pending: {}",
            id,
            self.pending_requests.len()
        );
        tracing::info!("Sending request with ID: {} method: {}", id, method);

        if let Err(e) = self
            .send_message(JSONRPCMessage::request(id.clone(), method, params))
            .await
        {
            self.pending_requests.remove(&id);
            return Err(e);
        }

        Ok(response_rx)
    }

    /// Wait for a response, honouring session shutdown, caller cancellation
    /// and the timeout.
    async fn await_response(
        &self,
        id: RequestId,
        method: &str,
        response_rx: oneshot::Receiver<ResponsePayload>,
        options: &CallOptions,
    ) -> Result<Value> {
        let timeout_duration = options.timeout.unwrap_or(self.timeout);
        let caller_cancel = options.cancel.clone().unwrap_or_default();

        tokio::select! {
            biased;

            () = self.global_cancel.cancelled() => {
                self.pending_requests.remove(&id);
                Err(Error::SessionClosed)
            }

            () = caller_cancel.cancelled() => {
                self.abandon(&id, "cancelled by caller").await;
                Err(Error::Cancelled { request_id: id.to_string() })
            }

            result = timeout(timeout_duration, response_rx) => {
                self.process_response_result(&id, method, timeout_duration, result).await
            }
        }
    }

    /// Process the result of waiting for a response.
    async fn process_response_result(
        &self,
        id: &RequestId,
        method: &str,
        timeout_duration: Duration,
        result: TimeoutResult<ResponsePayload>,
    ) -> Result<Value> {
        match result {
            Ok(Ok(ResponsePayload::Result(value))) => Ok(value),
            Ok(Ok(ResponsePayload::Error(error))) => {
                tracing::debug!("Request {} ({}) failed: {}", id, method, error.message);
                Err(Error::from_error_object(error))
            }
            // The sender is only dropped by `fail_all`, on shutdown.
            Ok(Err(_recv_error)) => Err(Error::SessionClosed),
            Err(_timeout) => {
                let timeout_ms = u64::try_from(timeout_duration.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!("Request {} ({}) timed out after {}ms", id, method, timeout_ms);
                self.abandon(id, "timed out").await;
                Err(Error::Timeout {
                    request_id: id.to_string(),
                    timeout_ms,
                })
            }
        }
    }

    /// Drop the pending slot and tell the peer to stop working on it.
    async fn abandon(&self, id: &RequestId, reason: &str) {
        self.pending_requests.remove(id);
        let params = CancelledParams {
            request_id: id.clone(),
            reason: Some(reason.to_string()),
        };
        let sent = match serde_json::to_value(params) {
            Ok(params) => self.send_notification(methods::CANCELLED, Some(params)).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            tracing::debug!("Could not send cancellation for {}: {}", id, e);
        }
    }

    /// Send a message through the transport.
    pub async fn send_message(&self, message: JSONRPCMessage) -> Result<()> {
        if self.global_cancel.is_cancelled() {
            return Err(Error::SessionClosed);
        }
        let mut guard = self.transport_tx.lock().await;
        match guard.as_mut() {
            Some(tx) => tx.send(message).await,
            None if self.attached.load(Ordering::SeqCst) => Err(Error::ChannelClosed),
            None => Err(Error::Transport("Not connected".to_string())),
        }
    }

    /// Send a notification.
    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.send_message(JSONRPCMessage::notification(method, params))
            .await
    }

    /// Close and drop the outbound half of the transport.
    pub async fn close_transport(&self) {
        let taken = self.transport_tx.lock().await.take();
        if let Some(mut tx) = taken
            && let Err(e) = tx.close().await
        {
            tracing::debug!("Error closing transport: {}", e);
        }
    }

    /// Generate the next request ID.
    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_request_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Route a response to the pending request receiver.
    ///
    /// Fails with [`Error::UnexpectedResponse`] when nothing is waiting on the
    /// id, which includes responses arriving after a timeout.
    pub fn handle_response(&self, response: JSONRPCResponse) -> Result<()> {
        let id = response.id;
        tracing::debug!(
            "Handling response for ID: {}, pending requests: {}",
            id,
            self.pending_requests.len()
        );
        match self.pending_requests.remove(&id) {
            Some((_, response_tx)) => {
                if response_tx.send(response.payload).is_err() {
                    tracing::debug!("Response receiver dropped for request {}", id);
                }
                Ok(())
            }
            None => Err(Error::UnexpectedResponse(id.to_string())),
        }
    }

    /// Fail every outstanding call. Their receivers observe a closed channel.
    pub fn fail_all(&self) {
        let count = self.pending_requests.len();
        if count > 0 {
            tracing::debug!("Failing {} pending requests on shutdown", count);
        }
        self.pending_requests.clear();
    }
}

/// Place `token` at `params._meta.progressToken`, creating objects as needed.
fn inject_progress_token(params: Option<Value>, token: Option<&ProgressToken>) -> Option<Value> {
    let Some(token) = token else {
        return params;
    };
    let mut params = match params {
        Some(Value::Object(map)) => map,
        Some(other) => {
            tracing::warn!("Progress token not attached: params are not an object ({})", other);
            return Some(other);
        }
        None => serde_json::Map::new(),
    };
    let meta = params
        .entry("_meta")
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    if let Value::Object(meta) = meta
        && let Ok(token) = serde_json::to_value(token)
    {
        meta.insert("progressToken".to_string(), token);
    }
    Some(Value::Object(params))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::schema::RequestMeta;

    #[test]
    fn test_inject_progress_token() {
        let token = ProgressToken::from("t1");
        let params = inject_progress_token(Some(json!({"name": "getTemperature"})), Some(&token));
        let meta = RequestMeta::from_params(params.as_ref());
        assert_eq!(meta.progress_token, Some(token.clone()));
        assert_eq!(params.unwrap()["name"], "getTemperature");

        let created = inject_progress_token(None, Some(&token)).unwrap();
        assert_eq!(created, json!({"_meta": {"progressToken": "t1"}}));

        assert_eq!(inject_progress_token(None, None), None);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let handler = RequestHandler::new(CancellationToken::new());
        let a = handler.next_request_id();
        let b = handler.next_request_id();
        assert_eq!(a, RequestId::Number(1));
        assert_eq!(b, RequestId::Number(2));
    }

    #[test]
    fn test_unknown_response_is_reported() {
        let handler = RequestHandler::new(CancellationToken::new());
        let JSONRPCMessage::Response(response) =
            JSONRPCMessage::result(RequestId::Number(99), json!({}))
        else {
            unreachable!()
        };
        assert!(matches!(
            handler.handle_response(response),
            Err(Error::UnexpectedResponse(id)) if id == "99"
        ));
    }

    #[tokio::test]
    async fn test_send_before_attach_fails() {
        let handler = RequestHandler::new(CancellationToken::new());
        let err = handler
            .request("ping", None, CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(handler.pending_count(), 0);
    }
}
