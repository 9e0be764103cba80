//! Contexts handed to tool handlers and client handlers.
//!
//! A context is only valid for the duration of the request it was created
//! for. Both wrap the [`Session`] the request arrived on, so a handler can
//! call back to its peer while it runs.

use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::{
    error::{Error, Result},
    negotiation::PeerInfo,
    request_handler::CallOptions,
    schema::{
        Capability, CreateMessageParams, CreateMessageResult, EmptyResult, LoggingLevel,
        ProgressToken, RequestId, ServerNotification, methods,
    },
    session::{RequestCtx, Session},
};

/// Minimum level of log notifications a client wants to receive. One per
/// connection, updated by `logging/setLevel`.
pub type LogLevelFilter = Arc<RwLock<LoggingLevel>>;

/// Context provided to tool handlers for interacting with the calling client.
#[derive(Clone)]
pub struct ServerCtx {
    request: RequestCtx,
    log_level: LogLevelFilter,
}

impl ServerCtx {
    pub(crate) fn new(request: RequestCtx, log_level: LogLevelFilter) -> Self {
        Self { request, log_level }
    }

    /// The session the request arrived on.
    pub fn session(&self) -> &Session {
        &self.request.session
    }

    /// Id of the request this context belongs to.
    pub fn request_id(&self) -> &RequestId {
        &self.request.request_id
    }

    /// The progress token the client attached to this request, if any.
    pub fn progress_token(&self) -> Option<&ProgressToken> {
        self.request.meta.progress_token.as_ref()
    }

    /// What the client declared during the handshake.
    pub fn peer(&self) -> Option<PeerInfo> {
        self.session().peer()
    }

    /// Whether the client declared `capability` during the handshake.
    pub fn client_supports(&self, capability: Capability) -> bool {
        self.session().require_peer(capability).is_ok()
    }

    /// Ask the client to sample a message from its language model.
    ///
    /// Fails locally with `CapabilityNotSupported` if the client did not
    /// declare `sampling`. A refusal from the client surfaces as
    /// `SamplingDeclined`; any other non-fatal failure as `SamplingFailed`.
    pub async fn create_message(&self, params: CreateMessageParams) -> Result<CreateMessageResult> {
        self.session().require_peer(Capability::Sampling)?;
        let result = self
            .session()
            .request(methods::CREATE_MESSAGE, &params, CallOptions::default())
            .await;
        match result {
            Ok(result) => Ok(result),
            Err(e @ Error::SamplingDeclined(_)) => Err(e),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Err(Error::SamplingFailed(e.to_string())),
        }
    }

    /// Report progress on the current request.
    ///
    /// Does nothing unless the client declared `progress` and attached a
    /// progress token to this request.
    pub async fn progress(
        &self,
        progress: f64,
        total: Option<f64>,
        message: Option<&str>,
    ) -> Result<()> {
        let Some(token) = self.progress_token().cloned() else {
            return Ok(());
        };
        if !self.client_supports(Capability::Progress) {
            tracing::trace!("Client did not declare progress, dropping {}", progress);
            return Ok(());
        }
        self.notify(ServerNotification::progress(
            token,
            progress,
            total,
            message.map(str::to_string),
        ))
        .await
    }

    /// Send a log notification to the client.
    ///
    /// Requires this server to have declared `logging`. Messages below the
    /// level the client selected are dropped.
    pub async fn log(&self, level: LoggingLevel, data: impl Into<Value>) -> Result<()> {
        self.log_as(level, None, data).await
    }

    /// [`log`](Self::log) with a logger name.
    pub async fn log_as(
        &self,
        level: LoggingLevel,
        logger: Option<&str>,
        data: impl Into<Value>,
    ) -> Result<()> {
        self.session().require_local(Capability::Logging)?;
        let minimum = *self.log_level.read().unwrap_or_else(|err| err.into_inner());
        if level < minimum {
            tracing::trace!("Dropping {} log below {}", level, minimum);
            return Ok(());
        }
        self.notify(ServerNotification::logging_message(
            level,
            logger.map(str::to_string),
            data.into(),
        ))
        .await
    }

    /// Send a typed notification to the client.
    pub async fn notify(&self, notification: ServerNotification) -> Result<()> {
        let method = notification.method();
        let params = match serde_json::to_value(&notification)? {
            Value::Object(mut map) => map.remove("params"),
            _ => None,
        };
        self.session().notify(method, params).await
    }

    /// Check that the client is still responsive.
    pub async fn ping(&self) -> Result<()> {
        let _: EmptyResult = self
            .session()
            .request(methods::PING, &Value::Null, CallOptions::default())
            .await?;
        Ok(())
    }
}

/// Context provided to [`ClientHandler`](crate::ClientHandler) methods.
#[derive(Clone)]
pub struct ClientCtx {
    session: Session,
    request_id: Option<RequestId>,
}

impl ClientCtx {
    pub(crate) fn new(session: Session) -> Self {
        Self {
            session,
            request_id: None,
        }
    }

    pub(crate) fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// The session to the server.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Id of the server request being handled, if this context belongs to one.
    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// What the server declared during the handshake.
    pub fn peer(&self) -> Option<PeerInfo> {
        self.session.peer()
    }
}
