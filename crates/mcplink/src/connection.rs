use async_trait::async_trait;

use crate::{
    Error, Result,
    context::ClientCtx,
    schema::{CreateMessageParams, CreateMessageResult, LoggingMessageParams, ProgressParams},
};

/// Handler trait that client implementers provide.
///
/// The client runtime routes server-initiated requests (`sampling/createMessage`,
/// `ping`) and notifications (`notifications/progress`,
/// `notifications/message`) to these methods. All methods take `&self` so
/// requests can be handled concurrently; use interior mutability for state.
#[async_trait]
pub trait ClientHandler: Send + Sync {
    /// Called after the initialization handshake completes.
    async fn on_connect(&self, _context: &ClientCtx) -> Result<()> {
        Ok(())
    }

    /// Called when the client closes the connection.
    async fn on_shutdown(&self, _context: &ClientCtx) -> Result<()> {
        Ok(())
    }

    /// Respond to a ping request from the server.
    async fn pong(&self, _context: &ClientCtx) -> Result<()> {
        Ok(())
    }

    /// Sample a message on behalf of the server.
    ///
    /// Returning [`Error::SamplingDeclined`] answers with code `-1`.
    async fn create_message(
        &self,
        _context: &ClientCtx,
        _params: CreateMessageParams,
    ) -> Result<CreateMessageResult> {
        Err(Error::SamplingDeclined(
            "client has no sampling handler".into(),
        ))
    }

    /// Progress update for a request this client made with a progress token.
    async fn on_progress(&self, _context: &ClientCtx, _params: ProgressParams) -> Result<()> {
        Ok(())
    }

    /// Log message emitted by the server.
    async fn on_logging_message(
        &self,
        _context: &ClientCtx,
        _params: LoggingMessageParams,
    ) -> Result<()> {
        Ok(())
    }
}

/// A client that ignores everything the server sends and declines sampling.
#[async_trait]
impl ClientHandler for () {}
