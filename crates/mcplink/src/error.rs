use std::{io, result::Result as StdResult};

use serde_json::Value;
use thiserror::Error;

use crate::schema::{
    ErrorObject, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
    SAMPLING_DECLINED,
};

#[derive(Error, Debug, Clone, PartialEq)]
/// Error type for session, transport and tool operations.
pub enum Error {
    /// I/O error with a message.
    #[error("IO error: {message}")]
    Io {
        /// Error message details.
        message: String,
    },

    /// JSON serialization or parsing error.
    #[error("JSON serialization error: {message}")]
    JsonParse {
        /// Error message details.
        message: String,
    },

    /// Channel-level failure. Fatal to the transport it came from.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation attempted on a transport that has already failed or closed.
    #[error("Channel closed")]
    ChannelClosed,

    /// A single frame could not be decoded into an envelope.
    #[error("Malformed message: {message}")]
    MalformedMessage {
        /// Error message details.
        message: String,
    },

    /// Request timed out.
    #[error("Request timed out after {timeout_ms}ms: {request_id}")]
    Timeout {
        /// The request ID that timed out.
        request_id: String,
        /// Timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Request was cancelled by the caller.
    #[error("Request cancelled: {request_id}")]
    Cancelled {
        /// The request ID that was cancelled.
        request_id: String,
    },

    /// The session terminated while the operation was outstanding.
    #[error("Session closed")]
    SessionClosed,

    /// A response arrived for an id with no outstanding request.
    #[error("Unexpected response for request ID: {0}")]
    UnexpectedResponse(String),

    /// Method not found error.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Invalid request error.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Tool is not registered.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Tool arguments failed schema validation.
    #[error("Invalid arguments for '{tool}': {message}")]
    InvalidArguments {
        /// Tool whose arguments were rejected.
        tool: String,
        /// Error message details.
        message: String,
    },

    /// The peer did not advertise the capability needed for this operation.
    #[error("Capability not supported by peer: {0}")]
    CapabilityNotSupported(String),

    /// Operation attempted before the handshake completed.
    #[error("Session not initialized: {0}")]
    NotInitialized(String),

    /// The sampling peer refused to generate a message.
    #[error("Sampling declined: {0}")]
    SamplingDeclined(String),

    /// The sampling peer failed while generating a message.
    #[error("Sampling failed: {0}")]
    SamplingFailed(String),

    /// Error response received from the peer that has no local equivalent.
    #[error("Remote error {code}: {message}")]
    Remote {
        /// JSON-RPC error code.
        code: i32,
        /// Error message.
        message: String,
        /// Optional structured data.
        data: Option<Value>,
    },

    /// Invalid configuration error.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl Error {
    /// Create an InvalidArguments error
    pub fn invalid_arguments(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a MalformedMessage error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedMessage {
            message: message.into(),
        }
    }

    /// The JSON-RPC error code this error carries when sent in a response.
    pub fn code(&self) -> i32 {
        match self {
            Self::MethodNotFound(_) => METHOD_NOT_FOUND,
            Self::UnknownTool(_) | Self::InvalidArguments { .. } => INVALID_PARAMS,
            Self::InvalidRequest(_) | Self::NotInitialized(_) => INVALID_REQUEST,
            Self::JsonParse { .. } | Self::MalformedMessage { .. } => PARSE_ERROR,
            Self::SamplingDeclined(_) => SAMPLING_DECLINED,
            Self::Remote { code, .. } => *code,
            _ => INTERNAL_ERROR,
        }
    }

    /// Render this error as the payload of an error response.
    pub fn to_error_object(&self) -> ErrorObject {
        let (message, data) = match self {
            Self::Remote { message, data, .. } => (message.clone(), data.clone()),
            other => (other.to_string(), None),
        };
        ErrorObject {
            code: self.code(),
            message,
            data,
        }
    }

    /// Map an error response received from the peer to a local error.
    pub fn from_error_object(error: ErrorObject) -> Self {
        match error.code {
            METHOD_NOT_FOUND => Self::MethodNotFound(error.message),
            SAMPLING_DECLINED => Self::SamplingDeclined(error.message),
            code => Self::Remote {
                code,
                message: error.message,
                data: error.data,
            },
        }
    }

    /// Whether this error ends the session that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::ChannelClosed | Self::Io { .. } | Self::SessionClosed
        )
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonParse {
            message: err.to_string(),
        }
    }
}

/// Result alias using the crate error type.
pub type Result<T> = StdResult<T, Error>;
