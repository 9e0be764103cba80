use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::*;

/// The severity of a log message.
///
/// These map to syslog message severities, as specified in RFC-5424. Variants
/// are ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl fmt::Display for LoggingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
            Self::Alert => "alert",
            Self::Emergency => "emergency",
        };
        f.write_str(name)
    }
}

/// An out-of-band update for a long-running request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressParams {
    /// The progress token which was given in the initial request.
    #[serde(rename = "progressToken")]
    pub progress_token: ProgressToken,
    /// The progress thus far.
    pub progress: f64,
    /// Total number of items to process (or total progress required), if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    /// An optional message describing the current progress.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A log message passed from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingMessageParams {
    /// The severity of this log message.
    pub level: LoggingLevel,
    /// An optional name of the logger issuing this message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    /// The data to be logged, such as a string message or an object.
    pub data: Value,
}

/// Sent by either side to abandon a request it issued earlier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelledParams {
    /// The ID of the request to cancel.
    #[serde(rename = "requestId")]
    pub request_id: RequestId,
    /// An optional string describing the reason for the cancellation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Notifications sent from the server to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum ServerNotification {
    #[serde(rename = "notifications/progress")]
    Progress(ProgressParams),
    #[serde(rename = "notifications/message")]
    LoggingMessage(LoggingMessageParams),
    #[serde(rename = "notifications/cancelled")]
    Cancelled(CancelledParams),
}

impl ServerNotification {
    /// Create a new Progress notification
    pub fn progress(
        progress_token: ProgressToken,
        progress: f64,
        total: Option<f64>,
        message: Option<String>,
    ) -> Self {
        Self::Progress(ProgressParams {
            progress_token,
            progress,
            total,
            message,
        })
    }

    /// Create a new LoggingMessage notification
    pub fn logging_message(level: LoggingLevel, logger: Option<String>, data: Value) -> Self {
        Self::LoggingMessage(LoggingMessageParams {
            level,
            logger,
            data,
        })
    }

    pub fn method(&self) -> &'static str {
        match self {
            Self::Progress(_) => methods::PROGRESS,
            Self::LoggingMessage(_) => methods::LOGGING_MESSAGE,
            Self::Cancelled(_) => methods::CANCELLED,
        }
    }

    /// Rebuild a typed notification from its wire method and params.
    pub fn from_parts(method: &str, params: Option<Value>) -> serde_json::Result<Self> {
        let params = params.unwrap_or(Value::Null);
        match method {
            methods::PROGRESS => serde_json::from_value(params).map(Self::Progress),
            methods::LOGGING_MESSAGE => serde_json::from_value(params).map(Self::LoggingMessage),
            methods::CANCELLED => serde_json::from_value(params).map(Self::Cancelled),
            other => Err(serde::de::Error::custom(format!(
                "unknown notification method: {other}"
            ))),
        }
    }
}
