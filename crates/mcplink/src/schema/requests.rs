use serde::{Deserialize, Serialize};

use super::*;

/// Method names used on the wire.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const SET_LEVEL: &str = "logging/setLevel";
    pub const CREATE_MESSAGE: &str = "sampling/createMessage";
    pub const PROGRESS: &str = "notifications/progress";
    pub const LOGGING_MESSAGE: &str = "notifications/message";
    pub const CANCELLED: &str = "notifications/cancelled";

    /// Methods that may cross the wire before the handshake completes.
    pub fn allowed_before_ready(method: &str) -> bool {
        matches!(method, INITIALIZE | INITIALIZED | PING | CANCELLED)
    }
}

/// A request from the client to the server, to enable or adjust logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetLevelParams {
    /// The level of logging that the client wants to receive from the server.
    pub level: LoggingLevel,
}
