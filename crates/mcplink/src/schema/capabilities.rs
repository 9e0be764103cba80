use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A named optional feature a peer can declare during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// The peer answers `sampling/createMessage`.
    Sampling,
    /// The peer emits (server) log notifications.
    Logging,
    /// The peer consumes progress notifications.
    Progress,
    /// The peer serves `tools/list` and `tools/call`.
    Tools,
}

impl Capability {
    /// Member name in the capabilities object.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sampling => "sampling",
            Self::Logging => "logging",
            Self::Progress => "progress",
            Self::Tools => "tools",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Capabilities declared by one side of a session.
///
/// Clients and servers share this shape; each fills in the members that apply
/// to its role. Members this runtime does not know are kept in `other`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, Value>>,
    #[serde(flatten)]
    pub other: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolsCapability {
    /// Whether this server supports notifications for changes to the tool list.
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

fn empty() -> Option<Value> {
    Some(Value::Object(Map::new()))
}

impl Capabilities {
    /// Declare `sampling`: this client answers `sampling/createMessage`.
    pub fn with_sampling(mut self) -> Self {
        self.sampling = empty();
        self
    }

    /// Declare `logging`: this server sends log notifications.
    pub fn with_logging(mut self) -> Self {
        self.logging = empty();
        self
    }

    /// Declare `progress`: this client wants progress notifications for
    /// requests it tags with a progress token.
    pub fn with_progress(mut self) -> Self {
        self.progress = empty();
        self
    }

    /// Declare `tools`: this server answers `tools/list` and `tools/call`.
    pub fn with_tools(mut self, list_changed: bool) -> Self {
        self.tools = Some(ToolsCapability {
            list_changed: Some(list_changed),
        });
        self
    }

    /// Whether `capability` was declared.
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Sampling => self.sampling.is_some(),
            Capability::Logging => self.logging.is_some(),
            Capability::Progress => self.progress.is_some(),
            Capability::Tools => self.tools.is_some(),
        }
    }
}
