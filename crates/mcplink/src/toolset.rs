//! Tool registry and dispatcher.
//!
//! Tools are registered at startup with a descriptor whose input schema is
//! derived from a `schemars::JsonSchema` type. [`ToolSet::invoke`] validates
//! arguments against that schema before the handler runs, so handlers can
//! rely on required parameters being present and of the declared JSON type.

use std::{
    collections::BTreeMap,
    fmt,
    future::Future,
    sync::{Arc, RwLock},
};

use futures::{FutureExt, future::BoxFuture};
use serde_json::{Map, Value};

use crate::{
    Arguments, Error, Result, ServerCtx,
    schema::{CallToolResult, Tool, ToolSchema},
};

/// Shared tool handler type.
pub type ToolHandler =
    Arc<dyn Fn(ServerCtx, Arguments) -> BoxFuture<'static, Result<CallToolResult>> + Send + Sync>;

/// Whether `value` is an instance of the JSON Schema type `name`.
fn json_type_matches(name: &str, value: &Value) -> bool {
    match name {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// A tool's name, description, input schema and handler.
#[derive(Clone)]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description, advertised when non-empty.
    pub description: String,
    /// Schema the arguments are validated against.
    pub input_schema: ToolSchema,
    handler: ToolHandler,
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish_non_exhaustive()
    }
}

impl ToolDescriptor {
    /// A tool taking no declared parameters.
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ServerCtx, Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            input_schema: ToolSchema::default(),
            handler: Arc::new(move |ctx, args| handler(ctx, args).boxed()),
        }
    }

    /// Set the tool description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Replace the input schema with one derived from `T`.
    ///
    /// The type's own doc comment becomes the description unless one was
    /// already set.
    pub fn with_schema<T: schemars::JsonSchema>(mut self) -> Self {
        self.input_schema = ToolSchema::from_json_schema::<T>();
        if self.description.is_empty()
            && let Some(description) = self.input_schema.description.take()
        {
            self.description = description;
        }
        self
    }

    /// The wire definition advertised in `tools/list`.
    pub fn tool(&self) -> Tool {
        Tool {
            name: self.name.clone(),
            description: (!self.description.is_empty()).then(|| self.description.clone()),
            input_schema: self.input_schema.clone(),
        }
    }

    /// Check `arguments` against the input schema.
    pub fn validate(&self, arguments: Option<Value>) -> Result<Arguments> {
        let map = match arguments {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(Error::invalid_arguments(
                    &self.name,
                    format!("arguments must be an object, got {other}"),
                ));
            }
        };
        for name in &self.input_schema.required {
            if map.get(name).is_none_or(Value::is_null) {
                return Err(Error::invalid_arguments(
                    &self.name,
                    format!("missing required parameter '{name}'"),
                ));
            }
        }
        for (name, value) in &map {
            let types = self.input_schema.property_types(name);
            if value.is_null() || types.is_empty() {
                continue;
            }
            if !types.iter().any(|t| json_type_matches(t, value)) {
                return Err(Error::invalid_arguments(
                    &self.name,
                    format!("parameter '{name}' must be {}, got {value}", types.join(" or ")),
                ));
            }
        }
        Ok(Arguments::from(map))
    }
}

/// Central registry and dispatcher.
#[derive(Clone, Default)]
pub struct ToolSet {
    /// Registered tools keyed by name.
    tools: Arc<RwLock<BTreeMap<String, ToolDescriptor>>>,
}

impl ToolSet {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names must be unique.
    pub fn register(&self, descriptor: ToolDescriptor) -> Result<()> {
        let mut tools = self.tools.write().unwrap_or_else(|err| err.into_inner());
        if tools.contains_key(&descriptor.name) {
            return Err(Error::InvalidConfiguration(format!(
                "tool '{}' registered twice",
                descriptor.name
            )));
        }
        tracing::debug!("Registered tool {}", descriptor.name);
        tools.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_tool(self, descriptor: ToolDescriptor) -> Result<Self> {
        self.register(descriptor)?;
        Ok(self)
    }

    /// Wire definitions of every tool, sorted by name.
    pub fn list(&self) -> Vec<Tool> {
        self.tools
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .values()
            .map(ToolDescriptor::tool)
            .collect()
    }

    /// The descriptor registered under `name`.
    pub fn descriptor(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .get(name)
            .cloned()
    }

    /// Whether no tool is registered.
    pub fn is_empty(&self) -> bool {
        self.tools
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .is_empty()
    }

    /// Call a tool by name after validating its arguments.
    pub async fn invoke(
        &self,
        ctx: ServerCtx,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult> {
        let descriptor = self
            .descriptor(name)
            .ok_or_else(|| Error::UnknownTool(name.to_string()))?;
        let arguments = descriptor.validate(arguments)?;
        tracing::info!("Invoking tool {}", name);
        (descriptor.handler)(ctx, arguments).await
    }
}
