//! Tool definitions: metadata plus an async handler the agent loop can
//! dispatch to.
//!
//! A [`Tool`] couples a unique name, a natural-language description, a JSON
//! schema describing its input, and an opaque async handler. The runtime
//! never interprets tool arguments semantically; it validates them against
//! the schema (when enabled) and hands them to the handler.
//!
//! # Examples
//!
//! ```
//! use serde_json::json;
//! use wormhole::tool;
//!
//! let add = tool("add", "Add two numbers")
//!     .param("a", "number")
//!     .param("b", "number")
//!     .build(|args| async move {
//!         let a = args["a"].as_f64().unwrap_or(0.0);
//!         let b = args["b"].as_f64().unwrap_or(0.0);
//!         Ok(json!(a + b))
//!     });
//!
//! assert_eq!(add.name(), "add");
//! ```

mod executor;
mod registry;

pub use executor::{ToolExecutor, ToolSafetyConfig};
pub use registry::ToolRegistry;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::request::ToolSpec;

/// Async tool handler: `(args) -> Result<Value>`, boxed and pinned so
/// handlers of different concrete types share one registry, `Send + Sync`
/// so the executor can run them from any worker.
pub type ToolHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// A registered tool: metadata the model sees plus the handler that runs
/// when the model calls it.
///
/// Tools are immutable once built and cheap to clone (the handler is
/// reference-counted).
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    input_schema: Value,
    handler: ToolHandler,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish_non_exhaustive()
    }
}

impl Tool {
    /// Creates a tool from a full JSON schema and a handler closure.
    ///
    /// The handler returns a pinned, boxed future; use [`tool`] for the
    /// builder form that accepts a plain `async` closure.
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler: Arc::new(handler),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    /// The wire-facing `{name, description, input_schema}` triple included
    /// in outbound requests.
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }

    /// Invokes the handler. Callers go through the
    /// [`ToolExecutor`] in normal operation; this is the raw entry.
    pub async fn invoke(&self, args: Value) -> Result<Value> {
        (self.handler)(args).await
    }
}

/// Starts a [`ToolBuilder`]. The builder form covers the common case of a
/// flat parameter list; use [`Tool::new`] for arbitrary schemas.
pub fn tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder {
        name: name.into(),
        description: description.into(),
        params: Vec::new(),
        optional: Vec::new(),
    }
}

/// Fluent construction of a [`Tool`] with a flat object schema.
pub struct ToolBuilder {
    name: String,
    description: String,
    params: Vec<(String, String, Option<String>)>,
    optional: Vec<String>,
}

impl ToolBuilder {
    /// Adds a required parameter with a JSON type name (`string`, `number`,
    /// `integer`, `boolean`, `array`, `object`).
    pub fn param(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.params.push((name.into(), type_name.into(), None));
        self
    }

    /// Adds a required parameter with a description.
    pub fn param_described(
        mut self,
        name: impl Into<String>,
        type_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.params
            .push((name.into(), type_name.into(), Some(description.into())));
        self
    }

    /// Marks a previously added parameter as optional.
    pub fn optional(mut self, name: impl Into<String>) -> Self {
        self.optional.push(name.into());
        self
    }

    /// Finishes the tool with an async handler.
    pub fn build<F, Fut>(self, handler: F) -> Tool
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for (name, type_name, description) in &self.params {
            let mut prop = serde_json::json!({ "type": type_name });
            if let Some(desc) = description {
                prop["description"] = Value::from(desc.clone());
            }
            properties.insert(name.clone(), prop);
            if !self.optional.contains(name) {
                required.push(name.clone());
            }
        }
        let schema = serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        });

        Tool::new(self.name, self.description, schema, move |args| {
            Box::pin(handler(args))
        })
    }
}
