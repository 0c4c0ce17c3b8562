//! Tool registry contract.
//!
//! The executor advertises tools to the model through a [`ToolRegistry`] and
//! the tool invoker dispatches the calls the model requests back through it.
//! Handlers are free to have side effects (e.g. submitting transactions), so
//! their failures are never retried or swallowed at this layer.
//!
//! [`AdapterToolRegistry`] is the stock registry: it aggregates any number of
//! [`ToolAdapter`]s, each of which exposes one or more tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::llm::types::ToolDefinition;

// ---------------------------------------------------------------------------
// Registry trait
// ---------------------------------------------------------------------------

/// Maps tool names to executable handlers.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// All tools currently available to the model.
    fn list_tools(&self) -> Vec<ToolDefinition>;

    /// Invoke the named tool.
    ///
    /// Returns [`AgentError::UnknownTool`] if no such tool exists and
    /// [`AgentError::ToolExecutionFailed`] if the handler fails.
    async fn invoke(&self, name: &str, args: Value) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Tool adapter trait
// ---------------------------------------------------------------------------

/// A component that can execute one or more tools.
///
/// Adapters (wallets, HTTP APIs, shells, etc.) implement this trait so the
/// registry can invoke their tools uniformly.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// The unique identifier for this adapter.
    fn adapter_id(&self) -> &str;

    /// Returns the tool definitions this adapter exposes to the model.
    fn tool_definitions(&self) -> Vec<ToolDefinition>;

    /// Execute a named tool with the given arguments.
    ///
    /// Returns the result as a string suitable for feeding back to the model.
    async fn execute(&self, tool_name: &str, args: Value) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Adapter-backed registry
// ---------------------------------------------------------------------------

/// A [`ToolRegistry`] over a fixed set of adapters.
#[derive(Clone, Default)]
pub struct AdapterToolRegistry {
    adapters: Vec<Arc<dyn ToolAdapter>>,
}

impl AdapterToolRegistry {
    /// Create a registry from the given adapters.
    pub fn new(adapters: Vec<Arc<dyn ToolAdapter>>) -> Self {
        Self { adapters }
    }

    /// A registry with no tools.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Find the adapter that owns a given tool name.
    fn find_adapter(&self, tool_name: &str) -> Option<&Arc<dyn ToolAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.tool_definitions().iter().any(|td| td.name == tool_name))
    }
}

#[async_trait]
impl ToolRegistry for AdapterToolRegistry {
    fn list_tools(&self) -> Vec<ToolDefinition> {
        self.adapters
            .iter()
            .flat_map(|a| a.tool_definitions())
            .collect()
    }

    async fn invoke(&self, name: &str, args: Value) -> Result<String> {
        let adapter = self
            .find_adapter(name)
            .ok_or_else(|| AgentError::UnknownTool {
                tool_name: name.to_owned(),
            })?;

        tracing::debug!(tool = %name, adapter = %adapter.adapter_id(), "executing tool");
        adapter.execute(name, args).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct MockAdapter {
        id: String,
        tools: Vec<ToolDefinition>,
    }

    #[async_trait]
    impl ToolAdapter for MockAdapter {
        fn adapter_id(&self) -> &str {
            &self.id
        }

        fn tool_definitions(&self) -> Vec<ToolDefinition> {
            self.tools.clone()
        }

        async fn execute(&self, tool_name: &str, args: Value) -> Result<String> {
            Ok(format!("{tool_name}:{args}"))
        }
    }

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: format!("Tool {name}"),
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    fn registry() -> AdapterToolRegistry {
        AdapterToolRegistry::new(vec![
            Arc::new(MockAdapter {
                id: "wallet".into(),
                tools: vec![tool("balance"), tool("transfer")],
            }),
            Arc::new(MockAdapter {
                id: "prices".into(),
                tools: vec![tool("quote")],
            }),
        ])
    }

    #[test]
    fn lists_tools_across_adapters() {
        let names: Vec<_> = registry().list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["balance", "transfer", "quote"]);
    }

    #[tokio::test]
    async fn invokes_owning_adapter() {
        let out = registry()
            .invoke("quote", serde_json::json!({"pair": "ETH/USD"}))
            .await
            .unwrap();
        assert_eq!(out, r#"quote:{"pair":"ETH/USD"}"#);
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let err = registry()
            .invoke("nonexistent", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool { .. }));
    }

    #[test]
    fn empty_registry_has_no_tools() {
        assert!(AdapterToolRegistry::empty().list_tools().is_empty());
    }
}
