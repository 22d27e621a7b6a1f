//! Tools that agents may call while implementing a stage.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

/// A named capability invoked with JSON arguments.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn invoke(&self, arguments: Value) -> BoxFuture<'_, Result<Value>>;
}

/// Name-indexed set of tools available to an agent.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `tool`, replacing any tool registered under the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        self.tools.insert(tool.name().to_string(), tool)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn invoke<'a>(&'a self, name: &str, arguments: Value) -> BoxFuture<'a, Result<Value>> {
        let tool = self.tools.get(name).cloned();
        let name = name.to_string();
        Box::pin(async move {
            let tool = tool.ok_or_else(|| anyhow!("unknown tool '{name}'"))?;
            debug!(tool = %name, "invoking tool");
            tool.invoke(arguments).await
        })
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FnTool;
    use serde_json::json;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FnTool::new("echo", Ok)));
        registry.register(Arc::new(FnTool::new("fail", |_| Err(anyhow!("exit status 1")))));
        registry
    }

    #[tokio::test]
    async fn invokes_by_name() {
        let result = registry().invoke("echo", json!({"x": 1})).await.expect("echo");
        assert_eq!(result, json!({"x": 1}));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let err = registry().invoke("shell", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("unknown tool 'shell'"));
    }

    #[test]
    fn names_are_sorted() {
        let registry = registry();
        assert_eq!(registry.names().collect::<Vec<_>>(), ["echo", "fail"]);
    }
}
