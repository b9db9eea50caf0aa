use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;

use minder_domain::tool::{ToolDefinition, ToolError, ToolOutcome};

use crate::context::ToolContext;
use crate::schema::validate_args;

/// A registered capability: schema plus handler.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Run the tool. Failures are classified [`ToolError`]s; the registry
    /// adds validation and timeout around this.
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError>;
}

/// Name → capability map. Built once at startup for the full set; delegate
/// sub-agents get restricted copies.
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn ToolHandler>>>,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tools: RwLock::new(BTreeMap::new()),
            timeout,
        }
    }

    pub fn register(&self, handler: Arc<dyn ToolHandler>) {
        let name = handler.definition().name;
        self.tools.write().insert(name, handler);
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.read().keys().cloned().collect()
    }

    /// Schemas for every registered tool, name-ordered.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .values()
            .map(|h| h.definition())
            .collect()
    }

    /// A registry containing only the named tools (unknown names are
    /// silently skipped). Used for delegate/explore restricted sets.
    pub fn restricted(&self, allow: &[String]) -> ToolRegistry {
        let restricted = ToolRegistry::new(self.timeout);
        {
            let tools = self.tools.read();
            let mut out = restricted.tools.write();
            for name in allow {
                if let Some(handler) = tools.get(name) {
                    out.insert(name.clone(), handler.clone());
                }
            }
        }
        restricted
    }

    /// A copy of this registry widened with extra handlers (the tools a
    /// capability declares while it is active).
    pub fn merged(&self, extra: &[Arc<dyn ToolHandler>]) -> ToolRegistry {
        let merged = ToolRegistry::new(self.timeout);
        {
            let tools = self.tools.read();
            let mut out = merged.tools.write();
            for (name, handler) in tools.iter() {
                out.insert(name.clone(), handler.clone());
            }
            for handler in extra {
                out.insert(handler.definition().name, handler.clone());
            }
        }
        merged
    }

    /// Invoke one tool: validate → timeout → classify. The outcome always
    /// comes back to the caller, error or not.
    pub async fn invoke(&self, name: &str, args: &Value, ctx: &ToolContext) -> ToolOutcome {
        let handler = {
            let tools = self.tools.read();
            tools.get(name).cloned()
        };
        let Some(handler) = handler else {
            return ToolOutcome::error(ToolError::invalid_args(format!(
                "unknown tool: '{name}'"
            )));
        };

        let def = handler.definition();
        if let Err(violation) = validate_args(&def.parameters, args) {
            return ToolOutcome::error(ToolError::invalid_args(violation));
        }

        let call = handler.call(args.clone(), ctx);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => ToolOutcome::ok(value),
            Ok(Err(error)) => ToolOutcome::error(error),
            Err(_) => {
                tracing::warn!(tool = name, timeout_s = self.timeout.as_secs(), "tool timed out");
                ToolOutcome::error(ToolError::timeout(format!(
                    "tool '{name}' exceeded {}s",
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minder_domain::tool::ToolErrorKind;

    struct EchoTool;

    #[async_trait::async_trait]
    impl ToolHandler for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".into(),
                description: "Echo the input text.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
            }
        }

        async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
            Ok(args["text"].clone())
        }
    }

    struct SlowTool;

    #[async_trait::async_trait]
    impl ToolHandler for SlowTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "slow".into(),
                description: "Sleeps.".into(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            }
        }

        async fn call(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Value::Null)
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::for_tests(std::env::temp_dir())
    }

    #[tokio::test]
    async fn invoke_happy_path() {
        let registry = ToolRegistry::new(Duration::from_secs(5));
        registry.register(Arc::new(EchoTool));

        let outcome = registry
            .invoke("echo", &serde_json::json!({"text": "hi"}), &ctx())
            .await;
        assert!(!outcome.is_error());
        assert_eq!(outcome.render(), "hi");
    }

    #[tokio::test]
    async fn unknown_tool_is_invalid_args() {
        let registry = ToolRegistry::new(Duration::from_secs(5));
        let outcome = registry
            .invoke("nope", &serde_json::json!({}), &ctx())
            .await;
        assert_eq!(outcome.error_kind(), Some(ToolErrorKind::InvalidArgs));
    }

    #[tokio::test]
    async fn schema_violation_rejected_before_handler() {
        let registry = ToolRegistry::new(Duration::from_secs(5));
        registry.register(Arc::new(EchoTool));

        let outcome = registry.invoke("echo", &serde_json::json!({}), &ctx()).await;
        assert_eq!(outcome.error_kind(), Some(ToolErrorKind::InvalidArgs));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_classified() {
        let registry = ToolRegistry::new(Duration::from_millis(50));
        registry.register(Arc::new(SlowTool));

        let outcome = registry.invoke("slow", &serde_json::json!({}), &ctx()).await;
        assert_eq!(outcome.error_kind(), Some(ToolErrorKind::Timeout));
    }

    #[tokio::test]
    async fn restricted_subset_hides_other_tools() {
        let registry = ToolRegistry::new(Duration::from_secs(5));
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(SlowTool));

        let subset = registry.restricted(&["echo".into(), "ghost".into()]);
        assert!(subset.has("echo"));
        assert!(!subset.has("slow"));
        assert_eq!(subset.definitions().len(), 1);
    }
}
