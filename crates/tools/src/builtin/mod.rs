//! Built-in tool handlers: shell execution, workspace file ops, HTTP
//! fetch. Thin reference implementations behind the same capability
//! contract as everything else.

mod fetch;
mod files;
mod shell;

pub use fetch::HttpFetchTool;
pub use files::{ListDirTool, ReadFileTool, WriteFileTool};
pub use shell::ShellTool;

use std::sync::Arc;

use regex::RegexSet;

use crate::ToolRegistry;

/// Tools that only observe state — the `explore` sub-agent subset.
pub const READ_ONLY_TOOLS: &[&str] = &["read_file", "list_dir", "http_fetch"];

/// Register the full built-in set.
pub fn register_builtins(registry: &ToolRegistry, denied_commands: Arc<RegexSet>) {
    registry.register(Arc::new(ShellTool::new(denied_commands)));
    registry.register(Arc::new(ReadFileTool));
    registry.register(Arc::new(WriteFileTool));
    registry.register(Arc::new(ListDirTool));
    registry.register(Arc::new(HttpFetchTool::new()));
}
