//! Shell tool — run a command in the workspace, capture capped output.

use std::process::Stdio;
use std::sync::Arc;

use regex::RegexSet;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use minder_domain::tool::{ToolDefinition, ToolError};

use crate::context::ToolContext;
use crate::registry::ToolHandler;

const MAX_OUTPUT_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct ShellRequest {
    command: String,
    #[serde(default)]
    workdir: Option<String>,
}

pub struct ShellTool {
    denied: Arc<RegexSet>,
}

impl ShellTool {
    pub fn new(denied: Arc<RegexSet>) -> Self {
        Self { denied }
    }
}

#[async_trait::async_trait]
impl ToolHandler for ShellTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "shell".into(),
            description: "Run a shell command in the workspace and return its output.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Shell command to execute" },
                    "workdir": { "type": "string", "description": "Working directory relative to the workspace" }
                },
                "required": ["command"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let req: ShellRequest = serde_json::from_value(args)
            .map_err(|e| ToolError::invalid_args(e.to_string()))?;

        if self.denied.is_match(&req.command) {
            return Err(ToolError::invalid_args(format!(
                "command refused by policy: {}",
                req.command
            )));
        }

        let workdir = match &req.workdir {
            Some(rel) => super::files::resolve_in_workspace(&ctx.workspace_root, rel)
                .map_err(ToolError::invalid_args)?,
            None => ctx.workspace_root.clone(),
        };

        let output = Command::new("sh")
            .arg("-c")
            .arg(&req.command)
            .current_dir(&workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ToolError::external(format!("failed to spawn: {e}")))?;

        if ctx.cancel.is_cancelled() {
            return Err(ToolError::external("cancelled"));
        }

        let stdout = cap(&output.stdout);
        let stderr = cap(&output.stderr);

        Ok(serde_json::json!({
            "exit_code": output.status.code(),
            "stdout": stdout,
            "stderr": stderr,
        }))
    }
}

fn cap(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= MAX_OUTPUT_BYTES {
        text.into_owned()
    } else {
        let mut end = MAX_OUTPUT_BYTES;
        while !text.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}\n[output truncated]", &text[..end])
    }
}
