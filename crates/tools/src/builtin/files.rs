//! Workspace file tools. Paths are resolved relative to the workspace
//! root; anything escaping it is rejected before touching the filesystem.

use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tokio::fs;

use minder_domain::tool::{ToolDefinition, ToolError};

use crate::context::ToolContext;
use crate::registry::ToolHandler;

const MAX_READ_BYTES: u64 = 512 * 1024;

/// Resolve a user-supplied relative path inside the workspace. Rejects
/// absolute paths and any `..` traversal.
pub(crate) fn resolve_in_workspace(root: &Path, rel: &str) -> Result<PathBuf, String> {
    let rel_path = Path::new(rel);
    if rel_path.is_absolute() {
        return Err(format!("absolute paths are not allowed: {rel}"));
    }
    for component in rel_path.components() {
        match component {
            Component::ParentDir => {
                return Err(format!("path escapes the workspace: {rel}"));
            }
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(format!("unsupported path component in: {rel}")),
        }
    }
    Ok(root.join(rel_path))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// read_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ReadRequest {
    path: String,
}

pub struct ReadFileTool;

#[async_trait::async_trait]
impl ToolHandler for ReadFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".into(),
            description: "Read a text file from the workspace.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path relative to the workspace" }
                },
                "required": ["path"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let req: ReadRequest =
            serde_json::from_value(args).map_err(|e| ToolError::invalid_args(e.to_string()))?;
        let path = resolve_in_workspace(&ctx.workspace_root, &req.path)
            .map_err(ToolError::invalid_args)?;

        let meta = fs::metadata(&path)
            .await
            .map_err(|e| ToolError::external(format!("{}: {e}", req.path)))?;
        if meta.len() > MAX_READ_BYTES {
            return Err(ToolError::invalid_args(format!(
                "{} is {} bytes, above the {MAX_READ_BYTES} byte read cap",
                req.path,
                meta.len()
            )));
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::external(format!("{}: {e}", req.path)))?;
        Ok(serde_json::json!({ "path": req.path, "content": content }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// write_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct WriteRequest {
    path: String,
    content: String,
}

pub struct WriteFileTool;

#[async_trait::async_trait]
impl ToolHandler for WriteFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "write_file".into(),
            description: "Write a text file in the workspace, creating parent directories.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path relative to the workspace" },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let req: WriteRequest =
            serde_json::from_value(args).map_err(|e| ToolError::invalid_args(e.to_string()))?;
        let path = resolve_in_workspace(&ctx.workspace_root, &req.path)
            .map_err(ToolError::invalid_args)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::external(e.to_string()))?;
        }
        fs::write(&path, &req.content)
            .await
            .map_err(|e| ToolError::external(format!("{}: {e}", req.path)))?;
        Ok(serde_json::json!({ "path": req.path, "bytes": req.content.len() }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// list_dir
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ListRequest {
    #[serde(default = "default_dot")]
    path: String,
}

fn default_dot() -> String {
    ".".into()
}

pub struct ListDirTool;

#[async_trait::async_trait]
impl ToolHandler for ListDirTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_dir".into(),
            description: "List a workspace directory.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path relative to the workspace (default '.')" }
                }
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let req: ListRequest =
            serde_json::from_value(args).map_err(|e| ToolError::invalid_args(e.to_string()))?;
        let path = resolve_in_workspace(&ctx.workspace_root, &req.path)
            .map_err(ToolError::invalid_args)?;

        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&path)
            .await
            .map_err(|e| ToolError::external(format!("{}: {e}", req.path)))?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| ToolError::external(e.to_string()))?
        {
            let meta = entry
                .metadata()
                .await
                .map_err(|e| ToolError::external(e.to_string()))?;
            entries.push(serde_json::json!({
                "name": entry.file_name().to_string_lossy(),
                "is_dir": meta.is_dir(),
                "size": meta.len(),
            }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        Ok(serde_json::json!({ "path": req.path, "entries": entries }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minder_domain::tool::ToolErrorKind;

    fn ctx(dir: &Path) -> ToolContext {
        ToolContext::for_tests(dir.to_path_buf())
    }

    #[test]
    fn traversal_rejected() {
        let root = Path::new("/ws");
        assert!(resolve_in_workspace(root, "ok/file.txt").is_ok());
        assert!(resolve_in_workspace(root, "../etc/passwd").is_err());
        assert!(resolve_in_workspace(root, "a/../../b").is_err());
        assert!(resolve_in_workspace(root, "/etc/passwd").is_err());
    }

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());

        WriteFileTool
            .call(
                serde_json::json!({"path": "notes/a.txt", "content": "hello"}),
                &ctx,
            )
            .await
            .unwrap();

        let read = ReadFileTool
            .call(serde_json::json!({"path": "notes/a.txt"}), &ctx)
            .await
            .unwrap();
        assert_eq!(read["content"], "hello");
    }

    #[tokio::test]
    async fn read_missing_file_is_external_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReadFileTool
            .call(serde_json::json!({"path": "nope.txt"}), &ctx(dir.path()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::External);
    }

    #[tokio::test]
    async fn list_dir_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();

        let result = ListDirTool
            .call(serde_json::json!({}), &ctx(dir.path()))
            .await
            .unwrap();
        let names: Vec<_> = result["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }
}
