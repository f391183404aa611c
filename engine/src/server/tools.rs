//! Tools server façade
//!
//! Side-effecting operations: command execution and file writes, both
//! confined by the same gates the worker loop uses, plus read-only code
//! search and dependency analysis.

use super::RequestHandler;
use crate::analyzer;
use crate::context::ContextIndex;
use crate::executor::{CommandExecutor, CommandSpec};
use async_trait::async_trait;
use sdk::errors::AgentError;
use sdk::protocol::Request;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub struct ToolsHandler {
    executor: Arc<CommandExecutor>,
    index: Arc<ContextIndex>,
}

impl ToolsHandler {
    pub fn new(executor: Arc<CommandExecutor>, index: Arc<ContextIndex>) -> Self {
        Self { executor, index }
    }
}

#[async_trait]
impl RequestHandler for ToolsHandler {
    fn name(&self) -> &'static str {
        "tools"
    }

    async fn handle(&self, request: &Request) -> Result<serde_json::Value, AgentError> {
        match request.method.as_str() {
            "execute_command" => {
                let line = request.param_str("command")?;
                let mut spec = CommandSpec::parse(&line)
                    .ok_or_else(|| AgentError::MissingParameter("command".to_string()))?;
                spec.cwd = request.param_str_opt("cwd").map(PathBuf::from);
                spec.timeout_secs = request.param_u64_opt("timeout_secs");

                let result = self.executor.execute(&spec).await?;
                Ok(serde_json::to_value(result)
                    .map_err(|e| AgentError::Generation(e.to_string()))?)
            }
            "write_file" => {
                let path = PathBuf::from(request.param_str("path")?);
                let content = request.param_str("content")?;

                let target = self.executor.guard().validate_for_write(&path)?;
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&target, content)?;
                info!(path = %target.display(), "file written via tools server");
                Ok(json!({"status": "written", "path": target}))
            }
            "search_code" => {
                let pattern = request.param_str("pattern")?;
                let matches = self.index.search_code(&pattern);
                Ok(json!({"matches": matches}))
            }
            "analyze_dependencies" => {
                let deps = analyzer::analyze_dependencies(self.executor.guard().project_root());
                Ok(json!({"manifests": deps}))
            }
            other => Err(AgentError::UnknownMethod(other.to_string())),
        }
    }
}
