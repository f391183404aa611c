//! Context server façade
//!
//! Read-only view over the `ContextIndex`.

use super::RequestHandler;
use crate::context::ContextIndex;
use async_trait::async_trait;
use sdk::errors::AgentError;
use sdk::protocol::Request;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

pub struct ContextHandler {
    index: Arc<ContextIndex>,
}

impl ContextHandler {
    pub fn new(index: Arc<ContextIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl RequestHandler for ContextHandler {
    fn name(&self) -> &'static str {
        "context"
    }

    async fn handle(&self, request: &Request) -> Result<serde_json::Value, AgentError> {
        match request.method.as_str() {
            "search_files" => {
                let query = request.param_str("query")?;
                let files = self.index.search_files(&query);
                Ok(json!({"files": files}))
            }
            "read_file" => {
                let path = PathBuf::from(request.param_str("path")?);
                let start = request.param_u64_opt("start_line").map(|v| v as usize);
                let end = request.param_u64_opt("end_line").map(|v| v as usize);
                let content = self.index.read_file(&path, start, end)?;
                Ok(json!({"content": content}))
            }
            "find_definition" => {
                let symbol = request.param_str("symbol")?;
                let definitions = self.index.find_definition(&symbol).await?;
                Ok(json!({"definitions": definitions}))
            }
            "get_structure" => {
                let path = PathBuf::from(request.param_str("path")?);
                let symbols = self.index.get_structure(&path).await?;
                Ok(json!({"symbols": symbols}))
            }
            "project_summary" => {
                let summary = self.index.project_summary();
                Ok(serde_json::to_value(summary)
                    .map_err(|e| AgentError::Generation(e.to_string()))?)
            }
            other => Err(AgentError::UnknownMethod(other.to_string())),
        }
    }
}
