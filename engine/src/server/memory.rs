//! Memory server façade
//!
//! Maps protocol methods 1:1 onto `MemoryStore` operations.

use super::RequestHandler;
use crate::memory::MemoryStore;
use async_trait::async_trait;
use sdk::errors::AgentError;
use sdk::protocol::Request;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

pub struct MemoryHandler {
    store: Arc<MemoryStore>,
}

impl MemoryHandler {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RequestHandler for MemoryHandler {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn handle(&self, request: &Request) -> Result<serde_json::Value, AgentError> {
        match request.method.as_str() {
            "store_fact" => {
                let key = request.param_str("key")?;
                let value = request.param_value("value")?;
                self.store.store_fact(&key, value).await?;
                Ok(json!({"status": "stored"}))
            }
            "retrieve_fact" => {
                let key = request.param_str("key")?;
                let fact = self.store.retrieve_fact(&key).await?;
                Ok(json!({
                    "value": fact.value,
                    "timestamp": fact.timestamp,
                }))
            }
            "store_decision" => {
                let text = request.param_str("text")?;
                let reasoning = request.param_str("reasoning")?;
                let outcome = request.param_str("outcome")?;
                self.store.store_decision(&text, &reasoning, &outcome).await?;
                Ok(json!({"status": "stored"}))
            }
            "store_learning" => {
                let text = request.param_str("text")?;
                let tags = request.param_str_vec_opt("context_tags").unwrap_or_default();
                self.store.store_learning(&text, &tags).await?;
                Ok(json!({"status": "stored"}))
            }
            "get_learnings" => {
                let query = request.param_str("query")?;
                let learnings = self.store.get_learnings(&query).await;
                Ok(json!({"learnings": learnings}))
            }
            "update_context" => {
                let entries = request.param_value("entries")?;
                let entries: HashMap<String, serde_json::Value> = serde_json::from_value(entries)
                    .map_err(|_| AgentError::MissingParameter("entries".to_string()))?;
                self.store.update_context(entries).await?;
                Ok(json!({"status": "updated"}))
            }
            "get_context" => {
                let context = self.store.get_context().await;
                Ok(json!({"context": context}))
            }
            other => Err(AgentError::UnknownMethod(other.to_string())),
        }
    }
}
