//! Persistent memory store
//!
//! What the agent knows across sessions: facts (keyed, last write wins),
//! decisions and learnings (append-only), and a free-form project-context
//! map. Everything lives in one JSON file under `.vigil/runtime/`,
//! rewritten atomically after every mutation. A corrupt file is never
//! fatal: the store starts empty and says so loudly.

use chrono::{DateTime, Utc};
use sdk::errors::AgentError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A keyed fact; storing the same key again overwrites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub value: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// A recorded decision with its reasoning and observed outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub text: String,
    pub reasoning: String,
    pub outcome: String,
    pub timestamp: DateTime<Utc>,
}

/// Something the agent learned, tagged for later retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    pub text: String,
    pub context_tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryData {
    facts: HashMap<String, Fact>,
    decisions: Vec<Decision>,
    learnings: Vec<Learning>,
    project_context: HashMap<String, serde_json::Value>,
}

/// Maximum learnings returned per query.
const MAX_LEARNINGS: usize = 10;

/// Single-writer persistent memory store.
pub struct MemoryStore {
    data: Mutex<MemoryData>,
    path: PathBuf,
}

impl MemoryStore {
    /// Opens the store backed by the given file.
    ///
    /// Missing file → empty store. Corrupt file → empty store plus a
    /// warning; the broken file stays on disk until the next mutation
    /// overwrites it.
    pub fn open(path: &Path) -> Result<Self, AgentError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let contents = fs::read_to_string(path)?;
            match serde_json::from_str::<MemoryData>(&contents) {
                Ok(data) => data,
                Err(e) => {
                    let err = AgentError::CorruptState {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    };
                    warn!(error = %err, "memory file corrupt, starting empty");
                    MemoryData::default()
                }
            }
        } else {
            MemoryData::default()
        };

        Ok(Self {
            data: Mutex::new(data),
            path: path.to_path_buf(),
        })
    }

    /// Stores or overwrites a fact.
    pub async fn store_fact(&self, key: &str, value: serde_json::Value) -> Result<(), AgentError> {
        let mut data = self.data.lock().await;
        data.facts.insert(
            key.to_string(),
            Fact {
                value,
                timestamp: Utc::now(),
            },
        );
        self.persist(&data)?;
        debug!(key, "fact stored");
        Ok(())
    }

    /// Retrieves a fact by key.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::FactNotFound` for an absent key.
    pub async fn retrieve_fact(&self, key: &str) -> Result<Fact, AgentError> {
        let data = self.data.lock().await;
        data.facts
            .get(key)
            .cloned()
            .ok_or_else(|| AgentError::FactNotFound(key.to_string()))
    }

    /// Appends a decision record.
    pub async fn store_decision(
        &self,
        text: &str,
        reasoning: &str,
        outcome: &str,
    ) -> Result<(), AgentError> {
        let mut data = self.data.lock().await;
        data.decisions.push(Decision {
            text: text.to_string(),
            reasoning: reasoning.to_string(),
            outcome: outcome.to_string(),
            timestamp: Utc::now(),
        });
        self.persist(&data)?;
        Ok(())
    }

    /// Appends a learning with its context tags.
    pub async fn store_learning(&self, text: &str, context_tags: &[String]) -> Result<(), AgentError> {
        let mut data = self.data.lock().await;
        data.learnings.push(Learning {
            text: text.to_string(),
            context_tags: context_tags.to_vec(),
            timestamp: Utc::now(),
        });
        self.persist(&data)?;
        Ok(())
    }

    /// Returns learnings whose tags overlap the query terms, most recent
    /// first, capped at ten.
    ///
    /// The query is split on whitespace and compared case-insensitively
    /// against each learning's tags.
    pub async fn get_learnings(&self, query: &str) -> Vec<Learning> {
        let terms: HashSet<String> = query.split_whitespace().map(str::to_lowercase).collect();

        let data = self.data.lock().await;
        let mut matched: Vec<Learning> = data
            .learnings
            .iter()
            .filter(|l| {
                l.context_tags
                    .iter()
                    .any(|tag| terms.contains(&tag.to_lowercase()))
            })
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched.truncate(MAX_LEARNINGS);
        matched
    }

    /// Merges entries into the project-context map.
    pub async fn update_context(
        &self,
        entries: HashMap<String, serde_json::Value>,
    ) -> Result<(), AgentError> {
        let mut data = self.data.lock().await;
        data.project_context.extend(entries);
        self.persist(&data)?;
        Ok(())
    }

    /// Snapshot of the project-context map.
    pub async fn get_context(&self) -> HashMap<String, serde_json::Value> {
        let data = self.data.lock().await;
        data.project_context.clone()
    }

    /// Count of recorded decisions, for status reporting.
    pub async fn decision_count(&self) -> usize {
        self.data.lock().await.decisions.len()
    }

    fn persist(&self, data: &MemoryData) -> Result<(), AgentError> {
        let json = serde_json::to_string_pretty(data)
            .map_err(|e| AgentError::Config(format!("Failed to serialize memory: {}", e)))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
