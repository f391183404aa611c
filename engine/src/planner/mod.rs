//! Plan generation
//!
//! Turns a leased task plus a context snapshot into an ordered list of
//! commands. The reasoning service sits behind the `PlanBackend` trait so
//! the engine never depends on a concrete provider; tests inject a
//! deterministic fake. Every backend call passes through the shared rate
//! limiter, and identical requests within the cache TTL are answered from
//! the cache without touching the backend at all.

pub mod cache;
pub mod limiter;
pub mod openai;

use crate::executor::CommandSpec;
use crate::queue::Task;
use async_trait::async_trait;
use cache::PlanCache;
use limiter::RateLimiter;
use sdk::errors::{AgentError, AgentErrorExt};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Capability handle for the external reasoning service.
///
/// The single operation the engine needs: one prompt in, one text reply
/// out. Wire details live entirely inside implementations.
#[async_trait]
pub trait PlanBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, AgentError>;
}

/// Snapshot of project knowledge assembled for one planning request.
#[derive(Debug, Clone, Default)]
pub struct ContextSnapshot {
    pub project_type: Option<String>,
    pub analysis_summary: Option<String>,
    pub learnings: Vec<String>,
}

impl ContextSnapshot {
    /// Stable digest used in cache keys: same context, same key.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.project_type.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"|");
        hasher.update(self.analysis_summary.as_deref().unwrap_or("").as_bytes());
        for learning in &self.learnings {
            hasher.update(b"|");
            hasher.update(learning.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// An ordered command plan for one task. Ephemeral: plans are never
/// persisted, only their outcomes are.
#[derive(Debug, Clone)]
pub struct Plan {
    pub task_id: String,
    pub commands: Vec<CommandSpec>,
}

/// Plan generator shared by the worker pool.
pub struct PlanGenerator {
    backend: Arc<dyn PlanBackend>,
    cache: PlanCache,
    limiter: Arc<RateLimiter>,
    max_retries: u32,
}

impl PlanGenerator {
    pub fn new(
        backend: Arc<dyn PlanBackend>,
        cache_ttl: Duration,
        limiter: Arc<RateLimiter>,
        max_retries: u32,
    ) -> Self {
        Self {
            backend,
            cache: PlanCache::new(cache_ttl),
            limiter,
            max_retries,
        }
    }

    /// Generates a plan for the task, consulting the cache first.
    ///
    /// Transient backend failures are retried with a short backoff up to
    /// `max_retries` times; the final transient error propagates so the
    /// queue can reschedule the task.
    pub async fn generate(
        &self,
        task: &Task,
        context: &ContextSnapshot,
    ) -> Result<Plan, AgentError> {
        let key = PlanCache::key(&task.kind, &task.payload, &context.digest());

        let response = match self.cache.get(&key).await {
            Some(cached) => cached,
            None => {
                let prompt = build_prompt(task, context);
                let response = self.complete_with_retries(&prompt).await?;
                self.cache.put(key, response.clone()).await;
                response
            }
        };

        let commands = parse_commands(&response);
        debug!(task_id = %task.id, count = commands.len(), "plan generated");
        Ok(Plan {
            task_id: task.id.clone(),
            commands,
        })
    }

    async fn complete_with_retries(&self, prompt: &str) -> Result<String, AgentError> {
        let mut attempt = 0;
        loop {
            self.limiter.acquire(Duration::from_secs(120)).await?;

            match self.backend.complete(prompt).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = Duration::from_millis(500 * (1 << attempt.min(6)));
                    warn!(
                        backend = self.backend.name(),
                        attempt,
                        error = %e,
                        "transient backend failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Assembles the planning prompt from the task and context snapshot.
fn build_prompt(task: &Task, context: &ContextSnapshot) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are an autonomous assistant working inside a software project.\n\n");
    prompt.push_str(&format!("Task: {}\n", task.kind));
    prompt.push_str(&format!("Details: {}\n", task.payload));

    if let Some(project_type) = &context.project_type {
        prompt.push_str(&format!("Project type: {}\n", project_type));
    }
    if let Some(summary) = &context.analysis_summary {
        prompt.push_str(&format!("Recent analysis: {}\n", summary));
    }
    if !context.learnings.is_empty() {
        prompt.push_str("Relevant learnings from past work:\n");
        for learning in &context.learnings {
            prompt.push_str(&format!("- {}\n", learning));
        }
    }

    prompt.push_str(
        "\nGenerate a list of shell commands to accomplish this task, one per line. \
         Commands run from the project root. Do not include explanations.\n",
    );
    prompt
}

/// Parses the backend reply into commands.
///
/// One command per line; blank lines, `#` comments, and markdown fences
/// are skipped. Lines that fail to tokenize (unbalanced quotes) are
/// dropped with a warning rather than failing the whole plan.
fn parse_commands(response: &str) -> Vec<CommandSpec> {
    response
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with("```"))
        .filter_map(|line| {
            let spec = CommandSpec::parse(line);
            if spec.is_none() {
                warn!(line, "dropping unparseable plan line");
            }
            spec
        })
        .collect()
}

/// Deterministic in-memory backend for tests.
#[cfg(test)]
pub(crate) struct FakeBackend {
    reply: String,
    calls: std::sync::atomic::AtomicU32,
    fail_first: u32,
}

#[cfg(test)]
impl FakeBackend {
    pub(crate) fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: std::sync::atomic::AtomicU32::new(0),
            fail_first: 0,
        }
    }

    pub(crate) fn failing_first(reply: &str, failures: u32) -> Self {
        Self {
            reply: reply.to_string(),
            calls: std::sync::atomic::AtomicU32::new(0),
            fail_first: failures,
        }
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl PlanBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn complete(&self, _prompt: &str) -> Result<String, AgentError> {
        let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if call < self.fail_first {
            Err(AgentError::Transient("synthetic outage".to_string()))
        } else {
            Ok(self.reply.clone())
        }
    }
}
