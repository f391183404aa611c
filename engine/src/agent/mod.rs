//! Agent engine
//!
//! Owns every component and runs the loops: the change observer feeds the
//! workflow consumer, the workflow consumer enqueues tasks, workers lease
//! and run them, a reaper returns expired leases, the analyzer refreshes
//! its snapshot on a timer and on `analyze_context` tasks, and three
//! protocol servers answer clients.
//! All loops watch one shutdown flag; once it flips, no new leases are
//! taken and the engine drains.

use crate::analyzer::{AnalysisSnapshot, Analyzer};
use crate::config::Config;
use crate::context::ContextIndex;
use crate::executor::CommandExecutor;
use crate::fs_guard::ProjectGuard;
use crate::memory::MemoryStore;
use crate::observer;
use crate::planner::limiter::RateLimiter;
use crate::planner::{ContextSnapshot, PlanBackend, PlanGenerator};
use crate::queue::{Task, TaskOutcome, TaskQueue};
use crate::server::{self, context::ContextHandler, memory::MemoryHandler, tools::ToolsHandler};
use crate::workflow::{ActionKind, Event, WorkflowTable};
use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sdk::errors::{AgentError, AgentErrorExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Worker poll backoff bounds for an empty queue.
const POLL_MIN: Duration = Duration::from_millis(250);
const POLL_MAX: Duration = Duration::from_secs(2);

pub struct AgentEngine {
    config: Config,
    queue: Arc<TaskQueue>,
    memory: Arc<MemoryStore>,
    index: Arc<ContextIndex>,
    executor: Arc<CommandExecutor>,
    planner: Arc<PlanGenerator>,
    analyzer: Arc<Analyzer>,
    workflow: WorkflowTable,
}

impl AgentEngine {
    /// Wires all components from config. The plan backend is injected so
    /// tests and alternative providers slot in without touching the
    /// engine.
    pub fn new(config: Config, backend: Arc<dyn PlanBackend>) -> Result<Self, AgentError> {
        let runtime_dir = config.runtime_dir();
        std::fs::create_dir_all(&runtime_dir)?;
        let guard = ProjectGuard::new(&config.core.project_root)?;

        let queue = Arc::new(TaskQueue::open(
            &runtime_dir.join("queue.json"),
            config.queue.max_attempts,
            config.queue.backoff_base_secs,
        )?);
        let memory = Arc::new(MemoryStore::open(&runtime_dir.join("memory.json"))?);

        let ignore_set = build_ignore_set(&config.observer.ignore_patterns)?;
        let index = Arc::new(ContextIndex::new(guard.clone(), ignore_set));

        let executor = Arc::new(CommandExecutor::new(
            guard,
            Duration::from_secs(config.executor.command_timeout_secs),
        )?);

        let limiter = Arc::new(RateLimiter::new(
            config.planner.rate_limit_per_minute,
            Duration::from_secs(60),
        ));
        let planner = Arc::new(PlanGenerator::new(
            Arc::clone(&backend),
            Duration::from_secs(config.planner.cache_ttl_secs),
            Arc::clone(&limiter),
            config.planner.max_retries,
        ));
        let analyzer = Arc::new(Analyzer::new(
            &config.core.project_root,
            backend,
            limiter,
            runtime_dir.join("analysis.json"),
        ));

        let workflow = WorkflowTable::from_config(&config.workflows)?;

        Ok(Self {
            config,
            queue,
            memory,
            index,
            executor,
            planner,
            analyzer,
            workflow,
        })
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// Runs the engine until the shutdown flag flips, then drains.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            project = %self.config.core.project_root.display(),
            workers = self.config.core.workers,
            "agent engine starting"
        );

        // A failed initial analysis is not fatal; the timer retries.
        if let Err(e) = self.analyzer.run().await {
            warn!(error = %e, "initial project analysis failed");
        }

        let (events_tx, events_rx) = mpsc::channel::<Event>(256);
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        handles.push(
            observer::spawn(
                self.config.core.project_root.clone(),
                &self.config.observer,
                events_tx,
                shutdown.clone(),
            )
            .context("failed to start change observer")?,
        );
        handles.push(Arc::clone(&self).spawn_workflow_consumer(events_rx, shutdown.clone()));
        handles.push(Arc::clone(&self).spawn_reaper(shutdown.clone()));
        handles.push(Arc::clone(&self).spawn_analysis_timer(shutdown.clone()));

        for n in 0..self.config.core.workers {
            handles.push(Arc::clone(&self).spawn_worker(format!("worker-{}", n), shutdown.clone()));
        }

        let servers = &self.config.servers;
        handles.push(
            server::serve(
                &servers.bind_addr,
                servers.memory_port,
                Arc::new(MemoryHandler::new(Arc::clone(&self.memory))),
                shutdown.clone(),
            )
            .await
            .context("failed to start memory server")?,
        );
        handles.push(
            server::serve(
                &servers.bind_addr,
                servers.context_port,
                Arc::new(ContextHandler::new(Arc::clone(&self.index))),
                shutdown.clone(),
            )
            .await
            .context("failed to start context server")?,
        );
        handles.push(
            server::serve(
                &servers.bind_addr,
                servers.tools_port,
                Arc::new(ToolsHandler::new(
                    Arc::clone(&self.executor),
                    Arc::clone(&self.index),
                )),
                shutdown.clone(),
            )
            .await
            .context("failed to start tools server")?,
        );

        info!("agent engine running");

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "engine task panicked");
            }
        }
        info!("agent engine stopped");
        Ok(())
    }

    fn spawn_workflow_consumer(
        self: Arc<Self>,
        mut events_rx: mpsc::Receiver<Event>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let engine = self;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        // A dropped sender means shutdown too.
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    event = events_rx.recv() => {
                        let Some(event) = event else { break };
                        debug!(kind = event.kind().as_str(), "event received");
                        for seed in engine.workflow.dispatch(&event) {
                            if let Err(e) = engine
                                .queue
                                .enqueue(seed.action.as_str(), seed.payload, seed.priority)
                                .await
                            {
                                error!(
                                    error = %e,
                                    action = seed.action.as_str(),
                                    "enqueue failed"
                                );
                            }
                        }
                    }
                }
            }
        })
    }

    fn spawn_reaper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let engine = self;
        let period = Duration::from_secs((engine.config.queue.lease_ttl_secs / 2).max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        match engine.queue.reap_expired().await {
                            Ok(reaped) if !reaped.is_empty() => {
                                warn!(count = reaped.len(), "expired leases reclaimed");
                            }
                            Ok(_) => {}
                            Err(e) => error!(error = %e, "lease reaper failed"),
                        }
                    }
                }
            }
        })
    }

    fn spawn_analysis_timer(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let engine = self;
        let period = Duration::from_secs(engine.config.analysis.interval_mins * 60);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // the initial run already happened
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = engine.analyzer.run().await {
                            warn!(error = %e, "periodic analysis failed");
                        }
                    }
                }
            }
        })
    }

    fn spawn_worker(
        self: Arc<Self>,
        worker_id: String,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let engine = self;
        let lease_ttl = Duration::from_secs(engine.config.queue.lease_ttl_secs);
        tokio::spawn(async move {
            let mut poll = POLL_MIN;
            loop {
                if *shutdown.borrow() {
                    break;
                }
                match engine.queue.lease(&worker_id, lease_ttl).await {
                    Ok(Some(task)) => {
                        poll = POLL_MIN;
                        engine.process_task(&worker_id, task).await;
                    }
                    Ok(None) => {
                        tokio::select! {
                            changed = shutdown.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                            _ = tokio::time::sleep(poll) => {}
                        }
                        poll = (poll * 2).min(POLL_MAX);
                    }
                    Err(e) => {
                        error!(worker_id, error = %e, "lease failed");
                        tokio::time::sleep(POLL_MAX).await;
                    }
                }
            }
            debug!(worker_id, "worker stopped");
        })
    }

    /// One full attempt at a leased task: plan, execute, record, complete.
    pub async fn process_task(&self, worker_id: &str, task: Task) {
        info!(
            worker_id,
            task_id = %task.id,
            kind = %task.kind,
            attempt = task.attempts,
            "task started"
        );

        if let Err(e) = self.queue.mark_running(&task.id).await {
            error!(task_id = %task.id, error = %e, "failed to mark running");
            return;
        }

        let context = self.assemble_context(&task).await;
        let outcome = match self.attempt(&task, &context).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, kind = e.kind(), "task attempt failed");
                self.record_failure(&task, &context, &e).await;
                if e.is_transient() {
                    TaskOutcome::Retry
                } else {
                    TaskOutcome::Fatal
                }
            }
        };

        if let Err(e) = self.queue.complete(&task.id, outcome).await {
            error!(task_id = %task.id, error = %e, "failed to complete task");
        }
    }

    async fn attempt(
        &self,
        task: &Task,
        context: &ContextSnapshot,
    ) -> Result<TaskOutcome, AgentError> {
        // analyze_context tasks refresh the project assessment before
        // planning, so the plan sees the snapshot it was asked to update.
        // A failed refresh counts as a transient attempt failure.
        if ActionKind::parse(&task.kind) == Some(ActionKind::AnalyzeContext) {
            self.analyzer
                .run()
                .await
                .map_err(|e| AgentError::Transient(format!("analysis refresh failed: {}", e)))?;
        }

        let plan = self.planner.generate(task, context).await?;

        let mut executed = 0usize;
        for command in &plan.commands {
            let result = self.executor.execute(command).await?;
            if !result.success {
                // Stop at the first failing command; a later attempt may
                // see a healthier project.
                self.memory
                    .store_decision(
                        &format!("executed plan for {}", task.kind),
                        &format!("triggered by {}", task.payload),
                        &format!(
                            "command '{}' exited with {:?} after {} of {} commands",
                            result.command,
                            result.exit_code,
                            executed,
                            plan.commands.len()
                        ),
                    )
                    .await?;
                return Ok(TaskOutcome::Retry);
            }
            executed += 1;
        }

        self.memory
            .store_decision(
                &format!("executed plan for {}", task.kind),
                &format!("triggered by {}", task.payload),
                &format!("all {} commands succeeded", executed),
            )
            .await?;
        Ok(TaskOutcome::Success)
    }

    /// Planning context: latest analysis snapshot plus learnings relevant
    /// to the task.
    async fn assemble_context(&self, task: &Task) -> ContextSnapshot {
        let snapshot = AnalysisSnapshot::load(self.analyzer.snapshot_path());
        let query = format!("{} {}", task.kind, task.payload);
        let learnings = self
            .memory
            .get_learnings(&query)
            .await
            .into_iter()
            .map(|l| l.text)
            .collect();

        ContextSnapshot {
            project_type: snapshot.as_ref().map(|s| s.detection.project_type.clone()),
            analysis_summary: snapshot.as_ref().map(|s| s.summary()),
            learnings,
        }
    }

    async fn record_failure(&self, task: &Task, context: &ContextSnapshot, err: &AgentError) {
        let mut tags = vec![task.kind.clone()];
        if let Some(project_type) = &context.project_type {
            tags.push(project_type.clone());
        }
        if let Err(e) = self
            .memory
            .store_learning(&format!("task {} failed: {}", task.kind, err), &tags)
            .await
        {
            error!(error = %e, "failed to record learning");
        }
    }
}

fn build_ignore_set(patterns: &[String]) -> Result<GlobSet, AgentError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| AgentError::Config(format!("Invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| AgentError::Config(format!("Failed to build glob set: {}", e)))
}
