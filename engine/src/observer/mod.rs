//! Change observer
//!
//! Watches the project root with a platform file watcher and turns raw
//! filesystem notifications into engine events. Raw notifications are
//! noisy (editors write temp files, one save fires several events), so
//! each path gets a debounce window; the event is emitted only after the
//! path has been quiet for the whole window.
//!
//! Git commits are observed through the repository itself: a write to
//! `.git/HEAD` or under `.git/refs/heads` fires `on_git_commit`, while
//! everything else under `.git` is ignored.
//!
//! The observer holds no durable state; missed changes before startup are
//! picked up by the periodic project analysis instead.

use crate::config::ObserverConfig;
use crate::workflow::{ChangeKind, Event};
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use sdk::errors::AgentError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Compiles a list of glob patterns into one matcher.
fn build_globset(patterns: &[String]) -> Result<GlobSet, AgentError> {
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

/// Classifies one raw notification path into an engine event.
///
/// Returns None for paths outside the root, ignored paths, and `.git`
/// internals that are not commit markers.
fn classify(
    root: &Path,
    path: &Path,
    change: ChangeKind,
    watch_set: &GlobSet,
    ignore_set: &GlobSet,
) -> Option<Event> {
    let rel = path.strip_prefix(root).ok()?;

    if rel.starts_with(".git") {
        if rel == Path::new(".git/HEAD") || rel.starts_with(".git/refs/heads") {
            return Some(Event::GitCommit {
                reference: rel.to_path_buf(),
            });
        }
        return None;
    }

    if ignore_set.is_match(rel) {
        return None;
    }
    if !watch_set.is_match(rel) {
        return None;
    }

    Some(Event::FileChanged {
        path: rel.to_path_buf(),
        change,
    })
}

fn change_kind(kind: &notify::EventKind) -> Option<ChangeKind> {
    match kind {
        notify::EventKind::Create(_) => Some(ChangeKind::Created),
        notify::EventKind::Modify(_) => Some(ChangeKind::Modified),
        notify::EventKind::Remove(_) => Some(ChangeKind::Deleted),
        _ => None,
    }
}

/// Per-path debounce state.
///
/// Every raw event for a path resets that path's timer; the coalesced
/// event fires once the window elapses with no further activity. The
/// latest change kind within a window wins, so delete-then-recreate
/// surfaces as a creation.
struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, (Event, Instant)>,
}

impl Debouncer {
    fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    fn key_of(event: &Event) -> PathBuf {
        match event {
            Event::FileChanged { path, .. } => path.clone(),
            Event::GitCommit { reference } => reference.clone(),
        }
    }

    fn offer(&mut self, event: Event, now: Instant) {
        let key = Self::key_of(&event);
        self.pending.insert(key, (event, now + self.window));
    }

    /// Next deadline across all pending paths, if any.
    fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|(_, d)| *d).min()
    }

    /// Removes and returns every event whose window has elapsed.
    fn drain_due(&mut self, now: Instant) -> Vec<Event> {
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        due.into_iter()
            .filter_map(|key| self.pending.remove(&key).map(|(event, _)| event))
            .collect()
    }
}

/// Spawns the observer task.
///
/// A `notify` watcher feeds raw events into a bounded channel from its own
/// thread; the returned tokio task debounces and classifies them, sending
/// engine events to `events_tx` until shutdown.
pub fn spawn(
    project_root: PathBuf,
    config: &ObserverConfig,
    events_tx: mpsc::Sender<Event>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<()>, AgentError> {
    let watch_set = build_globset(&config.watch_patterns)?;
    let ignore_set = build_globset(&config.ignore_patterns)?;
    let window = Duration::from_millis(config.debounce_ms);

    let (raw_tx, mut raw_rx) = mpsc::channel::<notify::Event>(256);
    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |result: Result<notify::Event, notify::Error>| {
            match result {
                // blocking_send: the notify callback runs on its own thread
                Ok(event) => {
                    let _ = raw_tx.blocking_send(event);
                }
                Err(e) => error!(error = %e, "file watcher error"),
            }
        })
        .map_err(|e| AgentError::Config(format!("Failed to create file watcher: {}", e)))?;

    watcher
        .watch(&project_root, RecursiveMode::Recursive)
        .map_err(|e| AgentError::Config(format!("Failed to watch {:?}: {}", project_root, e)))?;

    info!(root = %project_root.display(), "change observer started");

    let handle = tokio::spawn(async move {
        // Keep the watcher alive for the lifetime of the task.
        let _watcher = watcher;
        let mut debouncer = Debouncer::new(window);

        loop {
            let deadline = debouncer.next_deadline();
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender means shutdown too.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                raw = raw_rx.recv() => {
                    let Some(raw) = raw else { break };
                    let Some(kind) = change_kind(&raw.kind) else { continue };
                    let now = Instant::now();
                    for path in &raw.paths {
                        if let Some(event) =
                            classify(&project_root, path, kind, &watch_set, &ignore_set)
                        {
                            debouncer.offer(event, now);
                        }
                    }
                }
                _ = async {
                    match deadline {
                        Some(d) => tokio::time::sleep_until(d).await,
                        None => futures::future::pending().await,
                    }
                } => {
                    for event in debouncer.drain_due(Instant::now()) {
                        debug!(?event, "change observed");
                        if events_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
        info!("change observer stopped");
    });

    Ok(handle)
}
