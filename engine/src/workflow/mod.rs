//! Workflow engine
//!
//! Maps observed events to ordered lists of actions. The mapping is
//! resolved from config once at startup into a static table of tagged
//! enums; there is no name-based dispatch at runtime, and an action name
//! the engine does not know is a fatal configuration error.

use sdk::errors::AgentError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// What happened to a watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// An event emitted by the change observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    FileChanged { path: PathBuf, change: ChangeKind },
    GitCommit { reference: PathBuf },
}

impl Event {
    /// The trigger this event fires.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::FileChanged { .. } => EventKind::OnFileChange,
            Event::GitCommit { .. } => EventKind::OnGitCommit,
        }
    }

    /// Task payload describing the event.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            Event::FileChanged { path, change } => serde_json::json!({
                "path": path,
                "change": change,
            }),
            Event::GitCommit { reference } => serde_json::json!({
                "reference": reference,
            }),
        }
    }
}

/// Workflow trigger kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    OnFileChange,
    OnGitCommit,
}

impl EventKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "on_file_change" => Some(EventKind::OnFileChange),
            "on_git_commit" => Some(EventKind::OnGitCommit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::OnFileChange => "on_file_change",
            EventKind::OnGitCommit => "on_git_commit",
        }
    }
}

/// The actions the engine knows how to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    DetectImpact,
    AnalyzeContext,
    AnalyzeCommit,
    SuggestImprovements,
}

impl ActionKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "detect_impact" => Some(ActionKind::DetectImpact),
            "analyze_context" => Some(ActionKind::AnalyzeContext),
            "analyze_commit" => Some(ActionKind::AnalyzeCommit),
            "suggest_improvements" => Some(ActionKind::SuggestImprovements),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::DetectImpact => "detect_impact",
            ActionKind::AnalyzeContext => "analyze_context",
            ActionKind::AnalyzeCommit => "analyze_commit",
            ActionKind::SuggestImprovements => "suggest_improvements",
        }
    }

    /// One-line task description handed to the planner.
    pub fn description(&self) -> &'static str {
        match self {
            ActionKind::DetectImpact => {
                "Determine which parts of the project are affected by the change"
            }
            ActionKind::AnalyzeContext => {
                "Analyze the surrounding code context of the changed files"
            }
            ActionKind::AnalyzeCommit => "Analyze the most recent commit for issues",
            ActionKind::SuggestImprovements => {
                "Suggest concrete improvements based on the latest commit"
            }
        }
    }
}

/// A task to enqueue in response to an event.
#[derive(Debug, Clone)]
pub struct TaskSeed {
    pub action: ActionKind,
    pub payload: serde_json::Value,
    /// Ordinal within the workflow; lower leases first
    pub priority: u32,
}

/// Static event-to-actions table, resolved from config at startup.
#[derive(Debug, Clone)]
pub struct WorkflowTable {
    rules: HashMap<EventKind, Vec<ActionKind>>,
}

impl WorkflowTable {
    /// Builds the table from the config's `[workflows]` section.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Config` for an unknown event or action name.
    pub fn from_config(workflows: &HashMap<String, Vec<String>>) -> Result<Self, AgentError> {
        let mut rules = HashMap::new();

        for (event_name, action_names) in workflows {
            let event = EventKind::parse(event_name).ok_or_else(|| {
                AgentError::Config(format!("Unknown workflow event '{}'", event_name))
            })?;

            let mut actions = Vec::with_capacity(action_names.len());
            for name in action_names {
                let action = ActionKind::parse(name).ok_or_else(|| {
                    AgentError::Config(format!(
                        "Unknown action '{}' in workflow '{}'",
                        name, event_name
                    ))
                })?;
                actions.push(action);
            }

            rules.insert(event, actions);
        }

        Ok(Self { rules })
    }

    /// Resolves an event into task seeds, one per configured action, in
    /// workflow order. Events with no rule produce nothing.
    pub fn dispatch(&self, event: &Event) -> Vec<TaskSeed> {
        let payload = event.payload();
        self.rules
            .get(&event.kind())
            .map(|actions| {
                actions
                    .iter()
                    .enumerate()
                    .map(|(ordinal, action)| TaskSeed {
                        action: *action,
                        payload: payload.clone(),
                        priority: ordinal as u32,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}
