//! Configuration management
//!
//! This module handles loading, validation, and management of the Vigil
//! configuration. Configuration is stored in TOML format at
//! `<project-root>/.vigil/config.toml`.
//!
//! # Configuration Sections
//!
//! - **core**: Project root, log level, worker count
//! - **observer**: Debounce window, watch and ignore patterns
//! - **queue**: Lease TTL, attempt bound, retry backoff
//! - **planner**: Reasoning service endpoint, cache TTL, rate limit
//! - **executor**: Command timeout
//! - **servers**: Bind address and ports for the protocol servers
//! - **workflows**: Event-to-action tables
//! - **analysis**: Periodic analysis cadence
//!
//! # Path Expansion
//!
//! The configuration system automatically:
//! - Expands ~ to the user's home directory
//! - Canonicalizes the project root to resolve symlinks and .. patterns
//! - Verifies the project root is a directory

use sdk::errors::AgentError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
///
/// This structure represents the complete Vigil configuration loaded from
/// `<project-root>/.vigil/config.toml`. Every section has defaults; a missing
/// config file yields a fully defaulted configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Change observer settings
    #[serde(default)]
    pub observer: ObserverConfig,

    /// Task queue settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// Plan generator settings
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Command executor settings
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Protocol server settings
    #[serde(default)]
    pub servers: ServersConfig,

    /// Workflow tables: event name -> ordered action names
    #[serde(default = "default_workflows")]
    pub workflows: HashMap<String, Vec<String>>,

    /// Periodic analysis settings
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Project root directory (supports ~ expansion)
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Number of worker tasks draining the queue
    #[serde(default = "default_workers")]
    pub workers: usize,
}

/// Change observer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverConfig {
    /// Debounce window per path, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Glob patterns for paths worth reacting to
    #[serde(default = "default_watch_patterns")]
    pub watch_patterns: Vec<String>,

    /// Glob patterns excluded from watching
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
}

/// Task queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum attempts before a task is failed terminally
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Lease time-to-live in seconds
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,

    /// Base retry backoff in seconds, doubled per attempt
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
}

/// Plan generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Base URL of the OpenAI-compatible reasoning service
    #[serde(default = "default_planner_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_planner_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Plan cache time-to-live in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Maximum backend calls per rate window
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,

    /// Retries for transient backend failures
    #[serde(default = "default_planner_retries")]
    pub max_retries: u32,
}

/// Command executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Wall-clock timeout per command, in seconds
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

/// Protocol server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServersConfig {
    /// Bind address for all protocol servers
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Memory server port
    #[serde(default = "default_memory_port")]
    pub memory_port: u16,

    /// Context server port
    #[serde(default = "default_context_port")]
    pub context_port: u16,

    /// Tools server port
    #[serde(default = "default_tools_port")]
    pub tools_port: u16,
}

/// Periodic analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Minutes between background project analyses
    #[serde(default = "default_analysis_interval_mins")]
    pub interval_mins: u64,
}

// Default value functions
fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_workers() -> usize {
    2
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_watch_patterns() -> Vec<String> {
    vec!["**/*".to_string()]
}

fn default_ignore_patterns() -> Vec<String> {
    vec![
        ".git/**".to_string(),
        "node_modules/**".to_string(),
        "target/**".to_string(),
        "__pycache__/**".to_string(),
        ".vigil/**".to_string(),
    ]
}

fn default_max_attempts() -> u32 {
    3
}

fn default_lease_ttl_secs() -> u64 {
    120
}

fn default_backoff_base_secs() -> u64 {
    5
}

fn default_planner_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_planner_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "VIGIL_API_KEY".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_rate_limit() -> u32 {
    10
}

fn default_planner_retries() -> u32 {
    2
}

fn default_command_timeout_secs() -> u64 {
    60
}

fn default_bind_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_memory_port() -> u16 {
    7401
}

fn default_context_port() -> u16 {
    7402
}

fn default_tools_port() -> u16 {
    7403
}

fn default_analysis_interval_mins() -> u64 {
    30
}

fn default_workflows() -> HashMap<String, Vec<String>> {
    let mut map = HashMap::new();
    map.insert(
        "on_file_change".to_string(),
        vec!["detect_impact".to_string(), "analyze_context".to_string()],
    );
    map.insert(
        "on_git_commit".to_string(),
        vec![
            "analyze_commit".to_string(),
            "suggest_improvements".to_string(),
        ],
    );
    map
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            project_root: default_project_root(),
            log_level: default_log_level(),
            workers: default_workers(),
        }
    }
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            watch_patterns: default_watch_patterns(),
            ignore_patterns: default_ignore_patterns(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            lease_ttl_secs: default_lease_ttl_secs(),
            backoff_base_secs: default_backoff_base_secs(),
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            base_url: default_planner_base_url(),
            model: default_planner_model(),
            api_key_env: default_api_key_env(),
            cache_ttl_secs: default_cache_ttl_secs(),
            rate_limit_per_minute: default_rate_limit(),
            max_retries: default_planner_retries(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl Default for ServersConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            memory_port: default_memory_port(),
            context_port: default_context_port(),
            tools_port: default_tools_port(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            interval_mins: default_analysis_interval_mins(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            observer: ObserverConfig::default(),
            queue: QueueConfig::default(),
            planner: PlannerConfig::default(),
            executor: ExecutorConfig::default(),
            servers: ServersConfig::default(),
            workflows: default_workflows(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration for a project, creating a default file if absent.
    ///
    /// The file lives at `<project_root>/.vigil/config.toml`. The
    /// `project_root` in the returned config is always set to the
    /// canonicalized `project_root` argument, regardless of what the file
    /// says; the engine is attached to exactly one project per process.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The project root does not exist or is not a directory
    /// - The config file cannot be read or written
    /// - TOML parsing fails
    /// - Validation fails (bad log level, zero workers, unknown actions)
    pub fn load_or_create(project_root: &Path) -> Result<Self, AgentError> {
        let root = expand_path(project_root)?;
        let root = root
            .canonicalize()
            .map_err(|e| AgentError::PathCanonicalization(root.clone(), e.to_string()))?;
        if !root.is_dir() {
            return Err(AgentError::Config(format!(
                "Project root is not a directory: {:?}",
                root
            )));
        }

        let config_path = root.join(".vigil").join("config.toml");
        let mut config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            Self::create_default(&config_path)?
        };

        config.core.project_root = root;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or TOML parsing fails.
    pub fn load_from_path(path: &Path) -> Result<Self, AgentError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| AgentError::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, AgentError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AgentError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let config = Self::default();

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| AgentError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| AgentError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config)
    }

    /// Directory for runtime state (queue, memory, analysis snapshots)
    pub fn runtime_dir(&self) -> PathBuf {
        self.core.project_root.join(".vigil").join("runtime")
    }

    /// Validate configuration
    ///
    /// Checks field ranges and that every workflow action name is known.
    /// Unknown action names are fatal: a silently skipped action would make
    /// workflow behavior depend on typos.
    fn validate(&self) -> Result<(), AgentError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(AgentError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.core.workers == 0 {
            return Err(AgentError::Config("workers must be at least 1".to_string()));
        }

        if self.queue.max_attempts == 0 {
            return Err(AgentError::Config(
                "queue.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.planner.rate_limit_per_minute == 0 {
            return Err(AgentError::Config(
                "planner.rate_limit_per_minute must be at least 1".to_string(),
            ));
        }

        for (event, actions) in &self.workflows {
            for action in actions {
                if crate::workflow::ActionKind::parse(action).is_none() {
                    return Err(AgentError::Config(format!(
                        "Unknown action '{}' in workflow '{}'",
                        action, event
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, AgentError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| AgentError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| AgentError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| AgentError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
