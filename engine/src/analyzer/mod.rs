//! Project analysis
//!
//! Two layers: `ProjectDetector` figures out what kind of project the
//! engine is attached to by looking at manifests and key files, and
//! `Analyzer` asks the reasoning backend for a structured assessment
//! (insights, suggestions, priorities, risks). The latest assessment is
//! persisted as a snapshot under `.vigil/runtime/` and feeds the planning
//! context; it is refreshed on a timer and by `analyze_context` tasks.

use crate::planner::{limiter::RateLimiter, PlanBackend};
use chrono::{DateTime, Utc};
use sdk::errors::AgentError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What kind of project the root looks like.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub project_type: String,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub key_files: Vec<String>,
    pub dependencies: Vec<String>,
}

impl Default for Detection {
    fn default() -> Self {
        Self {
            project_type: "unknown".to_string(),
            confidence: 0.0,
            key_files: Vec::new(),
            dependencies: Vec::new(),
        }
    }
}

/// Manifest-driven project type detection.
pub struct ProjectDetector {
    root: PathBuf,
}

impl ProjectDetector {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Detects the project type from manifests, most specific first.
    pub fn detect(&self) -> Detection {
        if self.root.join("package.json").exists() {
            return self.detect_node();
        }
        if self.root.join("Cargo.toml").exists() {
            return Detection {
                project_type: "rust".to_string(),
                confidence: 0.9,
                key_files: self.existing(&["Cargo.toml", "Cargo.lock", "src/main.rs", "src/lib.rs"]),
                dependencies: cargo_dependencies(&self.root.join("Cargo.toml")),
            };
        }
        if self.root.join("go.mod").exists() {
            return Detection {
                project_type: "go".to_string(),
                confidence: 0.9,
                key_files: self.existing(&["go.mod", "go.sum", "main.go"]),
                dependencies: go_dependencies(&self.root.join("go.mod")),
            };
        }
        if self.root.join("requirements.txt").exists() || self.root.join("pyproject.toml").exists()
        {
            return self.detect_python();
        }
        if self.root.join("index.html").exists() {
            return Detection {
                project_type: "static_html".to_string(),
                confidence: 0.6,
                key_files: self.existing(&["index.html"]),
                dependencies: Vec::new(),
            };
        }
        Detection::default()
    }

    fn detect_node(&self) -> Detection {
        let deps = package_json_dependencies(&self.root.join("package.json"));
        let has = |name: &str| deps.iter().any(|d| d == name);

        let project_type = if has("next") {
            "nextjs"
        } else if has("react") {
            "react"
        } else if has("vue") {
            "vue"
        } else if has("express") {
            "express"
        } else {
            "node"
        };

        Detection {
            project_type: project_type.to_string(),
            confidence: if project_type == "node" { 0.7 } else { 0.9 },
            key_files: self.existing(&["package.json", "package-lock.json", "tsconfig.json"]),
            dependencies: deps,
        }
    }

    fn detect_python(&self) -> Detection {
        let deps = requirements_dependencies(&self.root.join("requirements.txt"));
        let has = |name: &str| deps.iter().any(|d| d.starts_with(name));

        let project_type = if has("django") {
            "django"
        } else if has("fastapi") {
            "fastapi"
        } else {
            "python"
        };

        Detection {
            project_type: project_type.to_string(),
            confidence: if project_type == "python" { 0.7 } else { 0.9 },
            key_files: self.existing(&["requirements.txt", "pyproject.toml", "setup.py"]),
            dependencies: deps,
        }
    }

    fn existing(&self, candidates: &[&str]) -> Vec<String> {
        candidates
            .iter()
            .filter(|name| self.root.join(name).exists())
            .map(|name| name.to_string())
            .collect()
    }
}

/// Declared dependencies per manifest found at the root.
///
/// Read-only over package.json, requirements.txt, Cargo.toml and go.mod;
/// used by the tools server's `analyze_dependencies` method.
pub fn analyze_dependencies(root: &Path) -> HashMap<String, Vec<String>> {
    let mut out = HashMap::new();
    let manifests: [(&str, fn(&Path) -> Vec<String>); 4] = [
        ("package.json", package_json_dependencies),
        ("requirements.txt", requirements_dependencies),
        ("Cargo.toml", cargo_dependencies),
        ("go.mod", go_dependencies),
    ];
    for (name, parse) in manifests {
        let path = root.join(name);
        if path.exists() {
            out.insert(name.to_string(), parse(&path));
        }
    }
    out
}

fn package_json_dependencies(path: &Path) -> Vec<String> {
    let Ok(contents) = fs::read_to_string(path) else {
        return Vec::new();
    };
    let Ok(json) = serde_json::from_str::<serde_json::Value>(&contents) else {
        return Vec::new();
    };
    let mut deps = Vec::new();
    for section in ["dependencies", "devDependencies"] {
        if let Some(map) = json.get(section).and_then(|d| d.as_object()) {
            deps.extend(map.keys().cloned());
        }
    }
    deps.sort();
    deps
}

fn requirements_dependencies(path: &Path) -> Vec<String> {
    let Ok(contents) = fs::read_to_string(path) else {
        return Vec::new();
    };
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| {
            l.split(['=', '<', '>', '~', '!', ';', ' '])
                .next()
                .unwrap_or(l)
                .to_lowercase()
        })
        .collect()
}

fn cargo_dependencies(path: &Path) -> Vec<String> {
    let Ok(contents) = fs::read_to_string(path) else {
        return Vec::new();
    };
    let Ok(value) = contents.parse::<toml::Value>() else {
        return Vec::new();
    };
    let mut deps = Vec::new();
    for section in ["dependencies", "dev-dependencies"] {
        if let Some(table) = value.get(section).and_then(|t| t.as_table()) {
            deps.extend(table.keys().cloned());
        }
    }
    deps.sort();
    deps
}

fn go_dependencies(path: &Path) -> Vec<String> {
    let Ok(contents) = fs::read_to_string(path) else {
        return Vec::new();
    };
    contents
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("require ") || (l.contains('/') && !l.starts_with("module")))
        .filter_map(|l| {
            l.trim_start_matches("require ")
                .split_whitespace()
                .next()
                .map(str::to_string)
        })
        .filter(|l| l.contains('/'))
        .collect()
}

/// Structured assessment produced by the reasoning backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    #[serde(default)]
    pub detection: Detection,
    #[serde(default)]
    pub insights: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub priorities: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default = "Utc::now")]
    pub generated_at: DateTime<Utc>,
}

impl Default for AnalysisSnapshot {
    fn default() -> Self {
        Self {
            detection: Detection::default(),
            insights: Vec::new(),
            suggestions: Vec::new(),
            priorities: Vec::new(),
            risks: Vec::new(),
            generated_at: Utc::now(),
        }
    }
}

impl AnalysisSnapshot {
    /// One-line summary handed to the planner.
    pub fn summary(&self) -> String {
        format!(
            "{} project; priorities: {}; risks: {}",
            self.detection.project_type,
            self.priorities.join(", "),
            self.risks.join(", ")
        )
    }

    /// Loads the latest persisted snapshot, if any.
    pub fn load(path: &Path) -> Option<Self> {
        let contents = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "analysis snapshot unreadable");
                None
            }
        }
    }
}

/// Periodic project analyzer.
pub struct Analyzer {
    detector: ProjectDetector,
    backend: Arc<dyn PlanBackend>,
    limiter: Arc<RateLimiter>,
    snapshot_path: PathBuf,
}

impl Analyzer {
    pub fn new(
        root: &Path,
        backend: Arc<dyn PlanBackend>,
        limiter: Arc<RateLimiter>,
        snapshot_path: PathBuf,
    ) -> Self {
        Self {
            detector: ProjectDetector::new(root),
            backend,
            limiter,
            snapshot_path,
        }
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Runs one analysis pass and persists the snapshot atomically.
    ///
    /// A reply that is not valid JSON degrades to an empty assessment
    /// rather than an error: detection alone is still worth persisting.
    pub async fn run(&self) -> Result<AnalysisSnapshot, AgentError> {
        let detection = self.detector.detect();

        self.limiter.acquire(Duration::from_secs(120)).await?;
        let prompt = build_analysis_prompt(&detection);
        let reply = self.backend.complete(&prompt).await?;

        let mut snapshot = parse_analysis_reply(&reply).unwrap_or_else(|| {
            warn!("analysis reply was not valid JSON, keeping detection only");
            AnalysisSnapshot::default()
        });
        snapshot.detection = detection;
        snapshot.generated_at = Utc::now();

        self.persist(&snapshot)?;
        debug!(project_type = %snapshot.detection.project_type, "analysis snapshot refreshed");
        Ok(snapshot)
    }

    fn persist(&self, snapshot: &AnalysisSnapshot) -> Result<(), AgentError> {
        if let Some(parent) = self.snapshot_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| AgentError::Config(format!("Failed to serialize analysis: {}", e)))?;
        let tmp = self.snapshot_path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.snapshot_path)?;
        Ok(())
    }
}

fn build_analysis_prompt(detection: &Detection) -> String {
    format!(
        "You are reviewing a {} project (confidence {:.1}).\n\
         Key files: {}\n\
         Dependencies: {}\n\n\
         Reply with a JSON object containing four string arrays: \
         \"insights\", \"suggestions\", \"priorities\", \"risks\". \
         Reply with JSON only.\n",
        detection.project_type,
        detection.confidence,
        detection.key_files.join(", "),
        detection.dependencies.join(", "),
    )
}

/// Extracts the first JSON object from the reply and deserializes it.
fn parse_analysis_reply(reply: &str) -> Option<AnalysisSnapshot> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    serde_json::from_str(&reply[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct StaticBackend(String);

    #[async_trait]
    impl PlanBackend for StaticBackend {
        fn name(&self) -> &str {
            "static"
        }

        async fn complete(&self, _prompt: &str) -> Result<String, AgentError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_detect_rust_project() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("Cargo.toml"),
            "[package]\nname = \"x\"\n[dependencies]\nserde = \"1\"\ntokio = \"1\"\n",
        )
        .unwrap();

        let detection = ProjectDetector::new(temp.path()).detect();
        assert_eq!(detection.project_type, "rust");
        assert!(detection.confidence > 0.8);
        assert_eq!(detection.dependencies, vec!["serde", "tokio"]);
    }

    #[test]
    fn test_detect_react_project() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("package.json"),
            r#"{"dependencies": {"react": "^18.0.0", "react-dom": "^18.0.0"}}"#,
        )
        .unwrap();

        let detection = ProjectDetector::new(temp.path()).detect();
        assert_eq!(detection.project_type, "react");
    }

    #[test]
    fn test_detect_fastapi_project() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("requirements.txt"),
            "fastapi==0.110\nuvicorn>=0.27\n# comment\n",
        )
        .unwrap();

        let detection = ProjectDetector::new(temp.path()).detect();
        assert_eq!(detection.project_type, "fastapi");
        assert!(detection.dependencies.contains(&"uvicorn".to_string()));
    }

    #[test]
    fn test_detect_unknown_project() {
        let temp = TempDir::new().unwrap();
        let detection = ProjectDetector::new(temp.path()).detect();
        assert_eq!(detection.project_type, "unknown");
        assert_eq!(detection.confidence, 0.0);
    }

    #[test]
    fn test_analyze_dependencies_multiple_manifests() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("Cargo.toml"), "[dependencies]\nserde = \"1\"\n").unwrap();
        fs::write(temp.path().join("go.mod"), "module example.com/x\n\nrequire github.com/pkg/errors v0.9.1\n").unwrap();

        let deps = analyze_dependencies(temp.path());
        assert_eq!(deps["Cargo.toml"], vec!["serde"]);
        assert_eq!(deps["go.mod"], vec!["github.com/pkg/errors"]);
        assert!(!deps.contains_key("package.json"));
    }

    #[test]
    fn test_parse_analysis_reply_with_fences() {
        let reply = "```json\n{\"insights\": [\"a\"], \"suggestions\": [], \"priorities\": [\"b\"], \"risks\": []}\n```";
        let snapshot = parse_analysis_reply(reply).unwrap();
        assert_eq!(snapshot.insights, vec!["a"]);
        assert_eq!(snapshot.priorities, vec!["b"]);
    }

    #[tokio::test]
    async fn test_run_persists_snapshot() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("Cargo.toml"), "[package]\nname = \"x\"\n").unwrap();

        let snapshot_path = temp.path().join(".vigil/runtime/analysis.json");
        let analyzer = Analyzer::new(
            temp.path(),
            Arc::new(StaticBackend(
                r#"{"insights": ["tidy"], "suggestions": [], "priorities": [], "risks": []}"#
                    .to_string(),
            )),
            Arc::new(RateLimiter::new(10, Duration::from_secs(60))),
            snapshot_path.clone(),
        );

        let snapshot = analyzer.run().await.unwrap();
        assert_eq!(snapshot.detection.project_type, "rust");
        assert_eq!(snapshot.insights, vec!["tidy"]);

        let loaded = AnalysisSnapshot::load(&snapshot_path).unwrap();
        assert_eq!(loaded.insights, vec!["tidy"]);
    }

    #[tokio::test]
    async fn test_run_tolerates_non_json_reply() {
        let temp = TempDir::new().unwrap();
        let snapshot_path = temp.path().join("analysis.json");
        let analyzer = Analyzer::new(
            temp.path(),
            Arc::new(StaticBackend("I cannot produce JSON today".to_string())),
            Arc::new(RateLimiter::new(10, Duration::from_secs(60))),
            snapshot_path,
        );

        let snapshot = analyzer.run().await.unwrap();
        assert!(snapshot.insights.is_empty());
        assert_eq!(snapshot.detection.project_type, "unknown");
    }
}
