//! Context index
//!
//! Read-only structural view of the project for the context server and
//! the planner. Indexing is lazy: a file's symbols are extracted the
//! first time someone asks about it and rebuilt only when its mtime
//! moves, so one changed file never invalidates the rest of the index.
//! Symbol extraction is a line heuristic, not a compiler front end.

use crate::fs_guard::ProjectGuard;
use globset::GlobSet;
use sdk::errors::AgentError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::RwLock;
use tracing::debug;

/// Cap applied to every listing operation.
const MAX_RESULTS: usize = 50;

/// Cap on files visited per walk, so a pathological tree stays bounded.
const MAX_WALK: usize = 10_000;

/// Kinds of symbols the heuristic recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Type,
    Import,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    /// 1-based line number
    pub line: usize,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    symbols: Vec<Symbol>,
    last_modified: SystemTime,
}

/// A single code search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeMatch {
    pub path: PathBuf,
    pub line_number: usize,
    pub line: String,
}

/// Where a symbol is defined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Definition {
    pub path: PathBuf,
    pub symbol: Symbol,
}

/// Aggregate view of the project tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub total_files: usize,
    pub total_bytes: u64,
    pub files_by_extension: HashMap<String, usize>,
}

/// Lazily built symbol index over the project.
pub struct ContextIndex {
    guard: ProjectGuard,
    ignore_set: GlobSet,
    entries: RwLock<HashMap<PathBuf, IndexEntry>>,
}

impl ContextIndex {
    pub fn new(guard: ProjectGuard, ignore_set: GlobSet) -> Self {
        Self {
            guard,
            ignore_set,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Lists tracked files whose relative path contains `query`,
    /// case-insensitive, capped at fifty.
    pub fn search_files(&self, query: &str) -> Vec<PathBuf> {
        let needle = query.to_lowercase();
        self.walk()
            .into_iter()
            .filter(|rel| rel.to_string_lossy().to_lowercase().contains(&needle))
            .take(MAX_RESULTS)
            .collect()
    }

    /// Searches file contents for a substring, capped at fifty matches.
    pub fn search_code(&self, pattern: &str) -> Vec<CodeMatch> {
        let needle = pattern.to_lowercase();
        let mut matches = Vec::new();

        'files: for rel in self.walk() {
            let absolute = self.guard.project_root().join(&rel);
            let Ok(contents) = fs::read_to_string(&absolute) else {
                continue; // binary or unreadable
            };
            for (idx, line) in contents.lines().enumerate() {
                if line.to_lowercase().contains(&needle) {
                    matches.push(CodeMatch {
                        path: rel.clone(),
                        line_number: idx + 1,
                        line: line.to_string(),
                    });
                    if matches.len() >= MAX_RESULTS {
                        break 'files;
                    }
                }
            }
        }
        matches
    }

    /// Reads a file, optionally restricted to a 1-based inclusive line
    /// range. The path is validated against the project boundary first.
    pub fn read_file(
        &self,
        path: &Path,
        start_line: Option<usize>,
        end_line: Option<usize>,
    ) -> Result<String, AgentError> {
        let absolute = self.guard.validate_path(path)?;
        let contents = fs::read_to_string(&absolute)?;

        match (start_line, end_line) {
            (None, None) => Ok(contents),
            (start, end) => {
                let start = start.unwrap_or(1).max(1);
                let end = end.unwrap_or(usize::MAX);
                let selected: Vec<&str> = contents
                    .lines()
                    .skip(start - 1)
                    .take(end.saturating_sub(start - 1))
                    .collect();
                Ok(selected.join("\n"))
            }
        }
    }

    /// Finds definitions of a symbol across indexed source files.
    pub async fn find_definition(&self, name: &str) -> Result<Vec<Definition>, AgentError> {
        let mut found = Vec::new();
        for rel in self.walk() {
            if parser_for(&rel).is_none() {
                continue;
            }
            let symbols = self.fresh_symbols(&rel).await?;
            for symbol in symbols {
                if symbol.name == name && symbol.kind != SymbolKind::Import {
                    found.push(Definition {
                        path: rel.clone(),
                        symbol,
                    });
                    if found.len() >= MAX_RESULTS {
                        return Ok(found);
                    }
                }
            }
        }
        Ok(found)
    }

    /// Returns the symbol outline of one file.
    pub async fn get_structure(&self, path: &Path) -> Result<Vec<Symbol>, AgentError> {
        let rel = self.relative(path)?;
        self.fresh_symbols(&rel).await
    }

    /// Extension counts and sizes over the tracked tree. Walks the tree
    /// only; no symbol indexing happens here.
    pub fn project_summary(&self) -> ProjectSummary {
        let mut summary = ProjectSummary::default();
        for rel in self.walk() {
            let absolute = self.guard.project_root().join(&rel);
            let Ok(meta) = fs::metadata(&absolute) else {
                continue;
            };
            summary.total_files += 1;
            summary.total_bytes += meta.len();
            let ext = rel
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("(none)")
                .to_string();
            *summary.files_by_extension.entry(ext).or_insert(0) += 1;
        }
        summary
    }

    /// Returns up-to-date symbols for a file, rebuilding only this entry
    /// if its mtime changed since the last index.
    async fn fresh_symbols(&self, rel: &Path) -> Result<Vec<Symbol>, AgentError> {
        let absolute = self.guard.validate_path(rel)?;
        let modified = fs::metadata(&absolute)?.modified()?;

        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(rel) {
                if entry.last_modified == modified {
                    return Ok(entry.symbols.clone());
                }
            }
        }

        let contents = fs::read_to_string(&absolute)?;
        let symbols = match parser_for(rel) {
            Some(parser) => parser(&contents),
            None => Vec::new(),
        };
        debug!(path = %rel.display(), count = symbols.len(), "indexed file");

        let mut entries = self.entries.write().await;
        entries.insert(
            rel.to_path_buf(),
            IndexEntry {
                symbols: symbols.clone(),
                last_modified: modified,
            },
        );
        Ok(symbols)
    }

    fn relative(&self, path: &Path) -> Result<PathBuf, AgentError> {
        let absolute = self.guard.validate_path(path)?;
        Ok(absolute
            .strip_prefix(self.guard.project_root())
            .map_err(|_| AgentError::PathOutsideProject(absolute.clone()))?
            .to_path_buf())
    }

    /// Walks the tree depth-first, skipping ignored paths, returning
    /// relative file paths in sorted order.
    fn walk(&self) -> Vec<PathBuf> {
        let root = self.guard.project_root().to_path_buf();
        let mut files = Vec::new();
        let mut stack = vec![root.clone()];

        while let Some(dir) = stack.pop() {
            if files.len() >= MAX_WALK {
                break;
            }
            let Ok(read_dir) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in read_dir.flatten() {
                let path = entry.path();
                let Ok(rel) = path.strip_prefix(&root) else {
                    continue;
                };
                if rel.starts_with(".git") || self.ignore_set.is_match(rel) {
                    continue;
                }
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file() {
                    files.push(rel.to_path_buf());
                    if files.len() >= MAX_WALK {
                        break;
                    }
                }
            }
        }

        files.sort();
        files
    }
}

type SymbolParser = fn(&str) -> Vec<Symbol>;

fn parser_for(path: &Path) -> Option<SymbolParser> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("py") => Some(parse_python),
        Some("js" | "jsx" | "ts" | "tsx") => Some(parse_javascript),
        Some("rs") => Some(parse_rust),
        _ => None,
    }
}

fn ident_after<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(keyword)?;
    let name: &str = rest
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .next()?;
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

fn parse_python(contents: &str) -> Vec<Symbol> {
    let mut symbols = Vec::new();
    for (idx, raw) in contents.lines().enumerate() {
        let line = raw.trim_start();
        let entry = if let Some(name) = ident_after(line, "def ") {
            Some((name, SymbolKind::Function))
        } else if let Some(name) = ident_after(line, "async def ") {
            Some((name, SymbolKind::Function))
        } else if let Some(name) = ident_after(line, "class ") {
            Some((name, SymbolKind::Type))
        } else if let Some(name) = ident_after(line, "import ") {
            Some((name, SymbolKind::Import))
        } else if let Some(name) = ident_after(line, "from ") {
            Some((name, SymbolKind::Import))
        } else {
            None
        };
        if let Some((name, kind)) = entry {
            symbols.push(Symbol {
                name: name.to_string(),
                kind,
                line: idx + 1,
            });
        }
    }
    symbols
}

fn parse_javascript(contents: &str) -> Vec<Symbol> {
    let mut symbols = Vec::new();
    for (idx, raw) in contents.lines().enumerate() {
        let line = raw.trim_start();
        let line = line.strip_prefix("export ").unwrap_or(line);
        let entry = if let Some(name) = ident_after(line, "function ") {
            Some((name, SymbolKind::Function))
        } else if let Some(name) = ident_after(line, "async function ") {
            Some((name, SymbolKind::Function))
        } else if let Some(name) = ident_after(line, "class ") {
            Some((name, SymbolKind::Type))
        } else if let Some(name) = ident_after(line, "const ") {
            Some((name, SymbolKind::Type))
        } else if line.starts_with("import ") {
            line.split("from")
                .nth(1)
                .map(|m| (m.trim().trim_matches(|c| c == '\'' || c == '"' || c == ';'), SymbolKind::Import))
        } else {
            None
        };
        if let Some((name, kind)) = entry {
            if !name.is_empty() {
                symbols.push(Symbol {
                    name: name.to_string(),
                    kind,
                    line: idx + 1,
                });
            }
        }
    }
    symbols
}

fn parse_rust(contents: &str) -> Vec<Symbol> {
    let mut symbols = Vec::new();
    for (idx, raw) in contents.lines().enumerate() {
        let mut line = raw.trim_start();
        for prefix in ["pub(crate) ", "pub(super) ", "pub ", "async ", "unsafe "] {
            line = line.strip_prefix(prefix).unwrap_or(line);
        }
        let entry = if let Some(name) = ident_after(line, "fn ") {
            Some((name, SymbolKind::Function))
        } else if let Some(name) = ident_after(line, "struct ") {
            Some((name, SymbolKind::Type))
        } else if let Some(name) = ident_after(line, "enum ") {
            Some((name, SymbolKind::Type))
        } else if let Some(name) = ident_after(line, "trait ") {
            Some((name, SymbolKind::Type))
        } else if let Some(name) = ident_after(line, "use ") {
            Some((name, SymbolKind::Import))
        } else {
            None
        };
        if let Some((name, kind)) = entry {
            symbols.push(Symbol {
                name: name.to_string(),
                kind,
                line: idx + 1,
            });
        }
    }
    symbols
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObserverConfig;
    use globset::{Glob, GlobSetBuilder};
    use tempfile::TempDir;

    fn ignore_set() -> GlobSet {
        let mut builder = GlobSetBuilder::new();
        for pattern in ObserverConfig::default().ignore_patterns {
            builder.add(Glob::new(&pattern).unwrap());
        }
        builder.build().unwrap()
    }

    fn index_at(dir: &TempDir) -> ContextIndex {
        let guard = ProjectGuard::new(dir.path()).unwrap();
        ContextIndex::new(guard, ignore_set())
    }

    #[test]
    fn test_parse_rust_symbols() {
        let symbols = parse_rust("use std::fs;\n\npub fn run() {}\nstruct Engine;\npub enum Mode { A }\n");
        let names: Vec<(&str, SymbolKind)> = symbols
            .iter()
            .map(|s| (s.name.as_str(), s.kind))
            .collect();
        assert_eq!(
            names,
            vec![
                ("std", SymbolKind::Import),
                ("run", SymbolKind::Function),
                ("Engine", SymbolKind::Type),
                ("Mode", SymbolKind::Type),
            ]
        );
        assert_eq!(symbols[1].line, 3);
    }

    #[test]
    fn test_parse_python_symbols() {
        let symbols = parse_python("import os\nclass Agent:\n    def plan(self):\n        pass\n");
        assert_eq!(symbols.len(), 3);
        assert_eq!(symbols[1].name, "Agent");
        assert_eq!(symbols[2].name, "plan");
        assert_eq!(symbols[2].kind, SymbolKind::Function);
    }

    #[test]
    fn test_search_files_substring_and_cap() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("src")).unwrap();
        fs::write(temp.path().join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(temp.path().join("README.md"), "# readme").unwrap();
        fs::create_dir(temp.path().join("target")).unwrap();
        fs::write(temp.path().join("target/main.rs"), "ignored").unwrap();

        let index = index_at(&temp);
        let hits = index.search_files("main");
        assert_eq!(hits, vec![PathBuf::from("src/main.rs")]);
    }

    #[test]
    fn test_search_code_reports_line_numbers() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("lib.rs"), "fn a() {}\nfn target() {}\n").unwrap();

        let index = index_at(&temp);
        let hits = index.search_code("target");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].line_number, 2);
        assert_eq!(hits[0].path, PathBuf::from("lib.rs"));
    }

    #[test]
    fn test_read_file_line_range() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("f.txt"), "one\ntwo\nthree\nfour\n").unwrap();

        let index = index_at(&temp);
        let slice = index
            .read_file(Path::new("f.txt"), Some(2), Some(3))
            .unwrap();
        assert_eq!(slice, "two\nthree");

        let whole = index.read_file(Path::new("f.txt"), None, None).unwrap();
        assert!(whole.ends_with("four\n"));
    }

    #[test]
    fn test_read_file_outside_root_rejected() {
        let temp = TempDir::new().unwrap();
        let index = index_at(&temp);
        assert!(index.read_file(Path::new("/etc/hostname"), None, None).is_err());
    }

    #[tokio::test]
    async fn test_find_definition() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("engine.rs"),
            "pub struct Engine;\nimpl Engine {\n    pub fn start() {}\n}\n",
        )
        .unwrap();
        fs::write(temp.path().join("other.rs"), "use engine::Engine;\n").unwrap();

        let index = index_at(&temp);
        let defs = index.find_definition("Engine").await.unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].path, PathBuf::from("engine.rs"));
        assert_eq!(defs[0].symbol.line, 1);
    }

    #[tokio::test]
    async fn test_structure_rebuilds_only_on_mtime_change() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("mod.rs");
        fs::write(&file, "fn alpha() {}\n").unwrap();

        let index = index_at(&temp);
        let before = index.get_structure(&file).await.unwrap();
        assert_eq!(before[0].name, "alpha");

        // Unchanged file answers from the index
        let cached = index.get_structure(&file).await.unwrap();
        assert_eq!(cached.len(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        fs::write(&file, "fn alpha() {}\nfn beta() {}\n").unwrap();

        let after = index.get_structure(&file).await.unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(after[1].name, "beta");
    }

    #[test]
    fn test_project_summary_counts_extensions() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.rs"), "x").unwrap();
        fs::write(temp.path().join("b.rs"), "yy").unwrap();
        fs::write(temp.path().join("c.py"), "zzz").unwrap();

        let index = index_at(&temp);
        let summary = index.project_summary();
        assert_eq!(summary.total_files, 3);
        assert_eq!(summary.total_bytes, 6);
        assert_eq!(summary.files_by_extension["rs"], 2);
        assert_eq!(summary.files_by_extension["py"], 1);
    }
}
