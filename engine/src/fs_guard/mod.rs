//! Project root confinement
//!
//! Everything the engine touches on behalf of a plan (command working
//! directories, file reads and writes from the tools server) must resolve
//! inside the attached project root. `ProjectGuard` enforces that boundary
//! and additionally refuses a small deny list of sensitive names. The deny
//! list is defense-in-depth against obviously bad plans, not a security
//! boundary; the process runs with the invoking user's privileges.

use sdk::errors::AgentError;
use std::path::{Component, Path, PathBuf};

/// ProjectGuard validates paths against the project-root boundary.
///
/// Validation runs through four gates:
/// 1. Check the deny list before canonicalization
/// 2. Canonicalize to resolve symlinks and `..` components
/// 3. Check the deny list again after canonicalization
/// 4. Verify the resolved path is within the project root
#[derive(Debug, Clone)]
pub struct ProjectGuard {
    project_root: PathBuf,
    deny_list: Vec<PathBuf>,
}

impl ProjectGuard {
    /// Creates a guard for the given project root.
    ///
    /// The root must exist; it is canonicalized once here so later boundary
    /// checks compare canonical forms on both sides.
    pub fn new(project_root: &Path) -> Result<Self, AgentError> {
        let project_root = project_root.canonicalize().map_err(|e| {
            AgentError::PathCanonicalization(project_root.to_path_buf(), e.to_string())
        })?;

        let deny_list = vec![
            PathBuf::from(".ssh"),
            PathBuf::from(".env"),
            PathBuf::from(".aws/credentials"),
            PathBuf::from(".config/gcloud"),
            PathBuf::from("id_rsa"),
            PathBuf::from("id_ed25519"),
            PathBuf::from("id_dsa"),
            PathBuf::from(".gnupg"),
            PathBuf::from(".kube/config"),
            PathBuf::from("credentials"),
            PathBuf::from("private_key"),
            PathBuf::from(".npmrc"),
            PathBuf::from(".pypirc"),
        ];

        Ok(Self {
            project_root,
            deny_list,
        })
    }

    /// Validates an existing path through all four gates.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::PathDenied` if the path matches the deny list,
    /// `AgentError::PathCanonicalization` if it cannot be resolved, and
    /// `AgentError::PathOutsideProject` if it escapes the project root.
    pub fn validate_path(&self, path: &Path) -> Result<PathBuf, AgentError> {
        // Gate 1: deny list before canonicalization
        if self.is_denied(path) {
            return Err(AgentError::PathDenied(path.to_path_buf()));
        }

        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        };

        // Gate 2: canonicalize to resolve symlinks and .. patterns
        let canonical = absolute
            .canonicalize()
            .map_err(|e| AgentError::PathCanonicalization(absolute.clone(), e.to_string()))?;

        // Gate 3: deny list after canonicalization (catches symlink bypasses)
        if self.is_denied(&canonical) {
            return Err(AgentError::PathDenied(canonical));
        }

        // Gate 4: project-root boundary
        if !canonical.starts_with(&self.project_root) {
            return Err(AgentError::PathOutsideProject(canonical));
        }

        Ok(canonical)
    }

    /// Validates a path that may not exist yet, for file creation.
    ///
    /// The deepest existing ancestor is canonicalized and boundary-checked;
    /// the non-existing suffix is then re-appended after rejecting any `..`
    /// or root components in it. The deny list applies to the full path.
    pub fn validate_for_write(&self, path: &Path) -> Result<PathBuf, AgentError> {
        if self.is_denied(path) {
            return Err(AgentError::PathDenied(path.to_path_buf()));
        }

        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        };

        let mut existing = absolute.clone();
        let mut suffix: Vec<std::ffi::OsString> = Vec::new();
        while !existing.exists() {
            match (existing.file_name(), existing.parent()) {
                (Some(name), Some(parent)) => {
                    suffix.push(name.to_os_string());
                    existing = parent.to_path_buf();
                }
                _ => return Err(AgentError::PathOutsideProject(absolute)),
            }
        }

        let mut canonical = existing
            .canonicalize()
            .map_err(|e| AgentError::PathCanonicalization(existing.clone(), e.to_string()))?;

        for part in suffix.iter().rev() {
            let component = Path::new(part);
            if component
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
            {
                return Err(AgentError::PathOutsideProject(absolute));
            }
            canonical.push(part);
        }

        if self.is_denied(&canonical) {
            return Err(AgentError::PathDenied(canonical));
        }

        if !canonical.starts_with(&self.project_root) {
            return Err(AgentError::PathOutsideProject(canonical));
        }

        Ok(canonical)
    }

    /// Checks if a path matches any entry in the deny list.
    ///
    /// Matches both a denied suffix (`~/.ssh/id_rsa`) and a denied
    /// component anywhere in the path (`project/.env/config`).
    fn is_denied(&self, path: &Path) -> bool {
        self.deny_list.iter().any(|denied| {
            path.ends_with(denied)
                || path.components().any(|c| {
                    if let Some(os_str) = c.as_os_str().to_str() {
                        denied.as_os_str().to_str().is_some_and(|d| os_str == d)
                    } else {
                        false
                    }
                })
        })
    }

    /// Returns the canonicalized project root.
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_deny_list_before_canonicalization() {
        let temp = TempDir::new().unwrap();
        let guard = ProjectGuard::new(temp.path()).unwrap();

        let result = guard.validate_path(&temp.path().join(".ssh"));
        assert!(matches!(result.unwrap_err(), AgentError::PathDenied(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_deny_list_after_canonicalization() {
        let temp = TempDir::new().unwrap();
        let ssh_dir = temp.path().join(".ssh");
        fs::create_dir(&ssh_dir).unwrap();

        let guard = ProjectGuard::new(temp.path()).unwrap();
        let symlink_path = temp.path().join("safe_link");
        std::os::unix::fs::symlink(&ssh_dir, &symlink_path).unwrap();

        let result = guard.validate_path(&symlink_path);
        assert!(matches!(result.unwrap_err(), AgentError::PathDenied(_)));
    }

    #[test]
    fn test_path_outside_project() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("project");
        fs::create_dir(&root).unwrap();
        let guard = ProjectGuard::new(&root).unwrap();

        let outside = temp.path().join("outside.txt");
        fs::write(&outside, "test").unwrap();

        let result = guard.validate_path(&outside);
        assert!(matches!(
            result.unwrap_err(),
            AgentError::PathOutsideProject(_)
        ));
    }

    #[test]
    fn test_relative_path_resolves_inside_root() {
        let temp = TempDir::new().unwrap();
        let guard = ProjectGuard::new(temp.path()).unwrap();

        fs::create_dir(temp.path().join("src")).unwrap();
        let resolved = guard.validate_path(Path::new("src")).unwrap();
        assert!(resolved.starts_with(guard.project_root()));
    }

    #[test]
    fn test_path_traversal_attempt() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("project");
        fs::create_dir(&root).unwrap();
        let guard = ProjectGuard::new(&root).unwrap();

        let outside_file = temp.path().join("secret.txt");
        fs::write(&outside_file, "secret").unwrap();

        let traversal = root.join("..").join("secret.txt");
        let result = guard.validate_path(&traversal);
        assert!(matches!(
            result.unwrap_err(),
            AgentError::PathOutsideProject(_)
        ));
    }

    #[test]
    fn test_denied_component_in_path() {
        let temp = TempDir::new().unwrap();
        let guard = ProjectGuard::new(temp.path()).unwrap();

        let env_path = temp.path().join("project").join(".env").join("config");
        let result = guard.validate_path(&env_path);
        assert!(matches!(result.unwrap_err(), AgentError::PathDenied(_)));
    }

    #[test]
    fn test_validate_for_write_new_nested_path() {
        let temp = TempDir::new().unwrap();
        let guard = ProjectGuard::new(temp.path()).unwrap();

        let target = Path::new("new_dir/deeper/file.txt");
        let resolved = guard.validate_for_write(target).unwrap();
        assert!(resolved.starts_with(guard.project_root()));
        assert!(resolved.ends_with("new_dir/deeper/file.txt"));
    }

    #[test]
    fn test_validate_for_write_rejects_traversal_suffix() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("project");
        fs::create_dir(&root).unwrap();
        let guard = ProjectGuard::new(&root).unwrap();

        let result = guard.validate_for_write(Path::new("../escape.txt"));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_for_write_rejects_denied_name() {
        let temp = TempDir::new().unwrap();
        let guard = ProjectGuard::new(temp.path()).unwrap();

        let result = guard.validate_for_write(Path::new(".env"));
        assert!(matches!(result.unwrap_err(), AgentError::PathDenied(_)));
    }
}
