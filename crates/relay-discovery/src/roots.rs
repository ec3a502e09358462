use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum RootsError {
    #[error("path is not a directory")]
    NotADirectory,
    #[error("path does not resolve under a configured project root")]
    OutsideRoots,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A directory one level under a configured project root, surfaced by
/// `GET /api/directories`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RootEntry {
    pub path: String,
    pub group: String,
}

/// The set of directories eligible as a parent for `/api/sessions/new`.
#[derive(Debug, Clone)]
pub struct ProjectRoots {
    roots: Vec<PathBuf>,
}

impl ProjectRoots {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        let roots = roots
            .into_iter()
            .map(|r| std::fs::canonicalize(&r).unwrap_or(r))
            .collect();
        Self { roots }
    }

    /// Validates that `path` is a directory located under one of the
    /// configured roots, returning its canonical form.
    pub fn validate(&self, path: &Path) -> Result<PathBuf, RootsError> {
        let canonical = std::fs::canonicalize(path)?;
        if !canonical.is_dir() {
            return Err(RootsError::NotADirectory);
        }
        if !self.roots.iter().any(|root| canonical.starts_with(root)) {
            return Err(RootsError::OutsideRoots);
        }
        Ok(canonical)
    }

    /// Immediate subdirectories of each configured root, tagged with the
    /// root's basename as a group label.
    pub fn list_directories(&self) -> Vec<RootEntry> {
        let mut entries = Vec::new();
        for root in &self.roots {
            let group = root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| root.to_string_lossy().to_string());
            let Ok(read_dir) = std::fs::read_dir(root) else {
                continue;
            };
            for entry in read_dir.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    entries.push(RootEntry {
                        path: path.to_string_lossy().to_string(),
                        group: group.clone(),
                    });
                }
            }
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn validate_accepts_subdirectory_of_root() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("project");
        std::fs::create_dir(&project).unwrap();
        let roots = ProjectRoots::new(vec![dir.path().to_path_buf()]);
        assert!(roots.validate(&project).is_ok());
    }

    #[test]
    fn validate_rejects_path_outside_roots() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let roots = ProjectRoots::new(vec![dir.path().to_path_buf()]);
        assert!(matches!(
            roots.validate(outside.path()),
            Err(RootsError::OutsideRoots)
        ));
    }

    #[test]
    fn validate_rejects_file_not_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        let roots = ProjectRoots::new(vec![dir.path().to_path_buf()]);
        assert!(matches!(
            roots.validate(&file),
            Err(RootsError::NotADirectory)
        ));
    }

    #[test]
    fn list_directories_tags_with_root_basename() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("alpha")).unwrap();
        let roots = ProjectRoots::new(vec![dir.path().to_path_buf()]);
        let entries = roots.list_directories();
        assert_eq!(entries.len(), 1);
        let expected_group = dir.path().file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(entries[0].group, expected_group);
    }
}
