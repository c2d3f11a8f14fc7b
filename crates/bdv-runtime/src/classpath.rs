use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::StartError;

const ARCHIVE_SUFFIX: &str = ".jar";

#[cfg(windows)]
pub const CLASSPATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const CLASSPATH_SEPARATOR: char = ':';

/// Archive files found directly inside a jar directory.
///
/// Entries keep directory iteration order, which is platform dependent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classpath {
    entries: Vec<PathBuf>,
}

impl Classpath {
    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value for the `-Djava.class.path=` runtime option.
    pub fn to_option(&self) -> String {
        format!("-Djava.class.path={self}")
    }
}

/// Every entry followed by the separator, trailing one included.
impl fmt::Display for Classpath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            write!(f, "{}{CLASSPATH_SEPARATOR}", entry.display())?;
        }
        Ok(())
    }
}

/// Collect the `.jar` files directly inside `dir` (no recursion, case-sensitive
/// suffix match on the file name).
pub fn assemble_classpath(dir: &Path) -> Result<Classpath, StartError> {
    let unavailable = |source| StartError::ClasspathUnavailable {
        path: dir.to_path_buf(),
        source,
    };

    let listing = std::fs::read_dir(dir).map_err(unavailable)?;

    let mut entries = Vec::new();
    for entry in listing {
        let entry = entry.map_err(unavailable)?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            tracing::warn!(dir = %dir.display(), name = ?name, "Skipping non UTF-8 directory entry");
            continue;
        };
        if name.ends_with(ARCHIVE_SUFFIX) {
            entries.push(dir.join(name));
        }
    }

    tracing::debug!(dir = %dir.display(), archives = entries.len(), "Classpath assembled");
    Ok(Classpath { entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) {
        std::fs::write(dir.path().join(name), b"").unwrap();
    }

    #[test]
    fn keeps_only_jar_files() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "a.jar");
        touch(&dir, "b.jar");
        touch(&dir, "c.txt");

        let classpath = assemble_classpath(dir.path()).unwrap();
        let joined = classpath.to_string();

        let segments: Vec<&str> = joined
            .split(CLASSPATH_SEPARATOR)
            .filter(|s| !s.is_empty())
            .collect();
        assert_eq!(segments.len(), 2);
        assert!(joined.ends_with(CLASSPATH_SEPARATOR));
        assert!(!joined.contains("c.txt"));

        let a = format!("{}{CLASSPATH_SEPARATOR}", dir.path().join("a.jar").display());
        let b = format!("{}{CLASSPATH_SEPARATOR}", dir.path().join("b.jar").display());
        assert!(joined.contains(&a));
        assert!(joined.contains(&b));
    }

    #[test]
    fn suffix_match_is_case_sensitive() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "upper.JAR");
        touch(&dir, "lower.jar");

        let classpath = assemble_classpath(dir.path()).unwrap();
        assert_eq!(classpath.entries(), &[dir.path().join("lower.jar")]);
    }

    #[test]
    fn does_not_recurse() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("inner.jar"), b"").unwrap();
        touch(&dir, "outer.jar");

        let classpath = assemble_classpath(dir.path()).unwrap();
        assert_eq!(classpath.entries(), &[dir.path().join("outer.jar")]);
    }

    #[test]
    fn empty_directory_yields_empty_classpath() {
        let dir = TempDir::new().unwrap();
        let classpath = assemble_classpath(dir.path()).unwrap();
        assert!(classpath.is_empty());
        assert_eq!(classpath.to_string(), "");
        assert_eq!(classpath.to_option(), "-Djava.class.path=");
    }

    #[test]
    fn missing_directory_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does-not-exist");

        let err = assemble_classpath(&missing).unwrap_err();
        match err {
            StartError::ClasspathUnavailable { path, .. } => assert_eq!(path, missing),
            other => panic!("expected ClasspathUnavailable, got {other:?}"),
        }
        assert!(!missing.exists());
    }
}
