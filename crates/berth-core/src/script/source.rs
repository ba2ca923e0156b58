//! Init script sources and resource lookup.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Where an init script comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptSource {
    /// Explicit filesystem path.
    Path(PathBuf),
    /// Name resolved against the resource roots.
    Resource(String),
    /// Script text supplied directly.
    Inline {
        /// Logical name used in errors.
        name: String,
        /// Script text.
        content: String,
    },
}

impl ScriptSource {
    /// Name reported in load and execution errors.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Resource(name) | Self::Inline { name, .. } => name.clone(),
        }
    }
}

impl fmt::Display for ScriptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Resolves relative resource names against an ordered list of roots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceResolver {
    roots: Vec<PathBuf>,
}

impl ResourceResolver {
    /// Create a resolver over `roots`, searched in order.
    #[must_use]
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().collect(),
        }
    }

    /// Append a root.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(root.into());
        self
    }

    /// Search roots.
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Find an existing file or directory for `name`.
    ///
    /// Absolute names are returned as-is when they exist. Relative names
    /// are tried against each root, then against the working directory.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let path = Path::new(name);
        if path.is_absolute() {
            return path.exists().then(|| path.to_path_buf());
        }
        self.roots
            .iter()
            .map(|root| root.join(path))
            .chain(std::iter::once(path.to_path_buf()))
            .find(|candidate| candidate.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_searches_roots_in_order() {
        let first = tempfile::tempdir().expect("tempdir");
        let second = tempfile::tempdir().expect("tempdir");
        std::fs::write(second.path().join("init.cql"), "SELECT 1;").expect("write");

        let resolver = ResourceResolver::new([first.path().to_path_buf()]).with_root(second.path());
        assert_eq!(resolver.resolve("init.cql"), Some(second.path().join("init.cql")));

        std::fs::write(first.path().join("init.cql"), "SELECT 2;").expect("write");
        assert_eq!(resolver.resolve("init.cql"), Some(first.path().join("init.cql")));
    }

    #[test]
    fn test_resolve_missing() {
        let resolver = ResourceResolver::default();
        assert_eq!(resolver.resolve("does/not/exist.cql"), None);
        assert_eq!(resolver.resolve("/does/not/exist.cql"), None);
    }

    #[test]
    fn test_source_names() {
        assert_eq!(ScriptSource::Resource("init.cql".to_string()).name(), "init.cql");
        let inline = ScriptSource::Inline {
            name: "schema".to_string(),
            content: "SELECT 1".to_string(),
        };
        assert_eq!(inline.to_string(), "schema");
    }
}
