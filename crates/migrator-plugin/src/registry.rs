//! Plugin discovery

use std::fs;
use std::path::PathBuf;

use tracing::debug;

use crate::error::PluginError;

/// Plugin binaries found in a directory
#[derive(Clone, Debug)]
pub struct PluginRegistry {
    dir: PathBuf,
}

impl PluginRegistry {
    /// Registry for the given plugin directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// List executable files in the plugin directory, sorted by path.
    ///
    /// Hidden files and subdirectories are ignored. An empty directory is
    /// valid; a missing or unreadable one is an error.
    pub fn discover(&self) -> Result<Vec<PathBuf>, PluginError> {
        let discovery_error = |message: String| PluginError::Discovery {
            dir: self.dir.display().to_string(),
            message,
        };

        let entries = fs::read_dir(&self.dir).map_err(|e| discovery_error(e.to_string()))?;

        let mut plugins = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| discovery_error(e.to_string()))?;
            let path = entry.path();

            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if hidden {
                continue;
            }

            let metadata = fs::metadata(&path).map_err(|e| discovery_error(e.to_string()))?;
            if metadata.is_file() && is_executable(&metadata) {
                plugins.push(path);
            } else {
                debug!(path = %path.display(), "Skipping non-plugin entry");
            }
        }

        plugins.sort();
        debug!(dir = %self.dir.display(), count = plugins.len(), "Discovered plugins");
        Ok(plugins)
    }
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_is_discovery_error() {
        let registry = PluginRegistry::new("/nonexistent/plugins");
        let err = registry.discover().unwrap_err();
        assert!(matches!(err, PluginError::Discovery { .. }));
        assert!(err.to_string().contains("/nonexistent/plugins"));
    }

    #[test]
    fn empty_directory_has_no_plugins() {
        let dir = tempfile::tempdir().unwrap();
        let plugins = PluginRegistry::new(dir.path()).discover().unwrap();
        assert!(plugins.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn discovers_only_executables_sorted() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        for (name, mode) in [
            ("b-plugin", 0o755),
            ("a-plugin", 0o700),
            ("README", 0o644),
            (".hidden", 0o755),
        ] {
            let path = dir.path().join(name);
            fs::write(&path, "#!/bin/sh\n").unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        }
        fs::create_dir(dir.path().join("subdir")).unwrap();

        let plugins = PluginRegistry::new(dir.path()).discover().unwrap();

        let names: Vec<_> = plugins
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a-plugin", "b-plugin"]);
    }
}
