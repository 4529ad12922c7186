//! Custom fact discovery
//!
//! Finds Ruby custom fact files (`*.rb`) in search directories. Directories
//! are scanned non-recursively and files are returned sorted by name, so
//! load order is stable across platforms.

use crate::config::FACTERLIB_ENV;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during custom fact discovery
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Failed to read directory {path}: {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of custom fact discovery
#[derive(Debug, Default)]
pub struct DiscoveryResult {
    /// Custom fact files, in load order
    pub files: Vec<PathBuf>,

    /// Directories or entries that could not be read
    pub failures: Vec<(PathBuf, DiscoveryError)>,
}

impl DiscoveryResult {
    /// Returns true if every directory was readable
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Custom fact directory scanner
///
/// Remembers which directories it has already scanned so a directory listed
/// twice (or added again by a custom fact) is only loaded once.
#[derive(Debug, Default)]
pub struct CustomFactScanner {
    scanned: HashSet<PathBuf>,
}

impl CustomFactScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `dir` has already been scanned
    pub fn has_scanned(&self, dir: impl AsRef<Path>) -> bool {
        self.scanned.contains(&normalize(dir.as_ref()))
    }

    /// Scan a directory for `.rb` files
    pub fn scan_directory(
        &mut self,
        dir: impl AsRef<Path>,
    ) -> Result<DiscoveryResult, DiscoveryError> {
        let dir = dir.as_ref();
        if !self.scanned.insert(normalize(dir)) {
            tracing::debug!(path = %dir.display(), "directory already searched for custom facts");
            return Ok(DiscoveryResult::default());
        }

        if !dir.is_dir() {
            return Err(DiscoveryError::DirectoryNotFound(dir.to_path_buf()));
        }

        let entries = std::fs::read_dir(dir).map_err(|source| DiscoveryError::ReadDirectory {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut result = DiscoveryResult::default();
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(source) => {
                    result.failures.push((
                        dir.to_path_buf(),
                        DiscoveryError::ReadDirectory {
                            path: dir.to_path_buf(),
                            source,
                        },
                    ));
                    continue;
                }
            };

            let path = entry.path();
            if path.is_file() && path.extension().map(|e| e == "rb").unwrap_or(false) {
                result.files.push(path);
            }
        }
        result.files.sort();

        tracing::debug!(
            path = %dir.display(),
            count = result.files.len(),
            "searched directory for custom facts"
        );
        Ok(result)
    }

    /// Scan multiple directories; unreadable directories are reported, not fatal
    pub fn scan_directories(
        &mut self,
        dirs: impl IntoIterator<Item = impl AsRef<Path>>,
    ) -> DiscoveryResult {
        let mut all = DiscoveryResult::default();

        for dir in dirs {
            let dir = dir.as_ref();
            match self.scan_directory(dir) {
                Ok(result) => {
                    all.files.extend(result.files);
                    all.failures.extend(result.failures);
                }
                Err(e) => all.failures.push((dir.to_path_buf(), e)),
            }
        }

        all
    }
}

/// Directories listed in the `FACTERLIB` environment variable
pub fn facterlib_dirs() -> Vec<PathBuf> {
    std::env::var_os(FACTERLIB_ENV)
        .map(|value| {
            std::env::split_paths(&value)
                .filter(|p| !p.as_os_str().is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn normalize(dir: &Path) -> PathBuf {
    dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf())
}
