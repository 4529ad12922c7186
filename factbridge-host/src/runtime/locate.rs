//! libruby discovery
//!
//! Candidates are tried in order:
//!
//! 1. the preferred library from [`RuntimeConfig::library`] (seeded from the
//!    build-time `FACTBRIDGE_RUBY` value);
//! 2. the `FACTBRIDGE_RUBY` environment variable;
//! 3. the shared library reported by a `ruby` executable found on `PATH`.

use crate::config::{RuntimeConfig, RUBY_LIBRARY_ENV};
use crate::error::RuntimeError;
use libloading::Library;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

const PROBE_SCRIPT: &str = "print File.join(RbConfig::CONFIG[RbConfig::CONFIG['host_os'] =~ /mswin|mingw/ ? 'bindir' : 'libdir'], RbConfig::CONFIG['LIBRUBY_SO'])";

/// A loaded libruby and where it came from
pub struct LocatedLibrary {
    pub library: Library,
    pub path: PathBuf,
}

/// Find and load libruby
pub fn locate(config: &RuntimeConfig) -> Result<LocatedLibrary, RuntimeError> {
    let mut candidates = Vec::new();
    if let Some(preferred) = &config.library {
        candidates.push(preferred.clone());
    }
    if config.use_environment {
        if let Some(path) = std::env::var_os(RUBY_LIBRARY_ENV).filter(|v| !v.is_empty()) {
            candidates.push(PathBuf::from(path));
        }
    }
    if config.probe_ruby {
        candidates.extend(probe_ruby_library(std::env::var_os("PATH")));
    }

    let mut failures = Vec::new();
    for candidate in candidates {
        tracing::debug!(path = %candidate.display(), "trying ruby library");
        match open(&candidate) {
            Ok(library) => {
                return Ok(LocatedLibrary {
                    library,
                    path: candidate,
                })
            }
            Err(source) => {
                // The caller reports the final failure as a single warning.
                tracing::debug!(
                    path = %candidate.display(),
                    error = %source,
                    "ruby library could not be loaded"
                );
                failures.push((candidate, source));
            }
        }
    }

    Err(not_found(failures))
}

/// Report every failed candidate, keeping the last load error as the cause
fn not_found(mut failures: Vec<(PathBuf, libloading::Error)>) -> RuntimeError {
    match failures.pop() {
        Some((path, source)) if failures.is_empty() => RuntimeError::LibraryLoad { path, source },
        Some((path, source)) => {
            let mut searched: Vec<PathBuf> = failures.into_iter().map(|(path, _)| path).collect();
            searched.push(path);
            RuntimeError::LibraryNotFound {
                searched,
                source: Some(source),
            }
        }
        None => RuntimeError::LibraryNotFound {
            searched: Vec::new(),
            source: None,
        },
    }
}

/// Ask the first `ruby` on `search_path` for its shared library
fn probe_ruby_library(search_path: Option<OsString>) -> Option<PathBuf> {
    let ruby = find_ruby(search_path)?;
    let output = Command::new(&ruby).args(["-e", PROBE_SCRIPT]).output().ok()?;
    if !output.status.success() {
        tracing::debug!(ruby = %ruby.display(), "ruby did not report its library location");
        return None;
    }
    let reported = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!reported.is_empty()).then(|| PathBuf::from(reported))
}

fn find_ruby(search_path: Option<OsString>) -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    match which::which_in("ruby", search_path, cwd) {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::debug!(error = %e, "no ruby executable found");
            None
        }
    }
}

#[cfg(unix)]
fn open(path: &Path) -> Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_LAZY};

    // Native extensions loaded later by ruby resolve their rb_* symbols
    // against the global namespace.
    unsafe { UnixLibrary::open(Some(path), RTLD_LAZY | RTLD_GLOBAL) }.map(Library::from)
}

#[cfg(not(unix))]
fn open(path: &Path) -> Result<Library, libloading::Error> {
    unsafe { Library::new(path) }
}
