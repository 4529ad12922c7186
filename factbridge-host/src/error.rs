//! Runtime error types
//!
//! Every failure raised at the binding boundary is a [`RuntimeError`]. The
//! bridge entry points turn these into log events; they never reach the
//! host caller.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while locating, driving or tearing down Ruby
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No candidate library could be found or loaded
    #[error("could not locate a ruby library (searched: {})", display_paths(.searched))]
    LibraryNotFound {
        searched: Vec<PathBuf>,
        /// Load error of the last candidate tried
        #[source]
        source: Option<libloading::Error>,
    },

    /// A candidate library exists but could not be loaded
    #[error("could not load ruby library '{}': {source}", .path.display())]
    LibraryLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    /// The library is missing an entry point the bridge needs
    #[error("ruby library is missing symbol '{symbol}': {source}")]
    MissingSymbol {
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },

    /// `ruby_setup` reported a non-zero status
    #[error("ruby failed to initialize (status {0})")]
    Setup(i32),

    /// Ruby raised an exception
    #[error("{message}")]
    Raised { message: String },

    /// A value had the wrong type for the requested primitive
    #[error("expected a ruby {expected}")]
    TypeMismatch { expected: &'static str },

    #[error("ruby is not initialized")]
    NotInitialized,

    #[error("ruby has been torn down and cannot be reinitialized")]
    TornDown,
}

impl RuntimeError {
    /// Create an error for a raised Ruby exception
    pub fn raised(message: impl Into<String>) -> Self {
        Self::Raised {
            message: message.into(),
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "nothing".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
