//! Runtime configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Preferred libruby location fixed at build time
///
/// Set `FACTBRIDGE_RUBY=/path/to/libruby.so` when compiling to bake in a
/// library that is tried before any discovery.
pub const COMPILED_RUBY_LIBRARY: Option<&str> = option_env!("FACTBRIDGE_RUBY");

/// Environment variable consulted at run time for a libruby location
pub const RUBY_LIBRARY_ENV: &str = "FACTBRIDGE_RUBY";

/// Environment variable listing additional custom fact directories
pub const FACTERLIB_ENV: &str = "FACTERLIB";

/// How the embedded runtime is located
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Preferred library, tried first
    #[serde(default)]
    pub library: Option<PathBuf>,

    /// Consult [`RUBY_LIBRARY_ENV`]
    /// Default: true
    #[serde(default = "default_true")]
    pub use_environment: bool,

    /// Ask a `ruby` executable on `PATH` where its shared library lives
    /// Default: true
    #[serde(default = "default_true")]
    pub probe_ruby: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            library: COMPILED_RUBY_LIBRARY.map(PathBuf::from),
            use_environment: true,
            probe_ruby: true,
        }
    }
}

impl RuntimeConfig {
    /// Prefer a specific library
    pub fn with_library(mut self, library: impl Into<PathBuf>) -> Self {
        self.library = Some(library.into());
        self
    }

    /// Ignore [`RUBY_LIBRARY_ENV`]
    pub fn without_environment(mut self) -> Self {
        self.use_environment = false;
        self
    }

    /// Do not run `ruby` to discover the library
    pub fn without_probe(mut self) -> Self {
        self.probe_ruby = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.library, COMPILED_RUBY_LIBRARY.map(PathBuf::from));
        assert!(config.use_environment);
        assert!(config.probe_ruby);
    }

    #[test]
    fn test_builder() {
        let config = RuntimeConfig::default()
            .with_library("/opt/ruby/lib/libruby.so.3.2")
            .without_environment()
            .without_probe();
        assert_eq!(
            config.library,
            Some(PathBuf::from("/opt/ruby/lib/libruby.so.3.2"))
        );
        assert!(!config.use_environment);
        assert!(!config.probe_ruby);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: RuntimeConfig = serde_json::from_str(r#"{"library": "/usr/lib/libruby.so"}"#).unwrap();
        assert_eq!(config.library, Some(PathBuf::from("/usr/lib/libruby.so")));
        assert!(config.use_environment);
        assert!(config.probe_ruby);
    }
}
