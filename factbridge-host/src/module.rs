//! Custom fact module
//!
//! [`FactModule`] is the seam between the loader and whatever evaluates
//! custom facts. [`RubyFactModule`] is the real implementation: it installs a
//! small `Facter` API in the embedded runtime, loads `*.rb` files from the
//! search directories and adds every resolved fact to the host collection as
//! a foreign-backed value.

use crate::discovery::{facterlib_dirs, CustomFactScanner, DiscoveryError};
use crate::error::RuntimeError;
use crate::runtime::Runtime;
use factbridge_api::{FactCollection, FactValue, ForeignValue};
use std::path::{Path, PathBuf};

const SHIM: &str = include_str!("shim.rb");

/// Global used to hand a single string argument to shim calls
const ARGUMENT_GLOBAL: &str = "$__factbridge_arg";

/// Evaluates custom facts into a host collection
pub trait FactModule {
    /// Load custom facts from `paths`
    fn search(&mut self, paths: &[PathBuf]);

    /// Resolve loaded facts into the collection
    fn resolve_facts(&mut self);

    /// External fact directories registered while searching
    fn external_paths(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Custom fact module backed by the embedded Ruby runtime
pub struct RubyFactModule<'a> {
    runtime: &'a dyn Runtime,
    facts: &'a mut FactCollection,
    scanner: CustomFactScanner,
    external_paths: Vec<PathBuf>,
}

impl<'a> RubyFactModule<'a> {
    /// Bind a module to `facts`.
    ///
    /// When `framework_managed` is set the configuration framework owns
    /// logging, so Ruby-side messages are left to it instead of being
    /// forwarded to `tracing`.
    pub fn new(
        runtime: &'a dyn Runtime,
        facts: &'a mut FactCollection,
        framework_managed: bool,
    ) -> Result<Self, RuntimeError> {
        runtime.eval(SHIM)?;

        let seed = facts.native_json().to_string();
        set_argument(runtime, &seed)?;
        runtime.eval(&format!(
            "FactBridge.start({}, {})",
            ARGUMENT_GLOBAL, !framework_managed
        ))?;

        Ok(Self {
            runtime,
            facts,
            scanner: CustomFactScanner::new(),
            external_paths: Vec::new(),
        })
    }

    fn load_directories(&mut self, dirs: &[PathBuf]) {
        let result = self.scanner.scan_directories(dirs);
        for (path, error) in &result.failures {
            match error {
                DiscoveryError::DirectoryNotFound(_) => {
                    tracing::debug!(path = %path.display(), "custom fact directory does not exist")
                }
                DiscoveryError::ReadDirectory { .. } => {
                    tracing::warn!(path = %path.display(), error = %error, "could not search custom fact directory")
                }
            }
        }
        for file in &result.files {
            self.load_file(file);
        }
    }

    fn load_file(&self, file: &Path) {
        tracing::debug!(path = %file.display(), "loading custom facts");
        let outcome = set_argument(self.runtime, &file.to_string_lossy())
            .and_then(|()| {
                self.runtime
                    .eval(&format!("FactBridge.load_file({})", ARGUMENT_GLOBAL))
            });
        if let Err(e) = outcome {
            tracing::warn!(path = %file.display(), error = %e, "error while loading custom facts");
        }
        self.forward_messages();
    }

    /// Directories added with `Facter.search` that have not been loaded yet
    fn pending_search_paths(&self) -> Vec<PathBuf> {
        match self.string_list("FactBridge.search_paths") {
            Ok(paths) => paths
                .into_iter()
                .map(PathBuf::from)
                .filter(|p| !self.scanner.has_scanned(p))
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "could not read custom fact search paths");
                Vec::new()
            }
        }
    }

    fn resolve_fact(&mut self, name: &str) -> Result<(), RuntimeError> {
        set_argument(self.runtime, name)?;
        let value = self
            .runtime
            .eval(&format!("FactBridge.resolve({})", ARGUMENT_GLOBAL))?;
        if self.runtime.is_nil(value) {
            tracing::debug!(fact = %name, "custom fact resolved to nil");
            return Ok(());
        }
        self.facts.add(name, FactValue::foreign(value));
        Ok(())
    }

    fn string_list(&self, source: &str) -> Result<Vec<String>, RuntimeError> {
        let list = self.runtime.eval(source)?;
        if self.runtime.is_nil(list) {
            return Ok(Vec::new());
        }
        let len = self.runtime.sequence_len(list)?;
        (0..len)
            .map(|i| {
                let item = self.runtime.sequence_at(list, i)?;
                self.runtime.to_utf8(item)
            })
            .collect()
    }

    /// Forward messages queued by `Facter.debug`/`warn`/`log_exception`
    fn forward_messages(&self) {
        let drained = match self.runtime.eval("FactBridge.drain_messages") {
            Ok(drained) => drained,
            Err(e) => {
                tracing::debug!(error = %e, "could not read custom fact messages");
                return;
            }
        };
        let Ok(len) = self.runtime.sequence_len(drained) else {
            return;
        };
        for i in 0..len {
            if let Ok((level, message)) = self.message_at(drained, i) {
                match level.as_str() {
                    "debug" => tracing::debug!(target: "factbridge::ruby", "{}", message),
                    "warn" => tracing::warn!(target: "factbridge::ruby", "{}", message),
                    _ => tracing::error!(target: "factbridge::ruby", "{}", message),
                }
            }
        }
    }

    fn message_at(&self, list: ForeignValue, index: i64) -> Result<(String, String), RuntimeError> {
        let pair = self.runtime.sequence_at(list, index)?;
        let level = self.runtime.sequence_at(pair, 0)?;
        let message = self.runtime.sequence_at(pair, 1)?;
        Ok((self.runtime.to_utf8(level)?, self.runtime.to_utf8(message)?))
    }
}

impl FactModule for RubyFactModule<'_> {
    fn search(&mut self, paths: &[PathBuf]) {
        let mut dirs = paths.to_vec();
        dirs.extend(facterlib_dirs());
        self.load_directories(&dirs);

        // Custom facts may call Facter.search while loading.
        loop {
            let pending = self.pending_search_paths();
            if pending.is_empty() {
                break;
            }
            self.load_directories(&pending);
        }

        match self.string_list("FactBridge.external_paths") {
            Ok(paths) => self.external_paths = paths.into_iter().map(PathBuf::from).collect(),
            Err(e) => tracing::warn!(error = %e, "could not read external fact directories"),
        }
    }

    fn resolve_facts(&mut self) {
        let names = match self.string_list("FactBridge.fact_names") {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(error = %e, "could not enumerate custom facts");
                return;
            }
        };

        for name in names {
            if let Err(e) = self.resolve_fact(&name) {
                tracing::warn!(fact = %name, error = %e, "error while resolving custom fact");
            }
            self.forward_messages();
        }
    }

    /// Directories registered through `Facter.search_external`
    fn external_paths(&self) -> Vec<PathBuf> {
        self.external_paths.clone()
    }
}

fn set_argument(runtime: &dyn Runtime, text: &str) -> Result<(), RuntimeError> {
    let value = runtime.string_to_foreign(text)?;
    runtime.global_set(ARGUMENT_GLOBAL, value)
}
