//! Custom fact loading
//!
//! [`load_with`] drives one load: platform setup, the fact module, the
//! optional Puppet bootstrap, the directory search and fact resolution.
//! Nothing here returns an error. Failures are logged and the load carries
//! on with whatever it can still do.

use crate::bootstrap::initialize_framework;
use crate::error::RuntimeError;
use crate::module::FactModule;
use crate::platform::PluginEnvironment;
use crate::runtime::Runtime;
use crate::stdout_guard::with_stdout_redirected;
use factbridge_api::FactCollection;
use std::path::PathBuf;

/// Options for a custom fact load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Load Puppet and its settings before searching for custom facts
    pub initialize_framework: bool,

    /// Send Ruby's stdout to stderr while facts resolve
    pub redirect_stdout: bool,
}

impl LoadOptions {
    pub fn new(initialize_framework: bool, redirect_stdout: bool) -> Self {
        Self {
            initialize_framework,
            redirect_stdout,
        }
    }
}

/// Load custom facts into `facts` using a module built by `create`.
///
/// `create` receives the runtime, the collection and whether Puppet manages
/// the session. Returns the external fact directories the module found.
pub fn load_with<'a, M, F>(
    runtime: &'a dyn Runtime,
    facts: &'a mut FactCollection,
    options: LoadOptions,
    paths: &[PathBuf],
    create: F,
) -> Vec<PathBuf>
where
    M: FactModule,
    F: FnOnce(&'a dyn Runtime, &'a mut FactCollection, bool) -> Result<M, RuntimeError>,
{
    let _environment = PluginEnvironment::enter();

    let mut module = match create(runtime, facts, options.initialize_framework) {
        Ok(module) => module,
        Err(e) => {
            tracing::warn!(error = %e, "could not prepare custom fact loading");
            return Vec::new();
        }
    };

    if options.initialize_framework {
        if let Err(e) = initialize_framework(runtime) {
            tracing::warn!(
                "Could not load the configuration framework; some facts may be unavailable: {}",
                e
            );
        }
    }

    module.search(paths);

    if options.redirect_stdout {
        with_stdout_redirected(runtime, || module.resolve_facts());
    } else {
        module.resolve_facts();
    }

    module.external_paths()
}
