//! factbridge-host: embedded Ruby runtime for custom facts
//!
//! This crate brings up libruby inside a fact-collecting host, loads Ruby
//! custom facts into a [`FactCollection`] and resolves dotted lookups into
//! values that live inside Ruby.
//!
//! The free functions operate on the process-wide [`RuntimeHandle`]:
//!
//! ```no_run
//! use factbridge_api::FactCollection;
//!
//! let mut facts = FactCollection::new();
//! if factbridge_host::initialize(false) {
//!     factbridge_host::load_custom_facts(&mut facts, ["/etc/facter/facts.d"]);
//! }
//! let release = factbridge_host::query(&facts, "os.release.major");
//! factbridge_host::uninitialize();
//! ```

pub mod bootstrap;
pub mod config;
pub mod discovery;
pub mod error;
pub mod handle;
pub mod loader;
pub mod lookup;
pub mod materialize;
pub mod module;
pub mod platform;
pub mod runtime;
pub mod stdout_guard;
pub mod testing;

#[cfg(feature = "subscriber")]
pub mod tracing_support;

pub use config::RuntimeConfig;
pub use discovery::{CustomFactScanner, DiscoveryError, DiscoveryResult};
pub use error::RuntimeError;
pub use handle::{InstanceGuard, RuntimeHandle, RuntimeState};
pub use loader::LoadOptions;
pub use module::{FactModule, RubyFactModule};
pub use runtime::{ForeignKind, Runtime};
pub use stdout_guard::StdoutRedirect;

pub use factbridge_api::{FactCollection, FactValue, ForeignFact, ForeignValue};

use std::path::PathBuf;
use std::sync::Arc;

fn with_instance<R>(operation: &str, f: impl FnOnce(&mut RuntimeHandle) -> R) -> Option<R> {
    match RuntimeHandle::instance() {
        Some(mut handle) => Some(f(&mut handle)),
        None => {
            tracing::warn!("{} was called while ruby is in use on this thread; ignoring", operation);
            None
        }
    }
}

/// Bring up Ruby using the default [`RuntimeConfig`].
///
/// Returns false (with a warning) if Ruby could not be found or started;
/// later loads are then no-ops.
pub fn initialize(include_stack_trace: bool) -> bool {
    initialize_with_config(&RuntimeConfig::default(), include_stack_trace)
}

/// Bring up Ruby using `config`
pub fn initialize_with_config(config: &RuntimeConfig, include_stack_trace: bool) -> bool {
    with_instance("initialize", |handle| {
        handle.initialize(config, include_stack_trace)
    })
    .unwrap_or(false)
}

/// Shut Ruby down. Ruby cannot be initialized again afterwards.
pub fn uninitialize() {
    with_instance("uninitialize", RuntimeHandle::teardown);
}

/// Load custom facts from `paths`.
///
/// Returns the external fact directories registered by the custom facts
/// (for example through `Facter.search_external`).
pub fn load_custom_facts(
    facts: &mut FactCollection,
    paths: impl IntoIterator<Item = impl Into<PathBuf>>,
) -> Vec<PathBuf> {
    load_custom_facts_with_options(facts, false, false, paths)
}

/// Load custom facts, optionally initializing Puppet first
pub fn load_custom_facts_with_framework(
    facts: &mut FactCollection,
    initialize_framework: bool,
    paths: impl IntoIterator<Item = impl Into<PathBuf>>,
) -> Vec<PathBuf> {
    load_custom_facts_with_options(facts, initialize_framework, false, paths)
}

/// Load custom facts with full control over Puppet and stdout redirection
pub fn load_custom_facts_with_options(
    facts: &mut FactCollection,
    initialize_framework: bool,
    redirect_stdout: bool,
    paths: impl IntoIterator<Item = impl Into<PathBuf>>,
) -> Vec<PathBuf> {
    let paths: Vec<PathBuf> = paths.into_iter().map(Into::into).collect();
    let options = LoadOptions::new(initialize_framework, redirect_stdout);
    with_instance("load_custom_facts", |handle| {
        handle.load_custom_facts(facts, options, &paths)
    })
    .unwrap_or_default()
}

/// Resolve `segments` under a foreign-backed fact value
pub fn lookup<S: AsRef<str>>(value: &FactValue, segments: &[S]) -> Option<Arc<ForeignFact>> {
    with_instance("lookup", |handle| handle.lookup(value, segments)).flatten()
}

/// Copy a fact value into host-native form
pub fn materialize(value: &FactValue) -> Option<FactValue> {
    with_instance("materialize", |handle| handle.materialize(value)).flatten()
}

/// Resolve a dotted query against `facts`
pub fn query(facts: &FactCollection, query: &str) -> Option<FactValue> {
    with_instance("query", |handle| handle.query(facts, query)).flatten()
}
