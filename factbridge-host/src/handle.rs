//! The process-wide runtime handle
//!
//! Ruby can be set up once per process and never again after cleanup, so
//! the handle moves through [`RuntimeState::Uninitialized`],
//! [`RuntimeState::Initialized`] and [`RuntimeState::TornDown`] exactly once.
//! Ruby must only be driven from the thread that set it up; on any other
//! thread the handle behaves as if no runtime were available. Every entry
//! point degrades to a logged no-op when the runtime is not available.

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::loader::{load_with, LoadOptions};
use crate::lookup::lookup_in;
use crate::materialize::materialize_value;
use crate::module::{FactModule, RubyFactModule};
use crate::runtime::libruby::LibRuby;
use crate::runtime::Runtime;
use factbridge_api::{split_query, FactCollection, FactValue, ForeignFact, Navigation};
use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

static INSTANCE: Mutex<RuntimeHandle> = Mutex::new(RuntimeHandle::new());

thread_local! {
    static HOLDING_INSTANCE: Cell<bool> = const { Cell::new(false) };
}

/// Lifecycle state of the embedded runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Uninitialized,
    Initialized,
    TornDown,
}

/// Owner of the embedded runtime
pub struct RuntimeHandle {
    state: RuntimeState,
    runtime: Option<Box<dyn Runtime>>,
    owner: Option<ThreadId>,
}

/// Exclusive access to the process-wide handle
pub struct InstanceGuard {
    guard: MutexGuard<'static, RuntimeHandle>,
}

impl Deref for InstanceGuard {
    type Target = RuntimeHandle;

    fn deref(&self) -> &RuntimeHandle {
        &self.guard
    }
}

impl DerefMut for InstanceGuard {
    fn deref_mut(&mut self) -> &mut RuntimeHandle {
        &mut self.guard
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        HOLDING_INSTANCE.with(|held| held.set(false));
    }
}

impl Default for RuntimeHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeHandle {
    /// A handle with no runtime
    pub const fn new() -> Self {
        Self {
            state: RuntimeState::Uninitialized,
            runtime: None,
            owner: None,
        }
    }

    /// Lock the process-wide handle.
    ///
    /// Returns `None` if the calling thread already holds it, e.g. when a
    /// custom fact load is started from inside another load.
    pub fn instance() -> Option<InstanceGuard> {
        if HOLDING_INSTANCE.with(Cell::get) {
            return None;
        }
        let guard = INSTANCE.lock().unwrap_or_else(PoisonError::into_inner);
        HOLDING_INSTANCE.with(|held| held.set(true));
        Some(InstanceGuard { guard })
    }

    /// Locate libruby per `config` and bring it up
    pub fn initialize(&mut self, config: &RuntimeConfig, include_stack_trace: bool) -> bool {
        self.initialize_with(
            || LibRuby::load(config).map(|ruby| Box::new(ruby) as Box<dyn Runtime>),
            include_stack_trace,
        )
    }

    /// Bring up the runtime produced by `bring_up`.
    ///
    /// Calling this on an initialized handle only updates the stack trace
    /// setting.
    pub fn initialize_with<F>(&mut self, bring_up: F, include_stack_trace: bool) -> bool
    where
        F: FnOnce() -> Result<Box<dyn Runtime>, RuntimeError>,
    {
        match self.state {
            RuntimeState::Initialized => {
                if !self.on_owner_thread() {
                    warn_foreign_thread("initialize");
                    return false;
                }
                if let Some(runtime) = self.runtime.as_mut() {
                    runtime.include_stack_trace(include_stack_trace);
                }
                return true;
            }
            RuntimeState::TornDown => {
                tracing::warn!(
                    "{}: facts requiring Ruby will not be resolved.",
                    RuntimeError::TornDown
                );
                return false;
            }
            RuntimeState::Uninitialized => {}
        }

        match bring_up() {
            Ok(mut runtime) => {
                runtime.include_stack_trace(include_stack_trace);
                self.runtime = Some(runtime);
                self.owner = Some(thread::current().id());
                self.state = RuntimeState::Initialized;
                true
            }
            Err(e) => {
                tracing::warn!("{}: facts requiring Ruby will not be resolved.", e);
                false
            }
        }
    }

    /// Release the runtime. A no-op unless initialized.
    pub fn teardown(&mut self) {
        if self.state != RuntimeState::Initialized {
            return;
        }
        if !self.on_owner_thread() {
            warn_foreign_thread("teardown");
            return;
        }
        if let Some(mut runtime) = self.runtime.take() {
            runtime.uninitialize();
        }
        self.state = RuntimeState::TornDown;
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    /// The runtime, while initialized and only on the thread that set it up
    pub fn runtime(&self) -> Option<&dyn Runtime> {
        if self.state != RuntimeState::Initialized {
            return None;
        }
        if !self.on_owner_thread() {
            warn_foreign_thread("ruby access");
            return None;
        }
        self.runtime.as_deref()
    }

    fn on_owner_thread(&self) -> bool {
        self.owner == Some(thread::current().id())
    }

    /// Load Ruby custom facts from `paths` into `facts`.
    ///
    /// Returns the external fact directories registered by the custom facts.
    pub fn load_custom_facts(
        &self,
        facts: &mut FactCollection,
        options: LoadOptions,
        paths: &[PathBuf],
    ) -> Vec<PathBuf> {
        self.load_custom_facts_with(facts, options, paths, RubyFactModule::new)
    }

    /// Load custom facts with a module built by `create`
    pub fn load_custom_facts_with<'a, M, F>(
        &'a self,
        facts: &'a mut FactCollection,
        options: LoadOptions,
        paths: &[PathBuf],
        create: F,
    ) -> Vec<PathBuf>
    where
        M: FactModule,
        F: FnOnce(&'a dyn Runtime, &'a mut FactCollection, bool) -> Result<M, RuntimeError>,
    {
        let Some(runtime) = self.runtime() else {
            tracing::debug!("ruby is not available; custom facts will not be loaded");
            return Vec::new();
        };
        load_with(runtime, facts, options, paths, create)
    }

    /// Resolve `segments` under a foreign-backed value
    pub fn lookup<S: AsRef<str>>(
        &self,
        value: &FactValue,
        segments: &[S],
    ) -> Option<Arc<ForeignFact>> {
        lookup_in(self.runtime(), value, segments)
    }

    /// Copy `value` into host-native form
    pub fn materialize(&self, value: &FactValue) -> Option<FactValue> {
        if value.is_native() {
            return Some(value.clone());
        }
        let runtime = self.runtime()?;
        match materialize_value(runtime, value) {
            Ok(native) => Some(native),
            Err(e) => {
                tracing::debug!(error = %e, "could not convert ruby value");
                None
            }
        }
    }

    /// Resolve a dotted query such as `os.release.major` or `a."b.c".1`.
    ///
    /// The first segment names the fact. Host-native values are walked
    /// directly; any remainder under a foreign-backed value is looked up in
    /// the runtime.
    pub fn query(&self, facts: &FactCollection, query: &str) -> Option<FactValue> {
        let segments = split_query(query);
        match facts.navigate(&segments) {
            Navigation::Found(value) => Some(value.clone()),
            Navigation::Foreign { value, rest } => {
                let owner = FactValue::Foreign(Arc::clone(value));
                self.lookup(&owner, rest).map(FactValue::Foreign)
            }
            Navigation::NotFound => None,
        }
    }
}

fn warn_foreign_thread(operation: &str) {
    tracing::warn!(
        "{} was refused: ruby was initialized on another thread and cannot be driven from this one",
        operation
    );
}
