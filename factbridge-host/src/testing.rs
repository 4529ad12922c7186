//! Testing support for the bridge.
//!
//! [`SimulatedRuntime`] implements [`Runtime`] over an in-memory value arena,
//! so the navigator, the stdout redirect and the loader can be tested without
//! libruby. [`RecordingModule`] is a [`FactModule`] that records what the
//! loader asked of it.
//!
//! # Example
//!
//! ```
//! use factbridge_api::FactValue;
//! use factbridge_host::lookup::lookup_in;
//! use factbridge_host::testing::SimulatedRuntime;
//!
//! let runtime = SimulatedRuntime::new();
//! let values = vec![runtime.integer(10), runtime.integer(20)];
//! let array = runtime.array(values);
//!
//! let fact = FactValue::foreign(array);
//! let child = lookup_in(Some(&runtime), &fact, &["1"]).unwrap();
//! assert_eq!(runtime.get(child.value()), factbridge_host::testing::SimValue::Integer(20));
//! ```

use crate::error::RuntimeError;
use crate::module::FactModule;
use crate::runtime::{ForeignKind, Runtime};
use factbridge_api::{FactCollection, FactValue, ForeignValue};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// A value stored in the simulated runtime
#[derive(Debug, Clone, PartialEq)]
pub enum SimValue {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Symbol(String),
    Array(Vec<ForeignValue>),
    Hash(Vec<(ForeignValue, ForeignValue)>),
    /// Opaque object identified by name, e.g. `STDOUT`
    Object(String),
}

/// In-memory [`Runtime`] implementation
pub struct SimulatedRuntime {
    values: RefCell<Vec<SimValue>>,
    globals: RefCell<HashMap<String, ForeignValue>>,
    scripts: RefCell<Vec<(String, Result<ForeignValue, String>)>>,
    evaluated: RefCell<Vec<String>>,
    failing_globals: RefCell<HashSet<String>>,
    traversals: Cell<usize>,
    include_stack_trace: bool,
    uninitialized: bool,
}

impl SimulatedRuntime {
    /// Create a runtime with `$stdout` and `$stderr` bound to distinct objects
    pub fn new() -> Self {
        let runtime = Self {
            values: RefCell::new(vec![SimValue::Nil]),
            globals: RefCell::new(HashMap::new()),
            scripts: RefCell::new(Vec::new()),
            evaluated: RefCell::new(Vec::new()),
            failing_globals: RefCell::new(HashSet::new()),
            traversals: Cell::new(0),
            include_stack_trace: false,
            uninitialized: false,
        };
        let stdout = runtime.object("STDOUT");
        let stderr = runtime.object("STDERR");
        runtime.globals.borrow_mut().insert("$stdout".to_string(), stdout);
        runtime.globals.borrow_mut().insert("$stderr".to_string(), stderr);
        runtime
    }

    /// Store a value and return its handle
    pub fn insert(&self, value: SimValue) -> ForeignValue {
        let mut values = self.values.borrow_mut();
        values.push(value);
        ForeignValue::from_raw(values.len() - 1)
    }

    /// Read back a stored value
    pub fn get(&self, value: ForeignValue) -> SimValue {
        self.values
            .borrow()
            .get(value.as_raw())
            .cloned()
            .unwrap_or(SimValue::Nil)
    }

    pub fn string(&self, text: &str) -> ForeignValue {
        self.insert(SimValue::String(text.to_string()))
    }

    pub fn symbol(&self, text: &str) -> ForeignValue {
        self.insert(SimValue::Symbol(text.to_string()))
    }

    pub fn integer(&self, value: i64) -> ForeignValue {
        self.insert(SimValue::Integer(value))
    }

    pub fn float(&self, value: f64) -> ForeignValue {
        self.insert(SimValue::Float(value))
    }

    pub fn boolean(&self, value: bool) -> ForeignValue {
        self.insert(SimValue::Boolean(value))
    }

    pub fn array(&self, items: Vec<ForeignValue>) -> ForeignValue {
        self.insert(SimValue::Array(items))
    }

    pub fn hash(&self, entries: Vec<(ForeignValue, ForeignValue)>) -> ForeignValue {
        self.insert(SimValue::Hash(entries))
    }

    pub fn object(&self, name: &str) -> ForeignValue {
        self.insert(SimValue::Object(name.to_string()))
    }

    /// Make `eval` of any source containing `pattern` return `value`
    pub fn on_eval(&self, pattern: &str, value: ForeignValue) {
        self.scripts
            .borrow_mut()
            .push((pattern.to_string(), Ok(value)));
    }

    /// Make `eval` of any source containing `pattern` raise `message`
    pub fn fail_eval(&self, pattern: &str, message: &str) {
        self.scripts
            .borrow_mut()
            .push((pattern.to_string(), Err(message.to_string())));
    }

    /// Make `global_set` of `name` fail
    pub fn fail_global_set(&self, name: &str) {
        self.failing_globals.borrow_mut().insert(name.to_string());
    }

    /// Every source text passed to `eval`, in order
    pub fn evaluated(&self) -> Vec<String> {
        self.evaluated.borrow().clone()
    }

    /// Number of element or key lookups performed so far
    pub fn traversals(&self) -> usize {
        self.traversals.get()
    }

    pub fn stack_trace_enabled(&self) -> bool {
        self.include_stack_trace
    }

    pub fn is_uninitialized(&self) -> bool {
        self.uninitialized
    }

    fn same_key(&self, a: ForeignValue, b: ForeignValue) -> bool {
        if a == b {
            return true;
        }
        match (self.get(a), self.get(b)) {
            (SimValue::String(x), SimValue::String(y)) => x == y,
            (SimValue::Symbol(x), SimValue::Symbol(y)) => x == y,
            (SimValue::Integer(x), SimValue::Integer(y)) => x == y,
            _ => false,
        }
    }
}

impl Default for SimulatedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime for SimulatedRuntime {
    fn include_stack_trace(&mut self, include: bool) {
        self.include_stack_trace = include;
    }

    fn uninitialize(&mut self) {
        self.uninitialized = true;
    }

    fn nil(&self) -> ForeignValue {
        ForeignValue::from_raw(0)
    }

    fn kind(&self, value: ForeignValue) -> ForeignKind {
        match self.get(value) {
            SimValue::Nil => ForeignKind::Nil,
            SimValue::Boolean(b) => ForeignKind::Boolean(b),
            SimValue::Integer(_) => ForeignKind::Integer,
            SimValue::Float(_) => ForeignKind::Float,
            SimValue::String(_) => ForeignKind::String,
            SimValue::Symbol(_) => ForeignKind::Symbol,
            SimValue::Array(_) => ForeignKind::Array,
            SimValue::Hash(_) => ForeignKind::Hash,
            SimValue::Object(_) => ForeignKind::Other,
        }
    }

    fn sequence_len(&self, sequence: ForeignValue) -> Result<i64, RuntimeError> {
        match self.get(sequence) {
            SimValue::Array(items) => Ok(items.len() as i64),
            _ => Err(RuntimeError::TypeMismatch { expected: "Array" }),
        }
    }

    fn sequence_at(&self, sequence: ForeignValue, index: i64) -> Result<ForeignValue, RuntimeError> {
        self.traversals.set(self.traversals.get() + 1);
        match self.get(sequence) {
            SimValue::Array(items) => Ok(usize::try_from(index)
                .ok()
                .and_then(|i| items.get(i).copied())
                .unwrap_or_else(|| self.nil())),
            _ => Err(RuntimeError::TypeMismatch { expected: "Array" }),
        }
    }

    fn mapping_lookup(
        &self,
        mapping: ForeignValue,
        key: ForeignValue,
    ) -> Result<ForeignValue, RuntimeError> {
        self.traversals.set(self.traversals.get() + 1);
        match self.get(mapping) {
            SimValue::Hash(entries) => Ok(entries
                .iter()
                .find(|(k, _)| self.same_key(*k, key))
                .map(|(_, v)| *v)
                .unwrap_or_else(|| self.nil())),
            _ => Err(RuntimeError::TypeMismatch { expected: "Hash" }),
        }
    }

    fn mapping_entries(
        &self,
        mapping: ForeignValue,
    ) -> Result<Vec<(ForeignValue, ForeignValue)>, RuntimeError> {
        match self.get(mapping) {
            SimValue::Hash(entries) => Ok(entries),
            _ => Err(RuntimeError::TypeMismatch { expected: "Hash" }),
        }
    }

    fn string_to_foreign(&self, text: &str) -> Result<ForeignValue, RuntimeError> {
        Ok(self.string(text))
    }

    fn symbol_to_foreign(&self, text: &str) -> Result<ForeignValue, RuntimeError> {
        Ok(self.symbol(text))
    }

    fn to_utf8(&self, value: ForeignValue) -> Result<String, RuntimeError> {
        match self.get(value) {
            SimValue::Nil => Ok(String::new()),
            SimValue::Boolean(b) => Ok(b.to_string()),
            SimValue::Integer(i) => Ok(i.to_string()),
            SimValue::Float(f) => Ok(f.to_string()),
            SimValue::String(s) | SimValue::Symbol(s) => Ok(s),
            SimValue::Object(name) => Ok(format!("#<{}>", name)),
            SimValue::Array(_) | SimValue::Hash(_) => {
                Err(RuntimeError::TypeMismatch { expected: "String" })
            }
        }
    }

    fn to_integer(&self, value: ForeignValue) -> Result<i64, RuntimeError> {
        match self.get(value) {
            SimValue::Integer(i) => Ok(i),
            SimValue::Float(f) => Ok(f as i64),
            _ => Err(RuntimeError::TypeMismatch { expected: "Integer" }),
        }
    }

    fn to_float(&self, value: ForeignValue) -> Result<f64, RuntimeError> {
        match self.get(value) {
            SimValue::Float(f) => Ok(f),
            SimValue::Integer(i) => Ok(i as f64),
            _ => Err(RuntimeError::TypeMismatch { expected: "Float" }),
        }
    }

    fn global_get(&self, name: &str) -> Result<ForeignValue, RuntimeError> {
        Ok(self
            .globals
            .borrow()
            .get(name)
            .copied()
            .unwrap_or_else(|| self.nil()))
    }

    fn global_set(&self, name: &str, value: ForeignValue) -> Result<(), RuntimeError> {
        if self.failing_globals.borrow().contains(name) {
            return Err(RuntimeError::raised(format!("cannot assign {}", name)));
        }
        self.globals.borrow_mut().insert(name.to_string(), value);
        Ok(())
    }

    fn eval(&self, source: &str) -> Result<ForeignValue, RuntimeError> {
        self.evaluated.borrow_mut().push(source.to_string());
        let scripts = self.scripts.borrow();
        match scripts.iter().find(|(pattern, _)| source.contains(pattern.as_str())) {
            Some((_, Ok(value))) => Ok(*value),
            Some((_, Err(message))) => Err(RuntimeError::raised(message.clone())),
            None => Ok(self.nil()),
        }
    }
}

/// A call made by the loader on a [`RecordingModule`]
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleCall {
    Created { framework_managed: bool },
    Search(Vec<PathBuf>),
    /// `stdout` is Ruby's `$stdout` at the time facts were resolved
    Resolve { stdout: Option<ForeignValue> },
}

/// Shared call log for [`RecordingModule`]
pub type CallLog = Arc<Mutex<Vec<ModuleCall>>>;

/// A [`FactModule`] that records the loader's calls and adds preset facts
pub struct RecordingModule<'a> {
    runtime: &'a dyn Runtime,
    facts: &'a mut FactCollection,
    calls: CallLog,
    produce: Vec<(String, FactValue)>,
}

impl<'a> RecordingModule<'a> {
    pub fn new(
        runtime: &'a dyn Runtime,
        facts: &'a mut FactCollection,
        framework_managed: bool,
        calls: CallLog,
    ) -> Self {
        record(&calls, ModuleCall::Created { framework_managed });
        Self {
            runtime,
            facts,
            calls,
            produce: Vec::new(),
        }
    }

    /// Facts added to the collection on resolve
    pub fn producing(mut self, facts: Vec<(String, FactValue)>) -> Self {
        self.produce = facts;
        self
    }
}

impl FactModule for RecordingModule<'_> {
    fn search(&mut self, paths: &[PathBuf]) {
        record(&self.calls, ModuleCall::Search(paths.to_vec()));
    }

    fn resolve_facts(&mut self) {
        let stdout = self.runtime.global_get("$stdout").ok();
        record(&self.calls, ModuleCall::Resolve { stdout });
        for (name, value) in self.produce.drain(..) {
            self.facts.add(name, value);
        }
    }
}

fn record(calls: &CallLog, call: ModuleCall) {
    calls
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(call);
}

/// Snapshot of a call log
pub fn calls(log: &CallLog) -> Vec<ModuleCall> {
    log.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_lookup_distinguishes_strings_and_symbols() {
        let runtime = SimulatedRuntime::new();
        let key = runtime.symbol("os");
        let value = runtime.string("linux");
        let hash = runtime.hash(vec![(key, value)]);

        let by_string = runtime.string("os");
        let by_symbol = runtime.symbol("os");
        assert!(runtime.is_nil(runtime.mapping_lookup(hash, by_string).unwrap()));
        assert_eq!(runtime.mapping_lookup(hash, by_symbol).unwrap(), value);
        assert_eq!(runtime.traversals(), 2);
    }

    #[test]
    fn test_eval_scripts() {
        let runtime = SimulatedRuntime::new();
        let answer = runtime.integer(42);
        runtime.on_eval("answer", answer);
        runtime.fail_eval("require 'puppet'", "cannot load such file -- puppet");

        assert_eq!(runtime.eval("answer").unwrap(), answer);
        assert!(runtime.eval("require 'puppet'\nPuppet.initialize_settings").is_err());
        assert!(runtime.is_nil(runtime.eval("1 + 1").unwrap()));
        assert_eq!(runtime.evaluated().len(), 3);
    }

    #[test]
    fn test_recording_module() {
        let runtime = SimulatedRuntime::new();
        let mut facts = FactCollection::new();
        let log = CallLog::default();

        {
            let mut module = RecordingModule::new(&runtime, &mut facts, true, log.clone())
                .producing(vec![("custom".to_string(), FactValue::from("value"))]);
            module.search(&[PathBuf::from("/facts")]);
            module.resolve_facts();
        }

        let stdout = runtime.global_get("$stdout").unwrap();
        assert_eq!(
            calls(&log),
            vec![
                ModuleCall::Created {
                    framework_managed: true
                },
                ModuleCall::Search(vec![PathBuf::from("/facts")]),
                ModuleCall::Resolve {
                    stdout: Some(stdout)
                },
            ]
        );
        assert_eq!(facts.get("custom").and_then(FactValue::as_str), Some("value"));
    }
}
