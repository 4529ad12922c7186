//! The embedded runtime capability surface
//!
//! [`Runtime`] is the small set of primitives the bridge needs from Ruby.
//! [`libruby::LibRuby`] implements it over the real interpreter; the
//! [`crate::testing::SimulatedRuntime`] implements it in memory so the
//! navigator and loader can be exercised without libruby.
//!
//! All primitives are synchronous and must be driven from the thread that
//! initialized the runtime.

pub mod libruby;
pub mod locate;

use crate::error::RuntimeError;
use factbridge_api::ForeignValue;

/// Coarse classification of a runtime value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignKind {
    Nil,
    Boolean(bool),
    Integer,
    Float,
    String,
    Symbol,
    Array,
    Hash,
    /// Any other object
    Other,
}

/// Primitives of an initialized embedded runtime
pub trait Runtime: Send {
    /// Whether raised exceptions should carry their backtrace
    fn include_stack_trace(&mut self, include: bool);

    /// Release the interpreter. Called once by the handle on teardown.
    fn uninitialize(&mut self);

    /// The runtime's nil value
    fn nil(&self) -> ForeignValue;

    fn is_nil(&self, value: ForeignValue) -> bool {
        value == self.nil()
    }

    fn kind(&self, value: ForeignValue) -> ForeignKind;

    fn is_sequence(&self, value: ForeignValue) -> bool {
        self.kind(value) == ForeignKind::Array
    }

    fn is_mapping(&self, value: ForeignValue) -> bool {
        self.kind(value) == ForeignKind::Hash
    }

    fn sequence_len(&self, sequence: ForeignValue) -> Result<i64, RuntimeError>;

    fn sequence_at(&self, sequence: ForeignValue, index: i64) -> Result<ForeignValue, RuntimeError>;

    /// Direct key lookup; a missing key yields nil
    fn mapping_lookup(
        &self,
        mapping: ForeignValue,
        key: ForeignValue,
    ) -> Result<ForeignValue, RuntimeError>;

    /// Key/value pairs in the mapping's iteration order
    fn mapping_entries(
        &self,
        mapping: ForeignValue,
    ) -> Result<Vec<(ForeignValue, ForeignValue)>, RuntimeError>;

    /// Create a UTF-8 string
    fn string_to_foreign(&self, text: &str) -> Result<ForeignValue, RuntimeError>;

    /// Create a symbol
    fn symbol_to_foreign(&self, text: &str) -> Result<ForeignValue, RuntimeError>;

    /// String form of a value (`to_s` for non-strings)
    fn to_utf8(&self, value: ForeignValue) -> Result<String, RuntimeError>;

    fn to_integer(&self, value: ForeignValue) -> Result<i64, RuntimeError>;

    fn to_float(&self, value: ForeignValue) -> Result<f64, RuntimeError>;

    /// Read a global variable such as `$stdout`
    fn global_get(&self, name: &str) -> Result<ForeignValue, RuntimeError>;

    fn global_set(&self, name: &str, value: ForeignValue) -> Result<(), RuntimeError>;

    /// Evaluate source text at top level
    fn eval(&self, source: &str) -> Result<ForeignValue, RuntimeError>;
}
