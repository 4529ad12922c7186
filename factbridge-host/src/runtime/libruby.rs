//! Ruby binding over a dynamically loaded libruby
//!
//! Every call that may raise runs inside `rb_protect`, so Ruby never
//! unwinds through host frames that own resources. Closures handed to
//! [`LibRuby::protect`] only capture references and `Copy` data.

use super::locate::{locate, LocatedLibrary};
use super::{ForeignKind, Runtime};
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use factbridge_api::ForeignValue;
use libloading::Library;
use std::ffi::{c_char, c_int, c_long, CString};
use std::mem::ManuallyDrop;
use std::path::{Path, PathBuf};

type Value = usize;
type Id = usize;
type ProtectedFn = unsafe extern "C" fn(Value) -> Value;

macro_rules! ruby_api {
    ($($name:ident: $ty:ty;)*) => {
        struct Api {
            $($name: $ty,)*
        }

        impl Api {
            fn load(library: &Library) -> Result<Self, RuntimeError> {
                Ok(Self {
                    $($name: unsafe {
                        *library
                            .get::<$ty>(concat!(stringify!($name), "\0").as_bytes())
                            .map_err(|source| RuntimeError::MissingSymbol {
                                symbol: stringify!($name),
                                source,
                            })?
                    },)*
                })
            }
        }
    };
}

ruby_api! {
    ruby_init_stack: unsafe extern "C" fn(*mut Value);
    ruby_setup: unsafe extern "C" fn() -> c_int;
    ruby_cleanup: unsafe extern "C" fn(c_int) -> c_int;
    ruby_init_loadpath: unsafe extern "C" fn();
    ruby_script: unsafe extern "C" fn(*const c_char);
    rb_protect: unsafe extern "C" fn(ProtectedFn, Value, *mut c_int) -> Value;
    rb_eval_string_protect: unsafe extern "C" fn(*const c_char, *mut c_int) -> Value;
    rb_errinfo: unsafe extern "C" fn() -> Value;
    rb_set_errinfo: unsafe extern "C" fn(Value);
    rb_gv_get: unsafe extern "C" fn(*const c_char) -> Value;
    rb_gv_set: unsafe extern "C" fn(*const c_char, Value) -> Value;
    rb_intern2: unsafe extern "C" fn(*const c_char, c_long) -> Id;
    rb_utf8_str_new: unsafe extern "C" fn(*const c_char, c_long) -> Value;
    rb_str_intern: unsafe extern "C" fn(Value) -> Value;
    rb_funcallv: unsafe extern "C" fn(Value, Id, c_int, *const Value) -> Value;
    rb_ary_entry: unsafe extern "C" fn(Value, c_long) -> Value;
    rb_hash_lookup: unsafe extern "C" fn(Value, Value) -> Value;
    rb_obj_is_kind_of: unsafe extern "C" fn(Value, Value) -> Value;
    rb_num2long: unsafe extern "C" fn(Value) -> c_long;
    rb_num2dbl: unsafe extern "C" fn(Value) -> f64;
    rb_string_value_ptr: unsafe extern "C" fn(*mut Value) -> *const c_char;
}

/// Core classes used for type checks
struct Classes {
    array: Value,
    hash: Value,
    string: Value,
    symbol: Value,
    integer: Value,
    float: Value,
}

impl Classes {
    /// Read the class globals. Only valid after `ruby_setup`.
    fn read(library: &Library) -> Result<Self, RuntimeError> {
        Ok(Self {
            array: read_global(library, "rb_cArray")?,
            hash: read_global(library, "rb_cHash")?,
            string: read_global(library, "rb_cString")?,
            symbol: read_global(library, "rb_cSymbol")?,
            integer: read_global(library, "rb_cInteger")?,
            float: read_global(library, "rb_cFloat")?,
        })
    }
}

fn read_global(library: &Library, symbol: &'static str) -> Result<Value, RuntimeError> {
    let name = format!("{}\0", symbol);
    let address = unsafe { library.get::<*const Value>(name.as_bytes()) }
        .map_err(|source| RuntimeError::MissingSymbol { symbol, source })?;
    Ok(unsafe { **address })
}

unsafe extern "C" fn trampoline<F: FnOnce() -> Value>(data: Value) -> Value {
    let slot = unsafe { &mut *(data as *mut Option<F>) };
    match slot.take() {
        Some(f) => f(),
        None => 0,
    }
}

/// An initialized Ruby interpreter
pub struct LibRuby {
    api: Api,
    classes: Classes,
    nil: Value,
    qtrue: Value,
    qfalse: Value,
    include_stack_trace: bool,
    initialized: bool,
    path: PathBuf,
    // libruby cannot be unloaded once the VM has been set up.
    _library: ManuallyDrop<Library>,
}

impl LibRuby {
    /// Locate libruby and bring up the interpreter.
    ///
    /// Call from a frame near the top of the host's stack: Ruby's garbage
    /// collector scans the machine stack from this point.
    pub fn load(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        let LocatedLibrary { library, path } = locate(config)?;
        let library = ManuallyDrop::new(library);
        let api = Api::load(&library)?;

        tracing::debug!(path = %path.display(), "initializing ruby");

        let mut stack_start: Value = 0;
        let status = unsafe {
            (api.ruby_init_stack)(&mut stack_start);
            (api.ruby_setup)()
        };
        if status != 0 {
            return Err(RuntimeError::Setup(status));
        }
        unsafe {
            (api.ruby_init_loadpath)();
            (api.ruby_script)(b"factbridge\0".as_ptr().cast());
        }

        let classes = Classes::read(&library)?;
        let nil = eval_raw(&api, "nil")?;
        let qtrue = eval_raw(&api, "true")?;
        let qfalse = eval_raw(&api, "false")?;

        let ruby = Self {
            api,
            classes,
            nil,
            qtrue,
            qfalse,
            include_stack_trace: false,
            initialized: true,
            path,
            _library: library,
        };

        if let Err(e) = ruby.eval("require 'rubygems'") {
            tracing::debug!(error = %e, "rubygems is unavailable");
        }
        Ok(ruby)
    }

    /// Path of the loaded library
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` inside `rb_protect`, returning the raised exception on failure
    fn protect_raw<F: FnOnce() -> Value>(&self, f: F) -> Result<Value, Value> {
        let mut slot = Some(f);
        let mut state: c_int = 0;
        let result = unsafe {
            (self.api.rb_protect)(
                trampoline::<F>,
                &mut slot as *mut Option<F> as Value,
                &mut state,
            )
        };
        if state == 0 {
            Ok(result)
        } else {
            Err(self.take_errinfo())
        }
    }

    fn protect<F: FnOnce() -> Value>(&self, f: F) -> Result<Value, RuntimeError> {
        self.protect_raw(f)
            .map_err(|error| RuntimeError::raised(self.describe_exception(error)))
    }

    fn take_errinfo(&self) -> Value {
        unsafe {
            let error = (self.api.rb_errinfo)();
            (self.api.rb_set_errinfo)(self.nil);
            error
        }
    }

    fn intern(&self, name: &str) -> Id {
        unsafe { (self.api.rb_intern2)(name.as_ptr().cast(), name.len() as c_long) }
    }

    /// Call a method without protection; only use inside `protect`
    unsafe fn call_raw(&self, receiver: Value, method: &str, args: &[Value]) -> Value {
        let id = self.intern(method);
        unsafe { (self.api.rb_funcallv)(receiver, id, args.len() as c_int, args.as_ptr()) }
    }

    fn call(&self, receiver: Value, method: &str) -> Result<Value, RuntimeError> {
        self.protect(|| unsafe { self.call_raw(receiver, method, &[]) })
    }

    fn is_a(&self, value: Value, class: Value) -> bool {
        unsafe { (self.api.rb_obj_is_kind_of)(value, class) == self.qtrue }
    }

    fn describe_exception(&self, error: Value) -> String {
        if error == self.nil {
            return "ruby reported an error without an exception".to_string();
        }

        let message = self
            .protect_raw(|| unsafe { self.call_raw(error, "message", &[]) })
            .ok()
            .and_then(|message| self.string_bytes(message).ok())
            .unwrap_or_else(|| "unknown ruby exception".to_string());

        if !self.include_stack_trace {
            return message;
        }

        let backtrace = self
            .protect_raw(|| unsafe { self.call_raw(error, "backtrace", &[]) })
            .ok()
            .filter(|trace| self.is_a(*trace, self.classes.array))
            .and_then(|trace| {
                let joined = self.protect_raw(|| unsafe {
                    let separator = (self.api.rb_utf8_str_new)(b"\n  ".as_ptr().cast(), 3);
                    self.call_raw(trace, "join", &[separator])
                });
                joined.ok().and_then(|s| self.string_bytes(s).ok())
            });

        match backtrace {
            Some(trace) if !trace.is_empty() => format!("{}\nbacktrace:\n  {}", message, trace),
            _ => message,
        }
    }

    /// Copy the bytes of a Ruby string
    fn string_bytes(&self, string: Value) -> Result<String, RuntimeError> {
        if !self.is_a(string, self.classes.string) {
            return Err(RuntimeError::TypeMismatch { expected: "String" });
        }
        let length = self.to_integer(ForeignValue::from_raw(self.call(string, "bytesize")?))?;
        let mut string = string;
        let ptr = self.protect(|| unsafe { (self.api.rb_string_value_ptr)(&mut string) as Value })?;
        let bytes = unsafe { std::slice::from_raw_parts(ptr as *const u8, length as usize) };
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    fn c_string(text: &str) -> Result<CString, RuntimeError> {
        CString::new(text).map_err(|_| RuntimeError::raised("text contains an interior NUL byte"))
    }
}

fn eval_raw(api: &Api, source: &str) -> Result<Value, RuntimeError> {
    let source = LibRuby::c_string(source)?;
    let mut state: c_int = 0;
    let value = unsafe { (api.rb_eval_string_protect)(source.as_ptr(), &mut state) };
    if state != 0 {
        return Err(RuntimeError::raised(format!(
            "could not evaluate '{}'",
            source.to_string_lossy()
        )));
    }
    Ok(value)
}

impl Runtime for LibRuby {
    fn include_stack_trace(&mut self, include: bool) {
        self.include_stack_trace = include;
    }

    fn uninitialize(&mut self) {
        if self.initialized {
            tracing::debug!("shutting down ruby");
            unsafe { (self.api.ruby_cleanup)(0) };
            self.initialized = false;
        }
    }

    fn nil(&self) -> ForeignValue {
        ForeignValue::from_raw(self.nil)
    }

    fn kind(&self, value: ForeignValue) -> ForeignKind {
        let value = value.as_raw();
        if value == self.nil {
            ForeignKind::Nil
        } else if value == self.qtrue {
            ForeignKind::Boolean(true)
        } else if value == self.qfalse {
            ForeignKind::Boolean(false)
        } else if self.is_a(value, self.classes.array) {
            ForeignKind::Array
        } else if self.is_a(value, self.classes.hash) {
            ForeignKind::Hash
        } else if self.is_a(value, self.classes.string) {
            ForeignKind::String
        } else if self.is_a(value, self.classes.symbol) {
            ForeignKind::Symbol
        } else if self.is_a(value, self.classes.integer) {
            ForeignKind::Integer
        } else if self.is_a(value, self.classes.float) {
            ForeignKind::Float
        } else {
            ForeignKind::Other
        }
    }

    fn is_sequence(&self, value: ForeignValue) -> bool {
        self.is_a(value.as_raw(), self.classes.array)
    }

    fn is_mapping(&self, value: ForeignValue) -> bool {
        self.is_a(value.as_raw(), self.classes.hash)
    }

    fn sequence_len(&self, sequence: ForeignValue) -> Result<i64, RuntimeError> {
        if !self.is_sequence(sequence) {
            return Err(RuntimeError::TypeMismatch { expected: "Array" });
        }
        let length = self.call(sequence.as_raw(), "length")?;
        self.to_integer(ForeignValue::from_raw(length))
    }

    fn sequence_at(&self, sequence: ForeignValue, index: i64) -> Result<ForeignValue, RuntimeError> {
        if !self.is_sequence(sequence) {
            return Err(RuntimeError::TypeMismatch { expected: "Array" });
        }
        let index = c_long::try_from(index)
            .map_err(|_| RuntimeError::raised(format!("index {} is out of range", index)))?;
        let value = unsafe { (self.api.rb_ary_entry)(sequence.as_raw(), index) };
        Ok(ForeignValue::from_raw(value))
    }

    fn mapping_lookup(
        &self,
        mapping: ForeignValue,
        key: ForeignValue,
    ) -> Result<ForeignValue, RuntimeError> {
        if !self.is_mapping(mapping) {
            return Err(RuntimeError::TypeMismatch { expected: "Hash" });
        }
        self.protect(|| unsafe { (self.api.rb_hash_lookup)(mapping.as_raw(), key.as_raw()) })
            .map(ForeignValue::from_raw)
    }

    fn mapping_entries(
        &self,
        mapping: ForeignValue,
    ) -> Result<Vec<(ForeignValue, ForeignValue)>, RuntimeError> {
        if !self.is_mapping(mapping) {
            return Err(RuntimeError::TypeMismatch { expected: "Hash" });
        }
        let pairs = ForeignValue::from_raw(self.call(mapping.as_raw(), "to_a")?);
        let length = self.sequence_len(pairs)?;
        let mut entries = Vec::with_capacity(length.max(0) as usize);
        for index in 0..length {
            let pair = self.sequence_at(pairs, index)?;
            entries.push((self.sequence_at(pair, 0)?, self.sequence_at(pair, 1)?));
        }
        Ok(entries)
    }

    fn string_to_foreign(&self, text: &str) -> Result<ForeignValue, RuntimeError> {
        self.protect(|| unsafe {
            (self.api.rb_utf8_str_new)(text.as_ptr().cast(), text.len() as c_long)
        })
        .map(ForeignValue::from_raw)
    }

    fn symbol_to_foreign(&self, text: &str) -> Result<ForeignValue, RuntimeError> {
        self.protect(|| unsafe {
            let string = (self.api.rb_utf8_str_new)(text.as_ptr().cast(), text.len() as c_long);
            (self.api.rb_str_intern)(string)
        })
        .map(ForeignValue::from_raw)
    }

    fn to_utf8(&self, value: ForeignValue) -> Result<String, RuntimeError> {
        let value = value.as_raw();
        if self.is_a(value, self.classes.string) {
            self.string_bytes(value)
        } else {
            self.string_bytes(self.call(value, "to_s")?)
        }
    }

    fn to_integer(&self, value: ForeignValue) -> Result<i64, RuntimeError> {
        let mut out: c_long = 0;
        self.protect(|| {
            out = unsafe { (self.api.rb_num2long)(value.as_raw()) };
            self.nil
        })?;
        Ok(i64::from(out))
    }

    fn to_float(&self, value: ForeignValue) -> Result<f64, RuntimeError> {
        let mut out = 0.0;
        self.protect(|| {
            out = unsafe { (self.api.rb_num2dbl)(value.as_raw()) };
            self.nil
        })?;
        Ok(out)
    }

    fn global_get(&self, name: &str) -> Result<ForeignValue, RuntimeError> {
        let name = Self::c_string(name)?;
        self.protect(|| unsafe { (self.api.rb_gv_get)(name.as_ptr()) })
            .map(ForeignValue::from_raw)
    }

    fn global_set(&self, name: &str, value: ForeignValue) -> Result<(), RuntimeError> {
        let name = Self::c_string(name)?;
        self.protect(|| unsafe { (self.api.rb_gv_set)(name.as_ptr(), value.as_raw()) })
            .map(|_| ())
    }

    fn eval(&self, source: &str) -> Result<ForeignValue, RuntimeError> {
        let source = Self::c_string(source)?;
        let mut state: c_int = 0;
        let value = unsafe { (self.api.rb_eval_string_protect)(source.as_ptr(), &mut state) };
        if state != 0 {
            let error = self.take_errinfo();
            return Err(RuntimeError::raised(self.describe_exception(error)));
        }
        Ok(ForeignValue::from_raw(value))
    }
}
