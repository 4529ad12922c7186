//! Fact values
//!
//! Facts are mostly plain host data, but facts produced by Ruby custom facts
//! keep their concrete representation inside the embedded runtime. Those are
//! carried as [`FactValue::Foreign`] and only dereferenced while the runtime
//! is initialized.

use serde::ser::{Error as _, SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Opaque token for a value owned by the embedded runtime.
///
/// The token is only meaningful to the runtime that produced it. It carries
/// no ownership: whoever creates a foreign-backed fact is responsible for
/// keeping the underlying object alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForeignValue(usize);

impl ForeignValue {
    /// Wrap a raw runtime handle
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// The raw runtime handle
    pub const fn as_raw(self) -> usize {
        self.0
    }
}

/// A fact value backed by the embedded runtime, with its child cache.
///
/// Children are wrappers created by deep-path lookups under this value. The
/// cache is append-only: once a canonical key has a child, every later lookup
/// of that key returns the same `Arc`.
pub struct ForeignFact {
    value: ForeignValue,
    children: Mutex<HashMap<String, Arc<ForeignFact>>>,
}

impl ForeignFact {
    /// Create a new foreign-backed fact with an empty child cache
    pub fn new(value: ForeignValue) -> Arc<Self> {
        Arc::new(Self {
            value,
            children: Mutex::new(HashMap::new()),
        })
    }

    /// The live runtime value
    pub fn value(&self) -> ForeignValue {
        self.value
    }

    /// Get a previously wrapped child by canonical key
    pub fn child(&self, key: &str) -> Option<Arc<ForeignFact>> {
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Wrap a runtime value as a child registered under `key`.
    ///
    /// If a child already exists for `key` it is returned unchanged.
    pub fn wrap_child(&self, value: ForeignValue, key: String) -> Arc<ForeignFact> {
        let mut children = self.children.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(children.entry(key).or_insert_with(|| ForeignFact::new(value)))
    }

    /// Number of cached children
    pub fn child_count(&self) -> usize {
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl fmt::Debug for ForeignFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignFact")
            .field("value", &self.value)
            .field("children", &self.child_count())
            .finish()
    }
}

/// A fact value
#[derive(Debug, Clone)]
pub enum FactValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Array(Vec<FactValue>),
    Map(BTreeMap<String, FactValue>),
    /// Value living inside the embedded runtime
    Foreign(Arc<ForeignFact>),
}

/// Outcome of walking a path through host-native containers
#[derive(Debug)]
pub enum Navigation<'a, S> {
    /// The path resolved entirely on the host side
    Found(&'a FactValue),
    /// A foreign-backed value was reached; `rest` still has to be resolved
    /// inside the runtime
    Foreign {
        value: &'a Arc<ForeignFact>,
        rest: &'a [S],
    },
    NotFound,
}

impl FactValue {
    /// Wrap a runtime value as a new foreign-backed fact
    pub fn foreign(value: ForeignValue) -> Self {
        Self::Foreign(ForeignFact::new(value))
    }

    pub fn is_foreign(&self) -> bool {
        matches!(self, Self::Foreign(_))
    }

    pub fn as_foreign(&self) -> Option<&Arc<ForeignFact>> {
        match self {
            Self::Foreign(foreign) => Some(foreign),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// True if no foreign-backed value appears anywhere in this value
    pub fn is_native(&self) -> bool {
        match self {
            Self::Foreign(_) => false,
            Self::Array(items) => items.iter().all(FactValue::is_native),
            Self::Map(map) => map.values().all(FactValue::is_native),
            _ => true,
        }
    }

    /// Walk `segments` through host-native arrays and maps.
    ///
    /// Arrays are indexed by non-negative integer segments, maps by key.
    /// Navigation stops at the first foreign-backed value and reports the
    /// unresolved tail.
    pub fn navigate<'a, S: AsRef<str>>(&'a self, segments: &'a [S]) -> Navigation<'a, S> {
        let mut current = self;
        for (position, segment) in segments.iter().enumerate() {
            let segment = segment.as_ref();
            current = match current {
                Self::Foreign(value) => {
                    return Navigation::Foreign {
                        value,
                        rest: &segments[position..],
                    }
                }
                Self::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                    Some(item) => item,
                    None => return Navigation::NotFound,
                },
                Self::Map(map) => match map.get(segment) {
                    Some(item) => item,
                    None => return Navigation::NotFound,
                },
                _ => return Navigation::NotFound,
            };
        }
        Navigation::Found(current)
    }
}

impl PartialEq for FactValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Foreign(a), Self::Foreign(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Serialize for FactValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Boolean(b) => serializer.serialize_bool(*b),
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::String(s) => serializer.serialize_str(s),
            Self::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
            Self::Foreign(_) => Err(S::Error::custom(
                "foreign-backed value must be materialized before serialization",
            )),
        }
    }
}

impl From<&str> for FactValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FactValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for FactValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for FactValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<f64> for FactValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<serde_json::Value> for FactValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Boolean(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(FactValue::from).collect()),
            Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(key, value)| (key, FactValue::from(value)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wrap_child_is_identity_stable() {
        let parent = ForeignFact::new(ForeignValue::from_raw(8));
        let first = parent.wrap_child(ForeignValue::from_raw(16), ".a".to_string());
        let second = parent.wrap_child(ForeignValue::from_raw(32), ".a".to_string());

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.value(), ForeignValue::from_raw(16));
        assert_eq!(parent.child_count(), 1);
        assert!(Arc::ptr_eq(&parent.child(".a").unwrap(), &first));
        assert!(parent.child(".b").is_none());
    }

    #[test]
    fn test_navigate_native_containers() {
        let value = FactValue::from(json!({"os": {"release": {"major": "12"}}, "list": [1, 2]}));

        match value.navigate(&["os", "release", "major"]) {
            Navigation::Found(found) => assert_eq!(found.as_str(), Some("12")),
            other => panic!("Expected Found, got {:?}", other),
        }
        match value.navigate(&["list", "1"]) {
            Navigation::Found(found) => assert_eq!(found, &FactValue::Integer(2)),
            other => panic!("Expected Found, got {:?}", other),
        }
        assert!(matches!(value.navigate(&["list", "2"]), Navigation::NotFound));
        assert!(matches!(value.navigate(&["list", "-1"]), Navigation::NotFound));
        assert!(matches!(value.navigate(&["os", "missing"]), Navigation::NotFound));
    }

    #[test]
    fn test_navigate_stops_at_foreign_value() {
        let mut map = BTreeMap::new();
        map.insert("custom".to_string(), FactValue::foreign(ForeignValue::from_raw(40)));
        let value = FactValue::Map(map);

        match value.navigate(&["custom", "a", "b"]) {
            Navigation::Foreign { value, rest } => {
                assert_eq!(value.value(), ForeignValue::from_raw(40));
                assert_eq!(rest, &["a", "b"]);
            }
            other => panic!("Expected Foreign, got {:?}", other),
        }
    }

    #[test]
    fn test_foreign_values_compare_by_identity() {
        let a = FactValue::foreign(ForeignValue::from_raw(1));
        let b = FactValue::foreign(ForeignValue::from_raw(1));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_serialize_native_value() {
        let value = FactValue::from(json!({"a": [true, null, 1.5, "x"]}));
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            json!({"a": [true, null, 1.5, "x"]})
        );
    }

    #[test]
    fn test_serialize_foreign_value_fails() {
        let value = FactValue::Array(vec![FactValue::foreign(ForeignValue::from_raw(1))]);
        assert!(!value.is_native());
        assert!(serde_json::to_value(&value).is_err());
    }
}
