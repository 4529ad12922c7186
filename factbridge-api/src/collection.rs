//! Host-owned fact collection

use crate::value::{FactValue, Navigation};
use std::collections::BTreeMap;

/// A keyed store of named facts.
///
/// Fact names are case-insensitive and stored lowercased.
#[derive(Debug, Clone, Default)]
pub struct FactCollection {
    facts: BTreeMap<String, FactValue>,
}

impl FactCollection {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a fact, returning the previous value
    pub fn add(&mut self, name: impl Into<String>, value: FactValue) -> Option<FactValue> {
        self.facts.insert(name.into().to_lowercase(), value)
    }

    /// Get a fact by name
    pub fn get(&self, name: &str) -> Option<&FactValue> {
        self.facts.get(&name.to_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Iterate facts in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FactValue)> {
        self.facts.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.facts.keys().map(String::as_str)
    }

    /// Navigate a path whose first segment is a fact name
    pub fn navigate<'a, S: AsRef<str>>(&'a self, segments: &'a [S]) -> Navigation<'a, S> {
        let Some((name, rest)) = segments.split_first() else {
            return Navigation::NotFound;
        };
        match self.get(name.as_ref()) {
            Some(value) => value.navigate(rest),
            None => Navigation::NotFound,
        }
    }

    /// JSON object of every fact that holds no foreign-backed value
    pub fn native_json(&self) -> serde_json::Value {
        let map = self
            .facts
            .iter()
            .filter(|(_, value)| value.is_native())
            .filter_map(|(name, value)| {
                serde_json::to_value(value)
                    .ok()
                    .map(|json| (name.clone(), json))
            })
            .collect();
        serde_json::Value::Object(map)
    }
}
