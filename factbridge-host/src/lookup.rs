//! Deep-path lookup into foreign-backed facts
//!
//! Host-side navigation stops at the first foreign-backed value. The rest of
//! the path is resolved here, inside the runtime: arrays are indexed by
//! integer segments, hashes are looked up by string key and then by symbol.
//! Every resolved child is cached on the owning fact under its canonical key,
//! so repeated lookups return the same wrapper.

use crate::runtime::{ForeignKind, Runtime};
use factbridge_api::{canonical_key, FactValue, ForeignFact, ForeignValue};
use std::sync::Arc;

/// Resolve `segments` under a foreign-backed value.
///
/// Returns `None` if `value` is not foreign-backed, if any step fails, or if
/// the path leads to nil. Failures are logged at debug level.
pub fn lookup_in<R, S>(
    runtime: Option<&R>,
    value: &FactValue,
    segments: &[S],
) -> Option<Arc<ForeignFact>>
where
    R: Runtime + ?Sized,
    S: AsRef<str>,
{
    let owner = value.as_foreign()?;

    let key = canonical_key(segments);
    if let Some(child) = owner.child(&key) {
        return Some(child);
    }

    let Some(runtime) = runtime else {
        tracing::debug!(path = %key, "cannot lookup element: ruby is not initialized");
        return None;
    };

    let mut current = owner.value();
    for segment in segments {
        current = step(runtime, current, segment.as_ref())?;
        if runtime.is_nil(current) {
            return None;
        }
    }

    Some(owner.wrap_child(current, key))
}

fn step<R: Runtime + ?Sized>(runtime: &R, node: ForeignValue, segment: &str) -> Option<ForeignValue> {
    let result = match runtime.kind(node) {
        ForeignKind::Array => return index(runtime, node, segment),
        ForeignKind::Hash => runtime
            .string_to_foreign(segment)
            .and_then(|key| runtime.mapping_lookup(node, key))
            .and_then(|found| {
                if runtime.is_nil(found) {
                    let key = runtime.symbol_to_foreign(segment)?;
                    runtime.mapping_lookup(node, key)
                } else {
                    Ok(found)
                }
            }),
        _ => {
            tracing::debug!(
                "cannot lookup element \"{}\": container is not an array or hash.",
                segment
            );
            Ok(node)
        }
    };

    match result {
        Ok(next) => Some(next),
        Err(e) => {
            tracing::debug!(error = %e, "cannot lookup element \"{}\"", segment);
            None
        }
    }
}

fn index<R: Runtime + ?Sized>(runtime: &R, array: ForeignValue, segment: &str) -> Option<ForeignValue> {
    let Ok(index) = segment.parse::<i64>() else {
        tracing::debug!(
            "cannot lookup an array element with \"{}\": expected an integral value.",
            segment
        );
        return None;
    };
    if index < 0 {
        tracing::debug!(
            "cannot lookup an array element with \"{}\": expected a non-negative value.",
            segment
        );
        return None;
    }

    let length = match runtime.sequence_len(array) {
        Ok(length) => length,
        Err(e) => {
            tracing::debug!(error = %e, "cannot determine array length");
            return None;
        }
    };
    if length == 0 {
        tracing::debug!("cannot lookup an array element with \"{}\": the array is empty.", segment);
        return None;
    }
    if index >= length {
        tracing::debug!(
            "cannot lookup an array element with \"{}\": expected an integral value between 0 and {} (inclusive).",
            segment,
            length - 1
        );
        return None;
    }

    match runtime.sequence_at(array, index) {
        Ok(element) => Some(element),
        Err(e) => {
            tracing::debug!(error = %e, "cannot lookup an array element with \"{}\"", segment);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{SimValue, SimulatedRuntime};

    fn numbers(runtime: &SimulatedRuntime) -> FactValue {
        let items = vec![runtime.integer(10), runtime.integer(20), runtime.integer(30)];
        FactValue::foreign(runtime.array(items))
    }

    #[test]
    fn test_not_foreign() {
        let runtime = SimulatedRuntime::new();
        let value = FactValue::from("linux");
        assert!(lookup_in(Some(&runtime), &value, &["0"]).is_none());
    }

    #[test]
    fn test_array_index() {
        let runtime = SimulatedRuntime::new();
        let value = numbers(&runtime);

        let child = lookup_in(Some(&runtime), &value, &["1"]).unwrap();
        assert_eq!(runtime.get(child.value()), SimValue::Integer(20));
    }

    #[test]
    fn test_array_rejects_bad_segments() {
        let runtime = SimulatedRuntime::new();
        let value = numbers(&runtime);

        for segment in ["3", "-1", "abc", "1abc", ""] {
            assert!(
                lookup_in(Some(&runtime), &value, &[segment]).is_none(),
                "segment {:?}",
                segment
            );
        }
        assert_eq!(value.as_foreign().unwrap().child_count(), 0);
    }

    #[test]
    fn test_empty_array() {
        let runtime = SimulatedRuntime::new();
        let value = FactValue::foreign(runtime.array(vec![]));
        assert!(lookup_in(Some(&runtime), &value, &["0"]).is_none());
    }

    #[test]
    fn test_hash_string_then_symbol() {
        let runtime = SimulatedRuntime::new();
        let by_string = runtime.string("from string");
        let by_symbol = runtime.string("from symbol");
        let symbol_only = runtime.string("linux");
        let entries = vec![
            (runtime.string("both"), by_string),
            (runtime.symbol("both"), by_symbol),
            (runtime.symbol("os"), symbol_only),
        ];
        let value = FactValue::foreign(runtime.hash(entries));

        let both = lookup_in(Some(&runtime), &value, &["both"]).unwrap();
        assert_eq!(both.value(), by_string);
        let os = lookup_in(Some(&runtime), &value, &["os"]).unwrap();
        assert_eq!(os.value(), symbol_only);
        assert!(lookup_in(Some(&runtime), &value, &["missing"]).is_none());
    }

    #[test]
    fn test_scalar_container_keeps_node() {
        let runtime = SimulatedRuntime::new();
        let text = runtime.string("linux");
        let value = FactValue::foreign(text);

        let child = lookup_in(Some(&runtime), &value, &["anything"]).unwrap();
        assert_eq!(child.value(), text);
    }

    #[test]
    fn test_nil_element_is_not_wrapped() {
        let runtime = SimulatedRuntime::new();
        let nil = runtime.nil();
        let value = FactValue::foreign(runtime.array(vec![nil]));
        assert!(lookup_in(Some(&runtime), &value, &["0"]).is_none());
    }

    #[test]
    fn test_cache_hit_skips_runtime() {
        let runtime = SimulatedRuntime::new();
        let value = numbers(&runtime);

        let first = lookup_in(Some(&runtime), &value, &["2"]).unwrap();
        let traversals = runtime.traversals();
        let second = lookup_in(Some(&runtime), &value, &["2"]).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(runtime.traversals(), traversals);

        // Cached children stay reachable without a runtime.
        let cached = lookup_in(None::<&SimulatedRuntime>, &value, &["2"]).unwrap();
        assert!(Arc::ptr_eq(&first, &cached));
        assert!(lookup_in(None::<&SimulatedRuntime>, &value, &["0"]).is_none());
    }
}
