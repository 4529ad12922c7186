//! Conversion of foreign values into host-native fact values

use crate::error::RuntimeError;
use crate::runtime::{ForeignKind, Runtime};
use factbridge_api::{FactValue, ForeignValue};
use std::collections::BTreeMap;

/// Nesting limit; deeper (or cyclic) structures are cut off with null
pub const MAX_DEPTH: usize = 64;

/// Copy a foreign value tree into a [`FactValue`] with no foreign parts.
///
/// Symbols become strings, hash keys are stringified and other objects are
/// converted with `to_s`.
pub fn materialize_foreign<R: Runtime + ?Sized>(
    runtime: &R,
    value: ForeignValue,
) -> Result<FactValue, RuntimeError> {
    convert(runtime, value, 0)
}

fn convert<R: Runtime + ?Sized>(
    runtime: &R,
    value: ForeignValue,
    depth: usize,
) -> Result<FactValue, RuntimeError> {
    if depth > MAX_DEPTH {
        tracing::debug!(depth, "value nested too deeply; truncating");
        return Ok(FactValue::Null);
    }

    Ok(match runtime.kind(value) {
        ForeignKind::Nil => FactValue::Null,
        ForeignKind::Boolean(b) => FactValue::Boolean(b),
        ForeignKind::Integer => match runtime.to_integer(value) {
            Ok(i) => FactValue::Integer(i),
            // Bignums
            Err(_) => FactValue::String(runtime.to_utf8(value)?),
        },
        ForeignKind::Float => FactValue::Float(runtime.to_float(value)?),
        ForeignKind::String | ForeignKind::Symbol | ForeignKind::Other => {
            FactValue::String(runtime.to_utf8(value)?)
        }
        ForeignKind::Array => {
            let len = runtime.sequence_len(value)?;
            let mut items = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
            for i in 0..len {
                let item = runtime.sequence_at(value, i)?;
                items.push(convert(runtime, item, depth + 1)?);
            }
            FactValue::Array(items)
        }
        ForeignKind::Hash => {
            let mut map = BTreeMap::new();
            for (key, item) in runtime.mapping_entries(value)? {
                map.insert(runtime.to_utf8(key)?, convert(runtime, item, depth + 1)?);
            }
            FactValue::Map(map)
        }
    })
}

/// Materialize a fact value, descending into host-native containers
pub fn materialize_value<R: Runtime + ?Sized>(
    runtime: &R,
    value: &FactValue,
) -> Result<FactValue, RuntimeError> {
    Ok(match value {
        FactValue::Foreign(foreign) => materialize_foreign(runtime, foreign.value())?,
        FactValue::Array(items) => FactValue::Array(
            items
                .iter()
                .map(|item| materialize_value(runtime, item))
                .collect::<Result<_, _>>()?,
        ),
        FactValue::Map(map) => FactValue::Map(
            map.iter()
                .map(|(key, item)| Ok((key.clone(), materialize_value(runtime, item)?)))
                .collect::<Result<_, RuntimeError>>()?,
        ),
        other => other.clone(),
    })
}
