//! # Three-Way Diff
//!
//! Decides whether a live object has to be written and computes the minimal
//! JSON merge patch (RFC 7386) that brings it to the desired payload.
//!
//! The three inputs are:
//! - **original**: the last-applied record stored on the live object
//! - **modified**: the freshly rendered desired payload
//! - **current**: the live object as read from the store
//!
//! The patch carries what changed between original and modified (additions,
//! changes and removals) plus whatever drifted in current, and is applied onto
//! the live object. Fields that neither side manages (status, server defaults,
//! generated identifiers) are left alone.

use crate::constants::LAST_APPLIED_ANNOTATION;
use serde_json::{Map, Value};
use tracing::warn;

/// Metadata populated by the server; never part of a diff or a last-applied record
const SERVER_METADATA_FIELDS: &[&str] = &[
    "resourceVersion",
    "uid",
    "creationTimestamp",
    "generation",
    "managedFields",
    "selfLink",
    "deletionTimestamp",
    "deletionGracePeriodSeconds",
];

/// Result of comparing a live object with its desired payload
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    Unchanged,
    Patch(Value),
}

impl Diff {
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged)
    }
}

/// Compare `live` with `desired` using `last_applied` as the common ancestor.
pub fn should_write(live: &Value, last_applied: Option<&Value>, desired: &Value) -> Diff {
    let current = normalize(live);
    let modified = normalize(desired);
    let original = last_applied.map(normalize);

    let patch = three_way_patch(original.as_ref(), &modified, &current);
    if patch.as_object().is_some_and(Map::is_empty) {
        Diff::Unchanged
    } else {
        Diff::Patch(patch)
    }
}

/// Strip status, server-populated metadata, the last-applied annotation and
/// null values from a payload.
pub fn normalize(payload: &Value) -> Value {
    let mut out = strip_nulls(payload);
    if let Some(root) = out.as_object_mut() {
        root.remove("status");
        if let Some(metadata) = root.get_mut("metadata").and_then(Value::as_object_mut) {
            for field in SERVER_METADATA_FIELDS {
                metadata.remove(*field);
            }
            let annotations_empty = metadata
                .get_mut("annotations")
                .and_then(Value::as_object_mut)
                .is_some_and(|annotations| {
                    annotations.remove(LAST_APPLIED_ANNOTATION);
                    annotations.is_empty()
                });
            if annotations_empty {
                metadata.remove("annotations");
            }
        }
    }
    out
}

fn strip_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_nulls).collect()),
        other => other.clone(),
    }
}

/// Read the last-applied record from a live object.
///
/// A missing or unreadable record yields `None`, which degrades the diff to a
/// two-way comparison (drift repair without removals).
pub fn last_applied(live: &Value) -> Option<Value> {
    let raw = live
        .pointer("/metadata/annotations")?
        .get(LAST_APPLIED_ANNOTATION)?
        .as_str()?;
    match serde_json::from_str(raw) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(error = %e, "ignoring unreadable last-applied record");
            None
        }
    }
}

/// Attach the last-applied record of `payload` to `payload` itself.
///
/// The record is the normalized payload, so it never contains server fields or
/// a nested copy of the annotation.
pub fn record_last_applied(payload: &mut Value) -> Result<(), serde_json::Error> {
    let record = serde_json::to_string(&normalize(payload))?;
    if let Some(root) = payload.as_object_mut() {
        let metadata = root
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(metadata) = metadata.as_object_mut() {
            let annotations = metadata
                .entry("annotations")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(annotations) = annotations.as_object_mut() {
                annotations.insert(LAST_APPLIED_ANNOTATION.to_string(), Value::String(record));
            }
        }
    }
    Ok(())
}

/// Compute a merge patch over normalized documents.
pub fn three_way_patch(original: Option<&Value>, modified: &Value, current: &Value) -> Value {
    match (modified, current) {
        (Value::Object(m), Value::Object(c)) => {
            Value::Object(diff_objects(original.and_then(Value::as_object), m, c))
        }
        _ if contains(current, modified) => Value::Object(Map::new()),
        _ => modified.clone(),
    }
}

fn diff_objects(
    original: Option<&Map<String, Value>>,
    modified: &Map<String, Value>,
    current: &Map<String, Value>,
) -> Map<String, Value> {
    let mut patch = Map::new();

    for (key, m) in modified {
        let o = original.and_then(|o| o.get(key));
        let c = current.get(key);

        if let (Value::Object(mo), Some(Value::Object(co))) = (m, c) {
            let nested = diff_objects(o.and_then(Value::as_object), mo, co);
            if !nested.is_empty() {
                patch.insert(key.clone(), Value::Object(nested));
            }
            continue;
        }

        // Scalars and arrays are replaced whole, either when live drifted from the
        // desired value or when desired moved away from a value live still holds.
        let drifted = c.is_none_or(|c| !contains(c, m));
        let moved = o.is_some_and(|o| o != m && c.is_some_and(|c| contains(c, o)));
        if drifted || moved {
            patch.insert(key.clone(), m.clone());
        }
    }

    if let Some(original) = original {
        for key in original.keys() {
            if !modified.contains_key(key) && current.contains_key(key) {
                patch.insert(key.clone(), Value::Null);
            }
        }
    }

    patch
}

/// Whether every field of `wanted` is present with the same value in `actual`.
///
/// Arrays must match element by element, but each element may carry extra
/// fields (server defaults inside list items).
pub fn contains(actual: &Value, wanted: &Value) -> bool {
    match (actual, wanted) {
        (Value::Object(a), Value::Object(w)) => w
            .iter()
            .all(|(k, wv)| a.get(k).is_some_and(|av| contains(av, wv))),
        (Value::Array(a), Value::Array(w)) => {
            a.len() == w.len() && a.iter().zip(w).all(|(av, wv)| contains(av, wv))
        }
        _ => actual == wanted,
    }
}

/// Apply an RFC 7386 JSON merge patch onto `target`.
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                apply_merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}
