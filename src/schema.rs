//! Schema decomposition and dotted-path addressing.
//!
//! A schema is, conceptually, a mapping from string keys to values of any
//! kind, where functions at any depth are method definitions and everything
//! else is configuration payload. Rust has no way to discover "this JSON leaf
//! used to be a closure" by walking a value tree, so callers build the
//! method table explicitly: a [`MethodDirectory`] of dotted paths alongside a
//! `serde_json::Value` residual that holds everything else.
//!
//! [`decompose`] still performs that split in one step — it exists so that a
//! schema assembled as a single nested `serde_json::Value` (with method
//! placeholders) can be turned into directory + residual without the caller
//! walking the tree by hand, and so the idempotence property below is
//! testable directly.

use serde_json::Value;
use std::collections::BTreeSet;

/// Marker value used in a schema tree to mark a function slot. Decomposition
/// records its dotted path in the directory and removes it from the
/// residual.
pub const METHOD_MARKER: &str = "__method__";

/// An ordered set of dotted paths naming every function reachable from a
/// schema's root.
pub type MethodDirectory = BTreeSet<String>;

/// The result of decomposing a schema: its directory of method paths and the
/// residual configuration tree with every function-valued leaf removed.
#[derive(Debug, Clone)]
pub struct Decomposed {
    pub directory: MethodDirectory,
    pub residual: Value,
}

/// Decompose a schema tree into a method directory and a residual tree.
///
/// Traversal is depth-first. A map entry whose value is the object
/// `{"__method__": true}` is treated as a function-valued leaf: its dotted
/// path is recorded in the directory and the entry is dropped from the
/// residual. Arrays and all other leaves (including empty maps) are
/// preserved verbatim. Idempotent: decomposing an already-decomposed
/// residual yields an empty directory and an unchanged residual, since no
/// `__method__` markers remain.
pub fn decompose(schema: Value) -> Decomposed {
    let mut directory = MethodDirectory::new();
    let residual = strip_methods(schema, "", &mut directory);
    Decomposed {
        directory,
        residual,
    }
}

fn is_method_marker(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.get(METHOD_MARKER) == Some(&Value::Bool(true)))
}

fn strip_methods(value: Value, path: &str, directory: &mut MethodDirectory) -> Value {
    match value {
        Value::Object(map) => {
            if is_method_marker(&Value::Object(map.clone())) {
                directory.insert(path.to_string());
                return Value::Null;
            }
            let mut residual = serde_json::Map::new();
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                if is_method_marker(&child) {
                    directory.insert(child_path);
                    continue;
                }
                let stripped = strip_methods(child, &child_path, directory);
                residual.insert(key, stripped);
            }
            Value::Object(residual)
        }
        // Arrays and scalars are opaque leaves; only object entries can hold methods.
        other => other,
    }
}

/// Read a dotted path out of a JSON value, returning `None` if any segment
/// along the way is missing. Numeric segments index into arrays.
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write a value at a dotted path, creating intermediate maps (or arrays,
/// for numeric segments) as needed. A segment that parses as an integer
/// addresses an array index rather than an object key.
pub fn set_path(root: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    set_path_segments(root, &segments, value);
}

fn set_path_segments(current: &mut Value, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *current = value;
        return;
    };

    let next_is_numeric = rest.first().and_then(|s| s.parse::<usize>().ok());
    let head_numeric = head.parse::<usize>().ok();

    if let Some(index) = head_numeric {
        if !current.is_array() {
            *current = Value::Array(Vec::new());
        }
        let arr = current.as_array_mut().unwrap();
        while arr.len() <= index {
            arr.push(Value::Null);
        }
        if rest.is_empty() {
            arr[index] = value;
        } else {
            let slot = &mut arr[index];
            if slot.is_null() {
                *slot = if next_is_numeric.is_some() {
                    Value::Array(Vec::new())
                } else {
                    Value::Object(serde_json::Map::new())
                };
            }
            set_path_segments(slot, rest, value);
        }
        return;
    }

    if !current.is_object() {
        *current = Value::Object(serde_json::Map::new());
    }
    let map = current.as_object_mut().unwrap();
    if rest.is_empty() {
        map.insert((*head).to_string(), value);
        return;
    }
    let slot = map.entry((*head).to_string()).or_insert_with(|| {
        if next_is_numeric.is_some() {
            Value::Array(Vec::new())
        } else {
            Value::Object(serde_json::Map::new())
        }
    });
    set_path_segments(slot, rest, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn method() -> Value {
        json!({ METHOD_MARKER: true })
    }

    #[test]
    fn decomposes_nested_functions_and_preserves_data() {
        let schema = json!({
            "math": { "add": method(), "precision": 2 },
            "bias": method(),
            "label": "demo",
            "empty": {},
        });

        let decomposed = decompose(schema);
        assert_eq!(
            decomposed.directory,
            MethodDirectory::from(["math.add".to_string(), "bias".to_string()])
        );
        assert_eq!(
            decomposed.residual,
            json!({
                "math": { "precision": 2 },
                "label": "demo",
                "empty": {},
            })
        );
    }

    #[test]
    fn decomposition_is_idempotent() {
        let schema = json!({ "math": { "add": method() }, "label": "demo" });
        let first = decompose(schema);
        let second = decompose(first.residual.clone());
        assert!(second.directory.is_empty());
        assert_eq!(second.residual, first.residual);
    }

    #[test]
    fn set_path_creates_intermediate_maps_and_arrays() {
        let mut root = Value::Null;
        set_path(&mut root, "a.b", json!(1));
        set_path(&mut root, "a.list.0", json!("x"));
        set_path(&mut root, "a.list.2", json!("z"));

        assert_eq!(get_path(&root, "a.b"), Some(&json!(1)));
        assert_eq!(get_path(&root, "a.list.0"), Some(&json!("x")));
        assert_eq!(get_path(&root, "a.list.1"), Some(&Value::Null));
        assert_eq!(get_path(&root, "a.list.2"), Some(&json!("z")));
    }

    #[test]
    fn get_path_returns_none_for_missing_segments() {
        let root = json!({ "a": { "b": 1 } });
        assert_eq!(get_path(&root, "a.c"), None);
        assert_eq!(get_path(&root, "a.b.c"), None);
    }
}
