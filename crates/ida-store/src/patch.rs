//! JSON patch (RFC 6902 subset) and merge patch (RFC 7396).
//!
//! Paths are RFC 6901 JSON pointers. Node names may contain `/` or `~`, so
//! every path segment built from user data must go through
//! [`escape_segment`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Operations understood by [`apply_json_patch`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    /// Require the value at `path` to equal `value`. A missing member
    /// compares equal to `null`.
    Test,
    /// Insert or overwrite the member at `path`.
    Add,
    /// Overwrite an existing member at `path`.
    Replace,
    /// Delete an existing member at `path`.
    Remove,
}

/// One `{op, path, value}` entry of a JSON patch document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonPatch {
    pub op: PatchOp,
    pub path: String,
    #[serde(default)]
    pub value: Value,
}

impl JsonPatch {
    pub fn test(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Test,
            path: path.into(),
            value,
        }
    }

    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value,
        }
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.into(),
            value,
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOp::Remove,
            path: path.into(),
            value: Value::Null,
        }
    }
}

/// Body of a patch request.
#[derive(Clone, Debug, PartialEq)]
pub enum PatchBody {
    /// Ordered JSON patch operations, applied atomically.
    Json(Vec<JsonPatch>),
    /// Merge patch document.
    Merge(Value),
}

/// Reasons a JSON patch cannot be applied.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    #[error("test failed at {path}")]
    TestFailed { path: String },

    #[error("path not found: {path}")]
    PathNotFound { path: String },

    #[error("invalid pointer: {path}")]
    InvalidPointer { path: String },

    #[error("cannot apply to {path}: {reason}")]
    InvalidTarget { path: String, reason: String },
}

/// Escape one pointer segment (`~` -> `~0`, `/` -> `~1`).
pub fn escape_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

fn unescape_segment(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

/// Split a non-root pointer into its parent pointer and unescaped last key.
fn split_pointer(path: &str) -> Result<(&str, String), PatchError> {
    if !path.starts_with('/') {
        return Err(PatchError::InvalidPointer {
            path: path.to_string(),
        });
    }
    match path.rsplit_once('/') {
        Some((parent, last)) => Ok((parent, unescape_segment(last))),
        None => Err(PatchError::InvalidPointer {
            path: path.to_string(),
        }),
    }
}

fn array_index(path: &str, key: &str, len: usize, allow_end: bool) -> Result<usize, PatchError> {
    let index = key.parse::<usize>().map_err(|_| PatchError::InvalidPointer {
        path: path.to_string(),
    })?;
    let limit = if allow_end { len + 1 } else { len };
    if index >= limit {
        return Err(PatchError::PathNotFound {
            path: path.to_string(),
        });
    }
    Ok(index)
}

fn parent_mut<'a>(doc: &'a mut Value, path: &str, parent: &str) -> Result<&'a mut Value, PatchError> {
    doc.pointer_mut(parent).ok_or_else(|| PatchError::PathNotFound {
        path: path.to_string(),
    })
}

fn apply_op(doc: &mut Value, op: &JsonPatch) -> Result<(), PatchError> {
    let path = op.path.as_str();
    match op.op {
        PatchOp::Test => {
            let actual = if path.is_empty() {
                Some(&*doc)
            } else {
                doc.pointer(path)
            };
            let matches = match actual {
                Some(v) => *v == op.value,
                None => op.value.is_null(),
            };
            if !matches {
                return Err(PatchError::TestFailed {
                    path: path.to_string(),
                });
            }
        }
        PatchOp::Add => {
            if path.is_empty() {
                *doc = op.value.clone();
                return Ok(());
            }
            let (parent, key) = split_pointer(path)?;
            match parent_mut(doc, path, parent)? {
                Value::Object(map) => {
                    map.insert(key, op.value.clone());
                }
                Value::Array(items) => {
                    if key == "-" {
                        items.push(op.value.clone());
                    } else {
                        let index = array_index(path, &key, items.len(), true)?;
                        items.insert(index, op.value.clone());
                    }
                }
                other => {
                    return Err(PatchError::InvalidTarget {
                        path: path.to_string(),
                        reason: format!("parent is {}", type_name(other)),
                    })
                }
            }
        }
        PatchOp::Replace => {
            if path.is_empty() {
                *doc = op.value.clone();
                return Ok(());
            }
            let (parent, key) = split_pointer(path)?;
            match parent_mut(doc, path, parent)? {
                Value::Object(map) => match map.get_mut(&key) {
                    Some(slot) => *slot = op.value.clone(),
                    None => {
                        return Err(PatchError::PathNotFound {
                            path: path.to_string(),
                        })
                    }
                },
                Value::Array(items) => {
                    let index = array_index(path, &key, items.len(), false)?;
                    items[index] = op.value.clone();
                }
                other => {
                    return Err(PatchError::InvalidTarget {
                        path: path.to_string(),
                        reason: format!("parent is {}", type_name(other)),
                    })
                }
            }
        }
        PatchOp::Remove => {
            let (parent, key) = split_pointer(path)?;
            match parent_mut(doc, path, parent)? {
                Value::Object(map) => {
                    if map.remove(&key).is_none() {
                        return Err(PatchError::PathNotFound {
                            path: path.to_string(),
                        });
                    }
                }
                Value::Array(items) => {
                    let index = array_index(path, &key, items.len(), false)?;
                    items.remove(index);
                }
                other => {
                    return Err(PatchError::InvalidTarget {
                        path: path.to_string(),
                        reason: format!("parent is {}", type_name(other)),
                    })
                }
            }
        }
    }
    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Apply `ops` in order. Either every operation applies or `doc` is left
/// untouched.
pub fn apply_json_patch(doc: &mut Value, ops: &[JsonPatch]) -> Result<(), PatchError> {
    let mut working = doc.clone();
    for op in ops {
        apply_op(&mut working, op)?;
    }
    *doc = working;
    Ok(())
}

/// Apply an RFC 7396 merge patch: objects merge recursively, `null` deletes,
/// anything else replaces.
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                apply_merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serialized_shape() {
        let patch = vec![
            JsonPatch::test("/status", Value::Null),
            JsonPatch::remove("/status/nodes/a"),
        ];
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            json,
            json!([
                { "op": "test", "path": "/status", "value": null },
                { "op": "remove", "path": "/status/nodes/a", "value": null },
            ])
        );
    }

    #[test]
    fn test_null_passes_on_missing_member() {
        let mut doc = json!({ "metadata": {} });
        let ops = vec![
            JsonPatch::test("/status", Value::Null),
            JsonPatch::add("/status", json!({ "nodes": { "a": "t1" } })),
        ];
        apply_json_patch(&mut doc, &ops).unwrap();
        assert_eq!(doc["status"]["nodes"]["a"], json!("t1"));
    }

    #[test]
    fn test_null_fails_on_present_member_and_leaves_doc() {
        let mut doc = json!({ "status": { "nodes": {} } });
        let before = doc.clone();
        let ops = vec![
            JsonPatch::test("/status", Value::Null),
            JsonPatch::add("/status", json!({ "nodes": { "a": "t1" } })),
        ];
        let err = apply_json_patch(&mut doc, &ops).unwrap_err();
        assert_eq!(err, PatchError::TestFailed { path: "/status".into() });
        assert_eq!(doc, before);
    }

    #[test]
    fn replace_requires_existing_member() {
        let mut doc = json!({ "status": { "nodes": { "a": "t1" } } });
        apply_json_patch(&mut doc, &[JsonPatch::replace("/status/nodes/a", json!("t2"))]).unwrap();
        assert_eq!(doc["status"]["nodes"]["a"], json!("t2"));

        let err = apply_json_patch(&mut doc, &[JsonPatch::replace("/status/nodes/b", json!("t2"))])
            .unwrap_err();
        assert!(matches!(err, PatchError::PathNotFound { .. }));
    }

    #[test]
    fn remove_member() {
        let mut doc = json!({ "status": { "nodes": { "a": "t1", "b": "t2" } } });
        apply_json_patch(&mut doc, &[JsonPatch::remove("/status/nodes/a")]).unwrap();
        assert_eq!(doc, json!({ "status": { "nodes": { "b": "t2" } } }));

        let err = apply_json_patch(&mut doc, &[JsonPatch::remove("/status/nodes/a")]).unwrap_err();
        assert!(matches!(err, PatchError::PathNotFound { .. }));
    }

    #[test]
    fn add_under_missing_parent_fails() {
        let mut doc = json!({});
        let err = apply_json_patch(&mut doc, &[JsonPatch::add("/status/nodes/a", json!("t"))])
            .unwrap_err();
        assert!(matches!(err, PatchError::PathNotFound { .. }));
    }

    #[test]
    fn escaped_segments() {
        let node = "rack/1~a";
        let path = format!("/nodes/{}", escape_segment(node));
        assert_eq!(path, "/nodes/rack~11~0a");

        let mut doc = json!({ "nodes": {} });
        apply_json_patch(&mut doc, &[JsonPatch::add(path, json!(1))]).unwrap();
        assert_eq!(doc["nodes"][node], json!(1));
    }

    #[test]
    fn array_operations() {
        let mut doc = json!({ "items": [1, 2] });
        apply_json_patch(
            &mut doc,
            &[
                JsonPatch::add("/items/-", json!(3)),
                JsonPatch::add("/items/0", json!(0)),
                JsonPatch::replace("/items/1", json!(10)),
                JsonPatch::remove("/items/2"),
            ],
        )
        .unwrap();
        assert_eq!(doc["items"], json!([0, 10, 3]));
    }

    #[test]
    fn relative_pointer_rejected() {
        let mut doc = json!({});
        let err = apply_json_patch(&mut doc, &[JsonPatch::add("status", json!(1))]).unwrap_err();
        assert!(matches!(err, PatchError::InvalidPointer { .. }));
    }

    #[test]
    fn merge_patch_semantics() {
        let mut doc = json!({
            "metadata": { "name": "n1", "annotations": { "a": "1", "b": "2" } },
            "spec": [1, 2],
        });
        apply_merge_patch(
            &mut doc,
            &json!({
                "metadata": { "annotations": { "b": null, "c": "3" } },
                "spec": [9],
            }),
        );
        assert_eq!(
            doc,
            json!({
                "metadata": { "name": "n1", "annotations": { "a": "1", "c": "3" } },
                "spec": [9],
            })
        );
    }

    #[test]
    fn merge_patch_creates_missing_objects() {
        let mut doc = json!({ "metadata": { "name": "n1" } });
        apply_merge_patch(&mut doc, &json!({ "metadata": { "annotations": { "x": "y" } } }));
        assert_eq!(doc["metadata"]["annotations"]["x"], json!("y"));
    }
}
