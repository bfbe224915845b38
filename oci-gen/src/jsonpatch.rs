//! A small RFC-6902 JSON Patch sum type, applied directly to the config's
//! `serde_json::Value` representation. `10-basics` and `25-host-rootfs` are
//! the only stages that use this; everything else mutates the config
//! through [`crate::config::Config`]'s typed accessors (§9 "JSON-patch
//! application").

use serde_json::Value;

use linglong_common::{Error, Result};

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Patch {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Copy { from: String, path: String },
    Move { from: String, path: String },
    Test { path: String, value: Value },
}

/// Applies `patches` to `target` in order. Matches `serde_json::Value`'s own
/// pointer semantics: `path`/`from` are JSON Pointers (RFC 6901). The first
/// failing operation aborts and leaves `target` partially patched — callers
/// apply patches to a clone if that's undesirable.
pub fn apply(target: &mut Value, patches: &[Patch]) -> Result<()> {
    for patch in patches {
        apply_one(target, patch)?;
    }
    Ok(())
}

fn apply_one(target: &mut Value, patch: &Patch) -> Result<()> {
    match patch {
        Patch::Add { path, value } => add(target, path, value.clone()),
        Patch::Remove { path } => remove(target, path),
        Patch::Replace { path, value } => {
            remove(target, path)?;
            add(target, path, value.clone())
        }
        Patch::Copy { from, path } => {
            let value = get(target, from)?.clone();
            add(target, path, value)
        }
        Patch::Move { from, path } => {
            let value = remove(target, from)?;
            add(target, path, value)
        }
        Patch::Test { path, value } => {
            let actual = get(target, path)?;
            if actual != value {
                return Err(Error::contract(format!("json-patch test failed at {path}")));
            }
            Ok(())
        }
    }
}

fn split_pointer(path: &str) -> Result<(&str, String)> {
    let path = path.strip_prefix('/').ok_or_else(|| Error::contract(format!("invalid json pointer {path}")))?;
    match path.rsplit_once('/') {
        Some((parent, last)) => Ok((parent, unescape(last))),
        None => Ok(("", unescape(path))),
    }
}

fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn get<'a>(target: &'a Value, path: &str) -> Result<&'a Value> {
    target.pointer(path).ok_or_else(|| Error::contract(format!("no value at {path}")))
}

fn parent_mut<'a>(target: &'a mut Value, parent_path: &str) -> Result<&'a mut Value> {
    if parent_path.is_empty() {
        return Ok(target);
    }
    target
        .pointer_mut(&format!("/{parent_path}"))
        .ok_or_else(|| Error::contract(format!("no parent at /{parent_path}")))
}

fn add(target: &mut Value, path: &str, value: Value) -> Result<()> {
    if path.is_empty() {
        *target = value;
        return Ok(());
    }
    let (parent_path, key) = split_pointer(path)?;
    let parent = parent_mut(target, parent_path)?;

    match parent {
        Value::Object(map) => {
            map.insert(key, value);
            Ok(())
        }
        Value::Array(arr) => {
            if key == "-" {
                arr.push(value);
            } else {
                let index: usize =
                    key.parse().map_err(|_| Error::contract(format!("invalid array index {key} in {path}")))?;
                if index > arr.len() {
                    return Err(Error::contract(format!("array index {index} out of bounds for {path}")));
                }
                arr.insert(index, value);
            }
            Ok(())
        }
        _ => Err(Error::contract(format!("cannot add into non-container at {parent_path}"))),
    }
}

fn remove(target: &mut Value, path: &str) -> Result<Value> {
    let (parent_path, key) = split_pointer(path)?;
    let parent = parent_mut(target, parent_path)?;

    match parent {
        Value::Object(map) => {
            map.remove(&key).ok_or_else(|| Error::contract(format!("no member {key} to remove at {path}")))
        }
        Value::Array(arr) => {
            let index: usize =
                key.parse().map_err(|_| Error::contract(format!("invalid array index {key} in {path}")))?;
            if index >= arr.len() {
                return Err(Error::contract(format!("array index {index} out of bounds for {path}")));
            }
            Ok(arr.remove(index))
        }
        _ => Err(Error::contract(format!("cannot remove from non-container at {parent_path}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn add_sets_object_member() {
        let mut target = json!({"a": {}});
        apply(&mut target, &[Patch::Add { path: "/a/b".into(), value: json!(1) }]).unwrap();
        assert_eq!(target, json!({"a": {"b": 1}}));
    }

    #[test]
    fn add_appends_to_array_with_dash() {
        let mut target = json!({"mounts": [1, 2]});
        apply(&mut target, &[Patch::Add { path: "/mounts/-".into(), value: json!(3) }]).unwrap();
        assert_eq!(target, json!({"mounts": [1, 2, 3]}));
    }

    #[test]
    fn remove_deletes_object_member() {
        let mut target = json!({"a": {"b": 1}});
        apply(&mut target, &[Patch::Remove { path: "/a/b".into() }]).unwrap();
        assert_eq!(target, json!({"a": {}}));
    }

    #[test]
    fn test_op_aborts_on_mismatch() {
        let mut target = json!({"ociVersion": "1.0.0"});
        let result = apply(
            &mut target,
            &[Patch::Test { path: "/ociVersion".into(), value: json!("1.0.1") }],
        );
        assert!(result.is_err());
    }

    #[test]
    fn move_relocates_value() {
        let mut target = json!({"a": 1, "b": {}});
        apply(&mut target, &[Patch::Move { from: "/a".into(), path: "/b/a".into() }]).unwrap();
        assert_eq!(target, json!({"b": {"a": 1}}));
    }
}
