//! Dotted-path access over `serde_json::Value`
//!
//! Pure helpers shared by the store and the context manager: read, write
//! (auto-vivifying intermediate objects), delete and existence checks
//! addressed by `"a.b.c"` strings, plus [`Select`], the normalization of
//! "path string or selector function" used by every subscription API.
//!
//! Absence is `None`; `Value::Null` is a present null. Path segments that
//! parse as unsigned integers index into arrays.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::Result;

/// Split a dotted path into its non-empty segments
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

fn index_into<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Read the value at `path`, or `None` if any segment is absent or the
/// walk descends through a non-container
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = root;
    for key in split_path(path) {
        cur = index_into(cur, key)?;
    }
    Some(cur)
}

/// Check whether `path` exists, without looking at the value
pub fn has_path(root: &Value, path: &str) -> bool {
    get_path(root, path).is_some()
}

/// Valid write slot in an array of `len` elements: an in-bounds index
/// (assign) or the one-past-end index (append)
fn array_slot(key: &str, len: usize) -> Option<usize> {
    key.parse::<usize>().ok().filter(|&idx| idx <= len)
}

/// Write `value` at `path`, creating missing intermediate objects and
/// replacing scalar intermediates with objects.
///
/// An empty path replaces the root. Arrays are preserved: a segment
/// addressing one must be an in-bounds index (assign) or the one-past-end
/// index (append); anything else leaves the tree untouched and returns
/// `false`.
pub fn set_path(root: &mut Value, path: &str, value: Value) -> bool {
    let keys = split_path(path);
    let Some((last, parents)) = keys.split_last() else {
        *root = value;
        return true;
    };

    let mut cur = root;
    for key in parents {
        if !cur.is_object() && !cur.is_array() {
            *cur = Value::Object(Map::new());
        }
        cur = match cur {
            Value::Array(items) => {
                let Some(idx) = array_slot(key, items.len()) else {
                    return false;
                };
                if idx == items.len() {
                    items.push(Value::Object(Map::new()));
                }
                &mut items[idx]
            }
            Value::Object(map) => map
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            _ => unreachable!(),
        };
    }

    if !cur.is_object() && !cur.is_array() {
        *cur = Value::Object(Map::new());
    }
    match cur {
        Value::Array(items) => match array_slot(last, items.len()) {
            Some(idx) if idx == items.len() => {
                items.push(value);
                true
            }
            Some(idx) => {
                items[idx] = value;
                true
            }
            None => false,
        },
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            true
        }
        _ => unreachable!(),
    }
}

/// Whether [`set_path`] would land at `path` without mutating anything.
///
/// The only refusals are invalid array slots; missing keys and scalar
/// intermediates vivify, so a walk that leaves the existing tree always
/// succeeds.
pub fn can_set_path(root: &Value, path: &str) -> bool {
    let keys = split_path(path);
    let Some((last, parents)) = keys.split_last() else {
        return true;
    };

    let mut cur = root;
    for key in parents {
        match cur {
            Value::Array(items) => match array_slot(key, items.len()) {
                // Appending vivifies an object, so the rest lands.
                Some(idx) if idx == items.len() => return true,
                Some(idx) => cur = &items[idx],
                None => return false,
            },
            Value::Object(map) => match map.get(*key) {
                Some(slot) => cur = slot,
                None => return true,
            },
            _ => return true,
        }
    }
    match cur {
        Value::Array(items) => array_slot(last, items.len()).is_some(),
        _ => true,
    }
}

/// Remove the value at `path`. Returns `true` if something was removed.
pub fn delete_path(root: &mut Value, path: &str) -> bool {
    let keys = split_path(path);
    let Some((last, parents)) = keys.split_last() else {
        return false;
    };

    let mut cur = root;
    for key in parents {
        let next = match cur {
            Value::Object(map) => map.get_mut(*key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
            _ => None,
        };
        match next {
            Some(v) => cur = v,
            None => return false,
        }
    }

    match cur {
        Value::Object(map) => map.remove(*last).is_some(),
        Value::Array(items) => match last.parse::<usize>() {
            Ok(idx) if idx < items.len() => {
                items.remove(idx);
                true
            }
            _ => false,
        },
        _ => false,
    }
}

/// Selector function deriving a value from a state snapshot
pub type SelectorFn = Arc<dyn Fn(&Value) -> Result<Option<Value>> + Send + Sync>;

/// A path string or a selector function, normalized for subscription and
/// resolution APIs
#[derive(Clone)]
pub enum Select {
    /// Dotted-path lookup
    Path(String),
    /// Arbitrary derivation over the snapshot
    Selector(SelectorFn),
}

impl Select {
    /// Selector from a dotted path
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path(path.into())
    }

    /// Selector from a derivation function
    pub fn selector<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        Self::Selector(Arc::new(f))
    }

    /// Evaluate against a snapshot. Path selectors never fail.
    pub fn eval(&self, state: &Value) -> Result<Option<Value>> {
        match self {
            Self::Path(path) => Ok(get_path(state, path).cloned()),
            Self::Selector(f) => f(state),
        }
    }
}

impl From<&str> for Select {
    fn from(path: &str) -> Self {
        Self::Path(path.to_string())
    }
}

impl From<String> for Select {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

impl fmt::Debug for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Select::Path").field(path).finish(),
            Self::Selector(_) => f.write_str("Select::Selector(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_split_path_drops_empty_segments() {
        assert_eq!(split_path("a.b.c"), vec!["a", "b", "c"]);
        assert_eq!(split_path(".a..b."), vec!["a", "b"]);
        assert!(split_path("").is_empty());
    }

    #[test]
    fn test_get_path() {
        let v = json!({"a": {"b": {"c": 1}}, "list": [10, 20]});
        assert_eq!(get_path(&v, "a.b.c"), Some(&json!(1)));
        assert_eq!(get_path(&v, "list.1"), Some(&json!(20)));
        assert_eq!(get_path(&v, "a.missing"), None);
        assert_eq!(get_path(&v, "a.b.c.d"), None);
        assert_eq!(get_path(&v, ""), Some(&v));
    }

    #[test]
    fn test_set_path_auto_vivifies() {
        let mut v = json!({});
        assert!(set_path(&mut v, "a.b.c", json!(3)));
        assert_eq!(v, json!({"a": {"b": {"c": 3}}}));
    }

    #[test]
    fn test_set_path_replaces_scalar_intermediate() {
        let mut v = json!({"a": 1});
        assert!(set_path(&mut v, "a.b", json!(2)));
        assert_eq!(v, json!({"a": {"b": 2}}));
    }

    #[test]
    fn test_set_path_array_assign_and_append() {
        let mut v = json!({"list": [1, 2]});
        assert!(set_path(&mut v, "list.0", json!(9)));
        assert!(set_path(&mut v, "list.2", json!(3)));
        assert!(!set_path(&mut v, "list.9", json!(0)));
        assert_eq!(v, json!({"list": [9, 2, 3]}));
    }

    #[test]
    fn test_set_path_invalid_array_step_leaves_tree_untouched() {
        let mut v = json!({"list": [1, 2, 3]});
        assert!(!set_path(&mut v, "list.9.x", json!(true)));
        assert!(!set_path(&mut v, "list.name", json!(true)));
        assert_eq!(v, json!({"list": [1, 2, 3]}));

        assert!(set_path(&mut v, "list.3.x", json!(true)));
        assert_eq!(v, json!({"list": [1, 2, 3, {"x": true}]}));
    }

    #[test]
    fn test_can_set_path_mirrors_set_path() {
        let v = json!({"list": [1, 2], "scalar": 5});
        assert!(can_set_path(&v, "list.0"));
        assert!(can_set_path(&v, "list.2.deep"));
        assert!(can_set_path(&v, "scalar.below"));
        assert!(can_set_path(&v, "brand.new.path"));
        assert!(can_set_path(&v, ""));
        assert!(!can_set_path(&v, "list.9"));
        assert!(!can_set_path(&v, "list.9.deep"));
        assert!(!can_set_path(&v, "list.name"));
    }

    #[test]
    fn test_set_empty_path_replaces_root() {
        let mut v = json!({"a": 1});
        assert!(set_path(&mut v, "", json!({"b": 2})));
        assert_eq!(v, json!({"b": 2}));
    }

    #[test]
    fn test_delete_path() {
        let mut v = json!({"a": {"b": 1, "c": 2}, "list": [1, 2, 3]});
        assert!(delete_path(&mut v, "a.b"));
        assert!(!delete_path(&mut v, "a.b"));
        assert!(delete_path(&mut v, "list.1"));
        assert_eq!(v, json!({"a": {"c": 2}, "list": [1, 3]}));
    }

    #[test]
    fn test_has_path_distinguishes_null_from_absent() {
        let v = json!({"a": null});
        assert!(has_path(&v, "a"));
        assert!(!has_path(&v, "b"));
    }

    #[test]
    fn test_select_eval() {
        let v = json!({"user": {"name": "ada"}});
        let by_path = Select::from("user.name");
        assert_eq!(by_path.eval(&v).unwrap(), Some(json!("ada")));

        let by_fn = Select::selector(|s| Ok(get_path(s, "user.name").cloned()));
        assert_eq!(by_fn.eval(&v).unwrap(), Some(json!("ada")));

        let failing = Select::selector(|_| Err(crate::StoreError::selector("boom")));
        assert!(failing.eval(&v).is_err());
    }
}
