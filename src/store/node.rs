//! Path-qualified tracked handles
//!
//! [`Node`] is the explicit tracking layer standing in for a transparent
//! mutation-interception proxy: a cursor into a store at a fixed key
//! path. Handles are interned per path for the store's lifetime, so
//! repeated traversal of the same path always yields a handle sharing one
//! allocation. Handle identity is path identity, and identity comparisons
//! between handles of unchanged subtrees stay meaningful.
//!
//! Every write through a handle synthesizes an ordinary path-qualified
//! write event on the owning store; a handle whose subtree was deleted
//! simply reads as absent.

use std::sync::Arc;

use serde_json::Value;

use crate::path::split_path;

use super::core::{CoreStore, WriteOp};

/// Interned path segments shared by all handles at the same position
pub(crate) struct NodePath {
    segments: Vec<String>,
}

impl NodePath {
    pub(crate) fn new(segments: Vec<String>) -> Self {
        Self { segments }
    }
}

/// Tracked cursor into a store at a fixed key path
#[derive(Clone)]
pub struct Node {
    store: CoreStore,
    path: Arc<NodePath>,
}

impl Node {
    pub(crate) fn new(store: CoreStore, path: Arc<NodePath>) -> Self {
        Self { store, path }
    }

    /// Key path from the root to this node
    pub fn path(&self) -> &[String] {
        &self.path.segments
    }

    /// The store this node belongs to
    pub fn store(&self) -> &CoreStore {
        &self.store
    }

    /// Handle to a direct child key
    pub fn child(&self, key: &str) -> Node {
        let mut segments = self.path.segments.clone();
        segments.push(key.to_string());
        Node::new(self.store.clone(), self.store.intern(segments))
    }

    /// Handle to a descendant addressed by a dotted path
    pub fn at(&self, path: &str) -> Node {
        let mut segments = self.path.segments.clone();
        segments.extend(split_path(path).into_iter().map(String::from));
        Node::new(self.store.clone(), self.store.intern(segments))
    }

    /// Current value at this node (`None` = absent)
    pub fn get(&self) -> Option<Value> {
        self.store
            .with_state(|state| crate::path::get_path(state, &self.dotted()).cloned())
    }

    /// Whether this node currently exists in the state tree
    pub fn exists(&self) -> bool {
        self.get().is_some()
    }

    /// Write a child key, producing an ordinary write event
    pub fn set(&self, key: &str, value: Value) -> bool {
        let mut segments = self.path.segments.clone();
        segments.push(key.to_string());
        self.store.apply_write(&segments, WriteOp::Set(value))
    }

    /// Delete a child key
    pub fn delete(&self, key: &str) -> bool {
        let mut segments = self.path.segments.clone();
        segments.push(key.to_string());
        self.store.apply_write(&segments, WriteOp::Delete)
    }

    /// Replace the value at this node itself
    pub fn replace(&self, value: Value) -> bool {
        self.store
            .apply_write(&self.path.segments, WriteOp::Set(value))
    }

    /// Whether two handles are the same tracked node (same store
    /// position, same interned allocation)
    pub fn same_node(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.path, &other.path)
    }

    fn dotted(&self) -> String {
        self.path.segments.join(".")
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Node").field(&self.dotted()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_repeated_traversal_yields_same_handle() {
        let store = CoreStore::new(json!({"a": {"b": {"c": 1}}}));
        let first = store.root().child("a").child("b");
        let second = store.root().at("a.b");
        assert!(first.same_node(&second));
        assert!(!first.same_node(&store.root().child("a")));
    }

    #[test]
    fn test_writes_through_node_notify_with_full_path() {
        let store = CoreStore::new(json!({"user": {"profile": {"age": 18}}}));
        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        store
            .subscribe_selector("user.profile.age", Default::default(), move |v| {
                sink.lock().push(v.cloned());
                Ok(())
            })
            .detach();

        let profile = store.root().at("user.profile");
        assert!(profile.set("age", json!(19)));
        assert_eq!(store.get("user.profile.age"), Some(json!(19)));
        assert_eq!(seen.lock().clone(), vec![Some(json!(19))]);
    }

    #[test]
    fn test_handle_to_deleted_subtree_reads_absent() {
        let store = CoreStore::new(json!({"a": {"b": 1}}));
        let b = store.root().at("a.b");
        assert!(b.exists());
        store.delete("a");
        assert!(!b.exists());
        assert_eq!(b.get(), None);
    }

    #[test]
    fn test_replace_and_child_write() {
        let store = CoreStore::new(json!({}));
        let node = store.root().at("cfg");
        assert!(node.replace(json!({"theme": "light"})));
        assert!(node.set("theme", json!("dark")));
        assert_eq!(store.get("cfg.theme"), Some(json!("dark")));
    }
}
