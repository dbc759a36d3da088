//! Scope forest: per-scope stores, chain resolution, write routing
//!
//! A scope is a named node backed by its own [`Store`], optionally linked
//! to one parent scope. Reads fall back along the ancestor chain
//! (configurable), writes are routed by a [`WritePolicy`], and
//! chain-aware subscriptions re-resolve across the whole chain whenever
//! any store along it changes.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::error::Result;
use crate::path::{Select, has_path};
use crate::store::{Store, StoreOptions};
use crate::store::selector::{EqualityFn, default_equality};
use crate::subscription::Subscription;

/// Chooses a target scope id for a write issued against a scope
pub type WriteTargetFn = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

/// Rule determining which scope in a chain actually receives a write
#[derive(Clone, Default)]
pub enum WritePolicy {
    /// Always write to the scope the write was issued against
    #[default]
    Local,
    /// Walk from the issuing scope upward and write to the first scope
    /// whose current state already has the path defined (existence, not
    /// value); fall back to the issuing scope if none does.
    ///
    /// The target is re-derived per write, so adding a key at an
    /// ancestor redirects subsequent writes there until that key is
    /// removed again.
    Bubble,
    /// Caller-supplied routing over `(scope_id, path)`
    Custom(WriteTargetFn),
}

impl std::fmt::Debug for WritePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("WritePolicy::Local"),
            Self::Bubble => f.write_str("WritePolicy::Bubble"),
            Self::Custom(_) => f.write_str("WritePolicy::Custom(..)"),
        }
    }
}

/// Construction options for [`ContextManager`]
#[derive(Clone, Debug)]
pub struct ContextManagerOptions {
    /// Write routing rule, default [`WritePolicy::Local`]
    pub write_policy: WritePolicy,
    /// Whether an absent value at a scope continues the search in its
    /// ancestors (default `true`); when `false`, the issuing scope's
    /// result is authoritative and no chain walk occurs
    pub fallback_on_undefined: bool,
}

impl Default for ContextManagerOptions {
    fn default() -> Self {
        Self {
            write_policy: WritePolicy::Local,
            fallback_on_undefined: true,
        }
    }
}

/// Per-subscription options for [`ContextManager::subscribe_value`]
#[derive(Clone, Default)]
pub struct SubscribeValueOptions {
    /// Equality deciding whether the resolved value changed; defaults to
    /// structural equality
    pub equality: Option<EqualityFn>,
    /// Subscribe to every store along the ancestor chain (default) or
    /// only to the scope's own store
    pub follow_fallback: Option<bool>,
}

struct ManagerInner {
    contexts: Mutex<FxHashMap<String, Store>>,
    parents: Mutex<FxHashMap<String, String>>,
    write_policy: WritePolicy,
    fallback_on_undefined: bool,
}

/// Tree of named scopes, each backed by its own store.
///
/// Cheap to clone; clones share the same scope maps.
#[derive(Clone)]
pub struct ContextManager {
    inner: Arc<ManagerInner>,
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextManager {
    /// Manager with local writes and ancestor fallback enabled
    pub fn new() -> Self {
        Self::with_options(ContextManagerOptions::default())
    }

    /// Manager with an explicit write policy / fallback configuration
    pub fn with_options(options: ContextManagerOptions) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                contexts: Mutex::new(FxHashMap::default()),
                parents: Mutex::new(FxHashMap::default()),
                write_policy: options.write_policy,
                fallback_on_undefined: options.fallback_on_undefined,
            }),
        }
    }

    /// Create a scope backed by a fresh store, optionally under a parent.
    ///
    /// Creating an id that already exists replaces that scope's store.
    pub fn create_context(
        &self,
        scope_id: impl Into<String>,
        initial: Value,
        parent: Option<&str>,
    ) -> Store {
        self.create_context_with_options(scope_id, initial, parent, StoreOptions::default())
    }

    /// Create a scope whose store carries plugins, a scheduler, or a
    /// dispatch handler
    pub fn create_context_with_options(
        &self,
        scope_id: impl Into<String>,
        initial: Value,
        parent: Option<&str>,
        options: StoreOptions,
    ) -> Store {
        let scope_id = scope_id.into();
        let store = Store::with_options(initial, options);
        log::debug!("create scope '{scope_id}' (parent: {parent:?})");
        self.inner
            .contexts
            .lock()
            .insert(scope_id.clone(), store.clone());
        match parent {
            Some(parent) => {
                self.inner
                    .parents
                    .lock()
                    .insert(scope_id, parent.to_string());
            }
            None => {
                self.inner.parents.lock().remove(&scope_id);
            }
        }
        store
    }

    /// Remove a scope and its parent edge. Descendants are orphaned, not
    /// cascaded: they keep their own parent edge, so their chains end at
    /// the hole and scopes above it become unreachable until the id is
    /// recreated.
    pub fn destroy_context(&self, scope_id: &str) {
        log::debug!("destroy scope '{scope_id}'");
        self.inner.contexts.lock().remove(scope_id);
        self.inner.parents.lock().remove(scope_id);
    }

    /// The store backing a scope, if the scope exists
    pub fn store(&self, scope_id: &str) -> Option<Store> {
        self.inner.contexts.lock().get(scope_id).cloned()
    }

    /// Resolve a path or selector starting at `scope_id`, falling back
    /// along the ancestor chain when configured. Unknown scopes resolve
    /// to `Ok(None)`.
    pub fn get_value(&self, scope_id: &str, select: impl Into<Select>) -> Result<Option<Value>> {
        self.resolve(scope_id, &select.into())
    }

    /// Write `value` at `path`, routed to the scope chosen by the write
    /// policy. A missing target scope makes the write a no-op.
    pub fn set_value(&self, scope_id: &str, path: &str, value: Value) {
        let target = self.write_target(scope_id, path);
        if let Some(store) = self.store(&target) {
            store.set(path, value);
        }
    }

    /// Delete `path`, routed like [`set_value`](Self::set_value)
    pub fn delete_value(&self, scope_id: &str, path: &str) {
        let target = self.write_target(scope_id, path);
        if let Some(store) = self.store(&target) {
            store.delete(path);
        }
    }

    /// Subscribe to the resolved value of a path or selector at
    /// `scope_id`.
    ///
    /// The initial value is resolved once at subscribe time. On any
    /// change in any subscribed store, the value is re-resolved through
    /// the same algorithm as [`get_value`](Self::get_value) and the
    /// callback fires only when it changed under the equality function.
    /// The returned subscription tears down every per-scope listener.
    pub fn subscribe_value<F>(
        &self,
        scope_id: &str,
        select: impl Into<Select>,
        options: SubscribeValueOptions,
        callback: F,
    ) -> Subscription
    where
        F: Fn(Option<&Value>) -> Result<()> + Send + Sync + 'static,
    {
        let select = select.into();
        let equality = options.equality.unwrap_or_else(default_equality);
        let follow = options.follow_fallback.unwrap_or(true);

        let initial = match self.resolve(scope_id, &select) {
            Ok(value) => value,
            Err(err) => {
                if let Some(store) = self.store(scope_id) {
                    store.core().handle_error(&err);
                }
                None
            }
        };

        let chain = if follow {
            self.chain(scope_id)
        } else {
            vec![scope_id.to_string()]
        };

        let last = Arc::new(Mutex::new(initial));
        let callback = Arc::new(callback);
        let weak = Arc::downgrade(&self.inner);
        let scope = scope_id.to_string();

        let check = Arc::new(move || -> Result<()> {
            let Some(inner) = weak.upgrade() else {
                return Ok(());
            };
            let manager = ContextManager { inner };
            let next = manager.resolve(&scope, &select)?;
            let changed = {
                let mut last = last.lock();
                if equality(&last, &next) {
                    false
                } else {
                    *last = next.clone();
                    true
                }
            };
            if changed {
                callback(next.as_ref())?;
            }
            Ok(())
        });

        let mut subs = Vec::new();
        for id in chain {
            if let Some(store) = self.store(&id) {
                let check = check.clone();
                subs.push(store.subscribe(move || check()));
            }
        }
        Subscription::merge(subs)
    }

    /// Scope ids from `scope_id` to its chain root, in order
    pub fn chain(&self, scope_id: &str) -> Vec<String> {
        let parents = self.inner.parents.lock();
        let mut chain = vec![scope_id.to_string()];
        let mut cur = scope_id;
        while let Some(parent) = parents.get(cur) {
            // A caller-introduced parent cycle would loop forever; stop
            // if we ever come back around.
            if chain.iter().any(|seen| seen == parent) {
                break;
            }
            chain.push(parent.clone());
            cur = parent;
        }
        chain
    }

    fn resolve(&self, scope_id: &str, select: &Select) -> Result<Option<Value>> {
        if !self.inner.fallback_on_undefined {
            // The first scope's result is authoritative; no chain walk.
            return match self.store(scope_id) {
                Some(store) => store.with_state(|state| select.eval(state)),
                None => Ok(None),
            };
        }
        for id in self.chain(scope_id) {
            if let Some(store) = self.store(&id) {
                let value = store.with_state(|state| select.eval(state))?;
                if value.is_some() {
                    return Ok(value);
                }
            }
        }
        Ok(None)
    }

    fn write_target(&self, scope_id: &str, path: &str) -> String {
        match &self.inner.write_policy {
            WritePolicy::Local => scope_id.to_string(),
            WritePolicy::Custom(f) => f(scope_id, path),
            WritePolicy::Bubble => {
                for id in self.chain(scope_id) {
                    if let Some(store) = self.store(&id) {
                        if store.with_state(|state| has_path(state, path)) {
                            return id;
                        }
                    }
                }
                scope_id.to_string()
            }
        }
    }
}
