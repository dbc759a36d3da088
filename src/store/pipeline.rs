//! Plugin pipeline layered on [`CoreStore`]
//!
//! [`Store`] wires a set of named [`Plugin`]s into the core's hook seam
//! and adds the structured mutation entry points: [`dispatch`](Store::dispatch)
//! (action + configured handler, batched, source-tagged `dispatch`) and
//! [`apply_patch`](Store::apply_patch) (set/delete ops, batched,
//! source-tagged `patch`). Both go through the ordinary write path, so
//! plugins observe them as regular write events too.
//!
//! Hook fan-out is best-effort: a failing plugin hook is forwarded to
//! every plugin's `on_error` and never prevents sibling plugins or the
//! store's own work from running.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::path::Select;
use crate::subscription::Subscription;

use super::core::{CoreStore, CoreStoreOptions, StoreHooks, WriteInfo, WriteSource};
use super::node::Node;
use super::selector::{EqualityFn, Scheduler, SelectorOptions};

/// A dispatched action: a type tag plus optional payload and metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Action type tag
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Optional metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    /// Marks the action as representing a failure
    #[serde(default, skip_serializing_if = "is_false")]
    pub error: bool,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl Action {
    /// Action with just a type tag
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: None,
            meta: None,
            error: false,
        }
    }

    /// Attach a payload
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Attach metadata
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// One structured mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    /// Write `value` at `path`
    Set {
        /// Dotted target path
        path: String,
        /// Value to write
        value: Value,
    },
    /// Remove the value at `path`
    Delete {
        /// Dotted target path
        path: String,
    },
}

/// One or more patch operations applied in a single batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(pub Vec<PatchOp>);

impl From<PatchOp> for Patch {
    fn from(op: PatchOp) -> Self {
        Self(vec![op])
    }
}

impl From<Vec<PatchOp>> for Patch {
    fn from(ops: Vec<PatchOp>) -> Self {
        Self(ops)
    }
}

/// Handler applying a dispatched action to the store, invoked inside a
/// batch with write source `Dispatch`
pub type DispatchHandler = Arc<dyn Fn(&Store, &Action) -> Result<()> + Send + Sync>;

/// Lifecycle hooks a plugin may implement; every method has a no-op
/// default, so a plugin implements only the hooks it cares about.
///
/// Hooks return `Result<()>`: an `Err` is treated as a caught failure,
/// routed to every plugin's [`on_error`](Plugin::on_error) and never
/// propagated to the operation that triggered the hook.
pub trait Plugin: Send + Sync {
    /// Stable plugin name, used in error reports
    fn name(&self) -> &str;

    /// Called once when the plugin is registered
    fn on_init(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    /// Called before each mutation is applied
    fn on_before_write(&self, _ctx: &PluginContext, _info: &WriteInfo) -> Result<()> {
        Ok(())
    }

    /// Called after each mutation is applied
    fn on_after_write(&self, _ctx: &PluginContext, _info: &WriteInfo) -> Result<()> {
        Ok(())
    }

    /// Called for every dispatched action, before the handler runs
    fn on_action(&self, _ctx: &PluginContext, _action: &Action) -> Result<()> {
        Ok(())
    }

    /// Called for each patch operation, before it is applied
    fn on_patch(&self, _ctx: &PluginContext, _op: &PatchOp) -> Result<()> {
        Ok(())
    }

    /// Called at the start of each notify cycle
    fn on_notify_start(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    /// Called at the end of each notify cycle
    fn on_notify_end(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    /// Receives every captured error. Infallible so error reporting can
    /// never loop.
    fn on_error(&self, _ctx: &PluginContext, _error: &StoreError) {}
}

/// Shared context handed to every plugin hook
pub struct PluginContext {
    store: Store,
}

impl PluginContext {
    /// The store the hook fired on
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Detached deep copy of the current state
    pub fn snapshot(&self) -> Value {
        self.store.snapshot()
    }

    /// Zero-copy read access to the live state
    pub fn with_state<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        self.store.with_state(f)
    }

    /// Dispatch an action through the store (re-entrant hooks are legal)
    pub fn dispatch(&self, action: Action) {
        self.store.dispatch(action);
    }

    /// Apply a patch through the store
    pub fn apply_patch(&self, patch: impl Into<Patch>) {
        self.store.apply_patch(patch);
    }

    /// Hand a continuation to the store's scheduler
    pub fn schedule(&self, f: impl FnOnce() + Send + 'static) {
        self.store.core().schedule(Box::new(f));
    }
}

struct PluginEntry {
    id: u64,
    plugin: Arc<dyn Plugin>,
}

pub(crate) struct StoreInner {
    core: CoreStore,
    plugins: Mutex<Vec<PluginEntry>>,
    dispatch_handler: Option<DispatchHandler>,
    next_plugin_id: AtomicU64,
}

/// Construction options for [`Store`]
#[derive(Clone, Default)]
pub struct StoreOptions {
    /// Plugins registered at construction, in order
    pub plugins: Vec<Arc<dyn Plugin>>,
    /// Default scheduler for selector emissions
    pub scheduler: Option<Scheduler>,
    /// Handler applied by [`Store::dispatch`]
    pub dispatch_handler: Option<DispatchHandler>,
    /// Default equality for selector listeners
    pub equality: Option<EqualityFn>,
}

/// Handle to a registered plugin; [`unregister`](Self::unregister)
/// removes it. Dropping the handle leaves the plugin registered.
pub struct PluginRegistration {
    store: Weak<StoreInner>,
    id: u64,
}

impl PluginRegistration {
    /// Remove the plugin from the store
    pub fn unregister(self) {
        if let Some(inner) = self.store.upgrade() {
            inner.plugins.lock().retain(|e| e.id != self.id);
        }
    }
}

/// [`CoreStore`] plus a plugin pipeline and structured mutation entry
/// points. Cheap to clone; clones share state, listeners and plugins.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Create a store with no plugins and default options
    pub fn new(initial: Value) -> Self {
        Self::with_options(initial, StoreOptions::default())
    }

    /// Create a store with plugins, a scheduler, or a dispatch handler
    pub fn with_options(initial: Value, options: StoreOptions) -> Self {
        let StoreOptions {
            plugins,
            scheduler,
            dispatch_handler,
            equality,
        } = options;

        let inner = Arc::new_cyclic(|weak: &Weak<StoreInner>| {
            let hooks = StoreHooks {
                before_write: Some(Box::new({
                    let weak = weak.clone();
                    move |info: &WriteInfo| {
                        if let Some(inner) = weak.upgrade() {
                            Store { inner }.each_plugin("on_before_write", |p, ctx| {
                                p.on_before_write(ctx, info)
                            });
                        }
                    }
                })),
                after_write: Some(Box::new({
                    let weak = weak.clone();
                    move |info: &WriteInfo| {
                        if let Some(inner) = weak.upgrade() {
                            Store { inner }.each_plugin("on_after_write", |p, ctx| {
                                p.on_after_write(ctx, info)
                            });
                        }
                    }
                })),
                notify_start: Some(Box::new({
                    let weak = weak.clone();
                    move || {
                        if let Some(inner) = weak.upgrade() {
                            Store { inner }
                                .each_plugin("on_notify_start", |p, ctx| p.on_notify_start(ctx));
                        }
                    }
                })),
                notify_end: Some(Box::new({
                    let weak = weak.clone();
                    move || {
                        if let Some(inner) = weak.upgrade() {
                            Store { inner }
                                .each_plugin("on_notify_end", |p, ctx| p.on_notify_end(ctx));
                        }
                    }
                })),
                error: Some(Box::new({
                    let weak = weak.clone();
                    move |err: &StoreError| {
                        if let Some(inner) = weak.upgrade() {
                            Store { inner }.route_error(err);
                        }
                    }
                })),
            };

            StoreInner {
                core: CoreStore::with_options(
                    initial,
                    CoreStoreOptions {
                        hooks,
                        scheduler,
                        equality,
                    },
                ),
                plugins: Mutex::new(Vec::new()),
                dispatch_handler,
                next_plugin_id: AtomicU64::new(1),
            }
        });

        let store = Store { inner };
        for plugin in plugins {
            let _ = store.register(plugin);
        }
        store
    }

    /// The underlying core store
    pub fn core(&self) -> &CoreStore {
        &self.inner.core
    }

    /// Register a plugin and run its `on_init` hook (init errors go to
    /// the error path, never to the caller)
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> PluginRegistration {
        let id = self.inner.next_plugin_id.fetch_add(1, Ordering::SeqCst);
        self.inner.plugins.lock().push(PluginEntry {
            id,
            plugin: plugin.clone(),
        });
        let ctx = PluginContext {
            store: self.clone(),
        };
        if let Err(err) = plugin.on_init(&ctx) {
            self.route_error(&wrap_hook_error(plugin.name(), "on_init", err));
        }
        PluginRegistration {
            store: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Dispatch an action: `on_action` fan-out, then the configured
    /// handler inside a batch with write source `Dispatch`
    pub fn dispatch(&self, action: Action) {
        self.each_plugin("on_action", |p, ctx| p.on_action(ctx, &action));
        if let Some(handler) = self.inner.dispatch_handler.clone() {
            self.core().batch(|| {
                self.core().with_write_source(WriteSource::Dispatch, || {
                    if let Err(err) = handler(self, &action) {
                        self.route_error(&StoreError::dispatch(&action.kind, err.to_string()));
                    }
                });
            });
        }
    }

    /// Apply one or more patch operations in a single batch with write
    /// source `Patch`; each op runs the `on_patch` fan-out first
    pub fn apply_patch(&self, patch: impl Into<Patch>) {
        let patch = patch.into();
        self.core().batch(|| {
            for op in &patch.0 {
                self.each_plugin("on_patch", |p, ctx| p.on_patch(ctx, op));
                self.core().with_write_source(WriteSource::Patch, || match op {
                    PatchOp::Set { path, value } => {
                        self.core().set(path, value.clone());
                    }
                    PatchOp::Delete { path } => {
                        self.core().delete(path);
                    }
                });
            }
        });
    }

    /// See [`CoreStore::get`]
    pub fn get(&self, path: &str) -> Option<Value> {
        self.core().get(path)
    }

    /// See [`CoreStore::set`]
    pub fn set(&self, path: &str, value: Value) -> bool {
        self.core().set(path, value)
    }

    /// See [`CoreStore::delete`]
    pub fn delete(&self, path: &str) -> bool {
        self.core().delete(path)
    }

    /// See [`CoreStore::snapshot`]
    pub fn snapshot(&self) -> Value {
        self.core().snapshot()
    }

    /// See [`CoreStore::with_state`]
    pub fn with_state<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        self.core().with_state(f)
    }

    /// See [`CoreStore::batch`]
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.core().batch(f)
    }

    /// See [`CoreStore::subscribe`]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.core().subscribe(listener)
    }

    /// See [`CoreStore::subscribe_selector`]
    pub fn subscribe_selector<F>(
        &self,
        select: impl Into<Select>,
        options: SelectorOptions,
        callback: F,
    ) -> Subscription
    where
        F: Fn(Option<&Value>) -> Result<()> + Send + Sync + 'static,
    {
        self.core().subscribe_selector(select, options, callback)
    }

    /// See [`CoreStore::root`]
    pub fn root(&self) -> Node {
        self.core().root()
    }

    /// See [`CoreStore::flush`]
    pub fn flush(&self) {
        self.core().flush()
    }

    fn each_plugin<F>(&self, hook: &str, f: F)
    where
        F: Fn(&dyn Plugin, &PluginContext) -> Result<()>,
    {
        let plugins: Vec<Arc<dyn Plugin>> = self
            .inner
            .plugins
            .lock()
            .iter()
            .map(|e| e.plugin.clone())
            .collect();
        let ctx = PluginContext {
            store: self.clone(),
        };
        for plugin in plugins {
            if let Err(err) = f(plugin.as_ref(), &ctx) {
                self.route_error(&wrap_hook_error(plugin.name(), hook, err));
            }
        }
    }

    pub(crate) fn route_error(&self, err: &StoreError) {
        log::debug!("store error: {err}");
        let plugins: Vec<Arc<dyn Plugin>> = self
            .inner
            .plugins
            .lock()
            .iter()
            .map(|e| e.plugin.clone())
            .collect();
        let ctx = PluginContext {
            store: self.clone(),
        };
        for plugin in plugins {
            plugin.on_error(&ctx, err);
        }
    }
}

fn wrap_hook_error(plugin: &str, hook: &str, err: StoreError) -> StoreError {
    match err {
        already @ StoreError::Plugin { .. } => already,
        other => StoreError::plugin(plugin, hook, other.to_string()),
    }
}
