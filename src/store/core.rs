//! Core reactive store
//!
//! [`CoreStore`] owns one root `serde_json::Value`, intercepts every
//! path-addressed mutation as a write event, coalesces notification under
//! batches, and re-evaluates selector listeners against the current state
//! on every notify cycle. It invokes the hook callbacks it was built with
//! but never interprets them; the plugin pipeline in
//! [`pipeline`](super::pipeline) is layered on top of exactly this seam.
//!
//! Locking discipline: no internal mutex is held while a user callback
//! runs, so re-entrant writes from hooks and listeners are legal and
//! simply produce new write events in order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::path::{Select, can_set_path, delete_path, get_path, set_path, split_path};
use crate::subscription::Subscription;

use super::node::{Node, NodePath};
use super::selector::{
    ChangeCallback, EqualityFn, Job, ParkedEmission, Scheduler, SelectorOptions, SelectorState,
    SelectorSub, default_equality,
};

/// Origin tag attached to every write event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteSource {
    /// Plain path or node write
    Direct,
    /// Write performed by `apply_patch`
    Patch,
    /// Write performed by the dispatch handler
    Dispatch,
}

/// Record of one in-place mutation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteInfo {
    /// Key path from the root; `None` for whole-root replacement
    pub path: Option<Vec<String>>,
    /// Value before the write (`None` = absent)
    pub prev: Option<Value>,
    /// Value after the write (`None` for deletes)
    pub next: Option<Value>,
    /// Origin of the write
    pub source: WriteSource,
}

/// Construction-time hook callbacks, invoked but never interpreted by the
/// store
#[derive(Default)]
pub struct StoreHooks {
    /// Runs before each mutation is applied
    pub before_write: Option<Box<dyn Fn(&WriteInfo) + Send + Sync>>,
    /// Runs after each mutation is applied
    pub after_write: Option<Box<dyn Fn(&WriteInfo) + Send + Sync>>,
    /// Runs at the start of each notify cycle
    pub notify_start: Option<Box<dyn Fn() + Send + Sync>>,
    /// Runs at the end of each notify cycle
    pub notify_end: Option<Box<dyn Fn() + Send + Sync>>,
    /// Receives every captured callback failure
    pub error: Option<Box<dyn Fn(&StoreError) + Send + Sync>>,
}

/// Construction options for [`CoreStore`]
#[derive(Default)]
pub struct CoreStoreOptions {
    /// Hook callbacks
    pub hooks: StoreHooks,
    /// Default scheduler for selector emissions; when absent, emissions
    /// queue on the store's deferred queue drained at cycle end
    pub scheduler: Option<Scheduler>,
    /// Default equality for selector listeners
    pub equality: Option<EqualityFn>,
}

pub(crate) enum WriteOp {
    Set(Value),
    Delete,
}

struct PlainListener {
    id: u64,
    callback: Arc<dyn Fn() -> Result<()> + Send + Sync>,
}

pub(crate) struct CoreInner {
    state: Mutex<Value>,
    listeners: Mutex<Vec<PlainListener>>,
    selectors: Mutex<Vec<Arc<SelectorSub>>>,
    parked: Mutex<Vec<ParkedEmission>>,
    deferred: Mutex<VecDeque<Job>>,
    nodes: Mutex<FxHashMap<Vec<String>, Arc<NodePath>>>,
    sources: Mutex<Vec<WriteSource>>,
    hooks: StoreHooks,
    scheduler: Option<Scheduler>,
    equality: EqualityFn,
    batch_depth: AtomicUsize,
    pending_notify: AtomicBool,
    next_id: AtomicU64,
}

/// Reactive store over one root JSON value.
///
/// Cheap to clone; clones share the same underlying state and listeners.
#[derive(Clone)]
pub struct CoreStore {
    inner: Arc<CoreInner>,
}

impl CoreStore {
    /// Create a store with default options
    pub fn new(initial: Value) -> Self {
        Self::with_options(initial, CoreStoreOptions::default())
    }

    /// Create a store with hooks, a default scheduler, or a default
    /// equality function
    pub fn with_options(initial: Value, options: CoreStoreOptions) -> Self {
        Self {
            inner: Arc::new(CoreInner {
                state: Mutex::new(initial),
                listeners: Mutex::new(Vec::new()),
                selectors: Mutex::new(Vec::new()),
                parked: Mutex::new(Vec::new()),
                deferred: Mutex::new(VecDeque::new()),
                nodes: Mutex::new(FxHashMap::default()),
                sources: Mutex::new(Vec::new()),
                hooks: options.hooks,
                scheduler: options.scheduler,
                equality: options.equality.unwrap_or_else(default_equality),
                batch_depth: AtomicUsize::new(0),
                pending_notify: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<CoreInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<CoreInner> {
        Arc::downgrade(&self.inner)
    }

    /// Read access to the live state without copying
    pub fn with_state<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        let state = self.inner.state.lock();
        f(&state)
    }

    /// Detached deep copy of the current state; writes to it can never
    /// reach the store
    pub fn snapshot(&self) -> Value {
        self.inner.state.lock().clone()
    }

    /// Read the value at a dotted path (`None` = absent)
    pub fn get(&self, path: &str) -> Option<Value> {
        self.with_state(|state| get_path(state, path).cloned())
    }

    /// Write `value` at a dotted path, auto-vivifying intermediates.
    ///
    /// An empty path replaces the root. Returns `false` when the write
    /// could not land (out-of-range array index); no event is notified in
    /// that case.
    pub fn set(&self, path: &str, value: Value) -> bool {
        let keys: Vec<String> = split_path(path).into_iter().map(String::from).collect();
        self.apply_write(&keys, WriteOp::Set(value))
    }

    /// Delete the value at a dotted path. Returns `false` (and notifies
    /// nothing) when the path was already absent.
    pub fn delete(&self, path: &str) -> bool {
        let keys: Vec<String> = split_path(path).into_iter().map(String::from).collect();
        self.apply_write(&keys, WriteOp::Delete)
    }

    /// Tracked handle positioned at the root
    pub fn root(&self) -> Node {
        Node::new(self.clone(), self.intern(Vec::new()))
    }

    pub(crate) fn intern(&self, segments: Vec<String>) -> Arc<NodePath> {
        let mut nodes = self.inner.nodes.lock();
        if let Some(node) = nodes.get(&segments) {
            return node.clone();
        }
        let node = Arc::new(NodePath::new(segments.clone()));
        nodes.insert(segments, node.clone());
        node
    }

    /// Run `f` with every write inside tagged with `source`
    pub fn with_write_source<R>(&self, source: WriteSource, f: impl FnOnce() -> R) -> R {
        self.inner.sources.lock().push(source);
        let _guard = SourceGuard(&self.inner);
        f()
    }

    pub(crate) fn current_source(&self) -> WriteSource {
        self.inner
            .sources
            .lock()
            .last()
            .copied()
            .unwrap_or(WriteSource::Direct)
    }

    /// Defer notification until `f` returns; however many writes happen
    /// inside (including nested batches), at most one notify cycle runs
    /// when the outermost batch closes.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.batch_depth.fetch_add(1, Ordering::SeqCst);
        let out = {
            let _guard = BatchGuard(&self.inner);
            f()
        };
        if self.inner.batch_depth.load(Ordering::SeqCst) == 0
            && self.inner.pending_notify.swap(false, Ordering::SeqCst)
        {
            self.notify_cycle();
        }
        out
    }

    /// Register a plain change listener, called once per notify cycle
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.listeners.lock().push(PlainListener {
            id,
            callback: Arc::new(listener),
        });
        let weak = self.downgrade();
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.lock().retain(|l| l.id != id);
            }
        })
    }

    /// Register a selector listener.
    ///
    /// The selector's value is captured immediately so the first
    /// subsequent mutation is comparable; the callback fires only when
    /// the derived value changes under the listener's equality function.
    pub fn subscribe_selector<F>(
        &self,
        select: impl Into<Select>,
        options: SelectorOptions,
        callback: F,
    ) -> Subscription
    where
        F: Fn(Option<&Value>) -> Result<()> + Send + Sync + 'static,
    {
        let select = select.into();
        let initial = match self.with_state(|state| select.eval(state)) {
            Ok(value) => value,
            Err(err) => {
                self.handle_error(&err);
                None
            }
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let sub = Arc::new(SelectorSub {
            id,
            select,
            equality: options
                .equality
                .unwrap_or_else(|| self.inner.equality.clone()),
            callback: Arc::new(callback) as ChangeCallback,
            throttle_ms: options.throttle_ms,
            scheduler: options.scheduler,
            cancelled: AtomicBool::new(false),
            state: Mutex::new(SelectorState {
                prev: initial,
                last_emit: None,
                parked: false,
            }),
        });
        self.inner.selectors.lock().push(sub.clone());

        let weak = self.downgrade();
        Subscription::new(move || {
            sub.cancelled.store(true, Ordering::SeqCst);
            if let Some(inner) = weak.upgrade() {
                inner.selectors.lock().retain(|s| s.id != id);
                inner.parked.lock().retain(|p| p.sub.id != id);
            }
        })
    }

    /// Run deferred emissions and any due throttled emissions.
    ///
    /// The store drains both at the end of every notify cycle; embedders
    /// with an event loop call this to pump throttled deliveries whose
    /// window elapsed while the store was quiet.
    pub fn flush(&self) {
        self.drain_deferred();
        self.flush_parked();
    }

    /// Hand a continuation to the store's scheduler (or deferred queue)
    pub(crate) fn schedule(&self, job: Job) {
        match &self.inner.scheduler {
            Some(scheduler) => scheduler(job),
            None => self.inner.deferred.lock().push_back(job),
        }
    }

    pub(crate) fn handle_error(&self, err: &StoreError) {
        match &self.inner.hooks.error {
            Some(hook) => hook(err),
            None => log::debug!("unhandled store error: {err}"),
        }
    }

    pub(crate) fn apply_write(&self, keys: &[String], op: WriteOp) -> bool {
        let dotted = keys.join(".");
        let (prev, applicable) = self.with_state(|state| {
            let prev = if keys.is_empty() {
                Some(state.clone())
            } else {
                get_path(state, &dotted).cloned()
            };
            // A write that cannot land fires no hooks and notifies
            // nothing, keeping before/after strictly paired.
            let applicable = match &op {
                WriteOp::Set(_) => can_set_path(state, &dotted),
                WriteOp::Delete => !keys.is_empty() && prev.is_some(),
            };
            (prev, applicable)
        });
        if !applicable {
            return false;
        }

        let info = WriteInfo {
            path: if keys.is_empty() {
                None
            } else {
                Some(keys.to_vec())
            },
            prev,
            next: match &op {
                WriteOp::Set(value) => Some(value.clone()),
                WriteOp::Delete => None,
            },
            source: self.current_source(),
        };

        if let Some(hook) = &self.inner.hooks.before_write {
            hook(&info);
        }

        let applied = {
            let mut state = self.inner.state.lock();
            match op {
                WriteOp::Set(value) => set_path(&mut state, &dotted, value),
                WriteOp::Delete => delete_path(&mut state, &dotted),
            }
        };
        if !applied {
            return false;
        }

        if let Some(hook) = &self.inner.hooks.after_write {
            hook(&info);
        }
        self.queue_notify();
        true
    }

    fn queue_notify(&self) {
        if self.inner.batch_depth.load(Ordering::SeqCst) > 0 {
            self.inner.pending_notify.store(true, Ordering::SeqCst);
            return;
        }
        self.inner.pending_notify.store(false, Ordering::SeqCst);
        self.notify_cycle();
    }

    fn notify_cycle(&self) {
        if let Some(hook) = &self.inner.hooks.notify_start {
            hook();
        }
        self.run_selectors();

        // Snapshot of current members: listeners added during this cycle
        // are not called until the next one.
        let listeners: Vec<Arc<dyn Fn() -> Result<()> + Send + Sync>> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|l| l.callback.clone())
            .collect();
        for listener in listeners {
            if let Err(err) = listener() {
                self.handle_error(&err);
            }
        }

        if let Some(hook) = &self.inner.hooks.notify_end {
            hook();
        }
        self.drain_deferred();
        self.flush_parked();
    }

    fn run_selectors(&self) {
        let state = self.snapshot();
        let subs: Vec<Arc<SelectorSub>> = self.inner.selectors.lock().clone();

        for sub in subs {
            if sub.cancelled.load(Ordering::SeqCst) {
                continue;
            }
            let next = match sub.select.eval(&state) {
                Ok(value) => value,
                Err(err) => {
                    self.handle_error(&err);
                    continue;
                }
            };
            // prev updates at evaluation time so deferred or throttled
            // emissions always carry the latest value.
            let changed = {
                let mut st = sub.state.lock();
                if (sub.equality)(&st.prev, &next) {
                    false
                } else {
                    st.prev = next;
                    true
                }
            };
            if !changed {
                continue;
            }

            if let Some(ms) = sub.throttle_ms {
                let window = Duration::from_millis(ms);
                let mut st = sub.state.lock();
                if let Some(last) = st.last_emit {
                    if Instant::now().duration_since(last) < window {
                        if !st.parked {
                            st.parked = true;
                            let due = last + window;
                            drop(st);
                            self.inner.parked.lock().push(ParkedEmission {
                                sub: sub.clone(),
                                due,
                            });
                        }
                        continue;
                    }
                }
            }

            self.schedule_emission(&sub);
        }
    }

    fn schedule_emission(&self, sub: &Arc<SelectorSub>) {
        let weak = self.downgrade();
        let captured = sub.clone();
        let job: Job = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                CoreStore::from_inner(inner).emit_now(&captured);
            }
        });
        match &sub.scheduler {
            Some(scheduler) => scheduler(job),
            None => self.schedule(job),
        }
    }

    fn emit_now(&self, sub: &Arc<SelectorSub>) {
        if sub.cancelled.load(Ordering::SeqCst) {
            return;
        }
        let value = {
            let mut st = sub.state.lock();
            st.parked = false;
            st.last_emit = Some(Instant::now());
            st.prev.clone()
        };
        if let Err(err) = (sub.callback)(value.as_ref()) {
            self.handle_error(&err);
        }
    }

    fn drain_deferred(&self) {
        loop {
            let job = self.inner.deferred.lock().pop_front();
            match job {
                Some(job) => job(),
                None => break,
            }
        }
    }

    fn flush_parked(&self) {
        let now = Instant::now();
        let due: Vec<Arc<SelectorSub>> = {
            let mut parked = self.inner.parked.lock();
            let mut due = Vec::new();
            let mut i = 0;
            while i < parked.len() {
                if parked[i].due <= now {
                    due.push(parked.remove(i).sub);
                } else {
                    i += 1;
                }
            }
            due
        };
        for sub in due {
            self.emit_now(&sub);
        }
    }
}

struct BatchGuard<'a>(&'a CoreInner);

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.0.batch_depth.fetch_sub(1, Ordering::SeqCst);
    }
}

struct SourceGuard<'a>(&'a CoreInner);

impl Drop for SourceGuard<'_> {
    fn drop(&mut self) {
        self.0.sources.lock().pop();
    }
}
