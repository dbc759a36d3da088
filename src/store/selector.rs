//! Selector listener records and scheduling policies
//!
//! A selector listener pairs a [`Select`] with an equality function and a
//! callback. Its `prev` value is captured at subscribe time and updated at
//! evaluation time (not emission time), so bursts of writes collapse to
//! the final value even when delivery is deferred or throttled.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::Result;
use crate::path::Select;

/// A deferred unit of work handed to a scheduler
pub type Job = Box<dyn FnOnce() + Send>;

/// Scheduling policy: receives a continuation and decides when to run it
pub type Scheduler = Arc<dyn Fn(Job) + Send + Sync>;

/// Equality over resolved selector values; `None` means absent
pub type EqualityFn = Arc<dyn Fn(&Option<Value>, &Option<Value>) -> bool + Send + Sync>;

/// Callback receiving the new resolved value (`None` = absent)
pub type ChangeCallback = Arc<dyn Fn(Option<&Value>) -> Result<()> + Send + Sync>;

/// Structural equality on `Value`, the default for selector listeners
pub fn default_equality() -> EqualityFn {
    Arc::new(|a, b| a == b)
}

/// Per-listener delivery options
#[derive(Clone, Default)]
pub struct SelectorOptions {
    /// Equality deciding whether the derived value actually changed;
    /// defaults to the store's default equality
    pub equality: Option<EqualityFn>,
    /// Suppress intermediate values within this window; the trailing
    /// emission fires with the latest value
    pub throttle_ms: Option<u64>,
    /// Scheduler for this listener's emissions; defaults to the store's
    /// scheduler (or its deferred queue)
    pub scheduler: Option<Scheduler>,
}

impl SelectorOptions {
    /// Set a custom equality function
    pub fn equality<F>(mut self, f: F) -> Self
    where
        F: Fn(&Option<Value>, &Option<Value>) -> bool + Send + Sync + 'static,
    {
        self.equality = Some(Arc::new(f));
        self
    }

    /// Set a throttle window in milliseconds
    pub fn throttle_ms(mut self, ms: u64) -> Self {
        self.throttle_ms = Some(ms);
        self
    }

    /// Set a per-listener scheduler
    pub fn scheduler<F>(mut self, f: F) -> Self
    where
        F: Fn(Job) + Send + Sync + 'static,
    {
        self.scheduler = Some(Arc::new(f));
        self
    }
}

/// Mutable part of a selector listener
pub(crate) struct SelectorState {
    /// Value as of the most recent evaluation
    pub(crate) prev: Option<Value>,
    /// When the listener last emitted
    pub(crate) last_emit: Option<Instant>,
    /// A throttled emission is already parked
    pub(crate) parked: bool,
}

/// One registered selector listener
pub(crate) struct SelectorSub {
    pub(crate) id: u64,
    pub(crate) select: Select,
    pub(crate) equality: EqualityFn,
    pub(crate) callback: ChangeCallback,
    pub(crate) throttle_ms: Option<u64>,
    pub(crate) scheduler: Option<Scheduler>,
    /// Set on unsubscribe; checked at fire time so a torn-down listener
    /// never emits even if an emission was already scheduled
    pub(crate) cancelled: AtomicBool,
    pub(crate) state: Mutex<SelectorState>,
}

/// A throttled emission waiting for its window to elapse
pub(crate) struct ParkedEmission {
    pub(crate) sub: Arc<SelectorSub>,
    pub(crate) due: Instant,
}
