//! Reactive state container over JSON values with hierarchical scoping
//!
//! Consumers mutate plain nested data (`serde_json::Value`) through
//! dotted paths or tracked [`Node`] handles and receive fine-grained
//! change notifications without wiring observers by hand.
//!
//! Two subsystems:
//!
//! - the **store engine** ([`CoreStore`] / [`Store`]): path-addressed
//!   mutation interception, batched notification, selector subscriptions
//!   with equality/throttle/scheduling policies, and a plugin pipeline
//!   wrapping every write, notify and dispatch event;
//! - the **context manager** ([`ContextManager`]): a forest of named
//!   scopes, each backed by its own store, with ancestor-fallback value
//!   resolution, configurable write routing, and chain-aware
//!   subscriptions.
//!
//! ```
//! use serde_json::json;
//! use statescope::{ContextManager, SubscribeValueOptions};
//!
//! let scopes = ContextManager::new();
//! scopes.create_context("app", json!({"theme": "light"}), None);
//! scopes.create_context("page", json!({}), Some("app"));
//!
//! // Resolution falls back to the nearest ancestor that has the value.
//! assert_eq!(scopes.get_value("page", "theme").unwrap(), Some(json!("light")));
//!
//! let sub = scopes.subscribe_value(
//!     "page",
//!     "theme",
//!     SubscribeValueOptions::default(),
//!     |theme| {
//!         println!("theme is now {theme:?}");
//!         Ok(())
//!     },
//! );
//! scopes.set_value("app", "theme", json!("dark"));
//! sub.unsubscribe();
//! ```

#![warn(missing_docs)]

pub mod context;
pub mod error;
pub mod path;
pub mod plugins;
pub mod store;
pub mod subscription;

pub use context::{
    ContextManager, ContextManagerOptions, SubscribeValueOptions, WritePolicy, WriteTargetFn,
};
pub use error::{Result, StoreError};
pub use path::{
    Select, SelectorFn, can_set_path, delete_path, get_path, has_path, set_path, split_path,
};
pub use plugins::LoggerPlugin;
pub use store::{
    Action, CoreStore, CoreStoreOptions, DispatchHandler, EqualityFn, Job, Node, Patch, PatchOp,
    Plugin, PluginContext, PluginRegistration, Scheduler, SelectorOptions, Store, StoreHooks,
    StoreOptions, WriteInfo, WriteSource,
};
pub use subscription::Subscription;
