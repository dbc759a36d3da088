//! Reactive store: core engine, tracked nodes, plugin pipeline

pub mod core;
pub mod node;
pub mod pipeline;
pub mod selector;

pub use self::core::{CoreStore, CoreStoreOptions, StoreHooks, WriteInfo, WriteSource};
pub use node::Node;
pub use pipeline::{
    Action, DispatchHandler, Patch, PatchOp, Plugin, PluginContext, PluginRegistration, Store,
    StoreOptions,
};
pub use selector::{ChangeCallback, EqualityFn, Job, Scheduler, SelectorOptions};
