//! Hierarchical context scopes over stores

mod manager;

pub use manager::{
    ContextManager, ContextManagerOptions, SubscribeValueOptions, WritePolicy, WriteTargetFn,
};
