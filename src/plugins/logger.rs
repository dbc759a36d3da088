//! Change-logging plugin
//!
//! Emits every write event and (at trace level) the post-notify snapshot
//! through the `log` facade. Uses nothing but the public [`Plugin`]
//! contract.

use crate::error::{Result, StoreError};
use crate::store::{Plugin, PluginContext, WriteInfo};

const TARGET: &str = "statescope";

/// Logs writes at debug level, snapshots at trace level, and captured
/// errors at warn level
#[derive(Debug, Default)]
pub struct LoggerPlugin;

impl LoggerPlugin {
    /// New logger plugin
    pub fn new() -> Self {
        Self
    }
}

impl Plugin for LoggerPlugin {
    fn name(&self) -> &str {
        "logger"
    }

    fn on_after_write(&self, _ctx: &PluginContext, info: &WriteInfo) -> Result<()> {
        let path = info
            .path
            .as_ref()
            .map(|p| p.join("."))
            .unwrap_or_else(|| "<root>".to_string());
        log::debug!(target: TARGET, "write {path} source={:?}", info.source);
        Ok(())
    }

    fn on_notify_end(&self, ctx: &PluginContext) -> Result<()> {
        if log::log_enabled!(target: TARGET, log::Level::Trace) {
            log::trace!(target: TARGET, "state changed: {}", ctx.snapshot());
        }
        Ok(())
    }

    fn on_error(&self, _ctx: &PluginContext, error: &StoreError) {
        log::warn!(target: TARGET, "store error: {error}");
    }
}
