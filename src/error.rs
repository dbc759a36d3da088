//! Error types for store and context operations
//!
//! Nothing in this crate is fatal: failures raised by user-supplied
//! callbacks (selectors, listeners, plugin hooks, dispatch handlers) are
//! captured as [`StoreError`] values and routed to the error hooks of the
//! store that observed them. Absent values are represented as `Option`,
//! never as errors.

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error raised by a store, context manager, or one of their callbacks
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// A selector failed while deriving a value from a snapshot
    #[error("Selector error: {message}")]
    Selector {
        /// Human-readable selector failure message
        message: String,
    },

    /// A change listener failed while handling a notification
    #[error("Listener error: {message}")]
    Listener {
        /// Human-readable listener failure message
        message: String,
    },

    /// A plugin hook failed
    #[error("Plugin '{plugin}' failed in {hook}: {message}")]
    Plugin {
        /// Name of the failing plugin
        plugin: String,
        /// Hook that was being invoked
        hook: String,
        /// Human-readable hook failure message
        message: String,
    },

    /// The configured dispatch handler failed while applying an action
    #[error("Dispatch handler error for action '{action}': {message}")]
    Dispatch {
        /// Type tag of the action being dispatched
        action: String,
        /// Human-readable handler failure message
        message: String,
    },

    /// Generic error for callback adapters and tests
    #[error("Store error: {message}")]
    Generic {
        /// Generic error message
        message: String,
    },
}

impl StoreError {
    /// Create a selector evaluation error
    pub fn selector(message: impl Into<String>) -> Self {
        Self::Selector {
            message: message.into(),
        }
    }

    /// Create a listener error
    pub fn listener(message: impl Into<String>) -> Self {
        Self::Listener {
            message: message.into(),
        }
    }

    /// Create a plugin hook error
    pub fn plugin(
        plugin: impl Into<String>,
        hook: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Plugin {
            plugin: plugin.into(),
            hook: hook.into(),
            message: message.into(),
        }
    }

    /// Create a dispatch handler error
    pub fn dispatch(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Dispatch {
            action: action.into(),
            message: message.into(),
        }
    }

    /// Create a generic error
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::plugin("logger", "on_after_write", "sink closed");
        assert_eq!(
            err.to_string(),
            "Plugin 'logger' failed in on_after_write: sink closed"
        );

        let err = StoreError::selector("not an object");
        assert_eq!(err.to_string(), "Selector error: not an object");
    }

    #[test]
    fn test_constructors() {
        assert!(matches!(
            StoreError::dispatch("counter/add", "overflow"),
            StoreError::Dispatch { .. }
        ));
        assert!(matches!(
            StoreError::listener("boom"),
            StoreError::Listener { .. }
        ));
    }
}
