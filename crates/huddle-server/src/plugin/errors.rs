//! Plugin hook and method error types.

use thiserror::Error;

/// Result alias for plugin hooks.
pub type HookResult<T = ()> = Result<T, HookError>;

/// A hook that did not complete normally.
///
/// The pipeline logs these and carries on; they never reach the client.
#[derive(Debug, Error)]
pub enum HookError {
    /// The hook returned an error.
    #[error("{message}")]
    Failed {
        /// Message from the hook.
        message: String,
    },

    /// The hook panicked.
    #[error("hook panicked: {message}")]
    Panicked {
        /// Panic payload, when it was a string.
        message: String,
    },

    /// The hook ran past the configured budget.
    #[error("hook timed out after {timeout_ms}ms")]
    TimedOut {
        /// Configured timeout in milliseconds.
        timeout_ms: u64,
    },
}

impl HookError {
    /// Build a [`HookError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Errors from invoking an exposed plugin method.
#[derive(Debug, Error)]
pub enum MethodError {
    /// No plugin exposes a method with this name.
    #[error("method '{0}' not found")]
    NotFound(String),

    /// The method ran and failed.
    #[error("method '{method}' failed: {source}")]
    Failed {
        /// Method name.
        method: String,
        /// What the method reported.
        #[source]
        source: HookError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_display_is_the_message() {
        assert_eq!(HookError::failed("no token").to_string(), "no token");
    }

    #[test]
    fn timed_out_display() {
        let err = HookError::TimedOut { timeout_ms: 250 };
        assert_eq!(err.to_string(), "hook timed out after 250ms");
    }

    #[test]
    fn method_failed_wraps_hook_error() {
        let err = MethodError::Failed {
            method: "increase".into(),
            source: HookError::failed("bad input"),
        };
        assert_eq!(err.to_string(), "method 'increase' failed: bad input");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn not_found_display() {
        assert_eq!(
            MethodError::NotFound("nope".into()).to_string(),
            "method 'nope' not found"
        );
    }
}
