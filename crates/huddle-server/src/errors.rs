//! Hub error types.

use huddle_core::ConnectionId;
use thiserror::Error;

/// Errors surfaced by the hub's setup and listener surface.
#[derive(Debug, Error)]
pub enum HubError {
    /// `listen` was called on a hub already merged into a host router.
    #[error("cannot listen on a port when the hub is mounted on a host router")]
    MountedOnHost,

    /// A route with the same path was already created.
    #[error("route '{0}' already exists")]
    RouteExists(String),

    /// A connection targeted a path with no route.
    #[error("no route registered for '{0}'")]
    UnknownRoute(String),

    /// Every allocation attempt lost a registration race.
    #[error("could not allocate a unique connection id after {attempts} attempts")]
    IdentityExhausted {
        /// Attempts made before giving up.
        attempts: usize,
    },

    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Other listener I/O failure.
    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the connection registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Another live connection already holds this ID.
    #[error("connection id '{0}' is already registered")]
    IdentityConflict(ConnectionId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mounted_on_host_display() {
        assert!(HubError::MountedOnHost.to_string().contains("mounted"));
    }

    #[test]
    fn bind_error_keeps_source() {
        let err = HubError::Bind {
            addr: "127.0.0.1:1".into(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.to_string().contains("127.0.0.1:1"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn identity_conflict_display() {
        let err = RegistryError::IdentityConflict(ConnectionId::from("dup"));
        assert_eq!(err.to_string(), "connection id 'dup' is already registered");
    }
}
