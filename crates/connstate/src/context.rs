//! Per-connection security context

use crate::security::{Identity, SecurityBackend, SecurityMode};
use crate::state::ConnectionState;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of an accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Mutable security record of one live connection
///
/// Created when the transport accepts a connection and dropped when it
/// closes. `state` and `identity` change only through the transitions in
/// [`crate::machine`].
pub struct ConnectionContext {
    id: ConnectionId,
    peer_addr: SocketAddr,
    created_at: SystemTime,
    state: ConnectionState,
    backend: Option<SecurityBackend>,
    identity: Option<Identity>,
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("created_at", &self.created_at)
            .field("state", &self.state)
            .field("backend", &self.backend.as_ref().map(|_| "Some(...)"))
            .field("identity", &self.identity)
            .finish()
    }
}

impl ConnectionContext {
    /// Create the context for a freshly accepted connection
    ///
    /// The initial state is picked from the security mode here and never
    /// re-evaluated for this connection.
    pub fn accept(peer_addr: SocketAddr, mode: &SecurityMode) -> Self {
        let (state, backend) = match mode {
            SecurityMode::Disabled => (ConnectionState::NoSecurity, None),
            SecurityMode::Enabled(backend) => {
                (ConnectionState::Unauthenticated, Some(backend.clone()))
            }
        };
        Self {
            id: ConnectionId::next(),
            peer_addr,
            created_at: SystemTime::now(),
            state,
            backend,
            identity: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn backend(&self) -> Option<&SecurityBackend> {
        self.backend.as_ref()
    }

    /// Identity established by a successful handshake
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    pub(crate) fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::AllowAllAuthorizer;
    use crate::Keyring;
    use std::sync::Arc;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[test]
    fn test_initial_state_follows_security_mode() {
        let ctx = ConnectionContext::accept(peer(), &SecurityMode::Disabled);
        assert_eq!(ctx.state(), ConnectionState::NoSecurity);
        assert!(ctx.backend().is_none());

        let backend =
            SecurityBackend::new(Arc::new(Keyring::new()), Arc::new(AllowAllAuthorizer));
        let ctx = ConnectionContext::accept(peer(), &SecurityMode::Enabled(backend));
        assert_eq!(ctx.state(), ConnectionState::Unauthenticated);
        assert!(ctx.backend().is_some());
        assert!(ctx.identity().is_none());
        assert_eq!(ctx.peer_addr(), peer());
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionContext::accept(peer(), &SecurityMode::Disabled);
        let b = ConnectionContext::accept(peer(), &SecurityMode::Disabled);
        assert_ne!(a.id(), b.id());
        assert_eq!(ConnectionId::from_raw(9).to_string(), "conn#9");
    }

    #[test]
    fn test_identity_is_recorded() {
        let mut ctx = ConnectionContext::accept(peer(), &SecurityMode::Disabled);
        ctx.set_identity(Identity::new("alice"));
        assert_eq!(ctx.identity().map(|i| i.principal.as_str()), Some("alice"));
    }
}
