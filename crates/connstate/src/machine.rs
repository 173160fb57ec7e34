//! Connection state orchestrator
//!
//! [`ConnectionStateMachine`] owns one [`ConnectionContext`] per live
//! connection, routes every inbound operation through the processor for the
//! context's current state, and applies handshake transitions.
//!
//! Each context sits behind its own async mutex. A [`ConnectionHandle`]
//! holds that lock for a whole call, including the credential check, so two
//! tasks acting on the same connection are serialized while different
//! connections never contend.

use crate::context::{ConnectionContext, ConnectionId};
use crate::error::{Error, Result, StateResult};
use crate::operation::OperationDescriptor;
use crate::security::{Credentials, SecurityMode};
use crate::state::ConnectionState;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Validate `operation` against the context's current state
///
/// A denial has no side effect; the error goes back to the client as is.
pub fn dispatch(
    context: &ConnectionContext,
    operation: &OperationDescriptor,
) -> StateResult<()> {
    let processor = context.state().processor();
    processor
        .validate_operation(context, operation)
        .map_err(|e| {
            debug!(
                "{}: {} ({}) denied in state {}, accepted {:?}: {}",
                context.id(),
                operation.name(),
                operation.kind(),
                processor.name(),
                processor.accepted_operations(),
                e
            );
            e
        })
}

/// Start the handshake on a connection
///
/// The handshake request is validated like any other operation first, so a
/// second handshake while one is in progress is refused with
/// `AUTHENTICATION_REQUIRED` and the state stays `Authenticating`.
pub fn begin_handshake(context: &mut ConnectionContext) -> StateResult<()> {
    dispatch(context, &OperationDescriptor::handshake_start())?;

    let next = context.state().processor().request_authentication()?;
    info!(
        "{}: handshake started ({} -> {})",
        context.id(),
        context.state(),
        next
    );
    context.set_state(next);
    Ok(())
}

/// Submit credentials for a started handshake
///
/// The context is written only after the verifier answers. Dropping the
/// returned future mid-verification leaves the context exactly as it was.
pub async fn complete_handshake(
    context: &mut ConnectionContext,
    credentials: &Credentials,
) -> StateResult<()> {
    dispatch(context, &OperationDescriptor::credential_submission())?;

    let processor = context.state().processor();
    match processor.submit_credentials(context, credentials).await {
        Ok((next, identity)) => {
            info!(
                "{}: authenticated as {} ({} -> {})",
                context.id(),
                identity,
                context.state(),
                next
            );
            context.set_state(next);
            context.set_identity(identity);
            Ok(())
        }
        Err(e) => {
            if e.is_authentication_failure() {
                warn!(
                    "{}: authentication failed for {} from {}: {}",
                    context.id(),
                    credentials.principal,
                    context.peer_addr(),
                    e.message()
                );
            } else {
                debug!("{}: credential submission refused: {}", context.id(), e);
            }
            Err(e)
        }
    }
}

/// Shared, lockable reference to one connection's context
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    context: Arc<Mutex<ConnectionContext>>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub async fn state(&self) -> ConnectionState {
        self.context.lock().await.state()
    }

    /// Principal of the verified identity, once authenticated
    pub async fn principal(&self) -> Option<String> {
        self.context
            .lock()
            .await
            .identity()
            .map(|identity| identity.principal.clone())
    }

    pub async fn dispatch(&self, operation: &OperationDescriptor) -> StateResult<()> {
        let context = self.context.lock().await;
        dispatch(&context, operation)
    }

    pub async fn begin_handshake(&self) -> StateResult<()> {
        let mut context = self.context.lock().await;
        begin_handshake(&mut context)
    }

    pub async fn complete_handshake(&self, credentials: &Credentials) -> StateResult<()> {
        let mut context = self.context.lock().await;
        complete_handshake(&mut context, credentials).await
    }
}

/// Registry of live connection contexts
#[derive(Debug)]
pub struct ConnectionStateMachine {
    mode: SecurityMode,
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
}

impl ConnectionStateMachine {
    pub fn new(mode: SecurityMode) -> Self {
        Self {
            mode,
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn security_mode(&self) -> &SecurityMode {
        &self.mode
    }

    /// Create and register the context for a newly accepted connection
    pub async fn accept(&self, peer_addr: SocketAddr) -> ConnectionHandle {
        let context = ConnectionContext::accept(peer_addr, &self.mode);
        let handle = ConnectionHandle {
            id: context.id(),
            context: Arc::new(Mutex::new(context)),
        };
        info!(
            "{}: accepted from {} (security {})",
            handle.id,
            peer_addr,
            if self.mode.is_enabled() { "enabled" } else { "disabled" }
        );
        self.connections
            .write()
            .await
            .insert(handle.id, handle.clone());
        handle
    }

    /// Forget a closed connection
    ///
    /// Outstanding handles keep the context alive until they drop, but the
    /// connection can no longer be looked up.
    pub async fn close(&self, id: ConnectionId) -> Result<()> {
        match self.connections.write().await.remove(&id) {
            Some(_) => {
                debug!("{}: closed", id);
                Ok(())
            }
            None => Err(Error::UnknownConnection(id)),
        }
    }

    pub async fn get(&self, id: ConnectionId) -> Result<ConnectionHandle> {
        self.connections
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownConnection(id))
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Validate an operation on a registered connection
    pub async fn dispatch(&self, id: ConnectionId, operation: &OperationDescriptor) -> Result<()> {
        self.get(id)
            .await?
            .dispatch(operation)
            .await
            .map_err(Error::from)
    }

    pub async fn begin_handshake(&self, id: ConnectionId) -> Result<()> {
        self.get(id)
            .await?
            .begin_handshake()
            .await
            .map_err(Error::from)
    }

    pub async fn complete_handshake(
        &self,
        id: ConnectionId,
        credentials: &Credentials,
    ) -> Result<()> {
        self.get(id)
            .await?
            .complete_handshake(credentials)
            .await
            .map_err(Error::from)
    }
}
