//! Connection security state machine
//!
//! Each [`ConnectionState`] has a stateless processor implementing
//! [`StateProcessor`]. The processor decides which operations the
//! connection may run in that state and which transitions are legal:
//!
//! ```text
//! NoSecurity      ----------------------------------> (terminal, all ops allowed)
//! Unauthenticated --request_authentication()--------> Authenticating
//! Authenticating  --submit_credentials(ok)----------> Authenticated
//! Authenticating  --submit_credentials(bad)---------> Authenticating (error surfaced)
//! Authenticated   ----------------------------------> (terminal, ops subject to authz)
//! ```
//!
//! Processors never mutate the context. They return the next state and the
//! orchestrator in [`crate::machine`] applies it.

use crate::context::ConnectionContext;
use crate::error::{ConnectionStateError, StateResult};
use crate::operation::{OperationDescriptor, OperationKind};
use crate::security::{Credentials, Identity};
use async_trait::async_trait;
use std::fmt::Debug;

/// Security state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Server runs without security; nothing to authenticate
    NoSecurity,
    /// Security enabled, handshake not started
    Unauthenticated,
    /// Handshake started, credentials not yet accepted
    Authenticating,
    /// Credentials verified; lasts for the rest of the connection
    Authenticated,
}

impl ConnectionState {
    /// Get the state name as a string (for logging)
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::NoSecurity => "NO_SECURITY",
            ConnectionState::Unauthenticated => "UNAUTHENTICATED",
            ConnectionState::Authenticating => "AUTHENTICATING",
            ConnectionState::Authenticated => "AUTHENTICATED",
        }
    }

    /// Absorbing states: no transition ever leaves them
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::NoSecurity | ConnectionState::Authenticated
        )
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, ConnectionState::Authenticated)
    }

    /// Processor implementing this state's rules
    pub fn processor(&self) -> &'static dyn StateProcessor {
        match self {
            ConnectionState::NoSecurity => &NoSecurity,
            ConnectionState::Unauthenticated => &Unauthenticated,
            ConnectionState::Authenticating => &Authenticating,
            ConnectionState::Authenticated => &Authenticated,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rules for one connection state
#[async_trait]
pub trait StateProcessor: Debug + Send + Sync {
    /// Get the state this processor implements
    fn kind(&self) -> ConnectionState;

    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Operation kinds accepted without further checks (for logging)
    fn accepted_operations(&self) -> &[OperationKind];

    /// Decide whether `operation` may run on a connection in this state
    fn validate_operation(
        &self,
        context: &ConnectionContext,
        operation: &OperationDescriptor,
    ) -> StateResult<()>;

    /// Start a handshake, returning the next state
    fn request_authentication(&self) -> StateResult<ConnectionState>;

    /// Verify submitted credentials, returning the next state and the
    /// verified identity
    async fn submit_credentials(
        &self,
        context: &ConnectionContext,
        credentials: &Credentials,
    ) -> StateResult<(ConnectionState, Identity)>;
}

/// Implements `kind()` and `accepted_operations()` for a processor
///
/// # Example
/// ```ignore
/// impl_processor_boilerplate!(ConnectionState::NoSecurity, &[]);
/// ```
macro_rules! impl_processor_boilerplate {
    ($state_kind:expr, $accepted:expr) => {
        fn kind(&self) -> ConnectionState {
            $state_kind
        }

        fn accepted_operations(&self) -> &[OperationKind] {
            $accepted
        }
    };
}

const NOT_ENABLED: &str = "security is not enabled on this server";

/// Security disabled: everything but a handshake runs
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSecurity;

#[async_trait]
impl StateProcessor for NoSecurity {
    impl_processor_boilerplate!(
        ConnectionState::NoSecurity,
        &[
            OperationKind::CredentialSubmission,
            OperationKind::ConnectionMetadata,
            OperationKind::DataRead,
            OperationKind::DataWrite,
            OperationKind::Admin,
        ]
    );

    fn validate_operation(
        &self,
        _context: &ConnectionContext,
        operation: &OperationDescriptor,
    ) -> StateResult<()> {
        match operation.kind() {
            OperationKind::HandshakeStart => Err(
                ConnectionStateError::authentication_not_supported(NOT_ENABLED),
            ),
            _ => Ok(()),
        }
    }

    fn request_authentication(&self) -> StateResult<ConnectionState> {
        Err(ConnectionStateError::authentication_not_supported(
            NOT_ENABLED,
        ))
    }

    async fn submit_credentials(
        &self,
        _context: &ConnectionContext,
        _credentials: &Credentials,
    ) -> StateResult<(ConnectionState, Identity)> {
        Err(ConnectionStateError::authentication_not_supported(
            NOT_ENABLED,
        ))
    }
}

/// Security enabled, no handshake yet
#[derive(Debug, Clone, Copy, Default)]
pub struct Unauthenticated;

#[async_trait]
impl StateProcessor for Unauthenticated {
    impl_processor_boilerplate!(
        ConnectionState::Unauthenticated,
        &[
            OperationKind::HandshakeStart,
            OperationKind::ConnectionMetadata
        ]
    );

    fn validate_operation(
        &self,
        _context: &ConnectionContext,
        operation: &OperationDescriptor,
    ) -> StateResult<()> {
        match operation.kind() {
            OperationKind::HandshakeStart | OperationKind::ConnectionMetadata => Ok(()),
            OperationKind::CredentialSubmission => Err(
                ConnectionStateError::authentication_required(
                    "credentials submitted before the handshake was started",
                ),
            ),
            kind => Err(ConnectionStateError::authentication_required(&format!(
                "authentication is required before {} operations",
                kind
            ))),
        }
    }

    fn request_authentication(&self) -> StateResult<ConnectionState> {
        Ok(ConnectionState::Authenticating)
    }

    async fn submit_credentials(
        &self,
        _context: &ConnectionContext,
        _credentials: &Credentials,
    ) -> StateResult<(ConnectionState, Identity)> {
        Err(ConnectionStateError::authentication_required(
            "credentials submitted before the handshake was started",
        ))
    }
}

/// Handshake started, waiting for acceptable credentials
#[derive(Debug, Clone, Copy, Default)]
pub struct Authenticating;

#[async_trait]
impl StateProcessor for Authenticating {
    impl_processor_boilerplate!(
        ConnectionState::Authenticating,
        &[OperationKind::CredentialSubmission]
    );

    fn validate_operation(
        &self,
        _context: &ConnectionContext,
        operation: &OperationDescriptor,
    ) -> StateResult<()> {
        match operation.kind() {
            OperationKind::CredentialSubmission => Ok(()),
            OperationKind::HandshakeStart => Err(ConnectionStateError::authentication_required(
                "a handshake is already in progress on this connection",
            )),
            kind => Err(ConnectionStateError::authentication_required(&format!(
                "authentication must complete before {} operations",
                kind
            ))),
        }
    }

    fn request_authentication(&self) -> StateResult<ConnectionState> {
        Err(ConnectionStateError::already_authenticated(
            "a handshake is already in progress on this connection",
        ))
    }

    async fn submit_credentials(
        &self,
        context: &ConnectionContext,
        credentials: &Credentials,
    ) -> StateResult<(ConnectionState, Identity)> {
        // Unauthenticated/Authenticating only exist with a backend attached.
        let backend = context.backend().ok_or_else(|| {
            ConnectionStateError::authentication_not_supported(NOT_ENABLED)
        })?;

        match backend.verifier().verify(credentials).await {
            Ok(identity) => Ok((ConnectionState::Authenticated, identity)),
            Err(failure) => Err(ConnectionStateError::invalid_credentials(&failure.reason)),
        }
    }
}

/// Authenticated: data and admin operations go through the authorizer
#[derive(Debug, Clone, Copy, Default)]
pub struct Authenticated;

#[async_trait]
impl StateProcessor for Authenticated {
    impl_processor_boilerplate!(
        ConnectionState::Authenticated,
        &[OperationKind::ConnectionMetadata]
    );

    fn validate_operation(
        &self,
        context: &ConnectionContext,
        operation: &OperationDescriptor,
    ) -> StateResult<()> {
        match operation.kind() {
            OperationKind::HandshakeStart | OperationKind::CredentialSubmission => Err(
                ConnectionStateError::already_authenticated(
                    "this connection is already authenticated",
                ),
            ),
            OperationKind::ConnectionMetadata => Ok(()),
            OperationKind::DataRead | OperationKind::DataWrite | OperationKind::Admin => {
                let (backend, identity) = match (context.backend(), context.identity()) {
                    (Some(backend), Some(identity)) => (backend, identity),
                    _ => {
                        return Err(ConnectionStateError::authorization_failed(
                            "no verified identity on this connection",
                        ))
                    }
                };
                backend
                    .authorizer()
                    .check(identity, operation)
                    .map_err(|e| ConnectionStateError::authorization_failed(&e.to_string()))
            }
        }
    }

    fn request_authentication(&self) -> StateResult<ConnectionState> {
        Err(ConnectionStateError::already_authenticated(
            "this connection is already authenticated",
        ))
    }

    async fn submit_credentials(
        &self,
        _context: &ConnectionContext,
        _credentials: &Credentials,
    ) -> StateResult<(ConnectionState, Identity)> {
        Err(ConnectionStateError::already_authenticated(
            "this connection is already authenticated",
        ))
    }
}
