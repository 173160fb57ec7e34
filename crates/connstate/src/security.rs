//! Security backend capability interfaces
//!
//! The state machine never verifies credentials or evaluates permissions
//! itself. It consults two injected services:
//!
//! - [`CredentialVerifier`]: turns presented credentials into an [`Identity`]
//! - [`Authorizer`]: decides whether an identity may run an operation
//!
//! Both are process-wide, shared across connections, and handed to each
//! connection context at accept time through [`SecurityMode`].

use crate::operation::OperationDescriptor;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Credentials presented in a credential-submission request
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub principal: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(principal: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("principal", &self.principal)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Verified identity of an authenticated connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub principal: String,
    pub attributes: HashMap<String, String>,
}

impl Identity {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.principal)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("credential verification failed: {reason}")]
pub struct VerificationFailure {
    pub reason: String,
}

impl VerificationFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{principal} is not authorized for {operation}: {reason}")]
pub struct AuthorizationFailure {
    pub principal: String,
    pub operation: String,
    pub reason: String,
}

/// Credential verification service
///
/// Implementations may block on a remote directory or run asynchronously;
/// the caller holds the connection's own lock for the whole call, so
/// implementations must not call back into the same connection.
#[async_trait]
pub trait CredentialVerifier: Send + Sync + fmt::Debug {
    async fn verify(&self, credentials: &Credentials) -> Result<Identity, VerificationFailure>;
}

/// Per-operation authorization service
pub trait Authorizer: Send + Sync + fmt::Debug {
    fn check(
        &self,
        identity: &Identity,
        operation: &OperationDescriptor,
    ) -> Result<(), AuthorizationFailure>;
}

/// Authorizer that permits every operation for any authenticated identity
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllAuthorizer;

impl Authorizer for AllowAllAuthorizer {
    fn check(
        &self,
        _identity: &Identity,
        _operation: &OperationDescriptor,
    ) -> Result<(), AuthorizationFailure> {
        Ok(())
    }
}

/// Handles to the security services used by a security-enabled connection
#[derive(Debug, Clone)]
pub struct SecurityBackend {
    verifier: Arc<dyn CredentialVerifier>,
    authorizer: Arc<dyn Authorizer>,
}

impl SecurityBackend {
    pub fn new(verifier: Arc<dyn CredentialVerifier>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            verifier,
            authorizer,
        }
    }

    /// Backend where a single service both verifies and authorizes
    pub fn from_shared<T>(service: Arc<T>) -> Self
    where
        T: CredentialVerifier + Authorizer + 'static,
    {
        Self {
            verifier: service.clone(),
            authorizer: service,
        }
    }

    pub fn verifier(&self) -> &dyn CredentialVerifier {
        self.verifier.as_ref()
    }

    pub fn authorizer(&self) -> &dyn Authorizer {
        self.authorizer.as_ref()
    }
}

/// Server-wide security configuration, read once per accepted connection
#[derive(Debug, Clone)]
pub enum SecurityMode {
    Disabled,
    Enabled(SecurityBackend),
}

impl SecurityMode {
    pub fn is_enabled(&self) -> bool {
        matches!(self, SecurityMode::Enabled(_))
    }

    pub fn backend(&self) -> Option<&SecurityBackend> {
        match self {
            SecurityMode::Enabled(backend) => Some(backend),
            SecurityMode::Disabled => None,
        }
    }
}
