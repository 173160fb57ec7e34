//! Per-request operation descriptors
//!
//! The codec layer builds one [`OperationDescriptor`] for each inbound
//! message. Descriptors are immutable and carry everything the state
//! machine and the authorizer need to judge the request.

use crate::error::{ConnectionStateError, StateResult};
use std::fmt;

/// Category of a requested operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Start of the authentication handshake
    HandshakeStart,
    /// Credential submission continuing a started handshake
    CredentialSubmission,
    /// Connection metadata ("what are my capabilities")
    ConnectionMetadata,
    DataRead,
    DataWrite,
    Admin,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::HandshakeStart => "handshake-start",
            OperationKind::CredentialSubmission => "credential-submission",
            OperationKind::ConnectionMetadata => "connection-metadata",
            OperationKind::DataRead => "data-read",
            OperationKind::DataWrite => "data-write",
            OperationKind::Admin => "admin",
        }
    }

    /// Operations that run business logic and so need authorization
    pub fn requires_authorization(&self) -> bool {
        matches!(
            self,
            OperationKind::DataRead | OperationKind::DataWrite | OperationKind::Admin
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Data,
    Cluster,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Write,
    Manage,
}

/// Permission an operation needs, checked by the authorizer
///
/// `target` is the region name and `key` the entry key. A `None` target or
/// key acts as a wildcard when one permission is tested against another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourcePermission {
    pub resource: Resource,
    pub operation: Operation,
    pub target: Option<String>,
    pub key: Option<String>,
}

impl ResourcePermission {
    pub fn new(resource: Resource, operation: Operation) -> Self {
        Self {
            resource,
            operation,
            target: None,
            key: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Whether holding `self` grants `other`
    pub fn implies(&self, other: &ResourcePermission) -> bool {
        if self.resource != other.resource || self.operation != other.operation {
            return false;
        }
        let target_ok = match (&self.target, &other.target) {
            (None, _) => true,
            (Some(mine), Some(theirs)) => mine == theirs,
            (Some(_), None) => false,
        };
        let key_ok = match (&self.key, &other.key) {
            (None, _) => true,
            (Some(mine), Some(theirs)) => mine == theirs,
            (Some(_), None) => false,
        };
        target_ok && key_ok
    }
}

impl fmt::Display for ResourcePermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resource = match self.resource {
            Resource::Data => "DATA",
            Resource::Cluster => "CLUSTER",
        };
        let operation = match self.operation {
            Operation::Read => "READ",
            Operation::Write => "WRITE",
            Operation::Manage => "MANAGE",
        };
        write!(f, "{}:{}", resource, operation)?;
        if let Some(target) = &self.target {
            write!(f, ":{}", target)?;
            if let Some(key) = &self.key {
                write!(f, ":{}", key)?;
            }
        }
        Ok(())
    }
}

/// Immutable description of one inbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDescriptor {
    name: String,
    kind: OperationKind,
    permission: Option<ResourcePermission>,
}

impl OperationDescriptor {
    pub fn new(
        name: impl Into<String>,
        kind: OperationKind,
        permission: Option<ResourcePermission>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            permission,
        }
    }

    pub fn handshake_start() -> Self {
        Self::new("HandshakeRequest", OperationKind::HandshakeStart, None)
    }

    pub fn credential_submission() -> Self {
        Self::new(
            "AuthenticationRequest",
            OperationKind::CredentialSubmission,
            None,
        )
    }

    pub fn connection_metadata(name: impl Into<String>) -> Self {
        Self::new(name, OperationKind::ConnectionMetadata, None)
    }

    pub fn data_read(name: impl Into<String>, region: &str, key: Option<&str>) -> Self {
        let mut perm = ResourcePermission::new(Resource::Data, Operation::Read).with_target(region);
        if let Some(key) = key {
            perm = perm.with_key(key);
        }
        Self::new(name, OperationKind::DataRead, Some(perm))
    }

    pub fn data_write(name: impl Into<String>, region: &str, key: Option<&str>) -> Self {
        let mut perm = ResourcePermission::new(Resource::Data, Operation::Write).with_target(region);
        if let Some(key) = key {
            perm = perm.with_key(key);
        }
        Self::new(name, OperationKind::DataWrite, Some(perm))
    }

    pub fn admin(name: impl Into<String>) -> Self {
        Self::new(
            name,
            OperationKind::Admin,
            Some(ResourcePermission::new(Resource::Cluster, Operation::Manage)),
        )
    }

    /// Build a descriptor from a wire message type name
    ///
    /// Data operations must name a region. Unrecognized message types and
    /// malformed data requests are rejected with `UNKNOWN_OPERATION`.
    pub fn from_message_type(
        message_type: &str,
        region: Option<&str>,
        key: Option<&str>,
    ) -> StateResult<Self> {
        let need_region = || {
            region.ok_or_else(|| {
                ConnectionStateError::unknown_operation(&format!(
                    "{} requires a region name",
                    message_type
                ))
            })
        };

        let descriptor = match message_type {
            "HandshakeRequest" => Self::handshake_start(),
            "AuthenticationRequest" => Self::credential_submission(),
            "GetServerRequest" => Self::connection_metadata(message_type),
            // listing regions reads every region
            "GetRegionNamesRequest" => Self::new(
                message_type,
                OperationKind::DataRead,
                Some(ResourcePermission::new(Resource::Data, Operation::Read)),
            ),
            "GetRequest" | "GetAllRequest" | "GetSizeRequest" | "KeySetRequest" => {
                Self::data_read(message_type, need_region()?, key)
            }
            "PutRequest" | "PutAllRequest" | "PutIfAbsentRequest" | "RemoveRequest"
            | "ClearRequest" | "ExecuteFunctionOnRegionRequest" => {
                Self::data_write(message_type, need_region()?, key)
            }
            "ExecuteFunctionOnMemberRequest" | "DisconnectClientRequest" => {
                Self::admin(message_type)
            }
            other => {
                return Err(ConnectionStateError::unknown_operation(&format!(
                    "unrecognized message type '{}'",
                    other
                )))
            }
        };
        Ok(descriptor)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn permission(&self) -> Option<&ResourcePermission> {
        self.permission.as_ref()
    }
}
