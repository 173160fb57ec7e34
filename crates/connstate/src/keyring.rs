//! Keyring file parsing and keyring-backed security services
//!
//! A keyring lists principals with a password digest and per-resource
//! capabilities:
//!
//! ```text
//! [alice]
//!     key = <base64 of SHA-256(password)>
//!     caps data = "allow rw"
//!     caps cluster = "allow r"
//! ```
//!
//! [`Keyring`] implements both [`CredentialVerifier`] and [`Authorizer`], so
//! one loaded file can back a whole server.

use crate::error::{Error, Result};
use crate::operation::{Operation, OperationDescriptor, Resource, ResourcePermission};
use crate::security::{
    AuthorizationFailure, Authorizer, CredentialVerifier, Credentials, Identity,
    VerificationFailure,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Capabilities granted on one resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caps {
    read: bool,
    write: bool,
    manage: bool,
    region: Option<String>,
}

impl Caps {
    /// Parse a capability string such as `allow rw region=orders`
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim().trim_matches('"');
        let mut words = text.split_whitespace();

        match words.next() {
            Some("allow") => {}
            _ => {
                return Err(Error::keyring_error(&format!(
                    "capability must start with 'allow': {}",
                    text
                )))
            }
        }

        let mut caps = Caps::default();
        match words.next() {
            Some("*") => {
                caps.read = true;
                caps.write = true;
                caps.manage = true;
            }
            Some(flags) if !flags.is_empty() && flags.chars().all(|c| c == 'r' || c == 'w') => {
                caps.read = flags.contains('r');
                caps.write = flags.contains('w');
            }
            other => {
                return Err(Error::keyring_error(&format!(
                    "invalid capability flags: {:?}",
                    other
                )))
            }
        }

        for word in words {
            match word.split_once('=') {
                Some(("region", name)) if !name.is_empty() => caps.region = Some(name.to_string()),
                _ => {
                    return Err(Error::keyring_error(&format!(
                        "unknown capability qualifier: {}",
                        word
                    )))
                }
            }
        }

        Ok(caps)
    }

    /// Permissions these caps hold on `resource`
    fn permissions(&self, resource: Resource) -> impl Iterator<Item = ResourcePermission> + '_ {
        [
            (Operation::Read, self.read),
            (Operation::Write, self.write),
            (Operation::Manage, self.manage),
        ]
        .into_iter()
        .filter(|(_, held)| *held)
        .map(move |(operation, _)| {
            let permission = ResourcePermission::new(resource, operation);
            match &self.region {
                Some(region) => permission.with_target(region.clone()),
                None => permission,
            }
        })
    }

    fn grants(&self, wanted: &ResourcePermission) -> bool {
        self.permissions(wanted.resource).any(|held| held.implies(wanted))
    }
}

const UNKNOWN_PRINCIPAL_DIGEST: [u8; 32] = [0; 32];

#[derive(Debug, Clone)]
struct Entry {
    digest: Vec<u8>,
    caps: HashMap<Resource, Caps>,
}

/// Parsed keyring
#[derive(Debug, Clone, Default)]
pub struct Keyring {
    entries: HashMap<String, Entry>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load keyring from file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::keyring_error(&format!(
                "failed to read keyring file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_string(&content)
    }

    /// Parse keyring from string content
    pub fn from_string(content: &str) -> Result<Self> {
        let mut keyring = Keyring::new();
        let mut sections: Vec<(String, Option<Vec<u8>>, HashMap<Resource, Caps>)> = Vec::new();

        for line in content.lines() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                let principal = line[1..line.len() - 1].trim().to_string();
                debug!("Found principal: {}", principal);
                sections.push((principal, None, HashMap::new()));
                continue;
            }

            let Some((principal, digest, caps)) = sections.last_mut() else {
                warn!("Ignoring keyring line outside any section: {}", line);
                continue;
            };

            let Some((key, value)) = line.split_once('=') else {
                warn!("Ignoring malformed keyring line for {}: {}", principal, line);
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "key" => {
                    let decoded = STANDARD.decode(value).map_err(|e| {
                        Error::keyring_error(&format!("invalid key for {}: {}", principal, e))
                    })?;
                    *digest = Some(decoded);
                }
                "caps data" => {
                    caps.insert(Resource::Data, Caps::parse(value)?);
                }
                "caps cluster" => {
                    caps.insert(Resource::Cluster, Caps::parse(value)?);
                }
                _ => {
                    warn!("Unknown keyring field: {} = {}", key, value);
                }
            }
        }

        for (principal, digest, caps) in sections {
            match digest {
                Some(digest) => {
                    keyring.entries.insert(principal, Entry { digest, caps });
                }
                None => warn!("Keyring entry {} has no key, skipping", principal),
            }
        }

        debug!("Loaded {} principals from keyring", keyring.entries.len());
        Ok(keyring)
    }

    /// Add or replace a principal with a plaintext password
    pub fn add(&mut self, principal: &str, password: &str) {
        self.entries.insert(
            principal.to_string(),
            Entry {
                digest: Sha256::digest(password.as_bytes()).to_vec(),
                caps: HashMap::new(),
            },
        );
    }

    /// Grant capabilities on a resource to an existing principal
    pub fn grant(&mut self, principal: &str, resource: Resource, caps: &str) -> Result<()> {
        let caps = Caps::parse(caps)?;
        let entry = self
            .entries
            .get_mut(principal)
            .ok_or_else(|| Error::keyring_error(&format!("no such principal: {}", principal)))?;
        entry.caps.insert(resource, caps);
        Ok(())
    }

    /// Digest of a password in keyring file encoding
    pub fn hash_secret(password: &str) -> String {
        STANDARD.encode(Sha256::digest(password.as_bytes()))
    }

    pub fn principals(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CredentialVerifier for Keyring {
    async fn verify(
        &self,
        credentials: &Credentials,
    ) -> std::result::Result<Identity, VerificationFailure> {
        let presented = Sha256::digest(credentials.secret.as_bytes());
        match self.entries.get(&credentials.principal) {
            Some(entry) if bool::from(entry.digest.as_slice().ct_eq(presented.as_slice())) => {
                Ok(Identity::new(credentials.principal.clone()))
            }
            Some(_) => {
                warn!("Wrong secret presented for {}", credentials.principal);
                Err(VerificationFailure::new("invalid principal or secret"))
            }
            None => {
                // same comparison cost as a known principal
                let _ = UNKNOWN_PRINCIPAL_DIGEST.ct_eq(presented.as_slice());
                warn!("Unknown principal {}", credentials.principal);
                Err(VerificationFailure::new("invalid principal or secret"))
            }
        }
    }
}

impl Authorizer for Keyring {
    fn check(
        &self,
        identity: &Identity,
        operation: &OperationDescriptor,
    ) -> std::result::Result<(), AuthorizationFailure> {
        let deny = |reason: &str| AuthorizationFailure {
            principal: identity.principal.clone(),
            operation: operation.name().to_string(),
            reason: reason.to_string(),
        };

        let Some(permission) = operation.permission() else {
            if operation.kind().requires_authorization() {
                return Err(deny("operation carries no permission to check"));
            }
            return Ok(());
        };
        let entry = self
            .entries
            .get(&identity.principal)
            .ok_or_else(|| deny("principal not in keyring"))?;
        let caps = entry
            .caps
            .get(&permission.resource)
            .ok_or_else(|| deny("no capabilities on resource"))?;

        if caps.grants(permission) {
            Ok(())
        } else {
            Err(deny(&format!("capabilities do not grant {}", permission)))
        }
    }
}
