//! Server options loaded from the configuration file

use crate::error::{Result, ServerError};
use crate::server::ServerConfig;
use cacheconfig::{define_options, CacheConfig, Count, Duration};
use connstate::{Keyring, SecurityBackend, SecurityMode};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sections consulted for server options, most specific first
pub const SERVER_SECTIONS: &[&str] = &["server", "global"];

define_options! {
    /// Cache server options
    pub struct ServerOptions {
        /// Address the listener binds to
        listen_addr: String = String::from("127.0.0.1:40404"),

        /// Require clients to authenticate
        security_enabled: bool = false,

        /// Path of the keyring holding principals and caps
        keyring: String = String::new(),

        /// Consecutive failed credential submissions before the connection
        /// is closed (0 = unlimited)
        max_auth_failures: Count = Count(3),

        /// Upper bound on one credential check
        auth_timeout: Duration = Duration(std::time::Duration::from_secs(10)),
    }
}

impl ServerOptions {
    /// Load options from a config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = CacheConfig::from_file(path)?;
        Self::from_cache_config(&config)
    }

    /// Read options from the server sections, warning about keys no option
    /// consumes
    pub fn from_cache_config(config: &CacheConfig) -> Result<Self> {
        for section in SERVER_SECTIONS {
            for key in config.keys(section) {
                if !Self::option_names().contains(&key) {
                    warn!("ignoring unknown option '{}' in [{}]", key, section);
                }
            }
        }
        Ok(Self::from_config(config, SERVER_SECTIONS)?)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .map_err(|_| ServerError::InvalidAddress(self.listen_addr.clone()))
    }

    /// Build the security mode, loading the keyring when security is on
    pub fn security_mode(&self) -> Result<SecurityMode> {
        if !self.security_enabled {
            return Ok(SecurityMode::Disabled);
        }
        if self.keyring.is_empty() {
            return Err(ServerError::MissingKeyring);
        }
        let keyring = Keyring::from_file(&self.keyring)?;
        info!(
            "loaded keyring {} with {} principal(s)",
            self.keyring,
            keyring.len()
        );
        debug!(
            "keyring principals: {:?}",
            keyring.principals().collect::<Vec<_>>()
        );
        Ok(SecurityMode::Enabled(SecurityBackend::from_shared(Arc::new(
            keyring,
        ))))
    }

    pub fn to_server_config(&self) -> Result<ServerConfig> {
        Ok(ServerConfig {
            listen_addr: self.listen_addr()?,
            security_mode: self.security_mode()?,
            max_auth_failures: u32::try_from(self.max_auth_failures.0).unwrap_or(u32::MAX),
            auth_timeout: self.auth_timeout.0,
        })
    }
}
