//! Connection configuration
//!
//! Settings for reaching a directory server. Loaded from JSON or built in
//! code; every field has a default so partial documents are accepted.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::{DirectoryError, DirectoryResult};
use crate::ldap_timeout::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_OPERATION_TIMEOUT};

pub const DEFAULT_LDAP_PORT: u16 = 389;
pub const DEFAULT_LDAPS_PORT: u16 = 636;

/// Connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Server hostname or IP
    pub server: String,
    /// 0 selects 389, or 636 with TLS
    pub port: u16,
    /// Use LDAPS
    pub use_tls: bool,
    /// Skip TLS certificate verification (internal CAs)
    pub skip_tls_verify: bool,
    /// Naming context to operate on; read from the RootDSE when absent
    pub base_dn: Option<String>,
    pub connect_timeout_secs: u64,
    pub operation_timeout_secs: u64,
    /// Page size for subtree searches
    pub page_size: i32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: DEFAULT_LDAP_PORT,
            use_tls: false,
            skip_tls_verify: false,
            base_dn: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT.as_secs(),
            page_size: 500,
        }
    }
}

impl ConnectionConfig {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ..Self::default()
        }
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        if use_tls && self.port == DEFAULT_LDAP_PORT {
            self.port = 0;
        }
        self
    }

    pub fn with_base_dn(mut self, base_dn: impl Into<String>) -> Self {
        self.base_dn = Some(base_dn.into());
        self
    }

    /// Port to dial
    pub fn effective_port(&self) -> u16 {
        match (self.port, self.use_tls) {
            (0, true) => DEFAULT_LDAPS_PORT,
            (0, false) => DEFAULT_LDAP_PORT,
            (port, _) => port,
        }
    }

    pub fn ldap_url(&self) -> String {
        let scheme = if self.use_tls { "ldaps" } else { "ldap" };
        format!("{}://{}:{}", scheme, self.server, self.effective_port())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Checks the settings before any network traffic
    pub fn validate(&self) -> DirectoryResult<()> {
        if self.server.trim().is_empty() {
            return Err(DirectoryError::ConfigError("server must not be empty".to_string()));
        }
        if self.page_size <= 0 {
            return Err(DirectoryError::ConfigError(format!(
                "page_size must be positive, got {}",
                self.page_size
            )));
        }
        if self.connect_timeout_secs == 0 || self.operation_timeout_secs == 0 {
            return Err(DirectoryError::ConfigError("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> DirectoryResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> DirectoryResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| DirectoryError::ConfigError(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }
}
