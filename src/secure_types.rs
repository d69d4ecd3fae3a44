//! Secure Types Module
//!
//! Bind credentials that zero their secret on drop and never print it.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A string that is zeroed from memory when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureString {
    inner: String,
}

impl SecureString {
    pub fn new(s: String) -> Self {
        Self { inner: s }
    }

    /// Temporarily exposes the secret.
    ///
    /// # Security
    /// The returned reference should be used immediately and not stored.
    pub fn expose_secret(&self) -> &str {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecureString([REDACTED])")
    }
}

impl fmt::Display for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Simple-bind credentials.
///
/// `bind_name` is whatever the directory accepts for a simple bind: a UPN
/// (`user@corp.local`), a down-level name (`CORP\user`) or a full DN.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    bind_name: String,
    password: SecureString,
}

impl Credentials {
    pub fn new(bind_name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            bind_name: bind_name.into(),
            password: SecureString::new(password.into()),
        }
    }

    /// Anonymous bind (empty name and password)
    pub fn anonymous() -> Self {
        Self::new(String::new(), String::new())
    }

    pub fn bind_name(&self) -> &str {
        &self.bind_name
    }

    /// # Security
    /// Use only to perform the bind. Do not store the returned reference.
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    pub fn is_anonymous(&self) -> bool {
        self.bind_name.is_empty() && self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("bind_name", &self.bind_name)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credentials(bind_name: {}, password: [REDACTED])", self.bind_name)
    }
}
