//! Error handling module
//!
//! Two families of errors live here:
//!
//! - [`SdError`] covers the security-descriptor codec and DACL mutation. Every
//!   variant carries structured fields (offsets, SIDs, masks) so callers and
//!   tests can match on the kind instead of parsing text.
//! - [`DirectoryError`] covers the directory collaborator (LDAP search/modify),
//!   mapped from `ldap3` result codes.

use thiserror::Error;

/// Errors raised while decoding, building or mutating binary security data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SdError {
    /// A buffer is too short or a field is out of range for the structure being read
    #[error("malformed {what} at offset {offset}: need {needed} bytes, {available} available")]
    Malformed {
        what: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Security descriptor shorter than its fixed 20-byte header
    #[error("security descriptor too short: {len} bytes (minimum 20)")]
    TooShort { len: usize },

    /// Descriptor parses but its DACL offset is zero or outside the buffer
    #[error("no DACL present in security descriptor (offset {offset}, length {len})")]
    NoDacl { offset: usize, len: usize },

    /// Friendly right name missing from the rights table
    #[error("unknown right: {name}")]
    UnknownRight { name: String },

    /// Neither the exact nor the relaxed removal pass matched an entry
    #[error("no matching ACE found to remove for SID {sid} with mask 0x{mask:08x}")]
    NoMatchingAce { sid: String, mask: u32 },

    /// A string could not be converted to its binary form
    #[error("invalid format for '{input}': {reason}")]
    InvalidFormat { input: String, reason: &'static str },

    /// Rebuilt ACL does not fit the 16-bit size or count fields
    #[error("ACL too large: {size} exceeds the 16-bit wire field")]
    AclTooLarge { size: usize },
}

impl SdError {
    pub(crate) fn malformed(what: &'static str, offset: usize, needed: usize, buf_len: usize) -> Self {
        SdError::Malformed {
            what,
            offset,
            needed,
            available: buf_len.saturating_sub(offset),
        }
    }

    pub(crate) fn invalid(input: &str, reason: &'static str) -> Self {
        SdError::InvalidFormat {
            input: input.to_string(),
            reason,
        }
    }
}

/// Result alias for codec and mutation operations
pub type SdResult<T> = std::result::Result<T, SdError>;

/// Errors raised by the directory collaborator
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// LDAP connection error
    #[error("LDAP connection failed: {0}")]
    ConnectionError(String),

    /// LDAP query/search error
    #[error("LDAP query failed: {0}")]
    QueryError(String),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Object or principal not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Permission denied or server unwilling to perform
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Timeout or busy server
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Binary attribute returned by the server failed validation
    #[error("Invalid security data: {0}")]
    InvalidData(#[from] SdError),
}

impl From<ldap3::LdapError> for DirectoryError {
    fn from(err: ldap3::LdapError) -> Self {
        match err {
            ldap3::LdapError::LdapResult { result } => match result.rc {
                // 49 = Invalid credentials
                49 => DirectoryError::AuthError(format!("Invalid credentials: {}", result.text)),
                // 32 = No such object
                32 => DirectoryError::NotFound(format!("Object not found: {}", result.text)),
                // 50 = Insufficient access rights
                50 => DirectoryError::PermissionDenied(format!(
                    "Insufficient access rights: {}",
                    result.text
                )),
                // 51 = Busy
                51 => DirectoryError::Timeout(format!("Server is busy: {}", result.text)),
                // 52 = Unavailable
                52 => DirectoryError::ConnectionError(format!("Server unavailable: {}", result.text)),
                // 53 = Unwilling to perform
                53 => DirectoryError::PermissionDenied(format!(
                    "Server unwilling to perform operation: {}",
                    result.text
                )),
                rc => DirectoryError::QueryError(format!("LDAP error code {}: {}", rc, result.text)),
            },
            ldap3::LdapError::EndOfStream => {
                DirectoryError::ConnectionError("Connection closed unexpectedly".to_string())
            }
            ldap3::LdapError::Io { source } => {
                DirectoryError::ConnectionError(format!("I/O error: {}", source))
            }
            ldap3::LdapError::Timeout { .. } => {
                DirectoryError::Timeout("LDAP operation timed out".to_string())
            }
            other => DirectoryError::QueryError(format!("LDAP error: {}", other)),
        }
    }
}

impl From<std::io::Error> for DirectoryError {
    fn from(err: std::io::Error) -> Self {
        DirectoryError::ConnectionError(format!("I/O error: {}", err))
    }
}

impl From<serde_json::Error> for DirectoryError {
    fn from(err: serde_json::Error) -> Self {
        DirectoryError::ConfigError(format!("JSON parse error: {}", err))
    }
}

/// Result alias for directory operations
pub type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ldap3::LdapResult;

    fn ldap_result(rc: u32) -> ldap3::LdapError {
        ldap3::LdapError::LdapResult {
            result: LdapResult {
                rc,
                matched: String::new(),
                text: "server text".to_string(),
                refs: Vec::new(),
                ctrls: Vec::new(),
            },
        }
    }

    #[test]
    fn test_sd_error_display() {
        let err = SdError::NoMatchingAce {
            sid: "S-1-5-21-1-2-3-1001".to_string(),
            mask: 0x10000000,
        };
        assert_eq!(
            err.to_string(),
            "no matching ACE found to remove for SID S-1-5-21-1-2-3-1001 with mask 0x10000000"
        );

        let err = SdError::TooShort { len: 12 };
        assert_eq!(err.to_string(), "security descriptor too short: 12 bytes (minimum 20)");
    }

    #[test]
    fn test_malformed_available_saturates() {
        let err = SdError::malformed("SID", 30, 8, 20);
        assert_eq!(
            err,
            SdError::Malformed {
                what: "SID",
                offset: 30,
                needed: 8,
                available: 0
            }
        );
    }

    #[test]
    fn test_ldap_result_code_mapping() {
        assert!(matches!(DirectoryError::from(ldap_result(49)), DirectoryError::AuthError(_)));
        assert!(matches!(DirectoryError::from(ldap_result(32)), DirectoryError::NotFound(_)));
        assert!(matches!(DirectoryError::from(ldap_result(50)), DirectoryError::PermissionDenied(_)));
        assert!(matches!(DirectoryError::from(ldap_result(53)), DirectoryError::PermissionDenied(_)));
        assert!(matches!(DirectoryError::from(ldap_result(51)), DirectoryError::Timeout(_)));
        assert!(matches!(DirectoryError::from(ldap_result(52)), DirectoryError::ConnectionError(_)));
        assert!(matches!(DirectoryError::from(ldap_result(12)), DirectoryError::QueryError(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: DirectoryError = io_err.into();
        assert!(matches!(err, DirectoryError::ConnectionError(_)));
    }

    #[test]
    fn test_sd_error_wraps_into_directory_error() {
        let err: DirectoryError = SdError::TooShort { len: 3 }.into();
        assert!(matches!(err, DirectoryError::InvalidData(SdError::TooShort { len: 3 })));
    }
}
