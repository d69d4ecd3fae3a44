//! Timeout wrappers for synchronous LDAP operations
//!
//! The ldap3 crate's `LdapConn::new()` is a blocking call that can hang indefinitely
//! if the server is unreachable. These async wrappers run the blocking calls under
//! `tokio::task::spawn_blocking` with a timeout.

use ldap3::{LdapConn, LdapConnSettings};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::errors::{DirectoryError, DirectoryResult};
use crate::secure_types::Credentials;

/// Default connection timeout (15 seconds)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default operation timeout (30 seconds)
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens an LDAP connection, giving up after `connect_timeout`.
///
/// `skip_tls_verify` disables certificate checks for LDAPS against internal CAs.
pub async fn ldap_connect_with_timeout(
    url: &str,
    connect_timeout: Duration,
    skip_tls_verify: bool,
) -> DirectoryResult<LdapConn> {
    let url = url.to_string();
    info!("Connecting to {} (timeout: {}s)", url, connect_timeout.as_secs());

    let result = timeout(connect_timeout, async {
        tokio::task::spawn_blocking(move || {
            let settings = LdapConnSettings::new()
                .set_conn_timeout(connect_timeout)
                .set_no_tls_verify(skip_tls_verify);

            LdapConn::with_settings(settings, &url)
        })
        .await
        .map_err(|e| DirectoryError::ConnectionError(format!("Task join error: {}", e)))?
        .map_err(|e| DirectoryError::ConnectionError(format!("LDAP connection failed: {}", e)))
    })
    .await;

    match result {
        Ok(inner) => inner,
        Err(_) => Err(DirectoryError::Timeout(format!(
            "Server did not respond within {} seconds",
            connect_timeout.as_secs()
        ))),
    }
}

/// Performs a simple bind with a timeout.
///
/// Takes ownership of the LdapConn to move it into the blocking task,
/// then returns it after a successful bind.
pub async fn ldap_bind_with_timeout(
    ldap: LdapConn,
    credentials: &Credentials,
    bind_timeout: Duration,
) -> DirectoryResult<LdapConn> {
    let credentials = credentials.clone();

    let result = timeout(bind_timeout, async {
        tokio::task::spawn_blocking(move || {
            let mut ldap = ldap;
            ldap.simple_bind(credentials.bind_name(), credentials.password())?
                .success()?;
            Ok::<LdapConn, DirectoryError>(ldap)
        })
        .await
        .map_err(|e| DirectoryError::ConnectionError(format!("Task join error: {}", e)))?
    })
    .await;

    match result {
        Ok(inner) => inner,
        Err(_) => Err(DirectoryError::Timeout(format!(
            "Bind did not complete within {} seconds",
            bind_timeout.as_secs()
        ))),
    }
}

/// Unbinds with a timeout. A timed-out unbind is not an error; the
/// connection is dropped either way.
pub async fn ldap_unbind_with_timeout(ldap: LdapConn, unbind_timeout: Duration) -> DirectoryResult<()> {
    let result = timeout(unbind_timeout, async {
        tokio::task::spawn_blocking(move || {
            let mut ldap = ldap;
            ldap.unbind()
        })
        .await
        .map_err(|e| DirectoryError::ConnectionError(format!("Task join error: {}", e)))?
        .map_err(DirectoryError::from)
    })
    .await;

    match result {
        Ok(inner) => inner,
        Err(_) => {
            warn!("Unbind did not complete within {}s", unbind_timeout.as_secs());
            Ok(())
        }
    }
}
