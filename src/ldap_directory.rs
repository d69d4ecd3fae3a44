//! `ldap3` implementation of [`DirectoryService`]
//!
//! Wraps a synchronous `LdapConn`. Base-scope searches go out as a single
//! request; subtree searches page with the Simple Paged Results control so
//! result sets above the server size limit are fetched completely.

use std::collections::HashSet;
use std::time::Duration;

use ldap3::controls::{ControlParser, PagedResults, RawControl};
use ldap3::{LdapConn, Mod, Scope, SearchEntry};
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::directory::{detect_base_dn, DirectoryService};
use crate::errors::{DirectoryError, DirectoryResult};
use crate::ldap_timeout::{ldap_bind_with_timeout, ldap_connect_with_timeout, ldap_unbind_with_timeout};
use crate::ldap_utils::{sd_flags_control_value, PAGED_RESULTS_OID, SD_FLAGS_OID};
use crate::secure_types::Credentials;

/// rc=4, sizeLimitExceeded
const SIZE_LIMIT_EXCEEDED: u32 = 4;

/// Critical SD_FLAGS control selecting the descriptor parts to read or write
pub fn sd_flags_control(flags: u32) -> DirectoryResult<RawControl> {
    Ok(RawControl {
        ctype: SD_FLAGS_OID.to_string(),
        crit: true,
        val: Some(sd_flags_control_value(flags)?),
    })
}

/// Directory reached over LDAP
pub struct LdapDirectory {
    conn: LdapConn,
    page_size: i32,
    operation_timeout: Duration,
    base_dn: Option<String>,
}

impl LdapDirectory {
    /// Wrap an already bound connection
    pub fn from_conn(conn: LdapConn, config: &ConnectionConfig) -> Self {
        Self {
            conn,
            page_size: config.page_size,
            operation_timeout: config.operation_timeout(),
            base_dn: config.base_dn.clone(),
        }
    }

    /// Connect and bind with timeouts. Anonymous credentials skip the bind.
    pub async fn connect(config: &ConnectionConfig, credentials: &Credentials) -> DirectoryResult<Self> {
        config.validate()?;
        let url = config.ldap_url();

        let mut conn = ldap_connect_with_timeout(&url, config.connect_timeout(), config.skip_tls_verify).await?;
        if !credentials.is_anonymous() {
            conn = ldap_bind_with_timeout(conn, credentials, config.operation_timeout()).await?;
            info!("Bound to {} as {}", url, credentials.bind_name());
        } else {
            info!("Connected to {} anonymously", url);
        }

        Ok(Self::from_conn(conn, config))
    }

    /// Configured base DN, or the RootDSE default naming context
    pub fn base_dn(&mut self) -> DirectoryResult<String> {
        if let Some(dn) = &self.base_dn {
            return Ok(dn.clone());
        }
        let dn = detect_base_dn(self)?;
        self.base_dn = Some(dn.clone());
        Ok(dn)
    }

    pub async fn close(self) -> DirectoryResult<()> {
        let timeout = self.operation_timeout;
        ldap_unbind_with_timeout(self.conn, timeout).await
    }

    fn controls(sd_flags: Option<u32>) -> DirectoryResult<Vec<RawControl>> {
        sd_flags.map(sd_flags_control).into_iter().collect()
    }

    fn search_once(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
        sd_flags: Option<u32>,
    ) -> DirectoryResult<Vec<SearchEntry>> {
        let result = self
            .conn
            .with_controls(Self::controls(sd_flags)?)
            .with_timeout(self.operation_timeout)
            .search(base, scope, filter, attrs.to_vec())?;

        let (entries, ldap_result) = (result.0, result.1);
        if ldap_result.rc == SIZE_LIMIT_EXCEEDED {
            warn!("Size limit exceeded searching {}, returning {} partial entries", base, entries.len());
        } else {
            ldap_result.success()?;
        }
        Ok(entries.into_iter().map(SearchEntry::construct).collect())
    }

    fn search_paged(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
        sd_flags: Option<u32>,
    ) -> DirectoryResult<Vec<SearchEntry>> {
        let mut all_entries = Vec::new();
        let mut cookie: Vec<u8> = Vec::new();
        let mut page_count = 0;

        loop {
            page_count += 1;
            let mut controls = Self::controls(sd_flags)?;
            controls.push(
                PagedResults {
                    size: self.page_size,
                    cookie: cookie.clone(),
                }
                .into(),
            );

            let result = self
                .conn
                .with_controls(controls)
                .with_timeout(self.operation_timeout)
                .search(base, scope, filter, attrs.to_vec())?;
            let (entries, ldap_result) = (result.0, result.1);

            all_entries.extend(entries.into_iter().map(SearchEntry::construct));
            debug!("Page {} of {} done, {} entries so far", page_count, filter, all_entries.len());

            if ldap_result.rc == SIZE_LIMIT_EXCEEDED {
                warn!("Size limit exceeded searching {}, returning {} partial entries", base, all_entries.len());
                break;
            }

            // Control is a tuple struct where .1 is RawControl
            let next = ldap_result
                .ctrls
                .iter()
                .find(|ctrl| ctrl.1.ctype == PAGED_RESULTS_OID)
                .and_then(|ctrl| ctrl.1.val.as_ref())
                .map(|val| PagedResults::parse(val).cookie)
                .unwrap_or_default();
            ldap_result.success()?;

            if next.is_empty() {
                break;
            }
            cookie = next;
        }

        Ok(all_entries)
    }
}

impl DirectoryService for LdapDirectory {
    fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
        sd_flags: Option<u32>,
    ) -> DirectoryResult<Vec<SearchEntry>> {
        match scope {
            Scope::Base => self.search_once(base, scope, filter, attrs, sd_flags),
            _ => self.search_paged(base, scope, filter, attrs, sd_flags),
        }
    }

    fn replace_binary(&mut self, dn: &str, attr: &str, value: Vec<u8>, sd_flags: Option<u32>) -> DirectoryResult<()> {
        let values: HashSet<Vec<u8>> = HashSet::from([value]);
        let mods = vec![Mod::Replace(attr.as_bytes().to_vec(), values)];

        self.conn
            .with_controls(Self::controls(sd_flags)?)
            .with_timeout(self.operation_timeout)
            .modify(dn, mods)?
            .success()
            .map_err(DirectoryError::from)?;
        Ok(())
    }
}
