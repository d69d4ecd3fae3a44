//! Directory collaborator
//!
//! [`DirectoryService`] is the seam between the descriptor engine and the wire:
//! a search primitive and a binary replace primitive, both optionally carrying
//! the SD_FLAGS control. Everything else here (descriptor read/write with the
//! scoped-then-unscoped fallback, principal and DN resolution, SID naming,
//! RootDSE discovery) is built on those two calls so it can run against
//! `ldap3` or an in-memory directory alike.

use std::collections::HashMap;

use ldap3::{Scope, SearchEntry};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{DirectoryError, DirectoryResult, SdError};
use crate::ldap_helpers::{attr_lists, attrs, filters, SearchEntryExt};
use crate::ldap_utils::{escape_binary_filter, escape_ldap_filter, sd_flags};
use crate::permissions::{well_known_rid_name, well_known_sids};
use crate::security_descriptor::{dacl_only_sd, SD_HEADER_LEN};
use crate::sid::Sid;

/// Search and modify primitives of a directory server
pub trait DirectoryService {
    /// Search under `base`. `sd_flags`, when set, is sent as the critical
    /// SD_FLAGS control.
    fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
        sd_flags: Option<u32>,
    ) -> DirectoryResult<Vec<SearchEntry>>;

    /// Replace every value of `attr` on `dn` with the single binary `value`
    fn replace_binary(&mut self, dn: &str, attr: &str, value: Vec<u8>, sd_flags: Option<u32>) -> DirectoryResult<()>;
}

/// Naming contexts advertised by the RootDSE
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingContexts {
    pub default_naming_context: String,
    pub configuration_naming_context: String,
}

fn read_sd_attr<D>(dir: &mut D, dn: &str, flags: Option<u32>) -> DirectoryResult<Vec<SearchEntry>>
where
    D: DirectoryService + ?Sized,
{
    dir.search(dn, Scope::Base, filters::ANY_OBJECT, attr_lists::SECURITY_DESCRIPTOR, flags)
}

/// Read the raw `nTSecurityDescriptor` of `dn`.
///
/// The DACL-scoped read is tried first; any failure triggers one unscoped
/// retry. Values shorter than the 20-byte header are rejected.
pub fn read_security_descriptor<D>(dir: &mut D, dn: &str) -> DirectoryResult<Vec<u8>>
where
    D: DirectoryService + ?Sized,
{
    let entries = match read_sd_attr(dir, dn, Some(sd_flags::DACL_SECURITY_INFORMATION)) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("SD_FLAGS read of {} rejected ({}), retrying without the control", dn, e);
            read_sd_attr(dir, dn, None)?
        }
    };

    let entry = entries
        .first()
        .ok_or_else(|| DirectoryError::NotFound(format!("object not found: {}", dn)))?;
    let sd = entry
        .get_binary_attr(attrs::NT_SECURITY_DESCRIPTOR)
        .unwrap_or_default();

    if sd.len() < SD_HEADER_LEN {
        // usually means the bind account may not read the descriptor
        return Err(SdError::malformed("nTSecurityDescriptor", 0, SD_HEADER_LEN, sd.len()).into());
    }

    debug!("Read {} byte security descriptor from {}", sd.len(), dn);
    Ok(sd)
}

fn replace_with_fallback<D>(dir: &mut D, dn: &str, scoped: Vec<u8>, full: &[u8]) -> DirectoryResult<()>
where
    D: DirectoryService + ?Sized,
{
    match dir.replace_binary(
        dn,
        attrs::NT_SECURITY_DESCRIPTOR,
        scoped,
        Some(sd_flags::DACL_SECURITY_INFORMATION),
    ) {
        Ok(()) => {
            info!(target: "audit", dn = %dn, scoped = true, "nTSecurityDescriptor written");
            return Ok(());
        }
        Err(e) => warn!("SD_FLAGS write to {} rejected ({}), retrying unscoped", dn, e),
    }

    dir.replace_binary(dn, attrs::NT_SECURITY_DESCRIPTOR, full.to_vec(), None)?;
    info!(target: "audit", dn = %dn, scoped = false, "nTSecurityDescriptor written");
    Ok(())
}

/// Write a rebuilt descriptor back to `dn`.
///
/// With `dacl_only` the DACL is first sent alone, wrapped in a minimal
/// descriptor under the SD_FLAGS control; if the server rejects that, the full
/// descriptor is written without the control. Only the last failure is returned.
pub fn write_security_descriptor<D>(dir: &mut D, dn: &str, full_sd: &[u8], dacl_only: bool) -> DirectoryResult<()>
where
    D: DirectoryService + ?Sized,
{
    if dacl_only {
        let scoped = dacl_only_sd(full_sd)?;
        return replace_with_fallback(dir, dn, scoped, full_sd);
    }

    dir.replace_binary(dn, attrs::NT_SECURITY_DESCRIPTOR, full_sd.to_vec(), None)?;
    info!(target: "audit", dn = %dn, scoped = false, "nTSecurityDescriptor written");
    Ok(())
}

/// Write a caller-supplied descriptor unchanged, scoped first then unscoped
pub fn restore_security_descriptor<D>(dir: &mut D, dn: &str, sd: &[u8]) -> DirectoryResult<()>
where
    D: DirectoryService + ?Sized,
{
    if sd.len() < SD_HEADER_LEN {
        return Err(SdError::TooShort { len: sd.len() }.into());
    }
    replace_with_fallback(dir, dn, sd.to_vec(), sd)
}

/// First entry matched by `sAMAccountName=<name>`, then by `cn=<name>`
fn find_by_name<D>(dir: &mut D, base_dn: &str, name: &str, wanted: &[&str]) -> DirectoryResult<Option<SearchEntry>>
where
    D: DirectoryService + ?Sized,
{
    let escaped = escape_ldap_filter(name);
    for attr in [attrs::SAM_ACCOUNT_NAME, attrs::CN] {
        let filter = format!("({}={})", attr, escaped);
        let mut entries = dir.search(base_dn, Scope::Subtree, &filter, wanted, None)?;
        if !entries.is_empty() {
            return Ok(Some(entries.swap_remove(0)));
        }
    }
    Ok(None)
}

/// Resolve an object name to its DN.
///
/// Anything containing `=` is taken to be a DN already.
pub fn resolve_target_dn<D>(dir: &mut D, base_dn: &str, name: &str) -> DirectoryResult<String>
where
    D: DirectoryService + ?Sized,
{
    if name.contains('=') {
        return Ok(name.to_string());
    }

    find_by_name(dir, base_dn, name, &["distinguishedName"])?
        .map(|entry| entry.dn)
        .ok_or_else(|| DirectoryError::NotFound(format!("object '{}' not found", name)))
}

/// Resolve a principal to its binary SID and SID string.
///
/// `S-1-…` input is converted locally; names are looked up by
/// `sAMAccountName` and then by `cn`.
pub fn resolve_principal<D>(dir: &mut D, base_dn: &str, name_or_sid: &str) -> DirectoryResult<(Vec<u8>, String)>
where
    D: DirectoryService + ?Sized,
{
    if name_or_sid.starts_with("S-1-") {
        let sid: Sid = name_or_sid.parse()?;
        return Ok((sid.to_bytes(), sid.to_string()));
    }

    let entry = find_by_name(dir, base_dn, name_or_sid, attr_lists::PRINCIPAL)?
        .ok_or_else(|| DirectoryError::NotFound(format!("principal not found: {}", name_or_sid)))?;

    let bytes = entry.get_binary_attr(attrs::OBJECT_SID).unwrap_or_default();
    let sid = Sid::from_bytes(&bytes)?;
    debug!("Resolved {} to {}", name_or_sid, sid);
    Ok((bytes, sid.to_string()))
}

/// Best-effort SID to display-name map.
///
/// Seeded with the fixed well-known SIDs. Remaining SIDs are looked up by
/// `objectSid`; unresolved domain SIDs fall back to the well-known RID names.
/// SIDs that resolve to nothing are left out of the map.
pub fn resolve_sids_to_names<'a, D, I>(dir: &mut D, base_dn: &str, sids: I) -> HashMap<String, String>
where
    D: DirectoryService + ?Sized,
    I: IntoIterator<Item = &'a Sid>,
{
    let mut names: HashMap<String, String> = well_known_sids()
        .map(|(sid, name)| (sid.to_string(), name.to_string()))
        .collect();

    for sid in sids {
        let key = sid.to_string();
        if names.contains_key(&key) {
            continue;
        }

        let filter = format!("(objectSid={})", escape_binary_filter(&sid.to_bytes()));
        match dir.search(base_dn, Scope::Subtree, &filter, attr_lists::SID_LOOKUP, None) {
            Ok(entries) => {
                let found = entries.first().and_then(|entry| {
                    entry
                        .get_optional_attr(attrs::SAM_ACCOUNT_NAME)
                        .or_else(|| entry.get_optional_attr(attrs::CN))
                        .filter(|name| !name.is_empty())
                });
                if let Some(name) = found {
                    names.insert(key, name);
                    continue;
                }
            }
            Err(e) => debug!("SID lookup for {} failed: {}", key, e),
        }

        if sid.is_domain_sid() {
            if let Some(name) = sid.rid().and_then(well_known_rid_name) {
                names.insert(key, name.to_string());
            }
        }
    }

    names
}

fn read_root_dse<D>(dir: &mut D, wanted: &[&str]) -> DirectoryResult<SearchEntry>
where
    D: DirectoryService + ?Sized,
{
    dir.search("", Scope::Base, filters::ANY_OBJECT, wanted, None)?
        .into_iter()
        .next()
        .ok_or_else(|| DirectoryError::QueryError("no RootDSE entry returned".to_string()))
}

/// Default naming context from the RootDSE (`rootDomainNamingContext` as fallback)
pub fn detect_base_dn<D>(dir: &mut D) -> DirectoryResult<String>
where
    D: DirectoryService + ?Sized,
{
    let root = read_root_dse(dir, &[attrs::DEFAULT_NAMING_CONTEXT, attrs::ROOT_DOMAIN_NAMING_CONTEXT])?;
    root.get_optional_attr(attrs::DEFAULT_NAMING_CONTEXT)
        .filter(|dn| !dn.is_empty())
        .or_else(|| root.get_optional_attr(attrs::ROOT_DOMAIN_NAMING_CONTEXT))
        .filter(|dn| !dn.is_empty())
        .ok_or_else(|| DirectoryError::ConfigError("could not detect base DN from RootDSE".to_string()))
}

/// Default and configuration naming contexts from the RootDSE
pub fn detect_naming_contexts<D>(dir: &mut D) -> DirectoryResult<NamingContexts>
where
    D: DirectoryService + ?Sized,
{
    let root = read_root_dse(dir, &[attrs::CONFIGURATION_NAMING_CONTEXT, attrs::DEFAULT_NAMING_CONTEXT])?;
    let configuration_naming_context = root
        .get_optional_attr(attrs::CONFIGURATION_NAMING_CONTEXT)
        .filter(|dn| !dn.is_empty())
        .ok_or_else(|| DirectoryError::ConfigError("could not detect configurationNamingContext".to_string()))?;

    Ok(NamingContexts {
        default_naming_context: root.get_string_attr(attrs::DEFAULT_NAMING_CONTEXT),
        configuration_naming_context,
    })
}
