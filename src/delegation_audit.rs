//! Kerberos Delegation Assessment
//!
//! Finds delegation relationships that let one account act as another.
//!
//! # Delegation Types
//!
//! ## Unconstrained Delegation (CRITICAL Risk)
//! - `TRUSTED_FOR_DELEGATION` in userAccountControl
//! - Account receives forwardable TGTs of every user authenticating to it
//! - Domain controllers (primary group 516) carry it by default and are excluded
//!
//! ## Constrained Delegation (MEDIUM Risk)
//! - `msDS-AllowedToDelegateTo` lists the SPNs the account may impersonate users to
//! - With `TRUSTED_TO_AUTH_FOR_DELEGATION` (protocol transition) the account
//!   needs no user interaction at all, which raises it to CRITICAL
//!
//! ## Resource-Based Constrained Delegation / RBCD (MEDIUM Risk)
//! - `msDS-AllowedToActOnBehalfOfOtherIdentity` holds a security descriptor
//!   whose DACL names the principals allowed to delegate to this resource
//!
//! ## Protected Accounts (Informational)
//! - `NOT_DELEGATED` ("account is sensitive and cannot be delegated")
//!
//! | Finding | Severity | Evidence |
//! |---------|----------|----------|
//! | Unconstrained | Critical | SPNs of the account |
//! | Constrained (protocol transition) | Critical | Allowed target SPNs |
//! | Constrained | Medium | Allowed target SPNs |
//! | RBCD | Medium | Principals allowed to act on behalf |
//! | Protected | Informational | - |

use std::collections::HashMap;

use ldap3::{Scope, SearchEntry};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::common_types::{Finding, FindingKind, FindingSeverity, SeverityCounts, UserAccountControlFlags};
use crate::directory::{resolve_sids_to_names, DirectoryService};
use crate::errors::DirectoryResult;
use crate::ldap_helpers::{attr_lists, attrs, filters, SearchEntryExt};
use crate::security_descriptor::dacl_aces;
use crate::sid::Sid;

/// Delegation-relevant attributes of one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationEntry {
    pub distinguished_name: String,
    pub sam_account_name: String,
    pub dns_host_name: Option<String>,
    pub uac: UserAccountControlFlags,
    pub allowed_to_delegate_to: Vec<String>,
    pub service_principal_names: Vec<String>,
    pub description: Option<String>,
    /// Raw `msDS-AllowedToActOnBehalfOfOtherIdentity` descriptor
    pub rbcd_descriptor: Option<Vec<u8>>,
}

impl DelegationEntry {
    pub fn from_entry(entry: &SearchEntry) -> Self {
        Self {
            distinguished_name: entry.dn.clone(),
            sam_account_name: entry.get_sam_account_name(),
            dns_host_name: entry.get_optional_attr(attrs::DNS_HOST_NAME).filter(|s| !s.is_empty()),
            uac: entry.get_uac_flags(),
            allowed_to_delegate_to: entry.get_multi_attr(attrs::MS_DS_ALLOWED_TO_DELEGATE_TO),
            service_principal_names: entry.get_multi_attr(attrs::SERVICE_PRINCIPAL_NAME),
            description: entry.get_optional_attr(attrs::DESCRIPTION).filter(|s| !s.is_empty()),
            rbcd_descriptor: entry
                .get_binary_attr(attrs::MS_DS_ALLOWED_TO_ACT_ON_BEHALF)
                .filter(|sd| !sd.is_empty()),
        }
    }

    /// sAMAccountName, or the DN for objects without one
    pub fn display_name(&self) -> &str {
        if self.sam_account_name.is_empty() {
            &self.distinguished_name
        } else {
            &self.sam_account_name
        }
    }

    /// Principals allowed to act on behalf of other identities to this account
    pub fn rbcd_principals(&self) -> Vec<(String, u32)> {
        self.rbcd_descriptor
            .as_deref()
            .map(rbcd_principals)
            .unwrap_or_default()
    }
}

/// `(SID, mask)` of every ACE in an RBCD descriptor.
///
/// An unparseable descriptor yields an empty list.
pub fn rbcd_principals(sd: &[u8]) -> Vec<(String, u32)> {
    match dacl_aces(sd) {
        Ok(aces) => aces.iter().map(|ace| (ace.sid_string(), ace.mask)).collect(),
        Err(e) => {
            debug!("Could not parse RBCD descriptor: {}", e);
            Vec::new()
        }
    }
}

/// Raw query results fed to [`DelegationAudit::analyze`]
#[derive(Debug, Clone, Default)]
pub struct DelegationQueryResults {
    pub unconstrained: Vec<DelegationEntry>,
    pub constrained: Vec<DelegationEntry>,
    pub rbcd: Vec<DelegationEntry>,
    pub protected: Vec<DelegationEntry>,
    /// SID to display name for RBCD principals
    pub principal_names: HashMap<String, String>,
}

/// Delegation assessment of a domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationAudit {
    pub unconstrained_count: usize,
    pub constrained_count: usize,
    pub protocol_transition_count: usize,
    pub rbcd_count: usize,
    pub protected_count: usize,
    pub findings: Vec<Finding>,
    pub severity_counts: SeverityCounts,
    pub scan_timestamp: String,
}

impl DelegationAudit {
    pub fn analyze(results: &DelegationQueryResults) -> Self {
        let mut findings = Vec::new();
        findings.extend(results.unconstrained.iter().map(analyze_unconstrained));
        findings.extend(results.constrained.iter().map(analyze_constrained));
        findings.extend(
            results
                .rbcd
                .iter()
                .map(|entry| analyze_rbcd(entry, &results.principal_names)),
        );
        findings.extend(results.protected.iter().map(analyze_protected));

        let severities: Vec<FindingSeverity> = findings.iter().map(Finding::severity).collect();
        let severity_counts = SeverityCounts::from_iter(severities.iter());

        Self {
            unconstrained_count: results.unconstrained.len(),
            constrained_count: results.constrained.len(),
            protocol_transition_count: results
                .constrained
                .iter()
                .filter(|e| e.uac.is_protocol_transition)
                .count(),
            rbcd_count: results.rbcd.len(),
            protected_count: results.protected.len(),
            findings,
            severity_counts,
            scan_timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Findings of one kind
    pub fn findings_of(&self, kind: FindingKind) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.kind() == kind)
    }
}

fn disabled_suffix(entry: &DelegationEntry) -> &'static str {
    if entry.uac.is_disabled {
        " (account disabled)"
    } else {
        ""
    }
}

pub fn analyze_unconstrained(entry: &DelegationEntry) -> Finding {
    let mut risk = String::from("Can capture TGTs from any authenticating user and impersonate them to any service");
    if entry.uac.is_protocol_transition {
        risk.push_str("; also trusted for protocol transition (S4U2Self)");
    }
    risk.push_str(disabled_suffix(entry));

    Finding::new(
        FindingKind::Unconstrained,
        entry.display_name(),
        entry.service_principal_names.clone(),
        risk,
    )
}

pub fn analyze_constrained(entry: &DelegationEntry) -> Finding {
    if entry.uac.is_protocol_transition {
        Finding::new(
            FindingKind::Constrained,
            entry.display_name(),
            entry.allowed_to_delegate_to.clone(),
            format!(
                "Constrained with protocol transition (S4U2Self + S4U2Proxy): can impersonate any user to the listed services without their interaction{}",
                disabled_suffix(entry)
            ),
        )
        .with_severity(FindingSeverity::Critical)
    } else {
        Finding::new(
            FindingKind::Constrained,
            entry.display_name(),
            entry.allowed_to_delegate_to.clone(),
            format!(
                "Constrained (S4U2Proxy only): can impersonate users who first authenticate to this service{}",
                disabled_suffix(entry)
            ),
        )
    }
}

/// Evidence lists each allowed principal as `name (SID) mask 0x..`, or
/// `SID mask 0x..` when no name is known.
pub fn analyze_rbcd(entry: &DelegationEntry, names: &HashMap<String, String>) -> Finding {
    let principals = entry.rbcd_principals();
    let evidence: Vec<String> = principals
        .iter()
        .map(|(sid, mask)| match names.get(sid) {
            Some(name) => format!("{} ({}) mask 0x{:X}", name, sid, mask),
            None => format!("{} mask 0x{:X}", sid, mask),
        })
        .collect();

    let risk = if evidence.is_empty() {
        "RBCD descriptor set but the allowed identities could not be parsed".to_string()
    } else {
        format!(
            "{} principal(s) can impersonate any user to services on this account",
            evidence.len()
        )
    };

    Finding::new(FindingKind::Rbcd, entry.display_name(), evidence, risk)
}

pub fn analyze_protected(entry: &DelegationEntry) -> Finding {
    Finding::new(
        FindingKind::Protected,
        entry.display_name(),
        Vec::new(),
        "Account is sensitive and cannot be delegated",
    )
}

fn query<D>(dir: &mut D, base_dn: &str, filter: &str) -> DirectoryResult<Vec<DelegationEntry>>
where
    D: DirectoryService + ?Sized,
{
    let entries = dir.search(base_dn, Scope::Subtree, filter, attr_lists::DELEGATION, None)?;
    Ok(entries.iter().map(DelegationEntry::from_entry).collect())
}

/// Run every delegation query under `base_dn` and analyze the results.
///
/// The protected-accounts query is best-effort; a failure there is logged
/// and leaves that section empty.
pub fn enumerate_delegation<D>(dir: &mut D, base_dn: &str) -> DirectoryResult<DelegationAudit>
where
    D: DirectoryService + ?Sized,
{
    let mut results = DelegationQueryResults {
        unconstrained: query(dir, base_dn, filters::UNCONSTRAINED_DELEGATION)?,
        constrained: query(dir, base_dn, filters::CONSTRAINED_DELEGATION)?,
        rbcd: query(dir, base_dn, filters::RBCD)?,
        ..Default::default()
    };

    results.protected = match query(dir, base_dn, filters::NOT_DELEGATED) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Protected account query failed: {}", e);
            Vec::new()
        }
    };

    let sids: Vec<Sid> = results
        .rbcd
        .iter()
        .flat_map(|entry| entry.rbcd_principals())
        .filter_map(|(sid, _)| sid.parse().ok())
        .collect();
    if !sids.is_empty() {
        results.principal_names = resolve_sids_to_names(dir, base_dn, sids.iter());
    }

    let audit = DelegationAudit::analyze(&results);
    info!(
        "Delegation scan of {}: {} unconstrained, {} constrained ({} with protocol transition), {} RBCD, {} protected",
        base_dn,
        audit.unconstrained_count,
        audit.constrained_count,
        audit.protocol_transition_count,
        audit.rbcd_count,
        audit.protected_count
    );
    Ok(audit)
}
