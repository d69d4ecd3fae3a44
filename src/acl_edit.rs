//! DACL read, edit, backup and restore on directory objects
//!
//! Every mutation is a read-modify-write of `nTSecurityDescriptor`: the
//! descriptor is read (DACL-scoped where the server allows), the DACL body is
//! edited, the descriptor is rebuilt around it and written back DACL-scoped
//! with an unscoped fallback.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ace::build_ace;
use crate::ace_matcher::{AceTarget, MatchStrategy};
use crate::directory::{
    read_security_descriptor, resolve_principal, resolve_sids_to_names, resolve_target_dn,
    restore_security_descriptor, write_security_descriptor, DirectoryService,
};
use crate::errors::{SdError, SdResult};
use crate::guid::guid_name;
use crate::permissions::{assess_ace, describe_ace, RiskCategory};
use crate::rights::{lookup_right, Right};
use crate::security_descriptor::{add_ace, dacl_aces, owner_sid, remove_ace, SD_HEADER_LEN};
use crate::sid::Sid;

/// Operations understood by [`execute`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AclAction {
    Read,
    Add,
    Remove,
    GrantDcsync,
    #[serde(rename = "grant-genericall")]
    GrantGenericAll,
    #[serde(rename = "grant-writedacl")]
    GrantWriteDacl,
    Backup,
    Restore,
}

impl AclAction {
    pub const ALL: [AclAction; 8] = [
        AclAction::Read,
        AclAction::Add,
        AclAction::Remove,
        AclAction::GrantDcsync,
        AclAction::GrantGenericAll,
        AclAction::GrantWriteDacl,
        AclAction::Backup,
        AclAction::Restore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AclAction::Read => "read",
            AclAction::Add => "add",
            AclAction::Remove => "remove",
            AclAction::GrantDcsync => "grant-dcsync",
            AclAction::GrantGenericAll => "grant-genericall",
            AclAction::GrantWriteDacl => "grant-writedacl",
            AclAction::Backup => "backup",
            AclAction::Restore => "restore",
        }
    }

    /// Whether the action writes to the directory
    pub fn is_mutation(&self) -> bool {
        !matches!(self, AclAction::Read | AclAction::Backup)
    }
}

impl fmt::Display for AclAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AclAction {
    type Err = SdError;

    fn from_str(s: &str) -> SdResult<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        AclAction::ALL
            .iter()
            .copied()
            .find(|action| action.as_str() == wanted)
            .ok_or_else(|| SdError::invalid(s, "unknown action"))
    }
}

/// Add or remove
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModifyMode {
    Add,
    Remove,
}

/// One DACL entry as shown to an operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AceRow {
    /// Resolved name, or the SID when unresolved
    pub principal: String,
    pub sid: String,
    #[serde(rename = "type")]
    pub ace_type: String,
    pub permissions: String,
    pub risk: RiskCategory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaclReport {
    pub target: String,
    /// Owner name, owner SID when unresolved, empty when absent
    pub owner: String,
    pub ace_count: usize,
    pub aces: Vec<AceRow>,
}

impl DaclReport {
    /// Rows classified as dangerous
    pub fn dangerous(&self) -> impl Iterator<Item = &AceRow> {
        self.aces.iter().filter(|row| row.risk == RiskCategory::Dangerous)
    }
}

/// Result of one successful DACL edit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaclChange {
    pub target: String,
    pub principal_sid: String,
    /// Right name, with the object GUID's name for object rights
    pub right: String,
    pub mode: ModifyMode,
    /// Removal pass that matched; absent for additions
    pub matched_by: Option<MatchStrategy>,
}

/// Base64 copy of a descriptor, restorable with [`restore`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdBackup {
    pub target: String,
    pub backup: String,
}

impl SdBackup {
    pub fn decode(&self) -> Result<Vec<u8>> {
        decode_backup(&self.backup)
    }
}

/// Display form of a right: `writedacl`, `dcsync (DS-Replication-Get-Changes)`
pub fn describe_right(right: &Right) -> String {
    match &right.object_type {
        Some(guid) => format!("{} ({})", right.name, guid_name(guid)),
        None => right.name.to_string(),
    }
}

/// Read and describe the DACL of `target` (a DN or an account name)
pub fn read_dacl<D>(dir: &mut D, base_dn: &str, target: &str) -> Result<DaclReport>
where
    D: DirectoryService + ?Sized,
{
    let target_dn = resolve_target_dn(dir, base_dn, target)
        .with_context(|| format!("resolving target '{}'", target))?;
    let sd = read_security_descriptor(dir, &target_dn)
        .with_context(|| format!("reading security descriptor of {}", target_dn))?;

    let aces = dacl_aces(&sd).with_context(|| format!("parsing DACL of {}", target_dn))?;
    let owner = owner_sid(&sd);

    let mut sids: Vec<&Sid> = aces.iter().map(|ace| &ace.sid).collect();
    if let Some(owner) = &owner {
        sids.push(owner);
    }
    let names = resolve_sids_to_names(dir, base_dn, sids);
    let display = |sid: &Sid| {
        let key = sid.to_string();
        names.get(&key).cloned().unwrap_or(key)
    };

    let rows: Vec<AceRow> = aces
        .iter()
        .map(|ace| AceRow {
            principal: display(&ace.sid),
            sid: ace.sid_string(),
            ace_type: ace.ace_type.name().to_string(),
            permissions: describe_ace(ace),
            risk: assess_ace(ace),
        })
        .collect();

    debug!("Read {} ACEs from {}", rows.len(), target_dn);
    Ok(DaclReport {
        owner: owner.as_ref().map(display).unwrap_or_default(),
        target: target_dn,
        ace_count: rows.len(),
        aces: rows,
    })
}

/// Read-modify-write of the DACL on `target_dn`.
///
/// Add prepends a new ACE. Remove tries the exact mask first, then any entry
/// of the same principal and shape, and fails with
/// [`SdError::NoMatchingAce`] when neither pass matched.
pub fn modify_dacl<D>(dir: &mut D, target_dn: &str, principal: &Sid, right: &Right, mode: ModifyMode) -> Result<DaclChange>
where
    D: DirectoryService + ?Sized,
{
    let sd = read_security_descriptor(dir, target_dn)
        .with_context(|| format!("reading security descriptor of {}", target_dn))?;

    let (rebuilt, matched_by) = match mode {
        ModifyMode::Add => {
            let adding = || format!("adding {} (0x{:08x}) for {} on {}", right.name, right.mask, principal, target_dn);
            let ace = build_ace(right.ace_type, right.mask, principal, right.object_type.as_ref())
                .with_context(adding)?;
            (add_ace(&sd, &ace).with_context(adding)?, None)
        }
        ModifyMode::Remove => {
            let target = match right.object_type {
                Some(guid) => AceTarget::object(principal.clone(), right.mask, guid),
                None => AceTarget::standard(principal.clone(), right.mask),
            };
            let (rebuilt, strategy) = remove_ace(&sd, &target).with_context(|| {
                format!("removing {} for {} from {}", right.name, principal, target_dn)
            })?;
            (rebuilt, Some(strategy))
        }
    };

    write_security_descriptor(dir, target_dn, &rebuilt, true)
        .with_context(|| format!("writing DACL of {}", target_dn))?;

    let change = DaclChange {
        target: target_dn.to_string(),
        principal_sid: principal.to_string(),
        right: describe_right(right),
        mode,
        matched_by,
    };
    info!(
        target: "audit",
        dn = %change.target,
        principal = %change.principal_sid,
        right = %change.right,
        mode = ?mode,
        mask = %format!("0x{:08x}", right.mask),
        "DACL modified"
    );
    Ok(change)
}

fn resolve_sid<D>(dir: &mut D, base_dn: &str, principal: &str) -> Result<Sid>
where
    D: DirectoryService + ?Sized,
{
    let (bytes, _) = resolve_principal(dir, base_dn, principal)
        .with_context(|| format!("resolving principal '{}'", principal))?;
    Ok(Sid::from_bytes(&bytes)?)
}

fn change_right<D>(
    dir: &mut D,
    base_dn: &str,
    target: &str,
    principal: &str,
    right: &Right,
    mode: ModifyMode,
) -> Result<DaclChange>
where
    D: DirectoryService + ?Sized,
{
    let target_dn = resolve_target_dn(dir, base_dn, target)
        .with_context(|| format!("resolving target '{}'", target))?;
    let sid = resolve_sid(dir, base_dn, principal)?;
    modify_dacl(dir, &target_dn, &sid, right, mode)
}

/// Grant `right_name` to `principal` on `target`
pub fn add_right<D>(dir: &mut D, base_dn: &str, target: &str, principal: &str, right_name: &str) -> Result<DaclChange>
where
    D: DirectoryService + ?Sized,
{
    let right = lookup_right(right_name)?;
    change_right(dir, base_dn, target, principal, &right, ModifyMode::Add)
}

/// Remove the `right_name` grant of `principal` from `target`
pub fn remove_right<D>(dir: &mut D, base_dn: &str, target: &str, principal: &str, right_name: &str) -> Result<DaclChange>
where
    D: DirectoryService + ?Sized,
{
    let right = lookup_right(right_name)?;
    change_right(dir, base_dn, target, principal, &right, ModifyMode::Remove)
}

/// Grant both replication rights on the domain root
pub fn grant_dcsync<D>(dir: &mut D, base_dn: &str, principal: &str) -> Result<Vec<DaclChange>>
where
    D: DirectoryService + ?Sized,
{
    let sid = resolve_sid(dir, base_dn, principal)?;
    ["ds-replication-get-changes", "ds-replication-get-changes-all"]
        .iter()
        .map(|name| {
            let right = lookup_right(name)?;
            modify_dacl(dir, base_dn, &sid, &right, ModifyMode::Add)
                .with_context(|| format!("adding {}", describe_right(&right)))
        })
        .collect()
}

pub fn grant_generic_all<D>(dir: &mut D, base_dn: &str, target: &str, principal: &str) -> Result<DaclChange>
where
    D: DirectoryService + ?Sized,
{
    add_right(dir, base_dn, target, principal, "genericall")
}

pub fn grant_write_dacl<D>(dir: &mut D, base_dn: &str, target: &str, principal: &str) -> Result<DaclChange>
where
    D: DirectoryService + ?Sized,
{
    add_right(dir, base_dn, target, principal, "writedacl")
}

/// Base64 copy of the full descriptor of `target`
pub fn backup<D>(dir: &mut D, base_dn: &str, target: &str) -> Result<SdBackup>
where
    D: DirectoryService + ?Sized,
{
    let target_dn = resolve_target_dn(dir, base_dn, target)
        .with_context(|| format!("resolving target '{}'", target))?;
    let sd = read_security_descriptor(dir, &target_dn)
        .with_context(|| format!("reading security descriptor of {}", target_dn))?;

    info!("Backed up {} byte descriptor of {}", sd.len(), target_dn);
    Ok(SdBackup {
        target: target_dn,
        backup: STANDARD.encode(&sd),
    })
}

fn decode_backup(encoded: &str) -> Result<Vec<u8>> {
    let sd = STANDARD
        .decode(encoded.trim())
        .context("decoding backup")?;
    if sd.len() < SD_HEADER_LEN {
        return Err(SdError::TooShort { len: sd.len() }.into());
    }
    Ok(sd)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreSummary {
    pub target: String,
    pub bytes: usize,
}

/// Write a [`backup`] back unchanged
pub fn restore<D>(dir: &mut D, base_dn: &str, target: &str, encoded: &str) -> Result<RestoreSummary>
where
    D: DirectoryService + ?Sized,
{
    let sd = decode_backup(encoded)?;
    let target_dn = resolve_target_dn(dir, base_dn, target)
        .with_context(|| format!("resolving target '{}'", target))?;

    restore_security_descriptor(dir, &target_dn, &sd)
        .with_context(|| format!("restoring DACL of {}", target_dn))?;
    info!(target: "audit", dn = %target_dn, bytes = sd.len(), "security descriptor restored");
    Ok(RestoreSummary {
        target: target_dn,
        bytes: sd.len(),
    })
}

/// One operation and its arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRequest {
    pub action: AclAction,
    /// DN or account name; ignored by grant-dcsync, which targets the domain root
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub principal: Option<String>,
    #[serde(default)]
    pub right: Option<String>,
    #[serde(default)]
    pub backup: Option<String>,
}

impl AclRequest {
    pub fn new(action: AclAction, target: impl Into<String>) -> Self {
        Self {
            action,
            target: target.into(),
            principal: None,
            right: None,
            backup: None,
        }
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn with_right(mut self, right: impl Into<String>) -> Self {
        self.right = Some(right.into());
        self
    }

    pub fn with_backup(mut self, backup: impl Into<String>) -> Self {
        self.backup = Some(backup.into());
        self
    }

    fn principal(&self) -> Result<&str> {
        self.principal
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow!("{} requires a principal (sAMAccountName or SID)", self.action))
    }

    fn right(&self) -> Result<&str> {
        self.right
            .as_deref()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| anyhow!("{} requires a right (genericall, writedacl, dcsync, ...)", self.action))
    }

    fn target(&self) -> Result<&str> {
        if self.target.is_empty() {
            return Err(anyhow!("{} requires a target", self.action));
        }
        Ok(&self.target)
    }
}

/// What [`execute`] produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum AclOutcome {
    Read(DaclReport),
    Modified { changes: Vec<DaclChange> },
    Backup(SdBackup),
    Restored(RestoreSummary),
}

/// Run `request` against `dir`
pub fn execute<D>(dir: &mut D, base_dn: &str, request: &AclRequest) -> Result<AclOutcome>
where
    D: DirectoryService + ?Sized,
{
    debug!("acl {} on '{}'", request.action, request.target);
    let outcome = match request.action {
        AclAction::Read => AclOutcome::Read(read_dacl(dir, base_dn, request.target()?)?),
        AclAction::Add => AclOutcome::Modified {
            changes: vec![add_right(dir, base_dn, request.target()?, request.principal()?, request.right()?)?],
        },
        AclAction::Remove => AclOutcome::Modified {
            changes: vec![remove_right(dir, base_dn, request.target()?, request.principal()?, request.right()?)?],
        },
        AclAction::GrantDcsync => AclOutcome::Modified {
            changes: grant_dcsync(dir, base_dn, request.principal()?)?,
        },
        AclAction::GrantGenericAll => AclOutcome::Modified {
            changes: vec![grant_generic_all(dir, base_dn, request.target()?, request.principal()?)?],
        },
        AclAction::GrantWriteDacl => AclOutcome::Modified {
            changes: vec![grant_write_dacl(dir, base_dn, request.target()?, request.principal()?)?],
        },
        AclAction::Backup => AclOutcome::Backup(backup(dir, base_dn, request.target()?)?),
        AclAction::Restore => {
            let encoded = request
                .backup
                .as_deref()
                .filter(|b| !b.is_empty())
                .ok_or_else(|| anyhow!("restore requires a base64 backup"))?;
            AclOutcome::Restored(restore(dir, base_dn, request.target()?, encoded)?)
        }
    };
    Ok(outcome)
}
