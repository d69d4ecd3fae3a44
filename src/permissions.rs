//! Permission labels, principal names and risk classification for ACEs

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ace::{Ace, AceType};
use crate::guid::{guid_name, GuidBytes};
use crate::rights::access_mask;
use crate::sid::Sid;

/// Risk of a single ACE as shown to an operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskCategory {
    /// Low-privilege principal holding a write or control right
    Dangerous,
    /// Write or control right held by a principal that is neither well-known privileged nor low-privilege
    Notable,
    Standard,
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskCategory::Dangerous => write!(f, "dangerous"),
            RiskCategory::Notable => write!(f, "notable"),
            RiskCategory::Standard => write!(f, "standard"),
        }
    }
}

static WELL_KNOWN_SIDS: &[(&str, &str)] = &[
    ("S-1-0-0", "Nobody"),
    ("S-1-1-0", "Everyone"),
    ("S-1-3-0", "Creator Owner"),
    ("S-1-3-4", "Owner Rights"),
    ("S-1-5-7", "Anonymous"),
    ("S-1-5-9", "Enterprise Domain Controllers"),
    ("S-1-5-10", "Self"),
    ("S-1-5-11", "Authenticated Users"),
    ("S-1-5-18", "SYSTEM"),
    ("S-1-5-32-544", "BUILTIN\\Administrators"),
    ("S-1-5-32-545", "BUILTIN\\Users"),
    ("S-1-5-32-548", "BUILTIN\\Account Operators"),
    ("S-1-5-32-549", "BUILTIN\\Server Operators"),
    ("S-1-5-32-550", "BUILTIN\\Print Operators"),
    ("S-1-5-32-551", "BUILTIN\\Backup Operators"),
    ("S-1-5-32-554", "BUILTIN\\Pre-Windows 2000 Compatible Access"),
];

/// Name of a fixed, domain-independent SID
pub fn well_known_sid_name(sid: &str) -> Option<&'static str> {
    WELL_KNOWN_SIDS
        .iter()
        .find(|(s, _)| *s == sid)
        .map(|(_, name)| *name)
}

/// Iterator over the fixed SID table, used to seed name caches
pub fn well_known_sids() -> impl Iterator<Item = (&'static str, &'static str)> {
    WELL_KNOWN_SIDS.iter().copied()
}

/// Name of a well-known domain-relative RID
pub fn well_known_rid_name(rid: u32) -> Option<&'static str> {
    let name = match rid {
        500 => "Administrator",
        502 => "krbtgt",
        512 => "Domain Admins",
        513 => "Domain Users",
        514 => "Domain Guests",
        515 => "Domain Computers",
        516 => "Domain Controllers",
        517 => "Cert Publishers",
        518 => "Schema Admins",
        519 => "Enterprise Admins",
        520 => "Group Policy Creator Owners",
        526 => "Key Admins",
        527 => "Enterprise Key Admins",
        553 => "RAS and IAS Servers",
        571 => "Allowed RODC Password Replication Group",
        572 => "Denied RODC Password Replication Group",
        _ => return None,
    };
    Some(name)
}

fn domain_rid(sid: &Sid) -> Option<u32> {
    sid.is_domain_sid().then(|| sid.rid()).flatten()
}

/// Human-readable list of the rights in `mask`.
///
/// `GenericAll` short-circuits. For object ACEs with a GUID the extended-right
/// and write-property labels carry the GUID's name. A mask with no known bit is
/// printed as hex.
pub fn describe_permissions(mask: u32, ace_type: AceType, object_type: Option<&GuidBytes>) -> String {
    if mask & access_mask::GENERIC_ALL != 0 {
        return "GenericAll (FULL CONTROL)".to_string();
    }

    let mut perms: Vec<String> = Vec::new();
    let mut flag = |bit: u32, label: &str| {
        if mask & bit != 0 {
            perms.push(label.to_string());
        }
    };

    flag(access_mask::GENERIC_READ, "GenericRead");
    flag(access_mask::GENERIC_WRITE, "GenericWrite");
    flag(access_mask::GENERIC_EXECUTE, "GenericExecute");

    if mask & access_mask::STANDARD_RIGHTS_ALL == access_mask::STANDARD_RIGHTS_ALL {
        flag(access_mask::STANDARD_RIGHTS_ALL, "StandardAll");
    } else {
        flag(access_mask::WRITE_OWNER, "WriteOwner");
        flag(access_mask::WRITE_DACL, "WriteDACL");
        flag(access_mask::READ_CONTROL, "ReadControl");
        flag(access_mask::DELETE, "Delete");
    }

    let named = match (ace_type, object_type) {
        (AceType::AccessAllowedObject, Some(guid)) => Some(guid_name(guid)),
        _ => None,
    };
    if mask & access_mask::DS_CONTROL_ACCESS != 0 {
        perms.push(match &named {
            Some(name) => format!("ExtendedRight({})", name),
            None => "AllExtendedRights".to_string(),
        });
    }
    if mask & access_mask::DS_WRITE_PROPERTY != 0 {
        perms.push(match &named {
            Some(name) => format!("WriteProperty({})", name),
            None => "WriteAllProperties".to_string(),
        });
    }

    let mut flag = |bit: u32, label: &str| {
        if mask & bit != 0 {
            perms.push(label.to_string());
        }
    };
    flag(access_mask::DS_READ_PROPERTY, "ReadProperty");
    flag(access_mask::DS_LIST_OBJECT, "ListObject");
    flag(access_mask::DS_DELETE_TREE, "DeleteTree");
    flag(access_mask::DS_SELF, "ValidatedWrite");
    flag(access_mask::DS_LIST_CHILDREN, "ListChildren");
    flag(access_mask::DS_DELETE_CHILD, "DeleteChild");
    flag(access_mask::DS_CREATE_CHILD, "CreateChild");

    if perms.is_empty() {
        format!("0x{:08X}", mask)
    } else {
        perms.join(", ")
    }
}

const DANGEROUS_BITS: u32 = access_mask::GENERIC_ALL
    | access_mask::GENERIC_WRITE
    | access_mask::WRITE_OWNER
    | access_mask::WRITE_DACL
    | access_mask::DS_WRITE_PROPERTY
    | access_mask::DS_CONTROL_ACCESS;

fn is_high_privilege(sid: &Sid) -> bool {
    matches!(
        sid.to_string().as_str(),
        "S-1-5-18" | "S-1-5-32-544" | "S-1-5-9" | "S-1-3-0"
    ) || matches!(domain_rid(sid), Some(512 | 516 | 518 | 519))
}

fn is_low_privilege_trustee(sid: &Sid) -> bool {
    matches!(sid.to_string().as_str(), "S-1-1-0" | "S-1-5-7" | "S-1-5-11")
        || matches!(domain_rid(sid), Some(513 | 515))
}

/// Classify one grant.
///
/// Masks without a write or control bit are `Standard`, as is
/// `User-Change-Password` (it needs the current password). Privileged principals
/// are expected to hold dangerous rights; low-privilege ones are not.
pub fn assess_risk(mask: u32, ace_type: AceType, sid: &Sid, object_type: Option<&GuidBytes>) -> RiskCategory {
    let change_password = ace_type == AceType::AccessAllowedObject
        && object_type.map(guid_name).as_deref() == Some("User-Change-Password");

    if change_password || mask & DANGEROUS_BITS == 0 || is_high_privilege(sid) {
        return RiskCategory::Standard;
    }
    if is_low_privilege_trustee(sid) {
        RiskCategory::Dangerous
    } else {
        RiskCategory::Notable
    }
}

/// [`describe_permissions`] for a parsed ACE
pub fn describe_ace(ace: &Ace) -> String {
    describe_permissions(ace.mask, ace.ace_type, ace.object_type.as_ref())
}

/// [`assess_risk`] for a parsed ACE
pub fn assess_ace(ace: &Ace) -> RiskCategory {
    assess_risk(ace.mask, ace.ace_type, &ace.sid, ace.object_type.as_ref())
}

/// Names of the principals that count as "anyone can do this".
///
/// Covers Everyone, Authenticated Users, BUILTIN\Users and the Domain Users /
/// Domain Computers RIDs. Output order follows input order, without duplicates.
pub fn filter_low_priv<'a>(sids: impl IntoIterator<Item = &'a Sid>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for sid in sids {
        let name = match sid.to_string().as_str() {
            "S-1-1-0" => Some("Everyone"),
            "S-1-5-11" => Some("Authenticated Users"),
            "S-1-5-32-545" => Some("BUILTIN\\Users"),
            _ => match domain_rid(sid) {
                Some(rid @ (513 | 515)) => well_known_rid_name(rid),
                _ => None,
            },
        };
        if let Some(name) = name {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}
