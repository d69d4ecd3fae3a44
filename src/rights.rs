//! Friendly right names and access mask constants

use serde::Serialize;

use crate::ace::AceType;
use crate::errors::{SdError, SdResult};
use crate::guid::{self, well_known, GuidBytes};

/// Access mask bits used by directory objects (MS-ADTS 5.1.3.2)
pub mod access_mask {
    pub const GENERIC_READ: u32 = 0x8000_0000;
    pub const GENERIC_WRITE: u32 = 0x4000_0000;
    pub const GENERIC_EXECUTE: u32 = 0x2000_0000;
    pub const GENERIC_ALL: u32 = 0x1000_0000;

    pub const STANDARD_RIGHTS_ALL: u32 = 0x000F_0000;
    pub const WRITE_OWNER: u32 = 0x0008_0000;
    pub const WRITE_DACL: u32 = 0x0004_0000;
    pub const READ_CONTROL: u32 = 0x0002_0000;
    pub const DELETE: u32 = 0x0001_0000;

    pub const DS_CONTROL_ACCESS: u32 = 0x0000_0100;
    pub const DS_LIST_OBJECT: u32 = 0x0000_0080;
    pub const DS_DELETE_TREE: u32 = 0x0000_0040;
    pub const DS_WRITE_PROPERTY: u32 = 0x0000_0020;
    pub const DS_READ_PROPERTY: u32 = 0x0000_0010;
    pub const DS_SELF: u32 = 0x0000_0008;
    pub const DS_LIST_CHILDREN: u32 = 0x0000_0004;
    pub const DS_DELETE_CHILD: u32 = 0x0000_0002;
    pub const DS_CREATE_CHILD: u32 = 0x0000_0001;
}

/// A grantable right: mask, optional object GUID and the ACE shape to write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Right {
    pub name: &'static str,
    pub mask: u32,
    pub object_type: Option<GuidBytes>,
    pub ace_type: AceType,
}

struct RightDef {
    names: &'static [&'static str],
    mask: u32,
    guid: Option<&'static str>,
}

static RIGHTS: &[RightDef] = &[
    RightDef { names: &["genericall", "full-control"], mask: access_mask::GENERIC_ALL, guid: None },
    RightDef { names: &["genericwrite"], mask: access_mask::GENERIC_WRITE, guid: None },
    RightDef { names: &["writedacl"], mask: access_mask::WRITE_DACL, guid: None },
    RightDef { names: &["writeowner"], mask: access_mask::WRITE_OWNER, guid: None },
    RightDef { names: &["allextendedrights"], mask: access_mask::DS_CONTROL_ACCESS, guid: None },
    RightDef { names: &["writeproperty"], mask: access_mask::DS_WRITE_PROPERTY, guid: None },
    RightDef {
        names: &["forcechangepassword"],
        mask: access_mask::DS_CONTROL_ACCESS,
        guid: Some(well_known::USER_FORCE_CHANGE_PASSWORD),
    },
    RightDef {
        names: &["dcsync", "ds-replication-get-changes"],
        mask: access_mask::DS_CONTROL_ACCESS,
        guid: Some(well_known::DS_REPLICATION_GET_CHANGES),
    },
    RightDef {
        names: &["ds-replication-get-changes-all"],
        mask: access_mask::DS_CONTROL_ACCESS,
        guid: Some(well_known::DS_REPLICATION_GET_CHANGES_ALL),
    },
    RightDef {
        names: &["write-member"],
        mask: access_mask::DS_WRITE_PROPERTY,
        guid: Some(well_known::MEMBER),
    },
    RightDef {
        names: &["write-spn"],
        mask: access_mask::DS_WRITE_PROPERTY,
        guid: Some(well_known::SERVICE_PRINCIPAL_NAME),
    },
    RightDef {
        names: &["write-keycredentiallink"],
        mask: access_mask::DS_WRITE_PROPERTY,
        guid: Some(well_known::MS_DS_KEY_CREDENTIAL_LINK),
    },
];

impl RightDef {
    fn to_right(&self) -> Right {
        let object_type = self.guid.map(guid::known);
        Right {
            name: self.names[0],
            mask: self.mask,
            object_type,
            ace_type: if object_type.is_some() {
                AceType::AccessAllowedObject
            } else {
                AceType::AccessAllowed
            },
        }
    }
}

/// Case-insensitive lookup of a friendly right name
pub fn lookup_right(name: &str) -> SdResult<Right> {
    let wanted = name.trim().to_ascii_lowercase();
    RIGHTS
        .iter()
        .find(|def| def.names.contains(&wanted.as_str()))
        .map(RightDef::to_right)
        .ok_or_else(|| SdError::UnknownRight {
            name: name.to_string(),
        })
}

/// Every accepted right name, aliases included
pub fn right_names() -> impl Iterator<Item = &'static str> {
    RIGHTS.iter().flat_map(|def| def.names.iter().copied())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guid::guid_name;

    #[test]
    fn test_generic_rights() {
        let right = lookup_right("GenericAll").unwrap();
        assert_eq!(right.mask, 0x10000000);
        assert_eq!(right.object_type, None);
        assert_eq!(right.ace_type, AceType::AccessAllowed);

        assert_eq!(lookup_right("full-control").unwrap().mask, 0x10000000);
        assert_eq!(lookup_right("genericwrite").unwrap().mask, 0x40000000);
        assert_eq!(lookup_right("WRITEDACL").unwrap().mask, 0x00040000);
        assert_eq!(lookup_right("writeowner").unwrap().mask, 0x00080000);
        assert_eq!(lookup_right("allextendedrights").unwrap().mask, 0x00000100);
        assert_eq!(lookup_right("writeproperty").unwrap().mask, 0x00000020);
    }

    #[test]
    fn test_guid_restricted_rights() {
        let cases = [
            ("forcechangepassword", 0x100, "User-Force-Change-Password"),
            ("dcsync", 0x100, "DS-Replication-Get-Changes"),
            ("ds-replication-get-changes", 0x100, "DS-Replication-Get-Changes"),
            ("ds-replication-get-changes-all", 0x100, "DS-Replication-Get-Changes-All"),
            ("write-member", 0x20, "member"),
            ("write-spn", 0x20, "servicePrincipalName"),
            ("write-keycredentiallink", 0x20, "msDS-KeyCredentialLink"),
        ];
        for (name, mask, guid) in cases {
            let right = lookup_right(name).unwrap();
            assert_eq!(right.mask, mask, "{}", name);
            assert_eq!(right.ace_type, AceType::AccessAllowedObject, "{}", name);
            assert_eq!(guid_name(&right.object_type.unwrap()), guid, "{}", name);
        }
    }

    #[test]
    fn test_unknown_right() {
        assert_eq!(
            lookup_right("readeverything"),
            Err(SdError::UnknownRight {
                name: "readeverything".to_string()
            })
        );
    }

    #[test]
    fn test_right_names_lists_aliases() {
        let names: Vec<_> = right_names().collect();
        assert!(names.contains(&"full-control"));
        assert!(names.contains(&"dcsync"));
        assert_eq!(names.len(), 14);
    }
}
