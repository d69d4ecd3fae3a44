//! Active Directory security descriptor toolkit
//!
//! Binary codecs for SIDs, GUIDs, ACEs, ACLs and self-relative security
//! descriptors; a DACL editor (read, add, remove, grant, backup, restore) with
//! a two-pass remover; and assessors for certificate-template (ESC1-ESC4) and
//! Kerberos delegation misconfigurations.
//!
//! Directory access goes through [`directory::DirectoryService`].
//! [`ldap_directory::LdapDirectory`] implements it over `ldap3`.

mod buffer;

pub mod ace;
pub mod ace_matcher;
pub mod acl_edit;
pub mod adcs_audit;
pub mod common_types;
pub mod config;
pub mod delegation_audit;
pub mod directory;
pub mod errors;
pub mod guid;
pub mod ldap_directory;
pub mod ldap_helpers;
pub mod ldap_timeout;
pub mod ldap_utils;
pub mod permissions;
pub mod rights;
pub mod secure_types;
pub mod security_descriptor;
pub mod sid;

pub use ace::{build_ace, parse_ace, parse_aces, Ace, AceType};
pub use ace_matcher::{remove_matching_aces, AceTarget, MatchStrategy};
pub use acl_edit::{AclAction, AclOutcome, AclRequest, DaclChange, DaclReport, ModifyMode, SdBackup};
pub use common_types::{Finding, FindingKind, FindingSeverity};
pub use config::ConnectionConfig;
pub use directory::DirectoryService;
pub use errors::{DirectoryError, DirectoryResult, SdError, SdResult};
pub use guid::{guid_name, guid_to_bytes, GuidBytes};
pub use ldap_directory::LdapDirectory;
pub use permissions::{assess_risk, describe_permissions, filter_low_priv, RiskCategory};
pub use rights::{lookup_right, Right};
pub use secure_types::{Credentials, SecureString};
pub use security_descriptor::{parse_acl, parse_sd, rebuild_sd};
pub use sid::Sid;
