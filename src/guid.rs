//! GUID codec and the table of well-known extended rights and attributes
//!
//! # Format (MS-DTYP 2.3.4.2):
//! ```text
//! GUID = Data1(4, LE) + Data2(2, LE) + Data3(2, LE) + Data4(8, as written)
//! String format: xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx
//! ```
//!
//! The binary form is not a byte reversal of the string: the first three
//! fields are little-endian, the last two hyphen groups are copied verbatim.
//! `uuid`'s `*_bytes_le` helpers implement exactly this layout.

use uuid::Uuid;

use crate::buffer::slice_at;
use crate::errors::SdResult;

pub type GuidBytes = [u8; 16];

/// Well-known extended-right, property-set and attribute GUIDs
pub mod well_known {
    pub const USER_FORCE_CHANGE_PASSWORD: &str = "00299570-246d-11d0-a768-00aa006e0529";
    pub const USER_CHANGE_PASSWORD: &str = "ab721a53-1e2f-11d0-9819-00aa0040529b";
    pub const CERTIFICATE_ENROLLMENT: &str = "0e10c968-78fb-11d2-90d4-00c04f79dc55";
    pub const DS_REPLICATION_GET_CHANGES: &str = "1131f6aa-9c07-11d1-f79f-00c04fc2dcd2";
    pub const DS_REPLICATION_GET_CHANGES_ALL: &str = "1131f6ad-9c07-11d1-f79f-00c04fc2dcd2";
    pub const MEMBER: &str = "bf9679c0-0de6-11d0-a285-00aa003049e2";
    pub const SERVICE_PRINCIPAL_NAME: &str = "bf967a86-0de6-11d0-a285-00aa003049e2";
    pub const MS_DS_KEY_CREDENTIAL_LINK: &str = "5b47d60f-6090-40b2-9f37-2a4de88f3063";
}

static GUID_NAMES: &[(&str, &str)] = &[
    // Extended rights
    (well_known::USER_FORCE_CHANGE_PASSWORD, "User-Force-Change-Password"),
    (well_known::USER_CHANGE_PASSWORD, "User-Change-Password"),
    ("ab721a54-1e2f-11d0-9819-00aa0040529b", "Send-As"),
    ("ab721a56-1e2f-11d0-9819-00aa0040529b", "Receive-As"),
    (well_known::CERTIFICATE_ENROLLMENT, "Certificate-Enrollment"),
    (well_known::DS_REPLICATION_GET_CHANGES, "DS-Replication-Get-Changes"),
    (well_known::DS_REPLICATION_GET_CHANGES_ALL, "DS-Replication-Get-Changes-All"),
    ("89e95b76-444d-4c62-991a-0facbeda640c", "DS-Replication-Get-Changes-In-Filtered-Set"),
    ("1131f6ab-9c07-11d1-f79f-00c04fc2dcd2", "DS-Replication-Manage-Topology"),
    ("91e647de-d96f-4b70-9557-d63ff4f3ccd8", "Private-Information"),
    // Attributes
    (well_known::MEMBER, "member"),
    ("bf967a7f-0de6-11d0-a285-00aa003049e2", "userCertificate"),
    ("f30e3bc2-9ff0-11d1-b603-0000f80367c1", "GPC-File-Sys-Path"),
    (well_known::SERVICE_PRINCIPAL_NAME, "servicePrincipalName"),
    (well_known::MS_DS_KEY_CREDENTIAL_LINK, "msDS-KeyCredentialLink"),
    ("3f78c3e5-f79a-46bd-a0b8-9d18116ddc79", "msDS-AllowedToActOnBehalfOfOtherIdentity"),
    ("ea1b7b93-5e48-46d5-bc6c-4df4fda78a35", "msDS-SupportedEncryptionTypes"),
    // Property sets
    ("4c164200-20c0-11d0-a768-00aa006e0529", "User-Account-Restrictions"),
    ("5f202010-79a5-11d0-9020-00c04fc2d4cf", "User-Logon"),
    ("bc0ac240-79a9-11d0-9020-00c04fc2d4cf", "Membership"),
    ("e48d0154-bcf8-11d1-8702-00c04fb96050", "Public-Information"),
    ("77b5b886-944a-11d1-aebd-0000f80367c1", "Personal-Information"),
    ("e45795b2-9455-11d1-aebd-0000f80367c1", "Email-Information"),
    ("e45795b3-9455-11d1-aebd-0000f80367c1", "Web-Information"),
    ("59ba2f42-79a2-11d0-9020-00c04fc2d3cf", "General-Information"),
    ("6db69a1c-9422-11d1-aebd-0000f80367c1", "Terminal-Server"),
    ("5805bc62-bdc9-4428-a5e2-856a0f4c185e", "Terminal-Server-License-Server"),
];

/// Canonical GUID string to its 16-byte mixed-endian form.
///
/// Returns `None` on malformed input; callers treat that as "no object
/// restriction" rather than failing.
pub fn guid_to_bytes(s: &str) -> Option<GuidBytes> {
    let hex: String = s
        .trim_matches(|c| c == '{' || c == '}')
        .chars()
        .filter(|c| *c != '-')
        .collect();
    if hex.len() != 32 {
        return None;
    }
    Uuid::parse_str(&hex).ok().map(|u| u.to_bytes_le())
}

/// First 16 bytes of `bytes` as a lowercase hyphenated GUID string
pub fn guid_to_string(bytes: &[u8]) -> SdResult<String> {
    let raw = slice_at(bytes, 0, 16, "GUID")?;
    let mut arr = [0u8; 16];
    arr.copy_from_slice(raw);
    Ok(format_guid(&arr))
}

pub(crate) fn format_guid(bytes: &GuidBytes) -> String {
    Uuid::from_bytes_le(*bytes).hyphenated().to_string()
}

/// Display name of a well-known GUID, or the GUID string itself when unknown
pub fn guid_name(bytes: &GuidBytes) -> String {
    let text = format_guid(bytes);
    GUID_NAMES
        .iter()
        .find(|(guid, _)| *guid == text)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or(text)
}

/// Binary form of a GUID constant from [`well_known`].
///
/// Table entries are validated by tests; an invalid constant yields all zeros.
pub(crate) fn known(s: &'static str) -> GuidBytes {
    guid_to_bytes(s).unwrap_or_default()
}
