//! LDAP Utilities
//!
//! RFC 4515 filter escaping, binary-value filter escaping and the BER value
//! of the SD_FLAGS server control.

use bytes::BytesMut;
use ldap3::asn1::{write, ASNTag, Integer, Sequence, Tag};

use crate::errors::DirectoryResult;

/// LDAP_SERVER_SD_FLAGS_OID
pub const SD_FLAGS_OID: &str = "1.2.840.113556.1.4.801";

/// Simple Paged Results control
pub const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";

/// SD_FLAGS bits selecting which descriptor parts are read or written
pub mod sd_flags {
    pub const OWNER_SECURITY_INFORMATION: u32 = 0x01;
    pub const GROUP_SECURITY_INFORMATION: u32 = 0x02;
    pub const DACL_SECURITY_INFORMATION: u32 = 0x04;
    pub const SACL_SECURITY_INFORMATION: u32 = 0x08;
}

/// Escapes a string for safe use in an LDAP search filter (RFC 4515).
///
/// The following characters are escaped:
/// - `*` (asterisk) -> `\2a`
/// - `(` (left parenthesis) -> `\28`
/// - `)` (right parenthesis) -> `\29`
/// - `\` (backslash) -> `\5c`
/// - `\0` (NUL) -> `\00`
pub fn escape_ldap_filter(input: &str) -> String {
    input.chars().fold(String::new(), |mut acc, c| {
        match c {
            '*' => acc.push_str("\\2a"),
            '(' => acc.push_str("\\28"),
            ')' => acc.push_str("\\29"),
            '\\' => acc.push_str("\\5c"),
            '\0' => acc.push_str("\\00"),
            _ => acc.push(c),
        }
        acc
    })
}

/// Escapes every byte of a binary value as `\xx`, for filters such as
/// `(objectSid=\01\05...)`.
pub fn escape_binary_filter(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 3), |mut acc, b| {
        acc.push_str(&format!("\\{:02x}", b));
        acc
    })
}

/// BER encoding of `SDFlagsRequestValue ::= SEQUENCE { Flags INTEGER }`.
///
/// Flags up to 127 come out as `30 03 02 01 <flags>`.
pub fn sd_flags_control_value(flags: u32) -> DirectoryResult<Vec<u8>> {
    let value = Tag::Sequence(Sequence {
        inner: vec![Tag::Integer(Integer {
            inner: i64::from(flags),
            ..Default::default()
        })],
        ..Default::default()
    })
    .into_structure();

    let mut buf = BytesMut::with_capacity(16);
    write::encode_into(&mut buf, value)?;
    Ok(buf.to_vec())
}
