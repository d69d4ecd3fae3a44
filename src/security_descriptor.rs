//! Self-relative security descriptor and ACL codec
//!
//! # SECURITY_DESCRIPTOR_RELATIVE (MS-DTYP 2.4.6):
//! ```text
//! Offset  Size  Field
//! 0       1     Revision
//! 1       1     Sbz1 (padding)
//! 2       2     Control flags
//! 4       4     Owner SID offset
//! 8       4     Group SID offset
//! 12      4     SACL offset
//! 16      4     DACL offset
//! ```
//!
//! # ACL (MS-DTYP 2.4.5):
//! ```text
//! Offset  Size  Field
//! 0       1     Revision
//! 1       1     Sbz1 (padding)
//! 2       2     ACL size (header included)
//! 4       2     ACE count
//! 6       2     Sbz2 (padding)
//! 8       ...   ACE entries
//! ```
//!
//! Mutations never touch the input: they return a freshly built descriptor in
//! which only the DACL differs and every offset past the DACL is shifted.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ace::{parse_aces, Ace};
use crate::ace_matcher::{remove_matching_aces, AceTarget, MatchStrategy};
use crate::buffer::{read_u16_le, read_u32_le, slice_at, ByteWriter};
use crate::errors::{SdError, SdResult};
use crate::sid::Sid;

pub const SD_HEADER_LEN: usize = 20;
pub const ACL_HEADER_LEN: usize = 8;

/// Offsets of the four section pointers inside the header
const OWNER_FIELD: usize = 4;
const GROUP_FIELD: usize = 8;
const SACL_FIELD: usize = 12;
const DACL_FIELD: usize = 16;

/// Control flag bits used when synthesising a descriptor
pub mod control_flags {
    pub const SE_DACL_PRESENT: u16 = 0x0004;
    pub const SE_SELF_RELATIVE: u16 = 0x8000;
}

/// Decoded 20-byte descriptor header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdHeader {
    pub revision: u8,
    pub control: u16,
    pub owner_offset: u32,
    pub group_offset: u32,
    pub sacl_offset: u32,
    pub dacl_offset: u32,
}

impl SdHeader {
    /// Decode the header without validating any section pointer
    pub fn read(bytes: &[u8]) -> SdResult<Self> {
        if bytes.len() < SD_HEADER_LEN {
            return Err(SdError::TooShort { len: bytes.len() });
        }
        Ok(Self {
            revision: bytes[0],
            control: read_u16_le(bytes, 2, "SD control")?,
            owner_offset: read_u32_le(bytes, OWNER_FIELD, "SD owner offset")?,
            group_offset: read_u32_le(bytes, GROUP_FIELD, "SD group offset")?,
            sacl_offset: read_u32_le(bytes, SACL_FIELD, "SD SACL offset")?,
            dacl_offset: read_u32_le(bytes, DACL_FIELD, "SD DACL offset")?,
        })
    }
}

/// Decoded 8-byte ACL header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclHeader {
    pub revision: u8,
    pub size: u16,
    pub ace_count: u16,
}

impl AclHeader {
    pub fn read(buf: &[u8], offset: usize) -> SdResult<Self> {
        let raw = slice_at(buf, offset, ACL_HEADER_LEN, "ACL header")?;
        Ok(Self {
            revision: raw[0],
            size: u16::from_le_bytes([raw[2], raw[3]]),
            ace_count: u16::from_le_bytes([raw[4], raw[5]]),
        })
    }

    fn write(&self, w: &mut ByteWriter) -> SdResult<()> {
        w.put_u8(self.revision)?;
        w.put_u8(0)?;
        w.put_u16_le(self.size)?;
        w.put_u16_le(self.ace_count)?;
        w.put_u16_le(0)
    }
}

/// Validate the header and locate the DACL.
///
/// Fails with `TooShort` under 20 bytes and with `NoDacl` when the DACL offset
/// is zero or points outside the buffer.
pub fn parse_sd(bytes: &[u8]) -> SdResult<SdHeader> {
    let header = SdHeader::read(bytes)?;
    let dacl = header.dacl_offset as usize;
    if dacl == 0 || dacl >= bytes.len() {
        return Err(SdError::NoDacl {
            offset: dacl,
            len: bytes.len(),
        });
    }
    Ok(header)
}

/// Enumerate the ACEs of the ACL at `offset`.
///
/// The ACE window ends at the declared ACL size (clamped to the buffer). A
/// truncated ACE ends enumeration without an error.
pub fn parse_acl(buf: &[u8], offset: usize) -> SdResult<Vec<Ace>> {
    let acl = AclHeader::read(buf, offset)?;
    let body_start = offset + ACL_HEADER_LEN;
    let declared_end = offset.saturating_add(acl.size as usize);
    let end = if (acl.size as usize) < ACL_HEADER_LEN {
        buf.len()
    } else {
        declared_end.min(buf.len())
    };
    Ok(parse_aces(&buf[body_start..end], acl.ace_count as usize))
}

/// Parse the descriptor and return its DACL entries
pub fn dacl_aces(bytes: &[u8]) -> SdResult<Vec<Ace>> {
    let header = parse_sd(bytes)?;
    parse_acl(bytes, header.dacl_offset as usize)
}

/// Owner SID, when the owner offset points at a readable SID
pub fn owner_sid(bytes: &[u8]) -> Option<Sid> {
    let header = SdHeader::read(bytes).ok()?;
    let off = header.owner_offset as usize;
    if off == 0 {
        return None;
    }
    bytes.get(off..).and_then(|b| Sid::from_bytes(b).ok())
}

/// Header, ACE body and ACE count of the existing DACL
struct DaclView<'a> {
    offset: usize,
    header: AclHeader,
    body: &'a [u8],
}

fn dacl_view(sd: &[u8]) -> SdResult<DaclView<'_>> {
    let offset = parse_sd(sd)?.dacl_offset as usize;
    let header = AclHeader::read(sd, offset)?;
    let size = header.size as usize;
    if size < ACL_HEADER_LEN {
        return Err(SdError::malformed("DACL size", offset + 2, ACL_HEADER_LEN, sd.len()));
    }
    let body = slice_at(sd, offset + ACL_HEADER_LEN, size - ACL_HEADER_LEN, "DACL body")?;
    Ok(DaclView { offset, header, body })
}

fn acl_header_for(revision: u8, body_len: usize, count: usize) -> SdResult<AclHeader> {
    let total = ACL_HEADER_LEN + body_len;
    let size = u16::try_from(total).map_err(|_| SdError::AclTooLarge { size: total })?;
    let ace_count = u16::try_from(count).map_err(|_| SdError::AclTooLarge { size: count })?;
    Ok(AclHeader {
        revision,
        size,
        ace_count,
    })
}

/// Replace the DACL body of `original` and return the rebuilt descriptor.
///
/// Bytes before the DACL and after the old DACL are copied unchanged; owner,
/// group and SACL offsets greater than the DACL offset move by the size delta.
/// The ACL revision byte is preserved.
pub fn rebuild_sd(original: &[u8], new_body: &[u8], new_count: usize) -> SdResult<Vec<u8>> {
    let dacl = dacl_view(original)?;
    let old_size = dacl.header.size as usize;
    let new_header = acl_header_for(dacl.header.revision, new_body.len(), new_count)?;
    let new_size = new_header.size as usize;

    let tail_start = dacl.offset + old_size;
    let new_len = original.len() - old_size + new_size;
    let delta = new_size as i64 - old_size as i64;

    let mut w = ByteWriter::zeroed(new_len);
    w.put_bytes(&original[..dacl.offset])?;
    new_header.write(&mut w)?;
    w.put_bytes(new_body)?;
    w.put_bytes(&original[tail_start..])?;

    for field in [OWNER_FIELD, GROUP_FIELD, SACL_FIELD] {
        let off = w.u32_at(field)?;
        if off as usize > dacl.offset {
            let moved = u32::try_from(off as i64 + delta)
                .map_err(|_| SdError::malformed("SD section offset", field, 4, new_len))?;
            w.patch_u32_le(field, moved)?;
        }
    }

    debug!(
        "rebuild_sd: DACL at {} resized {} -> {} bytes ({} ACEs)",
        dacl.offset, old_size, new_size, new_count
    );
    Ok(w.into_inner())
}

/// Prepend `ace` to the DACL
pub fn add_ace(original: &[u8], ace: &[u8]) -> SdResult<Vec<u8>> {
    let dacl = dacl_view(original)?;
    let mut body = Vec::with_capacity(ace.len() + dacl.body.len());
    body.extend_from_slice(ace);
    body.extend_from_slice(dacl.body);
    rebuild_sd(original, &body, dacl.header.ace_count as usize + 1)
}

/// Remove the entries matching `target`, exact pass first, then relaxed.
///
/// Returns the rebuilt descriptor and the strategy that matched.
pub fn remove_ace(original: &[u8], target: &AceTarget) -> SdResult<(Vec<u8>, MatchStrategy)> {
    let dacl = dacl_view(original)?;
    let count = dacl.header.ace_count as usize;
    let removal = remove_matching_aces(dacl.body, count, target);
    let strategy = removal.matched_by.ok_or_else(|| SdError::NoMatchingAce {
        sid: target.sid.to_string(),
        mask: target.mask,
    })?;
    let rebuilt = rebuild_sd(original, &removal.aces, removal.count)?;
    Ok((rebuilt, strategy))
}

/// Minimal descriptor carrying only the DACL of `sd`.
///
/// Used with the SD_FLAGS control scoped to the DACL: revision 1, control
/// `SE_DACL_PRESENT | SE_SELF_RELATIVE`, DACL immediately after the header.
pub fn dacl_only_sd(sd: &[u8]) -> SdResult<Vec<u8>> {
    let dacl = dacl_view(sd)?;
    let acl_bytes = &sd[dacl.offset..dacl.offset + dacl.header.size as usize];

    let mut w = ByteWriter::zeroed(SD_HEADER_LEN + acl_bytes.len());
    w.put_u8(1)?;
    w.put_u8(0)?;
    w.put_u16_le(control_flags::SE_SELF_RELATIVE | control_flags::SE_DACL_PRESENT)?;
    w.put_u32_le(0)?;
    w.put_u32_le(0)?;
    w.put_u32_le(0)?;
    w.put_u32_le(SD_HEADER_LEN as u32)?;
    w.put_bytes(acl_bytes)?;
    Ok(w.into_inner())
}
