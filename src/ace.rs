//! Access control entry (ACE) codec
//!
//! Only the two allow shapes used on directory objects are modelled:
//!
//! ```text
//! ACCESS_ALLOWED (0x00):
//! Offset  Size  Field
//! 0       1     AceType
//! 1       1     AceFlags
//! 2       2     AceSize (LE)
//! 4       4     AccessMask (LE)
//! 8       ...   SID
//!
//! ACCESS_ALLOWED_OBJECT (0x05):
//! 0       1     AceType
//! 1       1     AceFlags
//! 2       2     AceSize (LE)
//! 4       4     AccessMask (LE)
//! 8       4     Flags (0x01 ObjectType present, 0x02 InheritedObjectType present)
//! 12      16    ObjectType GUID            (if 0x01)
//! ..      16    InheritedObjectType GUID   (if 0x02)
//! ..      ...   SID
//! ```
//!
//! Every other ACE type is stepped over without being collected.

use serde::{Deserialize, Serialize};

use crate::buffer::{read_u16_le, read_u32_le, slice_at, ByteWriter};
use crate::errors::{SdError, SdResult};
use crate::guid::{guid_name, GuidBytes};
use crate::sid::Sid;

/// Size of the common ACE header plus access mask
pub const ACE_HEADER_LEN: usize = 8;

/// Object ACE flag bits (MS-ADTS 2.4.4.3)
pub mod object_flags {
    pub const OBJECT_TYPE_PRESENT: u32 = 0x0000_0001;
    pub const INHERITED_OBJECT_TYPE_PRESENT: u32 = 0x0000_0002;
}

/// The ACE shapes this codec understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AceType {
    AccessAllowed,
    AccessAllowedObject,
}

impl AceType {
    pub fn tag(self) -> u8 {
        match self {
            AceType::AccessAllowed => 0x00,
            AceType::AccessAllowedObject => 0x05,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(AceType::AccessAllowed),
            0x05 => Some(AceType::AccessAllowedObject),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AceType::AccessAllowed => "ACCESS_ALLOWED",
            AceType::AccessAllowedObject => "ACCESS_ALLOWED_OBJECT",
        }
    }
}

impl std::fmt::Display for AceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One decoded ACE
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ace {
    pub ace_type: AceType,
    pub flags: u8,
    pub size: u16,
    pub mask: u32,
    /// Zero for standard ACEs
    pub object_flags: u32,
    pub object_type: Option<GuidBytes>,
    pub inherited_object_type: Option<GuidBytes>,
    pub sid: Sid,
}

impl Ace {
    pub fn sid_string(&self) -> String {
        self.sid.to_string()
    }

    /// Friendly name of the object-type GUID, if any
    pub fn object_type_name(&self) -> Option<String> {
        self.object_type.as_ref().map(guid_name)
    }
}

/// Outcome of reading one record from an ACE list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AceStep {
    /// A modelled ACE and the position of the next record
    Parsed(Ace, usize),
    /// A well-formed record of another type (or an undecodable body); continue at the position
    Skipped(usize),
    /// Header unreadable or record overruns the buffer; enumeration ends here
    Stop,
}

/// Offset of the SID from the start of the record.
///
/// Both optional GUIDs shift the SID; enumeration and removal share this.
pub(crate) fn sid_offset(ace_type: AceType, flags: u32) -> usize {
    match ace_type {
        AceType::AccessAllowed => ACE_HEADER_LEN,
        AceType::AccessAllowedObject => {
            let mut off = ACE_HEADER_LEN + 4;
            if flags & object_flags::OBJECT_TYPE_PRESENT != 0 {
                off += 16;
            }
            if flags & object_flags::INHERITED_OBJECT_TYPE_PRESENT != 0 {
                off += 16;
            }
            off
        }
    }
}

/// Read the ACE record starting at `pos`.
pub fn parse_ace(buf: &[u8], pos: usize) -> AceStep {
    let Ok(header) = slice_at(buf, pos, 4, "ACE header") else {
        return AceStep::Stop;
    };
    let size = u16::from_le_bytes([header[2], header[3]]) as usize;
    if size < 4 {
        return AceStep::Stop;
    }
    let Ok(record) = slice_at(buf, pos, size, "ACE") else {
        return AceStep::Stop;
    };
    let next = pos + size;

    let Some(ace_type) = AceType::from_tag(header[0]) else {
        return AceStep::Skipped(next);
    };

    match decode_record(ace_type, record) {
        Ok(ace) => AceStep::Parsed(ace, next),
        Err(_) => AceStep::Skipped(next),
    }
}

fn decode_record(ace_type: AceType, record: &[u8]) -> SdResult<Ace> {
    let mask = read_u32_le(record, 4, "ACE access mask")?;

    let (flags, object_type, inherited_object_type) = match ace_type {
        AceType::AccessAllowed => (0, None, None),
        AceType::AccessAllowedObject => {
            let flags = read_u32_le(record, 8, "object ACE flags")?;
            let mut cursor = ACE_HEADER_LEN + 4;
            let mut take_guid = |bit: u32| -> SdResult<Option<GuidBytes>> {
                if flags & bit == 0 {
                    return Ok(None);
                }
                let raw = slice_at(record, cursor, 16, "object ACE GUID")?;
                cursor += 16;
                let mut guid = [0u8; 16];
                guid.copy_from_slice(raw);
                Ok(Some(guid))
            };
            let object_type = take_guid(object_flags::OBJECT_TYPE_PRESENT)?;
            let inherited = take_guid(object_flags::INHERITED_OBJECT_TYPE_PRESENT)?;
            (flags, object_type, inherited)
        }
    };

    let start = sid_offset(ace_type, flags);
    let sid_bytes = record
        .get(start..)
        .ok_or_else(|| SdError::malformed("ACE SID", start, 8, record.len()))?;
    let sid = Sid::from_bytes(sid_bytes)?;

    Ok(Ace {
        ace_type,
        flags: record[1],
        size: read_u16_le(record, 2, "ACE size")?,
        mask,
        object_flags: flags,
        object_type,
        inherited_object_type,
        sid,
    })
}

/// Build the bytes of a new allow ACE with no inheritance flags.
///
/// An object ACE is emitted only when `ace_type` is the object shape and a GUID
/// is supplied; its flags are always `OBJECT_TYPE_PRESENT`. Anything else
/// produces the standard shape.
pub fn build_ace(ace_type: AceType, mask: u32, sid: &Sid, object_type: Option<&GuidBytes>) -> SdResult<Vec<u8>> {
    let sid_bytes = sid.to_bytes();

    let guid = match (ace_type, object_type) {
        (AceType::AccessAllowedObject, Some(guid)) => Some(guid),
        _ => None,
    };

    let size = match guid {
        Some(_) => ACE_HEADER_LEN + 4 + 16 + sid_bytes.len(),
        None => ACE_HEADER_LEN + sid_bytes.len(),
    };
    let wire_size = u16::try_from(size).map_err(|_| SdError::AclTooLarge { size })?;

    let mut w = ByteWriter::zeroed(size);
    match guid {
        Some(guid) => {
            w.put_u8(AceType::AccessAllowedObject.tag())?;
            w.put_u8(0)?;
            w.put_u16_le(wire_size)?;
            w.put_u32_le(mask)?;
            w.put_u32_le(object_flags::OBJECT_TYPE_PRESENT)?;
            w.put_bytes(guid)?;
        }
        None => {
            w.put_u8(AceType::AccessAllowed.tag())?;
            w.put_u8(0)?;
            w.put_u16_le(wire_size)?;
            w.put_u32_le(mask)?;
        }
    }
    w.put_bytes(&sid_bytes)?;
    Ok(w.into_inner())
}

/// Enumerate up to `count` ACEs from an ACE list, stopping early on a truncated record
pub fn parse_aces(buf: &[u8], count: usize) -> Vec<Ace> {
    let mut aces = Vec::with_capacity(count.min(buf.len() / ACE_HEADER_LEN));
    let mut pos = 0;
    for _ in 0..count {
        match parse_ace(buf, pos) {
            AceStep::Parsed(ace, next) => {
                aces.push(ace);
                pos = next;
            }
            AceStep::Skipped(next) => pos = next,
            AceStep::Stop => break,
        }
    }
    aces
}
