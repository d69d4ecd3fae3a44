//! Security identifier (SID) codec
//!
//! # Format (MS-DTYP 2.4.2):
//! ```text
//! Offset  Size  Field
//! 0       1     Revision
//! 1       1     SubAuthorityCount
//! 2       6     IdentifierAuthority (big-endian)
//! 8       4*N   SubAuthorities (little-endian, N = SubAuthorityCount)
//! ```
//!
//! String form is `S-{revision}-{authority}-{sub1}-...-{subN}`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::buffer::slice_at;
use crate::errors::{SdError, SdResult};

/// Fixed part of a binary SID (revision, count, authority)
pub const SID_HEADER_LEN: usize = 8;

const MAX_AUTHORITY: u64 = 0xFFFF_FFFF_FFFF;

/// Parsed security identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sid {
    revision: u8,
    authority: u64,
    sub_authorities: Vec<u32>,
}

impl Sid {
    /// Decode a binary SID from the start of `bytes`.
    ///
    /// Trailing bytes beyond `8 + 4 * count` are ignored, so this can be
    /// pointed at a SID embedded in a larger record.
    pub fn from_bytes(bytes: &[u8]) -> SdResult<Self> {
        let header = slice_at(bytes, 0, SID_HEADER_LEN, "SID")?;
        let revision = header[0];
        let count = header[1] as usize;

        let authority = u64::from_be_bytes([
            0, 0, header[2], header[3], header[4], header[5], header[6], header[7],
        ]);

        let subs = slice_at(bytes, SID_HEADER_LEN, count * 4, "SID sub-authorities")?;
        let sub_authorities = subs
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(Self {
            revision,
            authority,
            sub_authorities,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_len());
        out.push(self.revision);
        out.push(self.sub_authorities.len() as u8);
        out.extend_from_slice(&self.authority.to_be_bytes()[2..]);
        for sub in &self.sub_authorities {
            out.extend_from_slice(&sub.to_le_bytes());
        }
        out
    }

    /// Encoded length in bytes
    pub fn byte_len(&self) -> usize {
        SID_HEADER_LEN + 4 * self.sub_authorities.len()
    }

    pub fn authority(&self) -> u64 {
        self.authority
    }

    pub fn sub_authorities(&self) -> &[u32] {
        &self.sub_authorities
    }

    /// Relative identifier: the last sub-authority of a SID with at least two of them
    pub fn rid(&self) -> Option<u32> {
        if self.sub_authorities.len() >= 2 {
            self.sub_authorities.last().copied()
        } else {
            None
        }
    }

    /// True for `S-1-5-21-...` account-domain SIDs
    pub fn is_domain_sid(&self) -> bool {
        self.authority == 5 && self.sub_authorities.first() == Some(&21)
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-{}", self.revision, self.authority)?;
        for sub in &self.sub_authorities {
            write!(f, "-{}", sub)?;
        }
        Ok(())
    }
}

impl FromStr for Sid {
    type Err = SdError;

    /// Only the `S-1-...` form is accepted.
    fn from_str(s: &str) -> SdResult<Self> {
        let rest = s
            .strip_prefix("S-1-")
            .ok_or_else(|| SdError::invalid(s, "SID must start with S-1-"))?;

        let mut parts = rest.split('-');
        let authority: u64 = parts
            .next()
            .filter(|p| !p.is_empty())
            .and_then(|p| p.parse().ok())
            .filter(|a| *a <= MAX_AUTHORITY)
            .ok_or_else(|| SdError::invalid(s, "identifier authority is not a 48-bit number"))?;

        let sub_authorities = parts
            .map(|p| p.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| SdError::invalid(s, "sub-authority is not a 32-bit number"))?;

        if sub_authorities.len() > u8::MAX as usize {
            return Err(SdError::invalid(s, "too many sub-authorities"));
        }

        Ok(Self {
            revision: 1,
            authority,
            sub_authorities,
        })
    }
}

/// Binary SID to its canonical string
pub fn sid_to_string(bytes: &[u8]) -> SdResult<String> {
    Sid::from_bytes(bytes).map(|sid| sid.to_string())
}

/// `S-1-...` string to its binary encoding
pub fn sid_to_bytes(s: &str) -> SdResult<Vec<u8>> {
    s.parse::<Sid>().map(|sid| sid.to_bytes())
}
