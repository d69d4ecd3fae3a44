//! Two-pass ACE removal
//!
//! Active Directory rewrites generic rights into their specific equivalents
//! when it persists a DACL (a `GenericAll` grant is read back as `0x000F01FF`),
//! so removing by the mask that was originally written can miss. Removal is
//! therefore attempted with an exact match first and, only if that removes
//! nothing, again with the mask requirement dropped.

use serde::{Deserialize, Serialize};

use crate::ace::{parse_ace, Ace, AceStep, AceType};
use crate::guid::GuidBytes;
use crate::sid::Sid;

/// How strictly an existing ACE must agree with the removal target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStrategy {
    /// SID, mask, type and object GUID all equal
    Exact,
    /// Mask ignored; absorbs server-side decomposition of generic rights
    RelaxedBySid,
}

impl MatchStrategy {
    /// Order in which the strategies are tried
    pub const ORDER: [MatchStrategy; 2] = [MatchStrategy::Exact, MatchStrategy::RelaxedBySid];

    fn mask_matches(self, ace_mask: u32, target_mask: u32) -> bool {
        match self {
            MatchStrategy::Exact => ace_mask == target_mask,
            MatchStrategy::RelaxedBySid => true,
        }
    }
}

/// The entry a caller wants removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AceTarget {
    pub sid: Sid,
    pub mask: u32,
    pub object_type: Option<GuidBytes>,
    pub ace_type: AceType,
}

impl AceTarget {
    pub fn standard(sid: Sid, mask: u32) -> Self {
        Self {
            sid,
            mask,
            object_type: None,
            ace_type: AceType::AccessAllowed,
        }
    }

    pub fn object(sid: Sid, mask: u32, object_type: GuidBytes) -> Self {
        Self {
            sid,
            mask,
            object_type: Some(object_type),
            ace_type: AceType::AccessAllowedObject,
        }
    }

    /// Whether `ace` should be removed under `strategy`.
    ///
    /// Standard ACEs are only candidates for a standard target without a GUID;
    /// object ACEs only for an object target whose GUID equals the ACE's.
    pub fn matches(&self, ace: &Ace, strategy: MatchStrategy) -> bool {
        if ace.sid != self.sid || !strategy.mask_matches(ace.mask, self.mask) {
            return false;
        }
        match ace.ace_type {
            AceType::AccessAllowed => {
                self.ace_type == AceType::AccessAllowed && self.object_type.is_none()
            }
            AceType::AccessAllowedObject => {
                self.ace_type == AceType::AccessAllowedObject
                    && self.object_type.is_some()
                    && ace.object_type == self.object_type
            }
        }
    }
}

/// Result of a removal attempt over an ACE list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub aces: Vec<u8>,
    pub count: usize,
    /// `None` when neither pass removed anything
    pub matched_by: Option<MatchStrategy>,
}

/// Remove every ACE matching `target` from `ace_bytes` (the DACL body).
///
/// Survivors keep their bytes and order. When nothing matches, the input is
/// returned unchanged with its original count.
pub fn remove_matching_aces(ace_bytes: &[u8], ace_count: usize, target: &AceTarget) -> Removal {
    for strategy in MatchStrategy::ORDER {
        let (aces, count) = remove_pass(ace_bytes, ace_count, target, strategy);
        if count < ace_count {
            return Removal {
                aces,
                count,
                matched_by: Some(strategy),
            };
        }
    }
    Removal {
        aces: ace_bytes.to_vec(),
        count: ace_count,
        matched_by: None,
    }
}

fn remove_pass(ace_bytes: &[u8], ace_count: usize, target: &AceTarget, strategy: MatchStrategy) -> (Vec<u8>, usize) {
    let mut kept = Vec::with_capacity(ace_bytes.len());
    let mut remaining = ace_count;
    let mut pos = 0;

    for _ in 0..ace_count {
        match parse_ace(ace_bytes, pos) {
            AceStep::Parsed(ace, next) => {
                if target.matches(&ace, strategy) {
                    remaining -= 1;
                } else {
                    kept.extend_from_slice(&ace_bytes[pos..next]);
                }
                pos = next;
            }
            AceStep::Skipped(next) => {
                kept.extend_from_slice(&ace_bytes[pos..next]);
                pos = next;
            }
            AceStep::Stop => break,
        }
    }

    // unreadable remainder is carried through untouched
    kept.extend_from_slice(&ace_bytes[pos..]);
    (kept, remaining)
}
