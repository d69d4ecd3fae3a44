//! Common Types Module
//!
//! Finding, severity and UAC types shared by the certificate-template and
//! delegation assessors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity levels for security findings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FindingSeverity {
    Informational,
    Low,
    Medium,
    High,
    Critical,
}

impl FindingSeverity {
    /// Critical = 4, High = 3, Medium = 2, Low = 1, Informational = 0
    pub fn level(&self) -> u8 {
        match self {
            FindingSeverity::Critical => 4,
            FindingSeverity::High => 3,
            FindingSeverity::Medium => 2,
            FindingSeverity::Low => 1,
            FindingSeverity::Informational => 0,
        }
    }
}

/// Counts of findings grouped by severity level
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub informational: u32,
    pub total: u32,
}

impl SeverityCounts {
    /// Create counts from an iterator of severity levels
    pub fn from_iter<'a>(severities: impl Iterator<Item = &'a FindingSeverity>) -> Self {
        let mut counts = Self::default();
        for severity in severities {
            match severity {
                FindingSeverity::Critical => counts.critical += 1,
                FindingSeverity::High => counts.high += 1,
                FindingSeverity::Medium => counts.medium += 1,
                FindingSeverity::Low => counts.low += 1,
                FindingSeverity::Informational => counts.informational += 1,
            }
            counts.total += 1;
        }
        counts
    }
}

/// What a finding is about
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FindingKind {
    /// Enrollee supplies subject on an authentication template
    Esc1,
    /// Any-purpose or no EKU
    Esc2,
    /// Certificate Request Agent
    Esc3,
    /// Template object writable by low-privileged principals
    Esc4,
    /// Resource-based constrained delegation
    Rbcd,
    Unconstrained,
    Constrained,
    /// Marked sensitive and cannot be delegated
    Protected,
}

impl FindingKind {
    /// Default severity for this kind of finding
    pub fn severity(&self) -> FindingSeverity {
        match self {
            FindingKind::Esc1 | FindingKind::Esc4 | FindingKind::Unconstrained => FindingSeverity::Critical,
            FindingKind::Esc2 | FindingKind::Esc3 => FindingSeverity::High,
            FindingKind::Rbcd | FindingKind::Constrained => FindingSeverity::Medium,
            FindingKind::Protected => FindingSeverity::Informational,
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FindingKind::Esc1 => "ESC1",
            FindingKind::Esc2 => "ESC2",
            FindingKind::Esc3 => "ESC3",
            FindingKind::Esc4 => "ESC4",
            FindingKind::Rbcd => "RBCD",
            FindingKind::Unconstrained => "Unconstrained",
            FindingKind::Constrained => "Constrained",
            FindingKind::Protected => "Protected",
        };
        f.write_str(s)
    }
}

/// A single assessment result. Built once through [`Finding::new`] and
/// read through accessors afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    kind: FindingKind,
    subject: String,
    evidence: Vec<String>,
    risk_text: String,
    severity: FindingSeverity,
}

impl Finding {
    /// Severity defaults to the kind's severity
    pub fn new(kind: FindingKind, subject: impl Into<String>, evidence: Vec<String>, risk_text: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            evidence,
            risk_text: risk_text.into(),
            severity: kind.severity(),
        }
    }

    pub fn with_severity(mut self, severity: FindingSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn kind(&self) -> FindingKind {
        self.kind
    }

    /// Template name or account name the finding is about
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Principals (or targets) backing the finding
    pub fn evidence(&self) -> &[String] {
        &self.evidence
    }

    pub fn risk_text(&self) -> &str {
        &self.risk_text
    }

    pub fn severity(&self) -> FindingSeverity {
        self.severity
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.subject, self.risk_text)
    }
}

/// UserAccountControl bits relevant to delegation
pub mod uac_flags {
    /// Account is disabled
    pub const ACCOUNTDISABLE: u32 = 0x0002;
    /// Account is trusted for delegation (unconstrained)
    pub const TRUSTED_FOR_DELEGATION: u32 = 0x80000;
    /// Account is sensitive and cannot be delegated
    pub const NOT_DELEGATED: u32 = 0x100000;
    /// Constrained delegation with protocol transition (S4U2Self)
    pub const TRUSTED_TO_AUTH_FOR_DELEGATION: u32 = 0x1000000;
}

/// Helper struct for parsing UserAccountControl flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccountControlFlags {
    pub raw_value: u32,
    pub is_disabled: bool,
    pub is_unconstrained_delegation: bool,
    pub is_protocol_transition: bool,
}

impl UserAccountControlFlags {
    pub fn from_value(uac: u32) -> Self {
        Self {
            raw_value: uac,
            is_disabled: (uac & uac_flags::ACCOUNTDISABLE) != 0,
            is_unconstrained_delegation: (uac & uac_flags::TRUSTED_FOR_DELEGATION) != 0,
            is_protocol_transition: (uac & uac_flags::TRUSTED_TO_AUTH_FOR_DELEGATION) != 0,
        }
    }
}
