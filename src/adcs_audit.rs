//! Certificate Template Assessment (ESC1-ESC4)
//!
//! Cross-references the templates published by each enterprise CA with the
//! template settings and the template object's DACL.
//!
//! | Finding | Condition |
//! |---------|-----------|
//! | ESC1 | Enrollee supplies subject, authentication EKU, no RA signature, low-privileged enrollment |
//! | ESC2 | Any Purpose EKU or no EKU, no RA signature, low-privileged enrollment |
//! | ESC3 | Certificate Request Agent EKU, no RA signature, low-privileged enrollment |
//! | ESC4 | Low-privileged principal holds GenericAll, WriteDACL or WriteOwner on the template |
//!
//! Templates that no CA publishes are not assessed. ESC6 and ESC8 depend on CA
//! configuration that is not stored in the directory and are out of reach here.

use std::collections::HashMap;

use ldap3::{Scope, SearchEntry};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ace::{Ace, AceType};
use crate::common_types::{Finding, FindingKind, FindingSeverity, SeverityCounts};
use crate::directory::DirectoryService;
use crate::errors::DirectoryResult;
use crate::guid::{guid_to_bytes, well_known};
use crate::ldap_helpers::{attr_lists, attrs, filters, SearchEntryExt};
use crate::ldap_utils::sd_flags;
use crate::permissions::filter_low_priv;
use crate::rights::access_mask;
use crate::security_descriptor::dacl_aces;
use crate::sid::Sid;

/// EKU and application policy OIDs
pub mod eku {
    pub const CLIENT_AUTH: &str = "1.3.6.1.5.5.7.3.2";
    pub const SERVER_AUTH: &str = "1.3.6.1.5.5.7.3.1";
    pub const PKINIT_CLIENT: &str = "1.3.6.1.5.2.3.4";
    pub const SMART_CARD_LOGON: &str = "1.3.6.1.4.1.311.20.2.2";
    pub const ANY_PURPOSE: &str = "2.5.29.37.0";
    pub const CERT_REQUEST_AGENT: &str = "1.3.6.1.4.1.311.20.2.1";
}

/// `msPKI-Certificate-Name-Flag` bit letting the requester choose the subject
pub const CT_FLAG_ENROLLEE_SUPPLIES_SUBJECT: u32 = 0x1;

static EKU_NAMES: &[(&str, &str)] = &[
    (eku::CLIENT_AUTH, "Client Authentication"),
    (eku::SERVER_AUTH, "Server Authentication"),
    (eku::PKINIT_CLIENT, "PKINIT Client Auth"),
    (eku::SMART_CARD_LOGON, "Smart Card Logon"),
    (eku::ANY_PURPOSE, "Any Purpose"),
    (eku::CERT_REQUEST_AGENT, "Certificate Request Agent"),
    ("1.3.6.1.5.5.7.3.4", "Secure Email"),
    ("1.3.6.1.5.5.7.3.8", "Time Stamping"),
    ("1.3.6.1.5.5.7.3.9", "OCSP Signing"),
    ("1.3.6.1.4.1.311.10.3.1", "CTL Signing"),
    ("1.3.6.1.4.1.311.10.3.4", "EFS Recovery Agent"),
    ("1.3.6.1.4.1.311.10.3.4.1", "EFS Data Recovery"),
    ("1.3.6.1.4.1.311.10.3.12", "Document Signing"),
    ("1.3.6.1.4.1.311.21.5", "CA Encryption Certificate"),
    ("1.3.6.1.4.1.311.54.1.2", "Remote Desktop Auth"),
];

/// Friendly name of an EKU OID, or the OID itself
pub fn resolve_eku(oid: &str) -> String {
    EKU_NAMES
        .iter()
        .find(|(known, _)| *known == oid)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| oid.to_string())
}

/// Whether a certificate from these EKUs can be used to authenticate.
///
/// No EKU at all means any purpose.
pub fn has_auth_eku(ekus: &[String]) -> bool {
    ekus.is_empty()
        || ekus.iter().any(|oid| {
            matches!(
                oid.as_str(),
                eku::CLIENT_AUTH | eku::PKINIT_CLIENT | eku::SMART_CARD_LOGON | eku::ANY_PURPOSE
            )
        })
}

pub fn has_any_purpose_eku(ekus: &[String]) -> bool {
    ekus.iter().any(|oid| oid == eku::ANY_PURPOSE)
}

pub fn has_cert_request_agent_eku(ekus: &[String]) -> bool {
    ekus.iter().any(|oid| oid == eku::CERT_REQUEST_AGENT)
}

fn collect_sids<F>(sd: &[u8], keep: F) -> Vec<Sid>
where
    F: Fn(&Ace) -> bool,
{
    let aces = match dacl_aces(sd) {
        Ok(aces) => aces,
        Err(e) => {
            debug!("Template descriptor not parsed: {}", e);
            return Vec::new();
        }
    };

    let mut sids: Vec<Sid> = Vec::new();
    for ace in aces {
        if keep(&ace) && !sids.contains(&ace.sid) {
            sids.push(ace.sid);
        }
    }
    sids
}

/// Principals that may enroll: GenericAll, all extended rights, or the
/// Certificate-Enrollment extended right
pub fn parse_enrollment_perms(sd: &[u8]) -> Vec<Sid> {
    let enrollment = guid_to_bytes(well_known::CERTIFICATE_ENROLLMENT);
    collect_sids(sd, |ace| {
        if ace.mask & access_mask::GENERIC_ALL != 0 {
            return true;
        }
        if ace.mask & access_mask::DS_CONTROL_ACCESS == 0 {
            return false;
        }
        match (ace.ace_type, &ace.object_type) {
            (AceType::AccessAllowed, _) | (_, None) => true,
            (AceType::AccessAllowedObject, Some(guid)) => Some(*guid) == enrollment,
        }
    })
}

/// Principals with GenericAll, WriteDACL or WriteOwner on the template
pub fn parse_write_perms(sd: &[u8]) -> Vec<Sid> {
    let write_mask = access_mask::GENERIC_ALL | access_mask::WRITE_DACL | access_mask::WRITE_OWNER;
    collect_sids(sd, |ace| ace.mask & write_mask != 0)
}

/// Enterprise CA (`pKIEnrollmentService` object)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateAuthority {
    pub name: String,
    pub dns_host_name: String,
    /// Names of the templates this CA publishes
    pub templates: Vec<String>,
}

impl CertificateAuthority {
    pub fn from_entry(entry: &SearchEntry) -> Self {
        Self {
            name: entry.get_string_attr(attrs::CN),
            dns_host_name: entry.get_string_attr(attrs::DNS_HOST_NAME),
            templates: entry.get_multi_attr(attrs::CERTIFICATE_TEMPLATES),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateTemplate {
    pub name: String,
    pub display_name: String,
    pub name_flags: u32,
    pub enrollment_flags: u32,
    /// Authorized signatures required before issuance
    pub ra_signatures: u32,
    /// pKIExtendedKeyUsage followed by msPKI-Certificate-Application-Policy
    pub ekus: Vec<String>,
    pub schema_version: u32,
    #[serde(skip)]
    pub security_descriptor: Vec<u8>,
}

impl CertificateTemplate {
    pub fn from_entry(entry: &SearchEntry) -> Self {
        let mut ekus = entry.get_multi_attr(attrs::PKI_EXTENDED_KEY_USAGE);
        for oid in entry.get_multi_attr(attrs::PKI_APPLICATION_POLICY) {
            if !ekus.contains(&oid) {
                ekus.push(oid);
            }
        }

        Self {
            name: entry.get_string_attr(attrs::CN),
            display_name: entry.get_string_attr(attrs::DISPLAY_NAME),
            name_flags: entry.get_i64_attr(attrs::PKI_CERTIFICATE_NAME_FLAG) as u32,
            enrollment_flags: entry.get_i64_attr(attrs::PKI_ENROLLMENT_FLAG) as u32,
            ra_signatures: entry.get_u32_attr(attrs::PKI_RA_SIGNATURE),
            ekus,
            schema_version: entry.get_u32_attr(attrs::PKI_TEMPLATE_SCHEMA_VERSION),
            security_descriptor: entry
                .get_binary_attr(attrs::NT_SECURITY_DESCRIPTOR)
                .unwrap_or_default(),
        }
    }

    pub fn enrollee_supplies_subject(&self) -> bool {
        self.name_flags & CT_FLAG_ENROLLEE_SUPPLIES_SUBJECT != 0
    }

    /// Friendly EKU names
    pub fn eku_names(&self) -> Vec<String> {
        self.ekus.iter().map(|oid| resolve_eku(oid)).collect()
    }
}

/// Template name to the CAs publishing it
pub fn published_templates(cas: &[CertificateAuthority]) -> HashMap<String, Vec<String>> {
    let mut published: HashMap<String, Vec<String>> = HashMap::new();
    for ca in cas {
        for template in &ca.templates {
            published.entry(template.clone()).or_default().push(ca.name.clone());
        }
    }
    published
}

/// ESC1-ESC4 findings for one published template. `cas` are the CAs that
/// publish it; an empty slice yields no findings.
pub fn assess_template(template: &CertificateTemplate, cas: &[String]) -> Vec<Finding> {
    if cas.is_empty() {
        return Vec::new();
    }

    let enrollers = filter_low_priv(parse_enrollment_perms(&template.security_descriptor).iter());
    let writers = filter_low_priv(parse_write_perms(&template.security_descriptor).iter());
    let no_approval = template.ra_signatures == 0;
    let low_priv_enroll = no_approval && !enrollers.is_empty();
    let enroller_list = enrollers.join(", ");

    let mut findings = Vec::new();

    if template.enrollee_supplies_subject() && has_auth_eku(&template.ekus) && low_priv_enroll {
        findings.push(Finding::new(
            FindingKind::Esc1,
            &template.name,
            enrollers.clone(),
            format!("Enrollee supplies subject + auth EKU + low-priv enrollment ({})", enroller_list),
        ));
    }

    if (has_any_purpose_eku(&template.ekus) || template.ekus.is_empty()) && low_priv_enroll {
        findings.push(Finding::new(
            FindingKind::Esc2,
            &template.name,
            enrollers.clone(),
            format!("Any purpose/SubCA EKU + low-priv enrollment ({})", enroller_list),
        ));
    }

    if has_cert_request_agent_eku(&template.ekus) && low_priv_enroll {
        findings.push(Finding::new(
            FindingKind::Esc3,
            &template.name,
            enrollers.clone(),
            format!("Certificate Request Agent + low-priv enrollment ({})", enroller_list),
        ));
    }

    if !writers.is_empty() {
        let risk = format!("Template writable by: {}", writers.join(", "));
        findings.push(Finding::new(FindingKind::Esc4, &template.name, writers, risk));
    }

    findings
}

/// A published template with at least one finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateAssessment {
    pub template: CertificateTemplate,
    /// CAs publishing the template
    pub cas: Vec<String>,
    pub findings: Vec<Finding>,
    pub eku_names: Vec<String>,
}

impl TemplateAssessment {
    pub fn highest_severity(&self) -> Option<FindingSeverity> {
        self.findings.iter().map(Finding::severity).max()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdcsAssessment {
    pub ca_count: usize,
    pub template_count: usize,
    /// Distinct template names published by any CA
    pub published_count: usize,
    pub vulnerable: Vec<TemplateAssessment>,
    pub severity_counts: SeverityCounts,
    pub scan_timestamp: String,
}

impl AdcsAssessment {
    /// Assess every published template against the CA list
    pub fn analyze(cas: &[CertificateAuthority], templates: Vec<CertificateTemplate>) -> Self {
        let published = published_templates(cas);
        let template_count = templates.len();

        let mut vulnerable: Vec<TemplateAssessment> = templates
            .into_iter()
            .filter_map(|template| {
                let publishers = published.get(&template.name)?;
                let findings = assess_template(&template, publishers);
                if findings.is_empty() {
                    return None;
                }
                Some(TemplateAssessment {
                    eku_names: template.eku_names(),
                    cas: publishers.clone(),
                    findings,
                    template,
                })
            })
            .collect();
        // most severe first, directory order otherwise
        vulnerable.sort_by_key(|v| std::cmp::Reverse(v.highest_severity().map(|s| s.level()).unwrap_or(0)));

        let severities: Vec<FindingSeverity> = vulnerable
            .iter()
            .flat_map(|v| v.findings.iter().map(Finding::severity))
            .collect();

        Self {
            ca_count: cas.len(),
            template_count,
            published_count: published.len(),
            severity_counts: SeverityCounts::from_iter(severities.iter()),
            vulnerable,
            scan_timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.vulnerable.iter().flat_map(|v| v.findings.iter())
    }
}

fn public_key_services(config_dn: &str) -> String {
    format!("CN=Public Key Services,CN=Services,{}", config_dn)
}

pub fn enrollment_services_dn(config_dn: &str) -> String {
    format!("CN=Enrollment Services,{}", public_key_services(config_dn))
}

pub fn certificate_templates_dn(config_dn: &str) -> String {
    format!("CN=Certificate Templates,{}", public_key_services(config_dn))
}

pub fn enumerate_certificate_authorities<D>(dir: &mut D, config_dn: &str) -> DirectoryResult<Vec<CertificateAuthority>>
where
    D: DirectoryService + ?Sized,
{
    let base = enrollment_services_dn(config_dn);
    let entries = dir.search(
        &base,
        Scope::Subtree,
        filters::ENROLLMENT_SERVICE,
        attr_lists::ENROLLMENT_SERVICE,
        None,
    )?;
    Ok(entries.iter().map(CertificateAuthority::from_entry).collect())
}

/// Templates with their DACLs.
///
/// The search carries the DACL-only SD_FLAGS control so unprivileged binds
/// still receive the descriptor; a server rejecting it gets a plain retry.
pub fn enumerate_templates<D>(dir: &mut D, config_dn: &str) -> DirectoryResult<Vec<CertificateTemplate>>
where
    D: DirectoryService + ?Sized,
{
    let base = certificate_templates_dn(config_dn);
    let search = |dir: &mut D, flags: Option<u32>| {
        dir.search(
            &base,
            Scope::Subtree,
            filters::CERTIFICATE_TEMPLATE,
            attr_lists::CERTIFICATE_TEMPLATE,
            flags,
        )
    };

    let entries = match search(dir, Some(sd_flags::DACL_SECURITY_INFORMATION)) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("SD_FLAGS template search rejected ({}), retrying without the control", e);
            search(dir, None)?
        }
    };
    Ok(entries.iter().map(CertificateTemplate::from_entry).collect())
}

/// Enumerate CAs and templates under `config_dn` and assess every published template
pub fn enumerate_vulnerable_templates<D>(dir: &mut D, config_dn: &str) -> DirectoryResult<AdcsAssessment>
where
    D: DirectoryService + ?Sized,
{
    let cas = enumerate_certificate_authorities(dir, config_dn)?;
    if cas.is_empty() {
        info!("No enterprise CAs under {}", config_dn);
    }
    let templates = enumerate_templates(dir, config_dn)?;

    let assessment = AdcsAssessment::analyze(&cas, templates);
    info!(
        "ADCS scan: {} CAs, {} templates, {} published, {} vulnerable",
        assessment.ca_count,
        assessment.template_count,
        assessment.published_count,
        assessment.vulnerable.len()
    );
    Ok(assessment)
}
