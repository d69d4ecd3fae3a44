//! LDAP Helper Utilities
//!
//! Extension trait for pulling typed values out of `ldap3::SearchEntry`, plus
//! the attribute names, filters and attribute lists used by the DACL editor and
//! the assessors.

use ldap3::SearchEntry;

use crate::common_types::UserAccountControlFlags;

/// Extension trait for SearchEntry to simplify attribute extraction
pub trait SearchEntryExt {
    /// First value of a string attribute, empty if missing
    fn get_string_attr(&self, name: &str) -> String;

    /// First value of a string attribute, None if missing
    fn get_optional_attr(&self, name: &str) -> Option<String>;

    /// First value parsed as u32, 0 if missing or invalid
    fn get_u32_attr(&self, name: &str) -> u32;

    /// First value parsed as i64, 0 if missing or invalid
    fn get_i64_attr(&self, name: &str) -> i64;

    /// All values of a multi-valued attribute
    fn get_multi_attr(&self, name: &str) -> Vec<String>;

    /// First value of a binary attribute.
    ///
    /// ldap3 files an attribute under `attrs` when every value happens to be
    /// valid UTF-8, so both maps are checked.
    fn get_binary_attr(&self, name: &str) -> Option<Vec<u8>>;

    fn get_sam_account_name(&self) -> String;

    /// userAccountControl parsed into flags
    fn get_uac_flags(&self) -> UserAccountControlFlags;
}

impl SearchEntryExt for SearchEntry {
    fn get_string_attr(&self, name: &str) -> String {
        self.get_optional_attr(name).unwrap_or_default()
    }

    fn get_optional_attr(&self, name: &str) -> Option<String> {
        self.attrs
            .get(name)
            .and_then(|v| v.first())
            .cloned()
    }

    fn get_u32_attr(&self, name: &str) -> u32 {
        self.attrs
            .get(name)
            .and_then(|v| v.first())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    fn get_i64_attr(&self, name: &str) -> i64 {
        self.attrs
            .get(name)
            .and_then(|v| v.first())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    fn get_multi_attr(&self, name: &str) -> Vec<String> {
        self.attrs
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    fn get_binary_attr(&self, name: &str) -> Option<Vec<u8>> {
        self.bin_attrs
            .get(name)
            .and_then(|v| v.first())
            .cloned()
            .or_else(|| {
                self.attrs
                    .get(name)
                    .and_then(|v| v.first())
                    .map(|s| s.as_bytes().to_vec())
            })
    }

    fn get_sam_account_name(&self) -> String {
        self.get_string_attr(attrs::SAM_ACCOUNT_NAME)
    }

    fn get_uac_flags(&self) -> UserAccountControlFlags {
        // userAccountControl is a signed 32-bit integer on the wire
        let uac = self.get_i64_attr(attrs::USER_ACCOUNT_CONTROL) as u32;
        UserAccountControlFlags::from_value(uac)
    }
}

/// LDAP attribute names
pub mod attrs {
    pub const CN: &str = "cn";
    pub const DISPLAY_NAME: &str = "displayName";
    pub const SAM_ACCOUNT_NAME: &str = "sAMAccountName";
    pub const OBJECT_SID: &str = "objectSid";
    pub const USER_ACCOUNT_CONTROL: &str = "userAccountControl";
    pub const DNS_HOST_NAME: &str = "dNSHostName";
    pub const SERVICE_PRINCIPAL_NAME: &str = "servicePrincipalName";
    pub const DESCRIPTION: &str = "description";

    pub const NT_SECURITY_DESCRIPTOR: &str = "nTSecurityDescriptor";
    pub const MS_DS_ALLOWED_TO_DELEGATE_TO: &str = "msDS-AllowedToDelegateTo";
    pub const MS_DS_ALLOWED_TO_ACT_ON_BEHALF: &str = "msDS-AllowedToActOnBehalfOfOtherIdentity";

    // RootDSE
    pub const DEFAULT_NAMING_CONTEXT: &str = "defaultNamingContext";
    pub const CONFIGURATION_NAMING_CONTEXT: &str = "configurationNamingContext";
    pub const ROOT_DOMAIN_NAMING_CONTEXT: &str = "rootDomainNamingContext";

    // Certificate services
    pub const CERTIFICATE_TEMPLATES: &str = "certificateTemplates";
    pub const PKI_CERTIFICATE_NAME_FLAG: &str = "msPKI-Certificate-Name-Flag";
    pub const PKI_ENROLLMENT_FLAG: &str = "msPKI-Enrollment-Flag";
    pub const PKI_RA_SIGNATURE: &str = "msPKI-RA-Signature";
    pub const PKI_EXTENDED_KEY_USAGE: &str = "pKIExtendedKeyUsage";
    pub const PKI_APPLICATION_POLICY: &str = "msPKI-Certificate-Application-Policy";
    pub const PKI_TEMPLATE_SCHEMA_VERSION: &str = "msPKI-Template-Schema-Version";
}

/// LDAP filter patterns
pub mod filters {
    pub const ANY_OBJECT: &str = "(objectClass=*)";

    /// TRUSTED_FOR_DELEGATION, excluding domain controllers (primary group 516)
    pub const UNCONSTRAINED_DELEGATION: &str =
        "(&(userAccountControl:1.2.840.113556.1.4.803:=524288)(!(primaryGroupID=516)))";

    pub const CONSTRAINED_DELEGATION: &str = "(msDS-AllowedToDelegateTo=*)";

    pub const RBCD: &str = "(msDS-AllowedToActOnBehalfOfOtherIdentity=*)";

    /// NOT_DELEGATED ("account is sensitive and cannot be delegated")
    pub const NOT_DELEGATED: &str = "(userAccountControl:1.2.840.113556.1.4.803:=1048576)";

    pub const CERTIFICATE_TEMPLATE: &str = "(objectClass=pKICertificateTemplate)";

    pub const ENROLLMENT_SERVICE: &str = "(objectClass=pKIEnrollmentService)";
}

/// Attribute lists for the queries issued by this crate
pub mod attr_lists {
    pub const SECURITY_DESCRIPTOR: &[&str] = &["nTSecurityDescriptor"];

    pub const PRINCIPAL: &[&str] = &["objectSid", "sAMAccountName"];

    pub const SID_LOOKUP: &[&str] = &["sAMAccountName", "cn"];

    pub const DELEGATION: &[&str] = &[
        "sAMAccountName",
        "dNSHostName",
        "userAccountControl",
        "servicePrincipalName",
        "msDS-AllowedToDelegateTo",
        "msDS-AllowedToActOnBehalfOfOtherIdentity",
        "description",
    ];

    pub const ENROLLMENT_SERVICE: &[&str] = &["cn", "dNSHostName", "certificateTemplates"];

    pub const CERTIFICATE_TEMPLATE: &[&str] = &[
        "cn",
        "displayName",
        "msPKI-Certificate-Name-Flag",
        "msPKI-Enrollment-Flag",
        "msPKI-RA-Signature",
        "pKIExtendedKeyUsage",
        "msPKI-Certificate-Application-Policy",
        "msPKI-Template-Schema-Version",
        "nTSecurityDescriptor",
    ];
}
