//! Integration tests for the descriptor toolkit
//!
//! Codec properties run on raw bytes; the DACL editor and the assessors run
//! against an in-memory directory that applies DACL-scoped writes the way a
//! domain controller does.

use std::collections::{HashMap, HashSet};

use ad_dacl::ace::{build_ace, parse_ace, AceStep, AceType};
use ad_dacl::directory::DirectoryService;
use ad_dacl::errors::{DirectoryError, DirectoryResult};
use ad_dacl::ldap_helpers::filters;
use ad_dacl::ldap_utils::{escape_binary_filter, sd_flags};
use ad_dacl::security_descriptor::{add_ace, rebuild_sd};
use ad_dacl::sid::Sid;
use ldap3::{Scope, SearchEntry};

const BASE_DN: &str = "DC=corp,DC=local";
const CONFIG_DN: &str = "CN=Configuration,DC=corp,DC=local";
const VICTIM_DN: &str = "CN=victim,CN=Users,DC=corp,DC=local";
const ATTACKER_SID: &str = "S-1-5-21-1111-2222-3333-1105";
const DOMAIN_ADMINS_SID: &str = "S-1-5-21-1111-2222-3333-512";

fn sid(s: &str) -> Sid {
    s.parse().unwrap()
}

fn standard_ace(principal: &str, mask: u32) -> Vec<u8> {
    build_ace(AceType::AccessAllowed, mask, &sid(principal), None).unwrap()
}

/// Descriptor with the DACL at 20 and the owner SID after it
fn sd_with_owner(owner: &str, aces: &[Vec<u8>]) -> Vec<u8> {
    let mut sd = vec![1, 0, 0x04, 0x80];
    sd.extend_from_slice(&28u32.to_le_bytes());
    sd.extend_from_slice(&[0; 8]);
    sd.extend_from_slice(&20u32.to_le_bytes());
    sd.extend_from_slice(&[2, 0, 8, 0, 0, 0, 0, 0]);
    sd.extend_from_slice(&sid(owner).to_bytes());
    for ace in aces.iter().rev() {
        sd = add_ace(&sd, ace).unwrap();
    }
    sd
}

fn u32_at(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn u16_at(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

#[derive(Clone, Default)]
struct MockObject {
    dn: String,
    attrs: HashMap<String, Vec<String>>,
    bin_attrs: HashMap<String, Vec<Vec<u8>>>,
}

impl MockObject {
    fn new(dn: &str) -> Self {
        Self {
            dn: dn.to_string(),
            ..Default::default()
        }
    }

    fn attr(mut self, name: &str, values: &[&str]) -> Self {
        self.attrs
            .insert(name.to_string(), values.iter().map(|v| v.to_string()).collect());
        self
    }

    fn bin(mut self, name: &str, value: Vec<u8>) -> Self {
        self.bin_attrs.insert(name.to_string(), vec![value]);
        self
    }

    fn entry(&self) -> SearchEntry {
        SearchEntry {
            dn: self.dn.clone(),
            attrs: self.attrs.clone(),
            bin_attrs: self.bin_attrs.clone(),
        }
    }

    fn sd(&self) -> Vec<u8> {
        self.bin_attrs["nTSecurityDescriptor"][0].clone()
    }
}

/// In-memory directory.
///
/// Simple `(attr=value)` filters are evaluated against the stored objects;
/// anything else is answered from `canned`, a filter to DN list.
#[derive(Default)]
struct MockDirectory {
    objects: Vec<MockObject>,
    canned: HashMap<String, Vec<String>>,
    failing_filters: HashSet<String>,
    reject_sd_flags: bool,
    searches: Vec<(String, String, Option<u32>)>,
    writes: Vec<(String, Option<u32>)>,
}

impl MockDirectory {
    fn with_root_dse() -> Self {
        let mut dir = Self::default();
        dir.objects.push(
            MockObject::new("")
                .attr("defaultNamingContext", &[BASE_DN])
                .attr("configurationNamingContext", &[CONFIG_DN]),
        );
        dir
    }

    fn add(&mut self, object: MockObject) {
        self.objects.push(object);
    }

    fn get(&self, dn: &str) -> &MockObject {
        self.objects
            .iter()
            .find(|o| o.dn.eq_ignore_ascii_case(dn))
            .unwrap()
    }

    fn get_mut(&mut self, dn: &str) -> Option<&mut MockObject> {
        self.objects.iter_mut().find(|o| o.dn.eq_ignore_ascii_case(dn))
    }

    fn stored_sd(&self, dn: &str) -> Vec<u8> {
        self.get(dn).sd()
    }

    fn under(base: &str, dn: &str) -> bool {
        dn.to_ascii_lowercase().ends_with(&base.to_ascii_lowercase())
    }

    fn matches_simple(object: &MockObject, filter: &str) -> Option<bool> {
        let inner = filter.strip_prefix('(')?.strip_suffix(')')?;
        if inner.contains(['&', '|', '!', ':', '*', '(']) {
            return None;
        }
        let (attr, value) = inner.split_once('=')?;
        if attr == "objectSid" {
            let found = object
                .bin_attrs
                .get(attr)
                .and_then(|v| v.first())
                .map(|sid| escape_binary_filter(sid) == value)
                .unwrap_or(false);
            return Some(found);
        }
        Some(
            object
                .attrs
                .get(attr)
                .map(|values| values.iter().any(|v| v.eq_ignore_ascii_case(value)))
                .unwrap_or(false),
        )
    }
}

impl DirectoryService for MockDirectory {
    fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        _attrs: &[&str],
        control: Option<u32>,
    ) -> DirectoryResult<Vec<SearchEntry>> {
        self.searches.push((base.to_string(), filter.to_string(), control));
        if control.is_some() && self.reject_sd_flags {
            return Err(DirectoryError::QueryError("unavailableCriticalExtension".to_string()));
        }
        if self.failing_filters.contains(filter) {
            return Err(DirectoryError::PermissionDenied("insufficientAccessRights".to_string()));
        }

        if matches!(scope, Scope::Base) {
            return Ok(self
                .objects
                .iter()
                .filter(|o| o.dn.eq_ignore_ascii_case(base))
                .map(MockObject::entry)
                .collect());
        }

        if let Some(dns) = self.canned.get(filter) {
            return Ok(dns
                .iter()
                .filter(|dn| Self::under(base, dn))
                .map(|dn| self.get(dn).entry())
                .collect());
        }

        Ok(self
            .objects
            .iter()
            .filter(|o| !o.dn.is_empty() && Self::under(base, &o.dn))
            .filter(|o| Self::matches_simple(o, filter).unwrap_or(false))
            .map(MockObject::entry)
            .collect())
    }

    fn replace_binary(&mut self, dn: &str, attr: &str, value: Vec<u8>, control: Option<u32>) -> DirectoryResult<()> {
        if control.is_some() && self.reject_sd_flags {
            return Err(DirectoryError::QueryError("unavailableCriticalExtension".to_string()));
        }
        self.writes.push((dn.to_string(), control));

        let object = self
            .get_mut(dn)
            .ok_or_else(|| DirectoryError::NotFound(dn.to_string()))?;
        let stored = object
            .bin_attrs
            .get(attr)
            .and_then(|v| v.first())
            .cloned()
            .unwrap_or_default();

        let updated = match control {
            // only the DACL of the submitted descriptor is applied
            Some(flags) if flags == sd_flags::DACL_SECURITY_INFORMATION => {
                let off = u32_at(&value, 16) as usize;
                let size = u16_at(&value, off + 2) as usize;
                let count = u16_at(&value, off + 4) as usize;
                rebuild_sd(&stored, &value[off + 8..off + size], count)?
            }
            _ => value,
        };
        object.bin_attrs.insert(attr.to_string(), vec![updated]);
        Ok(())
    }
}

fn corp_directory() -> MockDirectory {
    let mut dir = MockDirectory::with_root_dse();
    dir.add(
        MockObject::new(BASE_DN)
            .bin("nTSecurityDescriptor", sd_with_owner(DOMAIN_ADMINS_SID, &[standard_ace("S-1-5-18", 0x10000000)])),
    );
    dir.add(
        MockObject::new(VICTIM_DN)
            .attr("sAMAccountName", &["victim"])
            .attr("cn", &["victim"])
            .bin("objectSid", sid("S-1-5-21-1111-2222-3333-1104").to_bytes())
            .bin(
                "nTSecurityDescriptor",
                sd_with_owner(
                    DOMAIN_ADMINS_SID,
                    &[
                        standard_ace("S-1-5-18", 0x10000000),
                        standard_ace(DOMAIN_ADMINS_SID, 0x000F01FF),
                        standard_ace("S-1-5-11", 0x00020094),
                    ],
                ),
            ),
    );
    dir.add(
        MockObject::new("CN=attacker,CN=Users,DC=corp,DC=local")
            .attr("sAMAccountName", &["attacker"])
            .attr("cn", &["attacker"])
            .bin("objectSid", sid(ATTACKER_SID).to_bytes()),
    );
    dir
}

#[cfg(test)]
mod codec_tests {
    use super::*;
    use ad_dacl::ace_matcher::{remove_matching_aces, AceTarget, MatchStrategy};
    use ad_dacl::guid::{guid_name, guid_to_bytes};
    use ad_dacl::permissions::describe_permissions;
    use ad_dacl::security_descriptor::{parse_acl, parse_sd};

    #[test]
    fn test_sid_round_trip() {
        for s in ["S-1-1-0", "S-1-5-18", "S-1-5-32-544", "S-1-5-21-1004336348-1177238915-682003330-512"] {
            let bytes = sid(s).to_bytes();
            let parsed = Sid::from_bytes(&bytes).unwrap();
            assert_eq!(parsed.to_string().parse::<Sid>().unwrap().to_bytes(), bytes);
        }
    }

    #[test]
    fn test_guid_names() {
        let cases = [
            ("1131f6aa-9c07-11d1-f79f-00c04fc2dcd2", "DS-Replication-Get-Changes"),
            ("1131f6ad-9c07-11d1-f79f-00c04fc2dcd2", "DS-Replication-Get-Changes-All"),
            ("00299570-246d-11d0-a768-00aa006e0529", "User-Force-Change-Password"),
            ("bf9679c0-0de6-11d0-a285-00aa003049e2", "member"),
        ];
        for (guid, name) in cases {
            assert_eq!(guid_name(&guid_to_bytes(guid).unwrap()), name);
        }
    }

    #[test]
    fn test_standard_ace_symmetry() {
        let principal = sid("S-1-5-21-1-2-3-1001");
        let ace = build_ace(AceType::AccessAllowed, 0x10000000, &principal, None).unwrap();
        assert_eq!(ace[0], 0x00);
        assert_eq!(u16_at(&ace, 2) as usize, 8 + principal.byte_len());
        assert_eq!(u32_at(&ace, 4), 0x10000000);
        assert_eq!(&ace[8..], principal.to_bytes().as_slice());

        match parse_ace(&ace, 0) {
            AceStep::Parsed(parsed, next) => {
                assert_eq!(next, ace.len());
                assert_eq!(parsed.sid, principal);
                assert_eq!(parsed.mask, 0x10000000);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_object_ace_symmetry() {
        let principal = sid("S-1-5-21-1-2-3-1001");
        let dcsync = guid_to_bytes("1131f6aa-9c07-11d1-f79f-00c04fc2dcd2").unwrap();
        let ace = build_ace(AceType::AccessAllowedObject, 0x100, &principal, Some(&dcsync)).unwrap();

        assert_eq!(ace[0], 0x05);
        assert_eq!(u16_at(&ace, 2) as usize, 28 + principal.byte_len());
        assert_eq!(u32_at(&ace, 8), 0x01);
        let mut guid = [0u8; 16];
        guid.copy_from_slice(&ace[12..28]);
        assert_eq!(guid_name(&guid), "DS-Replication-Get-Changes");
        assert_eq!(Sid::from_bytes(&ace[28..]).unwrap(), principal);
    }

    #[test]
    fn test_exact_match_removal() {
        let a = standard_ace("S-1-5-21-1-2-3-1001", 0x10000000);
        let b = standard_ace("S-1-5-21-1-2-3-1002", 0x00020000);
        let body = [a, b.clone()].concat();

        let removal = remove_matching_aces(&body, 2, &AceTarget::standard(sid("S-1-5-21-1-2-3-1001"), 0x10000000));
        assert_eq!(removal.count, 1);
        assert_eq!(removal.aces, b);
        assert_eq!(removal.matched_by, Some(MatchStrategy::Exact));
    }

    #[test]
    fn test_no_match_removal_is_noop() {
        let body = [
            standard_ace("S-1-5-21-1-2-3-1001", 0x10000000),
            standard_ace("S-1-5-21-1-2-3-1002", 0x00020000),
        ]
        .concat();
        let removal = remove_matching_aces(&body, 2, &AceTarget::standard(sid("S-1-5-21-1-2-3-9999"), 0x10000000));
        assert_eq!(removal.count, 2);
        assert_eq!(removal.aces, body);
        assert_eq!(removal.matched_by, None);
    }

    #[test]
    fn test_relaxed_match_removal() {
        let a = standard_ace("S-1-5-21-1-2-3-1001", 0x000F01FF);
        let b = standard_ace("S-1-5-21-1-2-3-1002", 0x000F01FF);
        let body = [a, b.clone()].concat();

        let removal = remove_matching_aces(&body, 2, &AceTarget::standard(sid("S-1-5-21-1-2-3-1001"), 0x10000000));
        assert_eq!(removal.count, 1);
        assert_eq!(removal.aces, b);
        assert_eq!(removal.matched_by, Some(MatchStrategy::RelaxedBySid));
    }

    #[test]
    fn test_rebuild_preserves_other_sections() {
        let owner = sid("S-1-5-32-544").to_bytes();
        let group = sid("S-1-5-18").to_bytes();
        let sacl = [2u8, 0, 8, 0, 0, 0, 0, 0];
        let dacl_ace = standard_ace("S-1-1-0", 0x00020094);

        // header | SACL | DACL | owner | group
        let dacl_off = 20 + sacl.len();
        let dacl_size = 8 + dacl_ace.len();
        let owner_off = dacl_off + dacl_size;
        let group_off = owner_off + owner.len();

        let mut sd = vec![1, 0, 0x14, 0x80];
        sd.extend_from_slice(&(owner_off as u32).to_le_bytes());
        sd.extend_from_slice(&(group_off as u32).to_le_bytes());
        sd.extend_from_slice(&20u32.to_le_bytes());
        sd.extend_from_slice(&(dacl_off as u32).to_le_bytes());
        sd.extend_from_slice(&sacl);
        sd.extend_from_slice(&[2, 0, dacl_size as u8, 0, 1, 0, 0, 0]);
        sd.extend_from_slice(&dacl_ace);
        sd.extend_from_slice(&owner);
        sd.extend_from_slice(&group);

        for body in [
            [dacl_ace.clone(), standard_ace("S-1-5-21-1-2-3-1001", 0x10000000)].concat(),
            Vec::new(),
        ] {
            let count = if body.is_empty() { 0 } else { 2 };
            let rebuilt = rebuild_sd(&sd, &body, count).unwrap();
            let delta = body.len() as i64 - dacl_ace.len() as i64;

            assert_eq!(u32_at(&rebuilt, 12), 20, "SACL before the DACL stays put");
            assert_eq!(u32_at(&rebuilt, 16) as usize, dacl_off);
            let new_owner = u32_at(&rebuilt, 4) as usize;
            let new_group = u32_at(&rebuilt, 8) as usize;
            assert_eq!(new_owner as i64, owner_off as i64 + delta);
            assert_eq!(new_group as i64, group_off as i64 + delta);
            assert_eq!(&rebuilt[20..28], &sacl);
            assert_eq!(&rebuilt[new_owner..new_owner + owner.len()], owner.as_slice());
            assert_eq!(&rebuilt[new_group..], group.as_slice());
            assert_eq!(parse_acl(&rebuilt, dacl_off).unwrap().len(), count);
        }
    }

    #[test]
    fn test_end_to_end_generic_all() {
        let principal = "S-1-5-21-1-2-3-1001";
        let ace = standard_ace(principal, 0x10000000);
        let mut sd = vec![1, 0, 0x04, 0x80];
        sd.extend_from_slice(&[0; 12]);
        sd.extend_from_slice(&20u32.to_le_bytes());
        sd.extend_from_slice(&[2, 0, (8 + ace.len()) as u8, 0, 1, 0, 0, 0]);
        sd.extend_from_slice(&ace);

        let header = parse_sd(&sd).unwrap();
        assert_eq!(header.dacl_offset, 20);
        let aces = parse_acl(&sd, header.dacl_offset as usize).unwrap();
        assert_eq!(aces.len(), 1);
        assert_eq!(aces[0].sid_string(), principal);
        assert!(describe_permissions(aces[0].mask, aces[0].ace_type, aces[0].object_type.as_ref()).contains("GenericAll"));
    }
}

#[cfg(test)]
mod acl_edit_tests {
    use super::*;
    use ad_dacl::acl_edit::{
        add_right, backup, execute, grant_dcsync, grant_write_dacl, read_dacl, remove_right, restore, AclAction,
        AclOutcome, AclRequest, ModifyMode,
    };
    use ad_dacl::ace_matcher::MatchStrategy;
    use ad_dacl::errors::SdError;
    use ad_dacl::permissions::RiskCategory;
    use ad_dacl::security_descriptor::{dacl_aces, owner_sid};

    #[test]
    fn test_read_dacl_report() {
        let mut dir = corp_directory();
        let report = read_dacl(&mut dir, BASE_DN, "victim").unwrap();

        assert_eq!(report.target, VICTIM_DN);
        assert_eq!(report.owner, "Domain Admins");
        assert_eq!(report.ace_count, 3);
        assert_eq!(report.aces[0].principal, "SYSTEM");
        assert_eq!(report.aces[0].permissions, "GenericAll (FULL CONTROL)");
        assert_eq!(report.aces[0].risk, RiskCategory::Standard);
        assert_eq!(report.aces[1].principal, "Domain Admins");
        assert_eq!(report.aces[2].principal, "Authenticated Users");
        assert_eq!(report.aces[2].ace_type, "ACCESS_ALLOWED");
        assert_eq!(report.dangerous().count(), 0);
        // first read is DACL-scoped
        assert!(dir
            .searches
            .iter()
            .any(|(base, _, flags)| base == VICTIM_DN && *flags == Some(sd_flags::DACL_SECURITY_INFORMATION)));
    }

    #[test]
    fn test_add_then_remove_round_trip() {
        let mut dir = corp_directory();
        let original = dir.stored_sd(VICTIM_DN);

        let change = add_right(&mut dir, BASE_DN, "victim", "attacker", "genericall").unwrap();
        assert_eq!(change.mode, ModifyMode::Add);
        assert_eq!(change.principal_sid, ATTACKER_SID);
        assert_eq!(dir.writes.last().unwrap().1, Some(sd_flags::DACL_SECURITY_INFORMATION));

        let stored = dir.stored_sd(VICTIM_DN);
        let aces = dacl_aces(&stored).unwrap();
        assert_eq!(aces.len(), 4);
        assert_eq!(aces[0].sid_string(), ATTACKER_SID);
        assert_eq!(aces[0].mask, 0x10000000);
        assert_eq!(owner_sid(&stored).unwrap().to_string(), DOMAIN_ADMINS_SID);

        let report = read_dacl(&mut dir, BASE_DN, VICTIM_DN).unwrap();
        assert_eq!(report.aces[0].principal, "attacker");
        assert_eq!(report.aces[0].risk, RiskCategory::Notable);

        let change = remove_right(&mut dir, BASE_DN, VICTIM_DN, ATTACKER_SID, "genericall").unwrap();
        assert_eq!(change.matched_by, Some(MatchStrategy::Exact));
        assert_eq!(dir.stored_sd(VICTIM_DN), original);
    }

    #[test]
    fn test_remove_decomposed_grant() {
        let mut dir = corp_directory();
        // the server stored a GenericAll grant in its decomposed form
        let sd = add_ace(&dir.stored_sd(VICTIM_DN), &standard_ace(ATTACKER_SID, 0x000F01FF)).unwrap();
        dir.get_mut(VICTIM_DN)
            .unwrap()
            .bin_attrs
            .insert("nTSecurityDescriptor".to_string(), vec![sd]);

        let change = remove_right(&mut dir, BASE_DN, "victim", "attacker", "GenericAll").unwrap();
        assert_eq!(change.matched_by, Some(MatchStrategy::RelaxedBySid));

        let aces = dacl_aces(&dir.stored_sd(VICTIM_DN)).unwrap();
        assert_eq!(aces.len(), 3);
        assert!(aces.iter().all(|ace| ace.sid_string() != ATTACKER_SID));
        // Domain Admins holds the same decomposed mask and must survive
        assert!(aces.iter().any(|ace| ace.sid_string() == DOMAIN_ADMINS_SID));
    }

    #[test]
    fn test_remove_without_match_fails() {
        let mut dir = corp_directory();
        let err = remove_right(&mut dir, BASE_DN, "victim", "attacker", "writedacl").unwrap_err();
        assert_eq!(
            err.downcast_ref::<SdError>(),
            Some(&SdError::NoMatchingAce {
                sid: ATTACKER_SID.to_string(),
                mask: 0x00040000,
            })
        );
        assert!(dir.writes.is_empty());
    }

    #[test]
    fn test_add_without_dacl_reports_target_and_principal() {
        let mut dir = corp_directory();
        // owner, group, SACL and DACL offsets all zero
        let mut bare = vec![1, 0, 0x00, 0x80];
        bare.extend_from_slice(&[0; 16]);
        dir.get_mut(VICTIM_DN)
            .unwrap()
            .bin_attrs
            .insert("nTSecurityDescriptor".to_string(), vec![bare.clone()]);

        let err = add_right(&mut dir, BASE_DN, "victim", "attacker", "genericall").unwrap_err();
        assert!(matches!(err.downcast_ref::<SdError>(), Some(SdError::NoDacl { .. })));

        let message = format!("{:#}", err);
        assert!(message.contains("adding genericall (0x10000000)"), "{}", message);
        assert!(message.contains(ATTACKER_SID), "{}", message);
        assert!(message.contains(VICTIM_DN), "{}", message);
        assert!(dir.writes.is_empty());
        assert_eq!(dir.stored_sd(VICTIM_DN), bare);
    }

    #[test]
    fn test_unknown_right_fails_before_any_lookup() {
        let mut dir = corp_directory();
        let err = add_right(&mut dir, BASE_DN, "victim", "attacker", "takeover").unwrap_err();
        assert!(matches!(err.downcast_ref::<SdError>(), Some(SdError::UnknownRight { .. })));
        assert!(dir.searches.is_empty());
    }

    #[test]
    fn test_unscoped_fallback_writes_full_descriptor() {
        let mut dir = corp_directory();
        dir.reject_sd_flags = true;

        grant_write_dacl(&mut dir, BASE_DN, "victim", "attacker").unwrap();
        assert_eq!(dir.writes, vec![(VICTIM_DN.to_string(), None)]);

        let stored = dir.stored_sd(VICTIM_DN);
        let aces = dacl_aces(&stored).unwrap();
        assert_eq!(aces[0].mask, 0x00040000);
        assert_eq!(owner_sid(&stored).unwrap().to_string(), DOMAIN_ADMINS_SID);
    }

    #[test]
    fn test_grant_dcsync_on_domain_root() {
        let mut dir = corp_directory();
        let changes = grant_dcsync(&mut dir, BASE_DN, "attacker").unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.target == BASE_DN));

        let aces = dacl_aces(&dir.stored_sd(BASE_DN)).unwrap();
        let names: Vec<String> = aces.iter().filter_map(|ace| ace.object_type_name()).collect();
        assert_eq!(names, vec!["DS-Replication-Get-Changes-All", "DS-Replication-Get-Changes"]);
        assert!(aces
            .iter()
            .filter(|ace| ace.ace_type == AceType::AccessAllowedObject)
            .all(|ace| ace.mask == 0x100 && ace.sid_string() == ATTACKER_SID));
    }

    #[test]
    fn test_backup_and_restore() {
        let mut dir = corp_directory();
        let saved = backup(&mut dir, BASE_DN, "victim").unwrap();
        assert_eq!(saved.target, VICTIM_DN);
        assert_eq!(saved.decode().unwrap(), dir.stored_sd(VICTIM_DN));

        add_right(&mut dir, BASE_DN, "victim", "attacker", "genericall").unwrap();
        assert_ne!(saved.decode().unwrap(), dir.stored_sd(VICTIM_DN));

        let summary = restore(&mut dir, BASE_DN, "victim", &saved.backup).unwrap();
        assert_eq!(summary.bytes, saved.decode().unwrap().len());
        assert_eq!(dir.stored_sd(VICTIM_DN), saved.decode().unwrap());
    }

    #[test]
    fn test_restore_rejects_short_backup() {
        let mut dir = corp_directory();
        let err = restore(&mut dir, BASE_DN, "victim", "AQAE").unwrap_err();
        assert_eq!(err.downcast_ref::<SdError>(), Some(&SdError::TooShort { len: 3 }));
        assert!(dir.writes.is_empty());
    }

    #[test]
    fn test_execute_dispatch() {
        let mut dir = corp_directory();
        let request = AclRequest::new("grant-genericall".parse::<AclAction>().unwrap(), "victim").with_principal("attacker");
        match execute(&mut dir, BASE_DN, &request).unwrap() {
            AclOutcome::Modified { changes } => assert_eq!(changes[0].right, "genericall"),
            other => panic!("unexpected {:?}", other),
        }

        let request = AclRequest::new(AclAction::Read, "victim");
        let outcome = execute(&mut dir, BASE_DN, &request).unwrap();
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["mode"], "read");
        assert_eq!(json["ace_count"], 4);

        let missing = AclRequest::new(AclAction::Add, "victim").with_principal("attacker");
        assert!(execute(&mut dir, BASE_DN, &missing).is_err());
    }
}

#[cfg(test)]
mod adcs_tests {
    use super::*;
    use ad_dacl::adcs_audit::{certificate_templates_dn, enrollment_services_dn, enumerate_vulnerable_templates};
    use ad_dacl::common_types::FindingKind;
    use ad_dacl::directory::detect_naming_contexts;
    use ad_dacl::guid::{guid_to_bytes, well_known};

    const DOMAIN_USERS_SID: &str = "S-1-5-21-1111-2222-3333-513";

    fn enroll_ace(principal: &str) -> Vec<u8> {
        let guid = guid_to_bytes(well_known::CERTIFICATE_ENROLLMENT).unwrap();
        build_ace(AceType::AccessAllowedObject, 0x100, &sid(principal), Some(&guid)).unwrap()
    }

    fn template(name: &str, name_flag: &str, ekus: &[&str], sd: Vec<u8>) -> MockObject {
        MockObject::new(&format!("CN={},{}", name, certificate_templates_dn(CONFIG_DN)))
            .attr("cn", &[name])
            .attr("displayName", &[name])
            .attr("msPKI-Certificate-Name-Flag", &[name_flag])
            .attr("msPKI-RA-Signature", &["0"])
            .attr("pKIExtendedKeyUsage", ekus)
            .bin("nTSecurityDescriptor", sd)
    }

    fn pki_directory() -> MockDirectory {
        let mut dir = MockDirectory::with_root_dse();
        let ca_dn = format!("CN=corp-CA,{}", enrollment_services_dn(CONFIG_DN));
        dir.add(
            MockObject::new(&ca_dn)
                .attr("cn", &["corp-CA"])
                .attr("dNSHostName", &["ca01.corp.local"])
                .attr("certificateTemplates", &["ESC1User", "SafeUser", "Agent"]),
        );

        let templates = vec![
            template(
                "ESC1User",
                "1",
                &["1.3.6.1.5.5.7.3.2"],
                sd_with_owner(DOMAIN_ADMINS_SID, &[enroll_ace(DOMAIN_USERS_SID)]),
            ),
            template(
                "SafeUser",
                "0",
                &["1.3.6.1.5.5.7.3.2"],
                sd_with_owner(DOMAIN_ADMINS_SID, &[enroll_ace(DOMAIN_USERS_SID)]),
            ),
            template(
                "Agent",
                "0",
                &["1.3.6.1.4.1.311.20.2.1"],
                sd_with_owner(
                    DOMAIN_ADMINS_SID,
                    &[enroll_ace("S-1-5-11"), standard_ace("S-1-5-11", 0x00080000)],
                ),
            ),
            template(
                "Unpublished",
                "1",
                &[],
                sd_with_owner(DOMAIN_ADMINS_SID, &[standard_ace("S-1-1-0", 0x10000000)]),
            ),
        ];

        dir.canned.insert(filters::ENROLLMENT_SERVICE.to_string(), vec![ca_dn]);
        dir.canned.insert(
            filters::CERTIFICATE_TEMPLATE.to_string(),
            templates.iter().map(|t| t.dn.clone()).collect(),
        );
        for t in templates {
            dir.add(t);
        }
        dir
    }

    #[test]
    fn test_enumerate_vulnerable_templates() {
        let mut dir = pki_directory();
        let contexts = detect_naming_contexts(&mut dir).unwrap();
        assert_eq!(contexts.configuration_naming_context, CONFIG_DN);

        let assessment = enumerate_vulnerable_templates(&mut dir, &contexts.configuration_naming_context).unwrap();
        assert_eq!(assessment.ca_count, 1);
        assert_eq!(assessment.template_count, 4);
        assert_eq!(assessment.published_count, 3);

        let names: Vec<&str> = assessment.vulnerable.iter().map(|v| v.template.name.as_str()).collect();
        assert_eq!(names, vec!["ESC1User", "Agent"]);

        let esc1 = &assessment.vulnerable[0];
        assert_eq!(esc1.cas, vec!["corp-CA"]);
        assert_eq!(esc1.eku_names, vec!["Client Authentication"]);
        assert_eq!(esc1.findings.len(), 1);
        assert_eq!(esc1.findings[0].kind(), FindingKind::Esc1);
        assert_eq!(esc1.findings[0].evidence(), &["Domain Users".to_string()]);

        let kinds: Vec<FindingKind> = assessment.vulnerable[1].findings.iter().map(|f| f.kind()).collect();
        assert_eq!(kinds, vec![FindingKind::Esc3, FindingKind::Esc4]);
        assert_eq!(assessment.severity_counts.critical, 2);
        assert_eq!(assessment.severity_counts.high, 1);

        // templates are fetched with the DACL-scoped control
        assert!(dir
            .searches
            .iter()
            .any(|(_, filter, flags)| filter == filters::CERTIFICATE_TEMPLATE
                && *flags == Some(sd_flags::DACL_SECURITY_INFORMATION)));
    }

    #[test]
    fn test_template_search_falls_back_without_control() {
        let mut dir = pki_directory();
        dir.reject_sd_flags = true;
        let assessment = enumerate_vulnerable_templates(&mut dir, CONFIG_DN).unwrap();
        assert_eq!(assessment.vulnerable.len(), 2);
    }
}

#[cfg(test)]
mod delegation_tests {
    use super::*;
    use ad_dacl::common_types::{FindingKind, FindingSeverity};
    use ad_dacl::delegation_audit::enumerate_delegation;

    fn delegation_directory() -> MockDirectory {
        let mut dir = corp_directory();

        let web = MockObject::new("CN=WEB01,CN=Computers,DC=corp,DC=local")
            .attr("sAMAccountName", &["WEB01$"])
            .attr("dNSHostName", &["web01.corp.local"])
            .attr("userAccountControl", &["528384"])
            .attr("servicePrincipalName", &["HTTP/web01.corp.local", "HOST/WEB01"]);
        let sql = MockObject::new("CN=svc_sql,CN=Users,DC=corp,DC=local")
            .attr("sAMAccountName", &["svc_sql"])
            .attr("userAccountControl", &["16843264"])
            .attr("msDS-AllowedToDelegateTo", &["MSSQLSvc/db01.corp.local:1433"]);
        let fs = MockObject::new("CN=FS01,CN=Computers,DC=corp,DC=local")
            .attr("sAMAccountName", &["FS01$"])
            .attr("userAccountControl", &["4096"])
            .bin(
                "msDS-AllowedToActOnBehalfOfOtherIdentity",
                sd_with_owner("S-1-5-32-544", &[standard_ace(ATTACKER_SID, 0x000F01FF)]),
            );

        dir.canned.insert(filters::UNCONSTRAINED_DELEGATION.to_string(), vec![web.dn.clone()]);
        dir.canned.insert(filters::CONSTRAINED_DELEGATION.to_string(), vec![sql.dn.clone()]);
        dir.canned.insert(filters::RBCD.to_string(), vec![fs.dn.clone()]);
        dir.failing_filters.insert(filters::NOT_DELEGATED.to_string());
        dir.add(web);
        dir.add(sql);
        dir.add(fs);
        dir
    }

    #[test]
    fn test_enumerate_delegation() {
        let mut dir = delegation_directory();
        let audit = enumerate_delegation(&mut dir, BASE_DN).unwrap();

        assert_eq!(audit.unconstrained_count, 1);
        assert_eq!(audit.constrained_count, 1);
        assert_eq!(audit.protocol_transition_count, 1);
        assert_eq!(audit.rbcd_count, 1);
        // protected query failed and was skipped
        assert_eq!(audit.protected_count, 0);

        let unconstrained: Vec<_> = audit.findings_of(FindingKind::Unconstrained).collect();
        assert_eq!(unconstrained[0].subject(), "WEB01$");
        assert_eq!(unconstrained[0].evidence().len(), 2);

        let constrained: Vec<_> = audit.findings_of(FindingKind::Constrained).collect();
        assert_eq!(constrained[0].severity(), FindingSeverity::Critical);
        assert_eq!(constrained[0].evidence(), &["MSSQLSvc/db01.corp.local:1433".to_string()]);

        let rbcd: Vec<_> = audit.findings_of(FindingKind::Rbcd).collect();
        assert_eq!(rbcd[0].subject(), "FS01$");
        assert_eq!(
            rbcd[0].evidence(),
            &[format!("attacker ({}) mask 0xF01FF", ATTACKER_SID)]
        );
    }

    #[test]
    fn test_unconstrained_query_failure_propagates() {
        let mut dir = delegation_directory();
        dir.failing_filters.insert(filters::UNCONSTRAINED_DELEGATION.to_string());
        assert!(matches!(
            enumerate_delegation(&mut dir, BASE_DN),
            Err(DirectoryError::PermissionDenied(_))
        ));
    }
}
