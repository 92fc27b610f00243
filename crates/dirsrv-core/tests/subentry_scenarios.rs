//! End-to-end behavior of administrative points and subentries.

mod common;

use std::sync::Arc;

use common::{dn, Fixture};
use dirsrv_core::admin::{AreaKind, RoleFamily};
use dirsrv_core::backend::{Partition, SearchScope};
use dirsrv_core::error::ResultCode;
use dirsrv_core::{Attribute, DiagnosticEvent, DirError, DirectoryService, Entry, Modification, RequestControls};

const TEST: &str = "cn=test,ou=system";
const CONFIGURATION: &str = "ou=configuration,ou=system";
const SERVICES: &str = "ou=services,ou=configuration,ou=system";
const INTERCEPTORS: &str = "ou=interceptors,ou=configuration,ou=system";
const PARTITIONS: &str = "ou=partitions,ou=configuration,ou=system";

/// Autonomous area at `ou=system`, an extra leaf under `ou=services` and
/// the subentry of scenario A.
fn scenario_a() -> Fixture {
    let f = Fixture::with_system_roles(&["autonomousArea"]);
    f.add_person("cn=worker,ou=services,ou=configuration,ou=system").unwrap();
    f.add_subentry(TEST, "{ base \"ou=configuration\" }").unwrap();
    f
}

#[test]
fn test_scenario_a_subentry_add_marks_its_area() {
    let f = scenario_a();
    for rel in [
        CONFIGURATION,
        INTERCEPTORS,
        PARTITIONS,
        SERVICES,
        "cn=worker,ou=services,ou=configuration,ou=system",
    ] {
        assert!(f.selected_by(rel, TEST), "{} should be selected", rel);
    }
    for rel in ["ou=system", "ou=users,ou=system", "ou=groups,ou=system"] {
        assert!(f.untouched_by(rel, TEST), "{} should not be selected", rel);
    }
    f.assert_consistent();

    let registered = f.service.registered_subentries().unwrap();
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].roles.len(), 4);

    let ap = f
        .service
        .administrative_point(RoleFamily::AccessControl, &dn("ou=system"))
        .unwrap()
        .unwrap();
    assert_eq!(ap.kind, AreaKind::Autonomous);
    assert!(ap.seq_number > 0);
    assert!(ap.subentries.iter().any(|s| s.norm_name() == f.norm(TEST)));

    // Candidates carry the governing AP's sequence number.
    let seq = f.entry(CONFIGURATION);
    let value = seq
        .get(RoleFamily::AccessControl.seq_number_attribute())
        .and_then(Attribute::first)
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap();
    assert_eq!(value, ap.seq_number.to_string());
}

#[test]
fn test_scenario_b_exclusion_removes_references() {
    let f = scenario_a();
    f.set_spec(
        TEST,
        "{ base \"ou=configuration\", specificExclusions { chopBefore:\"ou=services\" } }",
    )
    .unwrap();

    assert!(f.untouched_by(SERVICES, TEST));
    assert!(f.untouched_by("cn=worker,ou=services,ou=configuration,ou=system", TEST));
    assert!(f.selected_by(INTERCEPTORS, TEST));
    assert!(f.selected_by(PARTITIONS, TEST));
    assert!(f.selected_by(CONFIGURATION, TEST));
    f.assert_consistent();

    let registered = f.service.registered_subentries().unwrap();
    assert_eq!(registered[0].spec.chop_before.len(), 1);
}

#[test]
fn test_scenario_c_rename_substitutes_references() {
    let f = scenario_a();
    let before: Vec<_> = f
        .candidates()
        .into_iter()
        .filter(|e| {
            e.get(RoleFamily::CollectiveAttribute.subentries_attribute())
                .is_some_and(|a| a.contains_norm(&f.norm(TEST)))
        })
        .map(|e| e.dn().clone())
        .collect();
    assert_eq!(before.len(), 5);

    f.service
        .rename(&f.admin, &dn(TEST), "cn=renamed", true)
        .unwrap();

    let renamed = "cn=renamed,ou=system";
    for name in &before {
        let e = f
            .service
            .lookup(&f.admin, name.up_name())
            .unwrap()
            .unwrap();
        let refs = e.get(RoleFamily::CollectiveAttribute.subentries_attribute()).unwrap();
        assert!(refs.contains_norm(&f.norm(renamed)));
        assert!(!refs.contains_norm(&f.norm(TEST)));
    }
    assert!(f.untouched_by("ou=users,ou=system", renamed));
    assert!(!f.exists(TEST));
    let registered = f.service.registered_subentries().unwrap();
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].dn.norm_name(), f.norm(renamed));
    f.assert_consistent();
}

#[test]
fn test_scenario_d_moving_out_of_the_base_drops_the_reference() {
    let f = scenario_a();
    let marked = "cn=marked,ou=interceptors,ou=configuration,ou=system";
    f.add_person(marked).unwrap();
    assert!(f.selected_by(marked, TEST));

    let untouched: Vec<_> = f
        .candidates()
        .into_iter()
        .filter(|e| e.dn().norm_name() != f.norm(marked))
        .map(|e| (e.dn().clone(), e.get(RoleFamily::AccessControl.subentries_attribute()).cloned()))
        .collect();

    f.service
        .move_entry(&f.admin, &dn(marked), &dn("ou=users,ou=system"))
        .unwrap();

    let moved = "cn=marked,ou=users,ou=system";
    assert!(f.untouched_by(moved, TEST));
    for (name, refs) in untouched {
        let now = f.service.lookup(&f.admin, name.up_name()).unwrap().unwrap();
        let now_refs = now.get(RoleFamily::AccessControl.subentries_attribute());
        assert_eq!(
            refs.map(|a| a.len()),
            now_refs.map(|a| a.len()),
            "{} changed",
            name
        );
    }
    f.assert_consistent();
}

#[test]
fn test_scenario_e_delete_clears_references_and_bumps_seq() {
    let f = scenario_a();
    let seq_before = f
        .service
        .administrative_point(RoleFamily::AccessControl, &dn("ou=system"))
        .unwrap()
        .unwrap()
        .seq_number;

    f.service.delete(&f.admin, &dn(TEST)).unwrap();

    for entry in f.candidates() {
        for family in RoleFamily::ALL {
            assert!(!entry
                .get(family.subentries_attribute())
                .is_some_and(|a| a.contains_norm(&f.norm(TEST))));
            // The last reference is gone, so is the sequence number.
            assert!(entry.get(family.seq_number_attribute()).is_none(), "{} / {}", entry.dn(), family);
        }
    }
    f.assert_consistent();
    let ap = f
        .service
        .administrative_point(RoleFamily::AccessControl, &dn("ou=system"))
        .unwrap()
        .unwrap();
    assert!(ap.seq_number > seq_before);
    assert!(ap.subentries.is_empty());
    assert!(f.service.registered_subentries().unwrap().is_empty());
}

#[test]
fn test_scenario_f_inner_area_needs_an_enclosing_area() {
    let f = Fixture::new();
    match f.add_ap("ou=inner,ou=users,ou=system", &["accessControlInnerArea"]) {
        Err(DirError::PolicyViolation(_)) => {}
        other => panic!("expected PolicyViolation, got {:?}", other),
    }
    assert!(!f.exists("ou=inner,ou=users,ou=system"));

    // With an enclosing specific area the same role is accepted.
    f.add_ap("ou=area,ou=users,ou=system", &["accessControlSpecificArea"]).unwrap();
    f.add_ap("ou=inner,ou=area,ou=users,ou=system", &["accessControlInnerArea"]).unwrap();
    let inner = f
        .service
        .administrative_point(RoleFamily::AccessControl, &dn("ou=inner,ou=area,ou=users,ou=system"))
        .unwrap()
        .unwrap();
    assert_eq!(inner.kind, AreaKind::Inner);
}

#[test]
fn test_ordinary_add_picks_up_existing_subentries() {
    let f = scenario_a();
    f.add_person("cn=late,ou=partitions,ou=configuration,ou=system").unwrap();
    f.add_person("cn=outside,ou=users,ou=system").unwrap();
    assert!(f.selected_by("cn=late,ou=partitions,ou=configuration,ou=system", TEST));
    assert!(f.untouched_by("cn=outside,ou=users,ou=system", TEST));
    f.assert_consistent();
}

#[test]
fn test_refinement_follows_object_class_changes() {
    let f = Fixture::with_system_roles(&["autonomousArea"]);
    f.add_subentry("cn=people,ou=system", "{ base \"ou=users\", specificationFilter item:extensibleObject }")
        .unwrap();
    let device = "cn=printer,ou=users,ou=system";
    f.add(
        Entry::named(&dn(device))
            .unwrap()
            .with("objectClass", ["top", "device"]),
    )
    .unwrap();
    assert!(f.untouched_by(device, "cn=people,ou=system"));

    f.service
        .modify(
            &f.admin,
            &dn(device),
            vec![Modification::add(Attribute::with_values("objectClass", ["extensibleObject"]))],
        )
        .unwrap();
    assert!(f.selected_by(device, "cn=people,ou=system"));
    f.assert_consistent();

    f.service
        .modify(
            &f.admin,
            &dn(device),
            vec![Modification::remove(Attribute::with_values("objectClass", ["extensibleObject"]))],
        )
        .unwrap();
    assert!(f.untouched_by(device, "cn=people,ou=system"));
    f.assert_consistent();
}

#[test]
fn test_role_specific_subentry_only_marks_its_family() {
    let f = Fixture::with_system_roles(&["autonomousArea"]);
    f.add_subentry_with_classes(
        "cn=acl,ou=system",
        "{ base \"ou=users\" }",
        &["top", "subentry", "accessControlSubentry"],
    )
    .unwrap();
    let refs = f.references("ou=users,ou=system", RoleFamily::AccessControl);
    assert!(refs.contains(&f.norm("cn=acl,ou=system")));
    assert!(f
        .references("ou=users,ou=system", RoleFamily::CollectiveAttribute)
        .is_empty());
    f.assert_consistent();
}

#[test]
fn test_subentry_roles_must_match_the_parent() {
    let f = Fixture::new();
    f.add_ap("ou=users,ou=groups,ou=system", &["collectiveAttributeSpecificArea"])
        .unwrap();
    match f.add_subentry_with_classes(
        "cn=acl,ou=users,ou=groups,ou=system",
        "{}",
        &["top", "subentry", "accessControlSubentry"],
    ) {
        Err(DirError::PolicyViolation(_)) => {}
        other => panic!("expected PolicyViolation, got {:?}", other),
    }
    match f.add_subentry("cn=loose,ou=users,ou=system", "{}") {
        Err(DirError::PolicyViolation(_)) => {}
        other => panic!("expected PolicyViolation, got {:?}", other),
    }
}

#[test]
fn test_subentry_without_or_with_bad_specification() {
    let f = Fixture::with_system_roles(&["autonomousArea"]);
    let missing = Entry::named(&dn("cn=nospec,ou=system"))
        .unwrap()
        .with("objectClass", ["top", "subentry"])
        .with("cn", ["nospec"]);
    match f.add(missing) {
        Err(DirError::SchemaViolation { code, .. }) => {
            assert_eq!(code, ResultCode::ObjectClassViolation)
        }
        other => panic!("expected SchemaViolation, got {:?}", other),
    }
    match f.add_subentry("cn=bad,ou=system", "{ base ou=users }") {
        Err(DirError::InvalidAttributeSyntax(_)) => {}
        other => panic!("expected InvalidAttributeSyntax, got {:?}", other),
    }
    assert!(!f.exists("cn=bad,ou=system"));
}

#[test]
fn test_non_administrators_cannot_touch_the_administrative_model() {
    let f = Fixture::with_system_roles(&["autonomousArea"]);
    let jane = f.service.session(&dn("uid=jane,ou=users,ou=system")).unwrap();

    let subentry = Entry::named(&dn("cn=mine,ou=system"))
        .unwrap()
        .with("objectClass", ["top", "subentry"])
        .with("cn", ["mine"])
        .with("subtreeSpecification", ["{}"]);
    match f.service.add(&jane, subentry) {
        Err(DirError::InsufficientPrivilege(_)) => {}
        other => panic!("expected InsufficientPrivilege, got {:?}", other),
    }

    let ap = Entry::named(&dn("ou=mine,ou=users,ou=system"))
        .unwrap()
        .with("objectClass", ["organizationalUnit"])
        .with("administrativeRole", ["accessControlSpecificArea"]);
    match f.service.add(&jane, ap) {
        Err(DirError::InsufficientPrivilege(_)) => {}
        other => panic!("expected InsufficientPrivilege, got {:?}", other),
    }

    let role_change = vec![Modification::add(Attribute::with_values(
        "administrativeRole",
        ["accessControlSpecificArea"],
    ))];
    match f.service.modify(&jane, &dn("ou=users,ou=system"), role_change.clone()) {
        Err(DirError::InsufficientPrivilege(_)) => {}
        other => panic!("expected InsufficientPrivilege, got {:?}", other),
    }
    match f.service.modify(&f.admin, &dn("ou=users,ou=system"), role_change) {
        Err(DirError::PolicyViolation(_)) => {}
        other => panic!("expected PolicyViolation, got {:?}", other),
    }

    // Ordinary entries remain writable by anyone.
    f.service
        .add(
            &jane,
            Entry::named(&dn("cn=note,ou=users,ou=system"))
                .unwrap()
                .with("objectClass", ["top", "person"])
                .with("sn", ["note"]),
        )
        .unwrap();
}

#[test]
fn test_subentry_class_cannot_be_toggled() {
    let f = scenario_a();
    match f.service.modify(
        &f.admin,
        &dn("ou=users,ou=system"),
        vec![Modification::add(Attribute::with_values("objectClass", ["subentry"]))],
    ) {
        Err(DirError::PolicyViolation(_)) => {}
        other => panic!("expected PolicyViolation, got {:?}", other),
    }
    match f.service.modify(
        &f.admin,
        &dn(TEST),
        vec![Modification::remove(Attribute::with_values("objectClass", ["subentry"]))],
    ) {
        Err(DirError::PolicyViolation(_)) => {}
        other => panic!("expected PolicyViolation, got {:?}", other),
    }
}

#[test]
fn test_administrative_points_cannot_be_placed_badly() {
    let f = Fixture::new();
    match f.add_ap("ou=area,ou=users,ou=system", &["autonomousArea", "accessControlInnerArea"]) {
        Err(DirError::PolicyViolation(_)) => {}
        other => panic!("expected PolicyViolation, got {:?}", other),
    }
    match f.add_ap("ou=area,ou=users,ou=system", &["notARole"]) {
        Err(DirError::PolicyViolation(_)) => {}
        other => panic!("expected PolicyViolation, got {:?}", other),
    }
    assert!(!f.exists("ou=area,ou=users,ou=system"));

    let other = DirectoryService::in_memory(dirsrv_core::ServiceConfig {
        suffixes: vec!["dc=other".to_string()],
        ..common::config()
    })
    .unwrap();
    let context_root = Entry::named("dc=other")
        .unwrap()
        .with("objectClass", ["domain"])
        .with("administrativeRole", ["autonomousArea"]);
    match other.add(&other.admin_session(), context_root) {
        Err(DirError::PolicyViolation(_)) => {}
        other => panic!("expected PolicyViolation, got {:?}", other),
    }
}

#[test]
fn test_moving_a_subtree_with_an_administrative_point_is_refused() {
    let f = Fixture::new();
    f.add_ap("ou=area,ou=users,ou=system", &["accessControlSpecificArea"]).unwrap();
    match f.service.move_entry(&f.admin, &dn("ou=users,ou=system"), &dn("ou=groups,ou=system")) {
        Err(DirError::SchemaViolation { code, .. }) => assert_eq!(code, ResultCode::NotAllowedOnRdn),
        other => panic!("expected SchemaViolation, got {:?}", other),
    }
    match f.service.rename(&f.admin, &dn("ou=area,ou=users,ou=system"), "ou=zone", true) {
        Err(DirError::SchemaViolation { code, .. }) => assert_eq!(code, ResultCode::NotAllowedOnRdn),
        other => panic!("expected SchemaViolation, got {:?}", other),
    }
    assert!(f.exists("ou=area,ou=users,ou=system"));
}

#[test]
fn test_moving_a_subtree_repairs_every_descendant() {
    let f = scenario_a();
    f.add_ou("ou=staff,ou=users,ou=system").unwrap();
    f.add_person("cn=bob,ou=staff,ou=users,ou=system").unwrap();
    assert!(f.untouched_by("cn=bob,ou=staff,ou=users,ou=system", TEST));

    f.service
        .move_and_rename(
            &f.admin,
            &dn("ou=staff,ou=users,ou=system"),
            &dn(CONFIGURATION),
            "ou=crew",
            true,
        )
        .unwrap();
    assert!(f.selected_by("ou=crew,ou=configuration,ou=system", TEST));
    assert!(f.selected_by("cn=bob,ou=crew,ou=configuration,ou=system", TEST));
    f.assert_consistent();
}

#[test]
fn test_subentry_moves_to_another_area() {
    let f = Fixture::with_system_roles(&["autonomousArea"]);
    f.add_ap("ou=teams,ou=system", &["collectiveAttributeSpecificArea"]).unwrap();
    f.add_person("cn=t1,ou=teams,ou=system").unwrap();
    f.add_subentry("cn=mobile,ou=system", "{}").unwrap();
    assert!(f.selected_by("ou=users,ou=system", "cn=mobile,ou=system"));
    f.assert_consistent();

    f.service
        .move_entry(&f.admin, &dn("cn=mobile,ou=system"), &dn("ou=teams,ou=system"))
        .unwrap();

    let moved = "cn=mobile,ou=teams,ou=system";
    assert!(f.untouched_by("ou=users,ou=system", "cn=mobile,ou=system"));
    assert!(f.untouched_by("ou=users,ou=system", moved));
    assert!(f
        .references("cn=t1,ou=teams,ou=system", RoleFamily::CollectiveAttribute)
        .contains(&f.norm(moved)));
    assert!(!f
        .references("cn=t1,ou=teams,ou=system", RoleFamily::AccessControl)
        .contains(&f.norm(moved)));
    let registered = f.service.registered_subentries().unwrap();
    assert_eq!(registered[0].roles.len(), 1);
    f.assert_consistent();
}

#[test]
fn test_nested_administrative_point_bumps_its_parent() {
    let f = Fixture::with_system_roles(&["autonomousArea"]);
    let before = f
        .service
        .administrative_point(RoleFamily::AccessControl, &dn("ou=system"))
        .unwrap()
        .unwrap()
        .seq_number;
    f.add_ap("ou=inner,ou=users,ou=system", &["accessControlInnerArea"]).unwrap();
    let after = f
        .service
        .administrative_point(RoleFamily::AccessControl, &dn("ou=system"))
        .unwrap()
        .unwrap()
        .seq_number;
    assert!(after > before);

    let stored = f.entry("ou=system");
    let value = stored
        .get("apSeqNumber")
        .and_then(Attribute::first)
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap();
    assert_eq!(value, after.to_string());

    f.service.delete(&f.admin, &dn("ou=inner,ou=users,ou=system")).unwrap();
    assert!(f
        .service
        .administrative_point(RoleFamily::AccessControl, &dn("ou=inner,ou=users,ou=system"))
        .unwrap()
        .is_none());
}

#[test]
fn test_search_visibility_of_subentries() {
    let f = scenario_a();
    let plain = f
        .service
        .search(&f.admin, common::SUFFIX, SearchScope::Subtree, "(objectClass=*)", &[], RequestControls::none())
        .unwrap();
    assert!(plain.iter().all(|e| !e.has_object_class("subentry")));
    assert!(!plain.is_empty());

    let only = f
        .service
        .search(
            &f.admin,
            common::SUFFIX,
            SearchScope::Subtree,
            "(objectClass=*)",
            &[],
            RequestControls::subentries(true),
        )
        .unwrap();
    assert_eq!(only.len(), 1);
    assert!(only[0].has_object_class("subentry"));

    let direct = f
        .service
        .search(&f.admin, &dn(TEST), SearchScope::Object, "(objectClass=*)", &[], RequestControls::none())
        .unwrap();
    assert_eq!(direct.len(), 1);

    let listed = f.service.list(&f.admin, &dn("ou=system")).unwrap();
    assert!(listed.iter().all(|e| !e.has_object_class("subentry")));
    assert_eq!(listed.len(), 4);
}

#[test]
fn test_unknown_attribute_filter_returns_nothing() {
    let f = scenario_a();
    let found = f
        .service
        .search(&f.admin, common::SUFFIX, SearchScope::Subtree, "(shoeSize=12)", &[], RequestControls::none())
        .unwrap();
    assert!(found.is_empty());
    assert!(f
        .service
        .diagnostics()
        .snapshot()
        .iter()
        .any(|d| matches!(d.kind, DiagnosticEvent::FilterCollapsed { .. })));
}

#[test]
fn test_startup_scan_rebuilds_state_and_skips_malformed_subentries() {
    let f = scenario_a();
    let seq = f
        .service
        .administrative_point(RoleFamily::AccessControl, &dn("ou=system"))
        .unwrap()
        .unwrap()
        .seq_number;

    // A subentry written straight into the partition, bypassing validation.
    let mut broken = Entry::named(&dn("cn=broken,ou=system"))
        .unwrap()
        .with("objectClass", ["top", "subentry"])
        .with("cn", ["broken"])
        .with("subtreeSpecification", ["{ base"]);
    broken.normalize(&f.schema).unwrap();
    f.partition.add(broken).unwrap();

    let restarted = DirectoryService::with_schema(
        common::config(),
        Arc::clone(&f.schema),
        Arc::clone(&f.partition) as Arc<dyn Partition>,
    )
    .unwrap();
    let report = restarted.startup_report().unwrap();
    assert_eq!(report.administrative_points, 1);
    assert_eq!(report.subentries, 1);
    assert_eq!(report.skipped, 1);
    assert!(restarted.diagnostics().snapshot().iter().any(|d| matches!(
        &d.kind,
        DiagnosticEvent::SubentrySkipped { dn, .. } if dn.contains("broken")
    )));

    let ap = restarted
        .administrative_point(RoleFamily::CollectiveAttribute, &dn("ou=system"))
        .unwrap()
        .unwrap();
    assert_eq!(ap.seq_number, seq);
    assert_eq!(ap.subentries.len(), 1);

    // New sequence numbers continue after the stored ones.
    let admin = restarted.admin_session();
    restarted.delete(&admin, &dn(TEST)).unwrap();
    let bumped = restarted
        .administrative_point(RoleFamily::CollectiveAttribute, &dn("ou=system"))
        .unwrap()
        .unwrap();
    assert!(bumped.seq_number > seq);
}

#[test]
fn test_concurrent_updates_stay_consistent() {
    let f = Fixture::with_system_roles(&["autonomousArea"]);
    std::thread::scope(|scope| {
        for worker in 0..4 {
            let f = &f;
            scope.spawn(move || {
                for i in 0..10 {
                    let rel = format!("cn=w{}-{},ou=interceptors,ou=configuration,ou=system", worker, i);
                    f.add_person(&rel).unwrap();
                }
            });
        }
        let f = &f;
        scope.spawn(move || {
            f.add_subentry(TEST, "{ base \"ou=configuration\" }").unwrap();
            f.set_spec(TEST, "{ base \"ou=configuration\", minimum 2 }").unwrap();
        });
    });
    f.assert_consistent();
    assert!(f.untouched_by(INTERCEPTORS, TEST));
    assert!(f.selected_by("cn=w0-0,ou=interceptors,ou=configuration,ou=system", TEST));
}

/// `ou=teams` is a collective attribute specific area nested in the
/// autonomous area at `ou=system`.
fn nested_specific_area() -> Fixture {
    let f = Fixture::with_system_roles(&["autonomousArea"]);
    f.add_ap("ou=teams,ou=system", &["collectiveAttributeSpecificArea"]).unwrap();
    f.add_subentry("cn=outer,ou=system", "{}").unwrap();
    f
}

#[test]
fn test_nested_specific_area_shields_its_family_from_outer_subentries() {
    let f = nested_specific_area();
    let t1 = "cn=t1,ou=teams,ou=system";
    f.add_person(t1).unwrap();

    let outer = f.norm("cn=outer,ou=system");
    assert!(!f.references(t1, RoleFamily::CollectiveAttribute).contains(&outer));
    assert!(!f.references("ou=teams,ou=system", RoleFamily::CollectiveAttribute).contains(&outer));
    for family in [RoleFamily::AccessControl, RoleFamily::Subschema, RoleFamily::TriggerExecution] {
        assert!(f.references(t1, family).contains(&outer), "{}", family);
    }
    assert!(f.entry(t1).get(RoleFamily::CollectiveAttribute.seq_number_attribute()).is_none());
    f.assert_consistent();

    // A subentry of the nested area does reach it.
    f.add_subentry("cn=local,ou=teams,ou=system", "{}").unwrap();
    let local = f.norm("cn=local,ou=teams,ou=system");
    let refs = f.references(t1, RoleFamily::CollectiveAttribute);
    assert!(refs.contains(&local));
    assert!(!refs.contains(&outer));
    assert!(!f.references("ou=users,ou=system", RoleFamily::CollectiveAttribute).contains(&local));
    let seq = f
        .service
        .administrative_point(RoleFamily::CollectiveAttribute, &dn("ou=teams,ou=system"))
        .unwrap()
        .unwrap()
        .seq_number;
    let stored = f
        .entry(t1)
        .get(RoleFamily::CollectiveAttribute.seq_number_attribute())
        .and_then(Attribute::first)
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap();
    assert_eq!(stored, seq.to_string());
    f.assert_consistent();
}

#[test]
fn test_entries_moving_into_a_nested_specific_area_drop_outer_references() {
    let f = nested_specific_area();
    let outer = f.norm("cn=outer,ou=system");
    f.add_person("cn=t2,ou=users,ou=system").unwrap();
    assert!(f.selected_by("cn=t2,ou=users,ou=system", "cn=outer,ou=system"));

    f.service
        .move_entry(&f.admin, &dn("cn=t2,ou=users,ou=system"), &dn("ou=teams,ou=system"))
        .unwrap();
    let moved = "cn=t2,ou=teams,ou=system";
    assert!(!f.references(moved, RoleFamily::CollectiveAttribute).contains(&outer));
    assert!(f.references(moved, RoleFamily::AccessControl).contains(&outer));
    f.assert_consistent();

    // Changing the outer subentry still leaves the nested area alone.
    f.set_spec("cn=outer,ou=system", "{ minimum 1 }").unwrap();
    assert!(!f.references(moved, RoleFamily::CollectiveAttribute).contains(&outer));
    f.assert_consistent();

    f.service.delete(&f.admin, &dn("cn=outer,ou=system")).unwrap();
    for family in RoleFamily::ALL {
        assert!(f.entry(moved).get(family.seq_number_attribute()).is_none(), "{}", family);
    }
    f.assert_consistent();
}

#[test]
fn test_nested_inner_area_inherits_outer_subentries() {
    let f = Fixture::with_system_roles(&["autonomousArea"]);
    f.add_ap("ou=crew,ou=system", &["collectiveAttributeInnerArea"]).unwrap();
    f.add_subentry("cn=outer,ou=system", "{}").unwrap();
    f.add_subentry("cn=local,ou=crew,ou=system", "{}").unwrap();
    let c1 = "cn=c1,ou=crew,ou=system";
    f.add_person(c1).unwrap();

    let refs = f.references(c1, RoleFamily::CollectiveAttribute);
    assert!(refs.contains(&f.norm("cn=outer,ou=system")));
    assert!(refs.contains(&f.norm("cn=local,ou=crew,ou=system")));
    f.assert_consistent();
}

#[test]
fn test_deeply_nested_search_filter_is_rejected() {
    let f = scenario_a();
    let filter = format!("{}(cn=x){}", "(!".repeat(50_000), ")".repeat(50_000));
    match f
        .service
        .search(&f.admin, common::SUFFIX, SearchScope::Subtree, &filter, &[], RequestControls::none())
    {
        Err(DirError::InvalidFilter(_)) => {}
        other => panic!("expected InvalidFilter, got {:?}", other.map(|e| e.len())),
    }
}

#[test]
fn test_deeply_nested_refinement_is_rejected() {
    let f = Fixture::with_system_roles(&["autonomousArea"]);
    let spec = format!("{{ specificationFilter {}item:person }}", "not:".repeat(50_000));
    match f.add_subentry("cn=deep,ou=system", &spec) {
        Err(DirError::InvalidAttributeSyntax(_)) => {}
        other => panic!("expected InvalidAttributeSyntax, got {:?}", other),
    }
    assert!(!f.exists("cn=deep,ou=system"));
}
