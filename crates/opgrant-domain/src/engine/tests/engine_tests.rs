//! Behavioral tests for the decision pipeline.

use std::sync::Arc;

use crate::error::DomainError;
use crate::membership::{GroupExpansion, MembershipConfig};
use crate::model::{CheckMode, Decision, OperationCode, TargetRef, TargetType};

use super::mocks::{engine, engine_shared, engine_with_config, FakeDisks, FakeGrantStore, FakeGroups};

/// Groups fixture with an empty superuser group, for tests that do not
/// exercise superuser behavior.
fn plain_groups() -> FakeGroups {
    FakeGroups::new().with_group("superusers", 1, &[])
}

#[tokio::test]
async fn test_superuser_is_allowed_everything() {
    let groups = FakeGroups::new().with_group("superusers", 1, &[10]);
    let e = engine(FakeGrantStore::new(), groups, FakeDisks::new());

    let combos: &[(Option<TargetRef>, Option<i64>, CheckMode)] = &[
        (None, None, CheckMode::Enforce),
        (None, None, CheckMode::QueryAny),
        (Some(TargetRef::Disk(17)), Some(99), CheckMode::Enforce),
        (Some(TargetRef::Group(5)), Some(10), CheckMode::QueryAny),
        (Some(TargetRef::Maildomain(8)), None, CheckMode::Enforce),
    ];
    for (target, victim, mode) in combos {
        let decision = e
            .evaluate(
                10,
                OperationCode::CreateUser,
                target.as_ref(),
                *victim,
                Some("anything"),
                *mode,
            )
            .await
            .unwrap();
        assert_eq!(decision, Decision::Allowed, "combo {target:?}/{victim:?}/{mode:?}");
    }
}

// Concrete scenario: operator 42, not superuser, not in any group, holds
// create_user on disk 17 only.
#[tokio::test]
async fn test_exact_disk_grant_authorizes_only_that_disk() {
    let grants = FakeGrantStore::new()
        .with_op("DiskAdmin", OperationCode::CreateUser)
        .with_target(1, TargetType::Disk, Some(17))
        .with_role(42, "DiskAdmin", 1);
    let disks = FakeDisks::new()
        .with_disk(17, 500, "/uio/mn-l8/u17")
        .with_disk(18, 500, "/uio/mn-l8/u18");
    let e = engine(grants, plain_groups(), disks);

    let allowed = e
        .evaluate(
            42,
            OperationCode::CreateUser,
            Some(&TargetRef::Disk(17)),
            None,
            None,
            CheckMode::Enforce,
        )
        .await
        .unwrap();
    assert_eq!(allowed, Decision::Allowed);

    let denied = e
        .evaluate(
            42,
            OperationCode::CreateUser,
            Some(&TargetRef::Disk(18)),
            None,
            None,
            CheckMode::Enforce,
        )
        .await
        .unwrap();
    assert_eq!(denied, Decision::denied("no access to disk"));
}

#[tokio::test]
async fn test_grant_held_by_operators_group_applies() {
    // Group 100 holds the grant; operator 7 is a member.
    let groups = plain_groups().with_group("ifi-drift", 100, &[7]);
    let grants = FakeGrantStore::new()
        .with_op("GroupOps", OperationCode::AlterGroupMembership)
        .with_target(1, TargetType::Group, Some(55))
        .with_role(100, "GroupOps", 1);
    let e = engine(grants, groups, FakeDisks::new());

    assert!(e
        .evaluate(
            7,
            OperationCode::AlterGroupMembership,
            Some(&TargetRef::Group(55)),
            None,
            None,
            CheckMode::Enforce,
        )
        .await
        .unwrap()
        .is_allowed());
}

// Concrete scenario: group G holds set_password on global-host; operator 7
// is a member. Allowed on any disk, unless the victim is a superuser.
#[tokio::test]
async fn test_global_host_grant_covers_disks_with_superuser_guard() {
    let groups = FakeGroups::new()
        .with_group("superusers", 1, &[90])
        .with_group("hostops", 100, &[7]);
    let grants = FakeGrantStore::new()
        .with_op("HostOps", OperationCode::SetPassword)
        .with_target(1, TargetType::GlobalHost, None)
        .with_role(100, "HostOps", 1);
    let disks = FakeDisks::new().with_disk(17, 500, "/uio/mn-l8/u17");
    let e = engine(grants, groups, disks);

    // Victim is a plain account: allowed through the global grant.
    assert!(e
        .evaluate(
            7,
            OperationCode::SetPassword,
            Some(&TargetRef::Disk(17)),
            Some(33),
            None,
            CheckMode::Enforce,
        )
        .await
        .unwrap()
        .is_allowed());

    // Victim 90 is a superuser: the global grant must not reach them.
    assert_eq!(
        e.evaluate(
            7,
            OperationCode::SetPassword,
            Some(&TargetRef::Disk(17)),
            Some(90),
            None,
            CheckMode::Enforce,
        )
        .await
        .unwrap(),
        Decision::denied("no access to disk")
    );
}

#[tokio::test]
async fn test_global_group_grant_never_reaches_superuser_group() {
    let groups = FakeGroups::new().with_group("superusers", 1, &[90]);
    let grants = FakeGrantStore::new()
        .with_op("GroupOps", OperationCode::AlterGroupMembership)
        .with_target(1, TargetType::GlobalGroup, None)
        .with_role(42, "GroupOps", 1);
    let e = engine(grants, groups, FakeDisks::new());

    // Acting on an ordinary group is fine.
    assert!(e
        .evaluate(
            42,
            OperationCode::AlterGroupMembership,
            Some(&TargetRef::Group(55)),
            Some(55),
            None,
            CheckMode::Enforce,
        )
        .await
        .unwrap()
        .is_allowed());

    // Acting on the superuser group itself is not.
    assert_eq!(
        e.evaluate(
            42,
            OperationCode::AlterGroupMembership,
            Some(&TargetRef::Group(1)),
            Some(1),
            None,
            CheckMode::Enforce,
        )
        .await
        .unwrap(),
        Decision::denied("no access to group")
    );
}

// Concrete scenario: host-scoped target with pattern "^lab-.*" covers the
// disks on that host whose name matches.
#[tokio::test]
async fn test_host_pattern_grant_matches_disk_name() {
    let grants = FakeGrantStore::new()
        .with_op("LabAdmin", OperationCode::CreateUser)
        .with_target(1, TargetType::Host, Some(500))
        .with_target_attr(1, "^lab-.*")
        .with_role(42, "LabAdmin", 1);
    let disks = FakeDisks::new()
        .with_disk(17, 500, "/uio/lab-3")
        .with_disk(18, 500, "/uio/prod-1")
        .with_disk(19, 501, "/uio/lab-9");
    let e = engine(grants, plain_groups(), disks);

    // lab-3 matches the pattern.
    assert!(e
        .evaluate(
            42,
            OperationCode::CreateUser,
            Some(&TargetRef::Disk(17)),
            None,
            None,
            CheckMode::Enforce,
        )
        .await
        .unwrap()
        .is_allowed());

    // prod-1 does not.
    assert_eq!(
        e.evaluate(
            42,
            OperationCode::CreateUser,
            Some(&TargetRef::Disk(18)),
            None,
            None,
            CheckMode::Enforce,
        )
        .await
        .unwrap(),
        Decision::denied("no access to disk")
    );

    // lab-9 matches but lives on another host.
    assert_eq!(
        e.evaluate(
            42,
            OperationCode::CreateUser,
            Some(&TargetRef::Disk(19)),
            None,
            None,
            CheckMode::Enforce,
        )
        .await
        .unwrap(),
        Decision::denied("no access to disk")
    );
}

#[tokio::test]
async fn test_host_grant_without_patterns_covers_every_disk_on_host() {
    let grants = FakeGrantStore::new()
        .with_op("HostAdmin", OperationCode::CreateUser)
        .with_target(1, TargetType::Host, Some(500))
        .with_role(42, "HostAdmin", 1);
    let disks = FakeDisks::new().with_disk(17, 500, "/uio/mn-l8/u17");
    let e = engine(grants, plain_groups(), disks);

    assert!(e
        .evaluate(
            42,
            OperationCode::CreateUser,
            Some(&TargetRef::Disk(17)),
            None,
            None,
            CheckMode::Enforce,
        )
        .await
        .unwrap()
        .is_allowed());
}

// Concrete scenario: modify_spread scoped to attribute "guest_mailbox".
#[tokio::test]
async fn test_attribute_scoped_operation_requires_exact_attribute() {
    let grants = FakeGrantStore::new()
        .with_op_attrs("SpreadOps", OperationCode::ModifySpread, &["guest_mailbox"])
        .with_target(1, TargetType::Spread, Some(301))
        .with_role(42, "SpreadOps", 1);
    let e = engine(grants, plain_groups(), FakeDisks::new());

    // Matching attribute: allowed.
    assert!(e
        .evaluate(
            42,
            OperationCode::ModifySpread,
            Some(&TargetRef::Spread(301)),
            None,
            Some("guest_mailbox"),
            CheckMode::Enforce,
        )
        .await
        .unwrap()
        .is_allowed());

    // Different attribute: denied, and the reason names operation and type.
    assert_eq!(
        e.evaluate(
            42,
            OperationCode::ModifySpread,
            Some(&TargetRef::Spread(301)),
            None,
            Some("internal_mailbox"),
            CheckMode::Enforce,
        )
        .await
        .unwrap(),
        Decision::denied("not authorized to modify spreads of type 'internal_mailbox'")
    );

    // No attribute supplied: a scoped entry does not apply.
    assert!(!e
        .evaluate(
            42,
            OperationCode::ModifySpread,
            Some(&TargetRef::Spread(301)),
            None,
            None,
            CheckMode::Enforce,
        )
        .await
        .unwrap()
        .is_allowed());
}

#[tokio::test]
async fn test_wildcard_operation_entry_allows_any_attribute() {
    let grants = FakeGrantStore::new()
        .with_op("SpreadOps", OperationCode::ModifySpread)
        .with_target(1, TargetType::Spread, Some(301))
        .with_role(42, "SpreadOps", 1);
    let e = engine(grants, plain_groups(), FakeDisks::new());

    for attr in [None, Some("guest_mailbox"), Some("internal_mailbox")] {
        assert!(e
            .evaluate(
                42,
                OperationCode::ModifySpread,
                Some(&TargetRef::Spread(301)),
                None,
                attr,
                CheckMode::Enforce,
            )
            .await
            .unwrap()
            .is_allowed());
    }
}

#[tokio::test]
async fn test_attribute_law_applies_to_global_grants_too() {
    let grants = FakeGrantStore::new()
        .with_op_attrs("MailOps", OperationCode::EmailCreate, &["uio.no"])
        .with_target(1, TargetType::GlobalMaildomain, None)
        .with_role(42, "MailOps", 1);
    let e = engine(grants, plain_groups(), FakeDisks::new());

    assert!(e
        .evaluate(
            42,
            OperationCode::EmailCreate,
            Some(&TargetRef::Maildomain(8)),
            None,
            Some("uio.no"),
            CheckMode::Enforce,
        )
        .await
        .unwrap()
        .is_allowed());

    assert!(!e
        .evaluate(
            42,
            OperationCode::EmailCreate,
            Some(&TargetRef::Maildomain(8)),
            None,
            Some("example.org"),
            CheckMode::Enforce,
        )
        .await
        .unwrap()
        .is_allowed());
}

#[tokio::test]
async fn test_query_any_without_target() {
    let grants = FakeGrantStore::new()
        .with_op("DiskAdmin", OperationCode::CreateUser)
        .with_target(1, TargetType::Disk, Some(17))
        .with_role(42, "DiskAdmin", 1);
    let e = engine(grants, plain_groups(), FakeDisks::new());

    // Operator 42 holds create_user somewhere.
    assert!(e
        .can_run_anywhere(42, OperationCode::CreateUser)
        .await
        .unwrap());

    // But not remove_user; the miss is reasonless, never an error.
    let decision = e
        .evaluate(
            42,
            OperationCode::RemoveUser,
            None,
            None,
            None,
            CheckMode::QueryAny,
        )
        .await
        .unwrap();
    assert_eq!(decision, Decision::not_held());

    // And operator 43 holds nothing at all.
    assert!(!e
        .can_run_anywhere(43, OperationCode::CreateUser)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_enforce_without_target_uses_operation_anywhere() {
    // Operations like create_group are not tied to a target; holding them
    // anywhere authorizes them.
    let grants = FakeGrantStore::new()
        .with_op("GroupCreators", OperationCode::CreateGroup)
        .with_target(1, TargetType::GlobalGroup, None)
        .with_role(42, "GroupCreators", 1);
    let e = engine(grants, plain_groups(), FakeDisks::new());

    assert!(e
        .evaluate(
            42,
            OperationCode::CreateGroup,
            None,
            None,
            None,
            CheckMode::Enforce,
        )
        .await
        .unwrap()
        .is_allowed());

    assert_eq!(
        e.evaluate(
            43,
            OperationCode::CreateGroup,
            None,
            None,
            None,
            CheckMode::Enforce,
        )
        .await
        .unwrap(),
        Decision::denied("not authorized to create groups")
    );
}

#[tokio::test]
async fn test_check_converts_denial_into_permission_denied() {
    let e = engine(FakeGrantStore::new(), plain_groups(), FakeDisks::new());

    let err = e
        .check(42, OperationCode::CreateUser, Some(&TargetRef::Group(5)), None, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DomainError::PermissionDenied { ref reason } if reason == "no access to group"
    ));
}

#[tokio::test]
async fn test_any_perm_cache_staleness_and_invalidation() {
    let grants = Arc::new(
        FakeGrantStore::new()
            .with_op("DiskAdmin", OperationCode::CreateUser)
            .with_target(1, TargetType::Disk, Some(17))
            .with_role(42, "DiskAdmin", 1),
    );
    let e = engine_shared(Arc::clone(&grants), plain_groups(), FakeDisks::new());

    assert!(e.can_run_anywhere(42, OperationCode::CreateUser).await.unwrap());

    // Revoke behind the engine's back: the cached answer is served until
    // the grant/revoke path invalidates.
    grants.revoke(42, "DiskAdmin", 1);
    assert!(e.can_run_anywhere(42, OperationCode::CreateUser).await.unwrap());

    e.notify_grants_changed().await;
    assert!(!e.can_run_anywhere(42, OperationCode::CreateUser).await.unwrap());
}

#[tokio::test]
async fn test_unknown_disk_propagates_not_found() {
    let grants = FakeGrantStore::new()
        .with_op("HostAdmin", OperationCode::CreateUser)
        .with_target(1, TargetType::Host, Some(500))
        .with_role(42, "HostAdmin", 1);
    let e = engine(grants, plain_groups(), FakeDisks::new());

    let err = e
        .evaluate(
            42,
            OperationCode::CreateUser,
            Some(&TargetRef::Disk(999)),
            None,
            None,
            CheckMode::Enforce,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::DiskNotFound { disk_id: 999 }));
}

#[tokio::test]
async fn test_invalid_host_pattern_is_reported() {
    let grants = FakeGrantStore::new()
        .with_op("LabAdmin", OperationCode::CreateUser)
        .with_target(1, TargetType::Host, Some(500))
        .with_target_attr(1, "lab-(")
        .with_role(42, "LabAdmin", 1);
    let disks = FakeDisks::new().with_disk(17, 500, "/uio/lab-3");
    let e = engine(grants, plain_groups(), disks);

    let err = e
        .evaluate(
            42,
            OperationCode::CreateUser,
            Some(&TargetRef::Disk(17)),
            None,
            None,
            CheckMode::Enforce,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidAttributePattern { .. }));
}

#[tokio::test]
async fn test_nested_group_grant_visibility_depends_on_expansion() {
    // inner group 100 contains operator 7; outer group 200 contains inner;
    // the grant is held by the outer group.
    let build_groups = || {
        FakeGroups::new()
            .with_group("superusers", 1, &[])
            .with_group("inner", 100, &[7])
            .with_group("outer", 200, &[100])
    };
    let build_grants = || {
        FakeGrantStore::new()
            .with_op("GroupOps", OperationCode::AlterGroupMembership)
            .with_target(1, TargetType::Group, Some(55))
            .with_role(200, "GroupOps", 1)
    };

    // Direct expansion does not see the outer group's grant.
    let direct = engine(build_grants(), build_groups(), FakeDisks::new());
    assert!(!direct
        .evaluate(
            7,
            OperationCode::AlterGroupMembership,
            Some(&TargetRef::Group(55)),
            None,
            None,
            CheckMode::Enforce,
        )
        .await
        .unwrap()
        .is_allowed());

    // Transitive expansion does.
    let transitive = engine_with_config(
        Arc::new(build_grants()),
        build_groups(),
        FakeDisks::new(),
        MembershipConfig::default().with_expansion(GroupExpansion::Transitive),
    );
    assert!(transitive
        .evaluate(
            7,
            OperationCode::AlterGroupMembership,
            Some(&TargetRef::Group(55)),
            None,
            None,
            CheckMode::Enforce,
        )
        .await
        .unwrap()
        .is_allowed());
}

#[tokio::test]
async fn test_spread_targets_have_no_global_shortcut() {
    // A global_spread grant exists, but spread checks are always per-spread.
    let grants = FakeGrantStore::new()
        .with_op("SpreadOps", OperationCode::ModifySpread)
        .with_target(1, TargetType::GlobalSpread, None)
        .with_role(42, "SpreadOps", 1);
    let e = engine(grants, plain_groups(), FakeDisks::new());

    assert!(!e
        .evaluate(
            42,
            OperationCode::ModifySpread,
            Some(&TargetRef::Spread(301)),
            None,
            None,
            CheckMode::Enforce,
        )
        .await
        .unwrap()
        .is_allowed());
}
