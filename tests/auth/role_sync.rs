use memberauth::{
    auth::Actor,
    domain::{Capability, Role},
    errors::MemberAuthError,
};

use crate::support::{setup, PASSWORD};

#[tokio::test]
async fn integration_sync_round_trips_ledger_roles() {
    let app = setup().await;
    let member = app.add_member("AB12345", PASSWORD).await;
    app.ledger.assign(&member.id, &[Role::Member, Role::Collector]);

    let roles = app.core.roles.sync(&member.id).await.unwrap();
    assert!(roles.contains(Role::Member));
    assert!(roles.contains(Role::Collector));
    assert!(roles.allows(Capability::CollectPayments));

    let entry = app.core.roles.cached(&member.id).unwrap();
    assert_eq!(entry.roles, roles);
    assert!(!entry.stale);
}

#[tokio::test]
async fn integration_sync_gives_up_after_three_attempts() {
    let app = setup().await;
    let member = app.add_member("AB12345", PASSWORD).await;
    app.ledger.fail_next(3);

    let err = app.core.roles.sync(&member.id).await.unwrap_err();
    match err {
        MemberAuthError::RoleSync { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected role sync failure, got {other:?}"),
    }
    assert_eq!(app.ledger.calls(), 3);
    assert!(app.core.roles.cached(&member.id).is_none());
}

#[tokio::test]
async fn integration_sync_recovers_within_budget() {
    let app = setup().await;
    let member = app.add_member("AB12345", PASSWORD).await;
    app.ledger.fail_next(2);

    let roles = app.core.roles.sync(&member.id).await.unwrap();
    assert!(roles.contains(Role::Member));
    assert_eq!(app.ledger.calls(), 3);
}

#[tokio::test]
async fn integration_role_change_is_picked_up() {
    let app = setup().await;
    let member = app.add_member("AB12345", PASSWORD).await;
    app.core.roles.sync(&member.id).await.unwrap();

    app.ledger.assign(&member.id, &[Role::Admin]);
    let roles = app.core.roles.roles_changed(&member.id).await.unwrap().unwrap();
    assert!(roles.contains(Role::Admin));
    assert!(!roles.contains(Role::Member));

    app.core
        .roles
        .authorize(&Actor::Member(member.id.clone()), Capability::ManageMemberSecurity)
        .await
        .unwrap();
}

#[tokio::test]
async fn integration_failed_refresh_falls_back_to_last_known_roles() {
    let app = setup().await;
    let member = app.add_member("AB12345", PASSWORD).await;
    app.core.roles.sync(&member.id).await.unwrap();

    // Enough failures for the background refresh and the forced sync in resolve
    app.ledger.fail_next(6);
    let refresh = app.core.roles.roles_changed(&member.id).await.unwrap();
    assert!(matches!(refresh, Err(MemberAuthError::RoleSync { .. })));
    assert!(app.core.roles.cached(&member.id).unwrap().stale);

    let resolved = app.core.roles.resolve(&member.id).await.unwrap();
    assert!(resolved.stale);
    assert!(resolved.roles.contains(Role::Member));
    assert!(resolved.allows(Capability::AccessPortal));
}

#[tokio::test]
async fn integration_unresolvable_roles_deny_authorization() {
    let app = setup().await;
    let member = app.add_member("AB12345", PASSWORD).await;
    app.ledger.fail_next(3);

    let err = app
        .core
        .roles
        .authorize(&Actor::Member(member.id.clone()), Capability::AccessPortal)
        .await
        .unwrap_err();
    assert!(matches!(err, MemberAuthError::RoleSync { .. }));
}

#[tokio::test]
async fn integration_member_without_admin_role_is_denied() {
    let app = setup().await;
    let member = app.add_member("AB12345", PASSWORD).await;

    let err = app
        .core
        .roles
        .authorize(&Actor::Member(member.id.clone()), Capability::IssueMagicLinks)
        .await
        .unwrap_err();
    assert!(matches!(err, MemberAuthError::Unauthorized { .. }));
    assert!(app.core.roles.authorize(&Actor::Operator, Capability::IssueMagicLinks).await.is_ok());
}
