use chrono::{Duration, Utc};
use memberauth::{
    auth::{Actor, AuthOutcome},
    domain::{LockoutState, Role},
    errors::MemberAuthError,
};

use crate::support::{setup, PASSWORD};

#[tokio::test]
async fn integration_admin_unlocks_member() {
    let app = setup().await;
    let member = app.add_member("AB12345", PASSWORD).await;
    let admin = app.add_admin("AD00001").await;
    app.force_lockout(
        &member,
        LockoutState { failed_attempts: 5, locked_until: Some(Utc::now() + Duration::minutes(20)) },
    )
    .await;
    assert!(app.core.lockout.is_locked(&member.id).await.unwrap());

    app.core.admin.reset_login_state(&Actor::Member(admin.id.clone()), "ab12345").await.unwrap();
    assert!(!app.core.lockout.is_locked(&member.id).await.unwrap());

    let outcome = app.core.verifier.authenticate("AB12345", PASSWORD).await.unwrap();
    assert!(matches!(outcome, AuthOutcome::Authenticated(_)));
}

#[tokio::test]
async fn integration_non_admin_cannot_manage_security() {
    let app = setup().await;
    let member = app.add_member("AB12345", PASSWORD).await;
    app.add_member("CD54321", PASSWORD).await;
    let actor = Actor::Member(member.id.clone());

    let err = app.core.admin.reset_login_state(&actor, "CD54321").await.unwrap_err();
    assert!(matches!(err, MemberAuthError::Unauthorized { .. }));
    let err = app.core.admin.terminate_all(&actor, "CD54321").await.unwrap_err();
    assert!(matches!(err, MemberAuthError::Unauthorized { .. }));
    let err = app.core.admin.set_maintenance(&actor, true, None).await.unwrap_err();
    assert!(matches!(err, MemberAuthError::Unauthorized { .. }));
    assert!(!app.core.admin.maintenance_status().await.unwrap().is_enabled);
}

#[tokio::test]
async fn integration_terminate_all_signs_out_everywhere() {
    let app = setup().await;
    let member = app.add_member("AB12345", PASSWORD).await;
    for _ in 0..2 {
        app.core.verifier.authenticate("AB12345", PASSWORD).await.unwrap();
    }

    let ended = app.core.admin.terminate_all(&Actor::Operator, "AB12345").await.unwrap();
    assert_eq!(ended, 2);
    assert!(app.provider.signed_out_all(&app.identifier(&member)));

    let info = app.core.admin.session_info(&Actor::Operator, "AB12345").await.unwrap();
    assert_eq!(info.active_sessions, 0);

    // Nothing left to end the second time
    assert_eq!(app.core.admin.terminate_all(&Actor::Operator, "AB12345").await.unwrap(), 0);
}

#[tokio::test]
async fn integration_security_overview_reports_state() {
    let app = setup().await;
    let member = app.add_member("AB12345", PASSWORD).await;
    for _ in 0..2 {
        app.core.verifier.authenticate("AB12345", "Wrong1Pass!").await.unwrap_err();
    }

    let overview = app.core.admin.security_overview(&Actor::Operator, "AB12345").await.unwrap();
    assert_eq!(overview.member_number.as_str(), "AB12345");
    assert_eq!(overview.failed_attempts, 2);
    assert!(overview.locked_until.is_none());
    assert!(!overview.password_reset_required);
    assert!(overview.password_age_days.is_none());
    assert_eq!(overview.sessions.active_sessions, 0);
    assert!(overview.roles.as_ref().unwrap().contains(Role::Member));
    assert!(!overview.roles_stale);
    let expected_score = app.reload(&member).await.security_health_score(Utc::now());
    assert_eq!(overview.security_health_score, expected_score);

    let rendered = serde_json::to_value(&overview).unwrap();
    assert_eq!(rendered["member_number"], "AB12345");
}

#[tokio::test]
async fn integration_require_password_reset_flag() {
    let app = setup().await;
    let member = app.add_member("AB12345", PASSWORD).await;

    app.core.admin.require_password_reset(&Actor::Operator, "AB12345", true).await.unwrap();
    assert!(app.reload(&member).await.password_reset_required);
    let outcome = app.core.verifier.authenticate("AB12345", PASSWORD).await.unwrap();
    assert!(matches!(outcome, AuthOutcome::PasswordResetRequired { .. }));

    app.core.admin.require_password_reset(&Actor::Operator, "AB12345", false).await.unwrap();
    let outcome = app.core.verifier.authenticate("AB12345", PASSWORD).await.unwrap();
    assert!(matches!(outcome, AuthOutcome::Authenticated(_)));
}

#[tokio::test]
async fn integration_admin_ops_on_unknown_member() {
    let app = setup().await;
    let err = app.core.admin.reset_login_state(&Actor::Operator, "ZZ99999").await.unwrap_err();
    assert!(matches!(err, MemberAuthError::NotFound { .. }));
    let err = app.core.admin.session_info(&Actor::Operator, "bad").await.unwrap_err();
    assert!(matches!(err, MemberAuthError::Validation { .. }));
}

#[tokio::test]
async fn integration_maintenance_toggle_round_trip() {
    let app = setup().await;
    let admin = app.add_admin("AD00001").await;
    let actor = Actor::Member(admin.id.clone());

    app.core.admin.set_maintenance(&actor, true, Some("Upgrading".into())).await.unwrap();
    let status = app.core.admin.maintenance_status().await.unwrap();
    assert!(status.is_enabled);
    assert_eq!(status.message.as_deref(), Some("Upgrading"));

    app.core.admin.set_maintenance(&actor, false, None).await.unwrap();
    assert!(!app.core.admin.maintenance_status().await.unwrap().is_enabled);
}

#[tokio::test]
async fn integration_roles_changed_refreshes_cache() {
    let app = setup().await;
    let member = app.add_member("AB12345", PASSWORD).await;
    app.core.roles.sync(&member.id).await.unwrap();

    app.ledger.assign(&member.id, &[Role::Member, Role::Collector]);
    let handle = app.core.admin.roles_changed(&Actor::Operator, "AB12345").await.unwrap();
    let roles = handle.await.unwrap().unwrap();
    assert!(roles.contains(Role::Collector));
    assert!(app.core.roles.cached(&member.id).unwrap().roles.contains(Role::Collector));
}
