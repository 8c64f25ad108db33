use memberauth::{
    auth::AuthOutcome,
    domain::{InvalidationReason, InvalidationTarget, MemberIdentity, Session, SessionId},
};
use serde_json::json;

use crate::support::{setup, TestCore, PASSWORD};

async fn sign_in(app: &TestCore, number: &str) -> (MemberIdentity, Session) {
    match app.core.verifier.authenticate(number, PASSWORD).await.unwrap() {
        AuthOutcome::Authenticated(login) => {
            login.role_sync.await.unwrap().unwrap();
            (login.member, login.session)
        }
        other => panic!("expected an authenticated login, got {other:?}"),
    }
}

#[tokio::test]
async fn integration_invalidate_twice_is_a_no_op() {
    let app = setup().await;
    app.add_member("AB12345", PASSWORD).await;
    let (_, session) = sign_in(&app, "AB12345").await;
    let target = InvalidationTarget::Session(session.id.clone());

    let first = app.core.sessions.invalidate(target.clone(), InvalidationReason::SignOut).await;
    let second = app.core.sessions.invalidate(target, InvalidationReason::SignOut).await;
    assert_eq!(first.unwrap(), 1);
    assert_eq!(second.unwrap(), 0);

    let stored = app.core.sessions.get(&session.id).await.unwrap().unwrap();
    assert!(!stored.active);
    assert_eq!(stored.invalidation_reason, Some(InvalidationReason::SignOut));
}

#[tokio::test]
async fn integration_invalidate_unknown_session() {
    let app = setup().await;
    let ended = app
        .core
        .sessions
        .invalidate(InvalidationTarget::Session(SessionId::new()), InvalidationReason::SignOut)
        .await
        .unwrap();
    assert_eq!(ended, 0);
}

#[tokio::test]
async fn integration_sign_out_clears_local_state_when_provider_fails() {
    let app = setup().await;
    app.add_member("AB12345", PASSWORD).await;
    let (member, session) = sign_in(&app, "AB12345").await;
    app.core.sessions.cache_put(&session.id, "dues", json!({ "balance": 40 }));

    app.provider.fail_sign_out(true);
    let report = app.core.sessions.sign_out(&session.id).await.unwrap();
    assert!(report.was_active);
    assert!(!report.provider_signed_out);
    assert_eq!(report.provider_error.as_deref(), Some("TRANSIENT_BACKEND_ERROR"));

    assert!(app.core.sessions.cache_get(&session.id, "dues").is_none());
    assert!(!app.core.sessions.get(&session.id).await.unwrap().unwrap().active);
    assert!(app.core.roles.cached(&member.id).is_none());
}

#[tokio::test]
async fn integration_sign_out_closes_provider_session() {
    let app = setup().await;
    app.add_member("AB12345", PASSWORD).await;
    let (_, session) = sign_in(&app, "AB12345").await;
    assert_eq!(app.provider.open_sessions(), 1);

    let report = app.core.sessions.sign_out(&session.id).await.unwrap();
    assert!(report.provider_signed_out);
    assert_eq!(app.provider.open_sessions(), 0);

    // Signing out again reports nothing left to end
    let again = app.core.sessions.sign_out(&session.id).await.unwrap();
    assert!(!again.was_active);
}

#[tokio::test]
async fn integration_roles_survive_while_another_session_is_active() {
    let app = setup().await;
    app.add_member("AB12345", PASSWORD).await;
    let (member, first) = sign_in(&app, "AB12345").await;
    let (_, second) = sign_in(&app, "AB12345").await;

    app.core.sessions.sign_out(&first.id).await.unwrap();
    assert!(app.core.roles.cached(&member.id).is_some());

    app.core.sessions.sign_out(&second.id).await.unwrap();
    assert!(app.core.roles.cached(&member.id).is_none());
}

#[tokio::test]
async fn integration_member_invalidation_ends_every_session() {
    let app = setup().await;
    app.add_member("AB12345", PASSWORD).await;
    let (member, _) = sign_in(&app, "AB12345").await;
    sign_in(&app, "AB12345").await;

    let ended = app
        .core
        .sessions
        .invalidate(
            InvalidationTarget::Member(member.id.clone()),
            InvalidationReason::AdminTerminated,
        )
        .await
        .unwrap();
    assert_eq!(ended, 2);
    assert!(app.core.sessions.active_sessions(&member.id).await.unwrap().is_empty());
    assert_eq!(app.provider.open_sessions(), 0);

    let info = app.core.sessions.session_info(&member.id).await.unwrap();
    assert!(!info.is_active);
    assert!(info.last_login.is_some());
}

#[tokio::test]
async fn integration_refresh_invalidates_expired_provider_session() {
    let app = setup().await;
    app.add_member("AB12345", PASSWORD).await;
    let (_, session) = sign_in(&app, "AB12345").await;

    assert!(app.core.sessions.refresh(&session.id).await.unwrap());

    app.provider.expire_session(session.external_ref.as_deref().unwrap());
    assert!(!app.core.sessions.refresh(&session.id).await.unwrap());

    let stored = app.core.sessions.get(&session.id).await.unwrap().unwrap();
    assert!(!stored.active);
    assert_eq!(stored.invalidation_reason, Some(InvalidationReason::RefreshFailed));

    // Refreshing a dead session is not an error
    assert!(!app.core.sessions.refresh(&session.id).await.unwrap());
}

#[tokio::test]
async fn integration_shutdown_drops_local_state() {
    let app = setup().await;
    app.add_member("AB12345", PASSWORD).await;
    let (member, session) = sign_in(&app, "AB12345").await;
    app.core.sessions.cache_put(&session.id, "profile", json!("cached"));

    app.core.shutdown();
    assert!(app.core.sessions.cache_get(&session.id, "profile").is_none());
    assert!(app.core.roles.cached(&member.id).is_none());
}
