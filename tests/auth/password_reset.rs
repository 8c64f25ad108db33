use chrono::{Duration, Utc};
use memberauth::{
    auth::{Actor, AuthOutcome, ChangePasswordRequest, TokenResetRequest},
    config::AuthConfig,
    domain::{InvalidationReason, ResetTokenStatus, Session},
    errors::MemberAuthError,
    storage::{ResetTokenRepository, SqlxResetTokenRepository},
};
use serde_json::json;

use crate::support::{setup, setup_with, test_config, token_from_link, TestCore, PASSWORD};

const NEW_PASSWORD: &str = "Fresh2Pass#";

fn change(current: &str, new: &str, confirm: &str) -> ChangePasswordRequest {
    ChangePasswordRequest {
        current_password: current.to_string(),
        new_password: new.to_string(),
        confirm_password: confirm.to_string(),
    }
}

fn token_reset(token: &str, new: &str) -> TokenResetRequest {
    TokenResetRequest {
        token: token.to_string(),
        new_password: new.to_string(),
        confirm_password: new.to_string(),
    }
}

async fn sign_in(app: &TestCore) -> Session {
    let AuthOutcome::Authenticated(login) =
        app.core.verifier.authenticate("AB12345", PASSWORD).await.unwrap()
    else {
        panic!("expected an authenticated login");
    };
    login.role_sync.await.unwrap().unwrap();
    login.session
}

/// Make every write of `password_changed_at` fail inside SQLite
async fn reject_password_stamps(app: &TestCore) {
    sqlx::query(
        r#"
        CREATE TRIGGER reject_password_stamp
        BEFORE UPDATE OF password_changed_at ON members
        BEGIN
            SELECT RAISE(ABORT, 'member row is read-only');
        END
        "#,
    )
    .execute(&app.pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn integration_password_rules_match_on_both_paths() {
    let app = setup().await;
    let resets = &app.core.resets;
    let member = app.add_member("AB12345", PASSWORD).await;
    let issued = resets.request_reset("AB12345").await.unwrap();

    let self_service =
        resets.change_password(&member.id, None, change(PASSWORD, "short1!", "short1!")).await;
    let with_token = resets.reset_with_token(token_reset(&issued.token, "short1!")).await;

    for result in [&self_service, &with_token] {
        assert!(!result.success);
        assert_eq!(result.code.as_deref(), Some("VALIDATION_ERROR"));
        let details = result.details.as_ref().unwrap();
        assert_eq!(details["field"], json!("new_password"));
        assert_eq!(details["rule"], json!("password_too_short"));
    }
    assert_eq!(self_service.error, with_token.error);

    // A rejected reset leaves the token usable
    assert!(resets.is_reset_token_valid(&issued.token).await);

    let request = change(PASSWORD, "Valid1Pass!", "Valid1Pass!");
    let self_service = resets.change_password(&member.id, None, request).await;
    let with_token = resets.reset_with_token(token_reset(&issued.token, "Valid1Pass!")).await;
    assert!(self_service.success, "{self_service:?}");
    assert!(with_token.success, "{with_token:?}");
}

#[tokio::test]
async fn integration_mismatched_confirmation_is_rejected() {
    let app = setup().await;
    let resets = &app.core.resets;
    let member = app.add_member("AB12345", PASSWORD).await;

    let request = change(PASSWORD, NEW_PASSWORD, "Other2Pass#");
    let result = resets.change_password(&member.id, None, request).await;
    assert!(!result.success);
    assert_eq!(result.details.unwrap()["rule"], json!("password_mismatch"));
    assert_eq!(app.provider.password_of(&app.identifier(&member)).as_deref(), Some(PASSWORD));
}

#[tokio::test]
async fn integration_self_service_change_keeps_current_session() {
    let app = setup().await;
    let resets = &app.core.resets;
    let member = app.add_member("AB12345", PASSWORD).await;

    let mut sessions = Vec::new();
    for _ in 0..2 {
        let AuthOutcome::Authenticated(login) =
            app.core.verifier.authenticate("AB12345", PASSWORD).await.unwrap()
        else {
            panic!("expected an authenticated login");
        };
        login.role_sync.await.unwrap().unwrap();
        sessions.push(login.session);
    }

    let request = change(PASSWORD, NEW_PASSWORD, NEW_PASSWORD);
    let result = resets.change_password(&member.id, Some(&sessions[0].id), request).await;
    assert!(result.success, "{result:?}");
    assert_eq!(result.details.unwrap()["sessions_invalidated"], json!(1));

    let kept = app.core.sessions.get(&sessions[0].id).await.unwrap().unwrap();
    let ended = app.core.sessions.get(&sessions[1].id).await.unwrap().unwrap();
    assert!(kept.active);
    assert!(!ended.active);
    assert_eq!(ended.invalidation_reason, Some(InvalidationReason::PasswordChanged));

    assert_eq!(app.provider.password_of(&app.identifier(&member)).as_deref(), Some(NEW_PASSWORD));
    assert!(app.reload(&member).await.password_changed_at.is_some());
}

#[tokio::test]
async fn integration_wrong_current_password_does_not_touch_lockout() {
    let app = setup().await;
    let resets = &app.core.resets;
    let member = app.add_member("AB12345", PASSWORD).await;

    let request = change("Wrong1Pass!", NEW_PASSWORD, NEW_PASSWORD);
    let result = resets.change_password(&member.id, None, request).await;
    assert!(!result.success);
    assert_eq!(result.code.as_deref(), Some("INVALID_CREDENTIALS"));
    assert_eq!(app.reload(&member).await.lockout.failed_attempts, 0);
    // The confirmation check must not leave a provider session behind
    assert_eq!(app.provider.open_sessions(), 0);
}

#[tokio::test]
async fn integration_token_reset_consumes_token_and_ends_sessions() {
    let app = setup().await;
    let resets = &app.core.resets;
    let member = app.add_member("AB12345", PASSWORD).await;
    let AuthOutcome::Authenticated(login) =
        app.core.verifier.authenticate("AB12345", PASSWORD).await.unwrap()
    else {
        panic!("expected an authenticated login");
    };
    login.role_sync.await.unwrap().unwrap();

    let issued = resets.request_reset("ab12345").await.unwrap();
    assert_eq!(token_from_link(&issued.link), issued.token);
    assert!(issued.link.starts_with("https://portal.example.org/reset-password?token="));
    assert_eq!(
        resets.validate_reset_token(&issued.token).await.unwrap(),
        ResetTokenStatus::Valid
    );

    let result = resets.reset_with_token(token_reset(&issued.token, NEW_PASSWORD)).await;
    assert!(result.success, "{result:?}");
    assert_eq!(result.details.unwrap()["sessions_invalidated"], json!(1));
    assert!(!app.core.sessions.get(&login.session.id).await.unwrap().unwrap().active);
    assert!(app.core.roles.cached(&member.id).is_none());

    let replay = resets.reset_with_token(token_reset(&issued.token, "Another3Pass$")).await;
    assert!(!replay.success);
    assert_eq!(replay.code.as_deref(), Some("ALREADY_CONSUMED"));
    assert_eq!(app.provider.password_of(&app.identifier(&member)).as_deref(), Some(NEW_PASSWORD));

    // The new password works, the old one counts as a failure
    assert!(app.core.verifier.authenticate("AB12345", NEW_PASSWORD).await.is_ok());
    let err = app.core.verifier.authenticate("AB12345", PASSWORD).await.unwrap_err();
    assert!(matches!(err, MemberAuthError::InvalidCredential { .. }));
}

#[tokio::test]
async fn integration_token_reset_revokes_sibling_tokens() {
    let app = setup().await;
    let resets = &app.core.resets;
    let member = app.add_member("AB12345", PASSWORD).await;
    let first = resets.request_reset("AB12345").await.unwrap();
    let second = resets.request_reset("AB12345").await.unwrap();

    let result = resets.reset_with_token(token_reset(&second.token, NEW_PASSWORD)).await;
    assert!(result.success, "{result:?}");
    assert_eq!(
        resets.validate_reset_token(&first.token).await.unwrap(),
        ResetTokenStatus::Consumed
    );

    let tokens = SqlxResetTokenRepository::new(app.pool.clone());
    let stored = tokens.list_for_member(&member.id).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|t| t.consumed_at.is_some()));
}

#[tokio::test]
async fn integration_unknown_token_is_reported_as_invalid_link() {
    let app = setup().await;
    let resets = &app.core.resets;
    app.add_member("AB12345", PASSWORD).await;

    let result = resets.reset_with_token(token_reset("not-a-real-token", NEW_PASSWORD)).await;
    assert!(!result.success);
    assert_eq!(result.code.as_deref(), Some("NOT_FOUND"));
    assert_eq!(
        result.error.as_deref(),
        Some("This password reset link is invalid or has expired.")
    );
    assert!(!resets.is_reset_token_valid("not-a-real-token").await);
    assert!(!resets.is_reset_token_valid("   ").await);
}

#[tokio::test]
async fn integration_provider_failure_releases_token() {
    let app = setup().await;
    let resets = &app.core.resets;
    let member = app.add_member("AB12345", PASSWORD).await;
    let issued = resets.request_reset("AB12345").await.unwrap();

    app.provider.fail_next_updates(3);
    let result = resets.reset_with_token(token_reset(&issued.token, NEW_PASSWORD)).await;
    assert!(!result.success);
    assert_eq!(result.code.as_deref(), Some("TRANSIENT_BACKEND_ERROR"));
    assert_eq!(result.details.as_ref().unwrap()["attempts"], json!(3));
    assert!(!serde_json::to_string(&result).unwrap().contains("provider busy"));

    // The claim was released, so the same link works once the provider recovers
    assert!(resets.is_reset_token_valid(&issued.token).await);
    let retried = resets.reset_with_token(token_reset(&issued.token, NEW_PASSWORD)).await;
    assert!(retried.success, "{retried:?}");
    assert_eq!(app.provider.password_of(&app.identifier(&member)).as_deref(), Some(NEW_PASSWORD));
}

#[tokio::test]
async fn integration_transient_failure_within_budget_succeeds() {
    let app = setup().await;
    let resets = &app.core.resets;
    let member = app.add_member("AB12345", PASSWORD).await;

    app.provider.fail_next_updates(2);
    let request = change(PASSWORD, NEW_PASSWORD, NEW_PASSWORD);
    let result = resets.change_password(&member.id, None, request).await;
    assert!(result.success, "{result:?}");
    assert_eq!(app.provider.password_of(&app.identifier(&member)).as_deref(), Some(NEW_PASSWORD));
}

#[tokio::test]
async fn integration_password_change_keeps_lockout_state() {
    let app = setup().await;
    let resets = &app.core.resets;
    let member = app.add_member("AB12345", PASSWORD).await;
    for _ in 0..2 {
        app.core.verifier.authenticate("AB12345", "Wrong1Pass!").await.unwrap_err();
    }
    let issued = resets.request_reset("AB12345").await.unwrap();

    let result = resets.reset_with_token(token_reset(&issued.token, NEW_PASSWORD)).await;
    assert!(result.success, "{result:?}");
    assert_eq!(app.reload(&member).await.lockout.failed_attempts, 2);
}

#[tokio::test]
async fn integration_magic_link_requires_admin() {
    let app = setup().await;
    let resets = &app.core.resets;
    let member = app.add_member("AB12345", PASSWORD).await;
    let admin = app.add_admin("AD00001").await;

    let denied = resets.issue_magic_link(&Actor::Member(member.id.clone()), "AB12345").await;
    assert!(!denied.success);
    assert_eq!(denied.code.as_deref(), Some("UNAUTHORIZED"));

    let issued = resets.issue_magic_link(&Actor::Member(admin.id.clone()), "AB12345").await;
    assert!(issued.success, "{issued:?}");
    let details = issued.details.as_ref().unwrap();
    assert_eq!(details["member_number"], json!("AB12345"));
    assert!(details["expires_at"].is_string());

    // Issuing a link never changes the password
    assert_eq!(app.provider.password_of(&app.identifier(&member)).as_deref(), Some(PASSWORD));

    let token = token_from_link(issued.link().unwrap());
    let result = resets.reset_with_token(token_reset(&token, NEW_PASSWORD)).await;
    assert!(result.success, "{result:?}");
    assert_eq!(app.provider.password_of(&app.identifier(&member)).as_deref(), Some(NEW_PASSWORD));
}

#[tokio::test]
async fn integration_magic_link_for_unknown_member() {
    let app = setup().await;
    let resets = &app.core.resets;
    let result = resets.issue_magic_link(&Actor::Operator, "ZZ99999").await;
    assert!(!result.success);
    assert_eq!(result.code.as_deref(), Some("NOT_FOUND"));
    assert_eq!(result.error.as_deref(), Some("Member not found or inactive"));
}

#[tokio::test]
async fn integration_expired_token_is_reported_as_expired() {
    let app = setup().await;
    let resets = &app.core.resets;
    let member = app.add_member("AB12345", PASSWORD).await;
    let issued = resets.request_reset("AB12345").await.unwrap();

    sqlx::query("UPDATE reset_tokens SET expires_at = $1")
        .bind(Utc::now() - Duration::minutes(5))
        .execute(&app.pool)
        .await
        .unwrap();

    assert_eq!(
        resets.validate_reset_token(&issued.token).await.unwrap(),
        ResetTokenStatus::Expired
    );
    assert!(!resets.is_reset_token_valid(&issued.token).await);

    let result = resets.reset_with_token(token_reset(&issued.token, NEW_PASSWORD)).await;
    assert!(!result.success);
    assert_eq!(result.code.as_deref(), Some("EXPIRED"));
    assert_eq!(
        result.error.as_deref(),
        Some("This password reset link has expired. Please request a new one.")
    );
    assert_eq!(app.provider.password_of(&app.identifier(&member)).as_deref(), Some(PASSWORD));
    assert!(app.provider.applied_updates().is_empty());
}

#[tokio::test]
async fn integration_token_reset_commits_when_member_record_update_fails() {
    let app = setup().await;
    let resets = &app.core.resets;
    let member = app.add_member("AB12345", PASSWORD).await;
    let session = sign_in(&app).await;
    let issued = resets.request_reset("AB12345").await.unwrap();
    reject_password_stamps(&app).await;

    let result = resets.reset_with_token(token_reset(&issued.token, NEW_PASSWORD)).await;
    assert!(result.success, "{result:?}");
    let details = result.details.unwrap();
    assert_eq!(details["password_change_recorded"], json!(false));
    assert_eq!(details["sessions_invalidated"], json!(1));

    assert_eq!(app.provider.password_of(&app.identifier(&member)).as_deref(), Some(NEW_PASSWORD));
    let ended = app.core.sessions.get(&session.id).await.unwrap().unwrap();
    assert!(!ended.active);
    assert_eq!(ended.invalidation_reason, Some(InvalidationReason::PasswordChanged));
    assert_eq!(
        resets.validate_reset_token(&issued.token).await.unwrap(),
        ResetTokenStatus::Consumed
    );
    assert!(app.reload(&member).await.password_changed_at.is_none());
}

#[tokio::test]
async fn integration_self_service_change_commits_when_member_record_update_fails() {
    let app = setup().await;
    let resets = &app.core.resets;
    let member = app.add_member("AB12345", PASSWORD).await;
    let kept = sign_in(&app).await;
    let other = sign_in(&app).await;
    reject_password_stamps(&app).await;

    let request = change(PASSWORD, NEW_PASSWORD, NEW_PASSWORD);
    let result = resets.change_password(&member.id, Some(&kept.id), request).await;
    assert!(result.success, "{result:?}");
    let details = result.details.unwrap();
    assert_eq!(details["password_change_recorded"], json!(false));
    assert_eq!(details["sessions_invalidated"], json!(1));
    assert!(!app.core.sessions.get(&other.id).await.unwrap().unwrap().active);
    assert!(app.core.sessions.get(&kept.id).await.unwrap().unwrap().active);
}

#[tokio::test]
async fn integration_timed_out_update_keeps_token_spent() {
    let app = setup_with(AuthConfig {
        call_timeout_seconds: 1,
        reset_max_attempts: 2,
        ..test_config()
    })
    .await;
    let resets = &app.core.resets;
    let member = app.add_member("AB12345", PASSWORD).await;
    let issued = resets.request_reset("AB12345").await.unwrap();

    // The provider applies the password but never answers in time
    app.provider.stall_next_updates(2);
    let result = resets.reset_with_token(token_reset(&issued.token, NEW_PASSWORD)).await;
    assert!(!result.success);
    assert_eq!(result.code.as_deref(), Some("TRANSIENT_BACKEND_ERROR"));

    assert_eq!(
        resets.validate_reset_token(&issued.token).await.unwrap(),
        ResetTokenStatus::Consumed
    );
    let second = resets.reset_with_token(token_reset(&issued.token, "Other3Pass$")).await;
    assert!(!second.success);
    assert_eq!(second.code.as_deref(), Some("ALREADY_CONSUMED"));

    let applied = app.provider.applied_updates();
    assert!(applied.iter().all(|p| p == NEW_PASSWORD), "{applied:?}");
    assert_eq!(app.provider.password_of(&app.identifier(&member)).as_deref(), Some(NEW_PASSWORD));
}
