//! Password policy checks.
//!
//! Pure functions with no I/O. Both the self-service and the token-based reset
//! paths run the same checks before anything is dispatched to a backend.

use std::borrow::Cow;
use std::fmt;
use validator::ValidationError;

use crate::errors::MemberAuthError;

/// Minimum password length requirement
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Maximum password length to bound hashing cost at the identity provider
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Characters that satisfy the special-character rule
pub const SPECIAL_CHARACTERS: &str = "!@#$%^&*(),.?\":{}|<>";

fn rule(code: &'static str, message: &'static str) -> ValidationError {
    ValidationError::new(code).with_message(Cow::Borrowed(message))
}

fn is_special(c: char) -> bool {
    SPECIAL_CHARACTERS.contains(c)
}

/// Every rule the password breaks, in policy order.
pub fn password_violations(password: &str) -> Vec<ValidationError> {
    let mut violations = Vec::new();
    let length = password.chars().count();

    if length < MIN_PASSWORD_LENGTH {
        violations.push(rule("password_too_short", "Password must be at least 8 characters long"));
    }
    if length > MAX_PASSWORD_LENGTH {
        violations.push(rule("password_too_long", "Password must be at most 128 characters long"));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        violations.push(rule(
            "password_missing_uppercase",
            "Password must contain at least one uppercase letter",
        ));
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        violations.push(rule(
            "password_missing_lowercase",
            "Password must contain at least one lowercase letter",
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        violations
            .push(rule("password_missing_digit", "Password must contain at least one number"));
    }
    if !password.chars().any(is_special) {
        violations.push(rule(
            "password_missing_special",
            "Password must contain at least one special character (!@#$%^&*(),.?\":{}|<>)",
        ));
    }

    violations
}

/// Validate password strength, reporting the first failing rule.
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    match password_violations(password).into_iter().next() {
        Some(violation) => Err(violation),
        None => Ok(()),
    }
}

/// Self-service password change form.
#[derive(Clone)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

impl fmt::Debug for ChangePasswordRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChangePasswordRequest { .. }")
    }
}

/// Token-based reset form.
#[derive(Clone)]
pub struct TokenResetRequest {
    pub token: String,
    pub new_password: String,
    pub confirm_password: String,
}

impl fmt::Debug for TokenResetRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenResetRequest { .. }")
    }
}

fn field_error(field: &str, error: ValidationError) -> MemberAuthError {
    let message = error
        .message
        .as_ref()
        .map(|m| m.to_string())
        .unwrap_or_else(|| format!("Invalid {}", field));
    MemberAuthError::validation_rule(message, field, error.code.to_string())
}

fn check_new_password(new_password: &str, confirm_password: &str) -> crate::errors::Result<()> {
    validate_password(new_password).map_err(|e| field_error("new_password", e))?;
    if new_password != confirm_password {
        return Err(field_error(
            "confirm_password",
            rule("password_mismatch", "Passwords do not match"),
        ));
    }
    Ok(())
}

/// Checks for the self-service form. The first failing rule wins.
pub fn check_change_request(request: &ChangePasswordRequest) -> crate::errors::Result<()> {
    if request.current_password.is_empty() {
        return Err(field_error(
            "current_password",
            rule("current_password_required", "Current password is required"),
        ));
    }
    check_new_password(&request.new_password, &request.confirm_password)
}

/// Checks for the token-based form, identical password rules.
pub fn check_token_reset_request(request: &TokenResetRequest) -> crate::errors::Result<()> {
    if request.token.trim().is_empty() {
        return Err(field_error("token", rule("token_required", "Reset token is required")));
    }
    check_new_password(&request.new_password, &request.confirm_password)
}
