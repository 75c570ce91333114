use crate::error::AppError;
use serde::{Deserialize, Serialize};

use super::user::UserResponse;

/// Request body for user registration.
#[derive(Deserialize, utoipa::ToSchema)]
pub struct RegisterRequest {
    /// Email address, unique case-insensitively.
    #[schema(example = "a@example.com")]
    pub email: String,
    /// Name shown in the UI (1-100 chars).
    #[schema(example = "Alice")]
    pub display_name: String,
    /// Password (8-128 characters).
    #[schema(example = "secret123")]
    pub password: String,
}

pub fn validate_email(email: &str) -> Result<(), AppError> {
    let email = email.trim();
    let valid = email.len() <= 254
        && !email.chars().any(char::is_whitespace)
        && matches!(email.split_once('@'), Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.'));
    if !valid {
        return Err(AppError::Validation("Invalid email address".into()));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), AppError> {
    if password.len() < 8 || password.len() > 128 {
        return Err(AppError::Validation(
            "Password must be 8-128 characters".into(),
        ));
    }
    Ok(())
}

pub fn validate_display_name(name: &str) -> Result<(), AppError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > 100 {
        return Err(AppError::Validation(
            "Display name must be 1-100 characters".into(),
        ));
    }
    Ok(())
}

pub fn validate_register_request(payload: &RegisterRequest) -> Result<(), AppError> {
    validate_email(&payload.email)?;
    validate_display_name(&payload.display_name)?;
    validate_password(&payload.password)
}

/// Request body for user login.
#[derive(Deserialize, utoipa::ToSchema)]
pub struct LoginRequest {
    #[schema(example = "a@example.com")]
    pub email: String,
    #[schema(example = "secret123")]
    pub password: String,
}

pub fn validate_login_request(payload: &LoginRequest) -> Result<(), AppError> {
    if payload.email.trim().is_empty() {
        return Err(AppError::Validation("Email must not be empty".into()));
    }
    if payload.password.is_empty() {
        return Err(AppError::Validation("Password must not be empty".into()));
    }
    Ok(())
}

/// Successful login response. The token is also set as an HTTP-only cookie.
#[derive(Serialize, utoipa::ToSchema)]
pub struct LoginResponse {
    /// JWT bearer token.
    #[schema(example = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9...")]
    pub token: String,
    #[schema(example = "bearer")]
    pub token_type: &'static str,
    /// Token lifetime in seconds.
    #[schema(example = 1800)]
    pub expires_in: i64,
    pub user: UserResponse,
}

/// Request body for `PATCH /auth/me`.
#[derive(Deserialize, utoipa::ToSchema)]
pub struct UpdateMeRequest {
    #[schema(example = "Alice W.")]
    pub display_name: String,
}

/// Request body for `POST /auth/me/password`.
#[derive(Deserialize, utoipa::ToSchema)]
pub struct ChangePasswordRequest {
    /// Required when the account already has a password.
    pub current_password: Option<String>,
    pub new_password: String,
}

/// Query string of the OAuth callback.
#[derive(Deserialize, utoipa::IntoParams)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by the provider when the user declined.
    pub error: Option<String>,
}
