use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use axum_extra::extract::cookie::CookieJar;

use crate::entity::user;
use crate::error::AppError;
use crate::services::Actor;
use crate::state::AppState;

/// Pull the bearer token out of a request.
///
/// The `Authorization: Bearer <token>` header wins over the cookie. Only the
/// preferred channel that is present is consulted: a bad header token is not
/// rescued by a good cookie. The cookie value may carry a `Bearer ` prefix.
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Result<Option<String>, AppError> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let value = value.to_str().map_err(|_| AppError::TokenInvalid)?;
        let token = value
            .strip_prefix("Bearer ")
            .ok_or(AppError::TokenInvalid)?
            .trim();
        if token.is_empty() {
            return Err(AppError::TokenInvalid);
        }
        return Ok(Some(token.to_string()));
    }

    let jar = CookieJar::from_headers(headers);
    if let Some(cookie) = jar.get(cookie_name) {
        let value = cookie.value();
        let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
        if token.is_empty() {
            return Err(AppError::TokenInvalid);
        }
        return Ok(Some(token.to_string()));
    }

    Ok(None)
}

/// Verify the request's token and load the active user it names.
pub async fn authenticate(headers: &HeaderMap, state: &AppState) -> Result<user::Model, AppError> {
    let token =
        extract_token(headers, &state.config.auth.cookie_name)?.ok_or(AppError::TokenMissing)?;

    let claims = state.tokens.verify(&token).map_err(|e| {
        tracing::debug!("Rejected token: {}", e);
        AppError::TokenInvalid
    })?;
    let user_id = claims.user_id()?;

    let user = state
        .users()
        .find(user_id)
        .await?
        .ok_or(AppError::TokenInvalid)?;

    if !user.is_active {
        return Err(AppError::AccountInactive);
    }
    Ok(user)
}

/// Resolve the caller without failing for anonymous requests.
///
/// Missing, invalid and expired credentials all yield `None`. Only backend
/// failures are errors.
pub async fn resolve_caller(
    headers: &HeaderMap,
    state: &AppState,
) -> Result<Option<user::Model>, AppError> {
    match authenticate(headers, state).await {
        Ok(user) => Ok(Some(user)),
        Err(e @ (AppError::Internal(_) | AppError::Storage(_))) => Err(e),
        Err(_) => Ok(None),
    }
}

/// Caller identity if a valid credential was presented.
pub struct MaybeUser(pub Option<user::Model>);

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(resolve_caller(&parts.headers, state).await?))
    }
}

/// Authenticated, active user.
///
/// Add this as a handler parameter to require authentication.
pub struct AuthUser {
    pub user: user::Model,
}

impl AuthUser {
    pub fn user_id(&self) -> i32 {
        self.user.id
    }

    pub fn actor(&self) -> Actor {
        Actor::from(&self.user)
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = authenticate(&parts.headers, state).await?;
        Ok(AuthUser { user })
    }
}

/// Authenticated user holding the admin flag. Non-admins get `PermissionDenied`.
pub struct AdminUser {
    pub user: user::Model,
}

impl AdminUser {
    pub fn user_id(&self) -> i32 {
        self.user.id
    }

    pub fn actor(&self) -> Actor {
        Actor::from(&self.user)
    }
}

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = authenticate(&parts.headers, state).await?;
        if !user.is_admin {
            return Err(AppError::PermissionDenied);
        }
        Ok(AdminUser { user })
    }
}
