use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::instrument;

use crate::config::AuthConfig;
use crate::entity::user;
use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::{AuthUser, MaybeUser};
use crate::extractors::json::AppJson;
use crate::models::auth::{
    ChangePasswordRequest, LoginRequest, LoginResponse, OAuthCallbackQuery, RegisterRequest,
    UpdateMeRequest, validate_display_name, validate_login_request, validate_password,
    validate_register_request,
};
use crate::models::user::UserResponse;
use crate::services::ProfileChanges;
use crate::state::AppState;
use crate::utils::oauth::generate_state;

const OAUTH_STATE_COOKIE: &str = "oauth_state";

/// Cookie carrying the session token: `Bearer <token>`, HTTP-only, SameSite=Lax.
fn session_cookie(auth: &AuthConfig, token: &str) -> Cookie<'static> {
    Cookie::build((auth.cookie_name.clone(), format!("Bearer {token}")))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(auth.cookie_secure)
        .path("/")
        .max_age(time::Duration::minutes(auth.token_ttl_minutes))
        .build()
}

/// Expired counterpart of [`session_cookie`], sent whether or not the request carried one.
fn cleared_session_cookie(auth: &AuthConfig) -> Cookie<'static> {
    Cookie::build((auth.cookie_name.clone(), ""))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(auth.cookie_secure)
        .path("/")
        .max_age(time::Duration::ZERO)
        .build()
}

/// Issue a token for `user` and attach it to the jar.
fn start_session(
    state: &AppState,
    jar: CookieJar,
    user: user::Model,
) -> Result<(CookieJar, Json<LoginResponse>), AppError> {
    let token = state.tokens.sign(user.id)?;
    let jar = jar.add(session_cookie(&state.config.auth, &token));
    Ok((
        jar,
        Json(LoginResponse {
            token,
            token_type: "bearer",
            expires_in: state.tokens.default_ttl().num_seconds(),
            user: UserResponse::from(user),
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/register",
    tag = "Auth",
    operation_id = "register",
    summary = "Register a new account",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = UserResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 409, description = "Email already registered (EMAIL_TAKEN)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_register_request(&payload)?;

    let user = state
        .users()
        .create_local(&payload.email, &payload.display_name, &payload.password)
        .await?;

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

#[utoipa::path(
    post,
    path = "/login",
    tag = "Auth",
    operation_id = "login",
    summary = "Log in with email and password",
    description = "Returns a bearer token and also sets it as an HTTP-only cookie.",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Invalid credentials (INVALID_CREDENTIALS)", body = ErrorBody),
        (status = 403, description = "Account inactive (ACCOUNT_INACTIVE)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_login_request(&payload)?;

    let user = state
        .users()
        .authenticate(&payload.email, &payload.password)
        .await?;

    tracing::info!(user_id = user.id, "User logged in");
    start_session(&state, jar, user)
}

#[utoipa::path(
    post,
    path = "/logout",
    tag = "Auth",
    operation_id = "logout",
    summary = "Clear the session cookie",
    description = "Tokens are stateless: an already issued token stays valid until it expires.",
    responses((status = 204, description = "Cookie cleared")),
)]
#[instrument(skip(state, caller, jar))]
pub async fn logout(
    State(state): State<AppState>,
    caller: MaybeUser,
    jar: CookieJar,
) -> impl IntoResponse {
    if let MaybeUser(Some(user)) = caller {
        tracing::info!(user_id = user.id, "User logged out");
    }
    let jar = jar.add(cleared_session_cookie(&state.config.auth));
    (jar, StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/me",
    tag = "Auth",
    operation_id = "getMe",
    summary = "Current user's profile",
    responses(
        (status = 200, description = "Profile", body = UserResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(auth_user), fields(user_id = auth_user.user_id()))]
pub async fn me(auth_user: AuthUser) -> Json<UserResponse> {
    Json(UserResponse::from(auth_user.user))
}

#[utoipa::path(
    patch,
    path = "/me",
    tag = "Auth",
    operation_id = "updateMe",
    summary = "Update the current user's display name",
    request_body = UpdateMeRequest,
    responses(
        (status = 200, description = "Updated profile", body = UserResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(user_id = auth_user.user_id()))]
pub async fn update_me(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppJson(payload): AppJson<UpdateMeRequest>,
) -> Result<Json<UserResponse>, AppError> {
    validate_display_name(&payload.display_name)?;

    let user = state
        .users()
        .update_profile(
            auth_user.actor(),
            auth_user.user_id(),
            ProfileChanges {
                display_name: Some(payload.display_name),
                email: None,
            },
        )
        .await?;

    Ok(Json(UserResponse::from(user)))
}

#[utoipa::path(
    post,
    path = "/me/password",
    tag = "Auth",
    operation_id = "changePassword",
    summary = "Change the current user's password",
    description = "`current_password` is required when the account already has one.",
    request_body = ChangePasswordRequest,
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Wrong current password (INVALID_CREDENTIALS)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(user_id = auth_user.user_id()))]
pub async fn change_password(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppJson(payload): AppJson<ChangePasswordRequest>,
) -> Result<StatusCode, AppError> {
    validate_password(&payload.new_password)?;

    state
        .users()
        .change_password(
            auth_user.user_id(),
            payload.current_password.as_deref(),
            &payload.new_password,
        )
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/oauth/login",
    tag = "Auth",
    operation_id = "oauthLogin",
    summary = "Start external login",
    description = "Redirects to the identity provider. Returns 404 when external login is not configured.",
    responses(
        (status = 303, description = "Redirect to the provider"),
        (status = 404, description = "External login disabled (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, jar))]
pub async fn oauth_login(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let provider = state
        .identity_provider
        .as_ref()
        .ok_or_else(|| AppError::NotFound("External login is not configured".into()))?;

    let oauth_state = generate_state();
    let url = provider
        .authorization_url(&oauth_state)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let cookie = Cookie::build((OAUTH_STATE_COOKIE, oauth_state))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.auth.cookie_secure)
        .path("/")
        .max_age(time::Duration::minutes(10))
        .build();

    Ok((jar.add(cookie), Redirect::to(&url)))
}

#[utoipa::path(
    get,
    path = "/oauth/callback",
    tag = "Auth",
    operation_id = "oauthCallback",
    summary = "Finish external login",
    params(OAuthCallbackQuery),
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 400, description = "Missing code or state mismatch (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Provider rejected the code (INVALID_CREDENTIALS)", body = ErrorBody),
        (status = 403, description = "Account inactive (ACCOUNT_INACTIVE)", body = ErrorBody),
        (status = 404, description = "External login disabled (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, jar, query))]
pub async fn oauth_callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<OAuthCallbackQuery>,
) -> Result<impl IntoResponse, AppError> {
    let provider = state
        .identity_provider
        .clone()
        .ok_or_else(|| AppError::NotFound("External login is not configured".into()))?;

    if let Some(error) = query.error {
        tracing::info!(%error, "Provider reported an error");
        return Err(AppError::InvalidCredentials);
    }

    let expected = jar.get(OAUTH_STATE_COOKIE).map(|c| c.value().to_string());
    let jar = jar.remove(Cookie::build(OAUTH_STATE_COOKIE).path("/"));
    match (expected, query.state.as_deref()) {
        (Some(expected), Some(got)) if expected == got => {}
        _ => return Err(AppError::Validation("OAuth state mismatch".into())),
    }

    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::Validation("Missing authorization code".into()))?;

    let identity = provider.exchange_code(&code).await.map_err(|e| {
        tracing::warn!("OAuth code exchange failed: {}", e);
        AppError::InvalidCredentials
    })?;

    let user = state
        .users()
        .create_from_external_identity(
            &identity.email,
            identity.name.as_deref().unwrap_or_default(),
            &identity.sub,
        )
        .await?;

    tracing::info!(user_id = user.id, "User logged in via external identity");
    start_session(&state, jar, user)
}
