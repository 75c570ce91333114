use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::instrument;

use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::AdminUser;
use crate::extractors::json::AppJson;
use crate::models::auth::{validate_display_name, validate_email, validate_password};
use crate::models::document::{AdminDocumentQuery, DocumentListResponse, DocumentResponse};
use crate::models::shared::{PageQuery, Pagination};
use crate::models::user::{
    AdminUpdateUserRequest, SetActiveRequest, SetAdminRequest, UserListResponse, UserResponse,
};
use crate::services::ProfileChanges;
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/users",
    tag = "Admin",
    operation_id = "listUsers",
    summary = "List all users",
    params(PageQuery),
    responses(
        (status = 200, description = "User page", body = UserListResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, admin, query), fields(admin_id = admin.user_id()))]
pub async fn list_users(
    admin: AdminUser,
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<UserListResponse>, AppError> {
    let (page, per_page) = query.resolve();
    let (users, total) = state.users().list(admin.actor(), page, per_page).await?;

    Ok(Json(UserListResponse {
        data: users.into_iter().map(UserResponse::from).collect(),
        pagination: Pagination::new(page, per_page, total),
    }))
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "Admin",
    operation_id = "getUser",
    summary = "Get a user",
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "User", body = UserResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "User not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, admin), fields(admin_id = admin.user_id()))]
pub async fn get_user(
    admin: AdminUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state.users().get(id).await?;
    Ok(Json(UserResponse::from(user)))
}

#[utoipa::path(
    patch,
    path = "/users/{id}",
    tag = "Admin",
    operation_id = "updateUser",
    summary = "Edit a user's profile or password",
    params(("id" = i32, Path, description = "User ID")),
    request_body = AdminUpdateUserRequest,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "User not found (NOT_FOUND)", body = ErrorBody),
        (status = 409, description = "Email already registered (EMAIL_TAKEN)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, admin, payload), fields(admin_id = admin.user_id()))]
pub async fn update_user(
    admin: AdminUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    AppJson(payload): AppJson<AdminUpdateUserRequest>,
) -> Result<Json<UserResponse>, AppError> {
    if let Some(name) = &payload.display_name {
        validate_display_name(name)?;
    }
    if let Some(email) = &payload.email {
        validate_email(email)?;
    }
    if let Some(password) = &payload.password {
        validate_password(password)?;
    }

    let user = state
        .users()
        .update_user(
            admin.actor(),
            id,
            ProfileChanges {
                display_name: payload.display_name,
                email: payload.email,
            },
            payload.password.as_deref(),
        )
        .await?;

    Ok(Json(UserResponse::from(user)))
}

#[utoipa::path(
    put,
    path = "/users/{id}/active",
    tag = "Admin",
    operation_id = "setUserActive",
    summary = "Activate or deactivate a user",
    description = "Admin accounts cannot be deactivated.",
    params(("id" = i32, Path, description = "User ID")),
    request_body = SetActiveRequest,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED, PROTECTED_ACCOUNT)", body = ErrorBody),
        (status = 404, description = "User not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, admin, payload), fields(admin_id = admin.user_id()))]
pub async fn set_user_active(
    admin: AdminUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    AppJson(payload): AppJson<SetActiveRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state
        .users()
        .set_active(admin.actor(), id, payload.is_active)
        .await?;
    Ok(Json(UserResponse::from(user)))
}

#[utoipa::path(
    put,
    path = "/users/{id}/admin",
    tag = "Admin",
    operation_id = "setUserAdmin",
    summary = "Grant or revoke admin",
    description = "An admin cannot revoke their own admin flag.",
    params(("id" = i32, Path, description = "User ID")),
    request_body = SetAdminRequest,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED, PROTECTED_ACCOUNT)", body = ErrorBody),
        (status = 404, description = "User not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, admin, payload), fields(admin_id = admin.user_id()))]
pub async fn set_user_admin(
    admin: AdminUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    AppJson(payload): AppJson<SetAdminRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state
        .users()
        .set_admin(admin.actor(), id, payload.is_admin)
        .await?;
    Ok(Json(UserResponse::from(user)))
}

#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "Admin",
    operation_id = "deleteUser",
    summary = "Delete a user and all of their documents",
    description = "Admin accounts cannot be deleted.",
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED, PROTECTED_ACCOUNT)", body = ErrorBody),
        (status = 404, description = "User not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, admin), fields(admin_id = admin.user_id()))]
pub async fn delete_user(
    admin: AdminUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    state.users().delete(admin.actor(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/documents",
    tag = "Admin",
    operation_id = "listAllDocuments",
    summary = "List every user's documents",
    params(AdminDocumentQuery),
    responses(
        (status = 200, description = "Document page", body = DocumentListResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, admin, query), fields(admin_id = admin.user_id()))]
pub async fn list_all_documents(
    admin: AdminUser,
    State(state): State<AppState>,
    Query(query): Query<AdminDocumentQuery>,
) -> Result<Json<DocumentListResponse>, AppError> {
    let (page, per_page) = PageQuery {
        page: query.page,
        per_page: query.per_page,
    }
    .resolve();

    let (docs, total) = state
        .documents()
        .list_all(admin.actor(), query.owner_id, page, per_page)
        .await?;

    Ok(Json(DocumentListResponse {
        data: docs.into_iter().map(DocumentResponse::from).collect(),
        pagination: Pagination::new(page, per_page, total),
    }))
}

#[utoipa::path(
    delete,
    path = "/documents/{id}",
    tag = "Admin",
    operation_id = "deleteAnyDocument",
    summary = "Delete any user's document",
    params(("id" = i32, Path, description = "Document ID")),
    responses(
        (status = 204, description = "Document deleted"),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Document not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, admin), fields(admin_id = admin.user_id()))]
pub async fn delete_any_document(
    admin: AdminUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    state.documents().delete(admin.actor(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}
