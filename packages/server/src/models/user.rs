use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::shared::Pagination;
use crate::entity::user;

/// Public view of a user. Never includes the password credential.
#[derive(Serialize, utoipa::ToSchema)]
pub struct UserResponse {
    #[schema(example = 42)]
    pub id: i32,
    #[schema(example = "a@example.com")]
    pub email: String,
    #[schema(example = "Alice")]
    pub display_name: String,
    pub is_active: bool,
    pub is_admin: bool,
    /// Whether the account can sign in with a password.
    pub has_password: bool,
    /// Whether an external identity is linked.
    pub has_external_identity: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<user::Model> for UserResponse {
    fn from(model: user::Model) -> Self {
        Self {
            id: model.id,
            email: model.email,
            display_name: model.display_name,
            is_active: model.is_active,
            is_admin: model.is_admin,
            has_password: model.password_hash.is_some(),
            has_external_identity: model.external_id.is_some(),
            created_at: model.created_at,
            updated_at: model.updated_at,
            last_login_at: model.last_login_at,
        }
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct UserListResponse {
    pub data: Vec<UserResponse>,
    pub pagination: Pagination,
}

/// Admin edit of a user. Absent fields are left unchanged.
#[derive(Deserialize, Default, utoipa::ToSchema)]
pub struct AdminUpdateUserRequest {
    pub display_name: Option<String>,
    pub email: Option<String>,
    /// New password (8-128 chars). The user is not asked for the old one.
    pub password: Option<String>,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct SetActiveRequest {
    pub is_active: bool,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct SetAdminRequest {
    pub is_admin: bool,
}
