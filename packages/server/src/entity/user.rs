use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Trimmed and lower-cased on write.
    #[sea_orm(unique)]
    pub email: String,
    pub display_name: String,

    /// PHC-encoded Argon2id hash. `None` for accounts that only sign in externally.
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,

    pub is_active: bool,
    pub is_admin: bool,

    /// OAuth subject of a linked external identity.
    #[sea_orm(unique)]
    pub external_id: Option<String>,

    #[sea_orm(has_many)]
    pub documents: HasMany<super::document::Entity>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
    pub last_login_at: Option<DateTimeUtc>,
}

impl ActiveModelBehavior for ActiveModel {}
