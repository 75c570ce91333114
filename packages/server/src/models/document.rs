use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::shared::{Pagination, double_option};
use crate::entity::document;

/// Stored document metadata. The storage key is deliberately absent.
#[derive(Serialize, utoipa::ToSchema)]
pub struct DocumentResponse {
    #[schema(example = 7)]
    pub id: i32,
    #[schema(example = 42)]
    pub owner_id: i32,
    #[schema(example = "notes.txt")]
    pub filename: String,
    /// Size in bytes.
    #[schema(example = 11)]
    pub size: i64,
    #[schema(example = "text/plain")]
    pub content_type: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<document::Model> for DocumentResponse {
    fn from(model: document::Model) -> Self {
        Self {
            id: model.id,
            owner_id: model.owner_id,
            filename: model.filename,
            size: model.size,
            content_type: model.content_type,
            title: model.title,
            description: model.description,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct DocumentListResponse {
    pub data: Vec<DocumentResponse>,
    pub pagination: Pagination,
}

/// JSON metadata edit. Send `null` to clear a field.
#[derive(Deserialize, Default, utoipa::ToSchema)]
pub struct UpdateDocumentRequest {
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub title: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
}

/// Query for the admin document listing.
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct AdminDocumentQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    /// Restrict to one owner.
    pub owner_id: Option<i32>,
}
