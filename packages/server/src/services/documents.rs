use std::time::Duration;

use chrono::Utc;
use common::StorageConfig;
use common::storage::{BlobStore, BoxReader, StorageError, StorageKey};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionSession, TransactionTrait,
};
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};

use super::{Actor, clean_text, page_offset};
use crate::entity::document;
use crate::error::AppError;
use crate::utils::filename::{check_extension, resolve_content_type, validate_flat_filename};

pub const MAX_TITLE_CHARS: usize = 256;
pub const MAX_DESCRIPTION_CHARS: usize = 4096;

/// Incoming file content plus the client-declared metadata that travels with it.
pub struct Upload {
    pub filename: String,
    pub content_type: Option<String>,
    pub reader: BoxReader,
}

impl Upload {
    pub fn from_bytes(filename: &str, content_type: Option<&str>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.to_string(),
            content_type: content_type.map(str::to_string),
            reader: Box::new(std::io::Cursor::new(bytes)),
        }
    }
}

/// Metadata edits. `None` leaves a field unchanged, `Some(None)` clears it.
#[derive(Debug, Default, Clone)]
pub struct DocumentChanges {
    pub title: Option<Option<String>>,
    pub description: Option<Option<String>>,
}

/// How a document's bytes reach the client.
pub enum Content {
    /// The backend issued a temporary URL to fetch from directly.
    Redirect(String),
    /// The bytes are streamed through this process.
    Stream(BoxReader),
}

/// Blob written for a document that has not been committed to the database yet.
struct PendingBlob {
    key: StorageKey,
    size: u64,
    filename: String,
    content_type: String,
}

/// Document metadata scoped to owners, kept in step with the blob store.
///
/// Blob writes happen outside any database transaction. When the metadata
/// step that follows fails, the freshly written blob is deleted again.
pub struct DocumentRegistry<'a, C: ConnectionTrait + TransactionTrait> {
    conn: &'a C,
    blobs: &'a dyn BlobStore,
    policy: &'a StorageConfig,
}

impl<'a, C: ConnectionTrait + TransactionTrait> DocumentRegistry<'a, C> {
    pub fn new(conn: &'a C, blobs: &'a dyn BlobStore, policy: &'a StorageConfig) -> Self {
        Self {
            conn,
            blobs,
            policy,
        }
    }

    fn validate_file(&self, filename: &str) -> Result<String, AppError> {
        let filename =
            validate_flat_filename(filename).map_err(|e| AppError::Validation(e.message().into()))?;
        check_extension(filename, &self.policy.allowed_extensions)
            .map_err(|e| AppError::Validation(e.message().into()))?;
        Ok(filename.to_string())
    }

    /// Validate and write the content under a fresh key.
    async fn write_blob(&self, upload: Upload) -> Result<PendingBlob, AppError> {
        let filename = self.validate_file(&upload.filename)?;
        let content_type = resolve_content_type(upload.content_type.as_deref(), &filename);
        let limit = self.policy.max_upload_size;

        let mut key = StorageKey::generate();
        if self.blobs.exists(&key).await? {
            key = StorageKey::generate();
        }

        // One byte past the limit is enough to tell an oversized upload apart.
        let reader: BoxReader = Box::new(upload.reader.take(limit.saturating_add(1)));
        let size = match self.blobs.put_stream(&key, reader).await {
            Ok(size) => size,
            Err(StorageError::AlreadyExists(_)) => {
                return Err(AppError::Conflict(
                    "Storage key collision, please retry".into(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        if size > limit {
            self.discard_blob(&key, "oversized upload").await;
            return Err(AppError::PayloadTooLarge { limit });
        }

        Ok(PendingBlob {
            key,
            size,
            filename,
            content_type,
        })
    }

    /// Compensating delete for a blob whose metadata was never committed.
    async fn discard_blob(&self, key: &StorageKey, reason: &str) {
        if let Err(e) = self.blobs.delete(key).await {
            error!(
                storage_key = %key,
                reason,
                error = %e,
                "Compensating blob delete failed, blob is orphaned"
            );
        }
    }

    /// Store a new document owned by `actor`.
    pub async fn upload(
        &self,
        actor: Actor,
        upload: Upload,
        title: Option<String>,
        description: Option<String>,
    ) -> Result<document::Model, AppError> {
        let title = clean_text(title, MAX_TITLE_CHARS, "Title")?;
        let description = clean_text(description, MAX_DESCRIPTION_CHARS, "Description")?;

        let blob = self.write_blob(upload).await?;

        let now = Utc::now();
        let model = document::ActiveModel {
            owner_id: Set(actor.user_id),
            filename: Set(blob.filename),
            storage_key: Set(blob.key.to_string()),
            size: Set(i64::try_from(blob.size).unwrap_or(i64::MAX)),
            content_type: Set(blob.content_type),
            title: Set(title),
            description: Set(description),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        match model.insert(self.conn).await {
            Ok(doc) => {
                info!(
                    document_id = doc.id,
                    owner_id = actor.user_id,
                    size = doc.size,
                    "Document uploaded"
                );
                Ok(doc)
            }
            Err(e) => {
                warn!(
                    owner_id = actor.user_id,
                    storage_key = %blob.key,
                    error = %e,
                    "Document insert failed, removing blob"
                );
                self.discard_blob(&blob.key, "insert failed").await;
                if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                    Err(AppError::Conflict("Storage key collision, please retry".into()))
                } else {
                    Err(e.into())
                }
            }
        }
    }

    /// Convenience wrapper around [`Self::upload`] for in-memory content.
    pub async fn upload_bytes(
        &self,
        actor: Actor,
        filename: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<document::Model, AppError> {
        let limit = self.policy.max_upload_size;
        if bytes.len() as u64 > limit {
            return Err(AppError::PayloadTooLarge { limit });
        }
        self.upload(
            actor,
            Upload::from_bytes(filename, content_type, bytes),
            None,
            None,
        )
        .await
    }

    async fn find(&self, id: i32) -> Result<document::Model, AppError> {
        document::Entity::find_by_id(id)
            .one(self.conn)
            .await?
            .ok_or_else(|| AppError::NotFound("Document not found".into()))
    }

    /// Fetch metadata. Owner or admin; anyone else gets `PermissionDenied`.
    pub async fn get(&self, actor: Actor, id: i32) -> Result<document::Model, AppError> {
        let doc = self.find(id).await?;
        if !actor.can_manage(doc.owner_id) {
            return Err(AppError::PermissionDenied);
        }
        Ok(doc)
    }

    /// Edit metadata and optionally swap the content. Owner only.
    ///
    /// New content is written under a new key before the row is switched over.
    /// The old blob is deleted only after the switch committed.
    pub async fn replace(
        &self,
        actor: Actor,
        id: i32,
        changes: DocumentChanges,
        content: Option<Upload>,
    ) -> Result<document::Model, AppError> {
        let doc = self.find(id).await?;
        if doc.owner_id != actor.user_id {
            return Err(AppError::PermissionDenied);
        }

        let title = changes
            .title
            .map(|t| clean_text(t, MAX_TITLE_CHARS, "Title"))
            .transpose()?;
        let description = changes
            .description
            .map(|d| clean_text(d, MAX_DESCRIPTION_CHARS, "Description"))
            .transpose()?;

        let pending = match content {
            Some(upload) => Some(self.write_blob(upload).await?),
            None => None,
        };

        match self.switch_row(id, title, description, pending.as_ref()).await {
            Ok((updated, old_key)) => {
                if let (Some(_), Some(old_key)) = (&pending, old_key) {
                    self.delete_blob_logged(actor, id, &old_key, "replace").await;
                }
                info!(
                    document_id = id,
                    owner_id = actor.user_id,
                    content_replaced = pending.is_some(),
                    "Document updated"
                );
                Ok(updated)
            }
            Err(e) => {
                if let Some(blob) = &pending {
                    warn!(
                        document_id = id,
                        storage_key = %blob.key,
                        "Document update failed, removing new blob"
                    );
                    self.discard_blob(&blob.key, "update failed").await;
                }
                Err(e)
            }
        }
    }

    /// Apply the row update in a transaction. Returns the old key when the content moved.
    async fn switch_row(
        &self,
        id: i32,
        title: Option<Option<String>>,
        description: Option<Option<String>>,
        pending: Option<&PendingBlob>,
    ) -> Result<(document::Model, Option<StorageKey>), AppError> {
        let txn = self.conn.begin().await?;

        let current = document::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound("Document not found".into()))?;
        let old_key = current.storage_key.clone();

        let mut active = current.into_active_model();
        if let Some(title) = title {
            active.title = Set(title);
        }
        if let Some(description) = description {
            active.description = Set(description);
        }
        if let Some(blob) = pending {
            active.filename = Set(blob.filename.clone());
            active.content_type = Set(blob.content_type.clone());
            active.size = Set(i64::try_from(blob.size).unwrap_or(i64::MAX));
            active.storage_key = Set(blob.key.to_string());
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(&txn).await?;
        txn.commit().await?;

        // The row already points at the new blob, so a bad old key only orphans it.
        let old_key = match pending {
            Some(_) => match StorageKey::parse(&old_key) {
                Ok(key) => Some(key),
                Err(e) => {
                    error!(document_id = id, error = %e, "Previous storage key is malformed");
                    None
                }
            },
            None => None,
        };
        Ok((updated, old_key))
    }

    async fn delete_blob_logged(&self, actor: Actor, id: i32, key: &StorageKey, op: &str) {
        if let Err(e) = self.blobs.delete(key).await {
            error!(
                op,
                actor_id = actor.user_id,
                document_id = id,
                storage_key = %key,
                error = %e,
                "Blob delete failed"
            );
        }
    }

    /// Delete a document. Owner or admin.
    ///
    /// The blob goes first. If that fails the row is still removed and the
    /// failure is logged, so a missing blob never leaves a stuck record.
    pub async fn delete(&self, actor: Actor, id: i32) -> Result<(), AppError> {
        let doc = self.find(id).await?;
        if !actor.can_manage(doc.owner_id) {
            return Err(AppError::PermissionDenied);
        }

        match StorageKey::parse(&doc.storage_key) {
            Ok(key) => self.delete_blob_logged(actor, id, &key, "delete").await,
            Err(e) => error!(document_id = id, error = %e, "Stored storage key is malformed"),
        }

        document::Entity::delete_by_id(id).exec(self.conn).await?;
        info!(
            document_id = id,
            actor_id = actor.user_id,
            owner_id = doc.owner_id,
            "Document deleted"
        );
        Ok(())
    }

    /// All documents of `owner_id`, oldest first.
    pub async fn list_for_user(&self, owner_id: i32) -> Result<Vec<document::Model>, AppError> {
        Ok(document::Entity::find()
            .filter(document::Column::OwnerId.eq(owner_id))
            .order_by_asc(document::Column::CreatedAt)
            .order_by_asc(document::Column::Id)
            .all(self.conn)
            .await?)
    }

    /// One page of documents, oldest first, optionally restricted to an owner.
    pub async fn page(
        &self,
        owner_id: Option<i32>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<document::Model>, u64), AppError> {
        let mut query = document::Entity::find();
        if let Some(owner_id) = owner_id {
            query = query.filter(document::Column::OwnerId.eq(owner_id));
        }

        let total = query.clone().count(self.conn).await?;
        let docs = query
            .order_by_asc(document::Column::CreatedAt)
            .order_by_asc(document::Column::Id)
            .offset(page_offset(page, per_page))
            .limit(per_page)
            .all(self.conn)
            .await?;

        Ok((docs, total))
    }

    /// Page through every user's documents. Admin only.
    pub async fn list_all(
        &self,
        actor: Actor,
        owner_id: Option<i32>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<document::Model>, u64), AppError> {
        actor.require_admin()?;
        self.page(owner_id, page, per_page).await
    }

    /// Resolve how to deliver a document's content.
    pub async fn open_content(
        &self,
        actor: Actor,
        id: i32,
    ) -> Result<(document::Model, Content), AppError> {
        let doc = self.get(actor, id).await?;
        let key = StorageKey::parse(&doc.storage_key)?;

        let ttl = Duration::from_secs(self.policy.signed_url_ttl_secs);
        if let Some(url) = self.blobs.signed_url(&key, ttl).await? {
            return Ok((doc, Content::Redirect(url)));
        }

        let reader = self.blobs.get_stream(&key).await?;
        Ok((doc, Content::Stream(reader)))
    }

    /// Read a document's full content into memory.
    pub async fn download(
        &self,
        actor: Actor,
        id: i32,
    ) -> Result<(document::Model, Vec<u8>), AppError> {
        let doc = self.get(actor, id).await?;
        let key = StorageKey::parse(&doc.storage_key)?;
        let bytes = self.blobs.get(&key).await?;
        Ok((doc, bytes))
    }
}

/// Delete every blob owned by `owner_id`, returning how many documents were affected.
///
/// Individual failures are logged and skipped; the caller removes the rows.
pub(crate) async fn purge_owner_blobs<C: ConnectionTrait>(
    conn: &C,
    blobs: &dyn BlobStore,
    owner_id: i32,
) -> Result<usize, AppError> {
    let docs = document::Entity::find()
        .filter(document::Column::OwnerId.eq(owner_id))
        .all(conn)
        .await?;

    for doc in &docs {
        let deleted = match StorageKey::parse(&doc.storage_key) {
            Ok(key) => blobs.delete(&key).await,
            Err(e) => Err(e),
        };
        if let Err(e) = deleted {
            error!(
                owner_id,
                document_id = doc.id,
                error = %e,
                "Blob delete failed during owner purge"
            );
        }
    }

    Ok(docs.len())
}
