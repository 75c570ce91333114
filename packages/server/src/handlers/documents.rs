use std::path::PathBuf;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::AuthUser;
use crate::extractors::json::AppJson;
use crate::models::document::{DocumentListResponse, DocumentResponse, UpdateDocumentRequest};
use crate::models::shared::{PageQuery, Pagination};
use crate::services::{Content, DocumentChanges, Upload};
use crate::state::AppState;
use crate::utils::filename::content_disposition_value;

/// Slack on top of the file limit for multipart framing and text fields.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn upload_body_limit(max_upload_size: u64) -> DefaultBodyLimit {
    let max = usize::try_from(max_upload_size).unwrap_or(usize::MAX);
    DefaultBodyLimit::max(max.saturating_add(MULTIPART_OVERHEAD))
}

/// A multipart file field spooled to a temp file.
pub(crate) struct SpooledFile {
    path: PathBuf,
    filename: String,
    content_type: Option<String>,
}

impl SpooledFile {
    async fn open(&self) -> Result<Upload, AppError> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to reopen temp file: {e}")))?;
        Ok(Upload {
            filename: self.filename.clone(),
            content_type: self.content_type.clone(),
            reader: Box::new(file),
        })
    }

    async fn cleanup(&self) {
        // Best effort.
        let _ = tokio::fs::remove_file(&self.path).await;
    }
}

/// Parsed upload form: a `file` field plus optional `title` and `description`.
#[derive(Default)]
pub(crate) struct UploadForm {
    file: Option<SpooledFile>,
    title: Option<String>,
    description: Option<String>,
}

impl UploadForm {
    async fn cleanup(&self) {
        if let Some(file) = &self.file {
            file.cleanup().await;
        }
    }
}

/// Stream a multipart field to a temp file, enforcing `max_size` while reading.
async fn spool_field(
    mut field: axum::extract::multipart::Field<'_>,
    max_size: u64,
) -> Result<SpooledFile, AppError> {
    let filename = field
        .file_name()
        .map(str::to_string)
        .ok_or_else(|| AppError::Validation("File field must have a filename".into()))?;
    let content_type = field.content_type().map(str::to_string);
    let path = std::env::temp_dir().join(format!("docvault-upload-{}", Uuid::new_v4()));

    let spooled = SpooledFile {
        path,
        filename,
        content_type,
    };

    let result = async {
        let mut temp_file = tokio::fs::File::create(&spooled.path)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to create temp file: {e}")))?;

        let mut total_size: u64 = 0;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| AppError::Validation(format!("Upload read error: {e}")))?
        {
            total_size += chunk.len() as u64;
            if total_size > max_size {
                return Err(AppError::PayloadTooLarge { limit: max_size });
            }
            temp_file
                .write_all(&chunk)
                .await
                .map_err(|e| AppError::Internal(format!("Temp file write failed: {e}")))?;
        }

        temp_file
            .flush()
            .await
            .map_err(|e| AppError::Internal(format!("Temp file flush failed: {e}")))?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => Ok(spooled),
        Err(e) => {
            spooled.cleanup().await;
            Err(e)
        }
    }
}

async fn read_text(field: axum::extract::multipart::Field<'_>, name: &str) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read {name}: {e}")))
}

pub(crate) async fn read_upload_form(
    multipart: &mut Multipart,
    max_size: u64,
) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();

    let result = async {
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::Validation(format!("Multipart error: {e}")))?
        {
            match field.name() {
                Some("file") => {
                    if form.file.is_some() {
                        return Err(AppError::Validation("Only one file per request".into()));
                    }
                    form.file = Some(spool_field(field, max_size).await?);
                }
                Some("title") => form.title = Some(read_text(field, "title").await?),
                Some("description") => {
                    form.description = Some(read_text(field, "description").await?)
                }
                _ => {} // Ignore unknown fields.
            }
        }
        Ok(())
    }
    .await;

    match result {
        Ok(()) => Ok(form),
        Err(e) => {
            form.cleanup().await;
            Err(e)
        }
    }
}

#[utoipa::path(
    post,
    path = "/",
    tag = "Documents",
    operation_id = "uploadDocument",
    summary = "Upload a document",
    description = "Multipart upload. The `file` field is required; `title` and `description` are optional.",
    request_body(content_type = "multipart/form-data", description = "File upload with optional title and description"),
    responses(
        (status = 201, description = "Document stored", body = DocumentResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 413, description = "File too large (PAYLOAD_TOO_LARGE)", body = ErrorBody),
        (status = 502, description = "Blob storage failure (STORAGE_ERROR)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, multipart), fields(user_id = auth_user.user_id()))]
pub async fn upload_document(
    auth_user: AuthUser,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let form = read_upload_form(&mut multipart, state.config.storage.max_upload_size).await?;

    let result = async {
        let file = form
            .file
            .as_ref()
            .ok_or_else(|| AppError::Validation("Missing 'file' field".into()))?;
        let upload = file.open().await?;
        state
            .documents()
            .upload(
                auth_user.actor(),
                upload,
                form.title.clone(),
                form.description.clone(),
            )
            .await
    }
    .await;
    form.cleanup().await;

    let doc = result?;
    Ok((StatusCode::CREATED, Json(DocumentResponse::from(doc))))
}

#[utoipa::path(
    get,
    path = "/",
    tag = "Documents",
    operation_id = "listDocuments",
    summary = "List the caller's documents",
    description = "Ordered by creation time, oldest first.",
    params(PageQuery),
    responses(
        (status = 200, description = "Document page", body = DocumentListResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, query), fields(user_id = auth_user.user_id()))]
pub async fn list_documents(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<DocumentListResponse>, AppError> {
    let (page, per_page) = query.resolve();
    let (docs, total) = state
        .documents()
        .page(Some(auth_user.user_id()), page, per_page)
        .await?;

    Ok(Json(DocumentListResponse {
        data: docs.into_iter().map(DocumentResponse::from).collect(),
        pagination: Pagination::new(page, per_page, total),
    }))
}

#[utoipa::path(
    get,
    path = "/{id}",
    tag = "Documents",
    operation_id = "getDocument",
    summary = "Get document metadata",
    params(("id" = i32, Path, description = "Document ID")),
    responses(
        (status = 200, description = "Document metadata", body = DocumentResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 404, description = "Not found or not yours (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(user_id = auth_user.user_id()))]
pub async fn get_document(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<DocumentResponse>, AppError> {
    let doc = state
        .documents()
        .get(auth_user.actor(), id)
        .await
        .map_err(|e| e.conceal_forbidden("Document"))?;

    Ok(Json(DocumentResponse::from(doc)))
}

#[utoipa::path(
    get,
    path = "/{id}/content",
    tag = "Documents",
    operation_id = "downloadDocument",
    summary = "Download document content",
    description = "Redirects to a temporary URL when the storage backend issues one, \
        otherwise streams the bytes with the original filename and content type.",
    params(("id" = i32, Path, description = "Document ID")),
    responses(
        (status = 200, description = "Document content"),
        (status = 307, description = "Redirect to a pre-signed URL"),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 404, description = "Not found or not yours (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(user_id = auth_user.user_id()))]
pub async fn download_document(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Response, AppError> {
    let (doc, content) = state
        .documents()
        .open_content(auth_user.actor(), id)
        .await
        .map_err(|e| e.conceal_forbidden("Document"))?;

    let reader = match content {
        Content::Redirect(url) => return Ok(Redirect::temporary(&url).into_response()),
        Content::Stream(reader) => reader,
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, &doc.content_type)
        .header(header::CONTENT_LENGTH, doc.size.to_string())
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition_value(&doc.filename),
        )
        .header(header::CACHE_CONTROL, "private, no-store")
        .body(Body::from_stream(ReaderStream::new(reader)))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {e}")))
}

#[utoipa::path(
    patch,
    path = "/{id}",
    tag = "Documents",
    operation_id = "updateDocument",
    summary = "Edit document metadata",
    description = "Send `null` to clear `title` or `description`. Owner only.",
    params(("id" = i32, Path, description = "Document ID")),
    request_body = UpdateDocumentRequest,
    responses(
        (status = 200, description = "Updated metadata", body = DocumentResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 404, description = "Not found or not yours (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(user_id = auth_user.user_id()))]
pub async fn update_document(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    AppJson(payload): AppJson<UpdateDocumentRequest>,
) -> Result<Json<DocumentResponse>, AppError> {
    let changes = DocumentChanges {
        title: payload.title,
        description: payload.description,
    };
    let doc = state
        .documents()
        .replace(auth_user.actor(), id, changes, None)
        .await
        .map_err(|e| e.conceal_forbidden("Document"))?;

    Ok(Json(DocumentResponse::from(doc)))
}

#[utoipa::path(
    put,
    path = "/{id}",
    tag = "Documents",
    operation_id = "replaceDocument",
    summary = "Replace document content and/or metadata",
    description = "Multipart. An optional `file` field replaces the content; `title` and \
        `description` fields, when present, replace those values (empty clears). Owner only.",
    params(("id" = i32, Path, description = "Document ID")),
    request_body(content_type = "multipart/form-data", description = "Optional new file and metadata"),
    responses(
        (status = 200, description = "Updated metadata", body = DocumentResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 404, description = "Not found or not yours (NOT_FOUND)", body = ErrorBody),
        (status = 413, description = "File too large (PAYLOAD_TOO_LARGE)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, multipart), fields(user_id = auth_user.user_id()))]
pub async fn replace_document(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    mut multipart: Multipart,
) -> Result<Json<DocumentResponse>, AppError> {
    let form = read_upload_form(&mut multipart, state.config.storage.max_upload_size).await?;

    let result = async {
        let upload = match &form.file {
            Some(file) => Some(file.open().await?),
            None => None,
        };
        let changes = DocumentChanges {
            title: form.title.clone().map(Some),
            description: form.description.clone().map(Some),
        };
        state
            .documents()
            .replace(auth_user.actor(), id, changes, upload)
            .await
    }
    .await;
    form.cleanup().await;

    let doc = result.map_err(|e| e.conceal_forbidden("Document"))?;
    Ok(Json(DocumentResponse::from(doc)))
}

#[utoipa::path(
    delete,
    path = "/{id}",
    tag = "Documents",
    operation_id = "deleteDocument",
    summary = "Delete a document",
    params(("id" = i32, Path, description = "Document ID")),
    responses(
        (status = 204, description = "Document deleted"),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 404, description = "Not found or not yours (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(user_id = auth_user.user_id()))]
pub async fn delete_document(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    state
        .documents()
        .delete(auth_user.actor(), id)
        .await
        .map_err(|e| e.conceal_forbidden("Document"))?;

    Ok(StatusCode::NO_CONTENT)
}
