use super::{ApiResult, AppState, CurrentUser, PageQuery};
use crate::document_store::Document;
use crate::error::PhotoError;
use crate::models::{Photo, PhotoChanges, PhotoCounts, PhotoStatus};
use crate::workflow::{SignedUrl, StoredPhoto, ThumbnailUrls, UploadedFile};
use axum::{
    extract::{multipart::Field, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stored photo with the best-effort steps that failed while storing it
#[derive(Debug, Serialize)]
pub struct StoredPhotoResponse {
    #[serde(flatten)]
    pub photo: Photo,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl From<StoredPhoto> for StoredPhotoResponse {
    fn from(stored: StoredPhoto) -> Self {
        Self {
            photo: stored.photo,
            warnings: stored.warnings,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePhotoRequest {
    pub storage_path: String,
    #[serde(default = "default_status")]
    pub status: PhotoStatus,
}

fn default_status() -> PhotoStatus {
    PhotoStatus::Uploading
}

#[derive(Debug, Deserialize)]
pub struct PhotoListQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub status_filter: Option<PhotoStatus>,
}

fn default_limit() -> i64 {
    crate::models::Page::default().limit
}

#[derive(Debug, Deserialize)]
pub struct ExpirationQuery {
    pub expiration: Option<u64>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_photos).post(create_photo))
        .route("/upload", post(upload_photo))
        .route("/stats/count", get(photo_stats))
        .route(
            "/:photo_id",
            get(get_photo).patch(update_photo).delete(delete_photo),
        )
        .route("/:photo_id/url", get(photo_url))
        .route("/:photo_id/metadata", get(photo_metadata))
        .route("/:photo_id/thumbnails", get(photo_thumbnails))
}

/// Read a multipart file field into memory
pub(super) async fn read_file(field: Field<'_>) -> ApiResult<UploadedFile> {
    let filename = field.file_name().map(str::to_string);
    let content_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();
    let bytes = field.bytes().await.map_err(multipart_error)?;

    Ok(UploadedFile {
        bytes: bytes.to_vec(),
        filename,
        content_type,
    })
}

pub(super) fn multipart_error(err: axum::extract::multipart::MultipartError) -> super::ApiError {
    PhotoError::validation(format!("Invalid multipart body: {}", err.body_text())).into()
}

async fn upload_photo(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<StoredPhotoResponse>)> {
    let mut file = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some("file") {
            file = Some(read_file(field).await?);
        }
    }
    let file = file.ok_or_else(|| PhotoError::validation("Missing file field"))?;

    let stored = state.photos.upload(&user, file).await?;
    Ok((StatusCode::CREATED, Json(stored.into())))
}

async fn create_photo(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<CreatePhotoRequest>,
) -> ApiResult<(StatusCode, Json<Photo>)> {
    let photo = state
        .photos
        .create_record(user.id, &request.storage_path, request.status)
        .await?;
    Ok((StatusCode::CREATED, Json(photo)))
}

async fn list_photos(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<PhotoListQuery>,
) -> ApiResult<Json<Vec<Photo>>> {
    let page = PageQuery {
        skip: query.skip,
        limit: query.limit,
    }
    .page()?;
    Ok(Json(
        state.photos.list(user.id, query.status_filter, page).await?,
    ))
}

async fn get_photo(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(photo_id): Path<Uuid>,
) -> ApiResult<Json<Photo>> {
    Ok(Json(state.photos.get_owned(user.id, photo_id).await?))
}

async fn photo_url(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(photo_id): Path<Uuid>,
    Query(query): Query<ExpirationQuery>,
) -> ApiResult<Json<SignedUrl>> {
    Ok(Json(
        state
            .photos
            .signed_url(
                user.id,
                photo_id,
                query.expiration.unwrap_or(state.url_expiration_secs),
            )
            .await?,
    ))
}

async fn photo_metadata(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(photo_id): Path<Uuid>,
) -> ApiResult<Json<Document>> {
    Ok(Json(state.photos.metadata(user.id, photo_id).await?))
}

async fn photo_thumbnails(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(photo_id): Path<Uuid>,
    Query(query): Query<ExpirationQuery>,
) -> ApiResult<Json<ThumbnailUrls>> {
    Ok(Json(
        state
            .photos
            .thumbnails(
                user.id,
                photo_id,
                query.expiration.unwrap_or(state.url_expiration_secs),
            )
            .await?,
    ))
}

async fn update_photo(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(photo_id): Path<Uuid>,
    Json(changes): Json<PhotoChanges>,
) -> ApiResult<Json<Photo>> {
    Ok(Json(state.photos.update(user.id, photo_id, changes).await?))
}

async fn delete_photo(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(photo_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.photos.delete(user.id, photo_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn photo_stats(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<PhotoCounts>> {
    Ok(Json(state.photos.stats(user.id).await?))
}
