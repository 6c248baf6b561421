use super::{check_expiration, settle};
use crate::ai_generator::{AiImageGenerator, AspectRatio};
use crate::config::UploadConfig;
use crate::document_store::{Document, DocumentStore};
use crate::error::{PhotoError, PhotoResult, StepOutcome};
use crate::models::{NewPhoto, Page, Photo, PhotoChanges, PhotoCounts, PhotoStatus, User};
use crate::object_store::{DeleteOutcome, ObjectStore};
use crate::paths;
use crate::relational_store::RelationalStore;
use chrono::Utc;
use futures::future::join_all;
use metrics::counter;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const DEFAULT_FILENAME: &str = "photo.jpg";

/// File received from a client
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
    pub content_type: String,
}

/// Result of a store sequence
#[derive(Debug, Clone)]
pub struct StoredPhoto {
    /// Row in its final state
    pub photo: Photo,
    /// Best-effort steps that failed along the way
    pub warnings: Vec<String>,
}

/// Time-limited URL for an original
#[derive(Debug, Clone, Serialize)]
pub struct SignedUrl {
    pub photo_id: Uuid,
    pub url: String,
    pub expires_in: u64,
}

/// Time-limited URLs for generated thumbnails, keyed by size name
#[derive(Debug, Clone, Serialize)]
pub struct ThumbnailUrls {
    pub photo_id: Uuid,
    pub thumbnails: BTreeMap<String, String>,
    pub expires_in: u64,
    pub generated_at: Option<Value>,
}

/// Photo operations across the relational, object and document stores
#[derive(Clone)]
pub struct PhotoWorkflow {
    relational: Arc<dyn RelationalStore>,
    objects: Arc<dyn ObjectStore>,
    documents: Arc<dyn DocumentStore>,
    generator: Arc<dyn AiImageGenerator>,
    upload: UploadConfig,
}

impl PhotoWorkflow {
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        objects: Arc<dyn ObjectStore>,
        documents: Arc<dyn DocumentStore>,
        generator: Arc<dyn AiImageGenerator>,
        upload: UploadConfig,
    ) -> Self {
        Self {
            relational,
            objects,
            documents,
            generator,
            upload,
        }
    }

    /// Store a client upload and return the processed row
    ///
    /// Validation failures have no side effects. After validation the bytes
    /// are written first, then the row, then the metadata document, and the
    /// row is finally marked `processed`.
    pub async fn upload(&self, owner: &User, file: UploadedFile) -> PhotoResult<StoredPhoto> {
        self.validate_file(&file)?;

        let filename = file
            .filename
            .clone()
            .unwrap_or_else(|| DEFAULT_FILENAME.to_string());

        self.store(owner, file.bytes, &filename, &file.content_type, Document::new())
            .await
    }

    /// Generate an image from a prompt and store it as a photo
    pub async fn generate_from_text(
        &self,
        owner: &User,
        prompt: &str,
        aspect_ratio: &str,
    ) -> PhotoResult<StoredPhoto> {
        let ratio = self.check_aspect_ratio(aspect_ratio)?;
        let prompt = check_prompt(prompt)?;

        let image = self
            .generator
            .generate(prompt, ratio)
            .await
            .map_err(PhotoError::Generation)?;
        counter!("photos.ai.generated", "mode" => "text").increment(1);

        let filename = format!("ai_generated_{}.png", ratio.file_token());
        let provenance = self.provenance(prompt, ratio, None);

        self.store(owner, image.bytes, &filename, &image.mime_type, provenance)
            .await
    }

    /// Generate an image from a prompt and a reference image
    pub async fn generate_from_reference(
        &self,
        owner: &User,
        prompt: &str,
        aspect_ratio: &str,
        reference: UploadedFile,
    ) -> PhotoResult<StoredPhoto> {
        self.validate_file(&reference)?;
        let ratio = self.check_aspect_ratio(aspect_ratio)?;
        let prompt = check_prompt(prompt)?;

        let image = self
            .generator
            .generate_with_reference(prompt, reference.bytes, &reference.content_type, ratio)
            .await
            .map_err(PhotoError::Generation)?;
        counter!("photos.ai.generated", "mode" => "reference").increment(1);

        let filename = format!("ai_modified_{}.png", ratio.file_token());
        let provenance = self.provenance(prompt, ratio, reference.filename.as_deref());

        self.store(owner, image.bytes, &filename, &image.mime_type, provenance)
            .await
    }

    pub fn supported_aspect_ratios(&self) -> Vec<AspectRatio> {
        self.generator.supported_aspect_ratios()
    }

    #[instrument(
        skip(self, owner, bytes, extra),
        fields(user_id = owner.id, size_bytes = bytes.len())
    )]
    async fn store(
        &self,
        owner: &User,
        bytes: Vec<u8>,
        filename: &str,
        content_type: &str,
        extra: Document,
    ) -> PhotoResult<StoredPhoto> {
        let photo_id = Uuid::new_v4();
        let extension = paths::extension_for(Some(filename), content_type);
        let storage_path = paths::photo_object_path(owner.id, photo_id, &extension);
        let file_size = bytes.len();
        let mut warnings = Vec::new();

        // Bytes first: a failed put leaves nothing behind
        if let Err(e) = self.objects.put(bytes, &storage_path, content_type).await {
            counter!("photos.uploads.failed", "step" => "put_object").increment(1);
            return Err(PhotoError::Storage(e));
        }

        let photo = self
            .relational
            .create_photo(NewPhoto {
                id: photo_id,
                user_id: owner.id,
                storage_path: storage_path.clone(),
                status: PhotoStatus::Uploading,
            })
            .await
            .map_err(|e| {
                counter!("photos.uploads.failed", "step" => "create_row").increment(1);
                PhotoError::Database(e)
            })?;

        let key = photo_id.to_string();
        let document = metadata_document(&photo, owner, filename, content_type, file_size, extra);
        let written = StepOutcome::best_effort(
            self.documents.set(&key, document).await,
            "write metadata",
        );
        let document_written = written.is_ok();
        settle("write_metadata", written, photo_id, &mut warnings)?;

        let processed = match self
            .relational
            .update_photo(photo_id, PhotoChanges::status(PhotoStatus::Processed))
            .await
        {
            Ok(Some(photo)) => photo,
            Ok(None) => {
                // Row removed by a concurrent delete
                counter!("photos.uploads.failed", "step" => "mark_processed").increment(1);
                return Err(PhotoError::NotFound("Photo"));
            }
            Err(e) => {
                counter!("photos.uploads.failed", "step" => "mark_processed").increment(1);
                let marked = self
                    .relational
                    .update_photo(photo_id, PhotoChanges::status(PhotoStatus::Failed))
                    .await;
                settle(
                    "mark_failed",
                    StepOutcome::best_effort(marked, "mark failed"),
                    photo_id,
                    &mut warnings,
                )?;
                return Err(PhotoError::Database(
                    e.context("Failed to mark photo processed"),
                ));
            }
        };

        if document_written {
            let mut status = Document::new();
            status.insert("status".to_string(), json!(PhotoStatus::Processed.as_str()));
            status.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));
            let patched = self.documents.patch(&key, status).await;
            settle(
                "update_metadata",
                StepOutcome::best_effort(patched, "update metadata"),
                photo_id,
                &mut warnings,
            )?;
        }

        counter!("photos.uploads.completed").increment(1);
        info!(
            photo_id = %photo_id,
            storage_path = %storage_path,
            degraded_steps = warnings.len(),
            "Photo stored"
        );

        Ok(StoredPhoto {
            photo: processed,
            warnings,
        })
    }

    /// Remove a photo from every store
    ///
    /// Only the final row delete can fail the call. A second delete of the
    /// same photo returns `NotFound`.
    #[instrument(skip(self))]
    pub async fn delete(&self, owner_id: i64, photo_id: Uuid) -> PhotoResult<()> {
        let photo = self.get_owned(owner_id, photo_id).await?;
        let key = photo_id.to_string();
        let mut warnings = Vec::new();

        let recorded = match self.documents.get(&key).await {
            Ok(document) => thumbnail_keys(document.as_ref()),
            Err(e) => {
                settle(
                    "read_metadata",
                    StepOutcome::best_effort::<()>(Err(e), "read metadata"),
                    photo_id,
                    &mut warnings,
                )?;
                Vec::new()
            }
        };

        match self.objects.delete(&photo.storage_path).await {
            Ok(DeleteOutcome::Deleted) => debug!(key = %photo.storage_path, "Photo object deleted"),
            Ok(DeleteOutcome::NotFound) => {
                warn!(key = %photo.storage_path, "Photo object already missing")
            }
            Err(e) => settle(
                "delete_object",
                StepOutcome::best_effort::<()>(Err(e), "delete object"),
                photo_id,
                &mut warnings,
            )?,
        }

        // Derived keys cover thumbnails written after the document was lost
        let thumbnails: BTreeSet<String> = recorded
            .into_iter()
            .chain(paths::thumbnail_paths(&photo.storage_path))
            .collect();
        let deletions = join_all(thumbnails.iter().map(|path| self.objects.delete(path))).await;
        for deleted in deletions {
            settle(
                "delete_thumbnail",
                StepOutcome::best_effort(deleted, "delete thumbnail"),
                photo_id,
                &mut warnings,
            )?;
        }

        let removed = self.documents.delete(&key).await;
        settle(
            "delete_metadata",
            StepOutcome::best_effort(removed, "delete metadata"),
            photo_id,
            &mut warnings,
        )?;

        let deleted = self
            .relational
            .delete_photo(photo_id)
            .await
            .map_err(PhotoError::Database)?;
        if !deleted {
            return Err(PhotoError::NotFound("Photo"));
        }

        counter!("photos.deleted").increment(1);
        info!(
            photo_id = %photo_id,
            thumbnails = thumbnails.len(),
            degraded_steps = warnings.len(),
            "Photo deleted"
        );
        Ok(())
    }

    /// Fetch a photo row, checking ownership
    pub async fn get_owned(&self, owner_id: i64, photo_id: Uuid) -> PhotoResult<Photo> {
        let photo = self
            .relational
            .get_photo(photo_id)
            .await
            .map_err(PhotoError::Database)?
            .ok_or(PhotoError::NotFound("Photo"))?;

        if photo.user_id != owner_id {
            return Err(PhotoError::Forbidden("photo"));
        }
        Ok(photo)
    }

    pub async fn list(
        &self,
        owner_id: i64,
        status: Option<PhotoStatus>,
        page: Page,
    ) -> PhotoResult<Vec<Photo>> {
        self.relational
            .list_photos(owner_id, status, page)
            .await
            .map_err(PhotoError::Database)
    }

    /// Create a row for bytes stored out of band
    pub async fn create_record(
        &self,
        owner_id: i64,
        storage_path: &str,
        status: PhotoStatus,
    ) -> PhotoResult<Photo> {
        if storage_path.trim().is_empty() {
            return Err(PhotoError::validation("storage_path must not be empty"));
        }

        self.relational
            .create_photo(NewPhoto {
                id: Uuid::new_v4(),
                user_id: owner_id,
                storage_path: storage_path.to_string(),
                status,
            })
            .await
            .map_err(PhotoError::Database)
    }

    pub async fn update(
        &self,
        owner_id: i64,
        photo_id: Uuid,
        changes: PhotoChanges,
    ) -> PhotoResult<Photo> {
        if matches!(changes.storage_path.as_deref(), Some(p) if p.trim().is_empty()) {
            return Err(PhotoError::validation("storage_path must not be empty"));
        }
        self.get_owned(owner_id, photo_id).await?;

        self.relational
            .update_photo(photo_id, changes)
            .await
            .map_err(PhotoError::Database)?
            .ok_or(PhotoError::NotFound("Photo"))
    }

    pub async fn signed_url(
        &self,
        owner_id: i64,
        photo_id: Uuid,
        expiration_secs: u64,
    ) -> PhotoResult<SignedUrl> {
        let expires_in = check_expiration(expiration_secs)?;
        let photo = self.get_owned(owner_id, photo_id).await?;

        let url = self
            .objects
            .signed_url(&photo.storage_path, Duration::from_secs(expires_in))
            .await
            .map_err(PhotoError::Storage)?;

        Ok(SignedUrl {
            photo_id,
            url,
            expires_in,
        })
    }

    /// Metadata document of an owned photo
    pub async fn metadata(&self, owner_id: i64, photo_id: Uuid) -> PhotoResult<Document> {
        self.get_owned(owner_id, photo_id).await?;

        self.documents
            .get(&photo_id.to_string())
            .await
            .map_err(PhotoError::Database)?
            .ok_or(PhotoError::NotFound("Photo metadata"))
    }

    /// Signed URLs for every thumbnail recorded so far
    ///
    /// Thumbnails appear some time after the upload; until then this returns
    /// `NotFound`.
    pub async fn thumbnails(
        &self,
        owner_id: i64,
        photo_id: Uuid,
        expiration_secs: u64,
    ) -> PhotoResult<ThumbnailUrls> {
        let expires_in = check_expiration(expiration_secs)?;
        self.get_owned(owner_id, photo_id).await?;

        let document = self
            .documents
            .get(&photo_id.to_string())
            .await
            .map_err(PhotoError::Database)?
            .ok_or(PhotoError::NotFound("Thumbnails"))?;

        let recorded = match document.get("thumbnails") {
            Some(Value::Object(map)) => map,
            _ => return Err(PhotoError::NotFound("Thumbnails")),
        };

        let ttl = Duration::from_secs(expires_in);
        let mut thumbnails = BTreeMap::new();
        for (size_name, uri) in recorded {
            let Some((_, key)) = uri.as_str().and_then(paths::parse_object_uri) else {
                continue;
            };
            let url = self
                .objects
                .signed_url(key, ttl)
                .await
                .map_err(PhotoError::Storage)?;
            thumbnails.insert(size_name.clone(), url);
        }

        if thumbnails.is_empty() {
            return Err(PhotoError::NotFound("Thumbnails"));
        }

        Ok(ThumbnailUrls {
            photo_id,
            thumbnails,
            expires_in,
            generated_at: document.get("thumbnail_generated_at").cloned(),
        })
    }

    /// Per-status photo counts for one owner
    pub async fn stats(&self, owner_id: i64) -> PhotoResult<PhotoCounts> {
        let count = |status| self.relational.count_photos(owner_id, status);

        Ok(PhotoCounts {
            total: count(None).await.map_err(PhotoError::Database)?,
            uploading: count(Some(PhotoStatus::Uploading))
                .await
                .map_err(PhotoError::Database)?,
            processed: count(Some(PhotoStatus::Processed))
                .await
                .map_err(PhotoError::Database)?,
            failed: count(Some(PhotoStatus::Failed))
                .await
                .map_err(PhotoError::Database)?,
        })
    }

    fn validate_file(&self, file: &UploadedFile) -> PhotoResult<()> {
        if !self.upload.is_allowed(&file.content_type) {
            return Err(PhotoError::validation(format!(
                "File type {} not allowed. Allowed types: {}",
                file.content_type,
                self.upload.allowed_content_types.join(", ")
            )));
        }

        if file.bytes.is_empty() {
            return Err(PhotoError::validation("File is empty"));
        }

        if file.bytes.len() > self.upload.max_upload_bytes {
            return Err(PhotoError::validation(format!(
                "File size {} bytes exceeds maximum allowed size of {} bytes",
                file.bytes.len(),
                self.upload.max_upload_bytes
            )));
        }

        Ok(())
    }

    fn check_aspect_ratio(&self, aspect_ratio: &str) -> PhotoResult<AspectRatio> {
        let supported = || {
            AspectRatio::ALL
                .iter()
                .map(|r| r.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };

        let ratio: AspectRatio = aspect_ratio.parse().map_err(|_| {
            PhotoError::validation(format!("Invalid aspect ratio. Supported: {}", supported()))
        })?;

        if !self.generator.supported_aspect_ratios().contains(&ratio) {
            return Err(PhotoError::validation(format!(
                "Invalid aspect ratio. Supported: {}",
                supported()
            )));
        }
        Ok(ratio)
    }

    fn provenance(&self, prompt: &str, ratio: AspectRatio, reference: Option<&str>) -> Document {
        let mut fields = Document::new();
        fields.insert("ai_generated".to_string(), json!(true));
        fields.insert("ai_prompt".to_string(), json!(prompt));
        fields.insert("ai_aspect_ratio".to_string(), json!(ratio.as_str()));
        fields.insert("ai_model".to_string(), json!(self.generator.model_name()));
        if let Some(reference) = reference {
            fields.insert("ai_reference_image".to_string(), json!(reference));
        }
        fields
    }
}

fn check_prompt(prompt: &str) -> PhotoResult<&str> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(PhotoError::validation("prompt must not be empty"));
    }
    Ok(prompt)
}

fn metadata_document(
    photo: &Photo,
    owner: &User,
    filename: &str,
    content_type: &str,
    file_size: usize,
    extra: Document,
) -> Document {
    let now = Utc::now().to_rfc3339();
    let mut fields = Document::new();
    fields.insert("photo_id".to_string(), json!(photo.id.to_string()));
    fields.insert("user_id".to_string(), json!(photo.user_id));
    fields.insert("storage_path".to_string(), json!(photo.storage_path));
    fields.insert("filename".to_string(), json!(filename));
    fields.insert("content_type".to_string(), json!(content_type));
    fields.insert("file_size".to_string(), json!(file_size));
    fields.insert("status".to_string(), json!(photo.status.as_str()));
    fields.insert("username".to_string(), json!(owner.username));
    fields.insert("email".to_string(), json!(owner.email));
    fields.insert("created_at".to_string(), json!(now));
    fields.insert("updated_at".to_string(), json!(now));
    fields.extend(extra);
    fields
}

/// Object keys of the thumbnails recorded in a metadata document
fn thumbnail_keys(document: Option<&Document>) -> Vec<String> {
    let Some(Value::Object(thumbnails)) = document.and_then(|d| d.get("thumbnails")) else {
        return Vec::new();
    };

    thumbnails
        .values()
        .filter_map(Value::as_str)
        .filter_map(paths::parse_object_uri)
        .map(|(_, key)| key.to_string())
        .collect()
}
