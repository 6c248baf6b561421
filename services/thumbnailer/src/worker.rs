use crate::event::ObjectFinalizedEvent;
use crate::generator::{self, THUMBNAIL_CONTENT_TYPE, THUMBNAIL_SIZES};
use anyhow::{Context, Result};
use chrono::Utc;
use image::RgbImage;
use metrics::counter;
use photo_service::document_store::{Document, DocumentStore};
use photo_service::object_store::ObjectStore;
use photo_service::paths;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Why an event was ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The object is itself a thumbnail
    Thumbnail,
    /// The object is outside the photo namespace
    NotAPhoto,
}

/// What happened to one event
#[derive(Debug, Clone, PartialEq)]
pub enum ThumbnailOutcome {
    Skipped(SkipReason),
    Generated(ThumbnailReport),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailReport {
    /// Size name to bucket-qualified URI of every thumbnail written
    pub thumbnails: BTreeMap<String, String>,
    /// Sizes that could not be rendered or stored
    pub failed_sizes: Vec<String>,
    /// Whether the metadata document was updated
    pub metadata_updated: bool,
}

/// Renders thumbnails for newly stored originals
pub struct ThumbnailWorker {
    objects: Arc<dyn ObjectStore>,
    documents: Arc<dyn DocumentStore>,
    jpeg_quality: u8,
}

impl ThumbnailWorker {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        documents: Arc<dyn DocumentStore>,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            objects,
            documents,
            jpeg_quality,
        }
    }

    /// Handle one object-finalized event
    ///
    /// Fails only when the source object cannot be read or decoded. A size
    /// that fails to render or upload is logged and the remaining sizes are
    /// still produced.
    #[instrument(skip(self, event), fields(bucket = %event.bucket, object_path = %event.object_path))]
    pub async fn handle(&self, event: &ObjectFinalizedEvent) -> Result<ThumbnailOutcome> {
        let path = event.object_path.as_str();

        if paths::is_thumbnail_path(path) {
            debug!("Skipping thumbnail object");
            return Ok(ThumbnailOutcome::Skipped(SkipReason::Thumbnail));
        }
        if !paths::is_photo_path(path) {
            debug!("Skipping non-photo object");
            return Ok(ThumbnailOutcome::Skipped(SkipReason::NotAPhoto));
        }

        let bytes = self
            .objects
            .get(path)
            .await
            .context("Failed to read source object")?;
        let source = tokio::task::spawn_blocking(move || generator::decode_flattened(&bytes))
            .await
            .context("Decode task panicked")??;
        let source = Arc::new(source);

        let mut thumbnails = BTreeMap::new();
        let mut failed_sizes = Vec::new();

        for (size_name, max_side) in THUMBNAIL_SIZES {
            match self.write_size(&source, path, size_name, max_side).await {
                Ok(uri) => {
                    counter!("thumbnailer.thumbnails.generated", "size" => size_name).increment(1);
                    thumbnails.insert(size_name.to_string(), uri);
                }
                Err(e) => {
                    warn!(size = size_name, error = ?e, "Thumbnail size failed");
                    counter!("thumbnailer.thumbnails.failed", "size" => size_name).increment(1);
                    failed_sizes.push(size_name.to_string());
                }
            }
        }

        let metadata_updated = match paths::photo_id_from_path(path) {
            Some(photo_id) if !thumbnails.is_empty() => {
                self.record_thumbnails(photo_id, &thumbnails).await
            }
            Some(_) => false,
            None => {
                debug!("No photo id in object path, metadata not updated");
                false
            }
        };

        info!(
            generated = thumbnails.len(),
            failed = failed_sizes.len(),
            metadata_updated,
            "Thumbnails processed"
        );

        Ok(ThumbnailOutcome::Generated(ThumbnailReport {
            thumbnails,
            failed_sizes,
            metadata_updated,
        }))
    }

    async fn write_size(
        &self,
        source: &Arc<RgbImage>,
        original: &str,
        size_name: &str,
        max_side: u32,
    ) -> Result<String> {
        let source = Arc::clone(source);
        let quality = self.jpeg_quality;
        let encoded = tokio::task::spawn_blocking(move || generator::render(&source, max_side, quality))
            .await
            .context("Render task panicked")??;

        let key = paths::thumbnail_path(original, size_name);
        self.objects
            .put(encoded, &key, THUMBNAIL_CONTENT_TYPE)
            .await
            .with_context(|| format!("Failed to upload thumbnail {key}"))?;

        Ok(self.objects.uri(&key))
    }

    /// Patch the photo's metadata document; an absent document is left alone
    async fn record_thumbnails(&self, photo_id: Uuid, thumbnails: &BTreeMap<String, String>) -> bool {
        let mut fields = Document::new();
        fields.insert(
            "thumbnails".to_string(),
            Value::Object(
                thumbnails
                    .iter()
                    .map(|(size, uri)| (size.clone(), json!(uri)))
                    .collect(),
            ),
        );
        fields.insert(
            "thumbnail_generated_at".to_string(),
            json!(Utc::now().to_rfc3339()),
        );

        match self.documents.patch(&photo_id.to_string(), fields).await {
            Ok(true) => true,
            Ok(false) => {
                debug!(photo_id = %photo_id, "Metadata document not found, skipping update");
                false
            }
            Err(e) => {
                warn!(photo_id = %photo_id, error = ?e, "Failed to update metadata");
                counter!("thumbnailer.metadata.failed").increment(1);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use photo_service::memory::{MemoryDocumentStore, MemoryObjectStore};
    use photo_service::object_store::DeleteOutcome;
    use std::io::Cursor;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba([30, 120, 200, 255]),
        ));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn event(path: &str) -> ObjectFinalizedEvent {
        ObjectFinalizedEvent {
            bucket: "photos".to_string(),
            object_path: path.to_string(),
        }
    }

    async fn seed(objects: &MemoryObjectStore, documents: &MemoryDocumentStore) -> (Uuid, String) {
        let photo_id = Uuid::new_v4();
        let path = format!("users/1/photos/{photo_id}.png");
        objects.put(png(800, 400), &path, "image/png").await.unwrap();

        let mut document = Document::new();
        document.insert("status".to_string(), json!("processed"));
        documents.set(&photo_id.to_string(), document).await.unwrap();

        (photo_id, path)
    }

    fn report(outcome: ThumbnailOutcome) -> ThumbnailReport {
        match outcome {
            ThumbnailOutcome::Generated(report) => report,
            other => panic!("expected thumbnails, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generates_every_size_and_records_them() {
        let objects = Arc::new(MemoryObjectStore::new("photos"));
        let documents = Arc::new(MemoryDocumentStore::new());
        let (photo_id, path) = seed(&objects, &documents).await;
        let worker = ThumbnailWorker::new(objects.clone(), documents.clone(), 85);

        let report = report(worker.handle(&event(&path)).await.unwrap());

        assert!(report.failed_sizes.is_empty());
        assert!(report.metadata_updated);
        assert_eq!(report.thumbnails.len(), 3);

        let small_key = format!("users/1/photos/thumbnails/{photo_id}_small.png");
        assert_eq!(
            report.thumbnails["small"],
            format!("s3://photos/{small_key}")
        );
        let small = objects.object(&small_key).unwrap();
        assert_eq!(small.content_type, "image/jpeg");
        let decoded = image::load_from_memory(&small.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (150, 75));

        let document = documents.document(&photo_id.to_string()).unwrap();
        assert_eq!(document["status"], "processed");
        assert_eq!(document["thumbnails"]["large"], report.thumbnails["large"].as_str());
        assert!(document.contains_key("thumbnail_generated_at"));
    }

    #[tokio::test]
    async fn test_small_sources_are_not_upscaled() {
        let objects = Arc::new(MemoryObjectStore::new("photos"));
        let documents = Arc::new(MemoryDocumentStore::new());
        let path = format!("users/1/photos/{}.png", Uuid::new_v4());
        objects.put(png(120, 90), &path, "image/png").await.unwrap();
        let worker = ThumbnailWorker::new(objects.clone(), documents, 85);

        let report = report(worker.handle(&event(&path)).await.unwrap());

        for size in ["small", "medium", "large"] {
            let (_, key) = paths::parse_object_uri(&report.thumbnails[size]).unwrap();
            let stored = objects.object(key).unwrap();
            let decoded = image::load_from_memory(&stored.bytes).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (120, 90));
        }
        // No document to patch
        assert!(!report.metadata_updated);
    }

    #[tokio::test]
    async fn test_skips_thumbnails_and_foreign_paths() {
        let objects = Arc::new(MemoryObjectStore::new("photos"));
        let worker = ThumbnailWorker::new(objects.clone(), Arc::new(MemoryDocumentStore::new()), 85);

        let outcome = worker
            .handle(&event("users/1/photos/thumbnails/a_small.jpg"))
            .await
            .unwrap();
        assert_eq!(outcome, ThumbnailOutcome::Skipped(SkipReason::Thumbnail));

        let outcome = worker.handle(&event("exports/report.csv")).await.unwrap();
        assert_eq!(outcome, ThumbnailOutcome::Skipped(SkipReason::NotAPhoto));
        assert!(objects.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_source_is_an_error() {
        let objects = Arc::new(MemoryObjectStore::new("photos"));
        let worker = ThumbnailWorker::new(objects.clone(), Arc::new(MemoryDocumentStore::new()), 85);

        assert!(worker.handle(&event("users/1/photos/missing.jpg")).await.is_err());

        objects
            .put(b"not an image".to_vec(), "users/1/photos/bad.jpg", "image/jpeg")
            .await
            .unwrap();
        assert!(worker.handle(&event("users/1/photos/bad.jpg")).await.is_err());
    }

    #[tokio::test]
    async fn test_metadata_failure_does_not_fail_the_event() {
        let objects = Arc::new(MemoryObjectStore::new("photos"));
        let documents = Arc::new(MemoryDocumentStore::new());
        let (_, path) = seed(&objects, &documents).await;
        documents.fail_writes.store(true, Ordering::SeqCst);
        let worker = ThumbnailWorker::new(objects, documents, 85);

        let report = report(worker.handle(&event(&path)).await.unwrap());

        assert_eq!(report.thumbnails.len(), 3);
        assert!(!report.metadata_updated);
    }

    /// Object store that rejects uploads for one thumbnail size
    struct RejectingSize {
        inner: MemoryObjectStore,
        size: &'static str,
    }

    #[async_trait]
    impl ObjectStore for RejectingSize {
        async fn put(&self, bytes: Vec<u8>, path: &str, content_type: &str) -> Result<String> {
            if path.contains(&format!("_{}.", self.size)) {
                anyhow::bail!("bucket quota exceeded");
            }
            self.inner.put(bytes, path, content_type).await
        }

        async fn get(&self, path: &str) -> Result<Vec<u8>> {
            self.inner.get(path).await
        }

        async fn delete(&self, path: &str) -> Result<DeleteOutcome> {
            self.inner.delete(path).await
        }

        async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String> {
            self.inner.signed_url(path, ttl).await
        }

        async fn exists(&self, path: &str) -> Result<bool> {
            self.inner.exists(path).await
        }

        fn uri(&self, path: &str) -> String {
            self.inner.uri(path)
        }
    }

    #[tokio::test]
    async fn test_one_failed_size_does_not_stop_the_others() {
        let inner = MemoryObjectStore::new("photos");
        let documents = Arc::new(MemoryDocumentStore::new());
        let (photo_id, path) = seed(&inner, &documents).await;
        let objects = Arc::new(RejectingSize {
            inner,
            size: "medium",
        });
        let worker = ThumbnailWorker::new(objects.clone(), documents.clone(), 85);

        let report = report(worker.handle(&event(&path)).await.unwrap());

        assert_eq!(report.failed_sizes, vec!["medium".to_string()]);
        assert_eq!(
            report.thumbnails.keys().collect::<Vec<_>>(),
            vec!["large", "small"]
        );
        let document = documents.document(&photo_id.to_string()).unwrap();
        assert!(document["thumbnails"].get("medium").is_none());
        assert_eq!(objects.inner.len(), 3);
    }
}
