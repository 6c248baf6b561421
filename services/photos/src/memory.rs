//! In-process store implementations for tests.
//!
//! Compiled for this crate's tests and, through the `test-support` feature,
//! for other workspace crates' tests. Each store has switches that make
//! selected operations fail, so partial failures of multi-store sequences can
//! be reproduced.

use crate::document_store::{Document, DocumentStore};
use crate::models::{
    Album, AlbumChanges, AlbumPhoto, NewPhoto, Page, Photo, PhotoChanges, PhotoStatus, User,
    UserChanges,
};
use crate::object_store::{DeleteOutcome, ObjectStore};
use crate::relational_store::{DuplicateUser, RelationalStore};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

fn window<T: Clone>(items: &[T], page: Page) -> Vec<T> {
    items
        .iter()
        .skip(page.skip.max(0) as usize)
        .take(page.limit.max(0) as usize)
        .cloned()
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Object stored in memory
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Object store backed by a hash map
pub struct MemoryObjectStore {
    bucket: String,
    objects: Mutex<HashMap<String, StoredObject>>,
    pub fail_put: AtomicBool,
    pub fail_get: AtomicBool,
    pub fail_delete: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(HashMap::new()),
            fail_put: AtomicBool::new(false),
            fail_get: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
        }
    }

    pub fn object(&self, path: &str) -> Option<StoredObject> {
        lock(&self.objects).get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = lock(&self.objects).keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, bytes: Vec<u8>, path: &str, content_type: &str) -> Result<String> {
        if self.fail_put.load(Ordering::SeqCst) {
            bail!("object store unavailable");
        }
        lock(&self.objects).insert(
            path.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(path.to_string())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        if self.fail_get.load(Ordering::SeqCst) {
            bail!("object store unavailable");
        }
        lock(&self.objects)
            .get(path)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| anyhow!("object not found: {}", path))
    }

    async fn delete(&self, path: &str) -> Result<DeleteOutcome> {
        if self.fail_delete.load(Ordering::SeqCst) {
            bail!("object store unavailable");
        }
        Ok(match lock(&self.objects).remove(path) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::NotFound,
        })
    }

    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String> {
        Ok(format!(
            "https://{}.memory.local/{}?expires={}",
            self.bucket,
            path,
            ttl.as_secs()
        ))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(lock(&self.objects).contains_key(path))
    }

    fn uri(&self, path: &str) -> String {
        format!("s3://{}/{}", self.bucket, path)
    }
}

/// Document store backed by a hash map
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<String, Document>>,
    pub fail_writes: AtomicBool,
    pub fail_reads: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self, key: &str) -> Option<Document> {
        lock(&self.documents).get(key).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.documents).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writes(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("document store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn set(&self, key: &str, fields: Document) -> Result<()> {
        self.check_writes()?;
        lock(&self.documents).insert(key.to_string(), fields);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Document>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("document store unavailable");
        }
        Ok(lock(&self.documents).get(key).cloned())
    }

    async fn patch(&self, key: &str, fields: Document) -> Result<bool> {
        self.check_writes()?;
        let mut documents = lock(&self.documents);
        match documents.get_mut(key) {
            Some(existing) => {
                existing.extend(fields);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_writes()?;
        lock(&self.documents).remove(key);
        Ok(())
    }
}

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    photos: Vec<Photo>,
    albums: Vec<Album>,
    album_photos: Vec<AlbumPhoto>,
}

/// Relational store backed by in-memory tables
///
/// Mirrors the SQL schema's behavior: unique usernames and emails, and
/// cascading deletes from users to photos and albums and from either side to
/// album membership.
pub struct MemoryRelationalStore {
    tables: Mutex<Tables>,
    next_user_id: AtomicI64,
    pub fail_photo_insert: AtomicBool,
    pub fail_photo_delete: AtomicBool,
    pub fail_reads: AtomicBool,
    failing_photo_updates: AtomicUsize,
}

impl Default for MemoryRelationalStore {
    fn default() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            next_user_id: AtomicI64::new(1),
            fail_photo_insert: AtomicBool::new(false),
            fail_photo_delete: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            failing_photo_updates: AtomicUsize::new(0),
        }
    }
}

impl MemoryRelationalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn photo_count(&self) -> usize {
        lock(&self.tables).photos.len()
    }

    pub fn album_photo_count(&self, album_id: Uuid, photo_id: Uuid) -> usize {
        lock(&self.tables)
            .album_photos
            .iter()
            .filter(|ap| ap.album_id == album_id && ap.photo_id == photo_id)
            .count()
    }

    /// Insert a user with a fixed id
    pub fn insert_user(&self, id: i64, username: &str, email: &str) -> User {
        let now = Utc::now();
        let user = User {
            id,
            username: username.to_string(),
            email: email.to_string(),
            password_hash: String::new(),
            created_at: now,
            updated_at: now,
        };
        lock(&self.tables).users.push(user.clone());
        self.next_user_id.fetch_max(id + 1, Ordering::SeqCst);
        user
    }

    /// Make only the next `count` photo updates fail
    pub fn fail_next_photo_updates(&self, count: usize) {
        self.failing_photo_updates.store(count, Ordering::SeqCst);
    }

    fn check_photo_update(&self) -> Result<()> {
        let failing = self
            .failing_photo_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            bail!("database unavailable");
        }
        Ok(())
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("database unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl RelationalStore for MemoryRelationalStore {
    async fn create_user(&self, username: &str, email: &str, password_hash: &str) -> Result<User> {
        let mut tables = lock(&self.tables);
        if tables
            .users
            .iter()
            .any(|u| u.username == username || u.email == email)
        {
            return Err(DuplicateUser.into());
        }

        let now = Utc::now();
        let user = User {
            id: self.next_user_id.fetch_add(1, Ordering::SeqCst),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: now,
            updated_at: now,
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.check_reads()?;
        Ok(lock(&self.tables).users.iter().find(|u| u.id == id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.check_reads()?;
        Ok(lock(&self.tables)
            .users
            .iter()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.check_reads()?;
        Ok(lock(&self.tables)
            .users
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn list_users(&self, page: Page) -> Result<Vec<User>> {
        self.check_reads()?;
        Ok(window(&lock(&self.tables).users, page))
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> Result<Option<User>> {
        let mut tables = lock(&self.tables);
        let clashes = tables.users.iter().any(|u| {
            u.id != id
                && (changes.username.as_deref() == Some(u.username.as_str())
                    || changes.email.as_deref() == Some(u.email.as_str()))
        });
        if clashes {
            return Err(DuplicateUser.into());
        }
        let Some(user) = tables.users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        if let Some(username) = changes.username {
            user.username = username;
        }
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(password_hash) = changes.password_hash {
            user.password_hash = password_hash;
        }
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn delete_user(&self, id: i64) -> Result<bool> {
        let mut tables = lock(&self.tables);
        let before = tables.users.len();
        tables.users.retain(|u| u.id != id);
        if tables.users.len() == before {
            return Ok(false);
        }

        let photo_ids: Vec<Uuid> = tables
            .photos
            .iter()
            .filter(|p| p.user_id == id)
            .map(|p| p.id)
            .collect();
        let album_ids: Vec<Uuid> = tables
            .albums
            .iter()
            .filter(|a| a.user_id == id)
            .map(|a| a.id)
            .collect();
        tables.photos.retain(|p| p.user_id != id);
        tables.albums.retain(|a| a.user_id != id);
        tables
            .album_photos
            .retain(|ap| !photo_ids.contains(&ap.photo_id) && !album_ids.contains(&ap.album_id));
        Ok(true)
    }

    async fn create_photo(&self, photo: NewPhoto) -> Result<Photo> {
        if self.fail_photo_insert.load(Ordering::SeqCst) {
            bail!("database unavailable");
        }
        let mut tables = lock(&self.tables);
        if tables.photos.iter().any(|p| p.id == photo.id) {
            bail!("duplicate key value violates unique constraint \"photos_pkey\"");
        }

        let created = Photo {
            id: photo.id,
            user_id: photo.user_id,
            storage_path: photo.storage_path,
            status: photo.status,
            created_at: Utc::now(),
        };
        tables.photos.push(created.clone());
        Ok(created)
    }

    async fn get_photo(&self, id: Uuid) -> Result<Option<Photo>> {
        self.check_reads()?;
        Ok(lock(&self.tables).photos.iter().find(|p| p.id == id).cloned())
    }

    async fn list_photos(
        &self,
        user_id: i64,
        status: Option<PhotoStatus>,
        page: Page,
    ) -> Result<Vec<Photo>> {
        self.check_reads()?;
        let tables = lock(&self.tables);
        let mut photos: Vec<Photo> = tables
            .photos
            .iter()
            .filter(|p| p.user_id == user_id && status.map_or(true, |s| p.status == s))
            .cloned()
            .collect();
        photos.reverse();
        Ok(window(&photos, page))
    }

    async fn update_photo(&self, id: Uuid, changes: PhotoChanges) -> Result<Option<Photo>> {
        self.check_photo_update()?;
        let mut tables = lock(&self.tables);
        let Some(photo) = tables.photos.iter_mut().find(|p| p.id == id) else {
            return Ok(None);
        };
        if let Some(storage_path) = changes.storage_path {
            photo.storage_path = storage_path;
        }
        if let Some(status) = changes.status {
            photo.status = status;
        }
        Ok(Some(photo.clone()))
    }

    async fn delete_photo(&self, id: Uuid) -> Result<bool> {
        if self.fail_photo_delete.load(Ordering::SeqCst) {
            bail!("database unavailable");
        }
        let mut tables = lock(&self.tables);
        let before = tables.photos.len();
        tables.photos.retain(|p| p.id != id);
        tables.album_photos.retain(|ap| ap.photo_id != id);
        Ok(tables.photos.len() < before)
    }

    async fn count_photos(&self, user_id: i64, status: Option<PhotoStatus>) -> Result<i64> {
        self.check_reads()?;
        Ok(lock(&self.tables)
            .photos
            .iter()
            .filter(|p| p.user_id == user_id && status.map_or(true, |s| p.status == s))
            .count() as i64)
    }

    async fn create_album(
        &self,
        user_id: i64,
        name: &str,
        description: Option<&str>,
    ) -> Result<Album> {
        let now = Utc::now();
        let album = Album {
            id: Uuid::new_v4(),
            user_id,
            name: name.to_string(),
            description: description.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        lock(&self.tables).albums.push(album.clone());
        Ok(album)
    }

    async fn get_album(&self, id: Uuid) -> Result<Option<Album>> {
        self.check_reads()?;
        Ok(lock(&self.tables).albums.iter().find(|a| a.id == id).cloned())
    }

    async fn list_albums(&self, user_id: i64, page: Page) -> Result<Vec<Album>> {
        self.check_reads()?;
        let tables = lock(&self.tables);
        let mut albums: Vec<Album> = tables
            .albums
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        albums.reverse();
        Ok(window(&albums, page))
    }

    async fn update_album(&self, id: Uuid, changes: AlbumChanges) -> Result<Option<Album>> {
        let mut tables = lock(&self.tables);
        let Some(album) = tables.albums.iter_mut().find(|a| a.id == id) else {
            return Ok(None);
        };
        if let Some(name) = changes.name {
            album.name = name;
        }
        if let Some(description) = changes.description {
            album.description = Some(description);
        }
        album.updated_at = Utc::now();
        Ok(Some(album.clone()))
    }

    async fn delete_album(&self, id: Uuid) -> Result<bool> {
        let mut tables = lock(&self.tables);
        let before = tables.albums.len();
        tables.albums.retain(|a| a.id != id);
        tables.album_photos.retain(|ap| ap.album_id != id);
        Ok(tables.albums.len() < before)
    }

    async fn count_albums(&self, user_id: i64) -> Result<i64> {
        self.check_reads()?;
        Ok(lock(&self.tables)
            .albums
            .iter()
            .filter(|a| a.user_id == user_id)
            .count() as i64)
    }

    async fn add_album_photo(&self, album_id: Uuid, photo_id: Uuid) -> Result<AlbumPhoto> {
        let association = AlbumPhoto {
            id: Uuid::new_v4(),
            album_id,
            photo_id,
            added_at: Utc::now(),
        };
        lock(&self.tables).album_photos.push(association.clone());
        Ok(association)
    }

    async fn is_photo_in_album(&self, album_id: Uuid, photo_id: Uuid) -> Result<bool> {
        self.check_reads()?;
        Ok(lock(&self.tables)
            .album_photos
            .iter()
            .any(|ap| ap.album_id == album_id && ap.photo_id == photo_id))
    }

    async fn remove_album_photo(&self, album_id: Uuid, photo_id: Uuid) -> Result<bool> {
        let mut tables = lock(&self.tables);
        let before = tables.album_photos.len();
        tables
            .album_photos
            .retain(|ap| !(ap.album_id == album_id && ap.photo_id == photo_id));
        Ok(tables.album_photos.len() < before)
    }

    async fn list_album_photos(&self, album_id: Uuid, page: Page) -> Result<Vec<Photo>> {
        self.check_reads()?;
        let tables = lock(&self.tables);
        let photos: Vec<Photo> = tables
            .album_photos
            .iter()
            .rev()
            .filter(|ap| ap.album_id == album_id)
            .filter_map(|ap| tables.photos.iter().find(|p| p.id == ap.photo_id).cloned())
            .collect();
        Ok(window(&photos, page))
    }

    async fn count_album_photos(&self, album_id: Uuid) -> Result<i64> {
        self.check_reads()?;
        Ok(lock(&self.tables)
            .album_photos
            .iter()
            .filter(|ap| ap.album_id == album_id)
            .count() as i64)
    }

    async fn ping(&self) -> Result<()> {
        self.check_reads()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_object_store_delete_reports_missing() {
        let store = MemoryObjectStore::new("photos");
        store.put(b"abc".to_vec(), "a/b.jpg", "image/jpeg").await.unwrap();

        assert_eq!(store.delete("a/b.jpg").await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(store.delete("a/b.jpg").await.unwrap(), DeleteOutcome::NotFound);
        assert_eq!(store.uri("a/b.jpg"), "s3://photos/a/b.jpg");
    }

    #[tokio::test]
    async fn test_document_patch_requires_existing_document() {
        let store = MemoryDocumentStore::new();
        let mut fields = Document::new();
        fields.insert("status".to_string(), json!("processed"));

        assert!(!store.patch("missing", fields.clone()).await.unwrap());
        assert!(store.document("missing").is_none());

        let mut initial = Document::new();
        initial.insert("status".to_string(), json!("uploading"));
        initial.insert("filename".to_string(), json!("a.jpg"));
        store.set("k", initial).await.unwrap();

        assert!(store.patch("k", fields).await.unwrap());
        let doc = store.document("k").unwrap();
        assert_eq!(doc["status"], "processed");
        assert_eq!(doc["filename"], "a.jpg");
    }

    #[tokio::test]
    async fn test_user_delete_cascades() {
        let store = MemoryRelationalStore::new();
        let user = store.create_user("alice", "a@example.com", "hash").await.unwrap();
        let photo = store
            .create_photo(NewPhoto {
                id: Uuid::new_v4(),
                user_id: user.id,
                storage_path: "users/1/photos/x.jpg".to_string(),
                status: PhotoStatus::Processed,
            })
            .await
            .unwrap();
        let album = store.create_album(user.id, "Trip", None).await.unwrap();
        store.add_album_photo(album.id, photo.id).await.unwrap();

        assert!(store.delete_user(user.id).await.unwrap());
        assert_eq!(store.photo_count(), 0);
        assert_eq!(store.album_photo_count(album.id, photo.id), 0);
        assert!(store.get_album(album.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_user_rejected() {
        let store = MemoryRelationalStore::new();
        store.create_user("alice", "a@example.com", "hash").await.unwrap();
        let err = store
            .create_user("alice", "other@example.com", "hash")
            .await
            .unwrap_err();
        assert!(err.is::<DuplicateUser>());
        let err = store
            .create_user("bob", "a@example.com", "hash")
            .await
            .unwrap_err();
        assert!(err.is::<DuplicateUser>());

        let bob = store.create_user("bob", "b@example.com", "hash").await.unwrap();
        let err = store
            .update_user(
                bob.id,
                UserChanges {
                    email: Some("a@example.com".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is::<DuplicateUser>());
    }
}
