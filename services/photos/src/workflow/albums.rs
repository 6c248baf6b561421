use crate::error::{PhotoError, PhotoResult};
use crate::models::{Album, AlbumChanges, AlbumPhoto, Page, Photo};
use crate::relational_store::RelationalStore;
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

const NAME_MAX_LEN: usize = 255;

/// Number of photos in one album
#[derive(Debug, Clone, Serialize)]
pub struct AlbumPhotoCount {
    pub album_id: Uuid,
    pub total: i64,
}

/// Album operations; albums live only in the relational store
#[derive(Clone)]
pub struct AlbumWorkflow {
    relational: Arc<dyn RelationalStore>,
}

impl AlbumWorkflow {
    pub fn new(relational: Arc<dyn RelationalStore>) -> Self {
        Self { relational }
    }

    pub async fn create(
        &self,
        owner_id: i64,
        name: &str,
        description: Option<&str>,
    ) -> PhotoResult<Album> {
        check_name(name)?;

        let album = self
            .relational
            .create_album(owner_id, name, description)
            .await
            .map_err(PhotoError::Database)?;

        debug!(album_id = %album.id, owner_id, "Album created");
        Ok(album)
    }

    /// Fetch an album, checking ownership
    pub async fn get_owned(&self, owner_id: i64, album_id: Uuid) -> PhotoResult<Album> {
        let album = self
            .relational
            .get_album(album_id)
            .await
            .map_err(PhotoError::Database)?
            .ok_or(PhotoError::NotFound("Album"))?;

        if album.user_id != owner_id {
            return Err(PhotoError::Forbidden("album"));
        }
        Ok(album)
    }

    pub async fn list(&self, owner_id: i64, page: Page) -> PhotoResult<Vec<Album>> {
        self.relational
            .list_albums(owner_id, page)
            .await
            .map_err(PhotoError::Database)
    }

    pub async fn update(
        &self,
        owner_id: i64,
        album_id: Uuid,
        changes: AlbumChanges,
    ) -> PhotoResult<Album> {
        if let Some(name) = &changes.name {
            check_name(name)?;
        }
        self.get_owned(owner_id, album_id).await?;

        self.relational
            .update_album(album_id, changes)
            .await
            .map_err(PhotoError::Database)?
            .ok_or(PhotoError::NotFound("Album"))
    }

    /// Delete an album; its photos are kept
    #[instrument(skip(self))]
    pub async fn delete(&self, owner_id: i64, album_id: Uuid) -> PhotoResult<()> {
        self.get_owned(owner_id, album_id).await?;

        let deleted = self
            .relational
            .delete_album(album_id)
            .await
            .map_err(PhotoError::Database)?;
        if !deleted {
            return Err(PhotoError::NotFound("Album"));
        }
        Ok(())
    }

    pub async fn photos(&self, owner_id: i64, album_id: Uuid, page: Page) -> PhotoResult<Vec<Photo>> {
        self.get_owned(owner_id, album_id).await?;

        self.relational
            .list_album_photos(album_id, page)
            .await
            .map_err(PhotoError::Database)
    }

    /// Associate a photo with an album
    ///
    /// The album must exist and belong to `owner_id`, the photo must exist and
    /// belong to `owner_id`, and the pair must not be associated yet. Every
    /// one of those failures is reported as the same `NotAssociable` error so
    /// callers cannot probe for other users' albums or photos.
    #[instrument(skip(self))]
    pub async fn add_photo(
        &self,
        owner_id: i64,
        album_id: Uuid,
        photo_id: Uuid,
    ) -> PhotoResult<AlbumPhoto> {
        let album = self
            .relational
            .get_album(album_id)
            .await
            .map_err(PhotoError::Database)?;
        if !album.is_some_and(|a| a.user_id == owner_id) {
            return Err(PhotoError::NotAssociable);
        }

        let photo = self
            .relational
            .get_photo(photo_id)
            .await
            .map_err(PhotoError::Database)?;
        if !photo.is_some_and(|p| p.user_id == owner_id) {
            return Err(PhotoError::NotAssociable);
        }

        let already = self
            .relational
            .is_photo_in_album(album_id, photo_id)
            .await
            .map_err(PhotoError::Database)?;
        if already {
            return Err(PhotoError::NotAssociable);
        }

        let association = self
            .relational
            .add_album_photo(album_id, photo_id)
            .await
            .map_err(PhotoError::Database)?;

        counter!("photos.albums.photos_added").increment(1);
        Ok(association)
    }

    pub async fn remove_photo(
        &self,
        owner_id: i64,
        album_id: Uuid,
        photo_id: Uuid,
    ) -> PhotoResult<()> {
        self.get_owned(owner_id, album_id).await?;

        let removed = self
            .relational
            .remove_album_photo(album_id, photo_id)
            .await
            .map_err(PhotoError::Database)?;
        if !removed {
            return Err(PhotoError::NotFound("Photo in album"));
        }
        Ok(())
    }

    pub async fn count(&self, owner_id: i64) -> PhotoResult<i64> {
        self.relational
            .count_albums(owner_id)
            .await
            .map_err(PhotoError::Database)
    }

    pub async fn photo_count(&self, owner_id: i64, album_id: Uuid) -> PhotoResult<AlbumPhotoCount> {
        self.get_owned(owner_id, album_id).await?;

        let total = self
            .relational
            .count_album_photos(album_id)
            .await
            .map_err(PhotoError::Database)?;

        Ok(AlbumPhotoCount { album_id, total })
    }
}

fn check_name(name: &str) -> PhotoResult<()> {
    let len = name.chars().count();
    if len == 0 || len > NAME_MAX_LEN {
        return Err(PhotoError::validation(format!(
            "Album name must be between 1 and {} characters",
            NAME_MAX_LEN
        )));
    }
    Ok(())
}
