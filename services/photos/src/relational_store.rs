use crate::config::DatabaseConfig;
use crate::models::{
    Album, AlbumChanges, AlbumPhoto, NewPhoto, Page, Photo, PhotoChanges, PhotoStatus, User,
    UserChanges,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// A username or email is already held by another account
///
/// Returned inside the `anyhow::Error` of `create_user` and `update_user` when
/// the write hits a unique constraint, so callers can tell it apart from an
/// outage with `err.is::<DuplicateUser>()`.
#[derive(Debug, Error)]
#[error("Username or email is already in use")]
pub struct DuplicateUser;

/// Authoritative store for users, photos, albums and album membership
///
/// Every method is its own unit of work: a pooled connection is held for the
/// duration of that call only, never across calls to other stores.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    // Users
    async fn create_user(&self, username: &str, email: &str, password_hash: &str) -> Result<User>;
    async fn get_user(&self, id: i64) -> Result<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn list_users(&self, page: Page) -> Result<Vec<User>>;
    async fn update_user(&self, id: i64, changes: UserChanges) -> Result<Option<User>>;
    async fn delete_user(&self, id: i64) -> Result<bool>;

    // Photos
    async fn create_photo(&self, photo: NewPhoto) -> Result<Photo>;
    async fn get_photo(&self, id: Uuid) -> Result<Option<Photo>>;
    async fn list_photos(
        &self,
        user_id: i64,
        status: Option<PhotoStatus>,
        page: Page,
    ) -> Result<Vec<Photo>>;
    async fn update_photo(&self, id: Uuid, changes: PhotoChanges) -> Result<Option<Photo>>;
    async fn delete_photo(&self, id: Uuid) -> Result<bool>;
    async fn count_photos(&self, user_id: i64, status: Option<PhotoStatus>) -> Result<i64>;

    // Albums
    async fn create_album(
        &self,
        user_id: i64,
        name: &str,
        description: Option<&str>,
    ) -> Result<Album>;
    async fn get_album(&self, id: Uuid) -> Result<Option<Album>>;
    async fn list_albums(&self, user_id: i64, page: Page) -> Result<Vec<Album>>;
    async fn update_album(&self, id: Uuid, changes: AlbumChanges) -> Result<Option<Album>>;
    async fn delete_album(&self, id: Uuid) -> Result<bool>;
    async fn count_albums(&self, user_id: i64) -> Result<i64>;

    // Album membership
    async fn add_album_photo(&self, album_id: Uuid, photo_id: Uuid) -> Result<AlbumPhoto>;
    async fn is_photo_in_album(&self, album_id: Uuid, photo_id: Uuid) -> Result<bool>;
    async fn remove_album_photo(&self, album_id: Uuid, photo_id: Uuid) -> Result<bool>;
    async fn list_album_photos(&self, album_id: Uuid, page: Page) -> Result<Vec<Photo>>;
    async fn count_album_photos(&self, album_id: Uuid) -> Result<i64>;

    /// Connectivity probe
    async fn ping(&self) -> Result<()>;
}

/// PostgreSQL-backed relational store
pub struct PgRelationalStore {
    pool: PgPool,
}

impl PgRelationalStore {
    /// Create a new store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

fn user_write_error(e: sqlx::Error, action: &'static str) -> anyhow::Error {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return DuplicateUser.into();
        }
    }
    anyhow::Error::new(e).context(action)
}

const USER_COLUMNS: &str = "id, username, email, password_hash, created_at, updated_at";
const PHOTO_COLUMNS: &str = "id, user_id, storage_path, status, created_at";
const ALBUM_COLUMNS: &str = "id, user_id, name, description, created_at, updated_at";

#[async_trait]
impl RelationalStore for PgRelationalStore {
    #[instrument(skip(self, password_hash))]
    async fn create_user(&self, username: &str, email: &str, password_hash: &str) -> Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, password_hash, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| user_write_error(e, "Failed to insert user"))?;

        debug!(user_id = user.id, "User created");
        Ok(user)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query user")
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query user by email")
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query user by username")
    }

    async fn list_users(&self, page: Page) -> Result<Vec<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id ASC LIMIT $1 OFFSET $2"
        ))
        .bind(page.limit)
        .bind(page.skip)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list users")
    }

    #[instrument(skip(self, changes))]
    async fn update_user(&self, id: i64, changes: UserChanges) -> Result<Option<User>> {
        if changes.is_empty() {
            return self.get_user(id).await;
        }

        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET username = COALESCE($2, username),
                email = COALESCE($3, email),
                password_hash = COALESCE($4, password_hash),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(changes.username)
        .bind(changes.email)
        .bind(changes.password_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| user_write_error(e, "Failed to update user"))
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete user")?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, photo), fields(photo_id = %photo.id, user_id = photo.user_id))]
    async fn create_photo(&self, photo: NewPhoto) -> Result<Photo> {
        let created = sqlx::query_as::<_, Photo>(&format!(
            r#"
            INSERT INTO photos (id, user_id, storage_path, status, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING {PHOTO_COLUMNS}
            "#
        ))
        .bind(photo.id)
        .bind(photo.user_id)
        .bind(&photo.storage_path)
        .bind(photo.status.as_str())
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert photo")?;

        debug!(photo_id = %created.id, status = %created.status, "Photo row created");
        Ok(created)
    }

    async fn get_photo(&self, id: Uuid) -> Result<Option<Photo>> {
        sqlx::query_as::<_, Photo>(&format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query photo")
    }

    async fn list_photos(
        &self,
        user_id: i64,
        status: Option<PhotoStatus>,
        page: Page,
    ) -> Result<Vec<Photo>> {
        sqlx::query_as::<_, Photo>(&format!(
            r#"
            SELECT {PHOTO_COLUMNS} FROM photos
            WHERE user_id = $1
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(user_id)
        .bind(status.map(|s| s.as_str()))
        .bind(page.limit)
        .bind(page.skip)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list photos")
    }

    #[instrument(skip(self, changes))]
    async fn update_photo(&self, id: Uuid, changes: PhotoChanges) -> Result<Option<Photo>> {
        if changes.is_empty() {
            return self.get_photo(id).await;
        }

        sqlx::query_as::<_, Photo>(&format!(
            r#"
            UPDATE photos
            SET storage_path = COALESCE($2, storage_path),
                status = COALESCE($3, status)
            WHERE id = $1
            RETURNING {PHOTO_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(changes.storage_path)
        .bind(changes.status.map(|s| s.as_str()))
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update photo")
    }

    #[instrument(skip(self))]
    async fn delete_photo(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM photos WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete photo")?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_photos(&self, user_id: i64, status: Option<PhotoStatus>) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM photos
            WHERE user_id = $1
              AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(user_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_one(&self.pool)
        .await
        .context("Failed to count photos")?;

        Ok(count.0)
    }

    #[instrument(skip(self, description))]
    async fn create_album(
        &self,
        user_id: i64,
        name: &str,
        description: Option<&str>,
    ) -> Result<Album> {
        sqlx::query_as::<_, Album>(&format!(
            r#"
            INSERT INTO albums (id, user_id, name, description, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            RETURNING {ALBUM_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(name)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert album")
    }

    async fn get_album(&self, id: Uuid) -> Result<Option<Album>> {
        sqlx::query_as::<_, Album>(&format!("SELECT {ALBUM_COLUMNS} FROM albums WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query album")
    }

    async fn list_albums(&self, user_id: i64, page: Page) -> Result<Vec<Album>> {
        sqlx::query_as::<_, Album>(&format!(
            r#"
            SELECT {ALBUM_COLUMNS} FROM albums
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(user_id)
        .bind(page.limit)
        .bind(page.skip)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list albums")
    }

    #[instrument(skip(self, changes))]
    async fn update_album(&self, id: Uuid, changes: AlbumChanges) -> Result<Option<Album>> {
        if changes.is_empty() {
            return self.get_album(id).await;
        }

        sqlx::query_as::<_, Album>(&format!(
            r#"
            UPDATE albums
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {ALBUM_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(changes.name)
        .bind(changes.description)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update album")
    }

    #[instrument(skip(self))]
    async fn delete_album(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM albums WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete album")?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_albums(&self, user_id: i64) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM albums WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count albums")?;

        Ok(count.0)
    }

    #[instrument(skip(self))]
    async fn add_album_photo(&self, album_id: Uuid, photo_id: Uuid) -> Result<AlbumPhoto> {
        sqlx::query_as::<_, AlbumPhoto>(
            r#"
            INSERT INTO album_photos (id, album_id, photo_id, added_at)
            VALUES ($1, $2, $3, NOW())
            RETURNING id, album_id, photo_id, added_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(album_id)
        .bind(photo_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert album photo")
    }

    async fn is_photo_in_album(&self, album_id: Uuid, photo_id: Uuid) -> Result<bool> {
        let found: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM album_photos WHERE album_id = $1 AND photo_id = $2
            )
            "#,
        )
        .bind(album_id)
        .bind(photo_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to query album membership")?;

        Ok(found.0)
    }

    #[instrument(skip(self))]
    async fn remove_album_photo(&self, album_id: Uuid, photo_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM album_photos WHERE album_id = $1 AND photo_id = $2")
            .bind(album_id)
            .bind(photo_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete album photo")?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_album_photos(&self, album_id: Uuid, page: Page) -> Result<Vec<Photo>> {
        sqlx::query_as::<_, Photo>(
            r#"
            SELECT p.id, p.user_id, p.storage_path, p.status, p.created_at
            FROM photos p
            JOIN album_photos ap ON ap.photo_id = p.id
            WHERE ap.album_id = $1
            ORDER BY ap.added_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(album_id)
        .bind(page.limit)
        .bind(page.skip)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list album photos")
    }

    async fn count_album_photos(&self, album_id: Uuid) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM album_photos WHERE album_id = $1")
            .bind(album_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count album photos")?;

        Ok(count.0)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }
}
