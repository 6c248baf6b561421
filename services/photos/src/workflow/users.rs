use crate::auth::{TokenIssuer, TokenPair, TokenType};
use crate::error::{PhotoError, PhotoResult};
use crate::models::{Page, User, UserChanges};
use crate::relational_store::{DuplicateUser, RelationalStore};
use metrics::counter;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};

const USERNAME_LEN: (usize, usize) = (3, 100);
const EMAIL_LEN: (usize, usize) = (5, 255);
const PASSWORD_LEN: (usize, usize) = (8, 100);

/// Registration request
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Partial account update
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Login request
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Accounts, password checks and token issuing
#[derive(Clone)]
pub struct UserService {
    relational: Arc<dyn RelationalStore>,
    tokens: TokenIssuer,
    hash_cost: u32,
}

impl UserService {
    pub fn new(relational: Arc<dyn RelationalStore>, tokens: TokenIssuer) -> Self {
        Self {
            relational,
            tokens,
            hash_cost: bcrypt::DEFAULT_COST,
        }
    }

    /// Override the bcrypt work factor
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    #[instrument(skip(self, request), fields(username = %request.username))]
    pub async fn register(&self, request: NewUser) -> PhotoResult<User> {
        check_length("username", &request.username, USERNAME_LEN)?;
        check_email(&request.email)?;
        check_length("password", &request.password, PASSWORD_LEN)?;

        if self.email_taken(&request.email, None).await? {
            return Err(PhotoError::Conflict(format!(
                "Email '{}' is already registered",
                request.email
            )));
        }
        if self.username_taken(&request.username, None).await? {
            return Err(PhotoError::Conflict(format!(
                "Username '{}' is already taken",
                request.username
            )));
        }

        let password_hash = self.hash(request.password).await?;
        let user = self
            .relational
            .create_user(&request.username, &request.email, &password_hash)
            .await
            .map_err(user_write_error)?;

        counter!("photos.users.registered").increment(1);
        info!(user_id = user.id, "User registered");
        Ok(user)
    }

    /// Check credentials and issue a token pair
    pub async fn login(&self, credentials: Credentials) -> PhotoResult<TokenPair> {
        let invalid = || PhotoError::Unauthorized("Invalid email or password".to_string());

        let user = self
            .relational
            .get_user_by_email(&credentials.email)
            .await
            .map_err(PhotoError::Database)?
            .ok_or_else(invalid)?;

        if !self.verify(credentials.password, user.password_hash.clone()).await? {
            counter!("photos.auth.failed_logins").increment(1);
            return Err(invalid());
        }

        debug!(user_id = user.id, "User logged in");
        self.tokens.issue_pair(&user).map_err(PhotoError::Internal)
    }

    /// Exchange a refresh token for a new token pair
    pub async fn refresh(&self, refresh_token: &str) -> PhotoResult<TokenPair> {
        let claims = self
            .tokens
            .verify(refresh_token, TokenType::Refresh)
            .map_err(|e| PhotoError::Unauthorized(e.to_string()))?;
        let user_id = claims
            .user_id()
            .map_err(|_| PhotoError::Unauthorized("Invalid user ID in token".to_string()))?;

        let user = self
            .relational
            .get_user(user_id)
            .await
            .map_err(PhotoError::Database)?
            .ok_or(PhotoError::NotFound("User"))?;

        self.tokens.issue_pair(&user).map_err(PhotoError::Internal)
    }

    /// Resolve the user behind an access token
    pub async fn authenticate(&self, access_token: &str) -> PhotoResult<User> {
        let claims = self
            .tokens
            .verify(access_token, TokenType::Access)
            .map_err(|e| PhotoError::Unauthorized(e.to_string()))?;
        let user_id = claims
            .user_id()
            .map_err(|e| PhotoError::Unauthorized(e.to_string()))?;

        self.relational
            .get_user(user_id)
            .await
            .map_err(PhotoError::Database)?
            .ok_or_else(|| PhotoError::Unauthorized("User not found".to_string()))
    }

    pub async fn get(&self, user_id: i64) -> PhotoResult<User> {
        self.relational
            .get_user(user_id)
            .await
            .map_err(PhotoError::Database)?
            .ok_or(PhotoError::NotFound("User"))
    }

    pub async fn list(&self, page: Page) -> PhotoResult<Vec<User>> {
        self.relational
            .list_users(page)
            .await
            .map_err(PhotoError::Database)
    }

    #[instrument(skip(self, update))]
    pub async fn update(&self, user_id: i64, update: UserUpdate) -> PhotoResult<User> {
        if let Some(username) = &update.username {
            check_length("username", username, USERNAME_LEN)?;
        }
        if let Some(email) = &update.email {
            check_email(email)?;
        }
        if let Some(password) = &update.password {
            check_length("password", password, PASSWORD_LEN)?;
        }

        let existing = self.get(user_id).await?;

        if let Some(email) = update.email.as_deref().filter(|e| *e != existing.email) {
            if self.email_taken(email, Some(user_id)).await? {
                return Err(PhotoError::Conflict(format!(
                    "Email '{}' is already registered",
                    email
                )));
            }
        }
        if let Some(username) = update
            .username
            .as_deref()
            .filter(|u| *u != existing.username)
        {
            if self.username_taken(username, Some(user_id)).await? {
                return Err(PhotoError::Conflict(format!(
                    "Username '{}' is already taken",
                    username
                )));
            }
        }

        let password_hash = match update.password {
            Some(password) => Some(self.hash(password).await?),
            None => None,
        };

        self.relational
            .update_user(
                user_id,
                UserChanges {
                    username: update.username,
                    email: update.email,
                    password_hash,
                },
            )
            .await
            .map_err(user_write_error)?
            .ok_or(PhotoError::NotFound("User"))
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: i64) -> PhotoResult<()> {
        let deleted = self
            .relational
            .delete_user(user_id)
            .await
            .map_err(PhotoError::Database)?;
        if !deleted {
            return Err(PhotoError::NotFound("User"));
        }
        info!(user_id, "User deleted");
        Ok(())
    }

    async fn email_taken(&self, email: &str, except: Option<i64>) -> PhotoResult<bool> {
        let found = self
            .relational
            .get_user_by_email(email)
            .await
            .map_err(PhotoError::Database)?;
        Ok(found.is_some_and(|u| Some(u.id) != except))
    }

    async fn username_taken(&self, username: &str, except: Option<i64>) -> PhotoResult<bool> {
        let found = self
            .relational
            .get_user_by_username(username)
            .await
            .map_err(PhotoError::Database)?;
        Ok(found.is_some_and(|u| Some(u.id) != except))
    }

    // bcrypt is CPU bound, keep it off the async workers
    async fn hash(&self, password: String) -> PhotoResult<String> {
        let cost = self.hash_cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| PhotoError::Internal(anyhow::Error::new(e)))?
            .map_err(|e| {
                PhotoError::Internal(anyhow::Error::new(e).context("Failed to hash password"))
            })
    }

    async fn verify(&self, password: String, hash: String) -> PhotoResult<bool> {
        let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| PhotoError::Internal(anyhow::Error::new(e)))?;

        // A malformed stored hash never matches
        Ok(verified.unwrap_or(false))
    }
}

// The pre-checks above race with concurrent writers; the unique constraint decides
fn user_write_error(e: anyhow::Error) -> PhotoError {
    if e.is::<DuplicateUser>() {
        PhotoError::Conflict(e.to_string())
    } else {
        PhotoError::Database(e)
    }
}

fn check_length(field: &str, value: &str, (min, max): (usize, usize)) -> PhotoResult<()> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(PhotoError::validation(format!(
            "{} must be between {} and {} characters",
            field, min, max
        )));
    }
    Ok(())
}

fn check_email(email: &str) -> PhotoResult<()> {
    check_length("email", email, EMAIL_LEN)?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(PhotoError::validation("email must be a valid address")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::memory::MemoryRelationalStore;

    fn service() -> (Arc<MemoryRelationalStore>, UserService) {
        let relational = Arc::new(MemoryRelationalStore::new());
        let tokens = TokenIssuer::new(&AuthConfig {
            jwt_secret: "test-secret".to_string(),
            jwt_algorithm: "HS256".to_string(),
            access_token_expire_minutes: 30,
            refresh_token_expire_days: 7,
        })
        .unwrap();
        let service = UserService::new(relational.clone(), tokens).with_hash_cost(4);
        (relational, service)
    }

    fn alice() -> NewUser {
        NewUser {
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password: "correct horse".to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_hashes_password() {
        let (_, service) = service();
        let user = service.register(alice()).await.unwrap();

        assert_ne!(user.password_hash, "correct horse");
        assert!(bcrypt::verify("correct horse", &user.password_hash).unwrap());
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates() {
        let (_, service) = service();
        service.register(alice()).await.unwrap();

        let mut same_email = alice();
        same_email.username = "alice2".to_string();
        let err = service.register(same_email).await.unwrap_err();
        assert!(matches!(err, PhotoError::Conflict(_)));
        assert!(err.to_string().contains("already registered"));

        let mut same_name = alice();
        same_name.email = "other@example.com".to_string();
        let err = service.register(same_name).await.unwrap_err();
        assert!(err.to_string().contains("already taken"));
    }

    #[tokio::test]
    async fn test_concurrent_registrations_conflict() {
        let (relational, service) = service();

        let (first, second) = tokio::join!(service.register(alice()), service.register(alice()));

        let (ok, err) = match (first, second) {
            (Ok(user), Err(err)) | (Err(err), Ok(user)) => (user, err),
            other => panic!("expected exactly one registration to win: {:?}", other),
        };
        assert_eq!(ok.username, "alice");
        assert!(matches!(err, PhotoError::Conflict(_)));
        assert_eq!(err.code(), "CONFLICT");
        assert_eq!(relational.list_users(Page { skip: 0, limit: 10 }).await.unwrap().len(), 1);
    }

    #[test]
    fn test_unique_violation_maps_to_conflict() {
        assert!(matches!(
            user_write_error(DuplicateUser.into()),
            PhotoError::Conflict(_)
        ));
        assert!(matches!(
            user_write_error(anyhow::anyhow!("connection reset")),
            PhotoError::Database(_)
        ));
    }

    #[tokio::test]
    async fn test_register_validates_fields() {
        let (_, service) = service();
        let mut short = alice();
        short.password = "short".to_string();
        assert!(matches!(
            service.register(short).await,
            Err(PhotoError::Validation(_))
        ));

        let mut bad_email = alice();
        bad_email.email = "not-an-email".to_string();
        assert!(matches!(
            service.register(bad_email).await,
            Err(PhotoError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_login_and_refresh() {
        let (_, service) = service();
        let user = service.register(alice()).await.unwrap();

        let pair = service
            .login(Credentials {
                email: "alice@example.com".to_string(),
                password: "correct horse".to_string(),
            })
            .await
            .unwrap();

        let current = service.authenticate(&pair.auth_token).await.unwrap();
        assert_eq!(current.id, user.id);

        let refreshed = service.refresh(&pair.refresh_token).await.unwrap();
        assert!(service.authenticate(&refreshed.auth_token).await.is_ok());

        // Access tokens cannot be used to refresh
        assert!(matches!(
            service.refresh(&pair.auth_token).await,
            Err(PhotoError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_login_rejects_wrong_password() {
        let (_, service) = service();
        service.register(alice()).await.unwrap();

        let err = service
            .login(Credentials {
                email: "alice@example.com".to_string(),
                password: "wrong password".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PhotoError::Unauthorized(_)));

        let err = service
            .login(Credentials {
                email: "nobody@example.com".to_string(),
                password: "correct horse".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid email or password");
    }

    #[tokio::test]
    async fn test_refresh_for_deleted_user_is_not_found() {
        let (_, service) = service();
        let user = service.register(alice()).await.unwrap();
        let pair = service
            .login(Credentials {
                email: "alice@example.com".to_string(),
                password: "correct horse".to_string(),
            })
            .await
            .unwrap();

        service.delete(user.id).await.unwrap();

        assert!(matches!(
            service.refresh(&pair.refresh_token).await,
            Err(PhotoError::NotFound("User"))
        ));
        assert!(matches!(
            service.delete(user.id).await,
            Err(PhotoError::NotFound("User"))
        ));
    }

    #[tokio::test]
    async fn test_update_checks_conflicts() {
        let (_, service) = service();
        let alice = service.register(alice()).await.unwrap();
        service
            .register(NewUser {
                username: "bobby".to_string(),
                email: "bob@example.com".to_string(),
                password: "another secret".to_string(),
            })
            .await
            .unwrap();

        let err = service
            .update(
                alice.id,
                UserUpdate {
                    email: Some("bob@example.com".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PhotoError::Conflict(_)));

        // Keeping your own email is not a conflict
        let updated = service
            .update(
                alice.id,
                UserUpdate {
                    username: Some("alice_w".to_string()),
                    email: Some("alice@example.com".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.username, "alice_w");
    }
}
