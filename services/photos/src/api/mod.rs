//! HTTP API.

mod ai_photos;
mod albums;
mod auth;
mod photos;
mod users;

use crate::config::ApiConfig;
use crate::error::PhotoError;
use crate::models::{Page, User};
use crate::relational_store::RelationalStore;
use crate::workflow::{check_page, AlbumWorkflow, PhotoWorkflow, UserService};
use anyhow::{Context, Result};
use axum::{
    async_trait,
    extract::{DefaultBodyLimit, FromRequestParts, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Headroom above the upload ceiling for multipart framing and form fields
const BODY_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub photos: PhotoWorkflow,
    pub albums: AlbumWorkflow,
    pub users: UserService,
    pub relational: Arc<dyn RelationalStore>,
    pub service_name: String,
    pub max_upload_bytes: usize,
    /// Signed URL lifetime when the caller does not ask for one
    pub url_expiration_secs: u64,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Handler error, rendered as an [`ErrorResponse`]
#[derive(Debug)]
pub struct ApiError(pub PhotoError);

impl From<PhotoError> for ApiError {
    fn from(err: PhotoError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            PhotoError::Validation(_) | PhotoError::NotAssociable | PhotoError::Conflict(_) => {
                StatusCode::BAD_REQUEST
            }
            PhotoError::NotFound(_) => StatusCode::NOT_FOUND,
            PhotoError::Forbidden(_) => StatusCode::FORBIDDEN,
            PhotoError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            PhotoError::Storage(_)
            | PhotoError::Database(_)
            | PhotoError::Generation(_)
            | PhotoError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Server-side failures are logged in full and reported generically
        let message = if self.0.is_client_error() {
            self.0.to_string()
        } else {
            error!(error = %self.0, code = self.0.code(), "Request failed");
            match &self.0 {
                PhotoError::Generation(_) => "Failed to generate image".to_string(),
                PhotoError::Storage(_) => "Storage operation failed".to_string(),
                _ => "Internal server error".to_string(),
            }
        };

        let body = Json(ErrorResponse {
            error: message,
            code: self.0.code().to_string(),
        });

        if status == StatusCode::UNAUTHORIZED {
            (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Authenticated caller, resolved from a bearer access token
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> ApiResult<Self> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| PhotoError::Unauthorized("Not authenticated".to_string()))?;

        let user = state.users.authenticate(token).await?;
        Ok(CurrentUser(user))
    }
}

/// `skip`/`limit` query parameters
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

impl PageQuery {
    pub fn page(&self) -> ApiResult<Page> {
        Ok(check_page(self.skip, self.limit)?)
    }
}

fn default_limit() -> i64 {
    Page::default().limit
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    let body_limit = state.max_upload_bytes + BODY_OVERHEAD_BYTES;
    let prefix = format!("/api/{}", config.version);

    let api = Router::new()
        .route("/healthy", get(healthy))
        .nest("/auth", auth::routes())
        .nest("/users", users::routes())
        .nest("/photos", photos::routes())
        .nest("/albums", albums::routes())
        .nest("/ai-photos", ai_photos::routes());

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .nest(&prefix, api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": state.service_name
    }))
}

async fn healthy(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "app": state.service_name,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.relational.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": format!("{e:#}")
            })),
        ),
    }
}

/// Start the API server, returning once `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting photo API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::ai_generator::MockAiImageGenerator;
    use crate::auth::TokenIssuer;
    use crate::config::{AuthConfig, UploadConfig};
    use crate::memory::{MemoryDocumentStore, MemoryObjectStore, MemoryRelationalStore};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    pub struct TestApp {
        pub router: Router,
        pub relational: Arc<MemoryRelationalStore>,
        pub objects: Arc<MemoryObjectStore>,
        pub documents: Arc<MemoryDocumentStore>,
        pub users: UserService,
    }

    pub fn test_app(generator: MockAiImageGenerator) -> TestApp {
        let relational = Arc::new(MemoryRelationalStore::new());
        let objects = Arc::new(MemoryObjectStore::new("photos"));
        let documents = Arc::new(MemoryDocumentStore::new());

        let tokens = TokenIssuer::new(&AuthConfig {
            jwt_secret: "router-test-secret".to_string(),
            jwt_algorithm: "HS256".to_string(),
            access_token_expire_minutes: 30,
            refresh_token_expire_days: 7,
        })
        .unwrap();
        let users = UserService::new(relational.clone(), tokens).with_hash_cost(4);
        let upload = UploadConfig::default();

        let state = AppState {
            photos: PhotoWorkflow::new(
                relational.clone(),
                objects.clone(),
                documents.clone(),
                Arc::new(generator),
                upload.clone(),
            ),
            albums: AlbumWorkflow::new(relational.clone()),
            users: users.clone(),
            relational: relational.clone(),
            service_name: "photo-service".to_string(),
            max_upload_bytes: upload.max_upload_bytes,
            url_expiration_secs: 3600,
        };

        TestApp {
            router: create_router(state, &ApiConfig::default()),
            relational,
            objects,
            documents,
            users,
        }
    }

    impl TestApp {
        /// Register a user and return an access token for it
        pub async fn login(&self, username: &str) -> (User, String) {
            let email = format!("{username}@example.com");
            let user = self
                .users
                .register(crate::workflow::NewUser {
                    username: username.to_string(),
                    email: email.clone(),
                    password: "password123".to_string(),
                })
                .await
                .unwrap();
            let pair = self
                .users
                .login(crate::workflow::Credentials {
                    email,
                    password: "password123".to_string(),
                })
                .await
                .unwrap();
            (user, pair.auth_token)
        }

        pub async fn response(&self, request: Request<Body>) -> Response {
            self.router.clone().oneshot(request).await.unwrap()
        }

        pub async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
            let response = self.response(request).await;
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let json = if bytes.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, json)
        }
    }

    pub fn get(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    pub fn send_json(method: &str, uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    pub fn empty(method: &str, uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    /// Multipart body with one file part and optional text parts
    pub fn multipart(
        uri: &str,
        token: &str,
        file_field: &str,
        filename: &str,
        content_type: &str,
        bytes: &[u8],
        fields: &[(&str, &str)],
    ) -> Request<Body> {
        let boundary = "photo-test-boundary";
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{file_field}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }
}
