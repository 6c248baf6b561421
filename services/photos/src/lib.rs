//! Photo Service
//!
//! Backend for storing, organizing and generating user photos. A photo lives
//! in three places: a row in PostgreSQL (the record of truth), the original
//! bytes in an S3 bucket, and a JSON metadata document. Requests are served
//! over an axum HTTP API; thumbnails are produced out of band by the
//! `thumbnailer` service and recorded back into the metadata document.
//!
//! ## Features
//!
//! - **Uploads**: validated multipart uploads written bytes-first, then row,
//!   then metadata, with the row marked `processed` at the end
//! - **AI Generation**: text-to-image and reference-image generation through
//!   the Gemini API, stored exactly like uploads plus provenance metadata
//! - **Albums**: owner-scoped collections with idempotence-checked membership
//! - **Signed URLs**: time-limited access to originals and thumbnails
//! - **Accounts**: bcrypt passwords and HS256 access/refresh tokens
//!
//! ## Architecture
//!
//! ```text
//!  HTTP clients
//!       │
//!       ▼
//! ┌──────────────┐     ┌──────────────┐
//! │ API (axum)   │────▶│ Gemini       │
//! └──────────────┘     │ generator    │
//!       │              └──────────────┘
//!       ▼
//! ┌──────────────┐
//! │ Workflows    │
//! └──────────────┘
//!   │     │     │
//!   ▼     ▼     ▼
//! ┌────┐┌────┐┌──────────┐           ┌──────────────┐
//! │ PG ││ S3 ││ Metadata │◀──────────│ Thumbnailer  │
//! │rows││blob││ documents│           │ (Kafka)      │
//! └────┘└────┘└──────────┘           └──────────────┘
//!          │                                 ▲
//!          └────── object-finalized ─────────┘
//! ```

pub mod ai_generator;
pub mod api;
pub mod auth;
pub mod config;
pub mod document_store;
pub mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod models;
pub mod object_store;
pub mod paths;
pub mod relational_store;
pub mod workflow;

pub use ai_generator::{AiImageGenerator, AspectRatio, GeminiImageGenerator, GeneratedImage};
pub use api::{create_router, start_api_server, AppState};
pub use auth::{TokenIssuer, TokenPair, TokenType};
pub use config::Config;
pub use document_store::{Document, DocumentStore, PgDocumentStore};
pub use error::{PhotoError, PhotoResult, StepOutcome};
pub use models::{Album, AlbumPhoto, Page, Photo, PhotoCounts, PhotoStatus, User};
pub use object_store::{DeleteOutcome, ObjectStore, S3ObjectStore};
pub use relational_store::{PgRelationalStore, RelationalStore};
pub use workflow::{AlbumWorkflow, PhotoWorkflow, UserService};
