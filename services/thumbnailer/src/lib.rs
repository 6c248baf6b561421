//! Photo Thumbnailer
//!
//! Consumes object-finalized events for the photo bucket, renders `small`,
//! `medium` and `large` JPEG thumbnails next to each original under
//! `.../photos/thumbnails/`, and records their URIs in the photo's metadata
//! document so the photo service can sign them.

pub mod config;
pub mod consumer;
pub mod event;
pub mod generator;
pub mod worker;

pub use config::Config;
pub use consumer::ThumbnailConsumer;
pub use event::{parse_events, ObjectFinalizedEvent};
pub use worker::{SkipReason, ThumbnailOutcome, ThumbnailReport, ThumbnailWorker};
