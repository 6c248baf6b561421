//! Object-finalized notifications.
//!
//! Two payload shapes are accepted: a flat `{bucket, object_path}` event
//! (`name` is accepted in place of `object_path`), and the S3 bucket
//! notification envelope with one or more `Records`.

use serde::Deserialize;
use thiserror::Error;

/// A new object was written to the bucket
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObjectFinalizedEvent {
    /// Bucket holding the object
    pub bucket: String,
    /// Object key
    #[serde(alias = "name")]
    pub object_path: String,
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Message has no payload")]
    EmptyPayload,

    #[error("Failed to deserialize object event: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Object event carries no records")]
    NoRecords,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Payload {
    Notification {
        #[serde(rename = "Records")]
        records: Vec<NotificationRecord>,
    },
    Single(ObjectFinalizedEvent),
}

#[derive(Debug, Deserialize)]
struct NotificationRecord {
    s3: NotificationEntity,
}

#[derive(Debug, Deserialize)]
struct NotificationEntity {
    bucket: NotificationBucket,
    object: NotificationObject,
}

#[derive(Debug, Deserialize)]
struct NotificationBucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct NotificationObject {
    key: String,
}

/// Decode a message payload into the events it carries
pub fn parse_events(payload: &[u8]) -> Result<Vec<ObjectFinalizedEvent>, EventError> {
    if payload.is_empty() {
        return Err(EventError::EmptyPayload);
    }

    match serde_json::from_slice(payload)? {
        Payload::Single(event) => Ok(vec![event]),
        Payload::Notification { records } if records.is_empty() => Err(EventError::NoRecords),
        Payload::Notification { records } => Ok(records
            .into_iter()
            .map(|record| ObjectFinalizedEvent {
                bucket: record.s3.bucket.name,
                object_path: record.s3.object.key,
            })
            .collect()),
    }
}
