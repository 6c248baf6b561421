//! Object-store key layout.
//!
//! Originals live at `users/{user_id}/photos/{photo_id}{ext}`. Thumbnails are
//! stored next to them under a `thumbnails/` segment with a size suffix:
//! `users/{user_id}/photos/thumbnails/{photo_id}_{size}{ext}`.

use uuid::Uuid;

const PHOTOS_SEGMENT: &str = "/photos/";
const THUMBNAILS_SEGMENT: &str = "/thumbnails/";

/// Thumbnail size names and their bounding boxes, in pixels per side
pub const THUMBNAIL_SIZES: [(&str, u32); 3] = [("small", 150), ("medium", 300), ("large", 600)];

/// Build the key for an original photo
pub fn photo_object_path(user_id: i64, photo_id: Uuid, ext: &str) -> String {
    format!("users/{}/photos/{}{}", user_id, photo_id, ext)
}

/// Pick the extension for a new object, preferring the client filename
///
/// Returns the extension including its leading dot, or an empty string when
/// neither the filename nor the content type yield one.
pub fn extension_for(filename: Option<&str>, content_type: &str) -> String {
    let from_name = filename.and_then(|name| {
        let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
        match base.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && is_safe_extension(ext) => {
                Some(format!(".{}", ext.to_ascii_lowercase()))
            }
            _ => None,
        }
    });

    from_name.unwrap_or_else(|| match content_type.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => ".jpg".to_string(),
        "image/png" => ".png".to_string(),
        "image/gif" => ".gif".to_string(),
        "image/webp" => ".webp".to_string(),
        _ => String::new(),
    })
}

fn is_safe_extension(ext: &str) -> bool {
    !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Whether a key is a derived thumbnail
pub fn is_thumbnail_path(path: &str) -> bool {
    path.contains(THUMBNAILS_SEGMENT) || path.starts_with("thumbnails/")
}

/// Whether a key lives in the photo namespace
pub fn is_photo_path(path: &str) -> bool {
    path.contains(PHOTOS_SEGMENT)
}

/// Derive the thumbnail key for an original and a size name
///
/// `users/1/photos/abc.jpg` + `small` -> `users/1/photos/thumbnails/abc_small.jpg`.
/// Originals without an extension get `.jpg`.
pub fn thumbnail_path(original: &str, size_name: &str) -> String {
    let (directory, filename) = match original.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, original),
    };

    let (stem, ext) = match filename.rsplit_once('.') {
        Some((stem, ext)) => (stem, ext),
        None => (filename, "jpg"),
    };

    match directory {
        Some(dir) => format!("{}/thumbnails/{}_{}.{}", dir, stem, size_name, ext),
        None => format!("thumbnails/{}_{}.{}", stem, size_name, ext),
    }
}

/// Recover the photo id from the filename stem of an original's key
pub fn photo_id_from_path(path: &str) -> Option<Uuid> {
    let (_, filename) = path.rsplit_once(PHOTOS_SEGMENT)?;
    let stem = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename);
    Uuid::parse_str(stem).ok()
}

/// Keys of every thumbnail that may exist for an original
pub fn thumbnail_paths(original: &str) -> Vec<String> {
    THUMBNAIL_SIZES
        .iter()
        .map(|(size_name, _)| thumbnail_path(original, size_name))
        .collect()
}

/// Split an `s3://bucket/key` URI into bucket and key
pub fn parse_object_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("s3://")?;
    let (bucket, key) = rest.split_once('/')?;
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some((bucket, key))
}
