//! Thumbnail rendering.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};

pub use photo_service::paths::THUMBNAIL_SIZES;

/// Content type of every rendered thumbnail
pub const THUMBNAIL_CONTENT_TYPE: &str = "image/jpeg";

/// Decode a source image and flatten it onto opaque white
pub fn decode_flattened(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).context("Failed to decode source image")?;
    Ok(flatten(&image))
}

/// Composite transparent and palette images over white
pub fn flatten(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = u32::from(a);
        let blend = |c: u8| ((u32::from(c) * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        flattened.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    flattened
}

/// Dimensions that fit `width`x`height` inside a `max_side` box, never upscaling
pub fn fit_within(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    if width <= max_side && height <= max_side {
        return (width, height);
    }

    let scale = f64::min(
        f64::from(max_side) / f64::from(width),
        f64::from(max_side) / f64::from(height),
    );
    let scaled = |side: u32| ((f64::from(side) * scale).round() as u32).clamp(1, max_side);
    (scaled(width), scaled(height))
}

/// Resize into a `max_side` box and encode as JPEG
pub fn render(source: &RgbImage, max_side: u32, quality: u8) -> Result<Vec<u8>> {
    let (width, height) = fit_within(source.width(), source.height(), max_side);

    let mut encoded = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut encoded, quality);

    if (width, height) == source.dimensions() {
        encoder
            .encode_image(source)
            .context("Failed to encode thumbnail")?;
    } else {
        let resized = image::imageops::resize(source, width, height, FilterType::Lanczos3);
        encoder
            .encode_image(&resized)
            .context("Failed to encode thumbnail")?;
    }

    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png(image: DynamicImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_fit_within_preserves_aspect() {
        assert_eq!(fit_within(400, 200, 150), (150, 75));
        assert_eq!(fit_within(200, 400, 300), (150, 300));
        assert_eq!(fit_within(3000, 10, 150), (150, 1));
    }

    #[test]
    fn test_fit_within_never_upscales() {
        assert_eq!(fit_within(100, 80, 600), (100, 80));
        assert_eq!(fit_within(150, 150, 150), (150, 150));
    }

    #[test]
    fn test_transparent_pixels_become_white() {
        let mut source = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 0]));
        source.put_pixel(1, 0, Rgba([10, 20, 30, 255]));

        let flattened = flatten(&DynamicImage::ImageRgba8(source));

        assert_eq!(flattened.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(flattened.get_pixel(1, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_render_produces_bounded_jpeg() {
        let bytes = png(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            400,
            200,
            Rgba([200, 50, 50, 128]),
        )));
        let source = decode_flattened(&bytes).unwrap();

        let thumbnail = render(&source, 150, 85).unwrap();

        assert_eq!(
            image::guess_format(&thumbnail).unwrap(),
            ImageFormat::Jpeg
        );
        let decoded = image::load_from_memory(&thumbnail).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (150, 75));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_flattened(b"not an image").is_err());
    }
}
