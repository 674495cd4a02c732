//! Screenshot downsizing before a request goes out.
//!
//! Resizing is an injected collaborator so callers can swap in their own
//! compression; `PixelBudgetResizer` is what the model uses by default.

use async_trait::async_trait;
use base64::Engine as _;
use futures_util::future::try_join_all;

use crate::errors::{VlmError, VlmResult};
use crate::llm::types::ImageAttachment;

#[async_trait]
pub trait ImageResizer: Send + Sync {
    /// Return an image whose pixel count does not exceed `max_pixels`.
    async fn resize(&self, image: &ImageAttachment, max_pixels: u64) -> VlmResult<ImageAttachment>;
}

/// Proportional Lanczos3 downscale, re-encoded in the source format.
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelBudgetResizer;

#[async_trait]
impl ImageResizer for PixelBudgetResizer {
    async fn resize(&self, image: &ImageAttachment, max_pixels: u64) -> VlmResult<ImageAttachment> {
        let image = image.clone();
        tokio::task::spawn_blocking(move || resize_to_budget(&image, max_pixels))
            .await
            .map_err(|e| VlmError::Image(format!("resize task failed: {e}")))?
    }
}

/// Resize every image concurrently; output order matches input order.
pub async fn resize_all(
    resizer: &dyn ImageResizer,
    images: &[ImageAttachment],
    max_pixels: u64,
) -> VlmResult<Vec<ImageAttachment>> {
    try_join_all(images.iter().map(|img| resizer.resize(img, max_pixels))).await
}

/// Target size keeping aspect ratio, or `None` if already within budget.
pub fn fit_within(width: u32, height: u32, max_pixels: u64) -> Option<(u32, u32)> {
    let pixels = width as u64 * height as u64;
    if pixels <= max_pixels || pixels == 0 {
        return None;
    }
    let scale = (max_pixels as f64 / pixels as f64).sqrt();
    let w = ((width as f64 * scale).floor() as u32).max(1);
    let h = ((height as f64 * scale).floor() as u32).max(1);
    Some((w, h))
}

fn resize_to_budget(image: &ImageAttachment, max_pixels: u64) -> VlmResult<ImageAttachment> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(image.base64_data().trim())
        .map_err(|e| VlmError::Image(format!("base64 decode: {e}")))?;
    let format = image::guess_format(&bytes).unwrap_or(image::ImageFormat::Png);
    let img = image::load_from_memory_with_format(&bytes, format)
        .map_err(|e| VlmError::Image(format!("load: {e}")))?;

    let Some((w, h)) = fit_within(img.width(), img.height(), max_pixels) else {
        return Ok(image.clone());
    };

    tracing::debug!(
        from_w = img.width(),
        from_h = img.height(),
        to_w = w,
        to_h = h,
        max_pixels,
        "resizing screenshot"
    );

    let resized = img.resize_exact(w, h, image::imageops::FilterType::Lanczos3);
    // JPEG has no alpha channel
    let resized = if format == image::ImageFormat::Jpeg {
        image::DynamicImage::ImageRgb8(resized.to_rgb8())
    } else {
        resized
    };

    let mut out = Vec::new();
    resized
        .write_to(&mut std::io::Cursor::new(&mut out), format)
        .map_err(|e| VlmError::Image(format!("encode: {e}")))?;

    let b64 = base64::engine::general_purpose::STANDARD.encode(&out);
    Ok(ImageAttachment::from_base64(format.to_mime_type(), &b64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_attachment(w: u32, h: u32) -> ImageAttachment {
        let img = image::RgbaImage::from_pixel(w, h, image::Rgba([10, 20, 30, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        ImageAttachment::from_base64(
            "image/png",
            &base64::engine::general_purpose::STANDARD.encode(&bytes),
        )
    }

    fn dimensions(img: &ImageAttachment) -> (u32, u32) {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(img.base64_data())
            .unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        (decoded.width(), decoded.height())
    }

    #[test]
    fn fit_keeps_aspect_ratio() {
        assert_eq!(fit_within(100, 100, 10_000), None);
        let (w, h) = fit_within(400, 200, 20_000).unwrap();
        assert_eq!((w, h), (200, 100));
        assert!(w as u64 * h as u64 <= 20_000);
    }

    #[tokio::test]
    async fn oversized_image_is_downscaled() {
        let img = png_attachment(200, 100);
        let out = PixelBudgetResizer.resize(&img, 5_000).await.unwrap();
        let (w, h) = dimensions(&out);
        assert!(w as u64 * h as u64 <= 5_000);
        assert_eq!(out.media_type(), "image/png");
    }

    #[tokio::test]
    async fn small_image_is_untouched_and_order_is_kept() {
        let a = png_attachment(10, 10);
        let b = png_attachment(300, 300);
        let out = resize_all(&PixelBudgetResizer, &[a.clone(), b], 10_000)
            .await
            .unwrap();
        assert_eq!(out[0], a);
        let (w, h) = dimensions(&out[1]);
        assert_eq!(w, h);
        assert!(w as u64 * h as u64 <= 10_000);
    }

    #[tokio::test]
    async fn garbage_is_an_image_error() {
        let bad = ImageAttachment::new("data:image/png;base64,@@@");
        let err = PixelBudgetResizer.resize(&bad, 10).await.unwrap_err();
        assert!(matches!(err, VlmError::Image(_)));
    }
}
