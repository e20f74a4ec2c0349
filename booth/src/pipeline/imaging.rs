//! Watermarking and upscaling.
//!
//! Decoding and encoding are CPU bound and run on the blocking pool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat};
use tracing::debug;

use crate::errors::BoothError;

#[async_trait]
pub trait Watermarker: Send + Sync {
    /// Watermark `photo` in place. Returns whether anything was applied.
    async fn apply(&self, photo: &Path) -> Result<bool, BoothError>;
}

/// Composites a PNG over the bottom-right corner
pub struct OverlayWatermarker {
    asset: PathBuf,

    /// Watermark width relative to the photo width
    scale: f32,

    /// Distance from the edges in pixels
    margin: u32,
}

impl OverlayWatermarker {
    pub fn new(asset: PathBuf) -> Self {
        Self {
            asset,
            scale: 0.2,
            margin: 24,
        }
    }
}

#[async_trait]
impl Watermarker for OverlayWatermarker {
    async fn apply(&self, photo: &Path) -> Result<bool, BoothError> {
        if !tokio::fs::try_exists(&self.asset).await.unwrap_or(false) {
            debug!("No watermark asset at {}", self.asset.display());
            return Ok(false);
        }

        let asset = self.asset.clone();
        let photo = photo.to_path_buf();
        let (scale, margin) = (self.scale, self.margin);

        run_blocking(move || {
            let mut base = image::open(&photo)?.to_rgba8();
            let mark = image::open(&asset)?;

            let target_width = ((base.width() as f32) * scale).round().max(1.0) as u32;
            let target_height =
                ((mark.height() as f32) * target_width as f32 / mark.width().max(1) as f32).round().max(1.0) as u32;
            let mark = mark
                .resize_exact(target_width, target_height, FilterType::Lanczos3)
                .to_rgba8();

            let x = base.width().saturating_sub(mark.width() + margin);
            let y = base.height().saturating_sub(mark.height() + margin);
            imageops::overlay(&mut base, &mark, i64::from(x), i64::from(y));

            save_jpeg(DynamicImage::ImageRgba8(base), &photo)?;
            Ok(true)
        })
        .await
    }
}

/// Enlarge `photo` in place to at least `min_width`, keeping the aspect ratio.
///
/// Returns whether the image was resized.
pub async fn upscale_to_width(photo: &Path, min_width: u32) -> Result<bool, BoothError> {
    let photo = photo.to_path_buf();

    run_blocking(move || {
        let image = image::open(&photo)?;
        if image.width() >= min_width || image.width() == 0 {
            return Ok(false);
        }

        let height = (u64::from(image.height()) * u64::from(min_width) / u64::from(image.width())) as u32;
        debug!(
            "Upscaling {} from {}x{} to {}x{}",
            photo.display(),
            image.width(),
            image.height(),
            min_width,
            height
        );
        let resized = image.resize_exact(min_width, height.max(1), FilterType::Lanczos3);
        save_jpeg(resized, &photo)?;
        Ok(true)
    })
    .await
}

fn save_jpeg(image: DynamicImage, path: &Path) -> Result<(), BoothError> {
    // JPEG has no alpha channel
    DynamicImage::ImageRgb8(image.to_rgb8()).save_with_format(path, ImageFormat::Jpeg)?;
    Ok(())
}

async fn run_blocking<T, F>(work: F) -> Result<T, BoothError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, BoothError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| BoothError::PipelineError(format!("image task failed: {}", e)))?
}
