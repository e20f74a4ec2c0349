//! Post-capture processing: upscale, watermark, deliver

pub mod delivery;
pub mod imaging;
pub mod result;

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::capture::attempt::CaptureReport;
use crate::devices::model::CameraIdentity;

use self::delivery::RoutedDelivery;
use self::imaging::{upscale_to_width, Watermarker};
use self::result::CaptureResult;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Photos narrower than this are upscaled
    pub min_width: u32,

    pub watermark: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            min_width: 1920,
            watermark: true,
        }
    }
}

/// Turns a raw capture into a delivered photo.
///
/// Processing failures degrade the photo, never lose it.
pub struct ImagePipeline {
    options: PipelineOptions,
    watermarker: Option<Arc<dyn Watermarker>>,
    delivery: RoutedDelivery,
}

impl ImagePipeline {
    pub fn new(
        options: PipelineOptions,
        watermarker: Option<Arc<dyn Watermarker>>,
        delivery: RoutedDelivery,
    ) -> Self {
        Self {
            options,
            watermarker,
            delivery,
        }
    }

    pub async fn process(&self, report: CaptureReport, identity: CameraIdentity) -> CaptureResult {
        let photo = report.output.clone();
        let filename = photo
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| crate::utils::capture_filename(Utc::now()));

        if let Err(e) = upscale_to_width(&photo, self.options.min_width).await {
            warn!("Upscale of {} failed: {}", filename, e);
        }

        let mut watermarked = false;
        if self.options.watermark {
            if let Some(watermarker) = &self.watermarker {
                match watermarker.apply(&photo).await {
                    Ok(applied) => watermarked = applied,
                    Err(e) => warn!("Watermark of {} failed, keeping original: {}", filename, e),
                }
            }
        }

        let delivery = self.delivery.route(&photo, &filename).await;
        info!(
            "Processed {} (method {}, watermark {}, url {})",
            filename,
            report.method,
            watermarked,
            delivery.url().unwrap_or("-")
        );

        CaptureResult {
            filename,
            local_path: photo,
            method: report.method,
            placeholder: report.placeholder,
            identity,
            attempts: report.attempts,
            delivery,
            captured_at: Utc::now(),
            watermarked,
        }
    }
}
