//! Capture methods.
//!
//! Each method resolves the node it will use, then writes a single frame to
//! the output path. Success is judged by the chain from the output file,
//! not from the tool's exit status alone.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageBuffer, Rgb};
use tracing::{debug, info, warn};

use crate::capture::attempt::{CaptureContext, CaptureMethodKind};
use crate::devices::formats::{choose_format, PixelFormat};
use crate::devices::model::{device_index, CameraFamily};
use crate::devices::profiles::Resolution;
use crate::devices::registry::DeviceRegistry;
use crate::errors::BoothError;
use crate::system::command::CommandRunner;

/// Shared options for the device-based methods
#[derive(Debug, Clone)]
pub struct StillOptions {
    /// Frame grabber executable
    pub program: String,

    /// Upper bound on one grab
    pub timeout: Duration,
}

impl Default for StillOptions {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

#[async_trait]
pub trait CaptureMethod: Send + Sync {
    fn kind(&self) -> CaptureMethodKind;

    /// Whether this method should be tried for `ctx`
    fn applies(&self, ctx: &CaptureContext) -> bool;

    /// Whether the method opens a video device (and so needs the preview paused)
    fn uses_device(&self) -> bool {
        true
    }

    /// Node this method will capture from
    async fn resolve(&self, ctx: &CaptureContext) -> Result<Option<String>, BoothError>;

    /// Write one image to `output`
    async fn capture(
        &self,
        ctx: &CaptureContext,
        device_path: Option<&str>,
        output: &Path,
    ) -> Result<(), BoothError>;
}

/// Arguments grabbing one frame from `device_path` into `output`
pub fn still_args(device_path: &str, size: Resolution, format: PixelFormat, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-f".into(),
        "v4l2".into(),
    ];
    if let Some(format) = format.ffmpeg_input_format() {
        args.push("-input_format".into());
        args.push(format.into());
    }
    args.extend([
        "-video_size".into(),
        size.to_string(),
        "-i".into(),
        device_path.to_string(),
        "-frames:v".into(),
        "1".into(),
        "-q:v".into(),
        "2".into(),
        output.to_string_lossy().into_owned(),
    ]);
    args
}

async fn grab_still(
    runner: &dyn CommandRunner,
    options: &StillOptions,
    device_path: &str,
    size: Resolution,
    format: PixelFormat,
    output: &Path,
) -> Result<(), BoothError> {
    let argv = still_args(device_path, size, format, output);
    debug!("Grabbing {} still from {} ({:?})", size, device_path, format);

    let result = runner.run(&options.program, &argv, options.timeout).await?;
    if result.success() {
        Ok(())
    } else {
        Err(BoothError::CaptureError(format!(
            "{} exited with {:?}: {}",
            options.program,
            result.status,
            result.stderr.trim()
        )))
    }
}

fn require_device(device_path: Option<&str>) -> Result<&str, BoothError> {
    device_path.ok_or_else(|| BoothError::DeviceError("no device resolved".to_string()))
}

/// Model-specific capture for supported DSLRs.
///
/// Re-runs the family's node selection and negotiates the pixel format
/// against what the node actually advertises.
pub struct SpecializedCapture {
    family: CameraFamily,
    registry: Arc<DeviceRegistry>,
    runner: Arc<dyn CommandRunner>,
    options: StillOptions,
}

impl SpecializedCapture {
    pub fn new(
        family: CameraFamily,
        registry: Arc<DeviceRegistry>,
        runner: Arc<dyn CommandRunner>,
        options: StillOptions,
    ) -> Self {
        Self {
            family,
            registry,
            runner,
            options,
        }
    }
}

#[async_trait]
impl CaptureMethod for SpecializedCapture {
    fn kind(&self) -> CaptureMethodKind {
        match self.family {
            CameraFamily::FiveDMarkIV => CaptureMethodKind::Specialized5d,
            _ => CaptureMethodKind::SpecializedR6,
        }
    }

    fn applies(&self, ctx: &CaptureContext) -> bool {
        ctx.identity.connected && ctx.identity.family == self.family && ctx.profile.specialized
    }

    async fn resolve(&self, ctx: &CaptureContext) -> Result<Option<String>, BoothError> {
        let candidates = self.registry.capture_candidates().await;
        if let Some(device) = ctx.profile.selection.select(&candidates) {
            return Ok(Some(device.path.clone()));
        }

        // Selection found nothing; the bound node is still worth a try
        match &ctx.identity.device_path {
            Some(path) if self.registry.verify(path).await => Ok(Some(path.clone())),
            _ => Err(BoothError::DeviceError(format!(
                "no capture device available for {}",
                self.family
            ))),
        }
    }

    async fn capture(
        &self,
        ctx: &CaptureContext,
        device_path: Option<&str>,
        output: &Path,
    ) -> Result<(), BoothError> {
        let device_path = require_device(device_path)?;
        let supported = self.registry.list_formats(device_path).await;
        let format = choose_format(&supported, ctx.profile.input_format);

        grab_still(
            self.runner.as_ref(),
            &self.options,
            device_path,
            ctx.profile.still,
            format,
            output,
        )
        .await
    }
}

/// Generic capture from the bound node at the profile's still size
pub struct StandardCapture {
    registry: Arc<DeviceRegistry>,
    runner: Arc<dyn CommandRunner>,
    options: StillOptions,
}

impl StandardCapture {
    pub fn new(registry: Arc<DeviceRegistry>, runner: Arc<dyn CommandRunner>, options: StillOptions) -> Self {
        Self {
            registry,
            runner,
            options,
        }
    }
}

#[async_trait]
impl CaptureMethod for StandardCapture {
    fn kind(&self) -> CaptureMethodKind {
        CaptureMethodKind::StandardV4l2
    }

    fn applies(&self, ctx: &CaptureContext) -> bool {
        ctx.identity.connected && ctx.identity.device_path.is_some()
    }

    async fn resolve(&self, ctx: &CaptureContext) -> Result<Option<String>, BoothError> {
        let path = ctx
            .identity
            .device_path
            .clone()
            .ok_or_else(|| BoothError::DeviceError("no device bound".to_string()))?;

        if !self.registry.verify(&path).await {
            return Err(BoothError::DeviceError(format!("{} failed verification", path)));
        }
        Ok(Some(path))
    }

    async fn capture(
        &self,
        ctx: &CaptureContext,
        device_path: Option<&str>,
        output: &Path,
    ) -> Result<(), BoothError> {
        grab_still(
            self.runner.as_ref(),
            &self.options,
            require_device(device_path)?,
            ctx.profile.still,
            ctx.profile.input_format,
            output,
        )
        .await
    }
}

/// Last device-based resort: the node next to the bound one, or any other
/// verified node, at a lower resolution with a negotiated format
pub struct FallbackCapture {
    registry: Arc<DeviceRegistry>,
    runner: Arc<dyn CommandRunner>,
    options: StillOptions,
}

impl FallbackCapture {
    pub fn new(registry: Arc<DeviceRegistry>, runner: Arc<dyn CommandRunner>, options: StillOptions) -> Self {
        Self {
            registry,
            runner,
            options,
        }
    }
}

#[async_trait]
impl CaptureMethod for FallbackCapture {
    fn kind(&self) -> CaptureMethodKind {
        CaptureMethodKind::FallbackV4l2
    }

    fn applies(&self, ctx: &CaptureContext) -> bool {
        ctx.identity.connected && ctx.identity.device_path.is_some()
    }

    async fn resolve(&self, ctx: &CaptureContext) -> Result<Option<String>, BoothError> {
        let bound = ctx.identity.device_path.clone().unwrap_or_default();

        if let Some(index) = device_index(&bound) {
            let neighbour = self.registry.device_path(index + 1);
            if self.registry.verify(&neighbour).await {
                return Ok(Some(neighbour));
            }
        }

        self.registry
            .capture_candidates()
            .await
            .into_iter()
            .find(|device| device.path != bound)
            .map(|device| Some(device.path))
            .ok_or_else(|| BoothError::DeviceError("no alternate capture device".to_string()))
    }

    async fn capture(
        &self,
        ctx: &CaptureContext,
        device_path: Option<&str>,
        output: &Path,
    ) -> Result<(), BoothError> {
        grab_still(
            self.runner.as_ref(),
            &self.options,
            require_device(device_path)?,
            ctx.profile.fallback_still,
            PixelFormat::Auto,
            output,
        )
        .await
    }
}

/// Copies the stock placeholder image so the booth always produces a result.
///
/// When the asset is missing a plain frame is rendered instead.
pub struct MockCapture {
    asset: PathBuf,
    size: Resolution,
}

impl MockCapture {
    pub fn new(asset: PathBuf) -> Self {
        Self {
            asset,
            size: Resolution::new(1280, 720),
        }
    }
}

#[async_trait]
impl CaptureMethod for MockCapture {
    fn kind(&self) -> CaptureMethodKind {
        CaptureMethodKind::Mock
    }

    fn applies(&self, _ctx: &CaptureContext) -> bool {
        true
    }

    fn uses_device(&self) -> bool {
        false
    }

    async fn resolve(&self, _ctx: &CaptureContext) -> Result<Option<String>, BoothError> {
        Ok(None)
    }

    async fn capture(
        &self,
        _ctx: &CaptureContext,
        _device_path: Option<&str>,
        output: &Path,
    ) -> Result<(), BoothError> {
        if tokio::fs::try_exists(&self.asset).await.unwrap_or(false) {
            tokio::fs::copy(&self.asset, output).await?;
            info!("Placeholder image written to {}", output.display());
            return Ok(());
        }

        warn!(
            "Placeholder asset {} missing; rendering a blank frame",
            self.asset.display()
        );
        let size = self.size;
        let output = output.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<(), BoothError> {
            let frame: ImageBuffer<Rgb<u8>, Vec<u8>> =
                ImageBuffer::from_pixel(size.width, size.height, Rgb([48, 48, 48]));
            frame.save_with_format(&output, image::ImageFormat::Jpeg)?;
            Ok(())
        })
        .await
        .map_err(|e| BoothError::Internal(e.to_string()))?
    }
}
