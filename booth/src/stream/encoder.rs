//! Preview encoder command lines

use serde::Serialize;

use crate::devices::formats::PixelFormat;
use crate::devices::model::{CameraFamily, CameraIdentity};
use crate::devices::profiles::CameraProfile;

/// Multipart boundary emitted by ffmpeg's `mpjpeg` muxer
pub const MJPEG_BOUNDARY: &str = "ffmpeg";

/// Content type of the preview stream
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace;boundary=ffmpeg";

/// Device and model a preview runs against
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamTarget {
    pub device_path: String,
    pub family: CameraFamily,
    pub model: String,
}

impl StreamTarget {
    /// Target for a connected identity
    pub fn from_identity(identity: &CameraIdentity) -> Option<Self> {
        let device_path = identity.device_path.clone()?;
        identity.connected.then(|| Self {
            device_path,
            family: identity.family,
            model: identity.model.clone(),
        })
    }
}

/// Encoder options
#[derive(Debug, Clone)]
pub struct EncoderOptions {
    /// Encoder executable
    pub program: String,

    /// MJPEG quality (2 best .. 31 worst) when re-encoding
    pub quality: u32,

    /// ffmpeg log level; must stay verbose enough for the watchdog
    pub log_level: String,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            quality: 5,
            log_level: "warning".to_string(),
        }
    }
}

/// Arguments for a multipart MJPEG preview written to stdout
pub fn preview_args(options: &EncoderOptions, profile: &CameraProfile, device_path: &str) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-nostats".into(),
        "-loglevel".into(),
        options.log_level.clone(),
        "-f".into(),
        "v4l2".into(),
    ];

    if let Some(format) = profile.input_format.ffmpeg_input_format() {
        args.push("-input_format".into());
        args.push(format.into());
    }

    args.extend([
        "-framerate".into(),
        profile.framerate.to_string(),
        "-video_size".into(),
        profile.stream.to_string(),
        "-i".into(),
        device_path.to_string(),
    ]);

    // MJPEG input is already the wire format
    if profile.input_format == PixelFormat::Mjpeg {
        args.extend(["-c:v".into(), "copy".into()]);
    } else {
        args.extend([
            "-c:v".into(),
            "mjpeg".into(),
            "-q:v".into(),
            options.quality.to_string(),
        ]);
    }

    args.extend(["-f".into(), "mpjpeg".into(), "pipe:1".into()]);
    args
}
