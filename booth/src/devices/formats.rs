//! Pixel formats advertised by a capture device

use serde::{Deserialize, Serialize};

/// Input pixel format requested from a V4L2 device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Mjpeg,
    Yuyv,
    /// Let the encoder negotiate
    Auto,
}

impl PixelFormat {
    /// Value for ffmpeg's `-input_format`, `None` for [`PixelFormat::Auto`]
    pub fn ffmpeg_input_format(&self) -> Option<&'static str> {
        match self {
            PixelFormat::Mjpeg => Some("mjpeg"),
            PixelFormat::Yuyv => Some("yuyv422"),
            PixelFormat::Auto => None,
        }
    }
}

/// Formats mentioned in `v4l2-ctl --list-formats-ext` output
pub fn parse_formats(text: &str) -> Vec<PixelFormat> {
    let mut formats = Vec::new();
    if text.contains("MJPG") || text.contains("MJPEG") {
        formats.push(PixelFormat::Mjpeg);
    }
    if text.contains("YUYV") {
        formats.push(PixelFormat::Yuyv);
    }
    formats
}

/// Pick the format to request given what the device supports.
///
/// The preferred format wins when supported, then MJPEG, then YUYV.
pub fn choose_format(supported: &[PixelFormat], preferred: PixelFormat) -> PixelFormat {
    if preferred != PixelFormat::Auto && supported.contains(&preferred) {
        return preferred;
    }
    [PixelFormat::Mjpeg, PixelFormat::Yuyv]
        .into_iter()
        .find(|format| supported.contains(format))
        .unwrap_or(PixelFormat::Auto)
}
