//! Per-model capture and streaming parameters.
//!
//! The same table drives device selection, still capture, preview encoding
//! and reconnection polling. Selection values were tuned on real hardware;
//! each family keeps its own strategy and can be overridden from settings.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::devices::formats::PixelFormat;
use crate::devices::model::{CameraFamily, VideoDevice};

/// Frame size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Final tiebreak among equally acceptable nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tiebreak {
    Highest,
    MidRange,
    Lowest,
}

impl Tiebreak {
    fn pick<'a>(&self, sorted: &[(u32, &'a VideoDevice)]) -> Option<&'a VideoDevice> {
        let picked = match self {
            Tiebreak::Highest => sorted.last(),
            Tiebreak::Lowest => sorted.first(),
            Tiebreak::MidRange => sorted.get(sorted.len() / 2),
        };
        picked.map(|(_, device)| *device)
    }
}

/// How to choose among several capture-capable nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSelection {
    /// Historically reliable node indices, in order of preference
    #[serde(default)]
    pub preferred: Vec<u32>,

    /// Inclusive index range preferred over the rest
    pub mid_range: (u32, u32),

    pub tiebreak: Tiebreak,
}

impl DeviceSelection {
    /// Choose one of `candidates`.
    ///
    /// 1. the first allow-listed index present;
    /// 2. candidates inside `mid_range`, by tiebreak;
    /// 3. everything except the lowest node (usually the loopback output side), by tiebreak.
    pub fn select<'a>(&self, candidates: &'a [VideoDevice]) -> Option<&'a VideoDevice> {
        let mut indexed: Vec<(u32, &VideoDevice)> = candidates
            .iter()
            .filter_map(|device| device.index().map(|index| (index, device)))
            .collect();
        indexed.sort_by_key(|(index, _)| *index);

        if indexed.is_empty() {
            return None;
        }

        for preferred in &self.preferred {
            if let Some((_, device)) = indexed.iter().find(|(index, _)| index == preferred) {
                return Some(*device);
            }
        }

        let (low, high) = self.mid_range;
        let in_range: Vec<(u32, &VideoDevice)> = indexed
            .iter()
            .copied()
            .filter(|(index, _)| (low..=high).contains(index))
            .collect();
        if !in_range.is_empty() {
            return self.tiebreak.pick(&in_range);
        }

        let pool = if indexed.len() > 1 {
            &indexed[1..]
        } else {
            &indexed[..]
        };
        self.tiebreak.pick(pool)
    }
}

/// Everything the capture and stream paths need to know about a camera family
#[derive(Debug, Clone, PartialEq)]
pub struct CameraProfile {
    pub family: CameraFamily,

    /// Has a dedicated capture method
    pub specialized: bool,

    /// Still capture size for specialized and standard capture
    pub still: Resolution,

    /// Still capture size for the fallback method
    pub fallback_still: Resolution,

    /// Preview stream size
    pub stream: Resolution,

    pub framerate: u32,

    /// Preferred input format for streaming and capture
    pub input_format: PixelFormat,

    pub selection: DeviceSelection,

    /// Reconnection poll interval while this family is bound
    pub poll_interval: Duration,
}

/// Settings-level override of a profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileOverride {
    #[serde(default)]
    pub selection: Option<DeviceSelection>,

    #[serde(default)]
    pub poll_interval_secs: Option<u64>,

    #[serde(default)]
    pub input_format: Option<PixelFormat>,
}

/// Profiles for every known family
#[derive(Debug, Clone)]
pub struct ProfileTable {
    profiles: HashMap<CameraFamily, CameraProfile>,
}

impl ProfileTable {
    /// Profile for `family`
    pub fn get(&self, family: CameraFamily) -> &CameraProfile {
        self.profiles
            .get(&family)
            .or_else(|| self.profiles.get(&CameraFamily::Webcam))
            .unwrap_or(&FALLBACK_PROFILE)
    }

    /// Apply overrides keyed by family
    pub fn with_overrides(mut self, overrides: &HashMap<CameraFamily, ProfileOverride>) -> Self {
        for (family, ovr) in overrides {
            let Some(profile) = self.profiles.get_mut(family) else {
                continue;
            };
            if let Some(selection) = &ovr.selection {
                profile.selection = selection.clone();
            }
            if let Some(secs) = ovr.poll_interval_secs {
                profile.poll_interval = Duration::from_secs(secs);
            }
            if let Some(format) = ovr.input_format {
                profile.input_format = format;
            }
        }
        self
    }
}

static FALLBACK_PROFILE: CameraProfile = CameraProfile {
    family: CameraFamily::Webcam,
    specialized: false,
    still: Resolution::new(1920, 1080),
    fallback_still: Resolution::new(1280, 720),
    stream: Resolution::new(1280, 720),
    framerate: 30,
    input_format: PixelFormat::Mjpeg,
    selection: DeviceSelection {
        preferred: Vec::new(),
        mid_range: (0, 63),
        tiebreak: Tiebreak::Lowest,
    },
    poll_interval: Duration::from_secs(5),
};

impl Default for ProfileTable {
    fn default() -> Self {
        let profiles = [
            CameraProfile {
                family: CameraFamily::R6MarkII,
                specialized: true,
                still: Resolution::new(1920, 1080),
                fallback_still: Resolution::new(1280, 720),
                stream: Resolution::new(1024, 576),
                framerate: 30,
                input_format: PixelFormat::Yuyv,
                selection: DeviceSelection {
                    preferred: vec![2, 3, 7],
                    mid_range: (2, 9),
                    tiebreak: Tiebreak::Highest,
                },
                poll_interval: Duration::from_secs(30),
            },
            CameraProfile {
                family: CameraFamily::FiveDMarkIV,
                specialized: true,
                still: Resolution::new(1920, 1280),
                fallback_still: Resolution::new(1024, 680),
                stream: Resolution::new(1024, 680),
                framerate: 25,
                input_format: PixelFormat::Mjpeg,
                selection: DeviceSelection {
                    preferred: vec![1, 2],
                    mid_range: (1, 5),
                    tiebreak: Tiebreak::MidRange,
                },
                poll_interval: Duration::from_secs(30),
            },
            CameraProfile {
                family: CameraFamily::Canon,
                specialized: false,
                still: Resolution::new(1920, 1080),
                fallback_still: Resolution::new(1280, 720),
                stream: Resolution::new(1024, 576),
                framerate: 25,
                input_format: PixelFormat::Auto,
                selection: DeviceSelection {
                    preferred: Vec::new(),
                    mid_range: (1, 9),
                    tiebreak: Tiebreak::Highest,
                },
                poll_interval: Duration::from_secs(15),
            },
            FALLBACK_PROFILE.clone(),
        ];

        Self {
            profiles: profiles
                .into_iter()
                .map(|profile| (profile.family, profile))
                .collect(),
        }
    }
}
