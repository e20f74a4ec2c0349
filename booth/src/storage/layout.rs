//! Storage layout

use std::path::PathBuf;

use crate::errors::BoothError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Default base directory on the booth host
pub const DEFAULT_BASE_DIR: &str = "/var/lib/boothd";

/// Where boothd keeps its files
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Raw captures before processing
    pub fn captures_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("captures"))
    }

    /// Processed photos served under `/photos`
    pub fn public_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("public"))
    }

    /// Placeholder and watermark images
    pub fn assets_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("assets"))
    }

    pub fn placeholder_file(&self) -> File {
        self.assets_dir().file("placeholder.jpg")
    }

    pub fn watermark_file(&self) -> File {
        self.assets_dir().file("watermark.png")
    }

    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Create every directory
    pub async fn setup(&self) -> Result<(), BoothError> {
        self.captures_dir().create().await?;
        self.public_dir().create().await?;
        self.assets_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DIR)
    }
}
