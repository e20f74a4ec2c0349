//! Device namespace access

use std::path::Path;

use async_trait::async_trait;
use tokio::fs;

/// Read-only view of the device node namespace
#[async_trait]
pub trait DeviceFs: Send + Sync {
    /// Entry names directly under `root`. Empty when the directory is unreadable.
    async fn list(&self, root: &Path) -> Vec<String>;

    /// Whether `path` exists
    async fn exists(&self, path: &Path) -> bool;

    /// Whether `path` is a character device node
    async fn is_char_device(&self, path: &Path) -> bool;
}

/// [`DeviceFs`] over the real filesystem
#[derive(Debug, Clone, Default)]
pub struct SystemDeviceFs;

#[async_trait]
impl DeviceFs for SystemDeviceFs {
    async fn list(&self, root: &Path) -> Vec<String> {
        let mut names = Vec::new();
        let Ok(mut entries) = fs::read_dir(root).await else {
            return names;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }

        names
    }

    async fn exists(&self, path: &Path) -> bool {
        fs::metadata(path).await.is_ok()
    }

    async fn is_char_device(&self, path: &Path) -> bool {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            fs::metadata(path)
                .await
                .map(|m| m.file_type().is_char_device())
                .unwrap_or(false)
        }

        #[cfg(not(unix))]
        {
            let _ = path;
            false
        }
    }
}
