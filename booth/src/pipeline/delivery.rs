//! Photo delivery backends

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::errors::BoothError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::pipeline::result::Delivery;

/// Hands a processed photo to storage and reports where it went
#[async_trait]
pub trait DeliveryBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, photo: &Path, filename: &str) -> Result<Delivery, BoothError>;
}

/// Copies photos into the public directory served under `/photos`
pub struct LocalDelivery {
    public_dir: Dir,
    public_base_url: String,
}

impl LocalDelivery {
    pub fn new(public_dir: Dir, public_base_url: impl Into<String>) -> Self {
        Self {
            public_dir,
            public_base_url: public_base_url.into(),
        }
    }

    pub fn url_for(&self, filename: &str) -> String {
        format!("{}/photos/{}", self.public_base_url.trim_end_matches('/'), filename)
    }
}

#[async_trait]
impl DeliveryBackend for LocalDelivery {
    fn name(&self) -> &str {
        "local"
    }

    async fn deliver(&self, photo: &Path, filename: &str) -> Result<Delivery, BoothError> {
        let dest = self.public_dir.file(filename);
        File::new(photo).copy_to(dest.path()).await?;

        Ok(Delivery::Local {
            url: self.url_for(filename),
            path: dest.path().to_path_buf(),
        })
    }
}

/// Optional primary backend with local fallback.
///
/// Never fails: when every backend errors the result is
/// [`Delivery::Unavailable`].
pub struct RoutedDelivery {
    primary: Option<Arc<dyn DeliveryBackend>>,
    local: LocalDelivery,
}

impl RoutedDelivery {
    pub fn new(primary: Option<Arc<dyn DeliveryBackend>>, local: LocalDelivery) -> Self {
        Self { primary, local }
    }

    pub async fn route(&self, photo: &Path, filename: &str) -> Delivery {
        let mut failures = Vec::new();

        if let Some(primary) = &self.primary {
            match primary.deliver(photo, filename).await {
                Ok(delivery) => {
                    info!("Delivered {} via {}", filename, primary.name());
                    return delivery;
                }
                Err(e) => {
                    warn!("{} delivery of {} failed, using local: {}", primary.name(), filename, e);
                    failures.push(format!("{}: {}", primary.name(), e));
                }
            }
        }

        match self.local.deliver(photo, filename).await {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!("Local delivery of {} failed: {}", filename, e);
                failures.push(format!("local: {}", e));
                Delivery::Unavailable {
                    reason: failures.join("; "),
                }
            }
        }
    }
}

#[async_trait]
impl DeliveryBackend for RoutedDelivery {
    fn name(&self) -> &str {
        "routed"
    }

    async fn deliver(&self, photo: &Path, filename: &str) -> Result<Delivery, BoothError> {
        Ok(self.route(photo, filename).await)
    }
}
