//! Per-viewer preview streams

use std::sync::Weak;

use bytes::Bytes;
use futures::Stream;
use tokio::process::Child;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::stream::admission::ViewerPermit;
use crate::stream::supervisor::StreamSupervisor;

/// Encoder process spawned for a single viewer; killed on drop
pub struct DedicatedProcess {
    id: Uuid,
    child: Child,
    tasks: Vec<JoinHandle<()>>,
    supervisor: Weak<StreamSupervisor>,
}

impl DedicatedProcess {
    pub(crate) fn new(
        id: Uuid,
        child: Child,
        tasks: Vec<JoinHandle<()>>,
        supervisor: Weak<StreamSupervisor>,
    ) -> Self {
        Self {
            id,
            child,
            tasks,
            supervisor,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for DedicatedProcess {
    fn drop(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!("On-demand preview {} already gone: {}", self.id, e);
        }
        for task in &self.tasks {
            task.abort();
        }
        if let Some(supervisor) = self.supervisor.upgrade() {
            supervisor.forget_dedicated(&self.id);
        }
        info!("On-demand preview {} closed", self.id);
    }
}

/// Encoder output for one admitted viewer.
///
/// Holds the admission slot and, for on-demand previews, the process; both
/// are released when the viewer disconnects.
pub struct ViewerStream {
    receiver: broadcast::Receiver<Bytes>,
    _permit: ViewerPermit,
    process: Option<DedicatedProcess>,
}

impl ViewerStream {
    pub(crate) fn shared(receiver: broadcast::Receiver<Bytes>, permit: ViewerPermit) -> Self {
        Self {
            receiver,
            _permit: permit,
            process: None,
        }
    }

    pub(crate) fn dedicated(
        receiver: broadcast::Receiver<Bytes>,
        permit: ViewerPermit,
        process: DedicatedProcess,
    ) -> Self {
        Self {
            receiver,
            _permit: permit,
            process: Some(process),
        }
    }

    /// Whether this viewer has its own encoder process
    pub fn is_dedicated(&self) -> bool {
        self.process.is_some()
    }

    /// Next chunk of multipart output; `None` once the encoder is gone.
    ///
    /// A viewer that falls behind skips the chunks it missed.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        loop {
            match self.receiver.recv().await {
                Ok(chunk) => return Some(chunk),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Preview viewer lagged by {} chunks", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Adapt into a byte stream for an HTTP response body
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        futures::stream::unfold(self, |mut viewer| async move {
            viewer.next_chunk().await.map(|chunk| (Ok(chunk), viewer))
        })
    }
}
