//! Ordered capture fallback chain

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::capture::attempt::{AttemptOutcome, CaptureAttempt, CaptureContext, CaptureMethodKind, CaptureReport};
use crate::capture::methods::CaptureMethod;
use crate::errors::BoothError;
use crate::stream::supervisor::StreamSupervisor;

/// Tries capture methods in order until one leaves a non-empty image behind.
///
/// The preview is paused before the first method that opens a device and
/// resumed after the chain finishes, whatever the outcome.
pub struct CaptureChain {
    methods: Vec<Box<dyn CaptureMethod>>,
    stream: Option<Arc<StreamSupervisor>>,
}

impl CaptureChain {
    pub fn new(methods: Vec<Box<dyn CaptureMethod>>, stream: Option<Arc<StreamSupervisor>>) -> Self {
        Self { methods, stream }
    }

    /// Methods in trial order
    pub fn kinds(&self) -> Vec<CaptureMethodKind> {
        self.methods.iter().map(|method| method.kind()).collect()
    }

    pub async fn run(&self, ctx: &CaptureContext, output: &Path) -> Result<CaptureReport, BoothError> {
        let mut attempts = Vec::new();
        let mut paused = false;
        let mut winner = None;

        for method in &self.methods {
            if !method.applies(ctx) {
                continue;
            }

            if method.uses_device() && !paused {
                if let Some(stream) = &self.stream {
                    stream.pause_for_capture().await;
                }
                paused = true;
            }

            let attempt = self.attempt(method.as_ref(), ctx, output).await;
            let success = attempt.succeeded();
            attempts.push(attempt);

            if success {
                winner = Some(method.kind());
                break;
            }
        }

        if paused {
            if let Some(stream) = &self.stream {
                stream.resume_after_capture().await;
            }
        }

        if attempts.is_empty() {
            return Err(BoothError::CameraUnavailable(format!(
                "no capture method applies to {} camera",
                ctx.identity.family
            )));
        }

        match winner {
            Some(method) => {
                info!("Captured {} via {}", output.display(), method);
                Ok(CaptureReport {
                    output: output.to_path_buf(),
                    method,
                    placeholder: method == CaptureMethodKind::Mock,
                    attempts,
                })
            }
            None => {
                let summary: Vec<String> = attempts
                    .iter()
                    .map(|a| format!("{}: {}", a.method, a.detail.as_deref().unwrap_or("no output")))
                    .collect();
                warn!("All capture methods failed: {}", summary.join("; "));
                Err(BoothError::CaptureError(format!(
                    "all capture methods failed ({})",
                    summary.join("; ")
                )))
            }
        }
    }

    async fn attempt(&self, method: &dyn CaptureMethod, ctx: &CaptureContext, output: &Path) -> CaptureAttempt {
        let started = Instant::now();
        let kind = method.kind();

        // A file left by an earlier attempt must not count as success
        if let Err(e) = tokio::fs::remove_file(output).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("Could not remove stale {}: {}", output.display(), e);
            }
        }

        let device_path = match method.resolve(ctx).await {
            Ok(device_path) => device_path,
            Err(e) => {
                debug!("{} unavailable: {}", kind, e);
                return CaptureAttempt {
                    method: kind,
                    device_path: None,
                    outcome: AttemptOutcome::Failure,
                    output_path: output.to_path_buf(),
                    detail: Some(e.to_string()),
                    duration_ms: started.elapsed().as_millis() as u64,
                };
            }
        };

        // The file on disk decides the outcome, not the method's verdict
        let result = method.capture(ctx, device_path.as_deref(), output).await;
        let written = output_ready(output).await;
        let detail = match (result, written) {
            (Ok(()), true) => None,
            (Ok(()), false) => Some("no image written".to_string()),
            (Err(e), true) => {
                debug!("{} reported failure but wrote an image: {}", kind, e);
                Some(e.to_string())
            }
            (Err(e), false) => Some(e.to_string()),
        };

        if !written {
            warn!(
                "Capture via {} on {} failed: {}",
                kind,
                device_path.as_deref().unwrap_or("-"),
                detail.as_deref().unwrap_or("no image written")
            );
        }

        CaptureAttempt {
            method: kind,
            device_path,
            outcome: if written {
                AttemptOutcome::Success
            } else {
                AttemptOutcome::Failure
            },
            output_path: output.to_path_buf(),
            detail,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

async fn output_ready(output: &Path) -> bool {
    tokio::fs::metadata(output)
        .await
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}
