//! Still photo capture

pub mod attempt;
pub mod chain;
pub mod guard;
pub mod methods;

use std::path::PathBuf;
use std::sync::Arc;

use crate::devices::model::CameraFamily;
use crate::devices::registry::DeviceRegistry;
use crate::stream::supervisor::StreamSupervisor;
use crate::system::command::CommandRunner;

use self::chain::CaptureChain;
use self::methods::{
    CaptureMethod, FallbackCapture, MockCapture, SpecializedCapture, StandardCapture, StillOptions,
};

/// Default chain: specialized (R6, 5D), standard, fallback, then mock
pub fn default_chain(
    registry: Arc<DeviceRegistry>,
    runner: Arc<dyn CommandRunner>,
    stream: Option<Arc<StreamSupervisor>>,
    options: StillOptions,
    placeholder: Option<PathBuf>,
) -> CaptureChain {
    let mut methods: Vec<Box<dyn CaptureMethod>> = vec![
        Box::new(SpecializedCapture::new(
            CameraFamily::R6MarkII,
            registry.clone(),
            runner.clone(),
            options.clone(),
        )),
        Box::new(SpecializedCapture::new(
            CameraFamily::FiveDMarkIV,
            registry.clone(),
            runner.clone(),
            options.clone(),
        )),
        Box::new(StandardCapture::new(registry.clone(), runner.clone(), options.clone())),
        Box::new(FallbackCapture::new(registry, runner, options)),
    ];

    if let Some(asset) = placeholder {
        methods.push(Box::new(MockCapture::new(asset)));
    }

    CaptureChain::new(methods, stream)
}
