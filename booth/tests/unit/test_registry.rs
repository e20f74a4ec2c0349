//! Device registry tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use boothd::devices::model::{CameraFamily, CameraType, Capability, VideoDevice};
use boothd::devices::profiles::ProfileTable;
use boothd::devices::registry::{DeviceEvent, DeviceRegistry, RegistryOptions};
use boothd::errors::BoothError;

use common::{fail, ok, respond, v4l2_info, FakeDevices, ScriptedRunner};

fn registry(devices: &Arc<FakeDevices>, runner: &Arc<ScriptedRunner>) -> DeviceRegistry {
    DeviceRegistry::new(RegistryOptions::default(), runner.clone(), devices.clone())
}

#[tokio::test]
async fn test_classify_is_deterministic() {
    let devices = FakeDevices::new();
    devices.plug(0, v4l2_info("HD Webcam", true));
    devices.plug(1, v4l2_info("Dummy video device", false));
    let runner = ScriptedRunner::for_devices(devices.clone());
    let registry = registry(&devices, &runner);

    let webcam = VideoDevice::new("/dev/video0");
    let first = registry.classify(&webcam).await;
    let second = registry.classify(&webcam).await;
    assert_eq!(first, Capability::Capture);
    assert_eq!(first, second);

    let output = VideoDevice::new("/dev/video1");
    assert_eq!(registry.classify(&output).await, Capability::Output);

    // Introspection failure fails closed
    let missing = VideoDevice::new("/dev/video9");
    assert_eq!(registry.classify(&missing).await, Capability::Unknown);
}

#[tokio::test]
async fn test_verify_false_without_panicking() {
    let devices = FakeDevices::new();
    devices.plug(0, v4l2_info("HD Webcam", true));
    devices.plug(1, v4l2_info("Flaky", true));
    devices.plug(2, v4l2_info("Hung", true));

    let lookup = devices.clone();
    let runner = ScriptedRunner::new(move |program, args| {
        let device = common::arg_after(args, "--device").unwrap_or_default();
        match device.as_str() {
            "/dev/video1" => Ok(ok("VIDIOC_QUERYCAP: Input/output error")),
            "/dev/video2" => Err(BoothError::CommandTimeout(
                Duration::from_secs(5),
                "v4l2-ctl".to_string(),
            )),
            _ => Ok(respond(&lookup, program, args)),
        }
    });
    let registry = registry(&devices, &runner);

    assert!(registry.verify("/dev/video0").await);
    assert!(!registry.verify("/dev/video1").await);
    assert!(!registry.verify("/dev/video2").await);
    assert!(!registry.verify("/dev/video7").await);
    assert!(!registry.verify("").await);
}

#[tokio::test]
async fn test_verify_cache_and_invalidation() {
    let devices = FakeDevices::new();
    devices.plug(0, v4l2_info("HD Webcam", true));
    let runner = ScriptedRunner::for_devices(devices.clone());
    let registry = registry(&devices, &runner);

    assert!(registry.verify("/dev/video0").await);
    assert!(registry.verify("/dev/video0").await);
    assert_eq!(runner.count("v4l2-ctl", "--info"), 1);

    registry.invalidate("/dev/video0");
    devices.unplug(0);
    assert!(!registry.verify("/dev/video0").await);
}

#[tokio::test]
async fn test_discover_prefers_model_nodes() {
    let devices = FakeDevices::new();
    devices.plug(0, v4l2_info("Integrated Camera", true));
    devices.plug(2, v4l2_info("Canon EOS R6 Mark II", true));
    devices.plug(3, v4l2_info("Canon EOS R6 Mark II", true));
    let runner = ScriptedRunner::for_devices(devices.clone());
    let registry = registry(&devices, &runner);

    let discovery = registry.discover(&ProfileTable::default()).await.unwrap();
    assert_eq!(discovery.identity.family, CameraFamily::R6MarkII);
    assert_eq!(discovery.identity.camera_type, CameraType::Canon);
    assert_eq!(discovery.identity.device_path.as_deref(), Some("/dev/video2"));
    assert!(discovery.identity.connected);
}

#[tokio::test]
async fn test_discover_generic_webcam() {
    let devices = FakeDevices::new();
    devices.plug(0, v4l2_info("HD Webcam C920", true));
    let runner = ScriptedRunner::for_devices(devices.clone());
    let registry = registry(&devices, &runner);

    let discovery = registry.discover(&ProfileTable::default()).await.unwrap();
    assert_eq!(discovery.identity.family, CameraFamily::Webcam);
    assert_eq!(discovery.identity.device_path.as_deref(), Some("/dev/video0"));

    devices.unplug_all();
    assert!(registry.discover(&ProfileTable::default()).await.is_none());
}

#[tokio::test]
async fn test_dslr_model_behind_loopback() {
    let devices = FakeDevices::new();
    devices.plug(0, v4l2_info("Integrated Camera", true));
    devices.plug(1, v4l2_info("Photobooth DSLR", true));
    devices.plug(2, v4l2_info("Photobooth DSLR", true));

    let lookup = devices.clone();
    let runner = ScriptedRunner::new(move |program, args| match program {
        "gphoto2" => Ok(ok("Model                Port\n\
            ----------------------------------------------------------\n\
            Canon EOS 5D Mark IV usb:001,004\n")),
        _ => Ok(respond(&lookup, program, args)),
    });
    runner.set_tools(&["v4l2-ctl", "ffmpeg", "gphoto2"]);
    let registry = registry(&devices, &runner);

    let discovery = registry.discover(&ProfileTable::default()).await.unwrap();
    assert_eq!(discovery.identity.model, "Canon EOS 5D Mark IV");
    assert_eq!(discovery.identity.family, CameraFamily::FiveDMarkIV);
    // 5D prefers node 1
    assert_eq!(discovery.identity.device_path.as_deref(), Some("/dev/video1"));
}

#[tokio::test]
async fn test_device_change_events() {
    let devices = FakeDevices::new();
    devices.plug(0, v4l2_info("HD Webcam", true));
    let runner = ScriptedRunner::for_devices(devices.clone());
    let registry = registry(&devices, &runner);
    let mut events = registry.take_events().unwrap();
    assert!(registry.take_events().is_none());

    registry.enumerate().await;
    devices.plug(4, v4l2_info("Canon EOS R6 Mark II", true));
    devices.unplug(0);
    registry.enumerate().await;

    let event = events.try_recv().unwrap();
    assert_eq!(
        event,
        DeviceEvent::Changed {
            added: vec!["/dev/video4".to_string()],
            removed: vec!["/dev/video0".to_string()],
        }
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_list_formats() {
    let devices = FakeDevices::new();
    devices.plug(2, v4l2_info("Canon EOS R6 Mark II", true));
    let lookup = devices.clone();
    let runner = ScriptedRunner::new(move |program, args| {
        if args.iter().any(|a| a == "/dev/video3") {
            return Ok(fail(1, "Cannot open device /dev/video3"));
        }
        Ok(respond(&lookup, program, args))
    });
    let registry = registry(&devices, &runner);

    assert_eq!(registry.list_formats("/dev/video2").await.len(), 2);
    assert!(registry.list_formats("/dev/video3").await.is_empty());
}
