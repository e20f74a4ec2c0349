//! Camera service tests over a fake host

mod common;

use std::time::Duration;

use boothd::app::options::AppOptions;
use boothd::app::state::AppContext;
use boothd::camera::service::PollTransition;
use boothd::camera::setup::SetupType;
use boothd::capture::attempt::CaptureMethodKind;
use boothd::devices::model::CameraFamily;
use boothd::errors::BoothError;
use boothd::pipeline::result::Delivery;
use boothd::storage::layout::StorageLayout;

use common::{respond, v4l2_info, write_still, FakeDevices, Rig, ScriptedRunner};

fn options(dir: &std::path::Path) -> AppOptions {
    let mut options = AppOptions::default();
    options.storage.layout = StorageLayout::new(dir);

    options.stream.stop_grace = Duration::from_millis(200);
    options.stream.settle_delay = Duration::from_millis(10);
    options.stream.janitor_timeout = Duration::from_millis(200);

    options.camera.capture_cooldown = Duration::from_secs(60);
    options.camera.restart_settle = Duration::from_millis(10);
    options.camera.restart_limit = 2;
    options.module.reload_delay = Duration::ZERO;

    // Polls are driven by hand
    options.camera.reconnect.initial_delay = Duration::from_secs(3600);
    options
}

fn webcam_rig() -> Rig {
    let devices = FakeDevices::new();
    devices.plug(0, v4l2_info("HD Webcam C920", true));

    let lookup = devices.clone();
    let runner = ScriptedRunner::new(move |program, args| match program {
        "ffmpeg" => Ok(write_still(args)),
        _ => Ok(respond(&lookup, program, args)),
    });
    Rig::new(devices, runner)
}

#[tokio::test]
async fn test_init_binds_and_starts_preview() {
    let dir = tempfile::tempdir().unwrap();
    let rig = webcam_rig();
    let context = AppContext::build(&options(dir.path()), rig.host()).await.unwrap();
    let camera = context.camera.clone();

    assert!(camera.init().await);

    let identity = camera.identity();
    assert!(identity.connected);
    assert_eq!(identity.family, CameraFamily::Webcam);
    assert_eq!(identity.device_path.as_deref(), Some("/dev/video0"));
    assert_eq!(camera.stream_url().as_deref(), Some("/api/camera/stream"));

    let status = camera.status();
    assert!(status.setup.success);
    assert!(status.stream.active.is_some());
    assert_eq!(rig.spawner.devices(), vec!["/dev/video0"]);

    camera.shutdown(Duration::from_secs(1)).await;
    assert!(context.stream.get_handle().is_none());
}

#[tokio::test]
async fn test_missing_tools_skip_discovery() {
    let dir = tempfile::tempdir().unwrap();
    let rig = webcam_rig();
    rig.runner.set_tools(&["ffmpeg"]);
    let context = AppContext::build(&options(dir.path()), rig.host()).await.unwrap();
    let camera = context.camera.clone();

    assert!(!camera.init().await);

    let setup = camera.setup_status();
    assert!(setup.needs_setup);
    assert_eq!(setup.setup_type, Some(SetupType::Dependencies));
    assert!(setup.message.contains("v4l2-ctl"));
    assert!(!camera.identity().connected);
    assert_eq!(rig.runner.count("v4l2-ctl", "--all"), 0);

    assert!(matches!(
        camera.open_viewer().await,
        Err(BoothError::CameraUnavailable(_))
    ));

    // The placeholder still yields a photo
    let result = camera.capture_photo().await.unwrap();
    assert!(result.placeholder);
    assert_eq!(result.method, CaptureMethodKind::Mock);

    camera.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_poll_rebinds_across_unplug() {
    let dir = tempfile::tempdir().unwrap();
    let rig = webcam_rig();
    let context = AppContext::build(&options(dir.path()), rig.host()).await.unwrap();
    let camera = context.camera.clone();
    assert!(camera.init().await);

    assert_eq!(camera.poll_once().await, PollTransition::Unchanged);

    rig.devices.unplug(0);
    assert_eq!(camera.poll_once().await, PollTransition::Disconnected);
    assert!(!camera.identity().connected);
    assert!(context.stream.get_handle().is_none());

    rig.devices.plug(1, v4l2_info("HD Webcam C920", true));
    assert_eq!(camera.poll_once().await, PollTransition::Connected);
    assert_eq!(camera.identity().device_path.as_deref(), Some("/dev/video1"));

    let stats = context.stream.stats();
    assert_eq!(stats.stops, 1);
    assert_eq!(stats.starts, 2);
    assert_eq!(rig.spawner.devices(), vec!["/dev/video0", "/dev/video1"]);
    assert_eq!(
        context.stream.get_handle().unwrap().target.device_path,
        "/dev/video1"
    );

    camera.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_poll_rebinds_moved_camera() {
    let dir = tempfile::tempdir().unwrap();
    let rig = webcam_rig();
    let context = AppContext::build(&options(dir.path()), rig.host()).await.unwrap();
    let camera = context.camera.clone();
    assert!(camera.init().await);
    let stops = context.stream.stats().stops;

    // Re-enumerated at another node between two polls
    rig.devices.unplug(0);
    rig.devices.plug(1, v4l2_info("HD Webcam C920", true));
    assert_eq!(camera.poll_once().await, PollTransition::Rebound);

    assert!(camera.identity().connected);
    assert_eq!(camera.identity().device_path.as_deref(), Some("/dev/video1"));
    assert_eq!(context.stream.stats().stops, stops + 1);
    assert_eq!(context.stream.stats().starts, 2);
    assert_eq!(
        context.stream.get_handle().unwrap().target.device_path,
        "/dev/video1"
    );
    assert_eq!(rig.spawner.devices(), vec!["/dev/video0", "/dev/video1"]);

    camera.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_poll_repairs_dead_preview() {
    let dir = tempfile::tempdir().unwrap();
    let rig = webcam_rig();
    let context = AppContext::build(&options(dir.path()), rig.host()).await.unwrap();
    let camera = context.camera.clone();
    assert!(camera.init().await);

    // Same camera, preview gone
    context.stream.stop().await;
    assert_eq!(camera.poll_once().await, PollTransition::Repaired);
    assert!(context.stream.get_handle().is_some());
    assert_eq!(camera.status().last_transition, Some(PollTransition::Repaired));

    camera.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_capture_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let rig = webcam_rig();
    let context = AppContext::build(&options(dir.path()), rig.host()).await.unwrap();
    let camera = context.camera.clone();
    assert!(camera.init().await);

    let (first, second) = tokio::join!(camera.capture_photo(), camera.capture_photo());

    let result = first.unwrap();
    let err = second.unwrap_err();
    assert!(matches!(err, BoothError::Busy(_)));
    assert!(err.is_retryable());
    assert_eq!(rig.runner.count("ffmpeg", "-frames:v"), 1);

    assert_eq!(result.method, CaptureMethodKind::StandardV4l2);
    assert!(!result.placeholder);
    assert!(result.filename.starts_with("photo_"));
    match &result.delivery {
        Delivery::Local { url, path } => {
            assert_eq!(url, &format!("http://127.0.0.1:8080/photos/{}", result.filename));
            assert!(path.exists());
        }
        other => panic!("expected local delivery, got {other:?}"),
    }
    assert_eq!(result.preferred_url(), result.delivery.url());

    // Preview came back after the capture
    assert!(context.stream.get_handle().is_some());

    // Inside the cooldown
    let err = camera.capture_photo().await.unwrap_err();
    assert!(matches!(err, BoothError::RateLimited(_)));
    assert!(!camera.status().capture_in_flight);

    camera.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_restart_rate_limit() {
    let dir = tempfile::tempdir().unwrap();
    let rig = webcam_rig();
    let context = AppContext::build(&options(dir.path()), rig.host()).await.unwrap();
    let camera = context.camera.clone();
    assert!(camera.init().await);
    let loads = rig.runner.count("modprobe", "v4l2loopback");

    assert!(camera.restart().await.unwrap());
    assert!(camera.restart().await.unwrap());

    let err = camera.restart().await.unwrap_err();
    assert!(matches!(err, BoothError::RateLimited(_)));
    assert!(err.is_retryable());

    // Each restart reloaded the module and rebound the camera
    assert_eq!(rig.runner.count("modprobe", "v4l2loopback"), loads + 2);
    assert!(camera.identity().connected);
    assert!(!camera.status().restart_in_progress);

    camera.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_reconnect_worker_picks_up_camera() {
    let dir = tempfile::tempdir().unwrap();
    let rig = webcam_rig();
    rig.devices.unplug_all();

    let mut options = options(dir.path());
    options.camera.reconnect.initial_delay = Duration::from_millis(10);
    options.camera.idle_poll_interval = Duration::from_millis(50);
    let context = AppContext::build(&options, rig.host()).await.unwrap();
    let camera = context.camera.clone();

    assert!(!camera.init().await);
    rig.devices.plug(0, v4l2_info("HD Webcam C920", true));

    let mut connected = false;
    for _ in 0..100 {
        if camera.identity().connected {
            connected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(connected);

    camera.shutdown(Duration::from_secs(1)).await;
    assert!(context.stream.get_handle().is_none());
}

#[tokio::test]
async fn test_build_prepares_layout_without_starting() {
    let dir = tempfile::tempdir().unwrap();
    let rig = webcam_rig();
    let context = AppContext::build(&options(dir.path()), rig.host()).await.unwrap();

    assert!(context.layout.public_dir().exists().await);
    assert!(context.layout.captures_dir().exists().await);
    assert!(!context.camera.identity().connected);
    assert!(rig.spawner.spawned().is_empty());
    assert_eq!(context.kmod.device_paths(&Default::default()), vec!["/dev/video2"]);
}
