//! Stream supervisor tests, with `sh` standing in for the encoder

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::StreamExt;

use boothd::devices::model::CameraFamily;
use boothd::devices::profiles::ProfileTable;
use boothd::errors::BoothError;
use boothd::stream::admission::AdmissionOptions;
use boothd::stream::encoder::StreamTarget;
use boothd::stream::supervisor::{StreamOptions, StreamState, StreamSupervisor};
use boothd::system::janitor::DeviceJanitor;

use common::{FakeDevices, FakeProcesses, ScriptSpawner, ScriptedRunner, FRAMES_SCRIPT};

fn options() -> StreamOptions {
    StreamOptions {
        stop_grace: Duration::from_millis(200),
        settle_delay: Duration::from_millis(10),
        janitor_timeout: Duration::from_millis(200),
        ..Default::default()
    }
}

fn supervisor(spawner: &Arc<ScriptSpawner>, options: StreamOptions) -> Arc<StreamSupervisor> {
    supervisor_over(spawner, options, FakeProcesses::new())
}

fn supervisor_over(
    spawner: &Arc<ScriptSpawner>,
    options: StreamOptions,
    processes: Arc<FakeProcesses>,
) -> Arc<StreamSupervisor> {
    let runner = ScriptedRunner::for_devices(FakeDevices::new());
    let janitor = Arc::new(DeviceJanitor::new(
        runner,
        processes.clone(),
        Duration::from_secs(1),
    ));
    Arc::new(StreamSupervisor::new(
        options,
        Arc::new(ProfileTable::default()),
        spawner.clone(),
        processes,
        janitor,
    ))
}

fn target(path: &str) -> StreamTarget {
    StreamTarget {
        device_path: path.to_string(),
        family: CameraFamily::Webcam,
        model: "USB Webcam".to_string(),
    }
}

/// Wait until `check` holds or two seconds pass
async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let spawner = ScriptSpawner::new(FRAMES_SCRIPT);
    let stream = supervisor(&spawner, options());

    let first = stream.start(target("/dev/video0")).await.unwrap();
    let second = stream.start(target("/dev/video0")).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(spawner.spawned().len(), 1);
    assert_eq!(stream.state(), StreamState::Active);
    assert_eq!(first.url, "/api/camera/stream");

    stream.stop().await;
}

#[tokio::test]
async fn test_stop_twice_is_safe() {
    let spawner = ScriptSpawner::new(FRAMES_SCRIPT);
    let stream = supervisor(&spawner, options());

    assert!(!stream.stop().await);

    stream.start(target("/dev/video0")).await.unwrap();
    assert!(stream.stop().await);
    assert!(!stream.stop().await);

    assert!(stream.get_handle().is_none());
    assert_eq!(stream.state(), StreamState::Idle);
    assert_eq!(stream.stats().starts, 1);
    assert_eq!(stream.stats().stops, 1);
}

#[tokio::test]
async fn test_stop_releases_stray_readers() {
    let spawner = ScriptSpawner::new(FRAMES_SCRIPT);
    let processes = FakeProcesses::new();
    processes.run(4242, "ffmpeg -f v4l2 -i /dev/video0 -f null -");
    processes.run(4343, "ffmpeg -f v4l2 -i /dev/video1 -f null -");
    let stream = supervisor_over(&spawner, options(), processes.clone());

    stream.start(target("/dev/video0")).await.unwrap();
    assert!(stream.stop().await);

    assert!(eventually(|| processes.signalled().contains(&(4242, true))).await);
    assert!(!processes.signalled().iter().any(|(pid, _)| *pid == 4343));

    // Pausing waits for the cleanup its own stop started
    stream.start(target("/dev/video0")).await.unwrap();
    assert!(stream.pause_for_capture().await);
    assert_eq!(stream.state(), StreamState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_start_stop_keeps_one_handle() {
    let spawner = ScriptSpawner::new(FRAMES_SCRIPT);
    let stream = supervisor(&spawner, options());

    let tasks = (0..12).map(|i| {
        let stream = stream.clone();
        tokio::spawn(async move {
            if i % 3 == 2 {
                stream.stop().await;
            } else {
                let _ = stream.start(target("/dev/video0")).await;
            }
        })
    });
    join_all(tasks).await;

    let stats = stream.stats();
    let running = u64::from(stream.get_handle().is_some());
    assert_eq!(stats.starts, stats.stops + running);
    assert_eq!(spawner.spawned().len() as u64, stats.starts);

    stream.stop().await;
    assert!(stream.get_handle().is_none());
}

#[tokio::test]
async fn test_watchdog_invalidates_on_device_error() {
    let spawner = ScriptSpawner::new(
        "printf 'frame'; echo '[video4linux2] ioctl(VIDIOC_DQBUF): No such device' >&2; sleep 30",
    );
    let stream = supervisor(&spawner, options());

    stream.start(target("/dev/video0")).await.unwrap();

    assert!(eventually(|| stream.get_handle().is_none()).await);
    assert!(eventually(|| stream.stats().watchdog_kills == 1).await);
    assert_eq!(stream.state(), StreamState::Idle);

    // The target is kept so a repair can restart it
    assert_eq!(stream.last_target(), Some(target("/dev/video0")));
}

#[tokio::test]
async fn test_unexpected_exit_clears_handle() {
    let spawner = ScriptSpawner::new("printf 'frame'; exit 1");
    let stream = supervisor(&spawner, options());

    stream.start(target("/dev/video0")).await.unwrap();

    assert!(eventually(|| stream.get_handle().is_none()).await);
    assert!(eventually(|| stream.stats().unexpected_exits == 1).await);
}

#[tokio::test]
async fn test_pause_and_resume_for_capture() {
    let spawner = ScriptSpawner::new(FRAMES_SCRIPT);
    let stream = supervisor(&spawner, options());

    let before = stream.start(target("/dev/video2")).await.unwrap();
    assert!(stream.pause_for_capture().await);
    assert!(stream.get_handle().is_none());

    let after = stream.resume_after_capture().await.unwrap();
    assert_ne!(before.id, after.id);
    assert_eq!(spawner.devices(), vec!["/dev/video2", "/dev/video2"]);

    stream.clear_target();
    stream.stop().await;
    assert!(stream.resume_after_capture().await.is_none());
}

#[tokio::test]
async fn test_viewers_share_the_running_preview() {
    let spawner = ScriptSpawner::new(FRAMES_SCRIPT);
    let stream = supervisor(&spawner, options());
    stream.start(target("/dev/video0")).await.unwrap();

    let mut viewer = stream.open_viewer().await.unwrap();
    assert!(!viewer.is_dedicated());

    let chunk = tokio::time::timeout(Duration::from_secs(2), viewer.next_chunk())
        .await
        .unwrap()
        .unwrap();
    assert!(!chunk.is_empty());
    assert_eq!(spawner.spawned().len(), 1);
    assert_eq!(stream.admission_stats().active, 1);

    drop(viewer);
    assert_eq!(stream.admission_stats().active, 0);
    stream.stop().await;
}

#[tokio::test]
async fn test_dedicated_viewer_without_preview() {
    let spawner = ScriptSpawner::new(FRAMES_SCRIPT);
    let stream = supervisor(&spawner, options());

    assert!(matches!(
        stream.open_viewer().await,
        Err(BoothError::CameraUnavailable(_))
    ));

    // A stopped preview keeps its target
    stream.start(target("/dev/video0")).await.unwrap();
    stream.stop().await;

    let viewer = stream.open_viewer().await.unwrap();
    assert!(viewer.is_dedicated());
    assert_eq!(stream.dedicated_count(), 1);

    let mut body = Box::pin(viewer.into_stream());
    let chunk = tokio::time::timeout(Duration::from_secs(2), body.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!chunk.is_empty());

    drop(body);
    assert_eq!(stream.dedicated_count(), 0);
}

#[tokio::test]
async fn test_admission_ceiling_is_retryable() {
    let spawner = ScriptSpawner::new(FRAMES_SCRIPT);
    let options = StreamOptions {
        admission: AdmissionOptions {
            max_viewers: 1,
            ..Default::default()
        },
        ..options()
    };
    let stream = supervisor(&spawner, options);
    stream.start(target("/dev/video0")).await.unwrap();

    let _first = stream.open_viewer().await.unwrap();
    let err = stream.open_viewer().await.err().unwrap();
    assert!(matches!(err, BoothError::Busy(_)));
    assert!(err.is_retryable());

    stream.stop().await;
}
