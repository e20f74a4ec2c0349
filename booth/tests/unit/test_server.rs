//! HTTP surface tests, driving the router without a listener

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use boothd::app::options::AppOptions;
use boothd::app::state::AppContext;
use boothd::server::serve::router;
use boothd::server::state::ServerState;
use boothd::storage::layout::StorageLayout;
use boothd::stream::encoder::MJPEG_CONTENT_TYPE;

use common::{respond, v4l2_info, write_still, FakeDevices, Rig, ScriptedRunner};

struct Booth {
    rig: Rig,
    context: AppContext,
    app: Router,
    _dir: tempfile::TempDir,
}

async fn booth(webcam: bool, placeholder_capture: bool) -> Booth {
    let dir = tempfile::tempdir().unwrap();

    let devices = FakeDevices::new();
    if webcam {
        devices.plug(0, v4l2_info("HD Webcam C920", true));
    }
    let lookup = devices.clone();
    let runner = ScriptedRunner::new(move |program, args| match program {
        "ffmpeg" => Ok(write_still(args)),
        _ => Ok(respond(&lookup, program, args)),
    });
    let rig = Rig::new(devices, runner);

    let mut options = AppOptions::default();
    options.storage.layout = StorageLayout::new(dir.path());
    options.placeholder_capture = placeholder_capture;
    options.camera.manage_module = false;
    options.camera.capture_cooldown = Duration::from_secs(60);
    options.camera.restart_settle = Duration::from_millis(10);
    options.camera.reconnect.initial_delay = Duration::from_secs(3600);
    options.stream.stop_grace = Duration::from_millis(200);
    options.stream.settle_delay = Duration::from_millis(10);
    options.stream.janitor_timeout = Duration::from_millis(200);

    let context = AppContext::build(&options, rig.host()).await.unwrap();
    assert_eq!(context.camera.init().await, webcam);

    let state = ServerState::new(
        "0.1.0-test".to_string(),
        context.camera.clone(),
        context.layout.public_dir().path().to_path_buf(),
    );
    let app = router(Arc::new(state));

    Booth {
        rig,
        context,
        app,
        _dir: dir,
    }
}

fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_reports_version() {
    let booth = booth(true, true).await;

    let response = booth
        .app
        .clone()
        .oneshot(request(Method::GET, "/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], "0.1.0-test");

    booth.context.camera.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_status_reports_bound_camera() {
    let booth = booth(true, true).await;

    let response = booth
        .app
        .clone()
        .oneshot(request(Method::GET, "/api/camera/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json(response).await;
    assert_eq!(body["identity"]["connected"], true);
    assert_eq!(body["identity"]["device_path"], "/dev/video0");
    assert_eq!(body["setup"]["success"], true);
    assert_eq!(body["capture_in_flight"], false);

    booth.context.camera.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_capture_then_cooldown() {
    let booth = booth(true, true).await;

    let response = booth
        .app
        .clone()
        .oneshot(request(Method::POST, "/api/camera/capture"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["method"], "standard-v4l2");
    let filename = body["filename"].as_str().unwrap().to_string();
    assert_eq!(
        body["url"],
        format!("http://127.0.0.1:8080/photos/{}", filename)
    );

    // The delivered copy is served back
    let photo = booth
        .app
        .clone()
        .oneshot(request(Method::GET, &format!("/photos/{}", filename)))
        .await
        .unwrap();
    assert_eq!(photo.status(), StatusCode::OK);

    let response = booth
        .app
        .clone()
        .oneshot(request(Method::POST, "/api/camera/capture"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let body = json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["retryable"], true);
    assert_eq!(booth.rig.runner.count("ffmpeg", "-frames:v"), 1);

    booth.context.camera.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_capture_without_camera_is_unavailable() {
    let booth = booth(false, false).await;

    let response = booth
        .app
        .clone()
        .oneshot(request(Method::POST, "/api/camera/capture"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["retryable"], false);
    assert!(body["setup"].is_object());

    booth.context.camera.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_stream_headers_and_unavailable() {
    let booth = booth(true, true).await;

    let response = booth
        .app
        .clone()
        .oneshot(request(Method::GET, "/api/camera/stream"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        MJPEG_CONTENT_TYPE
    );
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "no-cache, no-store, must-revalidate"
    );
    drop(response);

    booth.rig.devices.unplug_all();
    booth.context.camera.poll_once().await;

    let response = booth
        .app
        .clone()
        .oneshot(request(Method::GET, "/api/camera/stream"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    booth.context.camera.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_restart_rebinds() {
    let booth = booth(true, true).await;

    let response = booth
        .app
        .clone()
        .oneshot(request(Method::POST, "/api/camera/restart"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json(response).await;
    assert_eq!(body["connected"], true);
    assert_eq!(body["stream_url"], "/api/camera/stream");
    assert_eq!(booth.context.stream.stats().starts, 2);

    booth.context.camera.shutdown(Duration::from_secs(1)).await;
}
