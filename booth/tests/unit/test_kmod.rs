//! Kernel module manager tests

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use boothd::errors::BoothError;
use boothd::kmod::manager::{KernelModuleManager, LoopbackParams, ModuleOptions, ModuleState};
use boothd::system::janitor::DeviceJanitor;
use boothd::system::privilege::Privilege;

use common::{fail, ok, FakePrivilege, FakeProcesses, ScriptedRunner};

const LSMOD_LOADED: &str = "Module                  Size  Used by\n\
    v4l2loopback           49152  0\n\
    videodev              270336  1 v4l2loopback\n";

const LSMOD_EMPTY: &str = "Module                  Size  Used by\n\
    videodev              270336  0\n";

/// Runner modelling the module table
fn module_runner(loaded: Arc<AtomicBool>, modprobe_fails: bool) -> Arc<ScriptedRunner> {
    ScriptedRunner::new(move |program, args| {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let args = if program == "sudo" { &args[2..] } else { &args[..] };

        match program {
            "lsmod" if loaded.load(Ordering::SeqCst) => Ok(ok(LSMOD_LOADED)),
            "lsmod" => Ok(ok(LSMOD_EMPTY)),
            _ if modprobe_fails => Ok(fail(1, "modprobe: FATAL: Module v4l2loopback not found")),
            _ if args.first() == Some(&"-r") => {
                loaded.store(false, Ordering::SeqCst);
                Ok(ok(""))
            }
            _ => {
                loaded.store(true, Ordering::SeqCst);
                Ok(ok(""))
            }
        }
    })
}

fn manager(runner: &Arc<ScriptedRunner>, privilege: Privilege) -> KernelModuleManager {
    let janitor = Arc::new(DeviceJanitor::new(
        runner.clone(),
        FakeProcesses::new(),
        Duration::from_secs(1),
    ));
    let options = ModuleOptions {
        reload_delay: Duration::ZERO,
        ..Default::default()
    };
    KernelModuleManager::new(options, runner.clone(), FakePrivilege::new(privilege), janitor)
}

fn modprobe_calls(runner: &ScriptedRunner) -> Vec<Vec<String>> {
    runner
        .calls()
        .into_iter()
        .filter_map(|(program, args)| match program.as_str() {
            "modprobe" => Some(args),
            "sudo" if args.get(1).map(String::as_str) == Some("modprobe") => Some(args[2..].to_vec()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_reload_when_not_loaded_skips_unload() {
    let loaded = Arc::new(AtomicBool::new(false));
    let runner = module_runner(loaded.clone(), false);
    let kmod = manager(&runner, Privilege::Root);

    kmod.reload(&LoopbackParams::default()).await.unwrap();

    let calls = modprobe_calls(&runner);
    assert_eq!(calls.len(), 1);
    assert!(!calls[0].iter().any(|a| a == "-r"));
    assert!(loaded.load(Ordering::SeqCst));
    assert_eq!(kmod.status().state, ModuleState::Loaded);
}

#[tokio::test]
async fn test_reload_when_loaded_unloads_first() {
    let loaded = Arc::new(AtomicBool::new(true));
    let runner = module_runner(loaded.clone(), false);
    let kmod = manager(&runner, Privilege::Root);

    kmod.reload(&LoopbackParams::default()).await.unwrap();

    let calls = modprobe_calls(&runner);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], vec!["-r", "v4l2loopback"]);
    assert_eq!(calls[1][0], "v4l2loopback");
    assert!(calls[1].iter().any(|a| a == "video_nr=2"));
}

#[tokio::test]
async fn test_load_without_privileges_needs_root() {
    let loaded = Arc::new(AtomicBool::new(false));
    let runner = module_runner(loaded, false);
    let kmod = manager(&runner, Privilege::Unprivileged);

    let err = kmod.load(&LoopbackParams::default()).await.unwrap_err();
    match err {
        BoothError::NeedsRoot(message) => assert!(message.contains("sudo modprobe v4l2loopback")),
        other => panic!("expected NeedsRoot, got {other:?}"),
    }
    assert!(modprobe_calls(&runner).is_empty());

    let status = kmod.status();
    assert_eq!(status.state, ModuleState::Unloaded);
    assert!(status.last_error.is_some());

    assert!(matches!(
        kmod.reload(&LoopbackParams::default()).await,
        Err(BoothError::NeedsRoot(_))
    ));
}

#[tokio::test]
async fn test_needs_root_message_names_requested_params() {
    let loaded = Arc::new(AtomicBool::new(true));
    let runner = module_runner(loaded, false);
    let kmod = manager(&runner, Privilege::Unprivileged);

    let params = LoopbackParams {
        devices: 1,
        video_nr: vec![5],
        card_label: "Booth Cam".to_string(),
        exclusive_caps: true,
        max_buffers: 4,
    };
    let err = kmod.load(&params).await.unwrap_err();
    let BoothError::NeedsRoot(message) = err else {
        panic!("expected NeedsRoot, got {err:?}");
    };
    assert!(message.contains(
        "sudo modprobe v4l2loopback devices=1 video_nr=5 'card_label=Booth Cam' exclusive_caps=1 max_buffers=4"
    ));
    assert!(!message.contains("video_nr=2"));

    let BoothError::NeedsRoot(message) = kmod.unload().await.unwrap_err() else {
        panic!("expected NeedsRoot");
    };
    assert!(message.starts_with("Unloading v4l2loopback"));
    assert!(message.ends_with("sudo modprobe -r v4l2loopback"));
    assert!(modprobe_calls(&runner).is_empty());
}

#[tokio::test]
async fn test_load_through_passwordless_sudo() {
    let loaded = Arc::new(AtomicBool::new(false));
    let runner = module_runner(loaded.clone(), false);
    let kmod = manager(&runner, Privilege::PasswordlessSudo);

    kmod.load(&LoopbackParams::default()).await.unwrap();

    let (program, args) = runner
        .calls()
        .into_iter()
        .find(|(program, _)| program == "sudo")
        .unwrap();
    assert_eq!(program, "sudo");
    assert_eq!(&args[..3], &["-n", "modprobe", "v4l2loopback"]);
    assert!(kmod.is_loaded().await);
}

#[tokio::test]
async fn test_failed_load_reverts_state() {
    let loaded = Arc::new(AtomicBool::new(false));
    let runner = module_runner(loaded, true);
    let kmod = manager(&runner, Privilege::Root);

    let err = kmod.load(&LoopbackParams::default()).await.unwrap_err();
    assert!(matches!(err, BoothError::ModuleError(_)));

    let status = kmod.status();
    assert_eq!(status.state, ModuleState::Unloaded);
    assert!(status.last_error.unwrap().contains("not found"));
}

#[tokio::test]
async fn test_is_loaded_matches_module_name_exactly() {
    let runner = ScriptedRunner::new(|_, _| {
        Ok(ok("Module                  Size  Used by\n\
            v4l2loopback_dc        16384  0\n"))
    });
    let kmod = manager(&runner, Privilege::Root);
    assert!(!kmod.is_loaded().await);

    let params = LoopbackParams {
        video_nr: vec![2, 3],
        ..Default::default()
    };
    assert_eq!(kmod.device_paths(&params), vec!["/dev/video2", "/dev/video3"]);
}
