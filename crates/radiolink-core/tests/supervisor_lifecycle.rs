//! Supervisor lifecycle with fake host collaborators and harmless stand-in
//! executables.

use std::path::Path;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use test_log::test;

use radiolink_config::AppConfig;
use radiolink_core::ipc::Opcode;
use radiolink_core::supervisor::devices::{DeviceError, PhysicalDevice, StaticDeviceSelector, choose_device};
use radiolink_core::supervisor::template::TemplateError;
use radiolink_core::{Supervisor, SupervisorError};
use radiolink_test_utils::{
    FakeProcessTable, MockDaemon, RecordingSignaller, ScriptedPrompt, TestConfigBuilder,
};

const TEMPLATE: &str = "[link]\nown = <own/>\nother = <other/>\n\
                        [pcap]\nphys = <phys/>\ninterface = <ifname/>\n";

fn write_template(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("radiosocketd.conf.template");
    std::fs::write(&path, TEMPLATE).unwrap();
    path
}

fn builder(dir: &Path, executable: &str) -> TestConfigBuilder {
    TestConfigBuilder::new()
        .runtime_dir(dir)
        .template(&write_template(dir))
        .executable(executable)
        .extra_args(&[])
        .link_ids("0xFF00", "0xDD00")
}

fn config(dir: &Path, executable: &str) -> AppConfig {
    builder(dir, executable).build()
}

struct Host {
    processes: Arc<FakeProcessTable>,
    signaller: Arc<RecordingSignaller>,
    prompt: Arc<ScriptedPrompt>,
}

fn supervisor(config: AppConfig, host: &Host) -> Supervisor<radiolink_core::supervisor::Unconfigured> {
    Supervisor::new(config)
        .with_instance_id(4400)
        .with_process_table(host.processes.clone())
        .with_signaller(host.signaller.clone())
        .with_prompt(host.prompt.clone())
}

fn quiet_host() -> Host {
    Host {
        processes: Arc::new(FakeProcessTable::empty()),
        signaller: Arc::new(RecordingSignaller::new()),
        prompt: Arc::new(ScriptedPrompt::new()),
    }
}

#[test(tokio::test)]
async fn configure_renders_template_into_instance_config() {
    let dir = tempfile::tempdir().unwrap();
    let host = quiet_host();
    let configured = supervisor(config(dir.path(), "true"), &host)
        .configure(&StaticDeviceSelector::new(1, None))
        .await
        .unwrap();

    let path = dir.path().join("radiosocketd_4400.conf");
    assert_eq!(configured.rendered_config(), path.as_path());
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "[link]\nown = 0xFF00\nother = 0xDD00\n[pcap]\nphys = 1\ninterface = wlan1mon\n"
    );
}

#[test(tokio::test)]
async fn missing_template_fails_configure() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), "true");
    config.daemon.template = dir.path().join("absent.template");

    let err = supervisor(config, &quiet_host())
        .configure(&StaticDeviceSelector::new(0, None))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SupervisorError::Template(TemplateError::Read { .. })));
}

#[test(tokio::test)]
async fn declined_zombie_is_left_alone_and_daemon_still_starts() {
    let dir = tempfile::tempdir().unwrap();
    let host = Host {
        processes: Arc::new(FakeProcessTable::new(&[
            (1, "/sbin/init"),
            (4412, "./radiosocketd -v -c /tmp/radiosocketd_4000.conf -s /tmp/radiosocketd_4000.sock"),
            (std::process::id(), "radiosocketd supervisor under test"),
        ])),
        signaller: Arc::new(RecordingSignaller::new()),
        prompt: Arc::new(ScriptedPrompt::new().confirming(&[false])),
    };

    let configured = supervisor(config(dir.path(), "true"), &host)
        .configure(&StaticDeviceSelector::new(0, None))
        .await
        .unwrap();
    let (running, mut dispatcher) = configured.start().await.unwrap();

    assert_eq!(host.prompt.asked().len(), 1);
    assert!(host.prompt.asked()[0].contains("4412"));
    assert!(host.signaller.interrupted().is_empty());
    assert_eq!(
        dispatcher.endpoint(),
        dir.path().join("radiosocketd_4400.sock").as_path()
    );

    let stopped = running.stop(&mut dispatcher).await.unwrap();
    assert!(stopped.exit_status().unwrap().success());
}

#[test(tokio::test)]
async fn confirmed_zombie_is_interrupted() {
    let dir = tempfile::tempdir().unwrap();
    let host = Host {
        processes: Arc::new(FakeProcessTable::new(&[
            (4411, "sudo ./radiosocketd -v"),
            (4412, "./radiosocketd -v"),
        ])),
        signaller: Arc::new(RecordingSignaller::new()),
        prompt: Arc::new(ScriptedPrompt::new().confirming(&[true, false])),
    };

    let (running, mut dispatcher) = supervisor(config(dir.path(), "true"), &host)
        .configure(&StaticDeviceSelector::new(0, None))
        .await
        .unwrap()
        .start()
        .await
        .unwrap();

    assert_eq!(host.signaller.interrupted(), vec![4411]);
    running.stop(&mut dispatcher).await.unwrap();
}

#[test(tokio::test)]
async fn zombie_scan_matches_configured_process_name() {
    let dir = tempfile::tempdir().unwrap();
    let host = Host {
        processes: Arc::new(FakeProcessTable::new(&[
            (4410, "./radiosocketd -v"),
            (4411, "less /tmp/radiosocketd-lab_4000.conf"),
            (4412, "sudo /opt/radio/radiosocketd-lab -v"),
        ])),
        signaller: Arc::new(RecordingSignaller::new()),
        prompt: Arc::new(ScriptedPrompt::new().confirming(&[true])),
    };
    let config = builder(dir.path(), "true").process_name("radiosocketd-lab").build();

    let configured = supervisor(config, &host)
        .configure(&StaticDeviceSelector::new(0, None))
        .await
        .unwrap();
    assert_eq!(
        configured.rendered_config(),
        dir.path().join("radiosocketd-lab_4400.conf").as_path()
    );
    let (running, mut dispatcher) = configured.start().await.unwrap();

    assert_eq!(host.prompt.asked().len(), 1);
    assert_eq!(host.signaller.interrupted(), vec![4412]);
    running.stop(&mut dispatcher).await.unwrap();
}

#[test(tokio::test)]
async fn operator_picks_among_several_devices() {
    let devices = vec![
        PhysicalDevice {
            index: 1,
            interfaces: vec!["wlan1".to_string()],
            ..PhysicalDevice::default()
        },
        PhysicalDevice {
            index: 2,
            interfaces: vec!["wlan2".to_string()],
            ..PhysicalDevice::default()
        },
    ];
    let prompt = ScriptedPrompt::new().choosing(&[Some(1), Some(9), None]);

    let picked = choose_device(devices.clone(), &prompt).await.unwrap();
    assert_eq!(picked.index, 2);
    assert!(matches!(
        choose_device(devices.clone(), &prompt).await,
        Err(DeviceError::Aborted)
    ));
    assert!(matches!(
        choose_device(devices, &prompt).await,
        Err(DeviceError::Aborted)
    ));
    assert_eq!(prompt.asked().len(), 3);
}

#[test(tokio::test)]
async fn spawn_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("no-such-radiosocketd");
    let configured = supervisor(config(dir.path(), &missing.display().to_string()), &quiet_host())
        .configure(&StaticDeviceSelector::new(0, None))
        .await
        .unwrap();

    match configured.start().await {
        Err(SupervisorError::SpawnFailed { program, .. }) => {
            assert_eq!(program, missing.display().to_string());
        }
        Err(other) => panic!("expected SpawnFailed, got {other}"),
        Ok(_) => panic!("spawn of a missing executable succeeded"),
    }
}

#[test(tokio::test)]
async fn failed_process_scan_aborts_start() {
    let dir = tempfile::tempdir().unwrap();
    let host = Host {
        processes: Arc::new(FakeProcessTable::failing()),
        ..quiet_host()
    };
    let configured = supervisor(config(dir.path(), "true"), &host)
        .configure(&StaticDeviceSelector::new(0, None))
        .await
        .unwrap();
    assert!(matches!(configured.start().await, Err(SupervisorError::Scan(_))));
}

#[test(tokio::test)]
async fn stop_sends_exit_and_removes_config() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = MockDaemon::answering_status(0).await;
    let (running, _) = supervisor(config(dir.path(), "true"), &quiet_host())
        .configure(&StaticDeviceSelector::new(0, None))
        .await
        .unwrap()
        .start()
        .await
        .unwrap();

    let mut dispatcher = daemon.dispatcher();
    let stopped = running.stop(&mut dispatcher).await.unwrap();

    assert_eq!(daemon.requests()[0].command, Opcode::Exit.code());
    assert!(stopped.exit_status().is_some());
    assert!(!dir.path().join("radiosocketd_4400.conf").exists());
}

#[test(tokio::test)]
async fn daemon_outliving_stop_timeout_is_left_running() {
    let dir = tempfile::tempdir().unwrap();
    let config = builder(dir.path(), "sh")
        .extra_args(&["-c", "sleep 3", "sh"])
        .stop_timeout_secs(1)
        .build();

    let (running, mut dispatcher) = supervisor(config, &quiet_host())
        .configure(&StaticDeviceSelector::new(0, None))
        .await
        .unwrap()
        .start()
        .await
        .unwrap();
    assert!(running.pid().is_some());

    let stopped = running.stop(&mut dispatcher).await.unwrap();
    assert!(stopped.exit_status().is_none());
}
