use std::path::Path;
use std::process::Command;

use aero_d3d12_replay::{replay_software, CaptureId, FenceState, ReplayOptions, ReplayScript};
use pretty_assertions::assert_eq;
use serde_json::Value;

const CROSS_QUEUE_SCRIPT: &str = r#"{
    "calls": [
        { "call": "create_factory", "out": 1 },
        { "call": "create_device", "out": 2 },
        { "call": "create_command_queue", "device": 2, "out": 3 },
        { "call": "create_command_queue", "device": 2, "desc": { "queue_type": "compute" }, "out": 4 },
        { "call": "create_fence", "device": 2, "out": 5 },
        { "call": "create_fence", "device": 2, "out": 6 },
        { "call": "create_command_list", "device": 2, "out": 7 },
        { "call": "queue_wait", "queue": 3, "fence": 5, "value": 5 },
        { "call": "execute_command_lists", "queue": 3, "command_lists": [7] },
        { "call": "queue_signal", "queue": 3, "fence": 6, "value": 1 },
        { "call": "queue_signal", "queue": 4, "fence": 5, "value": 4 },
        { "call": "set_event_on_completion", "fence": 6, "value": 1, "event_id": 10 },
        { "call": "queue_signal", "queue": 4, "fence": 5, "value": 5 },
        { "call": "queue_signal", "queue": 4, "fence": 5, "value": 9, "result": -2147467259 },
        { "call": "get_completed_value", "fence": 6, "value": 1 }
    ]
}"#;

fn write_file(dir: &Path, name: &str, text: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).expect("failed to write test file");
    path
}

#[test]
fn cross_queue_script_reaches_capture_fence_values() {
    let script = ReplayScript::from_json(CROSS_QUEUE_SCRIPT).unwrap();
    let summary = replay_software(&script, ReplayOptions::default());

    assert_eq!(summary.calls_dispatched, script.calls.len());
    assert_eq!(summary.fatal_error, None);
    assert_eq!(summary.live_objects, 7);
    assert_eq!(
        summary.fences,
        vec![
            FenceState {
                capture_id: CaptureId(5),
                last_signaled_value: 5,
                pending_values: vec![],
            },
            FenceState {
                capture_id: CaptureId(6),
                last_signaled_value: 1,
                pending_values: vec![],
            },
        ]
    );
}

#[test]
fn lockstep_replay_of_the_same_script_matches() {
    let script = ReplayScript::from_json(CROSS_QUEUE_SCRIPT).unwrap();
    let lockstep = replay_software(
        &script,
        ReplayOptions {
            sync_queue_submissions: true,
            ..ReplayOptions::default()
        },
    );
    let plain = replay_software(&script, ReplayOptions::default());
    assert_eq!(lockstep, plain);
}

#[test]
fn device_removal_seen_only_at_capture_is_not_fatal() {
    let script = ReplayScript::from_json(
        r#"{
            "calls": [
                { "call": "create_device", "out": 1 },
                { "call": "create_fence", "device": 1, "out": 2 },
                { "call": "check_feature_support", "device": 404, "feature": 0, "data_size": 4,
                  "result": -2005270523 },
                { "call": "fence_signal", "fence": 2, "value": 1, "result": -2005270523 },
                { "call": "create_fence", "device": 1, "out": 3 }
            ]
        }"#,
    )
    .unwrap();
    let summary = replay_software(&script, ReplayOptions::default());
    assert_eq!(summary.calls_dispatched, 5);
    assert_eq!(summary.fatal_error, None);
    assert_eq!(summary.fences[0].last_signaled_value, 0);
}

#[test]
fn cli_prints_the_summary_as_json() {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let script = write_file(tmp.path(), "script.json", CROSS_QUEUE_SCRIPT);
    let options = write_file(
        tmp.path(),
        "options.json",
        r#"{ "wait_timeout_ms": 10, "enable_validation_layer": true }"#,
    );

    let output = Command::new(env!("CARGO_BIN_EXE_aero-d3d12-replay"))
        .arg(&script)
        .arg("--options")
        .arg(&options)
        .arg("--sync")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run aero-d3d12-replay");
    assert!(
        output.status.success(),
        "aero-d3d12-replay exited with {}\nstderr:\n{}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );

    let summary: Value = serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(summary["calls_dispatched"], 15);
    assert_eq!(summary["fatal_error"], Value::Null);
    assert_eq!(summary["fences"][0]["capture_id"], 5);
    assert_eq!(summary["fences"][0]["last_signaled_value"], 5);
    assert_eq!(summary["fences"][1]["last_signaled_value"], 1);
}

#[test]
fn cli_rejects_malformed_scripts() {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let script = write_file(tmp.path(), "script.json", r#"{ "calls": [ { "call": "present" } ] }"#);

    let output = Command::new(env!("CARGO_BIN_EXE_aero-d3d12-replay"))
        .arg(&script)
        .output()
        .expect("failed to run aero-d3d12-replay");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("parsing script"));
}
