#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use termdeck_backend::{BackendSelector, SubprocessBackend};
use termdeck_core::bridge_ipc::{BridgeFrame, BridgeResult, CallEnvelope};
use termdeck_core::MonitorConfig;
use termdeck_hub::handlers::HeadlessDialog;
use termdeck_hub::system_terminal::SystemTerminalConfig;
use termdeck_hub::{
    Bridge, BridgeClient, BridgeEvent, ChannelError, Host, HostConfig, TransportConfig,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const CHANNEL: &str = "test-bridge";

fn test_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    std::env::temp_dir()
        .join(format!("termdeck-hub-test-{name}-{nanos}"))
        .join("bridge.sock")
}

async fn wait_for_socket(path: &Path) {
    for _ in 0..100 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("socket did not appear: {}", path.display());
}

type HostTask = JoinHandle<std::io::Result<()>>;

async fn launch_host(name: &str) -> (PathBuf, watch::Sender<bool>, HostTask) {
    let (path, _bridge, tx, handle) = launch_host_with_queue(name, 64).await;
    (path, tx, handle)
}

async fn launch_host_with_queue(
    name: &str,
    queue_capacity: usize,
) -> (PathBuf, Arc<Bridge>, watch::Sender<bool>, HostTask) {
    let path = test_path(name);
    let mut transport = TransportConfig::new(path.clone());
    transport.write_timeout = Duration::from_secs(1);
    transport.queue_capacity = queue_capacity;
    let config = HostConfig {
        channel: CHANNEL.to_string(),
        monitor: MonitorConfig::default(),
        system_terminal: SystemTerminalConfig::default(),
        backend_queue_capacity: 64,
        transport,
    };
    let selector = BackendSelector::new(
        Arc::new(SubprocessBackend::new()),
        Arc::new(SubprocessBackend::new()),
    );
    let host = Host::with_selector(config, selector, Arc::new(HeadlessDialog)).expect("host");
    let bridge = Arc::clone(host.bridge());
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(host.run(rx));
    wait_for_socket(&path).await;
    (path, bridge, tx, handle)
}

async fn connect(path: &Path) -> (BridgeClient, mpsc::UnboundedReceiver<BridgeEvent>) {
    BridgeClient::connect(path, CHANNEL)
        .await
        .unwrap_or_else(|err| panic!("connect failed: {err}"))
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<BridgeEvent>, name: &str) -> Vec<Value> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event stream open");
            if event.name == name {
                return event.payload;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {name} event in time"))
}

async fn stop(tx: watch::Sender<bool>, handle: HostTask) {
    let _ = tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(3), handle).await;
}

#[tokio::test]
async fn unknown_message_returns_error_result() {
    let (path, tx, handle) = launch_host("unknown").await;
    let (client, _events) = connect(&path).await;

    let result = client.invoke("nope", Vec::new()).await.expect("invoke");
    assert_eq!(result, BridgeResult::error("Unknown IPC message nope"));

    stop(tx, handle).await;
}

#[tokio::test]
async fn terminal_output_and_exit_reach_the_window() {
    let (path, tx, handle) = launch_host("terminal").await;
    let (client, mut events) = connect(&path).await;

    let created = client
        .invoke(
            "terminal:create",
            vec![json!({ "shell": "sh", "args": ["-c", "echo hello"] })],
        )
        .await
        .expect("invoke")
        .into_result()
        .expect("create succeeds");
    let id = created["id"].clone();
    assert_eq!(created["backend"], json!("subprocess"));

    let data = next_event(&mut events, "terminal:data").await;
    assert_eq!(data, vec![id.clone(), json!("hello\n")]);
    let exit = next_event(&mut events, "terminal:exit").await;
    assert_eq!(exit[0], id);
    assert_eq!(exit[1]["code"], json!(0));

    let listed = client
        .invoke("terminal:list", Vec::new())
        .await
        .expect("invoke");
    assert_eq!(listed, BridgeResult::success(json!([])));

    let input = client
        .invoke("terminal:input", vec![id, json!("late")])
        .await
        .expect("invoke");
    assert!(!input.is_success());

    stop(tx, handle).await;
}

#[tokio::test]
async fn recent_output_replays_what_a_live_terminal_printed() {
    let (path, tx, handle) = launch_host("recent").await;
    let (client, mut events) = connect(&path).await;

    let created = client
        .invoke(
            "terminal:create",
            vec![json!({ "shell": "sh", "args": ["-c", "echo ready; sleep 30"] })],
        )
        .await
        .expect("invoke")
        .into_result()
        .expect("create succeeds");
    let id = created["id"].clone();
    next_event(&mut events, "terminal:data").await;

    let recent = client
        .invoke("terminal:recent-output", vec![id.clone()])
        .await
        .expect("invoke");
    assert_eq!(recent, BridgeResult::success(json!("ready\n")));

    let unknown = client
        .invoke("terminal:recent-output", vec![json!("term-missing")])
        .await
        .expect("invoke");
    assert!(!unknown.is_success());

    client
        .invoke("terminal:kill", vec![id])
        .await
        .expect("invoke");
    next_event(&mut events, "terminal:exit").await;

    stop(tx, handle).await;
}

#[tokio::test]
async fn theme_change_is_broadcast_to_every_window() {
    let (path, tx, handle) = launch_host("theme").await;
    let (first, mut first_events) = connect(&path).await;
    let (second, mut second_events) = connect(&path).await;
    // A completed round trip means the host has attached the window.
    second.invoke("monitor:stats", Vec::new()).await.expect("invoke");

    let result = first
        .invoke("theme:changed", vec![json!({ "name": "dark" })])
        .await
        .expect("invoke");
    assert!(result.is_success());

    for events in [&mut first_events, &mut second_events] {
        let theme = next_event(events, "theme:changed").await;
        assert_eq!(theme, vec![json!({ "name": "dark" })]);
    }

    stop(tx, handle).await;
}

#[tokio::test]
async fn frames_for_another_channel_are_ignored() {
    let (path, tx, handle) = launch_host("channel").await;
    let (client, _events) = connect(&path).await;

    let foreign = BridgeFrame::invoke("other-channel", 999, CallEnvelope::new("terminal:list", Vec::new()));
    client.send_frame(&foreign).await.expect("send");

    let result = client
        .invoke("monitor:stats", Vec::new())
        .await
        .expect("invoke");
    let stats = result.into_result().expect("stats succeed");
    assert_eq!(stats["totalTerminals"], json!(0));

    stop(tx, handle).await;
}

#[tokio::test]
async fn system_terminal_lines_stream_to_the_window() {
    let (path, tx, handle) = launch_host("system").await;
    let (client, mut events) = connect(&path).await;

    let listed = client
        .invoke("system-terminal:initialize", Vec::new())
        .await
        .expect("invoke")
        .into_result()
        .expect("initialize succeeds");
    assert_eq!(listed.as_array().map(Vec::len), Some(2));

    client
        .invoke(
            "system-terminal:log",
            vec![json!("system"), json!("success"), json!("ready")],
        )
        .await
        .expect("invoke");
    let output = next_event(&mut events, "system-terminal:output").await;
    assert_eq!(output[0], json!("system"));
    assert_eq!(output[1]["message"], json!("ready"));

    let lines = client
        .invoke(
            "system-terminal:get-lines",
            vec![json!("system"), json!(0), json!(10)],
        )
        .await
        .expect("invoke")
        .into_result()
        .expect("lines");
    assert_eq!(lines[0]["level"], json!("success"));

    let bad_level = client
        .invoke(
            "system-terminal:log",
            vec![json!("system"), json!("loud"), json!("x")],
        )
        .await
        .expect("invoke");
    assert!(!bad_level.is_success());

    stop(tx, handle).await;
}

#[tokio::test]
async fn open_dialog_is_null_without_a_native_dialog() {
    let (path, tx, handle) = launch_host("dialog").await;
    let (client, _events) = connect(&path).await;

    let result = client
        .invoke("project:open-dialog", Vec::new())
        .await
        .expect("invoke");
    assert_eq!(result, BridgeResult::success(Value::Null));

    stop(tx, handle).await;
}

#[tokio::test]
async fn backed_up_window_is_disconnected() {
    let (path, bridge, tx, handle) = launch_host_with_queue("slow", 1).await;
    let (client, mut events) = connect(&path).await;
    client.invoke("monitor:stats", Vec::new()).await.expect("invoke");
    assert_eq!(bridge.window_count(), 1);

    // Nothing drains the window's queue between these two sends.
    assert_eq!(bridge.send("theme:changed", vec![json!(1)]), 1);
    assert_eq!(bridge.send("theme:changed", vec![json!(2)]), 0);
    assert_eq!(bridge.window_count(), 0);

    tokio::time::timeout(Duration::from_secs(5), async {
        while events.recv().await.is_some() {}
    })
    .await
    .expect("event stream ends once the host hangs up");
    let late = client.invoke("monitor:stats", Vec::new()).await;
    assert!(matches!(late, Err(ChannelError::Closed)));

    // A fresh connection is served normally.
    let (again, _events) = connect(&path).await;
    let stats = again.invoke("monitor:stats", Vec::new()).await.expect("invoke");
    assert!(stats.is_success());

    stop(tx, handle).await;
}
