// Integration tests driving the playback bridge actor through its
// message vocabulary, observing runtime commands and parts snapshots.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use fmp4::test_support::{InitSegmentOptions, make_init_segment, make_media_fragment};
use vodbridge::bridge::{
    BridgeHandle, BridgeMethod, PartsSnapshot, PlaybackBridge, PlayerControl, RuntimeCommand,
    RuntimeMessage,
};

struct TestBridge {
    handle: BridgeHandle,
    commands: mpsc::UnboundedReceiver<RuntimeCommand>,
    parts: watch::Receiver<PartsSnapshot>,
}

fn start_bridge() -> TestBridge {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (bridge, handle, parts) = PlaybackBridge::new(command_tx);
    tokio::spawn(bridge.run());
    TestBridge {
        handle,
        commands: command_rx,
        parts,
    }
}

fn invoke(handle: &BridgeHandle, bridge_id: u64, callback_id: u64, method: BridgeMethod) {
    handle.deliver(RuntimeMessage::BridgeInvoke {
        bridge_id,
        callback_id,
        method,
    });
}

async fn next_command(rx: &mut mpsc::UnboundedReceiver<RuntimeCommand>) -> RuntimeCommand {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for runtime command")
        .expect("bridge stopped")
}

async fn next_callback(rx: &mut mpsc::UnboundedReceiver<RuntimeCommand>) -> (u64, Value) {
    loop {
        if let RuntimeCommand::InvokeCallback {
            callback_id,
            result,
        } = next_command(rx).await
        {
            return (callback_id, result);
        }
    }
}

async fn wait_parts(
    parts: &mut watch::Receiver<PartsSnapshot>,
    pred: impl Fn(&PartsSnapshot) -> bool,
) {
    timeout(Duration::from_secs(5), async {
        loop {
            if pred(&parts.borrow_and_update()) {
                return;
            }
            parts.changed().await.expect("parts channel closed");
        }
    })
    .await
    .expect("timed out waiting for parts snapshot");
}

fn init_bytes() -> Bytes {
    Bytes::from(make_init_segment(&InitSegmentOptions::new(1000)))
}

fn media_payload(base: u64, durations: &[u32]) -> Bytes {
    let mut combined = make_init_segment(&InitSegmentOptions::new(1000));
    combined.extend_from_slice(&make_media_fragment(base, durations));
    Bytes::from(combined)
}

fn ranges_of(result: &Value) -> Vec<f64> {
    result["ranges"]
        .as_array()
        .expect("ranges array")
        .iter()
        .map(|v| v.as_f64().expect("float"))
        .collect()
}

struct RecordingControl {
    calls: Mutex<Vec<String>>,
}

impl RecordingControl {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl PlayerControl for RecordingControl {
    fn play(&self) {
        self.calls.lock().push("play".to_string());
    }

    fn pause(&self) {
        self.calls.lock().push("pause".to_string());
    }

    fn seek(&self, timestamp: f64) {
        self.calls.lock().push(format!("seek:{timestamp}"));
    }
}

#[tokio::test]
async fn test_append_init_then_media_then_remove() {
    let mut t = start_bridge();

    invoke(&t.handle, 10, 1, BridgeMethod::MediaSourceConstruct);
    assert_eq!(next_callback(&mut t.commands).await.0, 1);

    invoke(
        &t.handle,
        20,
        2,
        BridgeMethod::SourceBufferConstruct {
            media_source_id: 10,
            mime_type: "video/mp4".to_string(),
        },
    );
    assert_eq!(next_callback(&mut t.commands).await.0, 2);

    invoke(
        &t.handle,
        10,
        0,
        BridgeMethod::MediaSourceUpdateSourceBuffers { ids: vec![20] },
    );

    // Zero-duration payload: stored as initialization data, coverage
    // stays empty.
    invoke(
        &t.handle,
        20,
        3,
        BridgeMethod::SourceBufferAppend { data: init_bytes() },
    );
    let (id, result) = next_callback(&mut t.commands).await;
    assert_eq!(id, 3);
    assert!(ranges_of(&result).is_empty());

    // Media fragment demuxing to [0.0, 2.0).
    invoke(
        &t.handle,
        20,
        4,
        BridgeMethod::SourceBufferAppend {
            data: Bytes::from(make_media_fragment(0, &[1000, 1000])),
        },
    );
    let (id, result) = next_callback(&mut t.commands).await;
    assert_eq!(id, 4);
    assert_eq!(ranges_of(&result), vec![0.0, 2.0]);
    wait_parts(&mut t.parts, |snapshot| snapshot.state.parts.len() == 1).await;

    invoke(
        &t.handle,
        20,
        5,
        BridgeMethod::SourceBufferRemove {
            start: 0.0,
            end: 2.0,
        },
    );
    let (id, result) = next_callback(&mut t.commands).await;
    assert_eq!(id, 5);
    assert!(ranges_of(&result).is_empty());
    wait_parts(&mut t.parts, |snapshot| snapshot.state.parts.is_empty()).await;
}

#[tokio::test]
async fn test_abort_discards_inflight_append() {
    let mut t = start_bridge();

    invoke(&t.handle, 10, 1, BridgeMethod::MediaSourceConstruct);
    invoke(
        &t.handle,
        20,
        2,
        BridgeMethod::SourceBufferConstruct {
            media_source_id: 10,
            mime_type: "video/mp4".to_string(),
        },
    );
    invoke(
        &t.handle,
        10,
        0,
        BridgeMethod::MediaSourceUpdateSourceBuffers { ids: vec![20] },
    );
    assert_eq!(next_callback(&mut t.commands).await.0, 1);
    assert_eq!(next_callback(&mut t.commands).await.0, 2);

    // Append A, abort, append B: only B's effect may survive, no matter
    // which demux task completes first.
    invoke(
        &t.handle,
        20,
        3,
        BridgeMethod::SourceBufferAppend {
            data: media_payload(0, &[1000, 1000]),
        },
    );
    invoke(&t.handle, 20, 4, BridgeMethod::SourceBufferAbort);
    invoke(
        &t.handle,
        20,
        5,
        BridgeMethod::SourceBufferAppend {
            data: media_payload(5000, &[1000]),
        },
    );

    let (id, _) = next_callback(&mut t.commands).await;
    assert_eq!(id, 4, "abort replies before any append completion");

    let (id, result) = next_callback(&mut t.commands).await;
    assert_eq!(id, 5);
    assert_eq!(ranges_of(&result), vec![5.0, 6.0]);

    // A's stale completion must not produce a reply.
    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(command) = t.commands.try_recv() {
        if let RuntimeCommand::InvokeCallback { callback_id, .. } = command {
            assert_ne!(callback_id, 3, "aborted append must not reply");
        }
    }

    wait_parts(&mut t.parts, |snapshot| {
        snapshot.state.parts.len() == 1
            && snapshot.state.parts[0].start_time == 5.0
    })
    .await;
}

#[tokio::test]
async fn test_player_control_dispatch() {
    let mut t = start_bridge();
    let control = Arc::new(RecordingControl::new());
    let _guard = t
        .handle
        .register_instance(7, "/clip/", None, control.clone());

    invoke(
        &t.handle,
        1,
        1,
        BridgeMethod::VideoElementConstruct { instance_id: 7 },
    );
    invoke(
        &t.handle,
        1,
        2,
        BridgeMethod::VideoElementPlay { instance_id: 7 },
    );
    invoke(
        &t.handle,
        1,
        3,
        BridgeMethod::VideoElementPause { instance_id: 7 },
    );
    invoke(
        &t.handle,
        1,
        4,
        BridgeMethod::VideoElementSetCurrentTime {
            instance_id: 7,
            current_time: 12.5,
        },
    );
    for expected in 1..=4 {
        assert_eq!(next_callback(&mut t.commands).await.0, expected);
    }

    assert_eq!(
        *control.calls.lock(),
        vec!["play".to_string(), "pause".to_string(), "seek:12.5".to_string()]
    );
}

#[tokio::test]
async fn test_missing_bindings_are_noops() {
    let mut t = start_bridge();

    // No instance, media source or buffer registered anywhere: control
    // calls still reply, mutations are silently skipped.
    invoke(
        &t.handle,
        1,
        1,
        BridgeMethod::VideoElementPlay { instance_id: 99 },
    );
    assert_eq!(next_callback(&mut t.commands).await.0, 1);

    invoke(
        &t.handle,
        50,
        2,
        BridgeMethod::SourceBufferRemove {
            start: 0.0,
            end: 1.0,
        },
    );
    invoke(
        &t.handle,
        1,
        3,
        BridgeMethod::VideoElementPause { instance_id: 99 },
    );
    // The remove against an unknown buffer produced no reply; the next
    // callback is the pause.
    assert_eq!(next_callback(&mut t.commands).await.0, 3);
}

#[tokio::test]
async fn test_set_duration_notifies_only_on_change() {
    let mut t = start_bridge();

    invoke(&t.handle, 10, 1, BridgeMethod::MediaSourceConstruct);
    assert_eq!(next_callback(&mut t.commands).await.0, 1);

    invoke(
        &t.handle,
        10,
        2,
        BridgeMethod::MediaSourceSetDuration { duration: 42.0 },
    );
    assert_eq!(next_callback(&mut t.commands).await.0, 2);
    wait_parts(&mut t.parts, |snapshot| {
        snapshot.media_source_id == 10 && snapshot.state.duration == Some(42.0)
    })
    .await;

    // Re-setting the same duration replies but publishes nothing new.
    invoke(
        &t.handle,
        10,
        3,
        BridgeMethod::MediaSourceSetDuration { duration: 42.0 },
    );
    assert_eq!(next_callback(&mut t.commands).await.0, 3);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!t.parts.has_changed().expect("parts channel open"));
}

#[tokio::test]
async fn test_window_on_load_initializes_pending_instances() {
    let mut t = start_bridge();
    let _guard =
        t.handle
            .register_instance(3, "/clip/", None, Arc::new(RecordingControl::new()));

    // Nothing is initialized before the runtime reports ready.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(t.commands.try_recv().is_err());

    t.handle.deliver(RuntimeMessage::WindowOnLoad);
    assert_eq!(
        next_command(&mut t.commands).await,
        RuntimeCommand::MakeInstance { instance_id: 3 }
    );
    match next_command(&mut t.commands).await {
        RuntimeCommand::InitializeInstance {
            instance_id,
            url_prefix,
            bandwidth_estimate,
            ..
        } => {
            assert_eq!(instance_id, 3);
            assert_eq!(url_prefix, "/clip/");
            assert_eq!(bandwidth_estimate, 500_000.0);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[tokio::test]
async fn test_bandwidth_estimate_is_shared_and_sanitized() {
    let mut t = start_bridge();
    t.handle.deliver(RuntimeMessage::WindowOnLoad);

    let _first =
        t.handle
            .register_instance(1, "/a/", None, Arc::new(RecordingControl::new()));
    t.handle.deliver(RuntimeMessage::PlayerCurrentTime {
        instance_id: 1,
        value: 3.0,
        bandwidth_estimate: Some(250_000.0),
    });
    // Invalid estimates are discarded, not recorded.
    t.handle.deliver(RuntimeMessage::PlayerCurrentTime {
        instance_id: 1,
        value: 4.0,
        bandwidth_estimate: Some(f64::NAN),
    });

    let _second =
        t.handle
            .register_instance(2, "/b/", None, Arc::new(RecordingControl::new()));

    let mut initialized = Vec::new();
    while initialized.len() < 2 {
        if let RuntimeCommand::InitializeInstance {
            instance_id,
            bandwidth_estimate,
            ..
        } = next_command(&mut t.commands).await
        {
            initialized.push((instance_id, bandwidth_estimate));
        }
    }
    assert_eq!(initialized[0], (1, 500_000.0));
    assert_eq!(initialized[1], (2, 250_000.0));
}

#[tokio::test]
async fn test_instance_teardown_destroys_runtime_instance() {
    let mut t = start_bridge();
    t.handle.deliver(RuntimeMessage::WindowOnLoad);

    let guard =
        t.handle
            .register_instance(9, "/clip/", None, Arc::new(RecordingControl::new()));
    assert_eq!(
        next_command(&mut t.commands).await,
        RuntimeCommand::MakeInstance { instance_id: 9 }
    );
    drop(guard);

    loop {
        match next_command(&mut t.commands).await {
            RuntimeCommand::DestroyInstance { instance_id } => {
                assert_eq!(instance_id, 9);
                break;
            }
            RuntimeCommand::InitializeInstance { .. } => continue,
            other => panic!("unexpected command: {other:?}"),
        }
    }

    // Control calls against the torn-down instance are no-ops.
    invoke(
        &t.handle,
        1,
        1,
        BridgeMethod::VideoElementPlay { instance_id: 9 },
    );
    assert_eq!(next_callback(&mut t.commands).await.0, 1);
}

#[tokio::test]
async fn test_ready_status_triggers_level_load() {
    let mut t = start_bridge();
    t.handle.deliver(RuntimeMessage::WindowOnLoad);
    let _guard =
        t.handle
            .register_instance(5, "/clip/", Some(480), Arc::new(RecordingControl::new()));

    let status = json!({
        "event": "playerStatus",
        "instanceId": 5,
        "data": {
            "isReady": true,
            "isPlaying": false,
            "rate": 0.0,
            "defaultRate": 1.0,
            "currentLevel": 0,
            "levels": [
                {"index": 0, "bitrate": 400_000, "width": 426, "height": 240},
                {"index": 1, "bitrate": 1_200_000, "width": 854, "height": 480},
                {"index": 2, "bitrate": 2_500_000, "width": 1280, "height": 720}
            ]
        }
    });
    t.handle.deliver_text(status.to_string());

    loop {
        match next_command(&mut t.commands).await {
            RuntimeCommand::LoadLevel { instance_id, level } => {
                assert_eq!(instance_id, 5);
                assert_eq!(level, 1, "preferred height 480 maps to level 1");
                break;
            }
            RuntimeCommand::MakeInstance { .. } | RuntimeCommand::InitializeInstance { .. } => {
                continue;
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_player_status_report_reaches_bound_element() {
    let mut t = start_bridge();

    invoke(
        &t.handle,
        11,
        1,
        BridgeMethod::VideoElementConstruct { instance_id: 7 },
    );
    assert_eq!(next_callback(&mut t.commands).await.0, 1);

    t.handle.report_player_status(7, true, false, 3.5);
    match next_command(&mut t.commands).await {
        RuntimeCommand::UpdateStatus { bridge_id, status } => {
            assert_eq!(bridge_id, 11);
            assert_eq!(status["isPlaying"], json!(true));
            assert_eq!(status["isWaiting"], json!(false));
            assert_eq!(status["currentTime"], json!(3.5));
        }
        other => panic!("unexpected command: {other:?}"),
    }

    // A report for an unbound instance is a no-op.
    t.handle.report_player_status(99, true, false, 0.0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(t.commands.try_recv().is_err());
}
