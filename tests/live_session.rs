//! End-to-end host/viewer sessions over loopback

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

use locallive_rs::{ControlEvent, ControllerConfig, Error, LiveController, SessionPhase, StreamFrame, TransportConfig};

const WAIT: Duration = Duration::from_secs(3);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Each test gets its own discovery port so tests can run in parallel
fn config(discovery_port: u16) -> ControllerConfig {
    ControllerConfig::with_transport(
        TransportConfig::default()
            .bind("127.0.0.1:0".parse().unwrap())
            .discovery_port(discovery_port)
            .discovery_target(SocketAddr::from(([127, 0, 0, 1], discovery_port)))
            .discovery_timeout(Duration::from_millis(1500))
            .connect_timeout(Duration::from_secs(2)),
    )
}

fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// A viewer whose received events land in a channel
async fn joined_viewer(port: u16, live_match_id: &str) -> (LiveController, mpsc::UnboundedReceiver<Value>) {
    let viewer = LiveController::new(config(port));
    let (tx, rx) = mpsc::unbounded_channel();
    viewer.on_event(move |event| {
        let _ = tx.send(Value::Object(event.payload));
    });
    assert_ok!(viewer.join_viewer(live_match_id).await);
    (viewer, rx)
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_viewer_joins_and_receives_goal() {
    init_tracing();
    let host = LiveController::new(config(47711));
    assert_ok!(host.start_host("L1", "M1", "LM1").await);

    let (viewer, mut events) = joined_viewer(47711, "LM1").await;
    assert_eq!(viewer.phase(), SessionPhase::Active);

    // The viewer learns the full match identifiers from the host
    let current = viewer.registry().current().unwrap();
    assert_eq!(current.info.league_id, "L1");
    assert_eq!(current.info.match_id, "M1");

    assert_eq!(host.registry().peer_count(), 1);
    assert_ok!(host.send_event("LM1", payload(json!({"type": "goal"}))));

    assert_eq!(recv(&mut events).await, json!({"type": "goal"}));
    assert_eq!(host.stats().events_published, 1);

    assert_ok!(viewer.leave_viewer("LM1").await);
    assert_ok!(host.stop_host("LM1").await);
    assert_eq!(host.phase(), SessionPhase::Idle);
}

#[tokio::test]
async fn test_join_unknown_match_times_out() {
    init_tracing();
    let host = LiveController::new(config(47712));
    assert_ok!(host.start_host("L1", "M1", "LM1").await);

    let viewer = LiveController::new(config(47712));
    let err = assert_err!(viewer.join_viewer("LM2").await);
    assert!(matches!(err, Error::DiscoveryTimeout(ref id) if id == "LM2"));
    assert_eq!(viewer.phase(), SessionPhase::Idle);
    assert!(viewer.registry().journal().iter().all(|t| t.from.can_transition_to(t.to)));

    assert_ok!(host.stop_host("LM1").await);
}

#[tokio::test]
async fn test_events_reach_all_viewers_in_order_despite_one_lost() {
    init_tracing();
    let host = LiveController::new(config(47713));
    assert_ok!(host.start_host("L1", "M1", "LM1").await);

    let (first, mut first_events) = joined_viewer(47713, "LM1").await;
    let (second, mut second_events) = joined_viewer(47713, "LM1").await;
    let (third, _third_events) = joined_viewer(47713, "LM1").await;
    assert_eq!(host.registry().peer_count(), 3);

    // Third viewer goes away while the host keeps publishing
    let leaving = {
        let third = third.clone();
        tokio::spawn(async move { third.leave_viewer("LM1").await })
    };
    for minute in 0..5 {
        assert_ok!(host.send_event("LM1", payload(json!({"minute": minute}))));
    }
    assert_ok!(leaving.await.unwrap());

    for minute in 0..5 {
        assert_eq!(recv(&mut first_events).await, json!({"minute": minute}));
        assert_eq!(recv(&mut second_events).await, json!({"minute": minute}));
    }

    wait_for(|| host.registry().peer_count() == 2).await;
    assert_eq!(host.phase(), SessionPhase::Active);

    assert_ok!(first.leave_viewer("LM1").await);
    assert_ok!(second.leave_viewer("LM1").await);
    assert_ok!(host.stop_host("LM1").await);
}

#[tokio::test]
async fn test_host_stop_surfaces_connection_lost() {
    init_tracing();
    let host = LiveController::new(config(47714));
    assert_ok!(host.start_host("L1", "M1", "LM1").await);

    let (viewer, _events) = joined_viewer(47714, "LM1").await;
    let mut notices = viewer.subscribe();

    assert_ok!(host.stop_host("LM1").await);

    let notice = tokio::time::timeout(WAIT, notices.recv()).await.unwrap().unwrap();
    match notice {
        ControlEvent::SessionFailed { live_match_id, error } => {
            assert_eq!(live_match_id, "LM1");
            assert_eq!(error.code(), "CONNECTION_LOST");
        }
        other => panic!("unexpected notice {:?}", other),
    }

    wait_for(|| viewer.phase() == SessionPhase::Idle).await;
    wait_for(|| !viewer.guard().is_engaged()).await;

    // Leaving after the loss is a harmless no-op
    assert_ok!(viewer.leave_viewer("LM1").await);
}

#[tokio::test]
async fn test_frames_reach_viewer() {
    init_tracing();
    let host = LiveController::new(config(47715));
    assert_ok!(host.start_host("L1", "M1", "LM1").await);

    let viewer = LiveController::new(config(47715));
    let (tx, mut frames) = mpsc::unbounded_channel();
    viewer.on_frame(move |frame: StreamFrame| {
        let _ = tx.send(frame);
    });
    assert_ok!(viewer.join_viewer("LM1").await);

    let keyframe = StreamFrame::video(40, Bytes::from_static(&[0x17, 0x01, 0x02]), true);
    assert!(host.push_frame(keyframe.clone()));

    let received = tokio::time::timeout(WAIT, frames.recv()).await.unwrap().unwrap();
    assert_eq!(received, keyframe);

    // Torn-down consumer: later frames are discarded
    viewer.clear_consumers();
    assert!(host.push_frame(StreamFrame::video(80, Bytes::from_static(&[0x27]), false)));
    wait_for(|| viewer.stats().frames_dropped >= 1).await;
    assert!(frames.try_recv().is_err());

    assert_ok!(viewer.leave_viewer("LM1").await);
    assert_ok!(host.stop_host("LM1").await);
}

#[tokio::test]
async fn test_oversized_frame_keeps_viewers_connected() {
    init_tracing();
    let host = LiveController::new(config(47718));
    assert_ok!(host.start_host("L1", "M1", "LM1").await);

    let viewer = LiveController::new(config(47718));
    let (tx, mut frames) = mpsc::unbounded_channel();
    viewer.on_frame(move |frame: StreamFrame| {
        let _ = tx.send(frame);
    });
    assert_ok!(viewer.join_viewer("LM1").await);

    // Larger than the default 4 MiB packet limit
    let huge = StreamFrame::video(0, Bytes::from(vec![0u8; 5 * 1024 * 1024]), true);
    assert!(host.push_frame(huge));

    let next = StreamFrame::video(40, Bytes::from_static(&[0x17, 0x01]), true);
    assert!(host.push_frame(next.clone()));
    let received = tokio::time::timeout(WAIT, frames.recv()).await.unwrap().unwrap();
    assert_eq!(received, next);

    assert_eq!(host.registry().peer_count(), 1);
    assert_eq!(viewer.phase(), SessionPhase::Active);
    let stats = host.stats();
    assert_eq!(stats.frames_dropped, 1);
    assert_eq!(stats.frames_forwarded, 1);
    assert_eq!(stats.peers_lost, 0);

    assert_ok!(viewer.leave_viewer("LM1").await);
    assert_ok!(host.stop_host("LM1").await);
}

#[tokio::test]
async fn test_full_host_refuses_viewer() {
    init_tracing();
    let mut host_config = config(47716);
    host_config.transport = host_config.transport.max_viewers(1);
    let host = LiveController::new(host_config);
    assert_ok!(host.start_host("L1", "M1", "LM1").await);

    let (first, _events) = joined_viewer(47716, "LM1").await;

    let second = LiveController::new(config(47716));
    let err = assert_err!(second.join_viewer("LM1").await);
    assert_eq!(err.code(), "CONNECTION_REFUSED");
    assert_eq!(second.phase(), SessionPhase::Idle);

    assert_ok!(first.leave_viewer("LM1").await);
    assert_ok!(host.stop_host("LM1").await);
}

#[tokio::test]
async fn test_stop_and_leave_are_idempotent() {
    init_tracing();
    let controller = LiveController::new(config(47717));

    for _ in 0..3 {
        assert_ok!(controller.stop_host("LM1").await);
        assert_ok!(controller.leave_viewer("LM1").await);
    }
    assert_eq!(controller.phase(), SessionPhase::Idle);
    assert!(controller.registry().journal().is_empty());
}
