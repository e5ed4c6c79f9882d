//! Host and viewer in one process
//!
//! Run with: cargo run --example host_viewer [LIVE_MATCH_ID]
//!
//! Starts a host session, joins it from a second controller over loopback,
//! pushes a few frames and score events, then tears both down. Run it on two
//! machines of the same network by splitting the halves; the default
//! discovery target is the broadcast address.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Map, Value};

use locallive_rs::pipeline::ChannelCapture;
use locallive_rs::lifecycle::NoopPlatform;
use locallive_rs::{ControlEvent, ControllerConfig, LiveController, StreamFrame, TransportConfig};

const DISCOVERY_PORT: u16 = 47474;

fn print_usage() {
    println!("Usage: host_viewer [LIVE_MATCH_ID]");
    println!();
    println!("Starts a host for LIVE_MATCH_ID (default LM1) and joins it as a viewer.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }
    let live_match_id = args.get(1).cloned().unwrap_or_else(|| "LM1".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("locallive_rs=debug".parse()?)
                .add_directive("host_viewer=debug".parse()?),
        )
        .init();

    let transport = TransportConfig::default()
        .bind("127.0.0.1:0".parse()?)
        .discovery_target(SocketAddr::from(([127, 0, 0, 1], DISCOVERY_PORT)));

    // Host: frames come from a channel-fed capture source
    let (capture, feed) = ChannelCapture::new(8);
    let host = LiveController::with_parts(
        ControllerConfig::with_transport(transport.clone()),
        Arc::new(NoopPlatform),
        Box::new(capture),
    );
    host.start_host("L1", "M1", live_match_id.clone()).await?;

    // Viewer
    let viewer = LiveController::new(ControllerConfig::with_transport(transport));
    let frames_seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&frames_seen);
    viewer.on_frame(move |frame: StreamFrame| {
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(timestamp = frame.timestamp, len = frame.len(), "Frame received");
    });
    viewer.on_event(|event| {
        tracing::info!(event_type = ?event.event_type(), payload = ?event.payload, "Event received");
    });

    let mut notices = viewer.subscribe();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            if let ControlEvent::SessionFailed { error, .. } = notice {
                tracing::warn!(code = error.code(), error = %error, "Viewer session failed");
            }
        }
    });

    viewer.join_viewer(live_match_id.clone()).await?;

    for n in 0..30u32 {
        feed.push(StreamFrame::video(n * 33, Bytes::from(vec![0u8; 1024]), n % 15 == 0));
        if n % 10 == 0 {
            let mut payload = Map::new();
            payload.insert("type".into(), Value::from("score"));
            payload.insert("home".into(), json!(n / 10));
            payload.insert("away".into(), json!(0));
            host.send_event(live_match_id.clone(), payload)?;
        }
        tokio::time::sleep(Duration::from_millis(33)).await;
    }

    let mut goal = Map::new();
    goal.insert("type".into(), json!("goal"));
    host.send_event(live_match_id.clone(), goal)?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let host_stats = host.stats();
    let viewer_stats = viewer.stats();
    tracing::info!(
        forwarded = host_stats.frames_forwarded,
        dropped = host_stats.frames_dropped,
        drop_ratio = host_stats.frame_drop_ratio(),
        events = host_stats.events_published,
        "Host stats"
    );
    tracing::info!(
        frames = frames_seen.load(Ordering::Relaxed),
        received = viewer_stats.frames_received,
        rendered = viewer_stats.frames_rendered,
        events = viewer_stats.events_delivered,
        "Viewer stats"
    );

    viewer.leave_viewer(&live_match_id).await?;
    host.stop_host(&live_match_id).await?;

    Ok(())
}
