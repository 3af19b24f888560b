// Chunked transfer over the in-memory bus
//
// These tests verify frame sizing, the completion summary and how a
// transfer degrades when the link drops part way through.

use anyhow::Result;
use edge_audio_node::link::{LinkOptions, LinkState, LinkStateMachine};
use edge_audio_node::transport::{
    ChunkPlan, ChunkedTransport, MemoryBus, MemoryBusHandle, Topics, TransferSummary,
    TransportOptions,
};
use std::time::Duration;

fn transport() -> ChunkedTransport {
    let options = TransportOptions {
        max_chunk: 512,
        max_frames: 50,
        inter_frame_delay: Duration::ZERO,
        link_check_every: 10,
    };
    ChunkedTransport::new(options, Topics::new("edge"))
}

async fn connected_link() -> (LinkStateMachine<MemoryBus>, MemoryBusHandle) {
    let (bus, handle) = MemoryBus::new();
    let mut link = LinkStateMachine::new(bus, LinkOptions::default());
    assert!(link.connect().await);
    (link, handle)
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn test_chunk_plan_sizes() {
    let plan = ChunkPlan::new(2000, 512, 50);
    assert_eq!(plan.frame_count, 4);
    assert!(!plan.is_truncated());
    assert_eq!(plan.frame_range(0), 0..512);
    assert_eq!(plan.frame_range(3), 1536..2000);
    assert_eq!(plan.frame_range(3).len(), 2000 % 512);

    let exact = ChunkPlan::new(1024, 512, 50);
    assert_eq!(exact.frame_count, 2);
    assert_eq!(exact.frame_range(1).len(), 512);

    let empty = ChunkPlan::new(0, 512, 50);
    assert_eq!(empty.frame_count, 0);
}

#[test]
fn test_chunk_plan_caps_frames() {
    let plan = ChunkPlan::new(512 * 60 + 7, 512, 50);
    assert_eq!(plan.frame_count, 50);
    assert!(plan.is_truncated());
    assert_eq!(plan.sendable_len, 512 * 50);
    assert_eq!(plan.frame_range(49), 512 * 49..512 * 50);
}

#[test]
fn test_summary_format() -> Result<()> {
    let summary = TransferSummary {
        key: 1234,
        size: 2000,
        succeeded: 2,
        attempted: 4,
    };
    assert_eq!(summary.to_string(), "1234:2000:2:4");
    assert!(!summary.is_complete());

    let parsed: TransferSummary = "1234:2000:2:4".parse()?;
    assert_eq!(parsed, summary);

    assert!("1234:2000:5:4".parse::<TransferSummary>().is_err());
    assert!("1234:2000:4".parse::<TransferSummary>().is_err());
    assert!("1234:2000:4:4:1".parse::<TransferSummary>().is_err());
    assert!("x:2000:4:4".parse::<TransferSummary>().is_err());
    Ok(())
}

#[tokio::test]
async fn test_transfer_while_connected() {
    let (mut link, handle) = connected_link().await;
    handle.clear_published();

    let data = payload(2000);
    let report = transport().send(&mut link, 1234, &data).await;

    assert_eq!(report.summary.to_string(), "1234:2000:4:4");
    assert!(report.summary_published);
    assert!(!report.truncated);
    assert!(!report.aborted);

    let frames = handle.published_under("edge/audio/1234/");
    let topics: Vec<&str> = frames.iter().map(|m| m.topic.as_str()).collect();
    assert_eq!(
        topics,
        vec![
            "edge/audio/1234/0",
            "edge/audio/1234/1",
            "edge/audio/1234/2",
            "edge/audio/1234/3"
        ]
    );
    assert_eq!(frames[3].payload.len(), 464);

    let rebuilt: Vec<u8> = frames.iter().flat_map(|m| m.payload.clone()).collect();
    assert_eq!(rebuilt, data);

    let published = handle.published();
    let last = published.last().expect("summary published");
    assert_eq!(last.topic, "edge/audio/info");
    assert_eq!(last.text(), "1234:2000:4:4");
}

#[tokio::test]
async fn test_link_drop_mid_transfer() {
    let (mut link, handle) = connected_link().await;
    handle.clear_published();
    handle.drop_after_publishes(2);

    let report = transport().send(&mut link, 1234, &payload(2000)).await;

    assert_eq!(report.summary.to_string(), "1234:2000:2:4");
    let frames = handle.published_under("edge/audio/1234/");
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].topic, "edge/audio/1234/1");

    // The summary could not go out either
    assert!(!report.summary_published);
    assert!(handle.published_under("edge/audio/info").is_empty());
    assert_eq!(link.state(), LinkState::Disconnected);
}

#[tokio::test]
async fn test_link_down_before_transfer() {
    let (bus, handle) = MemoryBus::new();
    let mut link = LinkStateMachine::new(bus, LinkOptions::default());

    let report = transport().send(&mut link, 99, &payload(2000)).await;

    assert_eq!(report.summary.to_string(), "99:2000:0:0");
    assert!(report.aborted);
    assert!(!report.summary_published);
    assert!(handle.published().is_empty());
}

#[tokio::test]
async fn test_periodic_link_check_abandons_rest() {
    let (mut link, handle) = connected_link().await;
    handle.clear_published();
    handle.drop_after_publishes(12);

    let report = transport().send(&mut link, 7, &payload(512 * 25)).await;

    // Frames 12..19 are attempted and fail; the check before frame 20 stops the loop
    assert_eq!(report.summary.to_string(), "7:12800:12:20");
    assert!(report.aborted);
    assert_eq!(handle.published_under("edge/audio/7/").len(), 12);
}

#[tokio::test]
async fn test_oversized_payload_is_truncated() {
    let (mut link, handle) = connected_link().await;
    handle.clear_published();

    let report = transport().send(&mut link, 5, &payload(512 * 60)).await;

    assert!(report.truncated);
    assert_eq!(report.summary.to_string(), "5:30720:50:50");
    assert_eq!(handle.published_under("edge/audio/5/").len(), 50);
}

#[tokio::test(start_paused = true)]
async fn test_inter_frame_delay() {
    let (mut link, _handle) = connected_link().await;
    let options = TransportOptions {
        inter_frame_delay: Duration::from_millis(10),
        ..TransportOptions::default()
    };
    let transport = ChunkedTransport::new(options, Topics::new("edge"));

    let started = tokio::time::Instant::now();
    let report = transport.send(&mut link, 1, &payload(2000)).await;

    assert!(report.summary.is_complete());
    // Three gaps between four frames
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(30), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(40), "elapsed {:?}", elapsed);
}
