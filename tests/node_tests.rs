// Control loop dispatch over the in-memory bus

use anyhow::Result;
use edge_audio_node::audio::{ChannelSource, PcmBlock};
use edge_audio_node::link::{AlwaysAssociated, LinkState, NetworkAssociation};
use edge_audio_node::node::{LoopExit, NodeContext, ToneOutput};
use edge_audio_node::transport::{MemoryBus, MemoryBusHandle, TransferSummary};
use edge_audio_node::Config;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct RecordingTone(Arc<Mutex<Vec<(u32, u32)>>>);

impl ToneOutput for RecordingTone {
    fn play_tone(&mut self, frequency_hz: u32, duration_ms: u32) -> bool {
        self.0.lock().unwrap().push((frequency_hz, duration_ms));
        true
    }
}

/// Network that can be switched off from the test
#[derive(Clone)]
struct SwitchedNetwork(Arc<Mutex<bool>>);

#[async_trait::async_trait]
impl NetworkAssociation for SwitchedNetwork {
    async fn is_associated(&mut self) -> bool {
        *self.0.lock().unwrap()
    }

    async fn reassociate(&mut self) -> bool {
        *self.0.lock().unwrap()
    }

    fn describe(&self) -> String {
        "switched".to_string()
    }
}

struct Harness<N> {
    node: NodeContext<MemoryBus, N>,
    bus: MemoryBusHandle,
    blocks: crossbeam_channel::Sender<PcmBlock>,
    tone: RecordingTone,
}

fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.service.device_id = "node-test".to_string();
    cfg.broker.base_topic = "edge".to_string();
    cfg.transport.inter_frame_delay_ms = 0;
    cfg.audio.capture_duration_ms = 128;
    cfg.audio.capture_interval_ms = 256;
    cfg.control.loop_delay_ms = 1;
    cfg
}

fn harness_with<N: NetworkAssociation>(network: N) -> Harness<N> {
    let (blocks, source) = ChannelSource::bounded(16, 16000);
    let (bus, handle) = MemoryBus::new();
    let tone = RecordingTone::default();
    let node = NodeContext::new(
        &test_config(),
        Box::new(source),
        bus,
        network,
        Box::new(tone.clone()),
    );
    Harness {
        node,
        bus: handle,
        blocks,
        tone,
    }
}

fn harness() -> Harness<AlwaysAssociated> {
    harness_with(AlwaysAssociated)
}

fn alternating(len: usize, amplitude: i16) -> Vec<i16> {
    (0..len)
        .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
        .collect()
}

impl<N: NetworkAssociation> Harness<N> {
    /// Tick until `done` holds, for at most two seconds
    async fn tick_until(&mut self, done: impl Fn(&MemoryBusHandle) -> bool) -> bool {
        for _ in 0..400 {
            self.node.tick().await;
            if done(&self.bus) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    async fn command(&mut self, text: &str) -> String {
        self.send("edge/command", text).await
    }

    async fn send(&mut self, topic: &str, text: &str) -> String {
        self.bus.clear_published();
        assert!(self.bus.inject(topic, text), "no subscription for {}", topic);
        self.node.tick().await;
        let replies = self.bus.published_under("edge/response");
        assert_eq!(replies.len(), 1, "expected one reply to {:?}", text);
        replies[0].text()
    }
}

#[tokio::test]
async fn test_first_tick_connects_and_announces() {
    let mut h = harness();
    assert_eq!(h.node.tick().await, None);

    assert_eq!(h.node.link().state(), LinkState::Connected);
    assert_eq!(h.bus.subscriptions(), vec!["edge/command", "edge/config/*"]);

    let presence = h.bus.published_under("edge/status");
    assert_eq!(presence.len(), 1);
    assert_eq!(presence[0].text(), "online");
    assert!(presence[0].retained);
}

#[tokio::test]
async fn test_basic_commands() {
    let mut h = harness();
    h.node.tick().await;

    assert_eq!(h.command("ping").await, "pong");
    assert_eq!(h.command(" PING ").await, "pong");
    assert_eq!(h.command("dance").await, "unknown command: dance");

    let status = h.command("status").await;
    assert!(status.contains("device=node-test"), "{}", status);
    assert!(status.contains("link=connected"), "{}", status);
    assert!(status.contains("audio=stopped"), "{}", status);
}

#[tokio::test]
async fn test_config_updates() {
    let mut h = harness();
    h.node.tick().await;
    let settings = h.node.settings();

    let reply = h.send("edge/config/volume_threshold", "1.5").await;
    assert!(reply.starts_with("invalid volume_threshold:"), "{}", reply);
    assert!((settings.volume_threshold() - 0.1).abs() < 1e-6);

    assert_eq!(h.send("edge/config/volume_threshold", "0.25").await, "volume_threshold = 0.250");
    assert!((settings.volume_threshold() - 0.25).abs() < 1e-6);

    assert_eq!(h.send("edge/config/debug", "on").await, "debug = true");
    assert!(settings.debug());

    assert_eq!(h.send("edge/config/play_tone", "440,200").await, "play_tone = 440,200");
    let reply = h.send("edge/config/play_tone", "5,200").await;
    assert!(reply.starts_with("invalid play_tone:"), "{}", reply);
    assert_eq!(*h.tone.0.lock().unwrap(), vec![(440, 200)]);

    // Raising the window past the interval drags the interval along
    assert_eq!(h.send("edge/config/capture_duration_ms", "1000").await, "capture_duration_ms = 1000");
    let schedule = settings.capture_schedule();
    assert_eq!(schedule.duration_ms, 1000);
    assert_eq!(schedule.interval_ms, 1000);

    let reply = h.send("edge/config/capture_interval_ms", "900").await;
    assert!(reply.starts_with("invalid capture_interval_ms:"), "{}", reply);
    assert_eq!(settings.capture_schedule().interval_ms, 1000);
}

#[tokio::test]
async fn test_level_events_published() -> Result<()> {
    let mut h = harness();
    h.node.tick().await;
    assert_eq!(h.command("start_audio").await, "audio started");
    assert!(h.node.pipeline().is_running());
    h.bus.clear_published();

    h.blocks.send(PcmBlock::new(alternating(1024, 16000), 16000))?;
    h.blocks.send(PcmBlock::new(alternating(1024, 16000), 16000))?;

    assert!(h.tick_until(|bus| bus.published_under("edge/audio/volume").len() == 2).await);

    let volume = h.bus.published_under("edge/audio/volume");
    assert_eq!(volume[0].text(), "0.488");

    let frequencies = h.bus.published_under("edge/audio/frequencies");
    assert_eq!(frequencies.len(), 2);
    assert_eq!(frequencies[0].text().split(',').count(), 10);

    // One rising edge for two loud blocks
    let voice = h.bus.published_under("edge/voice/detected");
    assert_eq!(voice.len(), 1);
    assert_eq!(voice[0].text(), "detected");

    assert_eq!(h.command("stop_audio").await, "audio stopped");
    assert!(!h.node.pipeline().is_running());
    Ok(())
}

#[tokio::test]
async fn test_silence_publishes_nothing() -> Result<()> {
    let mut h = harness();
    h.node.tick().await;
    h.command("start_audio").await;
    h.bus.clear_published();

    h.blocks.send(PcmBlock::new(vec![0; 1024], 16000))?;
    for _ in 0..40 {
        h.node.tick().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(h.bus.published_under("edge/audio").is_empty());
    assert!(h.bus.published_under("edge/voice").is_empty());
    Ok(())
}

#[tokio::test]
async fn test_snapshot_transfer() -> Result<()> {
    let mut h = harness();
    h.node.tick().await;
    assert_eq!(h.command("start_audio_data").await, "audio data started");
    h.bus.clear_published();

    // Two 64 ms blocks fill the 128 ms window
    h.blocks.send(PcmBlock::new(vec![3; 1024], 16000))?;
    h.blocks.send(PcmBlock::new(vec![3; 1024], 16000))?;

    assert!(h.tick_until(|bus| !bus.published_under("edge/audio/info").is_empty()).await);

    let info = h.bus.published_under("edge/audio/info");
    let summary: TransferSummary = info[0].text().parse()?;
    assert_eq!(summary.size, 4096);
    assert_eq!(summary.succeeded, 8);
    assert_eq!(summary.attempted, 8);

    let prefix = format!("edge/audio/{}/", summary.key);
    assert_eq!(h.bus.published_under(&prefix).len(), 8);

    let audio_status = h.command("audio_status").await;
    assert!(audio_status.contains("snapshots=true"), "{}", audio_status);
    assert!(audio_status.contains("capture_duration_ms=128"), "{}", audio_status);
    Ok(())
}

#[tokio::test]
async fn test_restart_command_exits_loop() {
    let mut h = harness();
    h.node.tick().await;
    h.bus.clear_published();

    assert!(h.bus.inject("edge/command", "restart"));
    assert_eq!(h.node.tick().await, Some(LoopExit::Restart));
    assert_eq!(h.bus.published_under("edge/response")[0].text(), "restarting");
}

#[tokio::test]
async fn test_run_until_shutdown() {
    let mut h = harness();

    let exit = h
        .node
        .run(tokio::time::sleep(Duration::from_millis(50)))
        .await;
    assert_eq!(exit, LoopExit::Shutdown);

    let presence: Vec<String> = h
        .bus
        .published_under("edge/status")
        .iter()
        .map(|m| m.text())
        .collect();
    assert_eq!(presence, vec!["online", "offline"]);
    assert!(!h.bus.is_alive());
    assert_eq!(h.node.link().state(), LinkState::Disconnected);
}

#[tokio::test]
async fn test_no_messaging_without_network() {
    let switch = Arc::new(Mutex::new(false));
    let mut h = harness_with(SwitchedNetwork(Arc::clone(&switch)));

    h.node.tick().await;
    h.node.tick().await;
    assert_eq!(h.bus.connect_attempts(), 0);

    *switch.lock().unwrap() = true;
    h.node.tick().await;
    assert_eq!(h.bus.connect_attempts(), 1);
    assert!(h.node.link().is_connected());

    let status = h.node.status_receiver().borrow().clone();
    assert!(status.network_associated);
    assert_eq!(status.link.state, LinkState::Connected);
}
