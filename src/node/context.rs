use super::commands::{Command, ConfigUpdate};
use super::tone::ToneOutput;
use crate::audio::{AudioPipeline, AudioSnapshot, PipelineOptions, PipelineSettings, SampleSource};
use crate::config::Config;
use crate::link::{LinkOptions, LinkStateMachine, LinkStatus, NetworkAssociation};
use crate::transport::topics::{format_frequencies, format_volume};
use crate::transport::{ChunkedTransport, InboundMessage, MessageBus, Topics, TransportOptions};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Handed from the acquisition thread to the control loop
#[derive(Debug, Clone)]
pub enum AnalysisEvent {
    /// A block above the volume threshold
    Level { loudness: f32, spectrum: Vec<f32> },
    Snapshot(AudioSnapshot),
}

/// Why the control loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Shutdown,
    /// Rebuild the node from configuration and run again
    Restart,
}

/// Command injected by a local control surface (HTTP)
#[derive(Debug)]
pub struct LocalCommand {
    pub text: String,
    pub reply: oneshot::Sender<String>,
}

/// Snapshot of the node, refreshed every control-loop iteration
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub device_id: String,
    pub network_associated: bool,
    pub link: LinkStatus,
    pub audio_running: bool,
    pub snapshots_enabled: bool,
    pub loudness: f32,
    pub volume_threshold: f32,
    pub snapshots_sent: u64,
    pub partial_transfers: u64,
    pub dropped_events: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The node: one of each subsystem, owned here and driven by `run`
pub struct NodeContext<B, N> {
    device_id: String,
    topics: Topics,
    loop_delay: Duration,
    pipeline: AudioPipeline,
    settings: Arc<PipelineSettings>,
    link: LinkStateMachine<B>,
    network: N,
    network_associated: bool,
    transport: ChunkedTransport,
    tone: Box<dyn ToneOutput>,
    events: mpsc::Receiver<AnalysisEvent>,
    dropped_events: Arc<AtomicU64>,
    commands_tx: mpsc::Sender<LocalCommand>,
    commands: mpsc::Receiver<LocalCommand>,
    status: watch::Sender<NodeStatus>,
    voice_active: bool,
    snapshots_sent: u64,
    partial_transfers: u64,
    started_at: DateTime<Utc>,
}

impl<B: MessageBus, N: NetworkAssociation> NodeContext<B, N> {
    pub fn new(
        cfg: &Config,
        source: Box<dyn SampleSource>,
        bus: B,
        network: N,
        tone: Box<dyn ToneOutput>,
    ) -> Self {
        let topics = Topics::new(cfg.broker.base_topic.as_str());
        let settings = Arc::new(PipelineSettings::from(&cfg.audio));
        let dropped_events = Arc::new(AtomicU64::new(0));
        let (events_tx, events) = mpsc::channel(cfg.audio.event_queue.max(1));

        let mut pipeline = AudioPipeline::new(
            source,
            Arc::clone(&settings),
            PipelineOptions::from(&cfg.audio),
        );

        let level_tx = events_tx.clone();
        let level_dropped = Arc::clone(&dropped_events);
        pipeline.set_level_callback(move |loudness, spectrum| {
            let event = AnalysisEvent::Level {
                loudness,
                spectrum: spectrum.to_vec(),
            };
            if level_tx.try_send(event).is_err() {
                level_dropped.fetch_add(1, Ordering::Relaxed);
            }
        });

        let snapshot_dropped = Arc::clone(&dropped_events);
        pipeline.set_snapshot_callback(move |snapshot| {
            if events_tx.try_send(AnalysisEvent::Snapshot(snapshot)).is_err() {
                snapshot_dropped.fetch_add(1, Ordering::Relaxed);
            }
        });

        let mut link = LinkStateMachine::new(bus, LinkOptions::from(&cfg.broker));
        link.add_subscription(topics.command());
        link.add_subscription(topics.config_wildcard());
        link.set_presence(topics.status(), "online");
        link.set_connection_callback(|connected| {
            if connected {
                info!("Link up");
            } else {
                info!("Link down");
            }
        });
        link.set_disconnect_callback(|code| warn!("Link lost (cause {})", code));

        let transport = ChunkedTransport::new(TransportOptions::from(&cfg.transport), topics.clone());
        let (commands_tx, commands) = mpsc::channel(16);

        let started_at = Utc::now();
        let initial = NodeStatus {
            device_id: cfg.service.device_id.clone(),
            network_associated: false,
            link: link.status(),
            audio_running: false,
            snapshots_enabled: false,
            loudness: 0.0,
            volume_threshold: settings.volume_threshold(),
            snapshots_sent: 0,
            partial_transfers: 0,
            dropped_events: 0,
            started_at,
            updated_at: started_at,
        };
        let (status, _) = watch::channel(initial);

        info!(
            "Node {} ready: topics under {}/, bus {}, network {}",
            cfg.service.device_id,
            topics.base(),
            link.bus().name(),
            network.describe()
        );

        Self {
            device_id: cfg.service.device_id.clone(),
            topics,
            loop_delay: Duration::from_millis(cfg.control.loop_delay_ms),
            pipeline,
            settings,
            link,
            network,
            network_associated: false,
            transport,
            tone,
            events,
            dropped_events,
            commands_tx,
            commands,
            status,
            voice_active: false,
            snapshots_sent: 0,
            partial_transfers: 0,
            started_at,
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn settings(&self) -> Arc<PipelineSettings> {
        Arc::clone(&self.settings)
    }

    pub fn link(&self) -> &LinkStateMachine<B> {
        &self.link
    }

    pub fn pipeline(&self) -> &AudioPipeline {
        &self.pipeline
    }

    /// Sender for commands that bypass the message bus
    pub fn command_sender(&self) -> mpsc::Sender<LocalCommand> {
        self.commands_tx.clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<NodeStatus> {
        self.status.subscribe()
    }

    /// Run the control loop until `shutdown` resolves or a restart is requested.
    /// The node is shut down either way.
    pub async fn run<F>(&mut self, shutdown: F) -> LoopExit
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let exit = loop {
            tokio::select! {
                _ = &mut shutdown => break LoopExit::Shutdown,
                _ = tokio::time::sleep(self.loop_delay) => {}
            }

            if let Some(exit) = self.tick().await {
                break exit;
            }
        };

        self.shutdown().await;
        exit
    }

    /// One control-loop iteration, without the leading delay
    pub async fn tick(&mut self) -> Option<LoopExit> {
        let mut exit = None;

        self.network_associated = self.network.is_associated().await;
        if !self.network_associated {
            self.network_associated = self.network.reassociate().await;
        }

        if self.network_associated {
            self.link.service().await;

            while let Some(message) = self.link.try_next_message() {
                if let Some(requested) = self.handle_message(message).await {
                    exit = Some(requested);
                }
            }
        }

        while let Ok(command) = self.commands.try_recv() {
            let (reply, requested) = self.execute(&command.text);
            if command.reply.send(reply).is_err() {
                debug!("Local command {:?} abandoned by its sender", command.text);
            }
            if requested.is_some() {
                exit = requested;
            }
        }

        self.drain_events().await;
        self.publish_status();
        exit
    }

    async fn handle_message(&mut self, message: InboundMessage) -> Option<LoopExit> {
        let text = message.text();

        if message.topic == self.topics.command() {
            debug!("Command: {:?}", text);
            let (reply, exit) = self.execute(&text);
            self.reply(reply).await;
            return exit;
        }

        if let Some(key) = self.topics.parse_config_key(&message.topic) {
            debug!("Config {} = {:?}", key, text);
            let reply = self.apply_config(key, &text);
            self.reply(reply).await;
            return None;
        }

        debug!("Ignoring message on {}", message.topic);
        None
    }

    async fn reply(&mut self, text: String) {
        let topic = self.topics.response();
        self.link.publish(&topic, text.into_bytes(), false).await;
    }

    /// Run one command and return the reply text
    pub fn execute(&mut self, text: &str) -> (String, Option<LoopExit>) {
        match Command::parse(text) {
            Command::Ping => ("pong".to_string(), None),
            Command::Status => (self.status_line(), None),
            Command::StartAudio => {
                self.settings.set_snapshots_enabled(false);
                let reply = if self.pipeline.start() {
                    "audio started"
                } else {
                    "audio start failed"
                };
                (reply.to_string(), None)
            }
            Command::StartAudioData => {
                self.settings.set_snapshots_enabled(true);
                let reply = if self.pipeline.start() {
                    "audio data started"
                } else {
                    self.settings.set_snapshots_enabled(false);
                    "audio start failed"
                };
                (reply.to_string(), None)
            }
            Command::StopAudio => {
                self.pipeline.stop();
                self.settings.set_snapshots_enabled(false);
                self.voice_active = false;
                ("audio stopped".to_string(), None)
            }
            Command::AudioStatus => (self.audio_status_line(), None),
            Command::Restart => {
                info!("Restart requested");
                ("restarting".to_string(), Some(LoopExit::Restart))
            }
            Command::Unknown(command) => {
                warn!("Unknown command: {:?}", command);
                (format!("unknown command: {}", command), None)
            }
        }
    }

    /// Validate and apply one configuration value; returns the reply text
    pub fn apply_config(&mut self, key: &str, value: &str) -> String {
        let update = match ConfigUpdate::parse(key, value, self.settings.capture_schedule()) {
            Ok(update) => update,
            Err(e) => {
                warn!("Rejected config {} = {:?}: {}", key, value, e);
                return e.to_string();
            }
        };

        match update {
            ConfigUpdate::Debug(enabled) => {
                self.settings.set_debug(enabled);
                format!("debug = {}", enabled)
            }
            ConfigUpdate::VolumeThreshold(threshold) => {
                self.settings.set_volume_threshold(threshold);
                format!("volume_threshold = {:.3}", threshold)
            }
            ConfigUpdate::PlayTone {
                frequency_hz,
                duration_ms,
            } => {
                if self.tone.play_tone(frequency_hz, duration_ms) {
                    format!("play_tone = {},{}", frequency_hz, duration_ms)
                } else {
                    "play_tone failed: output device unavailable".to_string()
                }
            }
            ConfigUpdate::CaptureDurationMs(duration) => {
                self.settings.set_capture_duration_ms(duration);
                // Keep the interval at least as long as the window
                let schedule = self.settings.capture_schedule();
                if schedule.interval_ms < duration {
                    self.settings.set_capture_interval_ms(duration);
                }
                format!("capture_duration_ms = {}", duration)
            }
            ConfigUpdate::CaptureIntervalMs(interval) => {
                self.settings.set_capture_interval_ms(interval);
                format!("capture_interval_ms = {}", interval)
            }
        }
    }

    async fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            if !self.network_associated {
                continue;
            }

            match event {
                AnalysisEvent::Level { loudness, spectrum } => {
                    let volume = self.topics.volume();
                    self.link
                        .publish(&volume, format_volume(loudness).into_bytes(), false)
                        .await;

                    if !spectrum.is_empty() {
                        let frequencies = self.topics.frequencies();
                        self.link
                            .publish(&frequencies, format_frequencies(&spectrum).into_bytes(), false)
                            .await;
                    }

                    if !self.voice_active {
                        self.voice_active = true;
                        let topic = self.topics.voice_detected();
                        self.link.publish(&topic, b"detected".to_vec(), false).await;
                    }
                }
                AnalysisEvent::Snapshot(snapshot) => {
                    let report = self
                        .transport
                        .send(&mut self.link, snapshot.timestamp_ms, &snapshot.data)
                        .await;
                    self.snapshots_sent += 1;
                    if !report.summary.is_complete() || report.aborted {
                        self.partial_transfers += 1;
                    }
                }
            }
        }

        if self.voice_active && self.settings.current_loudness() <= self.settings.volume_threshold() {
            self.voice_active = false;
        }
    }

    fn publish_status(&self) {
        let status = NodeStatus {
            device_id: self.device_id.clone(),
            network_associated: self.network_associated,
            link: self.link.status(),
            audio_running: self.pipeline.is_running(),
            snapshots_enabled: self.settings.snapshots_enabled(),
            loudness: self.settings.current_loudness(),
            volume_threshold: self.settings.volume_threshold(),
            snapshots_sent: self.snapshots_sent,
            partial_transfers: self.partial_transfers,
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            started_at: self.started_at,
            updated_at: Utc::now(),
        };
        self.status.send_replace(status);
    }

    fn status_line(&self) -> String {
        let uptime = Utc::now().signed_duration_since(self.started_at);
        format!(
            "device={} network={} link={} audio={} uptime={}s",
            self.device_id,
            if self.network_associated { "up" } else { "down" },
            self.link.state().as_str(),
            if self.pipeline.is_running() { "running" } else { "stopped" },
            uptime.num_seconds()
        )
    }

    fn audio_status_line(&self) -> String {
        let schedule = self.settings.capture_schedule();
        format!(
            "running={} loudness={:.3} threshold={:.3} snapshots={} capture_duration_ms={} capture_interval_ms={}",
            self.pipeline.is_running(),
            self.settings.current_loudness(),
            self.settings.volume_threshold(),
            self.settings.snapshots_enabled(),
            schedule.duration_ms,
            schedule.interval_ms
        )
    }

    /// Stop acquisition, announce `offline` and close the session
    pub async fn shutdown(&mut self) {
        info!("Shutting down node {}", self.device_id);
        self.pipeline.stop();
        self.settings.set_snapshots_enabled(false);

        if self.link.is_connected() {
            let topic = self.topics.status();
            self.link.publish(&topic, b"offline".to_vec(), true).await;
        }
        self.link.disconnect().await;
        self.publish_status();
    }
}
