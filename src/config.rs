use anyhow::{bail, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub broker: BrokerConfig,
    pub network: NetworkConfig,
    pub audio: AudioConfig,
    pub transport: TransportConfig,
    pub control: ControlConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub device_id: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "edge-audio-node".to_string(),
            device_id: format!("node-{}", uuid::Uuid::new_v4().simple()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub url: String,
    /// Client name announced to the broker; falls back to the device id
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Prefix of every topic the node publishes or subscribes to
    pub base_topic: String,
    pub auto_reconnect: bool,
    pub reconnect_interval_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            client_id: None,
            username: None,
            password: None,
            base_topic: "edge".to_string(),
            auto_reconnect: true,
            reconnect_interval_ms: 5000,
            connect_timeout_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// `host:port` probed to decide whether the network is up.
    /// Derived from the broker URL when unset.
    pub probe_host: Option<String>,
    pub probe_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            probe_host: None,
            probe_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Samples per PCM block
    pub block_size: usize,
    /// Largest block prefix fed to the FFT
    pub fft_size: usize,
    /// Magnitude bins reported per spectral snapshot
    pub spectral_bins: usize,
    pub volume_threshold: f32,
    pub read_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    pub capture_duration_ms: u64,
    pub capture_interval_ms: u64,
    /// Capacity of the queue between the acquisition thread and the control loop
    pub event_queue: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            block_size: 1024,
            fft_size: 512,
            spectral_bins: 10,
            volume_threshold: 0.1,
            read_timeout_ms: 100,
            stop_timeout_ms: 500,
            capture_duration_ms: 500,
            capture_interval_ms: 5000,
            event_queue: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub max_chunk: usize,
    pub max_frames: usize,
    pub inter_frame_delay_ms: u64,
    /// Re-check the link every this many frames
    pub link_check_every: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_chunk: 512,
            max_frames: 50,
            inter_frame_delay_ms: 10,
            link_check_every: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub loop_delay_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { loop_delay_ms: 10 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1".to_string(),
            port: 8088,
        }
    }
}

impl Config {
    /// Load `path` (any extension the `config` crate understands) with
    /// `EDGE_NODE__SECTION__KEY` environment overrides on top.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("EDGE_NODE").separator("__"))
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let base = &self.broker.base_topic;
        if base.is_empty()
            || base
                .chars()
                .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace())
        {
            bail!("broker.base_topic {:?} must be non-empty without '.', '*', '>' or whitespace", base);
        }
        if self.transport.max_chunk == 0 || self.transport.max_frames == 0 {
            bail!("transport.max_chunk and transport.max_frames must be greater than zero");
        }
        if self.transport.link_check_every == 0 {
            bail!("transport.link_check_every must be greater than zero");
        }
        let threshold = self.audio.volume_threshold;
        if !(threshold > 0.0 && threshold < 1.0) {
            bail!("audio.volume_threshold must be in (0, 1), got {}", threshold);
        }
        if self.audio.sample_rate == 0 || self.audio.block_size == 0 {
            bail!("audio.sample_rate and audio.block_size must be greater than zero");
        }
        if self.audio.fft_size < 2 {
            bail!("audio.fft_size must be at least 2");
        }
        if self.audio.capture_interval_ms < self.audio.capture_duration_ms {
            bail!("audio.capture_interval_ms must not be shorter than audio.capture_duration_ms");
        }
        Ok(())
    }

    pub fn client_id(&self) -> String {
        self.broker
            .client_id
            .clone()
            .unwrap_or_else(|| self.service.device_id.clone())
    }

    /// Address probed for network association
    pub fn probe_host(&self) -> String {
        if let Some(host) = &self.network.probe_host {
            return host.clone();
        }
        let without_scheme = self
            .broker
            .url
            .split("://")
            .nth(1)
            .unwrap_or(&self.broker.url);
        let authority = without_scheme
            .rsplit('@')
            .next()
            .unwrap_or(without_scheme)
            .trim_end_matches('/');
        if authority.contains(':') {
            authority.to_string()
        } else {
            format!("{}:4222", authority)
        }
    }
}
