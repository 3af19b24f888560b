use crate::config::BrokerConfig;
use crate::error::NodeError;
use crate::transport::bus::{cause, InboundMessage, MessageBus};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Messaging session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl LinkState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub auto_reconnect: bool,
    pub reconnect_interval: Duration,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self::from(&BrokerConfig::default())
    }
}

impl From<&BrokerConfig> for LinkOptions {
    fn from(cfg: &BrokerConfig) -> Self {
        Self {
            auto_reconnect: cfg.auto_reconnect,
            reconnect_interval: Duration::from_millis(cfg.reconnect_interval_ms),
        }
    }
}

/// Point-in-time view for status queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub state: LinkState,
    pub connect_attempts: u64,
    pub last_error_code: i32,
    pub auto_reconnect: bool,
}

type ConnectionCallback = Box<dyn FnMut(bool) + Send>;
type DisconnectCallback = Box<dyn FnMut(i32) + Send>;

/// Tracks the messaging session and reconnects it at a bounded rate.
///
/// Every publish goes through `publish`, which refuses to send unless the
/// state is `Connected` at that moment.
pub struct LinkStateMachine<B> {
    bus: B,
    state: LinkState,
    options: LinkOptions,
    last_attempt: Option<Instant>,
    connect_attempts: u64,
    last_error_code: i32,
    /// Topics restored after every successful connect
    subscriptions: Vec<String>,
    /// Retained announcement published after every successful connect
    presence: Option<(String, Vec<u8>)>,
    on_connection: Option<ConnectionCallback>,
    on_disconnect: Option<DisconnectCallback>,
}

impl<B: MessageBus> LinkStateMachine<B> {
    pub fn new(bus: B, options: LinkOptions) -> Self {
        Self {
            bus,
            state: LinkState::Disconnected,
            options,
            last_attempt: None,
            connect_attempts: 0,
            last_error_code: cause::OK,
            subscriptions: Vec::new(),
            presence: None,
            on_connection: None,
            on_disconnect: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn status(&self) -> LinkStatus {
        LinkStatus {
            state: self.state,
            connect_attempts: self.connect_attempts,
            last_error_code: self.last_error_code,
            auto_reconnect: self.options.auto_reconnect,
        }
    }

    pub fn last_error_code(&self) -> i32 {
        self.last_error_code
    }

    /// Called with `true` after a successful connect and `false` whenever
    /// the session is lost, fails or is closed
    pub fn set_connection_callback(&mut self, callback: impl FnMut(bool) + Send + 'static) {
        self.on_connection = Some(Box::new(callback));
    }

    /// Called with the transport cause code when a connect fails or the session drops
    pub fn set_disconnect_callback(&mut self, callback: impl FnMut(i32) + Send + 'static) {
        self.on_disconnect = Some(Box::new(callback));
    }

    pub fn set_auto_reconnect(&mut self, enabled: bool, interval: Duration) {
        self.options.auto_reconnect = enabled;
        self.options.reconnect_interval = interval;
        info!(
            "Auto-reconnect {} (interval {:?})",
            if enabled { "enabled" } else { "disabled" },
            interval
        );
    }

    /// Topic to (re)subscribe after every successful connect
    pub fn add_subscription(&mut self, topic: impl Into<String>) {
        let topic = topic.into();
        if !self.subscriptions.contains(&topic) {
            self.subscriptions.push(topic);
        }
    }

    pub fn set_presence(&mut self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.presence = Some((topic.into(), payload.into()));
    }

    fn fire_connection(&mut self, connected: bool) {
        if let Some(callback) = self.on_connection.as_mut() {
            callback(connected);
        }
    }

    fn fire_disconnect(&mut self, code: i32) {
        if let Some(callback) = self.on_disconnect.as_mut() {
            callback(code);
        }
    }

    /// One connect attempt. Returns whether the session is up afterwards.
    pub async fn connect(&mut self) -> bool {
        match self.state {
            LinkState::Connecting => {
                debug!("Connect already in progress");
                return false;
            }
            LinkState::Connected if self.bus.is_session_alive() => return true,
            _ => {}
        }

        self.state = LinkState::Connecting;
        self.last_attempt = Some(Instant::now());
        self.connect_attempts += 1;

        info!("Connecting to broker via {} (attempt {})", self.bus.name(), self.connect_attempts);

        match self.bus.connect().await {
            Ok(()) => {
                self.state = LinkState::Connected;
                self.last_error_code = cause::OK;
                info!("Broker session established");

                let topics = self.subscriptions.clone();
                for topic in &topics {
                    self.subscribe(topic).await;
                }
                if let Some((topic, payload)) = self.presence.clone() {
                    self.publish(&topic, payload, true).await;
                }

                self.fire_connection(true);
                true
            }
            Err(e) => {
                let code = match &e {
                    NodeError::Link { code, .. } => *code,
                    _ => cause::CONNECT_FAILED,
                };
                self.state = LinkState::Failed;
                self.last_error_code = code;
                warn!("Broker connect failed (code {}): {}", code, e);

                self.fire_connection(false);
                self.fire_disconnect(code);
                false
            }
        }
    }

    /// Close the session on request
    pub async fn disconnect(&mut self) {
        self.bus.disconnect().await;
        let was_connected = self.state.is_connected();
        self.state = LinkState::Disconnected;
        info!("Broker session closed");
        if was_connected {
            self.fire_connection(false);
        }
    }

    /// Notice a session the transport has lost. Returns the current state.
    pub fn refresh(&mut self) -> LinkState {
        if self.state == LinkState::Connected && !self.bus.is_session_alive() {
            let code = match self.bus.last_error_code() {
                cause::OK => cause::CONNECTION_LOST,
                code => code,
            };
            self.state = LinkState::Disconnected;
            self.last_error_code = code;
            warn!("Broker session dropped unexpectedly (code {})", code);

            self.fire_connection(false);
            self.fire_disconnect(code);
        }
        self.state
    }

    /// Once per control-loop iteration: detect drops and reconnect when due
    pub async fn service(&mut self) {
        self.refresh();

        if !self.options.auto_reconnect {
            return;
        }
        if matches!(self.state, LinkState::Connecting | LinkState::Connected) {
            return;
        }

        let due = match self.last_attempt {
            None => true,
            Some(at) => at.elapsed() > self.options.reconnect_interval,
        };
        if due {
            self.connect().await;
        }
    }

    /// Publish if and only if the link is `Connected` right now
    pub async fn publish(&mut self, topic: &str, payload: Vec<u8>, retained: bool) -> bool {
        if !self.refresh().is_connected() {
            debug!("Link {}, not publishing to {}", self.state.as_str(), topic);
            return false;
        }

        match self.bus.publish(topic, payload, retained).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Publish to {} failed: {}", topic, e);
                if let NodeError::Link { code, .. } = e {
                    self.last_error_code = code;
                }
                self.refresh();
                false
            }
        }
    }

    pub async fn subscribe(&mut self, topic: &str) -> bool {
        if !self.refresh().is_connected() {
            return false;
        }

        match self.bus.subscribe(topic).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Subscribe to {} failed: {}", topic, e);
                self.refresh();
                false
            }
        }
    }

    pub fn try_next_message(&mut self) -> Option<InboundMessage> {
        self.bus.try_next_message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryBus;

    #[tokio::test]
    async fn service_skips_while_connecting() {
        let (bus, handle) = MemoryBus::new();
        let mut link = LinkStateMachine::new(bus, LinkOptions::default());

        link.state = LinkState::Connecting;
        link.service().await;
        assert_eq!(handle.connect_attempts(), 0);

        assert!(!link.connect().await);
        assert_eq!(handle.connect_attempts(), 0);
        assert_eq!(link.state(), LinkState::Connecting);
    }

    #[tokio::test]
    async fn first_service_connects_immediately() {
        let (bus, handle) = MemoryBus::new();
        let mut link = LinkStateMachine::new(bus, LinkOptions::default());

        assert!(link.last_attempt.is_none());
        link.service().await;
        assert_eq!(handle.connect_attempts(), 1);
        assert!(link.is_connected());
    }
}
