use super::bus::{cause, InboundMessage, MessageBus};
use super::topics::{from_subject, to_subject};
use crate::config::Config;
use crate::error::{NodeError, NodeResult};
use async_nats::connection::State;
use async_nats::{Client, ConnectErrorKind, ConnectOptions};
use futures::stream::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the inbound message queue shared by all subscriptions
const INBOUND_QUEUE: usize = 256;

/// `MessageBus` over a NATS connection
pub struct NatsBus {
    url: String,
    client_name: String,
    credentials: Option<(String, String)>,
    connect_timeout: Duration,
    client: Option<Client>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: mpsc::Receiver<InboundMessage>,
    forwarders: Vec<JoinHandle<()>>,
    last_error: i32,
}

impl NatsBus {
    pub fn new(url: impl Into<String>, client_name: impl Into<String>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        Self {
            url: url.into(),
            client_name: client_name.into(),
            credentials: None,
            connect_timeout: Duration::from_secs(3),
            client: None,
            inbound_tx,
            inbound_rx,
            forwarders: Vec::new(),
            last_error: cause::OK,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        let mut bus = Self::new(cfg.broker.url.clone(), cfg.client_id());
        bus.connect_timeout = Duration::from_millis(cfg.broker.connect_timeout_ms);
        if let (Some(user), Some(pass)) = (&cfg.broker.username, &cfg.broker.password) {
            bus.credentials = Some((user.clone(), pass.clone()));
        }
        bus
    }

    fn drop_session(&mut self) {
        for forwarder in self.forwarders.drain(..) {
            forwarder.abort();
        }
        self.client = None;
    }
}

fn cause_for(kind: ConnectErrorKind) -> i32 {
    match kind {
        ConnectErrorKind::TimedOut => cause::CONNECTION_TIMEOUT,
        ConnectErrorKind::Authentication => cause::BAD_CREDENTIALS,
        ConnectErrorKind::AuthorizationViolation => cause::UNAUTHORIZED,
        _ => cause::CONNECT_FAILED,
    }
}

#[async_trait::async_trait]
impl MessageBus for NatsBus {
    async fn connect(&mut self) -> NodeResult<()> {
        self.drop_session();

        info!("Connecting to NATS at {}", self.url);

        let mut options = ConnectOptions::new()
            .name(self.client_name.clone())
            .connection_timeout(self.connect_timeout);
        if let Some((user, pass)) = &self.credentials {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let result = tokio::time::timeout(self.connect_timeout, options.connect(self.url.as_str())).await;

        match result {
            Ok(Ok(client)) => {
                info!("Connected to NATS successfully");
                self.client = Some(client);
                self.last_error = cause::OK;
                Ok(())
            }
            Ok(Err(e)) => {
                self.last_error = cause_for(e.kind());
                Err(NodeError::link(self.last_error, format!("Failed to connect to NATS: {}", e)))
            }
            Err(_) => {
                self.last_error = cause::CONNECTION_TIMEOUT;
                Err(NodeError::link(
                    self.last_error,
                    format!("NATS connect timed out after {:?}", self.connect_timeout),
                ))
            }
        }
    }

    async fn disconnect(&mut self) {
        info!("Closing NATS connection");
        if let Some(client) = &self.client {
            if let Err(e) = client.flush().await {
                debug!("Flush before disconnect failed: {}", e);
            }
        }
        // async-nats tears the connection down when the last client handle drops
        self.drop_session();
        self.last_error = cause::DISCONNECTED;
    }

    fn is_session_alive(&self) -> bool {
        self.client
            .as_ref()
            .map(|client| client.connection_state() == State::Connected)
            .unwrap_or(false)
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>, retained: bool) -> NodeResult<()> {
        let Some(client) = &self.client else {
            return Err(NodeError::link(cause::DISCONNECTED, "not connected"));
        };

        // Core NATS keeps no retained messages; the flag only shows in logs
        let subject = to_subject(topic);
        let len = payload.len();

        if let Err(e) = client.publish(subject.clone(), payload.into()).await {
            self.last_error = cause::CONNECTION_LOST;
            return Err(NodeError::link(
                self.last_error,
                format!("Failed to publish to {}: {}", subject, e),
            ));
        }

        debug!("Published {} bytes to {} (retained={})", len, subject, retained);
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> NodeResult<()> {
        let Some(client) = &self.client else {
            return Err(NodeError::link(cause::DISCONNECTED, "not connected"));
        };

        let subject = to_subject(topic);
        let mut subscriber = client.subscribe(subject.clone()).await.map_err(|e| {
            NodeError::link(cause::CONNECTION_LOST, format!("Failed to subscribe to {}: {}", subject, e))
        })?;

        info!("Subscribed to {}", subject);

        let tx = self.inbound_tx.clone();
        self.forwarders.push(tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                let inbound = InboundMessage {
                    topic: from_subject(&msg.subject.to_string()),
                    payload: msg.payload.to_vec(),
                };
                if tx.try_send(inbound).is_err() {
                    warn!("Inbound queue full; dropping message on {}", msg.subject);
                }
            }
        }));

        Ok(())
    }

    fn try_next_message(&mut self) -> Option<InboundMessage> {
        self.inbound_rx.try_recv().ok()
    }

    fn last_error_code(&self) -> i32 {
        self.last_error
    }

    fn name(&self) -> &str {
        "nats"
    }
}
