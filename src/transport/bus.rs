use crate::error::NodeResult;

/// Cause codes reported with link failures, numbered the way classic
/// pub/sub device clients report their connection state
pub mod cause {
    pub const CONNECTION_TIMEOUT: i32 = -4;
    pub const CONNECTION_LOST: i32 = -3;
    pub const CONNECT_FAILED: i32 = -2;
    pub const DISCONNECTED: i32 = -1;
    pub const OK: i32 = 0;
    pub const BAD_CREDENTIALS: i32 = 4;
    pub const UNAUTHORIZED: i32 = 5;
}

/// Message delivered on one of the subscribed topics
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload as text, with invalid UTF-8 replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Publish/subscribe client the link state machine drives.
///
/// Topics are `/`-separated logical paths; implementations map them onto
/// whatever the underlying broker expects.
#[async_trait::async_trait]
pub trait MessageBus: Send {
    /// Open a session. Failures carry a `cause` code in `NodeError::Link`.
    async fn connect(&mut self) -> NodeResult<()>;

    async fn disconnect(&mut self);

    /// Whether the underlying session is currently up
    fn is_session_alive(&self) -> bool;

    async fn publish(&mut self, topic: &str, payload: Vec<u8>, retained: bool) -> NodeResult<()>;

    async fn subscribe(&mut self, topic: &str) -> NodeResult<()>;

    /// Next queued inbound message, without waiting
    fn try_next_message(&mut self) -> Option<InboundMessage>;

    /// Cause code of the most recent failure, `cause::OK` if none
    fn last_error_code(&self) -> i32;

    fn name(&self) -> &str;
}
