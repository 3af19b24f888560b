use crate::node::{LocalCommand, NodeStatus};
use tokio::sync::{mpsc, watch};

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Latest status published by the control loop
    pub status: watch::Receiver<NodeStatus>,

    /// Commands forwarded into the control loop
    pub commands: mpsc::Sender<LocalCommand>,
}

impl AppState {
    pub fn new(status: watch::Receiver<NodeStatus>, commands: mpsc::Sender<LocalCommand>) -> Self {
        Self { status, commands }
    }
}
