use super::state::AppState;
use crate::node::LocalCommand;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// How long a command may wait for the control loop
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub reply: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /status
/// Node status as of the last control-loop iteration
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.status.borrow().clone();
    (StatusCode::OK, Json(status))
}

/// POST /command
/// Run a command through the control loop and return its reply
pub async fn post_command(
    State(state): State<AppState>,
    Json(req): Json<CommandRequest>,
) -> impl IntoResponse {
    info!("HTTP command: {:?}", req.command);

    let (reply_tx, reply_rx) = oneshot::channel();
    let command = LocalCommand {
        text: req.command,
        reply: reply_tx,
    };

    if state.commands.send(command).await.is_err() {
        warn!("Control loop is not accepting commands");
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "node is shutting down");
    }

    match tokio::time::timeout(COMMAND_TIMEOUT, reply_rx).await {
        Ok(Ok(reply)) => (StatusCode::OK, Json(CommandResponse { reply })).into_response(),
        Ok(Err(_)) => error_response(StatusCode::SERVICE_UNAVAILABLE, "command dropped by the node"),
        Err(_) => error_response(StatusCode::GATEWAY_TIMEOUT, "no reply from the control loop"),
    }
}
