//! Local HTTP control surface
//!
//! - GET /health - Health check
//! - GET /status - Node status as JSON
//! - POST /command - Run a command, `{"command": "ping"}` -> `{"reply": "pong"}`

mod handlers;
mod routes;
mod server;
mod state;

pub use handlers::{CommandRequest, CommandResponse};
pub use routes::create_router;
pub use server::HttpServer;
pub use state::AppState;
