//! # PrixAgent Gateway
//!
//! HTTP and websocket boundary of the PrixAgent conversation orchestrator.
//!
//! - `GET /ws?token=...`: dashboard event socket, scoped to the token's account
//! - `POST /webhooks/twilio/inbound`, `POST /webhooks/twilio/status`: Twilio
//!   voice webhooks
//! - `GET /media-stream`: Twilio Media Streams socket for bridged calls
//! - `/api/...`: bearer-authenticated conversation and call API
//! - `GET /health`
//!
//! [`Gateway::build`] wires the configured call store, provider clients and
//! orchestrator together; [`create_router`] exposes them over axum.

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod store;
pub mod tasks;

pub use app::Gateway;
pub use auth::{Authenticated, JwtConfig, JwtVerifier};
pub use config::{GatewayConfig, OutboundDialer};
pub use error::{ApiError, ApiResult, GatewayError};
pub use logging::{setup_logging, LoggingConfig};
pub use routes::create_router;
pub use state::AppState;
pub use store::SqliteCallStore;
