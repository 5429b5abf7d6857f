//! # taskcast-server
//!
//! Axum HTTP + `WebSocket` front end for the broker.
//!
//! - `GET /ws`: one broker connection per socket, frames dispatched in order
//! - `POST /Channels/Create`, `POST /Channels/{channelName}/CreateTask`:
//!   control plane
//! - `GET /health`: liveness and counters
//! - Drain: stop accepting, close sessions, wait for their registry cleanup

#![deny(unsafe_code)]

pub mod config;
pub mod control;
pub mod health;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::TaskcastServer;
pub use shutdown::{DrainOutcome, ShutdownCoordinator};
