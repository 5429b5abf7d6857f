//! WebSocket transport for broker connections.

pub mod session;

pub use session::run_ws_session;
