//! # taskcast-core
//!
//! Shared vocabulary of the taskcast broker.
//!
//! - Branded identifiers for tasks and connections
//! - Wire protocol: the `Frame` envelope, typed payload records, info notices
//! - `BrokerError` taxonomy shared by the broker, dispatcher and control plane

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod protocol;

pub use errors::{BrokerError, ConnectionError, ErrorKind};
pub use ids::{ConnectionId, TaskId};
