//! # taskcast-broker
//!
//! The broker proper: named channels that fan tasks out to consumers and
//! route completion results back to the publisher that created them.
//!
//! - [`connection`]: the peer link abstraction and its mpsc-backed client
//! - [`channel`]: per-channel state (consumers, publishers, pending tasks,
//!   buffered results)
//! - [`registry`]: channel map behind a single process-wide gate
//! - [`dispatcher`]: per-connection frame routing into the registry

#![deny(unsafe_code)]

pub mod channel;
pub mod connection;
pub mod dispatcher;
pub mod registry;

pub use channel::{
    ChannelBroker, ChannelSnapshot, ConsumerInfo, RemovedMembers, ResultOutcome, SubscribeOutcome,
};
pub use connection::{ClientConnection, Connection};
pub use dispatcher::{Dispatched, ProtocolDispatcher};
pub use registry::BrokerRegistry;
