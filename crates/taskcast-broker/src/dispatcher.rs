//! Per-connection frame routing.
//!
//! Each live connection owns one [`ProtocolDispatcher`]. The transport feeds
//! it raw text frames in arrival order; the dispatcher decodes them and calls
//! into the registry. Frames it cannot decode are logged and dropped.

use std::sync::Arc;

use taskcast_core::protocol::{ConsumerSubscribe, Frame, MessageType, PublisherSubscribe, TaskResult};
use taskcast_core::BrokerError;
use tracing::{debug, warn};

use crate::channel::{RemovedMembers, SubscribeOutcome};
use crate::connection::Connection;
use crate::registry::BrokerRegistry;

/// What the dispatcher did with one inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatched {
    /// Routed into the registry, which accepted it.
    Handled(MessageType),
    /// Routed, but refused: unknown channel or a name already taken. The
    /// peer has been sent the matching info frame.
    Rejected(MessageType, BrokerError),
    /// Not a type peers may send; dropped.
    Ignored(MessageType),
    /// Frame or payload did not decode; dropped.
    Malformed,
}

/// Routes one connection's inbound frames into the registry.
pub struct ProtocolDispatcher {
    registry: Arc<BrokerRegistry>,
    connection: Arc<dyn Connection>,
}

impl ProtocolDispatcher {
    /// Bind a dispatcher to `connection`.
    pub fn new(registry: Arc<BrokerRegistry>, connection: Arc<dyn Connection>) -> Self {
        Self { registry, connection }
    }

    /// Decode and route one inbound text frame.
    pub async fn dispatch(&self, text: &str) -> Dispatched {
        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(connection_id = %self.connection.id(), error = %e, "undecodable frame dropped");
                return Dispatched::Malformed;
            }
        };

        let message_type = frame.message_type;
        let routed = match message_type {
            MessageType::ConsumerSubscribe => match frame.payload::<ConsumerSubscribe>() {
                Ok(request) => match self
                    .registry
                    .consumer_subscribe(Arc::clone(&self.connection), &request)
                    .await
                {
                    Ok(SubscribeOutcome::Subscribed) => Ok(()),
                    Ok(SubscribeOutcome::AlreadyExists) => Err(BrokerError::ConsumerExists {
                        channel: request.channel_name,
                        consumer: request.consumer_name,
                    }),
                    Err(e) => Err(e),
                },
                Err(e) => return self.malformed(message_type, &e),
            },
            MessageType::PublisherSubscribe => match frame.payload::<PublisherSubscribe>() {
                Ok(request) => match self
                    .registry
                    .publisher_subscribe(Arc::clone(&self.connection), &request)
                    .await
                {
                    Ok(SubscribeOutcome::Subscribed) => Ok(()),
                    Ok(SubscribeOutcome::AlreadyExists) => Err(BrokerError::PublisherExists {
                        channel: request.channel_name,
                        publisher_id: request.publisher_id,
                    }),
                    Err(e) => Err(e),
                },
                Err(e) => return self.malformed(message_type, &e),
            },
            MessageType::TaskResult => match frame.payload::<TaskResult>() {
                Ok(result) => self
                    .registry
                    .notify_task_result(self.connection.as_ref(), result)
                    .await
                    .map(|_| ()),
                Err(e) => return self.malformed(message_type, &e),
            },
            MessageType::TaskBegin | MessageType::Info | MessageType::Unknown => {
                debug!(connection_id = %self.connection.id(), ?message_type, "frame type ignored");
                return Dispatched::Ignored(message_type);
            }
        };

        match routed {
            Ok(()) => Dispatched::Handled(message_type),
            Err(e) => {
                debug!(
                    connection_id = %self.connection.id(),
                    ?message_type,
                    error = %e,
                    "frame rejected"
                );
                Dispatched::Rejected(message_type, e)
            }
        }
    }

    /// Drop this connection's memberships from every channel.
    pub async fn disconnect(&self) -> RemovedMembers {
        self.registry.disconnect(self.connection.id()).await
    }

    fn malformed(&self, message_type: MessageType, error: &BrokerError) -> Dispatched {
        warn!(
            connection_id = %self.connection.id(),
            ?message_type,
            error = %error,
            "undecodable payload dropped"
        );
        Dispatched::Malformed
    }
}
