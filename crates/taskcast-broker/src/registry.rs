//! Channel registry.
//!
//! One `tokio::sync::Mutex` guards the whole name → channel map. Every entry
//! point holds it for its full duration, sends included, so registry
//! operations are linearized across all channels.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use bytes::Bytes;
use taskcast_core::protocol::{ConsumerSubscribe, Info, PublisherSubscribe, TaskResult};
use taskcast_core::{BrokerError, ConnectionId, TaskId};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::channel::{
    deliver, ChannelBroker, ChannelSnapshot, RemovedMembers, ResultOutcome, SubscribeOutcome,
};
use crate::connection::Connection;

/// Name → channel map behind a single process-wide gate.
pub struct BrokerRegistry {
    channels: Mutex<HashMap<String, ChannelBroker>>,
    sequence: Arc<AtomicU64>,
}

impl Default for BrokerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerRegistry {
    /// Empty registry with a fresh task index sequence.
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a new empty channel.
    #[instrument(skip(self))]
    pub async fn create_channel(&self, name: &str) -> Result<(), BrokerError> {
        let mut channels = self.channels.lock().await;
        if channels.contains_key(name) {
            return Err(BrokerError::ChannelExists(name.to_string()));
        }
        let _ = channels.insert(
            name.to_string(),
            ChannelBroker::with_sequence(name, Arc::clone(&self.sequence)),
        );
        info!(channel = name, channels = channels.len(), "channel created");
        Ok(())
    }

    /// Publish a task on `channel` on behalf of `publisher_id`.
    #[instrument(skip(self, content), fields(bytes = content.len()))]
    pub async fn broadcast_task(
        &self,
        channel: &str,
        publisher_id: &str,
        task_name: &str,
        content: Bytes,
    ) -> Result<TaskId, BrokerError> {
        let mut channels = self.channels.lock().await;
        let broker = channels
            .get_mut(channel)
            .ok_or_else(|| BrokerError::ChannelNotFound(channel.to_string()))?;
        broker.broadcast_task(publisher_id, task_name, content).await
    }

    /// Subscribe `connection` as a consumer.
    ///
    /// An unknown channel is reported to the connection with a
    /// `ChannelNotFound` info frame and returned as an error.
    pub async fn consumer_subscribe(
        &self,
        connection: Arc<dyn Connection>,
        request: &ConsumerSubscribe,
    ) -> Result<SubscribeOutcome, BrokerError> {
        let mut channels = self.channels.lock().await;
        let Some(broker) = channels.get_mut(&request.channel_name) else {
            return reject_unknown_channel(connection.as_ref(), &request.channel_name).await;
        };
        broker
            .consumer_subscribe(connection, &request.consumer_name, request.consumer_priority)
            .await
    }

    /// Subscribe `connection` as a publisher, replaying its buffered results.
    pub async fn publisher_subscribe(
        &self,
        connection: Arc<dyn Connection>,
        request: &PublisherSubscribe,
    ) -> Result<SubscribeOutcome, BrokerError> {
        let mut channels = self.channels.lock().await;
        let Some(broker) = channels.get_mut(&request.channel_name) else {
            return reject_unknown_channel(connection.as_ref(), &request.channel_name).await;
        };
        broker.producer_subscribe(connection, &request.publisher_id).await
    }

    /// Route a consumer's result reported over `connection`.
    pub async fn notify_task_result(
        &self,
        connection: &dyn Connection,
        result: TaskResult,
    ) -> Result<ResultOutcome, BrokerError> {
        let mut channels = self.channels.lock().await;
        let Some(broker) = channels.get_mut(&result.channel_name) else {
            return reject_unknown_channel(connection, &result.channel_name).await;
        };
        broker
            .notify_task_result(&result.task_id, &result.consumer_name, result.content)
            .await
    }

    /// Remove every consumer and publisher bound to `connection_id`.
    #[instrument(skip(self), fields(connection_id = %connection_id))]
    pub async fn disconnect(&self, connection_id: &ConnectionId) -> RemovedMembers {
        let mut channels = self.channels.lock().await;
        let mut total = RemovedMembers::default();
        for broker in channels.values_mut() {
            let removed = broker.remove_connection(connection_id);
            total.consumers += removed.consumers;
            total.publishers += removed.publishers;
        }
        debug!(consumers = total.consumers, publishers = total.publishers, "disconnect processed");
        total
    }

    /// Read-only view of one channel, `None` if it does not exist.
    pub async fn snapshot(&self, name: &str) -> Option<ChannelSnapshot> {
        self.channels.lock().await.get(name).map(ChannelBroker::snapshot)
    }

    /// Number of registered channels.
    pub async fn channel_count(&self) -> usize {
        self.channels.lock().await.len()
    }
}

async fn reject_unknown_channel<T>(connection: &dyn Connection, channel: &str) -> Result<T, BrokerError> {
    warn!(channel, connection_id = %connection.id(), "channel not found");
    deliver(connection, &Info::channel_not_found(channel)).await?;
    Err(BrokerError::ChannelNotFound(channel.to_string()))
}
