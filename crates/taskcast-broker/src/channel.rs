//! Per-channel broker state.
//!
//! A channel owns its consumer set, publisher set, the list of tasks that
//! were broadcast but not yet answered, and the results held back for
//! publishers that were offline when their task completed.
//!
//! Delivery is at-least-once. Every consumer subscription replays the whole
//! pending list to every consumer, so consumers see duplicates and must
//! tolerate them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use taskcast_core::protocol::{Frame, Info, Payload, TaskBegin, TaskResult};
use taskcast_core::{BrokerError, ConnectionId, TaskId};
use tracing::{debug, info, warn};

use crate::connection::Connection;

struct Consumer {
    connection: Arc<dyn Connection>,
    name: String,
    /// Stored for callers; delivery order never consults it.
    priority: i32,
}

struct Publisher {
    connection: Arc<dyn Connection>,
    publisher_id: String,
}

/// A task broadcast to consumers and not yet answered.
#[derive(Clone, Debug)]
struct EnqueuedTask {
    index: u64,
    publisher_id: String,
    task: TaskBegin,
}

/// A completed result waiting for its publisher to come back.
#[derive(Clone, Debug)]
struct EnqueuedTaskResult {
    index: u64,
    publisher_id: String,
    result: TaskResult,
}

/// Result of a subscribe attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Registered and confirmed.
    Subscribed,
    /// Name or id already taken in this channel; nothing changed.
    AlreadyExists,
}

/// What happened to a reported task result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultOutcome {
    /// Sent to the live publisher; the pending task is gone.
    Delivered,
    /// Publisher offline; result held for its reconnect.
    Buffered,
    /// Publisher offline and a result for this task is already held.
    AlreadyBuffered,
    /// No pending task with this id.
    UnknownTask,
}

/// Members dropped by a disconnect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RemovedMembers {
    /// Consumers dropped.
    pub consumers: usize,
    /// Publishers dropped.
    pub publishers: usize,
}

impl RemovedMembers {
    /// Nothing was bound to the connection.
    pub fn is_empty(&self) -> bool {
        self.consumers == 0 && self.publishers == 0
    }
}

/// Consumer as seen from outside the channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerInfo {
    /// Name given at subscribe.
    pub name: String,
    /// Priority given at subscribe.
    pub priority: i32,
    /// Link the consumer subscribed over.
    pub connection_id: ConnectionId,
}

/// Read-only view of a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSnapshot {
    /// Channel name.
    pub name: String,
    /// In subscription order.
    pub consumers: Vec<ConsumerInfo>,
    /// In subscription order.
    pub publishers: Vec<String>,
    /// `(index, task id)` in ascending index order.
    pub pending: Vec<(u64, TaskId)>,
    /// `(index, task id)` in ascending index order.
    pub buffered: Vec<(u64, TaskId)>,
}

/// State machine for one named channel.
pub struct ChannelBroker {
    name: String,
    consumers: Vec<Consumer>,
    publishers: Vec<Publisher>,
    pending: Vec<EnqueuedTask>,
    buffered_results: Vec<EnqueuedTaskResult>,
    sequence: Arc<AtomicU64>,
}

impl ChannelBroker {
    #[cfg(test)]
    fn new(name: impl Into<String>) -> Self {
        Self::with_sequence(name, Arc::new(AtomicU64::new(0)))
    }

    /// Create a channel drawing task indices from a shared sequence.
    pub fn with_sequence(name: impl Into<String>, sequence: Arc<AtomicU64>) -> Self {
        Self {
            name: name.into(),
            consumers: Vec::new(),
            publishers: Vec::new(),
            pending: Vec::new(),
            buffered_results: Vec::new(),
            sequence,
        }
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fan a new task out to every consumer and remember it as pending.
    ///
    /// Fails with `PublisherNotFound` without touching any state when
    /// `publisher_id` has not subscribed to this channel.
    pub async fn broadcast_task(
        &mut self,
        publisher_id: &str,
        task_name: &str,
        content: Bytes,
    ) -> Result<TaskId, BrokerError> {
        if !self.has_publisher(publisher_id) {
            return Err(BrokerError::PublisherNotFound {
                channel: self.name.clone(),
                publisher_id: publisher_id.to_string(),
            });
        }

        let task = TaskBegin {
            channel_name: self.name.clone(),
            task_id: TaskId::new(),
            task_name: task_name.to_string(),
            content,
        };

        let mut delivered = 0usize;
        for consumer in &self.consumers {
            if try_deliver(consumer.connection.as_ref(), &task).await? {
                delivered += 1;
            }
        }

        let index = self.sequence.fetch_add(1, Ordering::SeqCst);
        let task_id = task.task_id.clone();
        self.pending.push(EnqueuedTask {
            index,
            publisher_id: publisher_id.to_string(),
            task,
        });

        counter!("tasks_broadcast_total").increment(1);
        debug!(
            channel = %self.name,
            publisher_id,
            task_id = %task_id,
            index,
            consumers = self.consumers.len(),
            delivered,
            "task broadcast"
        );
        Ok(task_id)
    }

    /// Register a consumer, confirm it, then replay every pending task to
    /// every consumer.
    pub async fn consumer_subscribe(
        &mut self,
        connection: Arc<dyn Connection>,
        name: &str,
        priority: i32,
    ) -> Result<SubscribeOutcome, BrokerError> {
        if self.consumers.iter().any(|c| c.name == name) {
            debug!(channel = %self.name, consumer = name, "consumer name taken");
            deliver(connection.as_ref(), &Info::consumer_already_exists(&self.name, name)).await?;
            return Ok(SubscribeOutcome::AlreadyExists);
        }

        self.consumers.push(Consumer {
            connection: Arc::clone(&connection),
            name: name.to_string(),
            priority,
        });
        info!(
            channel = %self.name,
            consumer = name,
            priority,
            connection_id = %connection.id(),
            consumers = self.consumers.len(),
            "consumer subscribed"
        );

        deliver(connection.as_ref(), &Info::consumer_subscribed(&self.name, name)).await?;
        self.replay_pending().await?;
        Ok(SubscribeOutcome::Subscribed)
    }

    /// Register a publisher. Results buffered while it was away are delivered
    /// first, oldest index first.
    pub async fn producer_subscribe(
        &mut self,
        connection: Arc<dyn Connection>,
        publisher_id: &str,
    ) -> Result<SubscribeOutcome, BrokerError> {
        if self.has_publisher(publisher_id) {
            debug!(channel = %self.name, publisher_id, "publisher id taken");
            deliver(connection.as_ref(), &Info::publisher_already_exists(&self.name, publisher_id)).await?;
            return Ok(SubscribeOutcome::AlreadyExists);
        }

        if self.buffered_results.iter().any(|r| r.publisher_id == publisher_id) {
            self.replay_results(connection.as_ref(), publisher_id).await?;
        }

        self.publishers.push(Publisher {
            connection: Arc::clone(&connection),
            publisher_id: publisher_id.to_string(),
        });
        info!(
            channel = %self.name,
            publisher_id,
            connection_id = %connection.id(),
            publishers = self.publishers.len(),
            "publisher subscribed"
        );

        deliver(connection.as_ref(), &Info::publisher_subscribed(&self.name, publisher_id)).await?;
        Ok(SubscribeOutcome::Subscribed)
    }

    /// Route a consumer's result for `task_id` to the task's publisher, or
    /// hold it if the publisher is offline.
    pub async fn notify_task_result(
        &mut self,
        task_id: &TaskId,
        consumer_name: &str,
        content: Bytes,
    ) -> Result<ResultOutcome, BrokerError> {
        let Some(task) = self.pending.iter().find(|t| &t.task.task_id == task_id) else {
            debug!(channel = %self.name, task_id = %task_id, "result for unknown task ignored");
            return Ok(ResultOutcome::UnknownTask);
        };
        let index = task.index;
        let publisher_id = task.publisher_id.clone();

        let result = TaskResult {
            task_id: task_id.clone(),
            channel_name: self.name.clone(),
            consumer_name: consumer_name.to_string(),
            content,
        };

        if let Some(publisher) = self.publishers.iter().find(|p| p.publisher_id == publisher_id) {
            if try_deliver(publisher.connection.as_ref(), &result).await? {
                self.pending.retain(|t| &t.task.task_id != task_id);
                counter!("task_results_total", "outcome" => "delivered").increment(1);
                debug!(
                    channel = %self.name,
                    task_id = %task_id,
                    publisher_id = %publisher_id,
                    consumer = consumer_name,
                    "result delivered"
                );
                return Ok(ResultOutcome::Delivered);
            }
        }

        if self.buffered_results.iter().any(|r| &r.result.task_id == task_id) {
            return Ok(ResultOutcome::AlreadyBuffered);
        }

        self.buffered_results.push(EnqueuedTaskResult {
            index,
            publisher_id: publisher_id.clone(),
            result,
        });
        counter!("task_results_total", "outcome" => "buffered").increment(1);
        info!(
            channel = %self.name,
            task_id = %task_id,
            publisher_id = %publisher_id,
            buffered = self.buffered_results.len(),
            "publisher offline, result buffered"
        );
        Ok(ResultOutcome::Buffered)
    }

    /// Drop every consumer and publisher registered through `connection_id`.
    ///
    /// Pending tasks and buffered results are untouched.
    pub fn remove_connection(&mut self, connection_id: &ConnectionId) -> RemovedMembers {
        let consumers_before = self.consumers.len();
        let publishers_before = self.publishers.len();
        self.consumers.retain(|c| c.connection.id() != connection_id);
        self.publishers.retain(|p| p.connection.id() != connection_id);

        let removed = RemovedMembers {
            consumers: consumers_before - self.consumers.len(),
            publishers: publishers_before - self.publishers.len(),
        };
        if !removed.is_empty() {
            info!(
                channel = %self.name,
                connection_id = %connection_id,
                consumers = removed.consumers,
                publishers = removed.publishers,
                "members removed on disconnect"
            );
        }
        removed
    }

    /// Members, pending tasks and buffered results as they stand now.
    pub fn snapshot(&self) -> ChannelSnapshot {
        let mut pending: Vec<(u64, TaskId)> =
            self.pending.iter().map(|t| (t.index, t.task.task_id.clone())).collect();
        pending.sort_by_key(|(index, _)| *index);
        let mut buffered: Vec<(u64, TaskId)> = self
            .buffered_results
            .iter()
            .map(|r| (r.index, r.result.task_id.clone()))
            .collect();
        buffered.sort_by_key(|(index, _)| *index);

        ChannelSnapshot {
            name: self.name.clone(),
            consumers: self
                .consumers
                .iter()
                .map(|c| ConsumerInfo {
                    name: c.name.clone(),
                    priority: c.priority,
                    connection_id: c.connection.id().clone(),
                })
                .collect(),
            publishers: self.publishers.iter().map(|p| p.publisher_id.clone()).collect(),
            pending,
            buffered,
        }
    }

    fn has_publisher(&self, publisher_id: &str) -> bool {
        self.publishers.iter().any(|p| p.publisher_id == publisher_id)
    }

    /// Re-send every pending task, ascending index, to every consumer.
    async fn replay_pending(&self) -> Result<(), BrokerError> {
        let mut ordered: Vec<&EnqueuedTask> = self.pending.iter().collect();
        ordered.sort_by_key(|t| t.index);

        for task in ordered {
            for consumer in &self.consumers {
                deliver(consumer.connection.as_ref(), &task.task).await?;
            }
        }
        Ok(())
    }

    /// Deliver and clear every buffered result owned by `publisher_id`.
    async fn replay_results(
        &mut self,
        connection: &dyn Connection,
        publisher_id: &str,
    ) -> Result<(), BrokerError> {
        let (mut due, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.buffered_results)
            .into_iter()
            .partition(|r| r.publisher_id == publisher_id);
        self.buffered_results = rest;
        due.sort_by_key(|r| r.index);

        info!(channel = %self.name, publisher_id, results = due.len(), "replaying buffered results");
        for entry in due {
            deliver(connection, &entry.result).await?;
            self.pending.retain(|t| t.task.task_id != entry.result.task_id);
        }
        Ok(())
    }
}

/// Encode `payload` for `connection` and hand it over.
///
/// Returns `Ok(false)` when the link is already gone; that is logged and
/// counted in `frames_undelivered_total`. Only encoding failures are errors.
async fn try_deliver<P: Payload>(connection: &dyn Connection, payload: &P) -> Result<bool, BrokerError> {
    let text = Frame::outbound(connection.id(), payload)?.encode()?;
    match connection.send(Arc::from(text)).await {
        Ok(()) => Ok(true),
        Err(e) => {
            counter!("frames_undelivered_total", "type" => format!("{:?}", P::TYPE)).increment(1);
            warn!(connection_id = %connection.id(), error = %e, "frame not delivered");
            Ok(false)
        }
    }
}

/// [`try_deliver`] for frames whose delivery nobody waits on.
pub(crate) async fn deliver<P: Payload>(connection: &dyn Connection, payload: &P) -> Result<(), BrokerError> {
    if !try_deliver(connection, payload).await? {
        debug!(connection_id = %connection.id(), frame = ?P::TYPE, "best-effort frame dropped");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ClientConnection;
    use taskcast_core::protocol::{InfoType, MessageType};
    use tokio::sync::mpsc;

    fn peer(id: &str) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(64);
        (Arc::new(ClientConnection::new(ConnectionId::from_raw(id), tx)), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<str>>) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(text) = rx.try_recv() {
            frames.push(Frame::decode(&text).unwrap());
        }
        frames
    }

    fn task_begins(frames: &[Frame]) -> Vec<TaskBegin> {
        frames
            .iter()
            .filter(|f| f.message_type == MessageType::TaskBegin)
            .map(|f| f.payload().unwrap())
            .collect()
    }

    fn task_results(frames: &[Frame]) -> Vec<TaskResult> {
        frames
            .iter()
            .filter(|f| f.message_type == MessageType::TaskResult)
            .map(|f| f.payload().unwrap())
            .collect()
    }

    fn info_types(frames: &[Frame]) -> Vec<InfoType> {
        frames
            .iter()
            .filter(|f| f.message_type == MessageType::Info)
            .map(|f| f.payload::<Info>().unwrap().info_type)
            .collect()
    }

    #[tokio::test]
    async fn broadcast_requires_known_publisher() {
        let mut channel = ChannelBroker::new("jobs");
        let (consumer, mut consumer_rx) = peer("conn_c1");
        let _ = channel.consumer_subscribe(consumer, "c1", 0).await.unwrap();
        let _ = drain(&mut consumer_rx);

        let err = channel
            .broadcast_task("ghost", "build", Bytes::from_static(&[1]))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::PublisherNotFound { .. }));
        assert!(channel.snapshot().pending.is_empty());
        assert!(drain(&mut consumer_rx).is_empty());
    }

    #[tokio::test]
    async fn broadcast_fans_out_in_subscription_order() {
        let mut channel = ChannelBroker::new("jobs");
        let (publisher, _publisher_rx) = peer("conn_p1");
        let (c1, mut c1_rx) = peer("conn_c1");
        let (c2, mut c2_rx) = peer("conn_c2");
        let _ = channel.producer_subscribe(publisher, "p1").await.unwrap();
        let _ = channel.consumer_subscribe(c1, "c1", 0).await.unwrap();
        let _ = channel.consumer_subscribe(c2, "c2", 5).await.unwrap();
        let _ = drain(&mut c1_rx);
        let _ = drain(&mut c2_rx);

        let task_id = channel
            .broadcast_task("p1", "build", Bytes::from_static(&[0x01]))
            .await
            .unwrap();

        for rx in [&mut c1_rx, &mut c2_rx] {
            let begins = task_begins(&drain(rx));
            assert_eq!(begins.len(), 1);
            assert_eq!(begins[0].task_id, task_id);
            assert_eq!(begins[0].task_name, "build");
            assert_eq!(begins[0].channel_name, "jobs");
            assert_eq!(begins[0].content.as_ref(), &[0x01]);
        }
        let snapshot = channel.snapshot();
        assert_eq!(snapshot.pending.len(), 1);
        assert_eq!(snapshot.pending[0].1, task_id);
        let names: Vec<_> = snapshot.consumers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["c1", "c2"]);
        assert_eq!(snapshot.consumers[1].priority, 5);
    }

    #[tokio::test]
    async fn broadcast_survives_dead_consumer() {
        let mut channel = ChannelBroker::new("jobs");
        let (publisher, _publisher_rx) = peer("conn_p1");
        let (dead, dead_rx) = peer("conn_dead");
        let (alive, mut alive_rx) = peer("conn_alive");
        let _ = channel.producer_subscribe(publisher, "p1").await.unwrap();
        let _ = channel.consumer_subscribe(dead, "dead", 0).await.unwrap();
        let _ = channel.consumer_subscribe(alive, "alive", 0).await.unwrap();
        drop(dead_rx);
        let _ = drain(&mut alive_rx);

        let task_id = channel.broadcast_task("p1", "build", Bytes::new()).await.unwrap();
        let begins = task_begins(&drain(&mut alive_rx));
        assert_eq!(begins.len(), 1);
        assert_eq!(begins[0].task_id, task_id);
        assert_eq!(channel.snapshot().pending.len(), 1);
    }

    #[tokio::test]
    async fn indices_strictly_increase() {
        let mut channel = ChannelBroker::new("jobs");
        let (publisher, _rx) = peer("conn_p1");
        let _ = channel.producer_subscribe(publisher, "p1").await.unwrap();
        for _ in 0..5 {
            let _ = channel.broadcast_task("p1", "t", Bytes::new()).await.unwrap();
        }
        let indices: Vec<u64> = channel.snapshot().pending.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, [0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn shared_sequence_spans_channels() {
        let sequence = Arc::new(AtomicU64::new(0));
        let mut a = ChannelBroker::with_sequence("a", Arc::clone(&sequence));
        let mut b = ChannelBroker::with_sequence("b", Arc::clone(&sequence));
        let (pa, _rx_a) = peer("conn_pa");
        let (pb, _rx_b) = peer("conn_pb");
        let _ = a.producer_subscribe(pa, "p").await.unwrap();
        let _ = b.producer_subscribe(pb, "p").await.unwrap();

        let _ = a.broadcast_task("p", "t", Bytes::new()).await.unwrap();
        let _ = b.broadcast_task("p", "t", Bytes::new()).await.unwrap();
        let _ = a.broadcast_task("p", "t", Bytes::new()).await.unwrap();

        let a_indices: Vec<u64> = a.snapshot().pending.iter().map(|(i, _)| *i).collect();
        let b_indices: Vec<u64> = b.snapshot().pending.iter().map(|(i, _)| *i).collect();
        assert_eq!(a_indices, [0, 2]);
        assert_eq!(b_indices, [1]);
    }

    #[tokio::test]
    async fn duplicate_consumer_name_rejected_without_mutation() {
        let mut channel = ChannelBroker::new("jobs");
        let (first, mut first_rx) = peer("conn_1");
        let (second, mut second_rx) = peer("conn_2");

        assert_eq!(
            channel.consumer_subscribe(first, "c1", 0).await.unwrap(),
            SubscribeOutcome::Subscribed
        );
        assert_eq!(info_types(&drain(&mut first_rx)), [InfoType::Subscribed]);

        assert_eq!(
            channel.consumer_subscribe(second, "c1", 9).await.unwrap(),
            SubscribeOutcome::AlreadyExists
        );
        assert_eq!(info_types(&drain(&mut second_rx)), [InfoType::ConsumerAlreadyExists]);

        let snapshot = channel.snapshot();
        assert_eq!(snapshot.consumers.len(), 1);
        assert_eq!(snapshot.consumers[0].connection_id.as_str(), "conn_1");
        assert_eq!(snapshot.consumers[0].priority, 0);
    }

    #[tokio::test]
    async fn duplicate_publisher_id_rejected_without_mutation() {
        let mut channel = ChannelBroker::new("jobs");
        let (first, _first_rx) = peer("conn_1");
        let (second, mut second_rx) = peer("conn_2");

        let _ = channel.producer_subscribe(first, "p1").await.unwrap();
        assert_eq!(
            channel.producer_subscribe(second, "p1").await.unwrap(),
            SubscribeOutcome::AlreadyExists
        );
        assert_eq!(info_types(&drain(&mut second_rx)), [InfoType::PublisherAlreadyExists]);
        assert_eq!(channel.snapshot().publishers, ["p1"]);
    }

    #[tokio::test]
    async fn new_consumer_replays_pending_to_everyone() {
        let mut channel = ChannelBroker::new("jobs");
        let (publisher, _publisher_rx) = peer("conn_p1");
        let (c1, mut c1_rx) = peer("conn_c1");
        let _ = channel.producer_subscribe(publisher, "p1").await.unwrap();
        let _ = channel.consumer_subscribe(c1, "c1", 0).await.unwrap();
        let first = channel.broadcast_task("p1", "one", Bytes::new()).await.unwrap();
        let second = channel.broadcast_task("p1", "two", Bytes::new()).await.unwrap();
        let _ = drain(&mut c1_rx);

        let (c2, mut c2_rx) = peer("conn_c2");
        let _ = channel.consumer_subscribe(c2, "c2", 0).await.unwrap();

        let c2_frames = drain(&mut c2_rx);
        assert_eq!(c2_frames[0].message_type, MessageType::Info);
        let c2_ids: Vec<_> = task_begins(&c2_frames).into_iter().map(|t| t.task_id).collect();
        assert_eq!(c2_ids, [first.clone(), second.clone()]);

        let c1_ids: Vec<_> = task_begins(&drain(&mut c1_rx)).into_iter().map(|t| t.task_id).collect();
        assert_eq!(c1_ids, [first, second]);
    }

    #[tokio::test]
    async fn result_to_live_publisher_clears_pending() {
        let mut channel = ChannelBroker::new("jobs");
        let (publisher, mut publisher_rx) = peer("conn_p1");
        let (c1, mut c1_rx) = peer("conn_c1");
        let _ = channel.producer_subscribe(publisher, "p1").await.unwrap();
        let _ = channel.consumer_subscribe(c1, "c1", 0).await.unwrap();
        let task_id = channel
            .broadcast_task("p1", "build", Bytes::from_static(&[0x01]))
            .await
            .unwrap();
        let _ = drain(&mut publisher_rx);
        let _ = drain(&mut c1_rx);

        let outcome = channel
            .notify_task_result(&task_id, "c1", Bytes::from_static(&[0x02]))
            .await
            .unwrap();
        assert_eq!(outcome, ResultOutcome::Delivered);

        let results = task_results(&drain(&mut publisher_rx));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].task_id, task_id);
        assert_eq!(results[0].consumer_name, "c1");
        assert_eq!(results[0].channel_name, "jobs");
        assert_eq!(results[0].content.as_ref(), &[0x02]);
        assert!(channel.snapshot().pending.is_empty());

        let (c2, mut c2_rx) = peer("conn_c2");
        let _ = channel.consumer_subscribe(c2, "c2", 0).await.unwrap();
        assert!(task_begins(&drain(&mut c2_rx)).is_empty());
        assert!(task_begins(&drain(&mut c1_rx)).is_empty());
    }

    #[tokio::test]
    async fn unknown_task_result_is_noop() {
        let mut channel = ChannelBroker::new("jobs");
        let (publisher, mut publisher_rx) = peer("conn_p1");
        let _ = channel.producer_subscribe(publisher, "p1").await.unwrap();
        let _ = drain(&mut publisher_rx);

        let outcome = channel
            .notify_task_result(&TaskId::from_raw("task_missing"), "c1", Bytes::new())
            .await
            .unwrap();
        assert_eq!(outcome, ResultOutcome::UnknownTask);
        assert!(drain(&mut publisher_rx).is_empty());
        assert!(channel.snapshot().buffered.is_empty());
    }

    #[tokio::test]
    async fn offline_publisher_gets_buffered_results_on_reconnect() {
        let mut channel = ChannelBroker::new("jobs");
        let (publisher, _publisher_rx) = peer("conn_p1");
        let _ = channel.producer_subscribe(publisher, "p1").await.unwrap();
        let first = channel.broadcast_task("p1", "one", Bytes::new()).await.unwrap();
        let second = channel.broadcast_task("p1", "two", Bytes::new()).await.unwrap();

        let removed = channel.remove_connection(&ConnectionId::from_raw("conn_p1"));
        assert_eq!(removed, RemovedMembers { consumers: 0, publishers: 1 });

        // Completed out of order; replay follows index order.
        assert_eq!(
            channel.notify_task_result(&second, "c1", Bytes::from_static(b"2")).await.unwrap(),
            ResultOutcome::Buffered
        );
        assert_eq!(
            channel.notify_task_result(&first, "c2", Bytes::from_static(b"1")).await.unwrap(),
            ResultOutcome::Buffered
        );
        assert_eq!(
            channel.notify_task_result(&first, "c3", Bytes::from_static(b"x")).await.unwrap(),
            ResultOutcome::AlreadyBuffered
        );
        let snapshot = channel.snapshot();
        assert_eq!(snapshot.pending.len(), 2);
        assert_eq!(snapshot.buffered.len(), 2);

        let (again, mut again_rx) = peer("conn_p1b");
        let _ = channel.producer_subscribe(again, "p1").await.unwrap();
        let frames = drain(&mut again_rx);
        let results = task_results(&frames);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].task_id, first);
        assert_eq!(results[0].content.as_ref(), b"1");
        assert_eq!(results[0].consumer_name, "c2");
        assert_eq!(results[1].task_id, second);
        assert_eq!(frames.last().unwrap().message_type, MessageType::Info);

        let snapshot = channel.snapshot();
        assert!(snapshot.pending.is_empty());
        assert!(snapshot.buffered.is_empty());

        // A later, unrelated resubscribe sees nothing twice.
        let _ = channel.remove_connection(&ConnectionId::from_raw("conn_p1b"));
        let (third, mut third_rx) = peer("conn_p1c");
        let _ = channel.producer_subscribe(third, "p1").await.unwrap();
        assert!(task_results(&drain(&mut third_rx)).is_empty());
    }

    #[tokio::test]
    async fn buffered_results_only_replay_to_their_owner() {
        let mut channel = ChannelBroker::new("jobs");
        let (p1, _p1_rx) = peer("conn_p1");
        let (p2, _p2_rx) = peer("conn_p2");
        let _ = channel.producer_subscribe(p1, "p1").await.unwrap();
        let _ = channel.producer_subscribe(p2, "p2").await.unwrap();
        let t1 = channel.broadcast_task("p1", "one", Bytes::new()).await.unwrap();
        let t2 = channel.broadcast_task("p2", "two", Bytes::new()).await.unwrap();
        let _ = channel.remove_connection(&ConnectionId::from_raw("conn_p1"));
        let _ = channel.remove_connection(&ConnectionId::from_raw("conn_p2"));
        let _ = channel.notify_task_result(&t1, "c", Bytes::new()).await.unwrap();
        let _ = channel.notify_task_result(&t2, "c", Bytes::new()).await.unwrap();

        let (back, mut back_rx) = peer("conn_p2b");
        let _ = channel.producer_subscribe(back, "p2").await.unwrap();
        let results = task_results(&drain(&mut back_rx));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].task_id, t2);

        let snapshot = channel.snapshot();
        assert_eq!(snapshot.buffered, vec![(0, t1.clone())]);
        assert_eq!(snapshot.pending, vec![(0, t1)]);
    }

    #[tokio::test]
    async fn closed_publisher_link_buffers_instead_of_losing() {
        let mut channel = ChannelBroker::new("jobs");
        let (publisher, publisher_rx) = peer("conn_p1");
        let _ = channel.producer_subscribe(publisher, "p1").await.unwrap();
        let task_id = channel.broadcast_task("p1", "build", Bytes::new()).await.unwrap();
        drop(publisher_rx);

        let outcome = channel.notify_task_result(&task_id, "c1", Bytes::new()).await.unwrap();
        assert_eq!(outcome, ResultOutcome::Buffered);
        assert_eq!(channel.snapshot().pending.len(), 1);
    }

    #[tokio::test]
    async fn disconnect_keeps_pending_and_buffered() {
        let mut channel = ChannelBroker::new("jobs");
        let (shared, _rx) = peer("conn_shared");
        let (other, _other_rx) = peer("conn_other");
        let _ = channel
            .producer_subscribe(Arc::clone(&shared) as Arc<dyn Connection>, "p1")
            .await
            .unwrap();
        let _ = channel.consumer_subscribe(shared, "c1", 0).await.unwrap();
        let _ = channel.consumer_subscribe(other, "c2", 0).await.unwrap();
        let _ = channel.broadcast_task("p1", "build", Bytes::new()).await.unwrap();

        let removed = channel.remove_connection(&ConnectionId::from_raw("conn_shared"));
        assert_eq!(removed, RemovedMembers { consumers: 1, publishers: 1 });

        let snapshot = channel.snapshot();
        assert_eq!(snapshot.consumers.len(), 1);
        assert_eq!(snapshot.consumers[0].name, "c2");
        assert!(snapshot.publishers.is_empty());
        assert_eq!(snapshot.pending.len(), 1);

        assert!(channel.remove_connection(&ConnectionId::from_raw("conn_nobody")).is_empty());
    }

    #[tokio::test]
    async fn gone_link_is_reported_but_not_an_error() {
        let (live, mut live_rx) = peer("conn_live");
        let (gone, gone_rx) = peer("conn_gone");
        drop(gone_rx);
        let notice = Info::channel_not_found("jobs");

        assert!(try_deliver(live.as_ref(), &notice).await.unwrap());
        assert!(!try_deliver(gone.as_ref(), &notice).await.unwrap());
        deliver(gone.as_ref(), &notice).await.unwrap();

        assert_eq!(drain(&mut live_rx).len(), 1);
        assert_eq!(gone.drop_count(), 2);
    }
}
