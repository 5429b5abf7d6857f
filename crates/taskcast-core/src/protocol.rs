//! Wire protocol.
//!
//! Every message on a connection is a [`Frame`]: a small JSON envelope whose
//! `payload` is decoded into a typed record chosen by the frame's
//! [`MessageType`]. Opaque task content travels as base64.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::BrokerError;
use crate::ids::{ConnectionId, TaskId};

// ── ApiResult codes ─────────────────────────────────────────────────

/// Consumer name already taken in the channel.
pub const CONSUMER_EXISTS_IN_CHANNEL: &str = "CONSUMER_EXISTS_IN_CHANNEL";
/// Consumer joined the channel.
pub const CONSUMER_SUBSCRIBED: &str = "CONSUMER_SUBSCRIBED";
/// Publisher id already taken in the channel.
pub const PUBLISHER_EXISTS_IN_CHANNEL: &str = "PUBLISHER_EXISTS_IN_CHANNEL";
/// Publisher joined the channel.
pub const PUBLISHER_SUBSCRIBED: &str = "PUBLISHER_SUBSCRIBED";
/// Named channel (or publisher, over HTTP) does not exist.
pub const CHANNEL_NOT_FOUND: &str = "CHANNEL_NOT_FOUND";
/// `POST /Channels/Create` succeeded.
pub const CHANNEL_CREATED: &str = "CHANNEL_CREATED";
/// `POST /Channels/Create` hit an existing name.
pub const CHANNEL_EXISTS: &str = "CHANNEL_EXISTS";
/// `CreateTask` fanned the task out.
pub const TASK_PUBLISHED: &str = "TASK_PUBLISHED";
/// Request body unreadable, or an internal fault.
pub const NOT_PARSED: &str = "NOT_PARSED";

/// Declared type of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Peer → broker: join a channel as a consumer.
    ConsumerSubscribe,
    /// Peer → broker: join a channel as a publisher.
    PublisherSubscribe,
    /// Broker → consumer.
    TaskBegin,
    /// Consumer → broker, then broker → publisher.
    TaskResult,
    /// Broker → peer confirmations and errors.
    Info,
    /// Any type string this broker does not understand.
    #[serde(other)]
    Unknown,
}

/// Envelope carried by every message on a connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Selects the payload record.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Free-form sender tag; empty on broker frames.
    #[serde(default)]
    pub sender_id: String,
    /// Recipient connection on broker frames.
    #[serde(default)]
    pub connection_id: String,
    /// Undecoded payload; see [`Frame::payload`].
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A typed payload record bound to exactly one [`MessageType`].
pub trait Payload: Serialize + DeserializeOwned {
    /// Frame type this record travels under.
    const TYPE: MessageType;
}

impl Frame {
    /// Build a broker-originated frame addressed to `connection_id`.
    pub fn outbound<P: Payload>(connection_id: &ConnectionId, payload: &P) -> Result<Self, BrokerError> {
        Ok(Self {
            message_type: P::TYPE,
            sender_id: String::new(),
            connection_id: connection_id.to_string(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Parse a frame from its JSON text.
    pub fn decode(text: &str) -> Result<Self, BrokerError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize to JSON text.
    pub fn encode(&self) -> Result<String, BrokerError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode the payload as `P`. Fails if the frame is of another type.
    pub fn payload<P: Payload>(&self) -> Result<P, BrokerError> {
        if self.message_type != P::TYPE {
            return Err(BrokerError::Codec(format!(
                "expected {:?} payload, frame is {:?}",
                P::TYPE,
                self.message_type
            )));
        }
        Ok(P::deserialize(&self.payload)?)
    }
}

/// Consumer joins a channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerSubscribe {
    /// Channel to join.
    pub channel_name: String,
    /// Unique within the channel.
    pub consumer_name: String,
    /// Recorded, not used for ordering.
    #[serde(default)]
    pub consumer_priority: i32,
}

impl Payload for ConsumerSubscribe {
    const TYPE: MessageType = MessageType::ConsumerSubscribe;
}

/// Publisher joins (or rejoins) a channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublisherSubscribe {
    /// Channel to join.
    pub channel_name: String,
    /// Unique within the channel; reuse it to collect buffered results.
    pub publisher_id: String,
}

impl Payload for PublisherSubscribe {
    const TYPE: MessageType = MessageType::PublisherSubscribe;
}

/// Broker → consumer: a task to run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskBegin {
    /// Channel the task was published on.
    pub channel_name: String,
    /// Echoed back in the matching [`TaskResult`].
    pub task_id: TaskId,
    /// Publisher-chosen label.
    pub task_name: String,
    /// Opaque task body.
    #[serde(with = "base64_content")]
    pub content: Bytes,
}

impl Payload for TaskBegin {
    const TYPE: MessageType = MessageType::TaskBegin;
}

/// Consumer → broker on completion, and broker → publisher on delivery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    /// Task being answered.
    pub task_id: TaskId,
    /// Channel the task came from.
    pub channel_name: String,
    /// Consumer that produced the result.
    #[serde(default)]
    pub consumer_name: String,
    /// Opaque result body.
    #[serde(with = "base64_content")]
    pub content: Bytes,
}

impl Payload for TaskResult {
    const TYPE: MessageType = MessageType::TaskResult;
}

/// Kind of an info frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InfoType {
    /// Consumer subscribe refused.
    ConsumerAlreadyExists,
    /// Publisher subscribe refused.
    PublisherAlreadyExists,
    /// Consumer or publisher subscribe accepted.
    Subscribed,
    /// Frame named a channel that does not exist.
    ChannelNotFound,
}

/// Human and machine readable notice carried by info frames and HTTP bodies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApiNotice {
    /// One of the `ApiResult` code constants.
    pub api_result: String,
    /// Channel the notice is about, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    /// Human readable text.
    pub message: String,
}

impl ApiNotice {
    /// Build a notice from an `ApiResult` code.
    pub fn new(api_result: &str, channel_name: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            api_result: api_result.to_string(),
            channel_name: channel_name.map(str::to_string),
            message: message.into(),
        }
    }
}

/// Confirmation or error frame sent by the broker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Info {
    /// Outcome class.
    pub info_type: InfoType,
    /// Details for the peer.
    pub payload: ApiNotice,
}

impl Payload for Info {
    const TYPE: MessageType = MessageType::Info;
}

impl Info {
    /// Refusal for a taken consumer name.
    pub fn consumer_already_exists(channel: &str, consumer: &str) -> Self {
        Self {
            info_type: InfoType::ConsumerAlreadyExists,
            payload: ApiNotice::new(
                CONSUMER_EXISTS_IN_CHANNEL,
                Some(channel),
                format!("Consumer with name {consumer} has already subscribed to channel {channel}"),
            ),
        }
    }

    /// Confirmation for a new consumer.
    pub fn consumer_subscribed(channel: &str, consumer: &str) -> Self {
        Self {
            info_type: InfoType::Subscribed,
            payload: ApiNotice::new(
                CONSUMER_SUBSCRIBED,
                Some(channel),
                format!("Consumer with name {consumer} has been subscribed to channel {channel}"),
            ),
        }
    }

    /// Refusal for a taken publisher id.
    pub fn publisher_already_exists(channel: &str, publisher_id: &str) -> Self {
        Self {
            info_type: InfoType::PublisherAlreadyExists,
            payload: ApiNotice::new(
                PUBLISHER_EXISTS_IN_CHANNEL,
                Some(channel),
                format!("Publisher with id {publisher_id} is already subscribed to channel {channel}"),
            ),
        }
    }

    /// Confirmation for a new publisher.
    pub fn publisher_subscribed(channel: &str, publisher_id: &str) -> Self {
        Self {
            info_type: InfoType::Subscribed,
            payload: ApiNotice::new(
                PUBLISHER_SUBSCRIBED,
                Some(channel),
                format!("Publisher with id {publisher_id} has been subscribed to channel {channel}"),
            ),
        }
    }

    /// Reply to any frame naming an unknown channel.
    pub fn channel_not_found(channel: &str) -> Self {
        Self {
            info_type: InfoType::ChannelNotFound,
            payload: ApiNotice::new(CHANNEL_NOT_FOUND, Some(channel), "Channel could not be found"),
        }
    }
}

/// Serde adapter: `Bytes` as a standard base64 string.
pub mod base64_content {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Encode as standard base64.
    pub fn serialize<S: Serializer>(content: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(content))
    }

    /// Decode standard base64; invalid input is a deserialize error.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
