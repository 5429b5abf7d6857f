//! Broker error taxonomy.
//!
//! Every broker operation reports an explicit outcome. Callers (the protocol
//! dispatcher and the HTTP control plane) translate these into info frames or
//! status codes; nothing here is retried.

/// Taxonomy class of a [`BrokerError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Name collision for a channel, consumer or publisher.
    AlreadyExists,
    /// Channel or publisher absent at the time of the call.
    NotFound,
    /// A frame or payload could not be encoded or decoded.
    Internal,
}

/// Failure of a broker operation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// `create_channel` on a name already registered.
    #[error("channel {0} already exists")]
    ChannelExists(String),

    /// No channel with this name.
    #[error("channel {0} not found")]
    ChannelNotFound(String),

    /// Broadcast from a publisher id that never subscribed to the channel.
    #[error("publisher {publisher_id} not found in channel {channel}")]
    PublisherNotFound {
        /// Channel addressed.
        channel: String,
        /// Unknown publisher id.
        publisher_id: String,
    },

    /// Consumer name taken in the channel.
    #[error("consumer {consumer} already subscribed to channel {channel}")]
    ConsumerExists {
        /// Channel addressed.
        channel: String,
        /// Taken name.
        consumer: String,
    },

    /// Publisher id taken in the channel.
    #[error("publisher {publisher_id} already subscribed to channel {channel}")]
    PublisherExists {
        /// Channel addressed.
        channel: String,
        /// Taken id.
        publisher_id: String,
    },

    /// JSON encode or decode failure, including bad base64 content.
    #[error("codec error: {0}")]
    Codec(String),
}

impl BrokerError {
    /// Taxonomy class, used to pick a status code or info frame.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ChannelExists(_) | Self::ConsumerExists { .. } | Self::PublisherExists { .. } => {
                ErrorKind::AlreadyExists
            }
            Self::ChannelNotFound(_) | Self::PublisherNotFound { .. } => ErrorKind::NotFound,
            Self::Codec(_) => ErrorKind::Internal,
        }
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ChannelExists(_) => "channel_exists",
            Self::ChannelNotFound(_) => "channel_not_found",
            Self::PublisherNotFound { .. } => "publisher_not_found",
            Self::ConsumerExists { .. } => "consumer_exists",
            Self::PublisherExists { .. } => "publisher_exists",
            Self::Codec(_) => "codec",
        }
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self {
        BrokerError::Codec(e.to_string())
    }
}

/// Failure to hand a frame to a connection.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The writer side is gone; carries the connection id.
    #[error("connection {0} is closed")]
    Closed(String),
}
