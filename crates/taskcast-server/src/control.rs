//! HTTP control plane: channel creation and task publication.
//!
//! Responses carry an [`ApiNotice`] body (`ApiResult`, `ChannelName`,
//! `Message`) so HTTP callers and WebSocket peers see the same shape.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use taskcast_core::protocol::{
    base64_content, ApiNotice, CHANNEL_CREATED, CHANNEL_EXISTS, CHANNEL_NOT_FOUND, NOT_PARSED,
    TASK_PUBLISHED,
};
use taskcast_core::{BrokerError, ErrorKind};
use tracing::{debug, error, info};

use crate::server::AppState;

/// Body of `POST /Channels/{channelName}/CreateTask`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskBody {
    /// Must already be subscribed to the channel.
    pub publisher_id: String,
    /// Label forwarded to consumers.
    pub task_name: String,
    /// Base64 task content.
    #[serde(with = "base64_content")]
    pub task_buffer: Bytes,
}

/// `POST /Channels/Create` with a JSON string body naming the channel.
pub async fn create_channel(
    State(state): State<AppState>,
    body: Result<Json<String>, JsonRejection>,
) -> Response {
    let name = match body {
        Ok(Json(name)) => name,
        Err(rejection) => return unparsed(&rejection),
    };

    match state.registry.create_channel(&name).await {
        Ok(()) => {
            info!(channel = %name, "channel created over http");
            let notice = ApiNotice::new(CHANNEL_CREATED, Some(&name), format!("Channel {name} created."));
            let mut response = (StatusCode::CREATED, Json(notice)).into_response();
            if let Ok(location) = HeaderValue::try_from(format!("Channels/{name}")) {
                let _ = response.headers_mut().insert(header::LOCATION, location);
            }
            response
        }
        Err(e) => broker_failure(&name, &e),
    }
}

/// `POST /Channels/{channelName}/CreateTask`.
pub async fn create_task(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    body: Result<Json<TaskBody>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => return unparsed(&rejection),
    };

    match state
        .registry
        .broadcast_task(&channel, &body.publisher_id, &body.task_name, body.task_buffer)
        .await
    {
        Ok(task_id) => {
            debug!(channel = %channel, task_id = %task_id, "task published over http");
            let notice = ApiNotice::new(TASK_PUBLISHED, Some(&channel), "Task has been sent");
            (StatusCode::OK, Json(notice)).into_response()
        }
        Err(e) => broker_failure(&channel, &e),
    }
}

fn broker_failure(channel: &str, err: &BrokerError) -> Response {
    let (status, notice) = match err.kind() {
        ErrorKind::AlreadyExists => (
            StatusCode::BAD_REQUEST,
            ApiNotice::new(CHANNEL_EXISTS, Some(channel), format!("Channel {channel} already exists.")),
        ),
        ErrorKind::NotFound => {
            let message = if matches!(err, BrokerError::PublisherNotFound { .. }) {
                "Publisher not found."
            } else {
                "Channel has not been found"
            };
            (StatusCode::NOT_FOUND, ApiNotice::new(CHANNEL_NOT_FOUND, Some(channel), message))
        }
        ErrorKind::Internal => {
            error!(channel, error = %err, kind = err.error_kind(), "control plane request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiNotice::new(NOT_PARSED, None, "Internal server error."),
            )
        }
    };
    (status, Json(notice)).into_response()
}

fn unparsed(rejection: &JsonRejection) -> Response {
    debug!(error = %rejection, "control plane body rejected");
    let notice = ApiNotice::new(NOT_PARSED, None, rejection.body_text());
    (StatusCode::BAD_REQUEST, Json(notice)).into_response()
}
