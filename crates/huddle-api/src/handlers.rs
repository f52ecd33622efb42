//! HTTP handlers — the three `/chat/v1` endpoints.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;

use huddle_core::api::{Message, ObjectMeta, Room as RoomObject, Status};
use huddle_core::Uid;
use huddle_rooms::{Room, RoomError};

#[derive(Clone)]
pub struct ApiState {
    pub room: Arc<dyn Room>,
}

/// Request UID, minted by the middleware for every request.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uid);

// ── Errors ────────────────────────────────────────────────────────────────────

/// A handler error, rendered as a `Status` body with the matching HTTP
/// status code.
pub struct ApiError(Status);

impl ApiError {
    pub fn bad_request(request_id: RequestId, message: impl Into<String>) -> Self {
        Self(Status::bad_request(Some(request_id.0), message))
    }

    pub fn internal(request_id: RequestId, message: impl Into<String>) -> Self {
        Self(Status::internal(Some(request_id.0), message))
    }

    fn from_room(request_id: RequestId, err: RoomError) -> Self {
        match err {
            RoomError::Status(status) => Self(*status),
            other => Self::internal(request_id, other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code =
            StatusCode::from_u16(self.0.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (code, Json(self.0)).into_response()
    }
}

// ── GET /chat/v1/info ─────────────────────────────────────────────────────────

pub async fn handle_info(
    State(state): State<ApiState>,
    Extension(request_id): Extension<RequestId>,
) -> Result<Json<RoomObject>, ApiError> {
    tracing::debug!(request = %request_id.0, "get room info");
    let info = state
        .room
        .info()
        .await
        .map_err(|e| ApiError::from_room(request_id, e))?;
    Ok(Json(info))
}

// ── POST /chat/v1/messages ────────────────────────────────────────────────────

pub async fn handle_create_message(
    State(state): State<ApiState>,
    Extension(request_id): Extension<RequestId>,
    body: Bytes,
) -> Result<Json<Message>, ApiError> {
    let mut msg: Message = serde_json::from_slice(&body).map_err(|e| {
        ApiError::bad_request(request_id, format!("bind request body error: {e}"))
    })?;

    tracing::debug!(request = %request_id.0, "create message");
    state
        .room
        .create_message(&mut msg)
        .await
        .map_err(|e| ApiError::from_room(request_id, e))?;

    Ok(Json(msg))
}

// ── GET /chat/v1/messages (stream) ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListenQuery {
    #[serde(rename = "userUID")]
    user_uid: Option<String>,
    #[serde(rename = "userName")]
    user_name: Option<String>,
}

impl ListenQuery {
    fn user(&self, request_id: RequestId) -> Result<Option<ObjectMeta>, ApiError> {
        if self.user_uid.is_none() && self.user_name.is_none() {
            return Ok(None);
        }
        let uid = match self.user_uid.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => Some(raw.parse::<Uid>().map_err(|e| {
                ApiError::bad_request(request_id, format!("bind request query error: {e}"))
            })?),
            None => None,
        };
        Ok(Some(ObjectMeta {
            uid,
            name: self.user_name.clone().unwrap_or_default(),
            ..ObjectMeta::default()
        }))
    }
}

pub async fn handle_listen_messages(
    State(state): State<ApiState>,
    Extension(request_id): Extension<RequestId>,
    Query(query): Query<ListenQuery>,
) -> Result<Response, ApiError> {
    let user = query.user(request_id)?;
    tracing::debug!(request = %request_id.0, user = ?user.as_ref().map(|u| &u.name), "listen messages");

    let subscription = state
        .room
        .listen(user)
        .await
        .map_err(|e| ApiError::from_room(request_id, e))?;

    // one JSON document per line, flushed per message; the stream ends
    // with the subscription or with the client connection
    let body = Body::from_stream(subscription.map(|msg| {
        let mut raw = serde_json::to_vec(&msg).expect("message serialization failed");
        raw.push(b'\n');
        Ok::<_, Infallible>(Bytes::from(raw))
    }));

    Ok(Response::new(body))
}
