//! Wire objects for the `chat/v1` API.
//!
//! Everything that crosses a socket — HTTP bodies, HTTP streams, and UDP
//! discovery datagrams — is one of these objects encoded as JSON. Struct
//! field order is the canonical form that object signatures cover, so
//! fields must not be reordered and empty fields are always omitted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::uid::Uid;

/// API version carried by every wire object.
pub const VERSION: &str = "chat/v1";

pub const KIND_MESSAGE: &str = "Message";
pub const KIND_ROOM: &str = "Room";
pub const KIND_ROOM_REQUEST: &str = "RoomRequest";
pub const KIND_USER: &str = "User";
pub const KIND_STATUS: &str = "Status";

// ── Meta ──────────────────────────────────────────────────────────────────────

/// Version and kind, used to route and dispatch wire objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
}

impl ApiMeta {
    pub fn new(kind: &str) -> Self {
        Self {
            version: VERSION.to_string(),
            kind: kind.to_string(),
        }
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

/// Per-object metadata: identity, display name, and signature envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uid>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// `hs256:`-prefixed HMAC over the canonical JSON form of the object
    /// with this field blanked.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
    /// Signer's wall clock at signing time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign_time: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn with_uid(uid: Uid) -> Self {
        Self {
            uid: Some(uid),
            ..Self::default()
        }
    }

    pub fn named(uid: Uid, name: impl Into<String>) -> Self {
        Self {
            uid: Some(uid),
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Objects that carry an [`ObjectMeta`] and can be signed and verified as
/// a unit.
pub trait ApiObject: Serialize {
    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
}

macro_rules! impl_api_object {
    ($ty:ty) => {
        impl ApiObject for $ty {
            fn meta(&self) -> &ObjectMeta {
                &self.meta
            }
            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.meta
            }
        }
    };
}

// ── Message ───────────────────────────────────────────────────────────────────

/// A chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    pub api: ApiMeta,
    #[serde(default)]
    pub meta: ObjectMeta,
    /// Sender identity.
    #[serde(default)]
    pub from: ObjectMeta,
    pub content: MessageContent,
}

/// Message payload. Exactly one variant is present on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageContent {
    Text(TextContent),
    Join(MembersChange),
    Leave(MembersChange),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
}

/// Payload of a join or leave announcement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MembersChange {
    #[serde(default)]
    pub user: ObjectMeta,
}

impl Message {
    pub fn text(from: ObjectMeta, content: impl Into<String>) -> Self {
        Self {
            api: ApiMeta::new(KIND_MESSAGE),
            meta: ObjectMeta::default(),
            from,
            content: MessageContent::Text(TextContent {
                content: content.into(),
            }),
        }
    }

    pub fn join(from: ObjectMeta, user: ObjectMeta) -> Self {
        Self {
            api: ApiMeta::new(KIND_MESSAGE),
            meta: ObjectMeta::default(),
            from,
            content: MessageContent::Join(MembersChange { user }),
        }
    }

    pub fn leave(from: ObjectMeta, user: ObjectMeta) -> Self {
        Self {
            api: ApiMeta::new(KIND_MESSAGE),
            meta: ObjectMeta::default(),
            from,
            content: MessageContent::Leave(MembersChange { user }),
        }
    }
}

impl_api_object!(Message);

// ── User ──────────────────────────────────────────────────────────────────────

/// A room participant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(flatten)]
    pub api: ApiMeta,
    #[serde(default)]
    pub meta: ObjectMeta,
}

impl User {
    pub fn new(meta: ObjectMeta) -> Self {
        Self {
            api: ApiMeta::new(KIND_USER),
            meta,
        }
    }
}

impl_api_object!(User);

// ── Room ──────────────────────────────────────────────────────────────────────

/// A room advertisement / info object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    #[serde(flatten)]
    pub api: ApiMeta,
    #[serde(default)]
    pub meta: ObjectMeta,
    #[serde(default)]
    pub owner: User,
    /// Published signature of the room key — safe to gossip.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_signature: String,
    /// `sha256:` fingerprint of the node's DER-encoded TLS leaf certificate.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cert_sign: String,
    /// URLs at which the node's chat server listens.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<String>,
}

impl_api_object!(Room);

/// A scanner's solicitation for room advertisements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomRequest {
    #[serde(flatten)]
    pub api: ApiMeta,
    #[serde(default)]
    pub meta: ObjectMeta,
}

impl RoomRequest {
    pub fn new() -> Self {
        Self {
            api: ApiMeta::new(KIND_ROOM_REQUEST),
            meta: ObjectMeta::with_uid(Uid::new()),
        }
    }
}

impl_api_object!(RoomRequest);

// ── Status ────────────────────────────────────────────────────────────────────

pub const REASON_BAD_REQUEST: &str = "BadRequest";
pub const REASON_INTERNAL_SERVER_ERROR: &str = "InternalServerError";
pub const REASON_OK: &str = "Ok";

/// Outcome of an API request. Carried as the body of every error response
/// and as the trailing sentinel of operations with no other result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    #[serde(flatten)]
    pub api: ApiMeta,
    #[serde(default)]
    pub meta: ObjectMeta,
    #[serde(default)]
    pub code: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl Status {
    pub fn new(request_id: Option<Uid>, code: u16, reason: &str, message: impl Into<String>) -> Self {
        Self {
            api: ApiMeta::new(KIND_STATUS),
            meta: ObjectMeta {
                uid: request_id,
                ..ObjectMeta::default()
            },
            code,
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    pub fn ok(request_id: Option<Uid>) -> Self {
        Self::new(request_id, 200, REASON_OK, "")
    }

    pub fn bad_request(request_id: Option<Uid>, message: impl Into<String>) -> Self {
        Self::new(request_id, 400, REASON_BAD_REQUEST, message)
    }

    pub fn internal(request_id: Option<Uid>, message: impl Into<String>) -> Self {
        Self::new(request_id, 500, REASON_INTERNAL_SERVER_ERROR, message)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.reason, self.code, self.message)
    }
}

impl std::error::Error for Status {}

impl_api_object!(Status);
