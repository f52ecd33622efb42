//! The room contract.

use async_trait::async_trait;
use thiserror::Error;

use huddle_core::api::{Message, ObjectMeta, Room as RoomObject, Status};
use huddle_core::signing::SignError;

use crate::channel::{ChannelError, Subscription};

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("RoomClosed")]
    Closed,

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Status(Box<Status>),

    #[error("sign error: {0}")]
    Sign(#[from] SignError),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("decode response error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("tls configuration error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("{0}")]
    Unexpected(String),
}

impl From<Status> for RoomError {
    fn from(status: Status) -> Self {
        Self::Status(Box::new(status))
    }
}

/// A chat room. Local and remote rooms satisfy the same contract; the
/// upstream of a room is just another `Room` behind a pointer.
#[async_trait]
pub trait Room: Send + Sync {
    /// The room's wire-form info object.
    async fn info(&self) -> Result<RoomObject, RoomError>;

    /// Admit a message. A message without a UID receives one, visible to
    /// the caller when the call returns.
    async fn create_message(&self, msg: &mut Message) -> Result<(), RoomError>;

    /// Subscribe to the room's messages. A `user` identity announces a
    /// join now and a leave when the subscription ends.
    async fn listen(&self, user: Option<ObjectMeta>) -> Result<Subscription, RoomError>;

    /// Close the room and every subscription it handed out.
    async fn close(&self) -> Result<(), RoomError>;
}
