//! huddle-rooms — the room contract and its two implementations.
//!
//! A room admits messages, fans them out to subscribers, and announces
//! membership changes. [`LocalRoom`] is the in-memory hub every node hosts;
//! [`RemoteRoom`] adapts a peer's HTTPS surface to the same contract so a
//! local room can bridge to it.

pub mod channel;
mod local;
mod remote;
mod room;

pub use channel::{ChannelError, Subscription, CHANNEL_BUFFER};
pub use local::LocalRoom;
pub use remote::RemoteRoom;
pub use room::{Room, RoomError};
