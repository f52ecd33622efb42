//! huddle-discovery — finding rooms on the local network.
//!
//! Nodes bootstrap over a UDP multicast group: scanners solicit with
//! signed `RoomRequest` datagrams, transponders answer with signed room
//! advertisements. The shared PIN is both the matchmaking criterion and
//! the authenticator — datagrams that fail HMAC verification (with a
//! bounded sign-time window) are discarded.

pub mod endpoints;
pub mod scanner;
pub mod socket;
pub mod transponder;

pub use scanner::{DiscoveredRoom, Scanner, SearchOptions};
pub use transponder::Transponder;

use chrono::{Duration, Utc};

use huddle_core::api::ApiObject;
use huddle_core::signing::{verify_api_object, Key, SignError};

/// Replay window applied to discovery signatures, on either side of now.
const SIGNATURE_WINDOW_MINUTES: i64 = 10;

/// Verify a discovery object's signature within the replay window.
pub(crate) fn verify_recent<T: ApiObject + Clone>(key: &Key, obj: &T) -> Result<(), SignError> {
    let window = Duration::minutes(SIGNATURE_WINDOW_MINUTES);
    let now = Utc::now();
    verify_api_object(key, obj, Some(now - window), Some(now + window))
}
