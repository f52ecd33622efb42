//! Room scanner.
//!
//! Opens the discovery address both ways: a sender solicits advertisements
//! with freshly-signed `RoomRequest` datagrams at a fixed interval, while
//! a listener collects `Room` advertisements until the deadline. Survivors
//! of the kind / exclusion / signature gates are deduplicated by UID and
//! returned in UID order, optionally annotated with the first endpoint
//! that answered an info probe correctly.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::time::Instant;

use huddle_core::api::{Room as RoomObject, RoomRequest, KIND_ROOM};
use huddle_core::signing::{sign_api_object, Key};
use huddle_core::Uid;
use huddle_rooms::{RemoteRoom, Room};

use crate::socket::{self, MAX_DATAGRAM};
use crate::verify_recent;

/// How long each endpoint gets to answer the availability probe.
const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Total listening time for one search round.
    pub duration: Duration,
    /// Interval between solicitations within the round.
    pub request_interval: Duration,
    /// Room UIDs to ignore — a node excludes itself.
    pub exclude: Vec<Uid>,
    /// Probe advertised endpoints and record the first reachable one.
    pub check_availability: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(3),
            request_interval: Duration::from_secs(1),
            exclude: Vec::new(),
            check_availability: false,
        }
    }
}

/// A room found by a search round.
#[derive(Debug, Clone)]
pub struct DiscoveredRoom {
    pub info: RoomObject,
    /// First advertised endpoint that served a matching, verified info
    /// object — absent when none did or the probe was skipped.
    pub available_endpoint: Option<String>,
}

/// Searches the discovery address for peer rooms.
pub struct Scanner {
    addr: SocketAddr,
}

impl Scanner {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Run one search round. With a key, solicitations are signed and
    /// advertisements are verified; without one, everything is accepted.
    pub async fn search(
        &self,
        key: Option<&Key>,
        opts: SearchOptions,
    ) -> Result<Vec<DiscoveredRoom>> {
        let read = socket::bind(self.addr)
            .with_context(|| format!("listen udp {} error", self.addr))?;
        let write = socket::dial(self.addr)
            .with_context(|| format!("dial udp {} error", self.addr))?;

        let rounds = (opts.duration.as_millis() / opts.request_interval.as_millis()).max(1) as u32;
        let sender = tokio::spawn(run_sender(
            write,
            key.cloned(),
            rounds,
            opts.request_interval,
        ));

        tracing::debug!(addr = %self.addr, "listening for rooms");
        let found = run_listener(read, key, opts.duration, &opts.exclude).await;
        sender.abort();
        tracing::debug!(count = found.len(), "search round finished");

        let mut rooms: Vec<DiscoveredRoom> = found
            .into_values()
            .map(|info| DiscoveredRoom {
                info,
                available_endpoint: None,
            })
            .collect();

        if opts.check_availability {
            check_availability(key, &mut rooms).await;
        }

        Ok(rooms)
    }
}

async fn run_sender(socket: UdpSocket, key: Option<Key>, rounds: u32, interval: Duration) {
    let mut request = RoomRequest::new();
    let mut ticker = tokio::time::interval(interval);

    for _ in 0..rounds {
        ticker.tick().await;

        if let Some(key) = &key {
            if let Err(e) = sign_api_object(key, &mut request) {
                tracing::error!(error = %e, "sign room request error");
                continue;
            }
        }
        let mut raw = serde_json::to_vec(&request).expect("room request serialization failed");
        raw.push(b'\n');

        tracing::trace!("sending room request");
        if let Err(e) = socket.send(&raw).await {
            tracing::warn!(error = %e, "send room request error");
        }
    }
}

async fn run_listener(
    socket: UdpSocket,
    key: Option<&Key>,
    duration: Duration,
    exclude: &[Uid],
) -> BTreeMap<String, RoomObject> {
    // keyed by UID string — iteration order is the output order
    let mut rooms = BTreeMap::new();
    let deadline = Instant::now() + duration;
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        let received = match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
            Err(_) => break,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "read udp packet error");
                continue;
            }
            Ok(Ok((n, _))) => &buf[..n],
        };
        if received.is_empty() {
            continue;
        }

        let room: RoomObject = match serde_json::from_slice(received) {
            Ok(room) => room,
            Err(e) => {
                tracing::debug!(error = %e, "decode room error");
                continue;
            }
        };
        if !room.api.is_kind(KIND_ROOM) {
            continue;
        }
        let Some(uid) = room.meta.uid else { continue };
        if exclude.contains(&uid) {
            continue;
        }
        if let Some(key) = key {
            if let Err(e) = verify_recent(key, &room) {
                tracing::debug!(room = %uid, error = %e, "signature verification error");
                continue;
            }
        }

        tracing::debug!(room = %uid, "found room");
        rooms.insert(uid.to_string(), room);
    }

    rooms
}

/// Probe each discovered room's endpoints, accepting the first whose info
/// response matches the advertised UID and verifies against the key.
async fn check_availability(key: Option<&Key>, rooms: &mut [DiscoveredRoom]) {
    for room in rooms.iter_mut() {
        let advertised = room.info.meta.uid;
        for endpoint in &room.info.endpoints {
            let remote = match RemoteRoom::new(endpoint.clone(), &room.info.cert_sign) {
                Ok(remote) => remote,
                Err(e) => {
                    tracing::debug!(endpoint, error = %e, "remote room setup error");
                    continue;
                }
            };

            let info = match tokio::time::timeout(AVAILABILITY_TIMEOUT, remote.info()).await {
                Ok(Ok(info)) => info,
                Ok(Err(e)) => {
                    tracing::debug!(endpoint, error = %e, "endpoint not available");
                    continue;
                }
                Err(_) => {
                    tracing::debug!(endpoint, "endpoint timed out");
                    continue;
                }
            };

            if info.meta.uid != advertised {
                tracing::debug!(endpoint, "endpoint serves a different room");
                continue;
            }
            if let Some(key) = key {
                if let Err(e) = verify_recent(key, &info) {
                    tracing::debug!(endpoint, error = %e, "info signature verification error");
                    continue;
                }
            }

            tracing::debug!(endpoint, "endpoint available");
            room.available_endpoint = Some(endpoint.clone());
            break;
        }
    }
}
