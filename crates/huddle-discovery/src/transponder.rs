//! Room transponder.
//!
//! The answering side of discovery: a listener accepts `RoomRequest`
//! datagrams (verifying signed ones), and each accepted request triggers
//! the sender to publish the room advertisement. The advertisement is
//! re-signed on every send so its `signTime` stays current — a replayed
//! copy ages out of the scanners' acceptance window.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use huddle_core::api::{Room as RoomObject, RoomRequest, KIND_ROOM_REQUEST};
use huddle_core::signing::{sign_api_object, Key};

use crate::socket::{self, MAX_DATAGRAM};
use crate::verify_recent;

/// Publishes a room advertisement in answer to scanner requests.
pub struct Transponder {
    addr: SocketAddr,
    room: RoomObject,
    key: Key,
    started: AtomicBool,
}

impl Transponder {
    /// `room` is the advertisement template — endpoints and certificate
    /// fingerprint already filled in by the caller.
    pub fn new(addr: SocketAddr, room: RoomObject, key: Key) -> Self {
        Self {
            addr,
            room,
            key,
            started: AtomicBool::new(false),
        }
    }

    /// Start the listener and sender. A transponder starts once; further
    /// calls fail.
    pub fn start(&self, shutdown: CancellationToken) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            bail!("already started");
        }

        let read = socket::bind(self.addr)
            .with_context(|| format!("listen udp {} error", self.addr))?;
        let write = socket::dial(self.addr)
            .with_context(|| format!("dial udp {} error", self.addr))?;

        let (publish_tx, publish_rx) = mpsc::channel(1);

        tokio::spawn(run_listener(
            read,
            self.key.clone(),
            publish_tx,
            shutdown.clone(),
        ));
        tokio::spawn(run_sender(
            write,
            self.room.clone(),
            self.key.clone(),
            publish_rx,
            shutdown,
        ));

        tracing::debug!(addr = %self.addr, room = ?self.room.meta.uid, "transponder started");
        Ok(())
    }
}

async fn run_listener(
    socket: UdpSocket,
    key: Key,
    publish: mpsc::Sender<()>,
    shutdown: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => return,
            received = socket.recv_from(&mut buf) => received,
        };
        let received = match received {
            Ok((n, _)) => &buf[..n],
            Err(e) => {
                tracing::warn!(error = %e, "read udp packet error");
                continue;
            }
        };
        if received.is_empty() {
            continue;
        }

        let request: RoomRequest = match serde_json::from_slice(received) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(error = %e, "decode room request error");
                continue;
            }
        };
        if !request.api.is_kind(KIND_ROOM_REQUEST) {
            continue;
        }
        if !request.meta.signature.is_empty() {
            if let Err(e) = verify_recent(&key, &request) {
                tracing::debug!(error = %e, "signature verification error");
                continue;
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            result = publish.send(()) => {
                if result.is_err() {
                    return;
                }
            }
        }
    }
}

async fn run_sender(
    socket: UdpSocket,
    mut room: RoomObject,
    key: Key,
    mut publish: mpsc::Receiver<()>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            event = publish.recv() => {
                if event.is_none() {
                    return;
                }
            }
        }

        // fresh signature per send — signTime bounds replay
        if let Err(e) = sign_api_object(&key, &mut room) {
            tracing::error!(error = %e, "sign room info error");
            continue;
        }
        let mut raw = serde_json::to_vec(&room).expect("room advertisement serialization failed");
        raw.push(b'\n');

        match socket.send(&raw).await {
            Ok(_) => tracing::trace!("published room advertisement"),
            Err(e) => tracing::error!(error = %e, "publish error"),
        }
    }
}
