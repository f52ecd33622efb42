//! Subscriber channels.
//!
//! A channel is the pipe between a room and one subscriber: a bounded
//! buffer with a non-blocking sending half held by the room and a
//! receiving half handed to the subscriber. A slow consumer loses
//! messages rather than stalling the room.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use huddle_core::api::Message;

/// Buffered messages per subscriber before sends start dropping.
pub const CHANNEL_BUFFER: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("ChannelClosed")]
    Closed,
    #[error("ChannelBusy")]
    Busy,
}

struct Shared {
    // taken on close so the receiver drains and then ends
    tx: Mutex<Option<mpsc::Sender<Message>>>,
    done: CancellationToken,
}

impl Shared {
    fn close(&self) -> Result<(), ChannelError> {
        let taken = self
            .tx
            .lock()
            .expect("channel lock poisoned")
            .take()
            .is_some();
        if !taken {
            return Err(ChannelError::Closed);
        }
        self.done.cancel();
        Ok(())
    }
}

/// The room-side sending half.
#[derive(Clone)]
pub struct Sender(Arc<Shared>);

impl Sender {
    /// Non-blocking send. A full buffer is `Busy`, a closed channel is
    /// `Closed`; neither ever stalls the caller.
    pub fn send(&self, msg: Message) -> Result<(), ChannelError> {
        let guard = self.0.tx.lock().expect("channel lock poisoned");
        let tx = guard.as_ref().ok_or(ChannelError::Closed)?;
        match tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(ChannelError::Busy),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ChannelError::Closed),
        }
    }

    pub fn close(&self) -> Result<(), ChannelError> {
        self.0.close()
    }

    pub fn is_closed(&self) -> bool {
        self.0.done.is_cancelled()
    }

    /// Cancelled once the channel closes, from either side.
    pub fn done(&self) -> CancellationToken {
        self.0.done.clone()
    }
}

/// The subscriber-side receiving half.
///
/// Dropping a subscription closes the channel, so an abandoned listener
/// never keeps its room-side slot alive.
pub struct Subscription {
    rx: mpsc::Receiver<Message>,
    shared: Arc<Shared>,
}

impl Subscription {
    /// Receive the next message. Returns `None` once the channel is closed
    /// and the buffer is drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Close the channel. The second close returns `ChannelClosed`.
    pub fn close(&self) -> Result<(), ChannelError> {
        self.shared.close()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.done.is_cancelled()
    }

    /// Cancelled once the channel closes, from either side.
    pub fn done(&self) -> CancellationToken {
        self.shared.done.clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.shared.close();
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Create a channel with the given buffer capacity.
pub fn channel(buffer: usize) -> (Sender, Subscription) {
    let (tx, rx) = mpsc::channel(buffer);
    let shared = Arc::new(Shared {
        tx: Mutex::new(Some(tx)),
        done: CancellationToken::new(),
    });
    (Sender(shared.clone()), Subscription { rx, shared })
}
