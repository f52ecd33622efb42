//! The in-memory room every node hosts.
//!
//! Fans admitted messages out to local subscribers, announces joins and
//! leaves, and bridges bidirectionally with at most one upstream peer.
//! Duplicate suppression runs in two places: the room's own deduplicator
//! stops same-UID echoes returning over the bridge, and a per-bridge
//! deduplicator stops the forwarder from bouncing upstream-originated
//! messages back to the upstream. Removing either produces echo storms or
//! drop storms.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use huddle_core::api::{ApiMeta, Message, ObjectMeta, Room as RoomObject, User, KIND_ROOM};
use huddle_core::signing::{sign_api_object, Key};
use huddle_core::{Deduplicator, Uid};

use crate::channel::{self, ChannelError, Sender, Subscription, CHANNEL_BUFFER};
use crate::room::{Room, RoomError};

/// The local pub/sub hub.
pub struct LocalRoom {
    me: Weak<LocalRoom>,
    uid: Uid,
    owner: ObjectMeta,
    key: Key,
    dedup: Deduplicator,
    state: RwLock<State>,
}

struct State {
    closed: bool,
    subscribers: Vec<Sender>,
    upstream: Option<Arc<dyn Room>>,
}

impl LocalRoom {
    pub fn new(key: Key, owner: ObjectMeta) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            uid: Uid::new(),
            owner,
            key,
            dedup: Deduplicator::default(),
            state: RwLock::new(State {
                closed: false,
                subscribers: Vec::new(),
                upstream: None,
            }),
        })
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn owner(&self) -> &ObjectMeta {
        &self.owner
    }

    /// The current upstream, if a bridge is up.
    pub async fn upstream(&self) -> Option<Arc<dyn Room>> {
        self.state.read().await.upstream.clone()
    }

    /// Install `peer` as the upstream, replacing (and closing) any prior
    /// bridge. Fails fast if the peer's info cannot be fetched.
    pub async fn set_upstream(&self, peer: Arc<dyn Room>) -> Result<(), RoomError> {
        // fetch before taking the lock; never hold it across peer I/O
        let info = peer.info().await?;

        let prior = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut state.upstream, Some(peer.clone()))
        };
        if let Some(prior) = prior {
            let _ = prior.close().await;
        }

        tracing::debug!(
            room = %self.uid,
            upstream = ?info.meta.uid,
            "set upstream"
        );

        let bridge_dedup = Arc::new(Deduplicator::default());
        let done = CancellationToken::new();

        tokio::spawn(listen_upstream(
            self.me.clone(),
            self.owner.clone(),
            peer.clone(),
            done.clone(),
            bridge_dedup.clone(),
        ));
        tokio::spawn(forward_to_upstream(
            self.me.clone(),
            peer,
            done,
            bridge_dedup,
        ));

        Ok(())
    }
}

#[async_trait]
impl Room for LocalRoom {
    async fn info(&self) -> Result<RoomObject, RoomError> {
        let mut room = RoomObject {
            api: ApiMeta::new(KIND_ROOM),
            meta: ObjectMeta::with_uid(self.uid),
            owner: User::new(self.owner.clone()),
            key_signature: self.key.published_signature(),
            cert_sign: String::new(),
            endpoints: Vec::new(),
        };
        sign_api_object(&self.key, &mut room)?;
        Ok(room)
    }

    async fn create_message(&self, msg: &mut Message) -> Result<(), RoomError> {
        let state = self.state.read().await;

        let uid = *msg.meta.uid.get_or_insert_with(Uid::new);

        if self.dedup.observe(uid.as_bytes()) {
            tracing::debug!(room = %self.uid, message = %uid, "duplicated message");
            return Ok(());
        }

        if state.closed {
            return Err(RoomError::Closed);
        }

        let mut lost = false;
        for subscriber in &state.subscribers {
            match subscriber.send(msg.clone()) {
                Ok(()) => {}
                Err(ChannelError::Busy) => {
                    tracing::debug!(room = %self.uid, message = %uid, "subscriber busy, dropped");
                }
                Err(ChannelError::Closed) => lost = true,
            }
        }
        drop(state);

        if lost {
            let mut state = self.state.write().await;
            state.subscribers.retain(|s| !s.is_closed());
        }

        Ok(())
    }

    async fn listen(&self, user: Option<ObjectMeta>) -> Result<Subscription, RoomError> {
        let (sender, subscription) = channel::channel(CHANNEL_BUFFER);

        {
            let mut state = self.state.write().await;
            if state.closed {
                return Err(RoomError::Closed);
            }
            // sweep channels whose subscriber went away
            state.subscribers.retain(|s| !s.is_closed());
            state.subscribers.push(sender);
        }

        if let Some(user) = user {
            // announce the leave when this subscription ends, however it ends
            let me = self.me.clone();
            let room_uid = self.uid;
            let done = subscription.done();
            let leaving = user.clone();
            tokio::spawn(async move {
                done.cancelled().await;
                if let Some(room) = me.upgrade() {
                    let mut leave = Message::leave(ObjectMeta::with_uid(room_uid), leaving);
                    if let Err(e) = room.create_message(&mut leave).await {
                        tracing::debug!(room = %room_uid, error = %e, "member leave message not sent");
                    }
                }
            });

            let mut join = Message::join(ObjectMeta::with_uid(self.uid), user);
            if let Err(e) = self.create_message(&mut join).await {
                tracing::error!(room = %self.uid, error = %e, "send member join message error");
            }
        }

        Ok(subscription)
    }

    async fn close(&self) -> Result<(), RoomError> {
        let mut state = self.state.write().await;
        for subscriber in state.subscribers.drain(..) {
            let _ = subscriber.close();
        }
        state.closed = true;
        Ok(())
    }
}

// ── Upstream bridge ───────────────────────────────────────────────────────────

/// Forward locally-admitted messages to the upstream.
///
/// Subscribes without a user identity so no join beacon is emitted for the
/// bridge itself.
async fn forward_to_upstream(
    me: Weak<LocalRoom>,
    upstream: Arc<dyn Room>,
    done: CancellationToken,
    bridge_dedup: Arc<Deduplicator>,
) {
    let mut subscription = {
        let Some(room) = me.upgrade() else {
            return;
        };
        match room.listen(None).await {
            Ok(sub) => sub,
            Err(e) => {
                tracing::error!(error = %e, "listen on own room error");
                teardown(&me, &upstream).await;
                return;
            }
        }
    };

    loop {
        let msg = tokio::select! {
            _ = done.cancelled() => break,
            msg = subscription.recv() => msg,
        };
        let Some(mut msg) = msg else { break };

        let Some(uid) = msg.meta.uid else { continue };
        if bridge_dedup.observe(uid.as_bytes()) {
            continue;
        }

        match upstream.create_message(&mut msg).await {
            Ok(()) => {}
            Err(RoomError::Closed) | Err(RoomError::Channel(ChannelError::Closed)) => break,
            Err(e) => tracing::error!(error = %e, "forward to upstream error"),
        }
    }

    teardown(&me, &upstream).await;
}

/// Ingest the upstream's message stream into the local room.
///
/// Every incoming message is recorded in the bridge deduplicator first so
/// the forwarder will not echo it straight back.
async fn listen_upstream(
    me: Weak<LocalRoom>,
    owner: ObjectMeta,
    upstream: Arc<dyn Room>,
    done: CancellationToken,
    bridge_dedup: Arc<Deduplicator>,
) {
    let mut subscription = match upstream.listen(Some(owner)).await {
        Ok(sub) => sub,
        Err(e) => {
            tracing::error!(error = %e, "listen upstream error");
            done.cancel();
            teardown(&me, &upstream).await;
            return;
        }
    };

    while let Some(mut msg) = subscription.recv().await {
        if let Some(uid) = msg.meta.uid {
            bridge_dedup.observe(uid.as_bytes());
        }

        let Some(room) = me.upgrade() else { break };
        if let Err(e) = room.create_message(&mut msg).await {
            tracing::error!(error = %e, "create message from upstream error");
        }
    }

    done.cancel();
    teardown(&me, &upstream).await;
}

/// Clear the upstream pointer — only if it still refers to this bridge's
/// peer — and close the peer. Safe to call from both bridge tasks.
async fn teardown(me: &Weak<LocalRoom>, upstream: &Arc<dyn Room>) {
    if let Some(room) = me.upgrade() {
        let mut state = room.state.write().await;
        if let Some(current) = &state.upstream {
            if Arc::ptr_eq(current, upstream) {
                state.upstream = None;
            }
        }
    }
    let _ = upstream.close().await;
}
