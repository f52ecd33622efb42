//! The node manager.
//!
//! Owns the local room and drives the three long-lived pieces around it:
//! the HTTPS server, the discovery transponder, and the upstream search
//! loop. The search loop retries every second until a qualifying peer is
//! linked; if the bridge later tears down, it simply finds a new one.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use huddle_api::ServerHandle;
use huddle_core::api::ObjectMeta;
use huddle_core::config::NodeOptions;
use huddle_core::{Key, Uid};
use huddle_discovery::endpoints::advertised_endpoints;
use huddle_discovery::{Scanner, SearchOptions, Transponder};
use huddle_rooms::{LocalRoom, RemoteRoom, Room};

/// How often the search loop looks for an upstream.
const SEARCH_TICK: Duration = Duration::from_secs(1);

pub struct NodeManager {
    key: Key,
    owner: ObjectMeta,
    options: NodeOptions,
    room: Arc<LocalRoom>,
    shutdown: CancellationToken,
    server: Option<ServerHandle>,
}

impl NodeManager {
    pub fn new(options: NodeOptions, key: Key) -> Result<Self> {
        options.validate().context("invalid node options")?;
        let owner = ObjectMeta::named(Uid::new(), options.name.clone());
        let room = LocalRoom::new(key.clone(), owner.clone());
        Ok(Self {
            key,
            owner,
            options,
            room,
            shutdown: CancellationToken::new(),
            server: None,
        })
    }

    /// The room this node hosts.
    pub fn room(&self) -> Arc<LocalRoom> {
        self.room.clone()
    }

    /// This node's user identity.
    pub fn owner(&self) -> &ObjectMeta {
        &self.owner
    }

    /// The bound server address, once started.
    pub fn server_addr(&self) -> Option<std::net::SocketAddr> {
        self.server.as_ref().map(|s| s.addr)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start the server, the transponder, and the upstream search loop.
    pub async fn start(&mut self) -> Result<()> {
        let listen_addr = self.options.listen_addr()?;
        let discovery_addr = self.options.discovery_addr()?;

        let node_name = if self.options.name.is_empty() {
            "huddle"
        } else {
            &self.options.name
        };
        let server = huddle_api::serve(
            self.room.clone() as Arc<dyn Room>,
            listen_addr,
            node_name,
            self.shutdown.child_token(),
        )
        .await
        .context("start server error")?;

        // advertise where the server actually landed
        let mut advertisement = self.room.info().await.context("get room info error")?;
        advertisement.endpoints = advertised_endpoints(server.addr);
        advertisement.cert_sign = server.cert_fingerprint.clone();
        tracing::debug!(endpoints = ?advertisement.endpoints, "advertised endpoints");

        let transponder = Transponder::new(discovery_addr, advertisement, self.key.clone());
        transponder
            .start(self.shutdown.child_token())
            .context("start transponder error")?;

        tokio::spawn(search_loop(
            self.room.clone(),
            Scanner::new(discovery_addr),
            self.key.clone(),
            self.shutdown.child_token(),
        ));

        self.server = Some(server);
        Ok(())
    }

    /// Stop everything and close the room.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let _ = self.room.close().await;
    }
}

/// Look for a peer room every second until one is linked; resume whenever
/// the link drops.
async fn search_loop(
    room: Arc<LocalRoom>,
    scanner: Scanner,
    key: Key,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(SEARCH_TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if room.upstream().await.is_some() {
            continue;
        }

        let opts = SearchOptions {
            exclude: vec![room.uid()],
            check_availability: true,
            ..SearchOptions::default()
        };
        let found = match scanner.search(Some(&key), opts).await {
            Ok(found) => found,
            Err(e) => {
                tracing::debug!(error = %e, "room search error");
                continue;
            }
        };

        let Some(candidate) = found.into_iter().find(|r| r.available_endpoint.is_some()) else {
            continue;
        };
        let Some(endpoint) = candidate.available_endpoint.clone() else {
            continue;
        };

        let remote = match RemoteRoom::new(&endpoint, &candidate.info.cert_sign) {
            Ok(remote) => Arc::new(remote),
            Err(e) => {
                tracing::warn!(%endpoint, error = %e, "remote room setup error");
                continue;
            }
        };

        match room.set_upstream(remote).await {
            Ok(()) => {
                tracing::info!(
                    upstream = ?candidate.info.meta.uid,
                    %endpoint,
                    "linked to peer room"
                );
            }
            Err(e) => {
                tracing::warn!(%endpoint, error = %e, "link to peer room error");
            }
        }
    }
}
