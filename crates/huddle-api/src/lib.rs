//! huddle-api — the HTTPS surface a node exposes for its room.
//!
//! Three endpoints under `/chat/v1`: room info, message injection, and a
//! long-lived newline-delimited message stream. TLS terminates here with
//! a self-issued certificate; the fingerprint returned from [`serve`] is
//! what peers pin.

pub mod handlers;
pub mod tls;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tokio_util::sync::CancellationToken;

use huddle_core::Uid;
use huddle_rooms::Room;

pub use handlers::ApiState;
use handlers::RequestId;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// A running chat server.
pub struct ServerHandle {
    /// The address actually bound — the listen port may have been 0.
    pub addr: SocketAddr,
    /// `sha256:` fingerprint of the served leaf certificate.
    pub cert_fingerprint: String,
}

/// Start serving `room` over HTTPS on `listen_addr`.
///
/// Generates the certificate, binds, and returns once the listener is
/// ready. The server runs until `shutdown` is cancelled.
pub async fn serve(
    room: Arc<dyn Room>,
    listen_addr: SocketAddr,
    node_name: &str,
    shutdown: CancellationToken,
) -> Result<ServerHandle> {
    // axum-server builds its ServerConfig from the process-level provider;
    // pin it to ring so the choice never depends on enabled features
    let _ = rustls::crypto::ring::default_provider().install_default();

    let material =
        tls::generate_self_signed(node_name).context("generate certificate error")?;
    let cert_fingerprint = material.fingerprint.clone();

    let config = RustlsConfig::from_der(vec![material.cert_der], material.key_der)
        .await
        .context("create certificate pair error")?;

    let app = Router::new()
        .route(
            "/chat/v1/info",
            get(handlers::handle_info),
        )
        .route(
            "/chat/v1/messages",
            get(handlers::handle_listen_messages).post(handlers::handle_create_message),
        )
        .layer(middleware::from_fn(inject_request_id))
        .with_state(ApiState { room });

    let handle = axum_server::Handle::new();
    let server = axum_server::bind_rustls(listen_addr, config).handle(handle.clone());

    tokio::spawn(async move {
        if let Err(e) = server.serve(app.into_make_service()).await {
            tracing::error!(error = %e, "serve error");
        }
    });

    let addr = handle
        .listening()
        .await
        .context("listener closed before binding")?;
    tracing::info!(%addr, fingerprint = %cert_fingerprint, "chat server listening");

    tokio::spawn(async move {
        shutdown.cancelled().await;
        handle.shutdown();
    });

    Ok(ServerHandle {
        addr,
        cert_fingerprint,
    })
}

/// Mint a request UID, expose it to handlers, and echo it in the
/// `X-Request-Id` response header.
async fn inject_request_id(mut request: Request, next: Next) -> Response {
    let request_id = Uid::new();
    request.extensions_mut().insert(RequestId(request_id));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
