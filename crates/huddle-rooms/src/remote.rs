//! A peer's room, reached over its HTTPS surface.
//!
//! The peer presents a self-issued certificate, so chain validation is
//! replaced by pinning: the first raw certificate presented must
//! fingerprint to the value published through discovery. Everything else
//! is plain JSON over `/chat/v1`, with the message listen arriving as a
//! newline-delimited stream.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use serde::de::DeserializeOwned;
use serde::Serialize;

use huddle_core::api::{Message, ObjectMeta, Room as RoomObject, Status, KIND_MESSAGE};
use huddle_core::signing::fingerprint_cert;

use crate::channel::{self, ChannelError, Sender, Subscription, CHANNEL_BUFFER};
use crate::room::{Room, RoomError};

/// Cap on non-streaming response bodies.
const MAX_RESPONSE_BYTES: usize = 1 << 20;

/// Client-side adapter to a peer room.
pub struct RemoteRoom {
    endpoint: String,
    client: reqwest::Client,
    state: Mutex<RemoteState>,
}

struct RemoteState {
    closed: bool,
    listeners: Vec<Sender>,
}

impl RemoteRoom {
    /// Build a client for `endpoint` (e.g. `https://192.168.1.20:40123`)
    /// pinned to the peer certificate fingerprint `cert_sign`.
    pub fn new(endpoint: impl Into<String>, cert_sign: &str) -> Result<Self, RoomError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let tls = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(PinnedCertVerifier {
                expected: cert_sign.to_string(),
            }))
            .with_no_client_auth();

        let client = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .build()?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
            state: Mutex::new(RemoteState {
                closed: false,
                listeners: Vec::new(),
            }),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, uri: &str) -> String {
        format!("{}/chat/v1{}", self.endpoint, uri)
    }

    fn is_closed(&self) -> bool {
        self.state.lock().expect("remote room lock poisoned").closed
    }

    async fn do_request<B, T>(
        &self,
        method: reqwest::Method,
        uri: &str,
        body: Option<&B>,
    ) -> Result<T, RoomError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.client.request(method, self.url(uri));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;

        let status = response.status();
        let raw = read_limited(response).await?;

        if status != reqwest::StatusCode::OK {
            if let Ok(api_status) = serde_json::from_slice::<Status>(&raw) {
                return Err(api_status.into());
            }
            return Err(RoomError::Unexpected(format!(
                "unexpected status code: {} (!= 200), body: {}",
                status.as_u16(),
                String::from_utf8_lossy(&raw),
            )));
        }

        Ok(serde_json::from_slice(&raw)?)
    }
}

/// Read a response body, refusing anything past the 1 MiB cap.
async fn read_limited(response: reqwest::Response) -> Result<Vec<u8>, RoomError> {
    let mut raw = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if raw.len() + chunk.len() > MAX_RESPONSE_BYTES {
            raw.extend_from_slice(&chunk[..MAX_RESPONSE_BYTES - raw.len()]);
            return Err(RoomError::Unexpected(format!(
                "response body too large (> 1MiB), first 1MiB: {}",
                String::from_utf8_lossy(&raw),
            )));
        }
        raw.extend_from_slice(&chunk);
    }
    Ok(raw)
}

#[async_trait]
impl Room for RemoteRoom {
    async fn info(&self) -> Result<RoomObject, RoomError> {
        self.do_request::<(), _>(reqwest::Method::GET, "/info", None)
            .await
    }

    async fn create_message(&self, msg: &mut Message) -> Result<(), RoomError> {
        if self.is_closed() {
            return Err(RoomError::Closed);
        }
        let created: Message = self
            .do_request(reqwest::Method::POST, "/messages", Some(&*msg))
            .await?;
        *msg = created;
        Ok(())
    }

    async fn listen(&self, user: Option<ObjectMeta>) -> Result<Subscription, RoomError> {
        if self.is_closed() {
            return Err(RoomError::Closed);
        }

        let mut request = self.client.get(self.url("/messages"));
        if let Some(user) = &user {
            let uid = user.uid.map(|u| u.to_string()).unwrap_or_default();
            request = request.query(&[("userUID", uid.as_str()), ("userName", user.name.as_str())]);
        }

        let response = request.send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let raw = read_limited(response).await.unwrap_or_default();
            return Err(RoomError::Unexpected(format!(
                "unexpected status code: {} (!= 200), body: {}",
                status.as_u16(),
                String::from_utf8_lossy(&raw),
            )));
        }

        let (sender, subscription) = channel::channel(CHANNEL_BUFFER);

        {
            let mut state = self.state.lock().expect("remote room lock poisoned");
            if state.closed {
                let _ = sender.close();
                return Err(RoomError::Closed);
            }
            state.listeners.push(sender.clone());
        }

        tokio::spawn(read_message_stream(response, sender));

        Ok(subscription)
    }

    async fn close(&self) -> Result<(), RoomError> {
        let mut state = self.state.lock().expect("remote room lock poisoned");
        state.closed = true;
        for listener in state.listeners.drain(..) {
            let _ = listener.close();
        }
        Ok(())
    }
}

/// Decode newline-delimited messages from the response body into the
/// subscriber channel. Closing the channel cancels the request by
/// dropping the response.
async fn read_message_stream(response: reqwest::Response, sender: Sender) {
    let done = sender.done();
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    'read: loop {
        let chunk = tokio::select! {
            _ = done.cancelled() => break,
            chunk = stream.next() => chunk,
        };
        let chunk = match chunk {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                tracing::debug!(error = %e, "message stream ended");
                break;
            }
            None => break,
        };

        buffer.extend_from_slice(&chunk);
        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            if line.is_empty() {
                continue;
            }

            let msg: Message = match serde_json::from_slice(line) {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::debug!(error = %e, "decode message error");
                    break 'read;
                }
            };
            if !msg.api.is_kind(KIND_MESSAGE) {
                // TODO: decode Status frames from the server instead of skipping them
                tracing::debug!(kind = %msg.api.kind, "skipping non-message frame");
                continue;
            }

            match sender.send(msg) {
                Ok(()) => {}
                Err(ChannelError::Busy) => {
                    tracing::debug!("listener busy, message dropped");
                }
                Err(ChannelError::Closed) => break 'read,
            }
        }
    }

    let _ = sender.close();
}

// ── Certificate pinning ───────────────────────────────────────────────────────

/// Accepts exactly one certificate: the one whose DER bytes fingerprint to
/// the pinned value. Chain building and name checks do not apply to
/// self-issued peer certificates.
#[derive(Debug)]
struct PinnedCertVerifier {
    expected: String,
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let sign = fingerprint_cert(end_entity.as_ref());
        if sign != self.expected {
            return Err(rustls::Error::General(format!(
                "invalid certificate, signature mismatch: {:?} (expected {:?})",
                sign, self.expected,
            )));
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
