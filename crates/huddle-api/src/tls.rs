//! Self-issued TLS material.
//!
//! Every node mints a fresh P-256 key and self-signed certificate at
//! startup. There is no CA: trust is established by publishing the
//! certificate's SHA-256 fingerprint through signed discovery
//! advertisements, which connecting peers pin.

use thiserror::Error;

use huddle_core::signing::fingerprint_cert;

/// Certificate, private key, and the fingerprint peers pin.
pub struct TlsMaterial {
    /// DER-encoded leaf certificate.
    pub cert_der: Vec<u8>,
    /// DER-encoded (PKCS#8) private key.
    pub key_der: Vec<u8>,
    /// `sha256:` fingerprint of `cert_der`.
    pub fingerprint: String,
}

#[derive(Debug, Error)]
#[error("generate certificate error: {0}")]
pub struct TlsError(#[from] rcgen::Error);

/// Generate a fresh self-signed server certificate.
///
/// CN is the node name, validity one year, serverAuth EKU.
pub fn generate_self_signed(common_name: &str) -> Result<TlsMaterial, TlsError> {
    let mut params = rcgen::CertificateParams::new(Vec::new())?;
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, common_name);

    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(365);

    params.key_usages = vec![
        rcgen::KeyUsagePurpose::DigitalSignature,
        rcgen::KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth];

    // P-256 ECDSA
    let key = rcgen::KeyPair::generate()?;
    let cert = params.self_signed(&key)?;

    let cert_der = cert.der().to_vec();
    let fingerprint = fingerprint_cert(&cert_der);

    Ok(TlsMaterial {
        cert_der,
        key_der: key.serialize_der(),
        fingerprint,
    })
}
