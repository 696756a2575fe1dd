//! TLS certificate retrieval and certificate-pinned clients.
//!
//! The verifier first grabs whatever certificate a live endpoint presents
//! (no trust decision yet), and only after the quote checks pass does the
//! pipeline open a pinned connection that accepts that exact certificate
//! and nothing else.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::{Error, Result};

/// SHA-256 fingerprint of a DER-encoded certificate, hex-encoded.
pub fn certificate_fingerprint(cert_der: &[u8]) -> String {
    hex::encode(Sha256::digest(cert_der))
}

fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn supported_schemes() -> Vec<SignatureScheme> {
    rustls::crypto::aws_lc_rs::default_provider()
        .signature_verification_algorithms
        .supported_schemes()
}

/// Verifier that accepts any certificate. Used only to retrieve the
/// certificate an endpoint presents; nothing read over such a connection
/// is trusted.
#[derive(Debug)]
struct RetrievalVerifier;

impl ServerCertVerifier for RetrievalVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        supported_schemes()
    }
}

/// Fetch the end-entity certificate presented by `host:port`.
pub async fn fetch_server_certificate(host: &str, port: u16) -> Result<Vec<u8>> {
    install_crypto_provider();

    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(RetrievalVerifier))
        .with_no_client_auth();

    let connector = TlsConnector::from(Arc::new(config));
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| Error::Tls(format!("failed to connect to {host}:{port}: {e}")))?;

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| Error::Tls(format!("invalid server name {host}: {e}")))?;

    let tls = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| Error::Tls(format!("TLS handshake with {host}:{port} failed: {e}")))?;

    let (_, session) = tls.get_ref();
    let certs = session
        .peer_certificates()
        .ok_or_else(|| Error::Tls(format!("{host}:{port} presented no certificate")))?;
    let end_entity = certs
        .first()
        .ok_or_else(|| Error::Tls(format!("{host}:{port} presented an empty chain")))?;

    Ok(end_entity.to_vec())
}

/// Verifier that accepts exactly one certificate, by fingerprint.
///
/// Handshake signatures are still verified, so a peer must actually hold
/// the pinned certificate's private key.
#[derive(Debug)]
pub struct PinnedCertVerifier {
    pinned_fingerprint: String,
}

impl PinnedCertVerifier {
    pub fn new(cert_der: &[u8]) -> Self {
        Self {
            pinned_fingerprint: certificate_fingerprint(cert_der),
        }
    }
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let actual = certificate_fingerprint(end_entity.as_ref());
        if actual != self.pinned_fingerprint {
            return Err(rustls::Error::General(format!(
                "certificate fingerprint mismatch: expected {}, got {}",
                self.pinned_fingerprint, actual
            )));
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        supported_schemes()
    }
}

/// Build a reqwest client pinned to the given certificate.
///
/// Connections to a server presenting any other certificate fail during the
/// handshake, before a single request byte is sent.
pub fn pinned_client(cert_der: &[u8]) -> Result<reqwest::Client> {
    install_crypto_provider();

    let verifier = PinnedCertVerifier::new(cert_der);
    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    reqwest::Client::builder()
        .use_preconfigured_tls(config)
        .build()
        .map_err(|e| Error::Tls(format!("failed to build pinned client: {e}")))
}
