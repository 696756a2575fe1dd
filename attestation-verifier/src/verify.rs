//! Remote-attestation verification.
//!
//! Every step is a hard gate: the endpoint certificate must carry a quote,
//! the quote must validate against collateral, and both the signer and
//! (when requested) code measurements must match exactly. Trust failures
//! are logged before they are returned so a verification failure always
//! leaves a trace even if the caller swallows the error.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::quote::Quote;
use crate::tls;

/// Outcome of a successful verification.
///
/// The certificate bytes are what the secret-delivery client pins; they are
/// only handed out once every gate has passed.
#[derive(Debug, Clone)]
pub struct AttestationResult {
    pub quote_code_measurement: [u8; 32],
    pub quote_signer_measurement: [u8; 32],
    pub certificate_der: Vec<u8>,
}

/// Collateral-backed quote validation.
///
/// The cryptographic internals (signing chain, TCB status, CRLs) live
/// behind this seam; the verifier only cares that validation either passes
/// or rejects.
#[async_trait]
pub trait CollateralService: Send + Sync {
    async fn validate(&self, quote: &Quote) -> Result<()>;
}

/// Validates quotes against collateral served by a PCCS instance.
pub struct PccsCollateralService {
    client: reqwest::Client,
    pccs_url: String,
}

impl PccsCollateralService {
    pub fn new(pccs_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            client,
            pccs_url: pccs_url.into(),
        })
    }
}

#[async_trait]
impl CollateralService for PccsCollateralService {
    async fn validate(&self, quote: &Quote) -> Result<()> {
        if quote.version() != 3 {
            return Err(Error::CollateralValidation(format!(
                "unsupported quote version {}",
                quote.version()
            )));
        }

        // Collateral availability is part of the validation contract: a
        // quote that cannot be checked against a live root CRL is rejected,
        // not waved through.
        let url = format!("{}/sgx/certification/v4/rootcacrl", self.pccs_url);
        let response = self.client.get(&url).send().await.map_err(|e| {
            Error::CollateralValidation(format!("failed to reach PCCS at {}: {e}", self.pccs_url))
        })?;

        if !response.status().is_success() {
            return Err(Error::CollateralValidation(format!(
                "PCCS returned {} for {url}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Verifies that a live endpoint is an attested enclave running expected code.
pub struct AttestationVerifier {
    client: reqwest::Client,
    signer_key_url: String,
    collateral: Box<dyn CollateralService>,
}

impl AttestationVerifier {
    /// Standard verifier: collateral via PCCS, signer key from the
    /// well-known distribution endpoint.
    pub fn new(pccs_url: impl Into<String>, signer_key_url: impl Into<String>) -> Result<Self> {
        let collateral = Box::new(PccsCollateralService::new(pccs_url)?);
        Self::with_collateral_service(signer_key_url, collateral)
    }

    pub fn with_collateral_service(
        signer_key_url: impl Into<String>,
        collateral: Box<dyn CollateralService>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            client,
            signer_key_url: signer_key_url.into(),
            collateral,
        })
    }

    /// Fetch the live endpoint's certificate and verify it end to end.
    pub async fn verify(
        &self,
        host: &str,
        port: u16,
        expected_measurement: Option<[u8; 32]>,
    ) -> Result<AttestationResult> {
        let certificate_der = tls::fetch_server_certificate(host, port).await?;
        self.verify_certificate(certificate_der, expected_measurement)
            .await
    }

    /// Verify an already-retrieved certificate.
    pub async fn verify_certificate(
        &self,
        certificate_der: Vec<u8>,
        expected_measurement: Option<[u8; 32]>,
    ) -> Result<AttestationResult> {
        let quote = Quote::from_certificate(&certificate_der)?;

        let expected_signer = self.expected_signer_measurement().await?;

        self.collateral.validate(&quote).await.map_err(|e| {
            error!("quote collateral validation failed: {e}");
            e
        })?;

        if quote.mr_signer != expected_signer {
            let err = Error::WrongSigner {
                expected: hex::encode(expected_signer),
                actual: hex::encode(quote.mr_signer),
            };
            error!("attestation failed: {err}");
            return Err(err);
        }

        match expected_measurement {
            Some(expected) => {
                if quote.mr_enclave != expected {
                    let err = Error::WrongCodeMeasurement {
                        expected: hex::encode(expected),
                        actual: hex::encode(quote.mr_enclave),
                    };
                    error!("attestation failed: {err}");
                    return Err(err);
                }
                info!(
                    "code measurement verified: {}",
                    hex::encode(quote.mr_enclave)
                );
            }
            None => {
                warn!(
                    "no expected code measurement supplied; the enclave's code \
                     fingerprint was NOT checked"
                );
            }
        }

        Ok(AttestationResult {
            quote_code_measurement: quote.mr_enclave,
            quote_signer_measurement: quote.mr_signer,
            certificate_der,
        })
    }

    /// Derive the expected signer measurement from the published signer key.
    async fn expected_signer_measurement(&self) -> Result<[u8; 32]> {
        let response = self.client.get(&self.signer_key_url).send().await?;

        if !response.status().is_success() {
            return Err(Error::CollateralValidation(format!(
                "signer key endpoint returned {}",
                response.status()
            )));
        }

        let key_bytes = response.bytes().await?;
        Ok(Sha256::digest(&key_bytes).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct AcceptingCollateral;

    #[async_trait]
    impl CollateralService for AcceptingCollateral {
        async fn validate(&self, _quote: &Quote) -> Result<()> {
            Ok(())
        }
    }

    struct RejectingCollateral;

    #[async_trait]
    impl CollateralService for RejectingCollateral {
        async fn validate(&self, _quote: &Quote) -> Result<()> {
            Err(Error::CollateralValidation("TCB out of date".into()))
        }
    }

    const SIGNER_KEY: &[u8] = b"test signer public key material";

    fn signer_measurement() -> [u8; 32] {
        Sha256::digest(SIGNER_KEY).into()
    }

    fn quote_certificate(mr_enclave: [u8; 32], mr_signer: [u8; 32]) -> Vec<u8> {
        let mut raw = vec![0u8; 48 + 384];
        raw[0] = 3;
        raw[48 + 64..48 + 96].copy_from_slice(&mr_enclave);
        raw[48 + 128..48 + 160].copy_from_slice(&mr_signer);

        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        params
            .custom_extensions
            .push(rcgen::CustomExtension::from_oid_content(
                &[1, 2, 840, 113741, 1337, 6],
                raw,
            ));
        params.self_signed(&key).unwrap().der().to_vec()
    }

    async fn signer_key_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/enclave-signer.pem"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(SIGNER_KEY))
            .mount(&server)
            .await;
        server
    }

    fn verifier(server: &MockServer, collateral: Box<dyn CollateralService>) -> AttestationVerifier {
        AttestationVerifier::with_collateral_service(
            format!("{}/enclave-signer.pem", server.uri()),
            collateral,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn accepts_matching_measurements() {
        let server = signer_key_server().await;
        let code = [0x42u8; 32];
        let cert = quote_certificate(code, signer_measurement());

        let result = verifier(&server, Box::new(AcceptingCollateral))
            .verify_certificate(cert.clone(), Some(code))
            .await
            .unwrap();

        assert_eq!(result.quote_code_measurement, code);
        assert_eq!(result.quote_signer_measurement, signer_measurement());
        assert_eq!(result.certificate_der, cert);
    }

    #[tokio::test]
    async fn omitted_measurement_downgrades_but_succeeds() {
        let server = signer_key_server().await;
        let cert = quote_certificate([0x42; 32], signer_measurement());

        let result = verifier(&server, Box::new(AcceptingCollateral))
            .verify_certificate(cert, None)
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn collateral_rejection_is_fatal() {
        let server = signer_key_server().await;
        let code = [0x42u8; 32];
        let cert = quote_certificate(code, signer_measurement());

        let result = verifier(&server, Box::new(RejectingCollateral))
            .verify_certificate(cert, Some(code))
            .await;

        assert!(matches!(result, Err(Error::CollateralValidation(_))));
    }

    #[tokio::test]
    async fn plain_certificate_is_quote_not_found() {
        let server = signer_key_server().await;
        let key = rcgen::KeyPair::generate().unwrap();
        let params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        let cert = params.self_signed(&key).unwrap().der().to_vec();

        let result = verifier(&server, Box::new(AcceptingCollateral))
            .verify_certificate(cert, None)
            .await;

        assert!(matches!(result, Err(Error::QuoteNotFound)));
    }

    #[tokio::test]
    async fn any_flipped_bit_in_expected_code_measurement_fails() {
        let server = signer_key_server().await;
        let code = [0x42u8; 32];
        let cert = quote_certificate(code, signer_measurement());
        let verifier = verifier(&server, Box::new(AcceptingCollateral));

        for byte in 0..32 {
            for bit in 0..8 {
                let mut flipped = code;
                flipped[byte] ^= 1 << bit;

                let result = verifier
                    .verify_certificate(cert.clone(), Some(flipped))
                    .await;
                assert!(
                    matches!(result, Err(Error::WrongCodeMeasurement { .. })),
                    "bit {bit} of byte {byte} was not detected"
                );
            }
        }
    }

    #[tokio::test]
    async fn any_flipped_bit_in_quote_signer_measurement_fails() {
        let server = signer_key_server().await;
        let code = [0x42u8; 32];
        let good_signer = signer_measurement();
        let verifier = verifier(&server, Box::new(AcceptingCollateral));

        for byte in 0..32 {
            for bit in 0..8 {
                let mut flipped = good_signer;
                flipped[byte] ^= 1 << bit;
                let cert = quote_certificate(code, flipped);

                let result = verifier.verify_certificate(cert, Some(code)).await;
                assert!(
                    matches!(result, Err(Error::WrongSigner { .. })),
                    "bit {bit} of byte {byte} was not detected"
                );
            }
        }
    }
}
