//! Quote extraction and field access.
//!
//! Enclave-terminated TLS endpoints embed their hardware quote in an X.509
//! extension of the certificate they present. The quote layout is the DCAP
//! v3 wire format: a 48-byte header followed by the 384-byte report body.

use x509_parser::der_parser::asn1_rs::{oid, Oid};
use x509_parser::prelude::*;

use crate::error::{Error, Result};

/// X.509 extension OID carrying the raw quote bytes.
pub const QUOTE_EXTENSION_OID: Oid<'static> = oid!(1.2.840.113741.1337.6);

const QUOTE_HEADER_LEN: usize = 48;
const MR_ENCLAVE_OFFSET: usize = QUOTE_HEADER_LEN + 64;
const MR_SIGNER_OFFSET: usize = QUOTE_HEADER_LEN + 128;
const REPORT_DATA_OFFSET: usize = QUOTE_HEADER_LEN + 320;
const MIN_QUOTE_LEN: usize = REPORT_DATA_OFFSET + 64;

/// A parsed hardware quote.
///
/// Only the fields the deployment pipeline compares are pulled out; the raw
/// bytes are kept so the collateral service can validate the full statement.
#[derive(Debug, Clone)]
pub struct Quote {
    pub mr_enclave: [u8; 32],
    pub mr_signer: [u8; 32],
    pub report_data: [u8; 64],
    pub raw: Vec<u8>,
}

impl Quote {
    /// Parse a raw quote blob, checking the minimum wire length.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < MIN_QUOTE_LEN {
            return Err(Error::QuoteParse(format!(
                "quote too short: {} bytes, need at least {}",
                raw.len(),
                MIN_QUOTE_LEN
            )));
        }

        let mut mr_enclave = [0u8; 32];
        mr_enclave.copy_from_slice(&raw[MR_ENCLAVE_OFFSET..MR_ENCLAVE_OFFSET + 32]);

        let mut mr_signer = [0u8; 32];
        mr_signer.copy_from_slice(&raw[MR_SIGNER_OFFSET..MR_SIGNER_OFFSET + 32]);

        let mut report_data = [0u8; 64];
        report_data.copy_from_slice(&raw[REPORT_DATA_OFFSET..REPORT_DATA_OFFSET + 64]);

        Ok(Self {
            mr_enclave,
            mr_signer,
            report_data,
            raw: raw.to_vec(),
        })
    }

    /// Extract the quote embedded in a DER-encoded certificate.
    ///
    /// A certificate without the quote extension is not enclave-backed; that
    /// case surfaces as [`Error::QuoteNotFound`] so callers can downgrade to
    /// "not verifiable" instead of treating it as a hard failure.
    pub fn from_certificate(cert_der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(cert_der)
            .map_err(|e| Error::QuoteParse(format!("failed to parse certificate: {e}")))?;

        let extension = cert
            .extensions()
            .iter()
            .find(|ext| ext.oid == QUOTE_EXTENSION_OID)
            .ok_or(Error::QuoteNotFound)?;

        Self::parse(extension.value)
    }

    /// Version field from the quote header.
    pub fn version(&self) -> u16 {
        u16::from_le_bytes([self.raw[0], self.raw[1]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn build_raw_quote(mr_enclave: [u8; 32], mr_signer: [u8; 32]) -> Vec<u8> {
        let mut raw = vec![0u8; MIN_QUOTE_LEN];
        raw[0] = 3; // version 3, little endian
        raw[MR_ENCLAVE_OFFSET..MR_ENCLAVE_OFFSET + 32].copy_from_slice(&mr_enclave);
        raw[MR_SIGNER_OFFSET..MR_SIGNER_OFFSET + 32].copy_from_slice(&mr_signer);
        raw
    }

    #[test]
    fn parse_extracts_measurements() {
        let raw = build_raw_quote([0xAA; 32], [0xBB; 32]);
        let quote = Quote::parse(&raw).unwrap();

        assert_eq!(quote.mr_enclave, [0xAA; 32]);
        assert_eq!(quote.mr_signer, [0xBB; 32]);
        assert_eq!(quote.version(), 3);
    }

    #[test]
    fn parse_rejects_truncated_quote() {
        let result = Quote::parse(&[0u8; 100]);
        assert!(matches!(result, Err(Error::QuoteParse(_))));
    }

    #[test]
    fn certificate_without_extension_is_quote_not_found() {
        let key = rcgen::KeyPair::generate().unwrap();
        let params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        let cert = params.self_signed(&key).unwrap();

        let result = Quote::from_certificate(cert.der());
        assert!(matches!(result, Err(Error::QuoteNotFound)));
    }

    #[test]
    fn certificate_with_extension_round_trips() {
        let raw = build_raw_quote([0x11; 32], [0x22; 32]);

        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        params
            .custom_extensions
            .push(rcgen::CustomExtension::from_oid_content(
                &[1, 2, 840, 113741, 1337, 6],
                raw.clone(),
            ));
        let cert = params.self_signed(&key).unwrap();

        let quote = Quote::from_certificate(cert.der()).unwrap();
        assert_eq!(quote.mr_enclave, [0x11; 32]);
        assert_eq!(quote.mr_signer, [0x22; 32]);
        assert_eq!(quote.raw, raw);
    }
}
